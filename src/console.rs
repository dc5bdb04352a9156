//! Terminal stand-in for the start/stop controls of the desktop UI.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::plugins::video::recorder::controls::RecordingControls;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    StartRecording,
    StopRecording,
    Status,
    Quit,
}

pub const HELP: &str = "commands: r = start recording, s = stop recording, i = status, q = quit";

pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "r" | "record" | "start" => Some(ConsoleCommand::StartRecording),
        "s" | "stop" => Some(ConsoleCommand::StopRecording),
        "i" | "status" => Some(ConsoleCommand::Status),
        "q" | "quit" | "exit" => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

/// Reads commands from stdin on a background thread. The channel closes when
/// stdin does.
pub fn spawn_stdin_reader() -> std::io::Result<mpsc::Receiver<ConsoleCommand>> {
    let (tx, rx) = mpsc::channel(8);

    std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines().map_while(Result::ok) {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Some(cmd) => {
                        if tx.blocking_send(cmd).is_err() {
                            break;
                        }
                    }
                    None => eprintln!("{}", HELP),
                }
            }
        })?;

    Ok(rx)
}

/// Prints control changes and user messages to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleControls {
    recording: AtomicBool,
}

impl ConsoleControls {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordingControls for ConsoleControls {
    fn set_enabled(&self, start_enabled: bool, stop_enabled: bool) {
        tracing::debug!(target: "system",
            "[CONSOLE] start {}, stop {}",
            if start_enabled { "enabled" } else { "disabled" },
            if stop_enabled { "enabled" } else { "disabled" });

        // Both disabled while a transition is in flight; nothing to print.
        if stop_enabled && !self.recording.swap(true, Ordering::SeqCst) {
            eprintln!("● recording (press s to stop)");
        } else if start_enabled && self.recording.swap(false, Ordering::SeqCst) {
            eprintln!("■ recording stopped (press r to record)");
        }
    }

    fn show_message(&self, message: &str) {
        tracing::warn!(target: "system", "[CONSOLE] {}", message);
        eprintln!("! {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("r"), Some(ConsoleCommand::StartRecording));
        assert_eq!(parse_command(" STOP \n"), Some(ConsoleCommand::StopRecording));
        assert_eq!(parse_command("status"), Some(ConsoleCommand::Status));
        assert_eq!(parse_command("q"), Some(ConsoleCommand::Quit));
        assert_eq!(parse_command("take off"), None);
    }
}
