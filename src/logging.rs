use std::path::Path;

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Guards that must be kept alive to ensure logs are flushed
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to create logs directory: {0}")]
    CreateDir(#[from] std::io::Error),
    #[error("Failed to set global tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Log file name for a tracing target.
fn file_for_target(target: &str) -> &'static str {
    if target == "video" || target.starts_with("video::") {
        "video.log"
    } else {
        "system.log"
    }
}

/// Multi-target writer that routes logs to different files based on target
struct TargetWriter {
    video_writer: NonBlocking,
    system_writer: NonBlocking,
}

impl<'a> MakeWriter<'a> for TargetWriter {
    type Writer = Box<dyn std::io::Write + 'a>;

    fn make_writer(&'a self) -> Self::Writer {
        Box::new(self.system_writer.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        match file_for_target(meta.target()) {
            "video.log" => Box::new(self.video_writer.clone()),
            _ => Box::new(self.system_writer.clone()),
        }
    }
}

/// Initializes logging: daily-rolling `video.log` and `system.log` under
/// `log_dir`, plus a compact stderr layer when `console` is set.
pub fn init_logging(log_dir: &Path, console: bool) -> Result<LoggingGuards, LoggingError> {
    crate::shared::paths::ensure_dir(log_dir)?;

    let video_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "video.log");
    let (video_writer, video_guard) = tracing_appender::non_blocking(video_appender);

    let system_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "system.log");
    let (system_writer, system_guard) = tracing_appender::non_blocking(system_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(TargetWriter {
            video_writer,
            system_writer,
        })
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true);

    let console_layer = console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);

    tracing::subscriber::set_global_default(subscriber)?;

    tracing::info!(target: "system", "Logging initialized at {:?}", log_dir);

    Ok(LoggingGuards {
        _guards: vec![video_guard, system_guard],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_route_to_files() {
        assert_eq!(file_for_target("video"), "video.log");
        assert_eq!(file_for_target("video::decoder"), "video.log");
        assert_eq!(file_for_target("videos"), "system.log");
        assert_eq!(file_for_target("system"), "system.log");
        assert_eq!(file_for_target("groundstation_lib::console"), "system.log");
    }
}
