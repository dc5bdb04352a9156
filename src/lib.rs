pub mod console;
pub mod logging;
pub mod plugins;
pub mod settings;
pub mod shared;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use console::{ConsoleCommand, ConsoleControls, HELP};
use plugins::video::feed::display::{run_display_refresh, RefreshOutcome};
use plugins::video::feed::source::{ChannelSource, PacketSource, UdpSource};
use plugins::video::feed::{select_backend, VideoFeed};
use plugins::video::recorder::buffer::RecordingTap;
use plugins::video::recorder::coordinator::{
    spawn_coordinator, CoordinatorHandle, StartOutcome, StopOutcome,
};
use plugins::video::types::{OutputParams, PixelFormat};
use settings::{load_settings, AppSettings};
use shared::paths::get_log_dir;

/// How often the display refresh logs frame-rate figures.
const STATS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(author, version, about = "Ground station video preview and recorder", long_about = None)]
pub struct Cli {
    /// Settings file (default: <data>/groundstation/settings.json)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// UDP address to receive the video stream on
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Directory recordings are written to
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Use the 16:9 preview geometry
    #[arg(long)]
    pub wide: bool,

    /// Start recording as soon as the feed is up
    #[arg(long)]
    pub record: bool,
}

impl Cli {
    /// Applies command-line overrides on top of the loaded settings.
    pub fn apply(&self, settings: &mut AppSettings) {
        if let Some(listen) = self.listen {
            settings.feed.listen_addr = listen;
        }
        if let Some(data_dir) = &self.data_dir {
            settings.data_dir = data_dir.clone();
        }
        if self.wide {
            settings.wide_video = true;
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _logging = logging::init_logging(&get_log_dir(), true).context("Failed to set up logging")?;

    let mut settings = load_settings(cli.settings.as_deref());
    cli.apply(&mut settings);

    tracing::info!(target: "system",
        "Starting: listen={}, data_dir={:?}, mode={:?}",
        settings.feed.listen_addr, settings.data_dir, settings.video_mode());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("groundstation")
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(run_station(settings, cli.record))
}

/// Forwards packets from the network thread to the decoder over a channel.
fn spawn_receiver(
    mut source: UdpSource,
) -> std::io::Result<crossbeam_channel::Receiver<plugins::video::types::VideoPacket>> {
    let (tx, rx) = crossbeam_channel::unbounded();

    std::thread::Builder::new()
        .name("video-receiver".to_string())
        .spawn(move || {
            while let Some(packet) = source.next_packet() {
                if tx.send(packet).is_err() {
                    break;
                }
            }
            tracing::info!(target: "video", "[SOURCE] Receiver finished");
        })?;

    Ok(rx)
}

async fn run_station(settings: AppSettings, record_on_start: bool) -> anyhow::Result<()> {
    let tap = RecordingTap::new();
    let (recorder, recorder_task) = spawn_coordinator(
        settings.recording.clone(),
        settings.data_dir.clone(),
        tap.clone(),
        Arc::new(ConsoleControls::new()),
    );

    let source = UdpSource::bind(settings.feed.listen_addr, settings.feed.idle_timeout())
        .with_context(|| format!("Failed to listen on {}", settings.feed.listen_addr))?;
    let packets = spawn_receiver(source)?;

    let params = OutputParams::for_mode(settings.video_mode(), PixelFormat::Bgra8);
    let feed = VideoFeed::start(
        Box::new(ChannelSource::new(packets)),
        select_backend(),
        params,
        tap,
    )?;

    let mut display = tokio::spawn(run_display_refresh(
        feed.sink(),
        settings.feed.refresh_interval(),
        STATS_INTERVAL,
        |outcome| match outcome {
            RefreshOutcome::NewFrame(frame) => {
                tracing::trace!(target: "video", "[DISPLAY] Frame {}", frame.sequence);
            }
            RefreshOutcome::FeedStopped => {
                tracing::info!(target: "video", "[DISPLAY] No video, showing placeholder");
            }
            RefreshOutcome::Unchanged => {}
        },
    ));

    eprintln!("{}", HELP);

    if record_on_start {
        start_recording(&recorder).await;
    }

    let mut commands = console::spawn_stdin_reader()?;
    let mut feed_ended = false;

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(ConsoleCommand::StartRecording) => start_recording(&recorder).await,
                Some(ConsoleCommand::StopRecording) => stop_recording(&recorder).await,
                Some(ConsoleCommand::Status) => match recorder.status().await {
                    Ok(status) => eprintln!("{:?}", status),
                    Err(e) => eprintln!("! {}", e),
                },
                Some(ConsoleCommand::Quit) | None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target: "system", "Interrupted, shutting down");
                break;
            }
            _ = &mut display => {
                feed_ended = true;
                break;
            }
        }
    }

    stop_recording(&recorder).await;
    drop(recorder);
    if let Err(e) = recorder_task.await {
        tracing::error!(target: "system", "Recording coordinator failed: {}", e);
    }

    if feed_ended || feed.is_finished() {
        let stats = tokio::task::spawn_blocking(move || feed.join()).await??;
        tracing::info!(target: "system",
            "Feed finished: {} packets, {} frames, {} undecodable units",
            stats.packets, stats.frames, stats.failed_units);
    }

    tracing::info!(target: "system", "Shutdown complete");
    Ok(())
}

async fn start_recording(recorder: &CoordinatorHandle) {
    match recorder.start().await {
        Ok(StartOutcome::Started { output_path }) => {
            tracing::info!(target: "system", "Recording to {:?}", output_path);
        }
        Ok(StartOutcome::Ignored) => {}
        Err(e) => tracing::warn!(target: "system", "Recording not started: {}", e),
    }
}

async fn stop_recording(recorder: &CoordinatorHandle) {
    match recorder.stop().await {
        Ok(StopOutcome::Stopped(report)) => {
            tracing::info!(target: "system",
                "Saved {:?}: {} packets ({} bytes), {} dropped{}",
                report.output_path, report.packets_written, report.bytes_written,
                report.packets_dropped, if report.forced { ", converter killed" } else { "" });
        }
        Ok(StopOutcome::Ignored) => {}
        Err(e) => tracing::warn!(target: "system", "Stop failed: {}", e),
    }
}
