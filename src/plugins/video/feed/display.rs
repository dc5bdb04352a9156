//! Periodic display refresh: the consumer side of the frame sink.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;

use super::super::types::DecodedFrame;
use super::sink::FrameSink;

/// What one refresh tick found.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// A new frame to show.
    NewFrame(DecodedFrame),
    /// Nothing new since the last tick; keep the current picture.
    Unchanged,
    /// The feed ended. Reported once; the display should go back to its
    /// placeholder.
    FeedStopped,
}

/// Frame-rate figures for one reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshStats {
    pub frames_shown: u64,
    pub frames_overwritten: u64,
    pub fps: f64,
}

/// Refresh state owned by whatever runs the display timer.
pub struct DisplayRefresh {
    sink: Arc<FrameSink>,
    stopped_reported: bool,
    window_start: Instant,
    window_frames: u64,
    window_overwritten_base: u64,
}

impl DisplayRefresh {
    pub fn new(sink: Arc<FrameSink>) -> Self {
        let overwritten = sink.overwritten();
        Self {
            sink,
            stopped_reported: false,
            window_start: Instant::now(),
            window_frames: 0,
            window_overwritten_base: overwritten,
        }
    }

    /// Never waits on the decoder.
    pub fn tick(&mut self) -> RefreshOutcome {
        if let Some(frame) = self.sink.take_latest() {
            self.window_frames += 1;
            return RefreshOutcome::NewFrame(frame);
        }

        if self.sink.is_closed() && !self.stopped_reported {
            self.stopped_reported = true;
            return RefreshOutcome::FeedStopped;
        }

        RefreshOutcome::Unchanged
    }

    pub fn is_finished(&self) -> bool {
        self.stopped_reported
    }

    /// Returns the figures since the last call and starts a new window.
    pub fn take_stats(&mut self) -> RefreshStats {
        let elapsed = self.window_start.elapsed().as_secs_f64();
        let overwritten = self.sink.overwritten();

        let stats = RefreshStats {
            frames_shown: self.window_frames,
            frames_overwritten: overwritten.saturating_sub(self.window_overwritten_base),
            fps: if elapsed > 0.0 {
                self.window_frames as f64 / elapsed
            } else {
                0.0
            },
        };

        self.window_start = Instant::now();
        self.window_frames = 0;
        self.window_overwritten_base = overwritten;
        stats
    }
}

/// Drives a `DisplayRefresh` on a tokio interval until the feed stops,
/// handing each outcome other than `Unchanged` to `render`. Frame-rate
/// figures are logged every `stats_every`.
pub async fn run_display_refresh<F>(
    sink: Arc<FrameSink>,
    period: Duration,
    stats_every: Duration,
    mut render: F,
) where
    F: FnMut(RefreshOutcome),
{
    let mut refresh = DisplayRefresh::new(sink);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_stats = Instant::now();

    while !refresh.is_finished() {
        interval.tick().await;

        match refresh.tick() {
            RefreshOutcome::Unchanged => {}
            outcome => render(outcome),
        }

        if last_stats.elapsed() >= stats_every {
            let stats = refresh.take_stats();
            tracing::info!(target: "video",
                "[DISPLAY] {:.1} fps ({} frames shown, {} superseded)",
                stats.fps, stats.frames_shown, stats.frames_overwritten);
            last_stats = Instant::now();
        }
    }

    tracing::info!(target: "video", "[DISPLAY] Feed stopped, refresh ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::video::types::PixelFormat;

    fn frame(sequence: u64) -> DecodedFrame {
        DecodedFrame::new(vec![0; 16], 2, 2, PixelFormat::Bgra8, sequence)
    }

    #[test]
    fn test_tick_shows_latest_frame_once() {
        let sink = Arc::new(FrameSink::new());
        let mut refresh = DisplayRefresh::new(sink.clone());

        assert_eq!(refresh.tick(), RefreshOutcome::Unchanged);

        sink.publish(frame(0));
        sink.publish(frame(1));
        assert_eq!(refresh.tick(), RefreshOutcome::NewFrame(frame(1)));
        assert_eq!(refresh.tick(), RefreshOutcome::Unchanged);

        let stats = refresh.take_stats();
        assert_eq!(stats.frames_shown, 1);
        assert_eq!(stats.frames_overwritten, 1);
    }

    #[test]
    fn test_feed_stop_reported_once_after_last_frame() {
        let sink = Arc::new(FrameSink::new());
        let mut refresh = DisplayRefresh::new(sink.clone());

        sink.publish(frame(7));
        sink.close();

        assert_eq!(refresh.tick(), RefreshOutcome::NewFrame(frame(7)));
        assert_eq!(refresh.tick(), RefreshOutcome::FeedStopped);
        assert!(refresh.is_finished());
        assert_eq!(refresh.tick(), RefreshOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_refresh_loop_ends_when_feed_stops() {
        let sink = Arc::new(FrameSink::new());
        sink.publish(frame(3));
        sink.close();

        let mut seen = Vec::new();
        run_display_refresh(
            sink,
            Duration::from_millis(5),
            Duration::from_secs(60),
            |outcome| seen.push(outcome),
        )
        .await;

        assert_eq!(seen, vec![RefreshOutcome::NewFrame(frame(3)), RefreshOutcome::FeedStopped]);
    }
}
