//! Drain thread: moves packets from the recording buffer into the encoder's
//! input pipe.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::super::errors::EncoderError;
use super::buffer::RecordingBuffer;

/// Live totals for the current session, readable while the drain runs.
#[derive(Debug, Default)]
pub struct DrainCounters {
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl DrainCounters {
    fn record(&self, len: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DrainStats {
        DrainStats {
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// What the drain wrote before it finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub packets: u64,
    pub bytes: u64,
}

/// Spawns the drain thread.
///
/// Runs until `stop` is set and the buffer has been emptied, then flushes and
/// closes `input`, which the encoder sees as end of stream. Packets are
/// written in buffer order; an empty buffer is polled every `idle`.
///
/// A failed write ends the thread. `on_failure` is called with the error
/// first, so the session can be torn down without waiting for a stop.
pub fn spawn_drain_thread<W, F>(
    buffer: Arc<RecordingBuffer>,
    mut input: W,
    stop: Arc<AtomicBool>,
    counters: Arc<DrainCounters>,
    idle: Duration,
    on_failure: F,
) -> std::io::Result<JoinHandle<Result<DrainStats, EncoderError>>>
where
    W: Write + Send + 'static,
    F: FnOnce(EncoderError) + Send + 'static,
{
    std::thread::Builder::new()
        .name("recording-drain".to_string())
        .spawn(move || {
            tracing::debug!(target: "video", "[DRAIN] Started");

            let result = drain(&buffer, &mut input, &stop, &counters, idle);
            drop(input);

            match result {
                Ok(()) => {
                    let stats = counters.snapshot();
                    tracing::info!(target: "video",
                        "[DRAIN] Finished: {} packets, {} bytes written",
                        stats.packets, stats.bytes);
                    Ok(stats)
                }
                Err(e) => {
                    tracing::error!(target: "video", "[DRAIN] {}", e);
                    on_failure(e.clone());
                    Err(e)
                }
            }
        })
}

fn drain<W: Write>(
    buffer: &RecordingBuffer,
    input: &mut W,
    stop: &AtomicBool,
    counters: &DrainCounters,
    idle: Duration,
) -> Result<(), EncoderError> {
    loop {
        // Read the flag before dequeuing: once it is set no more packets can
        // arrive, so an empty buffer after that means the session is drained.
        let stopping = stop.load(Ordering::SeqCst);

        match buffer.dequeue() {
            Some(packet) => {
                input
                    .write_all(packet.as_bytes())
                    .map_err(|e| EncoderError::WriteFailed(e.to_string()))?;
                counters.record(packet.len());
            }
            None if stopping => break,
            None => std::thread::sleep(idle),
        }
    }

    input
        .flush()
        .map_err(|e| EncoderError::WriteFailed(e.to_string()))
}
