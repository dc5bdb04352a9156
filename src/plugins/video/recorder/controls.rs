/// UI surface driven by the recording coordinator.
///
/// Called on every state transition and for non-fatal failures. Calls come
/// from the coordinator task, so implementations must not block.
pub trait RecordingControls: Send + Sync {
    fn set_enabled(&self, start_enabled: bool, stop_enabled: bool);

    fn show_message(&self, message: &str);
}

/// Controls for contexts without a UI: transitions are only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyControls;

impl RecordingControls for LogOnlyControls {
    fn set_enabled(&self, start_enabled: bool, stop_enabled: bool) {
        tracing::debug!(target: "video",
            "[RECORDER] Controls: start={}, stop={}", start_enabled, stop_enabled);
    }

    fn show_message(&self, message: &str) {
        tracing::warn!(target: "video", "[RECORDER] {}", message);
    }
}
