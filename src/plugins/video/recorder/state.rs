//! Pure state machine for the recording lifecycle.
//!
//! `transition(state, event) -> (new_state, effects)`. The coordinator owns
//! the state and carries out the effects; nothing here touches a process,
//! a pipe or the filesystem.
//!
//! Transitions not listed return the current state with no effects, which is
//! what makes a second start or a stop while idle harmless.

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;

use super::super::errors::RecorderError;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RecordingState {
    /// No session. Start is available.
    #[default]
    Idle,

    /// Encoder is being spawned.
    Starting { requested_at: Instant },

    /// Packets are being copied into the buffer and drained to the encoder.
    Active {
        started_at: Instant,
        output_path: PathBuf,
    },

    /// Buffer detached; draining, then waiting for the encoder to exit.
    Stopping {
        started_at: Instant,
        stop_requested_at: Instant,
        output_path: PathBuf,
    },
}

impl RecordingState {
    pub fn is_idle(&self) -> bool {
        matches!(self, RecordingState::Idle)
    }

    pub fn phase(&self) -> RecordingPhase {
        match self {
            RecordingState::Idle => RecordingPhase::Idle,
            RecordingState::Starting { .. } => RecordingPhase::Starting,
            RecordingState::Active { .. } => RecordingPhase::Active,
            RecordingState::Stopping { .. } => RecordingPhase::Stopping,
        }
    }

    pub fn output_path(&self) -> Option<&PathBuf> {
        match self {
            RecordingState::Active { output_path, .. }
            | RecordingState::Stopping { output_path, .. } => Some(output_path),
            _ => None,
        }
    }

    pub fn elapsed(&self) -> Option<std::time::Duration> {
        match self {
            RecordingState::Active { started_at, .. }
            | RecordingState::Stopping { started_at, .. } => Some(started_at.elapsed()),
            _ => None,
        }
    }
}

/// State without its payload, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingPhase {
    Idle,
    Starting,
    Active,
    Stopping,
}

#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// User pressed start.
    StartRequested,

    /// Encoder process is running and its input pipe is open.
    EncoderStarted { output_path: PathBuf },

    /// Encoder could not be started.
    EncoderStartFailed { error: RecorderError },

    /// User pressed stop.
    StopRequested,

    /// Writing to the encoder failed mid-session.
    EncoderLost { error: RecorderError },

    /// Encoder exited or was killed and reaped.
    EncoderStopped,
}

/// Work requested by a transition, executed by the coordinator in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Build the output path and command line, spawn the encoder.
    SpawnEncoder,

    /// Reset the recording buffer, attach it to the feed and start draining.
    AttachBuffer,

    /// Detach the buffer, finish the drain, close the pipe, interrupt and
    /// wait for the encoder until the stop deadline.
    SignalStop,

    /// Drop the buffer and the encoder handle.
    ReleaseSession,

    /// Update the start/stop controls.
    SetControls {
        start_enabled: bool,
        stop_enabled: bool,
    },

    /// Show a non-fatal failure to the user.
    ReportFailure { message: String },
}

fn controls(start_enabled: bool, stop_enabled: bool) -> SideEffect {
    SideEffect::SetControls {
        start_enabled,
        stop_enabled,
    }
}

pub fn transition(
    state: RecordingState,
    event: RecordingEvent,
) -> (RecordingState, Vec<SideEffect>) {
    match (&state, event) {
        // Idle + StartRequested -> Starting
        (RecordingState::Idle, RecordingEvent::StartRequested) => {
            let new_state = RecordingState::Starting {
                requested_at: Instant::now(),
            };
            (new_state, vec![controls(false, false), SideEffect::SpawnEncoder])
        }

        // Starting + EncoderStarted -> Active
        (RecordingState::Starting { .. }, RecordingEvent::EncoderStarted { output_path }) => {
            let new_state = RecordingState::Active {
                started_at: Instant::now(),
                output_path,
            };
            (new_state, vec![SideEffect::AttachBuffer, controls(false, true)])
        }

        // Starting + EncoderStartFailed -> Idle
        (RecordingState::Starting { .. }, RecordingEvent::EncoderStartFailed { error }) => {
            let effects = vec![
                SideEffect::ReleaseSession,
                SideEffect::ReportFailure {
                    message: error.to_string(),
                },
                controls(true, false),
            ];
            (RecordingState::Idle, effects)
        }

        // Active + StopRequested -> Stopping
        (
            RecordingState::Active {
                started_at,
                output_path,
            },
            RecordingEvent::StopRequested,
        ) => {
            let new_state = RecordingState::Stopping {
                started_at: *started_at,
                stop_requested_at: Instant::now(),
                output_path: output_path.clone(),
            };
            (new_state, vec![controls(false, false), SideEffect::SignalStop])
        }

        // Active + EncoderLost -> Stopping
        (
            RecordingState::Active {
                started_at,
                output_path,
            },
            RecordingEvent::EncoderLost { error },
        ) => {
            let new_state = RecordingState::Stopping {
                started_at: *started_at,
                stop_requested_at: Instant::now(),
                output_path: output_path.clone(),
            };
            let effects = vec![
                SideEffect::ReportFailure {
                    message: error.to_string(),
                },
                controls(false, false),
                SideEffect::SignalStop,
            ];
            (new_state, effects)
        }

        // Stopping + EncoderStopped -> Idle
        (RecordingState::Stopping { .. }, RecordingEvent::EncoderStopped) => {
            (
                RecordingState::Idle,
                vec![SideEffect::ReleaseSession, controls(true, false)],
            )
        }

        // Invalid transition: return current state with no effects
        _ => (state, vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::video::errors::EncoderError;

    fn active() -> RecordingState {
        RecordingState::Active {
            started_at: Instant::now(),
            output_path: PathBuf::from("./tello_vid_x.avi"),
        }
    }

    fn stopping() -> RecordingState {
        RecordingState::Stopping {
            started_at: Instant::now(),
            stop_requested_at: Instant::now(),
            output_path: PathBuf::from("./tello_vid_x.avi"),
        }
    }

    #[test]
    fn test_idle_to_starting() {
        let (new_state, effects) = transition(RecordingState::Idle, RecordingEvent::StartRequested);

        assert!(matches!(new_state, RecordingState::Starting { .. }));
        assert_eq!(effects, vec![controls(false, false), SideEffect::SpawnEncoder]);
    }

    #[test]
    fn test_starting_to_active_enables_stop() {
        let state = RecordingState::Starting {
            requested_at: Instant::now(),
        };
        let (new_state, effects) = transition(
            state,
            RecordingEvent::EncoderStarted {
                output_path: PathBuf::from("out.avi"),
            },
        );

        assert_eq!(new_state.output_path(), Some(&PathBuf::from("out.avi")));
        assert_eq!(new_state.phase(), RecordingPhase::Active);
        assert_eq!(effects[0], SideEffect::AttachBuffer);
        assert_eq!(effects[1], controls(false, true));
    }

    #[test]
    fn test_start_failure_returns_to_idle_and_reports() {
        let state = RecordingState::Starting {
            requested_at: Instant::now(),
        };
        let error = EncoderError::SpawnFailed("No such file or directory".to_string()).into();
        let (new_state, effects) =
            transition(state, RecordingEvent::EncoderStartFailed { error });

        assert!(new_state.is_idle());
        assert!(effects.iter().any(|e| matches!(
            e,
            SideEffect::ReportFailure { message } if message.contains("Could not start video converter")
        )));
        assert_eq!(effects.last(), Some(&controls(true, false)));
    }

    #[test]
    fn test_active_to_stopping() {
        let (new_state, effects) = transition(active(), RecordingEvent::StopRequested);

        assert_eq!(new_state.phase(), RecordingPhase::Stopping);
        assert_eq!(new_state.output_path(), Some(&PathBuf::from("./tello_vid_x.avi")));
        assert_eq!(effects, vec![controls(false, false), SideEffect::SignalStop]);
    }

    #[test]
    fn test_encoder_loss_stops_and_reports() {
        let error = EncoderError::WriteFailed("Broken pipe".to_string()).into();
        let (new_state, effects) = transition(active(), RecordingEvent::EncoderLost { error });

        assert_eq!(new_state.phase(), RecordingPhase::Stopping);
        assert!(matches!(effects[0], SideEffect::ReportFailure { .. }));
        assert_eq!(effects.last(), Some(&SideEffect::SignalStop));
    }

    #[test]
    fn test_stopping_to_idle_releases_session() {
        let (new_state, effects) = transition(stopping(), RecordingEvent::EncoderStopped);

        assert!(new_state.is_idle());
        assert_eq!(effects, vec![SideEffect::ReleaseSession, controls(true, false)]);
    }

    #[test]
    fn test_start_while_busy_is_noop() {
        for state in [
            RecordingState::Starting {
                requested_at: Instant::now(),
            },
            active(),
            stopping(),
        ] {
            let (new_state, effects) = transition(state.clone(), RecordingEvent::StartRequested);
            assert_eq!(new_state, state);
            assert!(effects.is_empty());
        }
    }

    #[test]
    fn test_stop_while_idle_is_noop() {
        let (new_state, effects) = transition(RecordingState::Idle, RecordingEvent::StopRequested);

        assert_eq!(new_state, RecordingState::Idle);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_second_stop_while_stopping_is_noop() {
        let state = stopping();
        let (new_state, effects) = transition(state.clone(), RecordingEvent::StopRequested);

        assert_eq!(new_state, state);
        assert!(effects.is_empty());
    }
}
