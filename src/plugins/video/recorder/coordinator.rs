//! RecordingCoordinator - single owner actor for the recording lifecycle.
//!
//! The coordinator owns the encoder process, the drain thread and the
//! recording buffer of the current session, and runs every transition
//! through the state machine.
//!
//! Architecture:
//! - Callers send `Command`s through a `CoordinatorHandle`
//! - The drain thread reports encoder loss as a `WorkerEvent`
//! - Commands are handled one at a time, so a start or stop is never
//!   interleaved with another

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::super::errors::{EncoderError, RecorderError};
use super::buffer::{RecordingBuffer, RecordingTap};
use super::controls::RecordingControls;
use super::encoder::{output_path_for, EncoderCommand, EncoderProcess};
use super::state::{transition, RecordingEvent, RecordingPhase, RecordingState, SideEffect};
use super::writer::{spawn_drain_thread, DrainCounters, DrainStats};
use crate::settings::RecordingSettings;
use crate::shared::paths::ensure_dir;

#[derive(Debug)]
pub enum Command {
    Start {
        response_tx: oneshot::Sender<Result<StartOutcome, RecorderError>>,
    },
    Stop {
        response_tx: oneshot::Sender<Result<StopOutcome, RecorderError>>,
    },
    Status {
        response_tx: oneshot::Sender<RecordingStatus>,
    },
}

/// Events sent from worker threads to the coordinator.
#[derive(Debug)]
pub enum WorkerEvent {
    EncoderFailed { session_id: u64, error: EncoderError },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started { output_path: PathBuf },
    /// A session was already starting, active or stopping.
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Stopped(StopReport),
    /// Nothing was recording.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopReport {
    pub output_path: PathBuf,
    /// The encoder did not exit in time and was killed.
    pub forced: bool,
    pub packets_written: u64,
    pub bytes_written: u64,
    /// Refused because the buffer was full.
    pub packets_dropped: u64,
    /// Still buffered when the drain gave up at the deadline.
    pub packets_unwritten: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub phase: RecordingPhase,
    pub output_path: Option<PathBuf>,
    pub encoder_pid: Option<u32>,
    pub elapsed_seconds: f64,
    pub packets_buffered: usize,
    pub packets_dropped: u64,
    pub packets_written: u64,
    pub bytes_written: u64,
}

/// Resources of the one recording in progress.
struct RecordingSession {
    id: u64,
    output_path: PathBuf,
    encoder: Option<EncoderProcess>,
    buffer: Arc<RecordingBuffer>,
    stop_signal: Arc<AtomicBool>,
    counters: Arc<DrainCounters>,
    drain_handle: Option<JoinHandle<Result<DrainStats, EncoderError>>>,
}

pub struct RecordingCoordinator {
    settings: RecordingSettings,
    data_dir: PathBuf,
    tap: RecordingTap,
    controls: Arc<dyn RecordingControls>,
    state: RecordingState,
    session: Option<RecordingSession>,
    next_session_id: u64,
    start_error: Option<RecorderError>,
    stop_report: Option<StopReport>,
    command_rx: mpsc::Receiver<Command>,
    event_rx: mpsc::Receiver<WorkerEvent>,
    event_tx: mpsc::Sender<WorkerEvent>,
}

impl RecordingCoordinator {
    pub fn new(
        settings: RecordingSettings,
        data_dir: PathBuf,
        tap: RecordingTap,
        controls: Arc<dyn RecordingControls>,
    ) -> (Self, CoordinatorHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(64);

        let coordinator = Self {
            settings,
            data_dir,
            tap,
            controls,
            state: RecordingState::Idle,
            session: None,
            next_session_id: 0,
            start_error: None,
            stop_report: None,
            command_rx,
            event_rx,
            event_tx,
        };

        (coordinator, CoordinatorHandle::new(command_tx))
    }

    /// Main event loop. Run this as a tokio task. Returns once every handle
    /// has been dropped, after stopping any active recording.
    pub async fn run(mut self) {
        tracing::info!(target: "video", "[RECORDER] Coordinator started");
        self.controls.set_enabled(true, false);

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some(event) = self.event_rx.recv() => {
                    self.handle_worker_event(event).await;
                }
            }
        }

        tracing::info!(target: "video", "[RECORDER] All handles dropped, shutting down");
        if !self.state.is_idle() {
            self.apply(RecordingEvent::StopRequested).await;
            if let Some(report) = self.stop_report.take() {
                tracing::info!(target: "video", "[RECORDER] Final recording: {:?}", report);
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { response_tx } => {
                let result = self.handle_start().await;
                let _ = response_tx.send(result);
            }
            Command::Stop { response_tx } => {
                let result = self.handle_stop().await;
                let _ = response_tx.send(result);
            }
            Command::Status { response_tx } => {
                let _ = response_tx.send(self.status());
            }
        }
    }

    async fn handle_start(&mut self) -> Result<StartOutcome, RecorderError> {
        if !self.state.is_idle() {
            tracing::debug!(target: "video", "[RECORDER] Start ignored while {:?}", self.state.phase());
            return Ok(StartOutcome::Ignored);
        }

        self.apply(RecordingEvent::StartRequested).await;

        match (&self.state, self.start_error.take()) {
            (RecordingState::Active { output_path, .. }, _) => Ok(StartOutcome::Started {
                output_path: output_path.clone(),
            }),
            (_, Some(error)) => Err(error),
            (state, None) => {
                tracing::error!(target: "video", "[RECORDER] Start ended in {:?}", state.phase());
                Err(RecorderError::CoordinatorUnavailable)
            }
        }
    }

    async fn handle_stop(&mut self) -> Result<StopOutcome, RecorderError> {
        if !matches!(self.state, RecordingState::Active { .. }) {
            tracing::debug!(target: "video", "[RECORDER] Stop ignored while {:?}", self.state.phase());
            return Ok(StopOutcome::Ignored);
        }

        self.apply(RecordingEvent::StopRequested).await;

        Ok(self
            .stop_report
            .take()
            .map(StopOutcome::Stopped)
            .unwrap_or(StopOutcome::Ignored))
    }

    async fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::EncoderFailed { session_id, error } => {
                let current = self.session.as_ref().map(|s| s.id);
                if current != Some(session_id) {
                    tracing::debug!(target: "video",
                        "[RECORDER] Ignoring failure from finished session {}", session_id);
                    return;
                }

                tracing::error!(target: "video", "[RECORDER] Lost video converter: {}", error);
                self.apply(RecordingEvent::EncoderLost {
                    error: error.into(),
                })
                .await;

                if let Some(report) = self.stop_report.take() {
                    tracing::info!(target: "video", "[RECORDER] Recording ended early: {:?}", report);
                }
            }
        }
    }

    /// Runs `event` and every event produced by its side effects through the
    /// state machine.
    async fn apply(&mut self, event: RecordingEvent) {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            let (new_state, effects) = transition(self.state.clone(), event);
            self.state = new_state;

            for effect in effects {
                if let Some(next) = self.execute_effect(effect).await {
                    pending.push_back(next);
                }
            }
        }
    }

    async fn execute_effect(&mut self, effect: SideEffect) -> Option<RecordingEvent> {
        match effect {
            SideEffect::SpawnEncoder => Some(self.spawn_encoder()),
            SideEffect::AttachBuffer => {
                self.attach_buffer();
                None
            }
            SideEffect::SignalStop => Some(self.stop_session().await),
            SideEffect::ReleaseSession => {
                self.release_session();
                None
            }
            SideEffect::SetControls {
                start_enabled,
                stop_enabled,
            } => {
                self.controls.set_enabled(start_enabled, stop_enabled);
                None
            }
            SideEffect::ReportFailure { message } => {
                self.controls.show_message(&message);
                None
            }
        }
    }

    fn spawn_encoder(&mut self) -> RecordingEvent {
        match self.open_session() {
            Ok(output_path) => RecordingEvent::EncoderStarted { output_path },
            Err(e) => {
                tracing::error!(target: "video", "[RECORDER] Start failed: {}", e);
                let error = RecorderError::from(e);
                self.start_error = Some(error.clone());
                RecordingEvent::EncoderStartFailed { error }
            }
        }
    }

    /// Spawns the encoder and its drain thread. The buffer is not attached
    /// yet, so nothing flows until the session is active.
    fn open_session(&mut self) -> Result<PathBuf, EncoderError> {
        ensure_dir(&self.data_dir).map_err(|e| EncoderError::StorageError(e.to_string()))?;

        let output_path = output_path_for(
            &self.data_dir,
            &self.settings.file_prefix,
            &self.settings.file_extension,
            &chrono::Local::now(),
        );
        let command = EncoderCommand::from_settings(&self.settings, &output_path);

        let mut encoder = EncoderProcess::spawn(&command)?;
        let input = encoder.take_input()?;

        self.next_session_id += 1;
        let session_id = self.next_session_id;

        let buffer = Arc::new(RecordingBuffer::with_capacity(self.settings.buffer_capacity));
        let stop_signal = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(DrainCounters::default());
        let event_tx = self.event_tx.clone();

        let drain_handle = spawn_drain_thread(
            buffer.clone(),
            input,
            stop_signal.clone(),
            counters.clone(),
            self.settings.drain_idle(),
            move |error| {
                let _ = event_tx.blocking_send(WorkerEvent::EncoderFailed { session_id, error });
            },
        )
        .map_err(|e| EncoderError::SpawnFailed(format!("drain thread: {}", e)))?;

        self.session = Some(RecordingSession {
            id: session_id,
            output_path: output_path.clone(),
            encoder: Some(encoder),
            buffer,
            stop_signal,
            counters,
            drain_handle: Some(drain_handle),
        });

        Ok(output_path)
    }

    fn attach_buffer(&mut self) {
        let Some(session) = self.session.as_ref() else {
            tracing::error!(target: "video", "[RECORDER] No session to attach");
            return;
        };

        session.buffer.clear();
        self.tap.attach(session.buffer.clone());

        tracing::info!(target: "video", "[RECORDER] Recording to {:?}", session.output_path);
    }

    /// Stop sequence. Enqueuing stops first, the drain writes what is left and
    /// closes the pipe, then the encoder is interrupted. Draining and waiting
    /// share one deadline measured from the stop request.
    async fn stop_session(&mut self) -> RecordingEvent {
        let deadline = tokio::time::Instant::now() + self.settings.stop_timeout();

        self.tap.detach();

        let Some(session) = self.session.as_mut() else {
            tracing::error!(target: "video", "[RECORDER] No session to stop");
            return RecordingEvent::EncoderStopped;
        };

        tracing::info!(target: "video",
            "[RECORDER] Stopping, {} packets left to drain", session.buffer.len());
        session.stop_signal.store(true, Ordering::SeqCst);

        if let Some(handle) = session.drain_handle.take() {
            let join = tokio::task::spawn_blocking(move || handle.join());
            match tokio::time::timeout_at(deadline, join).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(_))) => {
                    tracing::error!(target: "video", "[RECORDER] Drain thread panicked");
                }
                Ok(Err(e)) => {
                    tracing::error!(target: "video", "[RECORDER] Failed to join drain thread: {}", e);
                }
                Err(_) => {
                    tracing::warn!(target: "video",
                        "[RECORDER] Drain still writing at the stop deadline");
                }
            }
        }

        let forced = match session.encoder.take() {
            Some(encoder) => {
                encoder.interrupt();
                match encoder.shutdown(deadline).await {
                    Ok(outcome) => outcome.forced(),
                    Err(e) => {
                        tracing::error!(target: "video", "[RECORDER] {}", e);
                        true
                    }
                }
            }
            None => false,
        };

        let written = session.counters.snapshot();
        let report = StopReport {
            output_path: session.output_path.clone(),
            forced,
            packets_written: written.packets,
            bytes_written: written.bytes,
            packets_dropped: session.buffer.dropped(),
            packets_unwritten: session.buffer.len(),
        };

        tracing::info!(target: "video",
            "[RECORDER] Recording stopped: {:?} ({} packets, {} dropped{})",
            report.output_path, report.packets_written, report.packets_dropped,
            if forced { ", converter killed" } else { "" });

        self.stop_report = Some(report);
        RecordingEvent::EncoderStopped
    }

    fn release_session(&mut self) {
        self.tap.detach();

        if let Some(session) = self.session.take() {
            session.buffer.clear();
            tracing::debug!(target: "video", "[RECORDER] Released session {}", session.id);
        }
    }

    fn status(&self) -> RecordingStatus {
        let session = self.session.as_ref();
        let written = session.map(|s| s.counters.snapshot()).unwrap_or_default();

        RecordingStatus {
            phase: self.state.phase(),
            output_path: self.state.output_path().cloned(),
            encoder_pid: session.and_then(|s| s.encoder.as_ref()).map(EncoderProcess::pid),
            elapsed_seconds: self.state.elapsed().map_or(0.0, |d| d.as_secs_f64()),
            packets_buffered: session.map_or(0, |s| s.buffer.len()),
            packets_dropped: session.map_or(0, |s| s.buffer.dropped()),
            packets_written: written.packets,
            bytes_written: written.bytes,
        }
    }
}

/// Handle to send commands to the coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    command_tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    pub fn new(command_tx: mpsc::Sender<Command>) -> Self {
        Self { command_tx }
    }

    /// Starts recording. Returns once the encoder runs and packets flow, or
    /// with the reason it could not be started.
    pub async fn start(&self) -> Result<StartOutcome, RecorderError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(Command::Start { response_tx })
            .await
            .map_err(|_| RecorderError::CoordinatorUnavailable)?;

        response_rx
            .await
            .map_err(|_| RecorderError::CoordinatorUnavailable)?
    }

    /// Stops recording. Returns once the encoder has exited or been killed.
    pub async fn stop(&self) -> Result<StopOutcome, RecorderError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(Command::Stop { response_tx })
            .await
            .map_err(|_| RecorderError::CoordinatorUnavailable)?;

        response_rx
            .await
            .map_err(|_| RecorderError::CoordinatorUnavailable)?
    }

    pub async fn status(&self) -> Result<RecordingStatus, RecorderError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(Command::Status { response_tx })
            .await
            .map_err(|_| RecorderError::CoordinatorUnavailable)?;

        response_rx
            .await
            .map_err(|_| RecorderError::CoordinatorUnavailable)
    }
}

/// Creates a coordinator and runs it on the current tokio runtime.
pub fn spawn_coordinator(
    settings: RecordingSettings,
    data_dir: PathBuf,
    tap: RecordingTap,
    controls: Arc<dyn RecordingControls>,
) -> (CoordinatorHandle, tokio::task::JoinHandle<()>) {
    let (coordinator, handle) = RecordingCoordinator::new(settings, data_dir, tap, controls);
    let task = tokio::spawn(coordinator.run());
    (handle, task)
}
