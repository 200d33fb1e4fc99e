//! Public session controller
//!
//! [`VoiceSession`] is a handle to one controller task. Every call is turned
//! into a message on the controller's queue, so calls are safe from any
//! thread and from inside delegate callbacks.

mod controller;

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;
use uuid::Uuid;

use crate::audio::capture::Microphone;
use crate::audio::meter::VolumeMeter;
use crate::audio::playback::AudioOutput;
use crate::config::{AudioConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::network::Transport;
use crate::protocol::{ConnectionState, ToolInvocation, ToolResponse, TranscriptEvent};

use controller::{Command, Controller};

/// Caller-facing callbacks
///
/// Invoked from the controller task. Implementations must not block; calling
/// back into the [`VoiceSession`] from here is fine.
pub trait SessionDelegate: Send + Sync + 'static {
    /// A fatal error, delivered before teardown finishes
    fn on_error(&self, _error: &Error) {}

    /// The model was interrupted and queued playback was dropped
    fn on_interrupted(&self) {}

    fn on_text_received(&self, _event: &TranscriptEvent) {}

    fn on_function_call(&self, _call: &ToolInvocation) {}

    fn on_state_changed(&self, _state: ConnectionState) {}

    fn on_turn_complete(&self) {}
}

/// Delegate that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelegate;

impl SessionDelegate for NoopDelegate {}

/// Snapshot of session counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub state: ConnectionState,
    /// Next playback start on the device clock, 0 after an interruption
    pub cursor: f64,
    pub live_buffers: usize,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub parts_decoded: u64,
    pub decode_failures: u64,
    pub interruptions: u64,
    pub tool_calls: u64,
}

/// Lock-free view of the session for UIs
#[derive(Debug)]
pub struct SessionStatus {
    state: AtomicU8,
    meter: Arc<VolumeMeter>,
}

impl SessionStatus {
    fn new(volume_gain: f32) -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected.to_u8()),
            meter: Arc::new(VolumeMeter::new(volume_gain)),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Connecting or connected
    pub fn is_active(&self) -> bool {
        self.connection_state() != ConnectionState::Disconnected
    }

    /// Microphone loudness in `0.0..=1.0`
    pub fn volume(&self) -> f32 {
        self.meter.level()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    pub(crate) fn meter(&self) -> Arc<VolumeMeter> {
        self.meter.clone()
    }
}

/// Handle to one voice session controller
///
/// Dropping the handle stops the session.
pub struct VoiceSession {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    status: Arc<SessionStatus>,
}

impl VoiceSession {
    /// Spawn the controller on the current tokio runtime
    pub fn new(
        transport: Arc<dyn Transport>,
        microphone: Arc<dyn Microphone>,
        output: Arc<dyn AudioOutput>,
        delegate: Arc<dyn SessionDelegate>,
        audio: AudioConfig,
    ) -> Self {
        let id = Uuid::new_v4();
        let status = Arc::new(SessionStatus::new(audio.volume_gain));
        let (commands, queue) = mpsc::unbounded_channel();

        let controller = Controller::new(
            transport,
            microphone,
            output,
            delegate,
            audio,
            status.clone(),
            commands.clone(),
        );
        let span = tracing::info_span!("voice_session", session = %id);
        tokio::spawn(controller.run(queue).instrument(span));

        Self {
            id,
            commands,
            status,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Start a session.
    ///
    /// The request is queued immediately; the returned future resolves once
    /// the session is connected, or with the error that tore it down.
    /// Stopping before the connection opens yields [`Error::Cancelled`].
    /// Does nothing while a session is already connecting or connected.
    pub fn start(&self, config: SessionConfig) -> impl Future<Output = Result<()>> + Send + 'static {
        let (reply, done) = oneshot::channel();
        let queued = self.commands.send(Command::Start { config, reply }).is_ok();
        async move {
            if !queued {
                return Err(Error::Cancelled);
            }
            done.await.unwrap_or(Err(Error::Cancelled))
        }
    }

    /// Tear the session down from any state; repeated calls are no-ops
    pub fn stop(&self) -> impl Future<Output = ()> + Send + 'static {
        let (reply, done) = oneshot::channel();
        let queued = self.commands.send(Command::Stop { reply }).is_ok();
        async move {
            if queued {
                let _ = done.await;
            }
        }
    }

    /// Return a tool result to the model; ignored unless connected
    pub fn respond_to_tool(&self, response: ToolResponse) {
        let _ = self.commands.send(Command::RespondToTool(response));
    }

    /// Counters as of every command queued before this one
    pub fn stats(&self) -> impl Future<Output = SessionStats> + Send + 'static {
        let (reply, done) = oneshot::channel();
        let _ = self.commands.send(Command::Stats(reply));
        async move { done.await.unwrap_or_default() }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.status.connection_state()
    }

    pub fn volume(&self) -> f32 {
        self.status.volume()
    }

    /// Shared status for polling without the handle
    pub fn status(&self) -> Arc<SessionStatus> {
        self.status.clone()
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("id", &self.id)
            .field("state", &self.connection_state())
            .finish()
    }
}
