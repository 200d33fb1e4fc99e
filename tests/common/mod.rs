//! In-memory transport, microphone and speaker used to drive `VoiceSession`

#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use live_voice_session::audio::{
    AudioOutput, BufferId, CaptureHandle, Microphone, OutputHandle, PlaybackBuffer,
    PlaybackEndedCallback, SampleCallback,
};
use live_voice_session::codec::Pcm16Encoder;
use live_voice_session::error::{AudioError, NetworkError};
use live_voice_session::network::{ConnectFuture, Transport, TransportEvents, TransportLink};
use live_voice_session::protocol::{EncodedChunk, FormatDescriptor, InboundPart, TransportEvent};
use live_voice_session::{
    AudioConfig, ConnectionState, Error, Role, SessionConfig, SessionDelegate, ToolInvocation,
    ToolResponse, TranscriptEvent, VoiceSession,
};

pub const OUTPUT_RATE: u32 = 24_000;
pub const FRAME_SIZE: usize = 160;

// ---------------------------------------------------------------------------
// Transport

#[derive(Debug, Clone)]
enum ConnectOutcome {
    Pending,
    Open,
    Fail(NetworkError),
}

/// Remote end of the fake transport, controlled by the test
pub struct FakeRemote {
    outcome: watch::Sender<ConnectOutcome>,
    events: Mutex<Option<TransportEvents>>,
    connects: AtomicUsize,
    cancelled: AtomicUsize,
    sent: AtomicUsize,
    closed: AtomicUsize,
    tool_responses: Mutex<Vec<ToolResponse>>,
}

impl FakeRemote {
    fn new() -> Self {
        let (outcome, _) = watch::channel(ConnectOutcome::Pending);
        Self {
            outcome,
            events: Mutex::new(None),
            connects: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
            sent: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            tool_responses: Mutex::new(Vec::new()),
        }
    }

    /// Let pending and future connects succeed
    pub fn open(&self) {
        self.outcome.send_replace(ConnectOutcome::Open);
    }

    pub fn fail(&self, error: NetworkError) {
        self.outcome.send_replace(ConnectOutcome::Fail(error));
    }

    /// Event sink of the most recent connect
    pub fn events(&self) -> TransportEvents {
        self.events
            .lock()
            .clone()
            .expect("connect was never called")
    }

    pub fn push(&self, event: TransportEvent) {
        self.events().emit(event);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connects dropped before they resolved
    pub fn cancelled_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn tool_responses(&self) -> Vec<ToolResponse> {
        self.tool_responses.lock().clone()
    }
}

pub struct FakeTransport {
    remote: Arc<FakeRemote>,
}

struct CancelGuard {
    remote: Arc<FakeRemote>,
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.remote.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Transport for FakeTransport {
    fn connect(&self, _config: &SessionConfig, events: TransportEvents) -> ConnectFuture {
        let remote = self.remote.clone();
        remote.connects.fetch_add(1, Ordering::SeqCst);
        *remote.events.lock() = Some(events);

        let mut outcome = remote.outcome.subscribe();
        let mut guard = CancelGuard {
            remote: remote.clone(),
            armed: true,
        };

        Box::pin(async move {
            let result = outcome
                .wait_for(|o| !matches!(o, ConnectOutcome::Pending))
                .await
                .map(|o| o.clone())
                .map_err(|e| NetworkError::ConnectionFailed(e.to_string()));
            guard.armed = false;

            match result? {
                ConnectOutcome::Open => {
                    let link: Arc<dyn TransportLink> = Arc::new(FakeLink { remote });
                    Ok(link)
                }
                ConnectOutcome::Fail(e) => Err(e),
                ConnectOutcome::Pending => unreachable!(),
            }
        })
    }
}

struct FakeLink {
    remote: Arc<FakeRemote>,
}

impl TransportLink for FakeLink {
    fn send(&self, _chunk: EncodedChunk) {
        self.remote.sent.fetch_add(1, Ordering::SeqCst);
    }

    fn send_tool_response(&self, response: ToolResponse) {
        self.remote.tool_responses.lock().push(response);
    }

    fn close(&self) {
        self.remote.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Microphone

#[derive(Default)]
struct MicInner {
    deny: AtomicBool,
    held: Mutex<bool>,
    allowed: Condvar,
    waiting: AtomicBool,
    callback: Mutex<Option<SampleCallback>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeMicrophone {
    inner: Arc<MicInner>,
}

impl FakeMicrophone {
    pub fn deny(&self) {
        self.inner.deny.store(true, Ordering::SeqCst);
    }

    /// Make `acquire` block, like an unanswered permission prompt
    pub fn hold(&self) {
        *self.inner.held.lock() = true;
    }

    pub fn allow(&self) {
        *self.inner.held.lock() = false;
        self.inner.allowed.notify_all();
    }

    /// An `acquire` call is blocked in `hold`
    pub fn is_waiting(&self) -> bool {
        self.inner.waiting.load(Ordering::SeqCst)
    }

    /// Deliver mono 16 kHz samples as the audio thread would
    pub fn feed(&self, samples: &[f32]) {
        if let Some(callback) = self.inner.callback.lock().as_mut() {
            callback(samples, 1, 16_000);
        }
    }

    pub fn is_live(&self) -> bool {
        self.inner.callback.lock().is_some()
    }

    pub fn acquired_count(&self) -> usize {
        self.inner.acquired.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> usize {
        self.inner.released.load(Ordering::SeqCst)
    }
}

impl Microphone for FakeMicrophone {
    fn acquire(&self, on_samples: SampleCallback) -> Result<Box<dyn CaptureHandle>, Error> {
        let mut held = self.inner.held.lock();
        while *held {
            self.inner.waiting.store(true, Ordering::SeqCst);
            self.inner.allowed.wait(&mut held);
        }
        self.inner.waiting.store(false, Ordering::SeqCst);
        drop(held);

        if self.inner.deny.load(Ordering::SeqCst) {
            return Err(Error::Permission("microphone access denied".into()));
        }
        self.inner.acquired.fetch_add(1, Ordering::SeqCst);
        *self.inner.callback.lock() = Some(on_samples);
        Ok(Box::new(FakeCapture {
            inner: self.inner.clone(),
            released: false,
        }))
    }
}

struct FakeCapture {
    inner: Arc<MicInner>,
    released: bool,
}

impl CaptureHandle for FakeCapture {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            *self.inner.callback.lock() = None;
            self.inner.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ---------------------------------------------------------------------------
// Output device

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Played {
    pub id: BufferId,
    pub start: f64,
    pub duration: f64,
}

#[derive(Default)]
struct OutputInner {
    fail_open: AtomicBool,
    now: Mutex<f64>,
    played: Mutex<Vec<Played>>,
    stopped: Mutex<Vec<BufferId>>,
    on_ended: Mutex<Option<PlaybackEndedCallback>>,
    opened: AtomicUsize,
    released: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeOutput {
    inner: Arc<OutputInner>,
}

impl FakeOutput {
    pub fn fail_open(&self) {
        self.inner.fail_open.store(true, Ordering::SeqCst);
    }

    pub fn set_now(&self, secs: f64) {
        *self.inner.now.lock() = secs;
    }

    pub fn played(&self) -> Vec<Played> {
        self.inner.played.lock().clone()
    }

    pub fn stopped(&self) -> Vec<BufferId> {
        self.inner.stopped.lock().clone()
    }

    /// Report a buffer as finished
    pub fn finish(&self, id: BufferId) {
        let callback = self.inner.on_ended.lock().clone();
        if let Some(callback) = callback {
            callback(id);
        }
    }

    pub fn opened_count(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> usize {
        self.inner.released.load(Ordering::SeqCst)
    }
}

impl AudioOutput for FakeOutput {
    fn open(
        &self,
        sample_rate: u32,
        on_ended: PlaybackEndedCallback,
    ) -> Result<Box<dyn OutputHandle>, AudioError> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceInit("no output device".into()));
        }
        assert_eq!(sample_rate, OUTPUT_RATE);
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        *self.inner.on_ended.lock() = Some(on_ended);
        Ok(Box::new(FakeOutputHandle {
            inner: self.inner.clone(),
            released: false,
        }))
    }
}

struct FakeOutputHandle {
    inner: Arc<OutputInner>,
    released: bool,
}

impl OutputHandle for FakeOutputHandle {
    fn now(&self) -> f64 {
        *self.inner.now.lock()
    }

    fn play_at(
        &mut self,
        id: BufferId,
        buffer: &PlaybackBuffer,
        start_secs: f64,
    ) -> Result<(), AudioError> {
        if self.released {
            return Err(AudioError::Released);
        }
        self.inner.played.lock().push(Played {
            id,
            start: start_secs,
            duration: buffer.duration_secs(),
        });
        Ok(())
    }

    fn stop(&mut self, id: BufferId) {
        self.inner.stopped.lock().push(id);
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            *self.inner.on_ended.lock() = None;
            self.inner.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ---------------------------------------------------------------------------
// Delegate

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Error(String),
    Interrupted,
    Text(String, Role),
    FunctionCall(String),
    State(ConnectionState),
    TurnComplete,
}

#[derive(Default)]
pub struct RecordingDelegate {
    calls: Mutex<Vec<Call>>,
}

impl RecordingDelegate {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    /// The first error was reported before the session went Disconnected
    pub fn error_preceded_disconnect(&self) -> bool {
        let calls = self.calls();
        let error = calls.iter().position(|c| matches!(c, Call::Error(_)));
        let disconnected = calls
            .iter()
            .position(|c| *c == Call::State(ConnectionState::Disconnected));
        matches!((error, disconnected), (Some(e), Some(d)) if e < d)
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }
}

impl SessionDelegate for RecordingDelegate {
    fn on_error(&self, error: &Error) {
        self.calls.lock().push(Call::Error(error.to_string()));
    }

    fn on_interrupted(&self) {
        self.calls.lock().push(Call::Interrupted);
    }

    fn on_text_received(&self, event: &TranscriptEvent) {
        self.calls
            .lock()
            .push(Call::Text(event.text.clone(), event.role));
    }

    fn on_function_call(&self, call: &ToolInvocation) {
        self.calls.lock().push(Call::FunctionCall(call.name.clone()));
    }

    fn on_state_changed(&self, state: ConnectionState) {
        self.calls.lock().push(Call::State(state));
    }

    fn on_turn_complete(&self) {
        self.calls.lock().push(Call::TurnComplete);
    }
}

// ---------------------------------------------------------------------------
// Harness

pub struct Harness {
    pub session: VoiceSession,
    pub remote: Arc<FakeRemote>,
    pub mic: FakeMicrophone,
    pub output: FakeOutput,
    pub delegate: Arc<RecordingDelegate>,
}

impl Harness {
    /// Must run inside a tokio runtime
    pub fn new() -> Self {
        Self::with_audio(AudioConfig {
            frame_size: FRAME_SIZE,
            ..AudioConfig::default()
        })
    }

    pub fn with_audio(audio: AudioConfig) -> Self {
        let remote = Arc::new(FakeRemote::new());
        let mic = FakeMicrophone::default();
        let output = FakeOutput::default();
        let delegate = Arc::new(RecordingDelegate::default());

        let session = VoiceSession::new(
            Arc::new(FakeTransport {
                remote: remote.clone(),
            }),
            Arc::new(mic.clone()),
            Arc::new(output.clone()),
            delegate.clone(),
            audio,
        );

        Self {
            session,
            remote,
            mic,
            output,
            delegate,
        }
    }

    pub async fn start_connected(&self) {
        self.remote.open();
        self.session
            .start(SessionConfig::default())
            .await
            .expect("session should connect");
    }
}

/// Inbound audio part of `secs` seconds at the output rate
pub fn audio_part(secs: f64) -> InboundPart {
    let samples = vec![0.25f32; (secs * OUTPUT_RATE as f64).round() as usize];
    InboundPart::Audio {
        format: FormatDescriptor::pcm16(OUTPUT_RATE),
        data: STANDARD.encode(Pcm16Encoder::encode_samples(&samples)),
    }
}

pub fn corrupt_audio_part() -> InboundPart {
    InboundPart::Audio {
        format: FormatDescriptor::pcm16(OUTPUT_RATE),
        data: "%%% not base64 %%%".into(),
    }
}

/// Poll `condition` until it holds, yielding to the runtime in between
pub async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}
