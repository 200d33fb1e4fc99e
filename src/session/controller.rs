//! Session dispatch loop
//!
//! One task owns every session resource and handles one message at a time:
//! caller commands, device acquisition, the connect result, transport events
//! and playback completions all arrive on the same FIFO queue. Messages
//! produced by a torn-down session carry an old epoch and are ignored.
//!
//! Opening and releasing devices can block (a permission prompt, a stream
//! thread join), so both run on the blocking pool and never on this loop.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::audio::capture::{
    CaptureHandle, CapturePipeline, CaptureStats, FrameGate, Microphone, SampleCallback,
};
use crate::audio::playback::{AudioOutput, BufferId, OutputHandle, PlaybackEndedCallback};
use crate::audio::scheduler::PlaybackScheduler;
use crate::codec::Pcm16Decoder;
use crate::config::{AudioConfig, SessionConfig};
use crate::error::{Error, NetworkError, Result};
use crate::network::{Transport, TransportEvents, TransportLink};
use crate::protocol::{ConnectionState, InboundPart, ToolResponse, TranscriptEvent, TransportEvent};

use super::{SessionDelegate, SessionStats, SessionStatus};

pub(crate) enum Command {
    Start {
        config: SessionConfig,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    RespondToTool(ToolResponse),
    Stats(oneshot::Sender<SessionStats>),
    Acquired {
        epoch: u64,
        config: SessionConfig,
        result: Result<Devices>,
    },
    Connected {
        epoch: u64,
        result: std::result::Result<Arc<dyn TransportLink>, NetworkError>,
    },
    Transport {
        epoch: u64,
        event: TransportEvent,
    },
    PlaybackEnded {
        epoch: u64,
        id: BufferId,
    },
    Shutdown,
}

/// Microphone and speaker opened together for one session
pub(crate) struct Devices {
    capture: Box<dyn CaptureHandle>,
    output: Box<dyn OutputHandle>,
}

impl Devices {
    fn open(
        microphone: &dyn Microphone,
        output: &dyn AudioOutput,
        on_samples: SampleCallback,
        sample_rate: u32,
        on_ended: PlaybackEndedCallback,
    ) -> Result<Self> {
        let mut capture = microphone.acquire(on_samples).map_err(|e| {
            if e.is_permission_denied() {
                e
            } else {
                Error::Permission(e.to_string())
            }
        })?;
        match output.open(sample_rate, on_ended) {
            Ok(output) => Ok(Self { capture, output }),
            Err(e) => {
                capture.release();
                Err(Error::Device(e))
            }
        }
    }

    fn release(mut self) {
        self.capture.release();
        self.output.release();
    }
}

/// Release on the blocking pool without waiting for it
fn release_detached(devices: Devices) {
    tokio::task::spawn_blocking(move || devices.release());
}

/// Handles held by a running session; each is taken before it is released
#[derive(Default)]
struct Resources {
    acquire_task: Option<JoinHandle<()>>,
    connect_task: Option<JoinHandle<()>>,
    link: Option<Arc<dyn TransportLink>>,
    capture: Option<Box<dyn CaptureHandle>>,
    output: Option<Box<dyn OutputHandle>>,
}

pub(crate) struct Controller {
    transport: Arc<dyn Transport>,
    microphone: Arc<dyn Microphone>,
    output: Arc<dyn AudioOutput>,
    delegate: Arc<dyn SessionDelegate>,
    audio: AudioConfig,
    status: Arc<SessionStatus>,
    queue: mpsc::UnboundedSender<Command>,

    state: ConnectionState,
    epoch: u64,
    resources: Resources,
    pending_start: Option<oneshot::Sender<Result<()>>>,
    gate: FrameGate,
    scheduler: PlaybackScheduler,
    decoder: Pcm16Decoder,
    capture_stats: Arc<CaptureStats>,
    interruptions: u64,
    tool_calls: u64,
}

impl Controller {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        microphone: Arc<dyn Microphone>,
        output: Arc<dyn AudioOutput>,
        delegate: Arc<dyn SessionDelegate>,
        audio: AudioConfig,
        status: Arc<SessionStatus>,
        queue: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let decoder = Pcm16Decoder::new(audio.output_sample_rate);
        Self {
            transport,
            microphone,
            output,
            delegate,
            audio,
            status,
            queue,
            state: ConnectionState::Disconnected,
            epoch: 0,
            resources: Resources::default(),
            pending_start: None,
            gate: FrameGate::new(),
            scheduler: PlaybackScheduler::new(),
            decoder,
            capture_stats: Arc::new(CaptureStats::default()),
            interruptions: 0,
            tool_calls: 0,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!("Session controller started");

        while let Some(command) = commands.recv().await {
            match command {
                Command::Start { config, reply } => self.handle_start(config, reply),
                Command::Stop { reply } => {
                    self.stop().await;
                    let _ = reply.send(());
                }
                Command::RespondToTool(response) => self.handle_tool_response(response),
                Command::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                Command::Acquired {
                    epoch,
                    config,
                    result,
                } => self.handle_acquired(epoch, config, result).await,
                Command::Connected { epoch, result } => {
                    self.handle_connected(epoch, result).await
                }
                Command::Transport { epoch, event } => {
                    if epoch == self.epoch && self.state != ConnectionState::Disconnected {
                        self.handle_transport_event(event).await;
                    }
                }
                Command::PlaybackEnded { epoch, id } => {
                    if epoch == self.epoch {
                        self.scheduler.complete(id);
                    }
                }
                Command::Shutdown => {
                    self.stop().await;
                    break;
                }
            }
        }

        tracing::debug!("Session controller finished");
    }

    fn handle_start(&mut self, config: SessionConfig, reply: oneshot::Sender<Result<()>>) {
        if self.state != ConnectionState::Disconnected {
            tracing::debug!("Start ignored, session is {}", self.state.as_str());
            let _ = reply.send(Ok(()));
            return;
        }
        if let Err(e) = config.validate().and_then(|_| self.audio.validate()) {
            let _ = reply.send(Err(e));
            return;
        }

        self.pending_start = Some(reply);
        self.set_state(ConnectionState::Connecting);
        tracing::info!("Starting session with model {}", config.model);

        let epoch = self.epoch;
        let on_samples = CapturePipeline::new(
            &self.audio,
            self.status.meter(),
            self.gate.clone(),
            self.capture_stats.clone(),
        )
        .into_callback();
        let queue = self.queue.clone();
        let on_ended: PlaybackEndedCallback = Arc::new(move |id| {
            let _ = queue.send(Command::PlaybackEnded { epoch, id });
        });

        let microphone = self.microphone.clone();
        let output = self.output.clone();
        let sample_rate = self.audio.output_sample_rate;
        let queue = self.queue.clone();
        self.resources.acquire_task = Some(tokio::task::spawn_blocking(move || {
            let result = Devices::open(
                microphone.as_ref(),
                output.as_ref(),
                on_samples,
                sample_rate,
                on_ended,
            );
            let acquired = Command::Acquired {
                epoch,
                config,
                result,
            };
            if let Err(mpsc::error::SendError(Command::Acquired {
                result: Ok(devices),
                ..
            })) = queue.send(acquired)
            {
                devices.release();
            }
        }));
    }

    async fn handle_acquired(
        &mut self,
        epoch: u64,
        config: SessionConfig,
        result: Result<Devices>,
    ) {
        if epoch != self.epoch || self.state != ConnectionState::Connecting {
            if let Ok(devices) = result {
                tracing::warn!("Releasing devices that opened after the session ended");
                release_detached(devices);
            }
            return;
        }
        self.resources.acquire_task = None;

        let devices = match result {
            Ok(devices) => devices,
            Err(e) => return self.fail(e).await,
        };
        self.resources.capture = Some(devices.capture);
        self.resources.output = Some(devices.output);
        self.scheduler.reset();

        let queue = self.queue.clone();
        let events = TransportEvents::new(move |event| {
            let _ = queue.send(Command::Transport { epoch, event });
        });
        let connecting = self.transport.connect(&config, events);
        let queue = self.queue.clone();
        self.resources.connect_task = Some(tokio::spawn(async move {
            let result = connecting.await;
            let _ = queue.send(Command::Connected { epoch, result });
        }));
    }

    async fn handle_connected(
        &mut self,
        epoch: u64,
        result: std::result::Result<Arc<dyn TransportLink>, NetworkError>,
    ) {
        if epoch != self.epoch || self.state != ConnectionState::Connecting {
            if let Ok(link) = result {
                tracing::warn!("Closing connection that opened after the session ended");
                link.close();
            }
            return;
        }
        self.resources.connect_task = None;

        match result {
            Ok(link) => {
                self.resources.link = Some(link.clone());
                self.gate.open(link);
                self.set_state(ConnectionState::Connected);
                if let Some(reply) = self.pending_start.take() {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(e) => self.fail(Error::Connect(e)).await,
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Parts(parts) => {
                for part in parts {
                    self.handle_part(part);
                }
            }
            TransportEvent::Interrupted => self.interrupt(),
            TransportEvent::TurnComplete => self.delegate.on_turn_complete(),
            TransportEvent::Closed(reason) => {
                if self.state == ConnectionState::Connecting {
                    self.fail(Error::Connect(NetworkError::Closed(reason))).await;
                } else {
                    tracing::info!("Connection closed: {}", reason);
                    self.stop().await;
                }
            }
            TransportEvent::Error(e) => {
                let error = if self.state == ConnectionState::Connecting {
                    Error::Connect(e)
                } else {
                    Error::Transport(e)
                };
                self.fail(error).await;
            }
        }
    }

    fn handle_part(&mut self, part: InboundPart) {
        match part {
            InboundPart::Audio { format, data } => {
                let buffer = match self.decoder.decode(&format, &data) {
                    Ok(buffer) => buffer,
                    Err(e) => {
                        tracing::warn!("Skipping audio part ({}): {}", format, e);
                        return;
                    }
                };
                let Some(output) = self.resources.output.as_mut() else {
                    return;
                };
                match self.scheduler.schedule(&buffer, output.as_mut()) {
                    Ok(scheduled) => tracing::debug!(
                        "Scheduled buffer {} at {:.3}s for {:.3}s",
                        scheduled.id,
                        scheduled.start,
                        scheduled.duration
                    ),
                    Err(e) => tracing::warn!("Failed to schedule audio part: {}", e),
                }
            }
            InboundPart::Text { text, role } => {
                self.delegate
                    .on_text_received(&TranscriptEvent::new(text, role));
            }
            InboundPart::ToolCall(call) => {
                self.tool_calls += 1;
                tracing::info!("Model called tool {}", call.name);
                self.delegate.on_function_call(&call);
            }
        }
    }

    fn interrupt(&mut self) {
        let stopped = match self.resources.output.as_mut() {
            Some(output) => self.scheduler.cancel_all(output.as_mut()),
            None => 0,
        };
        self.interruptions += 1;
        tracing::info!("Interrupted, stopped {} buffer(s)", stopped);
        self.delegate.on_interrupted();
    }

    fn handle_tool_response(&mut self, response: ToolResponse) {
        match (&self.resources.link, self.state) {
            (Some(link), ConnectionState::Connected) => link.send_tool_response(response),
            _ => tracing::warn!("Dropping tool response for {}, not connected", response.name),
        }
    }

    /// Report a fatal error, then tear down
    async fn fail(&mut self, error: Error) {
        tracing::error!("Session failed: {}", error);
        self.delegate.on_error(&error);
        self.teardown().await;
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(error));
        }
    }

    async fn stop(&mut self) {
        self.teardown().await;
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(Error::Cancelled));
        }
    }

    /// Release everything in a fixed order; safe on partial or empty state
    async fn teardown(&mut self) {
        if self.resources.acquire_task.take().is_some() {
            tracing::info!("Device acquisition abandoned");
        }
        if let Some(task) = self.resources.connect_task.take() {
            task.abort();
            tracing::info!("Connect cancelled");
        }
        if let Some(link) = self.resources.link.take() {
            link.close();
        }

        self.gate.close();

        match self.resources.output.as_mut() {
            Some(output) => {
                self.scheduler.cancel_all(output.as_mut());
            }
            None => self.scheduler.reset(),
        }

        let capture = self.resources.capture.take();
        let output = self.resources.output.take();
        if capture.is_some() || output.is_some() {
            let released = tokio::task::spawn_blocking(move || {
                if let Some(mut capture) = capture {
                    capture.release();
                }
                if let Some(mut output) = output {
                    output.release();
                }
            })
            .await;
            if let Err(e) = released {
                tracing::warn!("Device release did not finish: {}", e);
            }
        }

        self.status.meter().reset();
        self.epoch += 1;

        if self.state != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        tracing::info!("Session {} -> {}", self.state.as_str(), state.as_str());
        self.state = state;
        self.status.set_state(state);
        self.delegate.on_state_changed(state);
    }

    fn stats(&self) -> SessionStats {
        let decoder = self.decoder.stats();
        SessionStats {
            state: self.state,
            cursor: self.scheduler.cursor(),
            live_buffers: self.scheduler.live_count(),
            frames_sent: self.capture_stats.frames_sent(),
            frames_dropped: self.capture_stats.frames_dropped(),
            parts_decoded: decoder.parts_decoded,
            decode_failures: decoder.parts_failed,
            interruptions: self.interruptions,
            tool_calls: self.tool_calls,
        }
    }
}
