//! Microphone capture and the capture → encode → send pipeline
//!
//! The microphone delivers raw callbacks on the platform audio thread. Each
//! callback runs through a [`CapturePipeline`]: fixed-size framing, loudness
//! metering, then, only while the [`FrameGate`] holds a link, PCM16 encoding
//! and a fire-and-forget send. A closed gate drops frames on the spot.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::buffer::FrameAssembler;
use crate::audio::meter::VolumeMeter;
use crate::codec::Pcm16Encoder;
use crate::config::AudioConfig;
use crate::error::Error;
use crate::network::TransportLink;

/// Raw device callback: interleaved samples, channel count, sample rate
pub type SampleCallback = Box<dyn FnMut(&[f32], u16, u32) + Send + 'static>;

/// Acquires the microphone
pub trait Microphone: Send + Sync + 'static {
    /// Start delivering samples to `on_samples`.
    ///
    /// A denied or missing microphone fails with [`Error::Permission`].
    fn acquire(&self, on_samples: SampleCallback) -> Result<Box<dyn CaptureHandle>, Error>;
}

/// A live microphone acquisition
pub trait CaptureHandle: Send {
    /// Stop the microphone; safe to call more than once
    fn release(&mut self);
}

/// Connection point between capture output and the transport
///
/// Empty until the session is connected; emptied first during teardown.
#[derive(Clone, Default)]
pub struct FrameGate {
    link: Arc<Mutex<Option<Arc<dyn TransportLink>>>>,
}

impl FrameGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route frames to `link`
    pub fn open(&self, link: Arc<dyn TransportLink>) {
        *self.link.lock() = Some(link);
    }

    /// Stop routing frames; returns whether the gate was open
    pub fn close(&self) -> bool {
        self.link.lock().take().is_some()
    }

    pub fn is_open(&self) -> bool {
        self.link.lock().is_some()
    }

    fn current(&self) -> Option<Arc<dyn TransportLink>> {
        self.link.lock().clone()
    }
}

/// Frame counters shared with the controller
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl CaptureStats {
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Frames captured while the gate was closed
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

/// Per-callback processing, owned by the audio thread
pub struct CapturePipeline {
    assembler: FrameAssembler,
    encoder: Pcm16Encoder,
    meter: Arc<VolumeMeter>,
    gate: FrameGate,
    stats: Arc<CaptureStats>,
}

impl CapturePipeline {
    pub fn new(
        config: &AudioConfig,
        meter: Arc<VolumeMeter>,
        gate: FrameGate,
        stats: Arc<CaptureStats>,
    ) -> Self {
        Self {
            assembler: FrameAssembler::new(config.frame_size, config.input_sample_rate),
            encoder: Pcm16Encoder::new(config.input_sample_rate),
            meter,
            gate,
            stats,
        }
    }

    /// Handle one device callback
    pub fn process(&mut self, samples: &[f32], channels: u16, source_rate: u32) {
        for frame in self.assembler.push(samples, channels, source_rate) {
            self.meter.record(&frame.samples);

            let Some(link) = self.gate.current() else {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            match self.encoder.encode(&frame) {
                Ok(chunk) => {
                    link.send(chunk);
                    self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => tracing::warn!("Dropping capture frame: {}", e),
            }
        }
    }

    pub fn into_callback(mut self) -> SampleCallback {
        Box::new(move |samples, channels, rate| self.process(samples, channels, rate))
    }
}

#[cfg(feature = "device")]
pub use cpal_input::CpalMicrophone;

#[cfg(feature = "device")]
mod cpal_input {
    use cpal::traits::{DeviceTrait, StreamTrait};
    use crossbeam_channel::bounded;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use super::{CaptureHandle, Microphone, SampleCallback};
    use crate::audio::device::find_device;
    use crate::error::Error;

    /// Microphone backed by a cpal input stream
    #[derive(Debug, Clone, Default)]
    pub struct CpalMicrophone {
        device_id: Option<String>,
    }

    impl CpalMicrophone {
        pub fn new(device_id: Option<String>) -> Self {
            Self { device_id }
        }
    }

    impl Microphone for CpalMicrophone {
        fn acquire(&self, mut on_samples: SampleCallback) -> Result<Box<dyn CaptureHandle>, Error> {
            let device_id = self.device_id.clone();
            let running = Arc::new(AtomicBool::new(true));
            let running_for_loop = running.clone();
            let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);

            let handle = thread::Builder::new()
                .name("voice-capture".to_string())
                .spawn(move || {
                    let device = match find_device(device_id.as_deref(), true) {
                        Ok(device) => device,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    let config = match device.default_input_config() {
                        Ok(config) => config.config(),
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    let channels = config.channels;
                    let sample_rate = config.sample_rate.0;

                    let stream = device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            on_samples(data, channels, sample_rate);
                        },
                        |err| tracing::error!("Capture stream error: {}", err),
                        None,
                    );

                    let stream = match stream {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }

                    tracing::info!(
                        "Microphone open: {} Hz, {} channel(s)",
                        sample_rate,
                        channels
                    );
                    let _ = ready_tx.send(Ok(()));

                    while running_for_loop.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(10));
                    }
                    // Stream is dropped here, stopping capture
                })
                .map_err(|e| Error::Permission(e.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(Box::new(CpalCaptureHandle {
                    running,
                    thread_handle: Some(handle),
                })),
                Ok(Err(message)) => {
                    let _ = handle.join();
                    Err(Error::Permission(message))
                }
                Err(_) => {
                    let _ = handle.join();
                    Err(Error::Permission("capture thread exited".into()))
                }
            }
        }
    }

    struct CpalCaptureHandle {
        running: Arc<AtomicBool>,
        thread_handle: Option<JoinHandle<()>>,
    }

    impl CaptureHandle for CpalCaptureHandle {
        fn release(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.thread_handle.take() {
                let _ = handle.join();
            }
        }
    }

    impl Drop for CpalCaptureHandle {
        fn drop(&mut self) {
            self.release();
        }
    }
}
