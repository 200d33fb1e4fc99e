//! Output device seam and the cpal speaker backend
//!
//! An [`OutputHandle`] exposes a monotonic device clock and plays buffers at
//! absolute positions on that clock. The scheduler decides the positions;
//! the device only renders them.

use crossbeam::queue::{ArrayQueue, SegQueue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::buffer::PlaybackBuffer;
use crate::error::AudioError;

/// Identifies one scheduled buffer
pub type BufferId = u64;

/// Invoked when a buffer finished playing on its own (not when stopped)
pub type PlaybackEndedCallback = Arc<dyn Fn(BufferId) + Send + Sync + 'static>;

/// Opens the output device
pub trait AudioOutput: Send + Sync + 'static {
    fn open(
        &self,
        sample_rate: u32,
        on_ended: PlaybackEndedCallback,
    ) -> Result<Box<dyn OutputHandle>, AudioError>;
}

/// An open output device
pub trait OutputHandle: Send {
    /// Device clock in seconds, monotonic while open
    fn now(&self) -> f64;

    /// Play `buffer` starting at `start_secs` on the device clock
    fn play_at(
        &mut self,
        id: BufferId,
        buffer: &PlaybackBuffer,
        start_secs: f64,
    ) -> Result<(), AudioError>;

    /// Stop a buffer; unknown or finished ids are ignored
    fn stop(&mut self, id: BufferId);

    /// Stop every buffer in `ids` as one operation
    fn stop_all(&mut self, ids: &[BufferId]) {
        for id in ids {
            self.stop(*id);
        }
    }

    /// Release the device; safe to call more than once
    fn release(&mut self);
}

struct QueuedVoice {
    id: BufferId,
    samples: Arc<[f32]>,
    start_frame: u64,
    generation: u64,
}

/// State shared between an output handle and its render callback.
///
/// New voices go through a bounded queue and can be refused. Stops never can:
/// single stops use an unbounded queue, and `stop_all` bumps a generation
/// counter that retires every voice queued or playing under an older one.
pub struct MixerControl {
    plays: ArrayQueue<QueuedVoice>,
    stops: SegQueue<BufferId>,
    generation: AtomicU64,
    clock: AtomicU64,
}

impl MixerControl {
    pub fn new(capacity: usize) -> Self {
        Self {
            plays: ArrayQueue::new(capacity),
            stops: SegQueue::new(),
            generation: AtomicU64::new(0),
            clock: AtomicU64::new(0),
        }
    }

    pub fn queue_play(
        &self,
        id: BufferId,
        samples: Arc<[f32]>,
        start_frame: u64,
    ) -> Result<(), AudioError> {
        let voice = QueuedVoice {
            id,
            samples,
            start_frame,
            generation: self.generation.load(Ordering::Acquire),
        };
        self.plays
            .push(voice)
            .map_err(|_| AudioError::StreamError("output command queue full".into()))
    }

    pub fn stop(&self, id: BufferId) {
        self.stops.push(id);
    }

    pub fn stop_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Frames rendered so far
    pub fn position(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }
}

struct Voice {
    id: BufferId,
    samples: Arc<[f32]>,
    start_frame: u64,
    generation: u64,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Render-side voice set; lives inside the output callback
#[derive(Default)]
pub struct VoiceMixer {
    voices: Vec<Voice>,
    stopped: Vec<BufferId>,
}

impl VoiceMixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Mix one interleaved block and advance the clock
    pub fn render(
        &mut self,
        control: &MixerControl,
        data: &mut [f32],
        channels: usize,
        on_ended: &dyn Fn(BufferId),
    ) {
        let channels = channels.max(1);

        // Stops first: a visible stop implies its play is visible too
        self.stopped.clear();
        while let Some(id) = control.stops.pop() {
            self.stopped.push(id);
        }
        let generation = control.generation.load(Ordering::Acquire);
        while let Some(queued) = control.plays.pop() {
            if queued.generation < generation || self.stopped.contains(&queued.id) {
                continue;
            }
            self.voices.push(Voice {
                id: queued.id,
                samples: queued.samples,
                start_frame: queued.start_frame,
                generation: queued.generation,
            });
        }
        let stopped = &self.stopped;
        self.voices
            .retain(|voice| voice.generation >= generation && !stopped.contains(&voice.id));

        let base = control.clock.load(Ordering::Relaxed);
        let frames = data.len() / channels;

        for (i, frame) in data.chunks_mut(channels).enumerate() {
            let position = base + i as u64;
            let mut mixed = 0.0f32;
            for voice in &self.voices {
                if position >= voice.start_frame && position < voice.end_frame() {
                    mixed += voice.samples[(position - voice.start_frame) as usize];
                }
            }
            let mixed = mixed.clamp(-1.0, 1.0);
            for sample in frame.iter_mut() {
                *sample = mixed;
            }
        }

        let end = base + frames as u64;
        control.clock.store(end, Ordering::Release);

        self.voices.retain(|voice| {
            if voice.end_frame() <= end {
                on_ended(voice.id);
                false
            } else {
                true
            }
        });
    }
}

#[cfg(feature = "device")]
pub use cpal_output::CpalOutput;

#[cfg(feature = "device")]
mod cpal_output {
    use cpal::traits::{DeviceTrait, StreamTrait};
    use crossbeam_channel::bounded;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use super::{
        AudioOutput, BufferId, MixerControl, OutputHandle, PlaybackEndedCallback, VoiceMixer,
    };
    use crate::audio::buffer::{resample, PlaybackBuffer};
    use crate::audio::device::find_device;
    use crate::constants::OUTPUT_COMMAND_CAPACITY;
    use crate::error::AudioError;

    /// Speaker backend: one clocked mixer stream on a dedicated thread
    #[derive(Debug, Clone, Default)]
    pub struct CpalOutput {
        device_id: Option<String>,
    }

    impl CpalOutput {
        pub fn new(device_id: Option<String>) -> Self {
            Self { device_id }
        }
    }

    impl AudioOutput for CpalOutput {
        fn open(
            &self,
            sample_rate: u32,
            on_ended: PlaybackEndedCallback,
        ) -> Result<Box<dyn OutputHandle>, AudioError> {
            let device_id = self.device_id.clone();
            let running = Arc::new(AtomicBool::new(true));
            let control = Arc::new(MixerControl::new(OUTPUT_COMMAND_CAPACITY));
            let (ready_tx, ready_rx) = bounded::<Result<u32, AudioError>>(1);

            let thread_running = running.clone();
            let thread_control = control.clone();

            let handle = thread::Builder::new()
                .name("voice-playback".to_string())
                .spawn(move || {
                    let stream = build_stream(device_id.as_deref(), thread_control, on_ended);
                    let (stream, device_rate) = match stream {
                        Ok(built) => built,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(AudioError::DeviceInit(e.to_string())));
                        return;
                    }
                    let _ = ready_tx.send(Ok(device_rate));

                    while thread_running.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(10));
                    }
                    // Stream is dropped here, releasing the device
                })
                .map_err(|e| AudioError::DeviceInit(e.to_string()))?;

            let device_rate = match ready_rx.recv() {
                Ok(Ok(rate)) => rate,
                Ok(Err(e)) => {
                    let _ = handle.join();
                    return Err(e);
                }
                Err(_) => {
                    let _ = handle.join();
                    return Err(AudioError::DeviceInit("playback thread exited".into()));
                }
            };

            tracing::info!(
                "Output device open at {} Hz (buffers at {} Hz)",
                device_rate,
                sample_rate
            );

            Ok(Box::new(CpalOutputHandle {
                running,
                control,
                device_rate,
                thread_handle: Some(handle),
            }))
        }
    }

    fn build_stream(
        device_id: Option<&str>,
        control: Arc<MixerControl>,
        on_ended: PlaybackEndedCallback,
    ) -> Result<(cpal::Stream, u32), AudioError> {
        let device =
            find_device(device_id, false).map_err(|e| AudioError::DeviceInit(e.to_string()))?;
        let default_config = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceInit(e.to_string()))?;
        let config = default_config.config();
        let channels = config.channels.max(1) as usize;
        let device_rate = config.sample_rate.0;

        let mut mixer = VoiceMixer::new();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    mixer.render(&control, data, channels, &*on_ended);
                },
                |err| tracing::error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::DeviceInit(e.to_string()))?;

        Ok((stream, device_rate))
    }

    struct CpalOutputHandle {
        running: Arc<AtomicBool>,
        control: Arc<MixerControl>,
        device_rate: u32,
        thread_handle: Option<JoinHandle<()>>,
    }

    impl OutputHandle for CpalOutputHandle {
        fn now(&self) -> f64 {
            self.control.position() as f64 / self.device_rate as f64
        }

        fn play_at(
            &mut self,
            id: BufferId,
            buffer: &PlaybackBuffer,
            start_secs: f64,
        ) -> Result<(), AudioError> {
            if self.thread_handle.is_none() {
                return Err(AudioError::Released);
            }

            let samples: Arc<[f32]> = if buffer.sample_rate() == self.device_rate {
                buffer.shared_samples()
            } else {
                resample(buffer.samples(), buffer.sample_rate(), self.device_rate).into()
            };
            let start_frame = (start_secs * self.device_rate as f64).round().max(0.0) as u64;

            self.control.queue_play(id, samples, start_frame)
        }

        fn stop(&mut self, id: BufferId) {
            self.control.stop(id);
        }

        fn stop_all(&mut self, ids: &[BufferId]) {
            self.control.stop_all();
            tracing::debug!("Stopped {} voice(s)", ids.len());
        }

        fn release(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.thread_handle.take() {
                let _ = handle.join();
            }
        }
    }

    impl Drop for CpalOutputHandle {
        fn drop(&mut self) {
            self.release();
        }
    }
}
