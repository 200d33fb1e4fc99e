//! Audio subsystem: capture, metering, scheduling and device backends

pub mod buffer;
pub mod capture;
#[cfg(feature = "device")]
pub mod device;
pub mod meter;
pub mod playback;
pub mod scheduler;

pub use buffer::{AudioFrame, FrameAssembler, PlaybackBuffer};
pub use capture::{CaptureHandle, CapturePipeline, CaptureStats, FrameGate, Microphone, SampleCallback};
pub use meter::VolumeMeter;
pub use playback::{
    AudioOutput, BufferId, MixerControl, OutputHandle, PlaybackEndedCallback, VoiceMixer,
};
pub use scheduler::{PlaybackScheduler, ScheduledBuffer};

#[cfg(feature = "device")]
pub use capture::CpalMicrophone;
#[cfg(feature = "device")]
pub use device::{find_device, list_devices, AudioDeviceInfo};
#[cfg(feature = "device")]
pub use playback::CpalOutput;
