//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;

/// Device summary for `--list-devices`
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let config = device.default_input_config().ok();
                devices.push(AudioDeviceInfo {
                    id: format!("input:{}", name),
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                    channels: config.as_ref().map(|c| c.channels()),
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let config = device.default_output_config().ok();
                devices.push(AudioDeviceInfo {
                    id: format!("output:{}", name),
                    is_default: default_output_name.as_ref() == Some(&name),
                    name,
                    is_input: false,
                    is_output: true,
                    sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                    channels: config.as_ref().map(|c| c.channels()),
                });
            }
        }
    }

    devices
}

/// Resolve an `input:<name>` / `output:<name>` id, or the default device when `id` is `None`
pub fn find_device(id: Option<&str>, input: bool) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    let Some(id) = id else {
        let device = if input {
            host.default_input_device()
        } else {
            host.default_output_device()
        };
        return device.ok_or_else(|| {
            AudioError::DeviceNotFound(format!(
                "No default {} device",
                if input { "input" } else { "output" }
            ))
        });
    };

    let name = id
        .strip_prefix(if input { "input:" } else { "output:" })
        .unwrap_or(id);

    let devices = if input {
        host.input_devices()
    } else {
        host.output_devices()
    }
    .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}
