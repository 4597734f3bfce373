//! # Audio Device Selection
//!
//! Resolves the configured input/output device names to cpal devices and
//! lists what the host offers. Device names come from
//! `audio.input_device` / `audio.output_device`; `"default"` picks the
//! host default.

use crate::error::VoiceError;

/// Which device to open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceSelection {
    /// The host's default device
    #[default]
    Default,
    /// A device whose name matches exactly
    Named(String),
}

impl std::str::FromStr for DeviceSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "" | "default" | "auto" => Ok(DeviceSelection::Default),
            _ => Ok(DeviceSelection::Named(trimmed.to_string())),
        }
    }
}

impl std::fmt::Display for DeviceSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSelection::Default => write!(f, "default"),
            DeviceSelection::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Map a backend error message onto the error taxonomy.
///
/// Platforms report a refused microphone as a generic backend error, so the
/// message text is the only signal available.
pub fn classify_device_error(message: impl Into<String>) -> VoiceError {
    let message = message.into();
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
        VoiceError::PermissionDenied(message)
    } else {
        VoiceError::DeviceUnavailable(message)
    }
}

#[cfg(feature = "device-audio")]
pub use host::*;

#[cfg(feature = "device-audio")]
mod host {
    use super::{classify_device_error, DeviceSelection};
    use crate::error::{VoiceError, VoiceResult};
    use cpal::traits::{DeviceTrait, HostTrait};
    use serde::Serialize;
    use tracing::{debug, info};

    /// One entry of the device listing.
    #[derive(Debug, Clone, Serialize)]
    pub struct DeviceInfo {
        pub name: String,
        pub is_input: bool,
        pub is_default: bool,
        pub default_sample_rate: Option<u32>,
        pub default_channels: Option<u16>,
    }

    pub fn select_input_device(selection: &DeviceSelection) -> VoiceResult<cpal::Device> {
        let host = cpal::default_host();
        let device = match selection {
            DeviceSelection::Default => host.default_input_device(),
            DeviceSelection::Named(name) => host
                .input_devices()
                .map_err(|e| classify_device_error(e.to_string()))?
                .find(|d| d.name().as_deref().unwrap_or("") == name.as_str()),
        };
        let device = device.ok_or_else(|| {
            VoiceError::DeviceUnavailable(format!("input device '{}' not found", selection))
        })?;
        debug!(device = %device.name().unwrap_or_default(), "Selected input device");
        Ok(device)
    }

    pub fn select_output_device(selection: &DeviceSelection) -> VoiceResult<cpal::Device> {
        let host = cpal::default_host();
        let device = match selection {
            DeviceSelection::Default => host.default_output_device(),
            DeviceSelection::Named(name) => host
                .output_devices()
                .map_err(|e| classify_device_error(e.to_string()))?
                .find(|d| d.name().as_deref().unwrap_or("") == name.as_str()),
        };
        let device = device.ok_or_else(|| {
            VoiceError::DeviceUnavailable(format!("output device '{}' not found", selection))
        })?;
        debug!(device = %device.name().unwrap_or_default(), "Selected output device");
        Ok(device)
    }

    /// Every input and output device the default host reports.
    pub fn list_devices() -> VoiceResult<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_input = host.default_input_device().and_then(|d| d.name().ok());
        let default_output = host.default_output_device().and_then(|d| d.name().ok());
        let mut devices = Vec::new();

        for device in host.input_devices().map_err(|e| classify_device_error(e.to_string()))? {
            let name = device.name().unwrap_or_else(|_| "(name unavailable)".to_string());
            let config = device.default_input_config().ok();
            info!(
                device_name = %name,
                sample_rate = config.as_ref().map(|c| c.sample_rate().0),
                channels = config.as_ref().map(|c| c.channels()),
                "Input device"
            );
            devices.push(DeviceInfo {
                is_default: default_input.as_deref() == Some(name.as_str()),
                default_sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                default_channels: config.as_ref().map(|c| c.channels()),
                name,
                is_input: true,
            });
        }

        for device in host.output_devices().map_err(|e| classify_device_error(e.to_string()))? {
            let name = device.name().unwrap_or_else(|_| "(name unavailable)".to_string());
            let config = device.default_output_config().ok();
            info!(
                device_name = %name,
                sample_rate = config.as_ref().map(|c| c.sample_rate().0),
                channels = config.as_ref().map(|c| c.channels()),
                "Output device"
            );
            devices.push(DeviceInfo {
                is_default: default_output.as_deref() == Some(name.as_str()),
                default_sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                default_channels: config.as_ref().map(|c| c.channels()),
                name,
                is_input: false,
            });
        }

        Ok(devices)
    }
}
