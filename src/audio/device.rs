//! Input device descriptions and preferred-device selection.

use serde::{Deserialize, Serialize};

/// An input-capable device as reported by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDevice {
    /// Position in the backend's enumeration order
    pub index: usize,
    pub name: String,
    /// Host API the device belongs to (ALSA, JACK, ASIO, WASAPI, ...)
    pub host: String,
    pub channels: u16,
    pub default_sample_rate: u32,
    /// Host is a professional low-latency API
    pub low_latency: bool,
    /// System default input of the default host
    pub is_default: bool,
}

/// Host APIs treated as professional low-latency.
const LOW_LATENCY_HOSTS: [&str; 2] = ["asio", "jack"];

pub fn is_low_latency_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    LOW_LATENCY_HOSTS.iter().any(|name| host.contains(name))
}

/// Pick the device to open when none was requested explicitly.
///
/// First low-latency device, else the system default, else the first device.
pub fn select_preferred(devices: &[InputDevice]) -> Option<&InputDevice> {
    devices
        .iter()
        .find(|device| device.low_latency)
        .or_else(|| devices.iter().find(|device| device.is_default))
        .or_else(|| devices.first())
}

/// Latency figures for the running stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyInfo {
    /// Callback-to-capture delay reported by the backend, 0 when unknown
    pub input_latency_ms: f64,
    /// Duration of one buffer
    pub buffer_latency_ms: f64,
    /// Input latency plus two buffers
    pub estimated_round_trip_ms: f64,
    pub sample_rate: u32,
    pub buffer_size: u32,
}

impl LatencyInfo {
    pub fn new(input_latency_ms: f64, sample_rate: u32, buffer_size: u32) -> Self {
        let buffer_latency_ms = if sample_rate == 0 {
            0.0
        } else {
            buffer_size as f64 / sample_rate as f64 * 1000.0
        };
        Self {
            input_latency_ms,
            buffer_latency_ms,
            estimated_round_trip_ms: input_latency_ms + 2.0 * buffer_latency_ms,
            sample_rate,
            buffer_size,
        }
    }
}
