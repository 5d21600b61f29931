//! CPAL input backend for desktop platforms.
//!
//! `cpal::Stream` is not `Send` on every platform, so each stream is built,
//! played and dropped on a dedicated thread that lives as long as the stream.

use std::sync::mpsc;
use std::thread;

use ::cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ::cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig, SupportedBufferSize};

use super::{ActiveStream, FrameSink, InputBackend, StreamInfo, StreamRequest};
use crate::audio::device::{is_low_latency_host, select_preferred, InputDevice};
use crate::error::AudioError;

/// Backend over every CPAL host available on this machine.
#[derive(Debug, Default)]
pub struct CpalBackend {
    _unit: (),
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Every input device of every available host, in enumeration order.
fn enumerate() -> Vec<(InputDevice, ::cpal::Device)> {
    let default_host = ::cpal::default_host().id();
    let mut found = Vec::new();

    for host_id in ::cpal::available_hosts() {
        let host = match ::cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(err) => {
                tracing::debug!(host = host_id.name(), "host unavailable: {err}");
                continue;
            }
        };
        let default_name = if host_id == default_host {
            host.default_input_device().and_then(|d| d.name().ok())
        } else {
            None
        };
        let devices = match host.input_devices() {
            Ok(devices) => devices,
            Err(err) => {
                tracing::warn!(host = host_id.name(), "failed to list input devices: {err}");
                continue;
            }
        };

        for device in devices {
            let Ok(config) = device.default_input_config() else {
                continue;
            };
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());
            let info = InputDevice {
                index: found.len(),
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                host: host_id.name().to_string(),
                channels: config.channels(),
                default_sample_rate: config.sample_rate().0,
                low_latency: is_low_latency_host(host_id.name()),
            };
            found.push((info, device));
        }
    }
    found
}

/// Resolve the device to open for a request.
fn resolve_device(device: Option<usize>) -> Result<(String, ::cpal::Device), AudioError> {
    let mut devices = enumerate();
    if let Some(index) = device {
        let position = devices
            .iter()
            .position(|(info, _)| info.index == index)
            .ok_or(AudioError::DeviceNotFound { index })?;
        let (info, device) = devices.swap_remove(position);
        return Ok((info.name, device));
    }

    let infos: Vec<InputDevice> = devices.iter().map(|(info, _)| info.clone()).collect();
    if let Some(preferred) = select_preferred(&infos) {
        let (info, device) = devices.swap_remove(preferred.index);
        tracing::info!(device = %info.name, host = %info.host, "selected input device");
        return Ok((info.name, device));
    }

    let device = ::cpal::default_host()
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;
    let name = device.name().unwrap_or_else(|_| "default".to_string());
    Ok((name, device))
}

/// Choose the stream configuration.
///
/// Uses the requested rate when the device supports it with f32 samples,
/// otherwise the device default. The buffer is fixed to the requested size
/// when the device range allows it, else left to the device.
fn negotiate_config(
    device: &::cpal::Device,
    request: &StreamRequest,
) -> Result<(StreamConfig, u32), AudioError> {
    let default = device
        .default_input_config()
        .map_err(|err| AudioError::StreamOpenFailed {
            reason: format!("Failed to get default input config: {err:?}"),
        })?;

    let wanted = SampleRate(request.sample_rate);
    let supported = device
        .supported_input_configs()
        .map_err(|err| AudioError::StreamOpenFailed {
            reason: format!("Failed to query input configs: {err:?}"),
        })?
        .filter(|range| range.sample_format() == SampleFormat::F32)
        .find(|range| range.min_sample_rate() <= wanted && wanted <= range.max_sample_rate())
        .map(|range| range.with_sample_rate(wanted));

    let chosen = match supported {
        Some(config) => config,
        None if default.sample_format() == SampleFormat::F32 => {
            tracing::warn!(
                requested = request.sample_rate,
                using = default.sample_rate().0,
                "requested sample rate unsupported, using device default"
            );
            default
        }
        None => {
            return Err(AudioError::UnsupportedFormat {
                format: format!("{:?}", default.sample_format()),
            })
        }
    };

    let (buffer_size, reported) = match chosen.buffer_size() {
        SupportedBufferSize::Range { min, max }
            if *min <= request.buffer_size && request.buffer_size <= *max =>
        {
            (BufferSize::Fixed(request.buffer_size), request.buffer_size)
        }
        _ => {
            tracing::debug!(
                requested = request.buffer_size,
                "fixed buffer size unsupported, using device default"
            );
            (BufferSize::Default, request.buffer_size)
        }
    };

    let mut config: StreamConfig = chosen.into();
    config.buffer_size = buffer_size;
    Ok((config, reported))
}

fn build_stream(
    device: &::cpal::Device,
    config: &StreamConfig,
    mut sink: FrameSink,
) -> Result<::cpal::Stream, AudioError> {
    let channels = config.channels as usize;
    let errors = sink.errors();
    let probe = sink.latency_probe();
    sink.bind_sample_rate(config.sample_rate.0);

    let stream = device
        .build_input_stream(
            config,
            move |data: &[f32], info: &::cpal::InputCallbackInfo| {
                let stamp = info.timestamp();
                if let Some(latency) = stamp.callback.duration_since(&stamp.capture) {
                    probe.record(latency);
                }
                sink.push_interleaved(data, channels);
            },
            move |err| {
                errors.report(AudioError::StreamFailure {
                    reason: err.to_string(),
                });
            },
            None,
        )
        .map_err(|err| AudioError::StreamOpenFailed {
            reason: format!("{err:?}"),
        })?;

    stream.play().map_err(|err| AudioError::StreamOpenFailed {
        reason: format!("Failed to start input stream: {err:?}"),
    })?;
    Ok(stream)
}

impl InputBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn input_devices(&self) -> Result<Vec<InputDevice>, AudioError> {
        Ok(enumerate().into_iter().map(|(info, _)| info).collect())
    }

    fn open_input(&self, request: &StreamRequest, sink: FrameSink) -> Result<ActiveStream, AudioError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<StreamInfo, AudioError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let request = request.clone();

        let handle = thread::Builder::new()
            .name("cpal-input".to_string())
            .spawn(move || {
                let opened = resolve_device(request.device).and_then(|(name, device)| {
                    let (config, buffer_size) = negotiate_config(&device, &request)?;
                    let stream = build_stream(&device, &config, sink)?;
                    let info = StreamInfo {
                        device_name: name,
                        sample_rate: config.sample_rate.0,
                        buffer_size,
                        channels: config.channels,
                    };
                    Ok((stream, info))
                });

                match opened {
                    Ok((stream, info)) => {
                        let _ = ready_tx.send(Ok(info));
                        // Park until stop is requested or the handle is dropped.
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })
            .map_err(|err| AudioError::HardwareError {
                details: format!("Failed to spawn input thread: {err}"),
            })?;

        let info = match ready_rx.recv() {
            Ok(Ok(info)) => info,
            Ok(Err(err)) => {
                let _ = handle.join();
                return Err(err);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(AudioError::StreamOpenFailed {
                    reason: "input thread exited before reporting".to_string(),
                });
            }
        };

        tracing::info!(
            device = %info.device_name,
            sample_rate = info.sample_rate,
            buffer_size = info.buffer_size,
            channels = info.channels,
            "cpal input stream started"
        );

        Ok(ActiveStream::new(info, move || {
            let _ = stop_tx.send(());
            let _ = handle.join();
        }))
    }
}
