// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    fmt,
    thread::{self, JoinHandle},
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{error, info, span, Level};

use super::{mixer::VoiceMixer, Backend as AudioBackend, BackendError};
use crate::{config, playsync::CancelHandle};

/// Describes an output device known to cpal.
pub struct DeviceInfo {
    /// The name of the device.
    name: String,
    /// The maximum number of output channels the device supports.
    max_channels: u16,
    /// The host the device belongs to.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl DeviceInfo {
    /// Lists the output devices known to cpal, sorted by name.
    pub fn list() -> Result<Vec<DeviceInfo>, BackendError> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices: Vec<DeviceInfo> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let max_channels = max_output_channels(&device);
                if max_channels > 0 {
                    devices.push(DeviceInfo {
                        name: device.name()?,
                        max_channels,
                        host_id,
                        device,
                    })
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Finds the output device with the given name.
    fn find(name: &str) -> Result<DeviceInfo, BackendError> {
        DeviceInfo::list()?
            .into_iter()
            .find(|device| device.name.trim() == name)
            .ok_or_else(|| BackendError::DeviceNotFound(name.to_string()))
    }

    /// The system default output device.
    fn default_output() -> Result<DeviceInfo, BackendError> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(BackendError::NoDefaultDevice)?;
        Ok(DeviceInfo {
            name: device.name()?,
            max_channels: max_output_channels(&device),
            host_id: host.id(),
            device,
        })
    }

    /// The name of the device.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The maximum number of output channels the device supports.
    pub fn max_channels(&self) -> u16 {
        self.max_channels
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

/// The largest channel count among the device's output configurations.
fn max_output_channels(device: &cpal::Device) -> u16 {
    let mut max_channels = 0;
    if let Ok(output_configs) = device.supported_output_configs() {
        for output_config in output_configs {
            if max_channels < output_config.channels() {
                max_channels = output_config.channels();
            }
        }
    }
    max_channels
}

#[derive(Default)]
struct StreamState {
    cancel_handle: Option<CancelHandle>,
    join_handle: Option<JoinHandle<()>>,
}

/// A backend rendering to a real output device through cpal.
pub struct Backend {
    /// The name of the device.
    name: String,
    /// The host the device belongs to.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
    /// The sample format the device expects.
    sample_format: cpal::SampleFormat,
    /// The stream configuration derived from the audio config.
    stream_config: cpal::StreamConfig,
    /// The mixer rendered by the stream callback.
    mixer: VoiceMixer,
    /// The running stream, if any.
    state: Mutex<StreamState>,
}

impl Backend {
    /// Gets the cpal backend described by the given configuration. Falls
    /// back to the system default output device when no device name is
    /// configured.
    pub fn get(config: &config::AudioConfig) -> Result<Backend, BackendError> {
        let info = match config.device() {
            Some(name) => DeviceInfo::find(name)?,
            None => DeviceInfo::default_output()?,
        };

        let channels = config.channels();
        if info.max_channels < channels {
            return Err(BackendError::TooManyChannels {
                requested: channels,
                name: info.name.clone(),
                available: info.max_channels,
            });
        }

        let sample_format = info.device.default_output_config()?.sample_format();
        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: config.sample_rate(),
            buffer_size: match config.buffer_size() {
                Some(frames) => cpal::BufferSize::Fixed(frames),
                None => cpal::BufferSize::Default,
            },
        };

        Ok(Backend {
            name: info.name,
            host_id: info.host_id,
            device: info.device,
            sample_format,
            stream_config,
            mixer: VoiceMixer::new(channels, config.sample_rate()),
            state: Mutex::new(StreamState::default()),
        })
    }
}

impl AudioBackend for Backend {
    fn mixer(&self) -> &VoiceMixer {
        &self.mixer
    }

    fn start(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.cancel_handle.is_some() {
            return Ok(());
        }

        let span = span!(Level::INFO, "audio stream (cpal)");
        let _enter = span.enter();

        info!(
            device = self.name,
            format = format!("{:?}", self.sample_format),
            sample_rate = self.stream_config.sample_rate,
            channels = self.stream_config.channels,
            "Starting audio stream."
        );

        let cancel_handle = CancelHandle::new();
        let (status_tx, status_rx) = crossbeam_channel::bounded::<Result<(), BackendError>>(1);

        let join_handle = {
            let cancel_handle = cancel_handle.clone();
            let device = self.device.clone();
            let stream_config = self.stream_config.clone();
            let sample_format = self.sample_format;
            let mixer = self.mixer.clone();

            // cpal streams are not Send, so the stream has to live its
            // whole life on this thread.
            thread::spawn(move || {
                let stream_result = match sample_format {
                    cpal::SampleFormat::F32 => device.build_output_stream(
                        &stream_config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            mixer.render_into(data);
                        },
                        |err| error!("CPAL output stream error: {}", err),
                        None,
                    ),
                    cpal::SampleFormat::I16 => {
                        build_converting_stream::<i16>(&device, &stream_config, mixer)
                    }
                    cpal::SampleFormat::I32 => {
                        build_converting_stream::<i32>(&device, &stream_config, mixer)
                    }
                    cpal::SampleFormat::U16 => {
                        build_converting_stream::<u16>(&device, &stream_config, mixer)
                    }
                    format => {
                        let _ = status_tx.send(Err(BackendError::UnsupportedFormat(format)));
                        return;
                    }
                };

                let stream = match stream_result {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = status_tx.send(Err(e.into()));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = status_tx.send(Err(e.into()));
                    return;
                }
                let _ = status_tx.send(Ok(()));

                // Keep the stream alive until we're told to stop.
                while !cancel_handle.wait_timeout(Duration::from_millis(100)) {}
                drop(stream);
            })
        };

        match status_rx.recv() {
            Ok(Ok(())) => {
                state.cancel_handle = Some(cancel_handle);
                state.join_handle = Some(join_handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = join_handle.join();
                Err(e)
            }
            Err(e) => {
                let _ = join_handle.join();
                Err(BackendError::Stream(e.to_string()))
            }
        }
    }

    fn stop(&self) {
        let (cancel_handle, join_handle) = {
            let mut state = self.state.lock();
            (state.cancel_handle.take(), state.join_handle.take())
        };

        if let Some(cancel_handle) = cancel_handle {
            info!(device = self.name, "Stopping audio stream.");
            cancel_handle.cancel();
        }
        if let Some(join_handle) = join_handle {
            let _ = join_handle.join();
        }
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.stream_config.channels,
            self.host_id.name()
        )
    }
}

/// Builds a stream for devices that want something other than f32. The
/// mixer renders into a scratch buffer which is then converted to the
/// device's sample type.
fn build_converting_stream<T>(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    mixer: VoiceMixer,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    device.build_output_stream(
        stream_config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            mixer.render_into(&mut scratch);
            for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                *out = T::from_sample(*sample);
            }
        },
        |err| error!("CPAL output stream error: {}", err),
        None,
    )
}
