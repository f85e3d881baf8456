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
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::config;
use mixer::{StreamClock, VoiceMixer};

pub mod cpal;
pub mod mixer;
pub mod mock;

/// Errors raised while opening or running an audio backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Unable to find audio device {0}")]
    DeviceNotFound(String),
    #[error("No default audio output device")]
    NoDefaultDevice,
    #[error("{requested} channels requested, audio device {name} only has {available}")]
    TooManyChannels {
        requested: u16,
        name: String,
        available: u16,
    },
    #[error("Unsupported stream sample format {0:?}")]
    UnsupportedFormat(::cpal::SampleFormat),
    #[error("Audio stream failed to start: {0}")]
    Stream(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    HostUnavailable(#[from] ::cpal::HostUnavailable),
    #[error(transparent)]
    Devices(#[from] ::cpal::DevicesError),
    #[error(transparent)]
    DeviceName(#[from] ::cpal::DeviceNameError),
    #[error(transparent)]
    DefaultConfig(#[from] ::cpal::DefaultStreamConfigError),
    #[error(transparent)]
    BuildStream(#[from] ::cpal::BuildStreamError),
    #[error(transparent)]
    PlayStream(#[from] ::cpal::PlayStreamError),
}

/// An audio output backend. A backend owns the mixer that renders voices
/// and drives the stream clock that step triggers are timed against.
pub trait Backend: fmt::Display + Send + Sync {
    /// The mixer feeding this backend's output.
    fn mixer(&self) -> &VoiceMixer;

    /// Starts rendering. Starting a backend that is already running is a
    /// no-op.
    fn start(&self) -> Result<(), BackendError>;

    /// Stops rendering and releases the output sink.
    fn stop(&self);

    /// The clock tracking this backend's render position.
    fn clock(&self) -> StreamClock {
        self.mixer().clock()
    }
}

/// Lists the audio output devices known to cpal.
pub fn list_devices() -> Result<Vec<cpal::DeviceInfo>, BackendError> {
    cpal::DeviceInfo::list()
}

/// Gets the backend described by the given configuration. Device names
/// starting with `mock` get a mock backend, anything else is resolved
/// against the output devices on the system.
pub fn get_backend(config: &config::AudioConfig) -> Result<Arc<dyn Backend>, BackendError> {
    if let Some(device) = config.device() {
        if device.starts_with("mock") {
            return Ok(mock::Backend::get(
                device,
                config.channels(),
                config.sample_rate(),
            ));
        }
    }

    Ok(Arc::new(cpal::Backend::get(config)?))
}
