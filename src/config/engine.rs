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
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use duration_string::DurationString;
use serde::Deserialize;

use super::ConfigError;
use crate::scheduler::{DEFAULT_LOOKAHEAD, DEFAULT_TICK};

const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_CHANNELS: u16 = 2;
const DEFAULT_BPM: f64 = 120.0;
const DEFAULT_SWING: f64 = 0.0;
const DEFAULT_GAIN: f32 = 1.0;

/// Default maximum number of concurrent voices globally.
pub const DEFAULT_MAX_VOICES: usize = 32;

/// A YAML representation of the engine configuration.
#[derive(Deserialize, Clone, Default)]
pub struct Config {
    /// The audio output configuration.
    #[serde(default)]
    audio: AudioConfig,

    /// Scheduling and playback tuning.
    #[serde(default)]
    engine: EngineConfig,

    /// Samples to preload, keyed by instrument id.
    #[serde(default)]
    kit: HashMap<String, InstrumentConfig>,
}

impl Config {
    /// New will create a new Config with the given audio configuration,
    /// engine defaults, and an empty kit.
    pub fn new(audio: AudioConfig) -> Config {
        Config {
            audio,
            engine: EngineConfig::default(),
            kit: HashMap::new(),
        }
    }

    /// Parses an engine configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_yml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// The audio output configuration.
    pub fn audio(&self) -> &AudioConfig {
        &self.audio
    }

    /// The scheduling and playback tuning.
    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    /// The samples to preload, keyed by instrument id.
    pub fn kit(&self) -> &HashMap<String, InstrumentConfig> {
        &self.kit
    }
}

#[cfg(test)]
impl Config {
    /// Adds an instrument to the kit.
    pub(crate) fn insert_instrument(&mut self, id: &str, file: &Path, gain: Option<f32>) {
        self.kit.insert(
            id.to_string(),
            InstrumentConfig {
                file: file.display().to_string(),
                gain,
            },
        );
    }
}

/// A YAML representation of the audio configuration.
#[derive(Deserialize, Clone, Default)]
pub struct AudioConfig {
    /// The audio device. Defaults to the system default output device.
    /// Names starting with `mock` select the mock backend.
    device: Option<String>,

    /// Output sample rate in Hz (default: 44100).
    sample_rate: Option<u32>,

    /// Number of output channels (default: 2).
    channels: Option<u16>,

    /// Fixed stream buffer size in frames. When unset the backend picks.
    buffer_size: Option<u32>,
}

impl AudioConfig {
    /// New will create a new AudioConfig for the given device.
    pub fn new(device: &str) -> AudioConfig {
        AudioConfig {
            device: Some(device.to_string()),
            sample_rate: None,
            channels: None,
            buffer_size: None,
        }
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Returns the output sample rate (default: 44100).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE).max(1)
    }

    /// Returns the number of output channels (default: 2).
    pub fn channels(&self) -> u16 {
        self.channels.unwrap_or(DEFAULT_CHANNELS).max(1)
    }

    /// Returns the fixed stream buffer size, if one is configured.
    pub fn buffer_size(&self) -> Option<u32> {
        self.buffer_size
    }
}

/// A YAML representation of the scheduling and playback tuning.
#[derive(Deserialize, Clone, Default)]
pub struct EngineConfig {
    /// How far ahead of the stream clock steps are scheduled. A duration
    /// string such as `100ms` (the default).
    lookahead: Option<String>,

    /// How often the scheduling loop wakes. A duration string such as
    /// `25ms` (the default).
    tick: Option<String>,

    /// Maximum number of concurrent voices (default: 32).
    max_voices: Option<usize>,

    /// Initial tempo in beats per minute (default: 120).
    bpm: Option<f64>,

    /// Initial swing amount (default: 0).
    swing: Option<f64>,
}

impl EngineConfig {
    /// Returns the look-ahead window.
    pub fn lookahead(&self) -> Result<Duration, ConfigError> {
        parse_duration("lookahead", &self.lookahead, DEFAULT_LOOKAHEAD)
    }

    /// Returns the scheduler tick interval.
    pub fn tick(&self) -> Result<Duration, ConfigError> {
        parse_duration("tick", &self.tick, DEFAULT_TICK)
    }

    /// Returns the maximum number of concurrent voices (default: 32).
    pub fn max_voices(&self) -> usize {
        self.max_voices.unwrap_or(DEFAULT_MAX_VOICES).max(1)
    }

    /// Returns the initial tempo (default: 120).
    pub fn bpm(&self) -> f64 {
        self.bpm.unwrap_or(DEFAULT_BPM)
    }

    /// Returns the initial swing amount (default: 0).
    pub fn swing(&self) -> f64 {
        self.swing.unwrap_or(DEFAULT_SWING)
    }
}

/// A YAML representation of one kit instrument.
#[derive(Deserialize, Clone)]
pub struct InstrumentConfig {
    /// The audio file for this instrument.
    file: String,

    /// Linear gain applied when triggering (default: 1.0).
    gain: Option<f32>,
}

impl InstrumentConfig {
    /// The audio file for this instrument.
    pub fn file(&self) -> &Path {
        Path::new(&self.file)
    }

    /// The gain applied when triggering (default: 1.0).
    pub fn gain(&self) -> f32 {
        self.gain.unwrap_or(DEFAULT_GAIN)
    }
}

fn parse_duration(
    field: &'static str,
    value: &Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => Ok(DurationString::from_string(value.clone())
            .map_err(|e| ConfigError::InvalidDuration {
                field,
                message: e.to_string(),
            })?
            .into()),
        None => Ok(default),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yml::from_str("{}").expect("Error parsing config");

        assert_eq!(config.audio().device(), None);
        assert_eq!(config.audio().sample_rate(), 44100);
        assert_eq!(config.audio().channels(), 2);
        assert_eq!(config.audio().buffer_size(), None);

        assert_eq!(
            config.engine().lookahead().expect("Error parsing lookahead"),
            Duration::from_millis(100)
        );
        assert_eq!(
            config.engine().tick().expect("Error parsing tick"),
            Duration::from_millis(25)
        );
        assert_eq!(config.engine().max_voices(), 32);
        assert_eq!(config.engine().bpm(), 120.0);
        assert_eq!(config.engine().swing(), 0.0);
        assert!(config.kit().is_empty());
    }

    #[test]
    fn test_full_config() {
        let config: Config = serde_yml::from_str(
            "
            audio:
              device: mock
              sample_rate: 48000
              channels: 4
              buffer_size: 256
            engine:
              lookahead: 150ms
              tick: 10ms
              max_voices: 8
              bpm: 140
              swing: 0.3
            kit:
              kick:
                file: samples/kick.wav
                gain: 0.9
              snare:
                file: samples/snare.wav
            ",
        )
        .expect("Error parsing config");

        assert_eq!(config.audio().device(), Some("mock"));
        assert_eq!(config.audio().sample_rate(), 48000);
        assert_eq!(config.audio().channels(), 4);
        assert_eq!(config.audio().buffer_size(), Some(256));

        assert_eq!(
            config.engine().lookahead().expect("Error parsing lookahead"),
            Duration::from_millis(150)
        );
        assert_eq!(
            config.engine().tick().expect("Error parsing tick"),
            Duration::from_millis(10)
        );
        assert_eq!(config.engine().max_voices(), 8);
        assert_eq!(config.engine().bpm(), 140.0);
        assert_eq!(config.engine().swing(), 0.3);

        let kick = &config.kit()["kick"];
        assert_eq!(kick.file(), Path::new("samples/kick.wav"));
        assert_eq!(kick.gain(), 0.9);
        let snare = &config.kit()["snare"];
        assert_eq!(snare.gain(), 1.0);
    }

    #[test]
    fn test_invalid_duration() {
        let config: Config = serde_yml::from_str(
            "
            engine:
              lookahead: not-a-duration
            ",
        )
        .expect("Error parsing config");

        let result = config.engine().lookahead();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidDuration {
                field: "lookahead",
                ..
            })
        ));
    }

    #[test]
    fn test_max_voices_is_at_least_one() {
        let config: Config = serde_yml::from_str(
            "
            engine:
              max_voices: 0
            ",
        )
        .expect("Error parsing config");

        assert_eq!(config.engine().max_voices(), 1);
    }

    #[test]
    fn test_zero_audio_values_are_clamped() {
        let config: Config = serde_yml::from_str(
            "
            audio:
              sample_rate: 0
              channels: 0
            ",
        )
        .expect("Error parsing config");

        assert_eq!(config.audio().sample_rate(), 1);
        assert_eq!(config.audio().channels(), 1);
    }
}
