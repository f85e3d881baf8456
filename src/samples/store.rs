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
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::decode::{self, DecodeError};

/// A loaded sample ready for playback. The data is interleaved f32 at the
/// store's output sample rate and is shared between voices without copying.
#[derive(Clone)]
pub struct LoadedSample {
    /// The sample data as f32 samples (interleaved if multi-channel).
    data: Arc<Vec<f32>>,
    /// Number of channels in the sample.
    channels: u16,
    /// Sample rate of the audio data.
    sample_rate: u32,
}

impl LoadedSample {
    /// The interleaved sample data.
    pub fn data(&self) -> &Arc<Vec<f32>> {
        &self.data
    }

    /// Returns the number of channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Returns the sample rate of the audio data.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The number of frames in the sample.
    pub fn frames(&self) -> usize {
        self.data.len() / self.channels as usize
    }

    /// The play duration of the sample.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
impl LoadedSample {
    /// Builds a sample directly from data.
    pub(crate) fn from_data(data: Vec<f32>, channels: u16, sample_rate: u32) -> LoadedSample {
        LoadedSample {
            data: Arc::new(data),
            channels,
            sample_rate,
        }
    }
}

impl fmt::Debug for LoadedSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedSample")
            .field("frames", &self.frames())
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// Error returned when a sample cannot be loaded.
#[derive(Debug, thiserror::Error)]
#[error("Failed to load sample {id} from {}: {source}", .path.display())]
pub struct LoadError {
    id: String,
    path: PathBuf,
    #[source]
    source: DecodeError,
}

impl LoadError {
    /// The id of the sample that failed to load.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The underlying decode failure.
    pub fn cause(&self) -> &DecodeError {
        &self.source
    }
}

/// Loads, decodes, and caches samples by instrument id.
///
/// Samples are decoded entirely into memory so that triggering never touches
/// the filesystem. The cache is keyed by id: loading an already loaded id is
/// a cache hit and returns the same shared buffer without reading the file.
pub struct SampleStore {
    /// Cache of loaded samples by id.
    cache: RwLock<HashMap<String, LoadedSample>>,
    /// The output sample rate. Samples are resampled to this at load time.
    sample_rate: u32,
}

impl SampleStore {
    /// Creates a new sample store targeting the given output sample rate.
    pub fn new(sample_rate: u32) -> SampleStore {
        SampleStore {
            cache: RwLock::new(HashMap::new()),
            sample_rate,
        }
    }

    /// Loads a sample from a file and caches it under the given id. Loading
    /// an id that is already cached returns the existing sample and does not
    /// read the file again. Release the id first to swap its sample out.
    pub fn load(&self, id: &str, path: &Path) -> Result<LoadedSample, LoadError> {
        if let Some(sample) = self.cache.read().get(id) {
            debug!(id, "Using cached sample");
            return Ok(sample.clone());
        }

        info!(id, path = ?path, "Loading sample into memory");
        let decoded = decode::decode_file(path).map_err(|source| LoadError {
            id: id.to_string(),
            path: path.to_path_buf(),
            source,
        })?;

        let data = if decoded.sample_rate != self.sample_rate {
            debug!(
                id,
                source_rate = decoded.sample_rate,
                target_rate = self.sample_rate,
                "Resampling sample"
            );
            decode::resample_linear(
                &decoded.data,
                decoded.channels,
                decoded.sample_rate,
                self.sample_rate,
            )
        } else {
            decoded.data
        };

        let sample = LoadedSample {
            data: Arc::new(data),
            channels: decoded.channels,
            sample_rate: self.sample_rate,
        };

        info!(
            id,
            channels = sample.channels,
            sample_rate = sample.sample_rate,
            duration_ms = sample.duration().as_millis(),
            memory_kb = sample.memory_size() / 1024,
            "Sample loaded"
        );

        // If two loads of the same id race, the first inserted sample wins
        // so the cached buffer stays stable.
        Ok(self
            .cache
            .write()
            .entry(id.to_string())
            .or_insert(sample)
            .clone())
    }

    /// Gets a loaded sample by id.
    pub fn get(&self, id: &str) -> Option<LoadedSample> {
        self.cache.read().get(id).cloned()
    }

    /// Returns true if the id has a loaded sample.
    pub fn contains(&self, id: &str) -> bool {
        self.cache.read().contains_key(id)
    }

    /// Releases the sample cached under the given id. The memory is freed
    /// once the last playing voice drops its reference. Unknown ids are a
    /// no-op.
    pub fn release(&self, id: &str) {
        if self.cache.write().remove(id).is_some() {
            debug!(id, "Released sample");
        }
    }

    /// The ids of all loaded samples, sorted by name.
    pub fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.cache.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the total memory used by cached samples.
    pub fn memory_usage(&self) -> usize {
        self.cache
            .read()
            .values()
            .map(|sample| sample.memory_size())
            .sum()
    }

    /// The output sample rate of the store.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl fmt::Debug for SampleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleStore")
            .field("cached_samples", &self.cache.read().len())
            .field("sample_rate", &self.sample_rate)
            .field("memory_kb", &(self.memory_usage() / 1024))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use tempfile::tempdir;

    use crate::testutil;

    use super::*;

    const RATE: u32 = 44100;

    fn write_fixture(dir: &Path, name: &str, samples: &[f32], channels: u16, rate: u32) -> PathBuf {
        let path = dir.join(name);
        testutil::write_wav(&path, samples, channels, rate).expect("Error writing wav");
        path
    }

    #[test]
    fn test_load_and_get() {
        let dir = tempdir().expect("Error creating temp dir");
        let path = write_fixture(dir.path(), "kick.wav", &vec![0.5; 512], 1, RATE);
        let store = SampleStore::new(RATE);

        let sample = store.load("kick", &path).expect("Error loading sample");
        assert_eq!(sample.channels(), 1);
        assert_eq!(sample.sample_rate(), RATE);
        assert_eq!(sample.frames(), 512);
        assert_eq!(sample.memory_size(), 512 * 4);

        let fetched = store.get("kick").expect("Sample should be cached");
        assert!(Arc::ptr_eq(sample.data(), fetched.data()));
        assert!(store.contains("kick"));
        assert_eq!(store.loaded_ids(), vec!["kick".to_string()]);
        assert_eq!(store.memory_usage(), 512 * 4);
    }

    #[test]
    fn test_load_is_idempotent() {
        let dir = tempdir().expect("Error creating temp dir");
        let path = write_fixture(dir.path(), "kick.wav", &vec![0.25; 256], 1, RATE);
        let store = SampleStore::new(RATE);

        let first = store.load("kick", &path).expect("Error loading sample");

        // Removing the file proves the second load never touches it.
        std::fs::remove_file(&path).expect("Error removing file");
        let second = store
            .load("kick", &path)
            .expect("Cached load should not read the file");

        assert!(Arc::ptr_eq(first.data(), second.data()));
    }

    #[test]
    fn test_release() {
        let dir = tempdir().expect("Error creating temp dir");
        let path = write_fixture(dir.path(), "snare.wav", &vec![0.1; 128], 1, RATE);
        let store = SampleStore::new(RATE);

        store.load("snare", &path).expect("Error loading sample");
        assert!(store.contains("snare"));

        store.release("snare");
        assert!(!store.contains("snare"));
        assert!(store.get("snare").is_none());
        assert_eq!(store.memory_usage(), 0);

        // Releasing again, or releasing an unknown id, is a no-op.
        store.release("snare");
        store.release("never-loaded");
    }

    #[test]
    fn test_load_missing_file() {
        let store = SampleStore::new(RATE);

        let err = store
            .load("kick", Path::new("/nonexistent/kick.wav"))
            .expect_err("Load should fail");
        assert_eq!(err.id(), "kick");
        assert!(matches!(err.cause(), DecodeError::Io(_)));
        assert!(!store.contains("kick"));
    }

    #[test]
    fn test_load_undecodable_file() {
        let dir = tempdir().expect("Error creating temp dir");
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"this is not audio data").expect("Error writing file");
        let store = SampleStore::new(RATE);

        let err = store.load("noise", &path).expect_err("Load should fail");
        assert_eq!(err.id(), "noise");
    }

    #[test]
    fn test_load_resamples_to_output_rate() {
        let dir = tempdir().expect("Error creating temp dir");
        let path = write_fixture(dir.path(), "tom.wav", &vec![0.3; 512], 1, 22050);
        let store = SampleStore::new(RATE);

        let sample = store.load("tom", &path).expect("Error loading sample");
        assert_eq!(sample.sample_rate(), RATE);
        assert_eq!(sample.frames(), 1024);
    }

    #[test]
    fn test_load_stereo() {
        let dir = tempdir().expect("Error creating temp dir");
        let mut samples = Vec::with_capacity(512);
        for _ in 0..256 {
            samples.push(0.5);
            samples.push(-0.5);
        }
        let path = write_fixture(dir.path(), "ride.wav", &samples, 2, RATE);
        let store = SampleStore::new(RATE);

        let sample = store.load("ride", &path).expect("Error loading sample");
        assert_eq!(sample.channels(), 2);
        assert_eq!(sample.frames(), 256);
        assert!((sample.data()[0] - 0.5).abs() < 1e-6);
        assert!((sample.data()[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_load_integer_wav() {
        let dir = tempdir().expect("Error creating temp dir");
        let path = dir.path().join("clap.wav");
        testutil::write_wav_i16(&path, &vec![i16::MAX / 2; 64], 1, RATE)
            .expect("Error writing wav");
        let store = SampleStore::new(RATE);

        let sample = store.load("clap", &path).expect("Error loading sample");
        assert_eq!(sample.frames(), 64);
        assert!((sample.data()[0] - 0.5).abs() < 0.001);
    }
}
