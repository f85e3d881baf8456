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

//! Voice management for polyphonic sample playback.
//!
//! A voice is one playback of a loaded sample. Triggering hands the mixer a
//! voice scheduled at an absolute stream frame and keeps a handle here so
//! voices can be stopped individually, per instrument, or all at once.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::audio::mixer::{MixerVoice, StreamClock, VoiceMixer};
use crate::playsync::CancelHandle;
use crate::samples::LoadedSample;

/// Global voice ID counter.
static NEXT_VOICE_ID: AtomicU64 = AtomicU64::new(1);

/// Errors raised while triggering voices.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Audio backend is no longer accepting voices")]
    BackendClosed,
}

/// A handle to a triggered voice. Dropping the handle does not stop the
/// voice, samples play to completion unless explicitly stopped.
#[derive(Clone)]
pub struct VoiceHandle {
    id: u64,
    instrument: String,
    cancel_handle: CancelHandle,
    finished: Arc<AtomicBool>,
}

impl VoiceHandle {
    /// Unique ID of this voice.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The instrument id of the sample this voice is playing.
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Stops the voice. Stopping a voice that has already finished or
    /// been stopped is a no-op.
    pub fn stop(&self) {
        self.cancel_handle.cancel();
    }

    /// Returns true once the voice has played to completion or been
    /// stopped.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed) || self.cancel_handle.is_cancelled()
    }
}

impl fmt::Debug for VoiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceHandle")
            .field("id", &self.id)
            .field("instrument", &self.instrument)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// The voice player's record of a triggered voice.
struct ActiveVoice {
    id: u64,
    instrument: String,
    start_frame: u64,
    cancel_handle: CancelHandle,
    finished: Arc<AtomicBool>,
}

impl ActiveVoice {
    fn is_live(&self) -> bool {
        !self.finished.load(Ordering::Relaxed) && !self.cancel_handle.is_cancelled()
    }
}

/// Triggers voices against the mixer and enforces the polyphony limit.
pub struct VoicePlayer {
    /// Sends new voices into the mixer's render path.
    sender: Sender<MixerVoice>,
    /// The backend's stream clock, used to place trigger offsets.
    clock: StreamClock,
    /// Global maximum number of simultaneous voices.
    max_voices: usize,
    /// Voices that have been triggered and not yet finished.
    voices: Mutex<Vec<ActiveVoice>>,
}

impl VoicePlayer {
    /// Creates a new voice player feeding the given mixer.
    pub fn new(mixer: &VoiceMixer, max_voices: usize) -> VoicePlayer {
        VoicePlayer {
            sender: mixer.voice_sender(),
            clock: mixer.clock(),
            max_voices,
            voices: Mutex::new(Vec::new()),
        }
    }

    /// Triggers a voice for the given sample, starting `offset` past the
    /// backend's current stream position. An offset of zero plays as soon
    /// as the next buffer is rendered.
    pub fn trigger(
        &self,
        instrument: &str,
        sample: &LoadedSample,
        offset: Duration,
        gain: f32,
    ) -> Result<VoiceHandle, PlaybackError> {
        let id = NEXT_VOICE_ID.fetch_add(1, Ordering::SeqCst);
        let start_frame = self.clock.frame_after(offset);
        let cancel_handle = CancelHandle::new();
        let finished = Arc::new(AtomicBool::new(false));

        {
            let mut voices = self.voices.lock();
            voices.retain(ActiveVoice::is_live);

            // Steal the oldest voice once the global limit is hit.
            if voices.len() >= self.max_voices {
                if let Some(oldest) = voices.iter().min_by_key(|voice| voice.start_frame) {
                    oldest.cancel_handle.cancel();
                    let oldest_id = oldest.id;
                    voices.retain(|voice| voice.id != oldest_id);
                    warn!(
                        max_voices = self.max_voices,
                        "Voice limit reached, stealing oldest voice"
                    );
                }
            }

            voices.push(ActiveVoice {
                id,
                instrument: instrument.to_string(),
                start_frame,
                cancel_handle: cancel_handle.clone(),
                finished: finished.clone(),
            });
        }

        let voice = MixerVoice::new(
            start_frame,
            sample.data().clone(),
            sample.channels(),
            gain,
            cancel_handle.clone(),
            finished.clone(),
        );
        if self.sender.send(voice).is_err() {
            self.voices.lock().retain(|voice| voice.id != id);
            return Err(PlaybackError::BackendClosed);
        }

        debug!(id, instrument, start_frame, "Triggered voice.");
        Ok(VoiceHandle {
            id,
            instrument: instrument.to_string(),
            cancel_handle,
            finished,
        })
    }

    /// Stops every voice playing the given instrument. Returns the number
    /// of voices stopped.
    pub fn stop_instrument(&self, instrument: &str) -> usize {
        let mut stopped = 0;
        self.voices.lock().retain(|voice| {
            if voice.instrument == instrument {
                voice.cancel_handle.cancel();
                stopped += 1;
                false
            } else {
                true
            }
        });
        if stopped > 0 {
            debug!(instrument, stopped, "Stopped voices for instrument.");
        }
        stopped
    }

    /// Stops all voices.
    pub fn stop_all(&self) {
        let mut voices = self.voices.lock();
        for voice in voices.drain(..) {
            voice.cancel_handle.cancel();
        }
    }

    /// The number of voices currently playing or scheduled.
    pub fn active_voices(&self) -> usize {
        let mut voices = self.voices.lock();
        voices.retain(ActiveVoice::is_live);
        voices.len()
    }
}

impl fmt::Debug for VoicePlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoicePlayer")
            .field("active_voices", &self.voices.lock().len())
            .field("max_voices", &self.max_voices)
            .finish()
    }
}
