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
// Voice mixing logic shared by the cpal and mock backends.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::playsync::CancelHandle;

/// One playback of a sample buffer, starting at an absolute frame position
/// on the stream clock. Voices are created by the voice player, travel to
/// the mixer over a channel, and live in the render path until they finish
/// or are cancelled.
pub struct MixerVoice {
    /// The stream frame at which playback begins.
    pub(crate) start_frame: u64,
    /// The interleaved sample data to play.
    data: Arc<Vec<f32>>,
    /// Number of channels in the sample data.
    channels: u16,
    /// Linear gain applied while mixing.
    gain: f32,
    /// Cancelling drops the voice on the next rendered buffer.
    cancel_handle: CancelHandle,
    /// Set once the voice has played to completion.
    finished: Arc<AtomicBool>,
    /// The next frame to read within the sample data.
    position: usize,
}

impl MixerVoice {
    pub(crate) fn new(
        start_frame: u64,
        data: Arc<Vec<f32>>,
        channels: u16,
        gain: f32,
        cancel_handle: CancelHandle,
        finished: Arc<AtomicBool>,
    ) -> MixerVoice {
        MixerVoice {
            start_frame,
            data,
            channels,
            gain,
            cancel_handle,
            finished,
            position: 0,
        }
    }

    /// Total frames in the sample data.
    fn frames(&self) -> usize {
        self.data.len() / self.channels as usize
    }

    /// Mixes this voice's next frame into an output frame. Returns false
    /// once the voice has no more frames.
    fn mix_frame(&mut self, frame: &mut [f32]) -> bool {
        if self.position >= self.frames() {
            self.finished.store(true, Ordering::Relaxed);
            return false;
        }

        let channels = self.channels as usize;
        let start = self.position * channels;
        if channels == 1 {
            // Mono samples play on every output channel.
            let sample = self.data[start] * self.gain;
            for out in frame.iter_mut() {
                *out += sample;
            }
        } else {
            // Source channels beyond the output width wrap around.
            for channel in 0..channels {
                let sample = self.data[start + channel] * self.gain;
                frame[channel % frame.len()] += sample;
            }
        }

        self.position += 1;
        if self.position >= self.frames() {
            self.finished.store(true, Ordering::Relaxed);
            return false;
        }
        true
    }
}

/// A cheap handle to the backend's frame counter. The scheduler times
/// steps against this rather than the OS clock, so triggers line up with
/// the audio the backend has actually rendered.
#[derive(Clone)]
pub struct StreamClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl StreamClock {
    /// The number of frames rendered since the stream started.
    pub fn frame_position(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// The stream position as a duration.
    pub fn now(&self) -> Duration {
        Duration::from_secs_f64(self.frame_position() as f64 / self.sample_rate as f64)
    }

    /// Converts an offset from the current position into an absolute frame.
    pub fn frame_after(&self, offset: Duration) -> u64 {
        self.frame_position() + (offset.as_secs_f64() * self.sample_rate as f64).round() as u64
    }

    /// Returns the sample rate of the stream.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Mixes active voices into interleaved output buffers and advances the
/// stream clock. Both backends share this render path, only the output
/// sink differs.
#[derive(Clone)]
pub struct VoiceMixer {
    /// Voices waiting to be admitted into the render path.
    pending: Receiver<MixerVoice>,
    /// The sending side handed to the voice player.
    sender: Sender<MixerVoice>,
    /// Voices currently sounding or scheduled.
    voices: Arc<Mutex<Vec<MixerVoice>>>,
    /// Frames rendered since the stream started.
    frames_rendered: Arc<AtomicU64>,
    /// Number of output channels.
    channels: u16,
    /// Output sample rate.
    sample_rate: u32,
}

impl VoiceMixer {
    /// Creates a new mixer.
    pub fn new(channels: u16, sample_rate: u32) -> VoiceMixer {
        let (sender, pending) = crossbeam_channel::unbounded();
        VoiceMixer {
            pending,
            sender,
            voices: Arc::new(Mutex::new(Vec::new())),
            frames_rendered: Arc::new(AtomicU64::new(0)),
            channels,
            sample_rate,
        }
    }

    /// The sending side for newly triggered voices.
    pub fn voice_sender(&self) -> Sender<MixerVoice> {
        self.sender.clone()
    }

    /// A clock tracking this mixer's render position.
    pub fn clock(&self) -> StreamClock {
        StreamClock {
            frames: self.frames_rendered.clone(),
            sample_rate: self.sample_rate,
        }
    }

    /// Gets the number of output channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Gets the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The number of voices known to the mixer, including scheduled ones.
    pub fn voice_count(&self) -> usize {
        self.voices.lock().len() + self.pending.len()
    }

    /// Renders the next buffer of audio into `output`, which must hold a
    /// whole number of frames, and advances the stream clock past them.
    pub fn render_into(&self, output: &mut [f32]) {
        output.fill(0.0);
        let out_channels = self.channels as usize;
        let frames = output.len() / out_channels;
        let start_frame = self.frames_rendered.load(Ordering::Acquire);

        let mut voices = self.voices.lock();
        // Admit newly triggered voices.
        while let Ok(voice) = self.pending.try_recv() {
            voices.push(voice);
        }

        voices.retain_mut(|voice| {
            if voice.cancel_handle.is_cancelled() || voice.finished.load(Ordering::Relaxed) {
                return false;
            }

            // The frame within this buffer at which the voice sounds. A
            // voice scheduled before this buffer continues where it left
            // off, one scheduled past it stays for a later buffer.
            let first = voice.start_frame.saturating_sub(start_frame) as usize;
            if first >= frames {
                return true;
            }

            for frame_index in first..frames {
                let offset = frame_index * out_channels;
                if !voice.mix_frame(&mut output[offset..offset + out_channels]) {
                    return false;
                }
            }
            true
        });
        drop(voices);

        self.frames_rendered
            .store(start_frame + frames as u64, Ordering::Release);
    }
}
