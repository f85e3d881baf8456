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
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{info, span, Level};

use super::{mixer::VoiceMixer, Backend as AudioBackend, BackendError};
use crate::playsync::CancelHandle;

/// Frames rendered per tick of the simulated stream.
const FRAMES_PER_TICK: usize = 512;

#[derive(Default)]
struct StreamState {
    cancel_handle: Option<CancelHandle>,
    join_handle: Option<JoinHandle<()>>,
}

/// A mock backend. Doesn't produce any audible output. Backends whose
/// name ends in `-manual` advance their clock only through
/// [`advance_frames`](Backend::advance_frames), everything else renders
/// on a thread pacing itself like a real sound card.
pub struct Backend {
    name: String,
    mixer: VoiceMixer,
    realtime: bool,
    is_playing: Arc<AtomicBool>,
    state: Mutex<StreamState>,
}

impl Backend {
    /// Gets the given mock backend.
    pub fn get(name: &str, channels: u16, sample_rate: u32) -> Arc<Backend> {
        Arc::new(Backend {
            name: name.to_string(),
            mixer: VoiceMixer::new(channels, sample_rate),
            realtime: !name.ends_with("-manual"),
            is_playing: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(StreamState::default()),
        })
    }

    /// Renders the next `frames` frames and returns the interleaved
    /// output. This is how manual-clock mocks make time pass.
    pub fn advance_frames(&self, frames: usize) -> Vec<f32> {
        let mut output = vec![0.0f32; frames * self.mixer.channels() as usize];
        self.mixer.render_into(&mut output);
        output
    }

    /// Returns true if the backend is currently rendering.
    #[cfg(test)]
    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::Relaxed)
    }
}

impl AudioBackend for Backend {
    fn mixer(&self) -> &VoiceMixer {
        &self.mixer
    }

    fn start(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if self.is_playing.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.is_playing.store(true, Ordering::Relaxed);

        if !self.realtime {
            return Ok(());
        }

        let cancel_handle = CancelHandle::new();
        let join_handle = {
            let cancel_handle = cancel_handle.clone();
            let mixer = self.mixer.clone();
            let name = self.name.clone();

            thread::spawn(move || {
                let span = span!(Level::INFO, "audio stream (mock)");
                let _enter = span.enter();

                info!(device = name, "Mock audio stream started.");

                let tick = Duration::from_secs_f64(
                    FRAMES_PER_TICK as f64 / f64::from(mixer.sample_rate()),
                );
                let mut buffer = vec![0.0f32; FRAMES_PER_TICK * mixer.channels() as usize];
                while !cancel_handle.wait_timeout(tick) {
                    mixer.render_into(&mut buffer);
                }

                info!(device = name, "Mock audio stream stopped.");
            })
        };

        state.cancel_handle = Some(cancel_handle);
        state.join_handle = Some(join_handle);
        Ok(())
    }

    fn stop(&self) {
        let (cancel_handle, join_handle) = {
            let mut state = self.state.lock();
            (state.cancel_handle.take(), state.join_handle.take())
        };

        if let Some(cancel_handle) = cancel_handle {
            cancel_handle.cancel();
        }
        if let Some(join_handle) = join_handle {
            let _ = join_handle.join();
        }

        self.is_playing.store(false, Ordering::Relaxed);
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
