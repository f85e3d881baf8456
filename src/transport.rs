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
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// The minimum supported tempo in beats per minute.
pub const MIN_BPM: f64 = 60.0;
/// The maximum supported tempo in beats per minute.
pub const MAX_BPM: f64 = 200.0;

/// Steps per beat. The sequencer runs at sixteenth note resolution.
const STEPS_PER_BEAT: f64 = 4.0;

/// The step index used while the sequencer is stopped.
const NO_STEP: i64 = -1;

/// The shared transport state of the sequencer: tempo, swing, whether the
/// sequencer is running, and the step that is currently sounding.
///
/// All fields are atomics so that the scheduler thread, the audio callback,
/// and API callers can read them without locking. The scheduler is the only
/// writer of the play flag and the current step.
pub struct Transport {
    /// The tempo in beats per minute, stored as f64 bits.
    bpm: AtomicU64,
    /// The swing amount in the range [0.0, 1.0], stored as f64 bits.
    swing: AtomicU64,
    /// Whether the sequencer is currently running.
    playing: AtomicBool,
    /// The currently sounding step, or NO_STEP while stopped.
    current_step: AtomicI64,
}

impl Transport {
    /// Creates a new transport. Tempo and swing are clamped to their
    /// supported ranges.
    pub fn new(bpm: f64, swing: f64) -> Transport {
        Transport {
            bpm: AtomicU64::new(bpm.clamp(MIN_BPM, MAX_BPM).to_bits()),
            swing: AtomicU64::new(swing.clamp(0.0, 1.0).to_bits()),
            playing: AtomicBool::new(false),
            current_step: AtomicI64::new(NO_STEP),
        }
    }

    /// Returns the current tempo in beats per minute.
    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm.load(Ordering::Relaxed))
    }

    /// Sets the tempo, clamping it to the supported range. The new tempo
    /// applies from the next scheduled step, steps already computed keep
    /// their trigger times.
    pub fn set_bpm(&self, bpm: f64) {
        self.bpm
            .store(bpm.clamp(MIN_BPM, MAX_BPM).to_bits(), Ordering::Relaxed);
    }

    /// Returns the current swing amount.
    pub fn swing(&self) -> f64 {
        f64::from_bits(self.swing.load(Ordering::Relaxed))
    }

    /// Sets the swing amount, clamping it to [0.0, 1.0].
    pub fn set_swing(&self, swing: f64) {
        self.swing
            .store(swing.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// The duration of a single step at the current tempo. A step is a
    /// sixteenth note, so this is 60s / bpm / 4.
    pub fn step_duration(&self) -> Duration {
        Duration::from_secs_f64(60.0 / self.bpm() / STEPS_PER_BEAT)
    }

    /// Returns true if the sequencer is currently running.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    /// Marks the sequencer as running or stopped.
    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Relaxed);
    }

    /// Returns the step that is currently sounding, or None while stopped.
    pub fn current_step(&self) -> Option<usize> {
        match self.current_step.load(Ordering::Relaxed) {
            NO_STEP => None,
            step => Some(step as usize),
        }
    }

    /// Sets the currently sounding step. Passing None marks the step
    /// position as unset.
    pub fn set_current_step(&self, step: Option<usize>) {
        self.current_step
            .store(step.map_or(NO_STEP, |step| step as i64), Ordering::Relaxed);
    }
}
