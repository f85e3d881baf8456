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

//! A sample-accurate step sequencer and drum sampler for live
//! performances.
//!
//! The engine decodes audio samples into memory, advances a 64 step
//! sequencer clock with look-ahead scheduling, applies swing to the
//! off-beat steps, and triggers voices in lockstep with the tempo.
//! Front-ends drive a single [`Engine`] and subscribe to step and
//! lifecycle events rather than polling.

pub mod audio;
pub mod config;
pub mod engine;
pub mod events;
pub mod pattern;
pub mod playsync;
pub mod samples;
pub mod scheduler;
pub mod transport;
pub mod voices;
#[cfg(test)]
mod testutil;

pub use config::Config;
pub use engine::Engine;
pub use events::{EngineEvent, Subscription};
pub use pattern::{Pattern, PatternError, STEP_COUNT};
pub use samples::{LoadError, LoadedSample};
