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

//! The sequencer engine: composition root and public operation surface.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, error, info};

use crate::audio::{self, Backend};
use crate::config::Config;
use crate::events::{EngineEvent, EventHub, Subscription};
use crate::pattern::Pattern;
use crate::samples::{LoadError, LoadedSample, SampleStore};
use crate::scheduler::Scheduler;
use crate::transport::Transport;
use crate::voices::VoicePlayer;

/// The sequencer engine. Owns the audio backend, the sample cache, the
/// voice player, and the scheduler, and exposes the operations external
/// callers use to drive them.
///
/// Construction opens the configured audio backend, so a machine without
/// a usable audio device fails in `Engine::new` rather than at playback
/// time. Dropping the engine stops playback and closes the backend.
pub struct Engine {
    /// The audio backend voices render through.
    backend: Arc<dyn Backend>,
    /// The shared transport state.
    transport: Arc<Transport>,
    /// The sample cache.
    store: Arc<SampleStore>,
    /// Triggers and tracks voices.
    player: Arc<VoicePlayer>,
    /// The pattern the scheduler reads.
    pattern: Arc<RwLock<Pattern>>,
    /// Per-instrument gain from the kit configuration.
    gains: Arc<RwLock<HashMap<String, f32>>>,
    /// Event subscribers.
    hub: Arc<EventHub>,
    /// The step scheduler.
    scheduler: Arc<Scheduler>,
}

impl Engine {
    /// Creates an engine from the given configuration, opening the audio
    /// backend it describes and preloading the configured kit.
    pub fn new(config: &Config) -> Result<Engine, Box<dyn Error>> {
        let backend = audio::get_backend(config.audio())?;
        Engine::with_backend(config, backend)
    }

    /// Creates an engine on top of an already constructed backend.
    pub fn with_backend(
        config: &Config,
        backend: Arc<dyn Backend>,
    ) -> Result<Engine, Box<dyn Error>> {
        backend.start()?;

        let engine_config = config.engine();
        let transport = Arc::new(Transport::new(engine_config.bpm(), engine_config.swing()));
        let store = Arc::new(SampleStore::new(backend.mixer().sample_rate()));
        let player = Arc::new(VoicePlayer::new(
            backend.mixer(),
            engine_config.max_voices(),
        ));
        let pattern = Arc::new(RwLock::new(Pattern::new("empty")));
        let gains: Arc<RwLock<HashMap<String, f32>>> = Arc::new(RwLock::new(HashMap::new()));
        let hub = Arc::new(EventHub::new());

        let scheduler = Arc::new(Scheduler::new(
            transport.clone(),
            store.clone(),
            player.clone(),
            pattern.clone(),
            gains.clone(),
            hub.clone(),
            backend.clock(),
            engine_config.lookahead()?,
            engine_config.tick()?,
        ));

        let engine = Engine {
            backend,
            transport,
            store,
            player,
            pattern,
            gains,
            hub,
            scheduler,
        };

        // Preload the kit. A failed entry is reported and skipped so one
        // bad file does not take the whole kit down.
        for (id, instrument) in config.kit() {
            match engine.store.load(id, instrument.file()) {
                Ok(_) => {
                    engine.gains.write().insert(id.clone(), instrument.gain());
                }
                Err(e) => error!(err = e.to_string(), id, "Unable to load kit sample"),
            }
        }

        info!(
            backend = %engine.backend,
            samples = engine.store.loaded_ids().len(),
            memory_kb = engine.store.memory_usage() / 1024,
            "Engine initialized."
        );
        Ok(engine)
    }

    /// Loads a sample from the given path and caches it under the
    /// instrument id. Loading an id that is already cached is a cheap
    /// no-op and keeps the existing data.
    pub fn load_sample(&self, id: &str, path: &Path) -> Result<(), LoadError> {
        self.store.load(id, path)?;
        Ok(())
    }

    /// Releases the cached sample for an instrument id, freeing its
    /// memory once the last playing voice finishes. Unknown ids are a
    /// no-op.
    pub fn release_sample(&self, id: &str) {
        self.store.release(id);
        self.gains.write().remove(id);
    }

    /// Gets the loaded sample for an instrument id.
    pub fn sample(&self, id: &str) -> Option<LoadedSample> {
        self.store.get(id)
    }

    /// The ids of every loaded sample, sorted by name.
    pub fn loaded_samples(&self) -> Vec<String> {
        self.store.loaded_ids()
    }

    /// Plays a loaded sample immediately, outside the step grid. Playing
    /// an id with no loaded sample is a no-op.
    pub fn play_sample(&self, id: &str) {
        let sample = match self.store.get(id) {
            Some(sample) => sample,
            None => {
                debug!(id, "No sample loaded for instrument, ignoring");
                self.hub.emit(EngineEvent::SampleMissing(id.to_string()));
                return;
            }
        };

        let gain = self.gains.read().get(id).copied().unwrap_or(1.0);
        if let Err(e) = self.player.trigger(id, &sample, Duration::ZERO, gain) {
            error!(err = e.to_string(), id, "Unable to trigger sample");
            self.hub.emit(EngineEvent::TriggerFailed(id.to_string()));
        }
    }

    /// Stops every playing voice for an instrument id. Stopping an id
    /// with no voices is a no-op.
    pub fn stop_sample(&self, id: &str) {
        self.player.stop_instrument(id);
    }

    /// Returns the tempo in beats per minute.
    pub fn bpm(&self) -> f64 {
        self.transport.bpm()
    }

    /// Sets the tempo, clamped to the supported range. Takes effect from
    /// the next scheduled step.
    pub fn set_bpm(&self, bpm: f64) {
        self.transport.set_bpm(bpm);
    }

    /// Returns the swing amount.
    pub fn swing(&self) -> f64 {
        self.transport.swing()
    }

    /// Sets the swing amount, clamped to [0.0, 1.0].
    pub fn set_swing(&self, swing: f64) {
        self.transport.set_swing(swing);
    }

    /// Starts playback of the given pattern from step 0. If playback is
    /// already running this swaps the pattern and leaves it running.
    pub fn start_playback(&self, pattern: Pattern) {
        info!(
            pattern = pattern.name(),
            bpm = self.transport.bpm(),
            swing = self.transport.swing(),
            "Starting playback."
        );
        *self.pattern.write() = pattern;
        self.scheduler.start();
    }

    /// Stops playback, silencing scheduled and sounding voices, and
    /// clears the playhead. Safe to call from inside an event callback;
    /// the teardown then completes on the scheduler's own thread after
    /// the callback returns. Stopping while stopped is a no-op.
    pub fn stop_playback(&self) {
        self.scheduler.stop();
    }

    /// Returns true while the sequencer is running.
    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    /// The step that is currently sounding, or None while stopped.
    pub fn current_step(&self) -> Option<usize> {
        self.transport.current_step()
    }

    /// Replaces the pattern without interrupting playback. The scheduler
    /// picks it up at the next step it schedules.
    pub fn set_pattern(&self, pattern: Pattern) {
        *self.pattern.write() = pattern;
    }

    /// Registers a callback invoked with the step index whenever the
    /// playhead moves. The callback receives None when playback stops.
    /// Dropping the returned subscription unregisters the callback.
    pub fn on_step_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<usize>) + Send + Sync + 'static,
    {
        self.hub.subscribe(move |event| {
            if let EngineEvent::StepChanged(step) = event {
                callback(*step);
            }
        })
    }

    /// Registers a callback for every engine event.
    pub fn on_event<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.hub.subscribe(callback)
    }

    /// The number of voices currently sounding or scheduled.
    pub fn active_voices(&self) -> usize {
        self.player.active_voices()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.scheduler.stop();
        self.backend.stop();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.backend.to_string())
            .field("samples", &self.store.loaded_ids().len())
            .field("active_voices", &self.player.active_voices())
            .field("playing", &self.transport.is_playing())
            .finish()
    }
}
