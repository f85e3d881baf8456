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
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::trace;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Notifications emitted by the engine. External systems (UIs, state
/// stores) subscribe to these rather than polling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// The sounding step changed. None means playback stopped and any
    /// playhead indicator should be cleared.
    StepChanged(Option<usize>),

    /// The sequencer started running.
    PlaybackStarted,

    /// The sequencer stopped.
    PlaybackStopped,

    /// A step referenced an instrument with no loaded sample. The trigger
    /// was skipped.
    SampleMissing(String),

    /// Triggering a voice for the instrument failed in the audio backend.
    TriggerFailed(String),
}

type Callback = dyn Fn(&EngineEvent) + Send + Sync;

type Registry = RwLock<HashMap<u64, Arc<Callback>>>;

/// A registry of event subscribers. Subscribing hands back a token that
/// removes the subscription when dropped, so observers cannot outlive
/// their interest by accident.
pub struct EventHub {
    subscribers: Arc<Registry>,
}

impl EventHub {
    /// Creates a new event hub with no subscribers.
    pub fn new() -> EventHub {
        EventHub {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a callback for every emitted event. The callback stays
    /// registered until the returned subscription is dropped or explicitly
    /// unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().insert(id, Arc::new(callback));
        Subscription {
            id,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    /// Delivers an event to every subscriber. Callbacks run on the
    /// emitting thread, outside the registry lock, so a callback may
    /// subscribe or unsubscribe without deadlocking.
    pub fn emit(&self, event: EngineEvent) {
        let callbacks: Vec<Arc<Callback>> = self.subscribers.read().values().cloned().collect();
        trace!(event = ?event, subscribers = callbacks.len(), "Emitting event");
        for callback in callbacks {
            callback(&event);
        }
    }

    /// The number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventHub {
    fn default() -> EventHub {
        EventHub::new()
    }
}

/// A handle to an event subscription. Dropping it removes the callback
/// from the hub.
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Removes the subscription. Equivalent to dropping the token.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.write().remove(&self.id);
        }
    }
}
