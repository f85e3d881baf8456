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

//! The look-ahead scheduling loop.
//!
//! The scheduler ticks well below the step rate and, on every tick,
//! schedules all steps due within the look-ahead window at their exact
//! stream time. Voices fire on the backend's frame clock rather than at
//! tick time, so tick jitter never reaches the audio. A late tick catches
//! up by scheduling every intervening step, it never skips any.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{debug, error, info, span, warn, Level};

use crate::audio::mixer::StreamClock;
use crate::events::{EngineEvent, EventHub};
use crate::pattern::{Pattern, STEP_COUNT};
use crate::playsync::CancelHandle;
use crate::samples::SampleStore;
use crate::transport::Transport;
use crate::voices::VoicePlayer;

/// How far ahead of the stream clock steps are scheduled.
pub const DEFAULT_LOOKAHEAD: Duration = Duration::from_millis(100);

/// How often the scheduling loop wakes up. Must stay comfortably below
/// the look-ahead window or steps fall due between ticks.
pub const DEFAULT_TICK: Duration = Duration::from_millis(25);

/// Priority for the scheduler thread. High enough to tick on time under
/// load, below the audio callback.
const SCHEDULER_THREAD_PRIORITY: u8 = 60;

/// Tracks where the look-ahead loop is in the step cycle.
struct StepCursor {
    /// The step that will be scheduled next.
    next_step: usize,
    /// When that step fires, on the stream clock.
    next_step_time: Duration,
}

impl StepCursor {
    fn new(now: Duration) -> StepCursor {
        StepCursor {
            next_step: 0,
            next_step_time: now,
        }
    }

    /// Moves the cursor past the step just scheduled. The delta into an
    /// odd step carries the swing push; the delta into an even step is
    /// the plain step duration, measured from wherever the odd step
    /// landed. Tempo changes only reach increments computed after them.
    fn advance(&mut self, transport: &Transport) {
        let step_duration = transport.step_duration();
        let next = (self.next_step + 1) % STEP_COUNT;
        let mut delta = step_duration;
        if next % 2 == 1 {
            delta += step_duration.mul_f64(transport.swing() * 0.5);
        }
        self.next_step_time += delta;
        self.next_step = next;
    }
}

struct Running {
    cancel_handle: CancelHandle,
    join_handle: JoinHandle<()>,
}

/// The scheduler state shared with its loop thread.
struct Core {
    transport: Arc<Transport>,
    store: Arc<SampleStore>,
    player: Arc<VoicePlayer>,
    pattern: Arc<RwLock<Pattern>>,
    gains: Arc<RwLock<HashMap<String, f32>>>,
    hub: Arc<EventHub>,
    clock: StreamClock,
    lookahead: Duration,
    tick: Duration,
}

/// Drives the step sequence while playback is running.
pub struct Scheduler {
    core: Arc<Core>,
    state: Mutex<Option<Running>>,
}

impl Scheduler {
    /// Creates a new scheduler. The scheduler starts stopped.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<Transport>,
        store: Arc<SampleStore>,
        player: Arc<VoicePlayer>,
        pattern: Arc<RwLock<Pattern>>,
        gains: Arc<RwLock<HashMap<String, f32>>>,
        hub: Arc<EventHub>,
        clock: StreamClock,
        lookahead: Duration,
        tick: Duration,
    ) -> Scheduler {
        // A tick at or past the look-ahead window lets steps fall due
        // between wakeups, so every trigger fires late with offset zero.
        let tick = if tick < lookahead {
            tick
        } else {
            let clamped = (lookahead / 2).max(Duration::from_millis(1));
            warn!(
                configured = ?tick,
                lookahead = ?lookahead,
                clamped = ?clamped,
                "Tick exceeds the look-ahead window, clamping"
            );
            clamped
        };

        Scheduler {
            core: Arc::new(Core {
                transport,
                store,
                player,
                pattern,
                gains,
                hub,
                clock,
                lookahead,
                tick,
            }),
            state: Mutex::new(None),
        }
    }

    /// Starts the scheduling loop. Starting a running scheduler is a
    /// no-op.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if state.is_some() {
            debug!("Scheduler is already running");
            return;
        }

        self.core.transport.set_current_step(None);
        self.core.transport.set_playing(true);

        let cancel_handle = CancelHandle::new();
        let join_handle = {
            let core = self.core.clone();
            let cancel_handle = cancel_handle.clone();

            thread::spawn(move || {
                raise_thread_priority();

                let span = span!(Level::INFO, "scheduler");
                let _enter = span.enter();

                info!(
                    bpm = core.transport.bpm(),
                    swing = core.transport.swing(),
                    "Scheduler started."
                );

                // Emitting from this thread keeps the started event
                // ahead of the first step-changed event.
                core.hub.emit(EngineEvent::PlaybackStarted);

                let mut cursor = StepCursor::new(core.clock.now());
                loop {
                    core.schedule_window(&mut cursor, core.clock.now());
                    if cancel_handle.wait_timeout(core.tick) {
                        break;
                    }
                }

                core.shut_down();
                info!("Scheduler stopped.");
            })
        };

        *state = Some(Running {
            cancel_handle,
            join_handle,
        });
    }

    /// Stops the scheduling loop, silences every voice, and resets the
    /// playhead. Teardown runs on the loop thread's exit path: calling
    /// from another thread blocks until it has finished, calling from
    /// inside an event callback only requests the stop and the loop
    /// completes it once the callback returns. Stopping a stopped
    /// scheduler is a no-op.
    pub fn stop(&self) {
        let running = match self.state.lock().take() {
            Some(running) => running,
            None => return,
        };

        running.cancel_handle.cancel();
        // Event callbacks run on the loop thread itself. A subscriber
        // stopping playback from one must not join its own thread.
        if thread::current().id() != running.join_handle.thread().id() {
            let _ = running.join_handle.join();
        }
    }

    /// Returns true while the scheduling loop is running.
    pub fn is_running(&self) -> bool {
        self.state.lock().is_some()
    }
}

impl Core {
    /// Silences every voice, resets the playhead, and notifies
    /// subscribers that playback has stopped. Runs on the loop thread
    /// once the loop has exited.
    fn shut_down(&self) {
        self.player.stop_all();
        self.transport.set_playing(false);
        self.transport.set_current_step(None);
        self.hub.emit(EngineEvent::StepChanged(None));
        self.hub.emit(EngineEvent::PlaybackStopped);
    }

    /// Schedules every step due within the look-ahead window past `now`.
    /// Each step triggers the voices of its active instruments at the
    /// step's exact stream time and moves the playhead, in step order.
    fn schedule_window(&self, cursor: &mut StepCursor, now: Duration) {
        let horizon = now + self.lookahead;

        while cursor.next_step_time <= horizon {
            let step = cursor.next_step;
            let offset = cursor.next_step_time.saturating_sub(now);

            let mut missing: Vec<String> = Vec::new();
            let mut failed: Vec<String> = Vec::new();
            {
                let pattern = self.pattern.read();
                let gains = self.gains.read();
                for instrument in pattern.active_instruments(step) {
                    match self.store.get(instrument) {
                        Some(sample) => {
                            let gain = gains.get(instrument).copied().unwrap_or(1.0);
                            if let Err(e) = self.player.trigger(instrument, &sample, offset, gain)
                            {
                                error!(
                                    err = e.to_string(),
                                    instrument, step, "Unable to trigger voice"
                                );
                                failed.push(instrument.to_string());
                            }
                        }
                        None => missing.push(instrument.to_string()),
                    }
                }
            }

            // Diagnostics go out after the pattern lock is released so a
            // subscriber may swap the pattern from its callback.
            for instrument in missing {
                debug!(instrument, step, "No sample loaded for instrument, skipping trigger");
                self.hub.emit(EngineEvent::SampleMissing(instrument));
            }
            for instrument in failed {
                self.hub.emit(EngineEvent::TriggerFailed(instrument));
            }

            self.transport.set_current_step(Some(step));
            self.hub.emit(EngineEvent::StepChanged(Some(step)));
            cursor.advance(&self.transport);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(running) = self.state.lock().take() {
            running.cancel_handle.cancel();
            if thread::current().id() != running.join_handle.thread().id() {
                let _ = running.join_handle.join();
            }
        }
    }
}

fn raise_thread_priority() {
    if let Ok(priority) = ThreadPriorityValue::try_from(SCHEDULER_THREAD_PRIORITY) {
        if let Err(e) = set_current_thread_priority(ThreadPriority::Crossplatform(priority)) {
            warn!(error = %e, "Unable to raise scheduler thread priority");
        }
    }
}

#[cfg(test)]
mod test {
    use parking_lot::Mutex as PlMutex;
    use tempfile::tempdir;

    use super::*;
    use crate::audio::{mock, Backend};
    use crate::events::Subscription;
    use crate::testutil;

    struct Fixture {
        scheduler: Arc<Scheduler>,
        backend: Arc<mock::Backend>,
        transport: Arc<Transport>,
        store: Arc<SampleStore>,
        hub: Arc<EventHub>,
        events: Arc<PlMutex<Vec<EngineEvent>>>,
        _subscription: Subscription,
    }

    /// Builds a scheduler against a manual-clock mock backend running at
    /// 1kHz, so one frame is exactly one millisecond.
    fn fixture(bpm: f64, swing: f64, lookahead: Duration, pattern: Pattern) -> Fixture {
        fixture_with_backend(
            bpm,
            swing,
            lookahead,
            pattern,
            mock::Backend::get("mock-manual", 1, 1000),
        )
    }

    fn fixture_with_backend(
        bpm: f64,
        swing: f64,
        lookahead: Duration,
        pattern: Pattern,
        backend: Arc<mock::Backend>,
    ) -> Fixture {
        let transport = Arc::new(Transport::new(bpm, swing));
        let store = Arc::new(SampleStore::new(backend.mixer().sample_rate()));
        let player = Arc::new(VoicePlayer::new(backend.mixer(), 32));
        let hub = Arc::new(EventHub::new());

        let events: Arc<PlMutex<Vec<EngineEvent>>> = Arc::new(PlMutex::new(Vec::new()));
        let subscription = {
            let events = events.clone();
            hub.subscribe(move |event: &EngineEvent| events.lock().push(event.clone()))
        };

        let scheduler = Arc::new(Scheduler::new(
            transport.clone(),
            store.clone(),
            player,
            Arc::new(RwLock::new(pattern)),
            Arc::new(RwLock::new(HashMap::new())),
            hub.clone(),
            backend.clock(),
            lookahead,
            DEFAULT_TICK,
        ));

        Fixture {
            scheduler,
            backend,
            transport,
            store,
            hub,
            events,
            _subscription: subscription,
        }
    }

    fn steps(events: &[EngineEvent]) -> Vec<Option<usize>> {
        events
            .iter()
            .filter_map(|event| match event {
                EngineEvent::StepChanged(step) => Some(*step),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_schedules_first_step_immediately() {
        let fixture = fixture(120.0, 0.0, Duration::from_millis(100), Pattern::new("empty"));
        let mut cursor = StepCursor::new(Duration::ZERO);

        fixture.scheduler.core.schedule_window(&mut cursor, Duration::ZERO);

        // At 120 bpm steps are 125ms apart, so only step 0 fits in the
        // 100ms window.
        assert_eq!(steps(&fixture.events.lock()), vec![Some(0)]);
        assert_eq!(fixture.transport.current_step(), Some(0));
        assert_eq!(cursor.next_step, 1);
        assert_eq!(cursor.next_step_time, Duration::from_millis(125));
    }

    #[test]
    fn test_late_tick_catches_up_without_skipping() {
        let fixture = fixture(120.0, 0.0, Duration::from_millis(100), Pattern::new("empty"));
        let mut cursor = StepCursor::new(Duration::ZERO);
        fixture.scheduler.core.schedule_window(&mut cursor, Duration::ZERO);
        fixture.events.lock().clear();

        // Pretend ticks stalled for half a second. Steps 1 through 4 are
        // now due or within the window and each must still fire in order.
        fixture
            .scheduler
            .core
            .schedule_window(&mut cursor, Duration::from_millis(500));

        assert_eq!(
            steps(&fixture.events.lock()),
            vec![Some(1), Some(2), Some(3), Some(4)]
        );
        assert_eq!(fixture.transport.current_step(), Some(4));
    }

    #[test]
    fn test_swing_pushes_odd_steps() {
        let fixture = fixture(120.0, 0.5, Duration::from_millis(400), Pattern::new("empty"));
        let mut cursor = StepCursor::new(Duration::ZERO);

        fixture.scheduler.core.schedule_window(&mut cursor, Duration::ZERO);

        // Step 0 at 0ms, step 1 pushed to 156.25ms, step 2 at 281.25ms.
        // Step 3 would land at 437.5ms, past the window.
        assert_eq!(steps(&fixture.events.lock()), vec![Some(0), Some(1), Some(2)]);
        assert_eq!(cursor.next_step, 3);
        assert_eq!(cursor.next_step_time, Duration::from_micros(437_500));
    }

    #[test]
    fn test_full_cycle_wraps_at_exact_time() {
        let fixture = fixture(120.0, 0.0, Duration::from_millis(7999), Pattern::new("empty"));
        let mut cursor = StepCursor::new(Duration::ZERO);

        fixture.scheduler.core.schedule_window(&mut cursor, Duration::ZERO);

        let scheduled = steps(&fixture.events.lock());
        let expected: Vec<Option<usize>> = (0..STEP_COUNT).map(Some).collect();
        assert_eq!(scheduled, expected);

        // With no swing, 64 steps at 120 bpm span exactly 8 seconds, and
        // the cursor wraps back to step 0.
        assert_eq!(cursor.next_step, 0);
        assert_eq!(cursor.next_step_time, Duration::from_millis(8000));
    }

    #[test]
    fn test_bpm_change_applies_to_future_increments() {
        let fixture = fixture(120.0, 0.0, Duration::from_millis(100), Pattern::new("empty"));
        let mut cursor = StepCursor::new(Duration::ZERO);
        fixture.scheduler.core.schedule_window(&mut cursor, Duration::ZERO);

        // Step 1 is already queued for 125ms. Halving the tempo must not
        // move it, only the increments computed afterwards.
        fixture.transport.set_bpm(60.0);
        fixture.events.lock().clear();

        fixture
            .scheduler
            .core
            .schedule_window(&mut cursor, Duration::from_millis(500));

        assert_eq!(steps(&fixture.events.lock()), vec![Some(1), Some(2)]);
        assert_eq!(cursor.next_step_time, Duration::from_millis(625));
    }

    #[test]
    fn test_skips_instruments_without_samples() {
        let dir = tempdir().expect("Error creating temp dir");
        let kick_path = dir.path().join("kick.wav");
        testutil::write_wav(&kick_path, &[0.5f32; 10], 1, 1000).expect("Error writing wav");

        let mut pattern = Pattern::new("beat");
        pattern.add_row("kick", "x").expect("Error adding row");
        pattern.add_row("ghost", "x").expect("Error adding row");

        let fixture = fixture(120.0, 0.0, Duration::from_millis(50), pattern);
        fixture
            .store
            .load("kick", &kick_path)
            .expect("Error loading sample");

        let mut cursor = StepCursor::new(Duration::ZERO);
        fixture.scheduler.core.schedule_window(&mut cursor, Duration::ZERO);

        assert_eq!(fixture.backend.mixer().voice_count(), 1);
        let events = fixture.events.lock();
        assert!(events.contains(&EngineEvent::SampleMissing("ghost".to_string())));
    }

    #[test]
    fn test_voices_land_on_exact_frames() {
        let dir = tempdir().expect("Error creating temp dir");
        let kick_path = dir.path().join("kick.wav");
        testutil::write_wav(&kick_path, &[1.0f32; 2], 1, 1000).expect("Error writing wav");

        let mut pattern = Pattern::new("beat");
        pattern.add_row("kick", ".x").expect("Error adding row");

        let backend = mock::Backend::get("mock-manual", 1, 1000);
        let fixture =
            fixture_with_backend(120.0, 0.0, Duration::from_millis(100), pattern, backend);
        fixture
            .store
            .load("kick", &kick_path)
            .expect("Error loading sample");

        // Let 50ms of audio render, then run a tick. Step 1 is due at
        // 125ms, 75ms past the clock, so its voice starts at frame 125.
        let mut cursor = StepCursor::new(Duration::ZERO);
        fixture.backend.advance_frames(50);
        fixture
            .scheduler
            .core
            .schedule_window(&mut cursor, fixture.backend.clock().now());

        let output = fixture.backend.advance_frames(80);
        assert!(output[..75].iter().all(|sample| *sample == 0.0));
        assert_eq!(output[75], 1.0);
        assert_eq!(output[76], 1.0);
        assert_eq!(output[77], 0.0);
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let backend = mock::Backend::get("mock", 1, 44100);
        backend.start().expect("Error starting backend");
        let fixture = fixture_with_backend(
            200.0,
            0.0,
            DEFAULT_LOOKAHEAD,
            Pattern::new("empty"),
            backend,
        );

        assert!(!fixture.scheduler.is_running());
        assert_eq!(fixture.transport.current_step(), None);

        fixture.scheduler.start();
        assert!(fixture.scheduler.is_running());
        assert!(fixture.transport.is_playing());
        {
            let transport = fixture.transport.clone();
            testutil::eventually(
                move || transport.current_step().is_some(),
                "Playhead never moved",
            );
        }

        fixture.scheduler.stop();
        assert!(!fixture.scheduler.is_running());
        assert!(!fixture.transport.is_playing());
        assert_eq!(fixture.transport.current_step(), None);

        {
            let events = fixture.events.lock();
            assert_eq!(events.first(), Some(&EngineEvent::PlaybackStarted));
            let len = events.len();
            assert_eq!(events[len - 2], EngineEvent::StepChanged(None));
            assert_eq!(events[len - 1], EngineEvent::PlaybackStopped);
        }

        // Stopping again is a no-op, and a fresh start runs from step 0.
        fixture.scheduler.stop();
        fixture.events.lock().clear();

        fixture.scheduler.start();
        {
            let events = fixture.events.clone();
            testutil::eventually(
                move || {
                    events
                        .lock()
                        .contains(&EngineEvent::StepChanged(Some(0)))
                },
                "Restarted playback never reached step 0",
            );
        }
        fixture.scheduler.stop();
        fixture.backend.stop();
    }

    #[test]
    fn test_tick_clamped_below_lookahead() {
        let backend = mock::Backend::get("mock-manual", 1, 1000);
        let fixture = fixture_with_backend(
            120.0,
            0.0,
            Duration::from_millis(100),
            Pattern::new("empty"),
            backend,
        );
        assert_eq!(fixture.scheduler.core.tick, DEFAULT_TICK);

        let slow = Scheduler::new(
            fixture.transport.clone(),
            fixture.store.clone(),
            Arc::new(VoicePlayer::new(fixture.backend.mixer(), 32)),
            Arc::new(RwLock::new(Pattern::new("empty"))),
            Arc::new(RwLock::new(HashMap::new())),
            fixture.hub.clone(),
            fixture.backend.clock(),
            Duration::from_millis(100),
            Duration::from_millis(500),
        );
        assert_eq!(slow.core.tick, Duration::from_millis(50));
    }

    #[test]
    fn test_stop_from_step_callback() {
        let backend = mock::Backend::get("mock", 1, 44100);
        backend.start().expect("Error starting backend");
        let fixture = fixture_with_backend(
            200.0,
            0.0,
            DEFAULT_LOOKAHEAD,
            Pattern::new("empty"),
            backend,
        );

        // A subscriber stopping playback from its own callback runs on
        // the scheduler thread, so the stop must not join that thread.
        let _stop_on_step = {
            let scheduler = fixture.scheduler.clone();
            fixture.hub.subscribe(move |event: &EngineEvent| {
                if matches!(event, EngineEvent::StepChanged(Some(_))) {
                    scheduler.stop();
                }
            })
        };

        fixture.scheduler.start();

        {
            let events = fixture.events.clone();
            testutil::eventually(
                move || events.lock().last() == Some(&EngineEvent::PlaybackStopped),
                "stop() from a step callback never finished playback teardown",
            );
        }

        assert!(!fixture.scheduler.is_running());
        assert!(!fixture.transport.is_playing());
        assert_eq!(fixture.transport.current_step(), None);
        {
            let events = fixture.events.lock();
            let len = events.len();
            assert_eq!(events[len - 2], EngineEvent::StepChanged(None));
            assert_eq!(events[len - 1], EngineEvent::PlaybackStopped);
        }
        fixture.backend.stop();
    }
}
