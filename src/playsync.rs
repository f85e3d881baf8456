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
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A cancel handle is shared between the scheduler loop, playing voices, and
/// the various stop paths. It's the holder's responsibility to respect a
/// cancel request.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

struct Inner {
    /// Set once the underlying operation should be cancelled.
    cancelled: Mutex<bool>,
    /// Wakes blocked waiters when the state flips.
    condvar: Condvar,
}

impl CancelHandle {
    /// Creates a new cancel handle.
    pub fn new() -> CancelHandle {
        CancelHandle {
            inner: Arc::new(Inner {
                cancelled: Mutex::new(false),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Returns true if the operation has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Waits until the handle is cancelled or the timeout elapses. Returns
    /// true if the handle was cancelled during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut cancelled = self.inner.cancelled.lock();
        self.inner
            .condvar
            .wait_while_for(&mut cancelled, |cancelled| !*cancelled, timeout);
        *cancelled
    }

    /// Cancels the operation and wakes all waiters.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        if !*cancelled {
            *cancelled = true;
            self.inner.condvar.notify_all();
        }
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    #[test]
    fn test_cancel_handle_cancelled() {
        let cancel_handle = CancelHandle::new();
        assert!(!cancel_handle.is_cancelled());

        let join = {
            let cancel_handle = cancel_handle.clone();
            thread::spawn(move || cancel_handle.wait_timeout(Duration::from_secs(10)))
        };

        cancel_handle.cancel();
        let cancelled = join.join();
        assert!(cancelled.is_ok());
        assert!(cancelled.unwrap());
        assert!(cancel_handle.is_cancelled());
    }

    #[test]
    fn test_cancel_handle_timeout() {
        let cancel_handle = CancelHandle::new();

        assert!(!cancel_handle.wait_timeout(Duration::from_millis(10)));
        assert!(!cancel_handle.is_cancelled());
    }

    #[test]
    fn test_cancel_handle_idempotent() {
        let cancel_handle = CancelHandle::new();

        cancel_handle.cancel();
        cancel_handle.cancel();
        assert!(cancel_handle.is_cancelled());
        assert!(cancel_handle.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_clones_share_state() {
        let cancel_handle = CancelHandle::new();
        let clone = cancel_handle.clone();

        clone.cancel();
        assert!(cancel_handle.is_cancelled());
    }
}
