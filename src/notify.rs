//! Wakeup primitive for the control blocks.

use parking_lot::{Condvar, Mutex};

/// A condition variable with a sticky "pending" flag.
///
/// `signal()` before `wait()` is remembered, so the usual check-then-wait
/// pattern cannot lose a wakeup that lands between the predicate check and
/// the block. Each instance has one waiting thread (the player task, the
/// decoder task, or the command issuer); any number of threads may signal.
pub struct Notify {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Notify {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Block until a signal arrives (or consume one that already has).
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while !*pending {
            self.cond.wait(&mut pending);
        }
        *pending = false;
    }

    /// Wake the waiter. Idempotent until the next `wait`.
    pub fn signal(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cond.notify_all();
    }
}

impl Default for Notify {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signal_before_wait_is_not_lost() {
        let notify = Notify::new();
        notify.signal();
        // Returns immediately instead of blocking.
        notify.wait();
    }

    #[test]
    fn test_cross_thread_wakeup() {
        let notify = Arc::new(Notify::new());
        let waiter = {
            let notify = Arc::clone(&notify);
            thread::spawn(move || notify.wait())
        };
        notify.signal();
        waiter.join().unwrap();
    }

    #[test]
    fn test_signal_is_consumed_once() {
        let notify = Notify::new();
        notify.signal();
        notify.signal();
        notify.wait();
        // The flag is down again; a fresh signal is needed for the next wait.
        assert!(!*notify.pending.lock());
    }
}
