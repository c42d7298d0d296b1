//! Release signal: wakes a sync round once its acknowledge arrives.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Why [`ReleaseSignal::wait`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The acknowledge arrived
    Released,
    /// The channel closed first
    Closed,
}

#[derive(Debug, Default)]
struct Flags {
    set: bool,
    closed: bool,
}

/// Binary flag with wait/set/clear, plus a terminal close.
///
/// `set` is sticky until the next `clear`: a set that lands before `wait`
/// starts is not lost.
#[derive(Debug, Default)]
pub struct ReleaseSignal {
    flags: Mutex<Flags>,
    cond: Condvar,
}

impl ReleaseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clear(&self) {
        self.flags().set = false;
    }

    pub fn set(&self) {
        self.flags().set = true;
        self.cond.notify_all();
    }

    /// Wake every waiter for good; later waits return immediately
    pub fn close(&self) {
        self.flags().closed = true;
        self.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        self.flags().set
    }

    /// Block until set or closed. No timeout.
    pub fn wait(&self) -> Wake {
        let guard = self.flags();
        let flags = self
            .cond
            .wait_while(guard, |flags| !flags.set && !flags.closed)
            .unwrap_or_else(PoisonError::into_inner);

        if flags.set {
            Wake::Released
        } else {
            Wake::Closed
        }
    }
}
