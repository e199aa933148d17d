//! Maintenance scheduling
//!
//! Decides, per store, whether an eviction sweep must run before the next
//! operation. The state lives inside the store's lock, so one deadline is
//! shared by every thread using the store.

use std::time::{Duration, Instant};

use crate::predicate::Predicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deadline {
    /// Not computed until the first check
    Unset,
    At(Instant),
    /// `now + timing` is not representable, so no sweep is ever due
    Never,
}

impl Deadline {
    fn after(now: Instant, timing: Duration) -> Self {
        now.checked_add(timing).map_or(Deadline::Never, Deadline::At)
    }
}

/// Outdate rule plus sweep cadence for one store
#[derive(Debug, Clone)]
pub struct Maintenance<T> {
    outdate: Option<Predicate<T>>,
    timing: Option<Duration>,
    deadline: Deadline,
}

impl<T> Default for Maintenance<T> {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl<T> Maintenance<T> {
    pub fn new(outdate: Option<Predicate<T>>, timing: Option<Duration>) -> Self {
        Self {
            outdate,
            timing,
            deadline: Deadline::Unset,
        }
    }

    /// Outdate predicate, if eviction is enabled
    pub fn outdate(&self) -> Option<&Predicate<T>> {
        self.outdate.as_ref()
    }

    /// Minimum interval between sweeps
    pub fn timing(&self) -> Option<Duration> {
        self.timing
    }

    /// Next instant at or after which a sweep runs, once computed
    pub fn deadline(&self) -> Option<Instant> {
        match self.deadline {
            Deadline::At(at) => Some(at),
            Deadline::Unset | Deadline::Never => None,
        }
    }

    /// Whether a sweep must run before the operation starting at `now`.
    ///
    /// The first call with a timing configured only arms the deadline.
    pub fn should_sweep(&mut self, now: Instant) -> bool {
        if self.outdate.is_none() {
            return false;
        }

        let Some(timing) = self.timing else {
            return true;
        };
        if self.deadline == Deadline::Unset {
            self.deadline = Deadline::after(now, timing);
        }
        match self.deadline {
            Deadline::At(at) => now >= at,
            Deadline::Unset | Deadline::Never => false,
        }
    }

    /// Push the deadline one interval past `now`
    pub fn advance(&mut self, now: Instant) {
        if let Some(timing) = self.timing {
            self.deadline = Deadline::after(now, timing);
        }
    }

    /// Outdate predicate to sweep with, if a sweep is due at `now`
    pub fn due(&mut self, now: Instant) -> Option<Predicate<T>> {
        if self.should_sweep(now) {
            self.outdate.clone()
        } else {
            None
        }
    }
}
