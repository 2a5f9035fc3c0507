// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time handling.
//!
//! State resolution is full of "is this marker old enough to trust?"
//! questions, so both monotonic and wall-clock time go through this trait.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// A clock that provides the current time.
pub trait Clock: Send + Sync {
    fn monotonic(&self) -> Instant;
    fn system(&self) -> SystemTime;
}

/// Real system clock.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn monotonic(&self) -> Instant {
        Instant::now()
    }

    fn system(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Fake clock for testing with controllable time.
///
/// Advancing moves both the monotonic and the wall clock, so marker-age
/// checks against real file mtimes behave as if time had passed.
#[derive(Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<(Instant, SystemTime)>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new((Instant::now(), SystemTime::now()))),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.0 += duration;
        inner.1 += duration;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn monotonic(&self) -> Instant {
        self.inner.lock().0
    }

    fn system(&self) -> SystemTime {
        self.inner.lock().1
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
