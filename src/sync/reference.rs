// ABOUTME: Reference clock adapter over a monotonic time source
// ABOUTME: Instant-based clock for production, manually stepped clock for tests

use crate::error::Error;
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// A monotonically increasing time source read in microseconds.
///
/// Implementations must never report a smaller value than a previous
/// read. A read may fail with [`Error::ClockUnavailable`], in which
/// case the scheduler treats every buffer as immediately due instead
/// of throttling against a clock it cannot trust.
pub trait ReferenceClock: Send + Sync {
    /// Current reference time in microseconds since an arbitrary epoch.
    fn now_micros(&self) -> Result<i64>;
}

/// Reference clock backed by [`std::time::Instant`].
///
/// The epoch is the moment of construction, so readings start near
/// zero and fit comfortably in `i64` microseconds.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Create a clock whose epoch is now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceClock for MonotonicClock {
    fn now_micros(&self) -> Result<i64> {
        Ok(self.epoch.elapsed().as_micros() as i64)
    }
}

/// Manually stepped reference clock for tests and offline rendering.
///
/// Cloning shares the underlying time value, so a test can hold one
/// handle and hand another to the component under test. `set`/`advance`
/// clamp to the previous reading to preserve monotonicity.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

#[derive(Debug, Default)]
struct ManualState {
    now_micros: i64,
    unavailable: bool,
}

impl ManualClock {
    /// Create a clock reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current reading. Values below the current reading are ignored.
    pub fn set(&self, micros: i64) {
        let mut state = self.state.lock();
        state.now_micros = state.now_micros.max(micros);
    }

    /// Advance the current reading by `micros`.
    pub fn advance(&self, micros: i64) {
        let mut state = self.state.lock();
        state.now_micros += micros.max(0);
    }

    /// Make every subsequent read fail with `ClockUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }
}

impl ReferenceClock for ManualClock {
    fn now_micros(&self) -> Result<i64> {
        let state = self.state.lock();
        if state.unavailable {
            return Err(Error::ClockUnavailable);
        }
        Ok(state.now_micros)
    }
}
