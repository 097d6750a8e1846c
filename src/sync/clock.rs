// ABOUTME: Rate/bias-adjustable sync clock over a reference clock
// ABOUTME: Drives scheduling and arms the single outstanding timed wake

use crate::error::Error;
use crate::sync::ReferenceClock;
use crate::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Smallest effective rate used for wake-deadline math. Guards against
/// a zero or negative adjustment/bias product making the inverse
/// transform divide by zero.
const MIN_EFFECTIVE_RATE: f64 = 1e-6;

#[derive(Debug)]
struct ClockState {
    /// Sync-driven rate multiplier (nominal 1.0).
    adjustment: f64,
    /// Sync-driven additive correction, applied as a second multiplier
    /// on the clock slope (nominal 1.0).
    bias: f64,
    /// Reference reading at the last rebase.
    rebase_ref: i64,
    /// Output reading at the last rebase.
    rebase_out: i64,
    /// Largest value ever reported; backward jumps are clamped here.
    last_reported: i64,
    rebased: bool,
}

impl ClockState {
    fn effective_rate(&self) -> f64 {
        let rate = self.adjustment * self.bias;
        if rate < MIN_EFFECTIVE_RATE {
            MIN_EFFECTIVE_RATE
        } else {
            rate
        }
    }

    fn transform(&self, ref_now: i64) -> i64 {
        self.rebase_out + ((ref_now - self.rebase_ref) as f64 * self.effective_rate()) as i64
    }
}

/// Playback clock with an externally tunable rate.
///
/// A thin layer over a [`ReferenceClock`] that scales elapsed reference
/// time by `adjustment * bias`. An external A/V-sync authority nudges
/// audio playback speed through [`set_adjustment`](Self::set_adjustment)
/// and [`set_bias`](Self::set_bias) instead of re-timestamping every
/// buffer. Readings are monotonic: reducing the bias rebases the slope
/// rather than jumping the reported time backward, so already-computed
/// due times stay in the future.
pub struct SyncClock {
    reference: Arc<dyn ReferenceClock>,
    state: Mutex<ClockState>,
    advise_armed: Arc<AtomicBool>,
}

impl SyncClock {
    /// Create a sync clock at neutral rate (adjustment 1.0, bias 1.0).
    pub fn new(reference: Arc<dyn ReferenceClock>) -> Self {
        Self {
            reference,
            state: Mutex::new(ClockState {
                adjustment: 1.0,
                bias: 1.0,
                rebase_ref: 0,
                rebase_out: 0,
                last_reported: 0,
                rebased: false,
            }),
            advise_armed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current playback time in microseconds, transformed through the
    /// rate adjustment and bias applied since the last rebasing.
    pub fn now(&self) -> Result<i64> {
        let ref_now = self.reference.now_micros()?;
        let mut state = self.state.lock();
        if !state.rebased {
            state.rebase_ref = ref_now;
            state.rebase_out = ref_now;
            state.last_reported = ref_now;
            state.rebased = true;
        }
        let raw = state.transform(ref_now);
        let out = raw.max(state.last_reported);
        state.last_reported = out;
        Ok(out)
    }

    /// Set the sync-driven rate multiplier. Effective immediately for
    /// subsequent reads and wake arming; no effect on an already-armed
    /// wake.
    pub fn set_adjustment(&self, factor: f64) {
        self.rebase_with(|state| state.adjustment = factor);
    }

    /// Set the sync-driven bias. Effective immediately; a reduced bias
    /// flattens the slope from here on instead of stepping backward.
    pub fn set_bias(&self, bias: f64) {
        self.rebase_with(|state| state.bias = bias);
    }

    /// Current bias.
    pub fn bias(&self) -> f64 {
        self.state.lock().bias
    }

    /// Current adjustment.
    pub fn adjustment(&self) -> f64 {
        self.state.lock().adjustment
    }

    fn rebase_with(&self, apply: impl FnOnce(&mut ClockState)) {
        let ref_now = self.reference.now_micros().ok();
        let mut state = self.state.lock();
        if let Some(ref_now) = ref_now {
            if state.rebased {
                // Anchor the new slope at the current output so the
                // change is a slope change, not a step.
                state.rebase_out = state.transform(ref_now).max(state.last_reported);
                state.rebase_ref = ref_now;
            }
        }
        apply(&mut state);
    }

    /// Arm exactly one wake for `base + due_time` (both in playback
    /// time), returning a token carrying the reference-domain delay to
    /// sleep for. Only one advise may be outstanding at a time; arming
    /// a second before the first is completed or cancelled is a caller
    /// error and fails with [`Error::InvariantViolation`].
    pub fn advise_time(&self, base: i64, due_time: i64) -> Result<AdviseToken> {
        if self.advise_armed.swap(true, Ordering::AcqRel) {
            return Err(Error::InvariantViolation("advise already armed"));
        }
        let deadline = base.saturating_add(due_time);
        let result = (|| {
            let ref_now = self.reference.now_micros()?;
            let state = self.state.lock();
            // Invert the rate transform: how long, in reference time,
            // until the playback clock reads `deadline`.
            let out_now = state.transform(ref_now).max(state.last_reported);
            let delta_out = deadline - out_now;
            let delta_ref = (delta_out as f64 / state.effective_rate()) as i64;
            Ok(Duration::from_micros(delta_ref.max(0) as u64))
        })();
        match result {
            Ok(delay) => Ok(AdviseToken {
                armed: Arc::clone(&self.advise_armed),
                delay,
            }),
            Err(e) => {
                self.advise_armed.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Whether an advise is currently outstanding.
    pub fn advise_outstanding(&self) -> bool {
        self.advise_armed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SyncClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SyncClock")
            .field("adjustment", &state.adjustment)
            .field("bias", &state.bias)
            .field("advise_armed", &self.advise_outstanding())
            .finish()
    }
}

/// Handle for the single outstanding timed wake.
///
/// Holds the reference-domain delay until the advised due time. The
/// advise stays armed until the token is completed or dropped; dropping
/// cancels it, so an abandoned wait cannot wedge the one-outstanding
/// discipline.
#[derive(Debug)]
pub struct AdviseToken {
    armed: Arc<AtomicBool>,
    delay: Duration,
}

impl AdviseToken {
    /// How long the render thread should block before the buffer is due.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Mark the wake as fired, releasing the advise slot.
    pub fn complete(self) {
        drop(self);
    }
}

impl Drop for AdviseToken {
    fn drop(&mut self) {
        self.armed.store(false, Ordering::Release);
    }
}
