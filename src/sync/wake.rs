// ABOUTME: Render-wake gate for blocking the render path until due time
// ABOUTME: Condvar-backed event with signal, reset and wait-with-timeout

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Why a [`RenderGate`] wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The gate was explicitly signaled (pause, flush, or skip-ahead).
    Signaled,
    /// The timeout elapsed; the buffer is due.
    Elapsed,
}

/// Blocking wait-for-signal-or-time primitive.
///
/// One gate serves one renderer. A wait is a single-purpose render
/// thread suspension with a hard wake source: either the armed timer
/// elapses or another thread calls [`signal`](RenderGate::signal)
/// (pause, flush, or the scheduler skipping a fully late buffer).
/// There is no cooperative scheduling here; waits block the calling
/// thread.
#[derive(Debug, Default)]
pub struct RenderGate {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl RenderGate {
    /// Create an unsignaled gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Release a waiting thread, or latch the signal for the next wait.
    pub fn signal(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_one();
    }

    /// Clear any latched signal. Called before arming a timed wake so a
    /// stale signal from a previous cycle cannot cut the wait short.
    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    /// Block until signaled or until `timeout` elapses, consuming any
    /// signal. Returns what woke the thread.
    pub fn wait_for(&self, timeout: Duration) -> WakeReason {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                if *signaled {
                    break;
                }
                return WakeReason::Elapsed;
            }
        }
        *signaled = false;
        WakeReason::Signaled
    }
}
