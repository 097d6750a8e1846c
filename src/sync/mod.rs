// ABOUTME: Clock and wake primitives for the renderer core
// ABOUTME: Reference clock adapter, rate/bias sync clock, render-wake gate

/// Rate/bias-adjustable playback clock
pub mod clock;
/// Monotonic reference clock adapter
pub mod reference;
/// Blocking wait-for-signal-or-time primitive
pub mod wake;

pub use clock::{AdviseToken, SyncClock};
pub use reference::{ManualClock, MonotonicClock, ReferenceClock};
pub use wake::{RenderGate, WakeReason};
