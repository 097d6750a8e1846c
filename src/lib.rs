// ABOUTME: Main library entry point for syncrender
// ABOUTME: Exports the renderer facade, sample scheduler and sync clock

//! # syncrender
//!
//! Scheduling and synchronization core for a real-time audio output
//! pipeline. Timestamped buffers arrive from an upstream pipeline at
//! arbitrary, possibly bursty rates; this crate decides for each one
//! whether to play it now, delay it, truncate it, or drop it, keeping
//! playback locked to a rate/bias-tunable reference clock that an
//! external A/V-sync authority can nudge without re-timestamping.
//!
//! The hard part lives in [`scheduler::SampleScheduler`]: lateness
//! computation against the [`sync::SyncClock`] plus device latency,
//! discontinuity detection after seeks, and the drop/truncate/wait
//! decision that keeps audio soft real-time under clock jitter.

#![warn(missing_docs)]

/// Audio buffer/format types, output device boundary and time-stretch boundary
pub mod audio;
/// Renderer lifecycle state machine and public facade
pub mod renderer;
/// Sample scheduling and drift-correction engine
pub mod scheduler;
/// Reference clock, sync clock and wake-on-time primitives
pub mod sync;

pub use audio::{FormatDescriptor, SampleBuffer};
pub use renderer::{AudioRenderer, ReceiveStatus, RenderState, RendererConfig};
pub use scheduler::{SampleScheduler, ScheduleDecision};
pub use sync::{MonotonicClock, ReferenceClock, SyncClock};

/// Result type for syncrender operations
pub type Result<T> = std::result::Result<T, error::Error>;

/// Error types for syncrender
pub mod error {
    use thiserror::Error;

    /// Error types for syncrender operations
    #[derive(Error, Debug)]
    pub enum Error {
        /// Unsupported or incompatible audio format; caller may try another
        #[error("format rejected: {0}")]
        FormatRejected(String),

        /// Reference clock missing or unreadable; scheduling degrades to
        /// unthrottled passthrough rather than deadlocking
        #[error("reference clock unavailable")]
        ClockUnavailable,

        /// Output device call failed; playback of that buffer is abandoned
        #[error("output device failure: {0}")]
        DeviceFailure(String),

        /// Broken internal discipline (double-armed wake, zero block
        /// alignment); programmer error, not user-facing
        #[error("invariant violation: {0}")]
        InvariantViolation(&'static str),
    }
}
