// ABOUTME: Sample scheduling and drift-correction engine
// ABOUTME: Per-buffer drop/truncate/wait decisions against the sync clock

/// Core scheduling decision logic
pub mod sample_scheduler;

pub use sample_scheduler::{SampleScheduler, ScheduleContext, ScheduleDecision};
