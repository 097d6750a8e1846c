// ABOUTME: Audio types and collaborator boundaries for the renderer core
// ABOUTME: Sample buffers, format descriptors, output devices, time-stretch stage

/// Output device boundary and backends
pub mod output;
/// Time-stretch stage boundary and pass-through implementation
pub mod stretch;
/// Core audio type definitions (SampleBuffer, FormatDescriptor)
pub mod types;

pub use output::{ChannelOutput, CpalOutput, OutputDevice, RenderedBuffer};
pub use stretch::{TempoBuffer, TimeStretch};
pub use types::{FormatDescriptor, FormatTag, SampleBuffer, TIME_UNITS_PER_SEC};
