// ABOUTME: Output device boundary and backend selection
// ABOUTME: Hardware path via cpal, in-process path via a crossbeam queue

/// In-process queue-backed output device
pub mod channel;
/// cpal-based hardware output device
pub mod cpal_output;

pub use channel::{ChannelOutput, RenderedBuffer};
pub use cpal_output::CpalOutput;

use crate::audio::{FormatDescriptor, SampleBuffer};
use crate::Result;

/// Output device consumed by the renderer core.
///
/// The two concrete strategies are selected at construction: the
/// accelerated [`CpalOutput`] submits audio to hardware, while
/// [`ChannelOutput`] hands rendered buffers to an in-process consumer
/// (headless hosts and tests). Device internals — enumeration,
/// exclusive-mode negotiation, underrun recovery — live behind this
/// boundary and are not part of the scheduling core.
pub trait OutputDevice: Send {
    /// Check whether the device can accept `format`.
    fn check_format(&self, format: &FormatDescriptor) -> Result<()>;

    /// Replace the active format.
    fn set_format(&mut self, format: &FormatDescriptor) -> Result<()>;

    /// Finalize the connection to the host pipeline.
    fn complete_connect(&mut self) -> Result<()>;

    /// Start or resume playback. `start` is the stream start time on
    /// the playback clock, microseconds.
    fn run(&mut self, start: i64) -> Result<()>;

    /// Pause playback, keeping queued audio.
    fn pause(&mut self) -> Result<()>;

    /// Stop playback and release the output.
    fn stop(&mut self) -> Result<()>;

    /// Discard queued audio at the start of a flush.
    fn begin_flush(&mut self);

    /// Flush boundary complete; accept new audio.
    fn end_flush(&mut self);

    /// Submit one (possibly truncated) buffer together with the running
    /// sample counter. Failure is surfaced to the caller, not retried.
    fn render(&mut self, buffer: &SampleBuffer, counter: u64) -> Result<()>;

    /// Current device latency in microseconds, included in lateness math.
    fn latency_micros(&self) -> i64;

    /// `(device timestamp, capture instant)` pair in microseconds for
    /// external drift measurement, when the device has a position clock.
    fn audio_clock(&self) -> Option<(u64, u64)>;

    /// Hook invoked when the first buffer of a stream arrives.
    fn on_first_sample(&mut self) {}
}

/// Select the device backend for a renderer.
///
/// `accelerated` picks the cpal hardware path; otherwise rendered
/// buffers go to an in-process [`ChannelOutput`] queue.
pub fn create_device(accelerated: bool) -> Box<dyn OutputDevice> {
    if accelerated {
        Box::new(CpalOutput::new())
    } else {
        Box::new(ChannelOutput::new())
    }
}
