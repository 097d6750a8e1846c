// ABOUTME: In-process output device backed by a lock-free queue
// ABOUTME: Hands rendered buffers to a consumer thread; used headless and in tests

use crate::audio::output::OutputDevice;
use crate::audio::{FormatDescriptor, FormatTag, SampleBuffer};
use crate::error::Error;
use crate::Result;
use crossbeam::queue::SegQueue;
use std::sync::Arc;
use std::time::Instant;

/// One buffer as delivered to the output queue.
#[derive(Debug, Clone)]
pub struct RenderedBuffer {
    /// Declared presentation start, microseconds
    pub start: i64,
    /// Running sample counter at render time
    pub counter: u64,
    /// Effective payload bytes
    pub data: Vec<u8>,
}

/// Output device that queues rendered buffers for an in-process consumer.
///
/// The non-accelerated backend: instead of submitting to hardware, each
/// rendered buffer lands on a lock-free queue the host drains on its own
/// thread. Latency is a fixed figure supplied at construction (zero by
/// default), standing in for a real device's buffer depth report.
pub struct ChannelOutput {
    queue: Arc<SegQueue<RenderedBuffer>>,
    format: Option<FormatDescriptor>,
    latency_micros: i64,
    running: bool,
    rendered_micros: i64,
    epoch: Instant,
}

impl ChannelOutput {
    /// Create a zero-latency channel output.
    pub fn new() -> Self {
        Self::with_latency(0)
    }

    /// Create a channel output reporting a fixed latency.
    pub fn with_latency(latency_micros: i64) -> Self {
        Self {
            queue: Arc::new(SegQueue::new()),
            format: None,
            latency_micros,
            running: false,
            rendered_micros: 0,
            epoch: Instant::now(),
        }
    }

    /// Handle to the rendered-buffer queue for the consumer side.
    pub fn queue(&self) -> Arc<SegQueue<RenderedBuffer>> {
        Arc::clone(&self.queue)
    }
}

impl Default for ChannelOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDevice for ChannelOutput {
    fn check_format(&self, format: &FormatDescriptor) -> Result<()> {
        format.validate()
    }

    fn set_format(&mut self, format: &FormatDescriptor) -> Result<()> {
        format.validate()?;
        self.format = Some(format.clone());
        Ok(())
    }

    fn complete_connect(&mut self) -> Result<()> {
        if self.format.is_none() {
            return Err(Error::DeviceFailure("no format negotiated".into()));
        }
        Ok(())
    }

    fn run(&mut self, _start: i64) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        while self.queue.pop().is_some() {}
        Ok(())
    }

    fn begin_flush(&mut self) {
        while self.queue.pop().is_some() {}
    }

    fn end_flush(&mut self) {}

    fn render(&mut self, buffer: &SampleBuffer, counter: u64) -> Result<()> {
        let format = self
            .format
            .as_ref()
            .ok_or_else(|| Error::DeviceFailure("render before format negotiation".into()))?;
        if format.tag != FormatTag::Spdif {
            self.rendered_micros += format.duration_of(buffer.len());
        }
        self.queue.push(RenderedBuffer {
            start: buffer.start_time(),
            counter,
            data: buffer.data().to_vec(),
        });
        Ok(())
    }

    fn latency_micros(&self) -> i64 {
        self.latency_micros
    }

    fn audio_clock(&self) -> Option<(u64, u64)> {
        Some((
            self.rendered_micros.max(0) as u64,
            self.epoch.elapsed().as_micros() as u64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_device() -> ChannelOutput {
        let mut device = ChannelOutput::new();
        device
            .set_format(&FormatDescriptor::pcm(2, 48_000, 16))
            .unwrap();
        device.complete_connect().unwrap();
        device
    }

    #[test]
    fn test_render_queues_effective_bytes() {
        let mut device = ready_device();
        let consumer = device.queue();
        let mut buffer = SampleBuffer::new(vec![7; 16], 1_000, 2_000);
        buffer.set_len(8);
        device.render(&buffer, 3).unwrap();

        let rendered = consumer.pop().expect("buffer queued");
        assert_eq!(rendered.data.len(), 8);
        assert_eq!(rendered.start, 1_000);
        assert_eq!(rendered.counter, 3);
    }

    #[test]
    fn test_flush_discards_queued_audio() {
        let mut device = ready_device();
        let consumer = device.queue();
        let buffer = SampleBuffer::new(vec![0; 192], 0, 1_000);
        device.render(&buffer, 1).unwrap();
        device.begin_flush();
        device.end_flush();
        assert!(consumer.pop().is_none());
    }

    #[test]
    fn test_render_before_format_fails() {
        let mut device = ChannelOutput::new();
        let buffer = SampleBuffer::new(vec![0; 4], 0, 1_000);
        assert!(matches!(
            device.render(&buffer, 1),
            Err(Error::DeviceFailure(_))
        ));
    }

    #[test]
    fn test_audio_clock_tracks_rendered_duration() {
        let mut device = ready_device();
        // 960 stereo 16-bit frames = 20ms at 48kHz.
        let buffer = SampleBuffer::new(vec![0; 960 * 4], 0, 20_000);
        device.render(&buffer, 1).unwrap();
        let (device_ts, _qpc) = device.audio_clock().unwrap();
        assert_eq!(device_ts, 20_000);
    }
}
