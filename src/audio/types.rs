// ABOUTME: Core audio type definitions
// ABOUTME: Timestamped byte buffers and wave format descriptors

use crate::error::Error;
use crate::Result;

/// Microseconds per second; all presentation times are i64 microseconds.
pub const TIME_UNITS_PER_SEC: i64 = 1_000_000;

/// Wave format family carried by a [`FormatDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTag {
    /// Integer PCM
    Pcm,
    /// 32-bit float PCM
    Float,
    /// Encoded bitstream wrapped for direct hardware decode (S/PDIF)
    Spdif,
}

/// Audio format descriptor, replaced wholesale on renegotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    /// Wave format family
    pub tag: FormatTag,
    /// Channel count
    pub channels: u16,
    /// Frames per second
    pub sample_rate: u32,
    /// Bits per sample per channel
    pub bits_per_sample: u16,
    /// Bytes per frame across all channels; division operand, never zero
    pub block_align: u16,
}

impl FormatDescriptor {
    /// Standard integer PCM descriptor.
    pub fn pcm(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            tag: FormatTag::Pcm,
            channels,
            sample_rate,
            bits_per_sample,
            block_align: channels * (bits_per_sample / 8),
        }
    }

    /// Synthetic passthrough descriptor for encoded multichannel audio.
    ///
    /// Channel count and sample rate are inherited from the input
    /// format; depth is fixed at 16 bits and block alignment at
    /// 2 x channels, matching how an encoded bitstream is framed for
    /// direct hardware decode.
    pub fn passthrough_for(channels: u16, sample_rate: u32) -> Self {
        Self {
            tag: FormatTag::Spdif,
            channels,
            sample_rate,
            bits_per_sample: 16,
            block_align: 2 * channels,
        }
    }

    /// Validate the fields used as divisors and loop bounds.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(Error::FormatRejected("zero channels".into()));
        }
        if self.sample_rate == 0 {
            return Err(Error::FormatRejected("zero sample rate".into()));
        }
        if self.block_align == 0 {
            return Err(Error::FormatRejected("zero block alignment".into()));
        }
        Ok(())
    }

    /// Whole frames contained in `bytes`.
    pub fn frames_in(&self, bytes: usize) -> usize {
        bytes / self.block_align as usize
    }

    /// Playback duration of `bytes` in microseconds.
    pub fn duration_of(&self, bytes: usize) -> i64 {
        self.frames_in(bytes) as i64 * TIME_UNITS_PER_SEC / self.sample_rate as i64
    }
}

/// Timestamped audio buffer.
///
/// Opaque byte payload with a declared `[start, end)` presentation
/// interval and a mutable effective length. The scheduler owns a buffer
/// only for the duration of one scheduling decision: it either flows on
/// to the output device path (possibly truncated) or is zeroed and
/// handed back to the host on a full drop. Never retained across calls.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    payload: Vec<u8>,
    start: i64,
    end: i64,
    len: usize,
}

impl SampleBuffer {
    /// Wrap a payload with its declared presentation interval.
    pub fn new(payload: Vec<u8>, start: i64, end: i64) -> Self {
        let len = payload.len();
        Self {
            payload,
            start,
            end,
            len,
        }
    }

    /// Declared presentation start, microseconds.
    pub fn start_time(&self) -> i64 {
        self.start
    }

    /// Declared presentation end, microseconds.
    pub fn end_time(&self) -> i64 {
        self.end
    }

    /// Effective payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.payload[..self.len]
    }

    /// Effective length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the effective length is zero.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the effective length, clamped to the payload size.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.payload.len());
    }

    /// Keep only the trailing `keep` bytes of the effective payload,
    /// shifting them to the front. Discards the oldest audio so the
    /// remaining data matches the (later) time the buffer will actually
    /// be heard.
    pub fn truncate_front_to(&mut self, keep: usize) {
        let keep = keep.min(self.len);
        let discard = self.len - keep;
        self.payload.copy_within(discard..self.len, 0);
        self.len = keep;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_format_shape() {
        let f = FormatDescriptor::passthrough_for(6, 48_000);
        assert_eq!(f.tag, FormatTag::Spdif);
        assert_eq!(f.channels, 6);
        assert_eq!(f.sample_rate, 48_000);
        assert_eq!(f.bits_per_sample, 16);
        assert_eq!(f.block_align, 12);
        assert!(f.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_block_align() {
        let mut f = FormatDescriptor::pcm(2, 48_000, 16);
        f.block_align = 0;
        assert!(matches!(f.validate(), Err(Error::FormatRejected(_))));
    }

    #[test]
    fn test_duration_of_whole_frames() {
        let f = FormatDescriptor::pcm(2, 48_000, 16);
        // 960 frames at 48kHz = 20ms; a trailing partial frame is ignored.
        assert_eq!(f.duration_of(960 * 4), 20_000);
        assert_eq!(f.duration_of(960 * 4 + 3), 20_000);
    }

    #[test]
    fn test_presentation_interval_accessors() {
        let buffer = SampleBuffer::new(vec![0; 8], 1_000, 3_000);
        assert_eq!(buffer.start_time(), 1_000);
        assert_eq!(buffer.end_time(), 3_000);
    }

    #[test]
    fn test_truncate_front_keeps_trailing_bytes() {
        let mut buffer = SampleBuffer::new(vec![1, 2, 3, 4, 5, 6, 7, 8], 0, 1_000);
        buffer.truncate_front_to(3);
        assert_eq!(buffer.data(), &[6, 7, 8]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_truncate_front_respects_effective_length() {
        let mut buffer = SampleBuffer::new(vec![1, 2, 3, 4, 5, 6, 7, 8], 0, 1_000);
        buffer.set_len(6);
        buffer.truncate_front_to(4);
        // Trailing four bytes of the six effective ones.
        assert_eq!(buffer.data(), &[3, 4, 5, 6]);
    }

    #[test]
    fn test_set_len_clamps_to_payload() {
        let mut buffer = SampleBuffer::new(vec![0; 16], 0, 1_000);
        buffer.set_len(64);
        assert_eq!(buffer.len(), 16);
    }
}
