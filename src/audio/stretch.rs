// ABOUTME: Time-stretch stage boundary and pass-through implementation
// ABOUTME: Tempo/pitch parameters with FIFO buffering; DSP lives elsewhere

use crate::audio::{FormatDescriptor, FormatTag, SampleBuffer};
use crate::error::Error;
use crate::Result;
use log::debug;
use std::collections::VecDeque;

/// Time-stretch/pitch-correction stage consumed by the renderer.
///
/// The renderer pushes raw audio in, adjusts tempo/pitch parameters as
/// the playback rate and sync corrections change, and pulls processed
/// buffers back out for the device. The DSP algorithm behind the
/// parameters is a collaborator concern; the scheduling core only
/// needs the buffering and flush semantics specified here.
pub trait TimeStretch: Send {
    /// Check whether the stage can process `format`.
    fn check_format(&self, format: &FormatDescriptor) -> Result<()>;

    /// Replace the active format. Resets internal processing state.
    fn set_format(&mut self, format: &FormatDescriptor) -> Result<()>;

    /// Set the working sample rate.
    fn set_sample_rate(&mut self, sample_rate: u32);

    /// Rate-derived tempo change in percent (0 = nominal speed).
    fn set_tempo_change(&mut self, percent: f64);

    /// Pitch shift in semitones (0 = unshifted).
    fn set_pitch_shift(&mut self, semitones: f64);

    /// Sync-driven tempo multiplier (adjustment x bias).
    fn set_tempo(&mut self, tempo: f64);

    /// Start discarding: stop handing out queued audio.
    fn begin_flush(&mut self);

    /// Drop all buffered audio.
    fn clear(&mut self);

    /// Flush boundary complete; resume normal operation.
    fn end_flush(&mut self);

    /// Feed one raw buffer into the stage.
    fn push(&mut self, buffer: SampleBuffer);

    /// Pull the next processed buffer. With `drain` set, hand out
    /// whatever is buffered even if a full processing window has not
    /// accumulated (used to force a flush boundary on pause).
    fn next_sample(&mut self, drain: bool) -> Option<SampleBuffer>;
}

/// Pass-through time-stretch stage.
///
/// Buffers audio FIFO and tracks tempo/pitch parameters without
/// resampling; hosts wanting audible time-stretching substitute their
/// own [`TimeStretch`] implementation at construction. Rejects encoded
/// passthrough formats, which cannot be stretched.
pub struct TempoBuffer {
    queue: VecDeque<SampleBuffer>,
    format: Option<FormatDescriptor>,
    sample_rate: u32,
    tempo: f64,
    tempo_change_percent: f64,
    pitch_semitones: f64,
    flushing: bool,
}

impl TempoBuffer {
    /// Create an empty stage at neutral tempo.
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            format: None,
            sample_rate: 0,
            tempo: 1.0,
            tempo_change_percent: 0.0,
            pitch_semitones: 0.0,
            flushing: false,
        }
    }

    /// Current sync-driven tempo multiplier.
    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Current rate-derived tempo change in percent.
    pub fn tempo_change_percent(&self) -> f64 {
        self.tempo_change_percent
    }

    /// Current pitch shift in semitones.
    pub fn pitch_shift(&self) -> f64 {
        self.pitch_semitones
    }

    /// Number of buffers waiting in the stage.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

impl Default for TempoBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeStretch for TempoBuffer {
    fn check_format(&self, format: &FormatDescriptor) -> Result<()> {
        format.validate()?;
        if format.tag == FormatTag::Spdif {
            return Err(Error::FormatRejected(
                "encoded bitstream cannot be time-stretched".into(),
            ));
        }
        Ok(())
    }

    fn set_format(&mut self, format: &FormatDescriptor) -> Result<()> {
        self.check_format(format)?;
        self.format = Some(format.clone());
        self.sample_rate = format.sample_rate;
        self.queue.clear();
        Ok(())
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    fn set_tempo_change(&mut self, percent: f64) {
        self.tempo_change_percent = percent;
    }

    fn set_pitch_shift(&mut self, semitones: f64) {
        self.pitch_semitones = semitones;
    }

    fn set_tempo(&mut self, tempo: f64) {
        debug!("time-stretch tempo set to {:.6}", tempo);
        self.tempo = tempo;
    }

    fn begin_flush(&mut self) {
        self.flushing = true;
    }

    fn clear(&mut self) {
        self.queue.clear();
    }

    fn end_flush(&mut self) {
        self.flushing = false;
    }

    fn push(&mut self, buffer: SampleBuffer) {
        self.queue.push_back(buffer);
    }

    fn next_sample(&mut self, _drain: bool) -> Option<SampleBuffer> {
        if self.flushing {
            return None;
        }
        self.queue.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm() -> FormatDescriptor {
        FormatDescriptor::pcm(2, 48_000, 16)
    }

    #[test]
    fn test_fifo_order() {
        let mut stage = TempoBuffer::new();
        stage.set_format(&pcm()).unwrap();
        stage.push(SampleBuffer::new(vec![1; 4], 0, 1_000));
        stage.push(SampleBuffer::new(vec![2; 4], 1_000, 2_000));
        assert_eq!(stage.next_sample(false).unwrap().start_time(), 0);
        assert_eq!(stage.next_sample(false).unwrap().start_time(), 1_000);
        assert!(stage.next_sample(false).is_none());
    }

    #[test]
    fn test_flush_cycle_discards_and_resumes() {
        let mut stage = TempoBuffer::new();
        stage.set_format(&pcm()).unwrap();
        stage.push(SampleBuffer::new(vec![1; 4], 0, 1_000));
        stage.begin_flush();
        // Nothing is handed out mid-flush.
        assert!(stage.next_sample(true).is_none());
        stage.clear();
        stage.end_flush();
        assert_eq!(stage.queued(), 0);
        stage.push(SampleBuffer::new(vec![2; 4], 2_000, 3_000));
        assert_eq!(stage.next_sample(false).unwrap().start_time(), 2_000);
    }

    #[test]
    fn test_rejects_spdif() {
        let stage = TempoBuffer::new();
        let spdif = FormatDescriptor::passthrough_for(6, 48_000);
        assert!(matches!(
            stage.check_format(&spdif),
            Err(Error::FormatRejected(_))
        ));
    }

    #[test]
    fn test_parameters_tracked() {
        let mut stage = TempoBuffer::new();
        stage.set_tempo(1.02);
        stage.set_tempo_change(10.0);
        stage.set_pitch_shift(-1.0);
        assert_eq!(stage.tempo(), 1.02);
        assert_eq!(stage.tempo_change_percent(), 10.0);
        assert_eq!(stage.pitch_shift(), -1.0);
    }
}
