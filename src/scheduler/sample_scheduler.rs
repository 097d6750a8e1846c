// ABOUTME: Per-buffer scheduling decision against the sync clock
// ABOUTME: Lateness math, discontinuity latch, drop/truncate policy, wake arming

use crate::audio::{FormatDescriptor, SampleBuffer, TimeStretch, TIME_UNITS_PER_SEC};
use crate::error::Error;
use crate::sync::{AdviseToken, RenderGate, SyncClock};
use crate::Result;
use log::{debug, trace, warn};

/// Largest tolerated gap between a buffer's declared start and the end
/// of its predecessor before the stream is treated as discontinuous
/// (post-seek or upstream drop): 1.0 ms.
const MAX_SAMPLE_TIME_ERROR: i64 = 1_000;

/// At or beyond this rate magnitude, per-sample scheduling is bypassed
/// entirely and frames are pushed through unthrottled.
const FAST_MODE_RATE: f64 = 2.0;

/// Up to this rate the normal wait/advise path runs; between this and
/// fast mode the buffer is rendered immediately and the time-stretch
/// stage absorbs the rate change. A tuning constant, not a derived
/// boundary.
const NORMAL_RATE_LIMIT: f64 = 1.1;

/// What the caller should do with a scheduled buffer.
#[derive(Debug)]
pub enum ScheduleDecision {
    /// Render the buffer now.
    Render,
    /// A wake is armed; block on the render gate for the token's delay,
    /// then render.
    Wait(AdviseToken),
    /// The buffer was zeroed and accepted; advance to the next one.
    Skip,
}

/// Collaborators and per-stream parameters for one scheduling decision.
pub struct ScheduleContext<'a> {
    /// Playback clock the decision is timed against
    pub clock: &'a SyncClock,
    /// Gate the render thread blocks on
    pub gate: &'a RenderGate,
    /// Time-stretch stage to flush on drop recovery, when enabled
    pub stretch: Option<&'a mut (dyn TimeStretch + 'static)>,
    /// Active format; block alignment and sample rate feed the math
    pub format: &'a FormatDescriptor,
    /// Stream start time on the playback clock, microseconds
    pub stream_start: i64,
    /// Output device latency, microseconds
    pub device_latency: i64,
    /// Current playback rate (1.0 nominal, negative reverse)
    pub rate: f64,
    /// Emit a per-buffer timing trace line
    pub log_timing: bool,
}

/// Sample scheduler: the drop/truncate/schedule decision engine.
///
/// Owns the scheduling cursor exclusively; one instance serves one
/// stream and is never shared. For every incoming buffer it computes
/// lateness against the sync clock plus device latency and decides to
/// play the buffer now, delay it behind a timed wake, truncate it, or
/// drop it entirely. `dropping` is a one-way latch per discontinuity,
/// cleared only when lateness falls back within one buffer duration.
#[derive(Debug, Default)]
pub struct SampleScheduler {
    sample_counter: u64,
    next_due_time: i64,
    prev_sample_time: i64,
    dropping: bool,
    /// A dropping -> false transition happened and its time-stretch
    /// flush cycle has not run yet; executed before the next wake is
    /// armed.
    flush_pending: bool,
}

impl SampleScheduler {
    /// Create a scheduler with a zeroed cursor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers processed since the last reset.
    pub fn sample_counter(&self) -> u64 {
        self.sample_counter
    }

    /// Expected start time of the next buffer; meaningful only once
    /// the counter is positive.
    pub fn next_due_time(&self) -> i64 {
        self.next_due_time
    }

    /// Declared start of the last buffer that proceeded to rendering.
    pub fn prev_sample_time(&self) -> i64 {
        self.prev_sample_time
    }

    /// Whether the drop latch is currently set.
    pub fn is_dropping(&self) -> bool {
        self.dropping
    }

    /// Zero the scheduling cursor (pause, end-flush). A wake armed
    /// before the reset becomes a no-op: the render path checks the
    /// counter after waking.
    pub fn reset(&mut self) {
        self.sample_counter = 0;
        self.next_due_time = 0;
        self.prev_sample_time = 0;
        self.dropping = false;
        self.flush_pending = false;
    }

    /// Decide what to do with one incoming buffer.
    ///
    /// May mutate the buffer's effective length (partial truncation or
    /// full drop). Ownership of the buffer stays with the caller; the
    /// decision tells it whether to render, wait then render, or move
    /// on.
    pub fn schedule(
        &mut self,
        buffer: &mut SampleBuffer,
        cx: ScheduleContext<'_>,
    ) -> Result<ScheduleDecision> {
        debug_assert!(cx.format.block_align > 0, "unvalidated format descriptor");

        // Fast mode: no per-sample scheduling at all.
        if cx.rate.abs() >= FAST_MODE_RATE {
            return Ok(ScheduleDecision::Render);
        }

        self.sample_counter += 1;

        let frames = cx.format.frames_in(buffer.len());
        if frames == 0 {
            // Rendered as a no-op; counts toward the counter, changes
            // no timing state.
            return Ok(ScheduleDecision::Render);
        }

        let sample_time = buffer.start_time();
        let now = match cx.clock.now() {
            Ok(clock_now) => clock_now - cx.stream_start + cx.device_latency,
            Err(Error::ClockUnavailable) => {
                // No clock to throttle against: treat every buffer as
                // immediately due rather than deadlocking.
                warn!("reference clock unavailable, rendering unthrottled");
                self.prev_sample_time = sample_time;
                return Ok(ScheduleDecision::Render);
            }
            Err(e) => return Err(e),
        };

        let duration = frames as i64 * TIME_UNITS_PER_SEC / cx.format.sample_rate as i64;
        let lateness = now - sample_time;

        // Keep A/V sync when data has been dropped upstream or the
        // source seeked: a start time that disagrees with the end of
        // the previous buffer by more than the tolerance latches the
        // drop state.
        let mut cleared_this_cycle = false;
        if (sample_time - self.next_due_time).abs() > MAX_SAMPLE_TIME_ERROR
            && self.sample_counter > 1
        {
            if !self.dropping {
                debug!(
                    "discontinuity detected: diff {:.3} ms, tolerance {:.3} ms",
                    (sample_time - self.next_due_time) as f64 / 1_000.0,
                    MAX_SAMPLE_TIME_ERROR as f64 / 1_000.0
                );
            }
            self.dropping = true;
        } else if lateness > duration {
            self.dropping = true;
        } else if self.dropping {
            // Caught back up: the live position has been reached.
            self.dropping = false;
            self.flush_pending = true;
            cleared_this_cycle = true;
            debug!("stream position caught up after drop");
        }

        self.next_due_time = sample_time + duration;

        if cx.log_timing {
            trace!(
                "now {:.3} ms sample {:.3}..{:.3} ms diff {:.3} ms size {}",
                now as f64 / 1_000.0,
                sample_time as f64 / 1_000.0,
                buffer.end_time() as f64 / 1_000.0,
                lateness as f64 / 1_000.0,
                buffer.len()
            );
        }

        if self.dropping && lateness > duration {
            // The whole timespan of the buffer is late.
            debug!(
                "dropping whole buffer: late {:.3} ms dur {:.3} ms",
                lateness as f64 / 1_000.0,
                duration as f64 / 1_000.0
            );
            buffer.set_len(0);
            // Release the render thread so the pipeline advances to
            // the next buffer without rendering this one.
            cx.gate.signal();
            return Ok(ScheduleDecision::Skip);
        } else if self.dropping && lateness > 0 {
            let keep = cx.format.block_align as i64
                * ((duration - lateness) * cx.format.sample_rate as i64 / TIME_UNITS_PER_SEC);
            let keep = keep.clamp(0, buffer.len() as i64) as usize;
            debug!("keeping trailing {} of {} bytes", keep, buffer.len());
            buffer.truncate_front_to(keep);
        }

        if self.sample_counter > 2 && cleared_this_cycle {
            // Recovery fast path: the previous advise cycle already
            // paces the render thread; release it and proceed.
            cx.gate.signal();
            self.prev_sample_time = sample_time;
            return Ok(ScheduleDecision::Render);
        }

        if cx.rate <= NORMAL_RATE_LIMIT {
            if self.dropping || self.flush_pending {
                // Discard stale buffered audio before the stream turns
                // continuous again.
                if let Some(stretch) = cx.stretch {
                    stretch.begin_flush();
                    stretch.clear();
                    stretch.end_flush();
                }
                self.dropping = false;
                self.flush_pending = false;
            }
            cx.gate.reset();
            let token = cx.clock.advise_time(cx.stream_start, sample_time)?;
            self.prev_sample_time = sample_time;
            return Ok(ScheduleDecision::Wait(token));
        }

        // Accelerated but below fast mode: render immediately, the
        // time-stretch stage absorbs the rate change.
        self.prev_sample_time = sample_time;
        Ok(ScheduleDecision::Render)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ManualClock;
    use std::sync::Arc;

    struct Rig {
        manual: ManualClock,
        clock: SyncClock,
        gate: RenderGate,
        format: FormatDescriptor,
    }

    impl Rig {
        fn new() -> Self {
            let manual = ManualClock::new();
            let clock = SyncClock::new(Arc::new(manual.clone()));
            Self {
                manual,
                clock,
                gate: RenderGate::new(),
                format: FormatDescriptor::pcm(2, 48_000, 16),
            }
        }

        fn cx(&mut self) -> ScheduleContext<'_> {
            ScheduleContext {
                clock: &self.clock,
                gate: &self.gate,
                stretch: None,
                format: &self.format,
                stream_start: 0,
                device_latency: 0,
                rate: 1.0,
                log_timing: false,
            }
        }

        /// 20ms stereo 16-bit buffer starting at `start`.
        fn buffer(&self, start: i64) -> SampleBuffer {
            SampleBuffer::new(vec![0u8; 960 * 4], start, start + 20_000)
        }
    }

    #[test]
    fn test_fast_mode_skips_counter_and_length() {
        let mut rig = Rig::new();
        let mut scheduler = SampleScheduler::new();
        let mut buffer = rig.buffer(0);
        let mut cx = rig.cx();
        cx.rate = 2.0;
        let decision = scheduler.schedule(&mut buffer, cx).unwrap();
        assert!(matches!(decision, ScheduleDecision::Render));
        assert_eq!(scheduler.sample_counter(), 0);
        assert_eq!(buffer.len(), 960 * 4);
    }

    #[test]
    fn test_zero_frame_buffer_is_noop() {
        let mut rig = Rig::new();
        let mut scheduler = SampleScheduler::new();
        let mut buffer = SampleBuffer::new(Vec::new(), 0, 0);
        let decision = scheduler.schedule(&mut buffer, rig.cx()).unwrap();
        assert!(matches!(decision, ScheduleDecision::Render));
        assert_eq!(scheduler.sample_counter(), 1);
        assert_eq!(scheduler.next_due_time(), 0);
    }

    #[test]
    fn test_on_time_buffer_waits() {
        let mut rig = Rig::new();
        let mut scheduler = SampleScheduler::new();
        let mut buffer = rig.buffer(0);
        let decision = scheduler.schedule(&mut buffer, rig.cx()).unwrap();
        match decision {
            ScheduleDecision::Wait(token) => token.complete(),
            other => panic!("expected Wait, got {:?}", other),
        }
        assert!(!scheduler.is_dropping());
        assert_eq!(scheduler.next_due_time(), 20_000);
    }

    #[test]
    fn test_clock_unavailable_renders_unthrottled() {
        let mut rig = Rig::new();
        rig.manual.set_unavailable(true);
        let mut scheduler = SampleScheduler::new();
        let mut buffer = rig.buffer(0);
        let decision = scheduler.schedule(&mut buffer, rig.cx()).unwrap();
        assert!(matches!(decision, ScheduleDecision::Render));
        assert_eq!(buffer.len(), 960 * 4);
    }

    #[test]
    fn test_accelerated_rate_renders_immediately() {
        let mut rig = Rig::new();
        let mut scheduler = SampleScheduler::new();
        let mut buffer = rig.buffer(0);
        let mut cx = rig.cx();
        cx.rate = 1.5;
        let decision = scheduler.schedule(&mut buffer, cx).unwrap();
        assert!(matches!(decision, ScheduleDecision::Render));
        assert_eq!(scheduler.sample_counter(), 1);
    }

    #[test]
    fn test_whole_buffer_late_is_zeroed_and_skipped() {
        let mut rig = Rig::new();
        let mut scheduler = SampleScheduler::new();
        // First buffer on time.
        let mut first = rig.buffer(0);
        match scheduler.schedule(&mut first, rig.cx()).unwrap() {
            ScheduleDecision::Wait(token) => token.complete(),
            other => panic!("expected Wait, got {:?}", other),
        }
        // Second buffer arrives 50ms after its whole window elapsed.
        rig.manual.set(90_000);
        let mut second = rig.buffer(20_000);
        let decision = scheduler.schedule(&mut second, rig.cx()).unwrap();
        assert!(matches!(decision, ScheduleDecision::Skip));
        assert!(scheduler.is_dropping());
        assert_eq!(second.len(), 0);
    }
}
