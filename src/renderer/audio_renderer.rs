// ABOUTME: Audio renderer facade: lifecycle, format negotiation, A/V-sync surface
// ABOUTME: Serializes delivery and render dispatch under interface/render locks

use crate::audio::output::create_device;
use crate::audio::{FormatDescriptor, FormatTag, OutputDevice, SampleBuffer, TempoBuffer, TimeStretch};
use crate::error::Error;
use crate::scheduler::{SampleScheduler, ScheduleContext, ScheduleDecision};
use crate::sync::{MonotonicClock, RenderGate, SyncClock};
use crate::Result;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;
use typed_builder::TypedBuilder;

/// Immutable renderer configuration, fixed at construction.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RendererConfig {
    /// Run audio through the time-stretch stage; also enables the
    /// external A/V-sync clock surface
    #[builder(default = true)]
    pub use_time_stretching: bool,
    /// Select the accelerated hardware output backend
    #[builder(default = false)]
    pub use_accelerated_output: bool,
    /// Negotiate the synthetic encoded-passthrough format with the device
    #[builder(default = false)]
    pub enable_encoded_passthrough: bool,
    /// Emit a trace line for every scheduled buffer
    #[builder(default = false)]
    pub log_sample_timing: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Renderer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    /// Not playing; no stream position
    Stopped,
    /// Holding position, device paused
    Paused,
    /// Playing
    Running,
}

/// Outcome of delivering one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// The buffer reached the output device path
    Rendered,
    /// The buffer was accepted but nothing was rendered (fully late)
    Dropped,
    /// Zero-frame buffer, or a wake cancelled by a state transition
    NoOp,
}

struct RenderCore {
    config: RendererConfig,
    clock: SyncClock,
    scheduler: SampleScheduler,
    format: Option<FormatDescriptor>,
    device: Box<dyn OutputDevice>,
    stretch: Option<Box<dyn TimeStretch>>,
    rate: f64,
    adjustment: f64,
    bias: f64,
    state: RenderState,
    stream_start: i64,
    first_sample_pending: bool,
    flushing: bool,
}

impl RenderCore {
    fn device_format(&self, input: &FormatDescriptor) -> FormatDescriptor {
        if self.config.enable_encoded_passthrough {
            FormatDescriptor::passthrough_for(input.channels, input.sample_rate)
        } else {
            input.clone()
        }
    }
}

/// The audio renderer.
///
/// Two logical threads interact with it: the pipeline delivery thread
/// ([`receive`](Self::receive), format and lifecycle calls) and the
/// external A/V-sync authority ([`adjust_clock`](Self::adjust_clock),
/// [`set_bias`](Self::set_bias)). One scheduling decision and one
/// render dispatch are in flight at a time: both run under the
/// interface lock, and state transitions additionally take the coarser
/// render lock. Lock order is interface first, render second, in every
/// path including shutdown.
pub struct AudioRenderer {
    core: Mutex<RenderCore>,
    render_lock: Mutex<()>,
    gate: RenderGate,
}

impl AudioRenderer {
    /// Create a renderer with the backend selected by `config` and a
    /// monotonic system reference clock.
    pub fn new(config: RendererConfig) -> Self {
        let device = create_device(config.use_accelerated_output);
        let clock = SyncClock::new(Arc::new(MonotonicClock::new()));
        Self::with_parts(config, clock, device, None)
    }

    /// Create a renderer from explicit collaborators. When `stretch` is
    /// `None` and time-stretching is enabled, the pass-through
    /// [`TempoBuffer`] is used.
    pub fn with_parts(
        config: RendererConfig,
        clock: SyncClock,
        device: Box<dyn OutputDevice>,
        stretch: Option<Box<dyn TimeStretch>>,
    ) -> Self {
        let stretch = if config.use_time_stretching {
            stretch.or_else(|| Some(Box::new(TempoBuffer::new()) as Box<dyn TimeStretch>))
        } else {
            None
        };
        Self {
            core: Mutex::new(RenderCore {
                config,
                clock,
                scheduler: SampleScheduler::new(),
                format: None,
                device,
                stretch,
                rate: 1.0,
                adjustment: 1.0,
                bias: 1.0,
                state: RenderState::Stopped,
                stream_start: 0,
                first_sample_pending: true,
                flushing: false,
            }),
            render_lock: Mutex::new(()),
            gate: RenderGate::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RenderState {
        self.core.lock().state
    }

    // -- Format negotiation --

    /// Check whether `candidate` can be accepted.
    ///
    /// Only raw wave formats qualify. With time-stretching enabled the
    /// stretch stage must also accept the format; with encoded
    /// passthrough enabled the device is checked against the synthetic
    /// passthrough format rather than the raw input.
    pub fn check_format(&self, candidate: &FormatDescriptor) -> Result<()> {
        let core = self.core.lock();
        Self::check_format_locked(&core, candidate)
    }

    fn check_format_locked(core: &RenderCore, candidate: &FormatDescriptor) -> Result<()> {
        candidate.validate()?;
        if candidate.tag == FormatTag::Spdif {
            return Err(Error::FormatRejected(
                "input must be a raw wave format".into(),
            ));
        }
        if let Some(stretch) = &core.stretch {
            stretch.check_format(candidate)?;
        }
        core.device.check_format(&core.device_format(candidate))
    }

    /// Accept `candidate` as the active format, propagating it to the
    /// device and the stretch stage and resetting the stage's derived
    /// tempo parameters to neutral. Any active bias/adjustment must be
    /// re-applied by the sync authority afterwards. On failure the
    /// previous format stays intact.
    pub fn set_media_type(&self, candidate: &FormatDescriptor) -> Result<()> {
        let mut core = self.core.lock();
        Self::check_format_locked(&core, candidate)?;

        let device_format = core.device_format(candidate);
        core.device.set_format(&device_format)?;

        if let Some(stretch) = &mut core.stretch {
            stretch.set_format(candidate)?;
            stretch.set_sample_rate(candidate.sample_rate);
            stretch.set_tempo_change(0.0);
            stretch.set_pitch_shift(0.0);
        }

        debug!("media type set: {:?}", candidate);
        core.format = Some(candidate.clone());
        Ok(())
    }

    /// Active format, if negotiated.
    pub fn format(&self) -> Option<FormatDescriptor> {
        self.core.lock().format.clone()
    }

    /// Finalize the connection to the host pipeline.
    pub fn complete_connect(&self) -> Result<()> {
        let mut core = self.core.lock();
        core.device.complete_connect()
    }

    // -- Lifecycle --

    /// Start or resume playback with `start` as the stream start time
    /// on the playback clock. No-op when already running.
    pub fn run(&self, start: i64) -> Result<()> {
        let mut core = self.core.lock();
        if core.state == RenderState::Running {
            return Ok(());
        }
        debug!("run: stream start {} us", start);
        core.device.run(start)?;
        core.stream_start = start;
        core.first_sample_pending = true;
        if core.rate >= 1.0 {
            let tempo_change = (core.rate - 1.0) * 100.0;
            if let Some(stretch) = &mut core.stretch {
                stretch.set_tempo_change(tempo_change);
            }
        }
        core.state = RenderState::Running;
        Ok(())
    }

    /// Pause playback. Forces a flush boundary through the stretch
    /// stage when running, pauses the device, and always zeroes the
    /// scheduling cursor.
    pub fn pause(&self) -> Result<()> {
        let mut core = self.core.lock();
        let _render = self.render_lock.lock();
        debug!("pause");
        if core.state == RenderState::Running {
            if let Some(stretch) = &mut core.stretch {
                let _ = stretch.next_sample(true);
                stretch.begin_flush();
                stretch.end_flush();
            }
        }
        core.device.pause()?;
        core.scheduler.reset();
        core.state = RenderState::Paused;
        // Release a render thread parked on an armed wake; the cursor
        // reset turns the late wake into a no-op.
        self.gate.signal();
        Ok(())
    }

    /// Stop playback.
    pub fn stop(&self) -> Result<()> {
        let mut core = self.core.lock();
        let _render = self.render_lock.lock();
        debug!("stop");
        core.device.stop()?;
        core.scheduler.reset();
        core.state = RenderState::Stopped;
        self.gate.signal();
        Ok(())
    }

    /// Start a flush: discard queued audio in the device and the
    /// stretch stage.
    pub fn begin_flush(&self) {
        let mut core = self.core.lock();
        let _render = self.render_lock.lock();
        debug!("begin flush");
        core.flushing = true;
        core.device.begin_flush();
        if let Some(stretch) = &mut core.stretch {
            stretch.begin_flush();
            stretch.clear();
        }
        // Release a parked delivery thread; the flushing flag makes its
        // buffer a no-op so nothing rendered mid-flush survives.
        self.gate.signal();
    }

    /// Complete a flush: propagate end-flush and zero the scheduling
    /// cursor.
    pub fn end_flush(&self) {
        let mut core = self.core.lock();
        let _render = self.render_lock.lock();
        debug!("end flush");
        core.flushing = false;
        core.scheduler.reset();
        if let Some(stretch) = &mut core.stretch {
            stretch.end_flush();
        }
        core.device.end_flush();
    }

    /// End of stream reached upstream.
    ///
    /// Deliberately does not stop playback: the source signals end of
    /// stream as soon as the file ends, while queued audio still needs
    /// to drain. Stopping here would eat the tail of the stream.
    pub fn end_of_stream(&self) {
        debug!("end of stream: draining, not stopping");
    }

    /// Set the playback rate (1.0 nominal, negative reverse, magnitude
    /// at or above 2.0 enters fast mode).
    pub fn set_rate(&self, rate: f64) {
        let mut core = self.core.lock();
        core.rate = rate;
        if core.state == RenderState::Running && rate >= 1.0 {
            let tempo_change = (rate - 1.0) * 100.0;
            if let Some(stretch) = &mut core.stretch {
                stretch.set_tempo_change(tempo_change);
            }
        }
    }

    /// Current playback rate.
    pub fn rate(&self) -> f64 {
        self.core.lock().rate
    }

    // -- Buffer delivery --

    /// Deliver one timestamped buffer for scheduling and rendering.
    ///
    /// Blocks on the render gate when the buffer is scheduled for a
    /// future due time. A pause, stop or flush during the wait cancels
    /// the wake: the cursor reset is detected after waking and the
    /// buffer is abandoned as a no-op.
    pub fn receive(&self, mut buffer: SampleBuffer) -> Result<ReceiveStatus> {
        let mut core = self.core.lock();
        if core.state == RenderState::Stopped {
            return Err(Error::DeviceFailure("renderer is stopped".into()));
        }
        if core.format.is_none() {
            return Err(Error::FormatRejected("no media type negotiated".into()));
        }
        if core.first_sample_pending {
            core.first_sample_pending = false;
            core.device.on_first_sample();
        }

        let decision = {
            let RenderCore {
                config,
                clock,
                scheduler,
                format,
                device,
                stretch,
                rate,
                stream_start,
                ..
            } = &mut *core;
            let format = format.as_ref().expect("format checked above");
            scheduler.schedule(
                &mut buffer,
                ScheduleContext {
                    clock,
                    gate: &self.gate,
                    stretch: stretch.as_deref_mut(),
                    format,
                    stream_start: *stream_start,
                    device_latency: device.latency_micros(),
                    rate: *rate,
                    log_timing: config.log_sample_timing,
                },
            )?
        };

        match decision {
            ScheduleDecision::Skip => Ok(ReceiveStatus::Dropped),
            ScheduleDecision::Render => self.render_locked(&mut core, buffer),
            ScheduleDecision::Wait(token) => {
                let counter = core.scheduler.sample_counter();
                drop(core);

                self.gate.wait_for(token.delay());
                token.complete();

                let mut core = self.core.lock();
                if core.flushing || core.scheduler.sample_counter() < counter {
                    // A flush started or the cursor was reset while we
                    // slept; this wake is stale and the buffer is abandoned.
                    return Ok(ReceiveStatus::NoOp);
                }
                self.render_locked(&mut core, buffer)
            }
        }
    }

    /// Forward a buffer to the output device path under the render
    /// lock, running it through the time-stretch stage when enabled.
    fn render_locked(
        &self,
        core: &mut RenderCore,
        buffer: SampleBuffer,
    ) -> Result<ReceiveStatus> {
        let _render = self.render_lock.lock();
        if buffer.is_empty() {
            return Ok(ReceiveStatus::NoOp);
        }
        let counter = core.scheduler.sample_counter();
        if let Some(stretch) = &mut core.stretch {
            stretch.push(buffer);
            while let Some(processed) = stretch.next_sample(false) {
                core.device.render(&processed, counter)?;
            }
        } else {
            core.device.render(&buffer, counter)?;
        }
        Ok(ReceiveStatus::Rendered)
    }

    // -- External A/V-sync surface --

    /// Apply a sync-driven rate multiplier to the playback clock and
    /// the stretch tempo. Returns false (unsupported) when
    /// time-stretching is configured off; the sync clock is left
    /// untouched in that case.
    pub fn adjust_clock(&self, adjustment: f64) -> bool {
        let mut core = self.core.lock();
        if !core.config.use_time_stretching {
            return false;
        }
        core.adjustment = adjustment;
        core.clock.set_adjustment(adjustment);
        let tempo = core.adjustment * core.bias;
        if let Some(stretch) = &mut core.stretch {
            stretch.set_tempo(tempo);
        }
        true
    }

    /// Apply a sync-driven bias to the playback clock and the stretch
    /// tempo. Returns false (unsupported) when time-stretching is
    /// configured off.
    pub fn set_bias(&self, bias: f64) -> bool {
        let mut core = self.core.lock();
        if !core.config.use_time_stretching {
            debug!("set_bias {:.10}: rejected, time-stretching disabled", bias);
            return false;
        }
        debug!("set_bias {:.10}", bias);
        core.bias = bias;
        core.clock.set_bias(bias);
        let tempo = core.adjustment * core.bias;
        if let Some(stretch) = &mut core.stretch {
            stretch.set_tempo(tempo);
        }
        true
    }

    /// Current clock bias.
    pub fn bias(&self) -> f64 {
        self.core.lock().clock.bias()
    }

    /// `(device timestamp, capture instant)` pair for external drift
    /// measurement, when the device exposes a position clock.
    pub fn audio_clock(&self) -> Option<(u64, u64)> {
        self.core.lock().device.audio_clock()
    }

    /// Stop the device and release resources. Takes both locks so no
    /// in-flight render call can observe torn-down state. Called from
    /// `Drop`; explicit calls surface device errors.
    pub fn shutdown(&self) -> Result<()> {
        let mut core = self.core.lock();
        let _render = self.render_lock.lock();
        self.gate.signal();
        core.device.stop()
    }
}

impl Drop for AudioRenderer {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
