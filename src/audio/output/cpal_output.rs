// ABOUTME: cpal-based hardware output device
// ABOUTME: Worker thread owns the stream; audio bytes flow through a shared ring

use crate::audio::output::OutputDevice;
use crate::audio::{FormatDescriptor, FormatTag, SampleBuffer, TIME_UNITS_PER_SEC};
use crate::error::Error;
use crate::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use crossbeam::channel::{bounded, Sender};
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Fixed stream latency figure added to the ring fill level. Stands in
/// for the period size the backend negotiates with the hardware.
const STREAM_LATENCY_MICROS: i64 = 20_000;

enum DeviceCommand {
    Start,
    Pause,
    Stop,
    Shutdown,
}

struct SharedState {
    ring: Mutex<VecDeque<u8>>,
    rendered_frames: AtomicU64,
    last_error: Mutex<Option<String>>,
}

struct Worker {
    commands: Sender<DeviceCommand>,
    join: JoinHandle<()>,
}

/// Accelerated output device submitting audio to hardware via cpal.
///
/// `cpal::Stream` is not `Send`, so a dedicated worker thread owns the
/// stream and receives lifecycle commands over a channel. Rendered
/// bytes flow through a shared interleaved ring that the stream
/// callback drains. PCM at 16 or 24 bits and 32-bit float are
/// converted to the f32 the stream expects; encoded passthrough is
/// rejected at format check since this backend cannot negotiate a
/// bitstream with the hardware.
pub struct CpalOutput {
    format: Option<FormatDescriptor>,
    shared: Arc<SharedState>,
    worker: Option<Worker>,
    epoch: Instant,
}

impl CpalOutput {
    /// Create an output with no format negotiated yet.
    pub fn new() -> Self {
        Self {
            format: None,
            shared: Arc::new(SharedState {
                ring: Mutex::new(VecDeque::new()),
                rendered_frames: AtomicU64::new(0),
                last_error: Mutex::new(None),
            }),
            worker: None,
            epoch: Instant::now(),
        }
    }

    fn spawn_worker(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let format = self
            .format
            .clone()
            .ok_or_else(|| Error::DeviceFailure("no format negotiated".into()))?;
        let shared = Arc::clone(&self.shared);
        let (command_tx, command_rx) = bounded::<DeviceCommand>(8);
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);

        let join = std::thread::Builder::new()
            .name("syncrender-output".into())
            .spawn(move || {
                let stream = match build_stream(&format, &shared) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while let Ok(command) = command_rx.recv() {
                    let result = match command {
                        DeviceCommand::Start => stream.play().map_err(|e| e.to_string()),
                        DeviceCommand::Pause => stream.pause().map_err(|e| e.to_string()),
                        DeviceCommand::Stop => {
                            shared.ring.lock().clear();
                            stream.pause().map_err(|e| e.to_string())
                        }
                        DeviceCommand::Shutdown => break,
                    };
                    if let Err(e) = result {
                        warn!("output stream command failed: {}", e);
                        *shared.last_error.lock() = Some(e);
                    }
                }
            })
            .map_err(|e| Error::DeviceFailure(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!("output stream ready: {:?}", self.format);
                self.worker = Some(Worker {
                    commands: command_tx,
                    join,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = join.join();
                Err(Error::DeviceFailure(e))
            }
            Err(_) => {
                let _ = join.join();
                Err(Error::DeviceFailure("output worker exited".into()))
            }
        }
    }

    fn send(&self, command: DeviceCommand) -> Result<()> {
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| Error::DeviceFailure("output not connected".into()))?;
        worker
            .commands
            .send(command)
            .map_err(|_| Error::DeviceFailure("output worker exited".into()))
    }

    fn shutdown_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.commands.send(DeviceCommand::Shutdown);
            let _ = worker.join.join();
        }
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

fn supported(format: &FormatDescriptor) -> Result<()> {
    format.validate()?;
    match (format.tag, format.bits_per_sample) {
        (FormatTag::Pcm, 16) | (FormatTag::Pcm, 24) | (FormatTag::Float, 32) => Ok(()),
        (FormatTag::Spdif, _) => Err(Error::FormatRejected(
            "encoded passthrough is not supported by the cpal backend".into(),
        )),
        (tag, bits) => Err(Error::FormatRejected(format!(
            "unsupported wave format: {:?} at {} bits",
            tag, bits
        ))),
    }
}

fn build_stream(
    format: &FormatDescriptor,
    shared: &Arc<SharedState>,
) -> std::result::Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "no output device available".to_string())?;

    let config = StreamConfig {
        channels: format.channels,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size: BufferSize::Default,
    };

    let shared = Arc::clone(shared);
    let error_shared = Arc::clone(&shared);
    let bytes_per_sample = (format.bits_per_sample / 8) as usize;
    let channels = format.channels as usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut ring = shared.ring.lock();
                let mut frames = 0u64;
                for (i, out) in data.iter_mut().enumerate() {
                    if ring.len() < bytes_per_sample {
                        *out = 0.0;
                        continue;
                    }
                    let mut raw = [0u8; 4];
                    for byte in raw.iter_mut().take(bytes_per_sample) {
                        *byte = ring.pop_front().unwrap_or(0);
                    }
                    *out = match bytes_per_sample {
                        2 => i16::from_le_bytes([raw[0], raw[1]]) as f32 / 32_768.0,
                        3 => {
                            let val = (raw[0] as i32)
                                | ((raw[1] as i32) << 8)
                                | (((raw[2] as i8) as i32) << 16);
                            val as f32 / 8_388_608.0
                        }
                        4 => f32::from_le_bytes(raw),
                        _ => 0.0,
                    };
                    if i % channels == channels - 1 {
                        frames += 1;
                    }
                }
                shared.rendered_frames.fetch_add(frames, Ordering::Relaxed);
            },
            move |err| {
                warn!("audio stream error: {}", err);
                *error_shared.last_error.lock() = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| e.to_string())?;

    Ok(stream)
}

impl OutputDevice for CpalOutput {
    fn check_format(&self, format: &FormatDescriptor) -> Result<()> {
        supported(format)
    }

    fn set_format(&mut self, format: &FormatDescriptor) -> Result<()> {
        supported(format)?;
        // Format change invalidates a running stream; reconnect rebuilds it.
        self.shutdown_worker();
        self.shared.ring.lock().clear();
        self.format = Some(format.clone());
        Ok(())
    }

    fn complete_connect(&mut self) -> Result<()> {
        self.spawn_worker()
    }

    fn run(&mut self, _start: i64) -> Result<()> {
        self.spawn_worker()?;
        self.send(DeviceCommand::Start)
    }

    fn pause(&mut self) -> Result<()> {
        if self.worker.is_none() {
            return Ok(());
        }
        self.send(DeviceCommand::Pause)
    }

    fn stop(&mut self) -> Result<()> {
        if self.worker.is_none() {
            return Ok(());
        }
        self.send(DeviceCommand::Stop)
    }

    fn begin_flush(&mut self) {
        self.shared.ring.lock().clear();
    }

    fn end_flush(&mut self) {}

    fn render(&mut self, buffer: &SampleBuffer, _counter: u64) -> Result<()> {
        if self.format.is_none() {
            return Err(Error::DeviceFailure("render before format negotiation".into()));
        }
        if let Some(e) = self.shared.last_error.lock().take() {
            return Err(Error::DeviceFailure(e));
        }
        let mut ring = self.shared.ring.lock();
        ring.extend(buffer.data().iter().copied());
        Ok(())
    }

    fn latency_micros(&self) -> i64 {
        let queued = match &self.format {
            Some(format) => format.duration_of(self.shared.ring.lock().len()),
            None => 0,
        };
        queued + STREAM_LATENCY_MICROS
    }

    fn audio_clock(&self) -> Option<(u64, u64)> {
        let format = self.format.as_ref()?;
        let frames = self.shared.rendered_frames.load(Ordering::Relaxed);
        let device_ts = frames * TIME_UNITS_PER_SEC as u64 / format.sample_rate as u64;
        Some((device_ts, self.epoch.elapsed().as_micros() as u64))
    }
}
