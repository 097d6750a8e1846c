use syncrender::audio::{
    ChannelOutput, FormatDescriptor, FormatTag, OutputDevice, SampleBuffer,
};
use syncrender::error::Error;
use syncrender::sync::{ManualClock, SyncClock};
use syncrender::{AudioRenderer, ReceiveStatus, RenderState, RendererConfig, Result};
use parking_lot::Mutex;
use std::sync::Arc;

const BUFFER_BYTES: usize = 960 * 4; // 20ms of 48kHz stereo 16-bit
const BUFFER_MICROS: i64 = 20_000;

fn pcm() -> FormatDescriptor {
    FormatDescriptor::pcm(2, 48_000, 16)
}

fn buffer(start: i64) -> SampleBuffer {
    SampleBuffer::new(vec![0u8; BUFFER_BYTES], start, start + BUFFER_MICROS)
}

/// Renderer over a ChannelOutput with a manually stepped clock, so due
/// times can be reached without real sleeping.
fn renderer_rig(
    config: RendererConfig,
) -> (
    AudioRenderer,
    ManualClock,
    Arc<crossbeam::queue::SegQueue<syncrender::audio::RenderedBuffer>>,
) {
    let manual = ManualClock::new();
    let clock = SyncClock::new(Arc::new(manual.clone()));
    let device = ChannelOutput::new();
    let queue = device.queue();
    let renderer = AudioRenderer::with_parts(config, clock, Box::new(device), None);
    (renderer, manual, queue)
}

fn started_rig() -> (
    AudioRenderer,
    ManualClock,
    Arc<crossbeam::queue::SegQueue<syncrender::audio::RenderedBuffer>>,
) {
    let (renderer, manual, queue) = renderer_rig(RendererConfig::default());
    renderer.set_media_type(&pcm()).unwrap();
    renderer.complete_connect().unwrap();
    renderer.run(0).unwrap();
    (renderer, manual, queue)
}

#[test]
fn test_lifecycle_transitions() {
    let (renderer, _manual, _queue) = renderer_rig(RendererConfig::default());
    assert_eq!(renderer.state(), RenderState::Stopped);
    renderer.set_media_type(&pcm()).unwrap();
    renderer.run(0).unwrap();
    assert_eq!(renderer.state(), RenderState::Running);
    // Run while running is a no-op.
    renderer.run(5_000).unwrap();
    assert_eq!(renderer.state(), RenderState::Running);
    renderer.pause().unwrap();
    assert_eq!(renderer.state(), RenderState::Paused);
    renderer.run(0).unwrap();
    assert_eq!(renderer.state(), RenderState::Running);
    renderer.stop().unwrap();
    assert_eq!(renderer.state(), RenderState::Stopped);
}

#[test]
fn test_receive_requires_running_and_format() {
    let (renderer, _manual, _queue) = renderer_rig(RendererConfig::default());
    assert!(matches!(
        renderer.receive(buffer(0)),
        Err(Error::DeviceFailure(_))
    ));
    renderer.set_media_type(&pcm()).unwrap();
    renderer.run(0).unwrap();
    assert!(renderer.receive(buffer(0)).is_ok());
}

#[test]
fn test_contiguous_stream_renders_with_counter() {
    let (renderer, manual, queue) = started_rig();
    for n in 0..5 {
        let start = n * BUFFER_MICROS;
        manual.set(start);
        let status = renderer.receive(buffer(start)).unwrap();
        assert_eq!(status, ReceiveStatus::Rendered);
    }
    for expected in 1..=5u64 {
        let rendered = queue.pop().expect("buffer rendered");
        assert_eq!(rendered.counter, expected);
        assert_eq!(rendered.data.len(), BUFFER_BYTES);
    }
    assert!(queue.pop().is_none());
}

#[test]
fn test_fully_late_buffer_reports_dropped() {
    let (renderer, manual, queue) = started_rig();
    manual.set(0);
    assert_eq!(renderer.receive(buffer(0)).unwrap(), ReceiveStatus::Rendered);
    manual.set(90_000);
    let status = renderer.receive(buffer(BUFFER_MICROS)).unwrap();
    assert_eq!(status, ReceiveStatus::Dropped);
    // Only the first buffer reached the device.
    assert_eq!(queue.pop().unwrap().counter, 1);
    assert!(queue.pop().is_none());
}

#[test]
fn test_pause_resets_counter_even_while_dropping() {
    let (renderer, manual, queue) = started_rig();
    manual.set(0);
    renderer.receive(buffer(0)).unwrap();
    // Latch the drop state with a fully late buffer.
    manual.set(90_000);
    assert_eq!(
        renderer.receive(buffer(BUFFER_MICROS)).unwrap(),
        ReceiveStatus::Dropped
    );

    renderer.pause().unwrap();
    renderer.run(0).unwrap();
    while queue.pop().is_some() {}

    // After the reset this is buffer 1 of a fresh cursor: on time,
    // untruncated, counter restarted.
    manual.set(100_000);
    let status = renderer.receive(buffer(100_000)).unwrap();
    assert_eq!(status, ReceiveStatus::Rendered);
    let rendered = queue.pop().unwrap();
    assert_eq!(rendered.counter, 1);
    assert_eq!(rendered.data.len(), BUFFER_BYTES);
}

#[test]
fn test_end_of_stream_does_not_stop() {
    let (renderer, manual, _queue) = started_rig();
    manual.set(0);
    renderer.receive(buffer(0)).unwrap();
    renderer.end_of_stream();
    assert_eq!(renderer.state(), RenderState::Running);
    // Buffers still flow after end of stream: queued audio must drain.
    manual.set(BUFFER_MICROS);
    assert_eq!(
        renderer.receive(buffer(BUFFER_MICROS)).unwrap(),
        ReceiveStatus::Rendered
    );
}

#[test]
fn test_flush_resets_cursor() {
    let (renderer, manual, queue) = started_rig();
    manual.set(0);
    renderer.receive(buffer(0)).unwrap();
    renderer.begin_flush();
    renderer.end_flush();
    while queue.pop().is_some() {}

    manual.set(500_000);
    // A fresh cursor accepts an arbitrary start without latching.
    let status = renderer.receive(buffer(500_000)).unwrap();
    assert_eq!(status, ReceiveStatus::Rendered);
    assert_eq!(queue.pop().unwrap().counter, 1);
}

#[test]
fn test_flush_during_wait_abandons_inflight_buffer() {
    let (renderer, manual, queue) = started_rig();
    manual.set(0);
    renderer.receive(buffer(0)).unwrap();
    while queue.pop().is_some() {}

    // Deliver a buffer due 300ms out; the delivery thread parks on the
    // gate until the flush releases it.
    let renderer = Arc::new(renderer);
    let delivery = Arc::clone(&renderer);
    let handle = std::thread::spawn(move || delivery.receive(buffer(300_000)).unwrap());

    std::thread::sleep(std::time::Duration::from_millis(50));
    renderer.begin_flush();
    std::thread::sleep(std::time::Duration::from_millis(50));
    renderer.end_flush();

    // The in-flight buffer must not survive the flush boundary.
    let status = handle.join().unwrap();
    assert_eq!(status, ReceiveStatus::NoOp);
    assert!(queue.pop().is_none());
}

#[test]
fn test_zero_frame_buffer_is_noop() {
    let (renderer, manual, queue) = started_rig();
    manual.set(0);
    let status = renderer
        .receive(SampleBuffer::new(Vec::new(), 0, 0))
        .unwrap();
    assert_eq!(status, ReceiveStatus::NoOp);
    assert!(queue.pop().is_none());
}

#[test]
fn test_fast_mode_passes_through_unthrottled() {
    let (renderer, manual, queue) = started_rig();
    renderer.set_rate(2.5);
    // Due times far in the future, but fast mode never waits.
    manual.set(0);
    for n in 0..3 {
        let status = renderer.receive(buffer(1_000_000 + n * BUFFER_MICROS)).unwrap();
        assert_eq!(status, ReceiveStatus::Rendered);
    }
    let mut seen = 0;
    while let Some(rendered) = queue.pop() {
        assert_eq!(rendered.data.len(), BUFFER_BYTES);
        seen += 1;
    }
    assert_eq!(seen, 3);
}

#[test]
fn test_sync_surface_unsupported_without_time_stretching() {
    let config = RendererConfig::builder().use_time_stretching(false).build();
    let (renderer, _manual, _queue) = renderer_rig(config);
    renderer.set_media_type(&pcm()).unwrap();
    assert!(!renderer.adjust_clock(1.01));
    assert!(!renderer.set_bias(0.99));
    // The sync clock was never touched.
    assert_eq!(renderer.bias(), 1.0);
}

#[test]
fn test_sync_surface_applies_with_time_stretching() {
    let (renderer, _manual, _queue) = renderer_rig(RendererConfig::default());
    renderer.set_media_type(&pcm()).unwrap();
    assert!(renderer.adjust_clock(1.02));
    assert!(renderer.set_bias(0.98));
    assert_eq!(renderer.bias(), 0.98);
}

#[test]
fn test_audio_clock_reports_rendered_position() {
    let (renderer, manual, _queue) = started_rig();
    manual.set(0);
    renderer.receive(buffer(0)).unwrap();
    let (device_ts, _capture) = renderer.audio_clock().expect("position clock");
    assert_eq!(device_ts, BUFFER_MICROS as u64);
}

/// Device spy recording the formats it is asked to adopt.
struct FormatSpy {
    formats: Arc<Mutex<Vec<FormatDescriptor>>>,
    fail_render: bool,
}

impl OutputDevice for FormatSpy {
    fn check_format(&self, format: &FormatDescriptor) -> Result<()> {
        format.validate()
    }
    fn set_format(&mut self, format: &FormatDescriptor) -> Result<()> {
        self.formats.lock().push(format.clone());
        Ok(())
    }
    fn complete_connect(&mut self) -> Result<()> {
        Ok(())
    }
    fn run(&mut self, _start: i64) -> Result<()> {
        Ok(())
    }
    fn pause(&mut self) -> Result<()> {
        Ok(())
    }
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
    fn begin_flush(&mut self) {}
    fn end_flush(&mut self) {}
    fn render(&mut self, _buffer: &SampleBuffer, _counter: u64) -> Result<()> {
        if self.fail_render {
            return Err(Error::DeviceFailure("injected".into()));
        }
        Ok(())
    }
    fn latency_micros(&self) -> i64 {
        0
    }
    fn audio_clock(&self) -> Option<(u64, u64)> {
        None
    }
}

#[test]
fn test_passthrough_negotiates_synthetic_format() {
    let formats = Arc::new(Mutex::new(Vec::new()));
    let config = RendererConfig::builder()
        .enable_encoded_passthrough(true)
        .build();
    let manual = ManualClock::new();
    let clock = SyncClock::new(Arc::new(manual));
    let device = FormatSpy {
        formats: Arc::clone(&formats),
        fail_render: false,
    };
    let renderer = AudioRenderer::with_parts(config, clock, Box::new(device), None);

    let input = FormatDescriptor::pcm(6, 48_000, 24);
    renderer.set_media_type(&input).unwrap();

    // The device saw the synthetic passthrough format, not the input.
    let seen = formats.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].tag, FormatTag::Spdif);
    assert_eq!(seen[0].channels, 6);
    assert_eq!(seen[0].sample_rate, 48_000);
    assert_eq!(seen[0].bits_per_sample, 16);
    assert_eq!(seen[0].block_align, 12);
    // The renderer's own descriptor is still the raw input.
    assert_eq!(renderer.format().unwrap(), input);
}

#[test]
fn test_spdif_input_rejected() {
    let (renderer, _manual, _queue) = renderer_rig(RendererConfig::default());
    let spdif = FormatDescriptor::passthrough_for(2, 48_000);
    assert!(matches!(
        renderer.check_format(&spdif),
        Err(Error::FormatRejected(_))
    ));
}

#[test]
fn test_rejected_format_preserves_previous() {
    let (renderer, _manual, _queue) = renderer_rig(RendererConfig::default());
    renderer.set_media_type(&pcm()).unwrap();
    let mut bad = FormatDescriptor::pcm(2, 48_000, 16);
    bad.block_align = 0;
    assert!(renderer.set_media_type(&bad).is_err());
    assert_eq!(renderer.format().unwrap(), pcm());
}

#[test]
fn test_device_failure_surfaced_and_stream_continues() {
    let manual = ManualClock::new();
    let clock = SyncClock::new(Arc::new(manual.clone()));
    let device = FormatSpy {
        formats: Arc::new(Mutex::new(Vec::new())),
        fail_render: true,
    };
    let renderer =
        AudioRenderer::with_parts(RendererConfig::default(), clock, Box::new(device), None);
    renderer.set_media_type(&pcm()).unwrap();
    renderer.run(0).unwrap();

    manual.set(0);
    assert!(matches!(
        renderer.receive(buffer(0)),
        Err(Error::DeviceFailure(_))
    ));
    // The next buffer is still attempted; no retry of the failed one.
    manual.set(BUFFER_MICROS);
    assert!(matches!(
        renderer.receive(buffer(BUFFER_MICROS)),
        Err(Error::DeviceFailure(_))
    ));
}
