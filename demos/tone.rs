// ABOUTME: End-to-end tone playback example
// ABOUTME: Feeds timestamped sine buffers through the renderer to the hardware output

use clap::Parser;
use std::f64::consts::TAU;
use syncrender::audio::{FormatDescriptor, SampleBuffer};
use syncrender::{AudioRenderer, RendererConfig};

const BUFFER_MILLIS: u64 = 20;

/// Play a sine tone through the synchronized renderer
#[derive(Parser, Debug)]
#[command(name = "tone")]
#[command(about = "Render a sine tone with per-buffer scheduling", long_about = None)]
struct Args {
    /// Tone frequency in Hz
    #[arg(short, long, default_value_t = 440.0)]
    frequency: f64,

    /// Playback duration in seconds
    #[arg(short, long, default_value_t = 5)]
    seconds: u64,

    /// Sample rate in Hz
    #[arg(short = 'r', long, default_value_t = 48_000)]
    sample_rate: u32,

    /// Playback rate (1.0 nominal, >= 2.0 unthrottled)
    #[arg(long, default_value_t = 1.0)]
    rate: f64,

    /// Log a trace line for every scheduled buffer (needs RUST_LOG=trace)
    #[arg(long, default_value_t = false)]
    timing: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let config = RendererConfig::builder()
        .use_accelerated_output(true)
        .log_sample_timing(args.timing)
        .build();
    let renderer = AudioRenderer::new(config);

    let format = FormatDescriptor::pcm(2, args.sample_rate, 16);
    renderer.set_media_type(&format)?;
    renderer.complete_connect()?;
    renderer.run(0)?;
    renderer.set_rate(args.rate);

    println!(
        "Playing {:.1} Hz for {}s at {} Hz stereo, rate {}",
        args.frequency, args.seconds, args.sample_rate, args.rate
    );

    let frames_per_buffer = (args.sample_rate as u64 * BUFFER_MILLIS / 1_000) as usize;
    let buffer_micros = BUFFER_MILLIS as i64 * 1_000;
    let total_buffers = args.seconds * 1_000 / BUFFER_MILLIS;

    let mut phase = 0.0f64;
    let step = TAU * args.frequency / args.sample_rate as f64;

    for n in 0..total_buffers {
        let mut payload = Vec::with_capacity(frames_per_buffer * 4);
        for _ in 0..frames_per_buffer {
            let value = (phase.sin() * i16::MAX as f64 * 0.2) as i16;
            phase = (phase + step) % TAU;
            // Same value on both channels, little-endian.
            payload.extend_from_slice(&value.to_le_bytes());
            payload.extend_from_slice(&value.to_le_bytes());
        }

        let start = n as i64 * buffer_micros;
        let buffer = SampleBuffer::new(payload, start, start + buffer_micros);
        // Blocks until the buffer's due time; the renderer paces us.
        renderer.receive(buffer)?;
    }

    renderer.end_of_stream();
    // Let the device drain its queued tail before tearing down.
    std::thread::sleep(std::time::Duration::from_millis(200));
    renderer.stop()?;

    Ok(())
}
