//! Capture-frame encode and inbound-part decode throughput

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use live_voice_session::audio::{AudioFrame, FrameAssembler};
use live_voice_session::codec::{Pcm16Decoder, Pcm16Encoder};
use live_voice_session::constants::{DEFAULT_FRAME_SIZE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use live_voice_session::protocol::FormatDescriptor;

fn sine(len: usize, rate: u32) -> Vec<f32> {
    (0..len)
        .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / rate as f32).sin() * 0.5)
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let frame = AudioFrame::new(sine(DEFAULT_FRAME_SIZE, INPUT_SAMPLE_RATE), INPUT_SAMPLE_RATE);
    let mut encoder = Pcm16Encoder::new(INPUT_SAMPLE_RATE);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(DEFAULT_FRAME_SIZE as u64));
    group.bench_function("pcm16_frame", |b| {
        b.iter(|| encoder.encode(black_box(&frame)))
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    // 100 ms of model audio
    let samples = sine(2400, OUTPUT_SAMPLE_RATE);
    let payload = STANDARD.encode(Pcm16Encoder::encode_samples(&samples));
    let format = FormatDescriptor::pcm16(OUTPUT_SAMPLE_RATE);
    let resampled_format = FormatDescriptor::pcm16(16_000);
    let mut decoder = Pcm16Decoder::new(OUTPUT_SAMPLE_RATE);

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(samples.len() as u64));
    group.bench_function("base64_pcm16", |b| {
        b.iter(|| decoder.decode(black_box(&format), black_box(&payload)))
    });
    group.bench_function("base64_pcm16_resampled", |b| {
        b.iter(|| decoder.decode(black_box(&resampled_format), black_box(&payload)))
    });
    group.finish();
}

fn bench_framing(c: &mut Criterion) {
    // 10 ms stereo callback at 48 kHz
    let callback = sine(960, 48_000);
    let mut assembler = FrameAssembler::new(DEFAULT_FRAME_SIZE, INPUT_SAMPLE_RATE);

    c.bench_function("assemble_stereo_48k", |b| {
        b.iter(|| assembler.push(black_box(&callback), 2, 48_000))
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_framing);
criterion_main!(benches);
