//! Preprocessing chain throughput
//!
//! The chain runs inside the capture callback, so one block must process
//! far faster than realtime.

use bpm_listener::audio::chain::{ChainMode, ProcessingChain};
use bpm_listener::audio::meter::LevelMonitor;
use bpm_listener::detection::onset::TempoTracker;
use bpm_listener::detection::EngineOptions;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const SAMPLE_RATE: u32 = 48000;
const BLOCK: usize = 512;

fn noisy_block(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            0.4 * (2.0 * std::f32::consts::PI * 60.0 * t).sin()
                + 0.1 * (2.0 * std::f32::consts::PI * 3000.0 * t).sin()
        })
        .collect()
}

fn bench_chain_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    let input = noisy_block(BLOCK);

    for (name, mode) in [("full", ChainMode::Full), ("direct", ChainMode::Direct)] {
        let mut chain = ProcessingChain::build(SAMPLE_RATE, mode, &LevelMonitor::new());
        let mut block = input.clone();
        group.bench_function(BenchmarkId::new("block_512", name), |b| {
            b.iter(|| {
                block.copy_from_slice(&input);
                chain.process(black_box(&mut block));
            });
        });
    }

    group.finish();
}

fn bench_tracker(c: &mut Criterion) {
    // One second of audio per iteration
    let second = noisy_block(SAMPLE_RATE as usize);
    c.bench_function("tracker_1s", |b| {
        let mut tracker = TempoTracker::new(SAMPLE_RATE, &EngineOptions::default());
        b.iter(|| black_box(tracker.push(&second)));
    });
}

criterion_group!(benches, bench_chain_modes, bench_tracker);
criterion_main!(benches);
