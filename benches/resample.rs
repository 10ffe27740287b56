//! Downsampling kernel benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mothkit_lib::filter::resample;
use mothkit_lib::util::Progress;

fn bench_downsample(c: &mut Criterion) {
    let input: Vec<i16> = (0..480_000)
        .map(|i| ((i as f64 * 0.01).sin() * 12_000.0) as i16)
        .collect();

    let mut group = c.benchmark_group("downsample");

    for &(source, requested) in &[(48_000u32, 16_000u32), (384_000, 48_000), (250_000, 48_000)] {
        group.bench_function(format!("{}->{}", source, requested), |b| {
            b.iter(|| {
                let mut cursor = 0usize;
                let mut read = || {
                    let sample = input[cursor % input.len()];
                    cursor += 1;
                    Ok(sample)
                };

                let mut sink = 0i64;
                let mut write = |s: i16| {
                    sink += s as i64;
                    Ok(())
                };

                let mut progress = Progress::new(None, input.len() as u64);
                resample::downsample_stream(
                    &mut read,
                    &mut write,
                    input.len() as u64,
                    source,
                    requested,
                    &mut progress,
                )
                .unwrap();

                black_box(sink)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_downsample);
criterion_main!(benches);
