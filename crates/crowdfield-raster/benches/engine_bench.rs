use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use crowdfield_core::{AbstractGrid, AgentRecord, TrajectoryFrame, Vector2};
use crowdfield_raster::{AgentWeight, KernelSpec, ModeSpec, RasterConfig, RasterEngine};
use crowdfield_storage::VecFrameSource;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn random_frames(agents: usize, frames: usize) -> Vec<TrajectoryFrame> {
    let mut rng = SmallRng::seed_from_u64(0xC0FFEE);
    (0..frames)
        .map(|_| {
            (0..agents)
                .map(|_| {
                    let p = Vector2::new(rng.random_range(-20.0..20.0), rng.random_range(-20.0..20.0));
                    AgentRecord::at(p, 0.0)
                })
                .collect()
        })
        .collect()
}

fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("raster_engine");
    group.sample_size(env_usize("CF_BENCH_SAMPLES", 10));
    group.measurement_time(Duration::from_secs(env_usize("CF_BENCH_MEASURE_SECS", 10) as u64));
    let frames = env_usize("CF_BENCH_FRAMES", 64);
    let agents = env_usize("CF_BENCH_AGENTS", 500);
    let shape = AbstractGrid::with_cell_size(
        Vector2::new(-20.0, -20.0),
        Vector2::new(40.0, 40.0),
        0.2,
    )
    .expect("grid");
    let input = random_frames(agents, frames);
    let mode = ModeSpec::Splat {
        kernel: KernelSpec::density(0.5),
        weight: AgentWeight::Unit,
    };
    let output = std::env::temp_dir().join(format!("crowdfield_bench_{}.grids", std::process::id()));

    for workers in [1usize, 4, 7] {
        let engine = RasterEngine::new(RasterConfig {
            workers,
            ..RasterConfig::default()
        })
        .expect("engine");
        group.bench_function(format!("frames{frames}_agents{agents}_workers{workers}"), |b| {
            b.iter_batched(
                || VecFrameSource::new(agents, 0.1, input.clone()).expect("source"),
                |source| engine.run(source, shape, &mode, &output).expect("run"),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
    let _ = std::fs::remove_file(&output);
}

criterion_group!(benches, bench_engine);
criterion_main!(benches);
