use crowdfield_core::{AbstractGrid, AgentRecord, Kernel, RadialFunction, TrajectoryFrame, Vector2};
use crowdfield_raster::{
    AgentWeight, Footprint, KernelSpec, ModeSpec, RasterConfig, RasterEngine, RasterError,
    Sampling,
};
use crowdfield_storage::{FrameSource, GridStreamReader, StorageError, VecFrameSource};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_path(label: &str) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "crowdfield_raster_{label}_{}_{timestamp}.grids",
        std::process::id()
    ))
}

fn frame_of(points: &[Vector2]) -> TrajectoryFrame {
    points.iter().map(|&p| AgentRecord::at(p, 0.0)).collect()
}

fn engine(workers: usize) -> RasterEngine {
    RasterEngine::new(RasterConfig {
        workers,
        poll_interval_ms: 1,
    })
    .expect("engine")
}

#[test]
fn single_point_splat_conserves_kernel_mass() {
    let shape =
        AbstractGrid::centered(Vector2::zero(), Vector2::new(10.0, 10.0), (50, 50)).expect("grid");
    let source = VecFrameSource::new(1, 0.1, vec![frame_of(&[Vector2::zero()])]).expect("source");
    let mode = ModeSpec::Splat {
        kernel: KernelSpec::gaussian(1.5),
        weight: AgentWeight::Unit,
    };
    let out = temp_path("s1");
    let report = engine(2).run(source, shape, &mode, &out).expect("run");
    assert_eq!(report.grids_written, 1);

    let kernel = Kernel::new(RadialFunction::Gaussian { sigma: 1.5 }, shape.cell_size())
        .expect("kernel");
    assert_eq!(kernel.width(), 45);
    let reader = GridStreamReader::open(&out).expect("reader");
    assert_eq!(reader.len(), 1);
    let grid = reader.grid(0, shape).expect("grid");
    assert!((grid.sum() - kernel.sum()).abs() < 1e-6);
    assert_eq!(grid.get(25, 25), Some(grid.max()));
    for x in [0usize, 1, 2, 48, 49] {
        for y in 0..50 {
            assert_eq!(grid.get(x, y), Some(0.0));
            assert_eq!(grid.get(y, x), Some(0.0));
        }
    }
    assert_eq!(report.global_max, grid.max());
    fs::remove_file(&out).ok();
}

#[test]
fn blit_speed_drops_outliers() {
    let shape =
        AbstractGrid::centered(Vector2::zero(), Vector2::new(30.0, 30.0), (30, 30)).expect("grid");
    let frames = vec![
        frame_of(&[Vector2::new(0.0, 0.0)]),
        frame_of(&[Vector2::new(10.0, 0.0)]),
    ];
    let mode = ModeSpec::Blit {
        footprint: Footprint::Inflated,
        weight: AgentWeight::Speed,
    };
    let out = temp_path("s2");
    let report = engine(3)
        .run(VecFrameSource::new(1, 0.1, frames).expect("source"), shape, &mode, &out)
        .expect("run");
    assert_eq!(report.grids_written, 1);
    let reader = GridStreamReader::open(&out).expect("reader");
    assert!(reader.values(0).expect("values").iter().all(|v| *v == 0.0));
    drop(reader);

    let slow = vec![
        frame_of(&[Vector2::new(0.0, 0.0)]),
        frame_of(&[Vector2::new(0.2, 0.0)]),
    ];
    engine(1)
        .run(VecFrameSource::new(1, 0.1, slow).expect("source"), shape, &mode, &out)
        .expect("run");
    let reader = GridStreamReader::open(&out).expect("reader");
    let grid = reader.grid(0, shape).expect("grid");
    assert_eq!(grid.cells().iter().filter(|v| **v != 0.0).count(), 9);
    assert!((grid.max() - 2.0).abs() < 1e-5);
    fs::remove_file(&out).ok();
}

/// One agent per frame placed on the cell whose offset encodes the frame.
fn marker_frames(count: usize) -> Vec<TrajectoryFrame> {
    (0..count)
        .map(|k| {
            let (x, y) = (k % 100, k / 100);
            frame_of(&[Vector2::new(x as f32 + 0.5, y as f32 + 0.5)])
        })
        .collect()
}

fn marker_mode() -> ModeSpec {
    ModeSpec::Splat {
        kernel: KernelSpec {
            function: RadialFunction::Constant(1.0),
            sampling: Sampling::Fixed,
            width: Some(1),
        },
        weight: AgentWeight::Unit,
    }
}

#[test]
fn seven_workers_write_in_frame_order() {
    let shape = AbstractGrid::new(Vector2::zero(), Vector2::new(100.0, 10.0), (100, 10))
        .expect("grid");
    let source = VecFrameSource::new(1, 0.1, marker_frames(1000)).expect("source");
    let out = temp_path("s5");
    let report = engine(7).run(source, shape, &marker_mode(), &out).expect("run");
    assert_eq!(report.grids_written, 1000);
    assert_eq!(
        fs::metadata(&out).expect("meta").len(),
        20 + 1000 * 100 * 10 * 4
    );

    let reader = GridStreamReader::open(&out).expect("reader");
    for i in 0..reader.len() {
        let values = reader.values(i).expect("values");
        let offset = values.iter().position(|v| *v == 1.0).expect("marker");
        let (x, y) = (offset / 10, offset % 10);
        assert_eq!(y * 100 + x, i, "payload {i} out of order");
    }
    assert_eq!(report.stats.len(), 1000);
    assert!(report.frame_maxima.windows(2).all(|w| w[0].0 + 1 == w[1].0));
    fs::remove_file(&out).ok();
}

#[test]
fn header_matches_payloads_for_any_worker_count() {
    let mut rng = SmallRng::seed_from_u64(0x5eed);
    let shape =
        AbstractGrid::centered(Vector2::zero(), Vector2::new(8.0, 8.0), (16, 16)).expect("grid");
    for round in 0..6 {
        let workers = rng.random_range(1..=8);
        let count = rng.random_range(0..40);
        let frames = (0..count)
            .map(|_| {
                let points: Vec<Vector2> = (0..5)
                    .map(|_| Vector2::new(rng.random_range(-5.0..5.0), rng.random_range(-5.0..5.0)))
                    .collect();
                frame_of(&points)
            })
            .collect();
        let out = temp_path(&format!("prop{round}"));
        let report = engine(workers)
            .run(
                VecFrameSource::new(5, 0.1, frames).expect("source"),
                shape,
                &ModeSpec::Splat {
                    kernel: KernelSpec::density(0.5),
                    weight: AgentWeight::Unit,
                },
                &out,
            )
            .expect("run");
        let reader = GridStreamReader::open(&out).expect("reader");
        assert_eq!(reader.len(), count);
        assert_eq!(report.grids_written, count);
        assert!(reader.header().min <= reader.header().max);
        fs::remove_file(&out).ok();
    }
}

/// Declares two agents but yields a single-agent frame at `bad_frame`.
struct LyingSource {
    frames: std::vec::IntoIter<TrajectoryFrame>,
}

impl LyingSource {
    fn new(total: usize, bad_frame: usize) -> Self {
        let frames: Vec<TrajectoryFrame> = (0..total)
            .map(|k| {
                if k == bad_frame {
                    frame_of(&[Vector2::zero()])
                } else {
                    frame_of(&[Vector2::zero(), Vector2::new(1.0, 1.0)])
                }
            })
            .collect();
        Self {
            frames: frames.into_iter(),
        }
    }
}

impl FrameSource for LyingSource {
    fn agent_count(&self) -> usize {
        2
    }

    fn time_step(&self) -> f32 {
        0.1
    }

    fn next_frame(&mut self) -> Result<Option<TrajectoryFrame>, StorageError> {
        Ok(self.frames.next())
    }
}

#[test]
fn agent_count_mismatch_aborts_with_readable_output() {
    let shape =
        AbstractGrid::centered(Vector2::zero(), Vector2::new(4.0, 4.0), (8, 8)).expect("grid");
    let mode = ModeSpec::Splat {
        kernel: KernelSpec::gaussian(0.3),
        weight: AgentWeight::Unit,
    };

    let out = temp_path("abort_serial");
    let err = engine(1)
        .run(LyingSource::new(20, 5), shape, &mode, &out)
        .expect_err("mismatch");
    assert!(matches!(
        err,
        RasterError::AgentCountMismatch {
            frame: 5,
            expected: 2,
            found: 1
        }
    ));
    assert_eq!(GridStreamReader::open(&out).expect("reader").len(), 5);

    let out_parallel = temp_path("abort_parallel");
    assert!(engine(4).run(LyingSource::new(20, 5), shape, &mode, &out_parallel).is_err());
    let reader = GridStreamReader::open(&out_parallel).expect("reader");
    assert!(reader.len() <= 5);

    fs::remove_file(&out).ok();
    fs::remove_file(&out_parallel).ok();
}

#[test]
fn short_history_frame_is_rejected() {
    let shape =
        AbstractGrid::centered(Vector2::zero(), Vector2::new(4.0, 4.0), (8, 8)).expect("grid");
    let mode = ModeSpec::Blit {
        footprint: Footprint::Inflated,
        weight: AgentWeight::Speed,
    };
    for workers in [1, 3] {
        let out = temp_path("short_history");
        let err = engine(workers)
            .run(LyingSource::new(6, 0), shape, &mode, &out)
            .expect_err("short history frame");
        assert!(matches!(
            err,
            RasterError::AgentCountMismatch {
                frame: 0,
                expected: 2,
                found: 1
            }
        ));
        assert!(GridStreamReader::open(&out).expect("reader").is_empty());
        fs::remove_file(&out).ok();
    }
}

#[test]
fn stop_flag_finalises_empty_stream() {
    let shape =
        AbstractGrid::centered(Vector2::zero(), Vector2::new(4.0, 4.0), (8, 8)).expect("grid");
    let engine = engine(2);
    engine.stop_handle().store(true, Ordering::SeqCst);
    let out = temp_path("stopped");
    let report = engine
        .run(
            VecFrameSource::new(1, 0.1, marker_frames(10)).expect("source"),
            shape,
            &marker_mode(),
            &out,
        )
        .expect("run");
    assert!(report.stopped);
    assert_eq!(report.grids_written, 0);
    assert!(GridStreamReader::open(&out).expect("reader").is_empty());
    fs::remove_file(&out).ok();
}

#[test]
fn density_normalised_divides_by_companion() {
    let shape =
        AbstractGrid::centered(Vector2::zero(), Vector2::new(6.0, 6.0), (30, 30)).expect("grid");
    let frames = vec![
        frame_of(&[Vector2::new(-1.0, 0.0), Vector2::new(1.0, 0.5)]),
        frame_of(&[Vector2::new(-0.5, 0.0), Vector2::new(0.5, 0.5)]),
    ];
    let kernel = KernelSpec::gaussian(0.4);
    let density = temp_path("density");
    engine(2)
        .run(
            VecFrameSource::new(2, 0.1, frames.clone()).expect("source"),
            shape,
            &ModeSpec::Splat {
                kernel,
                weight: AgentWeight::Unit,
            },
            &density,
        )
        .expect("density pass");

    let out = temp_path("normalised");
    let mode = ModeSpec::DensityNormalised {
        kernel,
        weight: AgentWeight::Constant { value: 2.0 },
        density: density.clone(),
        divide_by_density: true,
    };
    engine(2)
        .run(VecFrameSource::new(2, 0.1, frames.clone()).expect("source"), shape, &mode, &out)
        .expect("normalised pass");
    let reader = GridStreamReader::open(&out).expect("reader");
    for i in 0..2 {
        let values = reader.values(i).expect("values");
        assert!(
            values
                .iter()
                .filter(|v| **v != 0.0)
                .all(|v| (v - 2.0).abs() < 1e-4)
        );
    }

    let mut longer = frames.clone();
    longer.push(frames[0].clone());
    let err = engine(2)
        .run(VecFrameSource::new(2, 0.1, longer).expect("source"), shape, &mode, &out)
        .expect_err("companion too short");
    assert!(matches!(err, RasterError::DensityExhausted { available: 2, .. }));

    fs::remove_file(&density).ok();
    fs::remove_file(&out).ok();
}
