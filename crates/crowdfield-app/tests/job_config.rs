use crowdfield_app::{GridSpec, JobConfig, stop_on_interrupt};
use crowdfield_core::{AgentRecord, RadialFunction, TrajectoryFrame, Vector2};
use crowdfield_raster::{AgentWeight, ModeSpec, RasterEngine};
use crowdfield_storage::{GridStreamReader, VecFrameSource};
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_path(label: &str, extension: &str) -> std::path::PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "crowdfield_{label}_{}_{timestamp}.{extension}",
        std::process::id()
    ))
}

#[test]
fn partial_job_file_fills_defaults() {
    let json = r#"{
        "grid": { "min_corner": { "x": -5.0, "y": -5.0 }, "size": { "x": 10.0, "y": 10.0 },
                  "resolution": [50, 50], "cell_size": null },
        "mode": { "kind": "splat",
                  "kernel": { "function": { "kind": "gaussian", "sigma": 1.5 } },
                  "weight": { "kind": "speed" } },
        "raster": { "workers": 3 },
        "consistency": { "window": 9 }
    }"#;
    let job: JobConfig = serde_json::from_str(json).expect("job");
    assert_eq!(job.raster.workers, 3);
    assert_eq!(job.raster.poll_interval_ms, 10);
    assert_eq!(job.consistency.window, 9);
    assert_eq!(job.flow.output_interval, 1);
    let ModeSpec::Splat { kernel, weight } = job.mode else {
        panic!("expected a splat mode");
    };
    assert_eq!(kernel.function, RadialFunction::Gaussian { sigma: 1.5 });
    assert_eq!(weight, AgentWeight::Speed);

    let shape = job.grid.shape().expect("shape");
    assert_eq!(shape.resolution(), (50, 50));
}

#[test]
fn grid_needs_exactly_one_sizing_rule() {
    let both = GridSpec {
        resolution: Some((10, 10)),
        cell_size: Some(0.5),
        ..GridSpec::default()
    };
    assert!(both.shape().is_err());
    let neither = GridSpec {
        resolution: None,
        cell_size: None,
        ..GridSpec::default()
    };
    assert!(neither.shape().is_err());
    let cells = GridSpec {
        min_corner: Vector2::zero(),
        size: Vector2::new(4.0, 2.0),
        resolution: None,
        cell_size: Some(0.5),
    };
    assert_eq!(cells.shape().expect("shape").resolution(), (8, 4));
}

#[test]
fn workers_override_and_file_round_trip() {
    let path = temp_path("job", "json");
    let job = JobConfig::default();
    std::fs::write(&path, serde_json::to_string_pretty(&job).expect("json")).expect("write");
    let loaded = JobConfig::load(&path).expect("load").with_workers(Some(2));
    assert_eq!(loaded.raster.workers, 2);
    assert_eq!(loaded.with_workers(None).mode, job.mode);

    std::fs::write(&path, "{ not json").expect("write");
    assert!(JobConfig::load(&path).is_err());
    std::fs::remove_file(&path).ok();
}

#[test]
fn interrupted_raster_run_finalises_the_stream() {
    let job = JobConfig::default();
    let engine = RasterEngine::new(job.raster.clone()).expect("engine");
    let stop = engine.stop_handle();
    stop_on_interrupt(engine.stop_handle()).expect("handler");
    assert!(stop_on_interrupt(engine.stop_handle()).is_err());

    stop.store(true, Ordering::SeqCst);
    let frames: Vec<TrajectoryFrame> = (0..4)
        .map(|k| std::iter::once(AgentRecord::at(Vector2::new(k as f32, 0.0), 0.0)).collect())
        .collect();
    let out = temp_path("interrupted", "grids");
    let report = engine
        .run(
            VecFrameSource::new(1, 0.1, frames).expect("source"),
            job.grid.shape().expect("shape"),
            &job.mode,
            &out,
        )
        .expect("run");
    assert!(report.stopped);
    assert!(GridStreamReader::open(&out).expect("reader").is_empty());
    std::fs::remove_file(&out).ok();
}
