//! Parallel rasterisation engine.
//!
//! A pool of workers pulls frames from a mutex-guarded cursor, rasterises
//! them, and parks the grids in an ordered buffer. A single writer thread
//! appends grids to the output stream strictly in frame order and the header
//! is patched once every worker has joined.

use crate::RasterError;
use crate::deposit::{FrameInput, Rasteriser};
use crate::mode::ModeSpec;
use crowdfield_core::{
    AbstractGrid, Grid, StatsAccumulator, StatsRecorder, TrajectoryFrame, Vector2,
};
use crowdfield_storage::{FrameSource, GridStreamWriter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RasterConfig {
    /// Number of rasterising workers; the writer thread comes on top.
    pub workers: usize,
    /// Upper bound on how long the writer sleeps between buffer checks.
    pub poll_interval_ms: u64,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            workers: 7,
            poll_interval_ms: 10,
        }
    }
}

impl RasterConfig {
    pub fn validate(&self) -> Result<(), RasterError> {
        if self.workers == 0 {
            return Err(RasterError::InvalidConfig("at least one worker is required"));
        }
        if self.poll_interval_ms == 0 {
            return Err(RasterError::InvalidConfig("poll interval must be positive"));
        }
        Ok(())
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Summary of a finished pass.
#[derive(Debug, Clone, Default)]
pub struct RasterReport {
    pub grids_written: usize,
    pub global_min: f32,
    pub global_max: f32,
    /// `(frame_index, max_cell)` in frame order.
    pub frame_maxima: Vec<(usize, f32)>,
    pub stats: StatsRecorder,
    /// Set when the pass ended through the stop flag.
    pub stopped: bool,
}

struct WorkItem {
    slot: usize,
    frame: usize,
    current: Arc<TrajectoryFrame>,
    previous: Option<Arc<TrajectoryFrame>>,
}

struct Cursor<S> {
    source: S,
    next_frame: usize,
    next_slot: usize,
    previous: Option<Arc<TrajectoryFrame>>,
    skip_first: bool,
    agent_count: usize,
    exhausted: bool,
}

impl<S: FrameSource> Cursor<S> {
    fn new(source: S, skip_first: bool) -> Self {
        Self {
            agent_count: source.agent_count(),
            source,
            next_frame: 0,
            next_slot: 0,
            previous: None,
            skip_first,
            exhausted: false,
        }
    }

    /// Issue the next frame. With `skip_first` the opening frame is kept as
    /// history and never handed out.
    fn next_item(&mut self) -> Result<Option<WorkItem>, RasterError> {
        loop {
            if self.exhausted {
                return Ok(None);
            }
            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.exhausted = true;
                    return Ok(None);
                }
                Err(err) => {
                    self.exhausted = true;
                    return Err(err.into());
                }
            };
            let index = self.next_frame;
            self.next_frame += 1;
            let current = Arc::new(frame);
            let previous = self.previous.replace(Arc::clone(&current));
            if self.skip_first && previous.is_none() {
                // History frames never reach a worker, so check them here.
                if current.len() != self.agent_count {
                    self.exhausted = true;
                    return Err(RasterError::AgentCountMismatch {
                        frame: index,
                        expected: self.agent_count,
                        found: current.len(),
                    });
                }
                continue;
            }
            let slot = self.next_slot;
            self.next_slot += 1;
            return Ok(Some(WorkItem {
                slot,
                frame: index,
                current,
                previous,
            }));
        }
    }
}

#[derive(Default)]
struct OrderedBuffer {
    pending: BTreeMap<usize, Grid>,
    workers_done: bool,
}

struct Shared<S> {
    cursor: Mutex<Cursor<S>>,
    ordered: Mutex<OrderedBuffer>,
    ready: Condvar,
    abort: AtomicBool,
    failure: Mutex<Option<RasterError>>,
}

impl<S> Shared<S> {
    fn push(&self, slot: usize, grid: Grid) {
        lock(&self.ordered).pending.insert(slot, grid);
        self.ready.notify_all();
    }

    /// Record the first failure and stop handing out frames.
    fn fail(&self, err: RasterError) {
        self.abort.store(true, Ordering::SeqCst);
        let mut failure = lock(&self.failure);
        if failure.is_none() {
            warn!(error = %err, "rasterisation failed; draining ordered grids");
            *failure = Some(err);
        } else {
            debug!(error = %err, "additional rasterisation failure");
        }
        drop(failure);
        self.ready.notify_all();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("raster mutex poisoned; continuing with inner state");
            poisoned.into_inner()
        }
    }
}

#[derive(Default)]
struct WorkerOutput {
    stats: StatsRecorder,
    maxima: Vec<(usize, f32)>,
}

struct WorkerContext<'a, S> {
    shared: &'a Shared<S>,
    raster: &'a Rasteriser,
    agent_count: usize,
    time_step: f32,
    stop: &'a AtomicBool,
}

fn work<S: FrameSource>(ctx: &WorkerContext<'_, S>) -> WorkerOutput {
    let mut output = WorkerOutput::default();
    loop {
        if ctx.stop.load(Ordering::Relaxed) || ctx.shared.abort.load(Ordering::Relaxed) {
            break;
        }
        let item = match lock(&ctx.shared.cursor).next_item() {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(err) => {
                ctx.shared.fail(err);
                break;
            }
        };
        if item.current.len() != ctx.agent_count {
            ctx.shared.fail(RasterError::AgentCountMismatch {
                frame: item.frame,
                expected: ctx.agent_count,
                found: item.current.len(),
            });
            break;
        }

        let input = FrameInput {
            index: item.frame,
            current: &item.current,
            previous: item.previous.as_deref(),
            time_step: ctx.time_step,
        };
        let mut accumulator = StatsAccumulator::new();
        match ctx.raster.rasterise(&input, &mut accumulator) {
            Ok(grid) => {
                let max = grid.max();
                debug!(frame = item.frame, max, "rasterised frame");
                output.maxima.push((item.frame, max));
                output.stats.record(accumulator.finish(item.frame));
                ctx.shared.push(item.slot, grid);
            }
            Err(err) => {
                ctx.shared.fail(err);
                break;
            }
        }
    }
    output
}

/// Append grids in slot order until the workers are done and the next slot
/// is missing. Returns the number of grids written.
fn write_ordered<S>(
    shared: &Shared<S>,
    writer: &mut GridStreamWriter,
    poll: Duration,
) -> Result<usize, RasterError> {
    let mut next = 0usize;
    loop {
        let grid = {
            let mut buffer = lock(&shared.ordered);
            loop {
                if let Some(grid) = buffer.pending.remove(&next) {
                    break Some(grid);
                }
                if buffer.workers_done {
                    if !buffer.pending.is_empty() {
                        warn!(
                            dropped = buffer.pending.len(),
                            next, "discarding grids queued behind a gap"
                        );
                    }
                    break None;
                }
                buffer = match shared.ready.wait_timeout(buffer, poll) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
        };
        let Some(grid) = grid else {
            return Ok(next);
        };
        if let Err(err) = writer.write_grid(&grid) {
            shared.abort.store(true, Ordering::SeqCst);
            return Err(err.into());
        }
        next += 1;
    }
}

/// Rasterisation engine with a fixed worker pool.
#[derive(Debug, Clone)]
pub struct RasterEngine {
    config: RasterConfig,
    stop: Arc<AtomicBool>,
}

impl RasterEngine {
    pub fn new(config: RasterConfig) -> Result<Self, RasterError> {
        config.validate()?;
        Ok(Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &RasterConfig {
        &self.config
    }

    /// Flag that asks workers to stop taking new frames. Grids already
    /// produced are still written and the header is finalised.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Drain `source`, writing one grid per issued frame to `output`.
    pub fn run<S>(
        &self,
        source: S,
        shape: AbstractGrid,
        mode: &ModeSpec,
        output: impl Into<PathBuf>,
    ) -> Result<RasterReport, RasterError>
    where
        S: FrameSource + Send,
    {
        let raster = Rasteriser::new(shape, mode)?;
        let time_step = source.time_step();
        if raster.needs_history() && !(time_step > 0.0 && time_step.is_finite()) {
            return Err(RasterError::InvalidConfig(
                "history weights need a positive time step",
            ));
        }
        if let (Some(available), Some(remaining)) =
            (raster.density_grids(), source.frames_remaining())
            && available < remaining
        {
            return Err(RasterError::DensityExhausted {
                frame: available,
                available,
            });
        }

        let output = output.into();
        let agent_count = source.agent_count();
        let mut writer = GridStreamWriter::create(&output, shape.resolution())?;
        let shared = Shared {
            cursor: Mutex::new(Cursor::new(source, raster.needs_history())),
            ordered: Mutex::new(OrderedBuffer::default()),
            ready: Condvar::new(),
            abort: AtomicBool::new(false),
            failure: Mutex::new(None),
        };
        let ctx = WorkerContext {
            shared: &shared,
            raster: &raster,
            agent_count,
            time_step,
            stop: &self.stop,
        };
        let poll = self.config.poll_interval();
        let started = Instant::now();
        info!(
            output = %output.display(),
            mode = mode.label(),
            workers = self.config.workers,
            agents = agent_count,
            rx = shape.resolution().0,
            ry = shape.resolution().1,
            "starting rasterisation"
        );

        let (outputs, written) = thread::scope(|scope| {
            let writer_handle = thread::Builder::new()
                .name("crowdfield-raster-writer".into())
                .spawn_scoped(scope, || write_ordered(&shared, &mut writer, poll));

            let mut handles = Vec::with_capacity(self.config.workers);
            for id in 0..self.config.workers {
                let ctx = &ctx;
                match thread::Builder::new()
                    .name(format!("crowdfield-raster-{id}"))
                    .spawn_scoped(scope, move || work(ctx))
                {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        shared.fail(RasterError::Worker(format!(
                            "failed to spawn worker {id}: {err}"
                        )));
                        break;
                    }
                }
            }

            let mut outputs = Vec::with_capacity(handles.len());
            for handle in handles {
                match handle.join() {
                    Ok(output) => outputs.push(output),
                    Err(_) => shared.fail(RasterError::Worker("raster worker panicked".into())),
                }
            }
            lock(&shared.ordered).workers_done = true;
            shared.ready.notify_all();

            let written = match writer_handle {
                Ok(handle) => handle
                    .join()
                    .unwrap_or_else(|_| Err(RasterError::Worker("grid writer panicked".into()))),
                Err(err) => Err(RasterError::Worker(format!(
                    "failed to spawn writer thread: {err}"
                ))),
            };
            (outputs, written)
        });

        let finished = writer.finish();
        let failure = match shared.failure.into_inner() {
            Ok(failure) => failure,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(err) = failure {
            if let Ok(header) = &finished {
                warn!(grids = header.grid_count, "rasterisation aborted; partial stream finalised");
            }
            return Err(err);
        }
        let written = written?;
        let header = finished?;
        debug_assert_eq!(written, header.grid_count);

        let mut report = RasterReport {
            grids_written: header.grid_count,
            global_min: header.min,
            global_max: header.max,
            stopped: self.stop.load(Ordering::Relaxed),
            ..RasterReport::default()
        };
        for output in outputs {
            report.stats.merge(output.stats);
            report.frame_maxima.extend(output.maxima);
        }
        report.frame_maxima.sort_by_key(|(frame, _)| *frame);
        info!(
            grids = report.grids_written,
            min = report.global_min,
            max = report.global_max,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rasterisation finished"
        );
        Ok(report)
    }
}

/// Run one pass with the default worker pool over the grid
/// `min_corner + [0, size]` split into `resolution` cells.
pub fn run<S>(
    source: S,
    min_corner: Vector2,
    size: Vector2,
    resolution: (usize, usize),
    mode: &ModeSpec,
    output: impl Into<PathBuf>,
) -> Result<RasterReport, RasterError>
where
    S: FrameSource + Send,
{
    let shape = AbstractGrid::new(min_corner, size, resolution)?;
    RasterEngine::new(RasterConfig::default())?.run(source, shape, mode, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdfield_core::AgentRecord;
    use crowdfield_storage::VecFrameSource;

    fn frames(count: usize) -> Vec<TrajectoryFrame> {
        (0..count)
            .map(|k| std::iter::once(AgentRecord::at(Vector2::new(k as f32 * 0.01, 0.0), 0.0)).collect())
            .collect()
    }

    #[test]
    fn cursor_keeps_first_frame_as_history() {
        let source = VecFrameSource::new(1, 0.1, frames(3)).expect("source");
        let mut cursor = Cursor::new(source, true);
        let first = cursor.next_item().expect("item").expect("some");
        assert_eq!((first.slot, first.frame), (0, 1));
        assert!(first.previous.is_some());
        let second = cursor.next_item().expect("item").expect("some");
        assert_eq!((second.slot, second.frame), (1, 2));
        assert!(cursor.next_item().expect("item").is_none());
    }

    #[test]
    fn cursor_without_history_issues_every_frame() {
        let source = VecFrameSource::new(1, 0.1, frames(2)).expect("source");
        let mut cursor = Cursor::new(source, false);
        let first = cursor.next_item().expect("item").expect("some");
        assert_eq!((first.slot, first.frame), (0, 0));
        assert!(first.previous.is_none());
    }

    #[test]
    fn config_validation() {
        assert!(RasterConfig::default().validate().is_ok());
        assert!(
            RasterConfig {
                workers: 0,
                ..RasterConfig::default()
            }
            .validate()
            .is_err()
        );
    }
}
