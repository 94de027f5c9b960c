//! Job descriptions shared by the `crowdfield` binary and its tests.

use anyhow::{Context, Result, bail};
use crowdfield_analysis::{
    ConsistencyConfig, FlowConfig, OrientationConfig, RegionSpeedConfig, SmoothingConfig,
};
use crowdfield_core::{AbstractGrid, Vector2};
use crowdfield_raster::{AgentWeight, KernelSpec, ModeSpec, RasterConfig};
use crowdfield_storage::ReadWindow;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Raster extent. Exactly one of `resolution` or `cell_size` is set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GridSpec {
    pub min_corner: Vector2,
    pub size: Vector2,
    pub resolution: Option<(usize, usize)>,
    pub cell_size: Option<f32>,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            min_corner: Vector2::new(-10.0, -10.0),
            size: Vector2::new(20.0, 20.0),
            resolution: None,
            cell_size: Some(0.2),
        }
    }
}

impl GridSpec {
    pub fn shape(&self) -> Result<AbstractGrid> {
        let shape = match (self.resolution, self.cell_size) {
            (Some(resolution), None) => AbstractGrid::new(self.min_corner, self.size, resolution),
            (None, Some(cell)) => AbstractGrid::with_cell_size(self.min_corner, self.size, cell),
            _ => bail!("grid needs exactly one of `resolution` or `cell_size`"),
        };
        shape.context("invalid grid extent")
    }
}

/// Everything a run may need; each subcommand reads its own section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobConfig {
    pub window: ReadWindow,
    pub grid: GridSpec,
    pub mode: ModeSpec,
    pub raster: RasterConfig,
    pub flow: FlowConfig,
    pub regions: RegionSpeedConfig,
    pub consistency: ConsistencyConfig,
    pub orientation: OrientationConfig,
    pub smoothing: SmoothingConfig,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            window: ReadWindow::default(),
            grid: GridSpec::default(),
            mode: ModeSpec::Splat {
                kernel: KernelSpec::gaussian(0.5),
                weight: AgentWeight::Unit,
            },
            raster: RasterConfig::default(),
            flow: FlowConfig::default(),
            regions: RegionSpeedConfig::default(),
            consistency: ConsistencyConfig::default(),
            orientation: OrientationConfig::default(),
            smoothing: SmoothingConfig::default(),
        }
    }
}

impl JobConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read job file {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("job file {} is not a valid job description", path.display()))
    }

    /// Apply command line overrides on top of the file contents.
    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        if let Some(workers) = workers {
            self.raster.workers = workers;
        }
        self
    }
}

/// Raise `stop` on Ctrl-C so a running raster pass finalises what it has.
/// Only one handler may be installed per process.
pub fn stop_on_interrupt(stop: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        warn!("interrupt received; finishing grids already in flight");
        stop.store(true, Ordering::SeqCst);
    })
    .context("failed to install the interrupt handler")
}
