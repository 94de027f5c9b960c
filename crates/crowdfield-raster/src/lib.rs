//! Rasterisation of trajectory frames into dense grid streams.

use crowdfield_core::CoreError;
use crowdfield_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

pub mod deposit;
pub mod engine;
pub mod mode;

pub use deposit::{FrameInput, PreparedKernel, Rasteriser};
pub use engine::{RasterConfig, RasterEngine, RasterReport, run};
pub use mode::{
    AgentWeight, Footprint, KernelSpec, ModeSpec, SPEED_OUTLIER_GATE, Sampling, VelocityInput,
};

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Weight/mode combinations the pipeline does not provide.
    #[error("{weight} weights are not supported by the {mode} mode")]
    UnsupportedMode {
        weight: &'static str,
        mode: &'static str,
    },
    #[error("density companion stream {} does not exist", .0.display())]
    MissingDensity(PathBuf),
    #[error("density companion resolution {found:?} differs from the grid {expected:?}")]
    DensityMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("density companion has {available} grids; frame {frame} has no match")]
    DensityExhausted { frame: usize, available: usize },
    #[error("frame {frame} carries {found} agents; the source declares {expected}")]
    AgentCountMismatch {
        frame: usize,
        expected: usize,
        found: usize,
    },
    #[error("worker failure: {0}")]
    Worker(String),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
