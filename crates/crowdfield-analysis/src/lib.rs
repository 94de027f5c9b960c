//! Trajectory analyses: flow through oriented segments, per-region speed,
//! the deviation/consistency pipeline, and the in-place post-processors that
//! synthesise orientations and smooth paths.

use crowdfield_core::CoreError;
use crowdfield_index::IndexError;
use crowdfield_storage::{StorageError, StoreVersion};
use std::io;
use thiserror::Error;

pub mod consistency;
pub mod flow;
pub mod orientation;
pub mod regions;
pub mod smoothing;

pub use consistency::{
    ConsistencyConfig, PipelineReport, deviation, principal_axes, run_pipeline,
    write_consistency, write_deviations,
};
pub use flow::{FlowConfig, FlowCounter, FlowReport, count_flow, format_row};
pub use orientation::{OrientationConfig, OrientationReport, synthesise_orientations};
pub use regions::{RegionFrame, RegionSpeed, RegionSpeedConfig, RegionSpeedReport};
pub use smoothing::{
    SmoothingConfig, SmoothingReport, continuous_intervals, gaussian_weights, smooth_series,
    smooth_trajectories,
};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Consistency windows must be odd, positive and no longer than the run.
    #[error("window of {window} frames is invalid for {frames} deviation frames")]
    InvalidWindow { window: usize, frames: usize },
    #[error("segment {index} has zero length")]
    ZeroLengthSegment { index: usize },
    #[error("store version {0} carries no velocities")]
    MissingVelocities(StoreVersion),
    #[error("frame {frame} carries {found} agents; expected {expected}")]
    AgentCountMismatch {
        frame: usize,
        expected: usize,
        found: usize,
    },
    #[error("failed to write analysis output: {0}")]
    Write(#[from] io::Error),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

