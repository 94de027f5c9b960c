//! Core types shared across the crowdfield workspace.

use thiserror::Error;

pub mod frame;
pub mod geometry;
pub mod grid;
pub mod kernel;
pub mod stats;

pub use frame::{
    AgentColumns, AgentRecord, Orientation, TrajectoryFrame, wrap_signed_angle,
    wrap_unsigned_angle,
};
pub use geometry::{LineEquation, Segment, SegmentRegion, Vector2, Vector3};
pub use grid::{AbstractGrid, CellIndex, ClippedWindow, Grid};
pub use kernel::{InstanceKernel, Kernel, KernelBuffer, RadialFunction, kernel_width};
pub use stats::{FrameStats, StatsAccumulator, StatsRecorder};

/// Errors raised while constructing or combining core structures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Two buffers that must share a shape do not.
    #[error("grid shape mismatch: expected {expected} cells, found {found}")]
    ShapeMismatch { expected: usize, found: usize },
    /// A serialised payload ended early.
    #[error("grid payload truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
