//! Binary persistence for crowdfield: the versioned trajectory store, the grid
//! stream produced by rasterisation, and the deviation/consistency side files.

use crowdfield_core::CoreError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod blocks;
mod codec;
pub mod consistency;
pub mod deviation;
pub mod grid_stream;
pub mod source;
pub mod trajectory;

pub use consistency::{ConsistencyHeader, ConsistencyReader, ConsistencyRecord, ConsistencyWriter};
pub use deviation::{DeviationHeader, DeviationReader, DeviationWriter};
pub use grid_stream::{GRID_STREAM_HEADER_LEN, GridStreamHeader, GridStreamReader, GridStreamWriter};
pub use source::{FrameSource, StoreSource, VecFrameSource};
pub use trajectory::{
    DEFAULT_TIME_STEP, ReadWindow, StoreVersion, TrajectoryHeader, TrajectoryReader,
    TrajectorySet, TrajectoryWriter, extract_agent, write_strided, write_truncated, write_window,
};

/// Storage error wrapper.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Malformed or inconsistent file contents.
    #[error("format error in {} at byte {offset}: {reason}", path.display())]
    Format {
        path: PathBuf,
        offset: u64,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// A frame disagrees with the agent count declared by its store.
    #[error("frame {frame} carries {found} agents; the store declares {expected}")]
    AgentCountMismatch {
        frame: usize,
        expected: usize,
        found: usize,
    },
    #[error("frame {index} out of range; the store holds {count} frames")]
    FrameOutOfRange { index: usize, count: usize },
    #[error("agent {index} out of range; the store holds {count} agents")]
    AgentOutOfRange { index: usize, count: usize },
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl StorageError {
    pub(crate) fn format(path: &Path, offset: u64, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.to_path_buf(),
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
