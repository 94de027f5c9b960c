//! Per-agent velocity deviations: header `(N, K)` then `K` blocks of `2N` floats.

use crate::StorageError;
use crate::blocks::{BlockReader, BlockWriter};
use crate::codec::count_to_i32;
use crowdfield_core::Vector2;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviationHeader {
    pub agent_count: usize,
    pub frame_count: usize,
}

#[derive(Debug)]
pub struct DeviationWriter {
    inner: BlockWriter,
    agent_count: usize,
    scratch: Vec<f32>,
}

impl DeviationWriter {
    pub fn create(path: impl Into<PathBuf>, agent_count: usize) -> Result<Self, StorageError> {
        let n = count_to_i32(agent_count, "agent count exceeds i32")?;
        Ok(Self {
            inner: BlockWriter::create(path.into(), &[n, 0], 1, 2 * agent_count)?,
            agent_count,
            scratch: Vec::with_capacity(2 * agent_count),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    #[must_use]
    pub const fn frames_written(&self) -> usize {
        self.inner.blocks()
    }

    pub fn write_frame(&mut self, deviations: &[Vector2]) -> Result<(), StorageError> {
        if deviations.len() != self.agent_count {
            return Err(StorageError::AgentCountMismatch {
                frame: self.inner.blocks(),
                expected: self.agent_count,
                found: deviations.len(),
            });
        }
        self.scratch.clear();
        self.scratch
            .extend(deviations.iter().flat_map(|d| [d.x, d.y]));
        self.inner.write_block(&self.scratch)
    }

    /// Patch the frame count and close the file.
    pub fn finish(self) -> Result<DeviationHeader, StorageError> {
        let agent_count = self.agent_count;
        let frame_count = self.inner.finish()?;
        Ok(DeviationHeader {
            agent_count,
            frame_count,
        })
    }
}

#[derive(Debug)]
pub struct DeviationReader {
    inner: BlockReader,
    header: DeviationHeader,
}

impl DeviationReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let inner = BlockReader::open(path.into(), 2, 1, |h| h[0].checked_mul(2))?;
        let header = DeviationHeader {
            agent_count: inner.header()[0],
            frame_count: inner.count(),
        };
        Ok(Self { inner, header })
    }

    #[must_use]
    pub const fn header(&self) -> &DeviationHeader {
        &self.header
    }

    pub fn read_frame(&mut self, index: usize) -> Result<Vec<Vector2>, StorageError> {
        self.inner.read_block(index).map(|values| to_vectors(&values))
    }

    pub fn next_frame(&mut self) -> Result<Option<Vec<Vector2>>, StorageError> {
        Ok(self.inner.next_block()?.map(|values| to_vectors(&values)))
    }
}

fn to_vectors(values: &[f32]) -> Vec<Vector2> {
    values
        .chunks_exact(2)
        .map(|pair| Vector2::new(pair[0], pair[1]))
        .collect()
}
