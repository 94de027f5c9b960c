//! Windowed principal axes of the deviations: header `(T, N, K′)` then `K′`
//! blocks of `6N` floats (two axes and two variance fractions per agent).

use crate::StorageError;
use crate::blocks::{BlockReader, BlockWriter};
use crate::codec::count_to_i32;
use crowdfield_core::Vector2;
use std::path::{Path, PathBuf};

const FLOATS_PER_AGENT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyHeader {
    pub window: usize,
    pub agent_count: usize,
    pub frame_count: usize,
}

/// Principal axes of one agent's windowed deviations, major axis first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsistencyRecord {
    pub axes: [Vector2; 2],
    /// Fraction of the total variance along each axis.
    pub fractions: [f32; 2],
}

impl Default for ConsistencyRecord {
    fn default() -> Self {
        Self {
            axes: [Vector2::new(1.0, 0.0), Vector2::new(0.0, 1.0)],
            fractions: [1.0, 0.0],
        }
    }
}

impl ConsistencyRecord {
    fn push_to(&self, out: &mut Vec<f32>) {
        out.extend_from_slice(&[
            self.axes[0].x,
            self.axes[0].y,
            self.axes[1].x,
            self.axes[1].y,
            self.fractions[0],
            self.fractions[1],
        ]);
    }

    fn from_values(v: &[f32]) -> Self {
        Self {
            axes: [Vector2::new(v[0], v[1]), Vector2::new(v[2], v[3])],
            fractions: [v[4], v[5]],
        }
    }
}

#[derive(Debug)]
pub struct ConsistencyWriter {
    inner: BlockWriter,
    window: usize,
    agent_count: usize,
    scratch: Vec<f32>,
}

impl ConsistencyWriter {
    pub fn create(
        path: impl Into<PathBuf>,
        window: usize,
        agent_count: usize,
    ) -> Result<Self, StorageError> {
        let t = count_to_i32(window, "window exceeds i32")?;
        let n = count_to_i32(agent_count, "agent count exceeds i32")?;
        Ok(Self {
            inner: BlockWriter::create(
                path.into(),
                &[t, n, 0],
                2,
                FLOATS_PER_AGENT * agent_count,
            )?,
            window,
            agent_count,
            scratch: Vec::with_capacity(FLOATS_PER_AGENT * agent_count),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    pub fn write_frame(&mut self, records: &[ConsistencyRecord]) -> Result<(), StorageError> {
        if records.len() != self.agent_count {
            return Err(StorageError::AgentCountMismatch {
                frame: self.inner.blocks(),
                expected: self.agent_count,
                found: records.len(),
            });
        }
        self.scratch.clear();
        for record in records {
            record.push_to(&mut self.scratch);
        }
        self.inner.write_block(&self.scratch)
    }

    pub fn finish(self) -> Result<ConsistencyHeader, StorageError> {
        let (window, agent_count) = (self.window, self.agent_count);
        let frame_count = self.inner.finish()?;
        Ok(ConsistencyHeader {
            window,
            agent_count,
            frame_count,
        })
    }
}

#[derive(Debug)]
pub struct ConsistencyReader {
    inner: BlockReader,
    header: ConsistencyHeader,
}

impl ConsistencyReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let inner = BlockReader::open(path.into(), 3, 2, |h| h[1].checked_mul(FLOATS_PER_AGENT))?;
        let header = ConsistencyHeader {
            window: inner.header()[0],
            agent_count: inner.header()[1],
            frame_count: inner.count(),
        };
        Ok(Self { inner, header })
    }

    #[must_use]
    pub const fn header(&self) -> &ConsistencyHeader {
        &self.header
    }

    pub fn read_frame(&mut self, index: usize) -> Result<Vec<ConsistencyRecord>, StorageError> {
        self.inner.read_block(index).map(|values| to_records(&values))
    }

    pub fn next_frame(&mut self) -> Result<Option<Vec<ConsistencyRecord>>, StorageError> {
        Ok(self.inner.next_block()?.map(|values| to_records(&values)))
    }
}

fn to_records(values: &[f32]) -> Vec<ConsistencyRecord> {
    values
        .chunks_exact(FLOATS_PER_AGENT)
        .map(ConsistencyRecord::from_values)
        .collect()
}
