//! Sequential frame providers consumed by the raster engine and analyses.

use crate::StorageError;
use crate::trajectory::{ReadWindow, TrajectoryHeader, TrajectoryReader};
use crowdfield_core::TrajectoryFrame;
use std::collections::VecDeque;
use std::path::PathBuf;

/// Anything that yields frames of a fixed agent count in time order.
pub trait FrameSource {
    fn agent_count(&self) -> usize;

    /// Seconds between consecutive frames yielded by this source.
    fn time_step(&self) -> f32;

    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<TrajectoryFrame>, StorageError>;

    /// Frames left to yield, when the source knows.
    fn frames_remaining(&self) -> Option<usize> {
        None
    }
}

/// Frames streamed from a trajectory store through a [`ReadWindow`].
#[derive(Debug)]
pub struct StoreSource {
    reader: TrajectoryReader,
    header: TrajectoryHeader,
    window: ReadWindow,
    indices: std::vec::IntoIter<usize>,
}

impl StoreSource {
    pub fn open(path: impl Into<PathBuf>, window: ReadWindow) -> Result<Self, StorageError> {
        Self::from_reader(TrajectoryReader::open(path)?, window)
    }

    pub fn from_reader(
        mut reader: TrajectoryReader,
        window: ReadWindow,
    ) -> Result<Self, StorageError> {
        window.validate()?;
        let header = window.derive_header(reader.header()?);
        let indices = window.indices(reader.frame_count()?).into_iter();
        Ok(Self {
            reader,
            header,
            window,
            indices,
        })
    }

    /// Header of the windowed stream (strided agents and time step).
    #[must_use]
    pub fn header(&self) -> &TrajectoryHeader {
        &self.header
    }

    /// Frames still to be yielded.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.indices.len()
    }
}

impl FrameSource for StoreSource {
    fn agent_count(&self) -> usize {
        self.header.agent_count
    }

    fn time_step(&self) -> f32 {
        self.header.time_step
    }

    fn frames_remaining(&self) -> Option<usize> {
        Some(self.remaining())
    }

    fn next_frame(&mut self) -> Result<Option<TrajectoryFrame>, StorageError> {
        let Some(index) = self.indices.next() else {
            return Ok(None);
        };
        let frame = self.reader.read_frame(index)?;
        Ok(Some(if self.window.agent_stride > 1 {
            frame.strided(self.window.agent_stride)
        } else {
            frame
        }))
    }
}

/// In-memory source, mostly for tests and synthetic inputs.
#[derive(Debug, Clone, Default)]
pub struct VecFrameSource {
    agent_count: usize,
    time_step: f32,
    frames: VecDeque<TrajectoryFrame>,
}

impl VecFrameSource {
    /// Every frame must carry `agent_count` agents.
    pub fn new(
        agent_count: usize,
        time_step: f32,
        frames: Vec<TrajectoryFrame>,
    ) -> Result<Self, StorageError> {
        if let Some((frame, found)) = frames
            .iter()
            .enumerate()
            .find(|(_, f)| f.len() != agent_count)
            .map(|(i, f)| (i, f.len()))
        {
            return Err(StorageError::AgentCountMismatch {
                frame,
                expected: agent_count,
                found,
            });
        }
        Ok(Self {
            agent_count,
            time_step,
            frames: frames.into(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for VecFrameSource {
    fn agent_count(&self) -> usize {
        self.agent_count
    }

    fn time_step(&self) -> f32 {
        self.time_step
    }

    fn frames_remaining(&self) -> Option<usize> {
        Some(self.frames.len())
    }

    fn next_frame(&mut self) -> Result<Option<TrajectoryFrame>, StorageError> {
        Ok(self.frames.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdfield_core::{AgentRecord, Vector2};

    #[test]
    fn vec_source_drains_in_order() {
        let frames: Vec<TrajectoryFrame> = (0..3)
            .map(|k| std::iter::once(AgentRecord::at(Vector2::new(k as f32, 0.0), 0.0)).collect())
            .collect();
        let mut source = VecFrameSource::new(1, 0.1, frames).expect("source");
        assert_eq!(source.len(), 3);
        let mut xs = Vec::new();
        while let Some(frame) = source.next_frame().expect("frame") {
            xs.push(frame.positions()[0].x);
        }
        assert_eq!(xs, vec![0.0, 1.0, 2.0]);
        assert!(source.is_empty());
    }

    #[test]
    fn vec_source_checks_agent_counts() {
        let frames = vec![TrajectoryFrame::default()];
        let err = VecFrameSource::new(2, 0.1, frames).expect_err("empty frame");
        assert!(matches!(
            err,
            StorageError::AgentCountMismatch {
                frame: 0,
                expected: 2,
                found: 0
            }
        ));
    }
}
