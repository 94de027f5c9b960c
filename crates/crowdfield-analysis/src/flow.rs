//! Cumulative crossing counts through oriented segments.
//!
//! A segment's positive side is the right-hand side when walking from
//! `start` to `end`. An agent crosses once it steps from the negative side,
//! with its projection inside the segment, onto the non-negative side. Each
//! `(agent, segment)` pair counts at most once per run.

use crate::AnalysisError;
use crowdfield_core::{Segment, Vector2};
use crowdfield_storage::FrameSource;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::{debug, info};

const COLUMN_WIDTH: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlowConfig {
    pub segments: Vec<Segment>,
    /// Write every n-th frame; the final frame is always written.
    pub output_interval: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            segments: Vec::new(),
            output_interval: 1,
        }
    }
}

impl FlowConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.segments.is_empty() {
            return Err(AnalysisError::InvalidConfig("flow needs at least one segment"));
        }
        if self.output_interval == 0 {
            return Err(AnalysisError::InvalidConfig("output interval must be positive"));
        }
        Ok(())
    }
}

/// Precomputed frame of one segment.
#[derive(Debug, Clone, Copy)]
struct FlowLine {
    start: Vector2,
    direction: Vector2,
    right: Vector2,
    length: f32,
}

impl FlowLine {
    fn new(index: usize, segment: &Segment) -> Result<Self, AnalysisError> {
        let direction = segment
            .direction()
            .ok_or(AnalysisError::ZeroLengthSegment { index })?;
        Ok(Self {
            start: segment.start,
            direction,
            right: -direction.perp(),
            length: segment.length(),
        })
    }

    #[inline]
    fn side(&self, p: Vector2) -> f32 {
        self.right.dot(p - self.start)
    }

    #[inline]
    fn projects_inside(&self, p: Vector2) -> bool {
        let t = self.direction.dot(p - self.start);
        (0.0..=self.length).contains(&t)
    }
}

/// Running crossing counters for a fixed set of segments.
#[derive(Debug, Clone)]
pub struct FlowCounter {
    lines: Vec<FlowLine>,
    agent_count: usize,
    /// Row-major `agent × segment`; set once and never cleared.
    crossed: Vec<bool>,
    counts: Vec<u64>,
    previous: Option<Vec<Vector2>>,
    frames_seen: usize,
}

impl FlowCounter {
    pub fn new(segments: &[Segment], agent_count: usize) -> Result<Self, AnalysisError> {
        let lines = segments
            .iter()
            .enumerate()
            .map(|(index, segment)| FlowLine::new(index, segment))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            crossed: vec![false; agent_count * lines.len()],
            counts: vec![0; lines.len()],
            lines,
            agent_count,
            previous: None,
            frames_seen: 0,
        })
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.lines.len()
    }

    /// Index of the segment following `index` in the closed ring of lines.
    #[must_use]
    pub fn next_segment(&self, index: usize) -> usize {
        (index + 1) % self.lines.len().max(1)
    }

    #[must_use]
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    #[must_use]
    pub fn has_crossed(&self, agent: usize, segment: usize) -> bool {
        self.crossed
            .get(agent * self.lines.len() + segment)
            .copied()
            .unwrap_or(false)
    }

    /// Advance by one frame and return the cumulative counts.
    pub fn observe(&mut self, positions: &[Vector2]) -> Result<&[u64], AnalysisError> {
        if positions.len() != self.agent_count {
            return Err(AnalysisError::AgentCountMismatch {
                frame: self.frames_seen,
                expected: self.agent_count,
                found: positions.len(),
            });
        }
        if let Some(previous) = &self.previous {
            let m = self.lines.len();
            for (agent, (before, now)) in previous.iter().zip(positions).enumerate() {
                for (s, line) in self.lines.iter().enumerate() {
                    let slot = agent * m + s;
                    if self.crossed[slot] {
                        continue;
                    }
                    if line.side(*before) < 0.0
                        && line.projects_inside(*before)
                        && line.side(*now) >= 0.0
                    {
                        self.crossed[slot] = true;
                        self.counts[s] += 1;
                    }
                }
            }
        }
        match &mut self.previous {
            Some(previous) => previous.copy_from_slice(positions),
            None => self.previous = Some(positions.to_vec()),
        }
        self.frames_seen += 1;
        Ok(&self.counts)
    }
}

/// One output row: the frame index followed by every counter, each
/// right-aligned in a ten-character column.
#[must_use]
pub fn format_row(frame: usize, counts: &[u64]) -> String {
    let mut line = format!("{frame:>COLUMN_WIDTH$}");
    for count in counts {
        line.push_str(&format!("{count:>COLUMN_WIDTH$}"));
    }
    line
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowReport {
    pub frames: usize,
    pub rows_written: usize,
    pub totals: Vec<u64>,
}

/// Count crossings over every frame of `source`, writing text rows to `out`.
pub fn count_flow<S, W>(
    mut source: S,
    config: &FlowConfig,
    mut out: W,
) -> Result<FlowReport, AnalysisError>
where
    S: FrameSource,
    W: Write,
{
    config.validate()?;
    let mut counter = FlowCounter::new(&config.segments, source.agent_count())?;
    let mut frames = 0usize;
    let mut rows_written = 0usize;
    let mut last_written = None;

    while let Some(frame) = source.next_frame()? {
        let counts = counter.observe(frame.positions())?;
        if frames % config.output_interval == 0 {
            writeln!(out, "{}", format_row(frames, counts))?;
            rows_written += 1;
            last_written = Some(frames);
        }
        frames += 1;
    }
    if frames > 0 && last_written != Some(frames - 1) {
        writeln!(out, "{}", format_row(frames - 1, counter.counts()))?;
        rows_written += 1;
    }
    out.flush()?;

    debug!(segments = counter.segment_count(), rows_written, "flow rows flushed");
    info!(frames, totals = ?counter.counts(), "flow counting complete");
    Ok(FlowReport {
        frames,
        rows_written,
        totals: counter.counts().to_vec(),
    })
}
