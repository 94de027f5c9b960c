//! Mean agent speed per region of a polygon partition.

use crate::AnalysisError;
use crowdfield_core::{TrajectoryFrame, Vector2};
use crowdfield_index::{PolygonPartition, RegionLookup};
use crowdfield_storage::FrameSource;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegionSpeedConfig {
    /// Vertex lists searched in order; the first polygon containing a point wins.
    pub polygons: Vec<Vec<Vector2>>,
    /// State classes ignored entirely.
    pub excluded_states: Vec<i32>,
}

impl RegionSpeedConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.polygons.is_empty() {
            return Err(AnalysisError::InvalidConfig("region speed needs at least one polygon"));
        }
        Ok(())
    }

    pub fn partition(&self) -> Result<PolygonPartition, AnalysisError> {
        self.validate()?;
        Ok(PolygonPartition::from_vertex_lists(self.polygons.clone())?)
    }
}

/// Per-region aggregates for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionFrame {
    pub frame: usize,
    /// Mean speed per region; regions without agents report zero.
    pub means: Vec<f32>,
    pub counts: Vec<usize>,
    /// Non-excluded agents outside every region.
    pub unassigned: usize,
}

impl RegionFrame {
    /// Space-separated means at five fractional digits.
    #[must_use]
    pub fn format_row(&self) -> String {
        self.means
            .iter()
            .map(|mean| format!("{mean:.5}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionSpeedReport {
    pub frames: Vec<RegionFrame>,
    pub unassigned_total: usize,
}

/// Speed aggregation over any [`RegionLookup`].
#[derive(Debug, Clone)]
pub struct RegionSpeed<L = PolygonPartition> {
    lookup: L,
    excluded_states: Vec<i32>,
}

impl RegionSpeed<PolygonPartition> {
    pub fn from_config(config: &RegionSpeedConfig) -> Result<Self, AnalysisError> {
        Ok(Self::new(config.partition()?, config.excluded_states.clone()))
    }
}

impl<L: RegionLookup> RegionSpeed<L> {
    pub fn new(lookup: L, excluded_states: Vec<i32>) -> Self {
        Self {
            lookup,
            excluded_states,
        }
    }

    #[must_use]
    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    /// Aggregate `current` against `previous`; frames must share an agent count.
    pub fn measure(
        &self,
        frame: usize,
        previous: &TrajectoryFrame,
        current: &TrajectoryFrame,
        time_step: f32,
    ) -> Result<RegionFrame, AnalysisError> {
        if previous.len() != current.len() {
            return Err(AnalysisError::AgentCountMismatch {
                frame,
                expected: previous.len(),
                found: current.len(),
            });
        }
        let regions = self.lookup.region_count();
        let mut sums = vec![0.0f64; regions];
        let mut counts = vec![0usize; regions];
        let mut unassigned = 0usize;

        let before = previous.positions();
        for (index, agent) in current.agents().enumerate() {
            if self.excluded_states.contains(&agent.state_class()) {
                continue;
            }
            let Some(region) = self.lookup.region_of(agent.position) else {
                unassigned += 1;
                continue;
            };
            let speed = agent.position.distance(before[index]) / time_step;
            sums[region] += f64::from(speed);
            counts[region] += 1;
        }

        let means = sums
            .iter()
            .zip(&counts)
            .map(|(sum, count)| {
                if *count == 0 {
                    0.0
                } else {
                    (sum / *count as f64) as f32
                }
            })
            .collect();
        Ok(RegionFrame {
            frame,
            means,
            counts,
            unassigned,
        })
    }

    /// Stream every frame of `source`; rows start at the second frame since
    /// speed needs a predecessor.
    pub fn run<S, W>(&self, mut source: S, mut out: W) -> Result<RegionSpeedReport, AnalysisError>
    where
        S: FrameSource,
        W: Write,
    {
        let time_step = source.time_step();
        if !(time_step.is_finite() && time_step > 0.0) {
            return Err(AnalysisError::InvalidConfig("time step must be positive"));
        }
        let mut report = RegionSpeedReport::default();
        let mut previous: Option<TrajectoryFrame> = None;
        let mut index = 0usize;

        while let Some(frame) = source.next_frame()? {
            if let Some(before) = &previous {
                let row = self.measure(index, before, &frame, time_step)?;
                writeln!(out, "{}", row.format_row())?;
                report.unassigned_total += row.unassigned;
                report.frames.push(row);
            }
            previous = Some(frame);
            index += 1;
        }
        out.flush()?;

        if report.unassigned_total > 0 {
            warn!(
                unassigned = report.unassigned_total,
                "agents fell outside every region"
            );
        }
        info!(
            frames = index,
            rows = report.frames.len(),
            regions = self.lookup.region_count(),
            "region speed complete"
        );
        Ok(report)
    }
}
