//! Two-pass velocity consistency analysis.
//!
//! The deviation pass expresses each agent's velocity in the frame of its
//! preferred velocity. The consistency pass slides a window of `T` deviation
//! frames and reports, per agent, the principal axes of the windowed samples
//! with the share of variance carried by each.

use crate::AnalysisError;
use crowdfield_core::Vector2;
use crowdfield_storage::{
    ConsistencyHeader, ConsistencyRecord, ConsistencyWriter, DeviationHeader, DeviationReader,
    DeviationWriter, TrajectoryReader,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::{debug, info};

/// Variance totals at or below this are treated as a motionless window.
const VARIANCE_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsistencyConfig {
    /// Window length in frames; odd and positive.
    pub window: usize,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self { window: 11 }
    }
}

impl ConsistencyConfig {
    /// Check the window against a deviation file holding `frames` frames.
    pub fn validate(&self, frames: usize) -> Result<(), AnalysisError> {
        if self.window == 0 || self.window % 2 == 0 || self.window > frames {
            return Err(AnalysisError::InvalidWindow {
                window: self.window,
                frames,
            });
        }
        Ok(())
    }
}

/// Velocity `v` rotated into the frame whose +x axis is `preferred`, minus the
/// preferred speed. `None` when the preferred velocity vanishes.
#[must_use]
pub fn deviation(preferred: Vector2, velocity: Vector2) -> Option<Vector2> {
    let axis = preferred.try_normalize()?;
    Some(Vector2::new(
        axis.dot(velocity) - preferred.length(),
        axis.det(velocity),
    ))
}

/// Stream a v2.2 store into a deviation file.
///
/// Agents with a zero preferred velocity contribute `(0, 0)` for that frame
/// so every block keeps its fixed width.
pub fn write_deviations(
    store: impl Into<PathBuf>,
    output: impl Into<PathBuf>,
) -> Result<DeviationHeader, AnalysisError> {
    let mut reader = TrajectoryReader::open(store)?;
    let header = reader.header()?.clone();
    if !header.version.has_velocities() {
        return Err(AnalysisError::MissingVelocities(header.version));
    }
    let mut writer = DeviationWriter::create(output, header.agent_count)?;
    let mut scratch = Vec::with_capacity(header.agent_count);
    let mut guarded = 0usize;

    while let Some(frame) = reader.next_frame()? {
        let columns = frame.columns();
        scratch.clear();
        for (preferred, velocity) in columns
            .preferred_velocities()
            .iter()
            .zip(columns.velocities())
        {
            scratch.push(deviation(*preferred, *velocity).unwrap_or_else(|| {
                guarded += 1;
                Vector2::zero()
            }));
        }
        writer.write_frame(&scratch)?;
    }
    let written = writer.finish()?;
    if guarded > 0 {
        debug!(guarded, "zero preferred velocities written as zero deviation");
    }
    info!(
        agents = written.agent_count,
        frames = written.frame_count,
        "deviation pass complete"
    );
    Ok(written)
}

/// Principal axes of `samples`, major axis first.
///
/// The axes are unit and orthogonal, the fractions are ordered and sum to one.
/// A window without variance yields [`ConsistencyRecord::default`].
#[must_use]
pub fn principal_axes(samples: &[Vector2]) -> ConsistencyRecord {
    if samples.is_empty() {
        return ConsistencyRecord::default();
    }
    let n = samples.len() as f64;
    let (sum_x, sum_y) = samples.iter().fold((0.0f64, 0.0f64), |(sx, sy), p| {
        (sx + f64::from(p.x), sy + f64::from(p.y))
    });
    let (mean_x, mean_y) = (sum_x / n, sum_y / n);
    let (mut sxx, mut syy, mut sxy) = (0.0f64, 0.0f64, 0.0f64);
    for p in samples {
        let dx = f64::from(p.x) - mean_x;
        let dy = f64::from(p.y) - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    let trace = sxx + syy;
    if trace <= VARIANCE_FLOOR {
        return ConsistencyRecord::default();
    }
    let half_gap = 0.5 * (sxx - syy);
    let radius = half_gap.hypot(sxy);
    let major = 0.5 * trace + radius;
    let minor = (0.5 * trace - radius).max(0.0);
    let phi = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let (sin, cos) = phi.sin_cos();

    let minor_share = (minor / (major + minor)) as f32;
    ConsistencyRecord {
        axes: [
            Vector2::new(cos as f32, sin as f32),
            Vector2::new(-sin as f32, cos as f32),
        ],
        fractions: [1.0 - minor_share, minor_share],
    }
}

/// Slide a window over a deviation file and write one consistency block per
/// window position.
pub fn write_consistency(
    deviations: impl Into<PathBuf>,
    output: impl Into<PathBuf>,
    config: &ConsistencyConfig,
) -> Result<ConsistencyHeader, AnalysisError> {
    let mut reader = DeviationReader::open(deviations)?;
    let DeviationHeader {
        agent_count,
        frame_count,
    } = *reader.header();
    config.validate(frame_count)?;

    let mut writer = ConsistencyWriter::create(output, config.window, agent_count)?;
    let mut window: VecDeque<Vec<Vector2>> = VecDeque::with_capacity(config.window);
    while window.len() < config.window {
        let Some(frame) = reader.next_frame()? else {
            break;
        };
        window.push_back(frame);
    }

    loop {
        let records: Vec<ConsistencyRecord> = (0..agent_count)
            .into_par_iter()
            .map(|agent| {
                let samples: Vec<Vector2> = window.iter().map(|frame| frame[agent]).collect();
                principal_axes(&samples)
            })
            .collect();
        writer.write_frame(&records)?;

        let Some(next) = reader.next_frame()? else {
            break;
        };
        window.pop_front();
        window.push_back(next);
    }

    let written = writer.finish()?;
    info!(
        window = written.window,
        agents = written.agent_count,
        frames = written.frame_count,
        "consistency pass complete"
    );
    Ok(written)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub deviation: DeviationHeader,
    pub consistency: ConsistencyHeader,
}

/// Deviation pass followed by the consistency pass. The deviation file is
/// closed before the consistency pass opens it.
pub fn run_pipeline(
    store: impl Into<PathBuf>,
    deviation_path: impl Into<PathBuf>,
    consistency_path: impl Into<PathBuf>,
    config: &ConsistencyConfig,
) -> Result<PipelineReport, AnalysisError> {
    let deviation_path = deviation_path.into();
    let deviation = write_deviations(store, deviation_path.clone())?;
    config.validate(deviation.frame_count)?;
    let consistency = write_consistency(deviation_path, consistency_path, config)?;
    Ok(PipelineReport {
        deviation,
        consistency,
    })
}
