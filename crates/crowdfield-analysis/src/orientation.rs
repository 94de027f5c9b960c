//! Heading synthesis from displacement, rate-limited per frame.

use crate::AnalysisError;
use crowdfield_core::{Vector2, wrap_signed_angle, wrap_unsigned_angle};
use crowdfield_storage::TrajectorySet;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrientationConfig {
    /// Half-width, in frames, of the displacement used for the heading.
    pub window: usize,
    /// Maximum turn rate in radians per second.
    pub max_angular_velocity: f32,
    /// Displacements shorter than this keep the previous heading.
    pub epsilon: f32,
}

impl Default for OrientationConfig {
    fn default() -> Self {
        Self {
            window: 5,
            max_angular_velocity: std::f32::consts::PI,
            epsilon: 1e-3,
        }
    }
}

impl OrientationConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.window == 0 {
            return Err(AnalysisError::InvalidConfig("orientation window must be positive"));
        }
        if !(self.max_angular_velocity.is_finite() && self.max_angular_velocity > 0.0) {
            return Err(AnalysisError::InvalidConfig(
                "maximum angular velocity must be positive",
            ));
        }
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0) {
            return Err(AnalysisError::InvalidConfig("epsilon must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrientationReport {
    pub agents: usize,
    pub frames: usize,
    /// Frames where the turn limit shortened the raw heading change.
    pub clamped: usize,
    /// Frames that repeated the previous heading for lack of motion.
    pub held: usize,
}

/// Headings for one track, starting from `initial`.
fn synthesise_track(
    track: &[Vector2],
    initial: f32,
    config: &OrientationConfig,
    max_turn: f32,
    report: &mut OrientationReport,
) -> Vec<f32> {
    let last = track.len().saturating_sub(1);
    let mut headings = Vec::with_capacity(track.len());
    let mut previous = wrap_unsigned_angle(initial);

    for t in 0..track.len() {
        let displacement = track[(t + config.window).min(last)] - track[t.saturating_sub(config.window)];
        let heading = if displacement.length() < config.epsilon {
            report.held += 1;
            previous
        } else if t == 0 {
            wrap_unsigned_angle(displacement.angle())
        } else {
            let delta = wrap_signed_angle(displacement.angle() - previous);
            let limited = delta.clamp(-max_turn, max_turn);
            if limited != delta {
                report.clamped += 1;
            }
            wrap_unsigned_angle(previous + limited)
        };
        headings.push(heading);
        previous = heading;
    }
    headings
}

/// Rewrite every orientation of `set` from its positions.
///
/// The first frame takes the raw displacement heading; later frames turn by at
/// most `max_angular_velocity · time_step` and all headings land in `[0, 2π)`.
pub fn synthesise_orientations(
    set: &mut TrajectorySet,
    config: &OrientationConfig,
) -> Result<OrientationReport, AnalysisError> {
    config.validate()?;
    let time_step = set.header().time_step;
    if !(time_step.is_finite() && time_step > 0.0) {
        return Err(AnalysisError::InvalidConfig("time step must be positive"));
    }
    let max_turn = config.max_angular_velocity * time_step;
    let mut report = OrientationReport {
        agents: set.agent_count(),
        frames: set.frame_count(),
        ..OrientationReport::default()
    };
    if set.frame_count() == 0 {
        return Ok(report);
    }

    for agent in 0..set.agent_count() {
        let track = set.track(agent)?;
        let initial = set.frames()[0].columns().orientations()[agent].angle();
        let headings = synthesise_track(&track, initial, config, max_turn, &mut report);
        for (frame, heading) in set.frames_mut().iter_mut().zip(headings) {
            let slot = &mut frame.columns_mut().orientations_mut()[agent];
            *slot = slot.with_angle(heading);
        }
    }
    info!(
        agents = report.agents,
        frames = report.frames,
        clamped = report.clamped,
        held = report.held,
        "orientation synthesis complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdfield_core::{AgentRecord, TrajectoryFrame};
    use crowdfield_storage::{StoreVersion, TrajectoryHeader};
    use std::f32::consts::{FRAC_PI_2, PI, TAU};

    fn set_from(track: &[Vector2], time_step: f32) -> TrajectorySet {
        let header = TrajectoryHeader::new(StoreVersion::V2_0, 1, time_step);
        let frames: Vec<TrajectoryFrame> = track
            .iter()
            .map(|p| std::iter::once(AgentRecord::at(*p, 0.0)).collect())
            .collect();
        TrajectorySet::from_frames(header, frames).expect("set")
    }

    fn headings(set: &TrajectorySet) -> Vec<f32> {
        set.frames()
            .iter()
            .map(|f| f.columns().orientations()[0].angle())
            .collect()
    }

    #[test]
    fn straight_walk_faces_travel_direction() {
        let track: Vec<Vector2> = (0..10).map(|i| Vector2::new(0.0, i as f32)).collect();
        let mut set = set_from(&track, 0.1);
        let config = OrientationConfig {
            window: 2,
            ..OrientationConfig::default()
        };
        synthesise_orientations(&mut set, &config).expect("synthesise");
        assert!(headings(&set).iter().all(|h| (h - FRAC_PI_2).abs() < 1e-5));
    }

    #[test]
    fn reversal_is_rate_limited() {
        let mut track: Vec<Vector2> = (0..5).map(|i| Vector2::new(i as f32, 0.0)).collect();
        track.extend((0..5).map(|i| Vector2::new(4.0 - i as f32, 0.0)));
        let mut set = set_from(&track, 0.1);
        let config = OrientationConfig {
            window: 1,
            max_angular_velocity: PI,
            epsilon: 1e-4,
        };
        let report = synthesise_orientations(&mut set, &config).expect("synthesise");
        assert!(report.clamped > 0);
        let limit = PI * 0.1 + 1e-4;
        for pair in headings(&set).windows(2) {
            let delta = (pair[1] - pair[0]).abs();
            assert!(delta.min(TAU - delta) <= limit);
        }
    }

    #[test]
    fn wrap_around_turns_the_short_way() {
        let mut report = OrientationReport::default();
        let track = [Vector2::new(0.0, 0.0), Vector2::new(1.0, -0.1), Vector2::new(2.0, -0.1)];
        let config = OrientationConfig {
            window: 1,
            max_angular_velocity: 100.0,
            epsilon: 1e-4,
        };
        let out = synthesise_track(&track, 0.05, &config, 10.0, &mut report);
        assert!(out.iter().all(|h| (0.0..TAU).contains(h)));
        assert!(out[0] > PI);
    }

    #[test]
    fn stationary_agent_keeps_heading() {
        let track = vec![Vector2::new(3.0, 3.0); 4];
        let mut set = set_from(&track, 0.1);
        for frame in set.frames_mut() {
            frame.columns_mut().orientations_mut()[0] = crowdfield_core::Orientation::Angle(1.25);
        }
        let report =
            synthesise_orientations(&mut set, &OrientationConfig::default()).expect("synthesise");
        assert_eq!(report.held, 4);
        assert!(headings(&set).iter().all(|h| (h - 1.25).abs() < 1e-6));
    }
}
