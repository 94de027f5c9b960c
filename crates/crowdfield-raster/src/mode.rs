//! Serialisable description of what a rasterisation pass deposits.

use crate::RasterError;
use crowdfield_core::{RadialFunction, TrajectoryFrame, wrap_signed_angle};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Blit deposits of agents faster than this (m/s) are dropped.
pub const SPEED_OUTLIER_GATE: f32 = 3.0;

/// Per-agent scalar multiplied into the kernel.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentWeight {
    /// Plain density.
    #[default]
    Unit,
    Constant { value: f32 },
    /// Displacement from the previous frame over the time step.
    Speed,
    /// Wrapped heading change over the time step.
    AngularSpeed,
    /// Velocity component along the preferred direction.
    Progress,
}

impl AgentWeight {
    /// Whether the weight needs the previous frame.
    #[must_use]
    pub const fn needs_history(self) -> bool {
        matches!(self, Self::Speed | Self::AngularSpeed)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Constant { .. } => "constant",
            Self::Speed => "speed",
            Self::AngularSpeed => "angular_speed",
            Self::Progress => "progress",
        }
    }

    /// Weight of agent `agent` in `current`. History weights read zero when
    /// no previous frame is available.
    #[must_use]
    pub fn evaluate(
        self,
        agent: usize,
        current: &TrajectoryFrame,
        previous: Option<&TrajectoryFrame>,
        time_step: f32,
    ) -> f32 {
        let columns = current.columns();
        match self {
            Self::Unit => 1.0,
            Self::Constant { value } => value,
            Self::Speed => previous.map_or(0.0, |prev| {
                linear_speed(agent, current, prev, time_step)
            }),
            Self::AngularSpeed => previous.map_or(0.0, |prev| {
                let now = columns.orientations()[agent].angle();
                let before = prev.columns().orientations()[agent].angle();
                wrap_signed_angle(now - before).abs() / time_step
            }),
            Self::Progress => columns.preferred_velocities()[agent]
                .try_normalize()
                .map_or(0.0, |dir| columns.velocities()[agent].dot(dir)),
        }
    }
}

pub(crate) fn linear_speed(
    agent: usize,
    current: &TrajectoryFrame,
    previous: &TrajectoryFrame,
    time_step: f32,
) -> f32 {
    current.positions()[agent].distance(previous.positions()[agent]) / time_step
}

/// Blit block size.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Footprint {
    /// 3×3 block around the snapped cell.
    #[default]
    Inflated,
    Single,
}

impl Footprint {
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Inflated => 3,
            Self::Single => 1,
        }
    }
}

/// How kernel samples relate to the agent position.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Sampling {
    /// Sampled once around the cell centre.
    #[default]
    Fixed,
    /// Resampled per agent at its sub-cell offset.
    Instance,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct KernelSpec {
    pub function: RadialFunction,
    #[serde(default)]
    pub sampling: Sampling,
    /// Explicit odd width; derived from the radius when absent.
    #[serde(default)]
    pub width: Option<usize>,
}

impl KernelSpec {
    #[must_use]
    pub fn gaussian(sigma: f32) -> Self {
        Self {
            function: RadialFunction::Gaussian { sigma },
            sampling: Sampling::Fixed,
            width: None,
        }
    }

    #[must_use]
    pub fn density(radius: f32) -> Self {
        Self {
            function: RadialFunction::Density { radius },
            sampling: Sampling::Fixed,
            width: None,
        }
    }
}

/// Velocity fed to the Laplacian mode.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VelocityInput {
    /// The velocity lanes of a `2.2` store.
    #[default]
    Recorded,
    /// Displacement from the previous frame over the time step.
    Displacement,
}

/// Deposition mode of a pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModeSpec {
    /// Overwrite a small block with the weight; no kernel.
    Blit {
        #[serde(default)]
        footprint: Footprint,
        weight: AgentWeight,
    },
    /// Accumulate `weight · kernel`. A Gaussian kernel gives the normalised
    /// variant, a density kernel the unit-integral one.
    Splat {
        kernel: KernelSpec,
        #[serde(default)]
        weight: AgentWeight,
    },
    /// Splat, then optionally divide by the matching grid of a density stream.
    DensityNormalised {
        kernel: KernelSpec,
        weight: AgentWeight,
        density: PathBuf,
        #[serde(default)]
        divide_by_density: bool,
    },
    /// Splat, then divide by the accumulated raw kernel weights.
    ContributionNormalised {
        kernel: KernelSpec,
        weight: AgentWeight,
    },
    /// Sum of the x and y velocity fields, each splatted with a Laplacian
    /// of Gaussian kernel.
    VelocityLaplacian {
        sigma: f32,
        #[serde(default)]
        velocity: VelocityInput,
    },
}

impl ModeSpec {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Blit { .. } => "blit",
            Self::Splat { .. } => "splat",
            Self::DensityNormalised { .. } => "density_normalised",
            Self::ContributionNormalised { .. } => "contribution_normalised",
            Self::VelocityLaplacian { .. } => "velocity_laplacian",
        }
    }

    /// Weight deposited per agent, if the mode has one.
    #[must_use]
    pub const fn weight(&self) -> Option<AgentWeight> {
        match self {
            Self::Blit { weight, .. }
            | Self::Splat { weight, .. }
            | Self::DensityNormalised { weight, .. }
            | Self::ContributionNormalised { weight, .. } => Some(*weight),
            Self::VelocityLaplacian { .. } => None,
        }
    }

    /// Whether the first frame only serves as history.
    #[must_use]
    pub const fn needs_history(&self) -> bool {
        match self {
            Self::Blit { .. } => true,
            Self::VelocityLaplacian { velocity, .. } => {
                matches!(velocity, VelocityInput::Displacement)
            }
            _ => match self.weight() {
                Some(weight) => weight.needs_history(),
                None => false,
            },
        }
    }

    pub fn validate(&self) -> Result<(), RasterError> {
        match self {
            Self::Blit { weight, .. } => match weight {
                AgentWeight::Speed | AgentWeight::AngularSpeed => Ok(()),
                _ => Err(RasterError::InvalidConfig(
                    "blit deposits speed or angular speed",
                )),
            },
            Self::Splat { weight, .. }
            | Self::DensityNormalised { weight, .. }
            | Self::ContributionNormalised { weight, .. } => {
                if matches!(weight, AgentWeight::AngularSpeed) {
                    return Err(RasterError::UnsupportedMode {
                        weight: weight.label(),
                        mode: self.label(),
                    });
                }
                Ok(())
            }
            Self::VelocityLaplacian { sigma, .. } => {
                if !(*sigma > 0.0) || !sigma.is_finite() {
                    return Err(RasterError::InvalidConfig("laplacian sigma must be positive"));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdfield_core::{AgentRecord, Orientation, Vector2};
    use std::f32::consts::PI;

    fn single(record: AgentRecord) -> TrajectoryFrame {
        std::iter::once(record).collect()
    }

    #[test]
    fn history_weights() {
        let before = single(AgentRecord::at(Vector2::new(0.0, 0.0), 0.1));
        let after = single(AgentRecord::at(Vector2::new(0.3, 0.4), 2.0 * PI - 0.1));
        let speed = AgentWeight::Speed.evaluate(0, &after, Some(&before), 0.5);
        assert!((speed - 1.0).abs() < 1e-6);
        let turn = AgentWeight::AngularSpeed.evaluate(0, &after, Some(&before), 0.5);
        assert!((turn - 0.4).abs() < 1e-4);
        assert_eq!(AgentWeight::Speed.evaluate(0, &after, None, 0.5), 0.0);
    }

    #[test]
    fn progress_projects_on_preferred_direction() {
        let frame = single(AgentRecord {
            position: Vector2::zero(),
            orientation: Orientation::Angle(0.0),
            state: 0.0,
            preferred_velocity: Vector2::new(0.0, 2.0),
            velocity: Vector2::new(1.0, 1.5),
        });
        assert_eq!(AgentWeight::Progress.evaluate(0, &frame, None, 0.1), 1.5);
        let idle = single(AgentRecord::at(Vector2::zero(), 0.0));
        assert_eq!(AgentWeight::Progress.evaluate(0, &idle, None, 0.1), 0.0);
    }

    #[test]
    fn angular_speed_is_blit_only() {
        let splat = ModeSpec::Splat {
            kernel: KernelSpec::gaussian(1.0),
            weight: AgentWeight::AngularSpeed,
        };
        assert!(matches!(
            splat.validate(),
            Err(RasterError::UnsupportedMode { .. })
        ));
        let blit = ModeSpec::Blit {
            footprint: Footprint::Single,
            weight: AgentWeight::AngularSpeed,
        };
        assert!(blit.validate().is_ok());
        assert!(blit.needs_history());
    }

    #[test]
    fn modes_deserialise_from_tagged_json() {
        let json = r#"{"kind":"splat","kernel":{"function":{"kind":"gaussian","sigma":1.5}}}"#;
        let mode: ModeSpec = serde_json::from_str(json).expect("mode");
        assert_eq!(
            mode,
            ModeSpec::Splat {
                kernel: KernelSpec::gaussian(1.5),
                weight: AgentWeight::Unit,
            }
        );
        assert!(!mode.needs_history());
    }
}
