//! Per-frame agent state held as a structure of arrays.

use crate::geometry::Vector2;
use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};

/// Wrap an angle into `[0, 2π)`.
#[must_use]
pub fn wrap_unsigned_angle(mut angle: f32) -> f32 {
    if !angle.is_finite() {
        return 0.0;
    }
    angle %= TAU;
    if angle < 0.0 {
        angle += TAU;
    }
    if angle >= TAU { 0.0 } else { angle }
}

/// Wrap an angle difference into `(-π, π]`.
#[must_use]
pub fn wrap_signed_angle(angle: f32) -> f32 {
    if !angle.is_finite() {
        return 0.0;
    }
    let wrapped = wrap_unsigned_angle(angle);
    if wrapped > PI { wrapped - TAU } else { wrapped }
}

/// Agent facing, stored either as an angle or as a direction pair depending on
/// the trajectory version that produced it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Orientation {
    /// Radians, counter-clockwise from +x.
    Angle(f32),
    /// Direction vector `(dir_x, dir_y)`; not necessarily unit length.
    Direction(Vector2),
}

impl Default for Orientation {
    fn default() -> Self {
        Self::Angle(0.0)
    }
}

impl Orientation {
    /// Heading angle in `(-π, π]` for direction pairs, raw value for angles.
    #[must_use]
    pub fn angle(self) -> f32 {
        match self {
            Self::Angle(theta) => theta,
            Self::Direction(dir) => dir.angle(),
        }
    }

    /// Unit facing vector.
    #[must_use]
    pub fn direction(self) -> Vector2 {
        match self {
            Self::Angle(theta) => Vector2::from_angle(theta),
            Self::Direction(dir) => dir.normalize_or_zero(),
        }
    }

    /// Replace the heading while keeping the storage representation.
    #[must_use]
    pub fn with_angle(self, theta: f32) -> Self {
        match self {
            Self::Angle(_) => Self::Angle(theta),
            Self::Direction(_) => Self::Direction(Vector2::from_angle(theta)),
        }
    }
}

/// Scalar fields for a single agent, used when inserting or snapshotting rows.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentRecord {
    pub position: Vector2,
    pub orientation: Orientation,
    /// Behavioural state lane; stored as a float in the trajectory payload.
    pub state: f32,
    pub preferred_velocity: Vector2,
    pub velocity: Vector2,
}

impl AgentRecord {
    /// Record carrying only a position and heading angle.
    #[must_use]
    pub fn at(position: Vector2, angle: f32) -> Self {
        Self {
            position,
            orientation: Orientation::Angle(angle),
            ..Self::default()
        }
    }

    /// Integer class of the state lane.
    #[must_use]
    pub fn state_class(&self) -> i32 {
        self.state.round() as i32
    }
}

/// Collection of per-agent columns for hot-path iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentColumns {
    positions: Vec<Vector2>,
    orientations: Vec<Orientation>,
    states: Vec<f32>,
    preferred_velocities: Vec<Vector2>,
    velocities: Vec<Vector2>,
}

impl AgentColumns {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            positions: Vec::with_capacity(capacity),
            orientations: Vec::with_capacity(capacity),
            states: Vec::with_capacity(capacity),
            preferred_velocities: Vec::with_capacity(capacity),
            velocities: Vec::with_capacity(capacity),
        }
    }

    /// Number of active rows in the columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reserve(&mut self, additional: usize) {
        self.positions.reserve(additional);
        self.orientations.reserve(additional);
        self.states.reserve(additional);
        self.preferred_velocities.reserve(additional);
        self.velocities.reserve(additional);
    }

    /// Remove all rows while retaining capacity.
    pub fn clear(&mut self) {
        self.positions.clear();
        self.orientations.clear();
        self.states.clear();
        self.preferred_velocities.clear();
        self.velocities.clear();
    }

    /// Push a new row onto each column.
    pub fn push(&mut self, agent: AgentRecord) {
        self.positions.push(agent.position);
        self.orientations.push(agent.orientation);
        self.states.push(agent.state);
        self.preferred_velocities.push(agent.preferred_velocity);
        self.velocities.push(agent.velocity);
        self.debug_assert_coherent();
    }

    /// Truncate all columns to the provided length.
    pub fn truncate(&mut self, len: usize) {
        self.positions.truncate(len);
        self.orientations.truncate(len);
        self.states.truncate(len);
        self.preferred_velocities.truncate(len);
        self.velocities.truncate(len);
        self.debug_assert_coherent();
    }

    /// Return a copy of the scalar fields at `index`.
    #[must_use]
    pub fn snapshot(&self, index: usize) -> AgentRecord {
        AgentRecord {
            position: self.positions[index],
            orientation: self.orientations[index],
            state: self.states[index],
            preferred_velocity: self.preferred_velocities[index],
            velocity: self.velocities[index],
        }
    }

    /// Overwrite the row at `index`.
    pub fn set(&mut self, index: usize, agent: AgentRecord) {
        self.positions[index] = agent.position;
        self.orientations[index] = agent.orientation;
        self.states[index] = agent.state;
        self.preferred_velocities[index] = agent.preferred_velocity;
        self.velocities[index] = agent.velocity;
    }

    #[must_use]
    pub fn positions(&self) -> &[Vector2] {
        &self.positions
    }

    #[must_use]
    pub fn positions_mut(&mut self) -> &mut [Vector2] {
        &mut self.positions
    }

    #[must_use]
    pub fn orientations(&self) -> &[Orientation] {
        &self.orientations
    }

    #[must_use]
    pub fn orientations_mut(&mut self) -> &mut [Orientation] {
        &mut self.orientations
    }

    #[must_use]
    pub fn states(&self) -> &[f32] {
        &self.states
    }

    #[must_use]
    pub fn states_mut(&mut self) -> &mut [f32] {
        &mut self.states
    }

    #[must_use]
    pub fn preferred_velocities(&self) -> &[Vector2] {
        &self.preferred_velocities
    }

    #[must_use]
    pub fn preferred_velocities_mut(&mut self) -> &mut [Vector2] {
        &mut self.preferred_velocities
    }

    #[must_use]
    pub fn velocities(&self) -> &[Vector2] {
        &self.velocities
    }

    #[must_use]
    pub fn velocities_mut(&mut self) -> &mut [Vector2] {
        &mut self.velocities
    }

    #[inline]
    fn debug_assert_coherent(&self) {
        debug_assert_eq!(self.positions.len(), self.orientations.len());
        debug_assert_eq!(self.positions.len(), self.states.len());
        debug_assert_eq!(self.positions.len(), self.preferred_velocities.len());
        debug_assert_eq!(self.positions.len(), self.velocities.len());
    }
}

/// All agents at one time step. The k-th row refers to the same logical agent
/// in every frame of a trajectory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrajectoryFrame {
    columns: AgentColumns,
}

impl TrajectoryFrame {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: AgentColumns::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn from_columns(columns: AgentColumns) -> Self {
        Self { columns }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn push(&mut self, agent: AgentRecord) {
        self.columns.push(agent);
    }

    #[must_use]
    pub fn agent(&self, index: usize) -> Option<AgentRecord> {
        (index < self.len()).then(|| self.columns.snapshot(index))
    }

    /// Typed per-agent view in stored order.
    pub fn agents(&self) -> impl ExactSizeIterator<Item = AgentRecord> + '_ {
        (0..self.len()).map(|index| self.columns.snapshot(index))
    }

    /// Bulk column view for vectorised consumers.
    #[must_use]
    pub fn columns(&self) -> &AgentColumns {
        &self.columns
    }

    #[must_use]
    pub fn columns_mut(&mut self) -> &mut AgentColumns {
        &mut self.columns
    }

    #[must_use]
    pub fn positions(&self) -> &[Vector2] {
        self.columns.positions()
    }

    /// Keep every `stride`-th agent starting from the first.
    #[must_use]
    pub fn strided(&self, stride: usize) -> Self {
        let stride = stride.max(1);
        let mut columns = AgentColumns::with_capacity(self.len().div_ceil(stride));
        for index in (0..self.len()).step_by(stride) {
            columns.push(self.columns.snapshot(index));
        }
        Self { columns }
    }
}

impl FromIterator<AgentRecord> for TrajectoryFrame {
    fn from_iter<I: IntoIterator<Item = AgentRecord>>(iter: I) -> Self {
        let mut frame = Self::default();
        for agent in iter {
            frame.push(agent);
        }
        frame
    }
}
