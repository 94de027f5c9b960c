//! Per-frame deposition: turns one frame into one grid.

use crate::RasterError;
use crate::mode::{
    AgentWeight, KernelSpec, ModeSpec, SPEED_OUTLIER_GATE, Sampling, VelocityInput, linear_speed,
};
use crowdfield_core::{
    AbstractGrid, CellIndex, Grid, InstanceKernel, Kernel, KernelBuffer, RadialFunction,
    StatsAccumulator, TrajectoryFrame, Vector2,
};
use crowdfield_storage::GridStreamReader;
use std::borrow::Cow;
use std::path::Path;
use tracing::{debug, trace};

/// Kernel ready for deposition on a particular grid.
#[derive(Debug, Clone)]
pub enum PreparedKernel {
    Fixed(Kernel),
    Instance(InstanceKernel),
}

impl PreparedKernel {
    pub fn build(spec: &KernelSpec, shape: &AbstractGrid) -> Result<Self, RasterError> {
        let cell = shape.cell_size();
        Ok(match (spec.sampling, spec.width) {
            (Sampling::Fixed, None) => Self::Fixed(Kernel::new(spec.function, cell)?),
            (Sampling::Fixed, Some(width)) => {
                Self::Fixed(Kernel::fixed(&spec.function, cell, width)?)
            }
            (Sampling::Instance, None) => {
                Self::Instance(InstanceKernel::new(spec.function, cell)?)
            }
            (Sampling::Instance, Some(width)) => {
                Self::Instance(InstanceKernel::with_width(spec.function, cell, width)?)
            }
        })
    }

    #[must_use]
    pub fn width(&self) -> usize {
        match self {
            Self::Fixed(kernel) => kernel.width(),
            Self::Instance(kernel) => kernel.width(),
        }
    }

    /// Snap cell and samples for an agent at `p`.
    #[must_use]
    pub fn sample(&self, shape: &AbstractGrid, p: Vector2) -> (CellIndex, Cow<'_, KernelBuffer>) {
        let cell = shape.get_center(p);
        let buffer = match self {
            Self::Fixed(kernel) => Cow::Borrowed(kernel.buffer()),
            Self::Instance(kernel) => Cow::Owned(kernel.evaluate(shape.cell_center(cell), p)),
        };
        (cell, buffer)
    }
}

#[derive(Debug)]
enum Prepared {
    Blit {
        width: usize,
        weight: AgentWeight,
    },
    Splat {
        kernel: PreparedKernel,
        weight: AgentWeight,
    },
    DensityNormalised {
        kernel: PreparedKernel,
        weight: AgentWeight,
        density: GridStreamReader,
        divide: bool,
    },
    ContributionNormalised {
        kernel: PreparedKernel,
        weight: AgentWeight,
    },
    VelocityLaplacian {
        kernel: PreparedKernel,
        velocity: VelocityInput,
    },
}

/// One frame of input for [`Rasteriser::rasterise`].
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    pub index: usize,
    pub current: &'a TrajectoryFrame,
    pub previous: Option<&'a TrajectoryFrame>,
    pub time_step: f32,
}

/// A validated mode bound to a grid shape. Shared read-only by all workers.
#[derive(Debug)]
pub struct Rasteriser {
    shape: AbstractGrid,
    needs_history: bool,
    prepared: Prepared,
}

impl Rasteriser {
    /// Build kernels and open companion data. A missing density stream is
    /// reported here, before any frame is processed.
    pub fn new(shape: AbstractGrid, mode: &ModeSpec) -> Result<Self, RasterError> {
        mode.validate()?;
        let prepared = match mode {
            ModeSpec::Blit { footprint, weight } => Prepared::Blit {
                width: footprint.width(),
                weight: *weight,
            },
            ModeSpec::Splat { kernel, weight } => Prepared::Splat {
                kernel: PreparedKernel::build(kernel, &shape)?,
                weight: *weight,
            },
            ModeSpec::DensityNormalised {
                kernel,
                weight,
                density,
                divide_by_density,
            } => Prepared::DensityNormalised {
                kernel: PreparedKernel::build(kernel, &shape)?,
                weight: *weight,
                density: open_density(density, &shape)?,
                divide: *divide_by_density,
            },
            ModeSpec::ContributionNormalised { kernel, weight } => {
                Prepared::ContributionNormalised {
                    kernel: PreparedKernel::build(kernel, &shape)?,
                    weight: *weight,
                }
            }
            ModeSpec::VelocityLaplacian { sigma, velocity } => Prepared::VelocityLaplacian {
                kernel: PreparedKernel::build(
                    &KernelSpec {
                        function: RadialFunction::LaplacianOfGaussian { sigma: *sigma },
                        sampling: Sampling::Fixed,
                        width: None,
                    },
                    &shape,
                )?,
                velocity: *velocity,
            },
        };
        Ok(Self {
            shape,
            needs_history: mode.needs_history(),
            prepared,
        })
    }

    #[must_use]
    pub const fn shape(&self) -> &AbstractGrid {
        &self.shape
    }

    #[must_use]
    pub const fn needs_history(&self) -> bool {
        self.needs_history
    }

    /// Grids available in the companion density stream, if any.
    #[must_use]
    pub fn density_grids(&self) -> Option<usize> {
        match &self.prepared {
            Prepared::DensityNormalised { density, .. } => Some(density.len()),
            _ => None,
        }
    }

    /// Deposit every agent of `input` into a fresh grid. Each deposited
    /// weight is pushed into `stats`.
    pub fn rasterise(
        &self,
        input: &FrameInput<'_>,
        stats: &mut StatsAccumulator,
    ) -> Result<Grid, RasterError> {
        let mut grid = Grid::new(self.shape, 0.0);
        match &self.prepared {
            Prepared::Blit { width, weight } => {
                self.blit(&mut grid, input, *width, *weight, stats);
            }
            Prepared::Splat { kernel, weight } => {
                self.splat(&mut grid, None, input, kernel, *weight, stats);
            }
            Prepared::DensityNormalised {
                kernel,
                weight,
                density,
                divide,
            } => {
                self.splat(&mut grid, None, input, kernel, *weight, stats);
                let companion = density.grid(input.index, self.shape).map_err(|_| {
                    RasterError::DensityExhausted {
                        frame: input.index,
                        available: density.len(),
                    }
                })?;
                if *divide {
                    grid.divide_by_grid(&companion)?;
                }
            }
            Prepared::ContributionNormalised { kernel, weight } => {
                let mut contribution = Grid::new(self.shape, 0.0);
                self.splat(
                    &mut grid,
                    Some(&mut contribution),
                    input,
                    kernel,
                    *weight,
                    stats,
                );
                grid.divide_by_grid(&contribution)?;
            }
            Prepared::VelocityLaplacian { kernel, velocity } => {
                let mut y_field = Grid::new(self.shape, 0.0);
                for agent in 0..input.current.len() {
                    let Some(v) = agent_velocity(input, agent, *velocity) else {
                        continue;
                    };
                    let p = input.current.positions()[agent];
                    let (cell, buffer) = kernel.sample(&self.shape, p);
                    grid.deposit(cell, &buffer, v.x);
                    y_field.deposit(cell, &buffer, v.y);
                    stats.push(v.length());
                }
                grid.add_grid(&y_field)?;
            }
        }
        Ok(grid)
    }

    fn blit(
        &self,
        grid: &mut Grid,
        input: &FrameInput<'_>,
        width: usize,
        weight: AgentWeight,
        stats: &mut StatsAccumulator,
    ) {
        let Some(previous) = input.previous else {
            return;
        };
        for agent in 0..input.current.len() {
            let speed = linear_speed(agent, input.current, previous, input.time_step);
            if speed > SPEED_OUTLIER_GATE {
                trace!(frame = input.index, agent, speed, "outlier gate dropped agent");
                continue;
            }
            let value = weight.evaluate(agent, input.current, input.previous, input.time_step);
            let cell = self.shape.get_center(input.current.positions()[agent]);
            grid.blit(cell, width, value);
            stats.push(value);
        }
    }

    fn splat(
        &self,
        grid: &mut Grid,
        mut contribution: Option<&mut Grid>,
        input: &FrameInput<'_>,
        kernel: &PreparedKernel,
        weight: AgentWeight,
        stats: &mut StatsAccumulator,
    ) {
        for agent in 0..input.current.len() {
            let w = weight.evaluate(agent, input.current, input.previous, input.time_step);
            let (cell, buffer) = kernel.sample(&self.shape, input.current.positions()[agent]);
            grid.deposit(cell, &buffer, w);
            if let Some(contribution) = contribution.as_deref_mut() {
                contribution.deposit(cell, &buffer, 1.0);
            }
            stats.push(w);
        }
    }
}

fn agent_velocity(input: &FrameInput<'_>, agent: usize, velocity: VelocityInput) -> Option<Vector2> {
    match velocity {
        VelocityInput::Recorded => Some(input.current.columns().velocities()[agent]),
        VelocityInput::Displacement => input.previous.map(|prev| {
            (input.current.positions()[agent] - prev.positions()[agent]) / input.time_step
        }),
    }
}

fn open_density(path: &Path, shape: &AbstractGrid) -> Result<GridStreamReader, RasterError> {
    if !path.exists() {
        return Err(RasterError::MissingDensity(path.to_path_buf()));
    }
    let reader = GridStreamReader::open(path)?;
    let found = reader.header().resolution;
    if found != shape.resolution() {
        return Err(RasterError::DensityMismatch {
            expected: shape.resolution(),
            found,
        });
    }
    debug!(path = %path.display(), grids = reader.len(), "opened density companion");
    Ok(reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Footprint;
    use crowdfield_core::AgentRecord;

    fn shape() -> AbstractGrid {
        AbstractGrid::with_cell_size(Vector2::new(-5.0, -5.0), Vector2::new(10.0, 10.0), 0.2)
            .expect("shape")
    }

    fn frame(points: &[(f32, f32)]) -> TrajectoryFrame {
        points
            .iter()
            .map(|&(x, y)| AgentRecord::at(Vector2::new(x, y), 0.0))
            .collect()
    }

    fn input<'a>(current: &'a TrajectoryFrame, previous: Option<&'a TrajectoryFrame>) -> FrameInput<'a> {
        FrameInput {
            index: 1,
            current,
            previous,
            time_step: 0.1,
        }
    }

    #[test]
    fn contribution_normalised_recovers_uniform_weight() {
        let mode = ModeSpec::ContributionNormalised {
            kernel: KernelSpec::gaussian(0.5),
            weight: AgentWeight::Constant { value: 2.5 },
        };
        let raster = Rasteriser::new(shape(), &mode).expect("raster");
        let current = frame(&[(0.0, 0.0), (0.3, 0.1)]);
        let mut stats = StatsAccumulator::new();
        let grid = raster.rasterise(&input(&current, None), &mut stats).expect("grid");
        let covered: Vec<f32> = grid.cells().iter().copied().filter(|v| *v != 0.0).collect();
        assert!(!covered.is_empty());
        assert!(covered.iter().all(|v| (v - 2.5).abs() < 1e-4));
        assert_eq!(stats.count(), 2);
    }

    #[test]
    fn blit_overwrites_in_stored_order() {
        let mode = ModeSpec::Blit {
            footprint: Footprint::Single,
            weight: AgentWeight::Speed,
        };
        let raster = Rasteriser::new(shape(), &mode).expect("raster");
        let previous = frame(&[(0.0, 0.0), (0.0, 0.0)]);
        let current = frame(&[(0.01, 0.0), (0.02, 0.0)]);
        let mut stats = StatsAccumulator::new();
        let grid = raster
            .rasterise(&input(&current, Some(&previous)), &mut stats)
            .expect("grid");
        let cell = grid.value_at(Vector2::new(0.01, 0.0)).expect("cell");
        assert!((cell - 0.2).abs() < 1e-5);
    }

    #[test]
    fn instance_kernel_follows_subcell_position() {
        let mut kernel = KernelSpec::gaussian(0.4);
        kernel.sampling = Sampling::Instance;
        let raster = Rasteriser::new(shape(), &ModeSpec::Splat { kernel, weight: AgentWeight::Unit })
            .expect("raster");
        let current = frame(&[(0.19, 0.19)]);
        let grid = raster
            .rasterise(&input(&current, None), &mut StatsAccumulator::new())
            .expect("grid");
        let here = grid.value_at(Vector2::new(0.19, 0.19)).expect("cell");
        let across = grid.value_at(Vector2::new(-0.19, -0.19)).expect("cell");
        assert!(here > across);
    }

    #[test]
    fn laplacian_sums_both_components() {
        let mode = ModeSpec::VelocityLaplacian {
            sigma: 0.4,
            velocity: VelocityInput::Recorded,
        };
        let raster = Rasteriser::new(shape(), &mode).expect("raster");
        let current: TrajectoryFrame = std::iter::once(AgentRecord {
            velocity: Vector2::new(1.0, 1.0),
            ..AgentRecord::at(Vector2::zero(), 0.0)
        })
        .collect();
        let grid = raster
            .rasterise(&input(&current, None), &mut StatsAccumulator::new())
            .expect("grid");
        let kernel = Kernel::new(
            RadialFunction::LaplacianOfGaussian { sigma: 0.4 },
            shape().cell_size(),
        )
        .expect("kernel");
        let centre = grid.value_at(Vector2::zero()).expect("cell");
        assert!((centre - 2.0 * kernel.min()).abs() < 1e-3 * kernel.min().abs());
    }

    #[test]
    fn missing_density_is_reported_up_front() {
        let mode = ModeSpec::DensityNormalised {
            kernel: KernelSpec::gaussian(0.5),
            weight: AgentWeight::Progress,
            density: std::env::temp_dir().join("crowdfield-no-such-density.grids"),
            divide_by_density: true,
        };
        assert!(matches!(
            Rasteriser::new(shape(), &mode),
            Err(RasterError::MissingDensity(_))
        ));
    }
}
