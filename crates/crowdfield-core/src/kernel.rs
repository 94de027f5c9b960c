//! Odd-sized deposition kernels evaluated from radial functions.

use crate::CoreError;
use crate::geometry::Vector2;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use tracing::trace;

/// Kernel support expressed in multiples of the radial function's radius.
pub const SUPPORT_FACTOR: f32 = 6.0;
/// Smallest kernel edge, in cells.
pub const MIN_KERNEL_WIDTH: usize = 3;

/// Radial profile sampled by a kernel, evaluated on squared distance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RadialFunction {
    /// Same value everywhere in the footprint.
    Constant(f32),
    /// Peak-normalised Gaussian `exp(−r²/2σ²)`.
    Gaussian { sigma: f32 },
    /// Unit-integral density kernel `exp(−r²/R²) / πR²`.
    Density { radius: f32 },
    /// Laplacian of a unit-integral Gaussian.
    LaplacianOfGaussian { sigma: f32 },
}

impl RadialFunction {
    /// Characteristic radius used to size the kernel footprint.
    #[must_use]
    pub fn radius(&self) -> f32 {
        match *self {
            Self::Constant(_) => 0.0,
            Self::Gaussian { sigma } | Self::LaplacianOfGaussian { sigma } => sigma,
            Self::Density { radius } => radius,
        }
    }

    /// Evaluate at squared distance `r2`.
    #[must_use]
    pub fn evaluate(&self, r2: f32) -> f32 {
        match *self {
            Self::Constant(value) => value,
            Self::Gaussian { sigma } => (-r2 / (2.0 * sigma * sigma)).exp(),
            Self::Density { radius } => {
                let r_sq = radius * radius;
                (-r2 / r_sq).exp() / (PI * r_sq)
            }
            Self::LaplacianOfGaussian { sigma } => {
                let s2 = sigma * sigma;
                let gauss = (-r2 / (2.0 * s2)).exp() / (2.0 * PI * s2);
                gauss * (r2 - 2.0 * s2) / (s2 * s2)
            }
        }
    }
}

/// Smallest odd `k` with `k · cell_size ≥ 6 · radius`, never below three.
pub fn kernel_width(radius: f32, cell_size: f32) -> Result<usize, CoreError> {
    if !(radius > 0.0) || !radius.is_finite() {
        return Err(CoreError::InvalidConfig("kernel radius must be positive"));
    }
    if !(cell_size > 0.0) || !cell_size.is_finite() {
        return Err(CoreError::InvalidConfig("kernel cell size must be positive"));
    }
    // Tolerate rounding noise so an exact multiple does not grow by one cell.
    let cells = (SUPPORT_FACTOR * radius / cell_size - 1e-4).ceil().max(1.0) as usize;
    let odd = if cells % 2 == 0 { cells + 1 } else { cells };
    Ok(odd.max(MIN_KERNEL_WIDTH))
}

/// Dense `width × width` kernel samples stored column-major.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelBuffer {
    width: usize,
    values: Vec<f32>,
}

impl KernelBuffer {
    fn from_fn(width: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut values = Vec::with_capacity(width * width);
        for i in 0..width {
            for j in 0..width {
                values.push(f(i, j));
            }
        }
        Self { width, values }
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Index of the centre cell along either axis.
    #[must_use]
    pub const fn half_width(&self) -> usize {
        self.width / 2
    }

    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Samples with x offset index `i`.
    #[must_use]
    pub fn column(&self, i: usize) -> &[f32] {
        &self.values[i * self.width..(i + 1) * self.width]
    }

    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> Option<f32> {
        (i < self.width && j < self.width).then(|| self.values[i * self.width + j])
    }

    #[must_use]
    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    #[must_use]
    pub fn min(&self) -> f32 {
        self.values.iter().copied().fold(f32::INFINITY, f32::min)
    }

    #[must_use]
    pub fn sum(&self) -> f64 {
        self.values.iter().map(|&v| f64::from(v)).sum()
    }
}

fn offsets(width: usize, cell_size: Vector2) -> Vec<Vector2> {
    let half = (width / 2) as f32;
    let mut out = Vec::with_capacity(width * width);
    for i in 0..width {
        for j in 0..width {
            out.push(Vector2::new(
                (i as f32 - half) * cell_size.x,
                (j as f32 - half) * cell_size.y,
            ));
        }
    }
    out
}

fn check_width(width: usize) -> Result<(), CoreError> {
    if width == 0 || width % 2 == 0 {
        return Err(CoreError::InvalidConfig("kernel width must be odd"));
    }
    Ok(())
}

/// Kernel sampled once at cell-centre offsets around zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    function: RadialFunction,
    buffer: KernelBuffer,
}

impl Kernel {
    /// Size the footprint from the function radius and the x cell size.
    pub fn new(function: RadialFunction, cell_size: Vector2) -> Result<Self, CoreError> {
        let width = kernel_width(function.radius(), cell_size.x)?;
        Self::fixed(&function, cell_size, width)
    }

    /// Kernel with an explicit odd footprint.
    pub fn fixed(
        function: &RadialFunction,
        cell_size: Vector2,
        width: usize,
    ) -> Result<Self, CoreError> {
        check_width(width)?;
        let offsets = offsets(width, cell_size);
        let buffer = KernelBuffer::from_fn(width, |i, j| {
            function.evaluate(offsets[i * width + j].length_squared())
        });
        trace!(width, sum = buffer.sum(), "kernel sampled");
        Ok(Self {
            function: *function,
            buffer,
        })
    }

    #[must_use]
    pub const fn function(&self) -> &RadialFunction {
        &self.function
    }

    #[must_use]
    pub const fn buffer(&self) -> &KernelBuffer {
        &self.buffer
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.buffer.width()
    }

    #[must_use]
    pub fn max(&self) -> f32 {
        self.buffer.max()
    }

    #[must_use]
    pub fn min(&self) -> f32 {
        self.buffer.min()
    }

    #[must_use]
    pub fn sum(&self) -> f64 {
        self.buffer.sum()
    }
}

/// Position-dependent kernel: keeps the offset lattice and resamples the
/// function relative to the agent's sub-cell position on every call.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceKernel {
    function: RadialFunction,
    width: usize,
    offsets: Vec<Vector2>,
}

impl InstanceKernel {
    pub fn new(function: RadialFunction, cell_size: Vector2) -> Result<Self, CoreError> {
        let width = kernel_width(function.radius(), cell_size.x)?;
        Self::with_width(function, cell_size, width)
    }

    pub fn with_width(
        function: RadialFunction,
        cell_size: Vector2,
        width: usize,
    ) -> Result<Self, CoreError> {
        check_width(width)?;
        Ok(Self {
            function,
            width,
            offsets: offsets(width, cell_size),
        })
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub const fn function(&self) -> &RadialFunction {
        &self.function
    }

    /// Sample `f(|(kernel_centre + offset) − agent|²)` for every offset.
    #[must_use]
    pub fn evaluate(&self, kernel_centre: Vector2, agent: Vector2) -> KernelBuffer {
        let shift = kernel_centre - agent;
        let width = self.width;
        KernelBuffer::from_fn(width, |i, j| {
            self.function
                .evaluate((shift + self.offsets[i * width + j]).length_squared())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_is_smallest_odd_cover() {
        assert_eq!(kernel_width(1.5, 0.2).expect("width"), 45);
        assert_eq!(kernel_width(1.0, 0.5).expect("width"), 13);
        assert_eq!(kernel_width(0.01, 1.0).expect("width"), 3);
        assert!(kernel_width(0.0, 1.0).is_err());
        assert!(kernel_width(-1.0, 1.0).is_err());
    }

    #[test]
    fn gaussian_peaks_at_centre() {
        let kernel = Kernel::new(RadialFunction::Gaussian { sigma: 1.5 }, Vector2::new(0.2, 0.2))
            .expect("kernel");
        assert_eq!(kernel.width(), 45);
        let centre = kernel.buffer().half_width();
        assert_eq!(kernel.buffer().get(centre, centre), Some(1.0));
        assert_eq!(kernel.max(), 1.0);
        assert!(kernel.min() > 0.0);
        let analytic = 2.0 * std::f64::consts::PI * 1.5 * 1.5 / (0.2 * 0.2);
        assert!((kernel.sum() - analytic).abs() / analytic < 0.02);
    }

    #[test]
    fn density_kernel_integrates_to_one() {
        let cell = Vector2::new(0.1, 0.1);
        let kernel = Kernel::new(RadialFunction::Density { radius: 0.7 }, cell).expect("kernel");
        let integral = kernel.sum() * f64::from(cell.x * cell.y);
        assert!((integral - 1.0).abs() < 1e-2, "integral {integral}");
    }

    #[test]
    fn instance_kernel_tracks_subcell_offset() {
        let cell = Vector2::new(0.5, 0.5);
        let function = RadialFunction::Gaussian { sigma: 0.5 };
        let instance = InstanceKernel::new(function, cell).expect("kernel");
        let fixed = Kernel::new(function, cell).expect("kernel");
        let centred = instance.evaluate(Vector2::new(1.0, 1.0), Vector2::new(1.0, 1.0));
        assert_eq!(&centred, fixed.buffer());

        let shifted = instance.evaluate(Vector2::new(1.0, 1.0), Vector2::new(1.2, 1.0));
        let half = shifted.half_width();
        let right = shifted.get(half + 1, half).expect("cell");
        let left = shifted.get(half - 1, half).expect("cell");
        assert!(right > left);
    }

    #[test]
    fn even_width_is_rejected() {
        let err = Kernel::fixed(&RadialFunction::Constant(1.0), Vector2::new(1.0, 1.0), 4);
        assert!(err.is_err());
    }
}
