//! World-to-cell mapping and dense scalar grids.

use crate::CoreError;
use crate::geometry::Vector2;
use crate::kernel::KernelBuffer;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Integer cell coordinates; may lie outside the grid.
pub type CellIndex = (i64, i64);

/// Axis-aligned region of the plane divided into `resolution` cells.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AbstractGrid {
    min_corner: Vector2,
    size: Vector2,
    resolution: (usize, usize),
    cell_size: Vector2,
}

impl AbstractGrid {
    /// Construct a grid from its extent and cell counts.
    pub fn new(
        min_corner: Vector2,
        size: Vector2,
        resolution: (usize, usize),
    ) -> Result<Self, CoreError> {
        if !(size.x > 0.0 && size.y > 0.0) || !size.is_finite() {
            return Err(CoreError::InvalidConfig("grid size must be positive"));
        }
        if resolution.0 == 0 || resolution.1 == 0 {
            return Err(CoreError::InvalidConfig("grid resolution must be positive"));
        }
        if !min_corner.is_finite() {
            return Err(CoreError::InvalidConfig("grid corner must be finite"));
        }
        let cell_size = Vector2::new(size.x / resolution.0 as f32, size.y / resolution.1 as f32);
        Ok(Self {
            min_corner,
            size,
            resolution,
            cell_size,
        })
    }

    /// Derive the resolution from a square cell edge length.
    pub fn with_cell_size(
        min_corner: Vector2,
        size: Vector2,
        cell_size: f32,
    ) -> Result<Self, CoreError> {
        if !(cell_size > 0.0) || !cell_size.is_finite() {
            return Err(CoreError::InvalidConfig("cell size must be positive"));
        }
        let cells = |extent: f32| ((extent / cell_size).round() as usize).max(1);
        Self::new(min_corner, size, (cells(size.x), cells(size.y)))
    }

    /// Grid of `size` centred on `center`.
    pub fn centered(
        center: Vector2,
        size: Vector2,
        resolution: (usize, usize),
    ) -> Result<Self, CoreError> {
        Self::new(center - size * 0.5, size, resolution)
    }

    #[must_use]
    pub const fn min_corner(&self) -> Vector2 {
        self.min_corner
    }

    #[must_use]
    pub const fn size(&self) -> Vector2 {
        self.size
    }

    #[must_use]
    pub const fn resolution(&self) -> (usize, usize) {
        self.resolution
    }

    #[must_use]
    pub const fn cell_size(&self) -> Vector2 {
        self.cell_size
    }

    #[must_use]
    pub const fn cell_count(&self) -> usize {
        self.resolution.0 * self.resolution.1
    }

    /// Cell containing `p`: `⌊(p − min_corner) / cell_size⌋`. Non-finite
    /// coordinates snap to `i64::MIN`, which lies outside every grid.
    #[must_use]
    pub fn get_center(&self, p: Vector2) -> CellIndex {
        let local = (p - self.min_corner).div_elem(self.cell_size);
        let snap = |v: f32| if v.is_finite() { v.floor() as i64 } else { i64::MIN };
        (snap(local.x), snap(local.y))
    }

    /// World position of the centre of cell `(x, y)`.
    #[must_use]
    pub fn cell_center(&self, cell: CellIndex) -> Vector2 {
        Vector2::new(
            self.min_corner.x + (cell.0 as f32 + 0.5) * self.cell_size.x,
            self.min_corner.y + (cell.1 as f32 + 0.5) * self.cell_size.y,
        )
    }

    #[must_use]
    pub fn contains_cell(&self, cell: CellIndex) -> bool {
        cell.0 >= 0
            && cell.1 >= 0
            && (cell.0 as usize) < self.resolution.0
            && (cell.1 as usize) < self.resolution.1
    }

    /// Column-major offset of an in-range cell.
    #[inline]
    #[must_use]
    pub fn offset(&self, x: usize, y: usize) -> usize {
        x * self.resolution.1 + y
    }

    /// Clip a `width × width` window centred on `cell` against the grid.
    #[must_use]
    pub fn clip_window(&self, cell: CellIndex, width: usize) -> Option<ClippedWindow> {
        let half = (width / 2) as i64;
        let clip = |center: i64, extent: usize| -> Option<(usize, usize, usize)> {
            let extent = i64::try_from(extent).ok()?;
            if center < -half || center >= extent.saturating_add(half) {
                return None;
            }
            let lo = center - half;
            let hi = center + half + 1;
            let lo_clipped = lo.max(0);
            let hi_clipped = hi.min(extent);
            if lo_clipped >= hi_clipped {
                return None;
            }
            let kernel_lo = (lo_clipped - lo) as usize;
            Some((lo_clipped as usize, hi_clipped as usize, kernel_lo))
        };
        let (left, right, kernel_left) = clip(cell.0, self.resolution.0)?;
        let (bottom, top, kernel_bottom) = clip(cell.1, self.resolution.1)?;
        Some(ClippedWindow {
            left,
            right,
            bottom,
            top,
            kernel_left,
            kernel_bottom,
        })
    }
}

/// Overlap between a kernel footprint and the grid. Grid cells `[left, right) ×
/// [bottom, top)` line up with kernel cells starting at `(kernel_left,
/// kernel_bottom)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClippedWindow {
    pub left: usize,
    pub right: usize,
    pub bottom: usize,
    pub top: usize,
    pub kernel_left: usize,
    pub kernel_bottom: usize,
}

impl ClippedWindow {
    #[must_use]
    pub fn width(&self) -> usize {
        self.right - self.left
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.top - self.bottom
    }
}

/// One frame's dense scalar buffer, stored column-major as `cells[x, y]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    shape: AbstractGrid,
    fill: f32,
    cells: Vec<f32>,
}

impl Grid {
    #[must_use]
    pub fn new(shape: AbstractGrid, fill: f32) -> Self {
        Self {
            cells: vec![fill; shape.cell_count()],
            shape,
            fill,
        }
    }

    /// Wrap an existing column-major buffer.
    pub fn from_cells(shape: AbstractGrid, cells: Vec<f32>) -> Result<Self, CoreError> {
        if cells.len() != shape.cell_count() {
            return Err(CoreError::ShapeMismatch {
                expected: shape.cell_count(),
                found: cells.len(),
            });
        }
        Ok(Self {
            shape,
            fill: 0.0,
            cells,
        })
    }

    #[must_use]
    pub const fn shape(&self) -> &AbstractGrid {
        &self.shape
    }

    #[must_use]
    pub fn cells(&self) -> &[f32] {
        &self.cells
    }

    #[must_use]
    pub fn cells_mut(&mut self) -> &mut [f32] {
        &mut self.cells
    }

    #[must_use]
    pub fn into_cells(self) -> Vec<f32> {
        self.cells
    }

    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        let (rx, ry) = self.shape.resolution();
        (x < rx && y < ry).then(|| self.cells[self.shape.offset(x, y)])
    }

    pub fn get_mut(&mut self, x: usize, y: usize) -> Option<&mut f32> {
        let (rx, ry) = self.shape.resolution();
        if x < rx && y < ry {
            let idx = self.shape.offset(x, y);
            Some(&mut self.cells[idx])
        } else {
            None
        }
    }

    /// Value of the cell containing the world position `p`.
    pub fn value_at(&self, p: Vector2) -> Option<f32> {
        let cell = self.shape.get_center(p);
        if !self.shape.contains_cell(cell) {
            return None;
        }
        self.get(cell.0 as usize, cell.1 as usize)
    }

    /// Reset every cell to the initial fill value.
    pub fn clear(&mut self) {
        self.cells.fill(self.fill);
    }

    pub fn fill(&mut self, value: f32) {
        self.cells.fill(value);
    }

    pub fn multiply(&mut self, factor: f32) {
        for cell in &mut self.cells {
            *cell *= factor;
        }
    }

    pub fn divide(&mut self, divisor: f32) {
        for cell in &mut self.cells {
            *cell /= divisor;
        }
    }

    #[must_use]
    pub fn min(&self) -> f32 {
        self.cells.iter().copied().fold(f32::INFINITY, f32::min)
    }

    #[must_use]
    pub fn max(&self) -> f32 {
        self.cells.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    #[must_use]
    pub fn sum(&self) -> f64 {
        self.cells.iter().map(|&v| f64::from(v)).sum()
    }

    /// Replace every cell equal to `from` with `to`.
    pub fn swap_value(&mut self, from: f32, to: f32) {
        for cell in &mut self.cells {
            if *cell == from || (from.is_nan() && cell.is_nan()) {
                *cell = to;
            }
        }
    }

    /// Element-wise `self += other`.
    pub fn add_grid(&mut self, other: &Grid) -> Result<(), CoreError> {
        self.check_shape(other)?;
        for (cell, value) in self.cells.iter_mut().zip(&other.cells) {
            *cell += value;
        }
        Ok(())
    }

    /// Element-wise `self /= divisor`, substituting one for zero divisors.
    pub fn divide_by_grid(&mut self, divisor: &Grid) -> Result<(), CoreError> {
        self.check_shape(divisor)?;
        for (cell, &value) in self.cells.iter_mut().zip(&divisor.cells) {
            *cell /= if value == 0.0 { 1.0 } else { value };
        }
        Ok(())
    }

    /// Accumulate `kernel · weight` over the clipped footprint centred on `cell`.
    /// A footprint with no overlap is a no-op.
    pub fn deposit(&mut self, cell: CellIndex, kernel: &KernelBuffer, weight: f32) {
        let Some(window) = self.shape.clip_window(cell, kernel.width()) else {
            return;
        };
        for dx in 0..window.width() {
            let x = window.left + dx;
            let kx = window.kernel_left + dx;
            let row = self.shape.offset(x, window.bottom);
            let kernel_column = kernel.column(kx);
            let target = &mut self.cells[row..row + window.height()];
            let source = &kernel_column[window.kernel_bottom..window.kernel_bottom + window.height()];
            for (cell, k) in target.iter_mut().zip(source) {
                *cell += k * weight;
            }
        }
    }

    /// Overwrite a `width × width` block centred on `cell` with `value`.
    pub fn blit(&mut self, cell: CellIndex, width: usize, value: f32) {
        let Some(window) = self.shape.clip_window(cell, width) else {
            return;
        };
        for x in window.left..window.right {
            let row = self.shape.offset(x, window.bottom);
            self.cells[row..row + window.height()].fill(value);
        }
    }

    /// Serialised size of one grid payload in bytes.
    #[must_use]
    pub fn payload_len(shape: &AbstractGrid) -> usize {
        shape.cell_count() * std::mem::size_of::<f32>()
    }

    /// Write the buffer as little-endian `f32` in column-major order.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let mut bytes = Vec::with_capacity(self.cells.len() * 4);
        for value in &self.cells {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        writer.write_all(&bytes)
    }

    /// Decode a payload written by [`Grid::write_to`].
    pub fn from_le_bytes(shape: AbstractGrid, bytes: &[u8]) -> Result<Self, CoreError> {
        let expected = Self::payload_len(&shape);
        if bytes.len() != expected {
            return Err(CoreError::Truncated {
                expected,
                found: bytes.len(),
            });
        }
        let cells = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Self::from_cells(shape, cells)
    }

    /// Read one payload from `reader`.
    pub fn read_from<R: Read>(shape: AbstractGrid, reader: &mut R) -> Result<Self, CoreError> {
        let mut bytes = vec![0u8; Self::payload_len(&shape)];
        reader.read_exact(&mut bytes)?;
        Self::from_le_bytes(shape, &bytes)
    }

    fn check_shape(&self, other: &Grid) -> Result<(), CoreError> {
        if self.shape.resolution() != other.shape.resolution() {
            return Err(CoreError::ShapeMismatch {
                expected: self.cells.len(),
                found: other.cells.len(),
            });
        }
        Ok(())
    }
}
