//! Dense grid stream: a 20-byte header followed by tightly packed payloads.
//!
//! The header holds the resolution `(R_x, R_y)` and grid count as `i32`, then
//! the global minimum and maximum as `f32`. Grid `i` starts at byte
//! `20 + i · R_x · R_y · 4`, so readers map payloads by offset.

use crate::StorageError;
use crate::codec::{count_to_i32, decode_f32s, get_count, get_f32, put_f32, put_i32, write_f32s};
use crowdfield_core::{AbstractGrid, CoreError, Grid};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const GRID_STREAM_HEADER_LEN: usize = 20;
const COUNT_OFFSET: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridStreamHeader {
    pub resolution: (usize, usize),
    pub grid_count: usize,
    pub min: f32,
    pub max: f32,
}

impl GridStreamHeader {
    /// Bytes per grid payload, or `None` when the resolution overflows.
    #[must_use]
    pub fn payload_len(&self) -> Option<usize> {
        self.resolution
            .0
            .checked_mul(self.resolution.1)?
            .checked_mul(4)
    }

    #[must_use]
    pub fn file_len(&self) -> Option<u64> {
        let payloads = u64::try_from(self.grid_count.checked_mul(self.payload_len()?)?).ok()?;
        payloads.checked_add(GRID_STREAM_HEADER_LEN as u64)
    }

    fn encode(&self) -> Result<Vec<u8>, StorageError> {
        let mut out = Vec::with_capacity(GRID_STREAM_HEADER_LEN);
        put_i32(&mut out, count_to_i32(self.resolution.0, "resolution exceeds i32")?);
        put_i32(&mut out, count_to_i32(self.resolution.1, "resolution exceeds i32")?);
        put_i32(&mut out, count_to_i32(self.grid_count, "grid count exceeds i32")?);
        put_f32(&mut out, self.min);
        put_f32(&mut out, self.max);
        Ok(out)
    }

    fn decode(bytes: &[u8], path: &Path) -> Result<Self, StorageError> {
        if bytes.len() < GRID_STREAM_HEADER_LEN {
            return Err(StorageError::format(
                path,
                bytes.len() as u64,
                "file ends inside the grid stream header",
            ));
        }
        Ok(Self {
            resolution: (
                get_count(bytes, 0, path, "x resolution")?,
                get_count(bytes, 4, path, "y resolution")?,
            ),
            grid_count: get_count(bytes, 8, path, "grid count")?,
            min: get_f32(bytes, 12).unwrap_or_default(),
            max: get_f32(bytes, 16).unwrap_or_default(),
        })
    }
}

/// Appends grids and patches the header on [`GridStreamWriter::finish`].
#[derive(Debug)]
pub struct GridStreamWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    resolution: (usize, usize),
    grids_written: usize,
    min: f32,
    max: f32,
}

impl GridStreamWriter {
    /// Create the file with a placeholder header.
    pub fn create(
        path: impl Into<PathBuf>,
        resolution: (usize, usize),
    ) -> Result<Self, StorageError> {
        if resolution.0 == 0 || resolution.1 == 0 {
            return Err(StorageError::InvalidConfig("grid resolution must be positive"));
        }
        let path = path.into();
        let placeholder = GridStreamHeader {
            resolution,
            grid_count: 0,
            min: 0.0,
            max: 0.0,
        }
        .encode()?;
        let file = File::create(&path).map_err(StorageError::io(&path))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&placeholder).map_err(StorageError::io(&path))?;
        Ok(Self {
            path,
            writer,
            resolution,
            grids_written: 0,
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn grids_written(&self) -> usize {
        self.grids_written
    }

    pub fn write_grid(&mut self, grid: &Grid) -> Result<(), StorageError> {
        if grid.shape().resolution() != self.resolution {
            return Err(CoreError::ShapeMismatch {
                expected: self.resolution.0 * self.resolution.1,
                found: grid.shape().cell_count(),
            }
            .into());
        }
        self.write_values(grid.cells())
    }

    /// Append one payload given as column-major values.
    pub fn write_values(&mut self, values: &[f32]) -> Result<(), StorageError> {
        let expected = self.resolution.0 * self.resolution.1;
        if values.len() != expected {
            return Err(CoreError::ShapeMismatch {
                expected,
                found: values.len(),
            }
            .into());
        }
        for &value in values.iter().filter(|v| v.is_finite()) {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        write_f32s(&mut self.writer, values).map_err(StorageError::io(&self.path))?;
        self.grids_written += 1;
        Ok(())
    }

    /// Patch count and global extrema into the header and close the file.
    pub fn finish(mut self) -> Result<GridStreamHeader, StorageError> {
        let (min, max) = if self.min <= self.max {
            (self.min, self.max)
        } else {
            (0.0, 0.0)
        };
        let header = GridStreamHeader {
            resolution: self.resolution,
            grid_count: self.grids_written,
            min,
            max,
        };
        let encoded = header.encode()?;
        self.writer
            .seek(SeekFrom::Start(COUNT_OFFSET))
            .map_err(StorageError::io(&self.path))?;
        self.writer
            .write_all(&encoded[COUNT_OFFSET as usize..])
            .map_err(StorageError::io(&self.path))?;
        self.writer.flush().map_err(StorageError::io(&self.path))?;
        info!(
            path = %self.path.display(),
            grids = header.grid_count,
            min = header.min,
            max = header.max,
            "finalised grid stream"
        );
        Ok(header)
    }
}

/// Memory-mapped, read-only view of a finished grid stream.
#[derive(Debug)]
pub struct GridStreamReader {
    path: PathBuf,
    mmap: Mmap,
    header: GridStreamHeader,
}

impl GridStreamReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let file = File::open(&path).map_err(StorageError::io(&path))?;
        // The file is treated as immutable once the writer has finished.
        let mmap = unsafe { Mmap::map(&file) }.map_err(StorageError::io(&path))?;
        let header = GridStreamHeader::decode(&mmap, &path)?;
        let expected = header.file_len().ok_or_else(|| {
            StorageError::format(&path, 0, "declared grid stream size overflows")
        })?;
        if mmap.len() as u64 != expected {
            return Err(StorageError::format(
                &path,
                mmap.len() as u64,
                format!(
                    "header declares {} grids ({expected} bytes); file holds {} bytes",
                    header.grid_count,
                    mmap.len()
                ),
            ));
        }
        debug!(
            path = %path.display(),
            grids = header.grid_count,
            rx = header.resolution.0,
            ry = header.resolution.1,
            "mapped grid stream"
        );
        Ok(Self { path, mmap, header })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn header(&self) -> &GridStreamHeader {
        &self.header
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.header.grid_count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.header.grid_count == 0
    }

    /// Raw little-endian bytes of grid `index`.
    #[must_use]
    pub fn payload(&self, index: usize) -> Option<&[u8]> {
        if index >= self.header.grid_count {
            return None;
        }
        // `open` checked that every payload fits inside the mapping.
        let len = self.header.payload_len()?;
        let start = GRID_STREAM_HEADER_LEN + index * len;
        self.mmap.get(start..start + len)
    }

    /// Column-major values of grid `index`.
    pub fn values(&self, index: usize) -> Result<Vec<f32>, StorageError> {
        self.payload(index)
            .map(decode_f32s)
            .ok_or(StorageError::FrameOutOfRange {
                index,
                count: self.header.grid_count,
            })
    }

    /// Grid `index` attached to `shape`, whose resolution must match the stream.
    pub fn grid(&self, index: usize, shape: AbstractGrid) -> Result<Grid, StorageError> {
        if shape.resolution() != self.header.resolution {
            return Err(StorageError::InvalidConfig(
                "grid shape resolution differs from the stream",
            ));
        }
        Ok(Grid::from_cells(shape, self.values(index)?)?)
    }
}
