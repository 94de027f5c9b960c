//! Little-endian scalar helpers shared by every binary format in the crate.

use crate::StorageError;
use std::io::{self, Write};
use std::path::Path;

pub(crate) fn put_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_f32(out: &mut Vec<u8>, value: f32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn get_i32(bytes: &[u8], offset: usize) -> Option<i32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

pub(crate) fn get_f32(bytes: &[u8], offset: usize) -> Option<f32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

pub(crate) fn decode_f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub(crate) fn write_f32s<W: Write>(writer: &mut W, values: &[f32]) -> io::Result<()> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        put_f32(&mut bytes, *value);
    }
    writer.write_all(&bytes)
}

/// Read a non-negative count stored as `i32`.
pub(crate) fn get_count(
    bytes: &[u8],
    offset: usize,
    path: &Path,
    what: &str,
) -> Result<usize, StorageError> {
    let raw = get_i32(bytes, offset).ok_or_else(|| {
        StorageError::format(path, offset as u64, format!("header ends before {what}"))
    })?;
    usize::try_from(raw)
        .map_err(|_| StorageError::format(path, offset as u64, format!("negative {what}: {raw}")))
}

/// Convert a count to the on-disk `i32`, rejecting values that do not fit.
pub(crate) fn count_to_i32(value: usize, what: &'static str) -> Result<i32, StorageError> {
    i32::try_from(value).map_err(|_| StorageError::InvalidConfig(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_round_trip() {
        let mut bytes = Vec::new();
        put_i32(&mut bytes, -7);
        put_f32(&mut bytes, 1.5);
        assert_eq!(get_i32(&bytes, 0), Some(-7));
        assert_eq!(get_f32(&bytes, 4), Some(1.5));
        assert_eq!(get_f32(&bytes, 6), None);
    }

    #[test]
    fn negative_counts_are_format_errors() {
        let mut bytes = Vec::new();
        put_i32(&mut bytes, -1);
        let err = get_count(&bytes, 0, Path::new("x.bin"), "agent count").expect_err("negative");
        assert!(err.to_string().contains("negative agent count"));
    }
}
