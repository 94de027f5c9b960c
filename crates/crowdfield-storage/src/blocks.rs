//! Shared plumbing for side files made of an `i32` header and fixed-size
//! `f32` blocks, one per frame. One header slot holds the block count and is
//! patched when the writer finishes.

use crate::StorageError;
use crate::codec::{decode_f32s, get_count, put_i32, write_f32s};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub(crate) struct BlockWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    count_slot: usize,
    block_len: usize,
    blocks: usize,
}

impl BlockWriter {
    pub(crate) fn create(
        path: PathBuf,
        header: &[i32],
        count_slot: usize,
        block_len: usize,
    ) -> Result<Self, StorageError> {
        let mut encoded = Vec::with_capacity(header.len() * 4);
        for value in header {
            put_i32(&mut encoded, *value);
        }
        let file = File::create(&path).map_err(StorageError::io(&path))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&encoded).map_err(StorageError::io(&path))?;
        Ok(Self {
            path,
            writer,
            count_slot,
            block_len,
            blocks: 0,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) const fn blocks(&self) -> usize {
        self.blocks
    }

    pub(crate) fn write_block(&mut self, values: &[f32]) -> Result<(), StorageError> {
        if values.len() != self.block_len {
            return Err(StorageError::AgentCountMismatch {
                frame: self.blocks,
                expected: self.block_len,
                found: values.len(),
            });
        }
        write_f32s(&mut self.writer, values).map_err(StorageError::io(&self.path))?;
        self.blocks += 1;
        Ok(())
    }

    pub(crate) fn finish(mut self) -> Result<usize, StorageError> {
        let count = i32::try_from(self.blocks)
            .map_err(|_| StorageError::InvalidConfig("frame count exceeds i32"))?;
        self.writer
            .seek(SeekFrom::Start((self.count_slot * 4) as u64))
            .map_err(StorageError::io(&self.path))?;
        self.writer
            .write_all(&count.to_le_bytes())
            .map_err(StorageError::io(&self.path))?;
        self.writer.flush().map_err(StorageError::io(&self.path))?;
        Ok(self.blocks)
    }
}

#[derive(Debug)]
pub(crate) struct BlockReader {
    path: PathBuf,
    file: BufReader<File>,
    header: Vec<usize>,
    block_len: usize,
    count: usize,
    cursor: usize,
    scratch: Vec<u8>,
}

impl BlockReader {
    /// Open a file whose header has `header_len` counts; `block_len` derives
    /// the floats per block from them (`None` on overflow) and `count_slot`
    /// names the block count.
    pub(crate) fn open(
        path: PathBuf,
        header_len: usize,
        count_slot: usize,
        block_len: impl Fn(&[usize]) -> Option<usize>,
    ) -> Result<Self, StorageError> {
        let file = File::open(&path).map_err(StorageError::io(&path))?;
        let file_len = file.metadata().map_err(StorageError::io(&path))?.len();
        let mut file = BufReader::new(file);
        let mut raw = vec![0u8; header_len * 4];
        file.read_exact(&mut raw).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                StorageError::format(&path, 0, "file ends inside the header")
            } else {
                StorageError::io(&path)(err)
            }
        })?;
        let header = (0..header_len)
            .map(|slot| get_count(&raw, slot * 4, &path, "header field"))
            .collect::<Result<Vec<_>, _>>()?;
        let count = header[count_slot];
        let sizes = block_len(&header).and_then(|block_len| {
            let payload = count.checked_mul(block_len)?.checked_mul(4)?;
            let expected = u64::try_from(payload.checked_add(header_len * 4)?).ok()?;
            Some((block_len, expected))
        });
        let Some((block_len, expected)) = sizes else {
            return Err(StorageError::format(&path, 0, "declared block sizes overflow"));
        };
        if file_len != expected {
            return Err(StorageError::format(
                &path,
                file_len,
                format!("header declares {count} frames ({expected} bytes); file holds {file_len}"),
            ));
        }
        Ok(Self {
            path,
            file,
            header,
            block_len,
            count,
            cursor: 0,
            scratch: vec![0; block_len * 4],
        })
    }

    pub(crate) fn header(&self) -> &[usize] {
        &self.header
    }

    pub(crate) const fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn read_block(&mut self, index: usize) -> Result<Vec<f32>, StorageError> {
        if index >= self.count {
            return Err(StorageError::FrameOutOfRange {
                index,
                count: self.count,
            });
        }
        if index != self.cursor {
            // Bounded by the file length validated in `open`.
            let offset = (self.header.len() * 4 + index * self.block_len * 4) as u64;
            self.file
                .seek(SeekFrom::Start(offset))
                .map_err(StorageError::io(&self.path))?;
            self.cursor = index;
        }
        self.file
            .read_exact(&mut self.scratch)
            .map_err(StorageError::io(&self.path))?;
        self.cursor += 1;
        Ok(decode_f32s(&self.scratch))
    }

    pub(crate) fn next_block(&mut self) -> Result<Option<Vec<f32>>, StorageError> {
        if self.cursor >= self.count {
            return Ok(None);
        }
        self.read_block(self.cursor).map(Some)
    }
}
