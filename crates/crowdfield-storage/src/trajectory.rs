//! Versioned binary trajectory container.
//!
//! Layout (little-endian): a four byte version tag (`"1.0\0"` … `"2.3\0"`), an
//! `i32` agent count `N`, and for every `2.x` revision an `f32` time step
//! followed by `N` `i32` class tags. Frames follow back to back, each holding
//! `N` fixed-width agent payloads.

use crate::StorageError;
use crate::codec::{count_to_i32, get_count, get_f32, get_i32, put_f32, put_i32};
use crowdfield_core::{AgentRecord, Orientation, TrajectoryFrame, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Time step assumed for `1.0` stores, which do not record one.
pub const DEFAULT_TIME_STEP: f32 = 0.1;

const TAG_LEN: usize = 4;
const BASE_HEADER_LEN: usize = 8;

/// The five supported revisions of the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "2.0")]
    V2_0,
    #[serde(rename = "2.1")]
    V2_1,
    #[serde(rename = "2.2")]
    V2_2,
    #[serde(rename = "2.3")]
    V2_3,
}

impl StoreVersion {
    pub const ALL: [Self; 5] = [Self::V1_0, Self::V2_0, Self::V2_1, Self::V2_2, Self::V2_3];

    #[must_use]
    pub const fn tag(self) -> &'static [u8; TAG_LEN] {
        match self {
            Self::V1_0 => b"1.0\0",
            Self::V2_0 => b"2.0\0",
            Self::V2_1 => b"2.1\0",
            Self::V2_2 => b"2.2\0",
            Self::V2_3 => b"2.3\0",
        }
    }

    #[must_use]
    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|version| version.tag().as_slice() == tag)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V2_0 => "2.0",
            Self::V2_1 => "2.1",
            Self::V2_2 => "2.2",
            Self::V2_3 => "2.3",
        }
    }

    /// Bytes per agent per frame.
    #[must_use]
    pub const fn payload_width(self) -> usize {
        match self {
            Self::V1_0 | Self::V2_0 => 12,
            Self::V2_1 | Self::V2_3 => 16,
            Self::V2_2 => 32,
        }
    }

    /// Whether the header carries a time step and class tags.
    #[must_use]
    pub const fn has_extended_header(self) -> bool {
        !matches!(self, Self::V1_0)
    }

    #[must_use]
    pub const fn has_state(self) -> bool {
        matches!(self, Self::V2_1 | Self::V2_2)
    }

    #[must_use]
    pub const fn has_velocities(self) -> bool {
        matches!(self, Self::V2_2)
    }

    fn encode_agent(self, agent: &AgentRecord, out: &mut Vec<u8>) {
        put_f32(out, agent.position.x);
        put_f32(out, agent.position.y);
        match self {
            Self::V2_3 => {
                let dir = match agent.orientation {
                    Orientation::Direction(dir) => dir,
                    Orientation::Angle(theta) => Vector2::from_angle(theta),
                };
                put_f32(out, dir.x);
                put_f32(out, dir.y);
            }
            _ => put_f32(out, agent.orientation.angle()),
        }
        if self.has_state() {
            put_f32(out, agent.state);
        }
        if self.has_velocities() {
            put_f32(out, agent.preferred_velocity.x);
            put_f32(out, agent.preferred_velocity.y);
            put_f32(out, agent.velocity.x);
            put_f32(out, agent.velocity.y);
        }
    }

    fn decode_agent(self, bytes: &[u8]) -> AgentRecord {
        let lane = |i: usize| get_f32(bytes, i * 4).unwrap_or_default();
        let position = Vector2::new(lane(0), lane(1));
        match self {
            Self::V1_0 | Self::V2_0 => AgentRecord::at(position, lane(2)),
            Self::V2_1 => AgentRecord {
                state: lane(3),
                ..AgentRecord::at(position, lane(2))
            },
            Self::V2_2 => AgentRecord {
                state: lane(3),
                preferred_velocity: Vector2::new(lane(4), lane(5)),
                velocity: Vector2::new(lane(6), lane(7)),
                ..AgentRecord::at(position, lane(2))
            },
            Self::V2_3 => AgentRecord {
                position,
                orientation: Orientation::Direction(Vector2::new(lane(2), lane(3))),
                ..AgentRecord::default()
            },
        }
    }
}

impl fmt::Display for StoreVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StoreVersion {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|version| version.label() == s)
            .ok_or(StorageError::InvalidConfig("unknown trajectory version"))
    }
}

/// Decoded file header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrajectoryHeader {
    pub version: StoreVersion,
    pub agent_count: usize,
    pub time_step: f32,
    /// One class tag per agent; all zero for `1.0` stores.
    pub class_tags: Vec<i32>,
}

impl TrajectoryHeader {
    #[must_use]
    pub fn new(version: StoreVersion, agent_count: usize, time_step: f32) -> Self {
        Self {
            version,
            agent_count,
            time_step,
            class_tags: vec![0; agent_count],
        }
    }

    pub fn with_class_tags(mut self, class_tags: Vec<i32>) -> Result<Self, StorageError> {
        if class_tags.len() != self.agent_count {
            return Err(StorageError::InvalidConfig(
                "class tag count must equal the agent count",
            ));
        }
        self.class_tags = class_tags;
        Ok(self)
    }

    /// Size of the encoded header in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        let base = BASE_HEADER_LEN as u64;
        if self.version.has_extended_header() {
            base + 4 + 4 * self.agent_count as u64
        } else {
            base
        }
    }

    /// Bytes per frame.
    #[must_use]
    pub fn frame_bytes(&self) -> u64 {
        self.agent_count as u64 * self.version.payload_width() as u64
    }

    #[must_use]
    pub fn frame_offset(&self, index: usize) -> u64 {
        self.encoded_len() + index as u64 * self.frame_bytes()
    }

    /// Expected file length for `frames` frames.
    #[must_use]
    pub fn file_len(&self, frames: usize) -> u64 {
        self.frame_offset(frames)
    }

    fn validate(&self) -> Result<(), StorageError> {
        if self.class_tags.len() != self.agent_count {
            return Err(StorageError::InvalidConfig(
                "class tag count must equal the agent count",
            ));
        }
        if self.version.has_extended_header() && !(self.time_step.is_finite()) {
            return Err(StorageError::InvalidConfig("time step must be finite"));
        }
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>, StorageError> {
        self.validate()?;
        let mut out = Vec::with_capacity(self.encoded_len() as usize);
        out.extend_from_slice(self.version.tag());
        put_i32(&mut out, count_to_i32(self.agent_count, "agent count exceeds i32")?);
        if self.version.has_extended_header() {
            put_f32(&mut out, self.time_step);
            for tag in &self.class_tags {
                put_i32(&mut out, *tag);
            }
        }
        Ok(out)
    }

    /// Decode the header, rejecting declared sizes larger than `file_len`
    /// before anything is allocated for them.
    fn read_from<R: Read>(reader: &mut R, path: &Path, file_len: u64) -> Result<Self, StorageError> {
        let mut base = [0u8; BASE_HEADER_LEN];
        read_header_bytes(reader, &mut base, path, 0)?;
        let version = StoreVersion::from_tag(&base[..TAG_LEN]).ok_or_else(|| {
            StorageError::format(
                path,
                0,
                format!(
                    "unrecognised version tag {:?}",
                    String::from_utf8_lossy(&base[..TAG_LEN])
                ),
            )
        })?;
        let agent_count = get_count(&base, TAG_LEN, path, "agent count")?;
        if !version.has_extended_header() {
            return Ok(Self::new(version, agent_count, DEFAULT_TIME_STEP));
        }

        let declared = BASE_HEADER_LEN as u64 + 4 + 4 * agent_count as u64;
        if declared > file_len {
            return Err(StorageError::format(
                path,
                file_len,
                format!("header declares {agent_count} agents ({declared} bytes); file holds {file_len}"),
            ));
        }
        let mut extended = vec![0u8; 4 + 4 * agent_count];
        read_header_bytes(reader, &mut extended, path, BASE_HEADER_LEN as u64)?;
        let time_step = get_f32(&extended, 0).unwrap_or(DEFAULT_TIME_STEP);
        let class_tags = (0..agent_count)
            .map(|i| get_i32(&extended, 4 + 4 * i).unwrap_or_default())
            .collect();
        Ok(Self {
            version,
            agent_count,
            time_step,
            class_tags,
        })
    }

    /// One-line human readable description.
    #[must_use]
    pub fn summary(&self, frame_count: usize) -> String {
        format!(
            "version {} | {} agents | {} frames | dt {:.4} s | {} B/frame",
            self.version,
            self.agent_count,
            frame_count,
            self.time_step,
            self.frame_bytes()
        )
    }

    fn encode_frame(&self, frame: &TrajectoryFrame, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(self.frame_bytes() as usize);
        for agent in frame.agents() {
            self.version.encode_agent(&agent, out);
        }
    }

    fn decode_frame(&self, bytes: &[u8]) -> TrajectoryFrame {
        let width = self.version.payload_width();
        bytes
            .chunks_exact(width)
            .map(|chunk| self.version.decode_agent(chunk))
            .collect()
    }
}

fn read_header_bytes<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    path: &Path,
    offset: u64,
) -> Result<(), StorageError> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            StorageError::format(path, offset, "file ends inside the header")
        } else {
            StorageError::Io {
                path: path.to_path_buf(),
                source: err,
            }
        }
    })
}

/// Frame range and sub-sampling applied when reading a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadWindow {
    /// First frame read.
    pub start: usize,
    /// One past the last frame; `None` reads to the end.
    pub end: Option<usize>,
    pub frame_stride: usize,
    pub agent_stride: usize,
}

impl Default for ReadWindow {
    fn default() -> Self {
        Self {
            start: 0,
            end: None,
            frame_stride: 1,
            agent_stride: 1,
        }
    }
}

impl ReadWindow {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.frame_stride == 0 || self.agent_stride == 0 {
            return Err(StorageError::InvalidConfig("strides must be positive"));
        }
        Ok(())
    }

    /// Frame indices selected from a store holding `frame_count` frames.
    #[must_use]
    pub fn indices(&self, frame_count: usize) -> Vec<usize> {
        let end = self.end.map_or(frame_count, |end| end.min(frame_count));
        (self.start.min(end)..end)
            .step_by(self.frame_stride.max(1))
            .collect()
    }

    /// Agents kept out of `agent_count`.
    #[must_use]
    pub fn agent_count(&self, agent_count: usize) -> usize {
        agent_count.div_ceil(self.agent_stride.max(1))
    }

    fn apply_agents(&self, frame: TrajectoryFrame) -> TrajectoryFrame {
        if self.agent_stride > 1 {
            frame.strided(self.agent_stride)
        } else {
            frame
        }
    }

    /// Header describing the sub-sampled stream.
    #[must_use]
    pub fn derive_header(&self, header: &TrajectoryHeader) -> TrajectoryHeader {
        let class_tags: Vec<i32> = header
            .class_tags
            .iter()
            .copied()
            .step_by(self.agent_stride.max(1))
            .collect();
        TrajectoryHeader {
            version: header.version,
            agent_count: class_tags.len(),
            time_step: header.time_step * self.frame_stride.max(1) as f32,
            class_tags,
        }
    }
}

struct OpenStore {
    file: BufReader<File>,
    header: TrajectoryHeader,
    frame_count: usize,
    cursor: usize,
    scratch: Vec<u8>,
}

impl OpenStore {
    fn open(path: &Path) -> Result<Self, StorageError> {
        let file = File::open(path).map_err(StorageError::io(path))?;
        let file_len = file.metadata().map_err(StorageError::io(path))?.len();
        let mut file = BufReader::new(file);
        let header = TrajectoryHeader::read_from(&mut file, path, file_len)?;

        let header_len = header.encoded_len();
        if file_len < header_len {
            return Err(StorageError::format(path, file_len, "file ends inside the header"));
        }
        let payload = file_len - header_len;
        let frame_bytes = header.frame_bytes();
        let frame_count = if frame_bytes == 0 {
            if payload != 0 {
                return Err(StorageError::format(
                    path,
                    header_len,
                    "frame payload present in a store without agents",
                ));
            }
            0
        } else {
            if payload % frame_bytes != 0 {
                let whole = payload / frame_bytes;
                return Err(StorageError::format(
                    path,
                    header.frame_offset(whole as usize),
                    format!(
                        "payload of {payload} bytes is not a multiple of the {frame_bytes} byte frame"
                    ),
                ));
            }
            (payload / frame_bytes) as usize
        };

        debug!(
            path = %path.display(),
            version = %header.version,
            agents = header.agent_count,
            frames = frame_count,
            "opened trajectory store"
        );
        Ok(Self {
            file,
            scratch: vec![0; frame_bytes as usize],
            header,
            frame_count,
            cursor: 0,
        })
    }

    fn seek(&mut self, path: &Path, index: usize) -> Result<(), StorageError> {
        if self.cursor != index {
            let offset = self.header.frame_offset(index);
            self.file
                .seek(SeekFrom::Start(offset))
                .map_err(StorageError::io(path))?;
            self.cursor = index;
        }
        Ok(())
    }

    /// Read the frame under the cursor. A short read ends the stream.
    fn read_next(&mut self, path: &Path) -> Result<Option<TrajectoryFrame>, StorageError> {
        if self.cursor >= self.frame_count {
            return Ok(None);
        }
        match self.file.read_exact(&mut self.scratch) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                debug!(path = %path.display(), frame = self.cursor, "short read; end of stream");
                self.frame_count = self.cursor;
                return Ok(None);
            }
            Err(err) => return Err(StorageError::io(path)(err)),
        }
        self.cursor += 1;
        Ok(Some(self.header.decode_frame(&self.scratch)))
    }
}

/// Random-access reader. The file is opened on the first call that needs it.
pub struct TrajectoryReader {
    path: PathBuf,
    store: Option<OpenStore>,
}

impl fmt::Debug for TrajectoryReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrajectoryReader")
            .field("path", &self.path)
            .field("open", &self.store.is_some())
            .finish()
    }
}

impl TrajectoryReader {
    /// Create a reader without touching the file system.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            store: None,
        }
    }

    /// Create a reader and validate the header immediately.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let mut reader = Self::new(path);
        reader.store()?;
        Ok(reader)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.store.is_some()
    }

    fn store(&mut self) -> Result<&mut OpenStore, StorageError> {
        match self.store {
            Some(ref mut store) => Ok(store),
            None => {
                let store = OpenStore::open(&self.path)?;
                Ok(self.store.insert(store))
            }
        }
    }

    pub fn header(&mut self) -> Result<&TrajectoryHeader, StorageError> {
        Ok(&self.store()?.header)
    }

    pub fn frame_count(&mut self) -> Result<usize, StorageError> {
        Ok(self.store()?.frame_count)
    }

    /// Read frame `index`, seeking only when the cursor is elsewhere.
    pub fn read_frame(&mut self, index: usize) -> Result<TrajectoryFrame, StorageError> {
        let path = self.path.clone();
        let store = self.store()?;
        if index >= store.frame_count {
            return Err(StorageError::FrameOutOfRange {
                index,
                count: store.frame_count,
            });
        }
        store.seek(&path, index)?;
        store.read_next(&path)?.ok_or(StorageError::FrameOutOfRange {
            index,
            count: store.frame_count,
        })
    }

    /// Sequential read from the current cursor; `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<TrajectoryFrame>, StorageError> {
        let path = self.path.clone();
        self.store()?.read_next(&path)
    }

    /// Position the sequential cursor on frame `index`.
    pub fn seek_frame(&mut self, index: usize) -> Result<(), StorageError> {
        let path = self.path.clone();
        let store = self.store()?;
        if index > store.frame_count {
            return Err(StorageError::FrameOutOfRange {
                index,
                count: store.frame_count,
            });
        }
        store.seek(&path, index)
    }

    /// Forward iteration over the selected frames.
    pub fn frames(&mut self, window: ReadWindow) -> Result<FrameIter<'_>, StorageError> {
        window.validate()?;
        let indices = window.indices(self.frame_count()?);
        Ok(FrameIter {
            reader: self,
            indices: indices.into_iter(),
            window,
        })
    }

    /// Reverse iteration over the selected frames.
    pub fn frames_rev(&mut self, window: ReadWindow) -> Result<FrameIter<'_>, StorageError> {
        window.validate()?;
        let mut indices = window.indices(self.frame_count()?);
        indices.reverse();
        Ok(FrameIter {
            reader: self,
            indices: indices.into_iter(),
            window,
        })
    }
}

/// Iterator over `(frame_index, frame)` pairs.
pub struct FrameIter<'a> {
    reader: &'a mut TrajectoryReader,
    indices: std::vec::IntoIter<usize>,
    window: ReadWindow,
}

impl Iterator for FrameIter<'_> {
    type Item = Result<(usize, TrajectoryFrame), StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.indices.next()?;
        Some(
            self.reader
                .read_frame(index)
                .map(|frame| (index, self.window.apply_agents(frame))),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.indices.size_hint()
    }
}

/// Streaming writer; frames are encoded one at a time.
pub struct TrajectoryWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    header: TrajectoryHeader,
    frames_written: usize,
    scratch: Vec<u8>,
}

impl fmt::Debug for TrajectoryWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrajectoryWriter")
            .field("path", &self.path)
            .field("version", &self.header.version)
            .field("frames_written", &self.frames_written)
            .finish()
    }
}

impl TrajectoryWriter {
    pub fn create(path: impl Into<PathBuf>, header: TrajectoryHeader) -> Result<Self, StorageError> {
        let path = path.into();
        let encoded = header.encode()?;
        let file = File::create(&path).map_err(StorageError::io(&path))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&encoded).map_err(StorageError::io(&path))?;
        Ok(Self {
            path,
            writer,
            header,
            frames_written: 0,
            scratch: Vec::new(),
        })
    }

    #[must_use]
    pub fn header(&self) -> &TrajectoryHeader {
        &self.header
    }

    #[must_use]
    pub const fn frames_written(&self) -> usize {
        self.frames_written
    }

    pub fn write_frame(&mut self, frame: &TrajectoryFrame) -> Result<(), StorageError> {
        if frame.len() != self.header.agent_count {
            return Err(StorageError::AgentCountMismatch {
                frame: self.frames_written,
                expected: self.header.agent_count,
                found: frame.len(),
            });
        }
        self.header.encode_frame(frame, &mut self.scratch);
        self.writer
            .write_all(&self.scratch)
            .map_err(StorageError::io(&self.path))?;
        self.frames_written += 1;
        Ok(())
    }

    /// Flush and close, returning the number of frames written.
    pub fn finish(mut self) -> Result<usize, StorageError> {
        self.writer.flush().map_err(StorageError::io(&self.path))?;
        Ok(self.frames_written)
    }
}

/// Copy the frames and agents selected by `window` into a new store.
pub fn write_window(
    reader: &mut TrajectoryReader,
    out: impl Into<PathBuf>,
    window: ReadWindow,
) -> Result<usize, StorageError> {
    window.validate()?;
    let header = window.derive_header(reader.header()?);
    let mut writer = TrajectoryWriter::create(out, header)?;
    for item in reader.frames(window)? {
        let (_, frame) = item?;
        writer.write_frame(&frame)?;
    }
    let written = writer.finish()?;
    info!(
        source = %reader.path().display(),
        frames = written,
        "wrote trajectory subset"
    );
    Ok(written)
}

/// Keep the first `max_frames` frames.
pub fn write_truncated(
    reader: &mut TrajectoryReader,
    out: impl Into<PathBuf>,
    max_frames: usize,
) -> Result<usize, StorageError> {
    write_window(
        reader,
        out,
        ReadWindow {
            end: Some(max_frames),
            ..ReadWindow::default()
        },
    )
}

/// Keep every `frame_stride`-th frame and every `agent_stride`-th agent.
pub fn write_strided(
    reader: &mut TrajectoryReader,
    out: impl Into<PathBuf>,
    frame_stride: usize,
    agent_stride: usize,
) -> Result<usize, StorageError> {
    write_window(
        reader,
        out,
        ReadWindow {
            frame_stride,
            agent_stride,
            ..ReadWindow::default()
        },
    )
}

/// Write a single-agent store holding agent `agent` from every frame.
pub fn extract_agent(
    reader: &mut TrajectoryReader,
    out: impl Into<PathBuf>,
    agent: usize,
) -> Result<usize, StorageError> {
    let source = reader.header()?.clone();
    if agent >= source.agent_count {
        return Err(StorageError::AgentOutOfRange {
            index: agent,
            count: source.agent_count,
        });
    }
    let header = TrajectoryHeader::new(source.version, 1, source.time_step)
        .with_class_tags(vec![source.class_tags[agent]])?;
    let mut writer = TrajectoryWriter::create(out, header)?;
    for item in reader.frames(ReadWindow::all())? {
        let (index, frame) = item?;
        let record = frame.agent(agent).ok_or(StorageError::AgentCountMismatch {
            frame: index,
            expected: source.agent_count,
            found: frame.len(),
        })?;
        writer.write_frame(&std::iter::once(record).collect())?;
    }
    writer.finish()
}

/// Fully materialised store, used by the in-place post-processors.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectorySet {
    header: TrajectoryHeader,
    frames: Vec<TrajectoryFrame>,
}

impl TrajectorySet {
    #[must_use]
    pub fn new(header: TrajectoryHeader) -> Self {
        Self {
            header,
            frames: Vec::new(),
        }
    }

    pub fn from_frames(
        header: TrajectoryHeader,
        frames: Vec<TrajectoryFrame>,
    ) -> Result<Self, StorageError> {
        let mut set = Self::new(header);
        for frame in frames {
            set.push_frame(frame)?;
        }
        Ok(set)
    }

    pub fn read(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let mut reader = TrajectoryReader::open(path)?;
        let header = reader.header()?.clone();
        let mut frames = Vec::with_capacity(reader.frame_count()?);
        while let Some(frame) = reader.next_frame()? {
            frames.push(frame);
        }
        Ok(Self { header, frames })
    }

    pub fn write(&self, path: impl Into<PathBuf>) -> Result<usize, StorageError> {
        let mut writer = TrajectoryWriter::create(path, self.header.clone())?;
        for frame in &self.frames {
            writer.write_frame(frame)?;
        }
        writer.finish()
    }

    pub fn push_frame(&mut self, frame: TrajectoryFrame) -> Result<(), StorageError> {
        if frame.len() != self.header.agent_count {
            return Err(StorageError::AgentCountMismatch {
                frame: self.frames.len(),
                expected: self.header.agent_count,
                found: frame.len(),
            });
        }
        self.frames.push(frame);
        Ok(())
    }

    #[must_use]
    pub fn header(&self) -> &TrajectoryHeader {
        &self.header
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.header.agent_count
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn frames(&self) -> &[TrajectoryFrame] {
        &self.frames
    }

    #[must_use]
    pub fn frames_mut(&mut self) -> &mut [TrajectoryFrame] {
        &mut self.frames
    }

    #[must_use]
    pub fn into_frames(self) -> Vec<TrajectoryFrame> {
        self.frames
    }

    /// Positions of `agent` across every frame.
    pub fn track(&self, agent: usize) -> Result<Vec<Vector2>, StorageError> {
        if agent >= self.header.agent_count {
            return Err(StorageError::AgentOutOfRange {
                index: agent,
                count: self.header.agent_count,
            });
        }
        // `push_frame` keeps every frame at `agent_count` agents.
        Ok(self
            .frames
            .iter()
            .map(|frame| frame.positions()[agent])
            .collect())
    }

    /// Overwrite the positions of `agent`; `positions` must cover every frame.
    pub fn set_track(&mut self, agent: usize, positions: &[Vector2]) -> Result<(), StorageError> {
        if positions.len() != self.frames.len() {
            return Err(StorageError::InvalidConfig(
                "track length must equal the frame count",
            ));
        }
        if agent >= self.header.agent_count {
            return Err(StorageError::AgentOutOfRange {
                index: agent,
                count: self.header.agent_count,
            });
        }
        for (frame, position) in self.frames.iter_mut().zip(positions) {
            frame.columns_mut().positions_mut()[agent] = *position;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(prefix: &str) -> PathBuf {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "{prefix}-{}-{timestamp}.traj",
            std::process::id()
        ))
    }

    fn frame(seed: f32, agents: usize) -> TrajectoryFrame {
        (0..agents)
            .map(|i| AgentRecord::at(Vector2::new(seed, i as f32), seed * 0.1))
            .collect()
    }

    #[test]
    fn version_tags_and_widths() {
        for version in StoreVersion::ALL {
            assert_eq!(StoreVersion::from_tag(version.tag()), Some(version));
            assert_eq!(version.label().parse::<StoreVersion>().ok(), Some(version));
        }
        let widths: Vec<usize> = StoreVersion::ALL.iter().map(|v| v.payload_width()).collect();
        assert_eq!(widths, vec![12, 12, 16, 32, 16]);
        assert!(StoreVersion::from_tag(b"3.0\0").is_none());
    }

    #[test]
    fn header_lengths() {
        assert_eq!(TrajectoryHeader::new(StoreVersion::V1_0, 3, 0.1).encoded_len(), 8);
        let header = TrajectoryHeader::new(StoreVersion::V2_2, 3, 0.1);
        assert_eq!(header.encoded_len(), 24);
        assert_eq!(header.frame_bytes(), 96);
        assert_eq!(header.file_len(5), 504);
    }

    #[test]
    fn lazy_open_defers_io() {
        let path = temp_path("lazy");
        let mut reader = TrajectoryReader::new(&path);
        assert!(!reader.is_open());
        let err = reader.frame_count().expect_err("missing file");
        assert!(matches!(err, StorageError::Io { .. }));

        let header = TrajectoryHeader::new(StoreVersion::V2_0, 2, 0.04);
        let mut writer = TrajectoryWriter::create(&path, header).expect("writer");
        writer.write_frame(&frame(1.0, 2)).expect("frame");
        writer.finish().expect("finish");
        assert_eq!(reader.frame_count().expect("count"), 1);
        assert!(reader.is_open());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn writer_rejects_wrong_agent_count() {
        let path = temp_path("mismatch");
        let header = TrajectoryHeader::new(StoreVersion::V2_1, 3, 0.1);
        let mut writer = TrajectoryWriter::create(&path, header).expect("writer");
        let err = writer.write_frame(&frame(0.0, 2)).expect_err("two agents");
        assert!(matches!(
            err,
            StorageError::AgentCountMismatch {
                expected: 3,
                found: 2,
                ..
            }
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn window_selects_indices() {
        let window = ReadWindow {
            start: 1,
            end: Some(8),
            frame_stride: 3,
            agent_stride: 2,
        };
        assert_eq!(window.indices(10), vec![1, 4, 7]);
        assert_eq!(window.indices(5), vec![1, 4]);
        assert_eq!(window.agent_count(5), 3);
        let header = TrajectoryHeader::new(StoreVersion::V2_1, 5, 0.1)
            .with_class_tags(vec![0, 1, 2, 3, 4])
            .expect("tags");
        let derived = window.derive_header(&header);
        assert_eq!(derived.class_tags, vec![0, 2, 4]);
        assert!((derived.time_step - 0.3).abs() < 1e-6);
        assert!(ReadWindow { frame_stride: 0, ..ReadWindow::default() }.validate().is_err());
    }
}
