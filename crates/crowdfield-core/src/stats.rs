//! Per-frame summaries of the values deposited by each agent.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Running sums for one frame. Fed one value per deposited agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsAccumulator {
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f32,
    max: f32,
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        }
    }
}

impl StatsAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-agent callback invoked during deposition.
    pub fn push(&mut self, value: f32) {
        if !value.is_finite() {
            return;
        }
        let v = f64::from(value);
        self.count += 1;
        self.sum += v;
        self.sum_sq += v * v;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Close the frame. Empty frames report zeros.
    #[must_use]
    pub fn finish(&self, index: usize) -> FrameStats {
        if self.count == 0 {
            return FrameStats {
                index,
                ..FrameStats::default()
            };
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        FrameStats {
            index,
            mean: mean as f32,
            std: variance.sqrt() as f32,
            min: self.min,
            max: self.max,
            count: self.count,
        }
    }
}

/// Summary quintuple for one frame.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct FrameStats {
    pub index: usize,
    pub mean: f32,
    pub std: f32,
    pub min: f32,
    pub max: f32,
    pub count: u64,
}

/// Ordered collection of frame summaries. Workers fill their own recorder and
/// the results are merged once they have joined.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatsRecorder {
    frames: BTreeMap<usize, FrameStats>,
}

impl StatsRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stats: FrameStats) {
        self.frames.insert(stats.index, stats);
    }

    pub fn merge(&mut self, other: StatsRecorder) {
        self.frames.extend(other.frames);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&FrameStats> {
        self.frames.get(&index)
    }

    /// Rows in frame order, for plotting clients.
    pub fn series(&self) -> impl Iterator<Item = &FrameStats> {
        self.frames.values()
    }

    /// Frame with the largest maximum.
    #[must_use]
    pub fn peak(&self) -> Option<&FrameStats> {
        self.frames
            .values()
            .filter(|stats| stats.count > 0)
            .max_by_key(|stats| OrderedFloat(stats.max))
    }

    /// Write `index mean std min max count`, one frame per line.
    pub fn dump<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for stats in self.frames.values() {
            writeln!(
                writer,
                "{} {:.6} {:.6} {:.6} {:.6} {}",
                stats.index, stats.mean, stats.std, stats.min, stats.max, stats.count
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_summarises_values() {
        let mut acc = StatsAccumulator::new();
        for value in [1.0, 2.0, 3.0, 4.0] {
            acc.push(value);
        }
        acc.push(f32::NAN);
        let stats = acc.finish(3);
        assert_eq!(stats.index, 3);
        assert_eq!(stats.count, 4);
        assert!((stats.mean - 2.5).abs() < 1e-6);
        assert!((stats.std - 1.25f32.sqrt()).abs() < 1e-6);
        assert_eq!((stats.min, stats.max), (1.0, 4.0));
    }

    #[test]
    fn empty_frame_reports_zeros() {
        let stats = StatsAccumulator::new().finish(0);
        assert_eq!(stats, FrameStats::default());
    }

    #[test]
    fn recorder_merges_out_of_order() {
        let mut a = StatsRecorder::new();
        let mut b = StatsRecorder::new();
        let mut acc = StatsAccumulator::new();
        acc.push(5.0);
        b.record(acc.finish(1));
        acc.push(9.0);
        a.record(acc.finish(0));
        a.merge(b);
        let order: Vec<usize> = a.series().map(|s| s.index).collect();
        assert_eq!(order, vec![0, 1]);
        assert_eq!(a.peak().map(|s| s.index), Some(0));

        let mut out = Vec::new();
        a.dump(&mut out).expect("dump");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("0 7.000000 2.000000 5.000000 9.000000 2"));
    }
}
