//! Gaussian path smoothing over continuous stretches of each track.

use crate::AnalysisError;
use crowdfield_core::Vector2;
use crowdfield_storage::{StorageError, TrajectorySet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Standard deviation of the kernel, in samples.
    pub sigma: f32,
    /// Steps longer than this (metres) split a track into separate intervals.
    pub break_distance: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            sigma: 2.0,
            break_distance: 1.0,
        }
    }
}

impl SmoothingConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(AnalysisError::InvalidConfig("sigma must be positive"));
        }
        if !(self.break_distance.is_finite() && self.break_distance > 0.0) {
            return Err(AnalysisError::InvalidConfig("break distance must be positive"));
        }
        Ok(())
    }
}

/// Normalised Gaussian taps; the count is `⌈6σ⌉` bumped to the next odd number.
pub fn gaussian_weights(sigma: f32) -> Result<Vec<f32>, AnalysisError> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(AnalysisError::InvalidConfig("sigma must be positive"));
    }
    let mut width = (6.0 * sigma).ceil() as usize;
    if width % 2 == 0 {
        width += 1;
    }
    let half = (width / 2) as f32;
    let denom = 2.0 * sigma * sigma;
    let mut weights: Vec<f32> = (0..width)
        .map(|i| {
            let offset = i as f32 - half;
            (-(offset * offset) / denom).exp()
        })
        .collect();
    let total: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= total;
    }
    Ok(weights)
}

/// Convolve `input` with `weights`, ramping the delta into the unconvolved ends.
///
/// Inputs shorter than the kernel come back unchanged.
#[must_use]
pub fn smooth_series(input: &[f32], weights: &[f32]) -> Vec<f32> {
    let n = input.len();
    let k = weights.len();
    if k == 0 || n < k {
        return input.to_vec();
    }
    let half = k / 2;
    let mut out = input.to_vec();
    for i in half..n - half {
        out[i] = input[i - half..i - half + k]
            .iter()
            .zip(weights)
            .map(|(x, w)| x * w)
            .sum();
    }
    if half > 0 {
        let first = half;
        let last = n - 1 - half;
        let lead = out[first] - input[first];
        let trail = out[last] - input[last];
        let span = half as f32;
        for i in 0..half {
            out[i] = input[i] + lead * i as f32 / span;
            let j = n - 1 - i;
            out[j] = input[j] + trail * i as f32 / span;
        }
    }
    out
}

/// Maximal runs of `track` whose squared steps stay within `threshold_sq`.
#[must_use]
pub fn continuous_intervals(track: &[Vector2], threshold_sq: f32) -> Vec<Range<usize>> {
    let mut intervals = Vec::new();
    if track.is_empty() {
        return intervals;
    }
    let mut start = 0;
    for i in 1..track.len() {
        let step = track[i] - track[i - 1];
        if step.dot(step) > threshold_sq {
            intervals.push(start..i);
            start = i;
        }
    }
    intervals.push(start..track.len());
    intervals
}

fn smooth_track(track: &[Vector2], weights: &[f32], threshold_sq: f32) -> (Vec<Vector2>, usize) {
    let mut out = track.to_vec();
    let intervals = continuous_intervals(track, threshold_sq);
    let count = intervals.len();
    for range in intervals {
        let xs: Vec<f32> = track[range.clone()].iter().map(|p| p.x).collect();
        let ys: Vec<f32> = track[range.clone()].iter().map(|p| p.y).collect();
        let xs = smooth_series(&xs, weights);
        let ys = smooth_series(&ys, weights);
        for ((slot, x), y) in out[range].iter_mut().zip(xs).zip(ys) {
            *slot = Vector2::new(x, y);
        }
    }
    (out, count)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmoothingReport {
    pub agents: usize,
    pub frames: usize,
    pub kernel_width: usize,
    pub intervals: usize,
}

/// Smooth every agent's positions in place.
pub fn smooth_trajectories(
    set: &mut TrajectorySet,
    config: &SmoothingConfig,
) -> Result<SmoothingReport, AnalysisError> {
    config.validate()?;
    let weights = gaussian_weights(config.sigma)?;
    let threshold_sq = config.break_distance * config.break_distance;

    let smoothed: Vec<(Vec<Vector2>, usize)> = (0..set.agent_count())
        .into_par_iter()
        .map(|agent| Ok(smooth_track(&set.track(agent)?, &weights, threshold_sq)))
        .collect::<Result<_, StorageError>>()?;

    let mut intervals = 0;
    for (agent, (track, count)) in smoothed.into_iter().enumerate() {
        set.set_track(agent, &track)?;
        intervals += count;
    }
    debug!(kernel_width = weights.len(), "gaussian taps prepared");
    info!(
        agents = set.agent_count(),
        frames = set.frame_count(),
        intervals,
        "smoothing complete"
    );
    Ok(SmoothingReport {
        agents: set.agent_count(),
        frames: set.frame_count(),
        kernel_width: weights.len(),
        intervals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_are_odd_and_normalised() {
        for (sigma, width) in [(1.0, 7), (0.5, 3), (1.2, 9), (2.0, 13)] {
            let w = gaussian_weights(sigma).expect("weights");
            assert_eq!(w.len(), width, "sigma {sigma}");
            assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-5);
            assert!((w[0] - w[width - 1]).abs() < 1e-7);
        }
        assert!(gaussian_weights(0.0).is_err());
    }

    #[test]
    fn linear_series_is_preserved() {
        let input: Vec<f32> = (0..20).map(|i| 0.5 * i as f32).collect();
        let out = smooth_series(&input, &gaussian_weights(1.0).expect("weights"));
        for (a, b) in input.iter().zip(&out) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn ends_keep_their_input_values() {
        let input: Vec<f32> = (0..15).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let out = smooth_series(&input, &gaussian_weights(0.5).expect("weights"));
        assert_eq!(out[0], input[0]);
        assert_eq!(out[14], input[14]);
        assert!(out[7].abs() < 1.0);
    }

    #[test]
    fn short_series_is_untouched() {
        let input = vec![1.0, 5.0, 2.0];
        assert_eq!(smooth_series(&input, &gaussian_weights(1.0).expect("weights")), input);
    }

    #[test]
    fn jumps_split_intervals() {
        let track = [
            Vector2::new(0.0, 0.0),
            Vector2::new(0.1, 0.0),
            Vector2::new(5.0, 0.0),
            Vector2::new(5.1, 0.0),
        ];
        assert_eq!(continuous_intervals(&track, 1.0), vec![0..2, 2..4]);
        assert!(continuous_intervals(&[], 1.0).is_empty());
    }
}
