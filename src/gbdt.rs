/// Gradient-boosted decision stumps for multi-class classification.
///
/// Each boosting round fits one stump per class to the softmax log-loss
/// residuals of that class. Split search works on histogram-binned features
/// and runs in parallel across features.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const MODEL_VERSION: i64 = 1;

/// How features are scaled before they reach the booster, at training and at
/// prediction time alike. Recorded in the model so prediction always matches training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FeatureScaling
{
    /// Divide by 255 even though stored features are already in [0, 1].
    /// Kept for parity with the models the service has always produced.
    #[default]
    Legacy255,
    /// Use the stored [0, 1] features unchanged.
    Identity,
}

impl FeatureScaling
{
    pub fn apply(&self, features: &mut [f32])
    {
        match self
        {
            FeatureScaling::Legacy255 => features.iter_mut().for_each(|v| *v /= 255.),
            FeatureScaling::Identity => {},
        }
    }
}

impl std::str::FromStr for FeatureScaling
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_ascii_lowercase().as_str()
        {
            "legacy255" | "legacy" => Ok(FeatureScaling::Legacy255),
            "identity" | "none" => Ok(FeatureScaling::Identity),
            other => Err(format!("unknown feature scaling {other:?}, expected legacy255 or identity")),
        }
    }
}

/// Boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostParams
{
    pub rounds: usize,
    pub learning_rate: f32,
    pub bins: usize,
}

impl Default for BoostParams
{
    fn default() -> Self
    {
        Self {
            rounds: 300,
            learning_rate: 0.1,
            bins: 32,
        }
    }
}

/// Single-split tree used as the weak learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stump
{
    pub feature_index: u16,
    pub threshold: f32,
    /// Output for `feature <= threshold`.
    pub left_value: f32,
    /// Output for `feature > threshold`.
    pub right_value: f32,
}

impl Stump
{
    pub fn predict(&self, features: &[f32]) -> f32
    {
        let value = features.get(self.feature_index as usize).copied().unwrap_or(0.0);
        if value <= self.threshold { self.left_value } else { self.right_value }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbdtClassifier
{
    pub model_version: i64,
    pub feature_len: usize,
    pub n_classes: usize,
    pub scaling: FeatureScaling,
    pub params: BoostParams,
    /// Log class priors, the logits before any round.
    pub init_raw: Vec<f32>,
    /// Shape: `[rounds][n_classes]`.
    pub stumps: Vec<Vec<Stump>>,
}

impl GbdtClassifier
{
    pub fn validate(&self) -> Result<(), String>
    {
        if self.model_version != MODEL_VERSION {
            return Err(format!("Unsupported model version {}", self.model_version));
        }
        if self.n_classes < 2 {
            return Err("Model must contain at least 2 classes".to_string());
        }
        if self.init_raw.len() != self.n_classes {
            return Err("init_raw length must match the number of classes".to_string());
        }
        for (round_idx, round) in self.stumps.iter().enumerate()
        {
            if round.len() != self.n_classes {
                return Err(format!("Round {round_idx} has {} stumps but expected {}", round.len(), self.n_classes));
            }
        }
        Ok(())
    }

    /// Raw logits for an already scaled feature vector.
    pub fn predict_raw(&self, features: &[f32]) -> Vec<f32>
    {
        let mut raw = self.init_raw.clone();
        for round in &self.stumps
        {
            for (class_idx, stump) in round.iter().enumerate()
            {
                raw[class_idx] += self.params.learning_rate * stump.predict(features);
            }
        }
        raw
    }

    pub fn predict_proba(&self, features: &[f32]) -> Vec<f32>
    {
        softmax(&self.predict_raw(features))
    }

    pub fn predict_class_index(&self, features: &[f32]) -> usize
    {
        argmax(&self.predict_raw(features))
    }

    /// Fraction of rows in `x` (already scaled) predicted as their `y` class.
    pub fn accuracy(&self, x: ArrayView2<f32>, y: &[usize]) -> f32
    {
        if y.is_empty() {
            return 0.0;
        }
        let correct = x.outer_iter()
            .zip(y)
            .filter(|(row, label)| self.predict_class_index(&row_slice(row)) == **label)
            .count();
        correct as f32 / y.len() as f32
    }
}

/// Fits a new classifier. `x` holds one scaled feature vector per row, `y` the class index of each row.
pub fn fit(
    x: ArrayView2<f32>,
    y: &[usize],
    n_classes: usize,
    params: &BoostParams,
    scaling: FeatureScaling,
) -> Result<GbdtClassifier, String>
{
    let (n, d) = x.dim();
    if n != y.len() {
        return Err(format!("Mismatched shapes: {n} feature rows but {} labels", y.len()));
    }
    if n == 0 {
        return Err("Empty dataset".to_string());
    }
    if n_classes < 2 {
        return Err(format!("Need at least 2 classes, got {n_classes}"));
    }
    if let Some(&bad) = y.iter().find(|&&label| label >= n_classes) {
        return Err(format!("Label index {bad} out of range for {n_classes} classes"));
    }
    if d > u16::MAX as usize + 1 {
        return Err(format!("Too many features: {d}"));
    }

    let bins = params.bins.clamp(2, 256);
    let (mins, maxs) = feature_min_max(x);
    let binned = bin_features(x, &mins, &maxs, bins);

    let init_raw: Vec<f32> = class_priors(y, n_classes)
        .iter()
        .map(|&p| p.max(1e-6).ln())
        .collect();
    let mut raw = Array2::from_shape_fn((n, n_classes), |(_, k)| init_raw[k]);

    let mut rounds_out = Vec::with_capacity(params.rounds);
    for _round in 0..params.rounds
    {
        let probs: Vec<Vec<f32>> = raw.outer_iter().map(|r| softmax(&row_slice(&r))).collect();

        let mut stumps_for_round = Vec::with_capacity(n_classes);
        for class_idx in 0..n_classes
        {
            let residuals: Vec<f32> = (0..n)
                .map(|i| {
                    let target = if y[i] == class_idx { 1.0 } else { 0.0 };
                    target - probs[i][class_idx]
                })
                .collect();

            let stump = fit_stump(x, &binned, bins, &residuals);
            let mut column = raw.column_mut(class_idx);
            for (i, row) in x.outer_iter().enumerate()
            {
                let v = row[stump.feature_index as usize];
                column[i] += params.learning_rate * if v <= stump.threshold { stump.left_value } else { stump.right_value };
            }
            stumps_for_round.push(stump);
        }
        rounds_out.push(stumps_for_round);
    }

    Ok(GbdtClassifier {
        model_version: MODEL_VERSION,
        feature_len: d,
        n_classes,
        scaling,
        params: params.clone(),
        init_raw,
        stumps: rounds_out,
    })
}

/// Numerically stable softmax.
pub fn softmax(raw: &[f32]) -> Vec<f32>
{
    if raw.is_empty() {
        return Vec::new();
    }
    let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = raw.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 {
        return vec![1.0 / raw.len() as f32; raw.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

fn argmax(values: &[f32]) -> usize
{
    let mut best_idx = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (idx, &v) in values.iter().enumerate()
    {
        if v > best_val {
            best_val = v;
            best_idx = idx;
        }
    }
    best_idx
}

fn row_slice<'a>(row: &'a ArrayView1<'_, f32>) -> std::borrow::Cow<'a, [f32]>
{
    match row.as_slice()
    {
        Some(s) => std::borrow::Cow::Borrowed(s),
        None => std::borrow::Cow::Owned(row.to_vec()),
    }
}

fn class_priors(y: &[usize], n_classes: usize) -> Vec<f32>
{
    let mut counts = vec![0usize; n_classes];
    for &label in y
    {
        counts[label] += 1;
    }
    let total = y.len().max(1) as f32;
    counts.into_iter().map(|c| c as f32 / total).collect()
}

fn feature_min_max(x: ArrayView2<f32>) -> (Vec<f32>, Vec<f32>)
{
    x.axis_iter(Axis(1))
        .map(|column| {
            let mut min = f32::INFINITY;
            let mut max = f32::NEG_INFINITY;
            for &v in column.iter().filter(|v| v.is_finite())
            {
                min = min.min(v);
                max = max.max(v);
            }
            if !min.is_finite() || !max.is_finite() {
                min = 0.0;
                max = 0.0;
            }
            if min == max {
                max = min + 1.0;
            }
            (min, max)
        })
        .unzip()
}

/// Bins every feature into `bins` buckets between its min and max.
/// Transposed, so each feature's bins are contiguous: shape `(d, n)`.
fn bin_features(x: ArrayView2<f32>, mins: &[f32], maxs: &[f32], bins: usize) -> Array2<u8>
{
    let (n, d) = x.dim();
    let scale = (bins - 1) as f32;
    Array2::from_shape_fn((d, n), |(j, i)| {
        let (min, max) = (mins[j], maxs[j]);
        let t = ((x[[i, j]] - min) / (max - min)).clamp(0.0, 1.0);
        (t * scale).round() as u8
    })
}

#[derive(Debug, Clone)]
struct BestSplit
{
    score: f64,
    feature_index: usize,
    split_bin: usize,
}

fn fit_stump(x: ArrayView2<f32>, binned: &Array2<u8>, bins: usize, residuals: &[f32]) -> Stump
{
    let splits: Vec<BestSplit> = (0..binned.nrows())
        .into_par_iter()
        .map(|j| best_split_for_feature(binned.row(j), residuals, j, bins))
        .collect();

    // Sequential pick keeps ties deterministic: lowest feature index wins.
    let best = splits.into_iter()
        .fold(BestSplit { score: f64::INFINITY, feature_index: 0, split_bin: 0 }, |best, s| {
            if s.score < best.score { s } else { best }
        });

    let feature_idx = best.feature_index;
    let threshold = split_threshold(x.column(feature_idx), binned.row(feature_idx), best.split_bin);
    let (left_value, right_value) = leaf_means(x.column(feature_idx), residuals, threshold);

    Stump {
        feature_index: feature_idx as u16,
        threshold,
        left_value,
        right_value,
    }
}

/// Midpoint of the gap between the largest value binned at or below `split_bin`
/// and the smallest value binned above it.
fn split_threshold(column: ArrayView1<f32>, binned: ArrayView1<u8>, split_bin: usize) -> f32
{
    let mut left_max = f32::NEG_INFINITY;
    let mut right_min = f32::INFINITY;
    for (&v, &b) in column.iter().zip(binned.iter()).filter(|(v, _)| v.is_finite())
    {
        if (b as usize) <= split_bin {
            left_max = left_max.max(v);
        } else {
            right_min = right_min.min(v);
        }
    }
    match (left_max.is_finite(), right_min.is_finite())
    {
        (true, true) => left_max + (right_min - left_max) * 0.5,
        (true, false) => left_max,
        (false, true) => right_min,
        (false, false) => 0.0,
    }
}

fn best_split_for_feature(binned: ArrayView1<u8>, residuals: &[f32], feature_idx: usize, bins: usize) -> BestSplit
{
    let mut counts = vec![0u32; bins];
    let mut sums = vec![0f64; bins];
    let mut sums_sq = vec![0f64; bins];
    for (&b, &r) in binned.iter().zip(residuals)
    {
        let b = b as usize;
        let r = r as f64;
        counts[b] += 1;
        sums[b] += r;
        sums_sq[b] += r * r;
    }

    let total_count: u32 = counts.iter().sum();
    let total_sum: f64 = sums.iter().sum();
    let total_sum_sq: f64 = sums_sq.iter().sum();

    let mut best = BestSplit { score: f64::INFINITY, feature_index: feature_idx, split_bin: 0 };
    let (mut left_count, mut left_sum, mut left_sum_sq) = (0u32, 0f64, 0f64);
    for split_bin in 0..(bins - 1)
    {
        left_count += counts[split_bin];
        left_sum += sums[split_bin];
        left_sum_sq += sums_sq[split_bin];
        let right_count = total_count - left_count;
        if left_count == 0 || right_count == 0 {
            continue;
        }
        let right_sum = total_sum - left_sum;
        let right_sum_sq = total_sum_sq - left_sum_sq;
        let left_sse = left_sum_sq - (left_sum * left_sum) / left_count as f64;
        let right_sse = right_sum_sq - (right_sum * right_sum) / right_count as f64;
        let score = left_sse + right_sse;
        if score < best.score {
            best.score = score;
            best.split_bin = split_bin;
        }
    }
    best
}

fn leaf_means(column: ArrayView1<f32>, residuals: &[f32], threshold: f32) -> (f32, f32)
{
    let (mut left_sum, mut left_count) = (0f32, 0u32);
    let (mut right_sum, mut right_count) = (0f32, 0u32);
    for (&v, &r) in column.iter().zip(residuals)
    {
        if v <= threshold {
            left_sum += r;
            left_count += 1;
        } else {
            right_sum += r;
            right_count += 1;
        }
    }
    let mean = |sum: f32, count: u32| if count == 0 { 0.0 } else { sum / count as f32 };
    (mean(left_sum, left_count), mean(right_sum, right_count))
}
