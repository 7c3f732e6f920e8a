//! Rolling-statistics and normalization kernels.
//!
//! Everything self-tuning in the engine runs through these primitives:
//! exponentially-weighted means and moments, entropy-derived coverage
//! selection, quartile whiskers for relative stopping rules, and rank-based
//! (van der Waerden) z-scores for cohort normalization.

use serde::{Deserialize, Serialize};

/// Exponentially-weighted moving average of a single value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ema {
    value: Option<f64>,
    alpha: f64,
}

impl Ema {
    pub fn new(alpha: f64) -> Self {
        Self { value: None, alpha }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            Some(v) => v + self.alpha * (x - v),
            None => x,
        };
        self.value = Some(next);
        next
    }

    pub fn get(&self) -> Option<f64> {
        self.value
    }

    pub fn get_or(&self, default: f64) -> f64 {
        self.value.unwrap_or(default)
    }

    pub fn is_initialized(&self) -> bool {
        self.value.is_some()
    }
}

/// Exponentially-weighted mean and variance.
///
/// Uses the standard EW update: the variance is decayed with the same
/// smoothing factor as the mean, so both track the recent regime rather
/// than all history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingMoments {
    mean: f64,
    var: f64,
    alpha: f64,
    count: u64,
}

impl RollingMoments {
    pub fn new(alpha: f64) -> Self {
        Self {
            mean: 0.0,
            var: 0.0,
            alpha,
            count: 0,
        }
    }

    pub fn update(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        if self.count == 0 {
            self.mean = x;
            self.var = 0.0;
        } else {
            let delta = x - self.mean;
            self.mean += self.alpha * delta;
            self.var = (1.0 - self.alpha) * (self.var + self.alpha * delta * delta);
        }
        self.count += 1;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std(&self) -> f64 {
        self.var.max(0.0).sqrt()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Standardized score of `x` against the rolling distribution.
    /// `None` until at least two samples exist or while the spread is
    /// numerically zero.
    pub fn z(&self, x: f64) -> Option<f64> {
        if self.count < 2 {
            return None;
        }
        let std = self.std();
        if std <= f64::EPSILON {
            return None;
        }
        Some((x - self.mean) / std)
    }
}

/// Shannon entropy (nats) of a weight vector. Weights are normalized
/// internally; non-positive entries are ignored.
pub fn shannon_entropy(weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    if total <= 0.0 {
        return 0.0;
    }
    weights
        .iter()
        .filter(|w| **w > 0.0)
        .map(|w| {
            let p = w / total;
            -p * p.ln()
        })
        .sum()
}

/// Entropy-adaptive prefix selection.
///
/// Given scores sorted descending, returns the length of the smallest
/// prefix whose cumulative normalized score reaches `1 − e^{−H}`, where H
/// is the Shannon entropy of the normalized score distribution. Peaked
/// distributions select few items, flat distributions select more; there
/// is no fixed K.
pub fn entropy_coverage_prefix(scores_desc: &[f64]) -> usize {
    let total: f64 = scores_desc.iter().filter(|s| **s > 0.0).sum();
    if total <= 0.0 {
        return 0;
    }
    let coverage_target = 1.0 - (-shannon_entropy(scores_desc)).exp();
    let mut cumulative = 0.0;
    for (i, score) in scores_desc.iter().enumerate() {
        cumulative += score.max(0.0) / total;
        if cumulative >= coverage_target {
            return i + 1;
        }
    }
    scores_desc.len()
}

/// Linear-interpolated quantile of a sorted slice. `q` in [0, 1].
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] + frac * (sorted[hi] - sorted[lo])
    }
}

/// Tukey lower whisker `Q1 − 1.5·IQR` of a sample.
///
/// `None` with fewer than four samples; below that the quartiles carry no
/// information and callers should not stop on them.
pub fn lower_whisker(samples: &[f64]) -> Option<f64> {
    if samples.len() < 4 {
        return None;
    }
    let mut sorted: Vec<f64> = samples.iter().copied().filter(|s| s.is_finite()).collect();
    if sorted.len() < 4 {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let q1 = quantile_sorted(&sorted, 0.25);
    let q3 = quantile_sorted(&sorted, 0.75);
    Some(q1 - 1.5 * (q3 - q1))
}

/// Average ranks (1-based) with ties sharing their mean rank.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // Mean of the 1-based ranks i+1 ..= j+1.
        let shared = (i + 1 + j + 1) as f64 / 2.0;
        for k in i..=j {
            ranks[order[k]] = shared;
        }
        i = j + 1;
    }
    ranks
}

/// Van der Waerden rank z-scores: `Φ⁻¹(rank / (n + 1))`.
///
/// Rank-based normalization is robust to the heavy-tailed outcome
/// distributions the learning updater sees; the transform standardizes at
/// read time without touching stored values.
pub fn van_der_waerden(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    average_ranks(values)
        .into_iter()
        .map(|r| inverse_normal_cdf(r / (n as f64 + 1.0)))
        .collect()
}

/// Inverse of the standard normal CDF (Acklam's rational approximation,
/// relative error below 1.15e-9 over the open unit interval).
pub fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_690e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.02425;

    if !(p > 0.0 && p < 1.0) {
        if p <= 0.0 {
            return f64::NEG_INFINITY;
        }
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -((((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0))
    }
}
