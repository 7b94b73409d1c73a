//! Numerical kernels used by the resampler, the stepping-stone estimator and
//! the reference likelihood engine.

use std::f64::consts::PI;
use std::ops::Range;

use crate::rng::RngHandle;

/// Weighted sum of exponentials held relative to its largest exponent.
///
/// Represents `Σ_k w_k · exp(x_k)` as `total · exp(max)`, where `max` is the
/// largest `x_k` and `total = Σ_k w_k · exp(x_k − max)`. The cumulative sums are
/// kept so that a component can be drawn proportionally without a second pass.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedLogSum {
    /// Largest log value across all entries (independent of weights).
    pub max: f64,
    /// Stabilized weighted total.
    pub total: f64,
    /// Running cumulative of the stabilized weighted terms.
    pub cumulative: Vec<f64>,
}

impl WeightedLogSum {
    /// Combines log values with non-negative weights.
    ///
    /// Both slices must have the same length.
    pub fn new(log_values: &[f64], weights: &[f64]) -> Self {
        debug_assert_eq!(log_values.len(), weights.len());
        let max = log_values
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let mut cumulative = Vec::with_capacity(log_values.len());
        let mut total = 0.0;
        for (&value, &weight) in log_values.iter().zip(weights) {
            if max.is_finite() {
                total += weight * (value - max).exp();
            }
            cumulative.push(total);
        }
        Self {
            max,
            total,
            cumulative,
        }
    }

    /// Returns `log(total) + max`, or `None` when the weighted mass is zero.
    pub fn log_value(&self) -> Option<f64> {
        if self.total > 0.0 {
            Some(self.total.ln() + self.max)
        } else {
            None
        }
    }

    /// Draws an index proportionally to the weighted terms.
    ///
    /// Returns `None` when the mass is zero or the draw overflows the
    /// cumulative distribution.
    pub fn sample(&self, rng: &mut RngHandle) -> Option<usize> {
        if self.total <= 0.0 {
            return None;
        }
        let u = self.total * rng.uniform();
        sample_cumulative(&self.cumulative, u)
    }
}

/// Stabilized `log(Σ_k w_k · exp(x_k))`; `-inf` when the weighted mass is zero.
pub fn weighted_log_sum_exp(log_values: &[f64], weights: &[f64]) -> f64 {
    WeightedLogSum::new(log_values, weights)
        .log_value()
        .unwrap_or(f64::NEG_INFINITY)
}

/// Stabilized `log(Σ_k exp(x_k))`.
pub fn log_sum_exp(log_values: &[f64]) -> f64 {
    let ones = vec![1.0; log_values.len()];
    weighted_log_sum_exp(log_values, &ones)
}

/// Returns the first index whose cumulative value reaches `u`.
///
/// `None` signals an overflow past the last entry.
pub fn sample_cumulative(cumulative: &[f64], u: f64) -> Option<usize> {
    let mut k = 0;
    while k < cumulative.len() && u > cumulative[k] {
        k += 1;
    }
    (k < cumulative.len()).then_some(k)
}

/// Draws an index from unnormalized non-negative probabilities.
pub fn finite_discrete(probabilities: &[f64], rng: &mut RngHandle) -> Option<usize> {
    let mut cumulative = Vec::with_capacity(probabilities.len());
    let mut total = 0.0;
    for &p in probabilities {
        total += p;
        cumulative.push(total);
    }
    if total <= 0.0 {
        return None;
    }
    sample_cumulative(&cumulative, total * rng.uniform())
}

/// Splits `[0, n)` into `parts` contiguous ranges whose sizes differ by at most one.
///
/// With `width = n / parts` and `r = n % parts`, the first `r` ranges receive
/// `width + 1` elements. Returns an empty vector when `parts == 0`.
pub fn partition(n: usize, parts: usize) -> Vec<Range<usize>> {
    if parts == 0 {
        return Vec::new();
    }
    let width = n / parts;
    let remainder = n % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for index in 0..parts {
        let len = if index < remainder { width + 1 } else { width };
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// Natural log of the gamma function via the Lanczos approximation (g=7).
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 8] = [
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];

    if x < 0.5 {
        let log_pi_over_sin = (PI / (PI * x).sin()).ln();
        log_pi_over_sin - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut ag = 0.99999999999980993_f64;
        for (i, &c) in COEFFS.iter().enumerate() {
            ag += c / (x + i as f64 + 1.0);
        }
        let t = x + 7.5;
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + ag.ln()
    }
}

/// Regularized lower incomplete gamma function `P(a, x)`.
///
/// Series expansion below `a + 1`, continued fraction above. Returns `NaN`
/// for a non-positive shape.
pub fn gamma_p(a: f64, x: f64) -> f64 {
    if a <= 0.0 || x < 0.0 {
        return f64::NAN;
    }
    if x == 0.0 {
        return 0.0;
    }
    let ln_prefix = a * x.ln() - x - ln_gamma(a);
    if x < a + 1.0 {
        let mut sum = 1.0 / a;
        let mut term = sum;
        for n in 1..=500 {
            term *= x / (a + n as f64);
            sum += term;
            if term.abs() < sum.abs() * 1e-14 {
                break;
            }
        }
        (sum * ln_prefix.exp()).min(1.0)
    } else {
        let tiny = 1e-300_f64;
        let mut b = x + 1.0 - a;
        let mut c = 1.0 / tiny;
        let mut d = 1.0 / b;
        let mut h = d;
        for i in 1..=500 {
            let an = -(i as f64) * (i as f64 - a);
            b += 2.0;
            d = an * d + b;
            if d.abs() < tiny {
                d = tiny;
            }
            c = b + an / c;
            if c.abs() < tiny {
                c = tiny;
            }
            d = 1.0 / d;
            let delta = d * c;
            h *= delta;
            if (delta - 1.0).abs() < 1e-14 {
                break;
            }
        }
        (1.0 - h * ln_prefix.exp()).max(0.0)
    }
}

/// Quantile of a Gamma(shape, rate) distribution, found by bisection.
pub fn gamma_quantile(p: f64, shape: f64, rate: f64) -> f64 {
    if p <= 0.0 {
        return 0.0;
    }
    let mut lo = 0.0;
    let mut hi = (shape / rate).max(1.0);
    while gamma_p(shape, hi * rate) < p {
        hi *= 2.0;
        if hi > 1e12 {
            break;
        }
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if gamma_p(shape, mid * rate) < p {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-12 * hi.max(1e-12) {
            break;
        }
    }
    0.5 * (lo + hi)
}

/// Discrete Gamma rate categories with unit mean (median of each category).
pub fn discrete_gamma_rates(alpha: f64, categories: usize) -> Vec<f64> {
    if categories <= 1 || !alpha.is_finite() || alpha <= 0.0 {
        return vec![1.0; categories.max(1)];
    }
    let n = categories as f64;
    let mut rates: Vec<f64> = (0..categories)
        .map(|i| gamma_quantile((2.0 * i as f64 + 1.0) / (2.0 * n), alpha, alpha))
        .collect();
    let mean = rates.iter().sum::<f64>() / n;
    if mean > 0.0 {
        for rate in &mut rates {
            *rate /= mean;
        }
    }
    rates
}

/// Log density of a Gamma(shape, rate) distribution at `x`.
pub fn gamma_log_density(x: f64, shape: f64, rate: f64) -> f64 {
    if x <= 0.0 || shape <= 0.0 || rate <= 0.0 {
        return f64::NEG_INFINITY;
    }
    shape * rate.ln() - ln_gamma(shape) + (shape - 1.0) * x.ln() - rate * x
}

/// Log density of a Dirichlet distribution with concentration `weights` at `profile`.
pub fn dirichlet_log_density(profile: &[f64], weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    let mut density = ln_gamma(total);
    for (&p, &w) in profile.iter().zip(weights) {
        if p <= 0.0 {
            return f64::NEG_INFINITY;
        }
        density += (w - 1.0) * p.ln() - ln_gamma(w);
    }
    density
}

/// Index of the unordered pair `(i, j)`, `i < j`, in a packed upper triangle of order `dim`.
pub fn rr_index(i: usize, j: usize, dim: usize) -> usize {
    let (i, j) = if i < j { (i, j) } else { (j, i) };
    i * (2 * dim - i - 1) / 2 + j - i - 1
}
