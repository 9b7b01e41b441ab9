//! Outlier statistics for quartet concordance factors.
//!
//! Each four-taxon set contributes three observed concordance factors (CFs),
//! one per unrooted resolution, and the three CFs expected under a network.
//! This crate turns those into a per-quartet outlier p-value, then turns the
//! collection of outlier p-values into one overall goodness-of-fit test.
//!
//! Two families of per-quartet statistics are provided:
//! - **Multinomial** ([`OutlierStatistic`]): the observed CFs are counts over
//!   `n` genes. LRT, Qlog and Pearson statistics are compared to a
//!   chi-squared distribution with 2 degrees of freedom.
//! - **Dirichlet** ([`DirichletStatistic`]): the observed CFs are drawn from a
//!   Dirichlet distribution with mean equal to the expected CFs and a single
//!   concentration parameter shared by all quartets (the TICR model).
//!
//! Aggregation counts outliers (p < 0.05) and tests for an excess over the
//! 5% expected under the model, either as a one-sided z test or, for TICR,
//! as a chi-squared test on four p-value bins.

use serde::Serialize;
use statrs::distribution::{Beta, ChiSquared, ContinuousCDF, Normal};
use statrs::function::gamma::ln_gamma;
use std::fmt;
use std::str::FromStr;

/// Outlier threshold on per-quartet p-values.
pub const OUTLIER_THRESHOLD: f64 = 0.05;

/// Upper edges of the TICR p-value bins: [0,0.01), [0.01,0.05), [0.05,0.10), [0.10,1].
pub const TICR_BIN_EDGES: [f64; 3] = [0.01, 0.05, 0.10];

/// Proportions expected in each TICR bin when the model fits.
pub const TICR_EXPECTED_PROPORTIONS: [f64; 4] = [0.01, 0.04, 0.05, 0.90];

// ═══════════════════════════════════════════════════════════════════════════════
// Core types
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-quartet test statistic under the multinomial model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierStatistic {
    /// Likelihood ratio (G statistic): `2n Σ p̂ (log p̂ − log p)`.
    #[default]
    Lrt,
    /// Lorenzen's Qlog: `2n Σ (p̂ − p)²/p · (log p̂ − log p)`.
    Qlog,
    /// Pearson's chi-squared: `n Σ (p̂ − p)²/p`. Poor when expected counts are below 5.
    Pearson,
}

impl fmt::Display for OutlierStatistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lrt => write!(f, "lrt"),
            Self::Qlog => write!(f, "qlog"),
            Self::Pearson => write!(f, "pearson"),
        }
    }
}

impl FromStr for OutlierStatistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lrt" | "g" => Ok(Self::Lrt),
            "qlog" => Ok(Self::Qlog),
            "pearson" => Ok(Self::Pearson),
            other => Err(format!(
                "unknown quartet statistic '{other}' (expected lrt, qlog or pearson)"
            )),
        }
    }
}

/// Per-quartet statistic under the Dirichlet (TICR) model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirichletStatistic {
    /// Deviation of the major resolution's CF from its expectation.
    #[default]
    MaxCf,
    /// Smallest of the three per-resolution p-values. Liberal: use with care.
    MinPval,
}

impl fmt::Display for DirichletStatistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxCf => write!(f, "maxcf"),
            Self::MinPval => write!(f, "minpval"),
        }
    }
}

impl FromStr for DirichletStatistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "maxcf" | "max_cf" => Ok(Self::MaxCf),
            "minpval" | "min_pval" => Ok(Self::MinPval),
            other => Err(format!(
                "unknown Dirichlet statistic '{other}' (expected maxcf or minpval)"
            )),
        }
    }
}

/// Overall test applied to binned TICR p-values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TicrTest {
    /// One-sided z test for an excess of p-values below 0.05.
    #[default]
    OneSided,
    /// Chi-squared test of all four bins against (0.01, 0.04, 0.05, 0.90).
    Goodness,
}

impl fmt::Display for TicrTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneSided => write!(f, "onesided"),
            Self::Goodness => write!(f, "goodness"),
        }
    }
}

impl FromStr for TicrTest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "onesided" | "one_sided" => Ok(Self::OneSided),
            "goodness" => Ok(Self::Goodness),
            other => Err(format!(
                "unknown TICR test '{other}' (expected onesided or goodness)"
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Upper tail of a chi-squared distribution.
///
/// Non-positive statistics map to 1 and infinite ones to 0, so degenerate
/// expected CFs never produce NaN p-values.
fn chisq_sf(x: f64, df: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if x <= 0.0 {
        return 1.0;
    }
    if x.is_infinite() {
        return 0.0;
    }
    match ChiSquared::new(df) {
        Ok(dist) => dist.sf(x).clamp(0.0, 1.0),
        Err(_) => f64::NAN,
    }
}

/// `p̂ (log p̂ − log p)` with the `0 · log 0 = 0` convention.
fn xlogx_ratio(obs: f64, exp: f64) -> f64 {
    if obs <= 0.0 {
        0.0
    } else {
        obs * (obs.ln() - exp.ln())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// 1. MULTINOMIAL STATISTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// Likelihood ratio statistic `2n Σ_j p̂_j (log p̂_j − log p_j)`.
///
/// Resolutions with an observed CF of exactly 0 contribute 0.
pub fn lrt_statistic(obs: &[f64; 3], exp: &[f64; 3], ngenes: f64) -> f64 {
    let sum: f64 = obs
        .iter()
        .zip(exp)
        .map(|(&o, &e)| xlogx_ratio(o, e))
        .sum();
    // rounding can leave a tiny negative sum for near-identical vectors
    (2.0 * ngenes * sum).max(0.0)
}

/// Qlog statistic `2n Σ_j (p̂_j − p_j)²/p_j · (log p̂_j − log p_j)`.
///
/// Resolutions with an observed CF of 0 contribute 0. The sum can be negative
/// when one observed CF falls far below its expectation; the statistic is
/// floored at 0.
pub fn qlog_statistic(obs: &[f64; 3], exp: &[f64; 3], ngenes: f64) -> f64 {
    let sum: f64 = obs
        .iter()
        .zip(exp)
        .filter(|&(&o, _)| o > 0.0)
        .map(|(&o, &e)| (o - e) * (o - e) / e * (o.ln() - e.ln()))
        .sum();
    (2.0 * ngenes * sum).max(0.0)
}

/// Pearson statistic `n Σ_j (p̂_j − p_j)²/p_j`.
pub fn pearson_statistic(obs: &[f64; 3], exp: &[f64; 3], ngenes: f64) -> f64 {
    let sum: f64 = obs
        .iter()
        .zip(exp)
        .map(|(&o, &e)| (o - e) * (o - e) / e)
        .sum();
    ngenes * sum
}

/// Compute the chosen multinomial statistic for one quartet.
pub fn multinomial_statistic(
    statistic: OutlierStatistic,
    obs: &[f64; 3],
    exp: &[f64; 3],
    ngenes: f64,
) -> f64 {
    match statistic {
        OutlierStatistic::Lrt => lrt_statistic(obs, exp, ngenes),
        OutlierStatistic::Qlog => qlog_statistic(obs, exp, ngenes),
        OutlierStatistic::Pearson => pearson_statistic(obs, exp, ngenes),
    }
}

/// Outlier p-value of one quartet: the statistic against χ²(2).
pub fn multinomial_pvalue(
    statistic: OutlierStatistic,
    obs: &[f64; 3],
    exp: &[f64; 3],
    ngenes: f64,
) -> f64 {
    chisq_sf(multinomial_statistic(statistic, obs, exp, ngenes), 2.0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// 2. DIRICHLET STATISTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// Two-sided tail probability of a single CF under the Dirichlet marginal.
///
/// The marginal of one component of Dirichlet(α·p) is Beta(α p_j, α (1 − p_j)).
/// Returns `P(|X − p_j| ≥ |p̂_j − p_j|)`.
pub fn dirichlet_marginal_pvalue(obs: f64, exp: f64, alpha: f64) -> f64 {
    let d = (obs - exp).abs();
    if d == 0.0 {
        return 1.0;
    }
    let dist = match Beta::new(alpha * exp, alpha * (1.0 - exp)) {
        Ok(dist) => dist,
        // expected CF at 0 or 1: the marginal is a point mass
        Err(_) => return 0.0,
    };
    let lower = exp - d;
    let upper = exp + d;
    let p_lower = if lower <= 0.0 { 0.0 } else { dist.cdf(lower) };
    let p_upper = if upper >= 1.0 { 0.0 } else { dist.sf(upper) };
    (p_lower + p_upper).clamp(0.0, 1.0)
}

/// Outlier p-value of one quartet under the Dirichlet model.
///
/// `major` is the index of the resolution displayed by the network's major
/// tree; it is only used by [`DirichletStatistic::MaxCf`].
pub fn dirichlet_pvalue(
    statistic: DirichletStatistic,
    obs: &[f64; 3],
    exp: &[f64; 3],
    major: usize,
    alpha: f64,
) -> f64 {
    match statistic {
        DirichletStatistic::MaxCf => dirichlet_marginal_pvalue(obs[major], exp[major], alpha),
        DirichletStatistic::MinPval => (0..3)
            .map(|j| dirichlet_marginal_pvalue(obs[j], exp[j], alpha))
            .fold(1.0, f64::min),
    }
}

/// Log density of Dirichlet(α·mean) at `x`.
pub fn dirichlet_log_density(x: &[f64; 3], mean: &[f64; 3], alpha: f64) -> f64 {
    let mut ll = ln_gamma(alpha);
    for j in 0..3 {
        let a = alpha * mean[j];
        ll += (a - 1.0) * x[j].ln() - ln_gamma(a);
    }
    ll
}

/// Replacement value for observed CFs equal to 0 in Dirichlet fitting.
///
/// The Dirichlet density vanishes at 0 for concentration above 1, so zero
/// observations are replaced by the smaller of the minimum expected CF and
/// the minimum nonzero observed CF across the whole dataset.
pub fn zero_replacement(obs: &[[f64; 3]], exp: &[[f64; 3]]) -> f64 {
    let min_exp = exp.iter().flatten().copied().fold(f64::INFINITY, f64::min);
    let min_obs = obs
        .iter()
        .flatten()
        .copied()
        .filter(|&v| v > 0.0)
        .fold(f64::INFINITY, f64::min);
    min_exp.min(min_obs)
}

/// Copy of `obs` with every exact 0 replaced by [`zero_replacement`].
pub fn substitute_zeros(obs: &[[f64; 3]], exp: &[[f64; 3]]) -> Vec<[f64; 3]> {
    let value = zero_replacement(obs, exp);
    obs.iter()
        .map(|cf| cf.map(|v| if v == 0.0 { value } else { v }))
        .collect()
}

/// Dirichlet pseudo-log-likelihood summed over quartets.
///
/// `obs` must already be free of zeros (see [`substitute_zeros`]).
pub fn dirichlet_pseudo_loglik(obs: &[[f64; 3]], exp: &[[f64; 3]], alpha: f64) -> f64 {
    obs.iter()
        .zip(exp)
        .map(|(x, mean)| dirichlet_log_density(x, mean, alpha))
        .sum()
}

// ═══════════════════════════════════════════════════════════════════════════════
// 3. AGGREGATE TESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Count of outlier p-values.
pub fn count_outliers(p_values: &[f64]) -> usize {
    p_values.iter().filter(|&&p| p < OUTLIER_THRESHOLD).count()
}

/// z statistic for an excess of outliers among independent quartets.
///
/// `z = (q̂ − 0.05) / sqrt(0.05 · 0.95 / N)` with `q̂` the outlier proportion.
/// Returns NaN for an empty slice.
pub fn outlier_z(p_values: &[f64]) -> f64 {
    proportion_z(count_outliers(p_values), p_values.len())
}

fn proportion_z(outliers: usize, n: usize) -> f64 {
    if n == 0 {
        return f64::NAN;
    }
    let nf = n as f64;
    let q = outliers as f64 / nf;
    (q - OUTLIER_THRESHOLD) / (OUTLIER_THRESHOLD * (1.0 - OUTLIER_THRESHOLD) / nf).sqrt()
}

/// One-sided p-value of `z` against N(0, σ²).
pub fn z_pvalue(z: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return if z > 0.0 { 0.0 } else { 1.0 };
    }
    match Normal::new(0.0, sigma) {
        Ok(dist) => dist.sf(z),
        Err(_) => f64::NAN,
    }
}

/// Dependence-correction σ from simulated z-values, assuming mean 0.
///
/// σ² is the mean of the squared z-values.
pub fn sigma_from_z(z_values: &[f64]) -> f64 {
    if z_values.is_empty() {
        return f64::NAN;
    }
    let ss: f64 = z_values.iter().map(|z| z * z).sum();
    (ss / z_values.len() as f64).sqrt()
}

/// Overall one-sided outlier test.
#[derive(Debug, Clone, Serialize)]
pub struct OutlierTest {
    pub n_quartets: usize,
    pub n_outliers: usize,
    pub z: f64,
    pub sigma: f64,
    pub p_value: f64,
}

impl OutlierTest {
    /// Test outlier p-values, correcting the reference distribution by `sigma`
    /// (1.0 for independent quartets).
    pub fn from_pvalues(p_values: &[f64], sigma: f64) -> Self {
        let z = outlier_z(p_values);
        Self {
            n_quartets: p_values.len(),
            n_outliers: count_outliers(p_values),
            z,
            sigma,
            p_value: z_pvalue(z, sigma),
        }
    }
}

/// Counts of outlier p-values in the four TICR bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BinCounts(pub [usize; 4]);

impl BinCounts {
    pub const LABELS: [&'static str; 4] = ["[0, 0.01)", "[0.01, 0.05)", "[0.05, 0.1)", "[0.1, 1]"];

    /// Bin p-values.
    pub fn from_pvalues(p_values: &[f64]) -> Self {
        let mut counts = [0usize; 4];
        for &p in p_values {
            let bin = TICR_BIN_EDGES
                .iter()
                .position(|&edge| p < edge)
                .unwrap_or(3);
            counts[bin] += 1;
        }
        Self(counts)
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }

    /// One-sided test on the two bins below 0.05. Returns `(p_value, z)`.
    pub fn one_sided(&self) -> (f64, f64) {
        let z = proportion_z(self.0[0] + self.0[1], self.total());
        (z_pvalue(z, 1.0), z)
    }

    /// Chi-squared test of the four bins against their expected proportions.
    /// Returns `(p_value, chi2)`.
    pub fn goodness(&self) -> (f64, f64) {
        let n = self.total() as f64;
        let chi2: f64 = self
            .0
            .iter()
            .zip(TICR_EXPECTED_PROPORTIONS)
            .map(|(&obs, prop)| {
                let expected = prop * n;
                let diff = obs as f64 - expected;
                diff * diff / expected
            })
            .sum();
        (chisq_sf(chi2, 3.0), chi2)
    }

    /// Run the chosen overall test. Returns `(p_value, statistic)`.
    pub fn test(&self, test: TicrTest) -> (f64, f64) {
        match test {
            TicrTest::OneSided => self.one_sided(),
            TicrTest::Goodness => self.goodness(),
        }
    }
}
