//! Source-frame mass distributions `p(m1, m2)`.
//!
//! Distributions with smoothed edges are normalized numerically on a fixed
//! logarithmic mass grid. The normalization is computed once per
//! hyper-parameter vector by [`MassDistribution::prepare`].

use std::fmt::Debug;

use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::math::{
    cumulative_trapezoid, geomspace, interp, log_ndtr, log_trapezoid, logaddexp, ndtr,
    normal_logpdf,
};
use crate::params::ParamTable;
use crate::sampling::InverseCdf;

/// Support of the numerically normalized mass distributions, in solar masses.
pub const MASS_GRID_MIN: f64 = 0.05;
pub const MASS_GRID_MAX: f64 = 1000.;
const MASS_GRID_POINTS: usize = 2000;

const MAX_REJECTIONS: usize = 10_000;

pub trait MassDistribution: Send + Sync + Debug {
    /// Parameters with their fiducial values, in canonical order.
    fn params(&self) -> ParamTable;

    /// Normalize the distribution for one set of parameters.
    fn prepare<'a>(&'a self, lambda: &[f64]) -> Box<dyn MassPdf + 'a>;
}

/// A mass distribution with fixed parameters.
pub trait MassPdf {
    /// `log p(m1, m2)`, `-inf` outside of the support.
    fn log_pdf(&self, m1: f64, m2: f64) -> f64;

    /// Draw `n` pairs with `m2 <= m1`. Pairs are NaN if the distribution
    /// can not be normalized.
    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Vec<(f64, f64)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MassVariant {
    #[default]
    SmoothPowerLaw,
    PowerLawPlusPeak,
    GaussianPeak,
}

impl MassVariant {
    pub fn build(self) -> Box<dyn MassDistribution> {
        match self {
            MassVariant::SmoothPowerLaw => Box::new(SmoothPowerLaw::new()),
            MassVariant::PowerLawPlusPeak => Box::new(PowerLawPlusPeak::new()),
            MassVariant::GaussianPeak => Box::new(GaussianPeak),
        }
    }
}

fn power_law_params() -> ParamTable {
    ParamTable::new()
        .with("alpha", 0.75, r"$\alpha$")
        .with("beta", 0., r"$\beta$")
        .with("ml", 5., r"$M_l$")
        .with("sl", 0.1, r"$\sigma_l$")
        .with("mh", 45., r"$M_h$")
        .with("sh", 0.1, r"$\sigma_h$")
}

/// Power law in both masses with Gaussian-CDF tapers in `log m`.
#[derive(Debug, Clone, Copy)]
struct Taper {
    alpha: f64,
    beta: f64,
    log_ml: f64,
    sl: f64,
    log_mh: f64,
    sh: f64,
}

impl Taper {
    fn from_lambda(lambda: &[f64]) -> Self {
        Self {
            alpha: lambda[0],
            beta: lambda[1],
            log_ml: lambda[2].ln(),
            sl: lambda[3],
            log_mh: lambda[4].ln(),
            sh: lambda[5],
        }
    }

    fn log_low(&self, log_m: f64) -> f64 {
        log_ndtr((log_m - self.log_ml) / self.sl)
    }

    fn log_high(&self, log_m: f64) -> f64 {
        log_ndtr(-(log_m - self.log_mh) / self.sh)
    }

    /// Unnormalized `log p(m1)`.
    fn log_primary(&self, m: f64) -> f64 {
        let log_m = m.ln();
        -self.alpha * log_m + self.log_low(log_m) + self.log_high(log_m)
    }

    /// Unnormalized `log p(m2)`, before truncation at `m1`.
    fn log_secondary(&self, m: f64) -> f64 {
        let log_m = m.ln();
        self.beta * log_m + self.log_low(log_m)
    }
}

/// Gaussian peak truncated to the mass grid.
#[derive(Debug, Clone, Copy)]
struct Peak {
    log_weight: f64,
    mu: f64,
    sigma: f64,
    log_norm: f64,
}

impl Peak {
    fn new(weight: f64, mu: f64, sigma: f64) -> Self {
        let norm = ndtr((MASS_GRID_MAX - mu) / sigma) - ndtr((MASS_GRID_MIN - mu) / sigma);
        Self {
            log_weight: weight.ln(),
            mu,
            sigma,
            log_norm: norm.ln(),
        }
    }

    fn log_pdf(&self, m: f64) -> f64 {
        normal_logpdf(m, self.mu, self.sigma) - self.log_norm
    }
}

/// Grid-normalized power law with an optional Gaussian peak in `m1`.
struct TaperedPdf<'a> {
    grid: &'a [f64],
    taper: Taper,
    peak: Option<Peak>,
    log_norm_primary: f64,
    cum_secondary: Vec<f64>,
    secondary_shift: f64,
}

impl<'a> TaperedPdf<'a> {
    fn new(grid: &'a [f64], taper: Taper, peak: Option<Peak>) -> Self {
        let log_primary: Vec<f64> = grid.iter().map(|&m| taper.log_primary(m)).collect();
        let log_norm_primary = log_trapezoid(grid, &log_primary);

        let log_secondary: Vec<f64> = grid.iter().map(|&m| taper.log_secondary(m)).collect();
        let shift = log_secondary
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let secondary: Vec<f64> = log_secondary.iter().map(|&l| (l - shift).exp()).collect();
        let cum_secondary = cumulative_trapezoid(grid, &secondary);

        Self {
            grid,
            taper,
            peak,
            log_norm_primary,
            cum_secondary,
            secondary_shift: shift,
        }
    }

    fn in_grid(&self, m: f64) -> bool {
        m >= MASS_GRID_MIN && m <= MASS_GRID_MAX
    }

    fn log_pdf_primary(&self, m1: f64) -> f64 {
        let power_law = self.taper.log_primary(m1) - self.log_norm_primary;
        match &self.peak {
            None => power_law,
            Some(peak) => logaddexp(
                (-peak.log_weight.exp()).ln_1p() + power_law,
                peak.log_weight + peak.log_pdf(m1),
            ),
        }
    }

    /// `log ∫_{min}^{m1} p(m2) dm2`, in the shifted units of `cum_secondary`.
    fn log_cum_secondary(&self, m1: f64) -> f64 {
        interp(m1, self.grid, &self.cum_secondary, 0., f64::NAN).ln()
    }
}

impl MassPdf for TaperedPdf<'_> {
    fn log_pdf(&self, m1: f64, m2: f64) -> f64 {
        if !(self.in_grid(m1) && self.in_grid(m2)) || m2 > m1 {
            return f64::NEG_INFINITY;
        }
        // No secondary mass below m1 has support.
        let log_cum = self.log_cum_secondary(m1);
        if !log_cum.is_finite() {
            return f64::NEG_INFINITY;
        }
        let log_m2 = self.taper.log_secondary(m2) - self.secondary_shift;
        self.log_pdf_primary(m1) + log_m2 - log_cum
    }

    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Vec<(f64, f64)> {
        let pdf: Vec<f64> = self
            .grid
            .iter()
            .map(|&m| self.log_pdf_primary(m).exp())
            .collect();
        let Some(primary) = InverseCdf::from_trapezoid(self.grid.to_vec(), &pdf) else {
            return vec![(f64::NAN, f64::NAN); n];
        };
        let last = self.grid.len() - 1;
        (0..n)
            .map(|_| {
                let m1 = primary.sample(rng);
                let u: f64 = rng.random();
                let target = u * interp(m1, self.grid, &self.cum_secondary, 0., 0.);
                let m2 = interp(
                    target,
                    &self.cum_secondary,
                    self.grid,
                    self.grid[0],
                    self.grid[last],
                );
                (m1, m2.min(m1))
            })
            .collect()
    }
}

/// Power law with smoothed lower and upper edges.
///
/// `p(m1) ∝ m1^-alpha S_l(m1) S_h(m1)` and
/// `p(m2 | m1) ∝ m2^beta S_l(m2)` for `m2 <= m1`, where the tapers are
/// Gaussian CDFs in `log m` with widths `sl` and `sh`.
#[derive(Debug, Clone)]
pub struct SmoothPowerLaw {
    grid: Vec<f64>,
}

impl SmoothPowerLaw {
    pub fn new() -> Self {
        Self {
            grid: geomspace(MASS_GRID_MIN, MASS_GRID_MAX, MASS_GRID_POINTS),
        }
    }
}

impl Default for SmoothPowerLaw {
    fn default() -> Self {
        Self::new()
    }
}

impl MassDistribution for SmoothPowerLaw {
    fn params(&self) -> ParamTable {
        power_law_params()
    }

    fn prepare<'a>(&'a self, lambda: &[f64]) -> Box<dyn MassPdf + 'a> {
        Box::new(TaperedPdf::new(&self.grid, Taper::from_lambda(lambda), None))
    }
}

/// [`SmoothPowerLaw`] plus a Gaussian component in `m1` with weight
/// `lambdaPeak`.
#[derive(Debug, Clone)]
pub struct PowerLawPlusPeak {
    grid: Vec<f64>,
}

impl PowerLawPlusPeak {
    pub fn new() -> Self {
        Self {
            grid: geomspace(MASS_GRID_MIN, MASS_GRID_MAX, MASS_GRID_POINTS),
        }
    }
}

impl Default for PowerLawPlusPeak {
    fn default() -> Self {
        Self::new()
    }
}

impl MassDistribution for PowerLawPlusPeak {
    fn params(&self) -> ParamTable {
        power_law_params()
            .with("lambdaPeak", 0.1, r"$\lambda_{\rm p}$")
            .with("muMass", 35., r"$\mu_{\rm m}$")
            .with("sigmaMass", 4., r"$\sigma_{\rm m}$")
    }

    fn prepare<'a>(&'a self, lambda: &[f64]) -> Box<dyn MassPdf + 'a> {
        let peak = Peak::new(lambda[6], lambda[7], lambda[8]);
        Box::new(TaperedPdf::new(
            &self.grid,
            Taper::from_lambda(&lambda[..6]),
            Some(peak),
        ))
    }
}

/// Truncated Gaussian in `m1`, `m2` uniform in `(0, m1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianPeak;

impl MassDistribution for GaussianPeak {
    fn params(&self) -> ParamTable {
        ParamTable::new()
            .with("muMass", 30., r"$\mu_{\rm m}$")
            .with("sigmaMass", 5., r"$\sigma_{\rm m}$")
    }

    fn prepare<'a>(&'a self, lambda: &[f64]) -> Box<dyn MassPdf + 'a> {
        let (mu, sigma) = (lambda[0], lambda[1]);
        Box::new(GaussianPeakPdf {
            mu,
            sigma,
            log_norm: log_ndtr(mu / sigma),
        })
    }
}

struct GaussianPeakPdf {
    mu: f64,
    sigma: f64,
    log_norm: f64,
}

impl MassPdf for GaussianPeakPdf {
    fn log_pdf(&self, m1: f64, m2: f64) -> f64 {
        if !(m1 > 0. && m2 > 0. && m2 <= m1) {
            return f64::NEG_INFINITY;
        }
        normal_logpdf(m1, self.mu, self.sigma) - self.log_norm - m1.ln()
    }

    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Vec<(f64, f64)> {
        let Ok(normal) = Normal::new(self.mu, self.sigma) else {
            return vec![(f64::NAN, f64::NAN); n];
        };
        (0..n)
            .map(|_| {
                let m1 = (0..MAX_REJECTIONS)
                    .map(|_| normal.sample(rng))
                    .find(|&m| m > 0.)
                    .unwrap_or(f64::NAN);
                let u: f64 = rng.random();
                (m1, u * m1)
            })
            .collect()
    }
}
