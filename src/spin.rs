use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::math::{ndtr, normal_logpdf};
use crate::params::ParamTable;

/// Distribution of the effective spin `chi_eff`.
pub trait SpinDistribution: Send + Sync + Debug {
    fn params(&self) -> ParamTable;

    fn log_pdf(&self, chi_eff: f64, lambda: &[f64]) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpinVariant {
    #[default]
    Skip,
    GaussianChiEff,
}

impl SpinVariant {
    pub fn build(self) -> Box<dyn SpinDistribution> {
        match self {
            SpinVariant::Skip => Box::new(SkipSpin),
            SpinVariant::GaussianChiEff => Box::new(GaussianChiEff),
        }
    }
}

/// Spins are not modelled. No parameters, contributes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipSpin;

impl SpinDistribution for SkipSpin {
    fn params(&self) -> ParamTable {
        ParamTable::new()
    }

    fn log_pdf(&self, _chi_eff: f64, _lambda: &[f64]) -> f64 {
        0.
    }
}

/// Gaussian in `chi_eff`, truncated to `[-1, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianChiEff;

impl SpinDistribution for GaussianChiEff {
    fn params(&self) -> ParamTable {
        ParamTable::new()
            .with("muChi", 0.05, r"$\mu_{\chi}$")
            .with("sigmaChi", 0.1, r"$\sigma_{\chi}$")
    }

    fn log_pdf(&self, chi_eff: f64, lambda: &[f64]) -> f64 {
        let (mu, sigma) = (lambda[0], lambda[1]);
        if !(-1. ..=1.).contains(&chi_eff) {
            return f64::NEG_INFINITY;
        }
        let norm = ndtr((1. - mu) / sigma) - ndtr((-1. - mu) / sigma);
        normal_logpdf(chi_eff, mu, sigma) - norm.ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{linspace, log_trapezoid};
    use approx::assert_relative_eq;

    #[test]
    fn skip_has_no_parameters() {
        let spin = SpinVariant::Skip.build();
        assert!(spin.params().is_empty());
        assert_eq!(spin.log_pdf(0.3, &[]), 0.);
    }

    #[test]
    fn truncated_gaussian_is_normalized() {
        let spin = GaussianChiEff;
        let lambda = [0.3, 0.5];
        let x = linspace(-1., 1., 4001);
        let log_p: Vec<f64> = x.iter().map(|&c| spin.log_pdf(c, &lambda)).collect();
        assert_relative_eq!(log_trapezoid(&x, &log_p).exp(), 1., epsilon = 1e-6);
        assert_eq!(spin.log_pdf(1.2, &lambda), f64::NEG_INFINITY);
    }
}
