//! Redshift evolution of the merger rate density.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::params::{DistUnit, ParamTable};

/// Local merger rate density in `Gpc^-3 yr^-1`.
pub const FIDUCIAL_R0: f64 = 64.4;

/// Source-frame merger rate density `R(z)` per unit comoving volume and
/// source-frame time.
pub trait RateEvolution: Send + Sync + Debug {
    /// Parameters with their fiducial values, in canonical order.
    fn params(&self) -> ParamTable;

    /// `log R(z)`. `lambda` holds exactly the values of [`Self::params`].
    fn log_rate(&self, z: f64, lambda: &[f64]) -> f64;
}

/// Names of the available rate evolution models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateVariant {
    #[default]
    PowerLaw,
    MadauDickinson,
    Constant,
}

impl RateVariant {
    pub fn build(self, unit: DistUnit) -> Box<dyn RateEvolution> {
        match self {
            RateVariant::PowerLaw => Box::new(PowerLawRate { unit }),
            RateVariant::MadauDickinson => Box::new(MadauDickinsonRate { unit }),
            RateVariant::Constant => Box::new(ConstantRate { unit }),
        }
    }
}

/// `R(z) = R0 (1 + z)^lambdaRedshift`
#[derive(Debug, Clone, Copy)]
pub struct PowerLawRate {
    pub unit: DistUnit,
}

impl RateEvolution for PowerLawRate {
    fn params(&self) -> ParamTable {
        ParamTable::new()
            .with("R0", FIDUCIAL_R0 * self.unit.rate_scale(), r"$R_0$")
            .with("lambdaRedshift", 3., r"$\lambda$")
    }

    fn log_rate(&self, z: f64, lambda: &[f64]) -> f64 {
        let (r0, gamma) = (lambda[0], lambda[1]);
        r0.ln() + gamma * (1. + z).ln()
    }
}

/// Madau-Dickinson shaped evolution, normalized so that `R(0) = R0`.
#[derive(Debug, Clone, Copy)]
pub struct MadauDickinsonRate {
    pub unit: DistUnit,
}

impl RateEvolution for MadauDickinsonRate {
    fn params(&self) -> ParamTable {
        ParamTable::new()
            .with("R0", FIDUCIAL_R0 * self.unit.rate_scale(), r"$R_0$")
            .with("alphaRedshift", 2.7, r"$\alpha_z$")
            .with("betaRedshift", 2.9, r"$\beta_z$")
            .with("zp", 1.9, r"$z_p$")
    }

    fn log_rate(&self, z: f64, lambda: &[f64]) -> f64 {
        let (r0, alpha, beta, zp) = (lambda[0], lambda[1], lambda[2], lambda[3]);
        let log_zp1 = (1. + z).ln();
        let log_peak = (1. + zp).ln();
        let shape = |log_x: f64| {
            alpha * log_x - ((alpha + beta) * (log_x - log_peak)).exp().ln_1p()
        };
        r0.ln() + shape(log_zp1) - shape(0.)
    }
}

/// Redshift independent rate `R(z) = R0`.
#[derive(Debug, Clone, Copy)]
pub struct ConstantRate {
    pub unit: DistUnit,
}

impl RateEvolution for ConstantRate {
    fn params(&self) -> ParamTable {
        ParamTable::new().with("R0", FIDUCIAL_R0 * self.unit.rate_scale(), r"$R_0$")
    }

    fn log_rate(&self, _z: f64, lambda: &[f64]) -> f64 {
        lambda[0].ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rates_at_zero_equal_r0() {
        for variant in [
            RateVariant::PowerLaw,
            RateVariant::MadauDickinson,
            RateVariant::Constant,
        ] {
            let model = variant.build(DistUnit::Gpc);
            let params = model.params();
            assert_eq!(params.names()[0], "R0");
            assert_relative_eq!(
                model.log_rate(0., params.values()),
                FIDUCIAL_R0.ln(),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn power_law_slope() {
        let model = PowerLawRate {
            unit: DistUnit::Gpc,
        };
        let lambda = [10., 2.];
        assert_relative_eq!(
            model.log_rate(1., &lambda),
            10f64.ln() + 2. * 2f64.ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn madau_dickinson_peaks_near_zp() {
        let model = MadauDickinsonRate {
            unit: DistUnit::Gpc,
        };
        let lambda = model.params().values().to_vec();
        let peak = model.log_rate(1.9, &lambda);
        assert!(peak > model.log_rate(0.5, &lambda));
        assert!(peak > model.log_rate(6., &lambda));
    }

    #[test]
    fn mpc_scaling() {
        let model = ConstantRate {
            unit: DistUnit::Mpc,
        };
        assert_relative_eq!(
            model.params().values()[0],
            FIDUCIAL_R0 * 1e-9,
            max_relative = 1e-12
        );
    }
}
