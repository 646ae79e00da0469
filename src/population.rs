//! Populations of compact binaries.
//!
//! A population contributes a differential rate
//! `dR/dm1 dm2 = R(z) p(m1, m2) p(chi_eff)` to the registry. Its parameter
//! vector is always laid out as rate parameters, then mass parameters, then
//! spin parameters.

use std::collections::BTreeMap;
use std::fmt::Debug;

use itertools::izip;
use rand::RngCore;
use rand_distr::{Distribution, LogNormal};

use crate::error::ConfigError;
use crate::mass::{MassDistribution, MassVariant};
use crate::math::normal_logpdf;
use crate::params::{DistUnit, ParamTable};
use crate::rate::{RateEvolution, RateVariant, FIDUCIAL_R0};
use crate::spin::{SpinDistribution, SpinVariant};

/// Source-frame points at which a population is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct Points<'a> {
    pub m1: &'a [f64],
    pub m2: &'a [f64],
    pub z: &'a [f64],
    pub chi_eff: &'a [f64],
}

impl<'a> Points<'a> {
    pub fn new(m1: &'a [f64], m2: &'a [f64], z: &'a [f64], chi_eff: &'a [f64]) -> Self {
        assert!(m1.len() == m2.len());
        assert!(m1.len() == z.len());
        assert!(m1.len() == chi_eff.len());
        Self { m1, m2, z, chi_eff }
    }

    pub fn len(&self) -> usize {
        self.m1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.m1.is_empty()
    }
}

/// Number of rate, mass and spin parameters of a population.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSizes {
    pub rate: usize,
    pub mass: usize,
    pub spin: usize,
}

impl SegmentSizes {
    pub fn total(&self) -> usize {
        self.rate + self.mass + self.spin
    }
}

pub trait Population: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn params(&self) -> &ParamTable;

    fn apply_overrides(&mut self, overrides: &BTreeMap<String, f64>) -> usize;

    fn segment_sizes(&self) -> SegmentSizes;

    /// Split the population parameters into rate, mass and spin parts.
    fn split_lambda<'a>(&self, lambda: &'a [f64]) -> (&'a [f64], &'a [f64], &'a [f64]) {
        let sizes = self.segment_sizes();
        assert!(lambda.len() == sizes.total());
        let (rate, rest) = lambda.split_at(sizes.rate);
        let (mass, spin) = rest.split_at(sizes.mass);
        (rate, mass, spin)
    }

    /// `log R(z)` for the rate parameters of this population.
    fn log_rate(&self, z: f64, lambda_rate: &[f64]) -> f64;

    /// Add `log dR/dm1 dm2` at every point to `out`.
    fn add_log_dr(&self, points: &Points, lambda: &[f64], out: &mut [f64]);

    /// Draw `n` source-frame mass pairs.
    fn sample_masses(&self, n: usize, lambda: &[f64], rng: &mut dyn RngCore) -> Vec<(f64, f64)>;
}

/// Astrophysical population built from independent rate, mass and spin
/// models.
#[derive(Debug)]
pub struct AstroPopulation {
    name: String,
    rate: Box<dyn RateEvolution>,
    mass: Box<dyn MassDistribution>,
    spin: Box<dyn SpinDistribution>,
    table: ParamTable,
    sizes: SegmentSizes,
}

impl AstroPopulation {
    pub fn new(
        name: &str,
        rate: Box<dyn RateEvolution>,
        mass: Box<dyn MassDistribution>,
        spin: Box<dyn SpinDistribution>,
    ) -> Result<Self, ConfigError> {
        let (rate_params, mass_params, spin_params) = (rate.params(), mass.params(), spin.params());
        let sizes = SegmentSizes {
            rate: rate_params.len(),
            mass: mass_params.len(),
            spin: spin_params.len(),
        };
        let mut table = rate_params;
        table.extend(&mass_params)?;
        table.extend(&spin_params)?;
        Ok(Self {
            name: name.to_string(),
            rate,
            mass,
            spin,
            table,
            sizes,
        })
    }

    pub fn from_variants(
        name: &str,
        rate: RateVariant,
        mass: MassVariant,
        spin: SpinVariant,
        unit: DistUnit,
    ) -> Result<Self, ConfigError> {
        Self::new(name, rate.build(unit), mass.build(), spin.build())
    }
}

impl Population for AstroPopulation {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &ParamTable {
        &self.table
    }

    fn apply_overrides(&mut self, overrides: &BTreeMap<String, f64>) -> usize {
        self.table.apply_overrides(overrides)
    }

    fn segment_sizes(&self) -> SegmentSizes {
        self.sizes
    }

    fn log_rate(&self, z: f64, lambda_rate: &[f64]) -> f64 {
        self.rate.log_rate(z, lambda_rate)
    }

    fn add_log_dr(&self, points: &Points, lambda: &[f64], out: &mut [f64]) {
        assert!(out.len() == points.len());
        let (lambda_rate, lambda_mass, lambda_spin) = self.split_lambda(lambda);
        let mass = self.mass.prepare(lambda_mass);
        for (out, &m1, &m2, &z, &chi) in izip!(
            out.iter_mut(),
            points.m1,
            points.m2,
            points.z,
            points.chi_eff
        ) {
            *out += self.rate.log_rate(z, lambda_rate)
                + mass.log_pdf(m1, m2)
                + self.spin.log_pdf(chi, lambda_spin);
        }
    }

    fn sample_masses(&self, n: usize, lambda: &[f64], rng: &mut dyn RngCore) -> Vec<(f64, f64)> {
        let (_, lambda_mass, _) = self.split_lambda(lambda);
        self.mass.prepare(lambda_mass).sample(n, rng)
    }
}

/// Primordial black holes with a log-normal mass function `psi(m)`.
///
/// `p(m1, m2) = 2 psi(m1) psi(m2)` for `m2 <= m1`, with a redshift
/// independent rate `R0PBH`.
#[derive(Debug, Clone)]
pub struct PrimordialPopulation {
    name: String,
    table: ParamTable,
}

impl PrimordialPopulation {
    pub fn new(name: &str, unit: DistUnit) -> Self {
        let table = ParamTable::new()
            .with("R0PBH", FIDUCIAL_R0 * unit.rate_scale(), r"$R_{0,\rm PBH}$")
            .with("MPBH", 30., r"$M_{\rm PBH}$")
            .with("sigmaPBH", 0.5, r"$\sigma_{\rm PBH}$");
        Self {
            name: name.to_string(),
            table,
        }
    }
}

fn log_lognormal(m: f64, log_mc: f64, sigma: f64) -> f64 {
    let log_m = m.ln();
    normal_logpdf(log_m, log_mc, sigma) - log_m
}

impl Population for PrimordialPopulation {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &ParamTable {
        &self.table
    }

    fn apply_overrides(&mut self, overrides: &BTreeMap<String, f64>) -> usize {
        self.table.apply_overrides(overrides)
    }

    fn segment_sizes(&self) -> SegmentSizes {
        SegmentSizes {
            rate: 1,
            mass: 2,
            spin: 0,
        }
    }

    fn log_rate(&self, _z: f64, lambda_rate: &[f64]) -> f64 {
        lambda_rate[0].ln()
    }

    fn add_log_dr(&self, points: &Points, lambda: &[f64], out: &mut [f64]) {
        assert!(out.len() == points.len());
        let (lambda_rate, lambda_mass, _) = self.split_lambda(lambda);
        let log_r0 = lambda_rate[0].ln();
        let (log_mc, sigma) = (lambda_mass[0].ln(), lambda_mass[1]);
        for (out, &m1, &m2) in izip!(out.iter_mut(), points.m1, points.m2) {
            let log_p = if m1 > 0. && m2 > 0. && m2 <= m1 {
                2f64.ln() + log_lognormal(m1, log_mc, sigma) + log_lognormal(m2, log_mc, sigma)
            } else {
                f64::NEG_INFINITY
            };
            *out += log_r0 + log_p;
        }
    }

    fn sample_masses(&self, n: usize, lambda: &[f64], rng: &mut dyn RngCore) -> Vec<(f64, f64)> {
        let (_, lambda_mass, _) = self.split_lambda(lambda);
        let Ok(dist) = LogNormal::new(lambda_mass[0].ln(), lambda_mass[1]) else {
            return vec![(f64::NAN, f64::NAN); n];
        };
        (0..n)
            .map(|_| {
                let a: f64 = dist.sample(rng);
                let b: f64 = dist.sample(rng);
                (a.max(b), a.min(b))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn astro() -> AstroPopulation {
        AstroPopulation::from_variants(
            "astro",
            RateVariant::PowerLaw,
            MassVariant::SmoothPowerLaw,
            SpinVariant::GaussianChiEff,
            DistUnit::Gpc,
        )
        .unwrap()
    }

    #[test]
    fn parameters_are_ordered_rate_mass_spin() {
        let pop = astro();
        assert_eq!(
            pop.params().names(),
            &["R0", "lambdaRedshift", "alpha", "beta", "ml", "sl", "mh", "sh", "muChi", "sigmaChi"]
        );
        let lambda = pop.params().values().to_vec();
        let (rate, mass, spin) = pop.split_lambda(&lambda);
        assert_eq!((rate.len(), mass.len(), spin.len()), (2, 6, 2));
    }

    #[derive(Debug)]
    struct CollidingSpin;

    impl SpinDistribution for CollidingSpin {
        fn params(&self) -> ParamTable {
            ParamTable::new().with("alpha", 1., "")
        }

        fn log_pdf(&self, _chi_eff: f64, _lambda: &[f64]) -> f64 {
            0.
        }
    }

    #[test]
    fn colliding_sub_models_are_rejected() {
        let err = AstroPopulation::new(
            "bad",
            RateVariant::PowerLaw.build(DistUnit::Gpc),
            MassVariant::SmoothPowerLaw.build(),
            Box::new(CollidingSpin),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::DuplicateParameter {
                name: "alpha".to_string()
            }
        );
    }

    #[test]
    fn astro_rate_is_sum_of_parts() {
        let pop = astro();
        let lambda = pop.params().values().to_vec();
        let (m1, m2, z, chi) = ([30.], [20.], [0.5], [0.1]);
        let mut out = [0.];
        pop.add_log_dr(&Points::new(&m1, &m2, &z, &chi), &lambda, &mut out);

        let (rate, mass, spin) = pop.split_lambda(&lambda);
        let expected = pop.rate.log_rate(0.5, rate)
            + pop.mass.prepare(mass).log_pdf(30., 20.)
            + pop.spin.log_pdf(0.1, spin);
        assert_relative_eq!(out[0], expected, epsilon = 1e-12);
    }

    #[test]
    fn primordial_mass_function() {
        let pop = PrimordialPopulation::new("pbh", DistUnit::Gpc);
        let lambda = [1., 30., 0.5];
        let mut out = [0., 0.];
        let (m1, m2, z, chi) = ([30., 20.], [20., 30.], [1., 1.], [0., 0.]);
        pop.add_log_dr(&Points::new(&m1, &m2, &z, &chi), &lambda, &mut out);
        let expected = 2f64.ln()
            + log_lognormal(30., 30f64.ln(), 0.5)
            + log_lognormal(20., 30f64.ln(), 0.5);
        assert_relative_eq!(out[0], expected, epsilon = 1e-12);
        assert_eq!(out[1], f64::NEG_INFINITY);

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for (a, b) in pop.sample_masses(100, &lambda, &mut rng) {
            assert!(a >= b);
        }
    }
}
