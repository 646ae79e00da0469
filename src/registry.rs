//! Registry of the cosmology and all populations.
//!
//! The full hyper-parameter vector `Lambda` is the concatenation of the
//! cosmological parameters followed by the parameters of every population,
//! in registration order.

use std::collections::BTreeMap;

use ndarray::Array3;
use rand::{Rng, RngCore};
use tracing::debug;

use crate::cosmology::{DistanceGrid, FlrwCosmology};
use crate::error::ConfigError;
use crate::math::linspace;
use crate::params::{DistUnit, ParamTable};
use crate::population::{Points, Population};
use crate::sampling::InverseCdf;

const REDSHIFT_GRID_POINTS: usize = 100_000;

/// Cosmology plus an ordered list of populations.
#[derive(Debug)]
pub struct AllPopulations {
    cosmo: FlrwCosmology,
    pops: Vec<Box<dyn Population>>,
    n_params_per_pop: Vec<usize>,
    table: ParamTable,
}

impl AllPopulations {
    pub fn new(cosmo: FlrwCosmology) -> Self {
        let table = cosmo.params().clone();
        Self {
            cosmo,
            pops: vec![],
            n_params_per_pop: vec![],
            table,
        }
    }

    /// Register a population. Its parameters are appended to the global
    /// parameter list.
    pub fn add_pop(&mut self, pop: Box<dyn Population>) -> Result<(), ConfigError> {
        self.table.extend(pop.params())?;
        self.n_params_per_pop.push(pop.params().len());
        debug!(
            population = pop.name(),
            n_params = pop.params().len(),
            "added population"
        );
        self.pops.push(pop);
        assert!(
            self.table.len() == self.cosmo.params().len() + self.n_params_per_pop.iter().sum::<usize>()
        );
        Ok(())
    }

    pub fn cosmology(&self) -> &FlrwCosmology {
        &self.cosmo
    }

    pub fn unit(&self) -> DistUnit {
        self.cosmo.unit()
    }

    pub fn populations(&self) -> impl Iterator<Item = &dyn Population> {
        self.pops.iter().map(|p| p.as_ref())
    }

    pub fn n_pops(&self) -> usize {
        self.pops.len()
    }

    pub fn params(&self) -> &ParamTable {
        &self.table
    }

    pub fn n_params(&self) -> usize {
        self.table.len()
    }

    /// Split `Lambda` into the cosmological and the population part.
    pub fn split_params<'a>(&self, lambda: &'a [f64]) -> (&'a [f64], &'a [f64]) {
        assert!(lambda.len() == self.n_params());
        lambda.split_at(self.cosmo.params().len())
    }

    /// Pair every population with its slice of the population parameters.
    pub fn pop_params<'a>(
        &'a self,
        lambda_pops: &'a [f64],
    ) -> impl Iterator<Item = (&'a dyn Population, &'a [f64])> + 'a {
        let mut rest = lambda_pops;
        self.pops
            .iter()
            .zip(self.n_params_per_pop.iter())
            .map(move |(pop, &n)| {
                let (own, tail) = rest.split_at(n);
                rest = tail;
                (pop.as_ref(), own)
            })
    }

    /// Distance tables for the cosmological part of `Lambda`.
    pub fn distance_grid(&self, lambda: &[f64]) -> DistanceGrid {
        let (lambda_cosmo, _) = self.split_params(lambda);
        self.cosmo.grid(lambda_cosmo)
    }

    /// `log dN/dm1 dm2 dz` in the source frame, written to `out`.
    pub fn log_dn(&self, points: &Points, t_obs: f64, lambda: &[f64], out: &mut [f64]) {
        let grid = self.distance_grid(lambda);
        self.log_dn_with(&grid, points, t_obs, lambda, out);
    }

    /// Same as [`Self::log_dn`] with precomputed distance tables.
    pub fn log_dn_with(
        &self,
        grid: &DistanceGrid,
        points: &Points,
        t_obs: f64,
        lambda: &[f64],
        out: &mut [f64],
    ) {
        assert!(out.len() == points.len());
        let (_, lambda_pops) = self.split_params(lambda);

        let log_t_obs = t_obs.ln();
        for (out, &z) in out.iter_mut().zip(points.z) {
            *out = log_t_obs - z.ln_1p() + grid.log_dv_dz(z);
        }

        // Each population contributes its log rate density additively.
        if self.pops.is_empty() {
            out.iter_mut().for_each(|o| *o = f64::NEG_INFINITY);
            return;
        }
        for (pop, lambda_pop) in self.pop_params(lambda_pops) {
            pop.add_log_dr(points, lambda_pop, out);
        }
    }

    /// `log dN/dm1z dm2z ddL`, the density in detector-frame masses and
    /// luminosity distance. `points` are still source-frame values.
    pub fn log_dn_detframe(&self, points: &Points, t_obs: f64, lambda: &[f64], out: &mut [f64]) {
        let grid = self.distance_grid(lambda);
        self.log_dn_detframe_with(&grid, points, t_obs, lambda, out);
    }

    pub fn log_dn_detframe_with(
        &self,
        grid: &DistanceGrid,
        points: &Points,
        t_obs: f64,
        lambda: &[f64],
        out: &mut [f64],
    ) {
        self.log_dn_with(grid, points, t_obs, lambda, out);
        for (out, &z) in out.iter_mut().zip(points.z) {
            *out -= 2. * z.ln_1p() + grid.log_ddl_dz(z);
        }
    }

    /// Draw `n` synthetic sources per population.
    ///
    /// The result has shape `(n, n_pops, 3)` with `(m1, m2, z)` in the
    /// source frame. Redshifts are drawn by inverting the tabulated
    /// `dN/dz` on `[0, z_max]`.
    pub fn sample(
        &self,
        n: usize,
        z_max: f64,
        lambda: &[f64],
        rng: &mut dyn RngCore,
    ) -> Array3<f64> {
        let (lambda_cosmo, lambda_pops) = self.split_params(lambda);
        let grid = self.cosmo.grid_to(lambda_cosmo, z_max.max(self.cosmo.z_max()));
        let z_grid = linspace(0., z_max, REDSHIFT_GRID_POINTS);

        let mut out = Array3::from_elem((n, self.n_pops(), 3), f64::NAN);
        for (k, (pop, lambda_pop)) in self.pop_params(lambda_pops).enumerate() {
            let (lambda_rate, _, _) = pop.split_lambda(lambda_pop);
            let pdf: Vec<f64> = z_grid
                .iter()
                .map(|&z| (pop.log_rate(z, lambda_rate) + grid.log_dv_dz(z) - z.ln_1p()).exp())
                .collect();
            let redshift = InverseCdf::from_cumsum(z_grid.clone(), &pdf);
            let masses = pop.sample_masses(n, lambda_pop, rng);
            for (i, (m1, m2)) in masses.into_iter().enumerate() {
                let z = match &redshift {
                    Some(inv) => inv.quantile(rng.random()),
                    None => f64::NAN,
                };
                out[[i, k, 0]] = m1;
                out[[i, k, 1]] = m2;
                out[[i, k, 2]] = z;
            }
        }
        out
    }

    pub fn get_value(&self, name: &str) -> Option<f64> {
        self.table.value(name)
    }

    /// Fixed values must not name an inferred parameter.
    pub fn check_disjoint(
        &self,
        params_inference: &[String],
        fixed: &BTreeMap<String, f64>,
    ) -> Result<(), ConfigError> {
        match params_inference.iter().find(|n| fixed.contains_key(*n)) {
            Some(name) => Err(ConfigError::DuplicateParameter { name: name.clone() }),
            None => Ok(()),
        }
    }

    /// Base values of the requested parameters, in registry order.
    pub fn get_base_values(&self, names: &[String]) -> Result<Vec<f64>, ConfigError> {
        self.check_params_order(names)?;
        Ok(self
            .table
            .names()
            .iter()
            .zip(self.table.values())
            .filter(|(n, _)| names.contains(n))
            .map(|(_, &v)| v)
            .collect())
    }

    /// Plot labels of the requested parameters, in registry order.
    pub fn get_labels(&self, names: &[String]) -> Result<Vec<String>, ConfigError> {
        self.check_params_order(names)?;
        Ok(self
            .table
            .names()
            .iter()
            .zip(self.table.labels())
            .filter(|(n, _)| names.contains(n))
            .map(|(_, l)| l.clone())
            .collect())
    }

    /// Base values of every parameter that is not inferred.
    pub fn get_fixed_values(&self, params_inference: &[String]) -> Vec<(String, f64)> {
        self.table
            .names()
            .iter()
            .zip(self.table.values())
            .filter(|(n, _)| !params_inference.contains(n))
            .map(|(n, &v)| (n.clone(), v))
            .collect()
    }

    /// Positions of the inferred parameters within `Lambda`.
    pub fn layout(&self, params_inference: &[String]) -> Result<LambdaLayout, ConfigError> {
        self.check_params_order(params_inference)?;
        let positions = params_inference
            .iter()
            .map(|name| {
                self.table
                    .index_of(name)
                    .ok_or_else(|| ConfigError::UnknownParameter { name: name.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LambdaLayout {
            base: self.table.values().to_vec(),
            positions,
        })
    }

    /// Full `Lambda` from the inferred values, all other entries taken from
    /// the current base values.
    pub fn get_lambda(
        &self,
        theta: &[f64],
        params_inference: &[String],
    ) -> Result<Vec<f64>, ConfigError> {
        Ok(self.layout(params_inference)?.fill(theta))
    }

    /// Override base values. Every name must belong to the cosmology or to
    /// one of the populations.
    pub fn set_values(&mut self, values: &BTreeMap<String, f64>) -> Result<(), ConfigError> {
        if let Some(name) = values.keys().find(|k| self.table.index_of(k).is_none()) {
            return Err(ConfigError::UnknownParameter { name: name.clone() });
        }
        let mut applied = self.cosmo.apply_overrides(values);
        for pop in self.pops.iter_mut() {
            applied += pop.apply_overrides(values);
        }
        assert!(applied == values.len());
        self.table.apply_overrides(values);
        for (name, value) in values {
            debug!(param = name.as_str(), value, "set base value");
        }
        Ok(())
    }

    /// Verify that `names` lists known parameters in registry order.
    pub fn check_params_order(&self, names: &[String]) -> Result<(), ConfigError> {
        let positions = names
            .iter()
            .map(|name| {
                self.table
                    .index_of(name)
                    .ok_or_else(|| ConfigError::UnknownParameter { name: name.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (pair, idx) in names.windows(2).zip(positions.windows(2)) {
            if idx[0] >= idx[1] {
                return Err(ConfigError::ParamOrder {
                    first: pair[0].clone(),
                    second: pair[1].clone(),
                    expected: self.table.names().to_vec(),
                });
            }
        }
        Ok(())
    }
}

/// Precomputed scatter of the inferred vector `theta` into `Lambda`.
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaLayout {
    base: Vec<f64>,
    positions: Vec<usize>,
}

impl LambdaLayout {
    pub fn dim(&self) -> usize {
        self.positions.len()
    }

    pub fn fill(&self, theta: &[f64]) -> Vec<f64> {
        assert!(theta.len() == self.positions.len());
        let mut lambda = self.base.clone();
        for (&pos, &value) in self.positions.iter().zip(theta) {
            lambda[pos] = value;
        }
        lambda
    }

    /// Values of the inferred parameters at the base point.
    pub fn base_theta(&self) -> Vec<f64> {
        self.positions.iter().map(|&p| self.base[p]).collect()
    }
}
