//! Selection-bias correction from a set of detected injections.
//!
//! The detectable fraction is estimated by importance sampling,
//!
//! `xi = 1/N_gen Σ_j dN(theta_j) / w_j`,
//!
//! with `w_j` the density the injections were drawn from. The estimate is
//! only trusted if its effective sample size is large compared to the
//! number of observed events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::InjectionDataset;
use crate::likelihood::to_source_frame;
use crate::math::weight_moments;
use crate::population::Points;
use crate::registry::AllPopulations;

/// Minimum ratio of effective injections to observed events.
pub const ESS_MULTIPLE: f64 = 4.;

/// How the overall merger rate enters the likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateTreatment {
    /// The rate is marginalized over, only the shape of the population is
    /// constrained.
    #[default]
    Shape,
    /// Poisson likelihood for the number of detections.
    Poisson,
}

/// What to do when the effective sample size is too small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionGate {
    /// Keep the value, count and log the evaluation.
    #[default]
    Diagnostic,
    /// Return `-inf`.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionSettings {
    pub include_uncertainty: bool,
    pub rate: RateTreatment,
    pub gate: SelectionGate,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            include_uncertainty: true,
            rate: RateTreatment::Shape,
            gate: SelectionGate::Diagnostic,
        }
    }
}

/// Monte-Carlo estimate of the detectable fraction with its diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionEstimate {
    pub log_xi: f64,
    /// Variance of the estimator of `xi`.
    pub variance: f64,
    /// Effective number of injections, `(Σw)² / Σw²`.
    pub ess: f64,
    /// `xi² / variance`.
    pub n_eff: f64,
}

impl SelectionEstimate {
    /// Estimate from the log importance weights `log dN - log w`.
    pub fn from_log_weights(log_weights: &[f64], n_gen: u64) -> Self {
        let (max, s1, s2) = weight_moments(log_weights);
        let n_gen = n_gen as f64;
        if !(s1 > 0.) || !max.is_finite() {
            return Self {
                log_xi: f64::NEG_INFINITY,
                variance: 0.,
                ess: 0.,
                n_eff: 0.,
            };
        }
        let log_xi = max + s1.ln() - n_gen.ln();
        let xi = log_xi.exp();
        let sum_sq = (2. * max).exp() * s2;
        let variance = sum_sq / (n_gen * n_gen) - xi * xi / n_gen;
        let n_eff = if variance > 0. {
            xi * xi / variance
        } else {
            f64::INFINITY
        };
        Self {
            log_xi,
            variance,
            ess: s1 * s1 / s2,
            n_eff,
        }
    }

    pub fn is_reliable(&self, n_obs: usize) -> bool {
        self.ess >= ESS_MULTIPLE * n_obs as f64
    }
}

/// Penalty that turns the product of event likelihoods into the
/// selection-corrected hyper-likelihood.
pub trait SelectionTerm: Send + Sync {
    fn log_selection(&self, lambda: &[f64]) -> f64;
}

#[derive(Debug)]
pub struct SelectionBias {
    pops: Arc<AllPopulations>,
    injections: InjectionDataset,
    n_obs: usize,
    settings: SelectionSettings,
    flagged: AtomicU64,
}

impl SelectionBias {
    pub fn new(
        pops: Arc<AllPopulations>,
        injections: InjectionDataset,
        n_obs: usize,
        settings: SelectionSettings,
    ) -> Self {
        Self {
            pops,
            injections,
            n_obs,
            settings,
            flagged: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &SelectionSettings {
        &self.settings
    }

    /// Number of evaluations whose effective sample size was below the
    /// threshold.
    pub fn flagged_count(&self) -> u64 {
        self.flagged.load(Ordering::Relaxed)
    }

    pub fn estimate(&self, lambda: &[f64]) -> SelectionEstimate {
        let inj = &self.injections;
        let n = inj.n_det();
        let grid = self.pops.distance_grid(lambda);
        let (mut m1, mut m2, mut z) = (vec![0.; n], vec![0.; n], vec![0.; n]);
        to_source_frame(
            &grid,
            inj.m1z.view(),
            inj.m2z.view(),
            inj.dl.view(),
            &mut m1,
            &mut m2,
            &mut z,
        );
        let chi = inj.chi_eff.to_vec();
        let mut log_w = vec![0.; n];
        self.pops.log_dn_detframe_with(
            &grid,
            &Points::new(&m1, &m2, &z, &chi),
            inj.t_obs,
            lambda,
            &mut log_w,
        );
        for (w, &log_gen) in log_w.iter_mut().zip(inj.log_weights.iter()) {
            *w -= log_gen;
            if w.is_nan() {
                *w = f64::NEG_INFINITY;
            }
        }
        SelectionEstimate::from_log_weights(&log_w, inj.n_gen)
    }

    /// Penalty added to the log-likelihood for a given estimate.
    pub fn penalty(&self, est: &SelectionEstimate) -> f64 {
        let n_obs = self.n_obs as f64;
        match self.settings.rate {
            RateTreatment::Shape => {
                let mut value = -n_obs * est.log_xi;
                if self.settings.include_uncertainty {
                    value += (3. * n_obs + n_obs * n_obs) / (2. * est.n_eff);
                }
                value
            }
            RateTreatment::Poisson => {
                let mut value = -est.log_xi.exp();
                if self.settings.include_uncertainty {
                    value += est.variance / 2.;
                }
                value
            }
        }
    }
}

impl SelectionTerm for SelectionBias {
    fn log_selection(&self, lambda: &[f64]) -> f64 {
        let est = self.estimate(lambda);
        // Nothing detectable, the population can not produce the data.
        if !est.log_xi.is_finite() {
            return f64::NEG_INFINITY;
        }
        if !est.is_reliable(self.n_obs) {
            self.flagged.fetch_add(1, Ordering::Relaxed);
            debug!(ess = est.ess, n_obs = self.n_obs, "effective sample size too small");
            if self.settings.gate == SelectionGate::Reject {
                return f64::NEG_INFINITY;
            }
        }
        self.penalty(&est)
    }
}
