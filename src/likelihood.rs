//! Monte-Carlo marginal likelihood of the observed events.
//!
//! For every event the population density is averaged over the posterior
//! samples, each sample reweighted by the prior of the single-event
//! analysis:
//!
//! `log L_i = logsumexp_j(log dN(theta_ij) - log pi_ref(theta_ij)) - log N_i`
//!
//! The densities are evaluated in detector-frame masses and luminosity
//! distance, the frame the samples live in.

use std::sync::Arc;

use ndarray::ArrayView1;

use crate::data::EventDataset;
use crate::math::logsumexp;
use crate::population::Points;
use crate::registry::AllPopulations;

/// Log-likelihood of the data as a function of the full `Lambda`.
pub trait LogLikelihood: Send + Sync {
    fn log_likelihood(&self, lambda: &[f64]) -> f64;
}

/// Sum over catalogs and events of the per-event marginal likelihoods.
#[derive(Debug, Clone)]
pub struct HyperLikelihood {
    pops: Arc<AllPopulations>,
    catalogs: Vec<EventDataset>,
}

/// Reusable per-event buffers.
#[derive(Debug, Default)]
struct Scratch {
    m1: Vec<f64>,
    m2: Vec<f64>,
    z: Vec<f64>,
    chi: Vec<f64>,
    log_w: Vec<f64>,
}

impl Scratch {
    fn resize(&mut self, n: usize) {
        self.m1.resize(n, 0.);
        self.m2.resize(n, 0.);
        self.z.resize(n, 0.);
        self.chi.resize(n, 0.);
        self.log_w.resize(n, 0.);
    }
}

/// Redshift and source-frame masses of detector-frame samples. Samples
/// outside of the distance tables get NaN.
pub(crate) fn to_source_frame(
    grid: &crate::cosmology::DistanceGrid,
    m1z: ArrayView1<f64>,
    m2z: ArrayView1<f64>,
    dl: ArrayView1<f64>,
    m1: &mut [f64],
    m2: &mut [f64],
    z: &mut [f64],
) {
    for (i, ((&m1z, &m2z), &dl)) in m1z.iter().zip(m2z.iter()).zip(dl.iter()).enumerate() {
        let zi = grid.z_at_dl(dl);
        z[i] = zi;
        m1[i] = m1z / (1. + zi);
        m2[i] = m2z / (1. + zi);
    }
}

impl HyperLikelihood {
    pub fn new(pops: Arc<AllPopulations>, catalogs: Vec<EventDataset>) -> Self {
        Self { pops, catalogs }
    }

    pub fn n_obs(&self) -> usize {
        self.catalogs.iter().map(|c| c.n_obs()).sum()
    }

    pub fn catalogs(&self) -> &[EventDataset] {
        &self.catalogs
    }

    /// Marginal log-likelihood of every event, catalogs concatenated.
    pub fn per_event_log_likelihood(&self, lambda: &[f64]) -> Vec<f64> {
        let grid = self.pops.distance_grid(lambda);
        let mut scratch = Scratch::default();
        let mut out = Vec::with_capacity(self.n_obs());

        for catalog in self.catalogs.iter() {
            scratch.resize(catalog.samples_per_event());
            for event in 0..catalog.n_obs() {
                to_source_frame(
                    &grid,
                    catalog.m1z.row(event),
                    catalog.m2z.row(event),
                    catalog.dl.row(event),
                    &mut scratch.m1,
                    &mut scratch.m2,
                    &mut scratch.z,
                );
                for (c, &v) in scratch.chi.iter_mut().zip(catalog.chi_eff.row(event)) {
                    *c = v;
                }
                let points = Points::new(&scratch.m1, &scratch.m2, &scratch.z, &scratch.chi);
                self.pops.log_dn_detframe_with(
                    &grid,
                    &points,
                    catalog.t_obs,
                    lambda,
                    &mut scratch.log_w,
                );
                for (w, &log_prior) in scratch
                    .log_w
                    .iter_mut()
                    .zip(catalog.log_origin_prior.row(event).iter())
                {
                    *w -= log_prior;
                    if w.is_nan() {
                        *w = f64::NEG_INFINITY;
                    }
                }
                let n_samples = catalog.n_samples[event] as f64;
                out.push(logsumexp(&scratch.log_w) - n_samples.ln());
            }
        }
        out
    }
}

impl LogLikelihood for HyperLikelihood {
    fn log_likelihood(&self, lambda: &[f64]) -> f64 {
        let mut total = 0f64;
        for value in self.per_event_log_likelihood(lambda) {
            total += value;
            if total == f64::NEG_INFINITY {
                return total;
            }
        }
        total
    }
}
