//! Event posterior samples and injection campaigns.

use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::error::DataError;

/// Posterior samples of the detected events of one catalog.
///
/// All arrays have shape `(n_obs, n_samples)`. Masses are detector frame,
/// distances in the unit of the run.
#[derive(Debug, Clone)]
pub struct EventDataset {
    pub m1z: Array2<f64>,
    pub m2z: Array2<f64>,
    pub dl: Array2<f64>,
    pub chi_eff: Array2<f64>,
    /// `log` of the prior used by the single-event parameter estimation.
    pub log_origin_prior: Array2<f64>,
    pub n_samples: Vec<usize>,
    pub t_obs: f64,
}

fn check_shape(field: &'static str, arr: &Array2<f64>, shape: &[usize]) -> Result<(), DataError> {
    if arr.shape() != shape {
        return Err(DataError::ShapeMismatch {
            field,
            expected: shape.to_vec(),
            found: arr.shape().to_vec(),
        });
    }
    Ok(())
}

impl EventDataset {
    /// Validate and assemble a catalog. Missing spins are set to zero and the
    /// reference prior is flat.
    pub fn new(
        m1z: Array2<f64>,
        m2z: Array2<f64>,
        dl: Array2<f64>,
        chi_eff: Option<Array2<f64>>,
        t_obs: f64,
    ) -> Result<Self, DataError> {
        let shape = m1z.shape().to_vec();
        if m1z.is_empty() {
            return Err(DataError::Empty);
        }
        check_shape("m2z", &m2z, &shape)?;
        check_shape("dl", &dl, &shape)?;
        let chi_eff = match chi_eff {
            Some(chi) => {
                check_shape("chi_eff", &chi, &shape)?;
                chi
            }
            None => Array2::zeros(m1z.raw_dim()),
        };

        for ((index, &m1), (&m2, &d)) in m1z
            .indexed_iter()
            .zip(m2z.iter().zip(dl.iter()))
        {
            if !(m1 > 0.) {
                return Err(DataError::NonPositive {
                    field: "m1z",
                    index,
                    value: m1,
                });
            }
            if !(m2 > 0.) {
                return Err(DataError::NonPositive {
                    field: "m2z",
                    index,
                    value: m2,
                });
            }
            if !(d > 0.) {
                return Err(DataError::NonPositive {
                    field: "dl",
                    index,
                    value: d,
                });
            }
            if m2 > m1 {
                return Err(DataError::SecondaryAbovePrimary { index, m1, m2 });
            }
        }

        let n_samples = m1z
            .axis_iter(Axis(0))
            .map(|row| row.iter().filter(|&&m| m != 0.).count())
            .collect();

        Ok(Self {
            log_origin_prior: Array2::zeros(m1z.raw_dim()),
            m1z,
            m2z,
            dl,
            chi_eff,
            n_samples,
            t_obs,
        })
    }

    pub fn n_obs(&self) -> usize {
        self.m1z.nrows()
    }

    pub fn samples_per_event(&self) -> usize {
        self.m1z.ncols()
    }

    /// Keep only the selected events, in the given order.
    pub fn select_events(&self, events: &[usize]) -> Self {
        let pick = |a: &Array2<f64>| a.select(Axis(0), events);
        Self {
            m1z: pick(&self.m1z),
            m2z: pick(&self.m2z),
            dl: pick(&self.dl),
            chi_eff: pick(&self.chi_eff),
            log_origin_prior: pick(&self.log_origin_prior),
            n_samples: events.iter().map(|&i| self.n_samples[i]).collect(),
            t_obs: self.t_obs,
        }
    }

    /// Keep the first `n_obs` events and the first `n_samples` samples of each.
    pub fn truncate(&self, n_obs: Option<usize>, n_samples: Option<usize>) -> Self {
        let rows = n_obs.unwrap_or(self.n_obs()).min(self.n_obs());
        let cols = n_samples
            .unwrap_or(self.samples_per_event())
            .min(self.samples_per_event());
        let cut = |a: &Array2<f64>| a.slice(ndarray::s![..rows, ..cols]).to_owned();
        Self {
            m1z: cut(&self.m1z),
            m2z: cut(&self.m2z),
            dl: cut(&self.dl),
            chi_eff: cut(&self.chi_eff),
            log_origin_prior: cut(&self.log_origin_prior),
            n_samples: self.n_samples[..rows].iter().map(|&n| n.min(cols)).collect(),
            t_obs: self.t_obs,
        }
    }
}

/// Detected injections with their generation weights.
#[derive(Debug, Clone)]
pub struct InjectionDataset {
    pub m1z: Array1<f64>,
    pub m2z: Array1<f64>,
    pub dl: Array1<f64>,
    pub chi_eff: Array1<f64>,
    /// `log` of the density the injections were drawn from.
    pub log_weights: Array1<f64>,
    pub n_gen: u64,
    pub t_obs: f64,
}

impl InjectionDataset {
    pub fn new(
        m1z: Array1<f64>,
        m2z: Array1<f64>,
        dl: Array1<f64>,
        chi_eff: Option<Array1<f64>>,
        weights: ArrayView1<f64>,
        n_gen: u64,
        t_obs: f64,
    ) -> Result<Self, DataError> {
        let n = m1z.len();
        if n == 0 {
            return Err(DataError::Empty);
        }
        for (field, len) in [("m2z", m2z.len()), ("dl", dl.len()), ("wt", weights.len())] {
            if len != n {
                return Err(DataError::ShapeMismatch {
                    field,
                    expected: vec![n],
                    found: vec![len],
                });
            }
        }
        let chi_eff = match chi_eff {
            Some(chi) if chi.len() != n => {
                return Err(DataError::ShapeMismatch {
                    field: "chi_eff",
                    expected: vec![n],
                    found: vec![chi.len()],
                })
            }
            Some(chi) => chi,
            None => Array1::zeros(n),
        };
        if let Some((index, &value)) = weights.iter().enumerate().find(|&(_, &w)| !(w > 0.)) {
            return Err(DataError::NonPositiveWeight { index, value });
        }
        if n_gen < n as u64 {
            return Err(DataError::TooFewGenerated { n_gen, n_det: n });
        }
        Ok(Self {
            m1z,
            m2z,
            dl,
            chi_eff,
            log_weights: weights.mapv(f64::ln),
            n_gen,
            t_obs,
        })
    }

    pub fn n_det(&self) -> usize {
        self.m1z.len()
    }

    /// Keep the first `n` injections. `n_gen` is unchanged.
    pub fn truncate(&self, n: usize) -> Self {
        let n = n.min(self.n_det());
        let cut = |a: &Array1<f64>| a.slice(ndarray::s![..n]).to_owned();
        Self {
            m1z: cut(&self.m1z),
            m2z: cut(&self.m2z),
            dl: cut(&self.dl),
            chi_eff: cut(&self.chi_eff),
            log_weights: cut(&self.log_weights),
            n_gen: self.n_gen,
            t_obs: self.t_obs,
        }
    }
}
