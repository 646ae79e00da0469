#![allow(dead_code)]

use std::path::Path;

use anyhow::Result;
use gwpop::{write_mock, EventDataset, InjectionDataset, MOCK_T_OBS};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

/// Catalog of `n_obs` events with `n_samples` samples each. Samples
/// scatter around a true source with `m1 > m2 > 0` and `dl > 0`.
pub fn synthetic_events(n_obs: usize, n_samples: usize, seed: u64) -> Result<EventDataset> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut m1 = Array2::zeros((n_obs, n_samples));
    let mut m2 = Array2::zeros((n_obs, n_samples));
    let mut dl = Array2::zeros((n_obs, n_samples));
    for i in 0..n_obs {
        let m1_true = 20. + 30. * rng.random::<f64>();
        let q_true = 0.5 + 0.4 * rng.random::<f64>();
        let dl_true = 0.5 + 2. * rng.random::<f64>();
        for j in 0..n_samples {
            let e1: f64 = rng.sample(StandardNormal);
            let e2: f64 = rng.sample(StandardNormal);
            let e3: f64 = rng.sample(StandardNormal);
            let primary = m1_true * (0.1 * e1).exp();
            let q = (q_true + 0.05 * e2).clamp(0.1, 1.);
            m1[[i, j]] = primary;
            m2[[i, j]] = primary * q;
            dl[[i, j]] = dl_true * (0.2 * e3).exp();
        }
    }
    Ok(EventDataset::new(m1, m2, dl, None, MOCK_T_OBS)?)
}

/// Injections drawn uniformly in detector-frame masses and distance.
pub fn synthetic_injections(n_det: usize, n_gen: u64, seed: u64) -> Result<InjectionDataset> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut m1 = Array1::zeros(n_det);
    let mut m2 = Array1::zeros(n_det);
    let mut dl = Array1::zeros(n_det);
    let mut wt = Array1::zeros(n_det);
    for k in 0..n_det {
        let primary = 5. + 95. * rng.random::<f64>();
        let secondary = 5. + (primary - 5.) * rng.random::<f64>();
        m1[k] = primary;
        m2[k] = secondary;
        dl[k] = 0.1 + 4.9 * rng.random::<f64>();
        wt[k] = 1. / (95. * (primary - 5.).max(1e-3) * 4.9);
    }
    Ok(InjectionDataset::new(
        m1,
        m2,
        dl,
        None,
        wt.view(),
        n_gen,
        MOCK_T_OBS,
    )?)
}

/// Write a small mock dataset to `dir` in the layout read by the loader.
pub fn write_dataset(dir: &Path, n_obs: usize, n_samples: usize, n_det: usize) -> Result<()> {
    let events = synthetic_events(n_obs, n_samples, 1)?;
    let injections = synthetic_injections(n_det, 4 * n_det as u64, 2)?;
    write_mock(dir, &events, &injections)
}
