//! Integrated autocorrelation time of ensemble chains.
//!
//! The normalized autocorrelation function is averaged over walkers, and
//! the sum is truncated with Sokal's automatic window: the smallest lag
//! `M` with `M >= c * tau(M)`.

use crate::storage::ChainBuffer;

/// Window constant of the automatic windowing procedure.
pub const DEFAULT_WINDOW: f64 = 5.;

/// Normalized autocorrelation of one series at lag `k`,
/// `Σ_t (x_t - μ)(x_{t+k} - μ) / Σ_t (x_t - μ)²`.
fn autocorrelation(centered: &[f64], var: f64, lag: usize) -> f64 {
    let n = centered.len();
    let sum: f64 = centered[..n - lag]
        .iter()
        .zip(&centered[lag..])
        .map(|(a, b)| a * b)
        .sum();
    sum / var
}

/// Integrated autocorrelation time of one parameter from the series of
/// every walker, `series[walker][iteration]`. NaN if the chain is empty
/// or has no variance in some walker.
pub fn integrated_time(series: &[Vec<f64>], c: f64) -> f64 {
    let Some(n) = series.first().map(|s| s.len()) else {
        return f64::NAN;
    };
    if n == 0 || series.iter().any(|s| s.len() != n) {
        return f64::NAN;
    }

    let centered: Vec<(Vec<f64>, f64)> = series
        .iter()
        .map(|s| {
            let mean = s.iter().sum::<f64>() / n as f64;
            let centered: Vec<f64> = s.iter().map(|x| x - mean).collect();
            let var = centered.iter().map(|x| x * x).sum::<f64>();
            (centered, var)
        })
        .collect();
    if centered.iter().any(|(_, var)| !(*var > 0.)) {
        return f64::NAN;
    }

    let nwalkers = series.len() as f64;
    // tau(M) = 2 Σ_{k=0}^{M} f(k) - 1
    let mut cumulative = 0.;
    let mut tau = f64::NAN;
    for lag in 0..n {
        let f = centered
            .iter()
            .map(|(x, var)| autocorrelation(x, *var, lag))
            .sum::<f64>()
            / nwalkers;
        cumulative += f;
        tau = 2. * cumulative - 1.;
        if lag as f64 >= c * tau {
            return tau;
        }
    }
    tau
}

/// Autocorrelation time of every parameter of a stored chain.
pub fn autocorr_times(chain: &ChainBuffer, c: f64) -> Vec<f64> {
    (0..chain.ndim())
        .map(|p| integrated_time(&chain.param_chain(p), c))
        .collect()
}

/// Burn-in and thinning derived from the autocorrelation times,
/// `discard = 2 max(tau)` and `thin = max(1, 0.5 min(tau))`.
pub fn burn_in_and_thin(taus: &[f64]) -> Option<(usize, usize)> {
    if taus.is_empty() || taus.iter().any(|t| !t.is_finite()) {
        return None;
    }
    let max = taus.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = taus.iter().copied().fold(f64::INFINITY, f64::min);
    let discard = (2. * max).max(0.) as usize;
    let thin = ((0.5 * min).floor() as usize).max(1);
    Some((discard, thin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rand_distr::StandardNormal;

    fn ar1(rho: f64, n: usize, rng: &mut ChaCha8Rng) -> Vec<f64> {
        let scale = (1. - rho * rho).sqrt();
        let mut x = 0.;
        (0..n)
            .map(|_| {
                let eps: f64 = rng.sample(StandardNormal);
                x = rho * x + scale * eps;
                x
            })
            .collect()
    }

    #[test]
    fn white_noise() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let series: Vec<Vec<f64>> = (0..8).map(|_| ar1(0., 5000, &mut rng)).collect();
        let tau = integrated_time(&series, DEFAULT_WINDOW);
        assert!((tau - 1.).abs() < 0.2, "{tau}");
    }

    #[test]
    fn ar1_process() {
        // tau = (1 + rho) / (1 - rho)
        let rho: f64 = 0.9;
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let series: Vec<Vec<f64>> = (0..16).map(|_| ar1(rho, 20_000, &mut rng)).collect();
        let tau = integrated_time(&series, DEFAULT_WINDOW);
        assert_relative_eq!(tau, (1. + rho) / (1. - rho), max_relative = 0.15);
    }

    #[test]
    fn degenerate_chains() {
        assert!(integrated_time(&[], DEFAULT_WINDOW).is_nan());
        assert!(integrated_time(&[vec![]], DEFAULT_WINDOW).is_nan());
        assert!(integrated_time(&[vec![1.; 10], vec![2.; 10]], DEFAULT_WINDOW).is_nan());
    }

    #[test]
    fn short_chain_returns_last_estimate() {
        let series = vec![vec![0., 1., 2., 3.], vec![3., 2., 1., 0.]];
        assert!(integrated_time(&series, 1000.).is_finite());
    }

    #[test]
    fn thinning_suggestion() {
        assert_eq!(burn_in_and_thin(&[10., 40.5]), Some((81, 5)));
        assert_eq!(burn_in_and_thin(&[1.2]), Some((2, 1)));
        assert_eq!(burn_in_and_thin(&[f64::NAN, 3.]), None);
        assert_eq!(burn_in_and_thin(&[]), None);
    }
}
