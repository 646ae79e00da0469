use rand::{Rng, RngCore};

use crate::math::{cumulative_trapezoid, interp};

/// Tabulated cumulative distribution, inverted by linear interpolation.
#[derive(Debug, Clone)]
pub(crate) struct InverseCdf {
    x: Vec<f64>,
    cdf: Vec<f64>,
    total: f64,
}

impl InverseCdf {
    /// Cumulative sum of the density values, normalized by the last entry.
    pub(crate) fn from_cumsum(x: Vec<f64>, pdf: &[f64]) -> Option<Self> {
        assert!(x.len() == pdf.len());
        let mut acc = 0f64;
        let cum: Vec<f64> = pdf
            .iter()
            .map(|&p| {
                if p.is_finite() && p > 0. {
                    acc += p;
                }
                acc
            })
            .collect();
        Self::normalized(x, cum)
    }

    /// Cumulative trapezoid integral of the density, normalized.
    pub(crate) fn from_trapezoid(x: Vec<f64>, pdf: &[f64]) -> Option<Self> {
        let clean: Vec<f64> = pdf
            .iter()
            .map(|&p| if p.is_finite() && p > 0. { p } else { 0. })
            .collect();
        let cum = cumulative_trapezoid(&x, &clean);
        Self::normalized(x, cum)
    }

    fn normalized(x: Vec<f64>, mut cum: Vec<f64>) -> Option<Self> {
        let total = *cum.last()?;
        if !(total > 0.) || !total.is_finite() {
            return None;
        }
        cum.iter_mut().for_each(|c| *c /= total);
        Some(Self { x, cdf: cum, total })
    }

    /// Integral of the tabulated density over the whole grid.
    pub(crate) fn total(&self) -> f64 {
        self.total
    }

    /// Value at which the normalized CDF reaches `u`.
    pub(crate) fn quantile(&self, u: f64) -> f64 {
        let n = self.x.len();
        interp(u, &self.cdf, &self.x, self.x[0], self.x[n - 1])
    }

    /// Normalized CDF at `x`.
    pub(crate) fn cdf(&self, x: f64) -> f64 {
        interp(x, &self.x, &self.cdf, 0., 1.)
    }

    pub(crate) fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        let u: f64 = rng.random();
        self.quantile(u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::linspace;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn uniform_quantiles() {
        let x = linspace(0., 2., 2001);
        let pdf = vec![0.5; x.len()];
        let inv = InverseCdf::from_trapezoid(x, &pdf).unwrap();
        assert_relative_eq!(inv.total(), 1., epsilon = 1e-12);
        assert_relative_eq!(inv.quantile(0.25), 0.5, epsilon = 1e-9);
        assert_relative_eq!(inv.cdf(1.5), 0.75, epsilon = 1e-9);
    }

    #[test]
    fn sample_mean_of_linear_density() {
        let x = linspace(0., 1., 10_000);
        let pdf: Vec<f64> = x.iter().map(|v| 2. * v).collect();
        let inv = InverseCdf::from_cumsum(x, &pdf).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let n = 20_000;
        let mean = (0..n).map(|_| inv.sample(&mut rng)).sum::<f64>() / n as f64;
        assert!((mean - 2. / 3.).abs() < 0.01);
    }

    #[test]
    fn degenerate_density() {
        let x = linspace(0., 1., 10);
        assert!(InverseCdf::from_cumsum(x.clone(), &[0.; 10]).is_none());
        assert!(InverseCdf::from_trapezoid(x, &[f64::NAN; 10]).is_none());
    }
}
