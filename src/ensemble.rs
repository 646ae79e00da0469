//! Affine-invariant ensemble sampler (Goodman & Weare stretch move).
//!
//! The walkers are split into two halves. Each half is moved using the
//! positions of the other half, so all proposals of one half are
//! independent and are evaluated as a single batch.

use rand::Rng;

use crate::error::ConfigError;
use crate::executor::Executor;
use crate::posterior::LogpFunc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchMove {
    pub a: f64,
}

impl Default for StretchMove {
    fn default() -> Self {
        Self { a: 2. }
    }
}

impl StretchMove {
    pub fn new(a: f64) -> Result<Self, ConfigError> {
        if !(a > 1.) {
            return Err(ConfigError::InvalidSettings(format!(
                "stretch scale must be larger than 1, got {a}"
            )));
        }
        Ok(Self { a })
    }

    /// Draw from `g(z) ∝ 1/sqrt(z)` on `[1/a, a]`.
    pub fn sample_z<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.random();
        ((self.a - 1.) * u + 1.).powi(2) / self.a
    }

    /// Log of the Metropolis ratio. Proposals with a non-finite density
    /// are never accepted.
    pub fn log_accept(&self, z: f64, ndim: usize, old: f64, new: f64) -> f64 {
        if new.is_nan() || new == f64::NEG_INFINITY {
            return f64::NEG_INFINITY;
        }
        (ndim as f64 - 1.) * z.ln() + new - old
    }
}

/// Positions and densities of all walkers.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleState {
    pub positions: Vec<Vec<f64>>,
    pub log_probs: Vec<f64>,
    pub accepted: Vec<u64>,
    pub iterations: u64,
}

impl EnsembleState {
    pub fn nwalkers(&self) -> usize {
        self.positions.len()
    }

    pub fn acceptance_fraction(&self) -> Vec<f64> {
        self.accepted
            .iter()
            .map(|&a| {
                if self.iterations == 0 {
                    0.
                } else {
                    a as f64 / self.iterations as f64
                }
            })
            .collect()
    }

    pub fn mean_acceptance(&self) -> f64 {
        let frac = self.acceptance_fraction();
        if frac.is_empty() {
            return 0.;
        }
        frac.iter().sum::<f64>() / frac.len() as f64
    }
}

pub struct EnsembleSampler<'a, F: LogpFunc + ?Sized, E: Executor> {
    logp: &'a F,
    executor: &'a E,
    nwalkers: usize,
    stretch: StretchMove,
}

impl<'a, F: LogpFunc + ?Sized, E: Executor> EnsembleSampler<'a, F, E> {
    pub fn new(logp: &'a F, executor: &'a E, nwalkers: usize) -> Result<Self, ConfigError> {
        let ndim = logp.dim();
        if nwalkers % 2 != 0 || nwalkers < 2 * ndim || nwalkers < 2 {
            return Err(ConfigError::InvalidSettings(format!(
                "nwalkers must be even and at least twice the number of parameters \
                 ({ndim}), got {nwalkers}"
            )));
        }
        Ok(Self {
            logp,
            executor,
            nwalkers,
            stretch: StretchMove::default(),
        })
    }

    pub fn with_stretch(mut self, stretch: StretchMove) -> Self {
        self.stretch = stretch;
        self
    }

    pub fn ndim(&self) -> usize {
        self.logp.dim()
    }

    pub fn nwalkers(&self) -> usize {
        self.nwalkers
    }

    /// Evaluate the starting positions.
    pub fn init_state(&self, positions: Vec<Vec<f64>>) -> Result<EnsembleState, ConfigError> {
        if positions.len() != self.nwalkers || positions.iter().any(|p| p.len() != self.ndim()) {
            return Err(ConfigError::InvalidSettings(format!(
                "expected {} starting positions of dimension {}",
                self.nwalkers,
                self.ndim()
            )));
        }
        let log_probs = self.executor.evaluate(self.logp, &positions);
        Ok(self.resume_state(positions, log_probs, 0))
    }

    /// Continue from known positions and densities without evaluating
    /// them again.
    pub fn resume_state(
        &self,
        positions: Vec<Vec<f64>>,
        log_probs: Vec<f64>,
        iterations: u64,
    ) -> EnsembleState {
        assert!(positions.len() == self.nwalkers);
        assert!(log_probs.len() == self.nwalkers);
        EnsembleState {
            positions,
            log_probs,
            accepted: vec![0; self.nwalkers],
            iterations,
        }
    }

    /// One iteration: both halves are updated in turn.
    pub fn step<R: Rng + ?Sized>(&self, state: &mut EnsembleState, rng: &mut R) {
        let half = self.nwalkers / 2;
        self.update_half(state, 0..half, half..self.nwalkers, rng);
        self.update_half(state, half..self.nwalkers, 0..half, rng);
        state.iterations += 1;
    }

    fn update_half<R: Rng + ?Sized>(
        &self,
        state: &mut EnsembleState,
        active: std::ops::Range<usize>,
        complement: std::ops::Range<usize>,
        rng: &mut R,
    ) {
        let ndim = self.ndim();
        let n_comp = complement.len();

        let mut stretches = Vec::with_capacity(active.len());
        let proposals: Vec<Vec<f64>> = active
            .clone()
            .map(|k| {
                let z = self.stretch.sample_z(rng);
                let j = complement.start + rng.random_range(0..n_comp);
                stretches.push(z);
                let (x, c) = (&state.positions[k], &state.positions[j]);
                c.iter().zip(x).map(|(&c, &x)| c + z * (x - c)).collect()
            })
            .collect();

        let new_log_probs = self.executor.evaluate(self.logp, &proposals);

        for ((k, proposal), (z, new)) in active
            .zip(proposals)
            .zip(stretches.into_iter().zip(new_log_probs))
        {
            let log_ratio = self.stretch.log_accept(z, ndim, state.log_probs[k], new);
            let u: f64 = rng.random();
            if u.ln() < log_ratio {
                state.positions[k] = proposal;
                state.log_probs[k] = new;
                state.accepted[k] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SerialExecutor;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::StandardNormal;

    struct Gaussian {
        mu: Vec<f64>,
    }

    impl LogpFunc for Gaussian {
        fn dim(&self) -> usize {
            self.mu.len()
        }

        fn logp(&self, position: &[f64]) -> f64 {
            -0.5 * position
                .iter()
                .zip(&self.mu)
                .map(|(x, m)| (x - m) * (x - m))
                .sum::<f64>()
        }
    }

    struct Box01;

    impl LogpFunc for Box01 {
        fn dim(&self) -> usize {
            1
        }

        fn logp(&self, position: &[f64]) -> f64 {
            if (0. ..=1.).contains(&position[0]) {
                0.
            } else {
                f64::NEG_INFINITY
            }
        }
    }

    fn start(n: usize, ndim: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
        (0..n)
            .map(|_| (0..ndim).map(|_| rng.sample::<f64, _>(StandardNormal) * 0.1).collect())
            .collect()
    }

    #[test]
    fn walker_count_validation() {
        let target = Gaussian { mu: vec![0.; 3] };
        assert!(EnsembleSampler::new(&target, &SerialExecutor, 5).is_err());
        assert!(EnsembleSampler::new(&target, &SerialExecutor, 4).is_err());
        assert!(EnsembleSampler::new(&target, &SerialExecutor, 6).is_ok());
        assert!(StretchMove::new(1.).is_err());
    }

    #[test]
    fn stretch_range() {
        let stretch = StretchMove::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..1000 {
            let z = stretch.sample_z(&mut rng);
            assert!((0.5..=2.).contains(&z));
        }
    }

    #[test]
    fn recovers_gaussian_mean() {
        let target = Gaussian { mu: vec![1., -2.] };
        let sampler = EnsembleSampler::new(&target, &SerialExecutor, 16).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut state = sampler.init_state(start(16, 2, &mut rng)).unwrap();
        let mut sums = [0.; 2];
        let mut count = 0.;
        for it in 0..3000 {
            sampler.step(&mut state, &mut rng);
            if it >= 500 {
                for p in state.positions.iter() {
                    sums[0] += p[0];
                    sums[1] += p[1];
                    count += 1.;
                }
            }
        }
        assert!((sums[0] / count - 1.).abs() < 0.1);
        assert!((sums[1] / count + 2.).abs() < 0.1);
        let acc = state.mean_acceptance();
        assert!(acc > 0.3 && acc < 0.95, "{acc}");
        assert_eq!(state.iterations, 3000);
    }

    #[test]
    fn never_leaves_support() {
        let sampler = EnsembleSampler::new(&Box01, &SerialExecutor, 8).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let init = (0..8).map(|i| vec![0.1 + 0.1 * i as f64]).collect();
        let mut state = sampler.init_state(init).unwrap();
        for _ in 0..500 {
            sampler.step(&mut state, &mut rng);
            assert!(state.positions.iter().all(|p| (0. ..=1.).contains(&p[0])));
        }
    }

    #[test]
    fn same_seed_same_chain() {
        let target = Gaussian { mu: vec![0.; 2] };
        let sampler = EnsembleSampler::new(&target, &SerialExecutor, 8).unwrap();
        let run = || {
            let mut rng = ChaCha8Rng::seed_from_u64(9);
            let mut state = sampler.init_state(start(8, 2, &mut rng)).unwrap();
            for _ in 0..50 {
                sampler.step(&mut state, &mut rng);
            }
            state
        };
        assert_eq!(run(), run());
    }
}
