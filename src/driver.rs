//! Runs the ensemble until the autocorrelation time has stabilized or the
//! step budget is used up.
//!
//! Every iteration is appended to the chain store before the next one
//! starts, so a run can always be resumed from the last stored iteration.
//! The random stream of iteration `k` only depends on the seed and `k`,
//! which makes a resumed run reproduce an uninterrupted one.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::autocorr::{autocorr_times, burn_in_and_thin, DEFAULT_WINDOW};
use crate::ensemble::{EnsembleSampler, EnsembleState};
use crate::error::ConfigError;
use crate::executor::Executor;
use crate::notify::{send, Notifier};
use crate::posterior::LogpFunc;
use crate::storage::{AutocorrLog, ChainStore};

/// Iterations between two convergence checks.
pub const CHECK_INTERVAL: u64 = 100;

/// Redraws of a single walker before giving up on the initialization.
const MAX_INIT_TRIES: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    pub nwalkers: usize,
    pub max_steps: u64,
    /// The chain must be longer than this many autocorrelation times.
    pub convergence_ntaus: f64,
    /// Largest relative change of tau between two checks.
    pub convergence_perc_variation: f64,
    /// Spread of the initial walkers in percent of the base values.
    pub perc_variation_init: f64,
    pub seed: u64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            nwalkers: 32,
            max_steps: 10_000,
            convergence_ntaus: 50.,
            convergence_perc_variation: 0.01,
            perc_variation_init: 10.,
            seed: 1312,
        }
    }
}

impl DriverSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::InvalidSettings(
                "max_steps must be at least 1".to_string(),
            ));
        }
        if !(self.convergence_ntaus > 0.) {
            return Err(ConfigError::InvalidSettings(format!(
                "convergence_ntaus must be positive, got {}",
                self.convergence_ntaus
            )));
        }
        if !(self.convergence_perc_variation > 0.) {
            return Err(ConfigError::InvalidSettings(format!(
                "convergence_perc_variation must be positive, got {}",
                self.convergence_perc_variation
            )));
        }
        if !(self.perc_variation_init >= 0.) {
            return Err(ConfigError::InvalidSettings(format!(
                "perc_variation_init must not be negative, got {}",
                self.perc_variation_init
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Initializing,
    Sampling,
    CheckingConvergence,
    Converged,
    MaxStepsReached,
}

/// Where the walkers start.
#[derive(Debug, Clone, PartialEq)]
pub enum StartMode {
    /// Perturb the base values of the inferred parameters.
    Fresh { base: Vec<f64> },
    /// Continue from the last iteration in the store.
    Resume,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub state: DriverState,
    pub iterations: u64,
    /// Autocorrelation time of every parameter over the whole chain.
    pub taus: Vec<f64>,
    pub mean_acceptance: f64,
    /// Suggested `(discard, thin)` for the posterior samples.
    pub burn_in_thin: Option<(usize, usize)>,
    pub elapsed: Duration,
}

/// Random stream used for iteration `iteration`, stream 0 is the
/// initialization.
pub fn iteration_rng(seed: u64, iteration: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(iteration);
    rng
}

/// Walkers spread around `base` by `perc` percent, independently per walker
/// and parameter. Parameters with a zero base value are perturbed by
/// `perc / 100` in absolute terms. Draws outside the support are repeated.
pub fn initial_positions<R: Rng + ?Sized>(
    base: &[f64],
    perc: f64,
    nwalkers: usize,
    in_support: impl Fn(&[f64]) -> bool,
    rng: &mut R,
) -> Result<Vec<Vec<f64>>, ConfigError> {
    let scale = perc / 100.;
    (0..nwalkers)
        .map(|walker| {
            for _ in 0..MAX_INIT_TRIES {
                let position: Vec<f64> = base
                    .iter()
                    .map(|&b| {
                        let eps: f64 = rng.sample(StandardNormal);
                        if b == 0. {
                            scale * eps
                        } else {
                            b * (1. + scale * eps)
                        }
                    })
                    .collect();
                if in_support(&position) {
                    return Ok(position);
                }
            }
            Err(ConfigError::InvalidSettings(format!(
                "could not place walker {walker} inside the prior support around {base:?}"
            )))
        })
        .collect()
}

/// The chain is converged once it is longer than `ntaus` autocorrelation
/// times and tau has changed by less than `tol` since the last check,
/// for every parameter.
pub fn is_converged(tau: &[f64], old_tau: &[f64], iteration: u64, ntaus: f64, tol: f64) -> bool {
    let long_enough = tau.iter().all(|&t| t * ntaus < iteration as f64);
    let stable = tau
        .iter()
        .zip(old_tau)
        .all(|(&t, &old)| ((old - t) / t).abs() < tol);
    long_enough && stable
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

pub struct ChainDriver<'a, F: LogpFunc + ?Sized, E: Executor> {
    sampler: EnsembleSampler<'a, F, E>,
    logp: &'a F,
    settings: DriverSettings,
    state: DriverState,
    old_tau: Vec<f64>,
}

impl<'a, F: LogpFunc + ?Sized, E: Executor> ChainDriver<'a, F, E> {
    pub fn new(logp: &'a F, executor: &'a E, settings: DriverSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        let sampler = EnsembleSampler::new(logp, executor, settings.nwalkers)?;
        Ok(Self {
            sampler,
            logp,
            old_tau: vec![f64::INFINITY; logp.dim()],
            settings,
            state: DriverState::Initializing,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    fn transition(&mut self, state: DriverState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "driver state");
        }
        self.state = state;
    }

    /// Ensemble the run starts from. A fresh start resets the store.
    pub fn starting_state<S: ChainStore + ?Sized>(
        &self,
        start: &StartMode,
        store: &mut S,
        names: &[String],
    ) -> Result<EnsembleState> {
        match start {
            StartMode::Fresh { base } => {
                if base.len() != self.logp.dim() {
                    bail!(
                        "expected {} base values, got {}",
                        self.logp.dim(),
                        base.len()
                    );
                }
                let mut rng = iteration_rng(self.settings.seed, 0);
                let positions = initial_positions(
                    base,
                    self.settings.perc_variation_init,
                    self.settings.nwalkers,
                    |p| self.logp.in_support(p),
                    &mut rng,
                )?;
                debug!(?positions, "initial walker positions");
                store.reset(self.settings.nwalkers, names)?;
                Ok(self.sampler.init_state(positions)?)
            }
            StartMode::Resume => {
                let buffer = store.buffer();
                if buffer.nwalkers() != self.settings.nwalkers || buffer.names() != names {
                    bail!(
                        "stored chain has {} walkers and parameters {:?}, the run expects {} \
                         walkers and {:?}",
                        buffer.nwalkers(),
                        buffer.names(),
                        self.settings.nwalkers,
                        names
                    );
                }
                let (positions, log_probs) = store
                    .last_state()
                    .context("the stored chain is empty, nothing to resume from")?;
                Ok(self
                    .sampler
                    .resume_state(positions, log_probs, store.iteration()))
            }
        }
    }

    /// Rebuild the convergence history of a resumed chain. Returns whether
    /// the check due at the current iteration was never recorded.
    fn restore_history<S: ChainStore + ?Sized>(
        &mut self,
        store: &S,
        autocorr: &mut AutocorrLog,
    ) -> Result<bool> {
        let iteration = store.iteration();
        let checks = iteration / CHECK_INTERVAL;
        autocorr.truncate(checks as usize);
        let pending = iteration > 0
            && iteration % CHECK_INTERVAL == 0
            && (autocorr.values().len() as u64) < checks;
        let done = if pending { checks - 1 } else { checks };

        self.old_tau = vec![f64::INFINITY; self.logp.dim()];
        for check in autocorr.values().len() as u64 + 1..=done {
            let mut checked = store.buffer().clone();
            checked.truncate(check * CHECK_INTERVAL);
            autocorr.push(mean(&autocorr_times(&checked, DEFAULT_WINDOW)))?;
        }
        if done > 0 {
            let mut checked = store.buffer().clone();
            checked.truncate(done * CHECK_INTERVAL);
            let tau = autocorr_times(&checked, DEFAULT_WINDOW);
            if tau.iter().all(|t| t.is_finite()) {
                self.old_tau = tau;
            }
        }
        debug!(checks = done, pending, old_tau = ?self.old_tau, "restored convergence history");
        Ok(pending)
    }

    fn check_convergence<S: ChainStore + ?Sized>(
        &mut self,
        store: &S,
        autocorr: &mut AutocorrLog,
    ) -> Result<bool> {
        let iteration = store.iteration();
        let tau = autocorr_times(store.buffer(), DEFAULT_WINDOW);
        autocorr.push(mean(&tau))?;

        if tau.iter().any(|t| !t.is_finite()) {
            info!(step = iteration, ?tau, "autocorrelation time not available yet");
            self.old_tau = vec![f64::INFINITY; tau.len()];
            return Ok(false);
        }
        let converged = is_converged(
            &tau,
            &self.old_tau,
            iteration,
            self.settings.convergence_ntaus,
            self.settings.convergence_perc_variation,
        );
        info!(step = iteration, ?tau, converged, "checked autocorrelation");
        self.old_tau = tau;
        Ok(converged)
    }

    pub fn run<S: ChainStore + ?Sized, N: Notifier + ?Sized>(
        &mut self,
        start: StartMode,
        store: &mut S,
        autocorr: &mut AutocorrLog,
        notifier: &N,
        names: &[String],
    ) -> Result<RunSummary> {
        let started = Instant::now();
        self.transition(DriverState::Initializing);
        let mut ensemble = self.starting_state(&start, store, names)?;
        match start {
            StartMode::Fresh { .. } => {
                autocorr.truncate(0);
                self.old_tau = vec![f64::INFINITY; self.logp.dim()];
            }
            StartMode::Resume => {
                if self.restore_history(store, autocorr)? {
                    self.transition(DriverState::CheckingConvergence);
                }
            }
        }
        info!(
            nwalkers = self.settings.nwalkers,
            ndim = self.logp.dim(),
            start_iteration = store.iteration(),
            max_steps = self.settings.max_steps,
            "starting chain"
        );
        send(
            notifier,
            &format!(
                "run started: {} walkers, {} parameters {:?}, at most {} steps",
                self.settings.nwalkers,
                self.logp.dim(),
                names,
                self.settings.max_steps
            ),
        );

        loop {
            match self.state {
                DriverState::Initializing | DriverState::Sampling => {
                    if store.iteration() >= self.settings.max_steps {
                        self.transition(DriverState::MaxStepsReached);
                        continue;
                    }
                    self.transition(DriverState::Sampling);
                    let iteration = store.iteration() + 1;
                    let mut rng = iteration_rng(self.settings.seed, iteration);
                    self.sampler.step(&mut ensemble, &mut rng);
                    store.append(iteration, &ensemble.positions, &ensemble.log_probs)?;
                    if iteration % CHECK_INTERVAL == 0 {
                        self.transition(DriverState::CheckingConvergence);
                    }
                }
                DriverState::CheckingConvergence => {
                    let converged = self.check_convergence(store, autocorr)?;
                    send(
                        notifier,
                        &format!("step {}, converged={}", store.iteration(), converged),
                    );
                    if converged {
                        info!(step = store.iteration(), "chain has converged");
                        self.transition(DriverState::Converged);
                    } else {
                        self.transition(DriverState::Sampling);
                    }
                }
                DriverState::Converged | DriverState::MaxStepsReached => break,
            }
        }
        store.flush()?;

        let taus = autocorr_times(store.buffer(), DEFAULT_WINDOW);
        let summary = RunSummary {
            state: self.state,
            iterations: store.iteration(),
            burn_in_thin: burn_in_and_thin(&taus),
            taus,
            mean_acceptance: ensemble.mean_acceptance(),
            elapsed: started.elapsed(),
        };
        info!(
            state = ?summary.state,
            iterations = summary.iterations,
            acceptance = summary.mean_acceptance,
            elapsed = ?summary.elapsed,
            "chain finished"
        );
        send(
            notifier,
            &format!(
                "run finished after {} steps ({:?}) in {:.1?}",
                summary.iterations, summary.state, summary.elapsed
            ),
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SerialExecutor;
    use crate::notify::NullNotifier;
    use crate::storage::MemoryChainStore;
    use pretty_assertions::assert_eq;

    struct Gaussian;

    impl LogpFunc for Gaussian {
        fn dim(&self) -> usize {
            2
        }

        fn logp(&self, position: &[f64]) -> f64 {
            if position[1] <= 0. {
                return f64::NEG_INFINITY;
            }
            -0.5 * ((position[0] - 1.).powi(2) + (position[1] - 2.).powi(2) / 0.25)
        }

        fn in_support(&self, position: &[f64]) -> bool {
            position[1] > 0.
        }
    }

    fn names() -> Vec<String> {
        vec!["x".to_string(), "y".to_string()]
    }

    #[test]
    fn initial_spread() {
        let mut rng = iteration_rng(3, 0);
        let pos = initial_positions(&[10., 0.], 10., 2000, |_| true, &mut rng).unwrap();
        let mean0 = pos.iter().map(|p| p[0]).sum::<f64>() / 2000.;
        let sd1 = (pos.iter().map(|p| p[1] * p[1]).sum::<f64>() / 2000.).sqrt();
        assert!((mean0 - 10.).abs() < 0.1);
        assert!((sd1 - 0.1).abs() < 0.01);

        let err = initial_positions(&[1.], 1., 2, |_| false, &mut rng).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSettings(_)));
    }

    #[test]
    fn convergence_criterion() {
        let inf = [f64::INFINITY; 2];
        assert!(!is_converged(&[10., 12.], &inf, 1000, 50., 0.01));
        assert!(is_converged(&[10., 12.], &[10.05, 12.], 1000, 50., 0.01));
        assert!(!is_converged(&[10., 21.], &[10., 21.], 1000, 50., 0.01));
        assert!(!is_converged(&[10., 12.], &[11., 12.], 1000, 50., 0.01));
    }

    #[test]
    fn settings_validation() {
        let settings = DriverSettings {
            convergence_ntaus: 0.,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        assert!(DriverSettings::default().validate().is_ok());
    }

    #[test]
    fn stops_at_max_steps() -> Result<()> {
        let settings = DriverSettings {
            nwalkers: 8,
            max_steps: 250,
            convergence_ntaus: 1e6,
            ..Default::default()
        };
        let mut driver = ChainDriver::new(&Gaussian, &SerialExecutor, settings)?;
        let mut store = MemoryChainStore::new();
        let dir = tempfile::tempdir()?;
        let mut autocorr = AutocorrLog::create(dir.path().join("autocorr.txt"));
        let summary = driver.run(
            StartMode::Fresh { base: vec![1., 2.] },
            &mut store,
            &mut autocorr,
            &NullNotifier,
            &names(),
        )?;
        assert_eq!(summary.state, DriverState::MaxStepsReached);
        assert_eq!(summary.iterations, 250);
        assert_eq!(store.iteration(), 250);
        assert_eq!(autocorr.values().len(), 2);
        assert_eq!(AutocorrLog::load(dir.path().join("autocorr.txt"))?.values().len(), 2);
        Ok(())
    }

    #[test]
    fn converges_on_gaussian() -> Result<()> {
        let settings = DriverSettings {
            nwalkers: 16,
            max_steps: 20_000,
            convergence_ntaus: 30.,
            convergence_perc_variation: 0.05,
            ..Default::default()
        };
        let mut driver = ChainDriver::new(&Gaussian, &SerialExecutor, settings)?;
        let mut store = MemoryChainStore::new();
        let dir = tempfile::tempdir()?;
        let mut autocorr = AutocorrLog::create(dir.path().join("autocorr.txt"));
        let summary = driver.run(
            StartMode::Fresh { base: vec![1., 2.] },
            &mut store,
            &mut autocorr,
            &NullNotifier,
            &names(),
        )?;
        assert_eq!(summary.state, DriverState::Converged);
        assert_eq!(driver.state(), DriverState::Converged);
        assert!(summary.iterations < 20_000);
        assert_eq!(summary.iterations % CHECK_INTERVAL, 0);
        assert!(summary.burn_in_thin.is_some());
        Ok(())
    }

    #[test]
    fn resume_matches_uninterrupted_run() -> Result<()> {
        let settings = |max_steps| DriverSettings {
            nwalkers: 8,
            max_steps,
            convergence_ntaus: 1e6,
            seed: 77,
            ..Default::default()
        };
        let dir = tempfile::tempdir()?;

        let mut full = MemoryChainStore::new();
        let mut log = AutocorrLog::create(dir.path().join("a.txt"));
        ChainDriver::new(&Gaussian, &SerialExecutor, settings(230))?.run(
            StartMode::Fresh { base: vec![1., 2.] },
            &mut full,
            &mut log,
            &NullNotifier,
            &names(),
        )?;

        let mut split = MemoryChainStore::new();
        let mut log = AutocorrLog::create(dir.path().join("b.txt"));
        ChainDriver::new(&Gaussian, &SerialExecutor, settings(130))?.run(
            StartMode::Fresh { base: vec![1., 2.] },
            &mut split,
            &mut log,
            &NullNotifier,
            &names(),
        )?;
        ChainDriver::new(&Gaussian, &SerialExecutor, settings(230))?.run(
            StartMode::Resume,
            &mut split,
            &mut log,
            &NullNotifier,
            &names(),
        )?;

        assert_eq!(split.buffer(), full.buffer());
        assert_eq!(log.values().len(), 2);
        Ok(())
    }

    #[test]
    fn resume_needs_matching_chain() -> Result<()> {
        let driver = ChainDriver::new(&Gaussian, &SerialExecutor, DriverSettings {
            nwalkers: 8,
            ..Default::default()
        })?;
        let mut store = MemoryChainStore::new();
        assert!(driver
            .starting_state(&StartMode::Resume, &mut store, &names())
            .is_err());
        store.reset(8, &names())?;
        assert!(driver
            .starting_state(&StartMode::Resume, &mut store, &names())
            .is_err());
        store.reset(6, &names())?;
        store.append(1, &vec![vec![1., 2.]; 6], &[0.; 6])?;
        assert!(driver
            .starting_state(&StartMode::Resume, &mut store, &names())
            .is_err());
        Ok(())
    }
}
