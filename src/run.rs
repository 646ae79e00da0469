//! Full inference run: configuration, model, data, posterior and chain.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{build_model, RunConfig};
use crate::driver::{ChainDriver, RunSummary, StartMode};
use crate::executor::AnyExecutor;
use crate::likelihood::HyperLikelihood;
use crate::loader::load_data;
use crate::notify::{LogNotifier, Notifier, NullNotifier};
use crate::posterior::Posterior;
use crate::prior::{Prior, PriorLimits};
use crate::selection::SelectionBias;
use crate::storage::{AutocorrLog, ChainStore, CsvChainStore};

pub const AUTOCORR_FILE: &str = "autocorr.txt";
pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub params_inference: Vec<String>,
    pub labels: Vec<String>,
    /// Posterior samples left after the suggested burn-in and thinning.
    pub n_flat_samples: Option<usize>,
    /// Posterior evaluations whose selection estimate was unreliable.
    pub flagged_selection: u64,
}

fn save_config(config: &RunConfig, out_dir: &Path) -> Result<()> {
    let path = out_dir.join(CONFIG_FILE);
    let file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
    serde_json::to_writer_pretty(file, config)?;
    Ok(())
}

/// Run the inference described by `config`. With `resume` the chain in
/// `config.out_dir` is continued instead of replaced.
pub fn run(config: &RunConfig, resume: bool) -> Result<RunOutcome> {
    let started = Instant::now();
    config.validate()?;
    let dataset = config.dataset()?;
    let unit = config.dist_unit;

    let pops = Arc::new(build_model(config)?);
    let names = config.params_inference.clone();
    let labels = pops.get_labels(&names)?;

    info!(dataset = config.dataset_name.as_str(), dir = ?config.data_dir, "loading data");
    let (events, injections) = load_data(dataset, &config.data_dir, &config.data_limits(), unit)?;

    info!(params = ?names, "setting up inference");
    info!(fixed = ?pops.get_fixed_values(&names), "fixed parameters");

    let prior = Prior::from_specs(&names, &config.priors, &PriorLimits::defaults(unit))?;
    let likelihood = HyperLikelihood::new(pops.clone(), vec![events]);
    let n_obs = likelihood.n_obs();
    let selection =
        SelectionBias::new(pops.clone(), injections, n_obs, config.selection_settings());
    let posterior = Posterior::new(prior, likelihood, selection, pops.layout(&names)?);

    let executor = AnyExecutor::from_backend(config.backend)?;
    let notifier: Box<dyn Notifier> = if config.notifications {
        Box::new(LogNotifier)
    } else {
        Box::new(NullNotifier)
    };

    let out_dir = &config.out_dir;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {:?}", out_dir))?;
    let autocorr_path = out_dir.join(AUTOCORR_FILE);
    let (mut store, mut autocorr, start) = if resume {
        let store = CsvChainStore::open(out_dir)
            .with_context(|| format!("Cannot resume from {:?}", out_dir))?;
        info!(iteration = store.iteration(), "resuming chain");
        (store, AutocorrLog::load(&autocorr_path)?, StartMode::Resume)
    } else {
        save_config(config, out_dir)?;
        let base = pops.get_base_values(&names)?;
        (
            CsvChainStore::create(out_dir)?,
            AutocorrLog::create(&autocorr_path),
            StartMode::Fresh { base },
        )
    };

    let mut driver = ChainDriver::new(&posterior, &executor, config.driver_settings())?;
    let summary = driver.run(start, &mut store, &mut autocorr, notifier.as_ref(), &names)?;

    let n_flat_samples = summary
        .burn_in_thin
        .map(|(discard, thin)| store.get_flat_chain(discard, thin).nrows());
    let flagged_selection = posterior.selection().flagged_count();
    info!(
        iterations = summary.iterations,
        taus = ?summary.taus,
        burn_in_thin = ?summary.burn_in_thin,
        flagged_selection,
        elapsed = ?started.elapsed(),
        "run complete"
    );
    Ok(RunOutcome {
        summary,
        params_inference: names,
        labels,
        n_flat_samples,
        flagged_selection,
    })
}
