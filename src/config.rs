//! Run configuration, read from a JSON file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cosmology::FlrwCosmology;
use crate::driver::DriverSettings;
use crate::error::ConfigError;
use crate::executor::Backend;
use crate::loader::{DataLimits, DatasetName};
use crate::mass::MassVariant;
use crate::params::DistUnit;
use crate::population::{AstroPopulation, Population, PrimordialPopulation};
use crate::prior::PriorSpec;
use crate::rate::RateVariant;
use crate::registry::AllPopulations;
use crate::selection::{RateTreatment, SelectionGate, SelectionSettings};
use crate::spin::SpinVariant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PopulationKind {
    Astro {
        #[serde(default)]
        mass: MassVariant,
        #[serde(default)]
        rate: RateVariant,
        #[serde(default)]
        spin: SpinVariant,
    },
    Primordial,
}

/// One entry of the ordered population list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: PopulationKind,
}

impl PopulationSpec {
    pub fn build(&self, unit: DistUnit) -> Result<Box<dyn Population>, ConfigError> {
        Ok(match self.kind {
            PopulationKind::Astro { mass, rate, spin } => Box::new(AstroPopulation::from_variants(
                &self.name, rate, mass, spin, unit,
            )?),
            PopulationKind::Primordial => Box::new(PrimordialPopulation::new(&self.name, unit)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub populations: Vec<PopulationSpec>,
    /// Inferred parameters, in the order of the registry.
    pub params_inference: Vec<String>,
    /// Base values of parameters that are not inferred.
    pub fixed_values: BTreeMap<String, f64>,
    pub priors: BTreeMap<String, PriorSpec>,

    pub nwalkers: usize,
    pub max_steps: u64,
    pub convergence_ntaus: f64,
    pub convergence_perc_variation: f64,
    pub perc_variation_init: f64,
    pub seed: u64,

    pub dist_unit: DistUnit,
    pub include_sel_uncertainty: bool,
    pub selection_gate: SelectionGate,
    pub rate_treatment: RateTreatment,
    pub backend: Backend,

    pub dataset_name: String,
    pub data_dir: PathBuf,
    pub n_obs_use: Option<usize>,
    pub n_samples_use: Option<usize>,
    pub n_inj_use: Option<usize>,
    pub events_include: Option<Vec<usize>>,

    pub out_dir: PathBuf,
    pub resume: bool,
    pub notifications: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        let driver = DriverSettings::default();
        let selection = SelectionSettings::default();
        Self {
            populations: vec![PopulationSpec {
                name: "astro".to_string(),
                kind: PopulationKind::Astro {
                    mass: MassVariant::default(),
                    rate: RateVariant::default(),
                    spin: SpinVariant::default(),
                },
            }],
            params_inference: vec!["H0".to_string(), "Om0".to_string()],
            fixed_values: BTreeMap::new(),
            priors: BTreeMap::new(),
            nwalkers: driver.nwalkers,
            max_steps: driver.max_steps,
            convergence_ntaus: driver.convergence_ntaus,
            convergence_perc_variation: driver.convergence_perc_variation,
            perc_variation_init: driver.perc_variation_init,
            seed: driver.seed,
            dist_unit: DistUnit::default(),
            include_sel_uncertainty: selection.include_uncertainty,
            selection_gate: selection.gate,
            rate_treatment: selection.rate,
            backend: Backend::default(),
            dataset_name: "mock".to_string(),
            data_dir: PathBuf::from("data"),
            n_obs_use: None,
            n_samples_use: None,
            n_inj_use: None,
            events_include: None,
            out_dir: PathBuf::from("results"),
            resume: false,
            notifications: false,
        }
    }
}

impl RunConfig {
    pub fn read(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read config {:?}", path))?;
        let config: RunConfig = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        Ok(config)
    }

    pub fn dataset(&self) -> Result<DatasetName, ConfigError> {
        self.dataset_name.parse()
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            nwalkers: self.nwalkers,
            max_steps: self.max_steps,
            convergence_ntaus: self.convergence_ntaus,
            convergence_perc_variation: self.convergence_perc_variation,
            perc_variation_init: self.perc_variation_init,
            seed: self.seed,
        }
    }

    pub fn selection_settings(&self) -> SelectionSettings {
        SelectionSettings {
            include_uncertainty: self.include_sel_uncertainty,
            rate: self.rate_treatment,
            gate: self.selection_gate,
        }
    }

    pub fn data_limits(&self) -> DataLimits {
        DataLimits {
            n_obs_use: self.n_obs_use,
            n_samples_use: self.n_samples_use,
            n_inj_use: self.n_inj_use,
            events_include: self.events_include.clone(),
        }
    }

    /// Checks that do not need the population model.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dataset()?;
        self.driver_settings().validate()?;
        if self.params_inference.is_empty() {
            return Err(ConfigError::InvalidSettings(
                "params_inference is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Registry of all populations of the run, with the fixed values applied
/// and the inference list checked against it.
pub fn build_model(config: &RunConfig) -> Result<AllPopulations, ConfigError> {
    let unit = config.dist_unit;
    let mut pops = AllPopulations::new(FlrwCosmology::new(unit));
    for spec in config.populations.iter() {
        pops.add_pop(spec.build(unit)?)?;
    }
    pops.check_disjoint(&config.params_inference, &config.fixed_values)?;
    pops.set_values(&config.fixed_values)?;
    pops.check_params_order(&config.params_inference)?;
    info!(
        n_pops = pops.n_pops(),
        n_params = pops.n_params(),
        params_inference = ?config.params_inference,
        "built population model"
    );
    Ok(pops)
}
