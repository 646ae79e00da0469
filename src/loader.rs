//! Loading of catalogs and injection sets from `.npy` files.
//!
//! A dataset directory contains
//!
//! ```text
//! observations/m1det.npy   (n_obs, n_samples)
//! observations/m2det.npy
//! observations/dl.npy      Gpc
//! observations/chi_eff.npy optional
//! injections/m1det.npy     (n_det,)
//! injections/m2det.npy
//! injections/dl.npy        Gpc
//! injections/wt.npy
//! injections/chi_eff.npy   optional
//! injections/meta.json     {"n_gen": .., "t_obs": ..}
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use ndarray_npy::{read_npy, write_npy};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::{EventDataset, InjectionDataset};
use crate::error::{ConfigError, DataError};
use crate::params::DistUnit;

/// Observation time of the mock catalogs, in years.
pub const MOCK_T_OBS: f64 = 2.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetName {
    Mock,
}

impl FromStr for DatasetName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(DatasetName::Mock),
            _ => Err(ConfigError::UnsupportedDataset(s.to_string())),
        }
    }
}

/// Subset of the data that enters the analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataLimits {
    pub n_obs_use: Option<usize>,
    pub n_samples_use: Option<usize>,
    pub n_inj_use: Option<usize>,
    pub events_include: Option<Vec<usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InjectionMeta {
    pub n_gen: u64,
    #[serde(default = "default_t_obs")]
    pub t_obs: f64,
}

fn default_t_obs() -> f64 {
    MOCK_T_OBS
}

fn read_array<D: ndarray::Dimension>(path: PathBuf) -> Result<ndarray::Array<f64, D>, DataError>
where
    ndarray::Array<f64, D>: ndarray_npy::ReadNpyExt,
{
    read_npy(&path).map_err(|source| DataError::Npy { path, source })
}

fn read_optional<D: ndarray::Dimension>(
    path: PathBuf,
) -> Result<Option<ndarray::Array<f64, D>>, DataError>
where
    ndarray::Array<f64, D>: ndarray_npy::ReadNpyExt,
{
    if path.exists() {
        read_array(path).map(Some)
    } else {
        Ok(None)
    }
}

/// Load the event catalog and the injections of a dataset.
pub fn load_data(
    name: DatasetName,
    dir: &Path,
    limits: &DataLimits,
    unit: DistUnit,
) -> Result<(EventDataset, InjectionDataset)> {
    match name {
        DatasetName::Mock => load_mock(dir, limits, unit),
    }
}

fn load_mock(
    dir: &Path,
    limits: &DataLimits,
    unit: DistUnit,
) -> Result<(EventDataset, InjectionDataset)> {
    let obs = dir.join("observations");
    let m1z: Array2<f64> = read_array(obs.join("m1det.npy"))?;
    let m2z: Array2<f64> = read_array(obs.join("m2det.npy"))?;
    let dl: Array2<f64> = read_array(obs.join("dl.npy"))?;
    let chi: Option<Array2<f64>> = read_optional(obs.join("chi_eff.npy"))?;
    let events = EventDataset::new(m1z, m2z, dl * unit.per_gpc(), chi, MOCK_T_OBS)
        .with_context(|| format!("Invalid observations in {:?}", obs))?;

    let events = match &limits.events_include {
        Some(include) => {
            if let Some(&bad) = include.iter().find(|&&i| i >= events.n_obs()) {
                anyhow::bail!(
                    "events_include contains {} but the catalog has {} events",
                    bad,
                    events.n_obs()
                );
            }
            events.select_events(include)
        }
        None => events,
    };
    let events = events.truncate(limits.n_obs_use, limits.n_samples_use);

    let inj = dir.join("injections");
    let meta_path = inj.join("meta.json");
    let meta: InjectionMeta = serde_json::from_reader(
        File::open(&meta_path).with_context(|| format!("Failed to open {:?}", meta_path))?,
    )
    .with_context(|| format!("Failed to parse {:?}", meta_path))?;

    let m1: Array1<f64> = read_array(inj.join("m1det.npy"))?;
    let m2: Array1<f64> = read_array(inj.join("m2det.npy"))?;
    let d: Array1<f64> = read_array(inj.join("dl.npy"))?;
    let wt: Array1<f64> = read_array(inj.join("wt.npy"))?;
    let chi: Option<Array1<f64>> = read_optional(inj.join("chi_eff.npy"))?;
    let injections = InjectionDataset::new(
        m1,
        m2,
        d * unit.per_gpc(),
        chi,
        wt.view(),
        meta.n_gen,
        meta.t_obs,
    )
    .with_context(|| format!("Invalid injections in {:?}", inj))?;
    let injections = match limits.n_inj_use {
        Some(n) => injections.truncate(n),
        None => injections,
    };

    info!(
        n_obs = events.n_obs(),
        n_samples = events.samples_per_event(),
        n_det = injections.n_det(),
        n_gen = injections.n_gen,
        "loaded dataset"
    );
    Ok((events, injections))
}

/// Write a catalog in the layout read by [`load_data`]. Distances are
/// expected in Gpc.
pub fn write_mock(
    dir: &Path,
    events: &EventDataset,
    injections: &InjectionDataset,
) -> Result<()> {
    let obs = dir.join("observations");
    let inj = dir.join("injections");
    std::fs::create_dir_all(&obs).with_context(|| format!("Failed to create {:?}", obs))?;
    std::fs::create_dir_all(&inj).with_context(|| format!("Failed to create {:?}", inj))?;

    write_npy(obs.join("m1det.npy"), &events.m1z)?;
    write_npy(obs.join("m2det.npy"), &events.m2z)?;
    write_npy(obs.join("dl.npy"), &events.dl)?;
    write_npy(obs.join("chi_eff.npy"), &events.chi_eff)?;

    write_npy(inj.join("m1det.npy"), &injections.m1z)?;
    write_npy(inj.join("m2det.npy"), &injections.m2z)?;
    write_npy(inj.join("dl.npy"), &injections.dl)?;
    write_npy(inj.join("chi_eff.npy"), &injections.chi_eff)?;
    write_npy(inj.join("wt.npy"), &injections.log_weights.mapv(f64::exp))?;
    let meta = InjectionMeta {
        n_gen: injections.n_gen,
        t_obs: injections.t_obs,
    };
    serde_json::to_writer_pretty(File::create(inj.join("meta.json"))?, &meta)?;
    Ok(())
}
