use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Distance unit used throughout one run.
///
/// Distances are in `Gpc` or `Mpc`, rates per `Gpc^3 yr` or per `Mpc^3 yr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistUnit {
    #[default]
    Gpc,
    Mpc,
}

impl DistUnit {
    /// Conversion factor from Mpc.
    pub fn per_mpc(self) -> f64 {
        match self {
            DistUnit::Gpc => 1e-3,
            DistUnit::Mpc => 1.,
        }
    }

    /// Conversion factor from Gpc.
    pub fn per_gpc(self) -> f64 {
        match self {
            DistUnit::Gpc => 1.,
            DistUnit::Mpc => 1e3,
        }
    }

    /// Conversion factor for a volumetric rate given per `Gpc^3`.
    pub fn rate_scale(self) -> f64 {
        match self {
            DistUnit::Gpc => 1.,
            DistUnit::Mpc => 1e-9,
        }
    }
}

/// Named hyper-parameters of one component, with their base values.
///
/// The order of the entries is the canonical order of the owner and never
/// changes after construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamTable {
    names: Vec<String>,
    values: Vec<f64>,
    labels: Vec<String>,
}

impl ParamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used by the components when declaring their
    /// parameters.
    pub fn with(mut self, name: &str, value: f64, label: &str) -> Self {
        assert!(
            self.index_of(name).is_none(),
            "parameter {name} declared twice in one component"
        );
        self.names.push(name.to_string());
        self.values.push(value);
        self.labels.push(label.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.index_of(name).map(|i| self.values[i])
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.index_of(name).map(|i| self.labels[i].as_str())
    }

    /// Replace base values for the names this table owns. Names owned by
    /// someone else are ignored. Returns the number of values applied.
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, f64>) -> usize {
        let mut applied = 0;
        for (name, &value) in overrides.iter() {
            if let Some(idx) = self.index_of(name) {
                self.values[idx] = value;
                applied += 1;
            }
        }
        applied
    }

    /// Append all entries of `other`, rejecting names that already exist.
    pub fn extend(&mut self, other: &ParamTable) -> Result<(), ConfigError> {
        if let Some(name) = other.names.iter().find(|n| self.index_of(n).is_some()) {
            return Err(ConfigError::DuplicateParameter { name: name.clone() });
        }
        self.names.extend(other.names.iter().cloned());
        self.values.extend_from_slice(&other.values);
        self.labels.extend(other.labels.iter().cloned());
        Ok(())
    }
}
