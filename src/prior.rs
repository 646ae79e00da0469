//! Priors on the inferred hyper-parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::math::{ndtr, normal_logpdf};
use crate::params::DistUnit;

/// Default prior ranges of all known hyper-parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorLimits {
    limits: BTreeMap<String, (f64, f64)>,
}

impl PriorLimits {
    pub fn defaults(unit: DistUnit) -> Self {
        let rate = unit.rate_scale();
        let entries = [
            ("H0", (20., 140.)),
            ("Om0", (0.05, 1.)),
            ("w0", (-2., -0.1)),
            ("Xi0", (0.1, 10.)),
            ("n", (0., 10.)),
            ("R0", (0., 200. * rate)),
            ("lambdaRedshift", (-15., 10.)),
            ("alphaRedshift", (-5., 10.)),
            ("betaRedshift", (0., 15.)),
            ("zp", (0., 5.)),
            ("alpha", (-5., 10.)),
            ("beta", (-5., 10.)),
            ("ml", (2., 20.)),
            ("sl", (0.01, 1.)),
            ("mh", (20., 200.)),
            ("sh", (0.01, 1.)),
            ("lambdaPeak", (0., 1.)),
            ("muMass", (10., 100.)),
            ("sigmaMass", (0.5, 20.)),
            ("muChi", (-1., 1.)),
            ("sigmaChi", (0.01, 1.)),
            ("R0PBH", (0., 200. * rate)),
            ("MPBH", (1., 100.)),
            ("sigmaPBH", (0.05, 2.)),
        ];
        Self {
            limits: entries
                .into_iter()
                .map(|(name, lim)| (name.to_string(), lim))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<(f64, f64)> {
        self.limits.get(name).copied()
    }
}

/// Prior of one parameter as given in the run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorSpec {
    pub family: String,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub mu: Option<f64>,
    #[serde(default)]
    pub sigma: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamPrior {
    /// Uniform on `[low, high]`.
    Flat { low: f64, high: f64 },
    /// Normal distribution truncated to `[low, high]`.
    Gauss {
        mu: f64,
        sigma: f64,
        low: f64,
        high: f64,
        log_norm: f64,
    },
}

impl ParamPrior {
    pub fn flat(low: f64, high: f64) -> Self {
        assert!(high > low);
        ParamPrior::Flat { low, high }
    }

    pub fn gauss(mu: f64, sigma: f64, low: f64, high: f64) -> Self {
        assert!(high > low && sigma > 0.);
        let norm = ndtr((high - mu) / sigma) - ndtr((low - mu) / sigma);
        ParamPrior::Gauss {
            mu,
            sigma,
            low,
            high,
            log_norm: norm.ln(),
        }
    }

    pub fn bounds(&self) -> (f64, f64) {
        match *self {
            ParamPrior::Flat { low, high } => (low, high),
            ParamPrior::Gauss { low, high, .. } => (low, high),
        }
    }

    pub fn contains(&self, x: f64) -> bool {
        let (low, high) = self.bounds();
        x >= low && x <= high
    }

    pub fn log_density(&self, x: f64) -> f64 {
        if !self.contains(x) {
            return f64::NEG_INFINITY;
        }
        match *self {
            ParamPrior::Flat { low, high } => -(high - low).ln(),
            ParamPrior::Gauss {
                mu,
                sigma,
                log_norm,
                ..
            } => normal_logpdf(x, mu, sigma) - log_norm,
        }
    }
}

/// Independent priors on the inferred parameters, in inference order.
#[derive(Debug, Clone, PartialEq)]
pub struct Prior {
    names: Vec<String>,
    priors: Vec<ParamPrior>,
}

impl Prior {
    pub fn new(names: Vec<String>, priors: Vec<ParamPrior>) -> Self {
        assert!(names.len() == priors.len());
        Self { names, priors }
    }

    /// Build the prior from the configuration. Parameters without an
    /// explicit entry get a flat prior on their default limits.
    pub fn from_specs(
        params_inference: &[String],
        specs: &BTreeMap<String, PriorSpec>,
        limits: &PriorLimits,
    ) -> Result<Self, ConfigError> {
        if let Some(extra) = specs.keys().find(|k| !params_inference.contains(k)) {
            return Err(ConfigError::UnknownParameter {
                name: extra.clone(),
            });
        }
        let priors = params_inference
            .iter()
            .map(|name| {
                let spec = specs.get(name);
                let default = limits.get(name);
                let low = spec.and_then(|s| s.low).or(default.map(|l| l.0));
                let high = spec.and_then(|s| s.high).or(default.map(|l| l.1));
                let (Some(low), Some(high)) = (low, high) else {
                    return Err(ConfigError::MissingPrior(name.clone()));
                };
                if !(high > low) {
                    return Err(ConfigError::InvalidPrior {
                        name: name.clone(),
                        reason: format!("empty range [{low}, {high}]"),
                    });
                }
                let family = spec.map(|s| s.family.as_str()).unwrap_or("flat");
                match family.to_ascii_lowercase().as_str() {
                    "flat" => Ok(ParamPrior::flat(low, high)),
                    "gauss" => {
                        let (Some(mu), Some(sigma)) =
                            (spec.and_then(|s| s.mu), spec.and_then(|s| s.sigma))
                        else {
                            return Err(ConfigError::InvalidPrior {
                                name: name.clone(),
                                reason: "gauss prior needs mu and sigma".to_string(),
                            });
                        };
                        if !(sigma > 0.) {
                            return Err(ConfigError::InvalidPrior {
                                name: name.clone(),
                                reason: format!("sigma must be positive, got {sigma}"),
                            });
                        }
                        Ok(ParamPrior::gauss(mu, sigma, low, high))
                    }
                    _ => Err(ConfigError::UnsupportedPrior {
                        name: name.clone(),
                        family: family.to_string(),
                    }),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(params_inference.to_vec(), priors))
    }

    pub fn dim(&self) -> usize {
        self.priors.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, idx: usize) -> &ParamPrior {
        &self.priors[idx]
    }

    pub fn contains(&self, theta: &[f64]) -> bool {
        assert!(theta.len() == self.dim());
        self.priors.iter().zip(theta).all(|(p, &x)| p.contains(x))
    }

    /// Sum of the independent log densities, `-inf` outside the support.
    pub fn log_prior(&self, theta: &[f64]) -> f64 {
        assert!(theta.len() == self.dim());
        let mut total = 0f64;
        for (prior, &x) in self.priors.iter().zip(theta) {
            total += prior.log_density(x);
            if total == f64::NEG_INFINITY {
                return total;
            }
        }
        total
    }
}
