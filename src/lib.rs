//! Hierarchical Bayesian inference of compact-binary populations and
//! cosmology from gravitational-wave catalogs.
//!
//! The posterior of the population hyper-parameters combines a Monte-Carlo
//! marginal likelihood of the observed events, a selection-bias correction
//! estimated from detected injections and independent priors. It is
//! explored with an affine-invariant ensemble sampler that stops once the
//! autocorrelation time of the chain has stabilized.

pub(crate) mod autocorr;
pub(crate) mod config;
pub(crate) mod cosmology;
pub(crate) mod data;
pub(crate) mod driver;
pub(crate) mod ensemble;
pub(crate) mod error;
pub(crate) mod executor;
pub(crate) mod likelihood;
pub(crate) mod loader;
pub(crate) mod mass;
pub(crate) mod math;
pub(crate) mod notify;
pub(crate) mod params;
pub(crate) mod population;
pub(crate) mod posterior;
pub(crate) mod prior;
pub(crate) mod rate;
pub(crate) mod registry;
pub(crate) mod run;
pub(crate) mod sampling;
pub(crate) mod selection;
pub(crate) mod spin;
pub mod storage;

pub use autocorr::{autocorr_times, burn_in_and_thin, integrated_time, DEFAULT_WINDOW};
pub use config::{build_model, PopulationKind, PopulationSpec, RunConfig};
pub use cosmology::{Background, DistanceGrid, FlrwCosmology, DEFAULT_Z_MAX};
pub use data::{EventDataset, InjectionDataset};
pub use driver::{
    initial_positions, is_converged, iteration_rng, ChainDriver, DriverSettings, DriverState,
    RunSummary, StartMode, CHECK_INTERVAL,
};
pub use ensemble::{EnsembleSampler, EnsembleState, StretchMove};
pub use error::{ConfigError, DataError, StoreError};
pub use executor::{AnyExecutor, Backend, Executor, SerialExecutor, ThreadPoolExecutor};
pub use likelihood::{HyperLikelihood, LogLikelihood};
pub use loader::{load_data, write_mock, DataLimits, DatasetName, InjectionMeta, MOCK_T_OBS};
pub use mass::{MassDistribution, MassPdf, MassVariant};
pub use notify::{LogNotifier, Notifier, NullNotifier};
pub use params::{DistUnit, ParamTable};
pub use population::{AstroPopulation, Points, Population, PrimordialPopulation, SegmentSizes};
pub use posterior::{LogpFunc, Posterior};
pub use prior::{ParamPrior, Prior, PriorLimits, PriorSpec};
pub use rate::{RateEvolution, RateVariant, FIDUCIAL_R0};
pub use registry::{AllPopulations, LambdaLayout};
pub use run::{run, RunOutcome, AUTOCORR_FILE, CONFIG_FILE};
pub use selection::{
    RateTreatment, SelectionBias, SelectionEstimate, SelectionGate, SelectionSettings,
    SelectionTerm, ESS_MULTIPLE,
};
pub use spin::{SpinDistribution, SpinVariant};
