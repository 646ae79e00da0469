use anyhow::{Context, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::posterior::LogpFunc;

/// Evaluates a batch of parameter vectors. Results are returned in input
/// order regardless of the backend.
pub trait Executor: Send + Sync {
    fn evaluate<F: LogpFunc + ?Sized>(&self, logp: &F, positions: &[Vec<f64>]) -> Vec<f64>;

    fn num_workers(&self) -> usize;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialExecutor;

impl Executor for SerialExecutor {
    fn evaluate<F: LogpFunc + ?Sized>(&self, logp: &F, positions: &[Vec<f64>]) -> Vec<f64> {
        positions.iter().map(|p| logp.logp(p)).collect()
    }

    fn num_workers(&self) -> usize {
        1
    }
}

/// Evaluates batches on a dedicated rayon pool.
#[derive(Debug)]
pub struct ThreadPoolExecutor {
    pool: ThreadPool,
}

impl ThreadPoolExecutor {
    /// `num_threads == 0` uses one thread per logical core.
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("gwpop-worker-{}", i))
            .build()
            .context("Could not start thread pool")?;
        Ok(Self { pool })
    }
}

impl Executor for ThreadPoolExecutor {
    fn evaluate<F: LogpFunc + ?Sized>(&self, logp: &F, positions: &[Vec<f64>]) -> Vec<f64> {
        self.pool
            .install(|| positions.par_iter().map(|p| logp.logp(p)).collect())
    }

    fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }
}

/// Backend selection as it appears in the run configuration, either
/// `"serial"` or `{"threads": n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Serial,
    Threads(usize),
}

#[derive(Debug)]
pub enum AnyExecutor {
    Serial(SerialExecutor),
    Threads(ThreadPoolExecutor),
}

impl AnyExecutor {
    pub fn from_backend(backend: Backend) -> Result<Self> {
        Ok(match backend {
            Backend::Serial => AnyExecutor::Serial(SerialExecutor),
            Backend::Threads(n) => AnyExecutor::Threads(ThreadPoolExecutor::new(n)?),
        })
    }
}

impl Executor for AnyExecutor {
    fn evaluate<F: LogpFunc + ?Sized>(&self, logp: &F, positions: &[Vec<f64>]) -> Vec<f64> {
        match self {
            AnyExecutor::Serial(e) => e.evaluate(logp, positions),
            AnyExecutor::Threads(e) => e.evaluate(logp, positions),
        }
    }

    fn num_workers(&self) -> usize {
        match self {
            AnyExecutor::Serial(e) => e.num_workers(),
            AnyExecutor::Threads(e) => e.num_workers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Quadratic;

    impl LogpFunc for Quadratic {
        fn dim(&self) -> usize {
            2
        }

        fn logp(&self, position: &[f64]) -> f64 {
            -0.5 * position.iter().map(|x| x * x).sum::<f64>()
        }
    }

    #[test]
    fn backends_agree() -> Result<()> {
        let positions: Vec<Vec<f64>> = (0..64).map(|i| vec![i as f64 * 0.1, -1.]).collect();
        let serial = SerialExecutor.evaluate(&Quadratic, &positions);
        let threads = ThreadPoolExecutor::new(3)?;
        assert_eq!(threads.num_workers(), 3);
        assert_eq!(threads.evaluate(&Quadratic, &positions), serial);
        Ok(())
    }

    #[test]
    fn backend_config() -> Result<()> {
        let serial: Backend = serde_json::from_str("\"serial\"")?;
        assert_eq!(serial, Backend::Serial);
        let threads: Backend = serde_json::from_str("{\"threads\": 4}")?;
        assert_eq!(threads, Backend::Threads(4));
        let exec = AnyExecutor::from_backend(Backend::Threads(2))?;
        assert_eq!(exec.num_workers(), 2);
        Ok(())
    }
}
