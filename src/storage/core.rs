use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, FixedSizeListBuilder, Float64Builder, UInt64Builder};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use ndarray::{Array2, Array3};

use crate::error::StoreError;

/// Persisted history of walker positions, one entry per iteration.
///
/// Iterations are numbered from 1. A store only ever holds complete
/// iterations: all walkers of an iteration are appended together.
pub trait ChainStore {
    /// Start a new run, dropping everything stored so far.
    fn reset(&mut self, nwalkers: usize, names: &[String]) -> Result<(), StoreError>;

    fn append(
        &mut self,
        iteration: u64,
        positions: &[Vec<f64>],
        log_probs: &[f64],
    ) -> Result<(), StoreError>;

    fn flush(&mut self) -> Result<(), StoreError>;

    fn buffer(&self) -> &ChainBuffer;

    /// Number of complete iterations stored.
    fn iteration(&self) -> u64 {
        self.buffer().iteration()
    }

    /// Positions and log densities of the last stored iteration.
    fn last_state(&self) -> Option<(Vec<Vec<f64>>, Vec<f64>)> {
        self.buffer().last_state()
    }

    /// Chain of shape `(iterations, walkers, params)` after dropping the
    /// first `discard` iterations and keeping every `thin`-th one.
    fn get_chain(&self, discard: usize, thin: usize) -> Array3<f64> {
        self.buffer().get_chain(discard, thin)
    }

    /// Same as [`ChainStore::get_chain`] with walkers and iterations merged,
    /// iteration-major.
    fn get_flat_chain(&self, discard: usize, thin: usize) -> Array2<f64> {
        self.buffer().get_flat_chain(discard, thin)
    }

    /// All values of one parameter, `series[walker][iteration]`.
    fn param_chain(&self, param: usize) -> Vec<Vec<f64>> {
        self.buffer().param_chain(param)
    }
}

/// In-memory chain shared by all store implementations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainBuffer {
    nwalkers: usize,
    names: Vec<String>,
    // (iteration, walker, param), row-major
    positions: Vec<f64>,
    // (iteration, walker)
    log_probs: Vec<f64>,
}

impl ChainBuffer {
    pub fn new(nwalkers: usize, names: Vec<String>) -> Self {
        Self {
            nwalkers,
            names,
            positions: Vec::new(),
            log_probs: Vec::new(),
        }
    }

    pub fn nwalkers(&self) -> usize {
        self.nwalkers
    }

    pub fn ndim(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_initialized(&self) -> bool {
        self.nwalkers > 0
    }

    pub fn iteration(&self) -> u64 {
        if self.nwalkers == 0 {
            return 0;
        }
        (self.log_probs.len() / self.nwalkers) as u64
    }

    /// Checks that `positions` and `log_probs` make up the next iteration.
    pub(crate) fn validate(
        &self,
        iteration: u64,
        positions: &[Vec<f64>],
        log_probs: &[f64],
    ) -> Result<(), StoreError> {
        if !self.is_initialized() {
            return Err(StoreError::NotInitialized);
        }
        if iteration != self.iteration() + 1 {
            return Err(StoreError::ShapeMismatch {
                expected: format!("iteration {}", self.iteration() + 1),
                found: format!("iteration {iteration}"),
            });
        }
        let ndim = self.ndim();
        if positions.len() != self.nwalkers
            || log_probs.len() != self.nwalkers
            || positions.iter().any(|p| p.len() != ndim)
        {
            return Err(StoreError::ShapeMismatch {
                expected: format!("{} walkers x {} params", self.nwalkers, ndim),
                found: format!(
                    "{} positions, {} log probabilities",
                    positions.len(),
                    log_probs.len()
                ),
            });
        }
        Ok(())
    }

    pub fn push(
        &mut self,
        iteration: u64,
        positions: &[Vec<f64>],
        log_probs: &[f64],
    ) -> Result<(), StoreError> {
        self.validate(iteration, positions, log_probs)?;
        for p in positions {
            self.positions.extend_from_slice(p);
        }
        self.log_probs.extend_from_slice(log_probs);
        Ok(())
    }

    pub fn position(&self, iteration: usize, walker: usize) -> &[f64] {
        let ndim = self.ndim();
        let start = (iteration * self.nwalkers + walker) * ndim;
        &self.positions[start..start + ndim]
    }

    pub fn log_prob(&self, iteration: usize, walker: usize) -> f64 {
        self.log_probs[iteration * self.nwalkers + walker]
    }

    pub fn last_state(&self) -> Option<(Vec<Vec<f64>>, Vec<f64>)> {
        let n = self.iteration() as usize;
        if n == 0 {
            return None;
        }
        let last = n - 1;
        let positions = (0..self.nwalkers)
            .map(|w| self.position(last, w).to_vec())
            .collect();
        let log_probs = (0..self.nwalkers).map(|w| self.log_prob(last, w)).collect();
        Some((positions, log_probs))
    }

    fn kept_iterations(&self, discard: usize, thin: usize) -> impl Iterator<Item = usize> {
        (discard..self.iteration() as usize).step_by(thin.max(1))
    }

    pub fn get_chain(&self, discard: usize, thin: usize) -> Array3<f64> {
        let kept: Vec<usize> = self.kept_iterations(discard, thin).collect();
        Array3::from_shape_fn((kept.len(), self.nwalkers, self.ndim()), |(i, w, p)| {
            self.position(kept[i], w)[p]
        })
    }

    pub fn get_flat_chain(&self, discard: usize, thin: usize) -> Array2<f64> {
        let kept: Vec<usize> = self.kept_iterations(discard, thin).collect();
        let nwalkers = self.nwalkers;
        Array2::from_shape_fn((kept.len() * nwalkers, self.ndim()), |(row, p)| {
            self.position(kept[row / nwalkers], row % nwalkers)[p]
        })
    }

    pub fn get_log_probs(&self, discard: usize, thin: usize) -> Array2<f64> {
        let kept: Vec<usize> = self.kept_iterations(discard, thin).collect();
        Array2::from_shape_fn((kept.len(), self.nwalkers), |(i, w)| {
            self.log_prob(kept[i], w)
        })
    }

    pub fn param_chain(&self, param: usize) -> Vec<Vec<f64>> {
        assert!(param < self.ndim());
        let n = self.iteration() as usize;
        (0..self.nwalkers)
            .map(|w| (0..n).map(|i| self.position(i, w)[param]).collect())
            .collect()
    }

    /// Keep only the first `n` iterations.
    pub fn truncate(&mut self, n: u64) {
        let n = (n as usize).min(self.iteration() as usize);
        self.positions.truncate(n * self.nwalkers * self.ndim());
        self.log_probs.truncate(n * self.nwalkers);
    }

    /// Flattened, thinned draws as an arrow record batch with the columns
    /// `iteration`, `walker`, `position` (fixed size list) and `log_prob`.
    pub fn to_record_batch(&self, discard: usize, thin: usize) -> Result<RecordBatch, ArrowError> {
        let kept: Vec<usize> = self.kept_iterations(discard, thin).collect();
        let rows = kept.len() * self.nwalkers;
        let mut iterations = UInt64Builder::with_capacity(rows);
        let mut walkers = UInt64Builder::with_capacity(rows);
        let mut log_probs = Float64Builder::with_capacity(rows);
        let mut positions = FixedSizeListBuilder::with_capacity(
            Float64Builder::with_capacity(rows * self.ndim()),
            self.ndim() as i32,
            rows,
        );
        for &i in kept.iter() {
            for w in 0..self.nwalkers {
                iterations.append_value(i as u64 + 1);
                walkers.append_value(w as u64);
                positions.values().append_slice(self.position(i, w));
                positions.append(true);
                log_probs.append_value(self.log_prob(i, w));
            }
        }
        RecordBatch::try_from_iter(vec![
            ("iteration", Arc::new(iterations.finish()) as ArrayRef),
            ("walker", Arc::new(walkers.finish()) as ArrayRef),
            ("position", Arc::new(positions.finish()) as ArrayRef),
            ("log_prob", Arc::new(log_probs.finish()) as ArrayRef),
        ])
    }
}

pub(crate) fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NA".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Inf" } else { "-Inf" }.to_string()
    } else {
        format!("{}", value)
    }
}

pub(crate) fn parse_value(token: &str) -> Option<f64> {
    match token.trim() {
        "NA" => Some(f64::NAN),
        "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        other => other.parse().ok(),
    }
}

/// Mean autocorrelation time at every convergence check, one value per
/// line. The whole file is rewritten on every check.
#[derive(Debug, Clone, PartialEq)]
pub struct AutocorrLog {
    path: PathBuf,
    values: Vec<f64>,
}

impl AutocorrLog {
    /// Empty history, nothing is written until the first value arrives.
    pub fn create<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            values: Vec::new(),
        }
    }

    /// Reload the history of an interrupted run. A missing file is an
    /// empty history.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self::create(path));
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut values = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value = parse_value(&line).ok_or_else(|| StoreError::Malformed {
                line: idx + 1,
                reason: format!("not a number: {line:?}"),
            })?;
            values.push(value);
        }
        Ok(Self { path, values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Drop entries past the `n`-th check.
    pub fn truncate(&mut self, n: usize) {
        self.values.truncate(n);
    }

    pub fn push(&mut self, value: f64) -> Result<(), StoreError> {
        self.values.push(value);
        self.save()
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let mut writer = BufWriter::new(File::create(&self.path)?);
        for &v in self.values.iter() {
            writeln!(writer, "{}", format_value(v))?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, FixedSizeListArray, Float64Array};
    use pretty_assertions::assert_eq;

    fn names() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    fn filled(n: u64) -> ChainBuffer {
        let mut buffer = ChainBuffer::new(3, names());
        for it in 1..=n {
            let positions: Vec<Vec<f64>> = (0..3)
                .map(|w| vec![it as f64, w as f64 + 0.5])
                .collect();
            let log_probs: Vec<f64> = (0..3).map(|w| -(w as f64) - it as f64).collect();
            buffer.push(it, &positions, &log_probs).unwrap();
        }
        buffer
    }

    #[test]
    fn views() {
        let buffer = filled(10);
        assert_eq!(buffer.iteration(), 10);

        let chain = buffer.get_chain(4, 3);
        assert_eq!(chain.shape(), &[2, 3, 2]);
        assert_eq!(chain[[0, 0, 0]], 5.);
        assert_eq!(chain[[1, 2, 1]], 2.5);

        let flat = buffer.get_flat_chain(0, 1);
        assert_eq!(flat.shape(), &[30, 2]);
        assert_eq!(flat[[4, 0]], 2.);
        assert_eq!(flat[[4, 1]], 1.5);

        let series = buffer.param_chain(0);
        assert_eq!(series.len(), 3);
        assert_eq!(series[1], (1..=10).map(|i| i as f64).collect::<Vec<_>>());

        let (positions, log_probs) = buffer.last_state().unwrap();
        assert_eq!(positions[2], vec![10., 2.5]);
        assert_eq!(log_probs, vec![-10., -11., -12.]);
        assert_eq!(buffer.get_log_probs(9, 1).shape(), &[1, 3]);
    }

    #[test]
    fn rejects_out_of_order() {
        let mut buffer = filled(2);
        let positions = vec![vec![0., 0.]; 3];
        assert!(buffer.push(2, &positions, &[0.; 3]).is_err());
        assert!(buffer.push(3, &positions[..2], &[0.; 2]).is_err());
        assert!(ChainBuffer::default().push(1, &positions, &[0.; 3]).is_err());
        buffer.truncate(1);
        assert_eq!(buffer.iteration(), 1);
    }

    #[test]
    fn record_batch_export() {
        let batch = filled(4).to_record_batch(2, 1).unwrap();
        assert_eq!(batch.num_rows(), 6);
        let positions = batch
            .column_by_name("position")
            .unwrap()
            .as_any()
            .downcast_ref::<FixedSizeListArray>()
            .unwrap();
        assert_eq!(positions.value_length(), 2);
        let first = positions.value(0);
        let first = first.as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(first.values().to_vec(), vec![3., 0.5]);
    }

    #[test]
    fn value_tokens() {
        for v in [0.1 + 0.2, -1e-300, 123456.789, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(parse_value(&format_value(v)), Some(v));
        }
        assert!(parse_value("NA").unwrap().is_nan());
        assert_eq!(parse_value("x"), None);
    }

    #[test]
    fn autocorr_log_reload() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("autocorr.txt");
        let mut log = AutocorrLog::create(&path);
        log.push(12.5)?;
        log.push(f64::NAN)?;
        log.push(13.25)?;
        let reloaded = AutocorrLog::load(&path)?;
        assert_eq!(reloaded.values().len(), 3);
        assert_eq!(reloaded.values()[2], 13.25);
        assert!(reloaded.values()[1].is_nan());
        assert!(AutocorrLog::load(dir.path().join("missing.txt"))?.values().is_empty());
        Ok(())
    }
}
