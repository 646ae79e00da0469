use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::storage::core::{format_value, parse_value, ChainBuffer, ChainStore};

const CHAIN_FILE: &str = "chain.csv";
const META_FILE: &str = "chain_meta.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChainMeta {
    nwalkers: usize,
    names: Vec<String>,
}

/// Chain persisted as `chain.csv` with one row per walker and iteration,
/// plus a small json file with the walker count and parameter names.
///
/// Every appended iteration is flushed to disk, so an interrupted run can
/// be resumed from the last complete iteration.
#[derive(Debug)]
pub struct CsvChainStore {
    dir: PathBuf,
    writer: Option<BufWriter<File>>,
    buffer: ChainBuffer,
}

impl CsvChainStore {
    /// A store in `dir` that is empty until [`ChainStore::reset`] is called.
    /// Existing files are only replaced on reset.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            writer: None,
            buffer: ChainBuffer::default(),
        })
    }

    /// Reload a previous run. A trailing incomplete iteration is dropped
    /// from the file.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        let meta_path = dir.join(META_FILE);
        let chain_path = dir.join(CHAIN_FILE);
        if !meta_path.exists() || !chain_path.exists() {
            return Err(StoreError::MissingCheckpoint { path: dir });
        }
        let meta: ChainMeta = serde_json::from_reader(BufReader::new(File::open(&meta_path)?))?;
        let (buffer, partial) = read_chain(&chain_path, meta)?;
        if partial {
            warn!(
                iteration = buffer.iteration() + 1,
                "dropping incomplete iteration from stored chain"
            );
            rewrite(&chain_path, &buffer)?;
        }
        debug!(iterations = buffer.iteration(), dir = ?dir, "opened chain store");
        let file = OpenOptions::new().append(true).open(&chain_path)?;
        Ok(Self {
            dir,
            writer: Some(BufWriter::new(file)),
            buffer,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chain_path(&self) -> PathBuf {
        self.dir.join(CHAIN_FILE)
    }
}

fn header(names: &[String]) -> String {
    let mut columns = vec!["iteration".to_string(), "walker".to_string()];
    columns.extend(names.iter().cloned());
    columns.push("log_prob".to_string());
    columns.join(",")
}

fn write_rows<W: Write>(
    writer: &mut W,
    iteration: u64,
    positions: &[Vec<f64>],
    log_probs: &[f64],
) -> std::io::Result<()> {
    for (walker, (position, &log_prob)) in positions.iter().zip(log_probs).enumerate() {
        let mut row = vec![iteration.to_string(), walker.to_string()];
        row.extend(position.iter().map(|&v| format_value(v)));
        row.push(format_value(log_prob));
        writeln!(writer, "{}", row.join(","))?;
    }
    Ok(())
}

fn rewrite(path: &Path, buffer: &ChainBuffer) -> Result<(), StoreError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "{}", header(buffer.names()))?;
    for it in 0..buffer.iteration() as usize {
        let positions: Vec<Vec<f64>> = (0..buffer.nwalkers())
            .map(|w| buffer.position(it, w).to_vec())
            .collect();
        let log_probs: Vec<f64> = (0..buffer.nwalkers())
            .map(|w| buffer.log_prob(it, w))
            .collect();
        write_rows(&mut writer, it as u64 + 1, &positions, &log_probs)?;
    }
    writer.flush()?;
    Ok(())
}

/// Returns the complete iterations and whether a partial one was dropped.
fn read_chain(path: &Path, meta: ChainMeta) -> Result<(ChainBuffer, bool), StoreError> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();
    let expected = header(&meta.names);
    let found = lines.next().transpose()?.unwrap_or_default();
    if found.trim_end() != expected {
        return Err(StoreError::Malformed {
            line: 1,
            reason: format!("expected header {expected:?}, found {found:?}"),
        });
    }

    let ndim = meta.names.len();
    let mut buffer = ChainBuffer::new(meta.nwalkers, meta.names);
    let mut positions: Vec<Vec<f64>> = Vec::with_capacity(buffer.nwalkers());
    let mut log_probs: Vec<f64> = Vec::with_capacity(buffer.nwalkers());

    for (idx, line) in lines.enumerate() {
        let line_no = idx + 2;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |reason: String| StoreError::Malformed {
            line: line_no,
            reason,
        };
        let tokens: Vec<&str> = line.split(',').collect();
        if tokens.len() != ndim + 3 {
            return Err(malformed(format!(
                "expected {} columns, found {}",
                ndim + 3,
                tokens.len()
            )));
        }
        let iteration: u64 = tokens[0]
            .parse()
            .map_err(|_| malformed(format!("invalid iteration {:?}", tokens[0])))?;
        let walker: usize = tokens[1]
            .parse()
            .map_err(|_| malformed(format!("invalid walker {:?}", tokens[1])))?;
        if iteration != buffer.iteration() + 1 || walker != positions.len() {
            return Err(malformed(format!(
                "expected iteration {} walker {}, found iteration {iteration} walker {walker}",
                buffer.iteration() + 1,
                positions.len()
            )));
        }
        let values = tokens[2..]
            .iter()
            .map(|t| parse_value(t).ok_or_else(|| malformed(format!("not a number: {t:?}"))))
            .collect::<Result<Vec<f64>, _>>()?;
        positions.push(values[..ndim].to_vec());
        log_probs.push(values[ndim]);

        if positions.len() == buffer.nwalkers() {
            buffer.push(iteration, &positions, &log_probs)?;
            positions.clear();
            log_probs.clear();
        }
    }
    Ok((buffer, !positions.is_empty()))
}

impl ChainStore for CsvChainStore {
    fn reset(&mut self, nwalkers: usize, names: &[String]) -> Result<(), StoreError> {
        let meta = ChainMeta {
            nwalkers,
            names: names.to_vec(),
        };
        let meta_file = BufWriter::new(File::create(self.dir.join(META_FILE))?);
        serde_json::to_writer_pretty(meta_file, &meta)?;

        let mut writer = BufWriter::new(File::create(self.chain_path())?);
        writeln!(writer, "{}", header(names))?;
        writer.flush()?;
        self.writer = Some(writer);
        self.buffer = ChainBuffer::new(nwalkers, names.to_vec());
        Ok(())
    }

    fn append(
        &mut self,
        iteration: u64,
        positions: &[Vec<f64>],
        log_probs: &[f64],
    ) -> Result<(), StoreError> {
        self.buffer.validate(iteration, positions, log_probs)?;
        let writer = self.writer.as_mut().ok_or(StoreError::NotInitialized)?;
        write_rows(writer, iteration, positions, log_probs)?;
        writer.flush()?;
        self.buffer.push(iteration, positions, log_probs)
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn buffer(&self) -> &ChainBuffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    fn names() -> Vec<String> {
        vec!["H0".to_string(), "Om0".to_string()]
    }

    fn step(it: u64) -> (Vec<Vec<f64>>, Vec<f64>) {
        let positions = (0..4)
            .map(|w| vec![67.74 + 0.1 * w as f64 + it as f64 / 3., 0.3075 / (it as f64)])
            .collect();
        let log_probs = vec![-1.5 * it as f64, f64::NEG_INFINITY, 0.1 + 0.2, -7.];
        (positions, log_probs)
    }

    #[test]
    fn roundtrip_is_exact() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = CsvChainStore::create(dir.path())?;
        store.reset(4, &names())?;
        for it in 1..=5 {
            let (p, l) = step(it);
            store.append(it, &p, &l)?;
        }
        let header_line = std::fs::read_to_string(store.chain_path())?
            .lines()
            .next()
            .map(str::to_string);
        assert_eq!(header_line.as_deref(), Some("iteration,walker,H0,Om0,log_prob"));

        let reopened = CsvChainStore::open(dir.path())?;
        assert_eq!(reopened.iteration(), 5);
        assert_eq!(reopened.buffer(), store.buffer());
        let (p, l) = step(5);
        assert_eq!(reopened.last_state(), Some((p, l)));
        Ok(())
    }

    #[test]
    fn append_after_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = CsvChainStore::create(dir.path())?;
        store.reset(4, &names())?;
        let (p, l) = step(1);
        store.append(1, &p, &l)?;
        drop(store);

        let mut store = CsvChainStore::open(dir.path())?;
        let (p, l) = step(2);
        store.append(2, &p, &l)?;
        assert!(store.append(4, &p, &l).is_err());
        drop(store);

        let store = CsvChainStore::open(dir.path())?;
        assert_eq!(store.iteration(), 2);
        Ok(())
    }

    #[test]
    fn partial_iteration_is_dropped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = CsvChainStore::create(dir.path())?;
        store.reset(4, &names())?;
        for it in 1..=3 {
            let (p, l) = step(it);
            store.append(it, &p, &l)?;
        }
        drop(store);
        let mut file = OpenOptions::new().append(true).open(dir.path().join(CHAIN_FILE))?;
        writeln!(file, "4,0,1.0,2.0,-3.0")?;
        writeln!(file, "4,1,1.0,2.0,-3.0")?;
        drop(file);

        let mut store = CsvChainStore::open(dir.path())?;
        assert_eq!(store.iteration(), 3);
        let (p, l) = step(4);
        store.append(4, &p, &l)?;
        drop(store);
        assert_eq!(CsvChainStore::open(dir.path())?.iteration(), 4);
        Ok(())
    }

    #[test]
    fn missing_checkpoint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let err = CsvChainStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::MissingCheckpoint { .. }));
        Ok(())
    }

    #[test]
    fn append_requires_reset() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = CsvChainStore::create(dir.path())?;
        let (p, l) = step(1);
        assert!(matches!(
            store.append(1, &p, &l),
            Err(StoreError::NotInitialized)
        ));
        Ok(())
    }
}
