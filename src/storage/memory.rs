use crate::error::StoreError;
use crate::storage::core::{ChainBuffer, ChainStore};

/// Chain kept in memory only.
#[derive(Debug, Clone, Default)]
pub struct MemoryChainStore {
    buffer: ChainBuffer,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_buffer(self) -> ChainBuffer {
        self.buffer
    }
}

impl ChainStore for MemoryChainStore {
    fn reset(&mut self, nwalkers: usize, names: &[String]) -> Result<(), StoreError> {
        self.buffer = ChainBuffer::new(nwalkers, names.to_vec());
        Ok(())
    }

    fn append(
        &mut self,
        iteration: u64,
        positions: &[Vec<f64>],
        log_probs: &[f64],
    ) -> Result<(), StoreError> {
        self.buffer.push(iteration, positions, log_probs)
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn buffer(&self) -> &ChainBuffer {
        &self.buffer
    }
}
