mod core;
mod csv;
mod memory;

pub use self::core::{AutocorrLog, ChainBuffer, ChainStore};
pub use csv::CsvChainStore;
pub use memory::MemoryChainStore;
