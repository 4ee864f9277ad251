//! tm-history: append-only time-series storage of snapshots.

pub mod jsonl;
pub mod memory;
pub mod order;
pub mod types;

pub use jsonl::{HistoryFile, JsonlHistory, load_records};
pub use memory::MemorySink;
pub use types::*;

use tm_core::Snapshot;

pub type HistoryResult<T> = Result<T, HistoryError>;

/// Errors opening or reading a history store.
#[derive(thiserror::Error, Debug)]
pub enum HistoryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Corrupt record at line {line}: {source}")]
    Corrupt {
        line: usize,
        source: serde_json::Error,
    },
}

/// An append failed as a whole; nothing from the snapshot was kept.
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("History storage unavailable: {0}")]
    Unavailable(#[from] std::io::Error),

    #[error("Time went backwards for {device}: {attempted} < {last}")]
    OutOfOrder {
        device: String,
        last: chrono::DateTime<chrono::Utc>,
        attempted: chrono::DateTime<chrono::Utc>,
    },

    #[error("Record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable, append-only destination for snapshots.
///
/// `append` returns `Ok` only once every successful channel reading of the
/// snapshot is on stable storage. There is no way to change or remove what
/// was written.
pub trait HistorySink: Send {
    fn append(&mut self, snapshot: &Snapshot) -> Result<(), WriteError>;
}

impl<T: HistorySink + ?Sized> HistorySink for Box<T> {
    fn append(&mut self, snapshot: &Snapshot) -> Result<(), WriteError> {
        (**self).append(snapshot)
    }
}
