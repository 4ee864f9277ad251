//! JSON-lines history file.
//!
//! Each append writes the whole snapshot in one `write_all` and then
//! `sync_data`s the file. If either step fails the file is cut back to its
//! previous length, so a snapshot is either fully present or absent. If that
//! cut fails too, later appends retry it first and fail until it succeeds. A
//! torn final line left by a crash is removed when the file is reopened.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tm_core::Snapshot;
use tracing::{debug, info, warn};

use crate::order::OrderGuard;
use crate::types::HistoryRecord;
use crate::{HistoryError, HistoryResult, HistorySink, WriteError};

/// File operations an append needs.
pub trait HistoryFile: Write + Send {
    fn sync_data(&self) -> io::Result<()>;
    fn set_len(&self, len: u64) -> io::Result<()>;
}

impl HistoryFile for File {
    fn sync_data(&self) -> io::Result<()> {
        File::sync_data(self)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

pub struct JsonlHistory<F: HistoryFile = File> {
    path: PathBuf,
    file: F,
    committed_len: u64,
    order: OrderGuard,
    /// Bytes past `committed_len` may be on disk.
    dirty: bool,
}

impl JsonlHistory {
    /// Start a session file `history_<YYYYmmdd_HHMMSS>.jsonl` in `dir`.
    pub fn create_in(dir: &Path, started: DateTime<Utc>) -> HistoryResult<Self> {
        fs::create_dir_all(dir).map_err(|source| HistoryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = format!("history_{}.jsonl", started.format("%Y%m%d_%H%M%S"));
        Self::open(&dir.join(name))
    }

    /// Open `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> HistoryResult<Self> {
        let io_err = |source| HistoryError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(io_err)?;

        let mut content = Vec::new();
        file.read_to_end(&mut content).map_err(io_err)?;

        let intact = content
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos + 1);
        if intact < content.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = content.len() - intact,
                "discarding torn record at end of history file"
            );
            file.set_len(intact as u64).map_err(io_err)?;
            file.sync_data().map_err(io_err)?;
        }

        let records = parse_lines(&content[..intact])?;
        let mut order = OrderGuard::default();
        order.commit(&records);

        info!(path = %path.display(), existing = records.len(), "history file open");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            committed_len: intact as u64,
            order,
            dirty: false,
        })
    }
}

impl<F: HistoryFile> JsonlHistory<F> {
    /// Append to an already empty `file`.
    pub fn with_file(path: &Path, file: F) -> Self {
        Self {
            path: path.to_path_buf(),
            file,
            committed_len: 0,
            order: OrderGuard::default(),
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_durably(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)?;
        self.file.sync_data()
    }

    /// Cut the file back to the last committed record.
    fn roll_back(&mut self) -> io::Result<()> {
        self.file.set_len(self.committed_len)?;
        self.file.sync_data()?;
        self.dirty = false;
        Ok(())
    }
}

impl<F: HistoryFile> HistorySink for JsonlHistory<F> {
    fn append(&mut self, snapshot: &Snapshot) -> Result<(), WriteError> {
        let records = HistoryRecord::from_snapshot(snapshot);
        if records.is_empty() {
            return Ok(());
        }
        self.order.check(&records)?;

        let mut buf = Vec::with_capacity(records.len() * 96);
        for record in &records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        if self.dirty {
            self.roll_back()?;
            info!(path = %self.path.display(), "partial append removed");
        }

        self.dirty = true;
        if let Err(e) = self.write_durably(&buf) {
            if let Err(trunc) = self.roll_back() {
                warn!(path = %self.path.display(), error = %trunc, "rollback of partial append failed");
            }
            return Err(WriteError::Unavailable(e));
        }
        self.dirty = false;

        self.committed_len += buf.len() as u64;
        self.order.commit(&records);
        debug!(tick = snapshot.tick, records = records.len(), "history appended");
        Ok(())
    }
}

fn parse_lines(content: &[u8]) -> HistoryResult<Vec<HistoryRecord>> {
    let mut records = Vec::new();
    for (idx, line) in content.split(|&b| b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let record = serde_json::from_slice(line).map_err(|source| HistoryError::Corrupt {
            line: idx + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Read every record of a history file, ignoring a torn final line.
pub fn load_records(path: &Path) -> HistoryResult<Vec<HistoryRecord>> {
    let content = fs::read(path).map_err(|source| HistoryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let intact = content
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |pos| pos + 1);
    parse_lines(&content[..intact])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tm_core::{ChannelReading, DeviceReadings, k};

    fn snap(tick: u64, time: DateTime<Utc>, value: f64) -> Snapshot {
        Snapshot {
            tick,
            time,
            elapsed_s: tick as f64,
            devices: vec![DeviceReadings {
                device: "D".to_string(),
                channels: vec![ChannelReading::ok("c1", k(value), time)],
            }],
        }
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir.join("history.jsonl")
    }

    #[test]
    fn rejects_time_going_backwards() {
        let path = scratch("tm_history_order");
        let mut h = JsonlHistory::open(&path).unwrap();
        let t = Utc::now();
        h.append(&snap(1, t, 1.0)).unwrap();
        h.append(&snap(2, t, 2.0)).unwrap();
        let err = h.append(&snap(3, t - Duration::seconds(1), 3.0)).unwrap_err();
        assert!(matches!(err, WriteError::OutOfOrder { .. }));
        assert_eq!(load_records(&path).unwrap().len(), 2);
    }

    #[test]
    fn reopen_restores_ordering_state() {
        let path = scratch("tm_history_reopen");
        let t = Utc::now();
        {
            let mut h = JsonlHistory::open(&path).unwrap();
            h.append(&snap(1, t, 1.0)).unwrap();
        }
        let mut h = JsonlHistory::open(&path).unwrap();
        assert!(h.append(&snap(2, t - Duration::seconds(5), 2.0)).is_err());
        assert!(h.append(&snap(2, t + Duration::seconds(5), 2.0)).is_ok());
    }
}
