//! Append-only event log.
//!
//! One JSON document per line: `{ "id": .., "ts": .., "msg": {Type, Payload} }`.
//! Ids come from a monotonic in-process sequence owned by the single writer
//! (the authoritative engine); `ts` defaults to insertion time. Reads return
//! the newest `n` records ordered by timestamp then id, reordered oldest to
//! newest for replay.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Record;
use crate::record::{CodecError, Envelope, Recordable, Registry};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event log io: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("event log line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("event log encode: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Durable store seam the authoritative engine writes through. Both calls
/// may block on I/O; they run on the authoritative loop, so persistence is
/// the system's natural back-pressure point.
pub trait Recorder: Send + 'static {
    /// Persist durably before returning; the result carries the assigned id.
    fn save(&mut self, rec: Record) -> Result<Record, StoreError>;

    /// The newest `n` records, oldest to newest.
    fn read(&self, n: usize) -> Result<Vec<Record>, StoreError>;
}

#[derive(Serialize, Deserialize)]
struct Line {
    id: u64,
    ts: DateTime<Utc>,
    msg: Envelope,
}

struct Entry {
    id: u64,
    ts: DateTime<Utc>,
    envelope: Envelope,
}

/// Append-only JSON-lines store. Single writer; the in-memory index mirrors
/// the file so reads never re-scan disk.
pub struct LogStore<M> {
    path: PathBuf,
    file: File,
    registry: Registry<M>,
    entries: Vec<Entry>,
    next_id: u64,
}

impl<M: Recordable> LogStore<M> {
    pub fn open(path: impl AsRef<Path>, registry: Registry<M>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut entries = Vec::new();
        let mut next_id = 1;
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            for (i, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let parsed: Line = serde_json::from_str(line)
                    .map_err(|source| StoreError::Corrupt { line: i + 1, source })?;
                next_id = next_id.max(parsed.id + 1);
                entries.push(Entry {
                    id: parsed.id,
                    ts: parsed.ts,
                    envelope: parsed.msg,
                });
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file,
            registry,
            entries,
            next_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&mut self, rec: M) -> Result<M, StoreError> {
        let envelope = rec.envelope()?;
        let ts = rec.ts().unwrap_or_else(Utc::now);
        let id = self.next_id;
        let line = serde_json::to_string(&Line {
            id,
            ts,
            msg: envelope.clone(),
        })
        .map_err(StoreError::Encode)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.sync_data()?;
        self.entries.push(Entry { id, ts, envelope });
        self.next_id = id + 1;
        Ok(rec.with_id(id))
    }

    pub fn read(&self, n: usize) -> Result<Vec<M>, StoreError> {
        let mut newest: Vec<&Entry> = self.entries.iter().collect();
        newest.sort_by(|a, b| (b.ts, b.id).cmp(&(a.ts, a.id)));
        let mut out = Vec::with_capacity(n.min(newest.len()));
        for entry in newest.into_iter().take(n) {
            let rec = self.registry.decode(&entry.envelope)?;
            out.push(rec.with_id(entry.id));
        }
        out.reverse();
        Ok(out)
    }
}

impl Recorder for LogStore<Record> {
    fn save(&mut self, rec: Record) -> Result<Record, StoreError> {
        LogStore::save(self, rec)
    }

    fn read(&self, n: usize) -> Result<Vec<Record>, StoreError> {
        LogStore::read(self, n)
    }
}
