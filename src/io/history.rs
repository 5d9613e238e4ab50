//! History store implementations
//!
//! - `MemoryHistoryStore` - volatile, for tests and deployments without storage
//! - `JsonlHistoryStore` - append-only JSONL operation log, replayed on open
//!
//! Both assign auto-incrementing record ids and treat `session_id` as an
//! idempotency key: re-appending a known session returns the id it was first
//! stored under, even if that record was deleted since.

use crate::domain::error::HistoryError;
use crate::domain::ports::HistoryStore;
use crate::domain::types::{HistoryRecord, RecordId, StoredRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// In-memory view shared by both stores
#[derive(Debug, Default)]
struct Ledger {
    next_id: u64,
    records: BTreeMap<RecordId, HistoryRecord>,
    /// Every session ever appended, deleted ones included
    sessions: HashMap<String, RecordId>,
}

impl Ledger {
    fn existing(&self, session_id: &str) -> Option<RecordId> {
        self.sessions.get(session_id).copied()
    }

    fn next_id(&self) -> RecordId {
        RecordId(self.next_id.max(1))
    }

    fn insert(&mut self, id: RecordId, record: HistoryRecord) {
        self.next_id = self.next_id.max(id.0 + 1);
        self.sessions.insert(record.session_id.clone(), id);
        self.records.insert(id, record);
    }

    fn remove(&mut self, id: RecordId) -> Option<HistoryRecord> {
        self.records.remove(&id)
    }

    /// Most recent first
    fn listing(&self) -> Vec<StoredRecord> {
        self.records
            .iter()
            .rev()
            .map(|(&id, record)| StoredRecord { id, record: record.clone() })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    ledger: Mutex<Ledger>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, record: HistoryRecord) -> Result<RecordId, HistoryError> {
        let mut ledger = self.ledger.lock();
        if let Some(id) = ledger.existing(&record.session_id) {
            return Ok(id);
        }
        let id = ledger.next_id();
        ledger.insert(id, record);
        Ok(id)
    }

    async fn query_all(&self) -> Result<Vec<StoredRecord>, HistoryError> {
        Ok(self.ledger.lock().listing())
    }

    async fn delete(&self, id: RecordId) -> Result<(), HistoryError> {
        self.ledger.lock().remove(id).map(|_| ()).ok_or(HistoryError::NotFound(id))
    }
}

/// One line of the history log
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum LogEntry {
    Append {
        id: RecordId,
        #[serde(flatten)]
        record: HistoryRecord,
    },
    Delete {
        id: RecordId,
    },
}

struct JsonlInner {
    file: File,
    /// File length after the last complete entry
    committed_len: u64,
    ledger: Ledger,
}

impl JsonlInner {
    /// Append one entry as a complete line.
    ///
    /// Bytes past `committed_len` can only be the remains of a failed write;
    /// they are cut off first so the new line never merges with a fragment.
    async fn write_entry(&mut self, entry: &LogEntry) -> Result<(), HistoryError> {
        let actual_len = self.file.metadata().await?.len();
        if actual_len > self.committed_len {
            warn!(
                committed = %self.committed_len,
                actual = %actual_len,
                "history_log_fragment_truncated"
            );
            self.file.set_len(self.committed_len).await?;
        }

        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        if let Err(e) = self.write_line(&line).await {
            // Best effort now; the next write checks the length again
            if let Err(truncate) = self.file.set_len(self.committed_len).await {
                warn!(error = %truncate, "history_log_truncate_failed");
            }
            return Err(e);
        }
        self.committed_len += line.len() as u64;
        Ok(())
    }

    async fn write_line(&mut self, line: &[u8]) -> Result<(), HistoryError> {
        self.file.write_all(line).await?;
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(())
    }
}

pub struct JsonlHistoryStore {
    path: PathBuf,
    inner: tokio::sync::Mutex<JsonlInner>,
}

impl JsonlHistoryStore {
    /// Open (or create) the log at `path` and replay it.
    ///
    /// Unparseable lines, such as a torn final write, are skipped with a warning.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut ledger = Ledger::default();
        let mut skipped = 0usize;
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(LogEntry::Append { id, record }) => ledger.insert(id, record),
                Ok(LogEntry::Delete { id }) => {
                    ledger.remove(id);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(path = %path.display(), line = lineno + 1, error = %e, "history_log_line_skipped");
                }
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        if !content.is_empty() && !content.ends_with('\n') {
            // Terminate a torn tail so the next entry starts on its own line
            file.write_all(b"\n").await?;
            file.flush().await?;
        }
        let committed_len = file.metadata().await?.len();
        info!(
            path = %path.display(),
            records = %ledger.records.len(),
            skipped = %skipped,
            "history_log_opened"
        );

        Ok(Self { path, inner: tokio::sync::Mutex::new(JsonlInner { file, committed_len, ledger }) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn append(&self, record: HistoryRecord) -> Result<RecordId, HistoryError> {
        let mut inner = self.inner.lock().await;
        if let Some(id) = inner.ledger.existing(&record.session_id) {
            return Ok(id);
        }

        let id = inner.ledger.next_id();
        let entry = LogEntry::Append { id, record };
        inner.write_entry(&entry).await?;

        // Ledger only reflects what reached the log
        if let LogEntry::Append { id, record } = entry {
            inner.ledger.insert(id, record);
        }
        Ok(id)
    }

    async fn query_all(&self) -> Result<Vec<StoredRecord>, HistoryError> {
        Ok(self.inner.lock().await.ledger.listing())
    }

    async fn delete(&self, id: RecordId) -> Result<(), HistoryError> {
        let mut inner = self.inner.lock().await;
        if !inner.ledger.records.contains_key(&id) {
            return Err(HistoryError::NotFound(id));
        }
        inner.write_entry(&LogEntry::Delete { id }).await?;
        inner.ledger.remove(id);
        Ok(())
    }
}
