use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::plan::DependencyKind;
use crate::error::GuardError;

/// What happened to a column or one of its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEvent {
    Started,
    Dropped,
    Recreated,
    Compensated,
    Failed,
    Completed,
}

/// One JSON line of the compensation journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub run_id: String,
    pub timestamp: String,
    pub table: String,
    pub column: String,
    pub event: JournalEvent,
    pub object_name: Option<String>,
    pub object_kind: Option<DependencyKind>,
    /// For `Dropped`: the statement that recreates the object
    pub sql: Option<String>,
}

impl JournalEntry {
    pub fn new(run_id: &str, table: &str, column: &str, event: JournalEvent) -> Self {
        Self {
            run_id: run_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            table: table.to_string(),
            column: column.to_string(),
            event,
            object_name: None,
            object_kind: None,
            sql: None,
        }
    }

    pub fn with_object(mut self, kind: DependencyKind, name: &str) -> Self {
        self.object_kind = Some(kind);
        self.object_name = Some(name.to_string());
        self
    }

    pub fn with_sql(mut self, sql: &str) -> Self {
        self.sql = Some(sql.to_string());
        self
    }
}

/// Append-only JSON-lines log of dropped objects and how they were restored.
///
/// A run that dies between drop and recreate leaves `Dropped` entries without
/// a matching `Recreated` or `Compensated` entry; those are the pending
/// restores.
pub struct CompensationJournal {
    log_path: PathBuf,
    lock: Mutex<()>,
}

impl CompensationJournal {
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            log_path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Append an entry as a JSON line.
    pub fn record(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| JournalError::LockError(e.to_string()))?;

        if let Some(parent) = self.log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(JournalError::Io)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(JournalError::Io)?;

        let json = serde_json::to_string(entry).map_err(JournalError::Serialization)?;
        writeln!(file, "{}", json).map_err(JournalError::Io)?;

        Ok(())
    }

    /// All entries, optionally restricted to one run.
    pub fn entries(&self, run_id: Option<&str>) -> Result<Vec<JournalEntry>, JournalError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| JournalError::LockError(e.to_string()))?;

        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.log_path).map_err(JournalError::Io)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();

        for line in reader.lines() {
            let line = line.map_err(JournalError::Io)?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(trimmed) {
                Ok(entry) => {
                    if run_id.map_or(true, |id| entry.run_id == id) {
                        entries.push(entry);
                    }
                }
                Err(e) => {
                    log::warn!("Skipping malformed journal line in {:?}: {}", self.log_path, e);
                }
            }
        }

        Ok(entries)
    }

    /// Run id of the most recently started run.
    pub fn latest_run(&self) -> Result<Option<String>, JournalError> {
        Ok(self
            .entries(None)?
            .into_iter()
            .rev()
            .find(|e| e.event == JournalEvent::Started)
            .map(|e| e.run_id))
    }

    /// `Dropped` entries of a run that were never recreated or compensated.
    pub fn pending_restores(&self, run_id: &str) -> Result<Vec<JournalEntry>, JournalError> {
        let entries = self.entries(Some(run_id))?;

        let restored: Vec<(Option<DependencyKind>, &str)> = entries
            .iter()
            .filter(|e| matches!(e.event, JournalEvent::Recreated | JournalEvent::Compensated))
            .filter_map(|e| e.object_name.as_deref().map(|name| (e.object_kind, name)))
            .collect();

        Ok(entries
            .iter()
            .filter(|e| e.event == JournalEvent::Dropped)
            .filter(|e| {
                e.object_name
                    .as_deref()
                    .map_or(false, |name| !restored.contains(&(e.object_kind, name)))
            })
            .cloned()
            .collect())
    }
}

/// Errors that can occur while reading or writing the journal.
#[derive(Debug)]
pub enum JournalError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    LockError(String),
}

impl std::fmt::Display for JournalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JournalError::Io(e) => write!(f, "Journal I/O error: {}", e),
            JournalError::Serialization(e) => write!(f, "Journal serialization error: {}", e),
            JournalError::LockError(e) => write!(f, "Journal lock error: {}", e),
        }
    }
}

impl std::error::Error for JournalError {}

impl From<JournalError> for GuardError {
    fn from(e: JournalError) -> Self {
        GuardError::Journal(e.to_string())
    }
}
