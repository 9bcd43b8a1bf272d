//! # ledger: durable record of what has been exported and committed
//!
//! The ledger is the only memory a run has of previous runs. The replay engine
//! asks it whether a source file was already committed and tells it about new
//! commits; the exporter asks which page versions and attachments it already
//! wrote.
//!
//! ## Record kinds
//! - committed files: source-relative path, committed timestamp
//! - exported page versions: (page id, version, format), committed flag
//! - exported attachments: (page id, attachment id), committed flag
//!
//! ## Semantics
//! - Every operation is idempotent and is its own transaction.
//! - Marking a record that does not exist is a silent no-op. The repository
//!   history is the source of truth; the ledger is bookkeeping.
//! - Store failures (I/O, SQL) are errors and abort the caller's run.
//!
//! Implementations: [`SqliteLedger`] for real runs and [`InMemoryLedger`] for
//! tests. The trait is mockable via `mockall` as `MockLedger`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use thiserror::Error;

mod sqlite;

pub use sqlite::{open_ledger, open_ledger_read_only, SqliteLedger};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported database url {0:?} (expected sqlite://<path> or a file path)")]
    UnsupportedUrl(String),
    #[error("ledger lock poisoned")]
    Poisoned,
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Ledger: Send + Sync {
    fn is_file_committed(&self, source_path: &str) -> Result<bool, LedgerError>;

    /// Record a committed source file; no-op when already recorded.
    fn mark_file_committed(&self, source_path: &str) -> Result<(), LedgerError>;

    /// Flip the committed flag of an exported page version.
    ///
    /// No-op when the record is missing or already committed.
    fn mark_version_committed(
        &self,
        page_id: &str,
        version_number: i64,
        format: &str,
    ) -> Result<(), LedgerError>;

    /// Flip the committed flag of the first uncommitted attachment of the page
    /// whose sanitized title equals `filename`.
    ///
    /// First match wins: when two attachments sanitize to the same name only
    /// the earlier record is ever marked.
    fn mark_attachment_committed_by_filename(
        &self,
        page_id: &str,
        filename: &str,
    ) -> Result<(), LedgerError>;

    /// Version numbers already exported for a page in a format.
    fn exported_versions(&self, page_id: &str, format: &str) -> Result<BTreeSet<i64>, LedgerError>;

    fn mark_version_exported(
        &self,
        page_id: &str,
        version_number: i64,
        title: &str,
        format: &str,
    ) -> Result<(), LedgerError>;

    /// Attachment id → attachment version for everything exported from a page.
    fn exported_attachments(
        &self,
        page_id: &str,
    ) -> Result<BTreeMap<String, Option<i64>>, LedgerError>;

    /// Insert or refresh an exported attachment record.
    fn mark_attachment_exported(
        &self,
        page_id: &str,
        attachment_id: &str,
        title: &str,
        version: Option<i64>,
    ) -> Result<(), LedgerError>;
}

/// Reduce a title to the characters exported file names keep.
///
/// Alphanumerics (any script) and `._- ` survive in order, everything else is
/// dropped: `"Spec: Draft #1.docx"` becomes `"Spec Draft 1.docx"`.
pub fn sanitize_filename(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '))
        .collect()
}

#[derive(Debug, Clone)]
struct PageVersionRecord {
    page_id: String,
    version_number: i64,
    format: String,
    committed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct AttachmentRecord {
    page_id: String,
    attachment_id: String,
    title: String,
    version: Option<i64>,
    committed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    committed_files: BTreeMap<String, DateTime<Utc>>,
    page_versions: Vec<PageVersionRecord>,
    attachments: Vec<AttachmentRecord>,
}

/// Ledger kept in process memory, with the same semantics as [`SqliteLedger`].
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<MemoryState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, LedgerError> {
        self.state.lock().map_err(|_| LedgerError::Poisoned)
    }

    pub fn committed_files(&self) -> Vec<String> {
        self.state()
            .map(|s| s.committed_files.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_version_committed(&self, page_id: &str, version_number: i64, format: &str) -> bool {
        self.state()
            .map(|s| {
                s.page_versions.iter().any(|r| {
                    r.page_id == page_id
                        && r.version_number == version_number
                        && r.format == format
                        && r.committed_at.is_some()
                })
            })
            .unwrap_or(false)
    }

    pub fn is_attachment_committed(&self, page_id: &str, attachment_id: &str) -> bool {
        self.state()
            .map(|s| {
                s.attachments.iter().any(|r| {
                    r.page_id == page_id
                        && r.attachment_id == attachment_id
                        && r.committed_at.is_some()
                })
            })
            .unwrap_or(false)
    }
}

impl Ledger for InMemoryLedger {
    fn is_file_committed(&self, source_path: &str) -> Result<bool, LedgerError> {
        Ok(self.state()?.committed_files.contains_key(source_path))
    }

    fn mark_file_committed(&self, source_path: &str) -> Result<(), LedgerError> {
        self.state()?
            .committed_files
            .entry(source_path.to_string())
            .or_insert_with(Utc::now);
        Ok(())
    }

    fn mark_version_committed(
        &self,
        page_id: &str,
        version_number: i64,
        format: &str,
    ) -> Result<(), LedgerError> {
        let mut state = self.state()?;
        if let Some(record) = state.page_versions.iter_mut().find(|r| {
            r.page_id == page_id && r.version_number == version_number && r.format == format
        }) {
            if record.committed_at.is_none() {
                record.committed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    fn mark_attachment_committed_by_filename(
        &self,
        page_id: &str,
        filename: &str,
    ) -> Result<(), LedgerError> {
        let mut state = self.state()?;
        if let Some(record) = state.attachments.iter_mut().find(|r| {
            r.page_id == page_id
                && r.committed_at.is_none()
                && sanitize_filename(&r.title) == filename
        }) {
            record.committed_at = Some(Utc::now());
        }
        Ok(())
    }

    fn exported_versions(&self, page_id: &str, format: &str) -> Result<BTreeSet<i64>, LedgerError> {
        Ok(self
            .state()?
            .page_versions
            .iter()
            .filter(|r| r.page_id == page_id && r.format == format)
            .map(|r| r.version_number)
            .collect())
    }

    fn mark_version_exported(
        &self,
        page_id: &str,
        version_number: i64,
        _title: &str,
        format: &str,
    ) -> Result<(), LedgerError> {
        let mut state = self.state()?;
        let exists = state.page_versions.iter().any(|r| {
            r.page_id == page_id && r.version_number == version_number && r.format == format
        });
        if !exists {
            state.page_versions.push(PageVersionRecord {
                page_id: page_id.to_string(),
                version_number,
                format: format.to_string(),
                committed_at: None,
            });
        }
        Ok(())
    }

    fn exported_attachments(
        &self,
        page_id: &str,
    ) -> Result<BTreeMap<String, Option<i64>>, LedgerError> {
        Ok(self
            .state()?
            .attachments
            .iter()
            .filter(|r| r.page_id == page_id)
            .map(|r| (r.attachment_id.clone(), r.version))
            .collect())
    }

    fn mark_attachment_exported(
        &self,
        page_id: &str,
        attachment_id: &str,
        title: &str,
        version: Option<i64>,
    ) -> Result<(), LedgerError> {
        let mut state = self.state()?;
        match state
            .attachments
            .iter_mut()
            .find(|r| r.page_id == page_id && r.attachment_id == attachment_id)
        {
            Some(record) => {
                record.title = title.to_string();
                record.version = version;
            }
            None => state.attachments.push(AttachmentRecord {
                page_id: page_id.to_string(),
                attachment_id: attachment_id.to_string(),
                title: title.to_string(),
                version,
                committed_at: None,
            }),
        }
        Ok(())
    }
}
