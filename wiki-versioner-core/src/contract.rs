//! # contract: the wiki as seen by the exporter
//!
//! [`PageSource`] is the seam between the export walk and the content
//! service. [`crate::export::confluence::ConfluenceClient`] implements it over
//! the Confluence REST API; tests use the generated `MockPageSource`.
//!
//! ## Fetch results
//! Fetching a page is expected to fail now and then (deleted pages, purged
//! historical versions, permission gaps). Those outcomes come back as
//! [`PageFetchResult::Error`] so the walk can log and move on. The listing
//! methods return [`ExportError`] instead: a walk that cannot list children
//! or versions cannot continue meaningfully.

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use std::path::PathBuf;
use thiserror::Error;

use crate::ledger::LedgerError;

/// A page body plus the metadata written into exported headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub id: String,
    pub title: String,
    /// Body in Confluence storage format (XHTML).
    pub body_html: String,
    pub version_number: i64,
    /// ISO-8601 timestamp of the version, as reported by the service.
    pub version_date: String,
    pub space_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    NotFound,
    Unauthorized,
    Transport,
    Malformed,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageFetchResult {
    Ok(PageContent),
    Error {
        kind: FetchErrorKind,
        message: String,
    },
}

/// A child page reference from a hierarchy listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageVersion {
    pub number: i64,
    pub when: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub title: String,
    pub version: Option<i64>,
    /// Site-relative download path (or absolute URL).
    pub download_path: String,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("missing environment variable {0}")]
    MissingCredentials(&'static str),

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from {url}: {message}")]
    Malformed { url: String, message: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

/// Read access to a page hierarchy.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch a page, or one historical version of it.
    async fn fetch_page(&self, page_id: &str, version: Option<i64>) -> PageFetchResult;

    /// Direct children of a page, in the order the service lists them.
    async fn child_pages(&self, page_id: &str) -> Result<Vec<PageRef>, ExportError>;

    async fn page_versions(&self, page_id: &str) -> Result<Vec<PageVersion>, ExportError>;

    async fn attachments(&self, page_id: &str) -> Result<Vec<Attachment>, ExportError>;

    /// Raw bytes behind a site-relative path or absolute URL.
    async fn download(&self, path_or_url: &str) -> Result<Vec<u8>, ExportError>;

    /// Path of the Word export of a page, suitable for [`PageSource::download`].
    fn word_export_path(&self, page_id: &str) -> String;
}
