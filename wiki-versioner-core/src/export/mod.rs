//! Hierarchy export: write a wiki page tree to disk in the layout replay reads.
//!
//! Every page gets its own directory, `<title>_<page id>`, nested under its
//! parent's. Inside it the exporter writes the page itself (Markdown or Word),
//! optionally one Markdown file per historical version named
//! `<title> <N>.0.md`, and optionally the page's attachments.
//!
//! The walk is breadth-first over an explicit queue. With a ledger attached,
//! versions and attachments already exported are skipped, so re-running an
//! export only downloads what changed.

pub mod confluence;

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::contract::{ExportError, PageContent, PageFetchResult, PageSource};
use crate::convert::html_to_markdown;
use crate::ledger::{sanitize_filename, Ledger};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Markdown,
    Doc,
}

impl ExportFormat {
    /// Format name recorded in the ledger.
    pub fn ledger_name(self) -> &'static str {
        match self {
            ExportFormat::Markdown => "markdown",
            ExportFormat::Doc => "doc",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub output_dir: PathBuf,
    /// Site URL used for the page links in Markdown headers.
    pub site_url: String,
    pub format: ExportFormat,
    pub export_versions: bool,
    pub export_attachments: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExportReport {
    pub pages: usize,
    pub versions_written: usize,
    pub versions_skipped: usize,
    pub attachments_written: usize,
    pub attachments_skipped: usize,
    /// Pages, versions or downloads that could not be fetched.
    pub failures: usize,
}

pub struct Exporter<'a, S> {
    source: S,
    settings: ExportSettings,
    ledger: Option<&'a dyn Ledger>,
}

impl<'a, S: PageSource> Exporter<'a, S> {
    pub fn new(source: S, settings: ExportSettings) -> Self {
        Self {
            source,
            settings,
            ledger: None,
        }
    }

    pub fn with_ledger(mut self, ledger: Option<&'a dyn Ledger>) -> Self {
        self.ledger = ledger;
        self
    }

    /// Export every page under each root, roots included.
    pub async fn export(&self, root_page_ids: &[String]) -> Result<ExportReport, ExportError> {
        let mut report = ExportReport::default();
        let mut queue: VecDeque<(String, PathBuf)> = root_page_ids
            .iter()
            .map(|id| (id.clone(), self.settings.output_dir.clone()))
            .collect();

        while let Some((page_id, parent_dir)) = queue.pop_front() {
            let Some(page_dir) = self.export_page(&page_id, &parent_dir, &mut report).await? else {
                continue;
            };
            for child in self.source.child_pages(&page_id).await? {
                debug!(parent = %page_id, child = %child.id, title = %child.title, "[EXPORT] Queued child page");
                queue.push_back((child.id, page_dir.clone()));
            }
        }

        info!(
            pages = report.pages,
            versions_written = report.versions_written,
            versions_skipped = report.versions_skipped,
            attachments_written = report.attachments_written,
            attachments_skipped = report.attachments_skipped,
            failures = report.failures,
            "[EXPORT] Export complete"
        );
        Ok(report)
    }

    /// Export one page; returns its directory, or `None` when the page could
    /// not be fetched and its subtree is skipped.
    async fn export_page(
        &self,
        page_id: &str,
        parent_dir: &Path,
        report: &mut ExportReport,
    ) -> Result<Option<PathBuf>, ExportError> {
        let page = match self.source.fetch_page(page_id, None).await {
            PageFetchResult::Ok(page) => page,
            PageFetchResult::Error { kind, message } => {
                warn!(page_id, ?kind, error = %message, "[EXPORT] Failed to fetch page, skipping subtree");
                report.failures += 1;
                return Ok(None);
            }
        };

        let title = sanitize_filename(&page.title);
        let page_dir = parent_dir.join(format!("{title}_{page_id}"));
        fs::create_dir_all(&page_dir).map_err(io_error(&page_dir))?;
        info!(page_id, title = %page.title, dir = %page_dir.display(), "[EXPORT] Exporting page");

        match self.settings.format {
            ExportFormat::Markdown if self.settings.export_versions => {
                self.export_versions(&page, &title, &page_dir, report).await?
            }
            ExportFormat::Markdown => {
                let path = page_dir.join(format!("{title}.md"));
                write_file(&path, self.render_markdown(&page, None).as_bytes())?;
                info!(page_id, path = %path.display(), "[EXPORT] Page saved as markdown");
            }
            ExportFormat::Doc => self.export_doc(&page, &title, &page_dir, report).await?,
        }

        if self.settings.export_attachments {
            self.export_attachments(page_id, &page_dir, report).await?;
        }
        report.pages += 1;
        Ok(Some(page_dir))
    }

    async fn export_versions(
        &self,
        page: &PageContent,
        title: &str,
        page_dir: &Path,
        report: &mut ExportReport,
    ) -> Result<(), ExportError> {
        let format = ExportFormat::Markdown.ledger_name();
        let done = match self.ledger {
            Some(ledger) => ledger.exported_versions(&page.id, format)?,
            None => Default::default(),
        };

        let mut numbers: Vec<i64> = self
            .source
            .page_versions(&page.id)
            .await?
            .into_iter()
            .map(|v| v.number)
            .collect();
        if numbers.is_empty() {
            numbers.push(page.version_number);
        }
        numbers.sort_unstable();
        numbers.dedup();

        for number in numbers {
            if done.contains(&number) {
                debug!(page_id = %page.id, version = number, "[EXPORT] Version already exported");
                report.versions_skipped += 1;
                continue;
            }
            let content = if number == page.version_number {
                page.clone()
            } else {
                match self.source.fetch_page(&page.id, Some(number)).await {
                    PageFetchResult::Ok(content) => content,
                    PageFetchResult::Error { kind, message } => {
                        warn!(page_id = %page.id, version = number, ?kind, error = %message, "[EXPORT] Failed to fetch page version");
                        report.failures += 1;
                        continue;
                    }
                }
            };
            // every version is named after the current title so they group together
            let path = page_dir.join(format!("{title} {number}.0.md"));
            write_file(&path, self.render_markdown(&content, Some(number)).as_bytes())?;
            if let Some(ledger) = self.ledger {
                ledger.mark_version_exported(&page.id, number, &page.title, format)?;
            }
            report.versions_written += 1;
            info!(page_id = %page.id, version = number, path = %path.display(), "[EXPORT] Version saved as markdown");
        }
        Ok(())
    }

    async fn export_doc(
        &self,
        page: &PageContent,
        title: &str,
        page_dir: &Path,
        report: &mut ExportReport,
    ) -> Result<(), ExportError> {
        let format = ExportFormat::Doc.ledger_name();
        if let Some(ledger) = self.ledger {
            if ledger
                .exported_versions(&page.id, format)?
                .contains(&page.version_number)
            {
                debug!(page_id = %page.id, version = page.version_number, "[EXPORT] Word export already recorded");
                report.versions_skipped += 1;
                return Ok(());
            }
        }

        let bytes = match self
            .source
            .download(&self.source.word_export_path(&page.id))
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(page_id = %page.id, error = %e, "[EXPORT] Word export failed");
                report.failures += 1;
                return Ok(());
            }
        };
        let path = page_dir.join(format!("{title}.doc"));
        write_file(&path, &bytes)?;
        if let Some(ledger) = self.ledger {
            ledger.mark_version_exported(&page.id, page.version_number, &page.title, format)?;
        }
        report.versions_written += 1;
        info!(page_id = %page.id, path = %path.display(), bytes = bytes.len(), "[EXPORT] Page saved as doc");
        Ok(())
    }

    async fn export_attachments(
        &self,
        page_id: &str,
        page_dir: &Path,
        report: &mut ExportReport,
    ) -> Result<(), ExportError> {
        let known = match self.ledger {
            Some(ledger) => ledger.exported_attachments(page_id)?,
            None => Default::default(),
        };

        for attachment in self.source.attachments(page_id).await? {
            if known.get(&attachment.id) == Some(&attachment.version) {
                debug!(page_id, attachment = %attachment.title, "[EXPORT] Attachment unchanged");
                report.attachments_skipped += 1;
                continue;
            }
            let bytes = match self.source.download(&attachment.download_path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(page_id, attachment = %attachment.title, error = %e, "[EXPORT] Attachment download failed");
                    report.failures += 1;
                    continue;
                }
            };
            let path = page_dir.join(sanitize_filename(&attachment.title));
            write_file(&path, &bytes)?;
            if let Some(ledger) = self.ledger {
                ledger.mark_attachment_exported(
                    page_id,
                    &attachment.id,
                    &attachment.title,
                    attachment.version,
                )?;
            }
            report.attachments_written += 1;
            info!(page_id, path = %path.display(), bytes = bytes.len(), "[EXPORT] Attachment saved");
        }
        Ok(())
    }

    fn render_markdown(&self, page: &PageContent, version: Option<i64>) -> String {
        let version_info = version
            .map(|v| format!(" (version {v})"))
            .unwrap_or_default();
        let date: String = page.version_date.chars().take(10).collect();
        let site = self.settings.site_url.trim_end_matches('/');
        format!(
            "# {title}{version_info}\n\n\
             **Space:** {space}\n\
             **Page ID:** {id}\n\
             **Version:** {number}\n\
             **Date:** {date}\n\
             **URL:** {site}/wiki/spaces/{space}/pages/{id}\n\n\
             ---\n\n\
             {body}",
            title = page.title,
            space = page.space_key,
            id = page.id,
            number = page.version_number,
            body = html_to_markdown(&page.body_html),
        )
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError {
    let path = path.to_path_buf();
    move |source| ExportError::Io { path, source }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), ExportError> {
    fs::write(path, contents).map_err(io_error(path))
}
