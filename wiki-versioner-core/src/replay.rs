//! Replay engine: turn a discovered source tree into an ordered commit history.
//!
//! Every plain file becomes one commit at its mirrored path. Every version
//! group becomes a run of commits on a single target file, one per version in
//! ascending [`VersionToken`](crate::version::VersionToken) order, so the
//! repository history reads like the document was edited in place.
//!
//! # Ordering
//! 1. plain files, in discovery (full path) order
//! 2. version groups, in [`GroupKey`] order, each group oldest version first
//!
//! # Ledger
//! With a ledger attached, units already recorded as committed are skipped
//! without touching the repository, and every new commit is recorded after
//! it lands. Without one the whole tree is replayed.
//!
//! # Errors
//! Any repository or ledger store failure aborts the run immediately. Word
//! conversion failures only drop the companion file.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::convert::{companion_name, is_word_document, DocumentConverter};
use crate::discovery::{
    discover, export_format_for_extension, join_rel, page_id_from_dir_name, DiscoveryError,
    GroupKey, PlainFile, VersionedFile, ROOT_DIR,
};
use crate::ledger::{Ledger, LedgerError};
use crate::vcs::{tree_path, VcsError, VersionControl};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("source directory does not exist: {0}")]
    SourceMissing(PathBuf),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Vcs(#[from] VcsError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("failed to stat {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome counters of one replay run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    /// Commits created (or, in a dry run, that would be created).
    pub commits: usize,
    /// Units skipped because the ledger already had them.
    pub ledger_skips: usize,
    /// Units whose content matched the repository, so nothing was committed.
    pub identical_skips: usize,
    /// Markdown companions written next to Word documents.
    pub companions: usize,
}

pub struct Replayer<'a, V, C> {
    vcs: V,
    converter: C,
    ledger: Option<&'a dyn Ledger>,
    dry_run: bool,
}

/// What a single unit needs written and recorded.
struct Unit<'u> {
    source: &'u Path,
    /// Source-relative path: the ledger key.
    source_rel: String,
    /// Path inside the target repository.
    target_rel: String,
    page_id: Option<String>,
}

impl<'a, V, C> Replayer<'a, V, C>
where
    V: VersionControl,
    C: DocumentConverter,
{
    pub fn new(vcs: V, converter: C) -> Self {
        Self {
            vcs,
            converter,
            ledger: None,
            dry_run: false,
        }
    }

    pub fn with_ledger(mut self, ledger: Option<&'a dyn Ledger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn replay(&self, source_dir: &Path, target_repo: &Path) -> Result<ReplayReport, ReplayError> {
        if !source_dir.is_dir() {
            return Err(ReplayError::SourceMissing(source_dir.to_path_buf()));
        }
        info!(
            source = %source_dir.display(),
            repo = %target_repo.display(),
            dry_run = self.dry_run,
            ledger = self.ledger.is_some(),
            "[REPLAY] Starting"
        );

        let plan = discover(source_dir)?;
        let mut report = ReplayReport::default();
        if plan.is_empty() {
            warn!(source = %source_dir.display(), "[REPLAY] No files found in source directory");
            return Ok(report);
        }
        info!(
            plain = plan.plain.len(),
            groups = plan.groups.len(),
            versions = plan.version_count(),
            "[REPLAY] Discovered files"
        );

        let root_name = source_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        for entry in &plan.plain {
            self.replay_plain(source_dir, target_repo, &root_name, entry, &mut report)?;
        }
        for (key, versions) in &plan.groups {
            for version in versions {
                self.replay_version(source_dir, target_repo, &root_name, key, version, &mut report)?;
            }
        }

        if report.ledger_skips > 0 {
            info!(
                skipped = report.ledger_skips,
                "[REPLAY] Skipped files already committed according to the ledger"
            );
        }
        info!(
            commits = report.commits,
            identical = report.identical_skips,
            companions = report.companions,
            dry_run = self.dry_run,
            "[REPLAY] Finished"
        );
        Ok(report)
    }

    fn replay_plain(
        &self,
        source_dir: &Path,
        target_repo: &Path,
        root_name: &str,
        entry: &PlainFile,
        report: &mut ReplayReport,
    ) -> Result<(), ReplayError> {
        let file_name = file_name(&entry.path);
        let rel = join_rel(&entry.rel_dir, &file_name);
        let unit = Unit {
            source: &entry.path,
            source_rel: source_relative(source_dir, &entry.path, &rel),
            target_rel: rel.clone(),
            page_id: page_id_for(&entry.rel_dir, root_name),
        };
        if self.already_committed(&unit, report)? {
            return Ok(());
        }
        let bytes = file_size(&entry.path)?;

        if self.dry_run {
            info!(path = %rel, bytes, "[DRY RUN] Add {rel} ({bytes} bytes)");
            report.commits += 1;
            return Ok(());
        }

        self.materialize(target_repo, &unit, report)?;
        if self.vcs.has_pending_changes(target_repo)? {
            self.vcs.commit(target_repo, &format!("Add {rel}"))?;
            report.commits += 1;
            info!(path = %rel, bytes, "[REPLAY] Committed file");
        } else {
            report.identical_skips += 1;
            info!(path = %rel, bytes, "[REPLAY] File already present with identical content");
        }

        if let Some(ledger) = self.ledger {
            ledger.mark_file_committed(&unit.source_rel)?;
            if let Some(page_id) = &unit.page_id {
                ledger.mark_attachment_committed_by_filename(page_id, &file_name)?;
            }
        }
        Ok(())
    }

    fn replay_version(
        &self,
        source_dir: &Path,
        target_repo: &Path,
        root_name: &str,
        key: &GroupKey,
        version: &VersionedFile,
        report: &mut ReplayReport,
    ) -> Result<(), ReplayError> {
        let source_name = file_name(&version.path);
        let display_path = join_rel(&key.rel_dir, &key.target_name());
        let unit = Unit {
            source: &version.path,
            source_rel: source_relative(
                source_dir,
                &version.path,
                &join_rel(&key.rel_dir, &source_name),
            ),
            target_rel: display_path.clone(),
            page_id: page_id_for(&key.rel_dir, root_name),
        };
        if self.already_committed(&unit, report)? {
            return Ok(());
        }
        let bytes = file_size(&version.path)?;

        if self.dry_run {
            info!(
                path = %display_path,
                version = %version.version,
                file = %source_name,
                bytes,
                "[DRY RUN] {display_path} version {} ({source_name}, {bytes} bytes)",
                version.version
            );
            report.commits += 1;
            return Ok(());
        }

        self.materialize(target_repo, &unit, report)?;
        if !self.vcs.has_pending_changes(target_repo)? {
            report.identical_skips += 1;
            info!(
                path = %display_path,
                version = %version.version,
                bytes,
                "[REPLAY] Version identical to previous, no commit"
            );
            if let Some(ledger) = self.ledger {
                ledger.mark_file_committed(&unit.source_rel)?;
            }
            return Ok(());
        }

        self.vcs
            .commit(target_repo, &format!("{display_path} version {}", version.version))?;
        report.commits += 1;
        info!(
            path = %display_path,
            version = %version.version,
            file = %source_name,
            bytes,
            "[REPLAY] Committed version"
        );

        if let Some(ledger) = self.ledger {
            ledger.mark_file_committed(&unit.source_rel)?;
            if let (Some(page_id), Some(page_version)) =
                (&unit.page_id, version.token.page_version())
            {
                ledger.mark_version_committed(
                    page_id,
                    page_version,
                    export_format_for_extension(&key.extension),
                )?;
            }
        }
        Ok(())
    }

    fn already_committed(&self, unit: &Unit<'_>, report: &mut ReplayReport) -> Result<bool, ReplayError> {
        let Some(ledger) = self.ledger else {
            return Ok(false);
        };
        if ledger.is_file_committed(&unit.source_rel)? {
            debug!(path = %unit.source_rel, "Already committed according to the ledger");
            report.ledger_skips += 1;
            return Ok(true);
        }
        Ok(false)
    }

    /// Copy the unit into the working tree and stage it, plus its companion.
    fn materialize(
        &self,
        target_repo: &Path,
        unit: &Unit<'_>,
        report: &mut ReplayReport,
    ) -> Result<(), ReplayError> {
        self.vcs.place_file(target_repo, unit.source, &unit.target_rel)?;
        self.vcs.stage_file(target_repo, &unit.target_rel)?;

        let (rel_dir, target_name) = match unit.target_rel.rsplit_once('/') {
            Some((dir, name)) => (dir, name),
            None => (ROOT_DIR, unit.target_rel.as_str()),
        };
        if !is_word_document(target_name) {
            return Ok(());
        }
        let placed = tree_path(target_repo, &unit.target_rel);
        match self.converter.to_markdown(&placed) {
            Some(markdown) => {
                let companion = join_rel(rel_dir, &companion_name(target_name));
                self.vcs
                    .write_file(target_repo, &companion, markdown.as_bytes())?;
                self.vcs.stage_file(target_repo, &companion)?;
                report.companions += 1;
                info!(
                    path = %companion,
                    bytes = markdown.len(),
                    "[REPLAY] Wrote markdown companion"
                );
            }
            None => warn!(
                path = %unit.target_rel,
                "[REPLAY] Markdown conversion unavailable, companion omitted"
            ),
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_size(path: &Path) -> Result<u64, ReplayError> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn source_relative(source_dir: &Path, path: &Path, fallback: &str) -> String {
    path.strip_prefix(source_dir)
        .map(crate::discovery::relative_string)
        .unwrap_or_else(|_| fallback.to_string())
}

/// Page id of the directory a unit lives in; root files use the source
/// directory's own name.
fn page_id_for(rel_dir: &str, root_name: &str) -> Option<String> {
    let dir_name = if rel_dir == ROOT_DIR {
        root_name
    } else {
        rel_dir.rsplit('/').next().unwrap_or(rel_dir)
    };
    page_id_from_dir_name(dir_name).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_id_uses_innermost_directory() {
        assert_eq!(page_id_for("Root_1/Child_22", "out"), Some("22".to_string()));
        assert_eq!(page_id_for("Root_1/notes", "out"), None);
        assert_eq!(page_id_for(".", "Main Page_123"), Some("123".to_string()));
        assert_eq!(page_id_for(".", "source"), None);
    }
}
