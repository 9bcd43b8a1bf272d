//! Source tree discovery: split files into plain entries and version groups.
//!
//! A group collects every file in one directory that shares a base name and
//! extension, e.g. `report 1.0.docx` and `report 2.0.docx`. Groups come back
//! keyed in a [`BTreeMap`], so iterating them is already in replay order, and
//! each group is sorted ascending by [`VersionToken`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::version::{parse_versioned_name, VersionParseError, VersionToken};

/// Relative directory used for files directly under the source root.
pub const ROOT_DIR: &str = ".";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Version {
        path: PathBuf,
        #[source]
        source: VersionParseError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub rel_dir: String,
    pub base: String,
    pub extension: String,
}

impl GroupKey {
    /// File name every version of the group is written to in the target.
    pub fn target_name(&self) -> String {
        format!("{}.{}", self.base, self.extension)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedFile {
    pub version: String,
    pub token: VersionToken,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainFile {
    pub rel_dir: String,
    pub path: PathBuf,
}

#[derive(Debug, Default)]
pub struct ReplayPlan {
    pub groups: BTreeMap<GroupKey, Vec<VersionedFile>>,
    pub plain: Vec<PlainFile>,
}

impl ReplayPlan {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.plain.is_empty()
    }

    pub fn version_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// Walk `source_dir` and build the replay plan.
pub fn discover(source_dir: &Path) -> Result<ReplayPlan, DiscoveryError> {
    let files = collect_files(source_dir)?;
    let mut plan = ReplayPlan::default();

    for path in files {
        let rel_dir = path
            .parent()
            .and_then(|parent| parent.strip_prefix(source_dir).ok())
            .map(relative_string)
            .unwrap_or_else(|| ROOT_DIR.to_string());
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match parse_versioned_name(&file_name) {
            Some(name) => {
                let token = VersionToken::parse(&name.version).map_err(|source| {
                    DiscoveryError::Version {
                        path: path.clone(),
                        source,
                    }
                })?;
                let key = GroupKey {
                    rel_dir,
                    base: name.base,
                    extension: name.extension,
                };
                plan.groups.entry(key).or_default().push(VersionedFile {
                    version: name.version,
                    token,
                    path,
                });
            }
            None => plan.plain.push(PlainFile { rel_dir, path }),
        }
    }

    for versions in plan.groups.values_mut() {
        // sort_by is stable: equal tokens keep discovery order
        versions.sort_by(|a, b| a.token.cmp(&b.token));
    }

    debug!(
        source_dir = %source_dir.display(),
        plain = plan.plain.len(),
        groups = plan.groups.len(),
        versions = plan.version_count(),
        "Discovery finished"
    );
    Ok(plan)
}

/// Every regular file under `root`, sorted by full path.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| DiscoveryError::Io { path, source }
    };

    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).map_err(io_err(&dir))? {
            let entry = entry.map_err(io_err(&dir))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(io_err(&path))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            } else if file_type.is_symlink() {
                // follow links to files, never links to directories
                if fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false) {
                    files.push(path);
                }
            }
        }
    }
    files.sort();
    Ok(files)
}

/// `/`-joined form of a path relative to the source root.
pub fn relative_string(rel: &Path) -> String {
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        ROOT_DIR.to_string()
    } else {
        parts.join("/")
    }
}

/// Path of `name` inside `rel_dir`, as written in commit messages and the index.
pub fn join_rel(rel_dir: &str, name: &str) -> String {
    if rel_dir == ROOT_DIR {
        name.to_string()
    } else {
        format!("{rel_dir}/{name}")
    }
}

/// Page id from a directory named `<Title>_<digits>`.
pub fn page_id_from_dir_name(dir_name: &str) -> Option<&str> {
    let (_, candidate) = dir_name.rsplit_once('_')?;
    if !candidate.is_empty() && candidate.bytes().all(|b| b.is_ascii_digit()) {
        Some(candidate)
    } else {
        None
    }
}

/// Export format recorded in the ledger for a file extension.
pub fn export_format_for_extension(extension: &str) -> &str {
    match extension {
        "md" => "markdown",
        other => other,
    }
}
