//! Version-control adapter: the target repository as seen by the replay engine.
//!
//! [`GitCli`] drives the `git` executable as a subprocess. Any non-zero exit
//! is surfaced as [`VcsError::CommandFailed`] with the captured stderr; callers
//! abort on it, since continuing after a failed stage or commit would break
//! the ordering of the history being built.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("not a git repository: {0} (use --init to create one)")]
    NotARepository(PathBuf),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type VcsResult<T> = Result<T, VcsError>;

/// Operations the replay engine needs from the target repository.
///
/// `rel_path` arguments are `/`-separated paths relative to the repository
/// root.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait VersionControl {
    /// Make sure `repo` is a repository, creating and initialising it when
    /// `initialize_if_absent` is set.
    fn ensure_repository(&self, repo: &Path, initialize_if_absent: bool) -> VcsResult<()>;

    /// Copy `source` into the working tree at `rel_path`, replacing any
    /// existing file.
    fn place_file(&self, repo: &Path, source: &Path, rel_path: &str) -> VcsResult<()>;

    /// Write generated content into the working tree at `rel_path`.
    fn write_file(&self, repo: &Path, rel_path: &str, contents: &[u8]) -> VcsResult<()>;

    fn stage_file(&self, repo: &Path, rel_path: &str) -> VcsResult<()>;

    /// Whether the index differs from the last commit.
    fn has_pending_changes(&self, repo: &Path) -> VcsResult<bool>;

    fn commit(&self, repo: &Path, message: &str) -> VcsResult<()>;
}

/// Identity used for creating commits.
///
/// Passed via `-c` flags so commits work on machines without a configured
/// `user.name`/`user.email`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

/// [`VersionControl`] implemented with the `git` command line.
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    identity: Option<CommitIdentity>,
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, identity: Option<CommitIdentity>) -> Self {
        self.identity = identity;
        self
    }

    fn command(&self, workdir: &Path) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(workdir);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    fn run(&self, workdir: &Path, args: &[&str]) -> VcsResult<Output> {
        self.run_command(self.command(workdir), args)
    }

    fn run_command(&self, mut cmd: Command, args: &[&str]) -> VcsResult<Output> {
        let command = format!("git {}", args.join(" "));
        let output = cmd.args(args).output().map_err(|source| VcsError::Io {
            path: PathBuf::from("git"),
            source,
        })?;
        if output.status.success() {
            debug!(command = %command, "git command succeeded");
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(VcsError::CommandFailed { command, stderr })
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> VcsError {
    let path = path.to_path_buf();
    move |source| VcsError::Io { path, source }
}

pub(crate) fn tree_path(repo: &Path, rel_path: &str) -> PathBuf {
    rel_path
        .split('/')
        .fold(repo.to_path_buf(), |path, part| path.join(part))
}

fn ensure_parent(path: &Path) -> VcsResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    Ok(())
}

impl VersionControl for GitCli {
    fn ensure_repository(&self, repo: &Path, initialize_if_absent: bool) -> VcsResult<()> {
        if initialize_if_absent {
            fs::create_dir_all(repo).map_err(io_error(repo))?;
            self.run(repo, &["init"])?;
            info!(repo = %repo.display(), "Initialized git repository");
            return Ok(());
        }
        if repo.join(".git").is_dir() {
            Ok(())
        } else {
            Err(VcsError::NotARepository(repo.to_path_buf()))
        }
    }

    fn place_file(&self, repo: &Path, source: &Path, rel_path: &str) -> VcsResult<()> {
        let target = tree_path(repo, rel_path);
        ensure_parent(&target)?;
        fs::copy(source, &target).map_err(io_error(&target))?;
        Ok(())
    }

    fn write_file(&self, repo: &Path, rel_path: &str, contents: &[u8]) -> VcsResult<()> {
        let target = tree_path(repo, rel_path);
        ensure_parent(&target)?;
        fs::write(&target, contents).map_err(io_error(&target))?;
        Ok(())
    }

    fn stage_file(&self, repo: &Path, rel_path: &str) -> VcsResult<()> {
        self.run(repo, &["add", "--", rel_path])?;
        Ok(())
    }

    fn has_pending_changes(&self, repo: &Path) -> VcsResult<bool> {
        let output = self
            .command(repo)
            .args(["diff", "--cached", "--quiet"])
            .output()
            .map_err(|source| VcsError::Io {
                path: PathBuf::from("git"),
                source,
            })?;

        // Exit 0 = index matches HEAD, exit 1 = staged changes, other = error
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(VcsError::CommandFailed {
                command: "git diff --cached --quiet".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    fn commit(&self, repo: &Path, message: &str) -> VcsResult<()> {
        let mut cmd = self.command(repo);
        if let Some(identity) = &self.identity {
            cmd.arg("-c");
            cmd.arg(format!("user.name={}", identity.name));
            cmd.arg("-c");
            cmd.arg(format!("user.email={}", identity.email));
        }
        self.run_command(cmd, &["commit", "-q", "-m", message])?;
        Ok(())
    }
}
