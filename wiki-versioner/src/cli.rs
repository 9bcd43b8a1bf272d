//! Command-line glue for the two binaries.
//!
//! `wiki-versioner` replays a source tree into a git repository; `wiki-export`
//! exports a Confluence page hierarchy into such a source tree. All behavior
//! lives in `wiki-versioner-core`; this module parses arguments, loads config,
//! wires adapters together and reports.
//!
//! Both entrypoints are async and take a parsed struct, so integration tests
//! can drive them without spawning a process.

use crate::load_config::{load_config, load_config_or_default};
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use wiki_versioner_core::convert::DefaultConverter;
use wiki_versioner_core::export::confluence::ConfluenceClient;
use wiki_versioner_core::export::Exporter;
use wiki_versioner_core::ledger::{open_ledger, open_ledger_read_only, Ledger, SqliteLedger};
use wiki_versioner_core::replay::Replayer;
use wiki_versioner_core::vcs::{GitCli, VersionControl};

/// Replay versioned files from a source tree as git commits.
#[derive(Parser, Debug)]
#[clap(
    name = "wiki-versioner",
    version,
    about = "Replay versioned files (\"<name> <version>.<ext>\") as ordered git commits"
)]
pub struct Cli {
    /// Directory holding the exported files
    pub source_dir: PathBuf,

    /// Git repository to commit into
    pub target_repo: PathBuf,

    /// Log what would be committed without touching the repository or ledger
    #[clap(long)]
    pub dry_run: bool,

    /// Create and initialise the target repository first
    #[clap(long)]
    pub init: bool,

    /// Ledger database (e.g. sqlite://export.db); overrides the config file
    #[clap(long)]
    pub database_url: Option<String>,

    /// Path to the YAML config file [default: config.yaml, if present]
    #[clap(long)]
    pub config: Option<PathBuf>,
}

/// Export a Confluence page hierarchy for replay.
#[derive(Parser, Debug)]
#[clap(
    name = "wiki-export",
    version,
    about = "Export Confluence pages, versions and attachments into a source tree"
)]
pub struct ExportCli {
    /// Path to the YAML config file
    #[clap(long)]
    pub config: PathBuf,

    /// Ledger database; overrides the config file
    #[clap(long)]
    pub database_url: Option<String>,
}

fn open_optional_ledger(
    database_url: Option<String>,
    read_only: bool,
) -> Result<Option<SqliteLedger>> {
    database_url
        .map(|url| {
            tracing::info!(database_url = %url, read_only, "Opening ledger");
            let opened = if read_only {
                open_ledger_read_only(&url)
            } else {
                open_ledger(&url)
            };
            opened.with_context(|| format!("failed to open ledger {url}"))
        })
        .transpose()
}

/// Replay entrypoint used by `main` and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    let config = load_config_or_default(cli.config.as_deref())?;
    if !cli.source_dir.is_dir() {
        bail!(
            "source directory does not exist: {}",
            cli.source_dir.display()
        );
    }

    let vcs = GitCli::new().with_identity(config.commit_identity.clone());
    if cli.init && cli.dry_run {
        tracing::info!(
            repo = %cli.target_repo.display(),
            "[DRY RUN] Skipping repository initialisation"
        );
    } else {
        vcs.ensure_repository(&cli.target_repo, cli.init)
            .with_context(|| format!("target {} is not usable", cli.target_repo.display()))?;
    }

    let ledger = open_optional_ledger(
        cli.database_url.or(config.database_url.clone()),
        cli.dry_run,
    )?;
    if ledger.is_none() {
        tracing::info!("No ledger configured, replaying every file");
    }
    let converter = match &config.converter {
        Some(program) => DefaultConverter::new(program.clone()),
        None => DefaultConverter::default(),
    };

    let report = Replayer::new(vcs, converter)
        .with_ledger(ledger.as_ref().map(|l| l as &dyn Ledger))
        .dry_run(cli.dry_run)
        .replay(&cli.source_dir, &cli.target_repo)
        .context("replay failed")?;

    tracing::info!(
        command = "replay",
        commits = report.commits,
        ledger_skips = report.ledger_skips,
        identical_skips = report.identical_skips,
        companions = report.companions,
        "Replay complete"
    );
    Ok(())
}

/// Export entrypoint used by the `wiki-export` binary.
pub async fn run_export(cli: ExportCli) -> Result<()> {
    tracing::info!("trace_initialised");

    let config = load_config(&cli.config)?;
    let confluence = config
        .confluence
        .as_ref()
        .context("config has no `confluence` section")?;
    if confluence.page_ids.is_empty() {
        bail!("confluence.page_ids is empty, nothing to export");
    }
    let settings = config
        .export_settings()
        .context("config has no `confluence` section")?;

    let client = ConfluenceClient::from_env(&confluence.url)?;
    let ledger = open_optional_ledger(cli.database_url.or(config.database_url.clone()), false)?;

    let report = Exporter::new(client, settings)
        .with_ledger(ledger.as_ref().map(|l| l as &dyn Ledger))
        .export(&confluence.page_ids)
        .await
        .context("export failed")?;

    tracing::info!(command = "export", ?report, "Export complete");
    Ok(())
}
