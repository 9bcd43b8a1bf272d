use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::export::{ExportFormat, ExportSettings};
use crate::vcs::CommitIdentity;

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub commit_identity: Option<CommitIdentity>,
    /// Program used to convert `.docx` files to Markdown.
    #[serde(default)]
    pub converter: Option<String>,
    #[serde(default)]
    pub confluence: Option<ConfluenceConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfluenceConfig {
    pub url: String,
    #[serde(deserialize_with = "page_ids")]
    pub page_ids: Vec<String>,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default)]
    pub export_versions: bool,
    #[serde(default)]
    pub export_attachments: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

/// Page ids are numeric in Confluence, so YAML authors write them either way.
fn page_ids<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PageId {
        Text(String),
        Number(u64),
    }
    let ids = Vec::<PageId>::deserialize(deserializer)?;
    Ok(ids
        .into_iter()
        .map(|id| match id {
            PageId::Text(s) => s,
            PageId::Number(n) => n.to_string(),
        })
        .collect())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            database_url: None,
            commit_identity: None,
            converter: None,
            confluence: None,
        }
    }
}

impl Config {
    pub fn trace_loaded(&self) {
        info!(
            output_dir = %self.output_dir.display(),
            ledger = self.database_url.is_some(),
            commit_identity = self.commit_identity.is_some(),
            converter = self.converter.as_deref().unwrap_or("pandoc"),
            root_pages = self.confluence.as_ref().map(|c| c.page_ids.len()).unwrap_or(0),
            "Loaded Config"
        );
        debug!(?self, "Config loaded (full debug)");
    }

    /// Export settings, when the config has a `confluence` section.
    pub fn export_settings(&self) -> Option<ExportSettings> {
        self.confluence.as_ref().map(|c| ExportSettings {
            output_dir: self.output_dir.clone(),
            site_url: c.url.clone(),
            format: c.format,
            export_versions: c.export_versions,
            export_attachments: c.export_attachments,
        })
    }
}
