/// `load_config` module: reads the YAML config file into the core [`Config`].
///
/// Secrets never live in this file: Confluence credentials come from the
/// environment (`CONFLUENCE_API_EMAIL`, `CONFLUENCE_API_TOKEN`, loaded from
/// `.env` by the binaries). Everything here is plain settings.
///
/// # Errors
/// Unreadable or malformed files are `anyhow` errors carrying the path, and
/// are surfaced at the CLI boundary.
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{error, info};
use wiki_versioner_core::config::Config;

/// Config file the replay command reads when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let config: Config = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    config.trace_loaded();
    Ok(config)
}

/// Load `path` when given; otherwise [`DEFAULT_CONFIG_PATH`] if it exists,
/// else the built-in defaults.
pub fn load_config_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None if Path::new(DEFAULT_CONFIG_PATH).is_file() => load_config(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("default config {DEFAULT_CONFIG_PATH} is invalid")),
        None => {
            info!("No config file, using defaults");
            Ok(Config::default())
        }
    }
}
