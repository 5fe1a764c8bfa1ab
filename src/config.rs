use crate::report::OutputFormat;
use crate::utils::get_config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User defaults for the CLI; every field can be overridden by a flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub output_format: OutputFormat,
    /// `tracing` filter used when neither `--verbose`/`--debug` nor
    /// `DFW_ANALYZER_LOG` is given
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Endpoint names applied when `analyze` is run without `--filter`
    #[serde(default)]
    pub default_filter: Vec<String>,
    /// List the deciding rules next to every edge in text output
    #[serde(default)]
    pub show_rule_ids: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::default(),
            log_level: default_log_level(),
            default_filter: Vec::new(),
            show_rule_ids: false,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// `config.json` under the XDG config directory.
pub fn config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

/// Saves the config using an atomic write pattern.
/// 1. Writes `<path>.tmp`, created with mode 0o600 before any data lands.
/// 2. Syncs it to disk.
/// 3. Atomically renames it over the target path.
///
/// # Async
/// Uses `tokio::fs` for non-blocking I/O.
pub async fn save_config(config: &AppConfig, path: &Path) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    let json = serde_json::to_string_pretty(config)?;
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(&temp_path).await?;
    file.write_all(json.as_bytes()).await?;
    file.sync_all().await?;

    tokio::fs::rename(&temp_path, path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            )
        } else {
            e
        }
    })
}

/// Loads the config, or returns the default if it is missing or invalid.
///
/// # Async
/// Uses `tokio::fs` for non-blocking I/O.
pub async fn load_config(path: &Path) -> AppConfig {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            tracing::warn!("Ignoring invalid config {:?}: {}", path, e);
            AppConfig::default()
        }),
        Err(_) => AppConfig::default(),
    }
}
