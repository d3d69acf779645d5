use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ingest::pipeline::DEFAULT_TRANSACTION_SIZE;
use crate::models::ScriptMode;

/// Config file looked up in the working directory when `--config` is absent.
pub const CONFIG_FILE: &str = "shiku.toml";

/// shiku configuration from shiku.toml
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct ShikuConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    /// Worker tasks; defaults to the CPU count
    #[serde(default)]
    pub workers: Option<usize>,
    /// Medium-pressure batch size; defaults to the CPU tier's value
    #[serde(default)]
    pub batch_size: Option<i64>,
    #[serde(default)]
    pub mode: ScriptMode,
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,
}

fn default_progress_interval() -> u64 {
    5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            batch_size: None,
            mode: ScriptMode::default(),
            progress_interval_secs: default_progress_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_transaction_size")]
    pub transaction_size: usize,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("shiku").join("poems.db"))
        .unwrap_or_else(|| PathBuf::from("shiku.db"))
}

fn default_transaction_size() -> usize {
    DEFAULT_TRANSACTION_SIZE
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            transaction_size: default_transaction_size(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoaderConfig {
    /// Era for files whose name names none
    #[serde(default = "default_dynasty")]
    pub default_dynasty: String,
}

fn default_dynasty() -> String {
    "唐".to_string()
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            default_dynasty: default_dynasty(),
        }
    }
}

/// `explicit` if given, else `shiku.toml` in the working directory.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

/// Load configuration; a missing or unreadable file yields defaults.
pub fn load_config(config_path: &Path) -> ShikuConfig {
    if !config_path.exists() {
        return ShikuConfig::default();
    }

    match std::fs::read_to_string(config_path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse {}: {}", config_path.display(), e);
            ShikuConfig::default()
        }),
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", config_path.display(), e);
            ShikuConfig::default()
        }
    }
}

pub const DEFAULT_CONFIG: &str = r#"# shiku configuration
# See: shiku config --help

[pipeline]
# workers = 8
# batch_size = 500
mode = "simplified"
progress_interval_secs = 5

[storage]
# db_path = "poems.db"
transaction_size = 5000

[loader]
default_dynasty = "唐"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("shiku.toml"));
        assert_eq!(config.pipeline.workers, None);
        assert_eq!(config.pipeline.mode, ScriptMode::Simplified);
        assert_eq!(config.storage.transaction_size, 5000);
        assert_eq!(config.loader.default_dynasty, "唐");
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shiku.toml");
        std::fs::write(
            &path,
            "[pipeline]\nworkers = 3\nmode = \"traditional\"\n\n[storage]\ndb_path = \"/tmp/p.db\"\n",
        )
        .unwrap();

        let config = load_config(&path);
        assert_eq!(config.pipeline.workers, Some(3));
        assert_eq!(config.pipeline.mode, ScriptMode::Traditional);
        assert_eq!(config.pipeline.progress_interval_secs, 5);
        assert_eq!(config.storage.db_path, PathBuf::from("/tmp/p.db"));
        assert_eq!(config.storage.transaction_size, 5000);
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shiku.toml");
        std::fs::write(&path, "[pipeline\nworkers = ").unwrap();
        assert_eq!(load_config(&path).pipeline.workers, None);
    }

    #[test]
    fn test_default_config_parses() {
        let config: ShikuConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.pipeline.mode, ScriptMode::Simplified);
        assert_eq!(config.loader.default_dynasty, "唐");
    }

    #[test]
    fn test_config_path() {
        assert_eq!(config_path(None), PathBuf::from(CONFIG_FILE));
        assert_eq!(
            config_path(Some(Path::new("/etc/shiku.toml"))),
            PathBuf::from("/etc/shiku.toml")
        );
    }
}
