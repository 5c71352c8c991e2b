//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/ingest/cli.toml`
//! - Windows: `%APPDATA%/ingest/cli.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use ingest_protocol::constants::DEFAULT_CHUNK_SIZE;
use ingest_uploader::UploadConfig;
use serde::{Deserialize, Serialize};

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Server root, e.g. `https://usegalaxy.org/`.
    pub server_url: String,

    /// API key sent as `x-api-key`.
    pub api_key: String,

    /// Default destination history.
    pub history_id: String,

    pub chunk_size: u64,

    /// Retry cap for transient failures (unset: retry forever).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    /// HTTP request timeout in seconds (unset: no timeout).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Where upload sessions are remembered between runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_store: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080/".into(),
            api_key: String::new(),
            history_id: String::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            attempts: None,
            timeout_secs: None,
            session_store: None,
        }
    }
}

impl CliConfig {
    /// Loads configuration from `path` (or the default location), creating a
    /// default file if none exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: CliConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = CliConfig::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix (may contain API key).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            chunk_size: self.chunk_size,
            attempts: self.attempts,
            timeout: self.timeout_secs.map(Duration::from_secs),
            ..UploadConfig::default()
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let base = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Ok(base.join("ingest").join("cli.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA")?;
        Ok(PathBuf::from(appdata).join("ingest").join("cli.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        let home = std::env::var("HOME")?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("ingest")
            .join("cli.toml"))
    }
}
