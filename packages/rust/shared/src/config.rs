//! Application configuration for edastream.
//!
//! User config lives at `~/.edastream/edastream.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{EdaError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "edastream.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".edastream";

// ---------------------------------------------------------------------------
// Config structs (matching edastream.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// EDA server connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-user defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the EDA server.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Overall timeout for one-shot requests (upload, history). Not applied to streams.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// TCP connect timeout, applied to every request including streams.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".into()
}
fn default_request_timeout() -> u64 {
    120
}
fn default_connect_timeout() -> u64 {
    10
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// User id sent with uploads and stream requests when `--uid` is omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Server-side directory queried by `plots`.
    #[serde(default = "default_plots_dir")]
    pub plots_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            uid: None,
            plots_dir: default_plots_dir(),
        }
    }
}

fn default_plots_dir() -> String {
    "outputs/plots".into()
}

// ---------------------------------------------------------------------------
// Client config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime HTTP client configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every endpoint path is joined onto.
    pub base_url: String,
    /// Overall timeout for one-shot requests.
    pub request_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Config pointing at `base_url` with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(default_request_timeout()),
            connect_timeout: Duration::from_secs(default_connect_timeout()),
        }
    }

    /// Parse and validate the base URL.
    pub fn parsed_base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            EdaError::config(format!("invalid base_url '{}': {e}", self.base_url))
        })?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            return Err(EdaError::config(format!(
                "base_url '{}' must be an http(s) URL",
                self.base_url
            )));
        }
        Ok(url)
    }
}

impl From<&AppConfig> for ClientConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.server.base_url.clone(),
            request_timeout: Duration::from_secs(config.server.request_timeout_secs),
            connect_timeout: Duration::from_secs(config.server.connect_timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.edastream/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| EdaError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.edastream/edastream.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| EdaError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| EdaError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EdaError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config).map_err(|e| EdaError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EdaError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
