//! Configuration loading and root folder resolution
//!
//! Resolution priority for every setting that can come from more than one place:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the root folder
pub const ROOT_ENV_VAR: &str = "INSIGHT_ROOT";
/// Environment variable holding the classification oracle API key
pub const ORACLE_KEY_ENV_VAR: &str = "INSIGHT_ORACLE_API_KEY";
/// Environment variable holding the conversation source API key
pub const SOURCE_KEY_ENV_VAR: &str = "INSIGHT_SOURCE_API_KEY";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "insight.db";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding the database
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Classification oracle endpoint (OpenAI-compatible chat completions)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_oracle_url")]
    pub base_url: String,
    #[serde(default = "default_oracle_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_oracle_url(),
            model: default_oracle_model(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Conversation store endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Client-side throttle applied to every source request
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_url(),
            api_key: None,
            requests_per_second: default_requests_per_second(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5740
}

fn default_oracle_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_oracle_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_source_url() -> String {
    "http://127.0.0.1:8080/api".to_string()
}

fn default_requests_per_second() -> u32 {
    500
}

fn default_timeout_secs() -> u64 {
    60
}

/// Read a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load the TOML config from its platform location, falling back to defaults.
///
/// A missing or unreadable file is not fatal: a warning is logged and defaults are used.
pub fn load_or_default(explicit_path: Option<&Path>) -> TomlConfig {
    let path = match explicit_path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config_file(),
    };

    match path {
        Some(path) => match load_toml_config(&path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded TOML config");
                config
            }
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to default configuration");
                TomlConfig::default()
            }
        },
        None => {
            tracing::warn!("No config file found, using defaults");
            TomlConfig::default()
        }
    }
}

/// Locate the config file for the platform
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("insight").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/insight/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("insight"))
        .unwrap_or_else(|| PathBuf::from("./insight_data"))
}

/// Root folder resolution following the module priority order
pub struct RootFolderResolver<'a> {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml: Option<&'a TomlConfig>,
}

impl<'a> RootFolderResolver<'a> {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            toml: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, toml: &'a TomlConfig) -> Self {
        self.toml = Some(toml);
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            tracing::debug!(module = %self.module_name, "Root folder from command line");
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
            if !path.trim().is_empty() {
                tracing::debug!(module = %self.module_name, "Root folder from environment");
                return PathBuf::from(path);
            }
        }

        if let Some(path) = self.toml.and_then(|t| t.root_folder.clone()) {
            tracing::debug!(module = %self.module_name, "Root folder from TOML config");
            return path;
        }

        default_root_folder()
    }
}

/// Creates the root folder and derives file locations inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            tracing::info!(path = %self.root_folder.display(), "Created root folder");
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }
}

/// Resolve an API key: environment first, TOML second.
///
/// Returns `None` when neither source holds a non-blank key.
pub fn resolve_api_key(env_var_name: &str, toml_value: Option<&String>) -> Option<String> {
    let env_key = std::env::var(env_var_name).ok().filter(|k| is_valid_key(k));
    let toml_key = toml_value.filter(|k| is_valid_key(k)).cloned();

    if env_key.is_some() && toml_key.is_some() {
        tracing::warn!(
            env_var = env_var_name,
            "API key found in both environment and TOML. Using environment."
        );
    }

    env_key.or(toml_key)
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
