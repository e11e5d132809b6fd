use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::ignore::DEFAULT_IGNORE_FILE;
use crate::models::IdentifierMode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Http,
    Local,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_store_name")]
    pub name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,
    #[serde(default)]
    pub max_files: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            name: default_store_name(),
            base_url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            local_dir: default_local_dir(),
            max_files: None,
        }
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Local
}
fn default_store_name() -> String {
    "tree-mirror".to_string()
}
fn default_api_key_env() -> String {
    "TMIRROR_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_local_dir() -> PathBuf {
    PathBuf::from(".tmirror-store")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_ignore_file")]
    pub ignore_file: String,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub identifier: IdentifierMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            ignore_file: default_ignore_file(),
            ignore_patterns: Vec::new(),
            identifier: IdentifierMode::default(),
        }
    }
}

fn default_concurrency() -> usize {
    100
}
fn default_ignore_file() -> String {
    DEFAULT_IGNORE_FILE.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    500
}
fn default_shutdown_grace_ms() -> u64 {
    2000
}

impl Config {
    /// Defaults for running without a config file: local backend, 100
    /// in-flight operations, 500 ms debounce.
    pub fn minimal() -> Self {
        Self {
            store: StoreConfig::default(),
            sync: SyncConfig::default(),
            watch: WatchConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.name.trim().is_empty() {
            bail!("store.name must not be empty");
        }
        if self.store.backend == StoreBackend::Http && self.store.base_url.is_none() {
            bail!("store.base_url is required when store.backend is 'http'");
        }
        if self.sync.concurrency == 0 {
            bail!("sync.concurrency must be >= 1");
        }
        let ignore_file = &self.sync.ignore_file;
        if ignore_file.is_empty() || ignore_file.contains(['/', '\\']) {
            bail!(
                "sync.ignore_file must be a bare file name, got '{}'",
                ignore_file
            );
        }
        if self.watch.debounce_ms == 0 {
            bail!("watch.debounce_ms must be >= 1");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::minimal())
    }
}
