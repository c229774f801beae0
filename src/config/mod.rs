//! Configuration management for kiln

pub mod schema;

pub use schema::{
    AzureConfig, BuildConfig, Config, CredentialsConfig, DockerConfig, GcpConfig, GeneralConfig,
    NetworkConfig,
};

use crate::error::{KilnError, KilnResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Environment variables the proxy setting is exported under
const PROXY_VARS: &[&str] = &["HTTP_PROXY", "HTTPS_PROXY"];

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kiln")
            .join("config.toml")
    }

    /// Load configuration, falling back to defaults when the file is missing
    pub async fn load(&self) -> KilnResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file {} not found, using defaults", self.config_path.display());
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> KilnResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| KilnError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| KilnError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> KilnResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            KilnError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    async fn ensure_config_dir(&self) -> KilnResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Proxy variables to export, skipping any already present in the environment
pub fn proxy_exports(
    network: &NetworkConfig,
    is_set: impl Fn(&str) -> bool,
) -> Vec<(&'static str, String)> {
    let Some(proxy) = network.proxy.as_deref().filter(|p| !p.trim().is_empty()) else {
        return Vec::new();
    };

    PROXY_VARS
        .iter()
        .filter(|var| !is_set(var))
        .map(|var| (*var, proxy.to_string()))
        .collect()
}

/// Export `network.proxy` to child processes (docker, gcloud, az, aws).
///
/// Must run before any other thread is started.
pub fn export_proxy(network: &NetworkConfig) {
    for (var, value) in proxy_exports(network, |var| std::env::var_os(var).is_some()) {
        debug!("Exporting {} from config", var);
        std::env::set_var(var, value);
    }
}
