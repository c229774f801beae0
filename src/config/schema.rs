//! Configuration schema for kiln
//!
//! Configuration is stored at `~/.config/kiln/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// HTTP and proxy settings
    pub network: NetworkConfig,

    /// Image build settings
    pub build: BuildConfig,

    /// Registry credential settings
    pub credentials: CredentialsConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Fall back to environment variables for unset flags
    pub use_env: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            use_env: true,
            log_format: "text".to_string(),
        }
    }
}

/// Network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Proxy URL for registry traffic and child processes
    pub proxy: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Registries reached over plain http
    pub insecure_registries: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout_secs: 30,
            insecure_registries: vec![],
        }
    }
}

/// Image build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Container CLI used for build, pull, tag and push
    pub container_cli: String,

    /// Reuse existing images by default
    pub reuse: bool,

    /// Paths excluded from the fingerprint in addition to the built-in list
    pub exclude: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            container_cli: "docker".to_string(),
            reuse: true,
            exclude: vec![],
        }
    }
}

/// Registry credential configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Google Container / Artifact Registry settings
    pub gcp: GcpConfig,

    /// Azure Container Registry settings
    pub azure: AzureConfig,

    /// Local docker credential store settings
    pub docker: DockerConfig,
}

/// GCP credential settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpConfig {
    /// Service account key file (defaults to GOOGLE_APPLICATION_CREDENTIALS)
    pub key_file: Option<PathBuf>,

    /// Service account to impersonate with gcloud
    pub service_account: Option<String>,
}

/// Azure credential settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    /// ACR refresh token (defaults to ACR_REFRESH_TOKEN, then `az acr login`)
    pub refresh_token: Option<String>,
}

/// Docker credential store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Path to config.json (defaults to $DOCKER_CONFIG or ~/.docker)
    pub config_path: Option<PathBuf>,
}
