//! Docker `config.json` credential store
//!
//! Read-only view of `$DOCKER_CONFIG/config.json` (or `~/.docker/config.json`).
//! Entries in `auths` are keyed by a host prefix; when a host has no entry
//! there, the configured credential helper (`credHelpers` / `credsStore`) is
//! asked instead.

use crate::error::{KilnError, KilnResult};
use base64::Engine;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Key docker login writes for Docker Hub
const DOCKER_HUB_KEY_PREFIX: &str = "https://index.docker.io/";

/// Hosts that all mean Docker Hub
const DOCKER_HUB_HOSTS: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];

/// Username credential helpers return for identity tokens
const IDENTITY_TOKEN_USER: &str = "<token>";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
    #[serde(default)]
    creds_store: Option<String>,
    #[serde(default)]
    cred_helpers: BTreeMap<String, String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
struct AuthEntry {
    auth: Option<String>,
    identitytoken: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HelperResponse {
    username: String,
    secret: String,
}

/// Stored credential for one registry
#[derive(Clone, PartialEq, Eq)]
pub struct DockerAuth {
    /// base64 `user:password`, sent verbatim as HTTP Basic auth
    pub auth: Option<String>,
    /// OAuth2 refresh token written by `docker login` for token-based logins
    pub identity_token: Option<String>,
}

impl std::fmt::Debug for DockerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerAuth")
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .field("identity_token", &self.identity_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl DockerAuth {
    /// Build a basic-auth entry from a username and secret
    pub fn basic(username: &str, secret: &str) -> Self {
        let blob = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, secret));
        Self {
            auth: Some(blob),
            identity_token: None,
        }
    }
}

/// Docker credential store
#[derive(Debug, Clone)]
pub struct DockerConfigStore {
    config_path: PathBuf,
}

impl Default for DockerConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerConfigStore {
    /// Use `$DOCKER_CONFIG/config.json`, falling back to `~/.docker/config.json`
    pub fn new() -> Self {
        let config_path = std::env::var("DOCKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".docker"))
                    .unwrap_or_else(|| PathBuf::from(".docker"))
            })
            .join("config.json");

        Self { config_path }
    }

    /// Use a specific config.json
    pub fn with_config_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Store from `credentials.docker.config_path` when set
    pub fn from_config(path: Option<&Path>) -> Self {
        match path {
            Some(p) if p.is_dir() => Self::with_config_path(p.join("config.json")),
            Some(p) => Self::with_config_path(p.to_path_buf()),
            None => Self::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Look up the credential for `host`
    pub async fn auth_for(&self, host: &str) -> KilnResult<DockerAuth> {
        let not_found = || KilnError::CredentialsNotFound {
            host: host.to_string(),
        };

        if !self.config_path.exists() {
            debug!("Docker config not found at {}", self.config_path.display());
            return Err(not_found());
        }

        let config = self.load()?;

        if let Some(entry) = find_entry(&config.auths, host) {
            let auth = entry.auth.clone().filter(|s| !s.is_empty());
            let identity_token = entry.identitytoken.clone().filter(|s| !s.is_empty());
            if auth.is_some() || identity_token.is_some() {
                debug!("Found stored credentials for {}", host);
                return Ok(DockerAuth {
                    auth,
                    identity_token,
                });
            }
        }

        let helper = config
            .cred_helpers
            .get(host)
            .or(config.creds_store.as_ref());
        if let Some(helper) = helper {
            debug!("Asking credential helper {} for {}", helper, host);
            if let Some(auth) = query_helper(helper, host).await? {
                return Ok(auth);
            }
        }

        Err(not_found())
    }

    fn load(&self) -> KilnResult<ConfigFile> {
        let content = std::fs::read_to_string(&self.config_path).map_err(|e| {
            KilnError::io(format!("reading {}", self.config_path.display()), e)
        })?;

        serde_json::from_str(&content).map_err(|e| KilnError::ConfigInvalid {
            path: self.config_path.clone(),
            reason: e.to_string(),
        })
    }
}

fn is_docker_hub(host: &str) -> bool {
    DOCKER_HUB_HOSTS.contains(&host)
}

fn strip_scheme(key: &str) -> &str {
    key.strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key)
}

/// First key (in sorted order) the host starts with, or the Docker Hub entry
fn find_entry<'a>(auths: &'a BTreeMap<String, AuthEntry>, host: &str) -> Option<&'a AuthEntry> {
    auths
        .iter()
        .find(|(key, _)| {
            let key = strip_scheme(key).trim_end_matches('/');
            !key.is_empty() && host.starts_with(key)
        })
        .or_else(|| {
            if is_docker_hub(host) {
                auths
                    .iter()
                    .find(|(key, _)| key.starts_with(DOCKER_HUB_KEY_PREFIX))
            } else {
                None
            }
        })
        .map(|(_, entry)| entry)
}

async fn query_helper(helper: &str, host: &str) -> KilnResult<Option<DockerAuth>> {
    let program = format!("docker-credential-{}", helper);
    let server = if is_docker_hub(host) {
        "https://index.docker.io/v1/".to_string()
    } else {
        host.to_string()
    };

    let mut child = match Command::new(&program)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            debug!("Credential helper {} unavailable: {}", program, e);
            return Ok(None);
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(server.as_bytes())
            .await
            .map_err(|e| KilnError::command_failed(format!("{} get", program), e))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| KilnError::command_failed(format!("{} get", program), e))?;

    if !output.status.success() {
        debug!(
            "{} has no credentials for {}: {}",
            program,
            host,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return Ok(None);
    }

    let response: HelperResponse = serde_json::from_slice(&output.stdout)?;
    if response.username == IDENTITY_TOKEN_USER {
        return Ok(Some(DockerAuth {
            auth: None,
            identity_token: Some(response.secret),
        }));
    }

    Ok(Some(DockerAuth::basic(&response.username, &response.secret)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with(content: &str) -> (TempDir, DockerConfigStore) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, content).unwrap();
        (dir, DockerConfigStore::with_config_path(path))
    }

    #[tokio::test]
    async fn finds_entry_by_host_prefix() {
        let (_dir, store) = store_with(
            r#"{"auths": {"registry.example.com": {"auth": "dXNlcjpwYXNz"}}}"#,
        );

        let auth = store.auth_for("registry.example.com").await.unwrap();
        assert_eq!(auth.auth.as_deref(), Some("dXNlcjpwYXNz"));
        assert!(auth.identity_token.is_none());
    }

    #[tokio::test]
    async fn scheme_in_key_is_ignored() {
        let (_dir, store) = store_with(
            r#"{"auths": {"https://ghcr.io": {"auth": "YTpi"}}}"#,
        );

        let auth = store.auth_for("ghcr.io").await.unwrap();
        assert_eq!(auth.auth.as_deref(), Some("YTpi"));
    }

    #[tokio::test]
    async fn docker_hub_falls_back_to_index_entry() {
        let (_dir, store) = store_with(
            r#"{"auths": {"https://index.docker.io/v1/": {"auth": "aHViOnB3"}}}"#,
        );

        let auth = store.auth_for("docker.io").await.unwrap();
        assert_eq!(auth.auth.as_deref(), Some("aHViOnB3"));
    }

    #[tokio::test]
    async fn identity_token_is_returned() {
        let (_dir, store) = store_with(
            r#"{"auths": {"myacr.azurecr.io": {"auth": "", "identitytoken": "refresh-me"}}}"#,
        );

        let auth = store.auth_for("myacr.azurecr.io").await.unwrap();
        assert_eq!(auth.identity_token.as_deref(), Some("refresh-me"));
    }

    #[tokio::test]
    async fn unknown_host_is_not_found() {
        let (_dir, store) = store_with(r#"{"auths": {"ghcr.io": {"auth": "YTpi"}}}"#);

        let err = store.auth_for("quay.io").await.unwrap_err();
        assert!(matches!(err, KilnError::CredentialsNotFound { ref host } if host == "quay.io"));
        assert!(err.is_auth_error());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = DockerConfigStore::with_config_path(dir.path().join("config.json"));

        let err = store.auth_for("ghcr.io").await.unwrap_err();
        assert!(matches!(err, KilnError::CredentialsNotFound { .. }));
    }

    #[tokio::test]
    async fn malformed_file_is_config_error() {
        let (_dir, store) = store_with("{ not json");

        let err = store.auth_for("ghcr.io").await.unwrap_err();
        assert!(matches!(err, KilnError::ConfigInvalid { .. }));
    }

    #[test]
    fn directory_path_resolves_to_config_json() {
        let dir = TempDir::new().unwrap();
        let store = DockerConfigStore::from_config(Some(dir.path()));
        assert_eq!(store.path(), dir.path().join("config.json"));
    }

    #[test]
    fn basic_encodes_user_and_secret() {
        let auth = DockerAuth::basic("user", "pass");
        assert_eq!(auth.auth.as_deref(), Some("dXNlcjpwYXNz"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let auth = DockerAuth::basic("user", "pass");
        let printed = format!("{:?}", auth);
        assert!(!printed.contains("dXNlcjpwYXNz"));
    }
}
