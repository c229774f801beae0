//! GCP credential provider using oauth2l or the gcloud CLI

use super::cli_output;
use crate::config::schema::GcpConfig;
use crate::error::{KilnError, KilnResult};
use std::path::PathBuf;
use tracing::{debug, info};

/// Read-only scope is enough for tag and manifest queries
const OAUTH_SCOPE: &str = "cloud-platform.read-only";

/// GCP credential provider
pub struct GcpCredentials;

impl GcpCredentials {
    /// Get an OAuth2 access token.
    ///
    /// With a service-account key (config or `GOOGLE_APPLICATION_CREDENTIALS`)
    /// the key is exchanged by `oauth2l`; otherwise gcloud's ambient
    /// credentials are used.
    pub async fn access_token(config: &GcpConfig) -> KilnResult<String> {
        match Self::key_file(config) {
            Some(key_file) => Self::oauth2l_token(&key_file).await,
            None => Self::gcloud_token(config).await,
        }
    }

    fn key_file(config: &GcpConfig) -> Option<PathBuf> {
        config.key_file.clone().or_else(|| {
            std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })
    }

    async fn oauth2l_token(key_file: &std::path::Path) -> KilnResult<String> {
        info!("Requesting GCP access token with service account key...");

        if !key_file.exists() {
            return Err(KilnError::GcpCredential(format!(
                "service account key not found: {}",
                key_file.display()
            )));
        }

        let key = key_file.to_string_lossy();
        let output = cli_output(
            "oauth2l",
            &["fetch", "--credentials", &key, "--scope", OAUTH_SCOPE],
            "Install oauth2l: go install github.com/google/oauth2l@latest",
        )
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KilnError::GcpCredential(stderr.trim().to_string()));
        }

        Self::token_from_stdout(&output.stdout)
    }

    async fn gcloud_token(config: &GcpConfig) -> KilnResult<String> {
        info!("Requesting GCP access token...");

        let mut args = vec!["auth", "print-access-token"];
        if let Some(account) = &config.service_account {
            args.push("--impersonate-service-account");
            args.push(account);
        }

        let output = cli_output(
            "gcloud",
            &args,
            "Install the Google Cloud SDK: https://cloud.google.com/sdk/docs/install",
        )
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("not logged in")
                || stderr.contains("no active account")
                || stderr.contains("do not currently have an active account")
            {
                return Err(KilnError::GcpNotAuthenticated);
            }
            return Err(KilnError::GcpCredential(stderr.trim().to_string()));
        }

        Self::token_from_stdout(&output.stdout)
    }

    /// Last non-empty line of the tool output
    fn token_from_stdout(stdout: &[u8]) -> KilnResult<String> {
        let text = String::from_utf8_lossy(stdout);
        let token = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .unwrap_or_default()
            .to_string();

        if token.is_empty() {
            return Err(KilnError::GcpCredential("Empty token returned".to_string()));
        }

        debug!("Obtained GCP access token");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn token_is_last_line() {
        let token = GcpCredentials::token_from_stdout(b"WARNING: something\nya29.abc\n\n").unwrap();
        assert_eq!(token, "ya29.abc");
    }

    #[test]
    fn empty_output_is_error() {
        let err = GcpCredentials::token_from_stdout(b"\n  \n").unwrap_err();
        assert!(err.is_auth_error());
    }

    #[test]
    #[serial]
    fn config_key_file_wins_over_env() {
        std::env::set_var("GOOGLE_APPLICATION_CREDENTIALS", "/env/key.json");
        let config = GcpConfig {
            key_file: Some(PathBuf::from("/config/key.json")),
            service_account: None,
        };
        assert_eq!(
            GcpCredentials::key_file(&config),
            Some(PathBuf::from("/config/key.json"))
        );

        let config = GcpConfig::default();
        assert_eq!(
            GcpCredentials::key_file(&config),
            Some(PathBuf::from("/env/key.json"))
        );
        std::env::remove_var("GOOGLE_APPLICATION_CREDENTIALS");
    }

    #[tokio::test]
    async fn missing_key_file_is_credential_error() {
        let err = GcpCredentials::oauth2l_token(std::path::Path::new("/nonexistent/key.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::GcpCredential(_)));
    }
}
