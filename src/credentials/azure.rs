//! Azure credential provider for ACR refresh tokens

use super::cli_output;
use crate::config::schema::AzureConfig;
use crate::error::{KilnError, KilnResult};
use serde::Deserialize;
use tracing::{debug, info};

/// Azure credential provider
pub struct AzureCredentials;

impl AzureCredentials {
    /// Get an ACR refresh token for `registry` (the `<name>.azurecr.io` host).
    ///
    /// Order: `credentials.azure.refresh_token`, `ACR_REFRESH_TOKEN`,
    /// then `az acr login --expose-token`.
    pub async fn refresh_token(config: &AzureConfig, registry: &str) -> KilnResult<String> {
        if let Some(token) = config.refresh_token.as_ref().filter(|t| !t.is_empty()) {
            debug!("Using configured ACR refresh token");
            return Ok(token.clone());
        }

        if let Some(token) = std::env::var("ACR_REFRESH_TOKEN").ok().filter(|t| !t.is_empty()) {
            debug!("Using ACR refresh token from environment");
            return Ok(token);
        }

        Self::expose_token(registry).await
    }

    async fn expose_token(registry: &str) -> KilnResult<String> {
        info!("Requesting ACR refresh token for {}...", registry);

        let name = registry_name(registry);
        let output = cli_output(
            "az",
            &["acr", "login", "--name", name, "--expose-token", "--output", "json"],
            "Install the Azure CLI: https://learn.microsoft.com/cli/azure/install-azure-cli",
        )
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("az login") || stderr.contains("not logged in") {
                return Err(KilnError::AzureNotAuthenticated);
            }
            return Err(KilnError::AzureCredential(stderr.trim().to_string()));
        }

        parse_login_response(&output.stdout)
    }
}

/// `myregistry.azurecr.io` -> `myregistry`
fn registry_name(registry: &str) -> &str {
    registry.split('.').next().unwrap_or(registry)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExposeTokenResponse {
    access_token: String,
}

fn parse_login_response(stdout: &[u8]) -> KilnResult<String> {
    let response: ExposeTokenResponse = serde_json::from_slice(stdout).map_err(|e| {
        KilnError::AzureCredential(format!("Failed to parse response: {}", e))
    })?;

    if response.access_token.is_empty() {
        return Err(KilnError::AzureCredential("Empty token returned".to_string()));
    }

    Ok(response.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn parse_expose_token_response() {
        let json = br#"{
            "accessToken": "refresh123",
            "loginServer": "myacr.azurecr.io"
        }"#;

        assert_eq!(parse_login_response(json).unwrap(), "refresh123");
    }

    #[test]
    fn malformed_response_is_auth_error() {
        let err = parse_login_response(b"not json").unwrap_err();
        assert!(err.is_auth_error());
    }

    #[test]
    fn registry_name_strips_domain() {
        assert_eq!(registry_name("myacr.azurecr.io"), "myacr");
    }

    #[tokio::test]
    #[serial]
    async fn configured_token_wins() {
        std::env::set_var("ACR_REFRESH_TOKEN", "from-env");
        let config = AzureConfig {
            refresh_token: Some("from-config".to_string()),
        };
        let token = AzureCredentials::refresh_token(&config, "myacr.azurecr.io")
            .await
            .unwrap();
        assert_eq!(token, "from-config");

        let token = AzureCredentials::refresh_token(&AzureConfig::default(), "myacr.azurecr.io")
            .await
            .unwrap();
        assert_eq!(token, "from-env");
        std::env::remove_var("ACR_REFRESH_TOKEN");
    }
}
