//! AWS credential check using the AWS CLI
//!
//! ECR is never queried with a token minted here. The AWS CLI keeps its own
//! credential chain; all this provider does is confirm that chain resolves
//! before any ECR command runs.

use super::cli_output;
use crate::error::{KilnError, KilnResult};
use serde::Deserialize;
use tracing::debug;

const INSTALL_HINT: &str = "Install the AWS CLI: https://aws.amazon.com/cli/";

/// Identity the AWS CLI resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsIdentity {
    pub account: String,
    pub arn: String,
}

/// AWS credential provider
pub struct AwsCredentials;

impl AwsCredentials {
    /// Resolve the caller identity, optionally in `region`
    pub async fn caller_identity(region: Option<&str>) -> KilnResult<AwsIdentity> {
        let mut args = vec!["sts", "get-caller-identity", "--output", "json"];
        if let Some(region) = region {
            args.push("--region");
            args.push(region);
        }

        let output = cli_output("aws", &args, INSTALL_HINT).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("aws sts get-caller-identity failed: {}", stderr.trim());
            if stderr.contains("Unable to locate credentials")
                || stderr.contains("not configured")
                || stderr.contains("could not be found")
            {
                return Err(KilnError::AwsNotConfigured);
            }
            return Err(KilnError::token_exchange("sts.amazonaws.com", stderr.trim()));
        }

        parse_identity(&output.stdout)
    }
}

#[derive(Deserialize)]
struct CallerIdentityResponse {
    #[serde(rename = "Account")]
    account: String,
    #[serde(rename = "Arn")]
    arn: String,
}

fn parse_identity(stdout: &[u8]) -> KilnResult<AwsIdentity> {
    let response: CallerIdentityResponse = serde_json::from_slice(stdout).map_err(|e| {
        KilnError::token_exchange("sts.amazonaws.com", format!("Failed to parse response: {}", e))
    })?;

    Ok(AwsIdentity {
        account: response.account,
        arn: response.arn,
    })
}
