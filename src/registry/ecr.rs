//! AWS Elastic Container Registry
//!
//! Everything goes through the AWS CLI, which owns the credential. Tag
//! lookups use `describe-images --image-ids imageTag=<tag>`; two tags share
//! an image when both report the same `imageDigest`.

use super::{AccessScope, Registry, RegistryCredential, RegistryFamily};
use crate::builder::{announce_dry_run, display_command, ExecutionMode};
use crate::credentials::{cli_output, AwsCredentials};
use crate::error::{KilnError, KilnResult};
use crate::tag::ImageReference;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

const INSTALL_HINT: &str = "Install the AWS CLI: https://aws.amazon.com/cli/";

/// Errors meaning "no such image", not "could not ask"
const NOT_FOUND_MARKERS: &[&str] = &["ImageNotFoundException", "RepositoryNotFoundException"];

#[derive(Debug, Deserialize)]
struct DescribeImagesResponse {
    #[serde(rename = "imageDetails", default)]
    image_details: Vec<ImageDetail>,
}

#[derive(Debug, Deserialize)]
struct ImageDetail {
    #[serde(rename = "imageDigest")]
    image_digest: String,
    #[serde(rename = "imageTags", default)]
    image_tags: Vec<String>,
}

pub struct EcrRegistry {
    program: String,
    host: String,
    registry_id: Option<String>,
    region: Option<String>,
}

impl EcrRegistry {
    /// `<account>.dkr.ecr.<region>.amazonaws.com`
    pub fn new(host: &str) -> Self {
        let (registry_id, region) = parse_host(host);
        Self {
            program: "aws".to_string(),
            host: host.to_string(),
            registry_id,
            region,
        }
    }

    fn ecr_args(&self, command: &str, extra: &[&str]) -> Vec<String> {
        let mut args = vec!["ecr".to_string(), command.to_string()];
        args.extend(extra.iter().map(|s| s.to_string()));
        if let Some(id) = &self.registry_id {
            args.push("--registry-id".to_string());
            args.push(id.clone());
        }
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        args
    }

    async fn aws(&self, args: &[String]) -> KilnResult<std::process::Output> {
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        cli_output(&self.program, &refs, INSTALL_HINT).await
    }

    /// The image `repository:tag` points at, `None` when there is no such tag
    async fn describe_image(&self, repository: &str, tag: &str) -> KilnResult<Option<ImageDetail>> {
        let image_id = format!("imageTag={}", tag);
        let args = self.ecr_args(
            "describe-images",
            &["--repository-name", repository, "--image-ids", &image_id, "--output", "json"],
        );
        let output = self.aws(&args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m)) {
                debug!("{}:{} not found in ECR", repository, tag);
                return Ok(None);
            }
            return Err(KilnError::query(&self.host, stderr.trim()));
        }

        let response: DescribeImagesResponse =
            serde_json::from_slice(&output.stdout).map_err(|e| {
                KilnError::query(&self.host, format!("Failed to parse describe-images output: {}", e))
            })?;

        Ok(response.image_details.into_iter().next())
    }
}

fn parse_host(host: &str) -> (Option<String>, Option<String>) {
    let parts: Vec<&str> = host.split('.').collect();
    match parts.as_slice() {
        [account, "dkr", "ecr", region, ..] => (Some(account.to_string()), Some(region.to_string())),
        _ => (None, None),
    }
}

#[async_trait]
impl Registry for EcrRegistry {
    fn family(&self) -> RegistryFamily {
        RegistryFamily::Ecr
    }

    fn host(&self) -> &str {
        &self.host
    }

    async fn authenticate(
        &self,
        scope: AccessScope,
        repository: &str,
        image: &str,
    ) -> KilnResult<RegistryCredential> {
        scope.scope_string(repository, image)?;
        let identity = AwsCredentials::caller_identity(self.region.as_deref()).await?;
        debug!("AWS CLI authenticated as {}", identity.arn);

        Ok(RegistryCredential::Delegated {
            host: self.host.clone(),
        })
    }

    async fn tag_exists(
        &self,
        _credential: &RegistryCredential,
        repository: &str,
        tag: &str,
    ) -> KilnResult<bool> {
        Ok(self.describe_image(repository, tag).await?.is_some())
    }

    async fn tag_siblings(
        &self,
        _credential: &RegistryCredential,
        repository: &str,
        tag: &str,
    ) -> KilnResult<BTreeSet<String>> {
        Ok(self
            .describe_image(repository, tag)
            .await?
            .map(|detail| detail.image_tags.into_iter().collect())
            .unwrap_or_default())
    }

    async fn shares_digest(
        &self,
        _credential: &RegistryCredential,
        repository: &str,
        tag: &str,
        other: &str,
    ) -> KilnResult<bool> {
        let Some(image) = self.describe_image(repository, tag).await? else {
            return Ok(false);
        };
        let other_image = self.describe_image(repository, other).await?;
        Ok(other_image.is_some_and(|o| o.image_digest == image.image_digest))
    }

    /// ECR needs one repository per image before the first push
    async fn ensure_repository(
        &self,
        reference: &ImageReference,
        mode: ExecutionMode,
    ) -> KilnResult<()> {
        let repository = reference.repository();
        let describe = self.ecr_args("describe-repositories", &["--repository-names", &repository]);
        let create = self.ecr_args("create-repository", &["--repository-name", &repository]);

        if mode.is_dry_run() {
            announce_dry_run(&display_command("aws", &describe));
            announce_dry_run(&display_command("aws", &create));
            return Ok(());
        }

        if self.aws(&describe).await?.status.success() {
            debug!("ECR repository {} exists", repository);
            return Ok(());
        }

        info!("Creating ECR repository {}", repository);
        let output = self.aws(&create).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(KilnError::RepositoryCreate {
                repository,
                output: format!("{}{}", stdout, stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}
