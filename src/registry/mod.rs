//! Registry authentication and tag queries
//!
//! One `Registry` implementation per registry family, picked by
//! [`create_registry`] from the host name. Each hides its own handshake and
//! its own way of exposing which tags share a digest:
//!
//! | Family     | Credential                         | Siblings                      |
//! |------------|------------------------------------|-------------------------------|
//! | GCR / AR   | OAuth2 token -> `/v2/token` JWT    | `tags/list` manifest map      |
//! | ECR        | delegated to the AWS CLI           | `describe-images` digests     |
//! | ACR        | refresh token -> `/oauth2/token`   | `/acr/v1/<repo>/_tags`        |
//! | generic v2 | docker config.json -> `/v2/token`  | per-tag manifest digests      |

mod acr;
mod auth;
mod docker;
mod ecr;
mod factory;
mod gcr;
pub mod http;
mod manifest;

pub use acr::AcrRegistry;
pub use auth::{fetch_oauth2_token, fetch_v2_token};
pub use docker::DockerRegistry;
pub use ecr::EcrRegistry;
pub use factory::create_registry;
pub use gcr::GcrRegistry;
pub use http::{Endpoint, HttpClient};

use crate::builder::ExecutionMode;
use crate::error::{KilnError, KilnResult};
use crate::tag::ImageReference;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// What a credential is allowed to see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessScope {
    /// Listing rights over the whole registry
    Catalog,
    /// Pull rights on one repository
    Image,
}

impl AccessScope {
    /// Scope string for token requests.
    ///
    /// `repository` is the registry project and `image` the image name below
    /// it; both are required for `Image`.
    pub fn scope_string(self, repository: &str, image: &str) -> KilnResult<String> {
        match self {
            Self::Catalog => Ok("registry:catalog:*".to_string()),
            Self::Image => {
                if repository.trim().is_empty() || image.trim().is_empty() {
                    return Err(KilnError::InvalidScope(format!(
                        "image scope needs a repository and an image name (got '{}' and '{}')",
                        repository, image
                    )));
                }
                Ok(format!("repository:{}/{}:pull", repository, image))
            }
        }
    }
}

/// A credential obtained for one registry in this process
#[derive(Clone, PartialEq, Eq)]
pub enum RegistryCredential {
    /// Bearer token sent with every API call
    Bearer {
        token: String,
        host: String,
        scope: String,
    },
    /// The registry's own CLI holds the credential
    Delegated { host: String },
}

impl RegistryCredential {
    pub fn host(&self) -> &str {
        match self {
            Self::Bearer { host, .. } | Self::Delegated { host } => host,
        }
    }

    pub fn scope(&self) -> Option<&str> {
        match self {
            Self::Bearer { scope, .. } => Some(scope),
            Self::Delegated { .. } => None,
        }
    }

    /// `Authorization` header value, if any
    pub fn authorization(&self) -> Option<String> {
        match self {
            Self::Bearer { token, .. } => Some(format!("Bearer {}", token)),
            Self::Delegated { .. } => None,
        }
    }
}

impl fmt::Debug for RegistryCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer { host, scope, .. } => f
                .debug_struct("Bearer")
                .field("token", &"<redacted>")
                .field("host", host)
                .field("scope", scope)
                .finish(),
            Self::Delegated { host } => f.debug_struct("Delegated").field("host", host).finish(),
        }
    }
}

/// Snapshot of digest -> tags for one repository
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDigestSet {
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl TagDigestSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, digest: impl Into<String>, tag: impl Into<String>) {
        self.entries
            .entry(digest.into())
            .or_default()
            .insert(tag.into());
    }

    pub fn digest_of(&self, tag: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, tags)| tags.contains(tag))
            .map(|(digest, _)| digest.as_str())
    }

    /// All tags on `tag`'s digest, `tag` included; empty if `tag` is unknown
    pub fn siblings_of(&self, tag: &str) -> BTreeSet<String> {
        self.digest_of(tag)
            .and_then(|digest| self.entries.get(digest))
            .cloned()
            .unwrap_or_default()
    }
}

/// Registry family, detected from the host name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryFamily {
    Gcr,
    Ecr,
    Acr,
    GenericV2,
}

impl RegistryFamily {
    pub fn detect(host: &str) -> Self {
        let bare = host.split(':').next().unwrap_or(host).to_ascii_lowercase();

        if bare == "gcr.io" || bare.ends_with(".gcr.io") || bare.ends_with(".pkg.dev") {
            Self::Gcr
        } else if bare.ends_with(".amazonaws.com") {
            Self::Ecr
        } else if bare.ends_with(".azurecr.io") {
            Self::Acr
        } else {
            Self::GenericV2
        }
    }
}

impl fmt::Display for RegistryFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gcr => write!(f, "gcr"),
            Self::Ecr => write!(f, "ecr"),
            Self::Acr => write!(f, "acr"),
            Self::GenericV2 => write!(f, "v2"),
        }
    }
}

/// Tag and digest queries against one registry host.
///
/// `repository` in the query methods is the full path on the registry
/// (`project/namespace-identifier`).
#[async_trait]
pub trait Registry: Send + Sync {
    fn family(&self) -> RegistryFamily;

    fn host(&self) -> &str;

    /// Obtain a credential for `scope`
    async fn authenticate(
        &self,
        scope: AccessScope,
        repository: &str,
        image: &str,
    ) -> KilnResult<RegistryCredential>;

    async fn tag_exists(
        &self,
        credential: &RegistryCredential,
        repository: &str,
        tag: &str,
    ) -> KilnResult<bool>;

    /// Tags sharing `tag`'s digest; empty when `tag` does not exist
    async fn tag_siblings(
        &self,
        credential: &RegistryCredential,
        repository: &str,
        tag: &str,
    ) -> KilnResult<BTreeSet<String>>;

    /// Whether `tag` and `other` resolve to the same digest
    async fn shares_digest(
        &self,
        credential: &RegistryCredential,
        repository: &str,
        tag: &str,
        other: &str,
    ) -> KilnResult<bool> {
        let siblings = self.tag_siblings(credential, repository, tag).await?;
        Ok(siblings.contains(other))
    }

    /// Provider-specific setup before the first push
    async fn ensure_repository(
        &self,
        _reference: &ImageReference,
        _mode: ExecutionMode,
    ) -> KilnResult<()> {
        Ok(())
    }
}
