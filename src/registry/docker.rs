//! Generic Docker Registry v2 (Docker Hub, Harbor, GHCR, self-hosted)

use super::auth::{basic_header, discover_challenge, fetch_oauth2_token, fetch_v2_token};
use super::http::{is_docker_hub, Endpoint, HttpClient};
use super::manifest::{manifest_digest, siblings_from_listing};
use super::{AccessScope, Registry, RegistryCredential, RegistryFamily};
use crate::credentials::DockerConfigStore;
use crate::error::KilnResult;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::debug;

pub struct DockerRegistry {
    host: String,
    endpoint: Endpoint,
    http: HttpClient,
    store: DockerConfigStore,
}

impl DockerRegistry {
    pub fn new(host: &str, endpoint: Endpoint, http: HttpClient, store: DockerConfigStore) -> Self {
        Self {
            host: host.to_string(),
            endpoint,
            http,
            store,
        }
    }

    /// Token service for this registry. Docker Hub's is fixed; others
    /// announce theirs in the `/v2/` challenge and default to `/v2/token`.
    async fn token_endpoint(&self) -> Endpoint {
        if is_docker_hub(&self.host) {
            return self.endpoint.clone();
        }
        match discover_challenge(&self.http, &self.endpoint).await {
            Some(challenge) => {
                debug!("Token realm for {}: {}", self.host, challenge.realm);
                self.endpoint.clone().with_challenge(&challenge)
            }
            None => self.endpoint.clone(),
        }
    }

    async fn digest(
        &self,
        credential: &RegistryCredential,
        repository: &str,
        tag: &str,
    ) -> KilnResult<Option<String>> {
        manifest_digest(&self.http, &self.endpoint, credential, repository, tag).await
    }
}

#[async_trait]
impl Registry for DockerRegistry {
    fn family(&self) -> RegistryFamily {
        RegistryFamily::GenericV2
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
        let scope = scope.scope_string(repository, image)?;
        let stored = self.store.auth_for(&self.host).await?;
        let endpoint = self.token_endpoint().await;

        let token = match &stored.identity_token {
            Some(refresh) => fetch_oauth2_token(&self.http, &endpoint, &scope, refresh).await?,
            None => {
                let basic = stored.auth.as_deref().map(basic_header);
                fetch_v2_token(&self.http, &endpoint, &scope, basic.as_deref()).await?
            }
        };
        debug!("Authenticated to {}", self.host);

        Ok(RegistryCredential::Bearer {
            token,
            host: self.host.clone(),
            scope,
        })
    }

    async fn tag_exists(
        &self,
        credential: &RegistryCredential,
        repository: &str,
        tag: &str,
    ) -> KilnResult<bool> {
        Ok(self.digest(credential, repository, tag).await?.is_some())
    }

    async fn tag_siblings(
        &self,
        credential: &RegistryCredential,
        repository: &str,
        tag: &str,
    ) -> KilnResult<BTreeSet<String>> {
        siblings_from_listing(&self.http, &self.endpoint, credential, repository, tag).await
    }

    /// Two manifest requests instead of a full listing
    async fn shares_digest(
        &self,
        credential: &RegistryCredential,
        repository: &str,
        tag: &str,
        other: &str,
    ) -> KilnResult<bool> {
        let Some(digest) = self.digest(credential, repository, tag).await? else {
            return Ok(false);
        };
        let other_digest = self.digest(credential, repository, other).await?;
        Ok(other_digest.as_deref() == Some(digest.as_str()))
    }
}
