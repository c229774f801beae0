//! Google Container Registry and Artifact Registry

use super::auth::{basic_header_for, fetch_v2_token};
use super::http::{Endpoint, HttpClient};
use super::manifest::{list_tags, siblings_from_listing};
use super::{AccessScope, Registry, RegistryCredential, RegistryFamily};
use crate::config::schema::GcpConfig;
use crate::credentials::GcpCredentials;
use crate::error::KilnResult;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::debug;

/// Username GCR expects alongside an OAuth2 access token
const OAUTH_TOKEN_USER: &str = "_token";

pub struct GcrRegistry {
    host: String,
    endpoint: Endpoint,
    http: HttpClient,
    gcp: GcpConfig,
    access_token: Option<String>,
}

impl GcrRegistry {
    pub fn new(host: &str, endpoint: Endpoint, http: HttpClient, gcp: GcpConfig) -> Self {
        Self {
            host: host.to_string(),
            endpoint,
            http,
            gcp,
            access_token: None,
        }
    }

    /// Use a known OAuth2 access token instead of asking gcloud/oauth2l
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    async fn oauth_token(&self) -> KilnResult<String> {
        match &self.access_token {
            Some(token) => Ok(token.clone()),
            None => GcpCredentials::access_token(&self.gcp).await,
        }
    }
}

#[async_trait]
impl Registry for GcrRegistry {
    fn family(&self) -> RegistryFamily {
        RegistryFamily::Gcr
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
        let oauth = self.oauth_token().await?;
        let basic = basic_header_for(OAUTH_TOKEN_USER, &oauth);

        let token = fetch_v2_token(&self.http, &self.endpoint, &scope, Some(&basic)).await?;
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
        let list = list_tags(&self.http, &self.endpoint, credential, repository).await?;
        Ok(list.is_some_and(|l| l.has_tag(tag)))
    }

    async fn tag_siblings(
        &self,
        credential: &RegistryCredential,
        repository: &str,
        tag: &str,
    ) -> KilnResult<BTreeSet<String>> {
        siblings_from_listing(&self.http, &self.endpoint, credential, repository, tag).await
    }
}
