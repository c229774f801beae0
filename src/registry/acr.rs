//! Azure Container Registry
//!
//! Tag digests come from ACR's own `/acr/v1/` API, which reports the digest
//! per tag directly, instead of the v2 manifest endpoint.

use super::auth::fetch_oauth2_token;
use super::http::{Endpoint, HttpClient};
use super::{AccessScope, Registry, RegistryCredential, RegistryFamily, TagDigestSet};
use crate::config::schema::AzureConfig;
use crate::credentials::AzureCredentials;
use crate::error::{KilnError, KilnResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct TagDetail {
    name: String,
    digest: String,
}

#[derive(Debug, Deserialize)]
struct TagResponse {
    tag: TagDetail,
}

#[derive(Debug, Default, Deserialize)]
struct TagListResponse {
    #[serde(default)]
    tags: Vec<TagDetail>,
}

pub struct AcrRegistry {
    host: String,
    endpoint: Endpoint,
    http: HttpClient,
    azure: AzureConfig,
}

impl AcrRegistry {
    pub fn new(host: &str, endpoint: Endpoint, http: HttpClient, azure: AzureConfig) -> Self {
        Self {
            host: host.to_string(),
            endpoint,
            http,
            azure,
        }
    }

    fn acr_url(&self, path: &str) -> String {
        format!("{}/acr/v1/{}", self.endpoint.api_base, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        credential: &RegistryCredential,
        url: &str,
    ) -> KilnResult<Option<T>> {
        let auth = credential.authorization();
        let headers: Vec<(&str, &str)> = auth
            .as_deref()
            .map(|value| vec![("Authorization", value)])
            .unwrap_or_default();

        let response = self.http.get(url, &headers).await?;
        if response.status == 404 {
            return Ok(None);
        }
        if !response.is_success() {
            return Err(KilnError::query(
                &self.host,
                format!("HTTP {}: {}", response.status, response.snippet()),
            ));
        }

        let parsed = serde_json::from_str(&response.body).map_err(|e| {
            KilnError::query(&self.host, format!("unexpected response from {}: {}", url, e))
        })?;
        Ok(Some(parsed))
    }

    async fn tag_digest(
        &self,
        credential: &RegistryCredential,
        repository: &str,
        tag: &str,
    ) -> KilnResult<Option<String>> {
        let url = self.acr_url(&format!("{}/_tags/{}", repository, tag));
        let response: Option<TagResponse> = self.get_json(credential, &url).await?;
        let digest = response.map(|r| r.tag.digest);
        debug!("{}:{} -> {:?}", repository, tag, digest);
        Ok(digest)
    }
}

#[async_trait]
impl Registry for AcrRegistry {
    fn family(&self) -> RegistryFamily {
        RegistryFamily::Acr
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
        let refresh = AzureCredentials::refresh_token(&self.azure, &self.host).await?;
        let token = fetch_oauth2_token(&self.http, &self.endpoint, &scope, &refresh).await?;
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
        Ok(self.tag_digest(credential, repository, tag).await?.is_some())
    }

    async fn tag_siblings(
        &self,
        credential: &RegistryCredential,
        repository: &str,
        tag: &str,
    ) -> KilnResult<BTreeSet<String>> {
        let url = self.acr_url(&format!("{}/_tags", repository));
        let listing: Option<TagListResponse> = self.get_json(credential, &url).await?;

        let mut set = TagDigestSet::new();
        for detail in listing.unwrap_or_default().tags {
            set.insert(detail.digest, detail.name);
        }
        Ok(set.siblings_of(tag))
    }

    async fn shares_digest(
        &self,
        credential: &RegistryCredential,
        repository: &str,
        tag: &str,
        other: &str,
    ) -> KilnResult<bool> {
        let Some(digest) = self.tag_digest(credential, repository, tag).await? else {
            return Ok(false);
        };
        let other_digest = self.tag_digest(credential, repository, other).await?;
        Ok(other_digest.as_deref() == Some(digest.as_str()))
    }
}
