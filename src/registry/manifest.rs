//! Manifest digests and tag listings over the v2 API

use super::http::{Endpoint, HttpClient, HttpResponse};
use super::{RegistryCredential, TagDigestSet};
use crate::error::{KilnError, KilnResult};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Manifest media types we accept, single-arch and multi-arch
pub(crate) const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.oci.image.index.v1+json";

/// `tags/list` body. Artifact Registry and GCR add the `manifest` map.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TagList {
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub manifest: Option<BTreeMap<String, ManifestEntry>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ManifestEntry {
    #[serde(default)]
    pub tag: Vec<String>,
}

impl TagList {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().flatten().any(|t| t == tag)
            || self
                .manifest
                .iter()
                .flat_map(|m| m.values())
                .any(|entry| entry.tag.iter().any(|t| t == tag))
    }

    /// Digest grouping, when the registry provides one
    pub fn digest_set(&self) -> Option<TagDigestSet> {
        let manifest = self.manifest.as_ref()?;
        let mut set = TagDigestSet::new();
        for (digest, entry) in manifest {
            for tag in &entry.tag {
                set.insert(digest.clone(), tag.clone());
            }
        }
        Some(set)
    }
}

fn auth_headers(credential: &RegistryCredential) -> Vec<(&'static str, String)> {
    credential
        .authorization()
        .map(|value| vec![("Authorization", value)])
        .unwrap_or_default()
}

fn query_failure(host: &str, what: &str, response: &HttpResponse) -> KilnError {
    KilnError::query(
        host,
        format!("{} returned HTTP {}: {}", what, response.status, response.snippet()),
    )
}

/// Digest of `reference` in `repository`; `None` when the registry says 404.
///
/// Asks with HEAD first so the lookup does not count as a pull. Falls back
/// to GET and hashes the body when HEAD is refused or carries no
/// `Docker-Content-Digest`.
pub(crate) async fn manifest_digest(
    http: &HttpClient,
    endpoint: &Endpoint,
    credential: &RegistryCredential,
    repository: &str,
    reference: &str,
) -> KilnResult<Option<String>> {
    let url = endpoint.v2_url(&format!("{}/manifests/{}", repository, reference));
    let auth = auth_headers(credential);
    let mut headers: Vec<(&str, &str)> = vec![("Accept", MANIFEST_ACCEPT)];
    headers.extend(auth.iter().map(|(k, v)| (*k, v.as_str())));

    let head = http.head(&url, &headers).await?;
    if head.status == 404 {
        debug!("{}:{} not found", repository, reference);
        return Ok(None);
    }
    if let Some(digest) = head
        .is_success()
        .then(|| head.header("docker-content-digest"))
        .flatten()
        .filter(|d| !d.is_empty())
    {
        debug!("{}:{} -> {}", repository, reference, digest);
        return Ok(Some(digest.to_string()));
    }

    let response = http.get(&url, &headers).await?;
    if response.status == 404 {
        debug!("{}:{} not found", repository, reference);
        return Ok(None);
    }
    if !response.is_success() {
        return Err(query_failure(credential.host(), "manifest request", &response));
    }

    let digest = match response.header("docker-content-digest") {
        Some(digest) if !digest.is_empty() => digest.to_string(),
        _ => format!("sha256:{}", hex::encode(Sha256::digest(response.body.as_bytes()))),
    };

    debug!("{}:{} -> {}", repository, reference, digest);
    Ok(Some(digest))
}

/// `tags/list` for `repository`; `None` when the repository does not exist
pub(crate) async fn list_tags(
    http: &HttpClient,
    endpoint: &Endpoint,
    credential: &RegistryCredential,
    repository: &str,
) -> KilnResult<Option<TagList>> {
    let url = endpoint.v2_url(&format!("{}/tags/list", repository));
    let auth = auth_headers(credential);
    let headers: Vec<(&str, &str)> = auth.iter().map(|(k, v)| (*k, v.as_str())).collect();

    let response = http.get(&url, &headers).await?;
    if response.status == 404 {
        debug!("Repository {} not found", repository);
        return Ok(None);
    }
    if !response.is_success() {
        return Err(query_failure(credential.host(), "tag listing", &response));
    }

    let list: TagList = serde_json::from_str(&response.body).map_err(|e| {
        KilnError::query(credential.host(), format!("unexpected tag listing: {}", e))
    })?;
    Ok(Some(list))
}

/// Siblings of `tag`, from the listing's digest map or by fetching each
/// listed tag's manifest digest
pub(crate) async fn siblings_from_listing(
    http: &HttpClient,
    endpoint: &Endpoint,
    credential: &RegistryCredential,
    repository: &str,
    tag: &str,
) -> KilnResult<BTreeSet<String>> {
    let Some(list) = list_tags(http, endpoint, credential, repository).await? else {
        return Ok(BTreeSet::new());
    };

    if let Some(set) = list.digest_set() {
        return Ok(set.siblings_of(tag));
    }

    if !list.has_tag(tag) {
        return Ok(BTreeSet::new());
    }

    let mut set = TagDigestSet::new();
    for listed in list.tags.iter().flatten() {
        if let Some(digest) = manifest_digest(http, endpoint, credential, repository, listed).await? {
            set.insert(digest, listed.clone());
        }
    }
    Ok(set.siblings_of(tag))
}
