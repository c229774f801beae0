//! Image references and branch tag normalization

use crate::error::{KilnError, KilnResult};
use std::fmt;

/// Prefix that keeps branch tags disjoint from hex content-hash tags
pub const BRANCH_TAG_PREFIX: &str = "branch--";

/// Derive a registry-safe auxiliary tag from a branch name.
///
/// Lowercases the input and replaces every character outside `[a-z0-9]`
/// with `-`, one for one.
pub fn normalize_tag(branch: &str) -> String {
    let body: String = branch
        .chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();

    format!("{}{}", BRANCH_TAG_PREFIX, body)
}

/// A repository location on a registry, without a tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub host: String,
    pub project: String,
    pub namespace: String,
    pub identifier: String,
}

impl ImageReference {
    /// Validate and build a reference
    pub fn new(
        host: impl Into<String>,
        project: impl Into<String>,
        namespace: impl Into<String>,
        identifier: impl Into<String>,
    ) -> KilnResult<Self> {
        let reference = Self {
            host: host.into(),
            project: project.into(),
            namespace: namespace.into(),
            identifier: identifier.into(),
        };

        for (name, value) in [
            ("image-repo-host", &reference.host),
            ("image-repo-project", &reference.project),
            ("namespace", &reference.namespace),
            ("image-identifier", &reference.identifier),
        ] {
            if value.trim().is_empty() {
                return Err(KilnError::MissingInput {
                    name: name.to_string(),
                });
            }
        }

        validate_host(&reference.host)?;
        Ok(reference)
    }

    /// `namespace-identifier`
    pub fn image_name(&self) -> String {
        format!("{}-{}", self.namespace, self.identifier)
    }

    /// Repository path on the registry: `project/namespace-identifier`
    pub fn repository(&self) -> String {
        format!("{}/{}", self.project, self.image_name())
    }

    /// Canonical repository URL: `host/project/namespace-identifier`
    pub fn repository_url(&self) -> String {
        format!("{}/{}", self.host, self.repository())
    }

    /// Full reference with a tag
    pub fn with_tag(&self, tag: &str) -> String {
        format!("{}:{}", self.repository_url(), tag)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repository_url())
    }
}

fn validate_host(host: &str) -> KilnResult<()> {
    if host.contains("://") || host.contains('/') || host.chars().any(char::is_whitespace) {
        return Err(KilnError::InvalidRegistryHost(host.to_string()));
    }
    Ok(())
}
