//! Blocking HTTP transport for registry calls
//!
//! `ureq` is synchronous; every request runs on tokio's blocking pool so the
//! async callers stay on the runtime thread. Non-2xx statuses are returned as
//! responses, not errors, so callers can tell 401 from 404.

use crate::config::schema::NetworkConfig;
use crate::error::{KilnError, KilnResult};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use ureq::Agent;

/// Docker Hub registry API host
pub const DOCKER_HUB_API: &str = "registry-1.docker.io";
/// Docker Hub token service
pub const DOCKER_HUB_TOKEN_URL: &str = "https://auth.docker.io/token";
/// Docker Hub service name used in token requests
pub const DOCKER_HUB_SERVICE: &str = "registry.docker.io";

/// Registry response with lower-cased header names
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Body prefix for error messages
    pub fn snippet(&self) -> String {
        let body = self.body.trim();
        match body.char_indices().nth(200) {
            Some((idx, _)) => format!("{}...", &body[..idx]),
            None => body.to_string(),
        }
    }
}

enum Method {
    Get,
    Head,
    PostForm(Vec<(String, String)>),
}

/// Shared HTTP client
#[derive(Clone)]
pub struct HttpClient {
    agent: Agent,
}

impl HttpClient {
    /// Build a client honouring `network.proxy` and `network.timeout_secs`
    pub fn new(network: &NetworkConfig) -> KilnResult<Self> {
        let mut builder = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(network.timeout_secs.max(1))));

        if let Some(url) = network.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = ureq::Proxy::new(url)
                .map_err(|e| KilnError::User(format!("Invalid proxy {}: {}", url, e)))?;
            builder = builder.proxy(Some(proxy));
        }

        Ok(Self {
            agent: Agent::new_with_config(builder.build()),
        })
    }

    pub async fn get(&self, url: &str, headers: &[(&str, &str)]) -> KilnResult<HttpResponse> {
        self.send(Method::Get, url, headers).await
    }

    pub async fn head(&self, url: &str, headers: &[(&str, &str)]) -> KilnResult<HttpResponse> {
        self.send(Method::Head, url, headers).await
    }

    /// POST an `application/x-www-form-urlencoded` body
    pub async fn post_form(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        form: &[(&str, &str)],
    ) -> KilnResult<HttpResponse> {
        let form = form
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.send(Method::PostForm(form), url, headers).await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, &str)],
    ) -> KilnResult<HttpResponse> {
        let agent = self.agent.clone();
        let url = url.to_string();
        let headers: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        tokio::task::spawn_blocking(move || execute(&agent, method, &url, &headers))
            .await
            .map_err(|e| KilnError::Internal(format!("HTTP task failed: {}", e)))?
    }
}

fn execute(
    agent: &Agent,
    method: Method,
    url: &str,
    headers: &[(String, String)],
) -> KilnResult<HttpResponse> {
    let http_err = |reason: String| KilnError::Http {
        url: url.to_string(),
        reason,
    };

    let result = match method {
        Method::Get => {
            debug!("GET {}", url);
            let mut request = agent.get(url);
            for (k, v) in headers {
                request = request.header(k.as_str(), v.as_str());
            }
            request.call()
        }
        Method::Head => {
            debug!("HEAD {}", url);
            let mut request = agent.head(url);
            for (k, v) in headers {
                request = request.header(k.as_str(), v.as_str());
            }
            request.call()
        }
        Method::PostForm(form) => {
            debug!("POST {}", url);
            let mut request = agent.post(url);
            for (k, v) in headers {
                request = request.header(k.as_str(), v.as_str());
            }
            request.send_form(form.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        }
    };

    let mut response = result.map_err(|e| http_err(e.to_string()))?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| http_err(format!("reading body: {}", e)))?;

    debug!("{} -> {}", url, status);
    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

/// Where a registry's API and token service live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `scheme://host` of the `/v2/` API
    pub api_base: String,
    /// Token service URL
    pub token_url: String,
    /// `service` parameter for token requests
    pub service: String,
}

impl Endpoint {
    /// Endpoint whose token service is `/v2/token` on the registry itself
    pub fn v2(host: &str, insecure: &[String]) -> Self {
        let api_base = format!("{}://{}", scheme_for(host, insecure), host);
        Self {
            token_url: format!("{}/v2/token", api_base),
            api_base,
            service: host.to_string(),
        }
    }

    /// ACR: OAuth2 token endpoint on the registry
    pub fn acr(host: &str, insecure: &[String]) -> Self {
        let api_base = format!("{}://{}", scheme_for(host, insecure), host);
        Self {
            token_url: format!("{}/oauth2/token", api_base),
            api_base,
            service: host.to_string(),
        }
    }

    /// Docker Hub's split API and auth hosts
    pub fn docker_hub() -> Self {
        Self {
            api_base: format!("https://{}", DOCKER_HUB_API),
            token_url: DOCKER_HUB_TOKEN_URL.to_string(),
            service: DOCKER_HUB_SERVICE.to_string(),
        }
    }

    /// Replace the token service with a challenge's realm/service
    pub fn with_challenge(mut self, challenge: &BearerChallenge) -> Self {
        self.token_url = challenge.realm.clone();
        if let Some(service) = &challenge.service {
            self.service = service.clone();
        }
        self
    }

    /// `<api_base>/v2/<path>`
    pub fn v2_url(&self, path: &str) -> String {
        format!("{}/v2/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// Token request URL with `service` and `scope`
    pub fn token_request_url(&self, scope: &str) -> String {
        let sep = if self.token_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}service={}&scope={}",
            self.token_url, sep, self.service, scope
        )
    }
}

/// Hosts in Docker Hub's namespace
pub fn is_docker_hub(host: &str) -> bool {
    matches!(host, "docker.io" | "index.docker.io" | DOCKER_HUB_API)
}

fn scheme_for(host: &str, insecure: &[String]) -> &'static str {
    let bare = host.split(':').next().unwrap_or(host);
    if insecure.iter().any(|h| h == host)
        || bare == "localhost"
        || bare == "127.0.0.1"
    {
        "http"
    } else {
        "https"
    }
}

/// Parsed `WWW-Authenticate: Bearer realm=...,service=...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
}

impl BearerChallenge {
    pub fn parse(header: &str) -> Option<Self> {
        let rest = header.trim();
        let scheme_len = rest.find(char::is_whitespace)?;
        if !rest[..scheme_len].eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        for param in split_params(&rest[scheme_len..]) {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                _ => {}
            }
        }

        realm.map(|realm| Self { realm, service })
    }
}

/// Split on commas outside double quotes
fn split_params(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, c) in params.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&params[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&params[start..]);
    parts
}
