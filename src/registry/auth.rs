//! Token exchange against registry token services
//!
//! Any failure here is an authentication error: the caller never gets to
//! treat "could not get a token" as "image absent".

use super::http::{BearerChallenge, Endpoint, HttpClient, HttpResponse};
use crate::error::{KilnError, KilnResult};
use base64::Engine;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// `Basic` header for an already-encoded `user:password` blob
pub(crate) fn basic_header(blob: &str) -> String {
    format!("Basic {}", blob)
}

/// `Basic` header for a username and password
pub(crate) fn basic_header_for(username: &str, password: &str) -> String {
    let blob = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
    basic_header(&blob)
}

/// `GET <token_url>?service=&scope=` with optional Basic credentials
pub async fn fetch_v2_token(
    http: &HttpClient,
    endpoint: &Endpoint,
    scope: &str,
    authorization: Option<&str>,
) -> KilnResult<String> {
    let url = endpoint.token_request_url(scope);
    debug!("Requesting registry token for {} ({})", endpoint.service, scope);

    let headers: Vec<(&str, &str)> = authorization
        .map(|value| vec![("Authorization", value)])
        .unwrap_or_default();

    let response = http
        .get(&url, &headers)
        .await
        .map_err(|e| KilnError::token_exchange(&endpoint.service, e.to_string()))?;

    extract_token(&endpoint.service, &response)
}

/// `POST <token_url>` with `grant_type=refresh_token`
pub async fn fetch_oauth2_token(
    http: &HttpClient,
    endpoint: &Endpoint,
    scope: &str,
    refresh_token: &str,
) -> KilnResult<String> {
    debug!("Exchanging refresh token with {} ({})", endpoint.service, scope);

    let form = [
        ("grant_type", "refresh_token"),
        ("service", endpoint.service.as_str()),
        ("scope", scope),
        ("refresh_token", refresh_token),
    ];

    let response = http
        .post_form(&endpoint.token_url, &[], &form)
        .await
        .map_err(|e| KilnError::token_exchange(&endpoint.service, e.to_string()))?;

    extract_token(&endpoint.service, &response)
}

/// Ask `/v2/` for its Bearer challenge; `None` when there is none
pub(crate) async fn discover_challenge(http: &HttpClient, endpoint: &Endpoint) -> Option<BearerChallenge> {
    let response = match http.get(&endpoint.v2_url(""), &[]).await {
        Ok(response) => response,
        Err(e) => {
            debug!("Challenge discovery failed: {}", e);
            return None;
        }
    };

    if response.status != 401 {
        return None;
    }

    response
        .header("www-authenticate")
        .and_then(BearerChallenge::parse)
}

fn extract_token(service: &str, response: &HttpResponse) -> KilnResult<String> {
    if !response.is_success() {
        return Err(KilnError::token_exchange(
            service,
            format!("HTTP {}: {}", response.status, response.snippet()),
        ));
    }

    let parsed: TokenResponse = serde_json::from_str(&response.body).map_err(|e| {
        KilnError::token_exchange(service, format!("unparsable token response: {}", e))
    })?;

    parsed
        .token
        .or(parsed.access_token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| KilnError::token_exchange(service, "response has no token field"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::NetworkConfig;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::new(&NetworkConfig::default()).unwrap()
    }

    fn endpoint(server: &MockServer) -> Endpoint {
        let host = server.uri().trim_start_matches("http://").to_string();
        Endpoint::v2(&host, &[])
    }

    #[test]
    fn basic_header_encodes() {
        assert_eq!(basic_header_for("_token", "abc"), "Basic X3Rva2VuOmFiYw==");
    }

    #[tokio::test]
    async fn v2_token_sends_service_scope_and_basic() {
        let server = MockServer::start().await;
        let endpoint = endpoint(&server);
        Mock::given(method("GET"))
            .and(path("/v2/token"))
            .and(query_param("service", endpoint.service.as_str()))
            .and(query_param("scope", "repository:silta/ns-php:pull"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"token":"jwt-1"}"#))
            .mount(&server)
            .await;

        let token = fetch_v2_token(
            &client(),
            &endpoint,
            "repository:silta/ns-php:pull",
            Some("Basic dXNlcjpwYXNz"),
        )
        .await
        .unwrap();
        assert_eq!(token, "jwt-1");
    }

    #[tokio::test]
    async fn access_token_field_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"access_token":"jwt-2"}"#),
            )
            .mount(&server)
            .await;

        let token = fetch_v2_token(&client(), &endpoint(&server), "registry:catalog:*", None)
            .await
            .unwrap();
        assert_eq!(token, "jwt-2");
    }

    #[tokio::test]
    async fn rejected_exchange_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("denied"))
            .mount(&server)
            .await;

        let err = fetch_v2_token(&client(), &endpoint(&server), "registry:catalog:*", None)
            .await
            .unwrap_err();
        assert!(err.is_auth_error());
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn missing_token_field_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"expires_in":300}"#))
            .mount(&server)
            .await;

        let err = fetch_v2_token(&client(), &endpoint(&server), "registry:catalog:*", None)
            .await
            .unwrap_err();
        assert!(err.is_auth_error());
    }

    #[tokio::test]
    async fn unreachable_token_service_is_auth_error() {
        let endpoint = Endpoint::v2("127.0.0.1:1", &[]);
        let err = fetch_v2_token(&client(), &endpoint, "registry:catalog:*", None)
            .await
            .unwrap_err();
        assert!(err.is_auth_error());
        assert!(!err.is_query_error());
    }

    #[tokio::test]
    async fn oauth2_exchange_posts_refresh_token() {
        let server = MockServer::start().await;
        let host = server.uri().trim_start_matches("http://").to_string();
        let endpoint = Endpoint::acr(&host, &[]);
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"access_token":"acr-jwt"}"#),
            )
            .mount(&server)
            .await;

        let token = fetch_oauth2_token(&client(), &endpoint, "repository:p/i:pull", "rt-1")
            .await
            .unwrap();
        assert_eq!(token, "acr-jwt");
    }

    #[tokio::test]
    async fn challenge_is_discovered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(401).insert_header(
                "WWW-Authenticate",
                r#"Bearer realm="https://auth.example.com/token",service="example""#,
            ))
            .mount(&server)
            .await;

        let challenge = discover_challenge(&client(), &endpoint(&server)).await.unwrap();
        assert_eq!(challenge.realm, "https://auth.example.com/token");
        assert_eq!(challenge.service.as_deref(), Some("example"));
    }
}
