use std::collections::HashMap;

use http::header::AUTHORIZATION;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tracing::error;

use crate::error::{DrsClientError, Result};
use crate::http_client::Api;
use crate::identifier::{endpoint_url, host_key};

/// One external identity provider advertised by a commons' workspace token
/// service.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct OidcProvider {
    pub base_url: String,
    pub idp: String,
}

#[derive(Debug, Deserialize)]
struct ExternalOidcResponse {
    #[serde(default)]
    providers: Vec<OidcProvider>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "access_token")]
    token: String,
}

/// Fetch the WTS advertisement from `hostname` and index the providers by
/// their host key, so callers can look up the idp for a remote host directly.
pub async fn external_oidc(client: &ClientWithMiddleware, hostname: &str) -> Result<HashMap<String, OidcProvider>> {
    let url = format!("{}/wts/external_oidc/", endpoint_url(hostname));
    let resp = client
        .get(&url)
        .with_extension(Api("wts::external_oidc"))
        .send()
        .await?
        .error_for_status()?;
    let data: ExternalOidcResponse = resp.json().await?;
    Ok(data.providers.into_iter().map(|p| (host_key(&p.base_url), p)).collect())
}

/// Exchange the caller's session at `hostname`'s WTS for an access token
/// scoped to the identity provider `idp`.
pub async fn get_token(
    client: &ClientWithMiddleware,
    hostname: &str,
    idp: &str,
    access_token: &str,
) -> Result<String> {
    let url = format!("{}/wts/token/", endpoint_url(hostname));
    let resp = client
        .get(&url)
        .query(&[("idp", idp)])
        .header(AUTHORIZATION, format!("bearer {access_token}"))
        .with_extension(Api("wts::token"))
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        error!(%hostname, %idp, %status, "WTS token exchange refused");
        return Err(DrsClientError::TokenExchange(format!("{hostname} (idp {idp}) returned {status}")));
    }

    let data: TokenResponse = resp.json().await?;
    Ok(data.token)
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn make_client() -> ClientWithMiddleware {
        reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build()
    }

    #[tokio::test]
    async fn test_external_oidc_indexed_by_host() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wts/external_oidc/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "providers": [
                    {"base_url": "https://externaldata.commons1.io/", "idp": "externaldata-keycloak"},
                    {"base_url": "https://data.commons2.org", "idp": "commons2"}
                ]
            })))
            .mount(&server)
            .await;

        let providers = external_oidc(&make_client(), &server.uri()).await.unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers["externaldata.commons1.io"].idp, "externaldata-keycloak");
        assert_eq!(providers["data.commons2.org"].idp, "commons2");
    }

    #[tokio::test]
    async fn test_get_token_accepts_both_field_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wts/token/"))
            .and(query_param("idp", "externaldata-keycloak"))
            .and(header("authorization", "bearer home-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "fresh"})))
            .mount(&server)
            .await;

        let token = get_token(&make_client(), &server.uri(), "externaldata-keycloak", "home-token")
            .await
            .unwrap();
        assert_eq!(token, "fresh");
    }

    #[tokio::test]
    async fn test_get_token_exchange_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wts/token/"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = get_token(&make_client(), &server.uri(), "idp", "home-token").await.unwrap_err();
        assert!(matches!(err, DrsClientError::TokenExchange(_)));
    }
}
