use std::collections::HashMap;
use std::time::{Duration, Instant};

use drs_client::wts::{self, OidcProvider};
use drs_client::host_key;
use reqwest_middleware::ClientWithMiddleware;
use tracing::{error, info, warn};

/// Per-host token state. The home commons keeps the caller's own token and
/// never expires; every other host goes through WTS exchange.
#[derive(Debug, Clone)]
struct KnownHostEndpoint {
    idp: Option<String>,
    access_token: Option<String>,
    last_refresh: Option<Instant>,
    use_wts: bool,
}

impl KnownHostEndpoint {
    fn expired(&self, window: Duration) -> bool {
        if !self.use_wts {
            return false;
        }
        match self.last_refresh {
            Some(at) => at.elapsed() >= window,
            None => true,
        }
    }
}

/// Session-scoped cache of access tokens, keyed by host.
///
/// Tokens for hosts other than the home commons are obtained by exchanging
/// the home token at the home WTS, using the idp advertised for that host.
/// A host with no advertised idp is unusable and every access to it yields
/// `None`. Refresh happens behind the map lock, so concurrent downloads
/// from one host perform a single exchange.
pub struct TokenCache {
    client: ClientWithMiddleware,
    home_hostname: String,
    home_token: String,
    providers: HashMap<String, OidcProvider>,
    hosts: tokio::sync::Mutex<HashMap<String, KnownHostEndpoint>>,
    token_expiry: Duration,
}

impl TokenCache {
    /// Fetches the WTS advertisement from the home commons up front. An
    /// unreachable WTS degrades to an empty provider map; only the home host
    /// is usable then.
    pub async fn new(
        client: ClientWithMiddleware,
        home_hostname: &str,
        home_token: &str,
        token_expiry: Duration,
    ) -> Self {
        let providers = match wts::external_oidc(&client, home_hostname).await {
            Ok(providers) => providers,
            Err(e) => {
                warn!(hostname = %home_hostname, error = %e, "WTS advertisement unavailable");
                HashMap::new()
            },
        };

        let mut hosts = HashMap::new();
        hosts.insert(
            host_key(home_hostname),
            KnownHostEndpoint {
                idp: None,
                access_token: Some(home_token.to_string()),
                last_refresh: None,
                use_wts: false,
            },
        );

        Self {
            client,
            home_hostname: home_hostname.to_string(),
            home_token: home_token.to_string(),
            providers,
            hosts: tokio::sync::Mutex::new(hosts),
            token_expiry,
        }
    }

    /// Return a usable token for `hostname`, exchanging or re-exchanging at
    /// the WTS if the cached one is missing or stale. `None` means the host
    /// cannot be authenticated against; the failure has already been logged.
    pub async fn get_or_refresh(&self, hostname: &str) -> Option<String> {
        let key = host_key(hostname);
        let mut hosts = self.hosts.lock().await;

        let endpoint = hosts.entry(key.clone()).or_insert_with(|| {
            let idp = self.providers.get(&key).map(|p| p.idp.clone());
            if idp.is_none() {
                error!(%hostname, "commons is not advertised by the WTS, cannot authenticate");
            }
            KnownHostEndpoint {
                idp,
                access_token: None,
                last_refresh: None,
                use_wts: true,
            }
        });

        if !endpoint.use_wts {
            return endpoint.access_token.clone();
        }

        let idp = endpoint.idp.clone()?;

        if let Some(token) = &endpoint.access_token {
            if !endpoint.expired(self.token_expiry) {
                return Some(token.clone());
            }
            info!(%hostname, "cached token expired, re-exchanging");
        }

        match wts::get_token(&self.client, &self.home_hostname, &idp, &self.home_token).await {
            Ok(token) => {
                endpoint.access_token = Some(token.clone());
                endpoint.last_refresh = Some(Instant::now());
                Some(token)
            },
            Err(e) => {
                error!(%hostname, %idp, error = %e, "token exchange failed");
                endpoint.access_token = None;
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn make_client() -> ClientWithMiddleware {
        reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build()
    }

    async fn mount_advertisement(server: &MockServer, providers: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/wts/external_oidc/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"providers": providers})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_home_host_uses_own_token() {
        let server = MockServer::start().await;
        mount_advertisement(&server, serde_json::json!([])).await;

        let cache = TokenCache::new(make_client(), &server.uri(), "home-token", Duration::from_secs(3600)).await;
        assert_eq!(cache.get_or_refresh(&server.uri()).await.as_deref(), Some("home-token"));
    }

    #[tokio::test]
    async fn test_unadvertised_host_yields_none() {
        let server = MockServer::start().await;
        mount_advertisement(&server, serde_json::json!([])).await;

        let cache = TokenCache::new(make_client(), &server.uri(), "home-token", Duration::from_secs(3600)).await;
        assert_eq!(cache.get_or_refresh("unknown.commons.org").await, None);
    }

    #[tokio::test]
    async fn test_fresh_token_is_reused() {
        let server = MockServer::start().await;
        mount_advertisement(
            &server,
            serde_json::json!([{"base_url": "https://external.commons.org", "idp": "external-keycloak"}]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/wts/token/"))
            .and(query_param("idp", "external-keycloak"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "exchanged"})))
            .expect(1)
            .mount(&server)
            .await;

        let cache = TokenCache::new(make_client(), &server.uri(), "home-token", Duration::from_secs(3600)).await;
        assert_eq!(cache.get_or_refresh("external.commons.org").await.as_deref(), Some("exchanged"));
        // second access within the expiry window hits the cache
        assert_eq!(cache.get_or_refresh("external.commons.org").await.as_deref(), Some("exchanged"));
    }

    #[tokio::test]
    async fn test_expired_token_is_reexchanged() {
        let server = MockServer::start().await;
        mount_advertisement(
            &server,
            serde_json::json!([{"base_url": "https://external.commons.org", "idp": "external-keycloak"}]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/wts/token/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "exchanged"})))
            .expect(2)
            .mount(&server)
            .await;

        // zero expiry window: every access is a refresh
        let cache = TokenCache::new(make_client(), &server.uri(), "home-token", Duration::ZERO).await;
        assert!(cache.get_or_refresh("external.commons.org").await.is_some());
        assert!(cache.get_or_refresh("external.commons.org").await.is_some());
    }

    #[tokio::test]
    async fn test_failed_exchange_yields_none_then_retries_lazily() {
        let server = MockServer::start().await;
        mount_advertisement(
            &server,
            serde_json::json!([{"base_url": "https://external.commons.org", "idp": "external-keycloak"}]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/wts/token/"))
            .respond_with(ResponseTemplate::new(403))
            .expect(2)
            .mount(&server)
            .await;

        let cache = TokenCache::new(make_client(), &server.uri(), "home-token", Duration::from_secs(3600)).await;
        assert_eq!(cache.get_or_refresh("external.commons.org").await, None);
        // the next access tries the exchange again
        assert_eq!(cache.get_or_refresh("external.commons.org").await, None);
    }
}
