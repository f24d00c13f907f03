use std::collections::HashMap;

use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::http_client::Api;

/// Syntactic classification of a DRS object identifier.
///
/// `drs://hostname/id` carries its own hostname; a compact identifier
/// (`prefix/suffix`, e.g. `dg.4503/a277...`) needs a resolution step to find
/// the commons that hosts it. Anything else is unparseable and can never be
/// downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrsIdentifier {
    Hostname { hostname: String, object_id: String },
    Compact { prefix: String, suffix: String },
    Unknown,
}

fn is_prefix_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '~')
}

fn is_suffix_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '~' | '/')
}

fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Classify `candidate` without any network traffic.
pub fn parse_drs_identifier(candidate: &str) -> DrsIdentifier {
    let candidate = candidate.trim();

    if let Some(rest) = candidate.strip_prefix("drs://") {
        if let Some((host, object_id)) = rest.split_once('/') {
            if !object_id.is_empty() && is_valid_hostname(host) && object_id.chars().all(is_suffix_char) {
                return DrsIdentifier::Hostname {
                    hostname: host.to_string(),
                    object_id: object_id.to_string(),
                };
            }
        }
        return DrsIdentifier::Unknown;
    }

    if let Some((prefix, suffix)) = candidate.split_once('/') {
        if !prefix.is_empty()
            && !suffix.is_empty()
            && prefix.chars().all(is_prefix_char)
            && suffix.chars().all(is_suffix_char)
        {
            return DrsIdentifier::Compact {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            };
        }
    }

    DrsIdentifier::Unknown
}

/// Normalize a user-supplied hostname or commons URL: trims whitespace and
/// trailing slashes, keeps an explicit scheme if one is present.
pub fn normalize_host(s: &str) -> String {
    s.trim().trim_end_matches('/').to_string()
}

/// Scheme-less `host[:port]` form, used as the key for host-indexed maps so
/// that `https://data.commons.org/` and `data.commons.org` collapse together.
pub fn host_key(s: &str) -> String {
    let s = s.trim();
    let s = s.strip_prefix("https://").or_else(|| s.strip_prefix("http://")).unwrap_or(s);
    s.trim_end_matches('/').to_string()
}

/// Base URL for talking to a host. Bare hostnames get `https://`; an explicit
/// scheme is preserved.
pub fn endpoint_url(hostname: &str) -> String {
    let hostname = hostname.trim().trim_end_matches('/');
    if hostname.starts_with("http://") || hostname.starts_with("https://") {
        hostname.to_string()
    } else {
        format!("https://{hostname}")
    }
}

/// Strip scheme and well-known path suffixes from a host value returned by a
/// resolution service, leaving a plain hostname.
pub fn clean_host_url(s: &str) -> String {
    let s = s.trim();
    let s = s.strip_prefix("https://").or_else(|| s.strip_prefix("http://")).unwrap_or(s);
    let s = s.trim_end_matches('/');
    let s = s.strip_suffix("/ga4gh/drs/v1/objects").unwrap_or(s);
    let s = s.strip_suffix("/index").unwrap_or(s);
    s.trim_end_matches('/').to_string()
}

#[derive(Debug, Deserialize)]
struct MdsRecord {
    host: Option<String>,
}

/// Resolves compact identifier prefixes to hostnames through an aggregate
/// metadata service, caching successful lookups for the session lifetime.
pub struct DrsResolver {
    mds_url: String,
    cache: Mutex<HashMap<String, String>>,
}

impl DrsResolver {
    pub fn new(mds_url: impl Into<String>) -> Self {
        Self {
            mds_url: into_trimmed(mds_url),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolver for the aggregate MDS exposed by a commons.
    pub fn for_commons(hostname: &str) -> Self {
        Self::new(format!("{}/mds/aggregate/info", endpoint_url(hostname)))
    }

    /// Resolve an object identifier to `(hostname, native_object_id)`.
    ///
    /// Hostname-form identifiers resolve locally and the native id (the part
    /// after the hostname) replaces the original. Compact identifiers keep
    /// their full form as the native id and consult the prefix cache, then
    /// the metadata service. Unknown identifiers resolve to no hostname.
    pub async fn resolve(&self, client: &ClientWithMiddleware, object_id: &str) -> (Option<String>, String) {
        match parse_drs_identifier(object_id) {
            DrsIdentifier::Hostname { hostname, object_id } => (Some(hostname), object_id),
            DrsIdentifier::Compact { prefix, .. } => {
                let mut cache = self.cache.lock().await;
                if let Some(host) = cache.get(&prefix) {
                    return (Some(host.clone()), object_id.to_string());
                }
                match self.lookup_prefix(client, &prefix).await {
                    Some(host) => {
                        info!(%prefix, %host, "resolved DRS prefix");
                        cache.insert(prefix, host.clone());
                        (Some(host), object_id.to_string())
                    },
                    // failures are not cached; a later attempt may succeed
                    None => (None, object_id.to_string()),
                }
            },
            DrsIdentifier::Unknown => {
                warn!(%object_id, "unparseable DRS identifier");
                (None, object_id.to_string())
            },
        }
    }

    async fn lookup_prefix(&self, client: &ClientWithMiddleware, prefix: &str) -> Option<String> {
        let url = format!("{}/{prefix}", self.mds_url);
        let resp = client
            .get(&url)
            .with_extension(Api("mds::aggregate_info"))
            .send()
            .await
            .and_then(|r| r.error_for_status().map_err(reqwest_middleware::Error::from));
        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                warn!(%prefix, error = %e, "DRS prefix resolution request failed");
                return None;
            },
        };
        match resp.json::<MdsRecord>().await {
            Ok(MdsRecord { host: Some(host) }) => Some(clean_host_url(&host)),
            Ok(MdsRecord { host: None }) => {
                warn!(%prefix, "resolution record has no host");
                None
            },
            Err(e) => {
                warn!(%prefix, error = %e, "malformed resolution record");
                None
            },
        }
    }
}

fn into_trimmed(s: impl Into<String>) -> String {
    let s: String = s.into();
    s.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn test_parse_hostname_form() {
        assert_eq!(
            parse_drs_identifier("drs://nci-crdc.datacommons.io/dg.4DFC/e4f1d9b2"),
            DrsIdentifier::Hostname {
                hostname: "nci-crdc.datacommons.io".to_string(),
                object_id: "dg.4DFC/e4f1d9b2".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_compact_form() {
        assert_eq!(
            parse_drs_identifier("dg.4503/00e6cfa9-a183-42f6-bb44-b70347106bbe"),
            DrsIdentifier::Compact {
                prefix: "dg.4503".to_string(),
                suffix: "00e6cfa9-a183-42f6-bb44-b70347106bbe".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_unknown_forms() {
        assert_eq!(parse_drs_identifier("not an id"), DrsIdentifier::Unknown);
        assert_eq!(parse_drs_identifier(""), DrsIdentifier::Unknown);
        assert_eq!(parse_drs_identifier("drs://bad_host/x"), DrsIdentifier::Unknown);
        assert_eq!(parse_drs_identifier("drs://host.org/"), DrsIdentifier::Unknown);
        assert_eq!(parse_drs_identifier("no-slash-at-all"), DrsIdentifier::Unknown);
    }

    #[test]
    fn test_clean_host_url() {
        assert_eq!(clean_host_url("https://data.commons.org/index/"), "data.commons.org");
        assert_eq!(clean_host_url("http://data.commons.org/ga4gh/drs/v1/objects"), "data.commons.org");
        assert_eq!(clean_host_url("data.commons.org"), "data.commons.org");
    }

    #[test]
    fn test_host_key_collapses_scheme() {
        assert_eq!(host_key("https://data.commons.org/"), "data.commons.org");
        assert_eq!(host_key("data.commons.org"), "data.commons.org");
        assert_eq!(host_key("http://127.0.0.1:8080"), "127.0.0.1:8080");
    }

    fn make_client() -> ClientWithMiddleware {
        reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build()
    }

    #[tokio::test]
    async fn test_prefix_resolution_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mds/aggregate/info/dg.4503"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"host": "https://gen3.biodatacatalyst.nhlbi.nih.gov/index/"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = make_client();
        let resolver = DrsResolver::new(format!("{}/mds/aggregate/info", server.uri()));

        let (host, native) = resolver.resolve(&client, "dg.4503/00e6cfa9").await;
        assert_eq!(host.as_deref(), Some("gen3.biodatacatalyst.nhlbi.nih.gov"));
        assert_eq!(native, "dg.4503/00e6cfa9");

        // second call is served from the cache; the mock's expect(1) verifies
        let (host, _) = resolver.resolve(&client, "dg.4503/other-object").await;
        assert_eq!(host.as_deref(), Some("gen3.biodatacatalyst.nhlbi.nih.gov"));
    }

    #[tokio::test]
    async fn test_failed_resolution_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mds/aggregate/info/dg.9999"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let client = make_client();
        let resolver = DrsResolver::new(format!("{}/mds/aggregate/info", server.uri()));

        assert_eq!(resolver.resolve(&client, "dg.9999/x").await.0, None);
        assert_eq!(resolver.resolve(&client, "dg.9999/y").await.0, None);
    }

    #[tokio::test]
    async fn test_hostname_form_needs_no_network() {
        let client = make_client();
        // unroutable resolver URL; hostname-form ids must never touch it
        let resolver = DrsResolver::new("http://127.0.0.1:1/mds/aggregate/info");
        let (host, native) = resolver.resolve(&client, "drs://data.commons.org/guid-1").await;
        assert_eq!(host.as_deref(), Some("data.commons.org"));
        assert_eq!(native, "guid-1");
    }
}
