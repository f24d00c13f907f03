use chrono::{DateTime, NaiveDateTime, Utc};
use http::header::AUTHORIZATION;
use http::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::{DrsClientError, Result};
use crate::http_client::Api;
use crate::identifier::endpoint_url;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccessMethod {
    #[serde(default)]
    pub access_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub method_type: Option<String>,
    #[serde(default)]
    pub access_url: Option<AccessUrl>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContentsEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// DRS object metadata as returned by `GET /ga4gh/drs/v1/objects/{id}`.
/// Every field is lenient; servers in the wild omit most of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DrsObjectInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub updated_time: Option<String>,
    #[serde(default)]
    pub form: Option<String>,
    #[serde(default)]
    pub contents: Vec<ContentsEntry>,
    #[serde(default)]
    pub access_methods: Vec<AccessMethod>,
}

impl DrsObjectInfo {
    /// An explicit `form` field wins; only in its absence does a non-empty
    /// `contents` list mark the object as a bundle.
    pub fn is_bundle(&self) -> bool {
        match self.form.as_deref() {
            Some(form) => form == "bundle",
            None => !self.contents.is_empty(),
        }
    }

    /// Prefer the advertised name; fall back to the last path segment of the
    /// first access method's URL.
    pub fn file_name(&self) -> Option<String> {
        if let Some(name) = &self.name {
            if !name.is_empty() {
                return Some(name.clone());
            }
        }
        let access_url = self.access_methods.first()?.access_url.as_ref()?;
        let parsed = url::Url::parse(&access_url.url).ok()?;
        let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
        Some(segment.to_string())
    }
}

/// Parse DRS timestamps; RFC 3339 first, then the naive fraction-of-a-second
/// form some servers emit without a zone suffix.
pub fn parse_timestamp(ts: Option<&str>) -> Option<DateTime<Utc>> {
    let ts = ts?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Fetch object metadata. A 404 maps to `ObjectNotFound` so callers can tell
/// a missing object apart from a broken server.
pub async fn get_object_info(client: &ClientWithMiddleware, hostname: &str, object_id: &str) -> Result<DrsObjectInfo> {
    let url = format!("{}/ga4gh/drs/v1/objects/{object_id}", endpoint_url(hostname));
    let resp = client.get(&url).with_extension(Api("drs::object_info")).send().await?;

    if resp.status() == StatusCode::NOT_FOUND {
        error!(%hostname, %object_id, "DRS object not found");
        return Err(DrsClientError::ObjectNotFound {
            hostname: hostname.to_string(),
            object_id: object_id.to_string(),
        });
    }
    let resp = resp.error_for_status()?;
    Ok(resp.json().await?)
}

#[derive(Debug, Deserialize)]
struct AccessUrlResponse {
    #[serde(default)]
    url: Option<String>,
}

/// Fetch the presigned download URL for one access method of an object.
pub async fn get_download_url(
    client: &ClientWithMiddleware,
    hostname: &str,
    object_id: &str,
    access_id: &str,
    token: &str,
) -> Result<String> {
    let url = format!("{}/ga4gh/drs/v1/objects/{object_id}/access/{access_id}", endpoint_url(hostname));
    let resp = client
        .get(&url)
        .header(AUTHORIZATION, format!("bearer {token}"))
        .with_extension(Api("drs::access_url"))
        .send()
        .await?
        .error_for_status()?;
    let data: AccessUrlResponse = resp.json().await?;
    data.url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| DrsClientError::MissingDownloadUrl(object_id.to_string()))
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    authz: serde_json::Map<String, serde_json::Value>,
}

/// Fetch the caller's authorization map (`authz`) from a commons.
pub async fn get_user_access(
    client: &ClientWithMiddleware,
    hostname: &str,
    token: &str,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let url = format!("{}/user/user", endpoint_url(hostname));
    let resp = client
        .get(&url)
        .header(AUTHORIZATION, format!("bearer {token}"))
        .with_extension(Api("user::info"))
        .send()
        .await?
        .error_for_status()?;
    let data: UserInfo = resp.json().await?;
    Ok(data.authz)
}
