use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use chrono::Utc;
use drs_client::objects::{self, parse_timestamp};
use drs_client::retry_wrapper::{RetryWrapper, RetryableRequestError};
use drs_client::{build_http_client, Api, DrsClientError, DrsResolver, normalize_host};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use reqwest_middleware::ClientWithMiddleware;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, instrument, warn};

use crate::config::DownloadConfig;
use crate::errors::Result;
use crate::manifest::ManifestEntry;
use crate::object::{DownloadState, DownloadStatus, Downloadable, DrsObjectKind};
use crate::progress::{ProgressCallback, TransferProgress};
use crate::token_cache::TokenCache;

/// One authenticated download session against a home commons.
///
/// Holds the shared HTTP client, the per-session token cache and the
/// compact-prefix resolution cache; nothing outlives the session.
pub struct DownloadSession {
    home_hostname: String,
    client: ClientWithMiddleware,
    tokens: TokenCache,
    resolver: DrsResolver,
    config: DownloadConfig,
}

impl DownloadSession {
    pub async fn new(hostname: &str, access_token: &str, config: DownloadConfig) -> Result<Self> {
        let client = build_http_client()?;
        let home_hostname = normalize_host(hostname);
        let tokens = TokenCache::new(client.clone(), &home_hostname, access_token, config.token_expiry).await;
        let resolver = DrsResolver::for_commons(&home_hostname);
        Ok(Self {
            home_hostname,
            client,
            tokens,
            resolver,
            config,
        })
    }

    /// Point compact-identifier resolution at a different metadata service.
    pub fn with_mds_url(mut self, mds_url: &str) -> Self {
        self.resolver = DrsResolver::new(mds_url);
        self
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Resolve each manifest entry to a host and describe it against the DRS
    /// server. Entries that cannot be resolved or described come back with
    /// their kind still `Unknown`; they are reported per-object at download
    /// time rather than failing the batch.
    pub async fn resolve_objects(&self, entries: &[ManifestEntry]) -> Vec<Downloadable> {
        let mut resolved = Vec::with_capacity(entries.len());
        for entry in entries {
            resolved.push(self.resolve_entry(entry).await);
        }
        resolved
    }

    #[instrument(skip_all, fields(object_id = %entry.object_id))]
    async fn resolve_entry(&self, entry: &ManifestEntry) -> Downloadable {
        let mut object_id = entry.object_id.clone();
        let hostname = match &entry.commons_url {
            Some(commons) => Some(normalize_host(commons)),
            None => {
                let (hostname, native_id) = self.resolver.resolve(&self.client, &object_id).await;
                object_id = native_id;
                hostname
            },
        };

        let Some(hostname) = hostname else {
            return Downloadable {
                file_name: entry.file_name.clone(),
                file_size: entry.file_size.unwrap_or(-1),
                ..Downloadable::unresolved(object_id)
            };
        };

        match self.describe(&hostname, &object_id).await {
            Some(mut described) => {
                if described.file_name.is_none() {
                    described.file_name = entry.file_name.clone();
                }
                described
            },
            None => Downloadable {
                hostname: Some(hostname),
                file_name: entry.file_name.clone(),
                file_size: entry.file_size.unwrap_or(-1),
                ..Downloadable::unresolved(object_id)
            },
        }
    }

    /// Fetch metadata for one object, recursing into bundle contents on the
    /// same host. A child that fails to describe is dropped with a warning;
    /// the rest of the bundle is kept.
    pub fn describe<'a>(&'a self, hostname: &'a str, object_id: &'a str) -> BoxFuture<'a, Option<Downloadable>> {
        Box::pin(async move {
            let info = match objects::get_object_info(&self.client, hostname, object_id).await {
                Ok(info) => info,
                Err(e) => {
                    error!(%hostname, %object_id, error = %e, "could not describe DRS object");
                    return None;
                },
            };

            let kind = if info.is_bundle() {
                let mut children = Vec::new();
                for item in &info.contents {
                    let Some(child_id) = item.id.as_deref() else {
                        warn!(%object_id, "bundle content entry without an id, dropping");
                        continue;
                    };
                    match self.describe(hostname, child_id).await {
                        Some(child) => children.push(child),
                        None => warn!(%object_id, child = %child_id, "dropping undescribable bundle child"),
                    }
                }
                DrsObjectKind::Bundle(children)
            } else {
                DrsObjectKind::Object(info.access_methods.clone())
            };

            Some(Downloadable {
                object_id: object_id.to_string(),
                hostname: Some(hostname.to_string()),
                file_name: info.file_name(),
                file_size: info.size.unwrap_or(-1),
                created_time: parse_timestamp(info.created_time.as_deref()),
                updated_time: parse_timestamp(info.updated_time.as_deref()),
                kind,
            })
        })
    }

    /// Download every entry into `dest`, bounded by the configured
    /// concurrency. The returned map holds a terminal status for every input
    /// entry (and for every bundle child), keyed by object id. Per-object
    /// failures are recorded, not propagated; only a batch-meaningless
    /// condition (the destination directory cannot be created) errors out.
    pub async fn download(
        &self,
        entries: &[Downloadable],
        dest: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<HashMap<String, DownloadStatus>> {
        tokio::fs::create_dir_all(dest).await?;
        Ok(self.download_entries(entries, dest, progress).await)
    }

    fn download_entries<'a>(
        &'a self,
        entries: &'a [Downloadable],
        dest: &'a Path,
        progress: Option<&'a dyn ProgressCallback>,
    ) -> BoxFuture<'a, HashMap<String, DownloadStatus>> {
        Box::pin(async move {
            let mut statuses: HashMap<String, DownloadStatus> = entries
                .iter()
                .map(|e| (e.object_id.clone(), DownloadStatus::new(e.file_name.clone())))
                .collect();

            let concurrency = self.config.max_concurrent_downloads.max(1);
            let futures: Vec<_> = entries
                .iter()
                .map(|entry| async move {
                    match &entry.kind {
                        DrsObjectKind::Bundle(children) => self.download_bundle(entry, children, dest, progress).await,
                        _ => vec![(entry.object_id.clone(), self.download_one(entry, dest, progress).await)],
                    }
                })
                .collect();
            let results: Vec<Vec<(String, DownloadStatus)>> = stream::iter(futures)
                .buffer_unordered(concurrency)
            .collect()
            .await;

            for pairs in results {
                for (object_id, status) in pairs {
                    statuses.insert(object_id, status);
                }
            }
            statuses
        })
    }

    /// Bundle children land in a subdirectory named after the bundle. The
    /// bundle's own status is `Downloaded` only if every child downloaded.
    async fn download_bundle(
        &self,
        entry: &Downloadable,
        children: &[Downloadable],
        dest: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> Vec<(String, DownloadStatus)> {
        let dir_name = entry.file_name.clone().unwrap_or_else(|| sanitize_file_name(&entry.object_id));
        let child_dir = dest.join(dir_name);

        let mut own = DownloadStatus::new(entry.file_name.clone());
        own.start_time = Some(Utc::now());

        let child_statuses = self.download_entries(children, &child_dir, progress).await;
        let all_ok = child_statuses.values().all(|s| s.state == DownloadState::Downloaded);

        own.state = if all_ok { DownloadState::Downloaded } else { DownloadState::Error };
        own.end_time = Some(Utc::now());

        let mut out: Vec<(String, DownloadStatus)> = child_statuses.into_iter().collect();
        out.push((entry.object_id.clone(), own));
        out
    }

    #[instrument(skip_all, fields(object_id = %entry.object_id))]
    async fn download_one(
        &self,
        entry: &Downloadable,
        dest: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> DownloadStatus {
        let mut status = DownloadStatus::new(entry.file_name.clone());
        status.state = DownloadState::Error;

        let Some(hostname) = entry.hostname.as_deref() else {
            error!(object_id = %entry.object_id, "hostname could not be resolved, skipping");
            return status;
        };

        let Some(token) = self.tokens.get_or_refresh(hostname).await else {
            // cause already logged by the token cache
            return status;
        };

        let methods = match &entry.kind {
            DrsObjectKind::Object(methods) => methods,
            _ => {
                error!(object_id = %entry.object_id, %hostname, "object was never described, skipping");
                return status;
            },
        };
        let Some(access_id) = methods.first().and_then(|m| m.access_id.as_deref()) else {
            error!(object_id = %entry.object_id, %hostname, "no usable access method");
            return status;
        };

        let file_name = entry.file_name.clone().unwrap_or_else(|| sanitize_file_name(&entry.object_id));
        let path = dest.join(&file_name);

        status.start_time = Some(Utc::now());

        if self.config.skip_completed && entry.file_size >= 0 {
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                if meta.is_file() && meta.len() == entry.file_size as u64 {
                    info!(object_id = %entry.object_id, file = %file_name, "already complete, skipping");
                    status.state = DownloadState::Downloaded;
                    status.end_time = Some(Utc::now());
                    return status;
                }
            }
        }

        let url = match objects::get_download_url(&self.client, hostname, &entry.object_id, access_id, &token).await {
            Ok(url) => url,
            Err(e) => {
                error!(object_id = %entry.object_id, %hostname, error = %e, "could not get download URL");
                status.end_time = Some(Utc::now());
                return status;
            },
        };

        match self.stream_to_file(&url, &path, &file_name, progress).await {
            Ok(written) => {
                info!(object_id = %entry.object_id, file = %file_name, bytes = written, "downloaded");
                status.state = DownloadState::Downloaded;
            },
            Err(e) => {
                error!(object_id = %entry.object_id, file = %file_name, error = %e, "download failed");
            },
        }
        status.end_time = Some(Utc::now());
        status
    }

    /// Stream a presigned URL to disk. Transient HTTP failures retry with
    /// backoff; a short body is an integrity failure, the partial file is
    /// removed and the error is final.
    async fn stream_to_file(
        &self,
        url: &str,
        path: &Path,
        file_name: &str,
        progress: Option<&dyn ProgressCallback>,
    ) -> std::result::Result<u64, DrsClientError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let client = self.client.clone();
        let url = url.to_string();
        let path = path.to_path_buf();

        RetryWrapper::new("drs::stream")
            .with_max_attempts(self.config.retry_max_attempts)
            .with_base_delay(self.config.retry_base_delay)
            .run_and_process(
                move || {
                    let client = client.clone();
                    let url = url.clone();
                    async move { client.get(&url).with_extension(Api("drs::stream")).send().await }
                },
                move |resp| {
                    let path = path.clone();
                    async move {
                        let declared = resp.content_length();
                        let written = write_body(resp, &path, file_name, progress)
                            .await
                            .map_err(RetryableRequestError::Fatal)?;
                        verify_content_length(&path, written, declared).map_err(RetryableRequestError::Fatal)?;
                        Ok(written)
                    }
                },
            )
            .await
    }

    /// Authorization listing for the caller across every distinct host in
    /// `entries` plus the home commons. Hosts without a usable token are
    /// left out (the token cache has already logged why).
    pub async fn user_access(
        &self,
        entries: &[Downloadable],
    ) -> HashMap<String, serde_json::Map<String, serde_json::Value>> {
        let mut hosts: BTreeSet<String> = entries.iter().filter_map(|e| e.hostname.clone()).collect();
        hosts.insert(self.home_hostname.clone());

        let mut access = HashMap::new();
        for hostname in hosts {
            let Some(token) = self.tokens.get_or_refresh(&hostname).await else {
                continue;
            };
            match objects::get_user_access(&self.client, &hostname, &token).await {
                Ok(authz) => {
                    access.insert(hostname, authz);
                },
                Err(e) => error!(%hostname, error = %e, "could not fetch user access"),
            }
        }
        access
    }
}

async fn write_body(
    resp: reqwest::Response,
    path: &Path,
    file_name: &str,
    progress: Option<&dyn ProgressCallback>,
) -> std::result::Result<u64, DrsClientError> {
    let total_bytes = resp.content_length();
    let mut file = tokio::fs::File::create(path).await?;
    let mut body = resp.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                remove_partial(path).await;
                return Err(e.into());
            },
        };
        if let Err(e) = file.write_all(&chunk).await {
            drop(file);
            remove_partial(path).await;
            return Err(e.into());
        }
        written += chunk.len() as u64;
        if let Some(cb) = progress {
            cb.on_progress(&TransferProgress {
                file_name,
                bytes_transferred: written,
                total_bytes,
            });
        }
    }
    if let Err(e) = file.flush().await {
        drop(file);
        remove_partial(path).await;
        return Err(e.into());
    }
    Ok(written)
}

/// Compare bytes written against the declared content length; on mismatch
/// the partial file is removed and the transfer is an integrity failure.
/// An absent or zero declaration cannot be checked and passes.
fn verify_content_length(path: &Path, written: u64, declared: Option<u64>) -> std::result::Result<(), DrsClientError> {
    let Some(expected) = declared.filter(|&n| n > 0) else {
        return Ok(());
    };
    if written == expected {
        return Ok(());
    }
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not remove partial file");
    }
    Err(DrsClientError::ContentLengthMismatch {
        expected,
        actual: written,
    })
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "could not remove partial file");
    }
}

fn sanitize_file_name(object_id: &str) -> String {
    object_id.replace(['/', ':'], "_")
}

/// Manifest entries for ad-hoc object ids given on a command line.
pub fn entries_for_ids<I, S>(object_ids: I) -> Vec<ManifestEntry>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    object_ids.into_iter().map(|id| ManifestEntry::new(id)).collect()
}
