use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest_middleware::Error as MiddlewareError;
use reqwest_retry::{default_on_request_success, Retryable};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{error, info, warn};

use crate::error::{DrsClientError, Result};

pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(6);

/// Outcome classification for a single request attempt.
#[derive(Debug)]
pub enum RetryableRequestError {
    /// Cannot be retried; resolved immediately as an error.
    Fatal(DrsClientError),

    /// Transient failure (connect error, timeout, 5xx); eligible for another
    /// attempt until the budget runs out.
    Retryable(DrsClientError),
}

impl RetryableRequestError {
    fn into_inner(self) -> DrsClientError {
        match self {
            RetryableRequestError::Fatal(e) | RetryableRequestError::Retryable(e) => e,
        }
    }
}

/// Classify a transport-level failure (no response produced).
fn on_request_failure(error: &MiddlewareError) -> Retryable {
    match error {
        MiddlewareError::Middleware(_) => Retryable::Fatal,
        MiddlewareError::Reqwest(e) => {
            if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode() {
                Retryable::Transient
            } else {
                Retryable::Fatal
            }
        },
    }
}

/// Runs a request closure with bounded retries and exponential backoff.
///
/// Only transient outcomes (connect failures, timeouts, HTTP >= 500) consume
/// retry budget; anything else resolves on the first attempt. The request
/// closure is re-invoked from scratch for every attempt, so any response
/// processing that happened before a failure is discarded.
pub struct RetryWrapper {
    max_attempts: usize,
    base_delay: Duration,
    api_tag: &'static str,
}

impl RetryWrapper {
    pub fn new(api_tag: &'static str) -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            api_tag,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn process_error_response(&self, try_idx: usize, err: MiddlewareError) -> RetryableRequestError {
        match on_request_failure(&err) {
            Retryable::Transient => {
                warn!(api = self.api_tag, attempt = try_idx, error = %err, "transient request failure");
                RetryableRequestError::Retryable(err.into())
            },
            _ => {
                error!(api = self.api_tag, attempt = try_idx, error = %err, "request failed");
                RetryableRequestError::Fatal(err.into())
            },
        }
    }

    fn process_ok_response(
        &self,
        try_idx: usize,
        resp: reqwest::Response,
    ) -> std::result::Result<reqwest::Response, RetryableRequestError> {
        match default_on_request_success(&resp) {
            Some(Retryable::Transient) => {
                let status = resp.status();
                warn!(api = self.api_tag, attempt = try_idx, %status, "transient HTTP status");
                Err(RetryableRequestError::Retryable(Self::status_error(resp)))
            },
            Some(Retryable::Fatal) => {
                let status = resp.status();
                error!(api = self.api_tag, attempt = try_idx, %status, "HTTP error status");
                Err(RetryableRequestError::Fatal(Self::status_error(resp)))
            },
            None => {
                if try_idx > 0 {
                    info!(api = self.api_tag, attempt = try_idx, "request succeeded after retry");
                }
                Ok(resp)
            },
        }
    }

    fn status_error(resp: reqwest::Response) -> DrsClientError {
        let status = resp.status();
        match resp.error_for_status() {
            Err(e) => e.into(),
            // classified as an error but not a 4xx/5xx (e.g. unfollowed 3xx)
            Ok(_) => DrsClientError::UnexpectedHttpStatus(status),
        }
    }

    /// Run the request, then hand the successful response to `process_fn`.
    /// `process_fn` may itself report a retryable failure (e.g. the body
    /// stream broke off mid-transfer in a recoverable way).
    pub async fn run_and_process<T, ReqFn, ReqFut, ProcFn, ProcFut>(self, make_request: ReqFn, process_fn: ProcFn) -> Result<T>
    where
        ReqFn: Fn() -> ReqFut,
        ReqFut: Future<Output = std::result::Result<reqwest::Response, MiddlewareError>>,
        ProcFn: Fn(reqwest::Response) -> ProcFut,
        ProcFut: Future<Output = std::result::Result<T, RetryableRequestError>>,
    {
        let strategy = ExponentialBackoff::from_millis(self.base_delay.as_millis() as u64)
            .max_delay(RETRY_MAX_DELAY)
            .map(jitter)
            .take(self.max_attempts);

        let try_count = AtomicUsize::new(0);

        let result = RetryIf::spawn(
            strategy,
            || async {
                let try_idx = try_count.fetch_add(1, Ordering::Relaxed);
                let resp = match make_request().await {
                    Ok(resp) => self.process_ok_response(try_idx, resp)?,
                    Err(e) => return Err(self.process_error_response(try_idx, e)),
                };
                process_fn(resp).await
            },
            |err: &RetryableRequestError| matches!(err, RetryableRequestError::Retryable(_)),
        )
        .await;

        match result {
            Ok(v) => Ok(v),
            Err(e) => {
                let e = e.into_inner();
                error!(api = self.api_tag, error = %e, "request failed permanently");
                Err(e)
            },
        }
    }

    /// Run the request and deserialize the response body as JSON.
    pub async fn run_and_extract_json<T, ReqFn, ReqFut>(self, make_request: ReqFn) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        ReqFn: Fn() -> ReqFut,
        ReqFut: Future<Output = std::result::Result<reqwest::Response, MiddlewareError>>,
    {
        self.run_and_process(make_request, |resp| async move {
            resp.json::<T>().await.map_err(|e| RetryableRequestError::Retryable(e.into()))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    use super::*;

    fn make_client() -> reqwest_middleware::ClientWithMiddleware {
        reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build()
    }

    fn wrapper() -> RetryWrapper {
        RetryWrapper::new("test").with_base_delay(Duration::from_millis(5))
    }

    async fn run_json(server: &MockServer) -> Result<serde_json::Value> {
        let client = make_client();
        let url = format!("{}/data", server.uri());
        wrapper()
            .run_and_extract_json(move || {
                let client = client.clone();
                let url = url.clone();
                async move { client.get(&url).send().await }
            })
            .await
    }

    #[tokio::test]
    async fn test_immediate_success_no_retry() {
        let server = MockServer::start().await;
        let _mock = Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount_as_scoped(&server)
            .await;

        let v = run_json(&server).await.unwrap();
        assert_eq!(v["ok"], true);
    }

    #[tokio::test]
    async fn test_retries_then_success() {
        let server = MockServer::start().await;
        let counter = AtomicU32::new(0);

        let _mock = Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(move |_: &Request| {
                if counter.fetch_add(1, Ordering::Relaxed) < 2 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true}))
                }
            })
            .expect(3)
            .mount_as_scoped(&server)
            .await;

        let v = run_json(&server).await.unwrap();
        assert_eq!(v["ok"], true);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let server = MockServer::start().await;
        // 1 initial attempt + DEFAULT_MAX_RETRIES retries
        let _mock = Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1 + DEFAULT_MAX_RETRIES as u64)
            .mount_as_scoped(&server)
            .await;

        assert!(run_json(&server).await.is_err());
    }

    #[tokio::test]
    async fn test_client_error_is_fatal() {
        let server = MockServer::start().await;
        let _mock = Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount_as_scoped(&server)
            .await;

        assert!(run_json(&server).await.is_err());
    }
}
