use std::time::Duration;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};

use crate::error::Result;

pub const USER_AGENT: &str = concat!("drs-pull/", env!("CARGO_PKG_VERSION"));

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Tag requests with an api name for logging; readable on retry/failure paths
/// through the request extensions.
#[derive(Debug, Clone, Copy)]
pub struct Api(pub &'static str);

/// Build the shared HTTP client used for all DRS, WTS and metadata-service
/// calls. Retry policy is not baked into the middleware chain; the one call
/// site that retries (content streaming) wraps itself in a `RetryWrapper`.
pub fn build_http_client() -> Result<ClientWithMiddleware> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;
    Ok(ClientBuilder::new(client).build())
}
