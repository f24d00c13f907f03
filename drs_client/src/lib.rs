pub mod error;
pub mod http_client;
pub mod identifier;
pub mod objects;
pub mod retry_wrapper;
pub mod wts;

pub use error::{DrsClientError, Result};
pub use http_client::{build_http_client, Api, USER_AGENT};
pub use identifier::{
    clean_host_url, endpoint_url, host_key, normalize_host, parse_drs_identifier, DrsIdentifier, DrsResolver,
};
pub use objects::{parse_timestamp, AccessMethod, AccessUrl, ContentsEntry, DrsObjectInfo};
pub use retry_wrapper::{RetryWrapper, RetryableRequestError, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY};
pub use wts::OidcProvider;
