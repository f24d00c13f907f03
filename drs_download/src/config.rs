use std::time::Duration;

use drs_client::retry_wrapper::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY};

/// Tunables for a download session. `Default` gives the production values;
/// `with_env_overrides` lets `GEN3_DRS_*` environment variables adjust them
/// without touching call sites.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// WTS tokens older than this are re-exchanged before use.
    pub token_expiry: Duration,

    /// Upper bound on concurrently streaming objects. 1 is sequential.
    pub max_concurrent_downloads: usize,

    /// Extra attempts for the content stream on transient failures.
    pub retry_max_attempts: usize,
    pub retry_base_delay: Duration,

    /// Skip entries whose destination file already exists with the expected
    /// size.
    pub skip_completed: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            token_expiry: Duration::from_secs(3600),
            max_concurrent_downloads: 8,
            retry_max_attempts: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            skip_completed: false,
        }
    }
}

impl DownloadConfig {
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(secs) = env_parse::<u64>("GEN3_DRS_TOKEN_EXPIRY_SECS") {
            self.token_expiry = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<usize>("GEN3_DRS_MAX_CONCURRENT_DOWNLOADS") {
            self.max_concurrent_downloads = n.max(1);
        }
        if let Some(n) = env_parse::<usize>("GEN3_DRS_RETRY_MAX_ATTEMPTS") {
            self.retry_max_attempts = n;
        }
        if let Some(ms) = env_parse::<u64>("GEN3_DRS_RETRY_BASE_DELAY_MS") {
            self.retry_base_delay = Duration::from_millis(ms);
        }
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = DownloadConfig::default();
        assert_eq!(cfg.token_expiry, Duration::from_secs(3600));
        assert_eq!(cfg.max_concurrent_downloads, 8);
        assert!(!cfg.skip_completed);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("GEN3_DRS_MAX_CONCURRENT_DOWNLOADS", "2");
        std::env::set_var("GEN3_DRS_TOKEN_EXPIRY_SECS", "60");
        let cfg = DownloadConfig::default().with_env_overrides();
        std::env::remove_var("GEN3_DRS_MAX_CONCURRENT_DOWNLOADS");
        std::env::remove_var("GEN3_DRS_TOKEN_EXPIRY_SECS");
        assert_eq!(cfg.max_concurrent_downloads, 2);
        assert_eq!(cfg.token_expiry, Duration::from_secs(60));
    }
}
