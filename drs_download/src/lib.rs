pub mod config;
pub mod errors;
pub mod manifest;
pub mod object;
pub mod progress;
pub mod session;
pub mod token_cache;

pub use config::DownloadConfig;
pub use errors::{DownloadError, Result};
pub use manifest::{load_manifest, ManifestEntry};
pub use object::{DownloadState, DownloadStatus, Downloadable, DrsObjectKind};
pub use progress::{NoOpProgress, ProgressCallback, TransferProgress};
pub use session::{entries_for_ids, DownloadSession};
pub use token_cache::TokenCache;
