/// Byte-level progress for one file transfer.
#[derive(Debug, Clone)]
pub struct TransferProgress<'a> {
    pub file_name: &'a str,
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
}

/// Receives progress updates during downloads. Implementations must be cheap;
/// this is called once per received chunk.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, progress: &TransferProgress<'_>);
}

/// Discards all updates.
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _progress: &TransferProgress<'_>) {}
}
