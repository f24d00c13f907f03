use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DownloadError {
    #[error("DRS client error: {0}")]
    Client(#[from] drs_client::DrsClientError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("cannot read manifest {path}: {source}")]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest: {0}")]
    ManifestFormat(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, DownloadError>;
