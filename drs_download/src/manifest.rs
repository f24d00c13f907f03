use std::path::Path;

use serde::Deserialize;

use crate::errors::{DownloadError, Result};

/// One row of a download manifest. Only the object id is required; the other
/// fields are hints that get replaced by live DRS metadata during resolution.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub object_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
    #[serde(default)]
    pub md5sum: Option<String>,
    #[serde(default)]
    pub commons_url: Option<String>,
}

impl ManifestEntry {
    pub fn new(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            file_name: None,
            file_size: None,
            md5sum: None,
            commons_url: None,
        }
    }
}

// id column aliases in workspace-exported CSV manifests, in priority order
const ID_COLUMNS: [&str; 4] = ["object_id", "GUID", "guid", "id"];

/// Load a manifest file; `.csv` and `.tsv` extensions get the delimited
/// reader, everything else is treated as a JSON array.
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => load_delimited(path, b','),
        Some("tsv") => load_delimited(path, b'\t'),
        _ => load_json(path),
    }
}

fn load_json(path: &Path) -> Result<Vec<ManifestEntry>> {
    let raw = std::fs::read_to_string(path).map_err(|source| DownloadError::ManifestIo {
        path: path.to_path_buf(),
        source,
    })?;
    let entries: Vec<ManifestEntry> = serde_json::from_str(&raw)
        .map_err(|e| DownloadError::ManifestFormat(format!("{}: {e}", path.display())))?;
    Ok(entries)
}

fn load_delimited(path: &Path, delimiter: u8) -> Result<Vec<ManifestEntry>> {
    let file = std::fs::File::open(path).map_err(|source| DownloadError::ManifestIo {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new().delimiter(delimiter).from_reader(file);

    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);

    let id_col = ID_COLUMNS
        .iter()
        .find_map(|name| column(name))
        .ok_or_else(|| DownloadError::ManifestFormat(format!("{}: no object id column", path.display())))?;
    let name_col = column("file_name").or_else(|| column("filename"));
    let size_col = column("file_size").or_else(|| column("size"));
    let md5_col = column("md5sum").or_else(|| column("md5"));
    let commons_col = column("commons_url");

    let field = |record: &csv::StringRecord, col: Option<usize>| {
        col.and_then(|i| record.get(i)).map(str::trim).filter(|v| !v.is_empty()).map(String::from)
    };

    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(object_id) = field(&record, Some(id_col)) else {
            continue;
        };
        entries.push(ManifestEntry {
            object_id,
            file_name: field(&record, name_col),
            file_size: field(&record, size_col).and_then(|v| v.parse().ok()),
            md5sum: field(&record, md5_col),
            commons_url: field(&record, commons_col),
        });
    }
    Ok(entries)
}
