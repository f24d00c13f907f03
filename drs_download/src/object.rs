use std::fmt;

use chrono::{DateTime, Utc};
use drs_client::AccessMethod;
use serde::Serialize;

/// What the DRS server said an object is. Before description the kind is
/// `Unknown`; description resolves it to either a leaf object with its access
/// methods or a bundle with fully described children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrsObjectKind {
    Unknown,
    Object(Vec<AccessMethod>),
    Bundle(Vec<Downloadable>),
}

/// One resolvable DRS object, either straight from a manifest entry or as a
/// described bundle child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloadable {
    pub object_id: String,
    pub hostname: Option<String>,
    pub file_name: Option<String>,
    /// -1 when the server did not report a size.
    pub file_size: i64,
    pub created_time: Option<DateTime<Utc>>,
    pub updated_time: Option<DateTime<Utc>>,
    pub kind: DrsObjectKind,
}

impl Downloadable {
    pub fn unresolved(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            hostname: None,
            file_name: None,
            file_size: -1,
            created_time: None,
            updated_time: None,
            kind: DrsObjectKind::Unknown,
        }
    }

    pub fn is_described(&self) -> bool {
        !matches!(self.kind, DrsObjectKind::Unknown)
    }

    /// Multi-line tree listing; bundle children are indented under their
    /// parent.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        self.write_listing(&mut out, 0);
        out
    }

    fn write_listing(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("    ");
        }
        if depth > 0 {
            out.push_str("\u{2514}\u{2500}\u{2500} ");
        }
        out.push_str(&self.to_string());
        out.push('\n');
        if let DrsObjectKind::Bundle(children) = &self.kind {
            for child in children {
                child.write_listing(out, depth + 1);
            }
        }
    }
}

impl fmt::Display for Downloadable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.file_name.as_deref().unwrap_or(&self.object_id);
        write!(f, "{name} ")?;
        if self.file_size >= 0 {
            write!(f, "{} ", format_size(self.file_size as u64))?;
        } else {
            write!(f, "size unknown ")?;
        }
        if let Some(host) = &self.hostname {
            write!(f, "{host} ")?;
        }
        if let Some(created) = &self.created_time {
            write!(f, "{}", created.format("%Y-%m-%d %H:%M:%S"))?;
        }
        Ok(())
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Pending,
    Downloaded,
    Error,
}

/// Terminal record for one object in a download batch.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadStatus {
    pub file_name: Option<String>,
    pub state: DownloadState,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl DownloadStatus {
    pub fn new(file_name: Option<String>) -> Self {
        Self {
            file_name,
            state: DownloadState::Pending,
            start_time: None,
            end_time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_indents_bundle_children() {
        let child = Downloadable {
            file_name: Some("inner.txt".to_string()),
            file_size: 4,
            ..Downloadable::unresolved("child-1")
        };
        let bundle = Downloadable {
            file_name: Some("bundle-a".to_string()),
            kind: DrsObjectKind::Bundle(vec![child]),
            ..Downloadable::unresolved("bundle-1")
        };

        let listing = bundle.listing();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("bundle-a"));
        assert!(lines[1].contains("\u{2514}\u{2500}\u{2500} inner.txt"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KiB");
    }
}
