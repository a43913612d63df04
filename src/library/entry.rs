//! Catalog entry model.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// One downloadable book in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Stable identifier, `urn:file:<escaped relative path>`.
    pub id: String,

    /// Book title, falling back to the file stem.
    pub title: String,

    /// Author (may be empty).
    pub author: String,

    /// Subject (may be empty).
    pub subject: String,

    /// Description (may be empty).
    pub description: String,

    /// Publication date as declared, or the file mtime.
    pub publication_date: String,

    /// File modification time.
    pub updated_at: DateTime<Utc>,

    /// Relative path with each segment percent-escaped.
    pub acquisition_path: String,
}

impl CatalogEntry {
    /// Entry id for an escaped relative path.
    pub fn id_for(acquisition_path: &str) -> String {
        format!("urn:file:{}", acquisition_path)
    }

    /// Download link, relative to the server root.
    pub fn href(&self) -> String {
        format!("/files/{}", self.acquisition_path)
    }
}

/// Percent-escape each segment of a relative path, keeping `/` separators.
pub fn escape_relative_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| urlencoding::encode(&c.as_os_str().to_string_lossy()).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// A candidate file left out of the catalog.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    /// Offending file.
    pub path: PathBuf,
    /// Why it was skipped.
    pub reason: String,
}

/// Result of one directory scan.
#[derive(Debug, Clone)]
pub struct Catalog {
    /// Base name of the scanned root.
    pub title: String,
    /// Entries in visit order.
    pub entries: Vec<CatalogEntry>,
    /// Candidates whose metadata could not be read.
    pub skipped: Vec<SkippedFile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_keeps_separators() {
        assert_eq!(
            escape_relative_path(Path::new("sub/My Book.epub")),
            "sub/My%20Book.epub"
        );
        assert_eq!(
            escape_relative_path(Path::new("a&b/c#d.epub")),
            "a%26b/c%23d.epub"
        );
    }

    #[test]
    fn test_href_and_id() {
        let path = escape_relative_path(Path::new("sub/My Book.epub"));
        assert_eq!(CatalogEntry::id_for(&path), "urn:file:sub/My%20Book.epub");
    }
}
