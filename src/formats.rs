mod epub;

pub use epub::{EpubMetadata, extract_metadata};

use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

/// MIME type of EPUB acquisition links.
pub const EPUB_MIME: &str = "application/epub+zip";

/// Whether a file name designates an EPUB candidate.
pub fn is_epub_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".epub")
}

/// An opened book plus the filesystem facts extraction needs.
pub struct BookFile<R: Read + Seek> {
    /// Path the reader was opened from, used in error reports.
    pub path: PathBuf,
    /// Byte source of the container.
    pub reader: R,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

impl BookFile<File> {
    /// Open a file from disk.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Self {
            path: path.to_path_buf(),
            reader: file,
            size: metadata.len(),
            modified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epub_name_is_case_insensitive() {
        assert!(is_epub_name("book.epub"));
        assert!(is_epub_name("BOOK.EPUB"));
        assert!(!is_epub_name("book.epub.txt"));
        assert!(!is_epub_name("epub"));
    }
}
