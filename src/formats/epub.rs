//! EPUB metadata extraction.

use crate::auth::ensure_active;
use crate::error::{AppError, Result};
use crate::formats::BookFile;
use chrono::SecondsFormat;
use roxmltree::{Document, Node, ParsingOptions};
use std::io::{Read, Seek};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Descriptive fields of an EPUB package. Absent fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpubMetadata {
    /// First `dc:creator`.
    pub author: String,
    /// First `dc:description`.
    pub description: String,
    /// First `dc:subject`.
    pub subject: String,
    /// First `dc:title`.
    pub title: String,
    /// Publication date; the file's mtime (RFC 3339) when none is declared.
    pub publication_date: String,
}

/// Read the package metadata of one EPUB container.
///
/// Every failure is reported as [`AppError::Extraction`] naming the file.
pub fn extract_metadata<R: Read + Seek>(
    book: BookFile<R>,
    cancel: &CancellationToken,
) -> Result<EpubMetadata> {
    let BookFile {
        path,
        reader,
        size,
        modified,
    } = book;

    if size == 0 {
        return Err(AppError::extraction(path, "empty file"));
    }

    ensure_active(cancel)?;
    let mut archive =
        ZipArchive::new(reader).map_err(|e| AppError::extraction(&path, e))?;

    ensure_active(cancel)?;
    let container = read_entry(&mut archive, CONTAINER_PATH, &path)?;
    let opf_path = find_opf_path(&container, &path)?;

    ensure_active(cancel)?;
    let opf = read_entry(&mut archive, &opf_path, &path)?;

    let mut metadata = parse_opf(&opf, &path)?;
    if metadata.publication_date.is_empty() {
        metadata.publication_date = modified.to_rfc3339_opts(SecondsFormat::Secs, true);
    }

    Ok(metadata)
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    path: &Path,
) -> Result<String> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| AppError::extraction(path, format!("{}: {}", name, e)))?;

    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| AppError::extraction(path, format!("{}: {}", name, e)))?;
    Ok(content)
}

fn parse_xml<'a>(content: &'a str, name: &str, path: &Path) -> Result<Document<'a>> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Document::parse_with_options(content, options)
        .map_err(|e| AppError::extraction(path, format!("{}: {}", name, e)))
}

/// Full path of the first rootfile declared by `container.xml`.
fn find_opf_path(container: &str, path: &Path) -> Result<String> {
    let doc = parse_xml(container, CONTAINER_PATH, path)?;

    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "rootfile")
        .and_then(|n| n.attribute("full-path"))
        .filter(|p| !p.is_empty())
        .map(String::from)
        .ok_or_else(|| AppError::extraction(path, "no rootfile in container.xml"))
}

fn parse_opf(content: &str, path: &Path) -> Result<EpubMetadata> {
    let doc = parse_xml(content, "package document", path)?;
    let mut metadata = EpubMetadata::default();

    let Some(section) = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "metadata")
    else {
        return Ok(metadata);
    };

    let mut first_date = String::new();
    let mut publication_date = String::new();

    for node in section.descendants().filter(Node::is_element) {
        let Some(text) = node.text().map(str::trim).filter(|t| !t.is_empty()) else {
            continue;
        };

        match node.tag_name().name() {
            "title" => fill(&mut metadata.title, text),
            "creator" => fill(&mut metadata.author, text),
            "description" => fill(&mut metadata.description, text),
            "subject" => fill(&mut metadata.subject, text),
            "date" => {
                fill(&mut first_date, text);
                // `opf:event` in EPUB 2, so match the local name only.
                if node
                    .attributes()
                    .any(|a| a.name() == "event" && a.value() == "publication")
                {
                    fill(&mut publication_date, text);
                }
            }
            _ => {}
        }
    }

    metadata.publication_date = if publication_date.is_empty() {
        first_date
    } else {
        publication_date
    };

    Ok(metadata)
}

fn fill(slot: &mut String, value: &str) {
    if slot.is_empty() {
        *slot = value.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::{Cursor, Write};
    use std::path::PathBuf;
    use zip::write::SimpleFileOptions;

    const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn book(bytes: Vec<u8>) -> BookFile<Cursor<Vec<u8>>> {
        BookFile {
            path: PathBuf::from("shelf/test.epub"),
            size: bytes.len() as u64,
            reader: Cursor::new(bytes),
            modified: Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap(),
        }
    }

    fn opf(metadata: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" xmlns:dc="http://purl.org/dc/elements/1.1/"
         xmlns:opf="http://www.idpf.org/2007/opf" version="2.0">
  <metadata>{}</metadata>
</package>"#,
            metadata
        )
    }

    #[test]
    fn test_extracts_first_values() {
        let opf = opf(r#"
            <dc:title>  Dune  </dc:title>
            <dc:title>Ignored</dc:title>
            <dc:creator>Frank Herbert</dc:creator>
            <dc:creator>Second</dc:creator>
            <dc:subject>Science Fiction</dc:subject>
            <dc:description>Desert planet.</dc:description>
            <dc:date>1965-08-01</dc:date>"#);
        let bytes = archive(&[(CONTAINER_PATH, CONTAINER), ("OEBPS/content.opf", &opf)]);

        let metadata = extract_metadata(book(bytes), &CancellationToken::new()).unwrap();
        assert_eq!(metadata.title, "Dune");
        assert_eq!(metadata.author, "Frank Herbert");
        assert_eq!(metadata.subject, "Science Fiction");
        assert_eq!(metadata.description, "Desert planet.");
        assert_eq!(metadata.publication_date, "1965-08-01");
    }

    #[test]
    fn test_prefers_publication_event() {
        let opf = opf(r#"
            <dc:date opf:event="modification">2010-01-01</dc:date>
            <dc:date opf:event="publication">1999-12-31</dc:date>"#);
        let bytes = archive(&[(CONTAINER_PATH, CONTAINER), ("OEBPS/content.opf", &opf)]);

        let metadata = extract_metadata(book(bytes), &CancellationToken::new()).unwrap();
        assert_eq!(metadata.publication_date, "1999-12-31");
    }

    #[test]
    fn test_date_defaults_to_mtime() {
        let opf = opf("<dc:title>Untitled</dc:title>");
        let bytes = archive(&[(CONTAINER_PATH, CONTAINER), ("OEBPS/content.opf", &opf)]);

        let metadata = extract_metadata(book(bytes), &CancellationToken::new()).unwrap();
        assert_eq!(metadata.publication_date, "2021-03-04T05:06:07Z");
        assert!(metadata.author.is_empty());
    }

    #[test]
    fn test_failures_name_the_file() {
        let cancel = CancellationToken::new();
        let no_rootfile = r#"<container><rootfiles/></container>"#;
        let cases = vec![
            Vec::new(),
            b"not a zip".to_vec(),
            archive(&[("mimetype", "application/epub+zip")]),
            archive(&[(CONTAINER_PATH, no_rootfile)]),
            archive(&[(CONTAINER_PATH, CONTAINER)]),
            archive(&[(CONTAINER_PATH, CONTAINER), ("OEBPS/content.opf", "<package>")]),
        ];

        for bytes in cases {
            match extract_metadata(book(bytes), &cancel) {
                Err(AppError::Extraction { path, .. }) => {
                    assert_eq!(path, PathBuf::from("shelf/test.epub"))
                }
                other => panic!("expected extraction error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_cancelled_before_read() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let bytes = archive(&[(CONTAINER_PATH, CONTAINER)]);

        assert!(matches!(
            extract_metadata(book(bytes), &cancel),
            Err(AppError::Cancelled)
        ));
    }
}
