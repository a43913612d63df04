//! Directory scanning into a catalog.
//!
//! The tree is walked depth-first in file-name order. Hidden entries (a
//! leading `.`) are pruned, every `.epub` file is opened and its metadata
//! extracted, and the result keeps the visit order regardless of how many
//! workers extract in parallel. A scan is rebuilt from scratch on every
//! call; the same tree always yields the same entry ids.

use crate::auth::ensure_active;
use crate::error::{AppError, Result};
use crate::formats::{self, BookFile};
use crate::library::entry::{Catalog, CatalogEntry, SkippedFile, escape_relative_path};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Span;
use walkdir::{DirEntry, WalkDir};

/// What a scan does when a candidate's metadata cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionFailurePolicy {
    /// Warn, record the file as skipped and keep going.
    #[default]
    Skip,
    /// Fail the whole scan with the extraction error.
    Abort,
}

/// Builds catalogs from one root directory.
pub struct CatalogBuilder {
    root: PathBuf,
    policy: ExtractionFailurePolicy,
    pool: Arc<rayon::ThreadPool>,
    span: Span,
}

impl CatalogBuilder {
    /// Create a builder over `root` extracting with `workers` threads.
    pub fn new(
        root: PathBuf,
        workers: usize,
        policy: ExtractionFailurePolicy,
        span: Span,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("catalog-{}", i))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build scan pool: {}", e)))?;

        Ok(Self {
            root,
            policy,
            pool: Arc::new(pool),
            span,
        })
    }

    /// Resolve a decoded relative path to a regular file inside the root.
    ///
    /// Absolute paths, `..` and hidden segments are refused. Links inside
    /// the root are followed, the same way the catalog walk lists them.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let not_found = || AppError::NotFound(format!("No such file: {}", relative));

        let relative_path = Path::new(relative);
        let mut segments = 0;
        for component in relative_path.components() {
            match component {
                Component::Normal(segment) if !segment.to_string_lossy().starts_with('.') => {
                    segments += 1;
                }
                _ => return Err(not_found()),
            }
        }
        if segments == 0 {
            return Err(not_found());
        }

        let path = self.root.join(relative_path);
        if !path.is_file() {
            return Err(not_found());
        }
        Ok(path)
    }

    /// Feed title: the base name of the root directory.
    pub fn title(&self) -> String {
        let named = |p: &Path| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .filter(|n| !n.is_empty())
        };

        named(&self.root)
            .or_else(|| {
                self.root
                    .canonicalize()
                    .ok()
                    .and_then(|p| named(&p))
            })
            .unwrap_or_else(|| self.root.display().to_string())
    }

    /// Scan the tree and build a fresh catalog.
    pub fn build(&self, cancel: &CancellationToken) -> Result<Catalog> {
        let start = std::time::Instant::now();
        let candidates = self.collect_candidates(cancel)?;

        let results: Vec<(PathBuf, Result<CatalogEntry>)> = self.pool.install(|| {
            candidates
                .into_par_iter()
                .map(|path| {
                    let entry = self.build_entry(&path, cancel);
                    (path, entry)
                })
                .collect()
        });

        let mut entries = Vec::with_capacity(results.len());
        let mut skipped = Vec::new();

        for (path, result) in results {
            match result {
                Ok(entry) => entries.push(entry),
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => match self.policy {
                    ExtractionFailurePolicy::Abort => return Err(e),
                    ExtractionFailurePolicy::Skip => {
                        tracing::warn!(
                            parent: &self.span,
                            path = %path.display(),
                            error = %e,
                            "Skipping unreadable book"
                        );
                        skipped.push(SkippedFile {
                            path,
                            reason: e.to_string(),
                        });
                    }
                },
            }
        }

        tracing::debug!(
            parent: &self.span,
            root = %self.root.display(),
            entries = entries.len(),
            skipped = skipped.len(),
            elapsed = ?start.elapsed(),
            "Catalog built"
        );

        Ok(Catalog {
            title: self.title(),
            entries,
            skipped,
        })
    }

    /// Walk the tree and list EPUB candidates in visit order.
    fn collect_candidates(&self, cancel: &CancellationToken) -> Result<Vec<PathBuf>> {
        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        let mut candidates = Vec::new();
        for item in walker {
            ensure_active(cancel)?;

            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        parent: &self.span,
                        path = ?e.path(),
                        error = %e,
                        "Cannot traverse entry"
                    );
                    continue;
                }
            };

            if entry.file_type().is_file()
                && formats::is_epub_name(&entry.file_name().to_string_lossy())
            {
                candidates.push(entry.into_path());
            }
        }

        Ok(candidates)
    }

    fn build_entry(&self, path: &Path, cancel: &CancellationToken) -> Result<CatalogEntry> {
        ensure_active(cancel)?;

        let book = BookFile::open(path).map_err(|e| AppError::extraction(path, e))?;
        let updated_at = book.modified;
        let metadata = formats::extract_metadata(book, cancel)?;

        let title = if metadata.title.is_empty() {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            metadata.title
        };

        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let acquisition_path = escape_relative_path(relative);

        Ok(CatalogEntry {
            id: CatalogEntry::id_for(&acquisition_path),
            title,
            author: metadata.author,
            subject: metadata.subject,
            description: metadata.description,
            publication_date: metadata.publication_date,
            updated_at,
            acquisition_path,
        })
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}
