//! Catalog model and directory scanning.

mod entry;
pub mod scan;

pub use entry::{Catalog, CatalogEntry, SkippedFile};
pub use scan::{CatalogBuilder, ExtractionFailurePolicy};
