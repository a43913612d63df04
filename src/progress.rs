//! Reading progress reconciliation.
//!
//! One record per (user, document). Every write replaces the previous
//! record outright: whichever device reports last wins, and nothing of the
//! earlier device's position survives. Ordering is by arrival at the
//! server, not by the client-supplied timestamp.

use crate::auth::ensure_active;
use crate::db::{Database, ProgressRecord, now_timestamp};
use crate::error::{AppError, Result};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Progress update as sent by a client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProgressUpdate {
    /// Document identifier.
    pub document: String,
    /// Device model name.
    pub device: String,
    /// Device identifier.
    pub device_id: String,
    /// Reading percentage.
    pub percentage: f64,
    /// Opaque position marker.
    pub progress: String,
    /// Client timestamp; zero lets the server assign one.
    pub timestamp: i64,
}

/// Progress store.
pub struct ProgressStore {
    db: Database,
    span: Span,
}

impl ProgressStore {
    /// Create a progress store over `db`.
    pub fn new(db: Database, span: Span) -> Self {
        Self { db, span }
    }

    /// Stored progress for a document, `NotFound` when none exists.
    pub fn get(
        &self,
        username: &str,
        document: &str,
        cancel: &CancellationToken,
    ) -> Result<ProgressRecord> {
        if document.is_empty() {
            return Err(AppError::BadRequest("Field 'document' not provided".into()));
        }

        ensure_active(cancel)?;
        self.db
            .get_progress(username, document)?
            .ok_or_else(|| AppError::NotFound(format!("No progress for document {}", document)))
    }

    /// Replace the progress for `(username, update.document)`.
    ///
    /// Returns the timestamp that was stored.
    pub fn upsert(
        &self,
        username: &str,
        update: ProgressUpdate,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        if update.document.is_empty() {
            return Err(AppError::BadRequest("Field 'document' not provided".into()));
        }

        let timestamp = if update.timestamp == 0 {
            now_timestamp()
        } else {
            update.timestamp
        };

        let record = ProgressRecord {
            username: username.to_string(),
            document: update.document,
            device: update.device,
            device_id: update.device_id,
            percentage: update.percentage,
            progress: update.progress,
            timestamp,
        };

        ensure_active(cancel)?;
        self.db.save_progress(&record)?;

        tracing::debug!(
            parent: &self.span,
            username,
            document = %record.document,
            device = %record.device,
            percentage = record.percentage,
            timestamp,
            "Progress updated"
        );

        Ok(timestamp)
    }
}
