use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

/// Database wrapper for thread-safe access.
///
/// Every write goes through the single connection; conflicting writes are
/// resolved by SQLite constraints, not by the callers.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS progress (
                device TEXT,
                device_id TEXT,
                document TEXT NOT NULL,
                percentage REAL,
                progress_marker TEXT,
                timestamp INTEGER,
                username TEXT NOT NULL,
                UNIQUE (username, document),
                FOREIGN KEY (username) REFERENCES users(username)
            );
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== USER OPERATIONS ==========

    /// Insert a credential; a taken username is a `Conflict`.
    pub fn create_user(&self, credential: &Credential) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
            params![credential.username, credential.password_hash],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!(
                    "Username '{}' is already registered",
                    credential.username
                ))
            } else {
                AppError::Internal(format!("Failed to create user: {}", e))
            }
        })?;
        Ok(())
    }

    /// Get user by username.
    pub fn get_user(&self, username: &str) -> Result<Option<Credential>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT username, password_hash FROM users WHERE username = ?1",
            params![username],
            |row| {
                Ok(Credential {
                    username: row.get(0)?,
                    password_hash: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// List all usernames.
    pub fn list_users(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT username FROM users ORDER BY username")
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| AppError::Internal(format!("Failed to list users: {}", e)))?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    // ========== PROGRESS OPERATIONS ==========

    /// Insert or fully replace the progress record for `(username, document)`.
    pub fn save_progress(&self, record: &ProgressRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO progress
             (device, device_id, document, percentage, progress_marker, timestamp, username)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (username, document) DO UPDATE SET
                device = excluded.device,
                device_id = excluded.device_id,
                percentage = excluded.percentage,
                progress_marker = excluded.progress_marker,
                timestamp = excluded.timestamp",
            params![
                record.device,
                record.device_id,
                record.document,
                record.percentage,
                record.progress,
                record.timestamp,
                record.username,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save progress: {}", e)))?;
        Ok(())
    }

    /// Get the progress record for a document.
    pub fn get_progress(&self, username: &str, document: &str) -> Result<Option<ProgressRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT username, document, device, device_id, percentage, progress_marker, timestamp
             FROM progress
             WHERE username = ?1 AND document = ?2",
            params![username, document],
            |row| {
                Ok(ProgressRecord {
                    username: row.get(0)?,
                    document: row.get(1)?,
                    device: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    device_id: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    percentage: row.get::<_, Option<f64>>(4)?.unwrap_or_default(),
                    progress: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    timestamp: row.get::<_, Option<i64>>(6)?.unwrap_or_default(),
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get progress: {}", e)))
    }
}

/// Whether `e` is a UNIQUE constraint failure.
fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
