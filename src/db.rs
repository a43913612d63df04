mod schema;

pub use schema::Database;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Stored account credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Username for login (unique).
    pub username: String,
    /// Scheme-tagged Argon2 hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
}

/// Reading position of one document for one user.
///
/// Serialized with the field names KOReader uses on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Owner of the record.
    #[serde(skip)]
    pub username: String,
    /// Document identifier (KOReader uses a partial MD5 of the file).
    pub document: String,
    /// Device model name.
    pub device: String,
    /// Device identifier.
    pub device_id: String,
    /// Reading percentage, 0.0 to 1.0.
    pub percentage: f64,
    /// Opaque position marker (xpointer or page number).
    pub progress: String,
    /// Last update, epoch seconds.
    pub timestamp: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}
