use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another bear process holds the database lock
    #[error("Another instance of bear appears to be using the database. Please wait for it to finish.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A feed with this url is already stored
    #[error("Feed already exists: {0}")]
    AlreadyExists(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface
/// through the error text only.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Helper Types
// ============================================================================

/// Row type for feed queries: (id, url, added, updated)
pub(crate) type FeedRow = (i64, String, i64, Option<i64>);

/// Convert a stored Unix timestamp (whole seconds) back into UTC.
pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

// ============================================================================
// Data Structures
// ============================================================================

/// A persisted feed subscription.
///
/// `added` is set once when the row is created. `updated` is the polling
/// watermark: `None` until the first successful poll, cleared again by a
/// reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub added: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
}

impl From<FeedRow> for Feed {
    fn from((id, url, added, updated): FeedRow) -> Self {
        Feed {
            id,
            url,
            added: from_unix(added),
            updated: updated.map(from_unix),
        }
    }
}
