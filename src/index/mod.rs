//! The file index: the relational view of the server's canonical tree.
//!
//! The hub consumes exactly four operations; anything that can answer them
//! can back the index. The shipped implementation is SQLite.

mod sqlite;

pub use sqlite::SqliteIndex;

use thiserror::Error;

/// One index row, keyed by wire-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub hash: String,
    pub created_at: String,
    pub updated_at: String,
    pub is_dir: bool,
}

/// Insert parameters for a new row.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub path: String,
    pub hash: String,
    pub created_at: String,
    pub updated_at: String,
    pub is_dir: bool,
}

/// Mutation of an existing row after a write.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: String,
    pub hash: String,
    pub updated_at: String,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no index row for path")]
    NotFound,
    #[error("index row already exists")]
    Duplicate,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// The four operations the hubs are written against.
pub trait FileIndex: Send + Sync {
    /// Insert a row; a duplicate path is an error.
    fn create_file(&self, record: NewFileRecord) -> Result<(), IndexError>;

    /// Look up a row by path.
    fn get_file(&self, path: &str) -> Result<FileRecord, IndexError>;

    /// Update hash and `updated_at` of an existing row.
    fn update_file(&self, change: FileChange) -> Result<(), IndexError>;

    /// Delete a row by path; absent rows report [`IndexError::NotFound`],
    /// which callers treat as success where removal is idempotent.
    fn delete_file(&self, path: &str) -> Result<(), IndexError>;
}
