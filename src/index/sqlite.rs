//! SQLite-backed file index.

use super::{FileChange, FileIndex, FileRecord, IndexError, NewFileRecord};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    path       TEXT PRIMARY KEY,
    hash       TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    is_dir     INTEGER NOT NULL
)";

/// A `files` table behind a mutex-guarded connection. Statement-level
/// serialization is all the hubs need; they never hold the lock across I/O.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        Self::from_conn(Connection::open(path)?)
    }

    /// Private in-memory index, used by tests and single-process setups.
    pub fn open_in_memory() -> Result<Self, IndexError> {
        Self::from_conn(Connection::open_in_memory()?)
    }

    fn from_conn(conn: Connection) -> Result<Self, IndexError> {
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl FileIndex for SqliteIndex {
    fn create_file(&self, record: NewFileRecord) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO files (path, hash, created_at, updated_at, is_dir)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.path,
                record.hash,
                record.created_at,
                record.updated_at,
                record.is_dir
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(IndexError::Duplicate)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn get_file(&self, path: &str) -> Result<FileRecord, IndexError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT path, hash, created_at, updated_at, is_dir
             FROM files WHERE path = ?1",
            params![path],
            |row| {
                Ok(FileRecord {
                    path: row.get(0)?,
                    hash: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                    is_dir: row.get(4)?,
                })
            },
        )
        .optional()?
        .ok_or(IndexError::NotFound)
    }

    fn update_file(&self, change: FileChange) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE files SET hash = ?1, updated_at = ?2 WHERE path = ?3",
            params![change.hash, change.updated_at, change.path],
        )?;
        if affected == 0 {
            return Err(IndexError::NotFound);
        }
        Ok(())
    }

    fn delete_file(&self, path: &str) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        if affected == 0 {
            return Err(IndexError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn record(path: &str, hash: &str, is_dir: bool) -> NewFileRecord {
        NewFileRecord {
            path: path.into(),
            hash: hash.into(),
            created_at: config::format_now(),
            updated_at: config::format_now(),
            is_dir,
        }
    }

    #[test]
    fn crud_round_trip() {
        let index = SqliteIndex::open_in_memory().unwrap();
        index
            .create_file(record("storage/file.txt", "abc", false))
            .unwrap();

        let row = index.get_file("storage/file.txt").unwrap();
        assert_eq!(row.hash, "abc");
        assert!(!row.is_dir);
        assert!(config::parse_stamp(&row.updated_at).is_ok());

        index
            .update_file(FileChange {
                path: "storage/file.txt".into(),
                hash: "def".into(),
                updated_at: config::format_now(),
            })
            .unwrap();
        assert_eq!(index.get_file("storage/file.txt").unwrap().hash, "def");

        index.delete_file("storage/file.txt").unwrap();
        assert!(matches!(
            index.get_file("storage/file.txt"),
            Err(IndexError::NotFound)
        ));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let index = SqliteIndex::open_in_memory().unwrap();
        index.create_file(record("storage/dir-1", "", true)).unwrap();
        assert!(matches!(
            index.create_file(record("storage/dir-1", "", true)),
            Err(IndexError::Duplicate)
        ));
    }

    #[test]
    fn missing_rows_report_not_found() {
        let index = SqliteIndex::open_in_memory().unwrap();
        assert!(matches!(
            index.delete_file("storage/ghost"),
            Err(IndexError::NotFound)
        ));
        assert!(matches!(
            index.update_file(FileChange {
                path: "storage/ghost".into(),
                hash: String::new(),
                updated_at: config::format_now(),
            }),
            Err(IndexError::NotFound)
        ));
    }
}
