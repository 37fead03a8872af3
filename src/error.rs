//! Error taxonomy for the sync core.

use crate::event::{FileEvent, Op};
use crate::index::IndexError;
use thiserror::Error;

/// Every way an event can fail to apply, plus the ambient I/O and codec
/// failures that bubble through the same paths.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("path is empty")]
    EmptyPath,
    #[error("path is not rooted at the storage prefix")]
    InvalidPath,
    #[error("invalid destination")]
    InvalidDest,
    #[error("target already exists")]
    AlreadyExists,
    #[error("path does not exist")]
    NotExist,
    #[error("event does not match on-disk state")]
    Malformed,
    #[error("unsupported event op")]
    UnsupportedEvent,
    #[error("server at maximum capacity")]
    CapacityExceeded,
    #[error("unsupported payload type {0}")]
    UnsupportedPayload(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Time(#[from] chrono::ParseError),
    #[error(transparent)]
    Watch(#[from] notify::Error),
    #[error(transparent)]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

impl SyncError {
    /// Wrap an I/O error, folding "not found" into the taxonomy.
    pub fn from_io(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            SyncError::NotExist
        } else {
            SyncError::Io(err)
        }
    }
}

/// A failed event, carrying the offending op and path as diagnostic payload.
/// The inner kind is reachable through `std::error::Error::source`.
#[derive(Debug, Error)]
#[error("event {op} {path}: {kind}")]
pub struct EventError {
    #[source]
    pub kind: SyncError,
    pub op: Op,
    pub path: String,
}

impl EventError {
    pub fn new(kind: SyncError, event: &FileEvent) -> Self {
        Self {
            kind,
            op: event.op,
            path: event.path.clone(),
        }
    }
}
