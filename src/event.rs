//! Wire-level event records and the envelope codec.
//!
//! A [`FileEvent`] is created once (by the watch registry or the
//! reconciliation walker), wrapped in an [`Envelope`], and consumed exactly
//! once by a hub on the other side. Field names and ordering are fixed by
//! the existing wire corpus: `path`, `newpath`, `op`, `hash`, `data`,
//! `isDir`.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic operation carried by a [`FileEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Op {
    #[default]
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "WRITE")]
    Write,
    #[serde(rename = "REMOVE")]
    Remove,
    #[serde(rename = "RENAME")]
    Rename,
    /// A pull request: "send me the authoritative copy of this path".
    #[serde(rename = "UPDATE")]
    Update,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Create => "CREATE",
            Op::Write => "WRITE",
            Op::Remove => "REMOVE",
            Op::Rename => "RENAME",
            Op::Update => "UPDATE",
        };
        f.write_str(s)
    }
}

/// One filesystem change or request, rooted at the storage prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileEvent {
    pub path: String,
    /// Rename destination; empty for every other op.
    #[serde(rename = "newpath", default)]
    pub new_path: String,
    pub op: Op,
    /// Hex SHA-256 of `data` when carrying file contents, empty otherwise.
    #[serde(default)]
    pub hash: String,
    /// Whole-file contents; empty for directories, removes, renames and
    /// update requests.
    #[serde(with = "crate::b64::serde_bytes", default)]
    pub data: Vec<u8>,
    #[serde(rename = "isDir", default)]
    pub is_dir: bool,
}

impl FileEvent {
    pub fn create_file(path: String, data: Vec<u8>, hash: String) -> Self {
        Self {
            path,
            op: Op::Create,
            hash,
            data,
            ..Default::default()
        }
    }

    pub fn create_dir(path: String) -> Self {
        Self {
            path,
            op: Op::Create,
            is_dir: true,
            ..Default::default()
        }
    }

    pub fn write(path: String, data: Vec<u8>, hash: String) -> Self {
        Self {
            path,
            op: Op::Write,
            hash,
            data,
            ..Default::default()
        }
    }

    pub fn remove(path: String, is_dir: bool) -> Self {
        Self {
            path,
            op: Op::Remove,
            is_dir,
            ..Default::default()
        }
    }

    pub fn rename(path: String, new_path: String, is_dir: bool) -> Self {
        Self {
            path,
            new_path,
            op: Op::Rename,
            is_dir,
            ..Default::default()
        }
    }

    pub fn update(path: String) -> Self {
        Self {
            path,
            op: Op::Update,
            ..Default::default()
        }
    }

    /// Fill an update request with the authoritative copy and demote it to a
    /// plain write for the trip back.
    pub fn fill_update(&mut self, data: Vec<u8>, hash: String) {
        self.data = data;
        self.hash = hash;
        self.op = Op::Write;
    }
}

/// Envelope tag. Only events are in scope; the integer representation is
/// fixed by the wire corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeType {
    Event,
}

impl EnvelopeType {
    pub fn code(self) -> u32 {
        match self {
            EnvelopeType::Event => 0,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(EnvelopeType::Event),
            _ => None,
        }
    }
}

/// Tagged container for a typed body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: u32,
    #[serde(with = "crate::b64::serde_bytes", default)]
    pub message: Vec<u8>,
}

/// Serialize an event and wrap it in an [`Envelope`].
pub fn encode(event: &FileEvent) -> Result<Vec<u8>, SyncError> {
    let body = serde_json::to_vec(event)?;
    let envelope = Envelope {
        kind: EnvelopeType::Event.code(),
        message: body,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Unwrap an envelope into its tag and opaque body.
pub fn decode(payload: &[u8]) -> Result<(EnvelopeType, Vec<u8>), SyncError> {
    let envelope: Envelope = serde_json::from_slice(payload)?;
    let kind = EnvelopeType::from_code(envelope.kind)
        .ok_or(SyncError::UnsupportedPayload(envelope.kind))?;
    Ok((kind, envelope.message))
}

/// Decode a full frame down to the event it carries.
pub fn decode_event(payload: &[u8]) -> Result<FileEvent, SyncError> {
    let (_, body) = decode(payload)?;
    Ok(serde_json::from_slice(&body)?)
}
