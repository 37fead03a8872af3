//! Content-hashed tree descriptors for reconciliation.

use crate::config::{self, SyncConfig};
use crate::hash::sha256_hex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use tracing::error;

/// One node of a tree descriptor. File nodes carry the hex SHA-256 of their
/// contents; a directory node's hash is unused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FsNode {
    /// Wire-relative path of this node.
    pub path: String,
    /// Modification time in the index layout.
    pub mod_time: String,
    pub hash: String,
    pub is_dir: bool,
    /// Children keyed by base name.
    #[serde(default)]
    pub children: BTreeMap<String, FsNode>,
}

/// Snapshot a directory into a descriptor. Returns `None` when `path` is not
/// a directory. Unreadable children are logged and omitted; a partial tree
/// is still usable for diffing.
pub fn build_tree(cfg: &SyncConfig, path: &str) -> Option<FsNode> {
    let abs = cfg.abs(path);
    let meta = match fs::metadata(&abs) {
        Ok(meta) => meta,
        Err(err) => {
            error!(path, %err, "cannot stat tree root");
            return None;
        }
    };
    if !meta.is_dir() {
        return None;
    }
    let entries = match fs::read_dir(&abs) {
        Ok(entries) => entries,
        Err(err) => {
            error!(path, %err, "cannot read directory");
            return None;
        }
    };

    let mut children = BTreeMap::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let child_path = format!("{path}/{name}");
        let child_is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if child_is_dir {
            if let Some(node) = build_tree(cfg, &child_path) {
                children.insert(name, node);
            }
        } else {
            match file_node(cfg, &child_path) {
                Ok(node) => {
                    children.insert(name, node);
                }
                Err(err) => error!(path = child_path, %err, "skipping unreadable file"),
            }
        }
    }

    Some(FsNode {
        path: path.to_string(),
        mod_time: mod_time_stamp(&meta),
        hash: String::new(),
        is_dir: true,
        children,
    })
}

fn file_node(cfg: &SyncConfig, path: &str) -> Result<FsNode, std::io::Error> {
    let abs = cfg.abs(path);
    let meta = fs::metadata(&abs)?;
    let data = fs::read(&abs)?;
    Ok(FsNode {
        path: path.to_string(),
        mod_time: mod_time_stamp(&meta),
        hash: sha256_hex(&data),
        is_dir: false,
        children: BTreeMap::new(),
    })
}

fn mod_time_stamp(meta: &fs::Metadata) -> String {
    let mtime: DateTime<Utc> = meta
        .modified()
        .map(Into::into)
        .unwrap_or_else(|_| Utc::now());
    config::format_stamp(mtime)
}
