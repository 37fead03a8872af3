//! The sync-tree walker: corrective diffing of an authoritative tree
//! descriptor against the local disk.
//!
//! The server's descriptor wins everywhere except for files the local side
//! has touched more recently than the descriptor's timestamp; those are
//! pushed back as writes. Local state with no counterpart in the descriptor
//! is quarantined under the backup directory rather than deleted.

use super::registry::Registry;
use crate::config::{self, BACKUP_SEP, BACKUP_TIME_LAYOUT};
use crate::error::SyncError;
use crate::event::FileEvent;
use crate::fsops;
use crate::hash::sha256_hex;
use crate::tree::FsNode;
use chrono::{DateTime, Local, Utc};
use std::fs;
use std::path::Path;
use tracing::info;

impl Registry {
    /// Walk an authoritative node against the local tree, emitting
    /// corrective events and quarantining local extras.
    pub fn sync_tree(&self, node: &FsNode) -> Result<(), SyncError> {
        let local = self.config().abs(&node.path);
        let meta = match fs::metadata(&local) {
            Ok(meta) => Some(meta),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        match meta {
            None => {
                if node.is_dir {
                    fs::create_dir_all(&local)?;
                } else {
                    return self.emit(FileEvent::update(node.path.clone()));
                }
            }
            Some(meta) if meta.is_dir() != node.is_dir => {
                // The local entry lost; keep it, but out of the way.
                self.move_to_backup(&local)?;
                if node.is_dir {
                    fs::create_dir_all(&local)?;
                } else {
                    return self.emit(FileEvent::update(node.path.clone()));
                }
            }
            Some(meta) if !node.is_dir => {
                let node_time = config::parse_stamp(&node.mod_time)?;
                let data = fs::read(&local)?;
                let hash = sha256_hex(&data);
                if hash != node.hash {
                    let mtime: DateTime<Utc> = meta.modified()?.into();
                    if mtime > node_time {
                        // Local copy is newer: it wins and goes upstream.
                        self.emit(FileEvent::write(node.path.clone(), data, hash))?;
                    }
                    // Otherwise the server drives the correction.
                }
                return Ok(());
            }
            Some(_) => {
                for entry in fs::read_dir(&local)?.flatten() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if !node.children.contains_key(&name) {
                        self.move_to_backup(&entry.path())?;
                    }
                }
            }
        }

        for child in node.children.values() {
            self.sync_tree(child)?;
        }
        Ok(())
    }

    /// Quarantine a losing local entry as `backup/<timestamp>_<name>`.
    pub fn move_to_backup(&self, path: &Path) -> Result<(), SyncError> {
        let backup_dir = self.config().backup_dir();
        fsops::ensure_dir(&backup_dir)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or(SyncError::InvalidPath)?;
        let stamp = Local::now().format(BACKUP_TIME_LAYOUT);
        let dest = backup_dir.join(format!("{stamp}{BACKUP_SEP}{name}"));
        if dest.exists() {
            return Err(SyncError::AlreadyExists);
        }
        fs::rename(path, &dest)?;
        info!(from = %path.display(), to = %dest.display(), "moved local state to backup");
        Ok(())
    }
}
