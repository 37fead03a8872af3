//! The server-side hub: applies events to canonical storage and the index.

use super::Hub;
use crate::config::{self, SyncConfig};
use crate::error::{EventError, SyncError};
use crate::event::{FileEvent, Op};
use crate::fsops;
use crate::hash::sha256_hex;
use crate::index::{FileChange, FileIndex, IndexError, NewFileRecord};
use async_trait::async_trait;
use std::fs;
use std::sync::Arc;

/// Applies an event to the canonical tree and mirrors it into the file
/// index. Disk mutates first; if the index write then fails the error is
/// surfaced and the window is accepted, like the rest of the pipeline.
pub struct ServerHub {
    config: SyncConfig,
    index: Arc<dyn FileIndex>,
}

impl ServerHub {
    pub fn new(config: SyncConfig, index: Arc<dyn FileIndex>) -> Self {
        Self { config, index }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn create(&self, event: &FileEvent) -> Result<(), SyncError> {
        fsops::create(&self.config, event)?;
        let now = config::format_now();
        self.index.create_file(NewFileRecord {
            path: event.path.clone(),
            hash: event.hash.clone(),
            created_at: now.clone(),
            updated_at: now,
            is_dir: event.is_dir,
        })?;
        Ok(())
    }

    fn write(&self, event: &FileEvent) -> Result<(), SyncError> {
        let target = self.config.abs(&event.path);
        let meta = fs::metadata(&target).map_err(SyncError::from_io)?;
        if meta.is_dir() {
            return Err(SyncError::Malformed);
        }
        fs::write(&target, &event.data)?;
        self.index.update_file(FileChange {
            path: event.path.clone(),
            hash: event.hash.clone(),
            updated_at: config::format_now(),
        })?;
        Ok(())
    }

    fn remove(&self, event: &FileEvent) -> Result<(), SyncError> {
        let target = self.config.abs(&event.path);
        let meta = fs::metadata(&target).map_err(SyncError::from_io)?;
        if meta.is_dir() != event.is_dir {
            return Err(SyncError::Malformed);
        }
        if meta.is_dir() {
            self.delete_tree_rows(&event.path)?;
        } else {
            self.delete_row_tolerant(&event.path)?;
        }
        fsops::remove_all(&self.config, &event.path)
    }

    fn rename(&self, event: &FileEvent) -> Result<(), SyncError> {
        fsops::check_rename(&self.config, event)?;
        if event.is_dir {
            self.delete_tree_rows(&event.path)?;
            fs::rename(self.config.abs(&event.path), self.config.abs(&event.new_path))?;
            self.insert_tree_rows(&event.new_path)?;
        } else {
            self.delete_row_tolerant(&event.path)?;
            fs::rename(self.config.abs(&event.path), self.config.abs(&event.new_path))?;
            self.insert_file_row(&event.new_path)?;
        }
        Ok(())
    }

    /// Answer a pull request: load the authoritative copy into the event and
    /// demote it to a write for the trip back to the requester.
    fn update(&self, event: &mut FileEvent) -> Result<(), SyncError> {
        let target = self.config.abs(&event.path);
        let meta = fs::metadata(&target).map_err(SyncError::from_io)?;
        if meta.is_dir() {
            return Err(SyncError::InvalidPath);
        }
        let data = fs::read(&target)?;
        let hash = sha256_hex(&data);
        event.fill_update(data, hash);
        Ok(())
    }

    /// Delete the rows of a directory subtree, children before parents, by
    /// walking what is currently on disk.
    fn delete_tree_rows(&self, path: &str) -> Result<(), SyncError> {
        let abs = self.config.abs(path);
        for entry in fs::read_dir(&abs)?.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = format!("{path}/{name}");
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                self.delete_tree_rows(&child)?;
            } else {
                self.delete_row_tolerant(&child)?;
            }
        }
        self.delete_row_tolerant(path)
    }

    fn delete_row_tolerant(&self, path: &str) -> Result<(), SyncError> {
        match self.index.delete_file(path) {
            Ok(()) | Err(IndexError::NotFound) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Insert fresh rows for a subtree that just landed on disk, hashes
    /// recomputed from contents, both timestamps set to now.
    fn insert_tree_rows(&self, path: &str) -> Result<(), SyncError> {
        let abs = self.config.abs(path);
        for entry in fs::read_dir(&abs)?.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = format!("{path}/{name}");
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                self.insert_tree_rows(&child)?;
            } else {
                self.insert_file_row(&child)?;
            }
        }
        let now = config::format_now();
        self.index.create_file(NewFileRecord {
            path: path.to_string(),
            hash: String::new(),
            created_at: now.clone(),
            updated_at: now,
            is_dir: true,
        })?;
        Ok(())
    }

    fn insert_file_row(&self, path: &str) -> Result<(), SyncError> {
        let data = fs::read(self.config.abs(path))?;
        let now = config::format_now();
        self.index.create_file(NewFileRecord {
            path: path.to_string(),
            hash: sha256_hex(&data),
            created_at: now.clone(),
            updated_at: now,
            is_dir: false,
        })?;
        Ok(())
    }
}

#[async_trait]
impl Hub for ServerHub {
    async fn process(&self, event: &mut FileEvent) -> Result<(), EventError> {
        if let Err(kind) = fsops::validate_path(&self.config, &event.path) {
            return Err(EventError::new(kind, event));
        }
        let result = match event.op {
            Op::Create => self.create(event),
            Op::Write => self.write(event),
            Op::Remove => self.remove(event),
            Op::Rename => self.rename(event),
            Op::Update => self.update(event),
        };
        result.map_err(|kind| EventError::new(kind, event))
    }
}
