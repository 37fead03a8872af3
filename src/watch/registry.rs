//! The watch registry: recursive directory subscription and the pipeline
//! from debounced raw events to outbound wire events.

use super::debounce::Debouncer;
use super::raw::{self, OpMask, RawEvent, RenameTracker};
use crate::config::{self, SyncConfig, BUFFER_SIZE};
use crate::error::SyncError;
use crate::event::{self, FileEvent, Op};
use crate::hash::sha256_hex;
use crate::index::{FileIndex, IndexError};
use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A watched directory. Children are referenced by path only; ownership of
/// every record lives in the registry's map.
#[derive(Debug, Clone)]
struct DirRecord {
    name: String,
    path: PathBuf,
    children: HashSet<PathBuf>,
}

/// A debounced raw event reduced to a single semantic op.
#[derive(Debug)]
struct NormalizedEvent {
    path: PathBuf,
    op: Op,
    renamed_from: Option<PathBuf>,
}

/// Watches the storage tree, one non-recursive OS subscription per
/// directory, and emits encoded wire events on a bounded channel.
pub struct Registry {
    config: SyncConfig,
    index: Arc<dyn FileIndex>,
    watcher: Mutex<RecommendedWatcher>,
    watched: Mutex<HashMap<PathBuf, DirRecord>>,
    intake: Mutex<Option<mpsc::Receiver<notify::Result<notify::Event>>>>,
    out_tx: mpsc::Sender<Vec<u8>>,
    debounce: Debouncer,
}

impl Registry {
    /// Build a registry and hand back the receiving end of its outbound
    /// channel.
    pub fn new(
        config: SyncConfig,
        index: Arc<dyn FileIndex>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<Vec<u8>>), SyncError> {
        let (raw_tx, raw_rx) = mpsc::channel(100);
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.blocking_send(res);
            },
            notify::Config::default(),
        )?;
        let (out_tx, out_rx) = mpsc::channel(BUFFER_SIZE);
        let registry = Arc::new(Self {
            config,
            index,
            watcher: Mutex::new(watcher),
            watched: Mutex::new(HashMap::new()),
            intake: Mutex::new(Some(raw_rx)),
            out_tx,
            debounce: Debouncer::new(),
        });
        Ok((registry, out_rx))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Subscribe a directory and its subtree: children first, then the
    /// record for `path` itself, then the OS watch. Any failure aborts the
    /// subtree subscription and propagates.
    pub fn append_dir(&self, path: &Path) -> Result<(), SyncError> {
        let name = base_name(path);
        let mut record = DirRecord {
            name,
            path: path.to_path_buf(),
            children: HashSet::new(),
        };
        let entries = fs::read_dir(path).map_err(SyncError::from_io)?;
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                let child = path.join(entry.file_name());
                self.append_dir(&child)?;
                record.children.insert(child);
            }
        }
        self.watched
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), record);
        self.watcher
            .lock()
            .unwrap()
            .watch(path, RecursiveMode::NonRecursive)?;
        info!(dir = %path.display(), "directory added to the watchlist");
        Ok(())
    }

    /// Unsubscribe a directory and its recorded subtree. Child failures are
    /// logged, not fatal; an unknown path is an error.
    pub fn remove_dir(&self, path: &Path) -> Result<(), SyncError> {
        let record = self
            .watched
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or(SyncError::NotExist)?;
        for child in &record.children {
            if let Err(err) = self.remove_dir(child) {
                error!(dir = %child.display(), %err, "error removing watched directory");
            }
        }
        self.watched.lock().unwrap().remove(path);
        let _ = self.watcher.lock().unwrap().unwatch(&record.path);
        info!(dir = %record.name, "directory removed from the watchlist");
        Ok(())
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.watched.lock().unwrap().contains_key(path)
    }

    pub fn watched_len(&self) -> usize {
        self.watched.lock().unwrap().len()
    }

    /// Drain raw watcher notifications into the debouncer until cancelled or
    /// the watcher goes away.
    pub async fn listen(self: Arc<Self>, shutdown: CancellationToken) {
        let Some(mut intake) = self.intake.lock().unwrap().take() else {
            error!("registry intake already taken; listen called twice");
            return;
        };
        let mut tracker = RenameTracker::default();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                next = intake.recv() => match next {
                    None => return,
                    Some(Err(err)) => error!(%err, "watcher error"),
                    Some(Ok(event)) => {
                        for raw in raw::translate(&event, &mut tracker) {
                            self.debounce.schedule(Arc::clone(&self), raw);
                        }
                    }
                }
            }
        }
    }

    /// Debounce timer callback: normalize and dispatch one raw event.
    pub(super) fn fire(&self, raw: RawEvent) {
        if let Some(normalized) = self.normalize(raw) {
            if let Err(err) = self.receive(&normalized) {
                error!(
                    path = %normalized.path.display(),
                    op = %normalized.op,
                    %err,
                    "event handling failed"
                );
            }
        }
    }

    /// Reduce a raw mask to one semantic op, in the fixed rule order: a
    /// lone rename half is a removal; a create paired with a rename source
    /// is the rename itself (and its sibling slot dies); writes aimed at
    /// directories are spurious and dropped.
    fn normalize(&self, raw: RawEvent) -> Option<NormalizedEvent> {
        let mut op = if raw.mask.has(OpMask::CREATE) {
            Op::Create
        } else if raw.mask.has(OpMask::WRITE) {
            Op::Write
        } else {
            Op::Remove
        };
        let mut renamed_from = None;

        if raw.mask.has(OpMask::RENAME) {
            op = Op::Remove;
        }
        if raw.mask.has(OpMask::CREATE) {
            if let Some(from) = raw.renamed_from {
                op = Op::Rename;
                self.debounce
                    .cancel(&format!("{}{}", from.display(), OpMask::RENAME));
                renamed_from = Some(from);
            }
        }
        if raw.mask.has(OpMask::WRITE) {
            match fs::metadata(&raw.path) {
                Ok(meta) if meta.is_dir() => return None,
                Ok(_) => {}
                Err(err) => {
                    debug!(path = %raw.path.display(), %err, "dropping write on vanished path");
                    return None;
                }
            }
        }

        Some(NormalizedEvent {
            path: raw.path,
            op,
            renamed_from,
        })
    }

    /// Route one normalized event to its handler.
    fn receive(&self, event: &NormalizedEvent) -> Result<(), SyncError> {
        match event.op {
            Op::Create => {
                let meta = fs::metadata(&event.path).map_err(SyncError::from_io)?;
                if meta.is_dir() {
                    self.append_dir(&event.path)?;
                    self.handle_dir(&event.path)?;
                } else {
                    self.handle_file(&event.path)?;
                }
            }
            Op::Remove => self.handle_remove(&event.path)?,
            Op::Rename => {
                let from = event.renamed_from.as_ref().ok_or(SyncError::EmptyPath)?;
                self.handle_rename(from, &event.path)?;
            }
            Op::Write => self.handle_file(&event.path)?,
            Op::Update => {}
        }
        debug!(path = %event.path.display(), op = %event.op, "event dispatched");
        Ok(())
    }

    fn rel(&self, path: &Path) -> Result<String, SyncError> {
        self.config.rel(path).ok_or(SyncError::InvalidPath)
    }

    /// Decide what a file notification means by comparing the file against
    /// its index row: unknown files are creations; a hash mismatch becomes a
    /// write when the local copy is newer, an update request when it is not.
    fn handle_file(&self, path: &Path) -> Result<(), SyncError> {
        let rel = self.rel(path)?;
        let record = match self.index.get_file(&rel) {
            Ok(record) => record,
            Err(IndexError::NotFound) => {
                let data = fs::read(path).map_err(SyncError::from_io)?;
                let hash = sha256_hex(&data);
                return self.emit(FileEvent::create_file(rel, data, hash));
            }
            Err(err) => return Err(err.into()),
        };

        let data = fs::read(path).map_err(SyncError::from_io)?;
        let hash = sha256_hex(&data);
        if record.hash == hash {
            return Ok(());
        }
        let updated_at = config::parse_stamp(&record.updated_at)?;
        let mtime: DateTime<Utc> = fs::metadata(path)?.modified()?.into();
        if mtime > updated_at {
            self.emit(FileEvent::write(rel, data, hash))
        } else {
            self.emit(FileEvent::update(rel))
        }
    }

    /// Emit a removal only for paths we know: a watched directory or an
    /// indexed file.
    fn handle_remove(&self, path: &Path) -> Result<(), SyncError> {
        let was_dir = self.is_watched(path);
        if was_dir {
            self.remove_dir(path)?;
        }
        let rel = self.rel(path)?;
        match self.index.get_file(&rel) {
            Ok(_) => self.emit(FileEvent::remove(rel, was_dir)),
            Err(IndexError::NotFound) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// A paired rename. The source must be indexed; a directory destination
    /// joins the watchlist.
    fn handle_rename(&self, from: &Path, to: &Path) -> Result<(), SyncError> {
        let rel_from = self.rel(from)?;
        self.index.get_file(&rel_from)?;
        let meta = fs::metadata(to).map_err(SyncError::from_io)?;
        let rel_to = self.rel(to)?;
        self.emit(FileEvent::rename(rel_from, rel_to, meta.is_dir()))?;
        if meta.is_dir() {
            self.append_dir(to)?;
        }
        Ok(())
    }

    /// Announce a directory and everything under it. Used when a directory
    /// appears (created or moved in) and for the initial scan.
    fn handle_dir(&self, path: &Path) -> Result<(), SyncError> {
        let rel = self.rel(path)?;
        match self.index.get_file(&rel) {
            Ok(_) => {}
            Err(IndexError::NotFound) => self.emit(FileEvent::create_dir(rel))?,
            Err(err) => return Err(err.into()),
        }
        let entries = fs::read_dir(path).map_err(SyncError::from_io)?;
        for entry in entries.flatten() {
            let child = path.join(entry.file_name());
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                self.handle_dir(&child)?;
            } else {
                self.handle_file(&child)?;
            }
        }
        Ok(())
    }

    /// Push local state the server does not know about yet. Run once after
    /// subscribing the storage root; the root itself is never announced.
    pub fn scan_storage(&self) -> Result<(), SyncError> {
        let root = self.config.storage_dir();
        let entries = fs::read_dir(&root).map_err(SyncError::from_io)?;
        for entry in entries.flatten() {
            let child = root.join(entry.file_name());
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                self.handle_dir(&child)?;
            } else {
                self.handle_file(&child)?;
            }
        }
        Ok(())
    }

    /// Encode and queue one event. The channel is bounded and the send is
    /// non-blocking: a full buffer drops the event and the peer catches up
    /// at its next reconciliation.
    pub(super) fn emit(&self, event: FileEvent) -> Result<(), SyncError> {
        let payload = event::encode(&event)?;
        match self.out_tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                error!(path = %event.path, op = %event.op, "outbound buffer full, dropping event");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(path = %event.path, op = %event.op, "outbound channel closed, dropping event");
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub(super) fn pending_timers(&self) -> usize {
        self.debounce.pending()
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
