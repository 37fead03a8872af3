//! The client-side hub: applies server events to the local tree.

use super::Hub;
use crate::config::SyncConfig;
use crate::error::EventError;
use crate::event::{FileEvent, Op};
use crate::fsops;
use async_trait::async_trait;

/// Purely filesystem; the server's events are authoritative, so removal is
/// idempotent and writes create missing files.
pub struct ClientHub {
    config: SyncConfig,
}

impl ClientHub {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Hub for ClientHub {
    async fn process(&self, event: &mut FileEvent) -> Result<(), EventError> {
        if let Err(kind) = fsops::validate_path(&self.config, &event.path) {
            return Err(EventError::new(kind, event));
        }
        let result = match event.op {
            Op::Create => fsops::create(&self.config, event),
            // Update requests answered by the server come back as writes;
            // both land here and create the file when it is missing.
            Op::Write | Op::Update => fsops::write(&self.config, event),
            Op::Rename => fsops::rename(&self.config, event),
            Op::Remove => fsops::remove_all(&self.config, &event.path),
        };
        result.map_err(|kind| EventError::new(kind, event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::fs;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, ClientHub, SyncConfig) {
        let tmp = TempDir::new().unwrap();
        let cfg = SyncConfig::new(tmp.path());
        fs::create_dir(cfg.storage_dir()).unwrap();
        (tmp, ClientHub::new(cfg.clone()), cfg)
    }

    #[tokio::test]
    async fn applies_create_write_rename_remove() {
        let (_tmp, hub, cfg) = scratch();

        let mut event = FileEvent::create_dir("storage/dir-1".into());
        hub.process(&mut event).await.unwrap();
        assert!(cfg.abs("storage/dir-1").is_dir());

        let mut event =
            FileEvent::write("storage/dir-1/file.txt".into(), b"one".to_vec(), String::new());
        hub.process(&mut event).await.unwrap();
        assert_eq!(fs::read(cfg.abs("storage/dir-1/file.txt")).unwrap(), b"one");

        let mut event = FileEvent::rename(
            "storage/dir-1/file.txt".into(),
            "storage/dir-1/renamed.txt".into(),
            false,
        );
        hub.process(&mut event).await.unwrap();
        assert!(cfg.abs("storage/dir-1/renamed.txt").is_file());

        let mut event = FileEvent::remove("storage/dir-1".into(), true);
        hub.process(&mut event).await.unwrap();
        assert!(!cfg.abs("storage/dir-1").exists());

        // remove is idempotent on this side
        let mut event = FileEvent::remove("storage/dir-1".into(), true);
        hub.process(&mut event).await.unwrap();
    }

    #[tokio::test]
    async fn update_is_write_idempotent() {
        let (_tmp, hub, cfg) = scratch();
        let mut event = FileEvent {
            path: "storage/fresh.txt".into(),
            op: Op::Update,
            data: b"server copy".to_vec(),
            ..Default::default()
        };
        hub.process(&mut event).await.unwrap();
        assert_eq!(fs::read(cfg.abs("storage/fresh.txt")).unwrap(), b"server copy");
    }

    #[tokio::test]
    async fn rejects_paths_outside_storage() {
        let (_tmp, hub, _cfg) = scratch();
        let mut event = FileEvent::create_dir("elsewhere/dir".into());
        let err = hub.process(&mut event).await.unwrap_err();
        assert!(matches!(err.kind, SyncError::InvalidPath));
    }
}
