//! Path guard and idempotent filesystem primitives.
//!
//! Every primitive validates its preconditions before mutating anything, so
//! a failed event leaves the tree untouched. All paths arriving here are
//! wire-relative; they resolve against the configured root.

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::event::FileEvent;
use std::fs;
use std::path::Path;

/// Lexically clean a slash-separated path: collapse `//` and `.`, resolve
/// `..` against earlier segments. No filesystem access.
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|s| *s != "..") {
                    out.pop();
                } else if !rooted {
                    out.push("..");
                }
            }
            s => out.push(s),
        }
    }
    if out.is_empty() {
        return if rooted { "/".into() } else { ".".into() };
    }
    let joined = out.join("/");
    if rooted {
        format!("/{joined}")
    } else {
        joined
    }
}

/// An event path must be non-empty and begin with the storage prefix after
/// cleaning. Every event entering a hub passes through here first.
pub fn validate_path(cfg: &SyncConfig, path: &str) -> Result<(), SyncError> {
    if path.is_empty() {
        return Err(SyncError::EmptyPath);
    }
    let cleaned = clean(path);
    match cleaned.split('/').next() {
        Some(first) if first == cfg.storage => Ok(()),
        _ => Err(SyncError::InvalidPath),
    }
}

fn stat(path: &Path) -> Result<fs::Metadata, SyncError> {
    fs::metadata(path).map_err(SyncError::from_io)
}

fn stat_opt(path: &Path) -> Result<Option<fs::Metadata>, SyncError> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Create a directory or a file with contents. The parent must already be a
/// directory and the target must not exist.
pub fn create(cfg: &SyncConfig, event: &FileEvent) -> Result<(), SyncError> {
    let target = cfg.abs(&event.path);
    let parent = target.parent().ok_or(SyncError::InvalidDest)?;
    if !stat(parent)?.is_dir() {
        return Err(SyncError::InvalidDest);
    }
    if stat_opt(&target)?.is_some() {
        return Err(SyncError::AlreadyExists);
    }
    if event.is_dir {
        fs::create_dir(&target)?;
    } else {
        fs::write(&target, &event.data)?;
    }
    Ok(())
}

/// Replace a file's contents, creating it if missing. Directories are never
/// a valid target.
pub fn write(cfg: &SyncConfig, event: &FileEvent) -> Result<(), SyncError> {
    let target = cfg.abs(&event.path);
    if let Some(meta) = stat_opt(&target)? {
        if meta.is_dir() {
            return Err(SyncError::Malformed);
        }
    }
    fs::write(&target, &event.data)?;
    Ok(())
}

/// Rename preconditions, shared by both hubs. Checks only; no mutation.
pub fn check_rename(cfg: &SyncConfig, event: &FileEvent) -> Result<(), SyncError> {
    if event.new_path.is_empty() {
        return Err(SyncError::EmptyPath);
    }
    let from = clean(&event.path);
    let to = clean(&event.new_path);
    // A destination inside the source subtree would move a directory into
    // itself.
    if to != from && Path::new(&to).starts_with(&from) {
        return Err(SyncError::InvalidDest);
    }
    let source = cfg.abs(&event.path);
    let meta = stat(&source)?;
    if meta.is_dir() != event.is_dir {
        return Err(SyncError::Malformed);
    }
    let dest = cfg.abs(&event.new_path);
    let dest_parent = dest.parent().ok_or(SyncError::InvalidDest)?;
    if !stat(dest_parent)?.is_dir() {
        return Err(SyncError::InvalidDest);
    }
    if stat_opt(&dest)?.is_some() {
        return Err(SyncError::AlreadyExists);
    }
    Ok(())
}

/// Validated rename.
pub fn rename(cfg: &SyncConfig, event: &FileEvent) -> Result<(), SyncError> {
    check_rename(cfg, event)?;
    fs::rename(cfg.abs(&event.path), cfg.abs(&event.new_path))?;
    Ok(())
}

/// Recursive delete; success when the path is already gone.
pub fn remove_all(cfg: &SyncConfig, path: &str) -> Result<(), SyncError> {
    let target = cfg.abs(path);
    match stat_opt(&target)? {
        None => Ok(()),
        Some(meta) if meta.is_dir() => Ok(fs::remove_dir_all(&target)?),
        Some(_) => Ok(fs::remove_file(&target)?),
    }
}

/// Make sure `path` is a directory: create it if missing, and if a regular
/// file squats on the name, delete it and recreate the directory.
pub fn ensure_dir(path: &Path) -> Result<(), SyncError> {
    match stat_opt(path)? {
        None => Ok(fs::create_dir(path)?),
        Some(meta) if meta.is_dir() => Ok(()),
        Some(_) => {
            fs::remove_file(path)?;
            Ok(fs::create_dir(path)?)
        }
    }
}

/// Bootstrap the storage tree at startup.
pub fn make_storage(cfg: &SyncConfig) -> Result<(), SyncError> {
    ensure_dir(&cfg.storage_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Op;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, SyncConfig) {
        let tmp = TempDir::new().unwrap();
        let cfg = SyncConfig::new(tmp.path());
        fs::create_dir(cfg.storage_dir()).unwrap();
        (tmp, cfg)
    }

    #[test]
    fn clean_resolves_lexically() {
        assert_eq!(clean("storage//dir-1/./file.txt"), "storage/dir-1/file.txt");
        assert_eq!(clean("storage/../etc/passwd"), "etc/passwd");
        assert_eq!(clean("storage/dir-1/.."), "storage");
        assert_eq!(clean("./storage"), "storage");
        assert_eq!(clean(""), ".");
    }

    #[test]
    fn validate_requires_storage_prefix() {
        let cfg = SyncConfig::default();
        assert!(validate_path(&cfg, "storage/dir-1/file.txt").is_ok());
        assert!(matches!(
            validate_path(&cfg, ""),
            Err(SyncError::EmptyPath)
        ));
        assert!(matches!(
            validate_path(&cfg, "elsewhere/file.txt"),
            Err(SyncError::InvalidPath)
        ));
        assert!(matches!(
            validate_path(&cfg, "storage/../elsewhere"),
            Err(SyncError::InvalidPath)
        ));
    }

    #[test]
    fn create_checks_parent_and_target() {
        let (_tmp, cfg) = scratch();
        fs::write(cfg.abs("storage/file-1.txt"), b"x").unwrap();

        // parent is a file
        let event = FileEvent {
            path: "storage/file-1.txt/nested.txt".into(),
            op: Op::Create,
            ..Default::default()
        };
        assert!(matches!(create(&cfg, &event), Err(SyncError::InvalidDest)));

        // parent missing
        let event = FileEvent {
            path: "storage/missing/nested.txt".into(),
            op: Op::Create,
            ..Default::default()
        };
        assert!(matches!(create(&cfg, &event), Err(SyncError::NotExist)));

        // target exists
        let event = FileEvent {
            path: "storage/file-1.txt".into(),
            op: Op::Create,
            ..Default::default()
        };
        assert!(matches!(
            create(&cfg, &event),
            Err(SyncError::AlreadyExists)
        ));

        let event = FileEvent::create_dir("storage/dir-1".into());
        create(&cfg, &event).unwrap();
        assert!(cfg.abs("storage/dir-1").is_dir());
    }

    #[test]
    fn write_rejects_directories_and_creates_missing_files() {
        let (_tmp, cfg) = scratch();
        fs::create_dir(cfg.abs("storage/dir-1")).unwrap();

        let event = FileEvent::write("storage/dir-1".into(), b"data".to_vec(), String::new());
        assert!(matches!(write(&cfg, &event), Err(SyncError::Malformed)));

        let event = FileEvent::write("storage/new.txt".into(), b"data".to_vec(), String::new());
        write(&cfg, &event).unwrap();
        assert_eq!(fs::read(cfg.abs("storage/new.txt")).unwrap(), b"data");
    }

    #[test]
    fn rename_precondition_ladder() {
        let (_tmp, cfg) = scratch();
        fs::create_dir_all(cfg.abs("storage/dir-3/subdir-3")).unwrap();
        fs::write(cfg.abs("storage/file-1.txt"), b"x").unwrap();

        let event = FileEvent::rename("storage/file-1.txt".into(), String::new(), false);
        assert!(matches!(
            check_rename(&cfg, &event),
            Err(SyncError::EmptyPath)
        ));

        // moving a directory into its own subtree
        let event = FileEvent::rename(
            "storage/dir-3".into(),
            "storage/dir-3/subdir-3/dir-3".into(),
            true,
        );
        assert!(matches!(
            check_rename(&cfg, &event),
            Err(SyncError::InvalidDest)
        ));

        // type mismatch
        let event = FileEvent::rename("storage/dir-3".into(), "storage/moved".into(), false);
        assert!(matches!(
            check_rename(&cfg, &event),
            Err(SyncError::Malformed)
        ));

        // destination parent is a file
        let event = FileEvent::rename(
            "storage/file-1.txt".into(),
            "storage/file-1.txt/inner".into(),
            false,
        );
        assert!(matches!(
            check_rename(&cfg, &event),
            Err(SyncError::InvalidDest)
        ));

        // destination occupied
        fs::write(cfg.abs("storage/taken.txt"), b"y").unwrap();
        let event = FileEvent::rename("storage/file-1.txt".into(), "storage/taken.txt".into(), false);
        assert!(matches!(
            check_rename(&cfg, &event),
            Err(SyncError::AlreadyExists)
        ));

        // missing source
        let event = FileEvent::rename("storage/ghost.txt".into(), "storage/ok.txt".into(), false);
        assert!(matches!(
            check_rename(&cfg, &event),
            Err(SyncError::NotExist)
        ));

        let event = FileEvent::rename("storage/file-1.txt".into(), "storage/moved.txt".into(), false);
        rename(&cfg, &event).unwrap();
        assert!(cfg.abs("storage/moved.txt").is_file());
    }

    #[test]
    fn remove_is_idempotent() {
        let (_tmp, cfg) = scratch();
        fs::create_dir_all(cfg.abs("storage/dir-1/subdir-1")).unwrap();
        remove_all(&cfg, "storage/dir-1").unwrap();
        assert!(!cfg.abs("storage/dir-1").exists());
        remove_all(&cfg, "storage/dir-1").unwrap();
    }

    #[test]
    fn make_storage_self_repairs() {
        let tmp = TempDir::new().unwrap();
        let cfg = SyncConfig::new(tmp.path());

        make_storage(&cfg).unwrap();
        assert!(cfg.storage_dir().is_dir());

        // already a directory: no-op
        make_storage(&cfg).unwrap();

        // a file squatting on the name is replaced
        fs::remove_dir(cfg.storage_dir()).unwrap();
        fs::write(cfg.storage_dir(), b"not a dir").unwrap();
        make_storage(&cfg).unwrap();
        assert!(cfg.storage_dir().is_dir());
    }
}
