//! Process-wide constants and the injectable sync configuration.
//!
//! Everything that the Go-era code kept as package globals (the storage
//! prefix, timestamp layouts, buffer sizes) lives here so tests can inject a
//! scratch root instead of changing the working directory.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Index timestamp layout: `2006-01-02 15:04:05.999999999 -0700 MST`.
///
/// The trailing zone name is skipped on parse, so stamps written by other
/// peers round-trip regardless of their local zone.
pub const TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.9f %z %Z";

/// Timestamp prefix for quarantined entries, e.g. `Oct 22, 2025 14:32:45`.
pub const BACKUP_TIME_LAYOUT: &str = "%b %-d, %Y %H:%M:%S";

/// Separator between the quarantine timestamp and the original base name.
pub const BACKUP_SEP: &str = "_";

/// Capacity of every outbound message channel (registry and per-peer).
pub const BUFFER_SIZE: usize = 32;

/// Default connection cap on the relay server.
pub const DEFAULT_MAX_CONNS: usize = 4;

/// Debounce window for ordinary raw events.
pub const WAIT_FOR_MS: u64 = 150;

/// Debounce window for rename halves, which need time to pair up.
pub const SLOW_WAIT_MS: u64 = 250;

/// Default WebSocket endpoint path on the relay.
pub const WS_PATH: &str = "/ws";

/// Default relay URL for clients.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8080/ws";

/// Where the synchronized tree and the quarantine live, and under which
/// directory the wire-relative paths resolve.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory that wire paths are resolved against.
    pub root: PathBuf,
    /// First path segment of every valid event path.
    pub storage: String,
    /// Client-side quarantine directory name.
    pub backup: String,
}

impl SyncConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            storage: "storage".to_string(),
            backup: "backup".to_string(),
        }
    }

    /// Resolve a wire-relative path against the root.
    pub fn abs(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }

    /// Absolute path of the storage tree.
    pub fn storage_dir(&self) -> PathBuf {
        self.root.join(&self.storage)
    }

    /// Absolute path of the quarantine directory.
    pub fn backup_dir(&self) -> PathBuf {
        self.root.join(&self.backup)
    }

    /// Turn an absolute path back into its wire-relative form, with `/`
    /// separators regardless of platform.
    pub fn rel(&self, path: &Path) -> Option<String> {
        let stripped = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<_> = stripped
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if segments.is_empty() {
            return None;
        }
        Some(segments.join("/"))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Current time in the index layout.
pub fn format_now() -> String {
    format_stamp(Utc::now())
}

pub fn format_stamp(t: DateTime<Utc>) -> String {
    t.format(TIME_LAYOUT).to_string()
}

/// Parse an index timestamp back to UTC.
pub fn parse_stamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_str(s, TIME_LAYOUT).map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_round_trips() {
        let now = Utc::now();
        let formatted = format_stamp(now);
        let parsed = parse_stamp(&formatted).unwrap();
        assert_eq!(parsed, now);
    }

    #[test]
    fn parses_foreign_zone_names() {
        let parsed = parse_stamp("2125-10-22 14:32:45.123456789 -0400 EDT").unwrap();
        assert_eq!(format_stamp(parsed), "2125-10-22 18:32:45.123456789 +0000 UTC");
    }

    #[test]
    fn rel_uses_forward_slashes() {
        let cfg = SyncConfig::new("/tmp/scratch");
        let rel = cfg.rel(Path::new("/tmp/scratch/storage/dir-1/file.txt"));
        assert_eq!(rel.as_deref(), Some("storage/dir-1/file.txt"));
        assert!(cfg.rel(Path::new("/elsewhere/storage")).is_none());
    }
}
