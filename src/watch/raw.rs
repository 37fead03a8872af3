//! Raw notification events, one step above the OS watcher.
//!
//! `notify` reports platform events with varying rename granularity; this
//! module flattens them into `(path, op mask, renamed_from)` records. Rename
//! halves are paired through the watcher's tracker id, so the create-half of
//! a pair carries the source path the way the debouncer expects.

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::Event;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Bit set of raw operation flags observed for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpMask(u8);

impl OpMask {
    pub const CREATE: OpMask = OpMask(1 << 0);
    pub const WRITE: OpMask = OpMask(1 << 1);
    pub const REMOVE: OpMask = OpMask(1 << 2);
    pub const RENAME: OpMask = OpMask(1 << 3);

    pub fn has(self, other: OpMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for OpMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (bit, name) in [
            (OpMask::CREATE, "CREATE"),
            (OpMask::WRITE, "WRITE"),
            (OpMask::REMOVE, "REMOVE"),
            (OpMask::RENAME, "RENAME"),
        ] {
            if self.has(bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// One raw notification for one path.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub path: PathBuf,
    pub mask: OpMask,
    /// Source path when this is the create-half of a rename pair.
    pub renamed_from: Option<PathBuf>,
}

impl RawEvent {
    fn new(path: PathBuf, mask: OpMask) -> Self {
        Self {
            path,
            mask,
            renamed_from: None,
        }
    }

    /// Debounce key: one slot per `(path, op)` pair.
    pub fn key(&self) -> String {
        format!("{}{}", self.path.display(), self.mask)
    }
}

/// Pairs the two halves of a rename by the watcher's tracker id.
#[derive(Debug, Default)]
pub struct RenameTracker {
    pending: HashMap<usize, PathBuf>,
}

impl RenameTracker {
    fn record(&mut self, event: &Event, from: &PathBuf) {
        if let Some(id) = event.attrs.tracker() {
            self.pending.insert(id, from.clone());
        }
    }

    fn take(&mut self, event: &Event) -> Option<PathBuf> {
        event.attrs.tracker().and_then(|id| self.pending.remove(&id))
    }
}

/// Flatten one watcher event into raw records, pairing rename halves.
pub fn translate(event: &Event, tracker: &mut RenameTracker) -> Vec<RawEvent> {
    let mut out = Vec::new();
    match &event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                out.push(RawEvent::new(path.clone(), OpMask::CREATE));
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                out.push(RawEvent::new(path.clone(), OpMask::REMOVE));
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => {
                if let Some(path) = event.paths.first() {
                    tracker.record(event, path);
                    out.push(RawEvent::new(path.clone(), OpMask::RENAME));
                }
            }
            RenameMode::To => {
                if let Some(path) = event.paths.first() {
                    let mut raw = RawEvent::new(path.clone(), OpMask::CREATE);
                    raw.renamed_from = tracker.take(event);
                    out.push(raw);
                }
            }
            RenameMode::Both => {
                if let [from, to] = event.paths.as_slice() {
                    out.push(RawEvent::new(from.clone(), OpMask::RENAME));
                    let mut raw = RawEvent::new(to.clone(), OpMask::CREATE);
                    raw.renamed_from = Some(from.clone());
                    out.push(raw);
                }
            }
            RenameMode::Any | RenameMode::Other => {
                // The platform could not tell which half this is; probe.
                for path in &event.paths {
                    if path.exists() {
                        out.push(RawEvent::new(path.clone(), OpMask::CREATE));
                    } else {
                        out.push(RawEvent::new(path.clone(), OpMask::REMOVE));
                    }
                }
            }
        },
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Other) => {
            for path in &event.paths {
                out.push(RawEvent::new(path.clone(), OpMask::WRITE));
            }
        }
        // Metadata-only changes and access events carry nothing we sync.
        _ => {}
    }
    out
}
