//! driftsync - directory synchronization between peers through a central relay.
//!
//! A designated `storage/` subtree is watched on every client; filesystem
//! notifications are debounced into semantic [`event::FileEvent`]s and shipped
//! over a WebSocket to the relay server, which applies them to its own
//! canonical tree plus a SQLite file index and fans them out to the other
//! connected peers. Conflicts resolve whole-file, last-writer-wins; a
//! reconciliation walk quarantines losing local state under `backup/`.

pub mod b64;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod fsops;
pub mod hash;
pub mod hub;
pub mod index;
pub mod relay;
pub mod tree;
pub mod watch;
