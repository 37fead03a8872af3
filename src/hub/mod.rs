//! Event application with per-side authority.
//!
//! Both sides apply the same [`crate::event::FileEvent`]s but with different
//! side effects: the client trusts the server and only touches its tree; the
//! server also keeps the file index consistent. The two share the guard and
//! filesystem primitives in [`crate::fsops`], never code by inheritance.

mod client;
mod server;

pub use client::ClientHub;
pub use server::ServerHub;

use crate::error::EventError;
use crate::event::FileEvent;
use async_trait::async_trait;

/// Apply one event with this side's authority. An update request may be
/// mutated in place to carry the authoritative copy back.
#[async_trait]
pub trait Hub: Send + Sync {
    async fn process(&self, event: &mut FileEvent) -> Result<(), EventError>;
}
