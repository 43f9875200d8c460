//! Embeddable Raft-style consensus engine with a replicated key-value store
//! for a fixed 3–7 node cluster.
//!
//! The facade is [`engine::Engine`]: construct it from a [`config::Config`],
//! call `tick()` from a loop or a `tokio::time::interval`, and use `put`/
//! `get`/`delete` for the key-value surface. Everything else in this crate
//! is a collaborator the facade owns.

pub mod clock;
pub mod config;
pub mod consensus;
pub mod engine;
pub mod error;
pub mod kv;
pub mod mailbox;
pub mod membership;
pub mod persist;
pub mod shutdown;
pub mod transport;

pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
