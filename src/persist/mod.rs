//! Durable on-disk state: `rale.state` (consensus) and `rale.db` (KV log).
//!
//! Both files are plain ASCII text, not a serialization format, so they are
//! hand-parsed rather than routed through `serde` — the corpus's convention
//! for wire/file grammars that are fixed by a spec rather than derived from
//! a Rust type (cf. the line protocols in `transport::frame`).

pub mod cluster_file;
mod kv_log;
mod state_file;

pub use kv_log::KvLog;
pub use state_file::{PersistentState, StateStore};
