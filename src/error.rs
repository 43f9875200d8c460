//! The crate-wide error type.
//!
//! Every public operation on [`crate::engine::Engine`] and its collaborators
//! returns a [`Result`] over this enum so embedders can match on the kind
//! instead of parsing a message. Transport-level failures are logged and
//! swallowed at the point of occurrence (see `transport`), so most of these
//! variants only ever reach a caller from `init`/`put`/`get`/`delete`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("engine not initialized")]
    NotInitialized,

    #[error("engine already initialized")]
    AlreadyInitialized,

    #[error("network initialization failed: {0}")]
    NetworkInit(String),

    #[error("socket operation failed: {0}")]
    SocketOp(String),

    #[error("message exceeds the 1024-byte frame budget")]
    MessageTooLarge,

    #[error("node id {0} is out of range [1, 1000]")]
    InvalidNodeId(i32),

    #[error("membership table is at capacity")]
    CapacityExceeded,

    #[error("peer {0} already exists")]
    AlreadyExists(i32),

    #[error("not found")]
    NotFound,

    #[error("no leader is currently known")]
    NoLeader,

    #[error("failed to persist state: {0}")]
    PersistError(String),

    #[error("persistent state file is corrupt")]
    Corrupt,

    #[error("key or value exceeds its size limit")]
    Oversize,

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("engine is shutting down")]
    ShuttingDown,
}
