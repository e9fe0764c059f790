//! Error types for the gattc library
//!
//! Discovery-time failures travel through the state machine as
//! [`Status`](crate::att::Status) codes; this module covers the persistence
//! path, where an operation genuinely aborts.

use thiserror::Error;

/// Errors that can occur when saving or loading a server cache
#[derive(Error, Debug)]
pub enum Error {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported cache version: {0}")]
    CacheVersionMismatch(u16),

    #[error("corrupt cache file: {0}")]
    CacheCorrupt(String),
}
