//! Error types for mlvault
//!
//! Not-found conditions on reads are usually reported as `Ok(None)`; the
//! variants below are raised where a value is required or a call is invalid.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// mlvault error types
#[derive(Error, Debug)]
pub enum Error {
    /// Object, record or collection does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Tag is not present in the object's tag table
    #[error("Unknown tag '{tag}' for object '{name}'")]
    UnknownTag {
        /// Logical object name
        name: String,
        /// Requested tag
        tag: String,
    },

    /// Commit ref is not present in the object's commit list
    #[error("Unknown commit '{commit}' for object '{name}'")]
    UnknownCommit {
        /// Logical object name
        name: String,
        /// Requested commit ref
        commit: String,
    },

    /// Logging was attempted before a run was started
    #[error("No active run for experiment '{0}', call start() or use_run() first")]
    NoActiveRun(String),

    /// No registered backend accepts the object
    #[error("Unsupported object '{name}' of type {object_type}: no backend matches")]
    UnsupportedObject {
        /// Name the object was addressed by
        name: String,
        /// Runtime type descriptor of the object
        object_type: String,
    },

    /// Optional backend action is not provided by the handler
    #[error("Backend '{kind}' does not implement {action}")]
    NotImplemented {
        /// Handler kind
        kind: String,
        /// Action name (fit, predict, ...)
        action: &'static str,
    },

    /// Invalid argument passed by the caller
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Document or blob store failure
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// A shared buffer lock was poisoned by a panicking thread
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the not-found family (unknown name, tag or commit).
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::UnknownTag { .. } | Self::UnknownCommit { .. }
        )
    }
}
