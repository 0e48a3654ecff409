//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// Parse and process errors inside a session's private loop are contained
/// to that session; nothing here is allowed to take down sibling sessions
/// or another camera's ingestion loop.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to spawn transcoder '{program}': {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transcoder exited unexpectedly with code {code:?}")]
    ProcessExit { code: Option<i32> },

    #[error("no capture source available: {0}")]
    SourceMisconfigured(String),

    #[error("invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("container parse error: {0}")]
    Parse(#[from] fmp4::Fmp4Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn source_misconfigured(msg: impl Into<String>) -> Self {
        Self::SourceMisconfigured(msg.into())
    }
}
