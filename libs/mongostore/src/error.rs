//! Error types for session store operations.

use std::fmt;

use common::error::DatabaseError;
use thiserror::Error;

/// Backend operation that was running when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ListIndexes,
    CreateIndex,
    Find,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::ListIndexes => "listing indexes",
            Phase::CreateIndex => "creating index",
            Phase::Find => "finding session",
            Phase::Insert => "inserting session",
            Phase::Update => "updating session",
            Phase::Delete => "deleting session",
        };
        f.write_str(name)
    }
}

/// Failures of the identity codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No key on the rotation list could verify the value.
    #[error("cookie value could not be verified with any key")]
    Unverified,

    /// The value verified but its contents are not `timestamp|id`.
    #[error("cookie value is malformed")]
    Malformed,

    /// The value verified but was issued too long ago.
    #[error("cookie value expired")]
    Expired,

    /// The codec has no keys to encode with.
    #[error("no keys configured")]
    NoKeys,
}

/// Error type for session store operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The store was given settings it cannot work with.
    #[error("invalid session store configuration: {0}")]
    Config(String),

    /// The expiry index could not be verified or created.
    #[error("adding time to live index: {0}")]
    Setup(#[source] Box<SessionError>),

    /// The session cookie failed authentication or decryption.
    #[error("decoding cookie `{name}`: {source}")]
    Decode {
        name: String,
        #[source]
        source: CodecError,
    },

    /// The session cookie could not be produced.
    #[error("encoding cookie `{name}`: {reason}")]
    Encode { name: String, reason: String },

    /// A backend call failed.
    #[error("{phase}: {source}")]
    Backend {
        phase: Phase,
        #[source]
        source: DatabaseError,
    },

    /// The identifier is not a valid backend key.
    #[error("malformed session id `{0}`")]
    MalformedId(String),

    /// The payload could not be mapped to or from its stored form.
    #[error("mapping session data: {0}")]
    Mapping(String),

    /// The caller cancelled the operation.
    #[error("{phase}: operation cancelled")]
    Cancelled { phase: Phase },

    /// The caller's deadline passed before the operation finished.
    #[error("{phase}: deadline exceeded")]
    DeadlineExceeded { phase: Phase },
}

impl SessionError {
    /// The backend phase this error belongs to, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            SessionError::Backend { phase, .. }
            | SessionError::Cancelled { phase }
            | SessionError::DeadlineExceeded { phase } => Some(*phase),
            SessionError::Setup(inner) => inner.phase(),
            _ => None,
        }
    }
}

/// Result type for session store operations.
pub type SessionResult<T> = Result<T, SessionError>;
