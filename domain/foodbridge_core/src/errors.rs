//! Error types for the domain core.

use thiserror::Error;

use crate::types::{PostingStatus, Role};

/// Why a transition or validation was refused. Nothing was written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("cannot {event} a posting that is {from}")]
    InvalidTransition {
        from: PostingStatus,
        event: &'static str,
    },

    #[error("a {role} cannot {event}")]
    RoleNotAllowed { role: Role, event: &'static str },

    #[error("user is not a party to this posting")]
    NotAParty,

    #[error("volunteer has not expressed interest in this posting")]
    NotInterested,

    #[error("pickup has already been verified")]
    AlreadyPickedUp,

    #[error("food has not been picked up yet")]
    NotPickedUp,

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("this posting has already been rated by the user")]
    AlreadyRated,

    #[error("invalid pincode: {0}")]
    InvalidPincode(String),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("photo verification failed: {feedback}")]
    VerificationFailed { feedback: String },

    #[error("photo verification is unavailable, try again later")]
    VerificationUnavailable,
}

/// Repository failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// The stored version moved since the caller read the record.
    #[error("version conflict on {id}: expected {expected}, found {found}")]
    Conflict { id: String, expected: u64, found: u64 },

    #[error("record already exists: {0}")]
    Duplicate(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// External oracle failures (network, decoding, missing configuration).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("oracle is not configured")]
    Unavailable,

    #[error("oracle request failed: {0}")]
    Request(String),

    #[error("oracle response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Rejected(#[from] RejectReason),

    #[error("posting {0} not found")]
    PostingNotFound(String),

    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("notification {0} not found")]
    NotificationNotFound(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, Error>;
