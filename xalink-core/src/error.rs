//! Error types for database-link XA operations.

use std::io;

use thiserror::Error;

use crate::xa::{BranchState, XaVerb};

/// The main error type for database-link XA operations.
#[derive(Debug, Error)]
pub enum XaLinkError {
    /// An operation was invoked before `init`.
    #[error("client not initialized")]
    NotInitialized,

    /// `init` was invoked on an already-initialized client.
    #[error("client already initialized")]
    AlreadyInitialized,

    /// A malformed xid, zero link index, or negative timeout.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was invoked from a state where it is neither a defined
    /// transition nor a defined no-op.
    #[error("{operation} not permitted in state {state}")]
    UnexpectedState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the client was observed in.
        state: BranchState,
    },

    /// A remote XA verb completed with a non-success status.
    #[error("remote {verb} failed with status {status}")]
    RemoteVerb {
        /// The verb that failed.
        verb: XaVerb,
        /// The XA status reported by the remote resource manager.
        status: i32,
    },

    /// Transport-level errors from the remote connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A specialized `Result` type for database-link XA operations.
pub type Result<T> = std::result::Result<T, XaLinkError>;
