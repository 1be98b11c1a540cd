//! Core vocabulary for XA transactions over remote database links.
//!
//! This crate holds the protocol-level types shared by every consumer of the
//! database-link transaction layer: the X/Open XA flag and status constants,
//! the [`Xid`] transaction-branch identifier, the [`BranchState`] protocol
//! state, and the [`XaLinkError`] error taxonomy.

#![warn(missing_docs)]

pub mod error;
pub mod xa;

pub use error::{Result, XaLinkError};
pub use xa::{BranchState, XaVerb, Xid};
