//! XA two-phase-commit client for remote database links.
//!
//! This crate drives the XA resource-manager protocol against an external
//! database reached through a cross-database link. Each [`DbLinkClient`]
//! represents one participant of a distributed transaction, bound to one
//! remote connection for the lifetime of a single transaction branch.
//!
//! The client does not decide when a distributed transaction commits or
//! aborts; a global coordinator invokes the five XA operations in two-phase
//! order across all participants and resolves failures. Every remote verb is
//! issued exactly once per transition, with no internal retry.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use xalink_client::{DbLinkClient, DriverKind, Xid};
//!
//! let client = DbLinkClient::new();
//! client.init(1, DriverKind::Native, 30_000_000, connection).await?;
//!
//! let xid = Xid::generate();
//! client.rm_xa_start(&xid).await?;
//! // ... perform remote work through the connection ...
//! client.rm_xa_end().await?;
//! client.rm_xa_prepare().await?;
//!
//! // once every participant is prepared:
//! client.rm_xa_commit().await?;
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod connection;
pub mod query;

pub use client::DbLinkClient;
pub use connection::{RemoteConnection, TRX_TIMEOUT_VARIABLE};
pub use query::{CallInterfaceXaBackend, DriverKind, NativeXaBackend, PrepareOutcome, RemoteXaBackend};

pub use xalink_core::{BranchState, Result, XaLinkError, XaVerb, Xid};
