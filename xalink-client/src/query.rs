//! XA query backends for the two supported remote driver kinds.
//!
//! A backend issues the XA verbs for one transaction branch over one remote
//! connection. The [`DriverKind`] chosen at client initialization selects
//! which backend is constructed when the branch opens:
//!
//! - [`NativeXaBackend`] for links to the same database family, which speak
//!   X/Open flag words natively and honor a session-level transaction
//!   timeout.
//! - [`CallInterfaceXaBackend`] for foreign relational databases reached
//!   through a vendor call interface, which uses its own flag encoding and
//!   manages timeouts on its own side.

use std::sync::Arc;

use async_trait::async_trait;

use xalink_core::xa::{self, XA_OK, XA_RDONLY};
use xalink_core::{Result, XaLinkError, XaVerb, Xid};

use crate::connection::{RemoteConnection, TRX_TIMEOUT_VARIABLE};

/// The kind of driver used to reach the remote database.
///
/// This is a closed set; adding a remote database family means adding a
/// variant here together with its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// A link to a database of the same family, speaking the native protocol.
    Native,
    /// A foreign relational database reached through a vendor call interface.
    CallInterface,
}

/// The outcome of an XA prepare verb.
///
/// A read-only vote is not a failure: the branch made no durable change and
/// needs neither commit nor rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// The branch voted to commit.
    Prepared,
    /// The branch reported no durable work.
    ReadOnly,
}

/// The XA verb capability issued against one remote transaction branch.
#[async_trait]
pub trait RemoteXaBackend: Send + Sync {
    /// Opens the transaction branch on the remote resource manager.
    async fn xa_start(&mut self, xid: &Xid, flags: i64) -> Result<()>;

    /// Dissociates the session from the transaction branch.
    async fn xa_end(&mut self, xid: &Xid, flags: i64) -> Result<()>;

    /// Runs the first phase of two-phase commit.
    async fn xa_prepare(&mut self, xid: &Xid) -> Result<PrepareOutcome>;

    /// Commits the prepared branch.
    async fn xa_commit(&mut self, xid: &Xid, flags: i64) -> Result<()>;

    /// Rolls the branch back.
    async fn xa_rollback(&mut self, xid: &Xid) -> Result<()>;
}

/// Constructs the backend for `kind`, bound to `connection`.
///
/// Construction failure leaves nothing bound: a partially-configured backend
/// is dropped and the error is returned to the caller.
pub async fn build_backend(
    kind: DriverKind,
    connection: Arc<dyn RemoteConnection>,
    branch_timeout_us: i64,
) -> Result<Box<dyn RemoteXaBackend>> {
    match kind {
        DriverKind::Native => {
            let backend = NativeXaBackend::bind(connection, branch_timeout_us).await?;
            Ok(Box::new(backend))
        }
        DriverKind::CallInterface => Ok(Box::new(CallInterfaceXaBackend::bind(connection))),
    }
}

async fn issue(
    connection: &dyn RemoteConnection,
    verb: XaVerb,
    xid: &Xid,
    flags: i64,
) -> Result<()> {
    match connection.xa_verb(verb, xid, flags).await? {
        XA_OK => Ok(()),
        status => Err(XaLinkError::RemoteVerb { verb, status }),
    }
}

// ============================================================================
// Native backend
// ============================================================================

/// XA backend for links to the same database family.
pub struct NativeXaBackend {
    connection: Arc<dyn RemoteConnection>,
}

impl NativeXaBackend {
    /// Floor added to the branch timeout when configuring the remote session,
    /// so a short branch timeout cannot starve the remote transaction.
    const MIN_SESSION_TIMEOUT_US: i64 = 20_000_000;

    /// Binds a backend to `connection` and pushes the session-level
    /// transaction timeout to the remote side.
    pub async fn bind(connection: Arc<dyn RemoteConnection>, branch_timeout_us: i64) -> Result<Self> {
        let timeout_us = branch_timeout_us + Self::MIN_SESSION_TIMEOUT_US;
        connection
            .set_session_variable(TRX_TIMEOUT_VARIABLE, timeout_us)
            .await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl RemoteXaBackend for NativeXaBackend {
    async fn xa_start(&mut self, xid: &Xid, flags: i64) -> Result<()> {
        issue(self.connection.as_ref(), XaVerb::Start, xid, flags).await
    }

    async fn xa_end(&mut self, xid: &Xid, flags: i64) -> Result<()> {
        issue(self.connection.as_ref(), XaVerb::End, xid, flags).await
    }

    async fn xa_prepare(&mut self, xid: &Xid) -> Result<PrepareOutcome> {
        match self
            .connection
            .xa_verb(XaVerb::Prepare, xid, xa::XA_TMNOFLAGS)
            .await?
        {
            XA_OK => Ok(PrepareOutcome::Prepared),
            XA_RDONLY => Ok(PrepareOutcome::ReadOnly),
            status => Err(XaLinkError::RemoteVerb {
                verb: XaVerb::Prepare,
                status,
            }),
        }
    }

    async fn xa_commit(&mut self, xid: &Xid, flags: i64) -> Result<()> {
        issue(self.connection.as_ref(), XaVerb::Commit, xid, flags).await
    }

    async fn xa_rollback(&mut self, xid: &Xid) -> Result<()> {
        issue(self.connection.as_ref(), XaVerb::Rollback, xid, xa::XA_TMNOFLAGS).await
    }
}

// ============================================================================
// Call-interface backend
// ============================================================================

// Flag words understood by the vendor call interface. Only the words this
// client actually issues have a mapping.
const CI_TMNOFLAGS: i64 = 0x0000_0000;
const CI_TMSUCCESS: i64 = 0x0000_0002;
const CI_TMFAIL: i64 = 0x0000_0004;

/// XA backend for foreign databases reached through a vendor call interface.
///
/// Unlike the native backend there is no session-timeout configuration step;
/// the call interface enforces its own timeouts.
pub struct CallInterfaceXaBackend {
    connection: Arc<dyn RemoteConnection>,
}

impl CallInterfaceXaBackend {
    /// Binds a backend to `connection`.
    pub fn bind(connection: Arc<dyn RemoteConnection>) -> Self {
        Self { connection }
    }

    /// Translates an X/Open flag word into the call interface's encoding.
    fn translate_flags(flags: i64) -> i64 {
        let mut out = CI_TMNOFLAGS;
        if flags & xa::XA_TMSUCCESS != 0 {
            out |= CI_TMSUCCESS;
        }
        if flags & xa::XA_TMFAIL != 0 {
            out |= CI_TMFAIL;
        }
        out
    }
}

#[async_trait]
impl RemoteXaBackend for CallInterfaceXaBackend {
    async fn xa_start(&mut self, xid: &Xid, flags: i64) -> Result<()> {
        let flags = Self::translate_flags(flags);
        issue(self.connection.as_ref(), XaVerb::Start, xid, flags).await
    }

    async fn xa_end(&mut self, xid: &Xid, flags: i64) -> Result<()> {
        let flags = Self::translate_flags(flags);
        issue(self.connection.as_ref(), XaVerb::End, xid, flags).await
    }

    async fn xa_prepare(&mut self, xid: &Xid) -> Result<PrepareOutcome> {
        match self
            .connection
            .xa_verb(XaVerb::Prepare, xid, CI_TMNOFLAGS)
            .await?
        {
            XA_OK => Ok(PrepareOutcome::Prepared),
            XA_RDONLY => Ok(PrepareOutcome::ReadOnly),
            status => Err(XaLinkError::RemoteVerb {
                verb: XaVerb::Prepare,
                status,
            }),
        }
    }

    async fn xa_commit(&mut self, xid: &Xid, flags: i64) -> Result<()> {
        let flags = Self::translate_flags(flags);
        issue(self.connection.as_ref(), XaVerb::Commit, xid, flags).await
    }

    async fn xa_rollback(&mut self, xid: &Xid) -> Result<()> {
        issue(self.connection.as_ref(), XaVerb::Rollback, xid, CI_TMNOFLAGS).await
    }
}
