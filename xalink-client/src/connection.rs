//! The remote-connection capability consumed by the XA query backends.
//!
//! The connection's lifetime is managed by the caller: the client holds a
//! shared handle, never closes the underlying link, and requires only two
//! capabilities of it — issuing an XA verb and setting a named session
//! variable on the remote side.

use async_trait::async_trait;

use xalink_core::{Result, XaVerb, Xid};

/// Name of the remote session variable holding the minimum transaction
/// timeout, in microseconds.
pub const TRX_TIMEOUT_VARIABLE: &str = "trx_timeout";

/// A physical link to a remote database able to carry XA verbs.
///
/// Implementations wrap the transport for one remote session. Blocking on
/// network I/O happens entirely inside these methods; the caller holds no
/// local timeout or cancellation over them.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Executes one XA verb on the remote resource manager.
    ///
    /// Returns the XA status code reported by the remote side (for example
    /// `XA_OK` or `XA_RDONLY`). Transport failures are reported as errors;
    /// protocol-level refusals are reported through the status code.
    async fn xa_verb(&self, verb: XaVerb, xid: &Xid, flags: i64) -> Result<i32>;

    /// Sets a named integer session variable on the remote session.
    async fn set_session_variable(&self, name: &str, value: i64) -> Result<()>;
}
