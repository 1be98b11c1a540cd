//! Per-branch XA client state machine for one remote database link.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use xalink_core::xa;
use xalink_core::{BranchState, Result, XaLinkError, Xid};

use crate::connection::RemoteConnection;
use crate::query::{build_backend, DriverKind, PrepareOutcome, RemoteXaBackend};

/// One participant of a distributed transaction, bound to one remote
/// connection for the lifetime of a single XA branch.
///
/// The global coordinator invokes the five `rm_xa_*` operations in two-phase
/// order across all participants: start, work, end, prepare on every
/// participant, then commit everywhere or rollback everywhere. The client
/// enforces per-branch state invariants and issues each remote verb at most
/// once per transition; it never retries, and it never decides the global
/// outcome.
///
/// Every operation serializes on one internal lock held for its full body,
/// so concurrent calls on the same client observe linear state progression
/// and resolve through the idempotent no-op rules rather than a torn state.
pub struct DbLinkClient {
    inner: Mutex<ClientInner>,
}

/// Immutable per-branch configuration, present once `init` has run.
struct Setup {
    index: u32,
    driver_kind: DriverKind,
    branch_timeout_us: i64,
    connection: Arc<dyn RemoteConnection>,
}

struct ClientInner {
    setup: Option<Setup>,
    state: BranchState,
    xid: Option<Xid>,
    backend: Option<Box<dyn RemoteXaBackend>>,
}

fn unexpected(operation: &'static str, state: BranchState) -> XaLinkError {
    XaLinkError::UnexpectedState { operation, state }
}

impl DbLinkClient {
    /// Creates an uninitialized client. [`init`](Self::init) must run before
    /// any other operation.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ClientInner {
                setup: None,
                state: BranchState::Idle,
                xid: None,
                backend: None,
            }),
        }
    }

    /// Binds the client to one link slot and one remote connection.
    ///
    /// `index` identifies the link slot within the enclosing transaction and
    /// must be non-zero; `branch_timeout_us` must be non-negative. Fails with
    /// [`XaLinkError::AlreadyInitialized`] if called twice without an
    /// intervening [`reset`](Self::reset).
    pub async fn init(
        &self,
        index: u32,
        driver_kind: DriverKind,
        branch_timeout_us: i64,
        connection: Arc<dyn RemoteConnection>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.setup.is_some() {
            warn!(index, "init on an already-initialized database link client");
            return Err(XaLinkError::AlreadyInitialized);
        }
        if index == 0 {
            return Err(XaLinkError::InvalidArgument(
                "link index must be non-zero".to_string(),
            ));
        }
        if branch_timeout_us < 0 {
            return Err(XaLinkError::InvalidArgument(
                "branch timeout must be non-negative".to_string(),
            ));
        }
        inner.setup = Some(Setup {
            index,
            driver_kind,
            branch_timeout_us,
            connection,
        });
        info!(index, kind = ?driver_kind, "database link client initialized");
        Ok(())
    }

    /// Opens the transaction branch `xid` on the remote resource manager.
    ///
    /// On the first call from `Idle` this lazily constructs the query backend
    /// for the configured driver kind, pushes the session transaction timeout
    /// for the native driver, and issues the remote start verb. Retrying with
    /// the same `xid` while the branch is open is a no-op; any other state is
    /// a protocol violation.
    ///
    /// On backend-construction or verb failure the state remains `Idle`, any
    /// partially-constructed backend is dropped, and the error is surfaced to
    /// the caller without retry.
    pub async fn rm_xa_start(&self, xid: &Xid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let setup = inner.setup.as_ref().ok_or(XaLinkError::NotInitialized)?;
        if !xid.is_valid() {
            return Err(XaLinkError::InvalidArgument(
                "malformed or empty xid".to_string(),
            ));
        }
        if inner.state != BranchState::Idle {
            // Retrying the same branch-open is a no-op; anything else is a
            // protocol violation by the coordinator.
            if inner.state == BranchState::Started && inner.xid.as_ref() == Some(xid) {
                return Ok(());
            }
            warn!(state = %inner.state, xid = %xid, "unexpected xa start");
            return Err(unexpected("rm_xa_start", inner.state));
        }

        let index = setup.index;
        let kind = setup.driver_kind;
        let branch_timeout_us = setup.branch_timeout_us;
        let connection = Arc::clone(&setup.connection);

        let mut backend = build_backend(kind, connection, branch_timeout_us)
            .await
            .map_err(|err| {
                warn!(index, xid = %xid, error = %err, "failed to construct query backend");
                err
            })?;
        backend.xa_start(xid, xa::XA_TMNOFLAGS).await.map_err(|err| {
            warn!(index, xid = %xid, error = %err, "xa start failed");
            err
        })?;

        inner.xid = Some(xid.clone());
        inner.backend = Some(backend);
        inner.state = BranchState::Started;
        info!(index, xid = %xid, "xa start for database link");
        Ok(())
    }

    /// Dissociates the remote session from the open branch.
    ///
    /// A no-op when the branch is already `Ended`. On verb failure the state
    /// remains `Started`; the caller may retry or escalate.
    pub async fn rm_xa_end(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.setup.is_none() {
            return Err(XaLinkError::NotInitialized);
        }
        Self::check_branch(&inner, "rm_xa_end")?;
        Self::xa_end_locked(&mut inner).await
    }

    /// Runs the first phase of two-phase commit on the branch.
    ///
    /// From `Started` the end transition is performed inline first. A
    /// read-only vote from the remote side is absorbed into
    /// `ReadOnlyPrepared` rather than surfaced as an error. On any other verb
    /// failure the state remains `Preparing`: the branch's remote outcome is
    /// unknown and the coordinator must resolve it before deciding globally.
    pub async fn rm_xa_prepare(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.setup.is_none() {
            return Err(XaLinkError::NotInitialized);
        }
        Self::check_branch(&inner, "rm_xa_prepare")?;
        if inner.state == BranchState::Started {
            Self::xa_end_locked(&mut inner).await?;
        }
        match inner.state {
            BranchState::Ended => {
                let Some(xid) = inner.xid.clone() else {
                    return Err(unexpected("rm_xa_prepare", inner.state));
                };
                inner.state = BranchState::Preparing;
                let backend = Self::backend_mut(&mut inner, "rm_xa_prepare")?;
                match backend.xa_prepare(&xid).await {
                    Ok(PrepareOutcome::Prepared) => {
                        inner.state = BranchState::Prepared;
                        info!(xid = %xid, "xa prepare for database link");
                        Ok(())
                    }
                    Ok(PrepareOutcome::ReadOnly) => {
                        inner.state = BranchState::ReadOnlyPrepared;
                        info!(xid = %xid, "xa prepare reported read-only branch");
                        Ok(())
                    }
                    Err(err) => {
                        // State deliberately stays Preparing: the remote
                        // outcome is unknown until resolved out of band.
                        warn!(xid = %xid, error = %err, "xa prepare failed, branch in doubt");
                        Err(err)
                    }
                }
            }
            BranchState::Prepared | BranchState::ReadOnlyPrepared => Ok(()),
            state => Err(unexpected("rm_xa_prepare", state)),
        }
    }

    /// Commits the prepared branch.
    ///
    /// Callable only once the coordinator has confirmed every participant of
    /// the global transaction prepared; this client does not verify that.
    /// A no-op from `Committed` and from `ReadOnlyPrepared` (a read-only
    /// branch has nothing to persist). On verb failure the state remains
    /// `Committing` with the outcome unresolved.
    pub async fn rm_xa_commit(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.setup.is_none() {
            return Err(XaLinkError::NotInitialized);
        }
        Self::check_branch(&inner, "rm_xa_commit")?;
        match inner.state {
            BranchState::Prepared => {
                let Some(xid) = inner.xid.clone() else {
                    return Err(unexpected("rm_xa_commit", inner.state));
                };
                inner.state = BranchState::Committing;
                let backend = Self::backend_mut(&mut inner, "rm_xa_commit")?;
                match backend.xa_commit(&xid, xa::XA_TMNOFLAGS).await {
                    Ok(()) => {
                        inner.state = BranchState::Committed;
                        info!(xid = %xid, "xa commit for database link");
                        Ok(())
                    }
                    Err(err) => {
                        warn!(xid = %xid, error = %err, "xa commit failed, branch in doubt");
                        Err(err)
                    }
                }
            }
            BranchState::Committed | BranchState::ReadOnlyPrepared => Ok(()),
            state => Err(unexpected("rm_xa_commit", state)),
        }
    }

    /// Rolls the branch back.
    ///
    /// From `Started` the end transition is performed inline first. Rollback
    /// is accepted from `Ended`, `Prepared`, and `Preparing` (a failed
    /// prepare leaves the branch there). A no-op from `RolledBack` and
    /// `ReadOnlyPrepared`. On verb failure the state remains `RollingBack`.
    pub async fn rm_xa_rollback(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.setup.is_none() {
            return Err(XaLinkError::NotInitialized);
        }
        Self::check_branch(&inner, "rm_xa_rollback")?;
        if inner.state == BranchState::Started {
            Self::xa_end_locked(&mut inner).await?;
        }
        match inner.state {
            BranchState::Ended | BranchState::Prepared | BranchState::Preparing => {
                let Some(xid) = inner.xid.clone() else {
                    return Err(unexpected("rm_xa_rollback", inner.state));
                };
                inner.state = BranchState::RollingBack;
                let backend = Self::backend_mut(&mut inner, "rm_xa_rollback")?;
                match backend.xa_rollback(&xid).await {
                    Ok(()) => {
                        inner.state = BranchState::RolledBack;
                        info!(xid = %xid, "xa rollback for database link");
                        Ok(())
                    }
                    Err(err) => {
                        warn!(xid = %xid, error = %err, "xa rollback failed, branch in doubt");
                        Err(err)
                    }
                }
            }
            BranchState::RolledBack | BranchState::ReadOnlyPrepared => Ok(()),
            state => Err(unexpected("rm_xa_rollback", state)),
        }
    }

    /// Returns true if the branch is currently open.
    ///
    /// The `xid` argument is reserved for branch-identity verification; the
    /// current contract consults only the state and does not compare it.
    pub async fn is_started(&self, _xid: &Xid) -> bool {
        let inner = self.inner.lock().await;
        inner.state == BranchState::Started
    }

    /// Returns true if the client is bound to exactly this connection handle.
    ///
    /// Used by the coordinator to find the client serving a given physical
    /// link.
    pub async fn equal(&self, connection: &Arc<dyn RemoteConnection>) -> bool {
        let inner = self.inner.lock().await;
        inner
            .setup
            .as_ref()
            .map(|setup| Arc::ptr_eq(&setup.connection, connection))
            .unwrap_or(false)
    }

    /// Returns the client to `Idle`, dropping the backend and the stored xid
    /// and clearing the initialization, so the slot can serve a new branch.
    ///
    /// Safe to call from any state.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(setup) = inner.setup.take() {
            info!(index = setup.index, state = %inner.state, "database link client reset");
        }
        inner.xid = None;
        inner.backend = None;
        inner.state = BranchState::Idle;
    }

    /// Returns the current protocol state of the branch.
    pub async fn state(&self) -> BranchState {
        self.inner.lock().await.state
    }

    /// Returns the link slot index, or 0 if the client is uninitialized.
    pub async fn index(&self) -> u32 {
        let inner = self.inner.lock().await;
        inner.setup.as_ref().map(|setup| setup.index).unwrap_or(0)
    }

    /// Returns the configured driver kind, if initialized.
    pub async fn driver_kind(&self) -> Option<DriverKind> {
        let inner = self.inner.lock().await;
        inner.setup.as_ref().map(|setup| setup.driver_kind)
    }

    // Shared END sub-transition, also run implicitly by prepare and rollback
    // when the branch is still Started.
    async fn xa_end_locked(inner: &mut ClientInner) -> Result<()> {
        match inner.state {
            BranchState::Ended => Ok(()),
            BranchState::Started => {
                let Some(xid) = inner.xid.clone() else {
                    return Err(unexpected("rm_xa_end", inner.state));
                };
                let backend = Self::backend_mut(inner, "rm_xa_end")?;
                backend.xa_end(&xid, xa::XA_TMSUCCESS).await.map_err(|err| {
                    // State stays Started; the caller may retry or escalate.
                    warn!(xid = %xid, error = %err, "xa end failed");
                    err
                })?;
                inner.state = BranchState::Ended;
                info!(xid = %xid, "xa end for database link");
                Ok(())
            }
            state => Err(unexpected("rm_xa_end", state)),
        }
    }

    // A branch-scoped operation needs a valid stored xid and a live backend.
    fn check_branch(inner: &ClientInner, operation: &'static str) -> Result<()> {
        let xid_ok = inner.xid.as_ref().map(Xid::is_valid).unwrap_or(false);
        if !xid_ok || inner.backend.is_none() {
            return Err(unexpected(operation, inner.state));
        }
        Ok(())
    }

    fn backend_mut<'a>(
        inner: &'a mut ClientInner,
        operation: &'static str,
    ) -> Result<&'a mut Box<dyn RemoteXaBackend>> {
        let state = inner.state;
        inner
            .backend
            .as_mut()
            .ok_or_else(|| unexpected(operation, state))
    }
}

impl Default for DbLinkClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use xalink_core::XaVerb;

    use super::*;

    struct NullConnection;

    #[async_trait]
    impl RemoteConnection for NullConnection {
        async fn xa_verb(&self, _verb: XaVerb, _xid: &Xid, _flags: i64) -> Result<i32> {
            Ok(xa::XA_OK)
        }

        async fn set_session_variable(&self, _name: &str, _value: i64) -> Result<()> {
            Ok(())
        }
    }

    fn connection() -> Arc<dyn RemoteConnection> {
        Arc::new(NullConnection)
    }

    #[tokio::test]
    async fn test_init_rejects_zero_index() {
        let client = DbLinkClient::new();
        let err = client
            .init(0, DriverKind::Native, 1_000_000, connection())
            .await
            .unwrap_err();
        assert!(matches!(err, XaLinkError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_init_rejects_negative_timeout() {
        let client = DbLinkClient::new();
        let err = client
            .init(1, DriverKind::Native, -1, connection())
            .await
            .unwrap_err();
        assert!(matches!(err, XaLinkError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_init_twice_fails() {
        let client = DbLinkClient::new();
        client
            .init(1, DriverKind::Native, 1_000_000, connection())
            .await
            .unwrap();
        let err = client
            .init(2, DriverKind::CallInterface, 1_000_000, connection())
            .await
            .unwrap_err();
        assert!(matches!(err, XaLinkError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn test_operations_require_init() {
        let client = DbLinkClient::new();
        let xid = Xid::generate();
        assert!(matches!(
            client.rm_xa_start(&xid).await.unwrap_err(),
            XaLinkError::NotInitialized
        ));
        assert!(matches!(
            client.rm_xa_end().await.unwrap_err(),
            XaLinkError::NotInitialized
        ));
        assert!(matches!(
            client.rm_xa_prepare().await.unwrap_err(),
            XaLinkError::NotInitialized
        ));
        assert!(matches!(
            client.rm_xa_commit().await.unwrap_err(),
            XaLinkError::NotInitialized
        ));
        assert!(matches!(
            client.rm_xa_rollback().await.unwrap_err(),
            XaLinkError::NotInitialized
        ));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_xid() {
        let client = DbLinkClient::new();
        client
            .init(1, DriverKind::Native, 1_000_000, connection())
            .await
            .unwrap();
        let empty = Xid::new(0, b"", b"bqual");
        assert!(matches!(
            client.rm_xa_start(&empty).await.unwrap_err(),
            XaLinkError::InvalidArgument(_)
        ));
        assert_eq!(client.state().await, BranchState::Idle);
    }

    #[tokio::test]
    async fn test_accessors_after_init() {
        let client = DbLinkClient::new();
        assert_eq!(client.index().await, 0);
        assert_eq!(client.driver_kind().await, None);

        client
            .init(3, DriverKind::CallInterface, 1_000_000, connection())
            .await
            .unwrap();
        assert_eq!(client.index().await, 3);
        assert_eq!(client.driver_kind().await, Some(DriverKind::CallInterface));
        assert_eq!(client.state().await, BranchState::Idle);
    }

    #[tokio::test]
    async fn test_equal_compares_connection_identity() {
        let conn_a = connection();
        let conn_b = connection();
        let client = DbLinkClient::new();

        assert!(!client.equal(&conn_a).await);

        client
            .init(1, DriverKind::Native, 1_000_000, Arc::clone(&conn_a))
            .await
            .unwrap();
        assert!(client.equal(&conn_a).await);
        assert!(!client.equal(&conn_b).await);
    }
}
