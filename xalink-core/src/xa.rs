//! X/Open XA protocol vocabulary.
//!
//! Flag words and status codes follow the X/Open XA specification. Only the
//! subset actually exchanged with a remote resource manager is defined here.

use std::fmt;

use uuid::Uuid;

use crate::error::{Result, XaLinkError};

// ============================================================================
// XA Flags
// ============================================================================

/// No flags set.
pub const XA_TMNOFLAGS: i64 = 0x0000_0000;

/// Caller is joining an existing transaction branch.
pub const XA_TMJOIN: i64 = 0x0020_0000;

/// Caller is resuming association with a suspended transaction branch.
pub const XA_TMRESUME: i64 = 0x0800_0000;

/// Dissociate the caller from the transaction branch, work completed.
pub const XA_TMSUCCESS: i64 = 0x0400_0000;

/// Dissociate the caller from the transaction branch, work failed.
pub const XA_TMFAIL: i64 = 0x2000_0000;

/// Suspend (rather than end) the caller's association with the branch.
pub const XA_TMSUSPEND: i64 = 0x0200_0000;

// ============================================================================
// XA Status Codes
// ============================================================================

/// Normal execution.
pub const XA_OK: i32 = 0;

/// The branch was read-only and has already been completed.
pub const XA_RDONLY: i32 = 3;

/// The call returned with no effect and may be reissued.
pub const XA_RETRY: i32 = 4;

// ============================================================================
// XA Verbs
// ============================================================================

/// The five XA verbs a resource-manager client issues against a remote link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XaVerb {
    /// Open a transaction branch.
    Start,
    /// Dissociate from a transaction branch.
    End,
    /// First phase of two-phase commit.
    Prepare,
    /// Second phase, commit decision.
    Commit,
    /// Second phase, abort decision.
    Rollback,
}

impl XaVerb {
    /// Returns the verb's wire-level keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            XaVerb::Start => "xa start",
            XaVerb::End => "xa end",
            XaVerb::Prepare => "xa prepare",
            XaVerb::Commit => "xa commit",
            XaVerb::Rollback => "xa rollback",
        }
    }
}

impl fmt::Display for XaVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Transaction Branch Identifier
// ============================================================================

/// XA transaction-branch identifier following the X/Open XA specification.
///
/// An `Xid` identifies one branch of a global transaction. It is owned by the
/// transaction coordinator; participants store a copy for the lifetime of the
/// branch and compare it on retried calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    format_id: i32,
    global_transaction_id: Vec<u8>,
    branch_qualifier: Vec<u8>,
}

impl Xid {
    /// Maximum length for the global transaction ID.
    pub const MAX_GTRID_SIZE: usize = 64;
    /// Maximum length for the branch qualifier.
    pub const MAX_BQUAL_SIZE: usize = 64;

    /// Creates a transaction-branch identifier.
    ///
    /// No bounds are enforced here; an out-of-bounds identifier is reported
    /// by [`is_valid`](Self::is_valid) and rejected at the protocol boundary.
    pub fn new(format_id: i32, global_transaction_id: &[u8], branch_qualifier: &[u8]) -> Self {
        Self {
            format_id,
            global_transaction_id: global_transaction_id.to_vec(),
            branch_qualifier: branch_qualifier.to_vec(),
        }
    }

    /// Generates a random identifier with the default format (0).
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4();
        Self::new(0, uuid.as_bytes(), &[0u8; 8])
    }

    /// Returns the format identifier.
    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    /// Returns the global transaction identifier.
    pub fn global_transaction_id(&self) -> &[u8] {
        &self.global_transaction_id
    }

    /// Returns the branch qualifier.
    pub fn branch_qualifier(&self) -> &[u8] {
        &self.branch_qualifier
    }

    /// Returns true if the identifier is empty (no global transaction ID).
    pub fn is_empty(&self) -> bool {
        self.global_transaction_id.is_empty()
    }

    /// Returns true if the identifier is well-formed: a non-empty global
    /// transaction ID with both components within protocol bounds.
    pub fn is_valid(&self) -> bool {
        !self.global_transaction_id.is_empty()
            && self.global_transaction_id.len() <= Self::MAX_GTRID_SIZE
            && self.branch_qualifier.len() <= Self::MAX_BQUAL_SIZE
    }

    /// Serializes the identifier for wire transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            12 + self.global_transaction_id.len() + self.branch_qualifier.len(),
        );
        bytes.extend_from_slice(&self.format_id.to_le_bytes());
        bytes.extend_from_slice(&(self.global_transaction_id.len() as i32).to_le_bytes());
        bytes.extend_from_slice(&self.global_transaction_id);
        bytes.extend_from_slice(&(self.branch_qualifier.len() as i32).to_le_bytes());
        bytes.extend_from_slice(&self.branch_qualifier);
        bytes
    }

    /// Deserializes an identifier produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (format_id, rest) = read_i32(bytes)?;
        let (gtrid, rest) = read_field(rest)?;
        let (bqual, _) = read_field(rest)?;
        Ok(Self {
            format_id,
            global_transaction_id: gtrid.to_vec(),
            branch_qualifier: bqual.to_vec(),
        })
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.format_id)?;
        for b in &self.global_transaction_id {
            write!(f, "{:02x}", b)?;
        }
        f.write_str("-")?;
        for b in &self.branch_qualifier {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

fn read_i32(bytes: &[u8]) -> Result<(i32, &[u8])> {
    if bytes.len() < 4 {
        return Err(XaLinkError::InvalidArgument("xid data too short".to_string()));
    }
    let (head, rest) = bytes.split_at(4);
    Ok((i32::from_le_bytes([head[0], head[1], head[2], head[3]]), rest))
}

fn read_field(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, rest) = read_i32(bytes)?;
    let len = usize::try_from(len)
        .map_err(|_| XaLinkError::InvalidArgument("negative xid field length".to_string()))?;
    if rest.len() < len {
        return Err(XaLinkError::InvalidArgument("xid data too short".to_string()));
    }
    Ok(rest.split_at(len))
}

// ============================================================================
// Protocol State
// ============================================================================

/// Protocol state of one transaction branch on a database link.
///
/// `Committed`, `RolledBack`, and `ReadOnlyPrepared` are terminal for the
/// branch; `Preparing`, `Committing`, and `RollingBack` mark an in-flight
/// remote verb whose outcome is unknown after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    /// No branch is open.
    Idle,
    /// The branch is open and associated with the remote session.
    Started,
    /// The branch has been dissociated, ready to prepare.
    Ended,
    /// A prepare verb is in flight or failed with an unknown outcome.
    Preparing,
    /// The branch voted to commit.
    Prepared,
    /// The branch reported no durable work; nothing remains to commit.
    ReadOnlyPrepared,
    /// A commit verb is in flight or failed with an unknown outcome.
    Committing,
    /// The branch is committed.
    Committed,
    /// A rollback verb is in flight or failed with an unknown outcome.
    RollingBack,
    /// The branch is rolled back.
    RolledBack,
}

impl BranchState {
    /// Returns true if no further verb is expected for this branch.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Committed | Self::RolledBack | Self::ReadOnlyPrepared
        )
    }

    /// Returns true if a remote verb was issued whose outcome may be unknown.
    ///
    /// A branch left in one of these states after a failed verb must be
    /// resolved by the coordinator out of band; this layer never reverts the
    /// state or retries on its own.
    pub fn is_in_doubt(&self) -> bool {
        matches!(self, Self::Preparing | Self::Committing | Self::RollingBack)
    }
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Started => "started",
            Self::Ended => "ended",
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::ReadOnlyPrepared => "read-only prepared",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::RollingBack => "rolling back",
            Self::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xid_accessors() {
        let xid = Xid::new(42, b"global-txn-123", b"branch-001");
        assert_eq!(xid.format_id(), 42);
        assert_eq!(xid.global_transaction_id(), b"global-txn-123");
        assert_eq!(xid.branch_qualifier(), b"branch-001");
    }

    #[test]
    fn test_xid_generate_uniqueness() {
        let xid1 = Xid::generate();
        let xid2 = Xid::generate();
        assert_ne!(xid1.global_transaction_id(), xid2.global_transaction_id());
        assert!(xid1.is_valid());
    }

    #[test]
    fn test_xid_validity() {
        assert!(Xid::new(0, b"gtrid", b"bqual").is_valid());
        assert!(Xid::new(0, b"gtrid", b"").is_valid());

        let empty = Xid::new(0, b"", b"bqual");
        assert!(empty.is_empty());
        assert!(!empty.is_valid());

        let oversized_gtrid = vec![0u8; Xid::MAX_GTRID_SIZE + 1];
        assert!(!Xid::new(0, &oversized_gtrid, b"").is_valid());

        let oversized_bqual = vec![0u8; Xid::MAX_BQUAL_SIZE + 1];
        assert!(!Xid::new(0, b"gtrid", &oversized_bqual).is_valid());
    }

    #[test]
    fn test_xid_max_size_is_valid() {
        let gtrid = vec![0xABu8; Xid::MAX_GTRID_SIZE];
        let bqual = vec![0xCDu8; Xid::MAX_BQUAL_SIZE];
        assert!(Xid::new(0, &gtrid, &bqual).is_valid());
    }

    #[test]
    fn test_xid_serialization_roundtrip() {
        let original = Xid::new(123, b"my-global-txn-id", b"my-branch");
        let restored = Xid::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_xid_from_bytes_too_short() {
        assert!(Xid::from_bytes(&[0u8; 8]).is_err());
        assert!(Xid::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_xid_from_bytes_truncated_field() {
        let mut bytes = Xid::new(1, b"gtrid", b"bqual").to_bytes();
        bytes.truncate(bytes.len() - 2);
        assert!(Xid::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_xid_display() {
        let xid = Xid::new(7, &[0xAB, 0xCD], &[0x01]);
        assert_eq!(xid.to_string(), "7-abcd-01");
    }

    #[test]
    fn test_xid_equality_and_hash() {
        use std::collections::HashSet;

        let xid1 = Xid::new(1, b"gtrid", b"bqual");
        let xid2 = Xid::new(1, b"gtrid", b"bqual");
        let xid3 = Xid::new(2, b"gtrid", b"bqual");

        assert_eq!(xid1, xid2);
        assert_ne!(xid1, xid3);

        let mut set = HashSet::new();
        set.insert(xid1);
        assert!(set.contains(&xid2));
        assert!(!set.contains(&xid3));
    }

    #[test]
    fn test_verb_display() {
        assert_eq!(XaVerb::Start.to_string(), "xa start");
        assert_eq!(XaVerb::Prepare.as_str(), "xa prepare");
        assert_eq!(XaVerb::Rollback.to_string(), "xa rollback");
    }

    #[test]
    fn test_state_terminal() {
        assert!(BranchState::Committed.is_terminal());
        assert!(BranchState::RolledBack.is_terminal());
        assert!(BranchState::ReadOnlyPrepared.is_terminal());

        assert!(!BranchState::Idle.is_terminal());
        assert!(!BranchState::Started.is_terminal());
        assert!(!BranchState::Ended.is_terminal());
        assert!(!BranchState::Preparing.is_terminal());
        assert!(!BranchState::Prepared.is_terminal());
    }

    #[test]
    fn test_state_in_doubt() {
        assert!(BranchState::Preparing.is_in_doubt());
        assert!(BranchState::Committing.is_in_doubt());
        assert!(BranchState::RollingBack.is_in_doubt());

        assert!(!BranchState::Idle.is_in_doubt());
        assert!(!BranchState::Prepared.is_in_doubt());
        assert!(!BranchState::Committed.is_in_doubt());
    }

    #[test]
    fn test_flags_are_distinct() {
        let flags = [XA_TMJOIN, XA_TMRESUME, XA_TMSUCCESS, XA_TMFAIL, XA_TMSUSPEND];
        for (i, &a) in flags.iter().enumerate() {
            for &b in &flags[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
