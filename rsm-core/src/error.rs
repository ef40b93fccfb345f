//! Error taxonomy.
//!
//! Split between fatal/internal termination reasons and per-call client-facing enums:
//! actor-internal failures never leak past an actor boundary, they're classified into one
//! of the enums below first.

use crate::revision::HistoryId;
use crate::NodeId;

/// Errors a peer collaborator may report back for a single-peer RPC outcome.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PeerError {
    /// The peer's applied history does not match the one the caller expected.
    #[error("peer reports history mismatch: {0:?}")]
    HistoryMismatch(Option<HistoryId>),
    /// `undo_branch` targeted a branch the peer never stored — treated as success.
    #[error("peer has no such branch")]
    NoBranch,
    /// `undo_branch` targeted a branch id the peer holds but considers invalid.
    #[error("peer rejects branch: {0}")]
    BadBranch(String),
    /// Any other collaborator-reported failure (network, internal, etc).
    #[error("peer error: {0}")]
    Other(String),
}

/// Errors surfaced to clients of [`crate::host::RsmHost`] operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// The contacted host is not the leader for this name.
    #[error("not leader")]
    NotLeader,
    /// The term backing an accepted command ended before it could be confirmed committed.
    #[error("leader lost before command committed")]
    LeaderLost,
    /// A leader-side failure the consensus server reported back to us.
    #[error("leader error: {0}")]
    LeaderError(String),
    /// The revision supplied does not belong to the currently applied history.
    #[error("history mismatch")]
    HistoryMismatch,
    /// The caller-supplied timeout elapsed before completion.
    #[error("timeout")]
    Timeout,
    /// No host is running (or ever ran) for the requested name.
    #[error("not running")]
    NotRunning,
}

/// Errors returned by [`crate::failover::FailoverCoordinator::failover`].
#[derive(Clone, Debug, thiserror::Error)]
pub enum FailoverError {
    /// The calling peer is not itself a member of the requested `keep` set.
    #[error("self ({this}) not in keep set {keep:?}")]
    NotInPeers { this: NodeId, keep: Vec<NodeId> },
    /// At least one peer rejected the branch; it was rolled back best-effort.
    #[error("failover aborted: incompatible={incompatible_peers:?} failed={failed_peers:?}")]
    Aborted {
        incompatible_peers: Vec<NodeId>,
        failed_peers: Vec<NodeId>,
    },
}

/// Errors returned by [`crate::failover::FailoverCoordinator::try_cancel`].
#[derive(Clone, Debug, thiserror::Error)]
#[error("cancel could not be confirmed on: {0:?}")]
pub struct CancelError(pub Vec<NodeId>);

/// Reasons an [`crate::host::RsmHost`] actor terminates.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TerminateReason {
    /// The user state machine asked to stop.
    #[error("state machine requested stop")]
    Stopped,
    /// The log-reader task crashed or was never replaced after a crash.
    #[error("log reader task died")]
    ReaderDied,
    /// The actor's mailbox was dropped by every handle.
    #[error("handle dropped")]
    HandleDropped,
}
