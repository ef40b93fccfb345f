//! The traits this crate consumes from the rest of the system, and the one trait it asks
//! the embedding application to implement.
//!
//! `ConsensusServer`, `Agent` and `EventBus` together describe the external consensus
//! deployment: collaborators the host core drives but does not own. `StateMachine` is the
//! single user-extension point: the only trait the embedding application must implement
//! itself.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::PeerError;
use crate::model::Branch;
use crate::model::LogEntry;
use crate::model::Metadata;
use crate::revision::HistoryId;
use crate::revision::Revision;
use crate::revision::Seqno;
use crate::MessageSummary;
use crate::NodeId;

/// A unique correlation token a caller attaches to a fire-and-forget request so the
/// eventual reply can be matched back up, independent of the type of request it tags.
pub type Ref = u64;

/// The outcome of registering a named RSM with the consensus server.
#[derive(Clone, Debug)]
pub enum RegisterOutcome {
    Registered {
        history_id: HistoryId,
        term: u64,
        seqno: Seqno,
    },
    /// No term has ever been established in this history; the caller starts as a follower
    /// with no leader substate.
    NoTerm,
}

/// The terminal outcome of a single `rsm_command` call, delivered asynchronously.
#[derive(Clone, Debug)]
pub enum CommandAck {
    Accepted(Seqno),
    Error(PeerError),
}

/// The terminal outcome of a single `sync_quorum` call, delivered asynchronously.
#[derive(Clone, Debug)]
pub enum QuorumAck {
    Ok,
    Error(PeerError),
}

/// Events a [`ConsensusServer`] pushes into a registered RSM's mailbox: results for the
/// fire-and-forget calls the host made, plus unsolicited leader-term transitions.
#[derive(Clone, Debug)]
pub enum ConsensusEvent {
    CommandResult {
        tag: Ref,
        outcome: CommandAck,
    },
    QuorumResult {
        tag: Ref,
        outcome: QuorumAck,
    },
    TermEstablished {
        history_id: HistoryId,
        term: u64,
        seqno: Seqno,
    },
    TermFinished {
        history_id: HistoryId,
        term: u64,
    },
}

impl MessageSummary for ConsensusEvent {
    fn summary(&self) -> String {
        match self {
            ConsensusEvent::CommandResult { tag, outcome } => match outcome {
                CommandAck::Accepted(seqno) => format!("command_result(tag={}, accepted seqno={})", tag, seqno),
                CommandAck::Error(e) => format!("command_result(tag={}, error={})", tag, e),
            },
            ConsensusEvent::QuorumResult { tag, outcome } => match outcome {
                QuorumAck::Ok => format!("quorum_result(tag={}, ok)", tag),
                QuorumAck::Error(e) => format!("quorum_result(tag={}, error={})", tag, e),
            },
            ConsensusEvent::TermEstablished { history_id, term, seqno } => {
                format!("term_established(history={}, term={}, seqno={})", history_id, term, seqno)
            }
            ConsensusEvent::TermFinished { history_id, term } => {
                format!("term_finished(history={}, term={})", history_id, term)
            }
        }
    }
}

/// The external consensus collaborator: leader election, replication and durable storage
/// of the log all live behind this trait. The RSM host only ever asks it to register, to
/// submit a command, or to confirm it still holds a quorum for its current term.
#[async_trait]
pub trait ConsensusServer<C>: Send + Sync + 'static {
    /// Register interest in a named RSM's log. `events` is where the server delivers
    /// command/quorum results and leader-term transitions from this point forward.
    async fn register_rsm(
        &self,
        name: &str,
        events: mpsc::UnboundedSender<ConsensusEvent>,
    ) -> Result<RegisterOutcome, PeerError>;

    /// Fire-and-forget: submit `command` for replication. The result is delivered later
    /// as a [`ConsensusEvent::CommandResult`] tagged with `tag`.
    fn rsm_command(&self, tag: Ref, history_id: HistoryId, term: u64, name: &str, command: C);

    /// Fire-and-forget: ask whether `term` still holds a quorum. The result is delivered
    /// later as a [`ConsensusEvent::QuorumResult`] tagged with `tag`.
    fn sync_quorum(&self, tag: Ref, history_id: HistoryId, term: u64);
}

/// The outcome of a multi-peer `store_branch` or `undo_branch` call: which peers
/// confirmed, and which reported an error.
#[derive(Clone, Debug, Default)]
pub struct PeerFanoutOutcome {
    pub ok: Vec<NodeId>,
    pub errors: HashMap<NodeId, PeerError>,
}

/// The external agent collaborator: per-peer metadata, raw log access, and branch
/// install/uninstall — the primitives the failover coordinator composes its protocol
/// from, and the primitive the host uses to read committed entries.
#[async_trait]
pub trait Agent<C>: Send + Sync + 'static {
    async fn get_metadata(&self) -> Result<Metadata, PeerError>;

    async fn get_log(&self, after_seqno: Seqno) -> Result<Vec<LogEntry<C>>, PeerError>;

    async fn store_branch(&self, peers: &[NodeId], branch: Branch, timeout: Duration) -> PeerFanoutOutcome;

    async fn local_store_branch(&self, branch: Branch, timeout: Duration) -> Result<(), PeerError>;

    async fn undo_branch(&self, peers: &[NodeId], history_id: HistoryId, timeout: Duration) -> PeerFanoutOutcome;
}

/// A subscription to cluster metadata changes, used by the host to learn about newly
/// committed seqnos without polling.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    async fn subscribe_metadata(&self) -> mpsc::UnboundedReceiver<Metadata>;
}

/// What a [`StateMachine::init`] call decides for a freshly started RSM.
pub enum InitOutcome<S, D> {
    Started(S, D),
    Stop,
}

/// What [`StateMachine::handle_command`] decides before a command is durably replicated.
pub enum CommandOutcome<R, D> {
    /// Submit this command for replication; `D` is the (possibly updated) user data to
    /// carry forward until the command is actually applied.
    Apply(D),
    /// Short-circuit: reply immediately without ever reaching consensus.
    Reject(R, D),
}

/// What [`StateMachine::handle_info`] decides after handling an out-of-band message.
pub enum InfoOutcome<D> {
    NoReply(D),
    Stop,
}

/// Why a [`StateMachine`] instance is being torn down.
#[derive(Clone, Debug)]
pub enum StopReason {
    UserRequested,
    HostTerminating,
}

/// The single user-extension point: an application's actual replicated behavior.
///
/// The host drives this trait exclusively and never interleaves two calls for the same
/// instance.
#[async_trait]
pub trait StateMachine: Send + Sync + 'static {
    type Command: crate::Command;
    type Query: crate::Command;
    type Reply: crate::Reply;
    type State: Send;
    type Data: Send;

    async fn init(&self, name: &str, args: &[u8]) -> InitOutcome<Self::State, Self::Data>;

    /// Called on the leader before a command is submitted to consensus.
    fn handle_command(
        &self,
        cmd: &Self::Command,
        applied_rev: Revision,
        state: &mut Self::State,
        data: Self::Data,
    ) -> CommandOutcome<Self::Reply, Self::Data>;

    /// Called exactly once per committed command, in strict seqno order.
    async fn apply_command(
        &self,
        cmd: Self::Command,
        entry_rev: Revision,
        applied_rev: Revision,
        state: &mut Self::State,
        data: Self::Data,
    ) -> (Self::Reply, Self::Data);

    async fn handle_query(
        &self,
        query: Self::Query,
        applied_rev: Revision,
        state: &Self::State,
        data: Self::Data,
    ) -> (Self::Reply, Self::Data);

    fn handle_info(
        &self,
        message: &[u8],
        applied_rev: Revision,
        state: &mut Self::State,
        data: Self::Data,
    ) -> InfoOutcome<Self::Data>;

    async fn terminate(&self, reason: StopReason, applied_rev: Revision, state: Self::State, data: Self::Data);
}
