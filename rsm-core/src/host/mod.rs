//! The RSM host: drives one named [`StateMachine`] instance from a shared committed log.
//!
//! [`RsmHost`] is a cheap, cloneable handle over a single actor task (see `core::RsmHostCore`).

mod client;
pub mod core;
mod pending;
mod reader;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;

use crate::collaborators::Agent;
use crate::collaborators::ConsensusServer;
use crate::collaborators::EventBus;
use crate::collaborators::RegisterOutcome;
use crate::collaborators::StateMachine;
use crate::config::Config;
use crate::error::ClientError;
use crate::metrics::RsmMetrics;
use crate::revision::Revision;
use crate::revision::RevisionTable;
use crate::MessageSummary;

use core::LeaderStatus;
use core::LeaderSubstate;
use core::RsmHostCore;
use pending::PendingClients;
use pending::SyncRevisionQueue;

/// How a leader-dependent read should be satisfied: against this node's own belief that
/// it's leader, or confirmed against a live quorum round-trip.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadKind {
    Leader,
    Quorum,
}

pub(crate) enum RsmMsg<S: StateMachine> {
    Command {
        command: S::Command,
        reply_to: oneshot::Sender<Result<S::Reply, ClientError>>,
    },
    Query {
        query: S::Query,
        reply_to: oneshot::Sender<Result<S::Reply, ClientError>>,
    },
    SyncRevision {
        revision: Revision,
        timeout: Duration,
        reply_to: oneshot::Sender<Result<(), ClientError>>,
    },
    Sync {
        kind: ReadKind,
        reply_to: oneshot::Sender<Result<(), ClientError>>,
    },
    GetAppliedRevision {
        kind: ReadKind,
        reply_to: oneshot::Sender<Result<Revision, ClientError>>,
    },
}

impl<S: StateMachine> MessageSummary for RsmMsg<S> {
    fn summary(&self) -> String {
        match self {
            RsmMsg::Command { command, .. } => format!("command({:?})", command),
            RsmMsg::Query { query, .. } => format!("query({:?})", query),
            RsmMsg::SyncRevision { revision, timeout, .. } => format!("sync_revision(revision={}, timeout={:?})", revision, timeout),
            RsmMsg::Sync { kind, .. } => format!("sync(kind={:?})", kind),
            RsmMsg::GetAppliedRevision { kind, .. } => format!("get_applied_revision(kind={:?})", kind),
        }
    }
}

/// A cheap, cloneable handle to a running RSM host actor.
pub struct RsmHost<S: StateMachine> {
    name: String,
    tx: mpsc::Sender<RsmMsg<S>>,
    revision_table: RevisionTable,
}

impl<S: StateMachine> Clone for RsmHost<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
            revision_table: self.revision_table.clone(),
        }
    }
}

/// Start a new RSM host actor for `name`, registering it with the consensus server and
/// subscribing it to metadata events, then returning a handle plus its metrics feed.
#[tracing::instrument(level = "info", skip(state_machine, consensus, agent, event_bus, revision_table, init_args))]
pub async fn spawn<S: StateMachine>(
    name: impl Into<String> + std::fmt::Display,
    init_args: &[u8],
    state_machine: Arc<S>,
    consensus: Arc<dyn ConsensusServer<S::Command>>,
    agent: Arc<dyn Agent<S::Command>>,
    event_bus: Arc<dyn EventBus>,
    revision_table: RevisionTable,
    config: Config,
) -> anyhow::Result<(RsmHost<S>, watch::Receiver<RsmMetrics>)> {
    let name = name.to_string();

    let (mod_state, mod_data) = match state_machine.init(&name, init_args).await {
        crate::collaborators::InitOutcome::Started(state, data) => (state, data),
        crate::collaborators::InitOutcome::Stop => anyhow::bail!("state machine declined to start for {}", name),
    };

    let (tx_consensus, rx_consensus) = mpsc::unbounded_channel();
    let registration = consensus
        .register_rsm(&name, tx_consensus)
        .await
        .map_err(|e| anyhow::anyhow!("register_rsm failed for {}: {}", name, e))?;

    let leader = match registration {
        RegisterOutcome::Registered { history_id, term, seqno } => {
            // `applied_seqno` starts at `NO_SEQNO`: established only if the term's
            // establishing seqno is already satisfied by "nothing applied yet".
            let status = if crate::revision::NO_SEQNO >= seqno {
                LeaderStatus::Established
            } else {
                LeaderStatus::WaitForSeqno(seqno)
            };
            LeaderSubstate::Leader { history_id, term, status }
        }
        RegisterOutcome::NoTerm => LeaderSubstate::Follower,
    };

    let rx_metadata = event_bus.subscribe_metadata().await;
    let (tx_msg, rx_msg) = mpsc::channel(1024);
    let (tx_internal, rx_internal) = mpsc::unbounded_channel();
    let (metrics_tx, metrics_rx) = watch::channel(RsmMetrics::starting(name.clone()));

    let revision_writer = revision_table.writer(name.clone());

    let core = RsmHostCore {
        name: name.clone(),
        state_machine,
        mod_state,
        mod_data: Some(mod_data),
        consensus,
        agent,
        revision: revision_writer,
        config,
        applied_history_id: crate::revision::NO_HISTORY,
        applied_seqno: crate::revision::NO_SEQNO,
        read_seqno: crate::revision::NO_SEQNO,
        available_seqno: crate::revision::NO_SEQNO,
        pending: PendingClients::new(),
        sync_revision_queue: SyncRevisionQueue::new(),
        reader: None,
        leader,
        postponed_reads: Vec::new(),
        metrics_tx,
        rx_msg,
        rx_consensus,
        rx_metadata,
        rx_internal,
        tx_internal,
    };

    tokio::spawn(core.run());

    let handle = RsmHost {
        name,
        tx: tx_msg,
        revision_table,
    };
    Ok((handle, metrics_rx))
}

impl<S: StateMachine> RsmHost<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn command(&self, command: S::Command, timeout: Duration) -> Result<S::Reply, ClientError> {
        self.call(timeout, |reply_to| RsmMsg::Command { command, reply_to }).await
    }

    pub async fn query(&self, query: S::Query, timeout: Duration) -> Result<S::Reply, ClientError> {
        self.call(timeout, |reply_to| RsmMsg::Query { query, reply_to }).await
    }

    pub async fn sync_revision(&self, revision: Revision, timeout: Duration) -> Result<(), ClientError> {
        self.call(timeout, |reply_to| RsmMsg::SyncRevision {
            revision,
            timeout,
            reply_to,
        })
        .await
    }

    pub async fn sync(&self, kind: ReadKind, timeout: Duration) -> Result<(), ClientError> {
        self.call(timeout, |reply_to| RsmMsg::Sync { kind, reply_to }).await
    }

    pub async fn get_applied_revision(&self, kind: ReadKind, timeout: Duration) -> Result<Revision, ClientError> {
        self.call(timeout, |reply_to| RsmMsg::GetAppliedRevision { kind, reply_to }).await
    }

    /// Reads straight from the shared table; does not round-trip through the actor, so it
    /// works even for a name whose host handle the caller never kept around.
    pub async fn get_local_revision(&self) -> Result<Revision, ClientError> {
        self.revision_table.get_local_revision(&self.name).await
    }

    async fn call<T>(&self, timeout: Duration, build: impl FnOnce(oneshot::Sender<Result<T, ClientError>>) -> RsmMsg<S>) -> Result<T, ClientError> {
        let (reply_to, rx) = oneshot::channel();
        if self.tx.send(build(reply_to)).await.is_err() {
            return Err(ClientError::NotRunning);
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::NotRunning),
            Err(_) => Err(ClientError::Timeout),
        }
    }
}
