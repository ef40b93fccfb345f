//! The failover coordinator: forces consensus onto a fresh history at a chosen subset of
//! peers, for use when the normal leader-election path can't make progress.
//!
//! A parallel per-peer RPC fan-out under a fixed timeout, classified into success/failure
//! sets.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::collaborators::Agent;
use crate::config::Config;
use crate::error::CancelError;
use crate::error::FailoverError;
use crate::error::PeerError;
use crate::model::Branch;
use crate::revision::HistoryId;
use crate::NodeId;

/// One per process-wide cluster: owns no long-running task, but serializes concurrent
/// callers behind an internal lock, per §4.2 "the coordinator processes one request at a
/// time; concurrent callers are queued".
pub struct FailoverCoordinator<C> {
    self_id: NodeId,
    agent: Arc<dyn Agent<C>>,
    config: Config,
    serialize: Mutex<()>,
}

impl<C: Send + Sync + 'static> FailoverCoordinator<C> {
    pub fn new(self_id: NodeId, agent: Arc<dyn Agent<C>>, config: Config) -> Self {
        Self {
            self_id,
            agent,
            config,
            serialize: Mutex::new(()),
        }
    }

    /// §4.2 "Failover protocol".
    #[tracing::instrument(level = "info", skip(self, opaque), fields(self_id = self.self_id))]
    pub async fn failover(&self, keep_peers: Vec<NodeId>, opaque: Vec<u8>) -> Result<(), FailoverError> {
        let _permit = self.serialize.lock().await;

        if !keep_peers.contains(&self.self_id) {
            return Err(FailoverError::NotInPeers {
                this: self.self_id,
                keep: keep_peers,
            });
        }

        let metadata = self.agent.get_metadata().await.map_err(|e| {
            tracing::error!(error = %e, "failed to fetch local metadata before failover");
            FailoverError::Aborted {
                incompatible_peers: vec![],
                failed_peers: vec![self.self_id],
            }
        })?;

        let branch = Branch {
            history_id: fresh_history_id(),
            old_history_id: metadata.history_id,
            coordinator: self.self_id,
            peers: keep_peers.clone(),
            opaque,
        };

        let followers: Vec<NodeId> = keep_peers.iter().copied().filter(|p| *p != self.self_id).collect();

        // Phase A: remote install.
        let remote = self
            .agent
            .store_branch(&followers, branch.clone(), self.config.store_branch_timeout)
            .await;
        if !remote.errors.is_empty() {
            let (incompatible_peers, failed_peers) = classify_store_errors(&remote.errors);
            self.best_effort_undo(&followers, branch.history_id).await;
            return Err(FailoverError::Aborted {
                incompatible_peers,
                failed_peers,
            });
        }

        // Phase B: local install.
        if let Err(e) = self
            .agent
            .local_store_branch(branch.clone(), self.config.store_branch_timeout)
            .await
        {
            tracing::error!(error = %e, "local_store_branch failed after remote install succeeded");
            self.best_effort_undo(&followers, branch.history_id).await;
            return Err(FailoverError::Aborted {
                incompatible_peers: vec![],
                failed_peers: vec![self.self_id],
            });
        }

        Ok(())
    }

    /// §4.2 "Cancel protocol".
    #[tracing::instrument(level = "info", skip(self), fields(self_id = self.self_id))]
    pub async fn try_cancel(&self, branch: Branch) -> Result<(), CancelError> {
        let _permit = self.serialize.lock().await;

        let outcome = self
            .agent
            .undo_branch(&branch.peers, branch.history_id, self.config.cancel_branch_timeout)
            .await;

        let failed: Vec<NodeId> = outcome
            .errors
            .into_iter()
            .filter(|(_, e)| !matches!(e, PeerError::NoBranch | PeerError::BadBranch(_)))
            .map(|(peer, _)| peer)
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(CancelError(failed))
        }
    }

    /// Best-effort rollback: errors are logged and swallowed, never surfaced to the caller
    /// — the authoritative result is whichever phase actually failed.
    async fn best_effort_undo(&self, peers: &[NodeId], history_id: HistoryId) {
        let outcome = self.agent.undo_branch(peers, history_id, self.config.cleanup_branch_timeout).await;
        for (peer, err) in &outcome.errors {
            tracing::warn!(peer, error = %err, "best-effort undo_branch failed during failover rollback");
        }
    }
}

fn classify_store_errors(errors: &std::collections::HashMap<NodeId, PeerError>) -> (Vec<NodeId>, Vec<NodeId>) {
    let mut incompatible = Vec::new();
    let mut failed = Vec::new();
    for (peer, err) in errors {
        if matches!(err, PeerError::HistoryMismatch(_)) {
            incompatible.push(*peer);
        } else {
            failed.push(*peer);
        }
    }
    incompatible.sort_unstable();
    failed.sort_unstable();
    (incompatible, failed)
}

fn fresh_history_id() -> HistoryId {
    Uuid::new_v4()
}
