//! Metrics: a `watch` channel broadcasting the host's leader substate, published on every
//! transition.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use crate::revision::HistoryId;
use crate::revision::Seqno;

/// Point-in-time view of a single [`crate::host::RsmHost`] instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RsmMetrics {
    pub name: String,
    pub state: LeaderState,
    pub applied_history_id: HistoryId,
    pub applied_seqno: Seqno,
    pub read_seqno: Seqno,
    pub available_seqno: Seqno,
}

/// The leader substate published alongside applied-revision progress.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaderState {
    Follower,
    Leader { term: u64, established: bool },
}

impl RsmMetrics {
    pub(crate) fn starting(name: String) -> Self {
        Self {
            name,
            state: LeaderState::Follower,
            applied_history_id: crate::revision::NO_HISTORY,
            applied_seqno: crate::revision::NO_SEQNO,
            read_seqno: crate::revision::NO_SEQNO,
            available_seqno: crate::revision::NO_SEQNO,
        }
    }
}

/// A `watch`-backed subscription with timeout and predicate helpers.
#[derive(Clone)]
pub struct Wait {
    rx: watch::Receiver<RsmMetrics>,
    duration: Duration,
}

impl Wait {
    pub fn new(rx: watch::Receiver<RsmMetrics>, duration: Duration) -> Self {
        Self { rx, duration }
    }

    /// Wait until `filter` holds for the latest metrics, or until the timeout elapses.
    pub async fn metrics<T>(&mut self, msg: &str, filter: T) -> anyhow::Result<RsmMetrics>
    where
        T: Fn(&RsmMetrics) -> bool + Send,
    {
        let rx = &mut self.rx;
        let wait = async move {
            loop {
                let m = rx.borrow().clone();
                if filter(&m) {
                    return Ok(m);
                }
                if rx.changed().await.is_err() {
                    anyhow::bail!("metrics channel closed while waiting for: {}", msg);
                }
            }
        };

        match timeout(self.duration, wait).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("timed out after {:?} waiting for: {}", self.duration, msg),
        }
    }

    /// Wait for the host to report itself as `Leader { established: true, .. }`.
    pub async fn leader_established(&mut self) -> anyhow::Result<RsmMetrics> {
        self.metrics("leader established", |m| matches!(m.state, LeaderState::Leader { established: true, .. }))
            .await
    }

    /// Wait for `applied_seqno` to reach at least `seqno`.
    pub async fn applied_at_least(&mut self, seqno: Seqno) -> anyhow::Result<RsmMetrics> {
        self.metrics("applied seqno reached", move |m| m.applied_seqno >= seqno).await
    }
}
