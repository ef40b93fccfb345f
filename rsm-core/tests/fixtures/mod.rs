//! Fixtures for testing the RSM host and failover coordinator.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rsm_core::config::Config;
use rsm_core::metrics::Wait;
use rsm_core::revision::RevisionTable;
use rsm_core::FailoverCoordinator;
use rsm_core::NodeId;
use rsm_core::RsmHost;
use rsm_core::RsmMetrics;

use rsm_mock::KvStateMachine;
use rsm_mock::MockCluster;

use tokio::sync::watch;
use tracing_subscriber::prelude::*;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize the tracing system.
pub fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::Layer::default()
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::FULL)
        .with_ansi(false);
    let subscriber = tracing_subscriber::Registry::default()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(fmt_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// A running key/value host over an in-memory cluster, plus the handles tests drive it
/// with directly.
pub struct KvFixture {
    pub node_id: NodeId,
    pub cluster: MockCluster<rsm_mock::KvCommand>,
    pub host: RsmHost<KvStateMachine>,
    pub metrics_rx: watch::Receiver<RsmMetrics>,
}

impl KvFixture {
    /// Spawn a single node's host against a fresh cluster, not yet holding a term.
    pub async fn spawn_follower(node_id: NodeId) -> anyhow::Result<Self> {
        let history_id = uuid::Uuid::new_v4();
        let cluster = MockCluster::new(node_id, history_id);
        let (host, metrics_rx) = rsm_core::host::spawn(
            "kv",
            &[],
            Arc::new(KvStateMachine::default()),
            cluster.consensus(),
            cluster.agent(),
            cluster.event_bus(),
            RevisionTable::new(),
            Config::default(),
        )
        .await?;

        Ok(Self {
            node_id,
            cluster,
            host,
            metrics_rx,
        })
    }

    pub fn wait(&self, timeout: Duration) -> Wait {
        Wait::new(self.metrics_rx.clone(), timeout)
    }

    pub fn failover_coordinator(&self) -> FailoverCoordinator<rsm_mock::KvCommand> {
        FailoverCoordinator::new(self.node_id, self.cluster.agent(), Config::default())
    }
}
