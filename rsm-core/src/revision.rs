//! Revisions: `(history_id, seqno)` pairs identifying a point in the applied log.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Opaque identifier for an epoch of consensus.
pub type HistoryId = Uuid;

/// Monotonic log position within a history.
pub type Seqno = u64;

/// Sentinel meaning "no history has ever been assigned".
pub const NO_HISTORY: HistoryId = Uuid::nil();

/// Sentinel meaning "nothing applied yet".
pub const NO_SEQNO: Seqno = 0;

/// A point in the applied log: `(history_id, seqno)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub history_id: HistoryId,
    pub seqno: Seqno,
}

impl Revision {
    pub const fn new(history_id: HistoryId, seqno: Seqno) -> Self {
        Self { history_id, seqno }
    }

    /// The revision of a host which has not yet applied anything.
    pub const fn none() -> Self {
        Self {
            history_id: NO_HISTORY,
            seqno: NO_SEQNO,
        }
    }

    pub fn is_none(&self) -> bool {
        self.history_id == NO_HISTORY && self.seqno == NO_SEQNO
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.history_id, self.seqno)
    }
}

impl Default for Revision {
    fn default() -> Self {
        Self::none()
    }
}

/// The process-wide table of the latest applied revision per named RSM.
///
/// Per §5, the hosting actor for a given name is the sole writer of its own entry; any
/// caller may read. This is the only piece of state shared across actors in this crate.
#[derive(Clone, Default)]
pub struct RevisionTable {
    inner: Arc<RwLock<HashMap<String, Revision>>>,
}

impl RevisionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register this table as the publication point for `name`, returning a writer handle.
    ///
    /// The caller is expected to be the RSM host for `name`, and the only one calling
    /// `RevisionWriter::publish` for it — this is a usage convention, not something enforced
    /// by the type system.
    pub fn writer(&self, name: impl Into<String>) -> RevisionWriter {
        RevisionWriter {
            name: name.into(),
            table: self.clone(),
        }
    }

    /// Read the latest published revision for `name`, if any RSM host has ever published one.
    pub async fn get(&self, name: &str) -> Option<Revision> {
        self.inner.read().await.get(name).copied()
    }

    async fn publish(&self, name: &str, revision: Revision) {
        let mut guard = self.inner.write().await;
        let prior = guard.get(name).copied();
        if let Some(prior) = prior {
            if prior.history_id == revision.history_id && revision.seqno < prior.seqno {
                tracing::error!(
                    name,
                    prior = %prior,
                    attempted = %revision,
                    "refusing to publish a local_revision with a decreasing seqno"
                );
                return;
            }
        }
        guard.insert(name.to_string(), revision);
    }

    async fn remove(&self, name: &str) {
        self.inner.write().await.remove(name);
    }
}

/// A write handle to a single name's slot in a [`RevisionTable`].
pub struct RevisionWriter {
    name: String,
    table: RevisionTable,
}

impl RevisionWriter {
    pub async fn publish(&self, revision: Revision) {
        self.table.publish(&self.name, revision).await;
    }

    pub async fn clear(&self) {
        self.table.remove(&self.name).await;
    }
}

impl RevisionTable {
    /// The public `get_local_revision(name)` operation: read the shared table, or
    /// `not_running` if no host has ever published under this name.
    pub async fn get_local_revision(&self, name: &str) -> Result<Revision, crate::error::ClientError> {
        self.get(name).await.ok_or(crate::error::ClientError::NotRunning)
    }
}
