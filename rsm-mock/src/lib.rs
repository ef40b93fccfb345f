//! In-memory collaborators for exercising `rsm-core` without a real consensus deployment.
//!
//! A single shared, directly-controllable cluster state that test code drives by hand
//! (accept a command, establish a term, install a config entry, flip a peer's branch-store
//! behavior) while the `rsm-core` actors under test only ever see the collaborator traits.

mod kv;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use rsm_core::collaborators::Agent;
use rsm_core::collaborators::CommandAck;
use rsm_core::collaborators::ConsensusEvent;
use rsm_core::collaborators::ConsensusServer;
use rsm_core::collaborators::EventBus;
use rsm_core::collaborators::PeerFanoutOutcome;
use rsm_core::collaborators::QuorumAck;
use rsm_core::collaborators::Ref;
use rsm_core::collaborators::RegisterOutcome;
use rsm_core::error::PeerError;
use rsm_core::model::Branch;
use rsm_core::model::EntryValue;
use rsm_core::model::LogEntry;
use rsm_core::model::Metadata;
use rsm_core::HistoryId;
use rsm_core::NodeId;
use rsm_core::Revision;
use rsm_core::Seqno;

pub use kv::KvCommand;
pub use kv::KvQuery;
pub use kv::KvReply;
pub use kv::KvStateMachine;

/// How a simulated peer responds to a branch install/undo call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerBehavior {
    Normal,
    HistoryMismatch,
    Fails,
}

struct ClusterInner<C> {
    self_id: NodeId,
    log: Vec<LogEntry<C>>,
    history_id: HistoryId,
    term: u64,
    committed_seqno: Seqno,
    events_tx: Option<mpsc::UnboundedSender<ConsensusEvent>>,
    metadata_subscribers: Vec<mpsc::UnboundedSender<Metadata>>,
    branches: HashMap<NodeId, HashMap<HistoryId, Branch>>,
    peer_behavior: HashMap<NodeId, PeerBehavior>,
    /// When set, `rsm_command` still accepts and logs the entry but skips the metadata
    /// publish that would let a host's reader observe (and apply) it — for tests that need
    /// to pin a command in the "accepted, not yet applied" window.
    withhold_metadata: bool,
}

/// A single-process, directly-controllable stand-in for an entire cluster: one `rsm-core`
/// actor under test sees it through the three collaborator traits; the test harness drives
/// it through the plain methods below.
pub struct MockCluster<C> {
    inner: Arc<Mutex<ClusterInner<C>>>,
}

impl<C> Clone for MockCluster<C> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<C> MockCluster<C>
where
    C: Clone + Send + Sync + 'static,
{
    pub fn new(self_id: NodeId, history_id: HistoryId) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClusterInner {
                self_id,
                log: Vec::new(),
                history_id,
                term: 0,
                committed_seqno: rsm_core::revision::NO_SEQNO,
                events_tx: None,
                metadata_subscribers: Vec::new(),
                branches: HashMap::new(),
                peer_behavior: HashMap::new(),
                withhold_metadata: false,
            })),
        }
    }

    pub fn consensus(&self) -> Arc<dyn ConsensusServer<C>> {
        Arc::new(ClusterHandle(self.inner.clone()))
    }

    pub fn agent(&self) -> Arc<dyn Agent<C>> {
        Arc::new(ClusterHandle(self.inner.clone()))
    }

    pub fn event_bus(&self) -> Arc<dyn EventBus> {
        Arc::new(ClusterHandle(self.inner.clone()))
    }

    pub fn set_peer_behavior(&self, peer: NodeId, behavior: PeerBehavior) {
        self.inner.lock().unwrap().peer_behavior.insert(peer, behavior);
    }

    /// Stop (or resume) publishing metadata on every accepted command, so a test can hold a
    /// command in the "accepted, not yet applied" state.
    pub fn set_withhold_metadata(&self, withhold: bool) {
        self.inner.lock().unwrap().withhold_metadata = withhold;
    }

    /// Publish the current metadata snapshot to every subscriber, regardless of
    /// `withhold_metadata` — lets a test release entries it previously withheld.
    pub fn release_metadata(&self) {
        let mut inner = self.inner.lock().unwrap();
        Self::publish_metadata_locked(&mut inner);
    }

    /// Tell the host (via its registered consensus event channel) that a new term has
    /// been established, requiring `applied_seqno >= wait_for_seqno` before it's usable.
    pub fn establish_term(&self, term: u64, wait_for_seqno: Seqno) {
        let mut inner = self.inner.lock().unwrap();
        inner.term = term;
        let history_id = inner.history_id;
        if let Some(tx) = &inner.events_tx {
            let _ = tx.send(ConsensusEvent::TermEstablished {
                history_id,
                term,
                seqno: wait_for_seqno,
            });
        }
    }

    pub fn finish_term(&self, term: u64) {
        let inner = self.inner.lock().unwrap();
        let history_id = inner.history_id;
        if let Some(tx) = &inner.events_tx {
            let _ = tx.send(ConsensusEvent::TermFinished { history_id, term });
        }
    }

    /// Append a `ConfigEntry` switching the log (and cluster) onto `new_history_id`, and
    /// publish the resulting metadata to every subscriber, returning the seqno it landed
    /// at.
    pub fn install_config_entry(&self, new_history_id: HistoryId, peers: Vec<NodeId>) -> Seqno {
        let mut inner = self.inner.lock().unwrap();
        inner.committed_seqno += 1;
        let seqno = inner.committed_seqno;
        let term = inner.term;
        inner.history_id = new_history_id;
        inner.log.push(LogEntry {
            seqno,
            term,
            history_id: new_history_id,
            value: EntryValue::ConfigEntry(rsm_core::model::ConfigEntry { peers }),
        });
        Self::publish_metadata_locked(&mut inner);
        seqno
    }

    fn publish_metadata_locked(inner: &mut ClusterInner<C>) {
        let metadata = Metadata {
            peer: inner.self_id,
            history_id: inner.history_id,
            committed_seqno: inner.committed_seqno,
        };
        inner.metadata_subscribers.retain(|tx| tx.send(metadata.clone()).is_ok());
    }

    pub fn committed_seqno(&self) -> Seqno {
        self.inner.lock().unwrap().committed_seqno
    }

    pub fn current_history_id(&self) -> HistoryId {
        self.inner.lock().unwrap().history_id
    }

    /// The single branch a peer holds, if any — for tests that need to recover the branch
    /// a coordinator installed without the `failover()` caller ever seeing its generated id.
    pub fn branch_held_by(&self, peer: NodeId) -> Option<Branch> {
        let inner = self.inner.lock().unwrap();
        let peer_branches = inner.branches.get(&peer)?;
        peer_branches.values().next().cloned()
    }
}

struct ClusterHandle<C>(Arc<Mutex<ClusterInner<C>>>);

#[async_trait]
impl<C> ConsensusServer<C> for ClusterHandle<C>
where
    C: Clone + Send + Sync + 'static,
{
    async fn register_rsm(&self, _name: &str, events: mpsc::UnboundedSender<ConsensusEvent>) -> Result<RegisterOutcome, PeerError> {
        let mut inner = self.0.lock().unwrap();
        inner.events_tx = Some(events);
        if inner.term == 0 {
            Ok(RegisterOutcome::NoTerm)
        } else {
            Ok(RegisterOutcome::Registered {
                history_id: inner.history_id,
                term: inner.term,
                seqno: inner.committed_seqno,
            })
        }
    }

    fn rsm_command(&self, tag: Ref, history_id: HistoryId, term: u64, name: &str, command: C) {
        let mut inner = self.0.lock().unwrap();
        if history_id != inner.history_id || term != inner.term {
            if let Some(tx) = &inner.events_tx {
                let _ = tx.send(ConsensusEvent::CommandResult {
                    tag,
                    outcome: CommandAck::Error(PeerError::Other("stale history or term".into())),
                });
            }
            return;
        }
        inner.committed_seqno += 1;
        let seqno = inner.committed_seqno;
        inner.log.push(LogEntry {
            seqno,
            term,
            history_id,
            value: EntryValue::RsmCommand {
                rsm_name: name.to_string(),
                command,
            },
        });
        if let Some(tx) = &inner.events_tx {
            let _ = tx.send(ConsensusEvent::CommandResult {
                tag,
                outcome: CommandAck::Accepted(seqno),
            });
        }
        if !inner.withhold_metadata {
            Self::publish_metadata(&mut inner);
        }
    }

    fn sync_quorum(&self, tag: Ref, history_id: HistoryId, term: u64) {
        let inner = self.0.lock().unwrap();
        let outcome = if history_id == inner.history_id && term == inner.term {
            QuorumAck::Ok
        } else {
            QuorumAck::Error(PeerError::Other("term changed under sync_quorum".into()))
        };
        if let Some(tx) = &inner.events_tx {
            let _ = tx.send(ConsensusEvent::QuorumResult { tag, outcome });
        }
    }
}

impl<C: Clone> ClusterHandle<C> {
    fn publish_metadata(inner: &mut ClusterInner<C>) {
        MockCluster::publish_metadata_locked(inner);
    }
}

#[async_trait]
impl<C> Agent<C> for ClusterHandle<C>
where
    C: Clone + Send + Sync + 'static,
{
    async fn get_metadata(&self) -> Result<Metadata, PeerError> {
        let inner = self.0.lock().unwrap();
        Ok(Metadata {
            peer: inner.self_id,
            history_id: inner.history_id,
            committed_seqno: inner.committed_seqno,
        })
    }

    async fn get_log(&self, after_seqno: Seqno) -> Result<Vec<LogEntry<C>>, PeerError> {
        let inner = self.0.lock().unwrap();
        Ok(inner.log.iter().filter(|e| e.seqno > after_seqno).cloned().collect())
    }

    async fn store_branch(&self, peers: &[NodeId], branch: Branch, _timeout: std::time::Duration) -> PeerFanoutOutcome {
        let mut inner = self.0.lock().unwrap();
        let mut outcome = PeerFanoutOutcome::default();
        for peer in peers {
            match inner.peer_behavior.get(peer).copied().unwrap_or(PeerBehavior::Normal) {
                PeerBehavior::Normal => {
                    inner.branches.entry(*peer).or_default().insert(branch.history_id, branch.clone());
                    outcome.ok.push(*peer);
                }
                PeerBehavior::HistoryMismatch => {
                    outcome.errors.insert(*peer, PeerError::HistoryMismatch(Some(inner.history_id)));
                }
                PeerBehavior::Fails => {
                    outcome.errors.insert(*peer, PeerError::Other("simulated peer failure".into()));
                }
            }
        }
        outcome
    }

    async fn local_store_branch(&self, branch: Branch, _timeout: std::time::Duration) -> Result<(), PeerError> {
        let mut inner = self.0.lock().unwrap();
        let self_id = inner.self_id;
        match inner.peer_behavior.get(&self_id).copied().unwrap_or(PeerBehavior::Normal) {
            PeerBehavior::Normal => {
                inner.branches.entry(self_id).or_default().insert(branch.history_id, branch);
                Ok(())
            }
            PeerBehavior::HistoryMismatch => Err(PeerError::HistoryMismatch(Some(inner.history_id))),
            PeerBehavior::Fails => Err(PeerError::Other("simulated local failure".into())),
        }
    }

    async fn undo_branch(&self, peers: &[NodeId], history_id: HistoryId, _timeout: std::time::Duration) -> PeerFanoutOutcome {
        let mut inner = self.0.lock().unwrap();
        let mut outcome = PeerFanoutOutcome::default();
        for peer in peers {
            let had_it = inner.branches.get_mut(peer).map(|b| b.remove(&history_id).is_some()).unwrap_or(false);
            if had_it {
                outcome.ok.push(*peer);
            } else {
                outcome.errors.insert(*peer, PeerError::NoBranch);
            }
        }
        outcome
    }
}

#[async_trait]
impl<C> EventBus for ClusterHandle<C>
where
    C: Send + Sync + 'static,
{
    async fn subscribe_metadata(&self) -> mpsc::UnboundedReceiver<Metadata> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.0.lock().unwrap().metadata_subscribers.push(tx);
        rx
    }
}

/// Convenience: a revision half-way through a history, for tests that just need
/// `(history_id, some_seqno)` without caring about the exact value.
pub fn revision(history_id: HistoryId, seqno: Seqno) -> Revision {
    Revision::new(history_id, seqno)
}
