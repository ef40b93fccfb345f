//! Wire and log types shared between the host, the failover coordinator, and the
//! collaborators they depend on.

use serde::Deserialize;
use serde::Serialize;

use crate::revision::HistoryId;
use crate::revision::Seqno;
use crate::MessageSummary;
use crate::NodeId;

/// A single committed entry, as delivered by the log reader.
///
/// Carries no membership-change payload variant of its own — membership itself is a
/// collaborator concern here, not something this crate's log model carries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry<C> {
    pub seqno: Seqno,
    pub term: u64,
    pub history_id: HistoryId,
    pub value: EntryValue<C>,
}

/// The payload of a [`LogEntry`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EntryValue<C> {
    /// A command targeted at a specific named RSM.
    RsmCommand { rsm_name: String, command: C },
    /// A membership/history boundary. The only entry kind permitted to change
    /// `history_id` relative to the previous entry.
    ConfigEntry(ConfigEntry),
}

/// A history/membership boundary committed to the log. The enclosing [`LogEntry::history_id`]
/// carries the new history from this entry onward; this payload just records the
/// membership it establishes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub peers: Vec<NodeId>,
}

/// A forced history branch, as installed by the failover coordinator (§4.2).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Branch {
    pub history_id: HistoryId,
    pub old_history_id: HistoryId,
    pub coordinator: NodeId,
    pub peers: Vec<NodeId>,
    pub opaque: Vec<u8>,
}

/// The peer's view of cluster metadata, as surfaced by the agent collaborator (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Metadata {
    pub peer: NodeId,
    pub history_id: HistoryId,
    pub committed_seqno: Seqno,
}

impl<C> MessageSummary for LogEntry<C> {
    fn summary(&self) -> String {
        format!("seqno={} term={} history={} {}", self.seqno, self.term, self.history_id, self.value.summary())
    }
}

impl<C> MessageSummary for EntryValue<C> {
    fn summary(&self) -> String {
        match self {
            EntryValue::RsmCommand { rsm_name, .. } => format!("rsm_command(name={})", rsm_name),
            EntryValue::ConfigEntry(c) => format!("config_entry(peers={})", c.peers.len()),
        }
    }
}

impl MessageSummary for Branch {
    fn summary(&self) -> String {
        format!(
            "history={} old_history={} coordinator={} peers={}",
            self.history_id,
            self.old_history_id,
            self.coordinator,
            self.peers.len()
        )
    }
}

impl MessageSummary for Metadata {
    fn summary(&self) -> String {
        format!("peer={} history={} committed_seqno={}", self.peer, self.history_id, self.committed_seqno)
    }
}
