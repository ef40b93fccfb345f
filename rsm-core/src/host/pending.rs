//! The two maps an [`super::RsmHost`] actor uses to park clients between a request and the
//! later event that resolves it: correlated by opaque refs, never by blocking a task.

use std::collections::BTreeMap;
use std::collections::HashMap;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::collaborators::Ref;
use crate::error::ClientError;
use crate::revision::HistoryId;
use crate::revision::Revision;
use crate::revision::Seqno;

/// A parked client waiting on the outcome of a command or a quorum-confirmed read.
///
/// The three variants hold different reply types because they answer different public
/// operations; unifying them into one oneshot type would force every caller to unwrap an
/// enum it already knows the shape of.
pub enum PendingClient<R> {
    /// Submitted to the consensus server, awaiting `Accepted(seqno)` or `Error`.
    Command(oneshot::Sender<Result<R, ClientError>>),
    /// Accepted at a known seqno; awaiting that entry to be applied.
    CommandAccepted(oneshot::Sender<Result<R, ClientError>>),
    /// Awaiting a `sync_quorum` acknowledgment for `get_applied_revision(quorum)`.
    SyncQuorum(oneshot::Sender<Result<Revision, ClientError>>),
}

/// `ref → (client, kind)`, per the data model.
#[derive(Default)]
pub struct PendingClients<R> {
    next_ref: Ref,
    entries: HashMap<Ref, PendingClient<R>>,
    /// Populated once a `Command` entry is reported `Accepted(seqno)`, so the apply path
    /// can look a parked client up by seqno instead of scanning.
    by_seqno: HashMap<Seqno, Ref>,
}

impl<R> PendingClients<R> {
    pub fn new() -> Self {
        Self {
            next_ref: 1,
            entries: HashMap::new(),
            by_seqno: HashMap::new(),
        }
    }

    pub fn fresh_ref(&mut self) -> Ref {
        let r = self.next_ref;
        self.next_ref += 1;
        r
    }

    pub fn park(&mut self, tag: Ref, client: PendingClient<R>) {
        self.entries.insert(tag, client);
    }

    pub fn take(&mut self, tag: Ref) -> Option<PendingClient<R>> {
        self.entries.remove(&tag)
    }

    /// Move a tag registered against a `ref` onto `seqno`, turning a `Command` entry into
    /// `CommandAccepted`. Panics if `seqno` is already occupied, mirroring the invariant
    /// the consensus server is trusted to uphold (seqnos are assigned once).
    pub fn accept_at_seqno(&mut self, tag: Ref, seqno: Seqno) {
        let client = match self.entries.remove(&tag) {
            Some(PendingClient::Command(reply_to)) => reply_to,
            Some(other) => {
                self.entries.insert(tag, other);
                tracing::error!(tag, seqno, "accept_at_seqno: tag was not a pending Command");
                return;
            }
            None => {
                tracing::warn!(tag, seqno, "accept_at_seqno: no pending client for tag");
                return;
            }
        };
        assert!(
            !self.by_seqno.contains_key(&seqno),
            "duplicate acceptance at seqno {}",
            seqno
        );
        self.by_seqno.insert(seqno, tag);
        self.entries.insert(tag, PendingClient::CommandAccepted(client));
    }

    /// Look up (without removing from `entries`) the client parked at `seqno`, returning
    /// its tag. The `by_seqno` link is consumed either way — a seqno is only ever looked
    /// up once, when its entry applies — but the client stays in `entries` (so
    /// `sweep_term_finished` can still find it) until the caller decides via [`Self::take`]
    /// that it actually owns a reply.
    pub fn peek_at_seqno(&mut self, seqno: Seqno) -> Option<Ref> {
        self.by_seqno.remove(&seqno)
    }

    /// Drain every `CommandAccepted` entry, replying `leader_lost` to each — invoked when
    /// a term finishes with commands still in flight.
    pub fn sweep_term_finished(&mut self) {
        let stale: Vec<Ref> = self
            .entries
            .iter()
            .filter(|(_, c)| matches!(c, PendingClient::CommandAccepted(_)))
            .map(|(tag, _)| *tag)
            .collect();
        for tag in stale {
            if let Some(PendingClient::CommandAccepted(reply_to)) = self.entries.remove(&tag) {
                let _ = reply_to.send(Err(ClientError::LeaderLost));
            }
        }
        self.by_seqno.clear();
    }
}

/// A client parked on `sync_revision((history, seqno))` until the log catches up, times
/// out, or the applied history diverges from the one requested.
pub struct SyncRevisionEntry {
    pub reply_to: oneshot::Sender<Result<(), ClientError>>,
    pub history_id: HistoryId,
    pub timer: JoinHandle<()>,
}

/// `(seqno, ref) → entry`, ordered ascending by seqno so "release everything satisfied by
/// the new applied_seqno" is an O(k) amortized prefix scan rather than a full map walk.
#[derive(Default)]
pub struct SyncRevisionQueue {
    next_ref: Ref,
    entries: BTreeMap<(Seqno, Ref), SyncRevisionEntry>,
}

impl SyncRevisionQueue {
    pub fn new() -> Self {
        Self {
            next_ref: 1,
            entries: BTreeMap::new(),
        }
    }

    pub fn fresh_ref(&mut self) -> Ref {
        let r = self.next_ref;
        self.next_ref += 1;
        r
    }

    pub fn insert(&mut self, tag: Ref, seqno: Seqno, entry: SyncRevisionEntry) {
        self.entries.insert((seqno, tag), entry);
    }

    pub fn remove(&mut self, seqno: Seqno, tag: Ref) -> Option<SyncRevisionEntry> {
        self.entries.remove(&(seqno, tag))
    }

    /// Pop and return every entry whose seqno is `<= applied_seqno`, in ascending order.
    pub fn drain_satisfied(&mut self, applied_seqno: Seqno) -> Vec<SyncRevisionEntry> {
        let tail = self.entries.split_off(&(applied_seqno + 1, 0));
        std::mem::replace(&mut self.entries, tail)
            .into_values()
            .collect()
    }

    /// Pop and return every entry, regardless of seqno — used when the applied history
    /// itself changes and all outstanding requests become stale.
    pub fn drain_all(&mut self) -> Vec<SyncRevisionEntry> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
