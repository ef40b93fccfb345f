//! The `RsmHost` actor: owns all mutable state for one named RSM instance exclusively, and
//! is driven entirely by its `run` loop. No field here is ever touched from outside it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::collaborators::Agent;
use crate::collaborators::CommandAck;
use crate::collaborators::ConsensusEvent;
use crate::collaborators::ConsensusServer;
use crate::collaborators::QuorumAck;
use crate::collaborators::Ref;
use crate::collaborators::StateMachine;
use crate::collaborators::StopReason;
use crate::config::Config;
use crate::error::TerminateReason;
use crate::model::EntryValue;
use crate::model::LogEntry;
use crate::model::Metadata;
use crate::revision::HistoryId;
use crate::revision::Revision;
use crate::revision::RevisionWriter;
use crate::revision::Seqno;

use super::pending::PendingClient;
use super::pending::PendingClients;
use super::pending::SyncRevisionQueue;
use super::reader;
use super::reader::ReaderDelivery;
use super::RsmMsg;

/// The leader substate described in §4.1's state diagram.
pub(crate) enum LeaderSubstate {
    Follower,
    Leader {
        history_id: HistoryId,
        term: u64,
        status: LeaderStatus,
    },
}

pub(crate) enum LeaderStatus {
    WaitForSeqno(Seqno),
    Established,
}

/// A client-facing read parked because the leader hasn't caught up to the seqno it
/// established its term at yet. Redelivered once `status` becomes `Established`.
pub(crate) enum PostponedRead {
    AppliedRevisionLeader(oneshot::Sender<Result<Revision, crate::error::ClientError>>),
    AppliedRevisionQuorum(oneshot::Sender<Result<Revision, crate::error::ClientError>>),
    SyncLeader(oneshot::Sender<Result<(), crate::error::ClientError>>),
    SyncQuorum(oneshot::Sender<Result<(), crate::error::ClientError>>),
}

/// Internal wake-ups this actor schedules for itself: per-request timers post here rather
/// than racing the client-facing mailbox.
pub(crate) enum Internal {
    SyncRevisionTimeout { seqno: Seqno, tag: Ref },
}

type ReaderHandle<C> = JoinHandle<Result<ReaderDelivery<C>, crate::error::PeerError>>;

pub struct RsmHostCore<S: StateMachine> {
    pub(crate) name: String,
    pub(crate) state_machine: Arc<S>,
    pub(crate) mod_state: S::State,
    /// `None` only for the instant a user-state-machine call has taken ownership of the
    /// data and not yet returned it; never observed `None` outside that window since the
    /// actor never re-enters itself mid-`await`.
    pub(crate) mod_data: Option<S::Data>,

    pub(crate) consensus: Arc<dyn ConsensusServer<S::Command>>,
    pub(crate) agent: Arc<dyn Agent<S::Command>>,
    pub(crate) revision: RevisionWriter,
    pub(crate) config: Config,

    pub(crate) applied_history_id: HistoryId,
    pub(crate) applied_seqno: Seqno,
    pub(crate) read_seqno: Seqno,
    pub(crate) available_seqno: Seqno,

    pub(crate) pending: PendingClients<S::Reply>,
    pub(crate) sync_revision_queue: SyncRevisionQueue,
    pub(crate) reader: Option<ReaderHandle<S::Command>>,
    pub(crate) leader: LeaderSubstate,
    pub(crate) postponed_reads: Vec<PostponedRead>,

    pub(crate) metrics_tx: watch::Sender<crate::metrics::RsmMetrics>,

    pub(crate) rx_msg: mpsc::Receiver<RsmMsg<S>>,
    pub(crate) rx_consensus: mpsc::UnboundedReceiver<ConsensusEvent>,
    pub(crate) rx_metadata: mpsc::UnboundedReceiver<Metadata>,
    pub(crate) rx_internal: mpsc::UnboundedReceiver<Internal>,
    pub(crate) tx_internal: mpsc::UnboundedSender<Internal>,
}

impl<S: StateMachine> RsmHostCore<S> {
    /// Drive this instance until its mailbox is closed or it hits a fatal condition.
    pub(crate) async fn run(mut self) {
        let reason = loop {
            let span = tracing::debug_span!("CH", name = %self.name);
            let _enter = span.enter();

            // Biased: a consensus-event ack (e.g. `CommandResult::Accepted`) and the
            // metadata update reflecting that same commit can both already be sitting in
            // their channels by the time this loop polls again — a collaborator that acks
            // before it gossips committed_seqno (the only sane order) relies on us draining
            // rx_consensus first, or `reply_command_if_current_term`'s by-seqno lookup can
            // race the apply path and never find a tag to reply to.
            tokio::select! {
                biased;
                ev = self.rx_consensus.recv() => {
                    match ev {
                        Some(e) => {
                            tracing::trace!(name = %self.name, event = %e.summary(), "recv consensus event");
                            self.handle_consensus_event(e).await
                        }
                        None => break TerminateReason::HandleDropped,
                    }
                }
                msg = self.rx_msg.recv() => {
                    match msg {
                        Some(m) => {
                            tracing::trace!(name = %self.name, msg = %m.summary(), "recv client message");
                            self.handle_client_msg(m).await
                        }
                        None => break TerminateReason::HandleDropped,
                    }
                }
                md = self.rx_metadata.recv() => {
                    match md {
                        Some(m) => {
                            tracing::trace!(name = %self.name, metadata = %m.summary(), "recv metadata");
                            self.handle_metadata(m).await
                        }
                        None => break TerminateReason::HandleDropped,
                    }
                }
                internal = self.rx_internal.recv() => {
                    if let Some(i) = internal {
                        tracing::trace!(name = %self.name, "recv internal wake-up");
                        self.handle_internal(i).await;
                    }
                }
                result = reader::poll_reader(&mut self.reader) => {
                    self.reader = None;
                    match result {
                        Ok(Ok(delivery)) => {
                            tracing::trace!(name = %self.name, high_seqno = delivery.high_seqno, n = delivery.entries.len(), "recv reader delivery");
                            self.apply_delivery(delivery).await
                        }
                        Ok(Err(e)) => {
                            tracing::error!(name = %self.name, error = %e, "log reader reported an error");
                            break TerminateReason::ReaderDied;
                        }
                        Err(join_err) => {
                            tracing::error!(name = %self.name, error = %join_err, "log reader task panicked");
                            break TerminateReason::ReaderDied;
                        }
                    }
                }
            }
        };

        self.terminate(reason).await;
    }

    async fn terminate(self, reason: TerminateReason) {
        let stop_reason = match reason {
            TerminateReason::Stopped => StopReason::UserRequested,
            _ => StopReason::HostTerminating,
        };
        let applied_rev = Revision::new(self.applied_history_id, self.applied_seqno);
        tracing::info!(name = %self.name, reason = %reason, "rsm host terminating");
        self.revision.clear().await;
        let data = self.mod_data.expect("mod_data present at terminate");
        self.state_machine.terminate(stop_reason, applied_rev, self.mod_state, data).await;
    }

    pub(crate) fn applied_revision(&self) -> Revision {
        Revision::new(self.applied_history_id, self.applied_seqno)
    }

    fn publish_metrics(&self) {
        let state = match &self.leader {
            LeaderSubstate::Follower => crate::metrics::LeaderState::Follower,
            LeaderSubstate::Leader { term, status, .. } => crate::metrics::LeaderState::Leader {
                term: *term,
                established: matches!(status, LeaderStatus::Established),
            },
        };
        let _ = self.metrics_tx.send(crate::metrics::RsmMetrics {
            name: self.name.clone(),
            state,
            applied_history_id: self.applied_history_id,
            applied_seqno: self.applied_seqno,
            read_seqno: self.read_seqno,
            available_seqno: self.available_seqno,
        });
    }

    async fn publish_revision(&self) {
        self.revision.publish(self.applied_revision()).await;
    }

    #[tracing::instrument(level = "debug", skip(self), fields(name = %self.name))]
    async fn handle_metadata(&mut self, metadata: Metadata) {
        if metadata.committed_seqno > self.available_seqno {
            self.available_seqno = metadata.committed_seqno;
        }
        self.maybe_start_reader();
    }

    fn maybe_start_reader(&mut self) {
        if self.reader.is_some() {
            return;
        }
        if self.available_seqno <= self.read_seqno {
            return;
        }
        self.reader = Some(reader::spawn_reader(
            self.agent.clone(),
            self.name.clone(),
            self.read_seqno,
            self.available_seqno,
            self.config.reader_batch_size,
        ));
    }

    #[tracing::instrument(level = "debug", skip(self, delivery), fields(name = %self.name, high_seqno = delivery.high_seqno))]
    async fn apply_delivery(&mut self, delivery: ReaderDelivery<S::Command>) {
        for entry in delivery.entries {
            self.apply_entry(entry).await;
        }
        self.read_seqno = delivery.high_seqno;
        self.publish_revision().await;
        self.publish_metrics();
        self.maybe_complete_wait_for_seqno();
        self.maybe_start_reader();
    }

    /// §4.1 "apply_entry rules (per entry)".
    async fn apply_entry(&mut self, entry: LogEntry<S::Command>) {
        match entry.value {
            EntryValue::RsmCommand { rsm_name, command } => {
                debug_assert_eq!(rsm_name, self.name, "reader delivered an entry for another RSM");
                if entry.history_id != self.applied_history_id {
                    tracing::warn!(
                        name = %self.name,
                        entry_history = %entry.history_id,
                        applied_history = %self.applied_history_id,
                        "dropping command entry from a stale history"
                    );
                    return;
                }
                let entry_rev = Revision::new(entry.history_id, entry.seqno);
                let data = self.mod_data.take().expect("mod_data present while applying");
                let (reply, data) = self
                    .state_machine
                    .apply_command(command, entry_rev, self.applied_revision(), &mut self.mod_state, data)
                    .await;
                self.mod_data = Some(data);
                self.applied_seqno = entry.seqno;

                if let Some(tag) = self.pending.peek_at_seqno(entry.seqno) {
                    self.reply_command_if_current_term(tag, entry.term, reply);
                }
            }
            EntryValue::ConfigEntry(_) => {
                if entry.history_id == self.applied_history_id {
                    self.applied_seqno = entry.seqno;
                    return;
                }
                self.applied_history_id = entry.history_id;
                self.applied_seqno = entry.seqno;
                self.sweep_sync_revision_on_history_change(entry.history_id);
            }
        }
    }

    fn reply_command_if_current_term(&mut self, tag: Ref, entry_term: u64, reply: S::Reply) {
        let current_term = match &self.leader {
            LeaderSubstate::Leader { term, .. } => Some(*term),
            LeaderSubstate::Follower => None,
        };
        if current_term != Some(entry_term) {
            // Stale leader observing a commit made under a different term: leave the
            // client parked in `entries` (already `CommandAccepted`) until whichever term
            // actually owns it finishes and sweeps it with `leader_lost`.
            return;
        }
        match self.pending.take(tag) {
            Some(PendingClient::CommandAccepted(reply_to)) => {
                let _ = reply_to.send(Ok(reply));
            }
            Some(_) => unreachable!("a seqno-keyed tag is always CommandAccepted"),
            None => {}
        }
    }

    fn sweep_sync_revision_on_history_change(&mut self, new_history_id: HistoryId) {
        for entry in self.sync_revision_queue.drain_all() {
            if entry.history_id == new_history_id {
                entry.timer.abort();
                let _ = entry.reply_to.send(Ok(()));
            } else {
                entry.timer.abort();
                let _ = entry.reply_to.send(Err(crate::error::ClientError::HistoryMismatch));
            }
        }
    }

    fn maybe_complete_wait_for_seqno(&mut self) {
        if let LeaderSubstate::Leader {
            status: LeaderStatus::WaitForSeqno(target),
            history_id,
            term,
        } = &self.leader
        {
            if self.applied_seqno >= *target {
                tracing::debug!(
                    name = %self.name,
                    history_id = %history_id,
                    term = %term,
                    applied_seqno = %self.applied_seqno,
                    "leader wait-for-seqno satisfied, now established"
                );
                self.leader = LeaderSubstate::Leader {
                    history_id: *history_id,
                    term: *term,
                    status: LeaderStatus::Established,
                };
                self.publish_metrics();
                self.redeliver_postponed_reads();
            }
        }
        let satisfied = self.sync_revision_queue.drain_satisfied(self.applied_seqno);
        for entry in satisfied {
            entry.timer.abort();
            let _ = entry.reply_to.send(Ok(()));
        }
    }

    fn redeliver_postponed_reads(&mut self) {
        for read in std::mem::take(&mut self.postponed_reads) {
            match read {
                PostponedRead::AppliedRevisionLeader(reply_to) => {
                    let _ = reply_to.send(Ok(self.applied_revision()));
                }
                PostponedRead::SyncLeader(reply_to) => {
                    let _ = reply_to.send(Ok(()));
                }
                PostponedRead::AppliedRevisionQuorum(reply_to) => self.issue_quorum_read(reply_to),
                PostponedRead::SyncQuorum(reply_to) => {
                    let (tx, rx) = oneshot::channel();
                    self.issue_quorum_read(tx);
                    tokio::spawn(async move {
                        let result = rx.await.unwrap_or(Err(crate::error::ClientError::LeaderLost));
                        let _ = reply_to.send(result.map(|_| ()));
                    });
                }
            }
        }
    }

    /// Issue a `sync_quorum` call and park `reply_to` for its result. Only valid while
    /// `Leader{Established}` — callers must check that themselves.
    pub(crate) fn issue_quorum_read(&mut self, reply_to: oneshot::Sender<Result<Revision, crate::error::ClientError>>) {
        let (history_id, term) = match self.current_term() {
            Some(ht) => ht,
            None => {
                let _ = reply_to.send(Err(crate::error::ClientError::NotLeader));
                return;
            }
        };
        let tag = self.pending.fresh_ref();
        self.pending.park(tag, PendingClient::SyncQuorum(reply_to));
        self.consensus.sync_quorum(tag, history_id, term);
    }

    #[tracing::instrument(level = "debug", skip(self), fields(name = %self.name))]
    async fn handle_consensus_event(&mut self, event: ConsensusEvent) {
        match event {
            ConsensusEvent::CommandResult { tag, outcome } => self.handle_command_result(tag, outcome),
            ConsensusEvent::QuorumResult { tag, outcome } => self.handle_quorum_result(tag, outcome),
            ConsensusEvent::TermEstablished { history_id, term, seqno } => {
                self.on_term_established(history_id, term, seqno)
            }
            ConsensusEvent::TermFinished { history_id, term } => self.on_term_finished(history_id, term),
        }
    }

    fn handle_command_result(&mut self, tag: Ref, outcome: CommandAck) {
        match outcome {
            CommandAck::Accepted(seqno) => self.pending.accept_at_seqno(tag, seqno),
            CommandAck::Error(e) => {
                if let Some(PendingClient::Command(reply_to)) = self.pending.take(tag) {
                    let _ = reply_to.send(Err(crate::error::ClientError::LeaderError(e.to_string())));
                }
            }
        }
    }

    fn handle_quorum_result(&mut self, tag: Ref, outcome: QuorumAck) {
        let Some(PendingClient::SyncQuorum(reply_to)) = self.pending.take(tag) else {
            tracing::warn!(tag, "quorum result for unknown or mismatched tag");
            return;
        };
        match outcome {
            QuorumAck::Ok => {
                let _ = reply_to.send(Ok(self.applied_revision()));
            }
            QuorumAck::Error(e) => {
                let _ = reply_to.send(Err(crate::error::ClientError::LeaderError(e.to_string())));
            }
        }
    }

    /// §4.1 leader state machine: `Follower --term_established(h,t,S)--> Leader{...}`.
    fn on_term_established(&mut self, history_id: HistoryId, term: u64, seqno: Seqno) {
        let status = if self.applied_seqno >= seqno {
            LeaderStatus::Established
        } else {
            LeaderStatus::WaitForSeqno(seqno)
        };
        tracing::debug!(
            name = %self.name,
            history_id = %history_id,
            term = %term,
            establishing_seqno = %seqno,
            applied_seqno = %self.applied_seqno,
            waiting = matches!(status, LeaderStatus::WaitForSeqno(_)),
            "term established, now leading"
        );
        self.leader = LeaderSubstate::Leader { history_id, term, status };
        self.publish_metrics();
    }

    /// §4.1 leader state machine: `Leader --term_finished(h,t)--> Follower`.
    fn on_term_finished(&mut self, history_id: HistoryId, term: u64) {
        if let LeaderSubstate::Leader {
            history_id: cur_h,
            term: cur_t,
            ..
        } = &self.leader
        {
            debug_assert_eq!(*cur_h, history_id, "term_finished for a history we aren't leading");
            debug_assert_eq!(*cur_t, term, "term_finished for a term we aren't leading");
        }
        tracing::debug!(name = %self.name, history_id = %history_id, term = %term, "term finished, reverting to follower");
        self.pending.sweep_term_finished();
        self.leader = LeaderSubstate::Follower;
        self.publish_metrics();
    }

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::SyncRevisionTimeout { seqno, tag } => {
                if let Some(entry) = self.sync_revision_queue.remove(seqno, tag) {
                    let _ = entry.reply_to.send(Err(crate::error::ClientError::Timeout));
                }
            }
        }
    }

    pub(crate) fn is_leader_established(&self) -> bool {
        matches!(
            self.leader,
            LeaderSubstate::Leader {
                status: LeaderStatus::Established,
                ..
            }
        )
    }

    pub(crate) fn current_term(&self) -> Option<(HistoryId, u64)> {
        match &self.leader {
            LeaderSubstate::Leader { history_id, term, .. } => Some((*history_id, *term)),
            LeaderSubstate::Follower => None,
        }
    }
}

