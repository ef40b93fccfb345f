//! Handlers for the five client-facing operations, split out of `core.rs` to keep the
//! actor's main loop focused on dispatch.

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::collaborators::StateMachine;
use crate::error::ClientError;
use crate::revision::Revision;

use super::core::LeaderStatus;
use super::core::LeaderSubstate;
use super::core::PostponedRead;
use super::core::RsmHostCore;
use super::pending::PendingClient;
use super::pending::SyncRevisionEntry;
use super::ReadKind;
use super::RsmMsg;

impl<S: StateMachine> RsmHostCore<S> {
    pub(crate) async fn handle_client_msg(&mut self, msg: RsmMsg<S>) {
        match msg {
            RsmMsg::Command { command, reply_to } => self.handle_command(command, reply_to).await,
            RsmMsg::Query { query, reply_to } => self.handle_query(query, reply_to).await,
            RsmMsg::SyncRevision {
                revision,
                timeout,
                reply_to,
            } => self.handle_sync_revision(revision, timeout, reply_to),
            RsmMsg::Sync { kind, reply_to } => self.handle_sync(kind, reply_to),
            RsmMsg::GetAppliedRevision { kind, reply_to } => self.handle_get_applied_revision(kind, reply_to),
        }
    }

    /// §4.1 "Command path (leader only)", steps 1-3.
    async fn handle_command(&mut self, command: S::Command, reply_to: oneshot::Sender<Result<S::Reply, ClientError>>) {
        let (history_id, term) = match self.current_term() {
            Some(ht) => ht,
            None => {
                let _ = reply_to.send(Err(ClientError::NotLeader));
                return;
            }
        };

        let data = self.mod_data.take().expect("mod_data present while handling a command");
        let outcome = self
            .state_machine
            .handle_command(&command, self.applied_revision(), &mut self.mod_state, data);

        match outcome {
            crate::collaborators::CommandOutcome::Reject(reply, data) => {
                self.mod_data = Some(data);
                let _ = reply_to.send(Ok(reply));
            }
            crate::collaborators::CommandOutcome::Apply(data) => {
                self.mod_data = Some(data);
                let tag = self.pending.fresh_ref();
                self.pending.park(tag, PendingClient::Command(reply_to));
                self.consensus.rsm_command(tag, history_id, term, &self.name, command);
            }
        }
    }

    async fn handle_query(&mut self, query: S::Query, reply_to: oneshot::Sender<Result<S::Reply, ClientError>>) {
        let data = self.mod_data.take().expect("mod_data present while handling a query");
        let (reply, data) = self
            .state_machine
            .handle_query(query, self.applied_revision(), &self.mod_state, data)
            .await;
        self.mod_data = Some(data);
        let _ = reply_to.send(Ok(reply));
    }

    /// §4.1 "sync_revision semantics".
    fn handle_sync_revision(&mut self, revision: Revision, timeout: std::time::Duration, reply_to: oneshot::Sender<Result<(), ClientError>>) {
        if revision.history_id != self.applied_history_id {
            let _ = reply_to.send(Err(ClientError::HistoryMismatch));
            return;
        }
        if revision.seqno <= self.applied_seqno {
            let _ = reply_to.send(Ok(()));
            return;
        }

        let tag = self.sync_revision_queue.fresh_ref();
        let timer = self.arm_sync_revision_timer(revision.seqno, tag, timeout);
        self.sync_revision_queue.insert(
            tag,
            revision.seqno,
            SyncRevisionEntry {
                reply_to,
                history_id: revision.history_id,
                timer,
            },
        );
    }

    fn arm_sync_revision_timer(&self, seqno: crate::revision::Seqno, tag: crate::collaborators::Ref, timeout: std::time::Duration) -> JoinHandle<()> {
        let tx = self.tx_internal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(super::core::Internal::SyncRevisionTimeout { seqno, tag });
        })
    }

    /// `sync(name, leader|quorum, timeout)`: confirm freshness without returning a
    /// revision. Implemented as `get_applied_revision` with the value discarded, since the
    /// two operations share every branch of the leader-state dispatch.
    fn handle_sync(&mut self, kind: ReadKind, reply_to: oneshot::Sender<Result<(), ClientError>>) {
        match kind {
            ReadKind::Leader => match &self.leader {
                LeaderSubstate::Follower => {
                    let _ = reply_to.send(Err(ClientError::NotLeader));
                }
                LeaderSubstate::Leader {
                    status: LeaderStatus::Established,
                    ..
                } => {
                    let _ = reply_to.send(Ok(()));
                }
                LeaderSubstate::Leader {
                    status: LeaderStatus::WaitForSeqno(_),
                    ..
                } => self.postponed_reads.push(PostponedRead::SyncLeader(reply_to)),
            },
            ReadKind::Quorum => match &self.leader {
                LeaderSubstate::Follower => {
                    let _ = reply_to.send(Err(ClientError::NotLeader));
                }
                LeaderSubstate::Leader {
                    status: LeaderStatus::WaitForSeqno(_),
                    ..
                } => self.postponed_reads.push(PostponedRead::SyncQuorum(reply_to)),
                LeaderSubstate::Leader {
                    status: LeaderStatus::Established,
                    ..
                } => {
                    let (tx, rx) = oneshot::channel();
                    self.issue_quorum_read(tx);
                    tokio::spawn(async move {
                        let result = rx.await.unwrap_or(Err(ClientError::LeaderLost));
                        let _ = reply_to.send(result.map(|_| ()));
                    });
                }
            },
        }
    }

    /// §4.1 "Applied-revision reads".
    fn handle_get_applied_revision(&mut self, kind: ReadKind, reply_to: oneshot::Sender<Result<Revision, ClientError>>) {
        match kind {
            ReadKind::Leader => match &self.leader {
                LeaderSubstate::Follower => {
                    let _ = reply_to.send(Err(ClientError::NotLeader));
                }
                LeaderSubstate::Leader {
                    status: LeaderStatus::Established,
                    ..
                } => {
                    let _ = reply_to.send(Ok(self.applied_revision()));
                }
                LeaderSubstate::Leader {
                    status: LeaderStatus::WaitForSeqno(_),
                    ..
                } => self.postponed_reads.push(PostponedRead::AppliedRevisionLeader(reply_to)),
            },
            ReadKind::Quorum => match &self.leader {
                LeaderSubstate::Follower => {
                    let _ = reply_to.send(Err(ClientError::NotLeader));
                }
                LeaderSubstate::Leader {
                    status: LeaderStatus::WaitForSeqno(_),
                    ..
                } => self.postponed_reads.push(PostponedRead::AppliedRevisionQuorum(reply_to)),
                LeaderSubstate::Leader {
                    status: LeaderStatus::Established,
                    ..
                } => self.issue_quorum_read(reply_to),
            },
        }
    }
}
