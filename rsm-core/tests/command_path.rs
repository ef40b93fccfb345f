//! §8 scenarios 1, 2 and 8: the command path on a follower, a fully-committed command on
//! an established leader, and a command stranded by a term finishing before it applies.
//!
//! Also covers the quorum-read side of scenario 2 directly (Testable Property #6): a
//! `get_applied_revision(quorum)` issued while waiting for a seqno must park, then resolve
//! once that seqno is applied and the quorum round-trip confirms it.

mod fixtures;

use std::time::Duration;

use rsm_core::error::ClientError;
use rsm_mock::KvCommand;
use rsm_mock::KvReply;

use fixtures::KvFixture;
use fixtures::DEFAULT_TIMEOUT;

/// Scenario 1: a host that never became leader rejects a command with `not_leader`.
#[tokio::test]
async fn command_on_follower_is_rejected() {
    fixtures::init_tracing();
    let fx = KvFixture::spawn_follower(1).await.unwrap();

    let result = fx
        .host
        .command(
            KvCommand::Put {
                key: "a".into(),
                value: "1".into(),
            },
            DEFAULT_TIMEOUT,
        )
        .await;

    assert!(matches!(result, Err(ClientError::NotLeader)));
}

/// Scenario 1 variant + end-to-end command path: once a term is established at a seqno
/// already satisfied, a command reaches consensus, gets applied, and replies with the
/// state machine's actual result.
#[tokio::test]
async fn command_on_established_leader_commits_and_replies() {
    fixtures::init_tracing();
    let fx = KvFixture::spawn_follower(1).await.unwrap();

    fx.cluster.establish_term(1, 0);
    fx.wait(DEFAULT_TIMEOUT).leader_established().await.unwrap();

    let reply = fx
        .host
        .command(
            KvCommand::Put {
                key: "a".into(),
                value: "1".into(),
            },
            DEFAULT_TIMEOUT,
        )
        .await
        .unwrap();

    match reply {
        KvReply::Put { previous } => assert_eq!(previous, None),
        other => panic!("unexpected reply: {:?}", other),
    }

    let revision = fx.host.get_applied_revision(rsm_core::host::ReadKind::Leader, DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(revision.seqno, 1);
}

/// Scenario 8: a command is accepted at a seqno, but the term finishes before that entry is
/// ever applied — the parked client must be swept with `leader_lost`, not left hanging.
#[tokio::test]
async fn command_stranded_by_term_finish_gets_leader_lost() {
    fixtures::init_tracing();
    let fx = KvFixture::spawn_follower(1).await.unwrap();

    fx.cluster.establish_term(1, 0);
    fx.wait(DEFAULT_TIMEOUT).leader_established().await.unwrap();

    // Withhold the metadata publish so the command is accepted (seqno assigned, reply
    // parked as `CommandAccepted`) but never actually reaches the apply path.
    fx.cluster.set_withhold_metadata(true);

    let host = fx.host.clone();
    let command_task = tokio::spawn(async move {
        host.command(
            KvCommand::Put {
                key: "b".into(),
                value: "2".into(),
            },
            Duration::from_secs(5),
        )
        .await
    });

    // Give the command a chance to reach "accepted" before ending the term.
    tokio::time::sleep(Duration::from_millis(50)).await;
    fx.cluster.finish_term(1);

    let result = command_task.await.unwrap();
    assert!(matches!(result, Err(ClientError::LeaderLost)), "got {:?}", result);
}

/// Scenario 2 / Testable Property #6: a quorum-kind applied-revision read issued while the
/// leader is `WaitForSeqno(10)` parks rather than answering against a belief the host can't
/// back up yet; once log apply actually reaches seqno 10, the parked read issues its
/// `sync_quorum` round-trip and resolves `{ok,(h,10)}`.
#[tokio::test]
async fn quorum_read_parked_by_wait_for_seqno_resolves_once_applied() {
    fixtures::init_tracing();
    let fx = KvFixture::spawn_follower(1).await.unwrap();

    fx.cluster.establish_term(1, 10);

    let host = fx.host.clone();
    let read_task = tokio::spawn(async move { host.get_applied_revision(rsm_core::host::ReadKind::Quorum, DEFAULT_TIMEOUT).await });

    // Let the read land and park behind `WaitForSeqno(10)` before anything is committed.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let history_id = fx.cluster.current_history_id();
    for i in 0..10 {
        fx.host
            .command(
                KvCommand::Put {
                    key: format!("k{}", i),
                    value: "v".into(),
                },
                DEFAULT_TIMEOUT,
            )
            .await
            .unwrap();
    }

    let revision = read_task.await.unwrap().unwrap();
    assert_eq!(revision.history_id, history_id);
    assert_eq!(revision.seqno, 10);
}
