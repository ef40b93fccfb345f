//! §8 scenarios 3, 4 and 5: `sync_revision` against an already-satisfied target, against a
//! target that never arrives before its timeout, and against a target made stale by a
//! history transition.

mod fixtures;

use std::time::Duration;

use rsm_core::error::ClientError;
use rsm_core::Revision;
use rsm_mock::KvCommand;

use fixtures::KvFixture;
use fixtures::DEFAULT_TIMEOUT;

async fn commit_n(fx: &KvFixture, n: u64) {
    for i in 0..n {
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
}

/// Scenario 3: a revision already behind `applied_seqno` resolves immediately.
#[tokio::test]
async fn sync_revision_already_satisfied_is_immediate() {
    fixtures::init_tracing();
    let fx = KvFixture::spawn_follower(1).await.unwrap();
    fx.cluster.establish_term(1, 0);
    fx.wait(DEFAULT_TIMEOUT).leader_established().await.unwrap();

    commit_n(&fx, 7).await;
    let history_id = fx.cluster.current_history_id();

    let result = fx.host.sync_revision(Revision::new(history_id, 5), DEFAULT_TIMEOUT).await;
    assert!(result.is_ok(), "got {:?}", result);
}

/// Scenario 4: a revision ahead of anything committed times out.
#[tokio::test]
async fn sync_revision_times_out_with_no_new_entries() {
    fixtures::init_tracing();
    let fx = KvFixture::spawn_follower(1).await.unwrap();
    fx.cluster.establish_term(1, 0);
    fx.wait(DEFAULT_TIMEOUT).leader_established().await.unwrap();

    commit_n(&fx, 7).await;
    let history_id = fx.cluster.current_history_id();

    let result = fx.host.sync_revision(Revision::new(history_id, 9), Duration::from_millis(50)).await;
    assert!(matches!(result, Err(ClientError::Timeout)), "got {:?}", result);
}

/// Scenario 5: a `ConfigEntry` landing on a new history makes every queued `sync_revision`
/// against the old history resolve `history_mismatch`, regardless of how close it was.
#[tokio::test]
async fn sync_revision_queue_drained_on_history_change() {
    fixtures::init_tracing();
    let fx = KvFixture::spawn_follower(1).await.unwrap();
    fx.cluster.establish_term(1, 0);
    fx.wait(DEFAULT_TIMEOUT).leader_established().await.unwrap();

    commit_n(&fx, 20).await;
    let h1 = fx.cluster.current_history_id();

    let host_a = fx.host.clone();
    let host_b = fx.host.clone();
    let a = tokio::spawn(async move { host_a.sync_revision(Revision::new(h1, 25), Duration::from_secs(5)).await });
    let b = tokio::spawn(async move { host_b.sync_revision(Revision::new(h1, 30), Duration::from_secs(5)).await });

    // Let both requests land in the queue before the history transition commits.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let h2 = uuid::Uuid::new_v4();
    fx.cluster.install_config_entry(h2, vec![fx.node_id]);

    let (ra, rb) = (a.await.unwrap(), b.await.unwrap());
    assert!(matches!(ra, Err(ClientError::HistoryMismatch)), "got {:?}", ra);
    assert!(matches!(rb, Err(ClientError::HistoryMismatch)), "got {:?}", rb);

    let applied = fx.host.get_applied_revision(rsm_core::host::ReadKind::Leader, DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(applied.history_id, h2);
    assert_eq!(applied.seqno, 21);
}
