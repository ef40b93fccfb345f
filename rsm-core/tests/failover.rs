//! §8 scenarios 6 and 7, plus the failover/cancel round-trip and idempotence properties.

use std::sync::Arc;

use rsm_core::error::FailoverError;
use rsm_core::FailoverCoordinator;
use rsm_mock::KvCommand;
use rsm_mock::MockCluster;
use rsm_mock::PeerBehavior;

const A: u64 = 1;
const B: u64 = 2;
const C: u64 = 3;

fn coordinator_at(cluster: &MockCluster<KvCommand>, self_id: u64) -> FailoverCoordinator<KvCommand> {
    FailoverCoordinator::new(self_id, cluster.agent(), rsm_core::Config::default())
}

/// Scenario 6: one of the kept followers reports a history mismatch, another confirms —
/// the whole attempt aborts, classified correctly, and cleanup is attempted on every peer
/// that was actually contacted.
#[tokio::test]
async fn failover_aborts_on_incompatible_peer() {
    let cluster: MockCluster<KvCommand> = MockCluster::new(A, uuid::Uuid::new_v4());
    cluster.set_peer_behavior(B, PeerBehavior::HistoryMismatch);
    cluster.set_peer_behavior(C, PeerBehavior::Normal);

    let coordinator = coordinator_at(&cluster, A);
    let result = coordinator.failover(vec![A, B, C], vec![]).await;

    match result {
        Err(FailoverError::Aborted {
            incompatible_peers,
            failed_peers,
        }) => {
            assert_eq!(incompatible_peers, vec![B]);
            assert!(failed_peers.is_empty());
        }
        other => panic!("expected Aborted, got {:?}", other),
    }
}

/// Scenario 7: every follower accepts the branch, but the local (self) install fails —
/// `failed_peers` names only self, and the followers that did succeed get rolled back.
#[tokio::test]
async fn failover_aborts_on_local_store_failure() {
    let cluster: MockCluster<KvCommand> = MockCluster::new(A, uuid::Uuid::new_v4());
    cluster.set_peer_behavior(B, PeerBehavior::Normal);
    cluster.set_peer_behavior(C, PeerBehavior::Normal);
    cluster.set_peer_behavior(A, PeerBehavior::Fails);

    let coordinator = coordinator_at(&cluster, A);
    let result = coordinator.failover(vec![A, B, C], vec![]).await;

    match result {
        Err(FailoverError::Aborted {
            incompatible_peers,
            failed_peers,
        }) => {
            assert!(incompatible_peers.is_empty());
            assert_eq!(failed_peers, vec![A]);
        }
        other => panic!("expected Aborted, got {:?}", other),
    }
}

/// A coordinator refuses to run if it isn't itself a member of the keep set.
#[tokio::test]
async fn failover_rejects_self_not_in_keep_set() {
    let cluster: MockCluster<KvCommand> = MockCluster::new(A, uuid::Uuid::new_v4());
    let coordinator = coordinator_at(&cluster, A);

    let result = coordinator.failover(vec![B, C], vec![]).await;
    assert!(matches!(result, Err(FailoverError::NotInPeers { this: A, .. })), "got {:?}", result);
}

/// Round-trip: a successful failover followed by canceling the very branch it installed
/// reports `ok` and leaves the door open for a fresh branch on the same peers.
#[tokio::test]
async fn failover_then_cancel_round_trips() {
    let cluster: MockCluster<KvCommand> = MockCluster::new(A, uuid::Uuid::new_v4());
    let coordinator = Arc::new(coordinator_at(&cluster, A));

    coordinator.failover(vec![A, B, C], vec![]).await.unwrap();

    // failover() doesn't itself commit the new history to the cluster's log (that's a
    // consensus concern); recover the branch it installed on `B` to hand to try_cancel.
    let branch = cluster.branch_held_by(B).expect("failover should have installed a branch on B");

    let cancel = coordinator.try_cancel(branch).await;
    assert!(cancel.is_ok(), "got {:?}", cancel);

    // A second failover against the same keep set, with a fresh history id, proceeds
    // cleanly now that the branch has been rolled back everywhere.
    coordinator.failover(vec![A, B, C], vec![]).await.unwrap();
}

/// Idempotence: canceling a branch nobody (or no longer) holds is still `ok`.
#[tokio::test]
async fn cancel_of_unknown_branch_is_ok() {
    let cluster: MockCluster<KvCommand> = MockCluster::new(A, uuid::Uuid::new_v4());
    let coordinator = coordinator_at(&cluster, A);

    let branch = rsm_core::Branch {
        history_id: uuid::Uuid::new_v4(),
        old_history_id: uuid::Uuid::nil(),
        coordinator: A,
        peers: vec![A, B, C],
        opaque: vec![],
    };

    let result = coordinator.try_cancel(branch).await;
    assert!(result.is_ok(), "got {:?}", result);
}
