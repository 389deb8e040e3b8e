//! End-to-end two-phase commit runs against in-memory participants

mod common;

use common::{Cluster, init_tracing};
use std::sync::Arc;
use std::time::Duration;
use twophase_coordinator::{
    AckStatus, Coordinator, CoordinatorConfig, CoordinatorError, Decision, Participant,
    TransactionId, VoteStatus,
};
use twophase_participant::{Behavior, CallKind, Resolution};

const PREPARE_TIMEOUT: Duration = Duration::from_millis(500);
const COMMIT_TIMEOUT: Duration = Duration::from_millis(500);

fn coordinator() -> Coordinator {
    Coordinator::new(CoordinatorConfig::for_testing())
}

#[tokio::test]
async fn test_all_yes_commits_everywhere() {
    init_tracing();
    let cluster = Cluster::healthy(3);
    let txn = TransactionId::new();
    cluster.stage_all(txn, "balance", "100");

    let outcome = coordinator()
        .execute_with_id(txn, &cluster.handles(), PREPARE_TIMEOUT, COMMIT_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(outcome.decision(), Decision::Committed);
    assert_eq!(outcome.votes(), &[VoteStatus::Yes; 3]);
    assert_eq!(outcome.acks(), &[AckStatus::Acked; 3]);
    for index in 0..3 {
        assert_eq!(
            cluster.calls(index, txn),
            vec![CallKind::Prepare, CallKind::Commit]
        );
        assert_eq!(cluster.node(index).get("balance").as_deref(), Some("100"));
    }
}

#[tokio::test]
async fn test_single_no_vote_aborts_and_rolls_back_yes_voters() {
    init_tracing();
    let cluster = Cluster::new(vec![
        Behavior::default(),
        Behavior::refusing(),
        Behavior::default(),
    ]);
    let txn = TransactionId::new();
    cluster.stage_all(txn, "balance", "100");

    let outcome = coordinator()
        .execute_with_id(txn, &cluster.handles(), PREPARE_TIMEOUT, COMMIT_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(outcome.decision(), Decision::Aborted);
    assert_eq!(
        outcome.votes(),
        &[VoteStatus::Yes, VoteStatus::No, VoteStatus::Yes]
    );
    assert_eq!(
        outcome.acks(),
        &[AckStatus::Acked, AckStatus::NotYetAcked, AckStatus::Acked]
    );

    assert_eq!(
        cluster.calls(0, txn),
        vec![CallKind::Prepare, CallKind::Rollback]
    );
    assert_eq!(cluster.calls(1, txn), vec![CallKind::Prepare]);
    assert_eq!(
        cluster.calls(2, txn),
        vec![CallKind::Prepare, CallKind::Rollback]
    );

    for node in &cluster.nodes {
        assert!(node.snapshot().is_empty());
        assert_eq!(node.lock_holder("balance"), None);
    }
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_participant_times_out() {
    init_tracing();
    let cluster = Cluster::new(vec![
        Behavior::default(),
        Behavior::default(),
        Behavior::slow_prepare(Duration::from_secs(10)),
    ]);
    let txn = TransactionId::new();
    cluster.stage_all(txn, "balance", "100");

    let outcome = coordinator()
        .execute_with_id(txn, &cluster.handles(), PREPARE_TIMEOUT, COMMIT_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(outcome.decision(), Decision::Aborted);
    assert_eq!(
        outcome.votes(),
        &[VoteStatus::Yes, VoteStatus::Yes, VoteStatus::Timeout]
    );
    assert_eq!(outcome.negative_votes(), vec![2]);
    assert!(outcome.prepare_elapsed() >= PREPARE_TIMEOUT);
    assert!(outcome.prepare_elapsed() < PREPARE_TIMEOUT + Duration::from_millis(50));

    assert_eq!(
        cluster.calls(0, txn),
        vec![CallKind::Prepare, CallKind::Rollback]
    );
    assert_eq!(
        cluster.calls(1, txn),
        vec![CallKind::Prepare, CallKind::Rollback]
    );
    assert_eq!(cluster.calls(2, txn), vec![CallKind::Prepare]);

    // The abandoned prepare is still running, not cancelled
    assert!(cluster.node(2).calls()[0].finished.is_none());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(cluster.node(2).calls()[0].finished.is_some());
    assert_eq!(cluster.calls(2, txn), vec![CallKind::Prepare]);
}

#[tokio::test(start_paused = true)]
async fn test_commit_timeout_keeps_committed_decision() {
    init_tracing();
    let cluster = Cluster::new(vec![
        Behavior::default().with_commit_delay(Duration::from_secs(10)),
    ]);
    let txn = TransactionId::new();
    cluster.stage_all(txn, "balance", "100");

    let outcome = coordinator()
        .execute_with_id(
            txn,
            &cluster.handles(),
            PREPARE_TIMEOUT,
            Duration::from_millis(200),
        )
        .await
        .unwrap();

    assert_eq!(outcome.decision(), Decision::Committed);
    assert_eq!(outcome.votes(), &[VoteStatus::Yes]);
    assert_eq!(outcome.acks(), &[AckStatus::Failed]);
    assert_eq!(outcome.failed_acks(), vec![0]);

    // The straggling commit still lands once the participant gets to it
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(cluster.node(0).resolution(txn), Some(Resolution::Committed));
}

#[tokio::test]
async fn test_empty_participant_list_is_rejected() {
    let result = coordinator()
        .execute(&[], PREPARE_TIMEOUT, COMMIT_TIMEOUT)
        .await;

    assert!(matches!(result, Err(CoordinatorError::NoParticipants)));
}

#[tokio::test]
async fn test_decision_is_unanimity() {
    init_tracing();
    let coordinator = coordinator();

    for mask in 0u8..8 {
        let behaviors = (0..3)
            .map(|bit| {
                if mask & (1 << bit) != 0 {
                    Behavior::default()
                } else {
                    Behavior::refusing()
                }
            })
            .collect();
        let cluster = Cluster::new(behaviors);

        let outcome = coordinator
            .execute(&cluster.handles(), PREPARE_TIMEOUT, COMMIT_TIMEOUT)
            .await
            .unwrap();

        let unanimous = outcome.votes().iter().all(|vote| vote.is_yes());
        assert_eq!(mask == 0b111, unanimous);
        assert_eq!(outcome.is_committed(), unanimous, "mask {:03b}", mask);

        // Rollback only reaches yes voters
        for (index, vote) in outcome.votes().iter().enumerate() {
            let rolled_back = cluster.calls(index, outcome.id()).contains(&CallKind::Rollback);
            assert_eq!(rolled_back, !unanimous && vote.is_yes(), "mask {:03b}", mask);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_completion_call_before_prepare_returns() {
    init_tracing();
    let cluster = Cluster::new(vec![
        Behavior::slow_prepare(Duration::from_millis(10)),
        Behavior::slow_prepare(Duration::from_millis(200)),
        Behavior::slow_prepare(Duration::from_millis(50)),
    ]);

    let outcome = coordinator()
        .execute(&cluster.handles(), PREPARE_TIMEOUT, COMMIT_TIMEOUT)
        .await
        .unwrap();
    assert!(outcome.is_committed());

    let last_prepare = cluster
        .nodes
        .iter()
        .filter_map(|node| node.calls()[0].finished)
        .max()
        .unwrap();

    for node in &cluster.nodes {
        let calls = node.calls();
        assert_eq!(calls[0].kind, CallKind::Prepare);
        assert_eq!(calls[1].kind, CallKind::Commit);
        assert!(calls[1].started >= last_prepare);
    }
}

#[tokio::test]
async fn test_repeated_commit_and_rollback_are_harmless() {
    init_tracing();
    let cluster = Cluster::healthy(2);
    let txn = TransactionId::new();
    cluster.stage_all(txn, "sku-1", "reserved");

    let outcome = coordinator()
        .execute_with_id(txn, &cluster.handles(), PREPARE_TIMEOUT, COMMIT_TIMEOUT)
        .await
        .unwrap();
    assert!(outcome.is_committed());

    for (node, handle) in cluster.nodes.iter().zip(cluster.handles()) {
        let before = node.snapshot();
        handle.commit(txn).await.unwrap();
        assert_eq!(node.snapshot(), before);
    }

    let aborted = TransactionId::new();
    let refusing = Cluster::new(vec![Behavior::default(), Behavior::refusing()]);
    refusing.stage_all(aborted, "sku-2", "reserved");
    let outcome = coordinator()
        .execute_with_id(aborted, &refusing.handles(), PREPARE_TIMEOUT, COMMIT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(outcome.decision(), Decision::Aborted);

    let handle = refusing.handles().remove(0);
    handle.rollback(aborted).await.unwrap();
    assert!(refusing.node(0).snapshot().is_empty());
    assert_eq!(
        refusing.node(0).resolution(aborted),
        Some(Resolution::RolledBack)
    );
}

#[tokio::test]
async fn test_failed_rollback_is_reported_not_raised() {
    init_tracing();
    let cluster = Cluster::new(vec![
        Behavior::default().with_failing_rollback(),
        Behavior::refusing(),
    ]);

    let outcome = coordinator()
        .execute(&cluster.handles(), PREPARE_TIMEOUT, COMMIT_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(outcome.decision(), Decision::Aborted);
    assert_eq!(outcome.acks(), &[AckStatus::Failed, AckStatus::NotYetAcked]);
    assert_eq!(outcome.failed_acks(), vec![0]);
}

#[tokio::test]
async fn test_prepare_transport_error_aborts() {
    init_tracing();
    let cluster = Cluster::new(vec![
        Behavior::default(),
        Behavior::default().with_failing_prepare(),
    ]);

    let outcome = coordinator()
        .execute_with_defaults(&cluster.handles())
        .await
        .unwrap();

    assert_eq!(outcome.decision(), Decision::Aborted);
    assert_eq!(outcome.votes(), &[VoteStatus::Yes, VoteStatus::No]);
    assert_eq!(cluster.calls(1, outcome.id()), vec![CallKind::Prepare]);
}

#[tokio::test]
async fn test_decision_never_changes() {
    let cluster = Cluster::healthy(2);
    let outcome = coordinator()
        .execute_with_defaults(&cluster.handles())
        .await
        .unwrap();

    let first = outcome.decision();
    for _ in 0..5 {
        assert_eq!(outcome.decision(), first);
    }
    assert_eq!(outcome.clone(), outcome);
}

#[tokio::test]
async fn test_unbounded_timeouts_still_decide() {
    init_tracing();
    let cluster = Cluster::healthy(2);

    let outcome = coordinator()
        .execute(&cluster.handles(), Duration::MAX, Duration::MAX)
        .await
        .unwrap();

    assert_eq!(outcome.decision(), Decision::Committed);
    assert_eq!(outcome.acks(), &[AckStatus::Acked; 2]);
}

#[tokio::test]
async fn test_huge_configured_timeout_still_decides() {
    init_tracing();
    let config: CoordinatorConfig = serde_json::from_str(
        r#"{"default_prepare_timeout":{"secs":18446744073709551615,"nanos":0}}"#,
    )
    .unwrap();
    let cluster = Cluster::new(vec![Behavior::default(), Behavior::refusing()]);

    let outcome = Coordinator::new(config)
        .execute_with_defaults(&cluster.handles())
        .await
        .unwrap();

    assert_eq!(outcome.decision(), Decision::Aborted);
    assert_eq!(outcome.votes(), &[VoteStatus::Yes, VoteStatus::No]);
}

#[tokio::test(start_paused = true)]
async fn test_flaky_commit_is_retried_to_ack() {
    init_tracing();
    let config = CoordinatorConfig::for_testing().with_ack_retries(3, Duration::from_millis(100));
    let coordinator = Arc::new(Coordinator::new(config));
    let cluster = Arc::new(Cluster::new(vec![
        Behavior::default(),
        Behavior::default().with_failing_commit(),
    ]));
    let txn = TransactionId::new();
    cluster.stage_all(txn, "balance", "100");

    let handle = tokio::spawn({
        let coordinator = coordinator.clone();
        let cluster = cluster.clone();
        async move {
            coordinator
                .execute_with_id(
                    txn,
                    &cluster.handles(),
                    PREPARE_TIMEOUT,
                    Duration::from_secs(1),
                )
                .await
        }
    });

    // First commit attempt has failed; the next one lands after the backoff
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cluster.calls(1, txn), vec![CallKind::Prepare, CallKind::Commit]);
    cluster.node(1).set_behavior(Behavior::default());

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome.decision(), Decision::Committed);
    assert_eq!(outcome.acks(), &[AckStatus::Acked, AckStatus::Acked]);
    assert!(outcome.failed_acks().is_empty());
    assert_eq!(
        cluster.calls(1, txn),
        vec![CallKind::Prepare, CallKind::Commit, CallKind::Commit]
    );
    assert_eq!(cluster.node(1).get("balance").as_deref(), Some("100"));
}
