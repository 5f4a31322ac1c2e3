//! End-to-end deduction runs against the scripted pair client.

use std::sync::Arc;
use std::time::Duration;

use rankdeduce_core::{
    Credentials, DeductionEngine, EngineConfig, EngineError, EntityId, FailureKind, FailurePhase,
    FailureSubject, QueryError, ScriptedPairClient, Source, SourceId,
};
use tokio_util::sync::CancellationToken;

fn credentials() -> Credentials {
    Credentials::new("analyst", "not-a-real-secret")
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        max_retries: 2,
        ..EngineConfig::default()
    }
    .without_delays()
}

fn id(s: &str) -> SourceId {
    SourceId::from(s)
}

fn entity(s: &str) -> EntityId {
    EntityId::from(s)
}

/// Individual values chosen so the baseline pairs average to
/// AB = {p1: 5, p2: 10}, AC = {p1: 7, p2: 12}, BC = {p1: 9, p2: 14}, AX = {p1: 4}.
fn reference_client() -> ScriptedPairClient {
    ScriptedPairClient::new()
        .with_source(Source::new("A"), &[("p1", 3.0), ("p2", 8.0)])
        .with_source(Source::new("B"), &[("p1", 7.0), ("p2", 12.0)])
        .with_source(Source::new("C"), &[("p1", 11.0), ("p2", 16.0)])
        .with_source(Source::new("X"), &[("p1", 5.0)])
        .with_label("p1", "Player One")
        .with_label("p2", "Player Two")
}

#[tokio::test]
async fn reference_scenario_recovers_individual_values() {
    let client = Arc::new(reference_client());
    let engine = DeductionEngine::new(client.clone(), credentials(), fast_config()).unwrap();

    let report = engine.run().await.unwrap();

    let table = &report.table;
    assert_eq!(table.value(&id("A"), &entity("p1")), Some(3.0));
    assert_eq!(table.value(&id("A"), &entity("p2")), Some(8.0));
    assert_eq!(table.value(&id("B"), &entity("p1")), Some(7.0));
    assert_eq!(table.value(&id("B"), &entity("p2")), Some(12.0));
    assert_eq!(table.value(&id("C"), &entity("p1")), Some(11.0));
    assert_eq!(table.value(&id("C"), &entity("p2")), Some(16.0));
    assert_eq!(table.value(&id("X"), &entity("p1")), Some(5.0));
    assert_eq!(table.value(&id("X"), &entity("p2")), None);

    let order: Vec<_> = report.aggregated.iter().map(|r| r.entity.as_str()).collect();
    assert_eq!(order, vec!["p1", "p2"]);
    let p1 = &report.aggregated[0];
    assert_eq!(p1.count, 4);
    assert_eq!(p1.mean, 6.5);
    assert_eq!(p1.label.as_deref(), Some("Player One"));
    assert_eq!(report.aggregated[1].count, 3);

    // X never returned p2, which the baseline covers.
    assert_eq!(report.coverage_gaps.len(), 1);
    assert_eq!(report.coverage_gaps[0].missing_from_query, vec![entity("p2")]);

    assert!(report.failures.is_empty());
    assert_eq!(report.metrics.queries, 4);
    assert_eq!(report.sources, vec![id("A"), id("B"), id("C"), id("X")]);
}

#[tokio::test]
async fn failing_source_is_logged_and_excluded() {
    let client = Arc::new(
        reference_client()
            .with_source(Source::new("D"), &[("p1", 1.0), ("p2", 2.0)])
            .fail_source_always("C", QueryError::Transport("connection reset".into())),
    );
    let engine = DeductionEngine::new(client.clone(), credentials(), fast_config()).unwrap();

    let report = engine.run().await.unwrap();

    let baseline = report.baseline.as_ref().unwrap();
    assert_eq!(baseline.triple.to_string(), "[A, B, X]");
    assert_eq!(baseline.triples_tried, 2);

    let c = id("C");
    assert!(!report.table.contains_source(&c));
    let phases: Vec<_> = report.failures_for(&c).map(|f| f.phase).collect();
    assert_eq!(phases, vec![FailurePhase::Baseline, FailurePhase::Propagation]);
    assert!(report
        .failures
        .iter()
        .all(|f| f.kind == FailureKind::TransportError && f.attempts == 2));

    // Only the baseline attempt touched A + C; propagation reused the failure.
    assert_eq!(client.queries_for("A", "C"), 2);
    // A, B, X and D contribute; C never does.
    assert!(report.aggregated.iter().all(|r| r.count <= 4));
    assert!(report.table.contains_source(&id("D")));
}

#[tokio::test]
async fn first_triple_failure_moves_to_next_triple() {
    let client = Arc::new(
        reference_client()
            .fail_pair_always("B", "C", QueryError::Timeout { limit_ms: 10 }),
    );
    let engine = DeductionEngine::new(client.clone(), credentials(), fast_config()).unwrap();

    let report = engine.run().await.unwrap();

    let baseline = report.baseline.as_ref().unwrap();
    assert_eq!(baseline.triple.to_string(), "[A, B, X]");
    assert_eq!(baseline.triples_tried, 2);
    assert_eq!(
        report.failures[0].subject,
        FailureSubject::Pair(id("B"), id("C"))
    );
    assert_eq!(report.failures[0].kind, FailureKind::Timeout);

    // A + B cached from the first triple, A + C reused for propagation.
    assert_eq!(client.queries_for("A", "B"), 1);
    assert_eq!(client.queries_for("A", "C"), 1);
    assert_eq!(report.table.value(&id("C"), &entity("p1")), Some(11.0));
}

#[tokio::test]
async fn all_triples_failing_is_unsolvable() {
    let client = Arc::new(
        reference_client()
            .fail_source_always("A", QueryError::EmptyResult)
            .fail_source_always("B", QueryError::EmptyResult),
    );
    let engine = DeductionEngine::new(client, credentials(), fast_config()).unwrap();

    let err = engine.run().await.unwrap_err();
    match err {
        EngineError::BaselineUnsolvable {
            triples_tried,
            sources,
        } => {
            assert_eq!(sources, 4);
            assert!(triples_tried >= 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn fewer_than_three_sources_is_unsolvable() {
    let client = Arc::new(
        ScriptedPairClient::new()
            .with_source(Source::new("A"), &[("p1", 1.0)])
            .with_source(Source::new("B"), &[("p1", 2.0)]),
    );
    let engine = DeductionEngine::new(client, credentials(), fast_config()).unwrap();

    assert!(matches!(
        engine.run().await,
        Err(EngineError::BaselineUnsolvable {
            triples_tried: 0,
            sources: 2
        })
    ));
}

#[tokio::test]
async fn catalog_failure_is_fatal() {
    let client = Arc::new(reference_client().fail_listing("maintenance"));
    let engine = DeductionEngine::new(client, credentials(), fast_config()).unwrap();

    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, EngineError::CatalogUnavailable { ref reason } if reason.contains("maintenance")));
}

#[tokio::test]
async fn rejected_login_is_catalog_unavailable() {
    let client = Arc::new(reference_client());
    client.reject_logins();
    let engine = DeductionEngine::new(client, credentials(), fast_config()).unwrap();

    assert!(matches!(
        engine.run().await,
        Err(EngineError::CatalogUnavailable { .. })
    ));
}

#[tokio::test]
async fn source_filter_orders_selection_and_reports_unknown() {
    let client = Arc::new(reference_client());
    let config = EngineConfig {
        source_filter: Some(vec!["B".into(), "A".into(), "Nobody".into(), "C".into()]),
        ..fast_config()
    };
    let engine = DeductionEngine::new(client, credentials(), config).unwrap();

    let report = engine.run().await.unwrap();

    assert_eq!(report.sources, vec![id("B"), id("A"), id("C")]);
    assert_eq!(report.baseline.as_ref().unwrap().baseline_source, id("B"));
    assert!(!report.table.contains_source(&id("X")));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, FailureKind::UnknownSource);
    assert_eq!(report.failures[0].attempts, 0);
    // Same individual values regardless of which source anchors the baseline.
    assert_eq!(report.table.value(&id("A"), &entity("p2")), Some(8.0));
}

#[tokio::test]
async fn baseline_override_anchors_propagation() {
    let client = Arc::new(reference_client());
    let config = EngineConfig {
        baseline_triple_override: Some(["X".into(), "A".into(), "B".into()]),
        ..fast_config()
    };
    let engine = DeductionEngine::new(client.clone(), credentials(), config).unwrap();

    let report = engine.run().await.unwrap();

    let baseline = report.baseline.as_ref().unwrap();
    assert_eq!(baseline.baseline_source, id("X"));
    assert_eq!(baseline.entities, 1);
    // Propagation from X only reaches p1.
    assert_eq!(report.table.value(&id("C"), &entity("p1")), Some(11.0));
    assert_eq!(report.table.value(&id("C"), &entity("p2")), None);
    assert_eq!(client.queries_for("X", "C"), 1);
}

#[tokio::test]
async fn cancelled_before_start_returns_empty_partial_report() {
    let client = Arc::new(reference_client());
    let engine = DeductionEngine::new(client.clone(), credentials(), fast_config()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = engine.run_with_cancel(cancel).await.unwrap();

    assert!(report.cancelled);
    assert!(report.baseline.is_none());
    assert!(report.aggregated.is_empty());
    assert_eq!(client.query_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_baseline_keeps_partial_results() {
    let client = Arc::new(
        reference_client().with_source(Source::new("Y"), &[("p1", 2.0), ("p2", 4.0)]),
    );
    let config = EngineConfig {
        inter_query_delay: Duration::from_secs(1),
        ..fast_config()
    };
    let engine = DeductionEngine::new(client.clone(), credentials(), config).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        trigger.cancel();
    });

    let report = engine.run_with_cancel(cancel).await.unwrap();

    // AB, AC, BC complete at 0s, 1s, 2s; the cancel lands before propagation.
    assert!(report.cancelled);
    assert!(report.baseline.is_some());
    assert_eq!(report.table.source_count(), 3);
    assert!(!report.table.contains_source(&id("X")));
    assert_eq!(client.query_count(), 3);
    assert_eq!(report.aggregated.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn propagation_respects_concurrency_bound() {
    let mut client = reference_client();
    for name in ["D", "E", "F", "G"] {
        client = client.with_source(Source::new(name), &[("p1", 4.0), ("p2", 9.0)]);
    }
    let client = Arc::new(client.with_latency(Duration::from_millis(100)));
    let config = EngineConfig {
        propagation_concurrency: 3,
        ..fast_config()
    };
    let engine = DeductionEngine::new(client.clone(), credentials(), config).unwrap();

    let report = engine.run().await.unwrap();

    assert_eq!(client.max_in_flight(), 3);
    assert_eq!(report.table.source_count(), 8);
    assert_eq!(report.table.value(&id("G"), &entity("p2")), Some(9.0));
}

#[tokio::test(start_paused = true)]
async fn sequential_by_default() {
    let client = Arc::new(reference_client().with_latency(Duration::from_millis(50)));
    let engine = DeductionEngine::new(client.clone(), credentials(), fast_config()).unwrap();

    engine.run().await.unwrap();

    assert_eq!(client.max_in_flight(), 1);
}

#[tokio::test]
async fn expired_session_mid_run_is_renewed() {
    let client = Arc::new(reference_client().fail_pair("A", "C", vec![QueryError::AuthExpired]));
    let engine = DeductionEngine::new(client.clone(), credentials(), fast_config()).unwrap();

    let report = engine.run().await.unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(client.login_count(), 2);
    assert_eq!(report.metrics.reauthentications, 1);
    assert_eq!(report.table.value(&id("X"), &entity("p1")), Some(5.0));
}

#[tokio::test(start_paused = true)]
async fn concurrent_expiry_renews_session_once() {
    let mut client = reference_client();
    for name in ["D", "E", "F", "G"] {
        client = client.with_source(Source::new(name), &[("p1", 4.0), ("p2", 9.0)]);
    }
    let client = Arc::new(client.with_latency(Duration::from_millis(100)));
    let config = EngineConfig {
        max_retries: 1,
        propagation_concurrency: 4,
        ..fast_config()
    };
    let engine = DeductionEngine::new(client.clone(), credentials(), config).unwrap();

    // Baseline pairs finish at 300ms; four propagation queries are then in flight.
    let expirer = {
        let client = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            client.expire_sessions();
        })
    };
    let report = engine.run().await.unwrap();
    expirer.await.unwrap();

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(client.login_count(), 2);
    assert_eq!(report.metrics.reauthentications, 1);
    assert_eq!(report.table.source_count(), 8);
}

#[tokio::test]
async fn partial_coverage_is_recorded_not_failed() {
    let client = Arc::new(
        reference_client().with_source(Source::new("W"), &[("p1", 4.0), ("p9", 1.0)]),
    );
    let engine = DeductionEngine::new(client, credentials(), fast_config()).unwrap();

    let report = engine.run().await.unwrap();

    assert!(report.failures.is_empty());
    let gap = report
        .coverage_gaps
        .iter()
        .find(|g| g.source == id("W"))
        .unwrap();
    // The fake only returns shared entities, so p9 never reaches the engine.
    assert_eq!(gap.missing_from_query, vec![entity("p2")]);
    assert!(report.aggregated.iter().all(|r| r.entity != entity("p9")));
}
