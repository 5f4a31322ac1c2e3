//! Deduction runs driven by JSON fixture files.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use rankdeduce_core::{
    most_contested, Credentials, DeductionEngine, EngineConfig, EntityId, FailureKind,
    FixtureClient, SourceId,
};

const FIXTURE: &str = r#"{
    "sources": [
        { "name": "Ann", "affiliation": "Daily", "rankings": { "p1": 1.0, "p2": 4.0, "p3": 9.0 } },
        { "name": "Ben", "rankings": { "p1": 2.0, "p2": 3.0, "p3": 7.0 } },
        { "name": "Cal", "rankings": { "p1": 1.5, "p2": 6.0, "p3": 8.0 } },
        { "name": "Dee", "rankings": { "p1": 3.0, "p2": 2.0 } },
        { "name": "Eve", "rankings": { "p1": 1.0, "p3": 12.0 } }
    ],
    "labels": { "p1": "First", "p2": "Second", "p3": "Third" },
    "faults": [
        { "pair": ["Ann", "Cal"], "fault": "timeout", "times": 1 }
    ],
    "unavailable": ["Eve"]
}"#;

fn fixture_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(FIXTURE.as_bytes()).unwrap();
    file
}

#[tokio::test(start_paused = true)]
async fn fixture_run_recovers_values_and_logs_unavailable_source() {
    let file = fixture_file();
    let client = Arc::new(FixtureClient::from_path(file.path()).unwrap());
    let config = EngineConfig {
        query_timeout: Duration::from_secs(5),
        ..EngineConfig::default().without_delays()
    };
    let engine = DeductionEngine::new(client.clone(), Credentials::default(), config).unwrap();

    let report = engine.run().await.unwrap();

    let ann = SourceId::from("Ann (Daily)");
    assert_eq!(report.baseline.as_ref().unwrap().baseline_source, ann);
    assert_eq!(report.metrics.timeouts, 1);
    assert_eq!(report.table.value(&SourceId::from("Cal"), &EntityId::from("p2")), Some(6.0));
    assert_eq!(report.table.value(&SourceId::from("Dee"), &EntityId::from("p2")), Some(2.0));

    let eve = SourceId::from("Eve");
    assert!(!report.table.contains_source(&eve));
    let eve_failures: Vec<_> = report.failures_for(&eve).collect();
    assert_eq!(eve_failures.len(), 1);
    assert_eq!(eve_failures[0].kind, FailureKind::TransportError);

    let p2 = report
        .aggregated
        .iter()
        .find(|r| r.entity.as_str() == "p2")
        .unwrap();
    assert_eq!(p2.count, 4);
    assert_eq!(p2.label.as_deref(), Some("Second"));
    assert_eq!(p2.min, 2.0);
    assert_eq!(p2.max, 6.0);

    // p2 spans 2.0..6.0 across four sources; nothing else spreads as far.
    let contested = most_contested(&report.aggregated, 3, 1);
    assert_eq!(contested[0].entity.as_str(), "p2");
}

#[tokio::test]
async fn report_serializes_to_json() {
    let client = Arc::new(FixtureClient::from_json(FIXTURE).unwrap());
    let config = EngineConfig {
        source_filter: Some(vec!["Ann".into(), "Ben".into(), "Dee".into()]),
        ..EngineConfig::default().without_delays()
    };
    let engine = DeductionEngine::new(client, Credentials::default(), config).unwrap();

    let report = engine.run().await.unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["cancelled"], false);
    assert_eq!(json["baseline"]["baseline_source"], "Ann (Daily)");
    assert_eq!(json["aggregated"].as_array().unwrap().len(), 2);
    assert!(json["failures"].as_array().unwrap().is_empty());
}
