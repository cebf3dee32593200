//! Dry-run wiring against a mock content source.
//!
//! Exercises the full daemon wiring (settings, extractor, transformer, sync
//! stage, rotation) with the knowledge index and consumer store replaced by
//! in-memory doubles.

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use refresh_daemon::{dry_run_runner, dry_run_settings};
use refresh_types::{default_sources, RunStatus, Settings, Stage, StepOutcome};

fn event(title: &str) -> serde_json::Value {
    json!({
        "title": { "rendered": title },
        "content": { "rendered": "<p>Live music on the <b>main stage</b> all evening.</p>" },
        "link": format!("https://example.test/event/{}", title.to_lowercase().replace(' ', "-")),
    })
}

async fn content_source() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/event"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            event("Jazz Night"),
            event("Summer Market"),
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/event"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    server
}

fn events_only(base_url: &str) -> Settings {
    let mut settings = Settings::default();
    settings.extract.base_url = base_url.to_string();
    settings.sources = default_sources()
        .into_iter()
        .filter(|s| s.name == "events")
        .collect();
    dry_run_settings(&settings)
}

#[tokio::test]
async fn test_dry_run_completes_full_pipeline() {
    let server = content_source().await;
    let settings = events_only(&server.uri());
    settings.validate().unwrap();

    let (runner, index) = dry_run_runner(&settings).unwrap();
    let report = runner.run().await;

    assert_eq!(report.status, RunStatus::Succeeded, "{}", report.message);
    assert_eq!(report.steps.len(), 3);
    for stage in Stage::ORDER {
        assert_eq!(
            report.step(stage).map(|s| s.outcome),
            Some(StepOutcome::Succeeded),
            "stage {stage}"
        );
    }

    let started = index.started_jobs();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].0, "dry-events");
    assert!(started[0].1.starts_with("scheduled refresh "));
    assert_eq!(index.aliases().len(), 1);
    assert_eq!(index.max_concurrent_jobs(), 1);
}

#[tokio::test]
async fn test_dry_run_with_unreachable_source_fails_extract() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut settings = events_only(&server.uri());
    settings.pipeline.stage_max_attempts = 1;

    let (runner, index) = dry_run_runner(&settings).unwrap();
    let report = runner.run().await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].stage, Stage::Extract);
    assert!(index.started_jobs().is_empty());
    assert!(index.aliases().is_empty());
}
