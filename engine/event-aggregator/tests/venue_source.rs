use std::time::{Duration, Instant};

use chrono::Timelike;
use chrono_tz::America::Los_Angeles;
use event_aggregator::config::{AggregatorConfig, VenueConfig, VenueSourceConfig};
use event_aggregator::http::RetryPolicy;
use event_aggregator::sources::VenueTicketSource;
use event_aggregator::{EventSource, FetchWindow, SkipReason, SourceError};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn window() -> FetchWindow {
    FetchWindow::resolve(Some("2026-03-14"), Los_Angeles).unwrap()
}

fn retry() -> RetryPolicy {
    RetryPolicy { max_retries: 1, backoff: Duration::from_millis(10) }
}

fn config(server: &MockServer, venue_ids: &[&str]) -> VenueSourceConfig {
    let mut config = AggregatorConfig::default().venue_source;
    config.api_base_url = server.uri();
    config.min_interval_ms = 5;
    config.venues = venue_ids
        .iter()
        .map(|id| VenueConfig {
            id: id.to_string(),
            name: "Climate Pledge Arena".to_string(),
            home_team: Some("Seattle Kraken".to_string()),
        })
        .collect();
    config
}

fn source(server: &MockServer, venue_ids: &[&str]) -> VenueTicketSource {
    VenueTicketSource::new(&config(server, venue_ids), "test-key", reqwest::Client::new(), retry()).unwrap()
}

fn discovery_event(id: &str, date_time: &str, time_tba: bool) -> Value {
    json!({
        "id": id,
        "name": "Seattle Kraken vs. Edmonton Oilers",
        "dates": {
            "start": { "dateTime": date_time, "timeTBA": time_tba },
            "status": { "code": "onsale" }
        },
        "classifications": [{ "genre": { "name": "Hockey" } }],
        "_embedded": {
            "venues": [{ "name": "Climate Pledge Arena" }],
            "attractions": [{ "name": "Seattle Kraken" }, { "name": "Edmonton Oilers" }]
        }
    })
}

fn body(events: Vec<Value>) -> Value {
    json!({ "_embedded": { "events": events } })
}

#[tokio::test]
async fn test_fetches_confirmed_events_for_a_venue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events.json"))
        .and(query_param("venueId", "V1"))
        .and(query_param("apikey", "test-key"))
        .and(query_param("startDateTime", "2026-03-14T07:00:00Z"))
        .and(query_param("endDateTime", "2026-03-16T07:00:00Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(vec![
            discovery_event("E1", "2026-03-15T02:00:00Z", false),
            discovery_event("E2", "2026-03-15T20:00:00Z", true),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let batch = source(&server, &["V1"]).fetch_events(&window()).await.unwrap();

    assert_eq!(batch.events.len(), 1);
    let event = &batch.events[0];
    assert_eq!(event.name, "Seattle Kraken vs. Edmonton Oilers");
    assert_eq!(event.start_time.hour(), 19);
    assert_eq!(event.opponent.as_deref(), Some("Edmonton Oilers"));
    assert_eq!(event.category.as_deref(), Some("Hockey"));

    assert_eq!(batch.skipped.len(), 1);
    assert_eq!(batch.skipped[0].record, "E2");
    assert_eq!(batch.skipped[0].reason, SkipReason::UnconfirmedTime);
}

#[tokio::test]
async fn test_transient_failure_is_retried_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events.json"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(body(vec![discovery_event("E1", "2026-03-15T02:00:00Z", false)])),
        )
        .mount(&server)
        .await;

    let batch = source(&server, &["V1"]).fetch_events(&window()).await.unwrap();

    assert_eq!(batch.events.len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_persistent_server_error_gives_up_after_one_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let err = source(&server, &["V1"]).fetch_events(&window()).await.unwrap_err();

    match err {
        SourceError::AllRequestsFailed { attempted, last } => {
            assert_eq!(attempted, 1);
            assert!(matches!(*last, SourceError::Status { status: 500 }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let err = source(&server, &["V1", "V2"]).fetch_events(&window()).await.unwrap_err();

    match err {
        SourceError::AllRequestsFailed { attempted, last } => {
            assert_eq!(attempted, 2);
            assert!(matches!(*last, SourceError::Auth { status: 401 }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_one_failing_venue_does_not_fail_the_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("venueId", "V1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(body(vec![discovery_event("E1", "2026-03-15T02:00:00Z", false)])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("venueId", "V2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let batch = source(&server, &["V1", "V2"]).fetch_events(&window()).await.unwrap();

    assert_eq!(batch.events.len(), 1);
    assert_eq!(batch.skipped.len(), 1);
    assert_eq!(batch.skipped[0].record, "V2");
    assert!(matches!(batch.skipped[0].reason, SkipReason::RequestFailed { .. }));
}

#[tokio::test]
async fn test_undecodable_body_is_a_parse_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let err = source(&server, &["V1"]).fetch_events(&window()).await.unwrap_err();

    match err {
        SourceError::AllRequestsFailed { last, .. } => assert!(matches!(*last, SourceError::Parse(_))),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_empty_venue_response_is_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "page": { "totalElements": 0 } })))
        .mount(&server)
        .await;

    let batch = source(&server, &["V1"]).fetch_events(&window()).await.unwrap();

    assert!(batch.events.is_empty());
    assert!(batch.skipped.is_empty());
}

#[tokio::test]
async fn test_venue_queries_are_capped_by_the_gate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(Vec::new())).set_delay(Duration::from_millis(400)))
        .expect(4)
        .mount(&server)
        .await;

    let mut config = config(&server, &["V1", "V2", "V3", "V4"]);
    config.max_concurrent = 2;
    config.min_interval_ms = 0;
    let source = VenueTicketSource::new(&config, "test-key", reqwest::Client::new(), retry()).unwrap();

    let started = Instant::now();
    let batch = source.fetch_events(&window()).await.unwrap();
    let elapsed = started.elapsed();

    assert!(batch.skipped.is_empty());
    // four 400ms queries, two at a time
    assert!(elapsed >= Duration::from_millis(800), "finished in {elapsed:?}");
}

#[tokio::test]
async fn test_venue_query_starts_are_spaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(Vec::new())))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = config(&server, &["V1", "V2", "V3"]);
    config.max_concurrent = 3;
    config.min_interval_ms = 300;
    let source = VenueTicketSource::new(&config, "test-key", reqwest::Client::new(), retry()).unwrap();

    let started = Instant::now();
    source.fetch_events(&window()).await.unwrap();
    let elapsed = started.elapsed();

    // third start waits for two intervals
    assert!(elapsed >= Duration::from_millis(600), "finished in {elapsed:?}");
}
