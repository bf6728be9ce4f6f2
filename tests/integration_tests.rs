use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use refgate::{
    clock::ManualClock,
    create_app,
    error::{Error, Result},
    handlers::AppState,
    producer::DatasetProducer,
    refresh::{RefreshOrchestrator, RefreshOutcome},
    snapshot::{CodeEntry, Group, Record, Snapshot, SnapshotStore, SourceTables},
    token_bucket::BucketPolicy,
    AdmissionRegistry,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct TestProducer;

impl DatasetProducer for TestProducer {
    fn produce(&self) -> Result<Snapshot> {
        let records = (1..=30)
            .map(|id| Record {
                id,
                name: if id % 10 == 0 {
                    format!("Harbor Station {id}")
                } else {
                    format!("Inland Depot {id}")
                },
                group_id: if id <= 15 { 1 } else { 2 },
                attributes: BTreeMap::new(),
            })
            .collect();

        Ok(Snapshot::build(SourceTables {
            records,
            groups: vec![
                Group {
                    id: 1,
                    name: "North".to_string(),
                },
                Group {
                    id: 2,
                    name: "South".to_string(),
                },
            ],
            aliases: vec![CodeEntry {
                code: 7001,
                record_id: 7,
            }],
            legacy_codes: vec![CodeEntry {
                code: 12,
                record_id: 12,
            }],
        }))
    }
}

struct BrokenProducer;

impl DatasetProducer for BrokenProducer {
    fn produce(&self) -> Result<Snapshot> {
        Err(Error::Dataset("missing group table".to_string()))
    }
}

struct Harness {
    app: Router,
    store: Arc<SnapshotStore>,
    clock: ManualClock,
}

async fn harness() -> Harness {
    let clock = ManualClock::new();
    let store = Arc::new(SnapshotStore::new());
    let admission = AdmissionRegistry::with_clock(
        BucketPolicy {
            capacity: 1000,
            fill_rate: 3.0,
        },
        Arc::new(clock.clone()),
    );

    let outcome = RefreshOrchestrator::new(Arc::clone(&store), Arc::new(TestProducer))
        .refresh()
        .await;
    assert!(matches!(outcome, RefreshOutcome::Replaced { generation: 1, records: 30 }));

    let state = AppState::new(Arc::clone(&store), admission, Duration::from_secs(3600));
    Harness {
        app: create_app(state),
        store,
        clock,
    }
}

async fn get(app: &Router, uri: &str, client: &str) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header("x-forwarded-for", client)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

fn header(headers: &axum::http::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = harness().await;
    let (status, headers, body) = get(&h.app, "/health", "10.0.0.1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["generation"], 1);
    assert_eq!(body["refreshing"], false);
    assert!(body["last_updated"].is_u64());
    assert_eq!(header(&headers, "x-ratelimit-cost").as_deref(), Some("1"));
    assert!(header(&headers, "x-request-id").is_some());
}

#[tokio::test]
async fn test_record_lookups() {
    let h = harness().await;

    let (status, _, body) = get(&h.app, "/records/7", "10.0.0.1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Inland Depot 7");

    let (status, _, body) = get(&h.app, "/records/alias/7001", "10.0.0.1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 7);

    let (status, headers, body) = get(&h.app, "/records/legacy/12", "10.0.0.1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 12);
    assert_eq!(header(&headers, "x-ratelimit-cost").as_deref(), Some("10"));

    let (status, _, body) = get(&h.app, "/records/999", "10.0.0.1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_listing_and_search() {
    let h = harness().await;

    let (status, headers, body) = get(&h.app, "/records?page=2&per_page=10", "10.0.0.2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 30);
    assert_eq!(body["items"][0]["id"], 11);
    assert_eq!(header(&headers, "x-ratelimit-cost").as_deref(), Some("20"));

    let (_, headers, body) = get(&h.app, "/records?group=2", "10.0.0.2").await;
    assert_eq!(body["total"], 15);
    assert_eq!(header(&headers, "x-ratelimit-cost").as_deref(), Some("30"));

    let (status, headers, body) = get(&h.app, "/records?q=harbor", "10.0.0.2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(header(&headers, "x-ratelimit-cost").as_deref(), Some("50"));

    let (status, _, body) = get(&h.app, "/groups/2", "10.0.0.2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "South");
    assert_eq!(body["member_count"], 15);
}

#[tokio::test]
async fn test_ambiguous_selectors_are_cheap_and_rejected() {
    let h = harness().await;
    let (status, headers, _) = get(&h.app, "/records?q=harbor&page=2", "10.0.0.3").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(header(&headers, "x-ratelimit-cost").as_deref(), Some("5"));
    assert_eq!(header(&headers, "x-ratelimit-remaining").as_deref(), Some("995"));
}

#[tokio::test]
async fn test_percent_encoded_query_is_priced_as_decoded() {
    let h = harness().await;

    let (status, headers, body) = get(&h.app, "/records?%71=harbor", "10.0.0.5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(header(&headers, "x-ratelimit-cost").as_deref(), Some("50"));

    let (status, headers, _) = get(&h.app, "/records?q=a+b&p%61ge=2", "10.0.0.5").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(header(&headers, "x-ratelimit-cost").as_deref(), Some("5"));
    assert_eq!(header(&headers, "x-ratelimit-remaining").as_deref(), Some("945"));
}

#[tokio::test]
async fn test_unknown_path_is_charged() {
    let h = harness().await;
    let (status, headers, _) = get(&h.app, "/admin/secrets", "10.0.0.4").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(header(&headers, "x-ratelimit-cost").as_deref(), Some("5"));
}

#[tokio::test]
async fn test_rate_limit_exceeded() {
    let h = harness().await;

    for expected in ["800", "600", "400", "200", "0"] {
        let (status, headers, body) = get(&h.app, "/export", "10.9.9.9").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(header(&headers, "x-ratelimit-remaining").as_deref(), Some(expected));
        assert_eq!(body["records"].as_array().map(Vec::len), Some(30));
    }

    let (status, headers, body) = get(&h.app, "/export", "10.9.9.9").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limit_exceeded");
    assert_eq!(header(&headers, "retry-after").as_deref(), Some("67"));
    assert_eq!(header(&headers, "x-ratelimit-remaining").as_deref(), Some("0"));

    // Other clients are unaffected.
    let (status, _, _) = get(&h.app, "/export", "10.9.9.10").await;
    assert_eq!(status, StatusCode::OK);

    // Refill admits the client again.
    h.clock.advance(Duration::from_secs(67));
    let (status, headers, _) = get(&h.app, "/export", "10.9.9.9").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "x-ratelimit-remaining").as_deref(), Some("1"));
}

#[tokio::test]
async fn test_failed_refresh_keeps_serving_previous_data() {
    let h = harness().await;
    let (_, _, before) = get(&h.app, "/health", "10.0.0.5").await;

    let outcome = RefreshOrchestrator::new(Arc::clone(&h.store), Arc::new(BrokenProducer))
        .refresh()
        .await;
    assert!(matches!(outcome, RefreshOutcome::Aborted(_)));

    let (_, _, after) = get(&h.app, "/health", "10.0.0.5").await;
    assert_eq!(after["last_updated"], before["last_updated"]);
    assert_eq!(after["generation"], 1);

    let (status, _, body) = get(&h.app, "/records/30", "10.0.0.5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Harbor Station 30");
}

#[tokio::test]
async fn test_quality_endpoint() {
    let h = harness().await;
    let (status, _, body) = get(&h.app, "/quality", "10.0.0.6").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["record_count"], 30);
    assert_eq!(body["group_count"], 2);
    assert_eq!(body["orphan_records"], 0);
    assert_eq!(body["generation"], 1);
}
