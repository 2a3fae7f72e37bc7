//! Service Integration Tests
//!
//! Spins up a local stand-in for the remote data API and authorization
//! server, then exercises the refresher, the collection pipeline, and the
//! scheduler end to end against it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use vitals::backoff::BackoffPolicy;
use vitals::collector::{Domain, Pipeline};
use vitals::config::{ApiConfig, ScheduleConfig};
use vitals::credential::{Credential, CredentialStore};
use vitals::dispatch::{Dispatcher, EventClass, FileExporter, LogNotifier};
use vitals::refresher::{RefreshError, TokenRefresher};
use vitals::scheduler::Scheduler;

// =============================================================================
// Fake remote API
// =============================================================================

/// Behavior switches and counters for the fake API.
#[derive(Default)]
struct FakeApi {
    token_requests: AtomicU32,
    /// Number of 500s the token endpoint answers before succeeding.
    token_failures_remaining: AtomicU32,
    /// When set, the token endpoint always answers 400.
    token_rejects_all: bool,
    /// When set, the recovery endpoint always answers 500.
    recovery_always_fails: bool,
    profile_hits: AtomicU32,
    recovery_hits: AtomicU32,
}

async fn token_endpoint(
    State(api): State<Arc<FakeApi>>,
    Form(params): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let n = api.token_requests.fetch_add(1, Ordering::SeqCst) + 1;

    if api.token_rejects_all {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"})));
    }

    // Burn down injected transient failures first.
    let remaining = api.token_failures_remaining.load(Ordering::SeqCst);
    if remaining > 0 {
        api.token_failures_remaining
            .store(remaining - 1, Ordering::SeqCst);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "temporarily_unavailable"})),
        );
    }

    // The exchange must carry the full form-encoded grant.
    let well_formed = params.get("grant_type").map(String::as_str) == Some("refresh_token")
        && params.get("scope").map(String::as_str) == Some("offline")
        && params.contains_key("refresh_token")
        && params.contains_key("client_id")
        && params.contains_key("client_secret");
    if !well_formed {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_request"})),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "access_token": format!("access-{n}"),
            "refresh_token": format!("refresh-{n}"),
            "expires_in": 3600,
            "token_type": "bearer",
        })),
    )
}

async fn profile(State(api): State<Arc<FakeApi>>) -> Json<Value> {
    api.profile_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "user_id": 7,
        "email": "subject@example.com",
        "first_name": "Ada",
        "last_name": "Lovelace",
    }))
}

async fn body_measurement() -> Json<Value> {
    Json(json!({
        "height_meter": 1.73,
        "weight_kilogram": 64.2,
        "max_heart_rate": 193,
    }))
}

async fn sleep() -> Json<Value> {
    Json(json!({
        "records": [{
            "id": 93845,
            "user_id": 7,
            "start": "2026-08-05T22:10:00Z",
            "end": "2026-08-06T06:02:00Z",
            "nap": false,
            "score_state": "SCORED",
            "score": {
                "respiratory_rate": 14.2,
                "sleep_performance_percentage": 91.0,
                "sleep_efficiency_percentage": 88.5,
                "total_in_bed_time_milli": 28320000u64,
            },
        }],
        "next_token": null,
    }))
}

async fn recovery(State(api): State<Arc<FakeApi>>) -> (StatusCode, Json<Value>) {
    api.recovery_hits.fetch_add(1, Ordering::SeqCst);
    if api.recovery_always_fails {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "upstream"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "records": [{
                "cycle_id": 11,
                "sleep_id": 93845,
                "user_id": 7,
                "score_state": "SCORED",
                "score": {
                    "user_calibrating": false,
                    "recovery_score": 67.0,
                    "resting_heart_rate": 52.0,
                    "hrv_rmssd_milli": 48.3,
                },
            }],
            "next_token": null,
        })),
    )
}

async fn workout() -> Json<Value> {
    Json(json!({
        "records": [{
            "id": 5120,
            "user_id": 7,
            "start": "2026-08-05T17:00:00Z",
            "end": "2026-08-05T18:05:00Z",
            "sport_id": 1,
            "score_state": "SCORED",
            "score": {
                "strain": 12.4,
                "average_heart_rate": 142,
                "max_heart_rate": 178,
                "kilojoule": 2510.0,
            },
        }],
        "next_token": null,
    }))
}

async fn cycle() -> Json<Value> {
    Json(json!({
        "records": [{
            "id": 11,
            "user_id": 7,
            "start": "2026-08-05T08:00:00Z",
            "end": null,
            "score_state": "PENDING_SCORE",
            "score": null,
        }],
        "next_token": null,
    }))
}

/// Bind the fake API on a random port and return its base URL.
async fn start_fake_api(api: Arc<FakeApi>) -> String {
    let router = Router::new()
        .route("/oauth/token", post(token_endpoint))
        .route("/v1/user/profile/basic", get(profile))
        .route("/v1/user/measurement/body", get(body_measurement))
        .route("/v1/activity/sleep", get(sleep))
        .route("/v1/recovery", get(recovery))
        .route("/v1/activity/workout", get(workout))
        .route("/v1/cycle", get(cycle))
        .with_state(api);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind random port");
    let addr = listener.local_addr().expect("failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{addr}")
}

// =============================================================================
// Test Helpers
// =============================================================================

fn api_config(base_url: &str) -> ApiConfig {
    ApiConfig {
        base_url: base_url.to_string(),
        token_url: format!("{base_url}/oauth/token"),
        client_id: "test-client".to_string(),
        client_secret: "test-secret".to_string(),
        timeout: Duration::from_secs(2),
        record_limit: 25,
    }
}

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial_interval: Duration::from_millis(5),
        multiplier: 1.5,
        randomization_factor: 0.0,
        max_elapsed_time: Duration::from_millis(250),
    }
}

fn live_credential() -> Credential {
    Credential {
        access_token: "access-initial".to_string(),
        refresh_token: "refresh-initial".to_string(),
        token_type: "bearer".to_string(),
        expires_at: Utc::now() + ChronoDuration::hours(1),
    }
}

// =============================================================================
// Refresher
// =============================================================================

#[tokio::test]
async fn test_refresh_exchanges_token() {
    let api = Arc::new(FakeApi::default());
    let base_url = start_fake_api(Arc::clone(&api)).await;

    let refresher = TokenRefresher::new(&api_config(&base_url), fast_backoff()).unwrap();
    let old = live_credential();

    let renewed = refresher
        .refresh(&old, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(renewed.access_token, "access-1");
    assert_eq!(renewed.refresh_token, "refresh-1");
    assert_eq!(renewed.token_type, "bearer");
    assert!(renewed.expires_at > old.expires_at);
    assert_eq!(api.token_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_refresh_retries_server_errors_then_succeeds() {
    let api = Arc::new(FakeApi {
        token_failures_remaining: AtomicU32::new(2),
        ..FakeApi::default()
    });
    let base_url = start_fake_api(Arc::clone(&api)).await;

    let refresher = TokenRefresher::new(&api_config(&base_url), fast_backoff()).unwrap();
    let renewed = refresher
        .refresh(&live_credential(), &CancellationToken::new())
        .await
        .unwrap();

    // Two 500s, then the grant: three requests, success on attempt three.
    assert_eq!(api.token_requests.load(Ordering::SeqCst), 3);
    assert_eq!(renewed.access_token, "access-3");
}

#[tokio::test]
async fn test_refresh_gives_up_immediately_on_client_error() {
    let api = Arc::new(FakeApi {
        token_rejects_all: true,
        ..FakeApi::default()
    });
    let base_url = start_fake_api(Arc::clone(&api)).await;

    let refresher = TokenRefresher::new(&api_config(&base_url), fast_backoff()).unwrap();
    let result = refresher
        .refresh(&live_credential(), &CancellationToken::new())
        .await;

    match result {
        Err(RefreshError::Status(status)) => assert_eq!(status, StatusCode::BAD_REQUEST),
        other => panic!("expected status error, got {other:?}"),
    }
    assert_eq!(api.token_requests.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Collection Pipeline
// =============================================================================

#[tokio::test]
async fn test_pipeline_collects_all_six_domains() {
    let api = Arc::new(FakeApi::default());
    let base_url = start_fake_api(Arc::clone(&api)).await;

    let pipeline = Pipeline::new(&api_config(&base_url), fast_backoff()).unwrap();
    let (snapshot, errors) = pipeline
        .collect(&live_credential(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(errors.is_empty());
    assert!(snapshot.is_complete());
    assert_eq!(snapshot.profile.as_ref().unwrap().user_id, 7);
    assert_eq!(snapshot.sleep.as_ref().unwrap()[0].id, 93845);
    assert!(snapshot.cycles.as_ref().unwrap()[0].end.is_none());
    assert_eq!(api.profile_hits.load(Ordering::SeqCst), 1);
    assert_eq!(api.recovery_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pipeline_tolerates_one_domain_staying_down() {
    let api = Arc::new(FakeApi {
        recovery_always_fails: true,
        ..FakeApi::default()
    });
    let base_url = start_fake_api(Arc::clone(&api)).await;

    let pipeline = Pipeline::new(&api_config(&base_url), fast_backoff()).unwrap();
    let (snapshot, errors) = pipeline
        .collect(&live_credential(), &CancellationToken::new())
        .await
        .unwrap();

    // Five domains populated, the failed one recorded, cycle not aborted.
    assert_eq!(snapshot.populated_domains(), 5);
    assert!(snapshot.recovery.is_none());
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].domain, Domain::Recovery);

    // The failed domain burned its retry budget; the healthy ones did not.
    assert!(api.recovery_hits.load(Ordering::SeqCst) > 1);
    assert_eq!(api.profile_hits.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Scheduler
// =============================================================================

#[tokio::test]
async fn test_scheduler_refreshes_collects_and_exports() {
    let api = Arc::new(FakeApi::default());
    let base_url = start_fake_api(Arc::clone(&api)).await;

    let dir = tempfile::tempdir().unwrap();
    let export_dir = dir.path().join("snapshots");
    let (store, store_task) = CredentialStore::spawn(dir.path().join("credential.json"));
    store.save(live_credential()).await.unwrap();

    let config = api_config(&base_url);
    let scheduler = Scheduler::new(
        store.clone(),
        TokenRefresher::new(&config, fast_backoff()).unwrap(),
        Pipeline::new(&config, fast_backoff()).unwrap(),
        Dispatcher::new(
            Box::new(FileExporter::new(&export_dir)),
            Box::new(LogNotifier::new(EventClass::All)),
        ),
        ScheduleConfig {
            refresh_interval: Duration::from_millis(100),
            collect_interval: Duration::from_millis(60),
            shutdown_grace: Duration::from_secs(1),
        },
    );

    let result = scheduler
        .run(tokio::time::sleep(Duration::from_millis(400)))
        .await;
    assert!(result.is_ok(), "clean shutdown expected: {result:?}");

    // The refresh activity exchanged at least one token and wrote it back.
    assert!(api.token_requests.load(Ordering::SeqCst) >= 1);
    let stored = store.load().await.unwrap();
    assert_ne!(stored.access_token, "access-initial");
    assert!(stored.expires_at > Utc::now());

    // The collection activity exported at least one snapshot.
    let exported: Vec<_> = std::fs::read_dir(&export_dir).unwrap().collect();
    assert!(!exported.is_empty());
    let first = exported[0].as_ref().unwrap().path();
    let snapshot: Value = serde_json::from_str(&std::fs::read_to_string(first).unwrap()).unwrap();
    assert_eq!(snapshot["profile"]["user_id"], 7);

    store.shutdown().await.unwrap();
    store_task.await.unwrap();
}

#[tokio::test]
async fn test_scheduler_turns_refresh_rejection_into_fatal_exit() {
    let api = Arc::new(FakeApi {
        token_rejects_all: true,
        ..FakeApi::default()
    });
    let base_url = start_fake_api(Arc::clone(&api)).await;

    let dir = tempfile::tempdir().unwrap();
    let (store, store_task) = CredentialStore::spawn(dir.path().join("credential.json"));
    store.save(live_credential()).await.unwrap();

    let config = api_config(&base_url);
    let scheduler = Scheduler::new(
        store.clone(),
        TokenRefresher::new(&config, fast_backoff()).unwrap(),
        Pipeline::new(&config, fast_backoff()).unwrap(),
        Dispatcher::new(
            Box::new(FileExporter::new(dir.path().join("snapshots"))),
            Box::new(LogNotifier::new(EventClass::All)),
        ),
        ScheduleConfig {
            refresh_interval: Duration::from_millis(50),
            collect_interval: Duration::from_secs(3600),
            shutdown_grace: Duration::from_secs(1),
        },
    );

    // No signal arrives; the rejected refresh must surface as the exit.
    let result = scheduler.run(std::future::pending()).await;
    match result {
        Err(vitals::FatalError::Refresh(RefreshError::Status(status))) => {
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        other => panic!("expected fatal refresh error, got {other:?}"),
    }

    store.shutdown().await.unwrap();
    store_task.await.unwrap();
}
