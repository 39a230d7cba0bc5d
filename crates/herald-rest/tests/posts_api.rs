//! HTTP tests for the posts API against an in-memory scheduler.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use herald_config::ServerConfig;
use herald_jobs::{
    EventLog, Job, JobState, JobStore, MemoryJobStore, PostPayload, Scheduler, SystemClock,
};
use herald_rest::{create_router, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    store: Arc<MemoryJobStore>,
    scheduler: Scheduler,
}

impl TestApp {
    fn new() -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let scheduler = Scheduler::new(
            store.clone(),
            Arc::new(SystemClock),
            Arc::new(EventLog::new()),
            3,
        )
        .unwrap();
        let router = create_router(AppState::new(scheduler.clone()), &ServerConfig::default());

        Self {
            router,
            store,
            scheduler,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn schedule(&self, message: &str) -> Job {
        self.scheduler
            .schedule(PostPayload::text(message), Utc::now() + Duration::hours(1))
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_schedule_post_returns_created() {
    let app = TestApp::new();
    let when = Utc::now() + Duration::hours(2);

    let (status, body) = app
        .post_json(
            "/api/v1/posts/schedule",
            json!({
                "message": "Hello from the future",
                "image_path": "https://example.com/cat.png",
                "scheduled_time": when.to_rfc3339(),
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "scheduled");

    let id = body["data"]["job_id"].as_str().unwrap().parse().unwrap();
    let job = app.store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Waiting);
    assert_eq!(job.payload.image_path.as_deref(), Some("https://example.com/cat.png"));
    assert_eq!(job.max_attempts, 3);
}

#[tokio::test]
async fn test_schedule_in_past_is_bad_request() {
    let app = TestApp::new();

    let (status, body) = app
        .post_json(
            "/api/v1/posts/schedule",
            json!({
                "message": "too late",
                "scheduled_time": (Utc::now() - Duration::minutes(1)).to_rfc3339(),
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "INVALID_SCHEDULE");
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_schedule_without_message_is_unprocessable() {
    let app = TestApp::new();

    let (status, body) = app
        .post_json(
            "/api/v1/posts/schedule",
            json!({
                "message": "",
                "scheduled_time": (Utc::now() + Duration::hours(1)).to_rfc3339(),
            }),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"][0]["field"], "message");
}

#[tokio::test]
async fn test_schedule_whitespace_message_is_unprocessable() {
    let app = TestApp::new();

    let (status, body) = app
        .post_json(
            "/api/v1/posts/schedule",
            json!({
                "message": "   ",
                "scheduled_time": (Utc::now() + Duration::hours(1)).to_rfc3339(),
            }),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["details"][0]["field"], "message");
    assert_eq!(body["error"]["details"][0]["message"], "Message is required");
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = TestApp::new();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/posts/schedule")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_defaults_to_pending_posts() {
    let app = TestApp::new();
    let first = app.schedule("first").await;
    let second = app.schedule("second").await;
    let cancelled = app.schedule("cancelled").await;
    app.scheduler.cancel(&cancelled.id).await.unwrap();

    let (status, body) = app.get("/api/v1/posts/scheduled").await;

    assert_eq!(status, StatusCode::OK);
    let items = body["data"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["id"], first.id.to_string());
    assert_eq!(items[1]["id"], second.id.to_string());
    assert_eq!(items[0]["data"]["message"], "first");
    assert_eq!(items[0]["status"], "waiting");
    assert_eq!(items[0]["attempts"], 0);
    assert!(items[0]["last_error"].is_null());
}

#[tokio::test]
async fn test_list_with_state_filter() {
    let app = TestApp::new();
    app.schedule("pending").await;

    let (status, body) = app.get("/api/v1/posts/scheduled?state=dead").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, body) = app.get("/api/v1/posts/scheduled?state=delayed").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_get_one_post() {
    let app = TestApp::new();
    let job = app.schedule("look at me").await;

    let (status, body) = app.get(&format!("/api/v1/posts/scheduled/{}", job.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["data"]["message"], "look at me");

    let (status, body) = app.get("/api/v1/posts/scheduled/not-an-id").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_cancel_post() {
    let app = TestApp::new();
    let job = app.schedule("never mind").await;
    let uri = format!("/api/v1/posts/scheduled/{}", job.id);

    let (status, body) = app.delete(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "message": "Post cancelled"}));
    assert!(app.store.is_empty());

    let (status, _) = app.delete(&uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_active_post_conflicts() {
    let app = TestApp::new();
    let job = app
        .scheduler
        .schedule(
            PostPayload::text("busy"),
            Utc::now() + Duration::milliseconds(1),
        )
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert!(app
        .store
        .try_lease(&job.id, "worker", Utc::now(), std::time::Duration::from_secs(60))
        .await
        .unwrap());

    let (status, body) = app
        .delete(&format!("/api/v1/posts/scheduled/{}", job.id))
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
    assert_eq!(app.store.get(&job.id).await.unwrap().state, JobState::Active);
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new();

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = app.get("/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");

    let (status, _) = app.get("/live").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let app = TestApp::new();

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/live").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert!(response.headers().contains_key("x-request-id"));
}
