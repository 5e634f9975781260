//! HTTP API: submission, approval queue, approve/reject, results.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use common::*;
use loadgate::api::{router, state::AppState};
use loadgate::model::TaskStatus;
use loadgate::storage::TaskStore;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    router(AppState::new(h.scheduler.clone()))
}

async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn submission(start_in_minutes: i64) -> Value {
    let start = Utc::now() + Duration::minutes(start_in_minutes);
    json!({
        "owner_id": 9,
        "num_users": 25,
        "ramp_up": 5,
        "target_url": "https://shop.example.test",
        "start_time": start.to_rfc3339(),
        "end_time": (start + Duration::minutes(10)).to_rfc3339(),
    })
}

#[tokio::test]
async fn test_health() {
    let h = harness(FakeOutcome::Exit(1));
    let (status, body) = call(app(&h), "GET", "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_submit_creates_pending_task() {
    let h = harness(FakeOutcome::Exit(1));
    let (status, body) = call(app(&h), "POST", "/api/v1/tasks", Some(submission(60))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["num_users"], 25);

    let (status, body) = call(app(&h), "GET", "/api/v1/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 1);
    assert_eq!(body["meta"]["status"], "pending");
}

#[tokio::test]
async fn test_submit_accepts_naive_timestamps() {
    let h = harness(FakeOutcome::Exit(1));
    let body = json!({
        "owner_id": 1,
        "num_users": 5,
        "target_url": "http://target.example.test",
        "start_time": "2030-01-01 10:00",
        "end_time": "2030-01-01T10:05:00",
    });
    let (status, body) = call(app(&h), "POST", "/api/v1/tasks", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["ramp_up"], 0);
}

#[tokio::test]
async fn test_submit_rejects_invalid_task() {
    let h = harness(FakeOutcome::Exit(1));
    let mut body = submission(60);
    body["num_users"] = json!(0);
    let (status, body) = call(app(&h), "POST", "/api/v1/tasks", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("num_users"));

    let mut inverted = submission(60);
    inverted["end_time"] = inverted["start_time"].clone();
    let (status, _) = call(app(&h), "POST", "/api/v1/tasks", Some(inverted)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut far = submission(60);
    far["start_time"] = json!("+10000-01-01T00:00");
    far["end_time"] = json!("+10000-01-01T00:05");
    let (status, body) = call(app(&h), "POST", "/api/v1/tasks", Some(far)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("10000"));

    assert!(h.store.list_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_filters() {
    let h = harness(FakeOutcome::Exit(1));
    h.store.insert_task(due_task(1));
    call(app(&h), "POST", "/api/v1/tasks", Some(submission(60))).await;

    let (_, body) = call(app(&h), "GET", "/api/v1/tasks?status=approved", None).await;
    assert_eq!(body["meta"]["total"], 1);
    assert_eq!(body["data"][0]["id"], 1);

    let (_, body) = call(app(&h), "GET", "/api/v1/tasks?status=all", None).await;
    assert_eq!(body["meta"]["total"], 2);

    let (status, _) = call(app(&h), "GET", "/api/v1/tasks?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_approve_future_task_defers_to_poll_loop() {
    let h = harness(FakeOutcome::Artifact(aggregated_csv()));
    let (_, created) = call(app(&h), "POST", "/api/v1/tasks", Some(submission(60))).await;
    let id = created["data"]["id"].as_i64().unwrap();

    let (status, body) = call(app(&h), "POST", &format!("/api/v1/tasks/{id}/approve"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "approved");
    assert_eq!(body["meta"]["dispatched"], false);
    assert_eq!(h.backend.calls(), 0);

    // Approving twice is a conflict, not a second transition.
    let (status, _) = call(app(&h), "POST", &format!("/api/v1/tasks/{id}/approve"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_approve_open_window_dispatches_immediately() {
    let h = harness(FakeOutcome::Artifact(aggregated_csv()));
    let (_, created) = call(app(&h), "POST", "/api/v1/tasks", Some(submission(-1))).await;
    let id = created["data"]["id"].as_i64().unwrap();

    let (status, body) = call(app(&h), "POST", &format!("/api/v1/tasks/{id}/approve"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["dispatched"], true);

    // The run finishes on its own task; wait for the terminal status.
    for _ in 0..100 {
        let task = h.store.get_task(id).await.unwrap().unwrap();
        if task.status.is_terminal() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let (status, body) = call(app(&h), "GET", &format!("/api/v1/tasks/{id}/results"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["task_status"], "completed");
    assert_eq!(body["meta"]["total"], 1);
    assert_eq!(body["data"][0]["error_rate"], 0.05);
    assert_eq!(body["data"][0]["success_count"], 950);
}

#[tokio::test]
async fn test_reject_pending_and_approved() {
    let h = harness(FakeOutcome::Exit(1));
    let (_, a) = call(app(&h), "POST", "/api/v1/tasks", Some(submission(60))).await;
    let (_, b) = call(app(&h), "POST", "/api/v1/tasks", Some(submission(120))).await;
    let a = a["data"]["id"].as_i64().unwrap();
    let b = b["data"]["id"].as_i64().unwrap();
    call(app(&h), "POST", &format!("/api/v1/tasks/{b}/approve"), None).await;

    for id in [a, b] {
        let (status, body) = call(app(&h), "POST", &format!("/api/v1/tasks/{id}/reject"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "rejected");
    }

    // Rejected is terminal.
    let (status, _) = call(app(&h), "POST", &format!("/api/v1/tasks/{a}/approve"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = call(app(&h), "POST", &format!("/api/v1/tasks/{a}/reject"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(h.store.get_task(a).await.unwrap().unwrap().status, TaskStatus::Rejected);
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let h = harness(FakeOutcome::Exit(1));
    for (method, uri) in [
        ("GET", "/api/v1/tasks/404"),
        ("POST", "/api/v1/tasks/404/approve"),
        ("POST", "/api/v1/tasks/404/reject"),
        ("GET", "/api/v1/tasks/404/results"),
    ] {
        let (status, _) = call(app(&h), method, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
    }

    let (status, _) = call(app(&h), "GET", "/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dry_run_preview() {
    let h = harness(FakeOutcome::Exit(1));
    let start = Utc::now() + Duration::hours(2);
    h.store
        .insert_task(task_with_window(1, start, start + Duration::minutes(5)));
    let far = Utc::now() + Duration::hours(48);
    h.store
        .insert_task(task_with_window(2, far, far + Duration::minutes(5)));

    let (status, body) = call(app(&h), "GET", "/api/v1/schedules/dry-run?hours=24", None).await;
    assert_eq!(status, StatusCode::OK);
    let upcoming = body["data"]["upcoming"].as_array().unwrap();
    assert_eq!(upcoming.len(), 1);
    assert_eq!(upcoming[0]["id"], 1);
    assert_eq!(body["meta"]["hours"], 24);
    assert_eq!(h.backend.calls(), 0);
}
