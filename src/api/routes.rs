//! API route definitions.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::state::AppState;
use super::ApiError;
use crate::model::{NewTask, Task, TaskId, TaskStatus};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", get(list_tasks).post(submit_task))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/approve", post(approve_task))
        .route("/tasks/{id}/reject", post(reject_task))
        .route("/tasks/{id}/results", get(task_results))
        .route("/schedules/dry-run", get(schedule_dry_run))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    /// A status name or `all`; defaults to `pending` (the approval queue).
    status: Option<String>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let filter = query.status.as_deref().unwrap_or("pending");
    let tasks = if filter == "all" {
        state.store.list_tasks().await?
    } else {
        let status = filter
            .parse::<TaskStatus>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        state.store.list_tasks_by_status(status).await?
    };

    Ok(Json(json!({ "data": tasks, "meta": { "total": tasks.len(), "status": filter } })))
}

async fn submit_task(
    State(state): State<AppState>,
    Json(new): Json<NewTask>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let task = state.store.create_task(new).await?;
    info!(task_id = task.id, owner_id = task.owner_id, "task submitted, awaiting approval");
    Ok((StatusCode::CREATED, Json(json!({ "data": task }))))
}

async fn load_task(state: &AppState, id: TaskId) -> Result<Task, ApiError> {
    state
        .store
        .get_task(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {id} not found")))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> Result<Json<Value>, ApiError> {
    let task = load_task(&state, id).await?;
    Ok(Json(json!({ "data": task })))
}

async fn approve_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> Result<Json<Value>, ApiError> {
    let approved = state
        .store
        .claim_task(id, TaskStatus::Pending, TaskStatus::Approved)
        .await?;
    let task = load_task(&state, id).await?;
    if !approved {
        return Err(ApiError::Conflict(format!(
            "task {id} is {}, only pending tasks can be approved",
            task.status
        )));
    }

    info!(task_id = id, "task approved");
    let dispatched = state.scheduler.trigger_on_approval(&task).await.is_some();
    Ok(Json(json!({ "data": task, "meta": { "dispatched": dispatched } })))
}

async fn reject_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> Result<Json<Value>, ApiError> {
    let mut rejected = false;
    for from in [TaskStatus::Pending, TaskStatus::Approved] {
        if state.store.claim_task(id, from, TaskStatus::Rejected).await? {
            rejected = true;
            break;
        }
    }

    let task = load_task(&state, id).await?;
    if !rejected {
        return Err(ApiError::Conflict(format!(
            "task {id} is {}, only pending or approved tasks can be rejected",
            task.status
        )));
    }

    info!(task_id = id, "task rejected");
    Ok(Json(json!({ "data": task })))
}

async fn task_results(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> Result<Json<Value>, ApiError> {
    let task = load_task(&state, id).await?;
    let results = state.store.results_for_task(task.id).await?;
    Ok(Json(json!({
        "data": results,
        "meta": { "total": results.len(), "task_status": task.status }
    })))
}

#[derive(Debug, Deserialize)]
struct DryRunQuery {
    hours: Option<u64>,
}

async fn schedule_dry_run(
    State(state): State<AppState>,
    Query(query): Query<DryRunQuery>,
) -> Result<Json<Value>, ApiError> {
    let hours = query.hours.unwrap_or(24);
    let upcoming = state.scheduler.preview(Utc::now(), hours).await?;
    Ok(Json(json!({ "data": { "upcoming": upcoming }, "meta": { "hours": hours } })))
}
