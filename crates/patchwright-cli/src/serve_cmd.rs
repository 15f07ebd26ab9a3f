//! The HTTP operational surface: a read-mostly view over builds and tasks,
//! plus a manual build-creation endpoint for demos.

use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use patchwright_db::models::{Build, BuildStatus, CandidateFile, Patch, Plan, PullRequest, Task, TaskStatus, Validation};
use patchwright_db::queries::{
    builds as build_db, candidate_files as candidate_file_db, patches as patch_db, plans as plan_db,
    pull_requests as pull_request_db, tasks as task_db, validations as validation_db,
};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateBuildRequest {
    pub job: String,
    pub build_number: i64,
    pub branch: String,
    pub repository_url: String,
    pub commit_sha: String,
    #[serde(default)]
    pub ingress_payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct BuildDetailResponse {
    #[serde(flatten)]
    pub build: Build,
    pub tasks: Vec<Task>,
    pub plan: Option<Plan>,
    pub candidate_files: Vec<CandidateFile>,
    pub patches: Vec<Patch>,
    pub validations: Vec<Validation>,
    pub pull_request: Option<PullRequest>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub builds_by_status: Vec<(BuildStatus, i64)>,
    pub tasks_by_status: Vec<(TaskStatus, i64)>,
    pub dead_letter_count: i64,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pool: PgPool) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/builds", get(list_builds).post(create_build))
        .route("/api/builds/{id}", get(get_build_detail))
        .route("/api/tasks/dead-letters", get(list_dead_letters))
        .route("/api/stats", get(stats))
        .layer(CorsLayer::permissive())
        .with_state(pool)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pool: PgPool, bind: &str, port: u16) -> Result<()> {
    let app = build_router(pool);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("patchwright serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("patchwright serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index(State(pool): State<PgPool>) -> Result<axum::response::Response, AppError> {
    let builds = build_db::list_builds(&pool).await.map_err(AppError::internal)?;

    let rows = if builds.is_empty() {
        "<tr><td colspan=\"3\">No builds found.</td></tr>".to_string()
    } else {
        builds
            .iter()
            .map(|b| {
                format!(
                    "<tr><td><a href=\"/api/builds/{id}\">{job} #{number}</a></td><td>{status}</td><td>{id}</td></tr>",
                    id = b.id,
                    job = b.job,
                    number = b.build_number,
                    status = b.status,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let html = format!(
        "<!DOCTYPE html>\
<html><head><title>patchwright</title></head><body>\
<h1>patchwright</h1>\
<p><a href=\"/api/builds\">/api/builds</a> | <a href=\"/api/tasks/dead-letters\">/api/tasks/dead-letters</a> | <a href=\"/api/stats\">/api/stats</a></p>\
<table><tr><th>Build</th><th>Status</th><th>ID</th></tr>{rows}</table>\
</body></html>"
    );

    Ok(Html(html).into_response())
}

async fn list_builds(State(pool): State<PgPool>) -> Result<axum::response::Response, AppError> {
    let builds = build_db::list_builds(&pool).await.map_err(AppError::internal)?;
    Ok(Json(builds).into_response())
}

async fn create_build(
    State(pool): State<PgPool>,
    Json(req): Json<CreateBuildRequest>,
) -> Result<axum::response::Response, AppError> {
    let fields = build_db::NewBuild {
        job: req.job,
        build_number: req.build_number,
        branch: req.branch,
        repository_url: req.repository_url,
        commit_sha: req.commit_sha,
        ingress_payload: req.ingress_payload,
    };

    match build_db::create_build(&pool, fields).await {
        Ok(build) => Ok((StatusCode::CREATED, Json(build)).into_response()),
        Err(patchwright_db::errors::CreateBuildError::Duplicate { job, build_number }) => Err(
            AppError::bad_request(format!("build {job}#{build_number} already exists")),
        ),
        Err(patchwright_db::errors::CreateBuildError::Other(e)) => Err(AppError::internal(e)),
    }
}

async fn get_build_detail(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let build = build_db::get_build(&pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("build {id} not found")))?;

    let tasks = task_db::list_tasks_for_build(&pool, id)
        .await
        .map_err(AppError::internal)?;
    let plan = plan_db::get_plan_for_build(&pool, id)
        .await
        .map_err(AppError::internal)?;
    let candidate_files = candidate_file_db::list_candidate_files_for_build(&pool, id)
        .await
        .map_err(AppError::internal)?;
    let patches = patch_db::list_patches_for_build(&pool, id)
        .await
        .map_err(AppError::internal)?;
    let validations = validation_db::list_validations_for_build(&pool, id)
        .await
        .map_err(AppError::internal)?;
    let pull_request = pull_request_db::get_pull_request_for_build(&pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(BuildDetailResponse {
        build,
        tasks,
        plan,
        candidate_files,
        patches,
        validations,
        pull_request,
    })
    .into_response())
}

async fn list_dead_letters(State(pool): State<PgPool>) -> Result<axum::response::Response, AppError> {
    let tasks = task_db::list_dead_letters(&pool).await.map_err(AppError::internal)?;
    Ok(Json(tasks).into_response())
}

async fn stats(State(pool): State<PgPool>) -> Result<axum::response::Response, AppError> {
    let builds_by_status = build_db::count_builds_by_status(&pool)
        .await
        .map_err(AppError::internal)?;
    let tasks_by_status = task_db::count_tasks_by_status(&pool)
        .await
        .map_err(AppError::internal)?;
    let dead_letter_count = tasks_by_status
        .iter()
        .find(|(status, _)| *status == TaskStatus::DeadLetter)
        .map(|(_, count)| *count)
        .unwrap_or(0);

    Ok(Json(StatsResponse {
        builds_by_status,
        tasks_by_status,
        dead_letter_count,
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
