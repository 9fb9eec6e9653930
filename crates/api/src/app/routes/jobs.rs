//! Job endpoints. Handlers are thin: parse, call the job service on the
//! blocking pool, map the result.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};

use kitchenline_auth::Principal;
use kitchenline_infra::jobs::{JobService, JobServiceError};

use crate::app::dto::{self, JobResponse, JobSummary, ListJobsQuery, SubmitJobRequest};
use crate::app::errors;

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit).get(list))
        .route("/:id", get(get_job))
        .route("/:id/cancel", post(cancel))
        .route("/:id/retry", post(retry))
        .route("/:id/resume", post(resume))
        .route("/:id/artifact", get(artifact))
}

/// Run a job-service call off the async workers; stores may block.
async fn blocking<T, F>(f: F) -> Result<T, Response>
where
    F: FnOnce() -> Result<T, JobServiceError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(errors::service_error_to_response),
        Err(e) => Err(errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            format!("job service call aborted: {e}"),
        )),
    }
}

/// POST /jobs
pub async fn submit(
    Extension(jobs): Extension<Arc<JobService>>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<SubmitJobRequest>,
) -> Response {
    let kind = match dto::parse_kind(&req.kind) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };
    match blocking(move || jobs.submit(&principal, kind, req.input)).await {
        Ok(job) => (StatusCode::CREATED, Json(JobResponse::from(job))).into_response(),
        Err(resp) => resp,
    }
}

/// GET /jobs?status=&kind=&limit=
pub async fn list(
    Extension(jobs): Extension<Arc<JobService>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ListJobsQuery>,
) -> Response {
    let filter = match query.to_filter() {
        Ok(filter) => filter,
        Err(resp) => return resp,
    };
    match blocking(move || jobs.list(&principal, &filter)).await {
        Ok(found) => Json(found.into_iter().map(JobSummary::from).collect::<Vec<_>>()).into_response(),
        Err(resp) => resp,
    }
}

/// GET /jobs/:id
pub async fn get_job(
    Extension(jobs): Extension<Arc<JobService>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Response {
    let id = match dto::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match blocking(move || jobs.get(&principal, id)).await {
        Ok(job) => Json(JobResponse::from(job)).into_response(),
        Err(resp) => resp,
    }
}

/// POST /jobs/:id/cancel
pub async fn cancel(
    Extension(jobs): Extension<Arc<JobService>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Response {
    let id = match dto::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match blocking(move || jobs.cancel(&principal, id)).await {
        Ok(job) => Json(JobResponse::from(job)).into_response(),
        Err(resp) => resp,
    }
}

/// POST /jobs/:id/retry
pub async fn retry(
    Extension(jobs): Extension<Arc<JobService>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Response {
    let id = match dto::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match blocking(move || jobs.retry(&principal, id)).await {
        Ok(job) => (StatusCode::ACCEPTED, Json(JobResponse::from(job))).into_response(),
        Err(resp) => resp,
    }
}

/// POST /jobs/:id/resume
///
/// The body is the operator's decision, e.g. `{"url": "https://..."}` for a
/// menu import waiting on its website.
pub async fn resume(
    Extension(jobs): Extension<Arc<JobService>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(decision): Json<serde_json::Value>,
) -> Response {
    let id = match dto::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match blocking(move || jobs.resume(&principal, id, decision)).await {
        Ok(job) => (StatusCode::ACCEPTED, Json(JobResponse::from(job))).into_response(),
        Err(resp) => resp,
    }
}

/// GET /jobs/:id/artifact
pub async fn artifact(
    Extension(jobs): Extension<Arc<JobService>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Response {
    let id = match dto::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match blocking(move || jobs.download(&principal, id)).await {
        Ok(stored) => {
            let disposition = format!("attachment; filename=\"{}\"", stored.filename().replace('"', ""));
            (
                [
                    (header::CONTENT_TYPE, stored.content_type.clone()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                stored.bytes,
            )
                .into_response()
        }
        Err(resp) => resp,
    }
}
