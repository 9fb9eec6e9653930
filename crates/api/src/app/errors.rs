use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use kitchenline_infra::jobs::JobServiceError;
use kitchenline_pipeline::ArtifactError;

pub fn service_error_to_response(err: JobServiceError) -> axum::response::Response {
    match err {
        JobServiceError::Forbidden(e) => json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()),
        JobServiceError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        JobServiceError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        JobServiceError::InvalidTransition(msg) => {
            json_error(StatusCode::CONFLICT, "invalid_transition", msg)
        }
        JobServiceError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        JobServiceError::Artifact(ArtifactError::NotFound(key)) => json_error(
            StatusCode::NOT_FOUND,
            "artifact_not_found",
            format!("artifact {key} is missing"),
        ),
        JobServiceError::Storage(msg) => {
            error!(error = %msg, "job storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
        }
        JobServiceError::Artifact(e) => {
            error!(error = %e, "artifact storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", e.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitchenline_auth::AuthzError;
    use kitchenline_core::JobId;

    #[test]
    fn status_codes_follow_error_kind() {
        let status = |e: JobServiceError| service_error_to_response(e).status();
        assert_eq!(status(JobServiceError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(JobServiceError::NotFound(JobId::new())), StatusCode::NOT_FOUND);
        assert_eq!(status(JobServiceError::InvalidTransition("x".into())), StatusCode::CONFLICT);
        assert_eq!(status(JobServiceError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status(JobServiceError::Forbidden(AuthzError::Forbidden("jobs.manage".into()))),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status(JobServiceError::Storage("db down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
