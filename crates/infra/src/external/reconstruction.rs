//! HTTP client for the 3D reconstruction service.
//!
//! `POST {base}/tasks` with `{"source_url", "item_id"}` answers `{"task_id"}`.
//! `GET {base}/tasks/{id}` answers the task state; finished tasks list asset
//! URLs that are downloaded before being handed to the pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use kitchenline_pipeline::ServiceError;
use kitchenline_pipeline::ar_generate::{ReconstructionOutput, ReconstructionService, ReconstructionStatus};

use super::http::{LazyClient, check_response, transport_error};

#[derive(Debug, Serialize)]
struct StartRequest<'a> {
    source_url: &'a str,
    item_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    task_id: String,
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum TaskState {
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    status: TaskState,
    #[serde(default)]
    progress: Option<f32>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    glb_url: Option<String>,
    #[serde(default)]
    usdz_url: Option<String>,
    #[serde(default)]
    poster_url: Option<String>,
}

#[derive(Debug)]
pub struct HttpReconstructionClient {
    base_url: String,
    client: LazyClient,
}

impl HttpReconstructionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: LazyClient::new(Duration::from_secs(60)),
        }
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        let response = self.client.get()?.get(url).send().map_err(transport_error)?;
        let bytes = check_response(response, url)?.bytes().map_err(transport_error)?;
        Ok(bytes.to_vec())
    }

    fn finished(&self, task_id: &str, task: TaskResponse) -> Result<ReconstructionStatus, ServiceError> {
        let (Some(glb_url), Some(usdz_url)) = (task.glb_url, task.usdz_url) else {
            return Err(ServiceError::invalid_response(format!(
                "task {task_id} finished without model URLs"
            )));
        };
        let glb = self.download(&glb_url)?;
        let usdz = self.download(&usdz_url)?;
        let poster = match task.poster_url {
            Some(url) => Some(self.download(&url)?),
            None => None,
        };
        debug!(task_id, glb_bytes = glb.len(), usdz_bytes = usdz.len(), "reconstruction assets fetched");
        Ok(ReconstructionStatus::Done(ReconstructionOutput { glb, usdz, poster }))
    }
}

fn pending(task: &TaskResponse) -> ReconstructionStatus {
    let fraction = task.progress.unwrap_or(0.0);
    // Some deployments report percent instead of a fraction.
    let fraction = if fraction > 1.0 { fraction / 100.0 } else { fraction };
    ReconstructionStatus::Pending {
        fraction: fraction.clamp(0.0, 1.0),
    }
}

impl ReconstructionService for HttpReconstructionClient {
    fn start(&self, source_url: &str, item_id: &str) -> Result<String, ServiceError> {
        let url = format!("{}/tasks", self.base_url);
        let response = self
            .client
            .get()?
            .post(&url)
            .json(&StartRequest { source_url, item_id })
            .send()
            .map_err(transport_error)?;
        let started: StartResponse = check_response(response, &url)?
            .json()
            .map_err(|e| ServiceError::invalid_response(format!("bad task response: {e}")))?;
        if started.task_id.is_empty() {
            return Err(ServiceError::invalid_response("empty task id"));
        }
        Ok(started.task_id)
    }

    fn status(&self, task_id: &str) -> Result<ReconstructionStatus, ServiceError> {
        let url = format!("{}/tasks/{}", self.base_url, task_id);
        let response = self.client.get()?.get(&url).send().map_err(transport_error)?;
        let task: TaskResponse = check_response(response, &url)?
            .json()
            .map_err(|e| ServiceError::invalid_response(format!("bad status response: {e}")))?;
        match task.status {
            TaskState::Pending | TaskState::Running => Ok(pending(&task)),
            TaskState::Failed => Ok(ReconstructionStatus::Failed(
                task.error.unwrap_or_else(|| "reconstruction failed".to_string()),
            )),
            TaskState::Done => self.finished(task_id, task),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(value: serde_json::Value) -> TaskResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn progress_accepts_fraction_or_percent() {
        let fraction = |t: &TaskResponse| match pending(t) {
            ReconstructionStatus::Pending { fraction } => fraction,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(fraction(&task(json!({"status": "running", "progress": 0.25}))), 0.25);
        assert_eq!(fraction(&task(json!({"status": "running", "progress": 80}))), 0.8);
        assert_eq!(fraction(&task(json!({"status": "pending"}))), 0.0);
    }

    #[test]
    fn failed_task_carries_its_reason() {
        let t = task(json!({"status": "failed", "error": "not enough frames"}));
        assert_eq!(t.status, TaskState::Failed);
        assert_eq!(t.error.as_deref(), Some("not enough frames"));
    }

    #[test]
    fn done_without_urls_is_an_invalid_response() {
        let client = HttpReconstructionClient::new("http://recon.invalid/");
        let err = client
            .finished("t-1", task(json!({"status": "done", "glb_url": "http://x/a.glb"})))
            .unwrap_err();
        assert_eq!(err.kind, kitchenline_pipeline::ServiceErrorKind::InvalidResponse);
    }

    #[test]
    fn unknown_state_is_rejected_by_the_decoder() {
        assert!(serde_json::from_value::<TaskResponse>(json!({"status": "exploded"})).is_err());
    }
}
