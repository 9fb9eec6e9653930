//! Collaborators used by the ar-generate stages.

use std::time::Duration;

use crate::error::ServiceError;

use super::state::{MediaInfo, ReconstructionOutput};

/// Inspects an uploaded video without downloading it into the pipeline.
pub trait MediaProbe: Send + Sync {
    fn probe(&self, video_ref: &str) -> Result<MediaInfo, ServiceError>;
}

/// Resolves a blob key into a URL the reconstruction service can download.
pub trait UploadLinker: Send + Sync {
    fn download_url(&self, video_ref: &str, ttl: Duration) -> Result<String, ServiceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconstructionStatus {
    /// `fraction` in 0.0..=1.0.
    Pending { fraction: f32 },
    Done(ReconstructionOutput),
    Failed(String),
}

/// External photogrammetry / 3D reconstruction.
pub trait ReconstructionService: Send + Sync {
    /// Start a task and return its id.
    fn start(&self, source_url: &str, item_id: &str) -> Result<String, ServiceError>;

    fn status(&self, task_id: &str) -> Result<ReconstructionStatus, ServiceError>;
}
