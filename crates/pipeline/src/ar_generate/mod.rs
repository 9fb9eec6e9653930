//! `ar-generate`: turn a short rotation video of a dish into GLB/USDZ models.
//!
//! | Stage            | Weight |
//! |------------------|--------|
//! | Validation       | 5      |
//! | Upload Linking   | 10     |
//! | Model Synthesis  | 70     |
//! | Asset Publishing | 15     |
//!
//! Assets land under `items/ar/<item_id>/{glb,usdz,poster}/`; the job's
//! `result_ref` is the descriptor at `ar/<job_id>/assets.json`.

pub mod services;
pub mod stages;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use kitchenline_core::JobKind;

use crate::artifact::ArtifactStore;
use crate::definition::PipelineDefinition;
use crate::error::PipelineError;
use crate::retry::RetryPolicy;

pub use services::{MediaProbe, ReconstructionService, ReconstructionStatus, UploadLinker};
pub use stages::{PublishingStage, SynthesisStage, UploadLinkingStage, ValidationStage};
pub use state::{ArGenerateInput, ArGenerateState, MediaInfo, PublishedAssets, ReconstructionOutput};

#[derive(Clone)]
pub struct ArGenerateServices {
    pub probe: Arc<dyn MediaProbe>,
    pub linker: Arc<dyn UploadLinker>,
    pub reconstruction: Arc<dyn ReconstructionService>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub retry_policy: RetryPolicy,
    /// Delay between reconstruction status polls.
    pub poll_interval: Duration,
    /// Lifetime of the download URL handed to the reconstruction service.
    pub link_ttl: Duration,
}

impl ArGenerateServices {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
    pub const DEFAULT_LINK_TTL: Duration = Duration::from_secs(3600);
}

pub fn pipeline(services: ArGenerateServices) -> Result<PipelineDefinition<ArGenerateState>, PipelineError> {
    let retry = services.retry_policy;
    PipelineDefinition::builder(JobKind::ArGenerate)
        .stage(ValidationStage::new(services.probe, retry.clone()), 5)
        .stage(
            UploadLinkingStage::new(services.linker, services.link_ttl, retry.clone()),
            10,
        )
        .stage(
            SynthesisStage::new(services.reconstruction, services.poll_interval, retry.clone()),
            70,
        )
        .stage(PublishingStage::new(services.artifacts, retry), 15)
        .build()
}
