//! Validation → Upload Linking → Model Synthesis → Asset Publishing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::json;

use crate::artifact::ArtifactStore;
use crate::context::StageContext;
use crate::error::StageError;
use crate::retry::RetryPolicy;
use crate::stage::Stage;

use super::services::{MediaProbe, ReconstructionService, ReconstructionStatus, UploadLinker};
use super::state::{ArGenerateState, PublishedAssets};

pub const MIN_DURATION_SECS: f64 = 3.0;
pub const MAX_DURATION_SECS: f64 = 60.0;

/// Canonical container name, or `None` when unsupported.
fn accepted_format(format: &str) -> Option<&'static str> {
    match format.trim().to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => Some("mp4"),
        "mov" | "quicktime" => Some("mov"),
        _ => None,
    }
}

pub struct ValidationStage {
    probe: Arc<dyn MediaProbe>,
    retry: RetryPolicy,
}

impl ValidationStage {
    pub fn new(probe: Arc<dyn MediaProbe>, retry: RetryPolicy) -> Self {
        Self { probe, retry }
    }
}

impl Stage<ArGenerateState> for ValidationStage {
    fn name(&self) -> &'static str {
        "Validation"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    fn run(&self, ctx: &StageContext<'_>, state: &ArGenerateState) -> Result<ArGenerateState, StageError> {
        let mut media = self.probe.probe(&state.input.video_ref)?;

        let Some(format) = accepted_format(&media.format) else {
            return Err(StageError::fatal(format!(
                "unsupported video format '{}'; expected mp4 or mov",
                media.format
            )));
        };
        media.format = format.to_string();

        let secs = media.duration_secs;
        if !secs.is_finite() || !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&secs) {
            return Err(StageError::fatal(format!(
                "video is {secs:.1}s long; expected {MIN_DURATION_SECS}-{MAX_DURATION_SECS}s"
            )));
        }

        ctx.log(format!("Video accepted: {format}, {secs:.1}s"));
        ctx.record_metadata("video_format", json!(format));
        ctx.record_metadata("video_duration_secs", json!(secs));

        let mut next = state.clone();
        next.media = Some(media);
        Ok(next)
    }
}

pub struct UploadLinkingStage {
    linker: Arc<dyn UploadLinker>,
    link_ttl: Duration,
    retry: RetryPolicy,
}

impl UploadLinkingStage {
    pub fn new(linker: Arc<dyn UploadLinker>, link_ttl: Duration, retry: RetryPolicy) -> Self {
        Self {
            linker,
            link_ttl,
            retry,
        }
    }
}

impl Stage<ArGenerateState> for UploadLinkingStage {
    fn name(&self) -> &'static str {
        "Upload Linking"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    fn run(&self, ctx: &StageContext<'_>, state: &ArGenerateState) -> Result<ArGenerateState, StageError> {
        let url = self
            .linker
            .download_url(&state.input.video_ref, self.link_ttl)?;
        // The URL may carry a signature; only the expiry goes to the job log.
        ctx.log(format!(
            "Source video linked (valid for {}s)",
            self.link_ttl.as_secs()
        ));

        let mut next = state.clone();
        next.source_url = Some(url);
        Ok(next)
    }
}

pub struct SynthesisStage {
    reconstruction: Arc<dyn ReconstructionService>,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl SynthesisStage {
    pub fn new(reconstruction: Arc<dyn ReconstructionService>, poll_interval: Duration, retry: RetryPolicy) -> Self {
        Self {
            reconstruction,
            poll_interval,
            retry,
        }
    }
}

impl Stage<ArGenerateState> for SynthesisStage {
    fn name(&self) -> &'static str {
        "Model Synthesis"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    fn run(&self, ctx: &StageContext<'_>, state: &ArGenerateState) -> Result<ArGenerateState, StageError> {
        let Some(source_url) = state.source_url.as_deref() else {
            return Err(StageError::fatal("source video was not linked"));
        };

        let task_id = self.reconstruction.start(source_url, &state.input.item_id)?;
        ctx.log(format!("Reconstruction task {task_id} started"));
        ctx.record_metadata("reconstruction_task_id", json!(task_id));

        let mut last_reported: Option<u8> = None;
        let output = loop {
            ctx.checkpoint()?;
            match self.reconstruction.status(&task_id)? {
                ReconstructionStatus::Done(output) => break output,
                ReconstructionStatus::Failed(reason) => {
                    return Err(StageError::fatal(format!("reconstruction failed: {reason}")));
                }
                ReconstructionStatus::Pending { fraction } => {
                    let pct = (fraction.clamp(0.0, 1.0) * 100.0) as u8;
                    if last_reported.is_none_or(|prev| pct > prev) {
                        ctx.report_progress(pct);
                        last_reported = Some(pct);
                    }
                }
            }
            ctx.sleep(self.poll_interval)?;
        };

        ctx.log(format!(
            "Reconstruction finished: glb {} bytes, usdz {} bytes{}",
            output.glb.len(),
            output.usdz.len(),
            if output.poster.is_some() { ", poster" } else { "" }
        ));

        let mut next = state.clone();
        next.model = Some(output);
        Ok(next)
    }
}

pub struct PublishingStage {
    artifacts: Arc<dyn ArtifactStore>,
    retry: RetryPolicy,
}

impl PublishingStage {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, retry: RetryPolicy) -> Self {
        Self { artifacts, retry }
    }
}

impl Stage<ArGenerateState> for PublishingStage {
    fn name(&self) -> &'static str {
        "Asset Publishing"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    fn run(&self, ctx: &StageContext<'_>, state: &ArGenerateState) -> Result<ArGenerateState, StageError> {
        let Some(model) = state.model.as_ref() else {
            return Err(StageError::fatal("no model to publish"));
        };
        let item = &state.input.item_id;
        let prefix = format!("items/ar/{item}");

        let glb = self
            .artifacts
            .put(&format!("{prefix}/glb/model.glb"), &model.glb, "model/gltf-binary")?;
        ctx.report_progress(35);
        let usdz = self
            .artifacts
            .put(&format!("{prefix}/usdz/model.usdz"), &model.usdz, "model/vnd.usdz+zip")?;
        ctx.report_progress(70);
        let poster = match &model.poster {
            Some(bytes) => Some(
                self.artifacts
                    .put(&format!("{prefix}/poster/poster.jpg"), bytes, "image/jpeg")?,
            ),
            None => None,
        };
        ctx.checkpoint()?;

        let assets = PublishedAssets {
            item_id: item.clone(),
            source_video: state.input.video_ref.clone(),
            glb,
            usdz,
            poster,
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let descriptor = serde_json::to_vec_pretty(&assets)
            .map_err(|e| StageError::fatal(format!("could not serialize asset descriptor: {e}")))?;
        let key = self.artifacts.put(
            &format!("ar/{}/assets.json", ctx.job_id()),
            &descriptor,
            "application/json",
        )?;

        ctx.record_metadata("glb_key", json!(assets.glb));
        ctx.record_metadata("usdz_key", json!(assets.usdz));
        ctx.record_metadata("poster_key", json!(assets.poster));
        ctx.log(format!("Assets published for item {item}"));

        let mut next = state.clone();
        next.assets = Some(assets);
        next.result_ref = Some(key);
        Ok(next)
    }
}
