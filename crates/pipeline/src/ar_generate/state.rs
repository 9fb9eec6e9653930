use serde::{Deserialize, Serialize};

use crate::artifact::validate_key;
use crate::error::PipelineError;
use crate::stage::PipelineState;

const MAX_ITEM_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArGenerateInput {
    /// Menu item the model belongs to; used as a storage path segment.
    pub item_id: String,
    /// Blob key of the already-uploaded rotation video.
    pub video_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub format: String,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionOutput {
    pub glb: Vec<u8>,
    pub usdz: Vec<u8>,
    #[serde(default)]
    pub poster: Option<Vec<u8>>,
}

/// Keys of the published assets, as written to the descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedAssets {
    pub item_id: String,
    pub source_video: String,
    pub glb: String,
    pub usdz: String,
    pub poster: Option<String>,
    pub generated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArGenerateState {
    pub input: ArGenerateInput,
    pub media: Option<MediaInfo>,
    /// Time-limited download URL handed to the reconstruction service.
    pub source_url: Option<String>,
    pub model: Option<ReconstructionOutput>,
    pub assets: Option<PublishedAssets>,
    pub result_ref: Option<String>,
}

fn valid_item_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ITEM_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl PipelineState for ArGenerateState {
    type Input = ArGenerateInput;

    fn validate(input: ArGenerateInput) -> Result<ArGenerateInput, PipelineError> {
        let item_id = input.item_id.trim().to_string();
        if !valid_item_id(&item_id) {
            return Err(PipelineError::InvalidInput(format!(
                "item_id must be 1-{MAX_ITEM_ID_LEN} characters of [A-Za-z0-9_-]"
            )));
        }
        let video_ref = input.video_ref.trim().to_string();
        validate_key(&video_ref)
            .map_err(|_| PipelineError::InvalidInput(format!("invalid video_ref '{video_ref}'")))?;
        Ok(ArGenerateInput { item_id, video_ref })
    }

    fn from_input(input: ArGenerateInput) -> Self {
        Self {
            input,
            media: None,
            source_url: None,
            model: None,
            assets: None,
            result_ref: None,
        }
    }

    fn result_ref(&self) -> Option<&str> {
        self.result_ref.as_deref()
    }

    fn validate_resolution(_decision: &serde_json::Value) -> Result<serde_json::Value, PipelineError> {
        Err(PipelineError::InvalidResolution(
            "ar-generate jobs never wait for input".into(),
        ))
    }

    fn apply_resolution(&mut self, decision: &serde_json::Value) -> Result<(), PipelineError> {
        Self::validate_resolution(decision).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(item: &str, video: &str) -> ArGenerateInput {
        ArGenerateInput {
            item_id: item.into(),
            video_ref: video.into(),
        }
    }

    #[test]
    fn item_id_must_be_path_safe() {
        let ok = ArGenerateState::validate(input(" burger-01 ", "uploads/v/burger.mp4")).unwrap();
        assert_eq!(ok.item_id, "burger-01");
        assert!(ArGenerateState::validate(input("../x", "uploads/a.mp4")).is_err());
        assert!(ArGenerateState::validate(input("", "uploads/a.mp4")).is_err());
        assert!(ArGenerateState::validate(input("a b", "uploads/a.mp4")).is_err());
    }

    #[test]
    fn video_ref_must_be_a_relative_key() {
        assert!(ArGenerateState::validate(input("x", "/etc/passwd")).is_err());
        assert!(ArGenerateState::validate(input("x", "")).is_err());
    }

    #[test]
    fn resolutions_are_refused() {
        assert!(ArGenerateState::validate_resolution(&json!({"url": "x"})).is_err());
    }
}
