//! `menu-import`: find a restaurant's website, pull its menu, and export it as
//! a zip of `manifest.json` plus dish photos.
//!
//! | Stage       | Weight | Output                                  |
//! |-------------|--------|-----------------------------------------|
//! | Discovery   | 10     | official website URL                    |
//! | Acquisition | 15     | up to five pages and three PDF menus    |
//! | Extraction  | 35     | categories and items                    |
//! | Enhancement | 30     | one image per item where available      |
//! | Packaging   | 10     | `menu-importer/<job_id>/<slug>.zip`     |

pub mod archive;
pub mod links;
pub mod manifest;
pub mod services;
pub mod stages;
pub mod state;

use std::sync::Arc;

use kitchenline_core::JobKind;

use crate::artifact::ArtifactStore;
use crate::definition::PipelineDefinition;
use crate::error::PipelineError;
use crate::retry::RetryPolicy;

pub use services::{
    FetchedBinary, ImageEnhancer, MenuExtractor, PageFetcher, SourceCandidate, SourceDiscovery,
};
pub use stages::{
    AcquisitionStage, DiscoveryStage, EnhancementStage, ExtractionStage, PackagingStage,
};
pub use state::{
    FetchedDocument, MenuCategory, MenuImportInput, MenuImportState, MenuItem, ParsedMenu,
};

/// Collaborators wired into the menu-import stages.
#[derive(Clone)]
pub struct MenuImportServices {
    pub discovery: Arc<dyn SourceDiscovery>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub extractor: Arc<dyn MenuExtractor>,
    pub enhancer: Arc<dyn ImageEnhancer>,
    pub artifacts: Arc<dyn ArtifactStore>,
    /// Applied to every stage.
    pub retry_policy: RetryPolicy,
}

pub fn pipeline(services: MenuImportServices) -> Result<PipelineDefinition<MenuImportState>, PipelineError> {
    let retry = services.retry_policy;
    PipelineDefinition::builder(JobKind::MenuImport)
        .stage(DiscoveryStage::new(services.discovery, retry.clone()), 10)
        .stage(AcquisitionStage::new(services.fetcher.clone(), retry.clone()), 15)
        .stage(ExtractionStage::new(services.extractor, retry.clone()), 35)
        .stage(
            EnhancementStage::new(services.fetcher, services.enhancer, retry.clone()),
            30,
        )
        .stage(PackagingStage::new(services.artifacts, retry), 10)
        .build()
}
