//! Collaborators used by the menu-import stages.

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

use super::state::{FetchedDocument, FetchedPage, ParsedMenu};

/// A possible official website for a restaurant, scored by the discovery
/// service (higher is better).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCandidate {
    pub url: String,
    pub score: f64,
    #[serde(default)]
    pub title: Option<String>,
}

impl SourceCandidate {
    pub fn new(url: impl Into<String>, score: f64) -> Self {
        Self {
            url: url.into(),
            score,
            title: None,
        }
    }
}

pub trait SourceDiscovery: Send + Sync {
    fn discover(
        &self,
        restaurant_name: &str,
        location_hint: Option<&str>,
    ) -> Result<Vec<SourceCandidate>, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBinary {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

pub trait PageFetcher: Send + Sync {
    fn fetch_text(&self, url: &str) -> Result<String, ServiceError>;

    fn fetch_bytes(&self, url: &str) -> Result<FetchedBinary, ServiceError>;
}

/// Turns fetched pages and PDF menus into structured categories and items.
///
/// An extractor that cannot read `documents` ignores them.
pub trait MenuExtractor: Send + Sync {
    fn extract(
        &self,
        pages: &[FetchedPage],
        documents: &[FetchedDocument],
    ) -> Result<ParsedMenu, ServiceError>;
}

/// Produces a studio-quality rendition of a dish photo, encoded as WebP.
pub trait ImageEnhancer: Send + Sync {
    fn enhance(&self, image: &[u8], name: &str) -> Result<Vec<u8>, ServiceError>;
}
