//! Discovery → Acquisition → Extraction → Enhancement → Packaging.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::artifact::ArtifactStore;
use crate::context::StageContext;
use crate::error::{ServiceError, StageError};
use crate::retry::RetryPolicy;
use crate::stage::Stage;

use super::archive::build_archive;
use super::links::{is_pdf_url, menu_links, normalize_website, pdf_links};
use super::manifest::{build_manifest, slugify};
use super::services::{ImageEnhancer, MenuExtractor, PageFetcher, SourceCandidate, SourceDiscovery};
use super::state::{DishImage, FetchedDocument, FetchedPage, MenuImportState, is_pdf};

/// Upper bound on pages fetched per import, the chosen page included.
pub const MAX_PAGES: usize = 5;

/// PDF links followed from any one page.
pub const MAX_PDFS_PER_PAGE: usize = 2;

/// Upper bound on PDF menus downloaded per import.
pub const MAX_DOCUMENTS: usize = 3;

/// Share of Acquisition progress spent on HTML pages; PDFs take the rest.
const PAGES_SHARE: usize = 70;

const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, PartialEq)]
enum Choice {
    Nothing,
    Tied(Vec<SourceCandidate>),
    One(SourceCandidate),
}

fn choose_candidate(candidates: Vec<SourceCandidate>) -> Choice {
    let usable: Vec<SourceCandidate> = candidates
        .into_iter()
        .filter(|c| c.score.is_finite())
        .filter_map(|c| {
            normalize_website(&c.url)
                .ok()
                .map(|url| SourceCandidate { url, ..c })
        })
        .collect();

    let Some(best) = usable.iter().map(|c| c.score).reduce(f64::max) else {
        return Choice::Nothing;
    };
    let mut top: Vec<SourceCandidate> = usable
        .into_iter()
        .filter(|c| (c.score - best).abs() < SCORE_EPSILON)
        .collect();
    top.dedup_by(|a, b| a.url == b.url);

    if top.len() == 1 {
        Choice::One(top.remove(0))
    } else {
        Choice::Tied(top)
    }
}

pub struct DiscoveryStage {
    discovery: Arc<dyn SourceDiscovery>,
    retry: RetryPolicy,
}

impl DiscoveryStage {
    pub fn new(discovery: Arc<dyn SourceDiscovery>, retry: RetryPolicy) -> Self {
        Self { discovery, retry }
    }
}

impl Stage<MenuImportState> for DiscoveryStage {
    fn name(&self) -> &'static str {
        "Discovery"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    fn run(&self, ctx: &StageContext<'_>, state: &MenuImportState) -> Result<MenuImportState, StageError> {
        let mut next = state.clone();

        let preset = state
            .website_url
            .as_ref()
            .map(|u| (u, "operator-selected website"))
            .or_else(|| {
                state
                    .input
                    .website_override
                    .as_ref()
                    .map(|u| (u, "website override"))
            });
        if let Some((url, source)) = preset {
            ctx.log(format!("Using {source}: {url}"));
            ctx.record_metadata("website_url", json!(url));
            next.website_url = Some(url.clone());
            return Ok(next);
        }

        let name = &state.input.restaurant_name;
        match &state.input.location_hint {
            Some(loc) => ctx.log(format!("Resolving website for '{name}' near {loc}")),
            None => ctx.log(format!("Resolving website for '{name}'")),
        }
        let candidates = self
            .discovery
            .discover(name, state.input.location_hint.as_deref())?;
        ctx.checkpoint()?;
        ctx.report_progress(80);

        match choose_candidate(candidates) {
            Choice::Nothing => Err(StageError::needs_input(
                "Could not resolve the restaurant website; provide a website URL",
                Vec::new(),
            )),
            Choice::Tied(tied) => Err(StageError::needs_input(
                format!("{} websites are equally plausible; choose one", tied.len()),
                tied.iter().map(|c| json!(c)).collect(),
            )),
            Choice::One(best) => {
                ctx.log(format!("Website resolved: {}", best.url));
                ctx.record_metadata("website_url", json!(best.url));
                next.website_url = Some(best.url);
                Ok(next)
            }
        }
    }
}

pub struct AcquisitionStage {
    fetcher: Arc<dyn PageFetcher>,
    retry: RetryPolicy,
}

impl AcquisitionStage {
    pub fn new(fetcher: Arc<dyn PageFetcher>, retry: RetryPolicy) -> Self {
        Self { fetcher, retry }
    }
}

impl AcquisitionStage {
    fn fetch_document(&self, url: &str) -> Result<FetchedDocument, ServiceError> {
        let fetched = self.fetcher.fetch_bytes(url)?;
        if !is_pdf(&fetched.bytes, fetched.content_type.as_deref()) {
            return Err(ServiceError::invalid_response(format!("{url} is not a PDF")));
        }
        Ok(FetchedDocument {
            url: url.to_string(),
            content_type: fetched.content_type,
            bytes: fetched.bytes,
        })
    }
}

impl Stage<MenuImportState> for AcquisitionStage {
    fn name(&self) -> &'static str {
        "Acquisition"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    fn run(&self, ctx: &StageContext<'_>, state: &MenuImportState) -> Result<MenuImportState, StageError> {
        let Some(root) = state.website_url.as_deref() else {
            return Err(StageError::fatal("no website selected"));
        };

        let mut pages: Vec<FetchedPage> = Vec::new();
        let mut documents: Vec<FetchedDocument> = Vec::new();
        let mut links: Vec<String> = Vec::new();

        if is_pdf_url(root) {
            ctx.log(format!("Downloading PDF: {root}"));
            documents.push(self.fetch_document(root)?);
        } else {
            ctx.log(format!("Fetching {root}"));
            let body = self.fetcher.fetch_text(root)?;
            links = menu_links(root, &body);
            pages.push(FetchedPage {
                url: root.to_string(),
                body,
            });
            ctx.log(format!("Discovered {} potential menu page(s)", links.len()));
        }
        ctx.report_progress((PAGES_SHARE / MAX_PAGES) as u8);

        for link in links.iter().take(MAX_PAGES - 1) {
            ctx.checkpoint()?;
            ctx.log(format!("Fetching menu page: {link}"));
            match self.fetcher.fetch_text(link) {
                Ok(body) => pages.push(FetchedPage {
                    url: link.clone(),
                    body,
                }),
                Err(e) => ctx.log(format!("Skipping {link}: {e}")),
            }
            ctx.report_progress(((pages.len() * PAGES_SHARE) / MAX_PAGES) as u8);
        }
        ctx.report_progress(PAGES_SHARE as u8);

        let mut pdf_urls: Vec<String> = Vec::new();
        for page in &pages {
            for url in pdf_links(&page.url, &page.body).into_iter().take(MAX_PDFS_PER_PAGE) {
                if !pdf_urls.contains(&url) && documents.iter().all(|d| d.url != url) {
                    pdf_urls.push(url);
                }
            }
        }
        pdf_urls.truncate(MAX_DOCUMENTS.saturating_sub(documents.len()));
        let pdf_total = pdf_urls.len().max(1);
        for (i, url) in pdf_urls.iter().enumerate() {
            ctx.checkpoint()?;
            ctx.log(format!("Downloading PDF: {url}"));
            match self.fetch_document(url) {
                Ok(doc) => documents.push(doc),
                Err(e) => ctx.log(format!("Skipping PDF {url}: {e}")),
            }
            ctx.report_progress((PAGES_SHARE + ((i + 1) * (100 - PAGES_SHARE)) / pdf_total) as u8);
        }

        let urls: Vec<&str> = pages
            .iter()
            .map(|p| p.url.as_str())
            .chain(documents.iter().map(|d| d.url.as_str()))
            .collect();
        ctx.record_metadata("menu_source_urls", json!(urls));
        ctx.record_metadata("pages_fetched", json!(pages.len()));
        ctx.record_metadata("pdfs_fetched", json!(documents.len()));

        let mut next = state.clone();
        next.pages = pages;
        next.documents = documents;
        Ok(next)
    }
}

pub struct ExtractionStage {
    extractor: Arc<dyn MenuExtractor>,
    retry: RetryPolicy,
}

impl ExtractionStage {
    pub fn new(extractor: Arc<dyn MenuExtractor>, retry: RetryPolicy) -> Self {
        Self { extractor, retry }
    }
}

impl Stage<MenuImportState> for ExtractionStage {
    fn name(&self) -> &'static str {
        "Extraction"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    fn run(&self, ctx: &StageContext<'_>, state: &MenuImportState) -> Result<MenuImportState, StageError> {
        ctx.log(format!(
            "Extracting menu from {} page(s) and {} PDF(s)",
            state.pages.len(),
            state.documents.len()
        ));
        let menu = self.extractor.extract(&state.pages, &state.documents)?;
        ctx.checkpoint()?;

        let items = menu.items_count();
        ctx.record_metadata("categories_count", json!(menu.categories.len()));
        ctx.record_metadata("items_count", json!(items));
        if items == 0 {
            return Err(StageError::fatal(
                "no menu items could be extracted; try providing a direct URL to the menu page",
            ));
        }
        ctx.log(format!(
            "Menu extraction complete: {} categories, {items} items",
            menu.categories.len()
        ));

        let mut next = state.clone();
        next.menu = menu;
        Ok(next)
    }
}

/// SHA-256 hex digest of an image, used to spot the same photo under
/// different URLs.
fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Extension for an un-enhanced image, from its URL or content type.
fn image_extension(url: &str, content_type: Option<&str>) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or("").to_ascii_lowercase();
    for (suffix, ext) in [
        (".jpg", "jpg"),
        (".jpeg", "jpg"),
        (".png", "png"),
        (".webp", "webp"),
        (".gif", "gif"),
    ] {
        if path.ends_with(suffix) {
            return ext;
        }
    }
    match content_type.map(|c| c.to_ascii_lowercase()) {
        Some(c) if c.contains("png") => "png",
        Some(c) if c.contains("webp") => "webp",
        Some(c) if c.contains("gif") => "gif",
        _ => "jpg",
    }
}

pub struct EnhancementStage {
    fetcher: Arc<dyn PageFetcher>,
    enhancer: Arc<dyn ImageEnhancer>,
    retry: RetryPolicy,
}

impl EnhancementStage {
    pub fn new(fetcher: Arc<dyn PageFetcher>, enhancer: Arc<dyn ImageEnhancer>, retry: RetryPolicy) -> Self {
        Self {
            fetcher,
            enhancer,
            retry,
        }
    }
}

impl Stage<MenuImportState> for EnhancementStage {
    fn name(&self) -> &'static str {
        "Enhancement"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    fn run(&self, ctx: &StageContext<'_>, state: &MenuImportState) -> Result<MenuImportState, StageError> {
        let mut next = state.clone();
        next.images.clear();
        let total = next.menu.items_count().max(1);
        let mut position = 0usize;
        // content hash -> archive filename of the first dish that used it
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut duplicates = 0usize;

        for category in next.menu.categories.iter_mut() {
            for item in category.items.iter_mut() {
                position += 1;
                ctx.checkpoint()?;
                item.image_filename = None;

                if let Some(url) = item.image_url.clone() {
                    match self.fetcher.fetch_bytes(&url) {
                        Err(e) => ctx.log(format!("No image for '{}': {e}", item.name)),
                        Ok(original) => {
                            let hash = content_hash(&original.bytes);
                            match seen.get(&hash).cloned() {
                                Some(existing) => {
                                    ctx.log(format!(
                                        "'{}' uses the same photo as {existing}; reusing it",
                                        item.name
                                    ));
                                    item.image_filename = Some(existing);
                                    duplicates += 1;
                                }
                                None => {
                                    let stem = format!("dish_{position:03}");
                                    let (filename, bytes) = match self.enhancer.enhance(&original.bytes, &stem) {
                                        Ok(enhanced) => (format!("{stem}.webp"), enhanced),
                                        Err(e) => {
                                            ctx.log(format!(
                                                "Failed to enhance image for '{}': {e}; keeping original",
                                                item.name
                                            ));
                                            let ext = image_extension(&url, original.content_type.as_deref());
                                            (format!("{stem}.{ext}"), original.bytes)
                                        }
                                    };
                                    seen.insert(hash, filename.clone());
                                    item.image_filename = Some(filename.clone());
                                    next.images.push(DishImage { filename, bytes });
                                }
                            }
                        }
                    }
                }

                ctx.report_progress(((position * 100) / total) as u8);
            }
        }

        ctx.log(format!(
            "{} unique image(s) for {} dishes",
            next.images.len(),
            next.menu.items_count()
        ));
        ctx.record_metadata("images_count", json!(next.images.len()));
        ctx.record_metadata("duplicate_images", json!(duplicates));
        Ok(next)
    }
}

pub struct PackagingStage {
    artifacts: Arc<dyn ArtifactStore>,
    retry: RetryPolicy,
}

impl PackagingStage {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, retry: RetryPolicy) -> Self {
        Self { artifacts, retry }
    }
}

impl Stage<MenuImportState> for PackagingStage {
    fn name(&self) -> &'static str {
        "Packaging"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    fn run(&self, ctx: &StageContext<'_>, state: &MenuImportState) -> Result<MenuImportState, StageError> {
        let name = &state.input.restaurant_name;
        let slug = slugify(name);

        ctx.log("Building manifest.json");
        let manifest = build_manifest(name, &state.menu, Utc::now());
        let manifest_json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| StageError::fatal(format!("could not serialize manifest: {e}")))?;
        ctx.report_progress(30);

        ctx.log("Creating zip archive");
        let archive = build_archive(&slug, &manifest_json, &state.images).map_err(StageError::Fatal)?;
        ctx.report_progress(60);
        ctx.checkpoint()?;

        let key = format!("menu-importer/{}/{slug}.zip", ctx.job_id());
        let stored = self.artifacts.put(&key, &archive, "application/zip")?;
        ctx.record_metadata("zip_size_bytes", json!(archive.len()));
        ctx.log(format!("Archive stored: {stored} ({} bytes)", archive.len()));

        let mut next = state.clone();
        next.result_ref = Some(stored);
        Ok(next)
    }
}
