//! Menu structuring through an external extraction service.
//!
//! The service receives the visible text of every fetched page plus any PDF
//! menus as a multipart upload, and answers with `{"categories": [...]}` in
//! the [`ParsedMenu`] shape. It reads PDFs (OCR included) and fills in
//! descriptions, dietary tags and allergens where it can. Dish photos are
//! still matched locally against the fetched pages.

use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use serde::Serialize;
use tracing::{debug, warn};

use kitchenline_pipeline::ServiceError;
use kitchenline_pipeline::menu_import::state::{FetchedDocument, FetchedPage};
use kitchenline_pipeline::menu_import::{MenuExtractor, ParsedMenu};

use super::html_extractor::{DEFAULT_CATEGORY, HtmlMenuExtractor, attach_dish_images, page_lines};
use super::http::{LazyClient, check_response, transport_error};

#[derive(Debug, Serialize)]
struct PageText<'a> {
    url: &'a str,
    text: String,
}

/// Service-backed extractor; the heuristic parser takes over when the service
/// fails or finds nothing.
#[derive(Debug)]
pub struct HttpMenuExtractor {
    endpoint: String,
    client: LazyClient,
    fallback: HtmlMenuExtractor,
}

impl HttpMenuExtractor {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: LazyClient::new(Duration::from_secs(120)),
            fallback: HtmlMenuExtractor,
        }
    }

    fn form(pages: &[FetchedPage], documents: &[FetchedDocument]) -> Result<Form, ServiceError> {
        let texts: Vec<PageText<'_>> = pages
            .iter()
            .map(|p| PageText {
                url: &p.url,
                text: page_lines(&p.body).join("\n"),
            })
            .collect();
        let pages_json = serde_json::to_string(&texts)
            .map_err(|e| ServiceError::rejected(format!("cannot encode pages: {e}")))?;

        let mut form = Form::new().text("pages", pages_json);
        for (i, doc) in documents.iter().enumerate() {
            let part = Part::bytes(doc.bytes.clone())
                .file_name(doc.file_name().to_string())
                .mime_str("application/pdf")
                .map_err(transport_error)?;
            form = form.part(format!("document_{i}"), part);
        }
        Ok(form)
    }

    /// One round trip to the service, without fallback.
    pub fn structure(&self, pages: &[FetchedPage], documents: &[FetchedDocument]) -> Result<ParsedMenu, ServiceError> {
        let form = Self::form(pages, documents)?;
        debug!(endpoint = %self.endpoint, pages = pages.len(), pdfs = documents.len(), "structuring menu");
        let response = self
            .client
            .get()?
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .map_err(transport_error)?;
        let menu: ParsedMenu = check_response(response, &self.endpoint)?
            .json()
            .map_err(transport_error)?;
        Ok(tidy(menu))
    }
}

/// Trim names, drop nameless items and empty categories.
fn tidy(menu: ParsedMenu) -> ParsedMenu {
    let categories = menu
        .categories
        .into_iter()
        .filter_map(|mut category| {
            category.name = category.name.trim().to_string();
            if category.name.is_empty() {
                category.name = DEFAULT_CATEGORY.to_string();
            }
            category.items.retain(|i| !i.name.trim().is_empty());
            for item in &mut category.items {
                item.name = item.name.trim().to_string();
                item.image_filename = None;
            }
            (!category.items.is_empty()).then_some(category)
        })
        .collect();
    ParsedMenu { categories }
}

impl MenuExtractor for HttpMenuExtractor {
    fn extract(&self, pages: &[FetchedPage], documents: &[FetchedDocument]) -> Result<ParsedMenu, ServiceError> {
        match self.structure(pages, documents) {
            Ok(mut menu) if menu.items_count() > 0 => {
                attach_dish_images(&mut menu, pages);
                Ok(menu)
            }
            Ok(_) => {
                warn!(endpoint = %self.endpoint, "extraction service found no items; using heuristic parser");
                self.fallback.extract(pages, documents)
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "extraction service failed; using heuristic parser");
                self.fallback.extract(pages, documents)
            }
        }
    }
}
