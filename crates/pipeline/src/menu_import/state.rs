//! Input and working state of a menu import.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::PipelineError;
use crate::stage::PipelineState;

use super::links::normalize_website;

pub const MAX_NAME_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuImportInput {
    #[serde(alias = "name")]
    pub restaurant_name: String,
    #[serde(default)]
    pub location_hint: Option<String>,
    #[serde(default, alias = "url")]
    pub website_override: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
}

/// A menu published as a file (PDF) rather than a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedDocument {
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedDocument {
    /// Last path segment, used as the upload file name.
    pub fn file_name(&self) -> &str {
        let path = self.url.split(['?', '#']).next().unwrap_or(&self.url);
        path.rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("menu.pdf")
    }
}

/// PDF magic, or a PDF content type when the server is explicit about it.
pub fn is_pdf(bytes: &[u8], content_type: Option<&str>) -> bool {
    bytes.starts_with(b"%PDF")
        || content_type.is_some_and(|c| c.to_ascii_lowercase().contains("application/pdf"))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub dietary_tags: Vec<String>,
    #[serde(default)]
    pub allergens: Vec<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Set by Enhancement; relative to the archive's `images/` folder.
    #[serde(default)]
    pub image_filename: Option<String>,
}

impl MenuItem {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MenuCategory {
    pub name: String,
    pub items: Vec<MenuItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedMenu {
    pub categories: Vec<MenuCategory>,
}

impl ParsedMenu {
    pub fn items_count(&self) -> usize {
        self.categories.iter().map(|c| c.items.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuImportState {
    pub input: MenuImportInput,
    /// Chosen by Discovery (or supplied by an operator).
    pub website_url: Option<String>,
    pub pages: Vec<FetchedPage>,
    #[serde(default)]
    pub documents: Vec<FetchedDocument>,
    pub menu: ParsedMenu,
    pub images: Vec<DishImage>,
    pub result_ref: Option<String>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl PipelineState for MenuImportState {
    type Input = MenuImportInput;

    fn validate(input: MenuImportInput) -> Result<MenuImportInput, PipelineError> {
        let restaurant_name = input.restaurant_name.trim().to_string();
        if restaurant_name.is_empty() {
            return Err(PipelineError::InvalidInput(
                "restaurant_name is required".into(),
            ));
        }
        if restaurant_name.chars().count() > MAX_NAME_LEN {
            return Err(PipelineError::InvalidInput(format!(
                "restaurant_name must be at most {MAX_NAME_LEN} characters"
            )));
        }

        let website_override = match trimmed(input.website_override) {
            Some(raw) => Some(normalize_website(&raw)?),
            None => None,
        };

        Ok(MenuImportInput {
            restaurant_name,
            location_hint: trimmed(input.location_hint),
            website_override,
        })
    }

    fn from_input(input: MenuImportInput) -> Self {
        Self {
            input,
            website_url: None,
            pages: Vec::new(),
            documents: Vec::new(),
            menu: ParsedMenu::default(),
            images: Vec::new(),
            result_ref: None,
        }
    }

    fn result_ref(&self) -> Option<&str> {
        self.result_ref.as_deref()
    }

    fn validate_resolution(decision: &serde_json::Value) -> Result<serde_json::Value, PipelineError> {
        let raw = decision
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PipelineError::InvalidResolution("expected {\"url\": \"...\"}".into()))?;
        let url = normalize_website(raw)
            .map_err(|e| PipelineError::InvalidResolution(e.to_string()))?;
        Ok(json!({ "url": url }))
    }

    fn apply_resolution(&mut self, decision: &serde_json::Value) -> Result<(), PipelineError> {
        let resolved = Self::validate_resolution(decision)?;
        self.website_url = resolved
            .get("url")
            .and_then(|v| v.as_str())
            .map(String::from);
        Ok(())
    }
}
