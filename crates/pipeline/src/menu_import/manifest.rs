//! `manifest.json` for an exported menu, plus the slug used to name it.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::state::ParsedMenu;

pub const MANIFEST_VERSION: &str = "1.0";
pub const DEFAULT_THEME: &str = "noir";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub exported_at: String,
    pub menu_name: String,
    pub menu_slug: String,
    pub menu_theme: String,
    pub menu_is_active: bool,
    pub menu_banner_url: Option<String>,
    pub menu_logo_url: Option<String>,
    pub categories: Vec<ManifestCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestCategory {
    pub name: String,
    pub rank: usize,
    pub items: Vec<ManifestItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestItem {
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub position: usize,
    pub is_sold_out: bool,
    pub dietary_tags: Vec<String>,
    pub allergens: Vec<String>,
    pub photos: Vec<ManifestPhoto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestPhoto {
    pub original_url: String,
    pub filename: String,
}

pub fn build_manifest(restaurant_name: &str, menu: &ParsedMenu, exported_at: DateTime<Utc>) -> Manifest {
    let categories = menu
        .categories
        .iter()
        .enumerate()
        .map(|(rank, category)| ManifestCategory {
            name: category.name.clone(),
            rank,
            items: category
                .items
                .iter()
                .enumerate()
                .map(|(position, item)| ManifestItem {
                    name: item.name.clone(),
                    description: item.description.clone(),
                    price: item.price.unwrap_or(0.0),
                    position,
                    is_sold_out: false,
                    dietary_tags: item.dietary_tags.clone(),
                    allergens: item.allergens.clone(),
                    photos: item
                        .image_filename
                        .iter()
                        .map(|file| ManifestPhoto {
                            original_url: item.image_url.clone().unwrap_or_default(),
                            filename: format!("images/{file}"),
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect();

    Manifest {
        version: MANIFEST_VERSION.to_string(),
        exported_at: exported_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        menu_name: restaurant_name.to_string(),
        menu_slug: slugify(restaurant_name),
        menu_theme: DEFAULT_THEME.to_string(),
        menu_is_active: true,
        menu_banner_url: None,
        menu_logo_url: None,
        categories,
    }
}

fn fold_accent(c: char) -> Option<&'static str> {
    Some(match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => "o",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'ñ' => "n",
        'ç' => "c",
        'ß' => "ss",
        _ => return None,
    })
}

/// URL-friendly slug: lowercase ASCII alphanumerics separated by single `-`.
///
/// Common Latin accents are folded; anything that leaves nothing behind
/// becomes `restaurant`.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.trim().to_lowercase().chars() {
        let piece: Option<String> = match fold_accent(c) {
            Some(folded) => Some(folded.to_string()),
            None if c.is_ascii_alphanumeric() => Some(c.to_string()),
            None => None,
        };
        match piece {
            Some(p) => {
                if pending_dash && !out.is_empty() {
                    out.push('-');
                }
                pending_dash = false;
                out.push_str(&p);
            }
            None => pending_dash = true,
        }
    }

    if out.is_empty() {
        "restaurant".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu_import::state::{MenuCategory, MenuItem};
    use chrono::TimeZone;

    #[test]
    fn slugify_examples() {
        assert_eq!(slugify("The Gilded Fork"), "the-gilded-fork");
        assert_eq!(slugify("Café Résumé & Bar!"), "cafe-resume-bar");
        assert_eq!(slugify("  --Straße 42--  "), "strasse-42");
        assert_eq!(slugify("!!!"), "restaurant");
        assert_eq!(slugify(""), "restaurant");
    }

    #[test]
    fn manifest_ranks_positions_and_photos() {
        let mut with_photo = MenuItem::named("Fork Burger");
        with_photo.price = Some(14.5);
        with_photo.image_url = Some("https://gf.example/img/burger.jpg".into());
        with_photo.image_filename = Some("dish_002.webp".into());

        let menu = ParsedMenu {
            categories: vec![
                MenuCategory {
                    name: "Starters".into(),
                    items: vec![MenuItem::named("Soup")],
                },
                MenuCategory {
                    name: "Mains".into(),
                    items: vec![MenuItem::named("Salad"), with_photo],
                },
            ],
        };
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();

        let m = build_manifest("The Gilded Fork", &menu, at);

        assert_eq!(m.version, "1.0");
        assert_eq!(m.menu_slug, "the-gilded-fork");
        assert_eq!(m.menu_theme, "noir");
        assert_eq!(m.exported_at, "2026-01-02T03:04:05Z");
        assert_eq!(m.categories[1].rank, 1);
        let burger = &m.categories[1].items[1];
        assert_eq!(burger.position, 1);
        assert_eq!(burger.price, 14.5);
        assert_eq!(burger.photos[0].filename, "images/dish_002.webp");
        assert_eq!(m.categories[0].items[0].price, 0.0);
        assert!(m.categories[0].items[0].photos.is_empty());

        let json = serde_json::to_value(&m).unwrap();
        assert!(json["menu_banner_url"].is_null());
        assert_eq!(json["categories"][1]["items"][1]["is_sold_out"], false);
    }
}
