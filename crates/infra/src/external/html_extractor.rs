//! Heuristic menu extraction from HTML pages.
//!
//! Pages are flattened to text lines, then read top to bottom:
//!
//! - a header line (ALL CAPS, ending in `:`, or starting with `#`) opens a
//!   category;
//! - a line with a price (`$12.99`, `12,50 €`, `£8.00`, ...) is an item whose
//!   name is the text before the price;
//! - a short line without a price describes the previous item, or is an item
//!   without a price when the previous item already has a description.
//!
//! Items with a matching `<img alt="...">` on the same page get its URL;
//! items still without a photo are then matched against images on every other
//! fetched page. PDF menus are not read here.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use kitchenline_pipeline::ServiceError;
use kitchenline_pipeline::menu_import::links::resolve_href;
use kitchenline_pipeline::menu_import::state::{FetchedDocument, FetchedPage};
use kitchenline_pipeline::menu_import::{MenuCategory, MenuExtractor, MenuItem, ParsedMenu};

pub(crate) const DEFAULT_CATEGORY: &str = "Menu Items";

/// Navigation chrome shorter than this is dropped; longer blocks may be the
/// menu itself.
const CHROME_MAX_CHARS: usize = 500;

static INVISIBLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<head\b.*?</head>|<script\b.*?</script>|<style\b.*?</style>|<noscript\b.*?</noscript>|<!--.*?-->",
    )
    .expect("valid regex")
});

static CHROME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<nav\b.*?</nav>|<header\b.*?</header>|<footer\b.*?</footer>").expect("valid regex")
});

static BREAK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(?:p|div|li|h[1-6]|tr|td|th|dt|dd|section|article|ul|ol|table)\s*>")
        .expect("valid regex")
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

static PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\$€£]\s*(\d{1,4}[.,]\d{2})|(\d{1,4}[.,]\d{2})\s*[€£]?").expect("valid regex")
});

static IMG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<img\b[^>]*>").expect("valid regex"));

static SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\b(?:data-src|data-lazy-src|src)\s*=\s*["']([^"']+)["']"#).expect("valid regex")
});

static ALT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)\balt\s*=\s*["']([^"']*)["']"#).expect("valid regex"));

static PAREN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("valid regex"));

const NOT_MENU_WORDS: &[&str] = &[
    "copyright", "all rights", "follow us", "contact", "phone", "address", "hours", "open", "close",
    "reserve", "click", "http", "www.", "@", "email", "privacy", "terms",
];

const DIETARY_MARKERS: &[(&str, &str)] = &[
    ("(vg)", "vegan"),
    ("vegan", "vegan"),
    ("(v)", "vegetarian"),
    ("vegetarian", "vegetarian"),
    ("(gf)", "gluten-free"),
    ("gluten-free", "gluten-free"),
    ("gluten free", "gluten-free"),
];

#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlMenuExtractor;

impl MenuExtractor for HtmlMenuExtractor {
    fn extract(&self, pages: &[FetchedPage], documents: &[FetchedDocument]) -> Result<ParsedMenu, ServiceError> {
        if !documents.is_empty() {
            debug!(skipped = documents.len(), "heuristic extractor skips PDF menus");
        }
        let mut builder = MenuBuilder::default();
        for page in pages {
            let images = page_images(page);
            let first_new = builder.item_count();
            for line in page_lines(&page.body) {
                builder.feed(&line);
            }
            builder.flush();
            builder.attach_images(first_new, images);
        }
        let mut menu = builder.finish();
        attach_dish_images(&mut menu, pages);
        Ok(menu)
    }
}

/// Give each item without a photo the first unused image, on any of `pages`,
/// whose alt text mentions the dish.
pub fn attach_dish_images(menu: &mut ParsedMenu, pages: &[FetchedPage]) {
    let taken: Vec<String> = menu
        .categories
        .iter()
        .flat_map(|c| c.items.iter())
        .filter_map(|i| i.image_url.clone())
        .collect();
    let mut images: Vec<(String, String)> = pages.iter().flat_map(page_images).collect();
    images.retain(|(_, url)| !taken.contains(url));
    assign_images(menu.categories.iter_mut().flat_map(|c| c.items.iter_mut()), images);
}

fn assign_images<'a>(items: impl Iterator<Item = &'a mut MenuItem>, mut images: Vec<(String, String)>) {
    for item in items {
        if images.is_empty() {
            return;
        }
        if item.image_url.is_some() {
            continue;
        }
        let key = match_key(&item.name);
        if key.chars().count() < 3 {
            continue;
        }
        if let Some(pos) = images.iter().position(|(alt, _)| alt.contains(&key)) {
            item.image_url = Some(images.remove(pos).1);
        }
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&euro;", "€")
        .replace("&pound;", "£")
        .replace("&amp;", "&")
}

/// Visible text of a page, one trimmed non-empty line per block.
pub fn page_lines(html: &str) -> Vec<String> {
    let visible = INVISIBLE_RE.replace_all(html, "");
    let visible = CHROME_RE.replace_all(&visible, |caps: &regex::Captures<'_>| {
        let block = &caps[0];
        let text_len = TAG_RE.replace_all(block, "").trim().chars().count();
        if text_len < CHROME_MAX_CHARS {
            String::new()
        } else {
            block.to_string()
        }
    });
    let broken = BREAK_RE.replace_all(&visible, "\n");
    let text = decode_entities(&TAG_RE.replace_all(&broken, " "));

    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect()
}

fn is_all_caps(line: &str) -> bool {
    line.chars().any(char::is_alphabetic) && !line.chars().any(char::is_lowercase)
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_alpha = false;
    for c in text.chars() {
        if prev_alpha {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_alpha = c.is_alphabetic();
    }
    out
}

fn header_name(line: &str) -> Option<String> {
    let len = line.chars().count();
    let header = (is_all_caps(line) && len > 3 && len < 50 && !PRICE_RE.is_match(line))
        || (line.ends_with(':') && len < 40)
        || (line.starts_with('#') && len < 50);
    if !header {
        return None;
    }
    let name = line.trim_end_matches(':').trim_matches(|c| c == '#' || c == ' ');
    (!name.is_empty()).then(|| title_case(name))
}

/// `(name, price)` for a line carrying a price.
fn priced_item(line: &str) -> Option<(String, Option<f64>)> {
    let caps = PRICE_RE.captures(line)?;
    let whole = caps.get(0)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str();
    let price = raw.replace(',', ".").parse::<f64>().ok();

    let name = line[..whole.start()]
        .trim()
        .trim_end_matches(['.', '-', '…', '–'])
        .trim()
        .to_string();
    let valid = name.chars().count() > 2 && price.is_none_or(|p| p > 0.0);
    valid.then_some((name, price))
}

fn dietary_tags(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut tags: Vec<String> = Vec::new();
    for (marker, tag) in DIETARY_MARKERS {
        if lower.contains(marker) && !tags.iter().any(|t| t == tag) {
            tags.push((*tag).to_string());
        }
    }
    tags
}

fn match_key(name: &str) -> String {
    PAREN_RE.replace_all(&name.to_lowercase(), "").trim().to_string()
}

/// `(alt text lowercased, absolute image URL)` for each image on a page.
fn page_images(page: &FetchedPage) -> Vec<(String, String)> {
    IMG_RE
        .find_iter(&page.body)
        .filter_map(|tag| {
            let tag = tag.as_str();
            let src = SRC_RE.captures(tag)?.get(1)?.as_str();
            let alt = ALT_RE.captures(tag)?.get(1)?.as_str().trim().to_lowercase();
            let url = resolve_href(&page.url, src)?;
            (!alt.is_empty()).then_some((alt, url))
        })
        .collect()
}

#[derive(Debug, Default)]
struct MenuBuilder {
    categories: Vec<MenuCategory>,
    current_name: Option<String>,
    current_items: Vec<MenuItem>,
}

impl MenuBuilder {
    fn item_count(&self) -> usize {
        self.categories.iter().map(|c| c.items.len()).sum::<usize>() + self.current_items.len()
    }

    fn flush(&mut self) {
        if self.current_items.is_empty() {
            return;
        }
        let name = self
            .current_name
            .clone()
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        let items = std::mem::take(&mut self.current_items);
        match self.categories.iter_mut().find(|c| c.name == name) {
            Some(existing) => {
                for item in items {
                    if !existing.items.iter().any(|i| i.name.eq_ignore_ascii_case(&item.name)) {
                        existing.items.push(item);
                    }
                }
            }
            None => self.categories.push(MenuCategory { name, items }),
        }
    }

    fn push_item(&mut self, name: String, price: Option<f64>) {
        let mut item = MenuItem::named(name);
        item.price = price;
        item.dietary_tags = dietary_tags(&item.name);
        self.current_items.push(item);
    }

    fn feed(&mut self, line: &str) {
        let len = line.chars().count();
        if len < 2 {
            return;
        }
        if let Some(name) = header_name(line) {
            self.flush();
            self.current_name = Some(name);
            return;
        }
        if PRICE_RE.is_match(line) {
            if let Some((name, price)) = priced_item(line) {
                self.push_item(name, price);
            }
            return;
        }

        let lower = line.to_lowercase();
        if len <= 3 || len >= 80 || NOT_MENU_WORDS.iter().any(|w| lower.contains(w)) {
            return;
        }
        let describes_last = self
            .current_items
            .last()
            .is_some_and(|item| item.description.is_none());
        if describes_last {
            if let Some(last) = self.current_items.last_mut() {
                for tag in dietary_tags(line) {
                    if !last.dietary_tags.contains(&tag) {
                        last.dietary_tags.push(tag);
                    }
                }
                last.description = Some(line.to_string());
            }
        } else if len < 60 {
            self.push_item(line.to_string(), None);
        }
    }

    /// Give items from index `first` onwards the first unused image whose alt
    /// text mentions them.
    fn attach_images(&mut self, first: usize, images: Vec<(String, String)>) {
        let items = self
            .categories
            .iter_mut()
            .flat_map(|c| c.items.iter_mut())
            .skip(first);
        assign_images(items, images);
    }

    fn finish(mut self) -> ParsedMenu {
        self.flush();
        ParsedMenu {
            categories: self.categories,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>The Gilded Fork $1.00</title>
<style>.x { color: red }</style><script>var promo = "$5.00";</script></head>
<body>
<nav><a href="/">Home</a> <a href="/menu">Menu</a></nav>
<main>
<h2>STARTERS</h2>
<ul>
  <li>Burrata &amp; Heirloom Tomato $14.50</li>
  <li>Fresh basil, olive oil</li>
  <li>Crispy Calamari 12,00 &euro;</li>
</ul>
<h2>Mains:</h2>
<p>Duck Confit (GF) &pound;24.00</p>
<img src="/img/duck.jpg" alt="Duck confit, plated">
</main>
<footer>&copy; 2024 All rights reserved</footer>
</body></html>"#;

    fn page() -> FetchedPage {
        FetchedPage {
            url: "https://gildedfork.example/menu".into(),
            body: PAGE.into(),
        }
    }

    #[test]
    fn flattens_visible_text_without_chrome() {
        let lines = page_lines(PAGE);
        assert_eq!(lines.first().map(String::as_str), Some("STARTERS"));
        assert!(lines.iter().all(|l| !l.contains("$1.00") && !l.contains("$5.00")));
        assert!(lines.iter().all(|l| !l.contains("Home") && !l.contains("rights")));
        assert!(lines.contains(&"Burrata & Heirloom Tomato $14.50".to_string()));
    }

    #[test]
    fn groups_items_under_headers_with_prices() {
        let menu = HtmlMenuExtractor.extract(&[page()], &[]).unwrap();
        let names: Vec<&str> = menu.categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Starters", "Mains"]);

        let starters = &menu.categories[0].items;
        assert_eq!(starters.len(), 2);
        assert_eq!(starters[0].name, "Burrata & Heirloom Tomato");
        assert_eq!(starters[0].price, Some(14.5));
        assert_eq!(starters[0].description.as_deref(), Some("Fresh basil, olive oil"));
        assert_eq!(starters[1].name, "Crispy Calamari");
        assert_eq!(starters[1].price, Some(12.0));

        let duck = &menu.categories[1].items[0];
        assert_eq!(duck.price, Some(24.0));
        assert_eq!(duck.dietary_tags, vec!["gluten-free".to_string()]);
        assert_eq!(duck.image_url.as_deref(), Some("https://gildedfork.example/img/duck.jpg"));
    }

    #[test]
    fn unlabelled_items_fall_into_default_category() {
        let pages = [FetchedPage {
            url: "https://x.example/".into(),
            body: "<p>Margherita 9.50</p><p>Diavola 11.00</p>".into(),
        }];
        let menu = HtmlMenuExtractor.extract(&pages, &[]).unwrap();
        assert_eq!(menu.categories.len(), 1);
        assert_eq!(menu.categories[0].name, DEFAULT_CATEGORY);
        assert_eq!(menu.items_count(), 2);
    }

    #[test]
    fn repeated_pages_do_not_duplicate_items() {
        let menu = HtmlMenuExtractor.extract(&[page(), page()], &[]).unwrap();
        assert_eq!(menu.items_count(), 3);
    }

    #[test]
    fn page_without_menu_text_is_empty() {
        let pages = [FetchedPage {
            url: "https://x.example/".into(),
            body: "<p>Call us to book a table</p>".into(),
        }];
        let menu = HtmlMenuExtractor.extract(&pages, &[]).unwrap();
        assert!(menu.items_count() <= 1);
        assert_eq!(header_name("# Desserts"), Some("Desserts".to_string()));
        assert_eq!(priced_item("- 4.00"), None);
    }

    #[test]
    fn photos_on_other_pages_are_matched_by_alt_text() {
        let pages = [
            FetchedPage {
                url: "https://x.example/menu".into(),
                body: "<h2>MAINS</h2><p>Lamb Shank 26.00</p><p>Risotto 18.00</p>".into(),
            },
            FetchedPage {
                url: "https://x.example/gallery".into(),
                body: r#"<img src="/g/lamb.jpg" alt="Slow-braised lamb shank">
                         <img src="/g/room.jpg" alt="Dining room">"#
                    .into(),
            },
        ];
        let menu = HtmlMenuExtractor.extract(&pages, &[]).unwrap();
        let mains = &menu.categories[0].items;
        assert_eq!(mains[0].image_url.as_deref(), Some("https://x.example/g/lamb.jpg"));
        assert_eq!(mains[1].image_url, None);
    }
}
