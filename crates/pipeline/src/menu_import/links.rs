//! URL helpers for website sources.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::PipelineError;

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#).expect("valid regex")
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

const MENU_PATH_HINTS: &[&str] = &[
    "/menu", "/menus", "/food-menu", "/food", "/our-menu", "/dinner-menu", "/lunch-menu",
    "/drinks", "/bar-menu", "/carte", "/speisekarte", "/carta", "/menukaart",
];

const MENU_TEXT_HINTS: &[&str] = &["menu", "food", "dinner", "lunch", "drinks"];

/// Normalize an operator-supplied website.
///
/// A bare host gets `https://`; anything that is not an absolute http(s) URL
/// with a host is rejected.
pub fn normalize_website(raw: &str) -> Result<String, PipelineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::InvalidInput("website URL is empty".into()));
    }
    let url = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let lower = url.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(PipelineError::InvalidInput(format!(
            "website URL must use http or https: {trimmed}"
        )));
    }
    let host = origin(&url)
        .and_then(|o| o.split("://").nth(1).map(str::to_string))
        .unwrap_or_default();
    if host.is_empty() || url.chars().any(char::is_whitespace) {
        return Err(PipelineError::InvalidInput(format!(
            "website URL is not valid: {trimmed}"
        )));
    }
    Ok(url)
}

/// `scheme://host[:port]` of an absolute URL.
pub fn origin(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    if authority.is_empty() {
        return None;
    }
    Some(format!(
        "{}://{}",
        scheme.to_ascii_lowercase(),
        authority.to_ascii_lowercase()
    ))
}

/// Resolve an `href` against the page it appears on.
///
/// Returns `None` for non-navigational links (fragments, `mailto:`, scripts,
/// data URIs) and for non-http schemes.
pub fn resolve_href(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    let lower = href.to_ascii_lowercase();
    if href.is_empty()
        || href.starts_with('#')
        || ["data:", "javascript:", "mailto:", "tel:"]
            .iter()
            .any(|p| lower.starts_with(p))
    {
        return None;
    }
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(href.to_string());
    }
    if lower.contains("://") {
        return None;
    }

    let base_origin = origin(base)?;
    if let Some(rest) = href.strip_prefix("//") {
        let scheme = base_origin.split("://").next().unwrap_or("https");
        return Some(format!("{scheme}://{rest}"));
    }
    if href.starts_with('/') {
        return Some(format!("{base_origin}{href}"));
    }

    let path = base
        .split_once("://")
        .map(|(_, rest)| rest)
        .and_then(|rest| rest.find('/').map(|i| &rest[i..]))
        .unwrap_or("/");
    let path = path.split(['?', '#']).next().unwrap_or("/");
    let dir = match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "/",
    };
    Some(format!("{base_origin}{dir}{href}"))
}

fn path_of(url: &str) -> String {
    url.split_once("://")
        .map(|(_, rest)| rest)
        .and_then(|rest| rest.find('/').map(|i| rest[i..].to_string()))
        .unwrap_or_default()
        .split(['?', '#'])
        .next()
        .unwrap_or("")
        .trim_end_matches('/')
        .to_ascii_lowercase()
}

/// Whether a URL's path names a PDF file.
pub fn is_pdf_url(url: &str) -> bool {
    path_of(url).ends_with(".pdf")
}

/// Same-origin links on a page that look like menu pages, in page order,
/// without duplicates and excluding the page itself.
pub fn menu_links(page_url: &str, html: &str) -> Vec<String> {
    let Some(page_origin) = origin(page_url) else {
        return Vec::new();
    };
    let page_norm = page_url.trim_end_matches('/');

    let mut found: Vec<String> = Vec::new();
    for cap in ANCHOR_RE.captures_iter(html) {
        let Some(resolved) = resolve_href(page_url, &cap[1]) else {
            continue;
        };
        if origin(&resolved).as_deref() != Some(page_origin.as_str()) {
            continue;
        }

        if is_pdf_url(&resolved) {
            continue;
        }
        let path = path_of(&resolved);
        let text = TAG_RE.replace_all(&cap[2], " ").to_lowercase();
        let is_menu_path = MENU_PATH_HINTS.iter().any(|p| path.ends_with(p));
        let is_menu_text = MENU_TEXT_HINTS.iter().any(|kw| text.contains(kw));

        if (is_menu_path || is_menu_text)
            && resolved.trim_end_matches('/') != page_norm
            && !found.contains(&resolved)
        {
            found.push(resolved);
        }
    }
    found
}

/// Links to PDF files on a page, from any origin, in page order.
pub fn pdf_links(page_url: &str, html: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for cap in ANCHOR_RE.captures_iter(html) {
        let Some(resolved) = resolve_href(page_url, &cap[1]) else {
            continue;
        };
        if is_pdf_url(&resolved) && !found.contains(&resolved) {
            found.push(resolved);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_https() {
        assert_eq!(
            normalize_website("  gildedfork.example ").unwrap(),
            "https://gildedfork.example"
        );
        assert!(normalize_website("ftp://gildedfork.example").is_err());
        assert!(normalize_website("https://").is_err());
        assert!(normalize_website("https://bad host.example").is_err());
    }

    #[test]
    fn resolves_relative_links() {
        let base = "https://gf.example/about/team.html?x=1";
        assert_eq!(
            resolve_href(base, "/menu").as_deref(),
            Some("https://gf.example/menu")
        );
        assert_eq!(
            resolve_href(base, "dinner.html").as_deref(),
            Some("https://gf.example/about/dinner.html")
        );
        assert_eq!(
            resolve_href(base, "//cdn.example/a.png").as_deref(),
            Some("https://cdn.example/a.png")
        );
        assert_eq!(resolve_href(base, "mailto:chef@gf.example"), None);
        assert_eq!(resolve_href(base, "#top"), None);
    }

    #[test]
    fn finds_same_origin_menu_links_only() {
        let html = r#"
            <nav>
              <a href="/">Home</a>
              <a href="/menu">Our Menu</a>
              <a class="x" href="/drinks/">Bar</a>
              <a href="https://gf.example/visit">Dinner <b>reservations</b></a>
              <a href="https://other.example/menu">Partner menu</a>
              <a href="/menu">Menu again</a>
              <a href="/files/menu.pdf">Download the menu</a>
            </nav>"#;
        let links = menu_links("https://gf.example/", html);
        assert_eq!(
            links,
            vec![
                "https://gf.example/menu".to_string(),
                "https://gf.example/drinks/".to_string(),
                "https://gf.example/visit".to_string(),
            ]
        );
    }

    #[test]
    fn collects_pdf_links_from_any_origin() {
        let html = r#"
            <a href="/files/Dinner.PDF?v=2">Dinner (PDF)</a>
            <a href="https://cdn.example/gf/drinks.pdf">Drinks</a>
            <a href="/files/Dinner.PDF?v=2">Dinner again</a>
            <a href="/menu">Menu</a>"#;
        assert_eq!(
            pdf_links("https://gf.example/menu", html),
            vec![
                "https://gf.example/files/Dinner.PDF?v=2".to_string(),
                "https://cdn.example/gf/drinks.pdf".to_string(),
            ]
        );
    }
}
