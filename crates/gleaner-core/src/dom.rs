//! Small HTML helpers shared by the discovery and extraction modules.

use scraper::{ElementRef, Selector};
use url::Url;

/// Parse a compile-time selector. Panics only on a malformed literal,
/// which the tests of every caller exercise.
pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e}"))
}

/// Resolve `href` against `base`, keeping only http(s) results and
/// dropping the fragment.
pub fn resolve_url(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
    {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// Whitespace-collapsed text content of an element.
pub fn element_text(el: &ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Does `host` equal `domain` or sit beneath it? A leading `www.` on
/// either side is ignored.
pub fn same_site(host: &str, domain: &str) -> bool {
    let host = host.trim_start_matches("www.").to_ascii_lowercase();
    let domain = domain.trim_start_matches("www.").to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Human title guessed from the last path segment of a URL
/// (`/2024/05/my-first-post.html` → `My first post`).
pub fn title_from_url(url: &str) -> String {
    let slug = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.rfind(|s| !s.is_empty()).map(str::to_string))
        })
        .unwrap_or_default();
    let stem = slug.rsplit_once('.').map(|(s, _)| s).unwrap_or(&slug);
    let words = collapse_whitespace(&stem.replace(['-', '_', '+'], " "));

    let mut chars = words.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => url.to_string(),
    }
}
