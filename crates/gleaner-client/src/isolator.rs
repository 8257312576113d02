//! Readability-style main-content isolation on top of `scraper`.
//!
//! Paragraphs vote for their parent (full score) and grandparent (half
//! score). Candidates are then weighted by class/id hints and penalised by
//! link density; the best-scoring element is the article body.

use std::collections::HashMap;
use std::sync::LazyLock;

use ego_tree::NodeId;
use gleaner_core::traits::{ContentIsolator, IsolatedContent};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

const MIN_PARAGRAPH_CHARS: usize = 25;
const EXCERPT_CHARS: usize = 200;

static POSITIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)article|body|content|entry|main|page|post|story|text|blog").unwrap()
});
static NEGATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)comment|footer|foot|nav|menu|sidebar|share|social|related|promo|sponsor|widget|banner|\bads?\b|cookie|newsletter",
    )
    .unwrap()
});

static PARAGRAPHS: LazyLock<Selector> = LazyLock::new(|| selector("p, pre, blockquote"));
static LINKS: LazyLock<Selector> = LazyLock::new(|| selector("a"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static H1: LazyLock<Selector> = LazyLock::new(|| selector("h1"));
static OG_TITLE: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"meta[property="og:title"]"#));
static OG_SITE: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"meta[property="og:site_name"]"#));
static DESCRIPTION: LazyLock<Selector> = LazyLock::new(|| {
    selector(r#"meta[name="description"], meta[property="og:description"]"#)
});
static AUTHOR: LazyLock<Selector> = LazyLock::new(|| {
    selector(r#"meta[name="author"], [rel="author"], .byline, .author"#)
});

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Paragraph-density content isolator.
#[derive(Debug, Clone)]
pub struct ReadabilityIsolator {
    min_text_chars: usize,
}

impl Default for ReadabilityIsolator {
    fn default() -> Self {
        Self { min_text_chars: 200 }
    }
}

impl ReadabilityIsolator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages whose best candidate has less text than this yield `None`.
    pub fn with_min_text_chars(mut self, min_text_chars: usize) -> Self {
        self.min_text_chars = min_text_chars;
        self
    }
}

impl ContentIsolator for ReadabilityIsolator {
    fn isolate(&self, html: &str, url: &str) -> Option<IsolatedContent> {
        let doc = Html::parse_document(html);
        let Some(best) = best_candidate(&doc) else {
            tracing::debug!(url, "No readable candidate");
            return None;
        };

        let text_content = visible_text(best);
        if text_content.chars().count() < self.min_text_chars {
            tracing::debug!(url, chars = text_content.len(), "Readable text too short");
            return None;
        }

        let excerpt = meta_content(&doc, &DESCRIPTION).or_else(|| {
            best.select(&PARAGRAPHS)
                .map(visible_text)
                .find(|p| p.chars().count() >= MIN_PARAGRAPH_CHARS)
                .map(|p| truncate(&p, EXCERPT_CHARS))
        });

        Some(IsolatedContent {
            title: page_title(&doc),
            content_html: best.html(),
            text_content,
            excerpt,
            byline: byline(&doc),
            site_name: meta_content(&doc, &OG_SITE),
        })
    }
}

fn best_candidate(doc: &Html) -> Option<ElementRef<'_>> {
    let mut scores: HashMap<NodeId, f64> = HashMap::new();

    for p in doc.select(&PARAGRAPHS) {
        let text = visible_text(p);
        let len = text.chars().count();
        if len < MIN_PARAGRAPH_CHARS {
            continue;
        }
        let score = 1.0 + text.matches(',').count() as f64 + (len as f64 / 100.0).min(3.0);

        let mut ancestors = p.ancestors().filter_map(ElementRef::wrap);
        if let Some(parent) = ancestors.next() {
            *scores.entry(parent.id()).or_default() += score;
            if let Some(grandparent) = ancestors.next() {
                *scores.entry(grandparent.id()).or_default() += score / 2.0;
            }
        }
    }

    scores
        .into_iter()
        .filter_map(|(id, score)| {
            let el = ElementRef::wrap(doc.tree.get(id)?)?;
            let weighted = (score + class_weight(el)) * (1.0 - link_density(el));
            Some((el, weighted))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(el, _)| el)
}

fn class_weight(el: ElementRef<'_>) -> f64 {
    let mut weight = 0.0;
    for hint in [el.value().attr("class"), el.value().id()].into_iter().flatten() {
        if NEGATIVE.is_match(hint) {
            weight -= 25.0;
        }
        if POSITIVE.is_match(hint) {
            weight += 25.0;
        }
    }
    match el.value().name() {
        "article" | "main" => weight + 10.0,
        "aside" | "nav" | "footer" | "header" | "form" => weight - 25.0,
        _ => weight,
    }
}

fn link_density(el: ElementRef<'_>) -> f64 {
    let total = visible_text(el).chars().count();
    if total == 0 {
        return 1.0;
    }
    let linked: usize = el
        .select(&LINKS)
        .map(|a| visible_text(a).chars().count())
        .sum();
    (linked as f64 / total as f64).min(1.0)
}

/// Text of `el`, skipping script-like subtrees, whitespace collapsed.
fn visible_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .take_while(|a| a.id() != el.id())
            .filter_map(ElementRef::wrap)
            .any(|a| matches!(a.value().name(), "script" | "style" | "noscript" | "template"));
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn meta_content(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .filter_map(|m| m.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

fn page_title(doc: &Html) -> Option<String> {
    meta_content(doc, &OG_TITLE).or_else(|| {
        [&*TITLE, &*H1]
            .into_iter()
            .filter_map(|sel| doc.select(sel).next())
            .map(visible_text)
            .find(|t| !t.is_empty())
    })
}

fn byline(doc: &Html) -> Option<String> {
    doc.select(&AUTHOR)
        .map(|el| match el.value().attr("content") {
            Some(content) => content.trim().to_string(),
            None => visible_text(el),
        })
        .map(|b| b.trim_start_matches("By ").trim_start_matches("by ").to_string())
        .find(|b| !b.is_empty())
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", s[..idx].trim_end()),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(n: usize) -> String {
        format!(
            "<p>Paragraph {n} explains the change in detail, with context, numbers, and a conclusion that keeps going for a while.</p>"
        )
    }

    fn article_page() -> String {
        let body: String = (0..6).map(paragraph).collect();
        format!(
            r#"<html lang="en"><head>
                <title>Fallback title</title>
                <meta property="og:title" content="Shipping faster builds">
                <meta property="og:site_name" content="Example Blog">
                <meta name="author" content="Ada Lovelace">
            </head><body>
                <nav class="menu"><a href="/">Home</a><a href="/blog">Blog</a></nav>
                <div class="sidebar"><p>Subscribe to our newsletter for weekly updates, tips, and more.</p></div>
                <article class="post-content">{body}<script>var tracking = "do not include";</script></article>
                <footer><p>Copyright Example Inc, all rights reserved, forever and ever.</p></footer>
            </body></html>"#
        )
    }

    #[test]
    fn picks_article_body() {
        let isolated = ReadabilityIsolator::new()
            .isolate(&article_page(), "https://example.com/post")
            .unwrap();

        assert!(isolated.text_content.contains("Paragraph 0"));
        assert!(isolated.text_content.contains("Paragraph 5"));
        assert!(!isolated.text_content.contains("newsletter"));
        assert!(!isolated.text_content.contains("Copyright"));
        assert!(!isolated.text_content.contains("do not include"));
        assert!(isolated.content_html.starts_with("<article"));
    }

    #[test]
    fn reads_metadata() {
        let isolated = ReadabilityIsolator::new()
            .isolate(&article_page(), "https://example.com/post")
            .unwrap();

        assert_eq!(isolated.title.as_deref(), Some("Shipping faster builds"));
        assert_eq!(isolated.site_name.as_deref(), Some("Example Blog"));
        assert_eq!(isolated.byline.as_deref(), Some("Ada Lovelace"));
        assert!(isolated.excerpt.unwrap().starts_with("Paragraph 0"));
    }

    #[test]
    fn short_pages_yield_none() {
        let html = "<html><body><article><p>Too short to be an article, sadly.</p></article></body></html>";
        assert!(ReadabilityIsolator::new().isolate(html, "https://example.com").is_none());
        assert!(
            ReadabilityIsolator::new()
                .with_min_text_chars(10)
                .isolate(html, "https://example.com")
                .is_some()
        );
    }

    #[test]
    fn link_farms_lose() {
        let links: String = (0..8)
            .map(|i| format!(r#"<p><a href="/p/{i}">Another related story number {i} that you might like</a></p>"#))
            .collect();
        let body: String = (0..3).map(paragraph).collect();
        let html = format!(
            r#"<html><body><div id="links">{links}</div><div id="story">{body}</div></body></html>"#
        );

        let isolated = ReadabilityIsolator::new()
            .with_min_text_chars(50)
            .isolate(&html, "https://example.com")
            .unwrap();
        assert!(isolated.text_content.starts_with("Paragraph 0"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo wörld", 5), "héllo…");
        assert_eq!(truncate("short", 10), "short");
    }
}
