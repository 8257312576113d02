use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;

use gleaner_core::{ScrapeResult, ScrapedArticle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Markdown,
    Text,
    Json,
}

/// What one input source produced.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    /// Single page extracted without discovery.
    Page(ScrapedArticle),
    /// Full discover-then-extract run.
    Source(ScrapeResult),
}

impl Outcome {
    pub fn articles(&self) -> &[ScrapedArticle] {
        match self {
            Outcome::Page(article) => std::slice::from_ref(article),
            Outcome::Source(result) => &result.articles,
        }
    }
}

pub fn render(outcomes: &[Outcome], format: Format) -> Result<String> {
    match format {
        Format::Json => {
            let mut out = serde_json::to_string_pretty(outcomes).context("Failed to serialize results")?;
            out.push('\n');
            Ok(out)
        }
        Format::Markdown => Ok(render_blocks(outcomes, markdown_block)),
        Format::Text => Ok(render_blocks(outcomes, text_block)),
    }
}

fn render_blocks(outcomes: &[Outcome], block: fn(&ScrapedArticle, &mut String)) -> String {
    let mut out = String::new();
    for article in outcomes.iter().flat_map(Outcome::articles) {
        block(article, &mut out);
    }
    out
}

fn markdown_block(article: &ScrapedArticle, out: &mut String) {
    let c = &article.candidate;
    let _ = writeln!(out, "# {}\n", c.title);
    let _ = writeln!(out, "<{}>", c.url);
    if let Some(date) = c.published_at {
        let _ = writeln!(out, "*Published {}*", date.format("%Y-%m-%d"));
    }
    out.push('\n');

    let body = article
        .full_content_markdown
        .as_deref()
        .or(article.full_content_text.as_deref())
        .or(c.excerpt.as_deref());
    if let Some(body) = body {
        let _ = writeln!(out, "{}\n", body.trim());
    }
    out.push_str("---\n\n");
}

fn text_block(article: &ScrapedArticle, out: &mut String) {
    let c = &article.candidate;
    let _ = writeln!(out, "{}", c.title);
    let _ = writeln!(out, "{}", c.url);
    out.push('\n');
    let body = article
        .full_content_text
        .as_deref()
        .or(c.excerpt.as_deref());
    if let Some(body) = body {
        let _ = writeln!(out, "{}\n", body.trim());
    }
}

/// Write to `path`, or stdout when no path is given.
pub fn write_output(rendered: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("Failed to write output file: {}", path.display())),
        None => {
            print!("{rendered}");
            Ok(())
        }
    }
}
