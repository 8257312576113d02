mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use gleaner_client::{HtmdCleaner, OpenAiSearchProvider, ReadabilityIsolator, ReqwestFetcher};
use gleaner_core::models::SourceType;
use gleaner_core::progress::TracingProgressReporter;
use gleaner_core::{ScrapeOptions, ScrapePipeline, ScraperConfig};

use output::{Format, Outcome};

type Pipeline = ScrapePipeline<ReqwestFetcher, ReadabilityIsolator, HtmdCleaner, OpenAiSearchProvider>;

#[derive(Parser)]
#[command(name = "gleaner", version, about = "Discover and extract articles from websites")]
struct Cli {
    /// URL to scrape, or a file with one URL per line (`#` starts a comment)
    input: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Markdown)]
    format: Format,

    /// Write output to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Discover articles from each source (feeds, sitemaps, listing pages)
    /// instead of extracting the page itself
    #[arg(short, long, default_value_t = false)]
    recursive: bool,

    /// Only log warnings and errors
    #[arg(short, long, default_value_t = false)]
    quiet: bool,

    /// Maximum articles per source in recursive mode
    #[arg(long, default_value_t = 50)]
    max_articles: usize,

    /// Minimum quality score in recursive mode
    #[arg(long, default_value_t = 0.6)]
    quality_threshold: f64,

    /// Force a source type in recursive mode (auto, rss, sitemap, html)
    #[arg(long, default_value = "auto")]
    source_type: SourceType,

    /// Allow fetching private and loopback addresses
    #[arg(long, default_value_t = false)]
    allow_private_urls: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_level = if cli.quiet { "gleaner=warn" } else { "gleaner=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let sources = match read_sources(&cli.input) {
        Ok(sources) if !sources.is_empty() => sources,
        Ok(_) => {
            tracing::error!(input = %cli.input, "No URLs found in input");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => {
            tracing::error!("{e:#}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let pipeline = build_pipeline(cli.allow_private_urls)?;
    let options = ScrapeOptions {
        source_type: cli.source_type,
        max_articles: cli.max_articles,
        quality_threshold: cli.quality_threshold,
        ..Default::default()
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping");
            ctrl_c.cancel();
        }
    });

    let mut outcomes = Vec::new();
    for url in &sources {
        if cancel.is_cancelled() {
            break;
        }
        match run_source(&pipeline, url, cli.recursive, &options, &cancel).await {
            Ok(Some(outcome)) => outcomes.push(outcome),
            Ok(None) => tracing::warn!(%url, "No articles extracted"),
            Err(e) => tracing::error!(%url, error = %e, "Source failed"),
        }
    }

    let succeeded = outcomes.len();
    tracing::info!(succeeded, total = sources.len(), "Done");

    if succeeded == 0 {
        return Ok(ExitCode::FAILURE);
    }

    let rendered = output::render(&outcomes, cli.format)?;
    output::write_output(&rendered, cli.output.as_deref())?;

    Ok(ExitCode::SUCCESS)
}

fn build_pipeline(allow_private_urls: bool) -> Result<Pipeline> {
    let mut config = ScraperConfig::from_env().context("Invalid GLEANER_* configuration")?;
    config.allow_private_urls |= allow_private_urls;

    let fetcher =
        ReqwestFetcher::with_user_agent(&config.user_agent).context("Failed to create HTTP client")?;
    let fetcher = if config.allow_private_urls {
        fetcher.allow_private_urls()
    } else {
        fetcher
    };
    let search =
        OpenAiSearchProvider::from_config(&config.search).context("Failed to create search client")?;

    Ok(ScrapePipeline::new(
        fetcher,
        ReadabilityIsolator::new(),
        HtmdCleaner::new(),
        search,
        config,
    ))
}

/// `Ok(None)` when the source yielded no articles.
async fn run_source(
    pipeline: &Pipeline,
    url: &str,
    recursive: bool,
    options: &ScrapeOptions,
    cancel: &CancellationToken,
) -> Result<Option<Outcome>> {
    if recursive {
        let result = pipeline
            .scrape_with(url, options, &TracingProgressReporter, cancel)
            .await?;
        for error in &result.errors {
            tracing::warn!(%url, "{error}");
        }
        Ok((!result.articles.is_empty()).then_some(Outcome::Source(result)))
    } else {
        tracing::info!(%url, "Extracting");
        let article = pipeline.extract_article(url).await?;
        Ok(article.map(Outcome::Page))
    }
}

/// A single http(s) URL, or the URLs listed in a file.
fn read_sources(input: &str) -> Result<Vec<String>> {
    if input.starts_with("http://") || input.starts_with("https://") {
        return Ok(vec![input.to_string()]);
    }

    let path = Path::new(input);
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Input is neither a URL nor a readable file: {input}"))?;
    Ok(parse_source_list(&contents))
}

fn parse_source_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn url_input_is_single_source() {
        let sources = read_sources("https://example.com/blog").unwrap();
        assert_eq!(sources, vec!["https://example.com/blog"]);
    }

    #[test]
    fn file_input_skips_comments_and_blanks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# my sources").unwrap();
        writeln!(file, "https://a.example/feed.xml").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "   https://b.example/blog   ").unwrap();
        writeln!(file, "  # indented comment").unwrap();

        let sources = read_sources(file.path().to_str().unwrap()).unwrap();
        assert_eq!(sources, vec!["https://a.example/feed.xml", "https://b.example/blog"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = read_sources("/definitely/not/here.txt").unwrap_err();
        assert!(err.to_string().contains("neither a URL nor a readable file"));
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "gleaner",
            "https://example.com",
            "--format",
            "json",
            "--recursive",
            "--max-articles",
            "5",
            "--source-type",
            "sitemap",
        ])
        .unwrap();
        assert_eq!(cli.format, Format::Json);
        assert!(cli.recursive);
        assert_eq!(cli.max_articles, 5);
        assert_eq!(cli.source_type, SourceType::Sitemap);
        assert!(!cli.quiet);
    }

    #[test]
    fn cli_rejects_unknown_source_type() {
        assert!(Cli::try_parse_from(["gleaner", "x", "--source-type", "ftp"]).is_err());
    }
}
