use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::chapter::Chapter;
use crate::cli::{
    AllArgs, ChapterArgs, ChaptersArgs, FetchArgs, ImagesArgs, OutputArgs, SiteArgs,
};
use crate::download::DownloadOptions;
use crate::fetch::{FetchConfig, RetryPolicy};
use crate::formats::ChapterRecord;
use crate::layout::Canvas;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::site::{SelectorSite, Site, SiteProfile};

pub async fn chapters(args: ChaptersArgs) -> anyhow::Result<()> {
    let pipeline = build_pipeline(&args.site, &args.fetch, None)?;
    let chapters = pipeline.list_chapters(&args.url).await?;

    let mut stdout = std::io::stdout().lock();
    for chapter in &chapters {
        serde_json::to_writer(&mut stdout, &ChapterRecord::from(chapter))
            .context("write chapter record json")?;
        stdout.write_all(b"\n").context("write chapter record newline")?;
    }
    stdout.flush().context("flush stdout")?;
    Ok(())
}

pub async fn chapter(args: ChapterArgs) -> anyhow::Result<()> {
    let pipeline = build_pipeline(&args.site, &args.fetch, Some(&args.output))?;
    let chapter = Chapter::new(args.name, args.url);
    pipeline.download_chapter(&chapter).await?;
    Ok(())
}

pub async fn all(args: AllArgs) -> anyhow::Result<()> {
    let pipeline = build_pipeline(&args.site, &args.fetch, Some(&args.output))?;
    let mut chapters = pipeline.list_chapters(&args.url).await?;
    if !args.only.is_empty() {
        for label in &args.only {
            if !chapters.iter().any(|c| &c.display_name == label) {
                anyhow::bail!("chapter not found: {label}");
            }
        }
        chapters.retain(|c| args.only.contains(&c.display_name));
    }

    let summary = pipeline.download_all(&chapters).await;
    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed.len(),
        "batch finished"
    );
    if !summary.failed.is_empty() {
        anyhow::bail!(
            "{} of {} chapters failed: {}",
            summary.failed.len(),
            chapters.len(),
            summary.failed.join(", ")
        );
    }
    Ok(())
}

pub async fn images(args: ImagesArgs) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(&args.urls_file)
        .with_context(|| format!("read urls file: {}", args.urls_file))?;
    let urls = parse_url_list(&contents);
    if urls.is_empty() {
        anyhow::bail!("no image urls in {}", args.urls_file);
    }

    let pipeline = build_pipeline(&args.site, &args.fetch, Some(&args.output))?;
    let chapter = Chapter::new(args.name, urls[0].clone());
    pipeline.run_chapter(&chapter, &urls).await?;
    Ok(())
}

/// One URL per line; blank lines and `#` comments are ignored.
pub fn parse_url_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

fn build_pipeline(
    site_args: &SiteArgs,
    fetch_args: &FetchArgs,
    output: Option<&OutputArgs>,
) -> anyhow::Result<Pipeline> {
    let profile = match site_args.site_config.as_deref() {
        Some(path) => SiteProfile::load(Path::new(path))?,
        None => SiteProfile::nelomanga(),
    };
    let site = SelectorSite::new(profile).context("build site")?;

    let mut fetch = FetchConfig::new(
        site_args
            .referer
            .clone()
            .unwrap_or_else(|| site.referer().to_owned()),
    );
    fetch.extra_headers = site.extra_headers();
    fetch.timeout = Duration::from_secs(fetch_args.timeout_secs.max(1));
    fetch.retry = RetryPolicy {
        attempts: fetch_args.retries.max(1),
        base_delay: Duration::from_millis(fetch_args.retry_base_ms),
    };

    let config = match output {
        Some(output) => pipeline_config(output),
        None => PipelineConfig::new("manga"),
    };
    tracing::debug!(site = site.name(), ?config, "pipeline configured");

    Pipeline::new(Arc::new(site), fetch, config)
}

fn pipeline_config(output: &OutputArgs) -> PipelineConfig {
    let out_dir = PathBuf::from(&output.out);
    let scratch_dir = match output.scratch_dir.as_deref() {
        Some(dir) => PathBuf::from(dir),
        None => out_dir.join(".scratch"),
    };
    PipelineConfig {
        out_dir,
        scratch_dir,
        canvas: Canvas::a4(),
        download: DownloadOptions {
            concurrency: output.concurrency.max(1),
            diagnostics_dir: output.diagnostics_dir.as_deref().map(PathBuf::from),
        },
        settle: Duration::from_millis(output.settle_ms),
        report: output.report.as_deref().map(PathBuf::from),
    }
}
