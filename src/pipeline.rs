use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use url::Url;

use crate::chapter::{Chapter, sort_chapters};
use crate::document::DocumentBuilder;
use crate::download::{DownloadOptions, download_chapter};
use crate::fetch::{Expect, FetchConfig, Fetcher};
use crate::formats::{ChapterReport, append_jsonl};
use crate::layout::{Canvas, LayoutSummary, layout_pages};
use crate::page_store::PageStore;
use crate::site::Site;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Shared output location; one `<chapter number>.pdf` per chapter.
    pub out_dir: PathBuf,
    /// Parent of the per-chapter scratch directories.
    pub scratch_dir: PathBuf,
    pub canvas: Canvas,
    pub download: DownloadOptions,
    /// Pause before removing a chapter's scratch directory.
    pub settle: Duration,
    /// JSON-lines run report, if wanted.
    pub report: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        let out_dir = out_dir.into();
        Self {
            scratch_dir: out_dir.join(".scratch"),
            out_dir,
            canvas: Canvas::a4(),
            download: DownloadOptions {
                concurrency: 8,
                diagnostics_dir: None,
            },
            settle: Duration::from_secs(1),
            report: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: Vec<String>,
}

/// Chapter download-and-assemble pipeline over one discovery strategy.
pub struct Pipeline {
    fetcher: Fetcher,
    site: Arc<dyn Site>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        site: Arc<dyn Site>,
        fetch: FetchConfig,
        config: PipelineConfig,
    ) -> anyhow::Result<Self> {
        let fetcher = Fetcher::new(fetch).context("build fetcher")?;
        Ok(Self {
            fetcher,
            site,
            config,
        })
    }

    /// Chapters of a series listing, sorted by chapter number.
    pub async fn list_chapters(&self, listing_url: &str) -> anyhow::Result<Vec<Chapter>> {
        let url = Url::parse(listing_url).context("parse listing url")?;
        let html = self.fetch_html(listing_url).await?;
        let links = self.site.chapter_links(&url, &html);
        tracing::info!(site = self.site.name(), chapters = links.len(), "found chapters");
        Ok(sort_chapters(links))
    }

    /// Image URLs of a chapter, in reading order.
    pub async fn resolve_pages(&self, chapter: &Chapter) -> anyhow::Result<Vec<String>> {
        let url = Url::parse(&chapter.source_url).context("parse chapter url")?;
        let html = self.fetch_html(&chapter.source_url).await?;
        let pages = self.site.page_links(&url, &html);
        if pages.is_empty() {
            anyhow::bail!("no page images found at {}", chapter.source_url);
        }
        Ok(pages)
    }

    async fn fetch_html(&self, url: &str) -> anyhow::Result<String> {
        let body = self.fetcher.fetch(url, Expect::Html).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Resolves a chapter's pages, then downloads and assembles it.
    pub async fn download_chapter(&self, chapter: &Chapter) -> anyhow::Result<ChapterReport> {
        tracing::info!(
            chapter = %chapter.display_name,
            url = %chapter.source_url,
            "downloading chapter"
        );
        let urls = match self.resolve_pages(chapter).await {
            Ok(urls) => urls,
            Err(err) => {
                let mut report = ChapterReport::new(chapter);
                self.finish_report(&mut report, Some(&err));
                return Err(err).context("resolve chapter pages");
            }
        };
        self.run_chapter(chapter, &urls).await
    }

    /// Downloads the given page images and writes the chapter document. The
    /// chapter's scratch directory is gone when this returns, whatever the
    /// outcome.
    pub async fn run_chapter(
        &self,
        chapter: &Chapter,
        urls: &[String],
    ) -> anyhow::Result<ChapterReport> {
        let mut report = ChapterReport::new(chapter);
        report.pages_total = urls.len();

        let stem = chapter.file_stem();
        let store = match PageStore::create(&self.config.scratch_dir, &stem) {
            Ok(store) => store,
            Err(err) => {
                self.finish_report(&mut report, Some(&err));
                return Err(err);
            }
        };

        let result = self.assemble(chapter, &store, urls, &mut report).await;

        if let Err(err) = store.teardown(self.config.settle).await {
            tracing::warn!(
                chapter = %chapter.number,
                error = %format!("{err:#}"),
                "scratch cleanup failed"
            );
        }

        self.finish_report(&mut report, result.as_ref().err());
        result?;
        Ok(report)
    }

    async fn assemble(
        &self,
        chapter: &Chapter,
        store: &PageStore,
        urls: &[String],
        report: &mut ChapterReport,
    ) -> anyhow::Result<()> {
        let download =
            download_chapter(&self.fetcher, store, &chapter.number, urls, &self.config.download)
                .await;
        report.pages_downloaded = download.downloaded();
        report.failed_pages = download.failed_indices();
        if !report.failed_pages.is_empty() {
            tracing::warn!(
                chapter = %chapter.number,
                failed_pages = ?report.failed_pages,
                "pages missing from chapter"
            );
        }

        let paths = download.ordered_local_paths();
        let canvas = self.config.canvas;
        let document_path = self.config.out_dir.join(format!("{}.pdf", chapter.file_stem()));
        tracing::info!(chapter = %chapter.number, pages = paths.len(), "assembling document");

        let target = document_path.clone();
        let summary = tokio::task::spawn_blocking(move || -> anyhow::Result<LayoutSummary> {
            let mut doc = DocumentBuilder::new(&canvas);
            let summary = layout_pages(&mut doc, &canvas, &paths);
            if doc.page_count() == 0 {
                anyhow::bail!("no page of the chapter could be placed");
            }
            doc.write_to(&target)?;
            Ok(summary)
        })
        .await
        .context("join layout task")??;

        report.canvas_pages = summary.canvas_pages;
        report.skipped_pages = summary.skipped.len();
        report.document = Some(document_path.to_string_lossy().to_string());
        tracing::info!(
            chapter = %chapter.number,
            document = %document_path.display(),
            canvas_pages = summary.canvas_pages,
            "chapter written"
        );
        Ok(())
    }

    fn finish_report(&self, report: &mut ChapterReport, err: Option<&anyhow::Error>) {
        report.finished_at = chrono::Utc::now().to_rfc3339();
        report.error = err.map(|err| format!("{err:#}"));
        let Some(path) = self.config.report.as_deref() else {
            return;
        };
        if let Err(err) = append_jsonl(path, report) {
            tracing::warn!(error = %format!("{err:#}"), "could not append run report");
        }
    }

    /// Runs every chapter in order. A failed chapter is logged and the batch
    /// moves on.
    pub async fn download_all(&self, chapters: &[Chapter]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let total = chapters.len();

        for (i, chapter) in chapters.iter().enumerate() {
            match self.download_chapter(chapter).await {
                Ok(_) => summary.succeeded += 1,
                Err(err) => {
                    tracing::error!(
                        chapter = %chapter.display_name,
                        error = %format!("{err:#}"),
                        "chapter failed"
                    );
                    summary.failed.push(chapter.display_name.clone());
                }
            }
            let progress = (i + 1) as f64 / total as f64 * 100.0;
            tracing::info!(
                progress = %format!("{progress:.2}%"),
                done = i + 1,
                total,
                "batch progress"
            );
        }

        summary
    }
}
