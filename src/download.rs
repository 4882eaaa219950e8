use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use url::Url;

use crate::chapter::sanitize_name;
use crate::fetch::{Exhausted, Expect, FetchError, Fetcher, error_chain, parse_url};
use crate::normalize::{NormalizeError, encode_jpeg, normalize};
use crate::page_store::PageStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Pending,
    Downloaded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Page {
    /// 1-based position in the chapter.
    pub index: usize,
    pub source_url: String,
    pub local_path: PathBuf,
    pub status: PageStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unusable page image")]
    Image {
        #[source]
        source: NormalizeError,
        /// The payload that failed to decode.
        body: Vec<u8>,
    },
    #[error("encode page image")]
    Encode(#[source] image::ImageError),
    #[error("write page file: {}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("page worker failed")]
    Worker(#[from] tokio::task::JoinError),
}

impl PageError {
    /// Last response payload, for the diagnostic dump.
    pub fn body(&self) -> Option<&[u8]> {
        match self {
            Self::Fetch(err) => err.body(),
            Self::Image { body, .. } => Some(body),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Worker pool size; at most this many pages are in flight.
    pub concurrency: usize,
    /// Where to dump the last error response of a failed page, if anywhere.
    pub diagnostics_dir: Option<PathBuf>,
}

/// Outcome of one chapter download. `pages` is in index order.
#[derive(Debug, Clone)]
pub struct ChapterDownload {
    pub pages: Vec<Page>,
}

impl ChapterDownload {
    /// Local files of the downloaded pages, in page order. Failed pages leave
    /// a gap.
    pub fn ordered_local_paths(&self) -> Vec<PathBuf> {
        self.pages
            .iter()
            .filter(|page| page.status == PageStatus::Downloaded)
            .map(|page| page.local_path.clone())
            .collect()
    }

    pub fn downloaded(&self) -> usize {
        self.pages
            .iter()
            .filter(|page| page.status == PageStatus::Downloaded)
            .count()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|page| page.status == PageStatus::Failed)
            .map(|page| page.index)
            .collect()
    }
}

/// Downloads every page of a chapter through a bounded worker pool and
/// returns once each page has succeeded or failed for good. One page failing
/// never cancels its siblings.
pub async fn download_chapter(
    fetcher: &Fetcher,
    store: &PageStore,
    chapter: &str,
    urls: &[String],
    options: &DownloadOptions,
) -> ChapterDownload {
    let mut pages = urls
        .iter()
        .enumerate()
        .map(|(i, url)| Page {
            index: i + 1,
            source_url: url.clone(),
            local_path: store.page_path(i + 1),
            status: PageStatus::Pending,
        })
        .collect::<Vec<_>>();

    let total = pages.len();
    let concurrency = options.concurrency.max(1).min(total.max(1));
    tracing::info!(chapter, pages = total, concurrency, "downloading pages");

    let mut join_set = tokio::task::JoinSet::new();
    let mut next_idx = 0usize;
    let mut done = 0usize;
    let mut failed = 0usize;
    let started_at = Instant::now();
    let mut last_progress_log_at = started_at;

    while next_idx < total || !join_set.is_empty() {
        while next_idx < total && join_set.len() < concurrency {
            let index = pages[next_idx].index;
            let url = pages[next_idx].source_url.clone();
            let fetcher = fetcher.clone();
            let store = store.clone();
            let chapter = chapter.to_owned();
            let diagnostics_dir = options.diagnostics_dir.clone();

            join_set.spawn(async move {
                let parsed = match parse_url(&url) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        tracing::warn!(
                            chapter = %chapter,
                            page = index,
                            url = %url,
                            error = %error_chain(&err),
                            "invalid page url; page skipped"
                        );
                        return (index, false);
                    }
                };
                let outcome = download_page(&fetcher, &store, index, &parsed).await;
                if let Err(err) = &outcome {
                    tracing::warn!(
                        chapter = %chapter,
                        page = index,
                        url = %url,
                        attempts = err.attempts,
                        error = %error_chain(err),
                        "page download failed"
                    );
                    if let Some(dir) = diagnostics_dir.as_deref()
                        && let Some(body) = err.last.body()
                    {
                        save_diagnostic(dir, &chapter, index, body).await;
                    }
                }
                (index, outcome.is_ok())
            });

            next_idx += 1;
        }

        let Some(joined) = join_set.join_next().await else {
            break;
        };
        match joined {
            Ok((index, true)) => {
                pages[index - 1].status = PageStatus::Downloaded;
            }
            Ok((index, false)) => {
                failed += 1;
                store.remove_page(index);
                pages[index - 1].status = PageStatus::Failed;
            }
            Err(err) => {
                tracing::error!(chapter, %err, "page worker panicked");
            }
        }

        done += 1;
        if done == total || last_progress_log_at.elapsed() >= Duration::from_secs(2) {
            tracing::info!(
                chapter,
                done,
                total,
                failed,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "download progress"
            );
            last_progress_log_at = Instant::now();
        }
    }

    for page in &mut pages {
        if page.status == PageStatus::Pending {
            store.remove_page(page.index);
            page.status = PageStatus::Failed;
        }
    }

    ChapterDownload { pages }
}

/// Fetch, normalize and store one page, retrying the whole sequence. A
/// re-fetch is a fresh attempt, so an undecodable payload is retried too.
pub async fn download_page(
    fetcher: &Fetcher,
    store: &PageStore,
    index: usize,
    url: &Url,
) -> Result<PathBuf, Exhausted<PageError>> {
    let what = format!("page {index}");
    fetcher
        .retry_policy()
        .run(&what, |_| async move {
            let outcome = attempt_page(fetcher, store, index, url).await;
            if outcome.is_err() {
                store.remove_page(index);
            }
            outcome
        })
        .await
}

async fn attempt_page(
    fetcher: &Fetcher,
    store: &PageStore,
    index: usize,
    url: &Url,
) -> Result<PathBuf, PageError> {
    let bytes = fetcher.fetch_once(url, Expect::Image).await?;
    let store = store.clone();
    tokio::task::spawn_blocking(move || -> Result<PathBuf, PageError> {
        let image = normalize(&bytes).map_err(|source| PageError::Image {
            source,
            body: bytes.clone(),
        })?;
        let jpeg = encode_jpeg(&image).map_err(PageError::Encode)?;
        store
            .write_page(index, &jpeg)
            .map_err(|source| PageError::Filesystem {
                path: store.page_path(index),
                source,
            })
    })
    .await?
}

/// Best-effort dump of a failed page's last response; never fails the caller.
async fn save_diagnostic(dir: &Path, chapter: &str, index: usize, body: &[u8]) {
    let path = dir.join(format!("error_{}_{index}.html", sanitize_name(chapter)));
    let result = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, body).await
    }
    .await;
    match result {
        Ok(()) => tracing::info!(path = %path.display(), "saved error response"),
        Err(err) => tracing::debug!(path = %path.display(), %err, "could not save error response"),
    }
}
