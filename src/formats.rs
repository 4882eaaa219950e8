use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::chapter::Chapter;

/// One row of `chapters` output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChapterRecord {
    pub label: String,
    pub number: String,
    pub url: String,
}

impl From<&Chapter> for ChapterRecord {
    fn from(chapter: &Chapter) -> Self {
        Self {
            label: chapter.display_name.clone(),
            number: chapter.number.clone(),
            url: chapter.source_url.clone(),
        }
    }
}

/// Outcome of one chapter run, appended to the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterReport {
    pub label: String,
    pub number: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    pub pages_total: usize,
    pub pages_downloaded: usize,
    pub failed_pages: Vec<usize>,
    pub canvas_pages: usize,
    pub skipped_pages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: String,
}

impl ChapterReport {
    pub fn new(chapter: &Chapter) -> Self {
        Self {
            label: chapter.display_name.clone(),
            number: chapter.number.clone(),
            url: chapter.source_url.clone(),
            document: None,
            pages_total: 0,
            pages_downloaded: 0,
            failed_pages: Vec::new(),
            canvas_pages: 0,
            skipped_pages: 0,
            error: None,
            finished_at: String::new(),
        }
    }
}

pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create report dir: {}", parent.display()))?;
    }

    let mut line = serde_json::to_vec(record).context("serialize report record")?;
    line.push(b'\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open report: {}", path.display()))?;
    file.write_all(&line)
        .with_context(|| format!("write report: {}", path.display()))?;
    Ok(())
}
