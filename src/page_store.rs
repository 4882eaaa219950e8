use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;

/// Scratch directory for one chapter's page files. Every I/O call takes the
/// explicit directory; nothing depends on the process working directory.
#[derive(Debug, Clone)]
pub struct PageStore {
    dir: PathBuf,
}

impl PageStore {
    /// Allocates `<scratch_root>/<chapter_stem>`, creating it if absent.
    pub fn create(scratch_root: &Path, chapter_stem: &str) -> anyhow::Result<Self> {
        if chapter_stem.is_empty() || chapter_stem == "." || chapter_stem == ".." {
            anyhow::bail!("invalid scratch directory name: {chapter_stem:?}");
        }
        let dir = scratch_root.join(chapter_stem);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create scratch dir: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<index>.jpg` for the 1-based page index.
    pub fn page_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{index}.jpg"))
    }

    pub fn page_exists(&self, index: usize) -> bool {
        self.page_path(index).is_file()
    }

    pub fn write_page(&self, index: usize, jpeg: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.page_path(index);
        if let Err(err) = std::fs::write(&path, jpeg) {
            self.remove_page(index);
            return Err(err);
        }
        Ok(path)
    }

    /// Removes a page file if present. Failures are logged only.
    pub fn remove_page(&self, index: usize) {
        remove_file_if_exists(&self.page_path(index));
    }

    /// Removes the whole scratch tree after an optional settle delay. An
    /// already-missing directory is not an error.
    pub async fn teardown(&self, settle: Duration) -> anyhow::Result<()> {
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %self.dir.display(), "scratch dir already gone");
                Ok(())
            }
            Err(err) => Err(err)
                .with_context(|| format!("remove scratch dir: {}", self.dir.display())),
        }
    }
}

pub(crate) fn remove_file_if_exists(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "failed to remove file");
        }
    }
}
