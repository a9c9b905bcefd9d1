//! Page export through the browser session.
//!
//! The browser writes its PDF asynchronously under a name of its own
//! choosing, so the renderer owns the synchronization: it empties a private
//! staging directory, asks the session to print, then polls until every new
//! PDF has stopped growing, and moves the page's PDF to its target path.
//! When more than one PDF shows up (a late file from an earlier page), the
//! one named after the page title wins; if that does not single one out the
//! attempt fails and staging is cleared.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::path::sanitize_title;
use crate::browser::{BrowserError, BrowserSession, printable_url};
use crate::confluence::Page;
use crate::download::{Classify, FailureType};

/// Suffixes of files a browser is still writing.
const IN_PROGRESS_SUFFIXES: [&str; 3] = [".crdownload", ".part", ".tmp"];

/// Errors from one render attempt.
#[derive(Debug, Error)]
pub enum RenderError {
    /// No finished PDF appeared in time.
    #[error("no PDF appeared in {dir} within {waited:?}")]
    Timeout {
        /// Staging directory that was polled.
        dir: PathBuf,
        /// How long the renderer waited.
        waited: Duration,
    },

    /// Several PDFs appeared and the page title did not pick out exactly one.
    #[error("ambiguous output in {dir}: {found} new PDFs, {matching} named after the page")]
    Ambiguous {
        /// Staging directory that was polled.
        dir: PathBuf,
        /// Finished PDFs found after the print call.
        found: usize,
        /// How many of them carry the page title.
        matching: usize,
    },

    /// The browser session failed.
    #[error(transparent)]
    Browser(#[from] BrowserError),

    /// Local filesystem failure in the staging or output directory.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path the operation was working on.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl RenderError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl Classify for RenderError {
    fn failure_type(&self) -> FailureType {
        match self {
            Self::Timeout { .. } | Self::Ambiguous { .. } => FailureType::Transient,
            Self::Browser(error) => error.failure_type(),
            Self::Io { .. } => FailureType::Local,
        }
    }
}

/// Timing and location settings for [`PageRenderer`].
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Base URL of the human-facing site.
    pub web_url: String,
    /// Directory the browser saves printed PDFs to.
    pub staging_dir: PathBuf,
    /// Upper bound on waiting for the PDF.
    pub timeout: Duration,
    /// Delay between staging directory scans.
    pub poll_interval: Duration,
}

/// Exports single pages to PDF, one at a time.
pub struct PageRenderer<'a> {
    browser: &'a dyn BrowserSession,
    settings: RenderSettings,
}

impl<'a> PageRenderer<'a> {
    /// Creates a renderer over a long-lived browser session.
    #[must_use]
    pub fn new(browser: &'a dyn BrowserSession, settings: RenderSettings) -> Self {
        Self { browser, settings }
    }

    /// Returns the session this renderer drives.
    #[must_use]
    pub fn browser(&self) -> &'a dyn BrowserSession {
        self.browser
    }

    /// Exports `page` and moves the PDF to `target`.
    ///
    /// # Errors
    ///
    /// [`RenderError::Timeout`] when no stable PDF appears in time,
    /// [`RenderError::Ambiguous`] when the page's PDF cannot be told apart,
    /// [`RenderError::Browser`] for session failures and [`RenderError::Io`]
    /// for local filesystem failures.
    #[instrument(skip(self, page), fields(page_id = %page.id, target = %target.display()))]
    pub async fn render(&self, page: &Page, target: &Path) -> Result<PathBuf, RenderError> {
        let staging = &self.settings.staging_dir;
        self.prepare_staging().await?;
        let before = list_files(staging).await?;

        let url = printable_url(&self.settings.web_url, page);
        self.browser.print_page(&url, staging).await?;

        let produced = self.wait_for_pdf(&before, &page.title).await?;
        tokio::fs::rename(&produced, target)
            .await
            .map_err(|e| RenderError::io(target, e))?;

        info!(from = %produced.display(), "page exported");
        Ok(target.to_path_buf())
    }

    /// Creates the staging directory and removes leftovers of earlier renders.
    async fn prepare_staging(&self) -> Result<(), RenderError> {
        let staging = &self.settings.staging_dir;
        tokio::fs::create_dir_all(staging)
            .await
            .map_err(|e| RenderError::io(staging, e))?;

        for stale in list_files(staging).await? {
            debug!(path = %stale.display(), "removing stale staging file");
            remove_if_present(&stale).await?;
        }
        Ok(())
    }

    /// Polls until the new PDFs in staging are non-empty and unchanged since
    /// the previous scan, then picks the page's file among them.
    async fn wait_for_pdf(
        &self,
        before: &HashSet<PathBuf>,
        title: &str,
    ) -> Result<PathBuf, RenderError> {
        let staging = &self.settings.staging_dir;
        let started = Instant::now();
        let deadline = started + self.settings.timeout;
        let mut last_sizes: HashMap<PathBuf, u64> = HashMap::new();

        loop {
            let mut candidates: Vec<PathBuf> = list_files(staging)
                .await?
                .into_iter()
                .filter(|p| !before.contains(p) && is_finished_pdf(p))
                .collect();
            candidates.sort();

            let mut sizes = HashMap::new();
            let mut stable = Vec::new();
            for candidate in candidates {
                let size = match tokio::fs::metadata(&candidate).await {
                    Ok(meta) => meta.len(),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(RenderError::io(&candidate, e)),
                };
                if size > 0 && last_sizes.get(&candidate) == Some(&size) {
                    stable.push(candidate.clone());
                }
                sizes.insert(candidate, size);
            }

            if !stable.is_empty() && stable.len() == sizes.len() {
                return self.pick_page_pdf(stable, title).await;
            }
            last_sizes = sizes;

            if Instant::now() >= deadline {
                return Err(RenderError::Timeout {
                    dir: staging.clone(),
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// A lone PDF is taken as is; among several, exactly one must carry the
    /// page title. Otherwise every candidate is removed.
    async fn pick_page_pdf(
        &self,
        mut stable: Vec<PathBuf>,
        title: &str,
    ) -> Result<PathBuf, RenderError> {
        if stable.len() == 1 {
            let produced = stable.remove(0);
            debug!(path = %produced.display(), "PDF is stable");
            return Ok(produced);
        }

        let mut matching: Vec<&PathBuf> = stable
            .iter()
            .filter(|p| is_named_after(p, title))
            .collect();
        if matching.len() == 1 {
            let produced = matching.remove(0).clone();
            for other in stable.iter().filter(|p| **p != produced) {
                warn!(path = %other.display(), "discarding PDF of another page");
                remove_if_present(other).await?;
            }
            return Ok(produced);
        }

        let matching = matching.len();
        warn!(
            found = stable.len(),
            matching, "cannot tell which PDF belongs to the page"
        );
        for candidate in &stable {
            remove_if_present(candidate).await?;
        }
        Err(RenderError::Ambiguous {
            dir: self.settings.staging_dir.clone(),
            found: stable.len(),
            matching,
        })
    }
}

/// True when the file name contains the page title as a file-name-safe,
/// case-insensitive fragment. Browsers name printed PDFs after the document
/// title.
fn is_named_after(path: &Path, title: &str) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.to_lowercase()
        .contains(&sanitize_title(title).to_lowercase())
}

async fn remove_if_present(path: &Path) -> Result<(), RenderError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RenderError::io(path, e)),
    }
}

/// True for `*.pdf` files that are not in-progress browser downloads.
fn is_finished_pdf(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let lower = name.to_lowercase();
    lower.ends_with(".pdf") && !IN_PROGRESS_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

async fn list_files(dir: &Path) -> Result<HashSet<PathBuf>, RenderError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| RenderError::io(dir, e))?;
    let mut files = HashSet::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| RenderError::io(dir, e))?
    {
        let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
        if is_file {
            files.insert(entry.path());
        }
    }
    Ok(files)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;

    /// Writes a fixed file into the download directory on print.
    struct WritingBrowser {
        file_name: &'static str,
        content: &'static [u8],
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BrowserSession for WritingBrowser {
        async fn print_page(&self, url: &str, download_dir: &Path) -> Result<(), BrowserError> {
            self.urls.lock().unwrap().push(url.to_string());
            std::fs::write(download_dir.join(self.file_name), self.content).unwrap();
            Ok(())
        }

        async fn restart(&self) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    /// Writes several files on print, as when a late PDF of an earlier page
    /// lands next to the current one.
    struct RacingBrowser {
        files: Vec<(&'static str, &'static [u8])>,
    }

    #[async_trait]
    impl BrowserSession for RacingBrowser {
        async fn print_page(&self, _url: &str, download_dir: &Path) -> Result<(), BrowserError> {
            for (name, content) in &self.files {
                std::fs::write(download_dir.join(name), content).unwrap();
            }
            Ok(())
        }

        async fn restart(&self) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    fn settings(root: &Path) -> RenderSettings {
        RenderSettings {
            web_url: "https://wiki.local".to_string(),
            staging_dir: root.join(".staging"),
            timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_is_finished_pdf() {
        assert!(is_finished_pdf(Path::new("/d/IPH - Confluence.pdf")));
        assert!(is_finished_pdf(Path::new("/d/X.PDF")));
        assert!(!is_finished_pdf(Path::new("/d/X.pdf.crdownload")));
        assert!(!is_finished_pdf(Path::new("/d/X.png")));
    }

    #[tokio::test]
    async fn test_render_moves_browser_named_file_to_target() {
        let dir = TempDir::new().unwrap();
        let browser = WritingBrowser {
            file_name: "IPH - Space - Confluence.pdf",
            content: b"%PDF-1.7 body",
            urls: Mutex::new(Vec::new()),
        };
        let renderer = PageRenderer::new(&browser, settings(dir.path()));
        let target = dir.path().join("IPH.pdf");

        let page = Page::new("101", "IPH");
        let written = renderer.render(&page, &target).await.unwrap();

        assert_eq!(written, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-1.7 body");
        assert_eq!(
            browser.urls.lock().unwrap().as_slice(),
            ["https://wiki.local/pages/viewpage.action?pageId=101"]
        );
    }

    #[tokio::test]
    async fn test_render_times_out_on_empty_file() {
        let dir = TempDir::new().unwrap();
        let browser = WritingBrowser {
            file_name: "empty.pdf",
            content: b"",
            urls: Mutex::new(Vec::new()),
        };
        let renderer = PageRenderer::new(&browser, settings(dir.path()));

        let result = renderer
            .render(&Page::new("1", "x"), &dir.path().join("x.pdf"))
            .await;

        let error = result.unwrap_err();
        assert!(matches!(error, RenderError::Timeout { .. }));
        assert_eq!(error.failure_type(), FailureType::Transient);
        assert!(!dir.path().join("x.pdf").exists());
    }

    #[tokio::test]
    async fn test_render_clears_stale_staging_files() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join(".staging");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("old.pdf"), b"%PDF-stale").unwrap();

        let browser = WritingBrowser {
            file_name: "new.pdf",
            content: b"%PDF-fresh",
            urls: Mutex::new(Vec::new()),
        };
        let renderer = PageRenderer::new(&browser, settings(dir.path()));
        let target = dir.path().join("p.pdf");
        renderer.render(&Page::new("1", "p"), &target).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-fresh");
        assert!(!staging.join("old.pdf").exists());
    }

    #[test]
    fn test_is_named_after_matches_sanitized_title() {
        assert!(is_named_after(Path::new("/d/Beta - Wiki.pdf"), "Beta"));
        assert!(is_named_after(Path::new("/d/q3_q4 plan - Wiki.pdf"), "Q3/Q4 plan"));
        assert!(!is_named_after(Path::new("/d/Alpha - Wiki.pdf"), "Beta"));
    }

    #[tokio::test]
    async fn test_render_picks_pdf_named_after_page() {
        let dir = TempDir::new().unwrap();
        let browser = RacingBrowser {
            files: vec![
                ("Alpha - Wiki.pdf", b"%PDF other page".as_slice()),
                ("Beta - Wiki.pdf", b"%PDF beta page".as_slice()),
            ],
        };
        let renderer = PageRenderer::new(&browser, settings(dir.path()));
        let target = dir.path().join("Beta.pdf");

        renderer.render(&Page::new("2", "Beta"), &target).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF beta page");
        let staging = dir.path().join(".staging");
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_render_rejects_unattributable_pdfs() {
        let dir = TempDir::new().unwrap();
        let browser = RacingBrowser {
            files: vec![
                ("Alpha - Wiki.pdf", b"%PDF alpha".as_slice()),
                ("Gamma - Wiki.pdf", b"%PDF gamma".as_slice()),
            ],
        };
        let renderer = PageRenderer::new(&browser, settings(dir.path()));
        let target = dir.path().join("Beta.pdf");

        let error = renderer
            .render(&Page::new("2", "Beta"), &target)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            RenderError::Ambiguous {
                found: 2,
                matching: 0,
                ..
            }
        ));
        assert_eq!(error.failure_type(), FailureType::Transient);
        assert!(!target.exists());
        let staging = dir.path().join(".staging");
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
    }
}
