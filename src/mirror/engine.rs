//! Depth-first traversal that materializes a space onto disk.
//!
//! # Per-page pipeline
//!
//! Each page moves `Discovered -> Materializing -> Materialized | Failed`:
//!
//! 1. Its base path was fixed when the parent's children were listed.
//! 2. An existing `<base>.pdf` that starts with `%PDF` is kept as is.
//! 3. Otherwise the page is rendered under the retry policy. A lost browser
//!    session gets one restart and one extra attempt.
//! 4. With attachments enabled they are fetched whatever the render outcome.
//! 5. Children are listed; a listing failure marks the subtree unreachable.
//!
//! Per-page failures are recorded and traversal continues, including into
//! the children of a failed page. Only local filesystem errors abort the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};

use super::attachments::AttachmentFetcher;
use super::error::MirrorError;
use super::path::{SiblingScope, attachments_dir_name, pdf_file_name};
use super::remote::retry_remote;
use super::render::{PageRenderer, RenderError};
use super::report::{FailureStage, LocalNode, NodeStatus, PageState, RunReport};
use super::STAGING_DIR_NAME;
use crate::confluence::{ContentApi, Page};
use crate::download::{Classify, FailureType, Pacer, RetryPolicy, retry_with_policy};

/// Leading bytes of every PDF file.
const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// What to mirror and where.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    /// Space key whose root pages start the traversal.
    pub space: String,
    /// Root of the output tree.
    pub download_path: PathBuf,
    /// Whether to save attachments next to each page.
    pub with_attachments: bool,
}

/// A listed page waiting on the stack.
#[derive(Debug)]
struct Pending {
    page: Page,
    /// Collision-resolved name of this page among its siblings.
    segment: String,
    /// Base path relative to the download root (parent dirs + segment).
    base_path: PathBuf,
}

/// The traversal engine.
///
/// Holds the run-scoped collaborators: one API client, one renderer (and
/// through it one browser session), the retry policy and the pacer.
pub struct Mirror<'a> {
    api: &'a dyn ContentApi,
    renderer: PageRenderer<'a>,
    options: MirrorOptions,
    policy: RetryPolicy,
    pacer: Pacer,
    cancel: Arc<AtomicBool>,
}

impl<'a> Mirror<'a> {
    /// Creates an engine with the default retry policy and no pacing.
    #[must_use]
    pub fn new(api: &'a dyn ContentApi, renderer: PageRenderer<'a>, options: MirrorOptions) -> Self {
        Self {
            api,
            renderer,
            options,
            policy: RetryPolicy::default(),
            pacer: Pacer::disabled(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets the retry policy for renders, listings and downloads.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the pacer applied before every render attempt and attachment download.
    #[must_use]
    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    /// Shares a cancellation flag; once set, the run stops before the next page.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Walks the space and returns the run report.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError`] when the output tree cannot be written to.
    /// Remote and rendering failures never surface here; they are recorded
    /// in the report.
    #[instrument(skip(self), fields(space = %self.options.space))]
    pub async fn run(&self) -> Result<RunReport, MirrorError> {
        let root = &self.options.download_path;
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| MirrorError::io(root, e))?;

        let mut report = RunReport::new();

        let api = self.api;
        let space = self.options.space.as_str();
        let listing = retry_remote(api, &self.policy, "root listing", || async move {
            api.root_pages(space).await
        })
        .await;
        report.retries += listing.retries();

        let roots = match listing.result {
            Ok(roots) => roots,
            Err(error) => {
                warn!(error = %error, "cannot list space roots");
                report.record_roots_failure(space, format!("subtree unreachable: {error}"));
                return Ok(report);
            }
        };
        info!(count = roots.len(), "space roots listed");

        let scope = SiblingScope::pages().with_reserved(STAGING_DIR_NAME);
        let mut stack = pending_children(&scope, roots, Path::new(""));

        while let Some(next) = stack.pop() {
            if self.cancel.load(Ordering::SeqCst) {
                info!(remaining = stack.len() + 1, "interrupted, stopping before next page");
                report.interrupted = true;
                break;
            }
            let children = self.visit(next, &mut report).await?;
            stack.extend(children);
        }

        info!(
            visited = report.pages_visited,
            rendered = report.pages_rendered,
            skipped = report.pages_skipped,
            failed = report.pages_failed,
            "traversal finished"
        );
        Ok(report)
    }

    /// Materializes one page and returns its children, reversed for the stack.
    async fn visit(
        &self,
        pending: Pending,
        report: &mut RunReport,
    ) -> Result<Vec<Pending>, MirrorError> {
        let Pending {
            page,
            segment,
            base_path,
        } = pending;

        let mut node = LocalNode::new(&page.id, &page.title, base_path.clone());
        node.state = PageState::Materializing;

        let base = self.options.download_path.join(&base_path);
        let dir = base
            .parent()
            .map_or_else(|| self.options.download_path.clone(), Path::to_path_buf);
        let pdf = dir.join(pdf_file_name(&segment));

        info!(
            n = report.pages_visited + 1,
            page_id = %page.id,
            title = %page.title,
            path = %base_path.display(),
            "processing page"
        );

        let mut failed = false;

        if has_valid_pdf(&pdf).await? {
            debug!(path = %pdf.display(), "PDF already present, skipping render");
            node.status = NodeStatus::SkippedExisting;
        } else {
            match self.render_with_retry(&page, &pdf, report).await {
                Ok(()) => node.status = NodeStatus::Rendered,
                Err(error) if error.failure_type() == FailureType::Local => {
                    return Err(MirrorError::Render {
                        page_id: page.id,
                        source: error,
                    });
                }
                Err(error) => {
                    warn!(page_id = %page.id, error = %error, "render failed");
                    node.status = NodeStatus::RenderFailed;
                    report.record_failure(&node, FailureStage::Render, error.to_string());
                    failed = true;
                }
            }
        }

        if self.options.with_attachments {
            let target = dir.join(attachments_dir_name(&segment));
            let fetcher = AttachmentFetcher::new(self.api, &self.policy, &self.pacer);
            let outcome = fetcher.fetch(&page.id, &target).await;

            report.attachments_fetched += outcome.counts.fetched;
            report.attachments_skipped += outcome.counts.skipped;
            report.retries += outcome.counts.retries;

            if let Some(error) = outcome.error {
                if error.failure_type() == FailureType::Local {
                    return Err(MirrorError::Attachment {
                        page_id: page.id,
                        source: error,
                    });
                }
                report.record_failure(&node, FailureStage::Attachments, error.to_string());
                failed = true;
            }
        }

        node.state = if failed {
            PageState::Failed
        } else {
            PageState::Materialized
        };

        let api = self.api;
        let page_id = page.id.as_str();
        let listing = retry_remote(api, &self.policy, "child listing", || async move {
            api.child_pages(page_id).await
        })
        .await;
        report.retries += listing.retries();

        let children = match listing.result {
            Ok(children) => children,
            Err(error) => {
                warn!(page_id, error = %error, "cannot list children");
                report.record_failure(
                    &node,
                    FailureStage::Children,
                    format!("subtree unreachable: {error}"),
                );
                report.finish_node(node);
                return Ok(Vec::new());
            }
        };

        if !children.is_empty() {
            tokio::fs::create_dir_all(&base)
                .await
                .map_err(|e| MirrorError::io(&base, e))?;
        }

        report.finish_node(node);
        Ok(pending_children(&SiblingScope::pages(), children, &base_path))
    }

    /// Renders with the retry policy, restarting the browser once if the
    /// session was lost.
    async fn render_with_retry(
        &self,
        page: &Page,
        pdf: &Path,
        report: &mut RunReport,
    ) -> Result<(), RenderError> {
        let renderer = &self.renderer;
        let pacer = &self.pacer;
        let attempt = || async move {
            pacer.acquire().await;
            renderer.render(page, pdf).await
        };

        let outcome = retry_with_policy(&self.policy, "page render", &attempt).await;
        report.retries += outcome.retries();

        match outcome.result {
            Ok(_) => Ok(()),
            Err(error) if error.failure_type() == FailureType::NeedsAuth => {
                warn!(error = %error, "browser session lost, restarting");
                renderer.browser().restart().await?;
                report.retries += 1;
                attempt().await.map(|_| ())
            }
            Err(error) => Err(error),
        }
    }
}

/// Assigns sibling segments and returns the stack entries in reverse
/// listing order, so popping visits siblings in listing order.
fn pending_children(scope: &SiblingScope, pages: Vec<Page>, parent: &Path) -> Vec<Pending> {
    let entries: Vec<(&str, &str)> = pages
        .iter()
        .map(|p| (p.id.as_str(), p.title.as_str()))
        .collect();
    let segments = scope.assign(&entries);

    let mut pending: Vec<Pending> = pages
        .into_iter()
        .zip(segments)
        .map(|(page, segment)| Pending {
            base_path: parent.join(&segment),
            page,
            segment,
        })
        .collect();
    pending.reverse();
    pending
}

/// True when `path` is a non-empty file starting with the PDF signature.
async fn has_valid_pdf(path: &Path) -> Result<bool, MirrorError> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(MirrorError::io(path, e)),
    };

    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic).await {
        Ok(_) => Ok(&magic == PDF_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(MirrorError::io(path, e)),
    }
}
