//! Per-run accounting: visited nodes, counters, and recorded failures.
//!
//! The report lives only for one invocation. Resuming a run relies on the
//! files already on disk, never on a persisted report.

use std::fmt;
use std::path::PathBuf;

/// Outcome of the render step for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Visited, render step not finished yet.
    Pending,
    /// A fresh PDF was produced this run.
    Rendered,
    /// Rendering failed after retries (or permanently).
    RenderFailed,
    /// A valid PDF was already present and the renderer was not invoked.
    SkippedExisting,
}

/// Lifecycle of one page during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Listed by its parent, not processed yet.
    Discovered,
    /// Render and attachment steps in progress.
    Materializing,
    /// PDF present and attachments (if enabled) complete.
    Materialized,
    /// Render or attachment step ended in an unrecoverable error.
    Failed,
}

/// Step of the per-page pipeline a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Exporting the PDF.
    Render,
    /// Listing or downloading attachments.
    Attachments,
    /// Listing child pages; the whole subtree below is unreachable.
    Children,
    /// Listing the space's root pages.
    Roots,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Render => "render",
            Self::Attachments => "attachments",
            Self::Children => "children",
            Self::Roots => "roots",
        };
        f.write_str(name)
    }
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    /// Page id (the space key for [`FailureStage::Roots`]).
    pub page_id: String,
    /// Page title, for the summary.
    pub title: String,
    /// Local base path relative to the download root.
    pub path: PathBuf,
    /// Pipeline step that failed.
    pub stage: FailureStage,
    /// Human-readable cause.
    pub reason: String,
}

/// Local materialization record of one visited page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNode {
    /// Remote page id.
    pub page_id: String,
    /// Remote title as listed.
    pub title: String,
    /// Base path relative to the download root; `.pdf`, `.attachments` and
    /// the children directory all derive from it.
    pub base_path: PathBuf,
    /// Render step outcome.
    pub status: NodeStatus,
    /// Final page state.
    pub state: PageState,
}

impl LocalNode {
    pub(crate) fn new(page_id: &str, title: &str, base_path: PathBuf) -> Self {
        Self {
            page_id: page_id.to_string(),
            title: title.to_string(),
            base_path,
            status: NodeStatus::Pending,
            state: PageState::Discovered,
        }
    }
}

/// Counters and failures accumulated over one crawl.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Pages processed (rendered, skipped, or failed).
    pub pages_visited: usize,
    /// Pages for which a fresh PDF was produced.
    pub pages_rendered: usize,
    /// Pages whose PDF already existed.
    pub pages_skipped: usize,
    /// Pages that ended in [`PageState::Failed`].
    pub pages_failed: usize,
    /// Attachments downloaded this run.
    pub attachments_fetched: usize,
    /// Attachments already present with the expected size.
    pub attachments_skipped: usize,
    /// Extra attempts spent on retried operations.
    pub retries: u32,
    /// Failures in the order they happened.
    pub failures: Vec<PageFailure>,
    /// Visited pages in visit order.
    pub nodes: Vec<LocalNode>,
    /// Whether the run stopped early on an interrupt.
    pub interrupted: bool,
}

impl RunReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when every visited page materialized and nothing was unreachable.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.interrupted
    }

    /// Number of subtrees that could not be listed.
    #[must_use]
    pub fn unreachable_subtrees(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| matches!(f.stage, FailureStage::Children | FailureStage::Roots))
            .count()
    }

    /// Looks up a visited node by page id.
    #[must_use]
    pub fn node(&self, page_id: &str) -> Option<&LocalNode> {
        self.nodes.iter().find(|n| n.page_id == page_id)
    }

    /// Failures recorded for one page.
    pub fn failures_for<'a>(&'a self, page_id: &'a str) -> impl Iterator<Item = &'a PageFailure> {
        self.failures.iter().filter(move |f| f.page_id == page_id)
    }

    pub(crate) fn record_failure(
        &mut self,
        node: &LocalNode,
        stage: FailureStage,
        reason: impl Into<String>,
    ) {
        self.failures.push(PageFailure {
            page_id: node.page_id.clone(),
            title: node.title.clone(),
            path: node.base_path.clone(),
            stage,
            reason: reason.into(),
        });
    }

    pub(crate) fn record_roots_failure(&mut self, space: &str, reason: impl Into<String>) {
        self.failures.push(PageFailure {
            page_id: space.to_string(),
            title: space.to_string(),
            path: PathBuf::new(),
            stage: FailureStage::Roots,
            reason: reason.into(),
        });
    }

    /// Folds a finished node into the counters.
    pub(crate) fn finish_node(&mut self, node: LocalNode) {
        self.pages_visited += 1;
        match node.status {
            NodeStatus::Rendered => self.pages_rendered += 1,
            NodeStatus::SkippedExisting => self.pages_skipped += 1,
            NodeStatus::Pending | NodeStatus::RenderFailed => {}
        }
        if node.state == PageState::Failed {
            self.pages_failed += 1;
        }
        self.nodes.push(node);
    }
}
