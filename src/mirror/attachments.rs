//! Attachment download into `<page>.attachments/`.
//!
//! Each attachment streams into a hidden `.<name>.part` file next to its
//! final location and is renamed into place only after the byte count
//! checks out. An interrupted run therefore never leaves a truncated file
//! under a real attachment name, and the next run re-downloads it.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::path::{SiblingScope, temp_file_name};
use super::remote::retry_remote;
use crate::confluence::{ApiError, Attachment, ContentApi};
use crate::download::{Classify, FailureType, Pacer, RetryPolicy};

/// Errors from listing or saving a page's attachments.
#[derive(Debug, Error)]
pub enum AttachmentError {
    /// Listing or downloading failed remotely.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Fewer or more bytes arrived than the attachment metadata announced.
    #[error("size mismatch for {name}: expected {expected} bytes, received {actual}")]
    SizeMismatch {
        /// Attachment file name.
        name: String,
        /// Size from the attachment metadata.
        expected: u64,
        /// Bytes actually written.
        actual: u64,
    },

    /// Local filesystem failure while creating, inspecting, or renaming files.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path the operation was working on.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl AttachmentError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl Classify for AttachmentError {
    fn failure_type(&self) -> FailureType {
        match self {
            Self::Api(error) => error.failure_type(),
            Self::SizeMismatch { .. } => FailureType::Transient,
            Self::Io { .. } => FailureType::Local,
        }
    }

    fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::Api(error) => error.retry_after(),
            _ => None,
        }
    }
}

/// Attachment counters for one page.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchCounts {
    /// Downloaded this run.
    pub fetched: usize,
    /// Already present with the expected size.
    pub skipped: usize,
    /// Extra attempts spent on retried calls.
    pub retries: u32,
}

/// Counts plus the first error, if any attachment failed.
///
/// Remaining attachments are still attempted after a remote failure; a
/// [`FailureType::Local`] error stops the page immediately.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// What was fetched and skipped before any stop.
    pub counts: FetchCounts,
    /// First error encountered.
    pub error: Option<AttachmentError>,
}

/// Downloads the attachments of one page at a time.
pub struct AttachmentFetcher<'a> {
    api: &'a dyn ContentApi,
    policy: &'a RetryPolicy,
    pacer: &'a Pacer,
}

impl<'a> AttachmentFetcher<'a> {
    /// Creates a fetcher sharing the run's API client, retry policy and pacer.
    #[must_use]
    pub fn new(api: &'a dyn ContentApi, policy: &'a RetryPolicy, pacer: &'a Pacer) -> Self {
        Self { api, policy, pacer }
    }

    /// Lists the attachments of `page_id` and saves them under `target_dir`.
    ///
    /// `target_dir` is created only when the page has attachments.
    #[instrument(skip(self), fields(dir = %target_dir.display()))]
    pub async fn fetch(&self, page_id: &str, target_dir: &Path) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();

        let api = self.api;
        let listing = retry_remote(api, self.policy, "attachment listing", || async move {
            api.attachments(page_id).await
        })
        .await;
        outcome.counts.retries += listing.retries();

        let attachments = match listing.result {
            Ok(attachments) => attachments,
            Err(error) => {
                warn!(error = %error, "cannot list attachments");
                outcome.error = Some(error.into());
                return outcome;
            }
        };

        if attachments.is_empty() {
            debug!("no attachments");
            return outcome;
        }

        if let Err(source) = tokio::fs::create_dir_all(target_dir).await {
            outcome.error = Some(AttachmentError::io(target_dir, source));
            return outcome;
        }

        let entries: Vec<(&str, &str)> = attachments
            .iter()
            .map(|a| (a.id.as_str(), a.title.as_str()))
            .collect();
        let names = SiblingScope::files().assign(&entries);

        info!(count = attachments.len(), "saving attachments");

        for (attachment, name) in attachments.iter().zip(&names) {
            match self.fetch_one(attachment, target_dir, name, &mut outcome.counts).await {
                Ok(()) => {}
                Err(error) if error.failure_type() == FailureType::Local => {
                    outcome.error = Some(error);
                    return outcome;
                }
                Err(error) => {
                    warn!(attachment = %name, error = %error, "attachment failed");
                    if outcome.error.is_none() {
                        outcome.error = Some(error);
                    }
                }
            }
        }

        outcome
    }

    async fn fetch_one(
        &self,
        attachment: &Attachment,
        target_dir: &Path,
        name: &str,
        counts: &mut FetchCounts,
    ) -> Result<(), AttachmentError> {
        let dest = target_dir.join(name);

        if is_present(&dest, attachment.file_size).await? {
            debug!(attachment = %name, "already present, skipping");
            counts.skipped += 1;
            return Ok(());
        }

        let temp = target_dir.join(temp_file_name(name));
        let api = self.api;
        let pacer = self.pacer;
        let temp_path = temp.as_path();

        let download = retry_remote(api, self.policy, "attachment download", || async move {
            pacer.acquire().await;
            let written = api.download_attachment(attachment, temp_path).await?;
            match attachment.file_size {
                Some(expected) if expected != written => Err(AttachmentError::SizeMismatch {
                    name: attachment.title.clone(),
                    expected,
                    actual: written,
                }),
                _ => Ok(written),
            }
        })
        .await;
        counts.retries += download.retries();

        let written = match download.result {
            Ok(written) => written,
            Err(error) => {
                remove_temp(&temp).await;
                return Err(error);
            }
        };

        if let Err(source) = tokio::fs::rename(&temp, &dest).await {
            remove_temp(&temp).await;
            return Err(AttachmentError::io(&dest, source));
        }

        info!(attachment = %name, bytes = written, "attachment saved");
        counts.fetched += 1;
        Ok(())
    }
}

/// Whether `dest` already holds a complete copy of the attachment.
async fn is_present(dest: &Path, expected_size: Option<u64>) -> Result<bool, AttachmentError> {
    match tokio::fs::metadata(dest).await {
        Ok(meta) if meta.is_file() => Ok(match expected_size {
            Some(size) => meta.len() == size,
            None => meta.len() > 0,
        }),
        Ok(_) => Ok(false),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(AttachmentError::io(dest, source)),
    }
}

async fn remove_temp(temp: &Path) {
    match tokio::fs::remove_file(temp).await {
        Ok(()) => debug!(path = %temp.display(), "removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %temp.display(), error = %e, "cannot remove partial download"),
    }
}
