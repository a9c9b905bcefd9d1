//! Fatal errors that abort a mirror run.

use std::path::PathBuf;

use thiserror::Error;

use super::attachments::AttachmentError;
use super::render::RenderError;

/// Errors that stop the traversal.
///
/// Per-page problems are recorded in the [`RunReport`](super::RunReport)
/// instead; only failures of the local output tree end up here, since
/// continuing would silently produce an incomplete mirror.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Creating or inspecting a directory of the output tree failed.
    #[error("local filesystem error at {path}: {source}")]
    Io {
        /// Path that could not be created or read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Writing a page export into place failed.
    #[error("cannot write export of page {page_id}: {source}")]
    Render {
        /// Page being exported.
        page_id: String,
        /// The local render error.
        #[source]
        source: RenderError,
    },

    /// Writing an attachment into place failed.
    #[error("cannot write attachments of page {page_id}: {source}")]
    Attachment {
        /// Page whose attachments were being saved.
        page_id: String,
        /// The local attachment error.
        #[source]
        source: AttachmentError,
    },
}

impl MirrorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
