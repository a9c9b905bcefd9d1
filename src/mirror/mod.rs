//! Space mirroring: path mapping, traversal, rendering and attachments.
//!
//! # Architecture
//!
//! - [`path`] - Title sanitization and sibling collision resolution
//! - [`Mirror`] - Depth-first traversal engine producing a [`RunReport`]
//! - [`PageRenderer`] - Browser export with staging-directory polling
//! - [`AttachmentFetcher`] - Attachment download with temp-file + rename
//!
//! # Output layout
//!
//! ```text
//! <download_path>/
//! ├── .staging/            browser download target and default profile
//! ├── IPH.pdf
//! └── IPH/
//!     ├── IPhone.pdf
//!     └── IPhone/
//!         ├── IPhone13.pdf
//!         └── IPhone13.attachments/
//!             └── pic1.png
//! ```

mod attachments;
mod engine;
mod error;
pub mod path;
mod remote;
mod render;
mod report;

pub use attachments::{AttachmentError, AttachmentFetcher, FetchCounts, FetchOutcome};
pub use engine::{Mirror, MirrorOptions};
pub use error::MirrorError;
pub use render::{PageRenderer, RenderError, RenderSettings};
pub use report::{FailureStage, LocalNode, NodeStatus, PageFailure, PageState, RunReport};

use std::path::{Path, PathBuf};

/// Hidden directory under the download root reserved for the tool itself.
pub const STAGING_DIR_NAME: &str = ".staging";

/// Directory the browser saves printed PDFs to.
#[must_use]
pub fn staging_dir(download_path: &Path) -> PathBuf {
    download_path.join(STAGING_DIR_NAME).join("downloads")
}

/// Browser user data directory used when none is configured.
#[must_use]
pub fn default_profile_dir(download_path: &Path) -> PathBuf {
    download_path.join(STAGING_DIR_NAME).join("profile")
}
