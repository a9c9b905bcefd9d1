//! Browser-driven PDF export.
//!
//! # Architecture
//!
//! - [`BrowserSession`] - Async trait the page renderer talks to
//! - [`ChromeSession`] - Chrome over the DevTools protocol with kiosk printing
//! - [`preferences`] - Profile patching so `window.print()` saves a PDF silently
//!
//! A session is long-lived: one browser process serves the whole run and is
//! only restarted when it stops responding.

mod chrome;
pub mod preferences;

pub use chrome::{ChromeOptions, ChromeSession, DEFAULT_PROFILE_DIRECTORY};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::confluence::Page;
use crate::download::{Classify, FailureType};

/// Errors raised by a browser session.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The browser process could not be started.
    #[error("failed to launch browser: {0}")]
    Launch(String),

    /// The connection to the browser dropped; a restart is needed.
    #[error("browser session lost: {0}")]
    SessionLost(String),

    /// Loading the printable view failed.
    #[error("navigation to {url} failed: {message}")]
    Navigation {
        /// URL being loaded.
        url: String,
        /// Driver message.
        message: String,
    },

    /// Triggering the print dialog failed.
    #[error("print command failed for {url}: {message}")]
    Print {
        /// URL being printed.
        url: String,
        /// Driver message.
        message: String,
    },

    /// The browser profile could not be prepared on disk.
    #[error("cannot prepare browser profile at {path}: {source}")]
    Profile {
        /// Profile file or directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The profile's preferences file is not valid JSON.
    #[error("invalid browser preferences at {path}: {message}")]
    Preferences {
        /// Preferences file path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
}

impl Classify for BrowserError {
    fn failure_type(&self) -> FailureType {
        match self {
            // Restart-and-retry-once is the same recovery as an expired login.
            Self::SessionLost(_) => FailureType::NeedsAuth,
            Self::Navigation { .. } | Self::Print { .. } => FailureType::Transient,
            Self::Launch(_) | Self::Preferences { .. } => FailureType::Permanent,
            Self::Profile { .. } => FailureType::Local,
        }
    }
}

/// A browser that can export a URL to PDF in a download directory.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Loads `url` and triggers "print to PDF"; the file lands in
    /// `download_dir` asynchronously under a browser-chosen name.
    async fn print_page(&self, url: &str, download_dir: &Path) -> Result<(), BrowserError>;

    /// Tears the session down and starts a fresh one.
    async fn restart(&self) -> Result<(), BrowserError>;
}

/// Builds the URL of a page's human-facing view.
///
/// Uses the page's `webui` link when the API provided one and falls back to
/// the classic `viewpage.action` URL otherwise.
///
/// # Examples
///
/// ```
/// use space_export_core::browser::printable_url;
/// use space_export_core::confluence::Page;
///
/// let page = Page::new("101", "IPH");
/// assert_eq!(
///     printable_url("https://wiki.local/", &page),
///     "https://wiki.local/pages/viewpage.action?pageId=101"
/// );
/// ```
#[must_use]
pub fn printable_url(web_url: &str, page: &Page) -> String {
    let base = web_url.trim_end_matches('/');
    match page.webui.as_deref() {
        Some(link) if link.starts_with("http://") || link.starts_with("https://") => {
            link.to_string()
        }
        Some(link) if !link.is_empty() => {
            format!("{base}/{}", link.trim_start_matches('/'))
        }
        _ => format!("{base}/pages/viewpage.action?pageId={}", page.id),
    }
}
