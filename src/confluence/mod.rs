//! Remote content API: page tree listing and attachment bytes.
//!
//! # Architecture
//!
//! - [`ContentApi`] - Async trait the traversal engine talks to
//! - [`ConfluenceClient`] - REST implementation over `reqwest` with basic auth
//! - [`Page`] / [`Attachment`] - Read-only snapshots of remote entities
//!
//! The trait is the injection seam: the engine never knows whether it is
//! talking to a live wiki or an in-memory fake.

mod client;
mod error;

pub use client::ConfluenceClient;
pub use error::ApiError;

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

/// A page in the remote space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Opaque identifier, stable and unique within the space.
    pub id: String,
    /// Human-readable title; assumed unique among siblings but not enforced.
    pub title: String,
    /// Parent page, `None` for space roots.
    pub parent_id: Option<String>,
    /// Link to the human-facing view, relative to the web base URL.
    pub webui: Option<String>,
}

impl Page {
    /// Creates a page snapshot without a web link.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            parent_id: None,
            webui: None,
        }
    }

    /// Sets the parent page id.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// A file attached to a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Attachment content id.
    pub id: String,
    /// File name as shown in the wiki (not guaranteed unique).
    pub title: String,
    /// Size in bytes from the attachment metadata, when reported.
    pub file_size: Option<u64>,
    /// Download link, relative to the API base URL.
    pub download: String,
}

/// Read-only access to a space's page tree and attachments.
///
/// Implementations must be long-lived: one instance serves the whole run.
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Lists the top-level pages of `space`, in the order the server returns them.
    async fn root_pages(&self, space: &str) -> Result<Vec<Page>, ApiError>;

    /// Lists the direct children of a page.
    async fn child_pages(&self, page_id: &str) -> Result<Vec<Page>, ApiError>;

    /// Lists the attachments of a page.
    async fn attachments(&self, page_id: &str) -> Result<Vec<Attachment>, ApiError>;

    /// Streams an attachment's bytes into `dest` (created or truncated),
    /// returning the number of bytes written.
    async fn download_attachment(&self, attachment: &Attachment, dest: &Path)
    -> Result<u64, ApiError>;

    /// Re-establishes the authenticated session after it expired.
    async fn reauthenticate(&self) -> Result<(), ApiError>;
}

/// One page of a paginated REST listing.
#[derive(Debug, Deserialize)]
struct Listing<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
    #[serde(rename = "_links", default)]
    links: ListingLinks,
}

#[derive(Debug, Default, Deserialize)]
struct ListingLinks {
    next: Option<String>,
}

/// Content entry as returned by `/rest/api/content/...` listings.
#[derive(Debug, Deserialize)]
struct RawContent {
    id: String,
    title: String,
    #[serde(default)]
    extensions: RawExtensions,
    #[serde(rename = "_links", default)]
    links: RawLinks,
}

#[derive(Debug, Default, Deserialize)]
struct RawExtensions {
    #[serde(rename = "fileSize")]
    file_size: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLinks {
    webui: Option<String>,
    download: Option<String>,
}

impl RawContent {
    fn into_page(self, parent_id: Option<&str>) -> Page {
        Page {
            id: self.id,
            title: self.title,
            parent_id: parent_id.map(str::to_string),
            webui: self.links.webui,
        }
    }

    fn into_attachment(self) -> Option<Attachment> {
        let download = self.links.download?;
        Some(Attachment {
            id: self.id,
            title: self.title,
            file_size: self.extensions.file_size,
            download,
        })
    }
}
