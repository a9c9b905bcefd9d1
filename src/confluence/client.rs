//! REST client for the Confluence content API.
//!
//! One [`ConfluenceClient`] is created per run and reused for every listing
//! and attachment download, so the connection pool and session cookies are
//! shared across the whole crawl.

use std::path::Path;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{ApiError, Attachment, ContentApi, Listing, Page, RawContent};
use crate::download::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};

/// Page size requested from paginated listings.
const PAGE_LIMIT: usize = 50;

/// Authenticated client for `{api_url}/rest/api`.
#[derive(Debug)]
pub struct ConfluenceClient {
    /// API base without trailing slash (includes a context path such as `/wiki`).
    base: String,
    username: String,
    password: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    /// Swapped for a fresh client (and cookie store) on re-authentication.
    client: RwLock<Client>,
}

impl ConfluenceClient {
    /// Creates a client with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if `api_url` is not an absolute URL,
    /// or [`ApiError::Network`] if the HTTP client cannot be built.
    pub fn new(api_url: &str, username: &str, password: &str) -> Result<Self, ApiError> {
        Self::with_timeouts(
            api_url,
            username,
            password,
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
        )
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Same as [`ConfluenceClient::new`].
    #[instrument(level = "debug", skip(password))]
    pub fn with_timeouts(
        api_url: &str,
        username: &str,
        password: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, ApiError> {
        Url::parse(api_url).map_err(|_| ApiError::invalid_url(api_url))?;
        let base = api_url.trim_end_matches('/').to_string();
        let client = build_client(connect_timeout, read_timeout)
            .map_err(|e| ApiError::network(base.clone(), e))?;

        Ok(Self {
            base,
            username: username.to_string(),
            password: password.to_string(),
            connect_timeout,
            read_timeout,
            client: RwLock::new(client),
        })
    }

    /// Returns the normalized API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn http(&self) -> Client {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolves a link returned by the API (absolute, or relative to the base).
    fn resolve_link(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else if link.starts_with('/') {
            format!("{}{link}", self.base)
        } else {
            format!("{}/{link}", self.base)
        }
    }

    async fn send(&self, url: &str, expect_json: bool) -> Result<reqwest::Response, ApiError> {
        let response = self
            .http()
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| ApiError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            if status_code == 401 {
                return Err(ApiError::auth_required(url, status_code));
            }
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            return Err(ApiError::http_status_with_retry_after(
                url,
                status_code,
                retry_after,
            ));
        }

        // An expired SSO session is often answered with a 200 login page.
        if expect_json && is_html(&response) {
            debug!(url, "HTML response where JSON was expected - treating as login page");
            return Err(ApiError::auth_required(url, 0));
        }

        Ok(response)
    }

    /// Fetches every entry of a paginated listing.
    async fn list_all(
        &self,
        path: &str,
        extra_query: &[(&str, &str)],
    ) -> Result<Vec<RawContent>, ApiError> {
        let endpoint = format!("{}{path}", self.base);
        let mut start = 0usize;
        let mut entries = Vec::new();

        loop {
            let mut url = Url::parse(&endpoint).map_err(|_| ApiError::invalid_url(&endpoint))?;
            {
                let mut query = url.query_pairs_mut();
                for (key, value) in extra_query {
                    query.append_pair(key, value);
                }
                query
                    .append_pair("start", &start.to_string())
                    .append_pair("limit", &PAGE_LIMIT.to_string());
            }
            let url = url.to_string();

            let response = self.send(&url, true).await?;
            let body = response
                .bytes()
                .await
                .map_err(|e| ApiError::network(&url, e))?;
            let listing: Listing<RawContent> = decode_listing(&url, &body)?;

            let received = listing.results.len();
            entries.extend(listing.results);

            if received == 0 || (listing.links.next.is_none() && received < PAGE_LIMIT) {
                break;
            }
            start += received;
        }

        debug!(path, count = entries.len(), "listing complete");
        Ok(entries)
    }
}

#[async_trait]
impl ContentApi for ConfluenceClient {
    #[instrument(skip(self))]
    async fn root_pages(&self, space: &str) -> Result<Vec<Page>, ApiError> {
        let path = format!("/rest/api/space/{space}/content/page");
        let entries = self.list_all(&path, &[("depth", "root")]).await?;
        Ok(entries.into_iter().map(|raw| raw.into_page(None)).collect())
    }

    #[instrument(skip(self))]
    async fn child_pages(&self, page_id: &str) -> Result<Vec<Page>, ApiError> {
        let path = format!("/rest/api/content/{page_id}/child/page");
        let entries = self.list_all(&path, &[]).await?;
        Ok(entries
            .into_iter()
            .map(|raw| raw.into_page(Some(page_id)))
            .collect())
    }

    #[instrument(skip(self))]
    async fn attachments(&self, page_id: &str) -> Result<Vec<Attachment>, ApiError> {
        let path = format!("/rest/api/content/{page_id}/child/attachment");
        let entries = self.list_all(&path, &[]).await?;
        let total = entries.len();
        let attachments: Vec<Attachment> = entries
            .into_iter()
            .filter_map(RawContent::into_attachment)
            .collect();
        if attachments.len() < total {
            warn!(
                page_id,
                dropped = total - attachments.len(),
                "attachments without download link skipped"
            );
        }
        Ok(attachments)
    }

    #[instrument(skip(self, attachment), fields(attachment = %attachment.title, dest = %dest.display()))]
    async fn download_attachment(
        &self,
        attachment: &Attachment,
        dest: &Path,
    ) -> Result<u64, ApiError> {
        let url = self.resolve_link(&attachment.download);
        let response = self.send(&url, false).await?;

        let mut file = File::create(dest)
            .await
            .map_err(|e| ApiError::io(dest, e))?;
        let bytes = stream_to_file(&mut file, response, &url, dest).await?;

        debug!(bytes, "attachment bytes written");
        Ok(bytes)
    }

    #[instrument(skip(self))]
    async fn reauthenticate(&self) -> Result<(), ApiError> {
        info!("re-establishing API session");
        let fresh = build_client(self.connect_timeout, self.read_timeout)
            .map_err(|e| ApiError::network(self.base.clone(), e))?;
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = fresh;

        let probe = format!("{}/rest/api/user/current", self.base);
        self.send(&probe, true).await?;
        Ok(())
    }
}

/// Streams a response body to `file`, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, ApiError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| ApiError::network(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| ApiError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| ApiError::io(file_path, e))?;

    Ok(bytes_written)
}

fn build_client(connect_timeout: Duration, read_timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(read_timeout)
        .gzip(true)
        .cookie_store(true)
        .user_agent(default_user_agent())
        .build()
}

fn default_user_agent() -> String {
    format!("space-export/{}", env!("CARGO_PKG_VERSION"))
}

/// Decodes a listing body. Markup where JSON was expected is a login page
/// served with a non-HTML content type.
fn decode_listing(url: &str, body: &[u8]) -> Result<Listing<RawContent>, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        if body.trim_ascii_start().starts_with(b"<") {
            debug!(url, "markup body where JSON was expected - treating as login page");
            ApiError::auth_required(url, 0)
        } else {
            ApiError::decode(url, e.to_string())
        }
    })
}

fn is_html(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("text/html"))
}
