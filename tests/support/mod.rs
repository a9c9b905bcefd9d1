//! In-memory space and browser fakes shared by the mirror integration tests.
//!
//! [`FakeSpace`] serves a page tree with attachments and can inject listing
//! failures, broken downloads and an expired session. [`FakeBrowser`] drops a
//! `%PDF` file into the download directory the way Chrome's kiosk printing
//! does, and can fail, go silent or lose its session.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use space_export_core::browser::{BrowserError, BrowserSession};
use space_export_core::confluence::{ApiError, Attachment, ContentApi, Page};
use space_export_core::download::RetryPolicy;
use space_export_core::mirror::{
    Mirror, MirrorOptions, PageRenderer, RenderSettings, staging_dir,
};

/// Failure budget meaning "fail on every call".
pub const ALWAYS: u32 = u32::MAX;

const WEB_URL: &str = "https://wiki.local";

/// Takes one failure from `budget[key]`, returning whether the call should fail.
fn take_failure(budget: &Mutex<HashMap<String, u32>>, key: &str) -> bool {
    let mut budget = budget.lock().unwrap();
    match budget.get_mut(key) {
        Some(remaining) if *remaining == ALWAYS => true,
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

/// Page tree served from memory.
#[derive(Default)]
pub struct FakeSpace {
    roots: Vec<Page>,
    children: HashMap<String, Vec<Page>>,
    attachments: HashMap<String, Vec<(Attachment, Vec<u8>)>>,
    failing_roots: Mutex<HashMap<String, u32>>,
    failing_children: Mutex<HashMap<String, u32>>,
    failing_downloads: Mutex<HashMap<String, u32>>,
    session_expired: AtomicBool,
    pub child_listings: AtomicUsize,
    pub downloads: AtomicUsize,
    pub reauths: AtomicUsize,
}

impl FakeSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `IPH` fixture: IPH > {IPhone > IPhone13 (pic1.png), IPad}.
    pub fn iph() -> Self {
        Self::new()
            .root("100", "IPH")
            .child("100", "200", "IPhone")
            .child("100", "300", "IPad")
            .child("200", "400", "IPhone13")
            .attachment("400", "att-1", "pic1.png", b"\x89PNG fake image bytes")
    }

    /// IPH > IPhone > {IPhone13 (pic1.png), IPhone14 (prices.xlsx) > Specification (pic1.png)}.
    pub fn iphone_lineup() -> Self {
        Self::new()
            .root("100", "IPH")
            .child("100", "200", "IPhone")
            .child("200", "300", "IPhone13")
            .child("200", "400", "IPhone14")
            .child("400", "500", "Specification")
            .attachment("300", "att-13", "pic1.png", b"iphone13 picture")
            .attachment("400", "att-14", "prices.xlsx", b"PK price sheet")
            .attachment("500", "att-spec", "pic1.png", b"spec picture")
    }

    pub fn root(mut self, id: &str, title: &str) -> Self {
        self.roots.push(Page::new(id, title));
        self
    }

    pub fn child(mut self, parent: &str, id: &str, title: &str) -> Self {
        self.children
            .entry(parent.to_string())
            .or_default()
            .push(Page::new(id, title).with_parent(parent));
        self
    }

    pub fn attachment(mut self, page: &str, id: &str, title: &str, bytes: &[u8]) -> Self {
        let attachment = Attachment {
            id: id.to_string(),
            title: title.to_string(),
            file_size: Some(bytes.len() as u64),
            download: format!("/download/attachments/{page}/{title}"),
        };
        self.attachments
            .entry(page.to_string())
            .or_default()
            .push((attachment, bytes.to_vec()));
        self
    }

    /// Root listing fails `times` times with HTTP 503.
    pub fn fail_roots(self, times: u32) -> Self {
        self.failing_roots
            .lock()
            .unwrap()
            .insert(String::new(), times);
        self
    }

    /// Child listing of `page` fails `times` times with HTTP 503.
    pub fn fail_children(self, page: &str, times: u32) -> Self {
        self.failing_children
            .lock()
            .unwrap()
            .insert(page.to_string(), times);
        self
    }

    /// Download of attachment `id` writes half its bytes, then fails with HTTP 503.
    pub fn fail_download(self, id: &str, times: u32) -> Self {
        self.failing_downloads
            .lock()
            .unwrap()
            .insert(id.to_string(), times);
        self
    }

    /// Every call fails with an expired session until `reauthenticate`.
    pub fn expire_session(self) -> Self {
        self.session_expired.store(true, Ordering::SeqCst);
        self
    }

    /// Removes every injected failure.
    pub fn heal(&self) {
        self.failing_roots.lock().unwrap().clear();
        self.failing_children.lock().unwrap().clear();
        self.failing_downloads.lock().unwrap().clear();
    }

    fn check_session(&self, url: &str) -> Result<(), ApiError> {
        if self.session_expired.load(Ordering::SeqCst) {
            return Err(ApiError::auth_required(url, 401));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentApi for FakeSpace {
    async fn root_pages(&self, space: &str) -> Result<Vec<Page>, ApiError> {
        let url = format!("/rest/api/space/{space}/content");
        self.check_session(&url)?;
        if take_failure(&self.failing_roots, "") {
            return Err(ApiError::http_status(url, 503));
        }
        Ok(self.roots.clone())
    }

    async fn child_pages(&self, page_id: &str) -> Result<Vec<Page>, ApiError> {
        self.child_listings.fetch_add(1, Ordering::SeqCst);
        let url = format!("/rest/api/content/{page_id}/child/page");
        self.check_session(&url)?;
        if take_failure(&self.failing_children, page_id) {
            return Err(ApiError::http_status(url, 503));
        }
        Ok(self.children.get(page_id).cloned().unwrap_or_default())
    }

    async fn attachments(&self, page_id: &str) -> Result<Vec<Attachment>, ApiError> {
        let url = format!("/rest/api/content/{page_id}/child/attachment");
        self.check_session(&url)?;
        Ok(self
            .attachments
            .get(page_id)
            .map(|list| list.iter().map(|(a, _)| a.clone()).collect())
            .unwrap_or_default())
    }

    async fn download_attachment(
        &self,
        attachment: &Attachment,
        dest: &Path,
    ) -> Result<u64, ApiError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.check_session(&attachment.download)?;
        let bytes = self
            .attachments
            .values()
            .flatten()
            .find(|(a, _)| a.id == attachment.id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| ApiError::http_status(&attachment.download, 404))?;

        if take_failure(&self.failing_downloads, &attachment.id) {
            tokio::fs::write(dest, &bytes[..bytes.len() / 2])
                .await
                .map_err(|e| ApiError::io(dest, e))?;
            return Err(ApiError::http_status(&attachment.download, 503));
        }

        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| ApiError::io(dest, e))?;
        Ok(bytes.len() as u64)
    }

    async fn reauthenticate(&self) -> Result<(), ApiError> {
        self.reauths.fetch_add(1, Ordering::SeqCst);
        self.session_expired.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Browser stand-in that "prints" by writing a small PDF into the download dir.
#[derive(Default)]
pub struct FakeBrowser {
    failing: Mutex<HashMap<String, u32>>,
    silent: Mutex<HashMap<String, u32>>,
    session_lost: AtomicBool,
    cancel_on_print: Mutex<Option<Arc<AtomicBool>>>,
    printed: Mutex<Vec<String>>,
    pub restarts: AtomicUsize,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Printing page `id` fails `times` times with a navigation error.
    pub fn fail_page(self, id: &str, times: u32) -> Self {
        self.failing.lock().unwrap().insert(id.to_string(), times);
        self
    }

    /// Printing page `id` succeeds but no file appears, `times` times.
    pub fn silent_page(self, id: &str, times: u32) -> Self {
        self.silent.lock().unwrap().insert(id.to_string(), times);
        self
    }

    /// Every print fails with a lost session until `restart`.
    pub fn lose_session(self) -> Self {
        self.session_lost.store(true, Ordering::SeqCst);
        self
    }

    /// Raises `flag` after the first successful print.
    pub fn cancel_after_first_print(self, flag: Arc<AtomicBool>) -> Self {
        *self.cancel_on_print.lock().unwrap() = Some(flag);
        self
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
        self.silent.lock().unwrap().clear();
    }

    /// Page ids printed successfully, in order.
    pub fn printed(&self) -> Vec<String> {
        self.printed.lock().unwrap().clone()
    }

    fn page_id(url: &str) -> String {
        url.rsplit("pageId=").next().unwrap_or(url).to_string()
    }
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn print_page(&self, url: &str, download_dir: &Path) -> Result<(), BrowserError> {
        if self.session_lost.load(Ordering::SeqCst) {
            return Err(BrowserError::SessionLost("target closed".to_string()));
        }
        let id = Self::page_id(url);
        if take_failure(&self.failing, &id) {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                message: "net::ERR_CONNECTION_RESET".to_string(),
            });
        }
        if take_failure(&self.silent, &id) {
            return Ok(());
        }

        let file = download_dir.join(format!("{id} - Wiki.pdf"));
        std::fs::write(&file, format!("%PDF-1.4\n% page {id}\n")).unwrap();
        self.printed.lock().unwrap().push(id);

        if let Some(flag) = self.cancel_on_print.lock().unwrap().take() {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn restart(&self) -> Result<(), BrowserError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.session_lost.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Builds an engine over the fakes with immediate retries and fast polling.
pub fn mirror<'a>(
    space: &'a FakeSpace,
    browser: &'a FakeBrowser,
    root: &Path,
    with_attachments: bool,
) -> Mirror<'a> {
    let renderer = PageRenderer::new(
        browser,
        RenderSettings {
            web_url: WEB_URL.to_string(),
            staging_dir: staging_dir(root),
            timeout: Duration::from_millis(400),
            poll_interval: Duration::from_millis(10),
        },
    );
    Mirror::new(
        space,
        renderer,
        MirrorOptions {
            space: "IPH".to_string(),
            download_path: root.to_path_buf(),
            with_attachments,
        },
    )
    .with_retry_policy(RetryPolicy::immediate(3))
}

/// Relative paths of every file and directory under `root`, skipping `.staging`.
pub fn tree(root: &Path) -> Vec<String> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let rel = path.strip_prefix(root).unwrap();
            if rel.starts_with(".staging") {
                continue;
            }
            let mut name = rel.to_string_lossy().replace('\\', "/");
            if path.is_dir() {
                name.push('/');
                out.push(name);
                walk(root, &path, out);
            } else {
                out.push(name);
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

/// Relative paths of the files under `root`, skipping directories and `.staging`.
pub fn files(root: &Path) -> Vec<String> {
    tree(root)
        .into_iter()
        .filter(|entry| !entry.ends_with('/'))
        .collect()
}
