//! Chrome session over the DevTools protocol.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::preferences::write_print_preferences;
use super::{BrowserError, BrowserSession};

/// Profile directory name Chrome uses when none is configured.
pub const DEFAULT_PROFILE_DIRECTORY: &str = "Default";

/// Launch settings for [`ChromeSession`].
#[derive(Debug, Clone)]
pub struct ChromeOptions {
    /// Chrome user data directory (holds the logged-in profile).
    pub user_data_dir: PathBuf,
    /// Profile inside `user_data_dir`, e.g. `Default` or `Profile 1`.
    pub profile_directory: String,
    /// Directory printed PDFs are saved to.
    pub download_dir: PathBuf,
    /// Explicit browser binary; autodetected when `None`.
    pub executable: Option<PathBuf>,
    /// Run without a window. Headless Chrome has no print preview, so pages
    /// are rendered through the DevTools `printToPDF` call instead.
    pub headless: bool,
    /// Bound on loading the printable view and dispatching the print call.
    pub navigation_timeout: Duration,
}

struct Running {
    browser: Browser,
    handler: JoinHandle<()>,
    alive: Arc<AtomicBool>,
    last_tab: Option<chromiumoxide::Page>,
}

/// A Chrome process driven through chromiumoxide, printing into the
/// configured download directory.
///
/// A headed browser prints with `window.print()` and `--kiosk-printing`. A
/// headless one asks the DevTools protocol for the PDF and writes it there.
pub struct ChromeSession {
    options: ChromeOptions,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for ChromeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromeSession")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ChromeSession {
    /// Prepares the profile and starts the browser.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::Profile`] or [`BrowserError::Preferences`] when
    /// the profile cannot be patched and [`BrowserError::Launch`] when Chrome
    /// does not start.
    #[instrument(skip_all, fields(profile = %options.profile_directory))]
    pub async fn launch(options: ChromeOptions) -> Result<Self, BrowserError> {
        let session = Self {
            options,
            running: Mutex::new(None),
        };
        let running = session.start().await?;
        *session.running.lock().await = Some(running);
        Ok(session)
    }

    /// Closes the browser if it is running.
    pub async fn shutdown(&self) {
        if let Some(running) = self.running.lock().await.take() {
            stop(running).await;
        }
    }

    async fn start(&self) -> Result<Running, BrowserError> {
        let profile_dir = self
            .options
            .user_data_dir
            .join(&self.options.profile_directory);
        write_print_preferences(&profile_dir, &self.options.download_dir).await?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&self.options.user_data_dir)
            .arg(format!(
                "--profile-directory={}",
                self.options.profile_directory
            ))
            .arg("--kiosk-printing")
            .arg("--start-maximized")
            .request_timeout(self.options.navigation_timeout);
        if !self.options.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &self.options.executable {
            builder = builder.chrome_executable(executable);
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let alive = Arc::new(AtomicBool::new(true));
        let handler_alive = Arc::clone(&alive);
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler stopped");
                    break;
                }
            }
            handler_alive.store(false, Ordering::SeqCst);
        });

        info!(
            user_data_dir = %self.options.user_data_dir.display(),
            headless = self.options.headless,
            "browser started"
        );

        Ok(Running {
            browser,
            handler,
            alive,
            last_tab: None,
        })
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    #[instrument(skip(self, download_dir))]
    async fn print_page(&self, url: &str, download_dir: &Path) -> Result<(), BrowserError> {
        if download_dir != self.options.download_dir {
            warn!(
                requested = %download_dir.display(),
                configured = %self.options.download_dir.display(),
                "print output goes to the directory configured at launch"
            );
        }

        let mut guard = self.running.lock().await;
        if guard.is_none() {
            *guard = Some(self.start().await?);
        }
        let Some(running) = guard.as_mut() else {
            return Err(BrowserError::SessionLost("browser not running".to_string()));
        };

        if !running.alive.load(Ordering::SeqCst) {
            return Err(BrowserError::SessionLost(
                "browser connection closed".to_string(),
            ));
        }

        if let Some(tab) = running.last_tab.take()
            && let Err(e) = tab.close().await
        {
            debug!(error = %e, "closing previous tab failed");
        }

        let timeout = self.options.navigation_timeout;
        let tab = match tokio::time::timeout(timeout, running.browser.new_page(url)).await {
            Ok(Ok(tab)) => tab,
            Ok(Err(e)) => return Err(driver_error(running, url, &e.to_string(), false)),
            Err(_) => {
                return Err(BrowserError::Navigation {
                    url: url.to_string(),
                    message: format!("page did not load within {timeout:?}"),
                });
            }
        };

        if let Ok(Err(e)) = tokio::time::timeout(timeout, tab.wait_for_navigation()).await {
            return Err(driver_error(running, url, &e.to_string(), false));
        }

        if self.options.headless {
            let result = save_protocol_pdf(&tab, url, &self.options.download_dir, timeout).await;
            running.last_tab = Some(tab);
            return result.map_err(|e| match e {
                BrowserError::Print { message, .. } => driver_error(running, url, &message, true),
                other => other,
            });
        }

        // With kiosk printing the call may only return once the file is
        // written, so a timeout here is not an error; the renderer polls.
        match tokio::time::timeout(timeout, tab.evaluate("window.print()")).await {
            Ok(Ok(_)) => debug!("print dispatched"),
            Ok(Err(e)) => return Err(driver_error(running, url, &e.to_string(), true)),
            Err(_) => debug!("print call still pending"),
        }

        running.last_tab = Some(tab);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn restart(&self) -> Result<(), BrowserError> {
        let mut guard = self.running.lock().await;
        if let Some(running) = guard.take() {
            stop(running).await;
        }
        warn!("restarting browser session");
        *guard = Some(self.start().await?);
        Ok(())
    }
}

/// Renders `tab` with `Page.printToPDF` and writes it into `download_dir`.
///
/// The bytes go to a dot-prefixed temp name first and are renamed once
/// complete, so the renderer never sees a half-written PDF.
async fn save_protocol_pdf(
    tab: &chromiumoxide::Page,
    url: &str,
    download_dir: &Path,
    timeout: Duration,
) -> Result<(), BrowserError> {
    let print_error = |message: String| BrowserError::Print {
        url: url.to_string(),
        message,
    };

    let params = PrintToPdfParams {
        print_background: Some(true),
        ..Default::default()
    };
    let bytes = match tokio::time::timeout(timeout, tab.pdf(params)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => return Err(print_error(e.to_string())),
        Err(_) => return Err(print_error(format!("printToPDF did not finish within {timeout:?}"))),
    };

    let title = tab.get_title().await.ok().flatten();
    let name = protocol_pdf_name(title.as_deref());
    let partial = download_dir.join(format!(".{name}.part"));
    let target = download_dir.join(&name);
    tokio::fs::write(&partial, &bytes)
        .await
        .map_err(|e| print_error(format!("writing {}: {e}", partial.display())))?;
    tokio::fs::rename(&partial, &target)
        .await
        .map_err(|e| print_error(format!("moving {}: {e}", target.display())))?;

    debug!(file = %target.display(), bytes = bytes.len(), "pdf written");
    Ok(())
}

/// File name for a protocol-rendered PDF, taken from the document title the
/// way Chrome names a saved print.
fn protocol_pdf_name(title: Option<&str>) -> String {
    let stem: String = title
        .unwrap_or_default()
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let stem = stem.trim_start_matches('.');
    if stem.is_empty() {
        "page.pdf".to_string()
    } else {
        format!("{stem}.pdf")
    }
}

async fn stop(mut running: Running) {
    if let Some(tab) = running.last_tab.take() {
        let _ = tab.close().await;
    }
    if let Err(e) = running.browser.close().await {
        debug!(error = %e, "browser close failed");
    }
    let _ = running.browser.wait().await;
    running.handler.abort();
}

/// Maps a driver error, treating a dead connection as a lost session.
fn driver_error(running: &Running, url: &str, message: &str, printing: bool) -> BrowserError {
    if !running.alive.load(Ordering::SeqCst) || is_disconnect(message) {
        return BrowserError::SessionLost(message.to_string());
    }
    if printing {
        BrowserError::Print {
            url: url.to_string(),
            message: message.to_string(),
        }
    } else {
        BrowserError::Navigation {
            url: url.to_string(),
            message: message.to_string(),
        }
    }
}

fn is_disconnect(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("websocket")
        || message.contains("channel")
        || message.contains("connection closed")
        || message.contains("broken pipe")
        || message.contains("target closed")
}
