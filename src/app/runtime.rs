//! Run wiring: config, API client, browser session, mirror engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use space_export_core::browser::{ChromeOptions, ChromeSession, DEFAULT_PROFILE_DIRECTORY};
use space_export_core::confluence::ConfluenceClient;
use space_export_core::mirror::{
    Mirror, MirrorOptions, PageRenderer, RenderSettings, default_profile_dir, staging_dir,
};
use tracing::{debug, info, warn};

use super::exit_handler::determine_exit_outcome;
use super::summary::print_completion_summary;
use super::terminal::{init_tracing, is_no_color_requested, resolve_default_log_level};
use crate::ProcessExit;
use crate::cli::Args;
use crate::config::{Config, DEFAULT_CONFIG_FILE};

pub(crate) async fn run() -> Result<ProcessExit> {
    let args = Args::parse();
    init_tracing(
        resolve_default_log_level(args.verbose, args.quiet),
        is_no_color_requested(),
    );

    let config_path = args
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = Config::load(&config_path)?;
    debug!(?config, path = %config_path.display(), "config loaded");

    let client = ConfluenceClient::with_timeouts(
        &config.api_url,
        &config.username,
        &config.password,
        config.connect_timeout(),
        config.read_timeout(),
    )
    .context("Failed to create API client")?;

    tokio::fs::create_dir_all(&config.download_path)
        .await
        .with_context(|| {
            format!(
                "Failed to create download path {}",
                config.download_path.display()
            )
        })?;

    let staging = staging_dir(&config.download_path);
    let chrome = ChromeSession::launch(ChromeOptions {
        user_data_dir: config
            .user_data_dir
            .clone()
            .unwrap_or_else(|| default_profile_dir(&config.download_path)),
        profile_directory: config
            .profile_directory
            .clone()
            .unwrap_or_else(|| DEFAULT_PROFILE_DIRECTORY.to_string()),
        download_dir: staging.clone(),
        executable: config.chrome_executable.clone(),
        headless: config.headless,
        navigation_timeout: config.render_timeout(),
    })
    .await
    .context("Failed to start browser")?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let renderer = PageRenderer::new(
        &chrome,
        RenderSettings {
            web_url: config.web_url.clone(),
            staging_dir: staging,
            timeout: config.render_timeout(),
            poll_interval: config.render_poll_interval(),
        },
    );
    let mirror = Mirror::new(
        &client,
        renderer,
        MirrorOptions {
            space: config.space.clone(),
            download_path: config.download_path.clone(),
            with_attachments: config.with_attachments,
        },
    )
    .with_retry_policy(config.retry_policy())
    .with_pacer(config.pacer())
    .with_cancellation(Arc::clone(&interrupted));

    info!(space = %config.space, path = %config.download_path.display(), "Starting export");
    let outcome = mirror.run().await;
    chrome.shutdown().await;
    let report = outcome.context("Export aborted")?;

    print_completion_summary(&report);
    if report.interrupted {
        warn!("Interrupted. Run again to resume.");
    }
    Ok(determine_exit_outcome(&report))
}
