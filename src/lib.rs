//! Space Export Core Library
//!
//! Mirrors a wiki space's page tree onto the local filesystem: every page is
//! printed to a PDF through a real browser session, its attachments are
//! fetched next to it, and child pages nest as directories.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`confluence`] - REST client for page listings and attachment bytes
//! - [`browser`] - Browser session that prints pages to PDF
//! - [`mirror`] - Traversal engine, path mapping and the run report
//! - [`download`] - Failure classification, retry policy and pacing

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod browser;
pub mod confluence;
pub mod download;
pub mod mirror;

// Re-export commonly used types
pub use browser::{BrowserError, BrowserSession, ChromeOptions, ChromeSession};
pub use confluence::{ApiError, Attachment, ConfluenceClient, ContentApi, Page};
pub use download::{
    Classify, DEFAULT_MAX_RETRIES, FailureType, Pacer, RetryDecision, RetryPolicy,
};
pub use mirror::{Mirror, MirrorError, MirrorOptions, PageRenderer, RenderSettings, RunReport};
