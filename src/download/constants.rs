//! Constants for remote operations (timeouts, pacing, render polling).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large attachments).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default lazy-mode pause between page visits.
pub const DEFAULT_LAZY_DELAY_SECS: u64 = 10;

/// Default bound on waiting for a printed PDF to appear.
pub const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 60;

/// Default interval between polls of the browser download directory.
pub const DEFAULT_RENDER_POLL_INTERVAL_MS: u64 = 500;
