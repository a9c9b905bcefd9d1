//! Run-wide pacing ("lazy mode") and `Retry-After` parsing.
//!
//! The [`Pacer`] enforces a minimum delay between consecutive paced
//! operations (page renders, attachment downloads). Unlike a per-host
//! limiter there is a single shared clock: the whole run talks to one
//! wiki and drives one browser.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use space_export_core::download::Pacer;
//!
//! # async fn example() {
//! let pacer = Pacer::new(Duration::from_secs(10), Duration::from_millis(500));
//!
//! // First operation proceeds immediately
//! pacer.acquire().await;
//!
//! // Second operation waits until 10s (+ jitter) have elapsed
//! pacer.acquire().await;
//! # }
//! ```

use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Shared pacing state for one run.
#[derive(Debug)]
pub struct Pacer {
    /// Minimum time between paced operations.
    delay: Duration,

    /// Upper bound of random extra delay.
    jitter: Duration,

    /// Whether pacing is disabled (lazy mode off).
    disabled: bool,

    /// Time the last paced operation was released.
    /// `None` until the first operation (which proceeds immediately).
    last_release: Mutex<Option<Instant>>,
}

impl Pacer {
    /// Creates a pacer with a fixed delay plus up to `jitter` extra.
    #[must_use]
    #[instrument(skip_all, fields(delay_ms = delay.as_millis(), jitter_ms = jitter.as_millis()))]
    pub fn new(delay: Duration, jitter: Duration) -> Self {
        debug!("creating pacer");
        Self {
            delay,
            jitter,
            disabled: false,
            last_release: Mutex::new(None),
        }
    }

    /// Creates a pacer that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            delay: Duration::ZERO,
            jitter: Duration::ZERO,
            disabled: true,
            last_release: Mutex::new(None),
        }
    }

    /// Returns whether pacing is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured base delay.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits until the pacing delay since the previous operation has elapsed.
    pub async fn acquire(&self) {
        if self.disabled {
            return;
        }

        let mut last_release = self.last_release.lock().await;

        if let Some(previous) = *last_release {
            let target = self.delay + self.sample_jitter();
            let elapsed = previous.elapsed();
            if elapsed < target {
                let wait = target.saturating_sub(elapsed);
                debug!(wait_ms = wait.as_millis(), "lazy mode pause");
                tokio::time::sleep(wait).await;
            }
        }

        *last_release = Some(Instant::now());
    }

    #[allow(clippy::cast_possible_truncation)]
    fn sample_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use space_export_core::download::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument(level = "debug")]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);

        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }

        return Some(duration);
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        match datetime.duration_since(std::time::SystemTime::now()) {
            Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
            Err(_) => {
                debug!(header_value, "Retry-After date is in the past, returning zero");
                Some(Duration::ZERO)
            }
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}
