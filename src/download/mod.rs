//! Retry and pacing policy shared by every remote operation of a run.
//!
//! # Features
//!
//! - Tagged failure classification ([`FailureType`], [`Classify`])
//! - Exponential backoff with jitter ([`RetryPolicy`], [`retry_with_policy`])
//! - Run-wide lazy-mode pacing ([`Pacer`])
//! - `Retry-After` header parsing for rate-limited responses

mod constants;
mod pacer;
mod retry;

pub use constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_LAZY_DELAY_SECS, DEFAULT_RENDER_POLL_INTERVAL_MS,
    DEFAULT_RENDER_TIMEOUT_SECS, READ_TIMEOUT_SECS,
};
pub use pacer::{Pacer, parse_retry_after};
pub use retry::{
    Classify, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryOutcome,
    RetryPolicy, retry_with_policy,
};
