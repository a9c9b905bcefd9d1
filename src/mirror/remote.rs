//! Retry wrapper for content API calls with one-shot re-authentication.

use std::fmt::Display;
use std::future::Future;

use tracing::warn;

use crate::confluence::{ApiError, ContentApi};
use crate::download::{Classify, FailureType, RetryOutcome, RetryPolicy, retry_with_policy};

/// Runs `operation` under `policy`; if it ends with an expired session,
/// re-authenticates once and runs the whole retry loop again.
///
/// Attempts from both rounds are summed in the returned outcome.
pub(crate) async fn retry_remote<T, E, F, Fut>(
    api: &dyn ContentApi,
    policy: &RetryPolicy,
    label: &str,
    operation: F,
) -> RetryOutcome<T, E>
where
    E: Classify + Display + From<ApiError>,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let first = retry_with_policy(policy, label, &operation).await;
    match &first.result {
        Err(error) if error.failure_type() == FailureType::NeedsAuth => {
            warn!(error = %error, "session expired during {label}, re-authenticating");
        }
        _ => return first,
    }

    if let Err(error) = api.reauthenticate().await {
        warn!(error = %error, "re-authentication failed");
        return RetryOutcome {
            result: Err(E::from(error)),
            attempts: first.attempts,
        };
    }

    let second = retry_with_policy(policy, label, &operation).await;
    RetryOutcome {
        result: second.result,
        attempts: first.attempts + second.attempts,
    }
}
