//! Bounded retry with exponential backoff for external API calls.
//!
//! Only [`ApiError::Unavailable`] is retried. Rejections, missing items, and
//! decode failures are returned on the first attempt.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use super::{
    ApiError, CatalogApi, CatalogEntry, RawRecord, RecordFilter, TrashOutcome, WorkspaceApi,
};

/// How many times, and how patiently, to retry a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 disables retrying)
    pub retries: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_millis(4000),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn none() -> Self {
        Self {
            retries: 0,
            ..Self::default()
        }
    }

    /// Build a policy from millisecond settings.
    #[must_use]
    pub fn from_millis(retries: u32, backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            retries,
            initial_backoff: Duration::from_millis(backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms.max(backoff_ms)),
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling each time.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Run `operation`, retrying transient failures according to `policy`.
///
/// # Errors
///
/// Returns the first non-transient error, or the last transient error once
/// retries are exhausted.
pub fn with_retry<T, F>(operation_name: &str, policy: &RetryPolicy, mut operation: F) -> Result<T, ApiError>
where
    F: FnMut() -> Result<T, ApiError>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match operation() {
            Ok(value) => {
                if attempt > 0 {
                    log::debug!(
                        "{} succeeded after {} retr{} ({} ms)",
                        operation_name,
                        attempt,
                        if attempt == 1 { "y" } else { "ies" },
                        start.elapsed().as_millis()
                    );
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                if attempt >= policy.retries {
                    if policy.retries > 0 {
                        log::error!(
                            "{} failed after {} attempt(s): {}",
                            operation_name,
                            attempt + 1,
                            err
                        );
                    }
                    return Err(err);
                }
                attempt += 1;
                let delay = policy.backoff_for(attempt);
                log::warn!(
                    "{} failed ({}), retrying in {} ms (attempt {}/{})",
                    operation_name,
                    err,
                    delay.as_millis(),
                    attempt,
                    policy.retries
                );
                std::thread::sleep(delay);
            }
        }
    }
}

/// Decorator that applies a [`RetryPolicy`] to every call of an inner backend.
#[derive(Debug, Clone)]
pub struct Retrying<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> Retrying<T> {
    /// Wrap `inner` with `policy`.
    #[must_use]
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped backend.
    #[must_use]
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: CatalogApi> CatalogApi for Retrying<T> {
    fn list_items(&self, limit: usize) -> Result<Vec<CatalogEntry>, ApiError> {
        with_retry("list items", &self.policy, || self.inner.list_items(limit))
    }

    fn update_tags(&self, item_id: &str, tags: &BTreeSet<String>) -> Result<(), ApiError> {
        with_retry("update tags", &self.policy, || {
            self.inner.update_tags(item_id, tags)
        })
    }

    fn move_to_trash(&self, item_id: &str) -> Result<TrashOutcome, ApiError> {
        with_retry("move to trash", &self.policy, || {
            self.inner.move_to_trash(item_id)
        })
    }
}

impl<T: WorkspaceApi> WorkspaceApi for Retrying<T> {
    fn query(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, ApiError> {
        with_retry("query records", &self.policy, || self.inner.query(filter))
    }

    fn update_fields(&self, record_id: &str, fields: &Map<String, Value>) -> Result<(), ApiError> {
        with_retry("update record", &self.policy, || {
            self.inner.update_fields(record_id, fields)
        })
    }
}
