//! Retry decisions for segment uploads
//!
//! Pure functions over the failure classification, kept free of I/O so the
//! worker loop only has to act on the returned decision.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How an upload failure should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Network error, timeout, 5xx, 408 or 429
    Transient,
    /// Rejected credentials, bad request or other configuration problem
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    NonRetryable,
    AttemptsExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp(GiveUpReason),
}

/// Delay before retrying after failed attempt `attempt` (1-based)
///
/// `base * 2^(attempt - 1)`, capped at `max_delay`.
pub fn backoff_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << exponent;
    policy
        .base_delay
        .checked_mul(factor)
        .unwrap_or(policy.max_delay)
        .min(policy.max_delay)
}

/// Decide what to do after attempt number `attempt` failed with `kind`
pub fn decide(attempt: u32, kind: FailureKind, policy: &RetryPolicy) -> RetryDecision {
    match kind {
        FailureKind::Permanent => RetryDecision::GiveUp(GiveUpReason::NonRetryable),
        FailureKind::Transient if attempt >= policy.max_attempts => {
            RetryDecision::GiveUp(GiveUpReason::AttemptsExhausted)
        }
        FailureKind::Transient => RetryDecision::RetryAfter(backoff_delay(attempt, policy)),
    }
}

/// Classify an HTTP status returned by the indexing service
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        408 | 429 => FailureKind::Transient,
        500..=599 => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}
