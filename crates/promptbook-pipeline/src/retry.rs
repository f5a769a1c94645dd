//! Backoff policies for repeated template attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff policy controlling the delay between attempts of one template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Fixed delay between attempts.
    Fixed {
        #[serde(with = "crate::duration_serde")]
        delay: Duration,
    },
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential {
        #[serde(with = "crate::duration_serde")]
        base: Duration,
        #[serde(with = "crate::duration_serde")]
        max: Duration,
    },
    /// Retry immediately.
    #[default]
    None,
}

impl BackoffPolicy {
    /// Compute the delay after a failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed { delay } => *delay,
            BackoffPolicy::Exponential { base, max } => {
                let millis = (base.as_millis() as u64)
                    .saturating_mul(2u64.saturating_pow(attempt as u32));
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }

    /// 500ms doubling up to 30s.
    pub fn exponential() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}
