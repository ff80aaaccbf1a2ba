//! Rate limiting for outbound provider requests.
//!
//! Each provider has an independent sliding-window limiter sized from its
//! configured requests-per-minute budget. Over-limit requests fail fast as
//! transient provider errors so the caller's fallback chain can route
//! around a saturated vendor.

use crate::provider::ProviderKind;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Rate limiting error.
#[derive(Debug, Clone, Error)]
pub enum RateLimitError {
    /// Request budget exhausted; wait before retrying this provider.
    #[error("rate limit exceeded; retry after {retry_after_secs}s")]
    Exceeded {
        /// Seconds until the oldest request ages out of the window.
        retry_after_secs: u64,
    },
}

/// Sliding-window request limiter for one provider.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Maximum requests allowed per minute. 0 = unlimited.
    max_per_minute: u32,
    /// Timestamps of requests inside the current window.
    window: VecDeque<Instant>,
}

impl RateLimiter {
    /// Create a limiter with the given per-minute budget.
    #[must_use]
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            window: VecDeque::new(),
        }
    }

    /// Try to admit a request, recording it on success.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Exceeded`] with the retry delay when the
    /// window is full.
    pub fn try_acquire(&mut self) -> Result<(), RateLimitError> {
        if self.max_per_minute == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let window_start = now - Duration::from_secs(60);

        while let Some(&first) = self.window.front() {
            if first < window_start {
                self.window.pop_front();
            } else {
                break;
            }
        }

        if self.window.len() >= self.max_per_minute as usize {
            if let Some(&oldest) = self.window.front() {
                let age = now.duration_since(oldest);
                let remaining = Duration::from_secs(60).saturating_sub(age);
                let retry_after_secs = remaining.as_secs().saturating_add(1);
                return Err(RateLimitError::Exceeded { retry_after_secs });
            }
        }

        self.window.push_back(now);
        Ok(())
    }

    /// Requests remaining in the current window.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        if self.max_per_minute == 0 {
            return u32::MAX;
        }
        self.max_per_minute
            .saturating_sub(self.window.len() as u32)
    }
}

/// Per-provider limiter set shared by all sessions.
#[derive(Debug, Default)]
pub struct ProviderRateLimiters {
    limiters: HashMap<ProviderKind, RateLimiter>,
}

impl ProviderRateLimiters {
    /// Create an empty limiter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a limiter for a provider. A budget of 0 means unlimited.
    pub fn register(&mut self, provider: ProviderKind, max_per_minute: u32) {
        self.limiters
            .insert(provider, RateLimiter::new(max_per_minute));
    }

    /// Try to admit a request for the given provider.
    ///
    /// Providers without a registered limiter are admitted unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Exceeded`] when the provider's window is full.
    pub fn try_acquire(&mut self, provider: ProviderKind) -> Result<(), RateLimitError> {
        match self.limiters.get_mut(&provider) {
            Some(limiter) => limiter.try_acquire(),
            None => Ok(()),
        }
    }

    /// Requests remaining for a provider, if it has a limiter.
    #[must_use]
    pub fn remaining(&self, provider: ProviderKind) -> Option<u32> {
        self.limiters.get(&provider).map(RateLimiter::remaining)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn admits_within_budget() {
        let mut limiter = RateLimiter::new(5);
        for _ in 0..5 {
            assert!(limiter.try_acquire().is_ok());
        }
    }

    #[test]
    fn rejects_over_budget_with_retry_delay() {
        let mut limiter = RateLimiter::new(2);
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_ok());

        match limiter.try_acquire() {
            Err(RateLimitError::Exceeded { retry_after_secs }) => {
                assert!(retry_after_secs > 0);
                assert!(retry_after_secs <= 61);
            }
            Ok(()) => unreachable!("expected rate limit exceeded"),
        }
    }

    #[test]
    fn zero_budget_means_unlimited() {
        let mut limiter = RateLimiter::new(0);
        for _ in 0..1000 {
            assert!(limiter.try_acquire().is_ok());
        }
        assert_eq!(limiter.remaining(), u32::MAX);
    }

    #[test]
    fn remaining_decrements() {
        let mut limiter = RateLimiter::new(3);
        assert_eq!(limiter.remaining(), 3);
        limiter.try_acquire().unwrap();
        assert_eq!(limiter.remaining(), 2);
    }

    #[test]
    fn providers_are_independent() {
        let mut limiters = ProviderRateLimiters::new();
        limiters.register(ProviderKind::OpenAi, 1);
        limiters.register(ProviderKind::Deepgram, 2);

        assert!(limiters.try_acquire(ProviderKind::OpenAi).is_ok());
        assert!(limiters.try_acquire(ProviderKind::OpenAi).is_err());

        assert!(limiters.try_acquire(ProviderKind::Deepgram).is_ok());
        assert!(limiters.try_acquire(ProviderKind::Deepgram).is_ok());
        assert!(limiters.try_acquire(ProviderKind::Deepgram).is_err());
    }

    #[test]
    fn unregistered_provider_is_admitted() {
        let mut limiters = ProviderRateLimiters::new();
        assert!(limiters.try_acquire(ProviderKind::Google).is_ok());
        assert!(limiters.remaining(ProviderKind::Google).is_none());
    }
}
