//! Caller-driven fallback chain over speech providers.
//!
//! [`ProviderChain`] holds an ordered list of providers and tracks which
//! ones have failed. The ingest and synthesis pipelines consult it to
//! decide which provider to try next; the gateway itself never falls back,
//! keeping cost and latency decisions with the caller.
//!
//! # Retry policy
//!
//! - Transient failures (timeout, 5xx, rate limit): retry the same provider
//!   up to [`RETRY_ATTEMPTS`] times, then advance to the next in the chain.
//! - Permanent failures (auth, bad request): advance immediately.
//!
//! A success resets the provider's transient counter, so a provider that
//! recovers mid-session is not penalised for old failures.

use crate::provider::ProviderKind;
use std::collections::HashMap;
use tracing::{info, warn};

/// Transient-failure retries per provider before advancing.
pub const RETRY_ATTEMPTS: u32 = 3;

/// Per-provider failure tracking.
#[derive(Debug, Default)]
struct ProviderState {
    /// Consecutive transient failures.
    transient_failures: u32,
    /// Permanently failed; never retried.
    permanently_failed: bool,
}

/// Ordered fallback chain over [`ProviderKind`]s.
#[derive(Debug)]
pub struct ProviderChain {
    providers: Vec<ProviderKind>,
    state: HashMap<ProviderKind, ProviderState>,
    current_index: usize,
}

impl ProviderChain {
    /// Create a chain that tries providers in the given order.
    #[must_use]
    pub fn new(providers: Vec<ProviderKind>) -> Self {
        Self {
            state: providers
                .iter()
                .map(|p| (*p, ProviderState::default()))
                .collect(),
            providers,
            current_index: 0,
        }
    }

    /// The next provider to try, advancing past exhausted ones.
    ///
    /// Call before each attempt. Returns `None` when every provider has
    /// been exhausted.
    pub fn next_provider(&mut self) -> Option<ProviderKind> {
        while self.current_index < self.providers.len() {
            let kind = self.providers[self.current_index];
            let (permanent, transient) = self
                .state
                .get(&kind)
                .map(|s| (s.permanently_failed, s.transient_failures))
                .unwrap_or_default();

            if permanent || transient >= RETRY_ATTEMPTS {
                info!(provider = %kind, "fallback chain: skipping exhausted provider");
                self.current_index += 1;
                continue;
            }

            return Some(kind);
        }
        None
    }

    /// Report a failed attempt.
    ///
    /// Transient failures increment the retry counter; permanent failures
    /// mark the provider exhausted and advance immediately.
    pub fn report_failure(&mut self, provider: ProviderKind, transient: bool, message: &str) {
        let state = self.state.entry(provider).or_default();
        if transient {
            state.transient_failures += 1;
            warn!(
                provider = %provider,
                failures = state.transient_failures,
                max = RETRY_ATTEMPTS,
                error = message,
                "provider transient failure"
            );
        } else {
            state.permanently_failed = true;
            warn!(provider = %provider, error = message, "provider permanent failure, skipping");
            if self.providers.get(self.current_index) == Some(&provider) {
                self.current_index += 1;
            }
        }
    }

    /// Report a successful attempt, resetting the transient counter.
    pub fn report_success(&mut self, provider: ProviderKind) {
        if let Some(state) = self.state.get_mut(&provider) {
            state.transient_failures = 0;
        }
    }

    /// `true` once every provider has failed out of the chain.
    pub fn is_exhausted(&self) -> bool {
        self.current_index >= self.providers.len()
    }

    /// Number of providers in the chain.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// `true` if the chain has no providers.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
