//! # Deposit Verification
//!
//! Structural checks plus per-wallet rate control, applied to every deposit
//! before it is allowed anywhere near the minter. Checks run in a fixed
//! order, cheapest first, and stop at the first failure:
//!
//! 1. **Amount** — must be strictly positive (NaN fails too).
//! 2. **Staleness** — observed-at no older than the freshness window.
//! 3. **Future skew** — observed-at no further ahead than the skew allowance.
//! 4. **Wallet** — non-empty and at least the minimum length.
//! 5. **Rate limit** — under the per-wallet ceiling for the sliding window.
//!
//! Only a deposit that clears all five leaves a mark in the rate limiter.

pub mod rate_limit;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::clock::{to_time_delta, Clock};
use crate::config::VerifierConfig;
use crate::types::Deposit;

pub use rate_limit::RateLimiter;

// ---------------------------------------------------------------------------
// Rejection
// ---------------------------------------------------------------------------

/// Why a deposit did not make it through verification.
///
/// The `Display` strings are the reason strings broadcast to subscribers;
/// treat them as part of the public contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("timestamp too old")]
    TimestampTooOld,

    #[error("timestamp in future")]
    TimestampInFuture,

    #[error("invalid wallet address")]
    InvalidWallet,

    #[error("rate limit exceeded")]
    RateLimited,

    /// Raised by the duplicate check, not by the verifier itself.
    #[error("duplicate")]
    Duplicate,
}

/// Boolean-plus-reason view of a verification result, as published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub valid: bool,
    pub reason: Option<String>,
}

impl From<Result<(), Rejection>> for Verification {
    fn from(result: Result<(), Rejection>) -> Self {
        match result {
            Ok(()) => Self {
                valid: true,
                reason: None,
            },
            Err(r) => Self {
                valid: false,
                reason: Some(r.to_string()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// DepositVerifier
// ---------------------------------------------------------------------------

/// Stateful deposit validator. The only state is the injected rate limiter.
#[derive(Debug, Clone)]
pub struct DepositVerifier {
    config: VerifierConfig,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
}

impl DepositVerifier {
    pub fn new(config: VerifierConfig, limiter: Arc<RateLimiter>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            limiter,
            clock,
        }
    }

    /// Builds a verifier with its own limiter sized from `config`.
    pub fn with_config(config: VerifierConfig, clock: Arc<dyn Clock>) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_window, config.rate_limit));
        Self::new(config, limiter, clock)
    }

    /// Runs all checks. See the module docs for the order.
    pub fn check(&self, deposit: &Deposit) -> Result<(), Rejection> {
        // 1. Amount. Written as a negated comparison so NaN is rejected.
        if !(deposit.amount > 0.0) {
            return Err(Rejection::NonPositiveAmount);
        }

        // 2–3. Timestamp window.
        let now = self.clock.now();
        let age = now - deposit.observed_at;
        if age > to_time_delta(self.config.freshness_window) {
            return Err(Rejection::TimestampTooOld);
        }
        if -age > to_time_delta(self.config.future_skew) {
            return Err(Rejection::TimestampInFuture);
        }

        // 4. Wallet shape.
        if deposit.wallet.is_empty() || deposit.wallet.chars().count() < self.config.min_wallet_len
        {
            return Err(Rejection::InvalidWallet);
        }

        // 5. Rate limit. Records the acceptance on success.
        if !self.limiter.try_acquire(&deposit.wallet, now) {
            debug!(wallet = %deposit.wallet, "rate limit hit");
            return Err(Rejection::RateLimited);
        }

        Ok(())
    }

    /// [`check`](Self::check), flattened into `{valid, reason}`.
    pub fn verify(&self, deposit: &Deposit) -> Verification {
        self.check(deposit).into()
    }

    /// Whether `wallet` has the minimum shape. Used by the admin path for
    /// override recipients, which skip the rest of verification.
    pub fn wallet_is_valid(&self, wallet: &str) -> bool {
        !wallet.is_empty() && wallet.chars().count() >= self.config.min_wallet_len
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
