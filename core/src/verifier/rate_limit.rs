//! Per-wallet sliding-window rate limiter.
//!
//! Each wallet maps to a time-ordered queue of acceptance instants. Every
//! check prunes the wallet's queue down to the current window before
//! counting, so memory per wallet is bounded by the ceiling.
//!
//! `DashMap` gives us per-shard locking: two wallets never contend, and the
//! entry guard makes check-then-record atomic for a single wallet. The
//! ledger lives in memory only and starts empty on every restart.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::clock::to_time_delta;

/// Sliding-window limiter keyed by wallet.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_events: usize,
    ledger: DashMap<String, VecDeque<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_events: usize) -> Self {
        Self {
            window,
            max_events,
            ledger: DashMap::new(),
        }
    }

    /// Prunes the wallet's window, then records `now` if the wallet is still
    /// under its ceiling. Returns `false` (and records nothing) otherwise.
    pub fn try_acquire(&self, wallet: &str, now: DateTime<Utc>) -> bool {
        let mut entry = self.ledger.entry(wallet.to_string()).or_default();
        prune(entry.value_mut(), now, self.window);

        if entry.len() >= self.max_events {
            return false;
        }
        entry.push_back(now);
        true
    }

    /// Acceptances recorded for `wallet` inside the window ending at `now`.
    pub fn recent(&self, wallet: &str, now: DateTime<Utc>) -> usize {
        match self.ledger.get_mut(wallet) {
            Some(mut entry) => {
                prune(entry.value_mut(), now, self.window);
                entry.len()
            }
            None => 0,
        }
    }

    /// Drops wallets with no acceptances left in the window. Returns how
    /// many were removed. Meant for a periodic background sweep.
    pub fn prune_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.ledger.len();
        self.ledger.retain(|_, stamps| {
            prune(stamps, now, self.window);
            !stamps.is_empty()
        });
        before.saturating_sub(self.ledger.len())
    }

    /// Number of wallets currently tracked.
    pub fn tracked_wallets(&self) -> usize {
        self.ledger.len()
    }

}

/// Removes stamps whose age is at least `window`.
fn prune(stamps: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) {
    let window = to_time_delta(window);
    while let Some(oldest) = stamps.front() {
        if now - *oldest >= window {
            stamps.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "0x1111111111111111111111111111111111111111";

    #[test]
    fn allows_up_to_ceiling_then_blocks() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        let now = Utc::now();

        assert!(limiter.try_acquire(WALLET, now));
        assert!(limiter.try_acquire(WALLET, now));
        assert!(limiter.try_acquire(WALLET, now));
        assert!(!limiter.try_acquire(WALLET, now));
        assert_eq!(limiter.recent(WALLET, now), 3);
    }

    #[test]
    fn rejected_attempts_are_not_recorded() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let t0 = Utc::now();

        assert!(limiter.try_acquire(WALLET, t0));
        for _ in 0..5 {
            assert!(!limiter.try_acquire(WALLET, t0 + chrono::Duration::seconds(30)));
        }
        // Only the first acceptance counts; it ages out at t0 + 60s.
        assert!(limiter.try_acquire(WALLET, t0 + chrono::Duration::seconds(60)));
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        let t0 = Utc::now();

        assert!(limiter.try_acquire(WALLET, t0));
        assert!(limiter.try_acquire(WALLET, t0 + chrono::Duration::seconds(30)));
        assert!(!limiter.try_acquire(WALLET, t0 + chrono::Duration::seconds(59)));

        // The t0 stamp expires, the t0+30 one is still live.
        assert!(limiter.try_acquire(WALLET, t0 + chrono::Duration::seconds(61)));
        assert!(!limiter.try_acquire(WALLET, t0 + chrono::Duration::seconds(62)));
    }

    #[test]
    fn window_beyond_chrono_range_never_expires() {
        let limiter = RateLimiter::new(Duration::MAX, 2);
        let t0 = Utc::now();

        assert!(limiter.try_acquire(WALLET, t0));
        assert!(limiter.try_acquire(WALLET, t0));
        assert!(!limiter.try_acquire(WALLET, t0));
        assert!(!limiter.try_acquire(WALLET, t0 + chrono::Duration::days(3650)));
        assert_eq!(limiter.prune_idle(t0 + chrono::Duration::days(3650)), 0);
    }

    #[test]
    fn wallets_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let now = Utc::now();

        assert!(limiter.try_acquire("wallet-a-xxxxxxxxxxxxxxxx", now));
        assert!(limiter.try_acquire("wallet-b-xxxxxxxxxxxxxxxx", now));
        assert!(!limiter.try_acquire("wallet-a-xxxxxxxxxxxxxxxx", now));
        assert_eq!(limiter.tracked_wallets(), 2);
    }

    #[test]
    fn prune_idle_drops_expired_wallets() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 5);
        let t0 = Utc::now();

        limiter.try_acquire("wallet-a-xxxxxxxxxxxxxxxx", t0);
        limiter.try_acquire("wallet-b-xxxxxxxxxxxxxxxx", t0 + chrono::Duration::seconds(50));

        let removed = limiter.prune_idle(t0 + chrono::Duration::seconds(70));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_wallets(), 1);
        assert_eq!(limiter.recent("wallet-a-xxxxxxxxxxxxxxxx", t0), 0);
    }

    #[test]
    fn concurrent_acquires_never_exceed_ceiling() {
        use std::sync::Arc;
        use std::thread;

        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(60), 10));
        let now = Utc::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || {
                    (0..10)
                        .filter(|_| limiter.try_acquire(WALLET, now))
                        .count()
                })
            })
            .collect();

        let accepted: usize = handles
            .into_iter()
            .map(|h| h.join().expect("worker should not panic"))
            .sum();
        assert_eq!(accepted, 10);
    }
}
