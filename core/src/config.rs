//! # Pipeline Configuration & Constants
//!
//! Every tunable number in Tessera lives here. Components never read a
//! global config object; each one receives the struct that holds exactly
//! the fields it needs (`VerifierConfig` to the verifier, `MinterConfig`
//! to the orchestrator, `PipelineConfig` to the coordinator).

use std::time::Duration;

use thiserror::Error;

use crate::tier::TierTable;

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

/// Pipeline version reported by the node's status endpoint.
pub const PIPELINE_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Deposits observed longer ago than this are rejected as stale.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// How far in the future a producer clock may run before we call it wrong.
pub const FUTURE_SKEW_ALLOWANCE: Duration = Duration::from_secs(60);

/// Minimum wallet identifier length. 20 covers the shortest address formats
/// we accept (an EVM address is 42 with the `0x` prefix).
pub const MIN_WALLET_LENGTH: usize = 20;

/// Sliding window for the per-wallet rate limiter.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Accepted deposits per wallet per window.
pub const RATE_LIMIT_MAX_EVENTS: usize = 10;

// ---------------------------------------------------------------------------
// Minting
// ---------------------------------------------------------------------------

/// Upper bound on a single call to the minting capability. A timeout is a
/// mint failure: nothing is persisted and the deposit stays retryable.
pub const MINT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// Sentinel tier assigned when no configured threshold is met.
pub const NO_TIER: &str = "No Tier";

/// Default tier table, as `NAME=THRESHOLD` pairs.
pub const DEFAULT_TIER_SPEC: &str = "Tier A=100,Tier B=10,Tier C=1";

// ---------------------------------------------------------------------------
// Channels & Ports
// ---------------------------------------------------------------------------

/// Capacity of the notification broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the bounded queue between deposit sources and the pipeline.
pub const DEPOSIT_QUEUE_CAPACITY: usize = 1024;

/// Default REST/WebSocket API port.
pub const DEFAULT_API_PORT: u16 = 9841;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

/// How often the mock source emits a synthetic deposit.
pub const MOCK_SOURCE_INTERVAL: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Component Configuration
// ---------------------------------------------------------------------------

/// Knobs for [`crate::verifier::DepositVerifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Maximum age of a deposit's observed-at timestamp.
    pub freshness_window: Duration,
    /// Maximum distance into the future an observed-at timestamp may sit.
    pub future_skew: Duration,
    /// Minimum wallet identifier length.
    pub min_wallet_len: usize,
    /// Sliding window used by the rate limiter.
    pub rate_window: Duration,
    /// Accepted deposits per wallet per window.
    pub rate_limit: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            freshness_window: FRESHNESS_WINDOW,
            future_skew: FUTURE_SKEW_ALLOWANCE,
            min_wallet_len: MIN_WALLET_LENGTH,
            rate_window: RATE_LIMIT_WINDOW,
            rate_limit: RATE_LIMIT_MAX_EVENTS,
        }
    }
}

/// Knobs for [`crate::minter::AttestationMinter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinterConfig {
    /// Timeout applied to each call into the minting capability.
    pub mint_timeout: Duration,
}

impl Default for MinterConfig {
    fn default() -> Self {
        Self {
            mint_timeout: MINT_TIMEOUT,
        }
    }
}

/// Knobs for [`crate::pipeline::DepositPipeline`].
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Tier table used for classification.
    pub tiers: TierTable,
    /// Mint immediately after a deposit verifies.
    pub auto_mint: bool,
    /// When set, each attestation gets `<base>/<deposit_id>` as metadata URI.
    pub metadata_uri_base: Option<String>,
}

impl PipelineConfig {
    /// Metadata URI for a deposit, if a base is configured.
    pub fn metadata_uri_for(&self, deposit_id: &str) -> Option<String> {
        self.metadata_uri_base
            .as_deref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), deposit_id))
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A tier entry was not of the form `NAME=THRESHOLD`.
    #[error("invalid tier entry '{0}': expected NAME=THRESHOLD")]
    MalformedTier(String),

    /// A tier threshold failed to parse or was not a finite number.
    #[error("invalid threshold for tier '{name}': {value}")]
    InvalidThreshold { name: String, value: String },

    /// Two tiers share a name.
    #[error("duplicate tier name: {0}")]
    DuplicateTier(String),

    /// Two tiers share a threshold, which would make classification ambiguous.
    #[error("duplicate tier threshold: {0}")]
    DuplicateThreshold(String),

    /// The tier specification contained no entries.
    #[error("tier table is empty")]
    EmptyTierTable,

    /// The deposit source kind is not one we know how to build.
    #[error("unknown deposit source '{0}' (expected 'mock' or 'webhook')")]
    UnknownSource(String),
}
