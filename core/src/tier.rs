//! # Privacy Tier Classification
//!
//! Maps a deposit amount onto a named bucket. The bucket's threshold is
//! the only number that ever leaves the pipeline: a 150 ETH deposit in a
//! tier starting at 100 is published as "Tier A, 100", and nobody
//! downstream learns the other 50.
//!
//! Classification is a pure function. Validation of the amount (sign,
//! finiteness) is the verifier's job, so negative amounts still classify
//! (into "No Tier").

use std::cmp::Ordering;
use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, DEFAULT_TIER_SPEC, NO_TIER};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A named bucket: any amount at or above `threshold` qualifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyTier {
    pub name: String,
    pub threshold: f64,
}

impl PrivacyTier {
    pub fn new(name: impl Into<String>, threshold: f64) -> Self {
        Self {
            name: name.into(),
            threshold,
        }
    }
}

/// Result of classifying an amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierAssignment {
    /// Winning tier name, or "No Tier".
    pub tier: String,
    /// The tier's threshold. This is what callers get to see.
    pub bucketed_amount: f64,
    /// The amount that was classified. Never published.
    pub original_amount: f64,
}

impl TierAssignment {
    /// Whether a configured tier matched (as opposed to the sentinel).
    pub fn is_tiered(&self) -> bool {
        self.tier != NO_TIER
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Highest threshold first; equal thresholds fall back to name order so
/// the result never depends on how the caller ordered the table.
fn by_threshold_desc(a: &PrivacyTier, b: &PrivacyTier) -> Ordering {
    b.threshold
        .total_cmp(&a.threshold)
        .then_with(|| a.name.cmp(&b.name))
}

/// Classifies `amount` against `tiers`.
///
/// The table is sorted here; callers may pass it in any order. The first
/// tier (by descending threshold) whose threshold is `<= amount` wins. If
/// none qualify the result is `{"No Tier", 0, amount}`.
pub fn classify(amount: f64, tiers: &[PrivacyTier]) -> TierAssignment {
    let mut ordered: Vec<&PrivacyTier> = tiers.iter().collect();
    ordered.sort_by(|a, b| by_threshold_desc(a, b));

    match ordered.into_iter().find(|t| t.threshold <= amount) {
        Some(tier) => TierAssignment {
            tier: tier.name.clone(),
            bucketed_amount: tier.threshold,
            original_amount: amount,
        },
        None => TierAssignment {
            tier: NO_TIER.to_string(),
            bucketed_amount: 0.0,
            original_amount: amount,
        },
    }
}

// ---------------------------------------------------------------------------
// TierTable
// ---------------------------------------------------------------------------

/// A validated tier table: unique names, unique finite thresholds, kept in
/// descending threshold order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    tiers: Vec<PrivacyTier>,
}

impl TierTable {
    /// Validates and sorts a tier list.
    pub fn new(mut tiers: Vec<PrivacyTier>) -> Result<Self, ConfigError> {
        if tiers.is_empty() {
            return Err(ConfigError::EmptyTierTable);
        }

        let mut names = HashSet::new();
        for tier in &tiers {
            if tier.name.trim().is_empty() {
                return Err(ConfigError::MalformedTier(format!("={}", tier.threshold)));
            }
            if !tier.threshold.is_finite() {
                return Err(ConfigError::InvalidThreshold {
                    name: tier.name.clone(),
                    value: tier.threshold.to_string(),
                });
            }
            if !names.insert(tier.name.clone()) {
                return Err(ConfigError::DuplicateTier(tier.name.clone()));
            }
        }

        tiers.sort_by(by_threshold_desc);
        if let Some(pair) = tiers.windows(2).find(|w| w[0].threshold == w[1].threshold) {
            return Err(ConfigError::DuplicateThreshold(pair[0].threshold.to_string()));
        }

        Ok(Self { tiers })
    }

    /// Tiers in descending threshold order.
    pub fn tiers(&self) -> &[PrivacyTier] {
        &self.tiers
    }

    /// The tier with the highest threshold.
    pub fn highest(&self) -> Option<&PrivacyTier> {
        self.tiers.first()
    }

    pub fn classify(&self, amount: f64) -> TierAssignment {
        classify(amount, &self.tiers)
    }

    /// Textual form of the default table; see [`DEFAULT_TIER_SPEC`].
    pub fn default_spec() -> &'static str {
        DEFAULT_TIER_SPEC
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            tiers: vec![
                PrivacyTier::new("Tier A", 100.0),
                PrivacyTier::new("Tier B", 10.0),
                PrivacyTier::new("Tier C", 1.0),
            ],
        }
    }
}

/// Parses `"Tier A=100,Tier B=10"`. Whitespace around names and values is
/// ignored; empty entries (trailing commas) are skipped.
impl FromStr for TierTable {
    type Err = ConfigError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut tiers = Vec::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, value) = entry
                .rsplit_once('=')
                .ok_or_else(|| ConfigError::MalformedTier(entry.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ConfigError::MalformedTier(entry.to_string()));
            }
            let threshold: f64 =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidThreshold {
                        name: name.to_string(),
                        value: value.trim().to_string(),
                    })?;
            tiers.push(PrivacyTier::new(name, threshold));
        }
        Self::new(tiers)
    }
}
