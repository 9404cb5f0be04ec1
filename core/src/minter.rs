//! # Attestation Minter
//!
//! Turns a verified, classified deposit into a persisted attestation.
//!
//! ## Ordering
//!
//! ```text
//! processed? ──yes──► fail, capability untouched
//!     │ no
//! in-flight guard ──held──► fail, capability untouched
//!     │
//! attestation on record? ──yes──► flip flag, fail, capability untouched
//!     │ no
//! capability.mint (under timeout) ──err──► fail, nothing persisted
//!     │ token id
//! insert attestation ─► flip processed flag ─► Minted
//! ```
//!
//! The external mint happens before anything is written locally. If the
//! local writes then fail, the token exists with no record on our side;
//! that case is reported as [`MintError::Persistence`] carrying the token
//! id and logged at `error` so it can be reconciled by hand.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::MinterConfig;
use crate::storage::{DbError, DepositStore};
use crate::types::{Attestation, Deposit};

// ---------------------------------------------------------------------------
// Minting capability
// ---------------------------------------------------------------------------

/// What the capability is asked to mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRequest {
    pub recipient: String,
    pub tier: String,
    pub metadata_uri: Option<String>,
}

/// Failure reported by a minting capability. The message is propagated
/// to callers verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CapabilityError {
    pub message: String,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Something that can issue a soulbound token and hand back its id.
#[async_trait]
pub trait MintingCapability: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    async fn mint(&self, request: &MintRequest) -> Result<String, CapabilityError>;
}

// ---------------------------------------------------------------------------
// Outcome & errors
// ---------------------------------------------------------------------------

/// Result of a mint attempt as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MintOutcome {
    Minted {
        attestation_id: String,
        token_id: String,
    },
    Failed {
        error: String,
    },
}

impl MintOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Minted { .. })
    }
}

impl From<Result<Attestation, MintError>> for MintOutcome {
    fn from(result: Result<Attestation, MintError>) -> Self {
        match result {
            Ok(att) => Self::Minted {
                attestation_id: att.id,
                token_id: att.token_id,
            },
            Err(e) => Self::Failed {
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum MintError {
    #[error("deposit already processed")]
    AlreadyProcessed,

    #[error("mint already in progress for deposit {0}")]
    InProgress(String),

    #[error("deposit not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Capability(#[from] CapabilityError),

    #[error("minting timed out after {0}s")]
    Timeout(u64),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    #[error("token {token_id} minted but persisting local state failed: {reason}")]
    Persistence { token_id: String, reason: String },
}

// ---------------------------------------------------------------------------
// In-flight guard
// ---------------------------------------------------------------------------

/// Marks a deposit as being minted; unmarks it on drop, whatever the
/// outcome.
struct InFlightGuard<'a> {
    set: &'a DashMap<String, ()>,
    deposit_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a DashMap<String, ()>, deposit_id: &str) -> Result<Self, MintError> {
        use dashmap::mapref::entry::Entry;

        match set.entry(deposit_id.to_string()) {
            Entry::Occupied(_) => Err(MintError::InProgress(deposit_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(Self {
                    set,
                    deposit_id: deposit_id.to_string(),
                })
            }
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.deposit_id);
    }
}

// ---------------------------------------------------------------------------
// AttestationMinter
// ---------------------------------------------------------------------------

pub struct AttestationMinter {
    store: Arc<dyn DepositStore>,
    capability: Arc<dyn MintingCapability>,
    config: MinterConfig,
    clock: Arc<dyn Clock>,
    in_flight: DashMap<String, ()>,
}

impl std::fmt::Debug for AttestationMinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationMinter")
            .field("capability", &self.capability.name())
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl AttestationMinter {
    pub fn new(
        store: Arc<dyn DepositStore>,
        capability: Arc<dyn MintingCapability>,
        config: MinterConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            capability,
            config,
            clock,
            in_flight: DashMap::new(),
        }
    }

    /// Mints to the deposit's own wallet.
    pub async fn mint(
        &self,
        deposit: &Deposit,
        tier: &str,
        metadata_uri: Option<&str>,
    ) -> MintOutcome {
        self.mint_to(deposit, &deposit.wallet, tier, metadata_uri)
            .await
    }

    /// Mints to an explicit recipient. The administrative trigger uses this
    /// to redirect a deposit's attestation.
    pub async fn mint_to(
        &self,
        deposit: &Deposit,
        recipient: &str,
        tier: &str,
        metadata_uri: Option<&str>,
    ) -> MintOutcome {
        self.try_mint_to(deposit, recipient, tier, metadata_uri)
            .await
            .into()
    }

    /// Typed form of [`mint_to`](Self::mint_to).
    pub async fn try_mint_to(
        &self,
        deposit: &Deposit,
        recipient: &str,
        tier: &str,
        metadata_uri: Option<&str>,
    ) -> Result<Attestation, MintError> {
        if deposit.processed {
            return Err(MintError::AlreadyProcessed);
        }
        let _guard = InFlightGuard::acquire(&self.in_flight, &deposit.id)?;

        // The caller's copy may be stale.
        let stored = self
            .store
            .get_deposit(&deposit.id)?
            .ok_or_else(|| MintError::NotFound(deposit.id.clone()))?;
        if stored.processed {
            return Err(MintError::AlreadyProcessed);
        }
        // An earlier attempt recorded the token but never flipped the flag.
        if let Some(existing) = self.store.attestation_for_deposit(&deposit.id)? {
            warn!(
                deposit_id = %deposit.id,
                token_id = %existing.token_id,
                "attestation already recorded, repairing processed flag"
            );
            match self.store.mark_processed(&deposit.id) {
                Ok(()) | Err(DbError::AlreadyProcessed(_)) => {}
                Err(e) => return Err(e.into()),
            }
            return Err(MintError::AlreadyProcessed);
        }

        let request = MintRequest {
            recipient: recipient.to_string(),
            tier: tier.to_string(),
            metadata_uri: metadata_uri.map(str::to_string),
        };

        let token_id =
            match tokio::time::timeout(self.config.mint_timeout, self.capability.mint(&request))
                .await
            {
                Ok(Ok(token_id)) => token_id,
                Ok(Err(e)) => {
                    warn!(deposit_id = %deposit.id, capability = self.capability.name(), error = %e, "mint rejected");
                    return Err(e.into());
                }
                Err(_) => {
                    let secs = self.config.mint_timeout.as_secs();
                    warn!(deposit_id = %deposit.id, capability = self.capability.name(), secs, "mint timed out");
                    return Err(MintError::Timeout(secs));
                }
            };

        let attestation = self
            .persist(deposit, recipient, tier, metadata_uri, &token_id)
            .map_err(|reason| {
                error!(
                    deposit_id = %deposit.id,
                    token_id = %token_id,
                    reason = %reason,
                    "orphaned token: minted externally but not recorded"
                );
                MintError::Persistence {
                    token_id: token_id.clone(),
                    reason,
                }
            })?;

        info!(
            deposit_id = %deposit.id,
            attestation_id = %attestation.id,
            token_id = %attestation.token_id,
            tier = %attestation.tier,
            "attestation minted"
        );
        Ok(attestation)
    }

    /// Writes the attestation, then flips the processed flag.
    fn persist(
        &self,
        deposit: &Deposit,
        recipient: &str,
        tier: &str,
        metadata_uri: Option<&str>,
        token_id: &str,
    ) -> Result<Attestation, String> {
        let attestation = Attestation::new(
            &deposit.id,
            recipient,
            tier,
            token_id.to_string(),
            self.clock.now(),
            metadata_uri,
        )
        .map_err(|e| e.to_string())?;

        match self.store.insert_attestation(&attestation) {
            Ok(true) => {}
            Ok(false) => return Err("deposit already has an attestation".to_string()),
            Err(e) => return Err(e.to_string()),
        }
        self.store
            .mark_processed(&deposit.id)
            .map_err(|e| e.to_string())?;
        Ok(attestation)
    }

    pub fn capability_name(&self) -> &str {
        self.capability.name()
    }

    /// Number of deposits currently being minted.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
