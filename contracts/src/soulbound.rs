//! # Soulbound Attestation Registry
//!
//! A non-transferable token ledger. Each token records that its owner made
//! a deposit of a given privacy tier; it never records the amount.
//!
//! ## Rules
//!
//! - **Mint**: anyone holding the registry can mint to any non-empty
//!   recipient. Token ids are sequential serials starting at 1, or right
//!   after the last serial a previous run issued (see
//!   [`SoulboundRegistry::resume_from`]).
//! - **Transfer**: always refused. Ownership is fixed at mint.
//! - **Burn**: not offered. An attestation, once issued, stands.
//!
//! The registry is the local [`MintingCapability`] for the node. It is
//! in-memory only; the node's store keeps the durable attestation record.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use tessera_core::minter::{CapabilityError, MintRequest, MintingCapability};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("recipient must not be empty")]
    EmptyRecipient,

    #[error("tier must not be empty")]
    EmptyTier,

    #[error("token {token_id} is soulbound and cannot be transferred")]
    NonTransferable { token_id: String },

    #[error("token not found: {0}")]
    TokenNotFound(String),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoulboundToken {
    pub token_id: String,
    pub owner: String,
    pub tier: String,
    pub metadata_uri: Option<String>,
    pub minted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryState {
    tokens: HashMap<String, SoulboundToken>,
    /// owner -> token ids in mint order.
    by_owner: HashMap<String, Vec<String>>,
    last_serial: u64,
}

/// In-process soulbound token registry.
#[derive(Debug, Default)]
pub struct SoulboundRegistry {
    name: String,
    state: RwLock<RegistryState>,
}

impl SoulboundRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// A registry whose next serial is `last_serial + 1`. Tokens issued
    /// before `last_serial` are not queryable here; the node's store keeps
    /// those records.
    pub fn resume_from(name: impl Into<String>, last_serial: u64) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(RegistryState {
                last_serial,
                ..RegistryState::default()
            }),
        }
    }

    /// Issues a token to `recipient` and returns it.
    pub fn mint(
        &self,
        recipient: &str,
        tier: &str,
        metadata_uri: Option<&str>,
    ) -> Result<SoulboundToken, RegistryError> {
        if recipient.trim().is_empty() {
            return Err(RegistryError::EmptyRecipient);
        }
        if tier.trim().is_empty() {
            return Err(RegistryError::EmptyTier);
        }

        let mut state = self.state.write();
        state.last_serial += 1;
        let token = SoulboundToken {
            token_id: state.last_serial.to_string(),
            owner: recipient.to_string(),
            tier: tier.to_string(),
            metadata_uri: metadata_uri.map(str::to_string),
            minted_at: Utc::now(),
        };

        state
            .by_owner
            .entry(token.owner.clone())
            .or_default()
            .push(token.token_id.clone());
        state.tokens.insert(token.token_id.clone(), token.clone());

        debug!(token_id = %token.token_id, owner = %token.owner, tier = %token.tier, "soulbound token issued");
        Ok(token)
    }

    /// Refuses every transfer. Unknown tokens report `TokenNotFound`.
    pub fn transfer(&self, token_id: &str, _from: &str, _to: &str) -> Result<(), RegistryError> {
        if !self.state.read().tokens.contains_key(token_id) {
            return Err(RegistryError::TokenNotFound(token_id.to_string()));
        }
        Err(RegistryError::NonTransferable {
            token_id: token_id.to_string(),
        })
    }

    pub fn token(&self, token_id: &str) -> Option<SoulboundToken> {
        self.state.read().tokens.get(token_id).cloned()
    }

    pub fn owner_of(&self, token_id: &str) -> Option<String> {
        self.state.read().tokens.get(token_id).map(|t| t.owner.clone())
    }

    /// Tokens held by `owner`, oldest first.
    pub fn tokens_of(&self, owner: &str) -> Vec<SoulboundToken> {
        let state = self.state.read();
        state
            .by_owner
            .get(owner)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.tokens.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn total_supply(&self) -> usize {
        self.state.read().tokens.len()
    }
}

#[async_trait]
impl MintingCapability for SoulboundRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    async fn mint(&self, request: &MintRequest) -> Result<String, CapabilityError> {
        SoulboundRegistry::mint(
            self,
            &request.recipient,
            &request.tier,
            request.metadata_uri.as_deref(),
        )
        .map(|token| token.token_id)
        .map_err(|e| CapabilityError::new(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serials_start_at_one_and_increase() {
        let reg = SoulboundRegistry::new("local");
        let a = reg.mint("0xAAAA", "Tier A", None).unwrap();
        let b = reg.mint("0xAAAA", "Tier B", None).unwrap();
        assert_eq!(a.token_id, "1");
        assert_eq!(b.token_id, "2");
    }

    #[test]
    fn resumed_registry_continues_after_seed() {
        let reg = SoulboundRegistry::resume_from("local", 41);
        assert_eq!(reg.mint("0xAAAA", "Tier A", None).unwrap().token_id, "42");
        assert_eq!(reg.total_supply(), 1);
    }

    #[test]
    fn blank_inputs_are_refused() {
        let reg = SoulboundRegistry::new("local");
        assert_eq!(reg.mint(" ", "Tier A", None), Err(RegistryError::EmptyRecipient));
        assert_eq!(reg.mint("0xAAAA", "", None), Err(RegistryError::EmptyTier));
        assert_eq!(reg.total_supply(), 0);
    }
}
