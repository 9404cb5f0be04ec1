//! Core value types: the deposit event as a source emits it, the persisted
//! deposit, and the attestation minted for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// DepositEvent
// ---------------------------------------------------------------------------

/// A deposit as reported by a source, before Tessera has stored it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositEvent {
    /// Caller-assigned identifier, unique per real-world event.
    pub id: String,
    /// Source transaction id. Unique within a source.
    pub tx_ref: String,
    /// Depositing wallet.
    pub wallet: String,
    /// Amount in source currency units.
    pub amount: f64,
    /// Currency or token label (e.g. "ETH", "SOL").
    pub currency: String,
    /// When the deposit happened, according to the producer.
    pub observed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Deposit
// ---------------------------------------------------------------------------

/// A persisted deposit.
///
/// Immutable apart from `processed`, which flips from `false` to `true`
/// exactly once, after the deposit's attestation has been minted and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: String,
    pub tx_ref: String,
    pub wallet: String,
    pub amount: f64,
    pub currency: String,
    pub observed_at: DateTime<Utc>,
    /// One-way flag. Never reverts.
    pub processed: bool,
    /// Set when the record is first persisted.
    pub created_at: DateTime<Utc>,
}

impl Deposit {
    /// Turns an incoming event into an unprocessed deposit record.
    pub fn from_event(event: DepositEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id: event.id,
            tx_ref: event.tx_ref,
            wallet: event.wallet,
            amount: event.amount,
            currency: event.currency,
            observed_at: event.observed_at,
            processed: false,
            created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Attestation
// ---------------------------------------------------------------------------

/// Record of a soulbound token minted for a deposit.
///
/// Deliberately carries no amount: only the tier label leaves the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Generated at mint time.
    pub id: String,
    /// The deposit this attests to. One attestation per deposit.
    pub deposit_id: String,
    /// Wallet the token was minted to.
    pub recipient: String,
    /// Tier name, or the "No Tier" sentinel.
    pub tier: String,
    /// Identifier returned by the minting capability.
    pub token_id: String,
    pub minted_at: DateTime<Utc>,
    /// Serialized [`AttestationMetadata`] (JSON).
    pub metadata: String,
}

/// Structured form of [`Attestation::metadata`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationMetadata {
    pub deposit_id: String,
    pub tier: String,
    pub minted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_uri: Option<String>,
}

impl Attestation {
    /// Builds a fresh attestation with a new identifier and serialized
    /// metadata blob.
    pub fn new(
        deposit_id: &str,
        recipient: &str,
        tier: &str,
        token_id: String,
        minted_at: DateTime<Utc>,
        metadata_uri: Option<&str>,
    ) -> Result<Self, serde_json::Error> {
        let metadata = serde_json::to_string(&AttestationMetadata {
            deposit_id: deposit_id.to_string(),
            tier: tier.to_string(),
            minted_at,
            metadata_uri: metadata_uri.map(str::to_string),
        })?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            deposit_id: deposit_id.to_string(),
            recipient: recipient.to_string(),
            tier: tier.to_string(),
            token_id,
            minted_at,
            metadata,
        })
    }

    /// Parses the metadata blob back into its structured form.
    pub fn parsed_metadata(&self) -> Result<AttestationMetadata, serde_json::Error> {
        serde_json::from_str(&self.metadata)
    }
}
