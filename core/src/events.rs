//! Pipeline notifications.
//!
//! The coordinator publishes onto a bounded `tokio::sync::broadcast`
//! channel. Transports (the node's WebSocket route, the metrics recorder)
//! subscribe on their side; the core never knows who is listening.
//! A subscriber that falls behind by more than the channel capacity gets
//! `Lagged` and skips ahead. Publishing never blocks.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::Deposit;

/// Everything the pipeline announces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A deposit event arrived and was persisted.
    #[serde(rename = "deposit_received")]
    DepositReceived { deposit: Deposit },

    /// Outcome of verification plus duplicate detection.
    #[serde(rename = "verification_result")]
    VerificationResult {
        deposit_id: String,
        valid: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// An attestation was minted and stored.
    #[serde(rename = "attestation_minted")]
    AttestationMinted {
        deposit_id: String,
        recipient: String,
        tier: String,
        token_id: String,
    },

    /// Minting was attempted and failed. The deposit stays unprocessed.
    #[serde(rename = "mint_failed")]
    MintFailed { deposit_id: String, error: String },
}

impl PipelineEvent {
    /// The deposit this event is about.
    pub fn deposit_id(&self) -> &str {
        match self {
            Self::DepositReceived { deposit } => &deposit.id,
            Self::VerificationResult { deposit_id, .. }
            | Self::AttestationMinted { deposit_id, .. }
            | Self::MintFailed { deposit_id, .. } => deposit_id,
        }
    }
}

/// Cloneable handle over the broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Sends `event` to every current subscriber and returns how many got
    /// it. Zero subscribers is fine.
    pub fn publish(&self, event: PipelineEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::config::EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::new(4);
        let delivered = bus.publish(PipelineEvent::MintFailed {
            deposit_id: "d1".into(),
            error: "boom".into(),
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(PipelineEvent::VerificationResult {
            deposit_id: "d1".into(),
            valid: true,
            reason: None,
        });
        bus.publish(PipelineEvent::AttestationMinted {
            deposit_id: "d1".into(),
            recipient: "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".into(),
            tier: "Tier A".into(),
            token_id: "1".into(),
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, PipelineEvent::VerificationResult { valid: true, .. }));
        assert!(matches!(second, PipelineEvent::AttestationMinted { .. }));
        assert_eq!(second.deposit_id(), "d1");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(PipelineEvent::VerificationResult {
            deposit_id: "d1".into(),
            valid: false,
            reason: Some("duplicate".into()),
        })
        .unwrap();
        assert_eq!(json["type"], "verification_result");
        assert_eq!(json["reason"], "duplicate");

        let ok = serde_json::to_value(PipelineEvent::VerificationResult {
            deposit_id: "d1".into(),
            valid: true,
            reason: None,
        })
        .unwrap();
        assert!(ok.get("reason").is_none());
    }
}
