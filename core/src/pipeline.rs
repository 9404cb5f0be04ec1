//! # Deposit Pipeline
//!
//! Per incoming event, in order:
//!
//! 1. Snapshot prior deposits that share the tx ref (or the id).
//! 2. Persist the raw deposit, unprocessed, insert-if-absent.
//! 3. Publish `deposit_received`.
//! 4. Verify. On failure publish `verification_result {valid: false}` and stop.
//! 5. Duplicate check against the snapshot, then claim the tx ref. Either
//!    one failing publishes `verification_result {reason: "duplicate"}` and stops.
//! 6. Publish `verification_result {valid: true}`.
//! 7. With auto-mint on: classify, mint, publish `attestation_minted` or
//!    `mint_failed`.
//!
//! Nothing here ever goes back to an earlier stage. Storage errors abort
//! the event and propagate; everything else is an outcome, not an error.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::admin::{AdminError, AdminGate};
use crate::config::PipelineConfig;
use crate::dedup::is_duplicate;
use crate::events::{EventBus, PipelineEvent};
use crate::minter::{AttestationMinter, MintOutcome};
use crate::storage::{DbError, DepositStore};
use crate::tier::{TierAssignment, TierTable};
use crate::types::{Deposit, DepositEvent};
use crate::verifier::{DepositVerifier, Rejection};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Failed verification or was a duplicate. Final.
    Rejected(Rejection),
    /// Passed; auto-mint is off.
    Verified,
    Minted {
        assignment: TierAssignment,
        attestation_id: String,
        token_id: String,
    },
    /// Passed, but minting failed. The deposit stays unprocessed.
    MintFailed {
        assignment: TierAssignment,
        error: String,
    },
}

pub struct DepositPipeline {
    config: PipelineConfig,
    store: Arc<dyn DepositStore>,
    verifier: DepositVerifier,
    minter: Arc<AttestationMinter>,
    bus: EventBus,
    admin: AdminGate,
}

impl DepositPipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn DepositStore>,
        verifier: DepositVerifier,
        minter: Arc<AttestationMinter>,
        bus: EventBus,
        admin: AdminGate,
    ) -> Self {
        Self {
            config,
            store,
            verifier,
            minter,
            bus,
            admin,
        }
    }

    /// Runs one event through every stage.
    pub async fn handle(&self, event: DepositEvent) -> Result<PipelineOutcome, PipelineError> {
        let deposit = Deposit::from_event(event, self.verifier.clock().now());

        let mut prior = self.store.deposits_by_tx_ref(&deposit.tx_ref)?;
        let existing = self.store.get_deposit(&deposit.id)?;
        if let Some(existing) = &existing {
            if existing.tx_ref != deposit.tx_ref {
                prior.push(existing.clone());
            }
        }

        // Subscribers see whatever record storage actually holds for the id.
        let received = if self.store.insert_deposit(&deposit)? {
            deposit.clone()
        } else {
            debug!(deposit_id = %deposit.id, "deposit id already stored, keeping original record");
            match existing {
                Some(stored) => stored,
                None => self
                    .store
                    .get_deposit(&deposit.id)?
                    .unwrap_or_else(|| deposit.clone()),
            }
        };
        self.bus
            .publish(PipelineEvent::DepositReceived { deposit: received });

        if let Err(rejection) = self.verifier.check(&deposit) {
            info!(deposit_id = %deposit.id, reason = %rejection, "deposit rejected");
            return Ok(self.reject(&deposit, rejection));
        }

        if is_duplicate(&deposit, &prior) || !self.store.claim_tx_ref(&deposit.tx_ref, &deposit.id)? {
            info!(deposit_id = %deposit.id, tx_ref = %deposit.tx_ref, "duplicate deposit");
            return Ok(self.reject(&deposit, Rejection::Duplicate));
        }

        self.bus.publish(PipelineEvent::VerificationResult {
            deposit_id: deposit.id.clone(),
            valid: true,
            reason: None,
        });

        if !self.config.auto_mint {
            debug!(deposit_id = %deposit.id, "verified, auto-mint off");
            return Ok(PipelineOutcome::Verified);
        }

        let assignment = self.classify(&deposit);
        let uri = self.config.metadata_uri_for(&deposit.id);
        let outcome = self
            .minter
            .mint(&deposit, &assignment.tier, uri.as_deref())
            .await;
        Ok(self.announce_mint(&deposit, &deposit.wallet, assignment, outcome))
    }

    /// Consumes events until the queue closes or shutdown is signalled.
    /// Events are handled strictly one at a time. On shutdown the queue is
    /// closed to new events and whatever was already accepted is handled
    /// before returning. Dropping the shutdown sender counts as shutdown.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<DepositEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(auto_mint = self.config.auto_mint, "deposit pipeline running");
        loop {
            let event = tokio::select! {
                next = events.recv() => match next {
                    Some(event) => event,
                    None => {
                        info!("deposit queue closed, pipeline exiting");
                        return;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("pipeline received shutdown signal");
                        break;
                    }
                    continue;
                }
            };
            self.process(event).await;
        }

        events.close();
        let mut drained = 0usize;
        while let Some(event) = events.recv().await {
            self.process(event).await;
            drained += 1;
        }
        info!(drained, "deposit queue drained, pipeline exiting");
    }

    async fn process(&self, event: DepositEvent) {
        let deposit_id = event.id.clone();
        match self.handle(event).await {
            Ok(outcome) => debug!(deposit_id = %deposit_id, ?outcome, "event handled"),
            Err(e) => error!(deposit_id = %deposit_id, error = %e, "event aborted"),
        }
    }

    /// Administrative mint of a stored deposit to `recipient`, bypassing
    /// verification and the auto-mint setting.
    pub async fn force_mint(
        &self,
        credential: &str,
        recipient: &str,
        deposit_id: &str,
    ) -> Result<MintOutcome, AdminError> {
        self.admin.authorize(credential)?;
        if !self.verifier.wallet_is_valid(recipient) {
            return Err(AdminError::InvalidRecipient(recipient.to_string()));
        }
        let deposit = self
            .store
            .get_deposit(deposit_id)?
            .ok_or_else(|| AdminError::NotFound(deposit_id.to_string()))?;

        warn!(deposit_id, recipient, "administrative mint requested");
        let assignment = self.classify(&deposit);
        let uri = self.config.metadata_uri_for(&deposit.id);
        let outcome = self
            .minter
            .mint_to(&deposit, recipient, &assignment.tier, uri.as_deref())
            .await;

        self.announce_mint(&deposit, recipient, assignment, outcome.clone());
        Ok(outcome)
    }

    fn reject(&self, deposit: &Deposit, rejection: Rejection) -> PipelineOutcome {
        self.bus.publish(PipelineEvent::VerificationResult {
            deposit_id: deposit.id.clone(),
            valid: false,
            reason: Some(rejection.to_string()),
        });
        PipelineOutcome::Rejected(rejection)
    }

    fn classify(&self, deposit: &Deposit) -> TierAssignment {
        let assignment = self.config.tiers.classify(deposit.amount);
        if !assignment.is_tiered() {
            warn!(deposit_id = %deposit.id, "deposit below every tier threshold, minting as No Tier");
        }
        assignment
    }

    fn announce_mint(
        &self,
        deposit: &Deposit,
        recipient: &str,
        assignment: TierAssignment,
        outcome: MintOutcome,
    ) -> PipelineOutcome {
        match outcome {
            MintOutcome::Minted {
                attestation_id,
                token_id,
            } => {
                self.bus.publish(PipelineEvent::AttestationMinted {
                    deposit_id: deposit.id.clone(),
                    recipient: recipient.to_string(),
                    tier: assignment.tier.clone(),
                    token_id: token_id.clone(),
                });
                PipelineOutcome::Minted {
                    assignment,
                    attestation_id,
                    token_id,
                }
            }
            MintOutcome::Failed { error } => {
                warn!(deposit_id = %deposit.id, error = %error, "mint failed");
                self.bus.publish(PipelineEvent::MintFailed {
                    deposit_id: deposit.id.clone(),
                    error: error.clone(),
                });
                PipelineOutcome::MintFailed { assignment, error }
            }
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tiers(&self) -> &TierTable {
        &self.config.tiers
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn verifier(&self) -> &DepositVerifier {
        &self.verifier
    }

    pub fn minter(&self) -> &Arc<AttestationMinter> {
        &self.minter
    }

    pub fn admin_enabled(&self) -> bool {
        self.admin.is_enabled()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::{MinterConfig, VerifierConfig, NO_TIER};
    use crate::minter::{CapabilityError, MintRequest, MintingCapability};
    use crate::storage::TesseraDB;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    const ALICE: &str = "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
    const CAROL: &str = "0xCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC";

    #[derive(Default)]
    struct CountingCapability {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl MintingCapability for CountingCapability {
        fn name(&self) -> &str {
            "counting"
        }

        async fn mint(&self, _request: &MintRequest) -> Result<String, CapabilityError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(CapabilityError::new("contract reverted"));
            }
            Ok(n.to_string())
        }
    }

    struct Harness {
        pipeline: DepositPipeline,
        db: Arc<TesseraDB>,
        cap: Arc<CountingCapability>,
        clock: ManualClock,
    }

    fn harness(auto_mint: bool) -> Harness {
        let db = Arc::new(TesseraDB::open_temporary().unwrap());
        let cap = Arc::new(CountingCapability::default());
        let clock = ManualClock::new(Utc::now());
        let verifier =
            DepositVerifier::with_config(VerifierConfig::default(), Arc::new(clock.clone()));
        let minter = Arc::new(AttestationMinter::new(
            db.clone(),
            cap.clone(),
            MinterConfig::default(),
            Arc::new(clock.clone()),
        ));
        let config = PipelineConfig {
            auto_mint,
            metadata_uri_base: Some("ipfs://tessera".into()),
            ..PipelineConfig::default()
        };
        let pipeline = DepositPipeline::new(
            config,
            db.clone(),
            verifier,
            minter,
            EventBus::new(64),
            AdminGate::new(Some("admin-key")),
        );
        Harness {
            pipeline,
            db,
            cap,
            clock,
        }
    }

    fn event(id: &str, tx_ref: &str, amount: f64, h: &Harness) -> DepositEvent {
        DepositEvent {
            id: id.into(),
            tx_ref: tx_ref.into(),
            wallet: ALICE.into(),
            amount,
            currency: "ETH".into(),
            observed_at: h.clock.now(),
        }
    }

    fn drain(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn valid_deposit_is_minted_and_announced() {
        let h = harness(true);
        let mut rx = h.pipeline.bus().subscribe();

        let outcome = h.pipeline.handle(event("d1", "0x01", 42.0, &h)).await.unwrap();
        let PipelineOutcome::Minted { assignment, attestation_id, .. } = outcome else {
            panic!("expected mint, got {outcome:?}");
        };
        assert_eq!(assignment.tier, "Tier B");
        assert_eq!(assignment.bucketed_amount, 10.0);

        let att = h.db.get_attestation(&attestation_id).unwrap().unwrap();
        assert_eq!(
            att.parsed_metadata().unwrap().metadata_uri.as_deref(),
            Some("ipfs://tessera/d1")
        );

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], PipelineEvent::DepositReceived { .. }));
        assert!(matches!(events[1], PipelineEvent::VerificationResult { valid: true, .. }));
        assert!(matches!(
            &events[2],
            PipelineEvent::AttestationMinted { tier, .. } if tier == "Tier B"
        ));
    }

    #[tokio::test]
    async fn invalid_deposit_is_persisted_but_stops() {
        let h = harness(true);
        let mut rx = h.pipeline.bus().subscribe();

        let outcome = h.pipeline.handle(event("d1", "0x01", 0.0, &h)).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Rejected(Rejection::NonPositiveAmount));

        let stored = h.db.get_deposit("d1").unwrap().expect("raw deposit persisted");
        assert!(!stored.processed);
        assert_eq!(h.cap.calls.load(Ordering::SeqCst), 0);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            PipelineEvent::VerificationResult { valid: false, reason: Some(r), .. } if r.contains("amount")
        ));
    }

    #[tokio::test]
    async fn same_tx_ref_different_id_is_duplicate() {
        let h = harness(true);
        h.pipeline.handle(event("d1", "0x01", 5.0, &h)).await.unwrap();

        let mut rx = h.pipeline.bus().subscribe();
        let outcome = h.pipeline.handle(event("d2", "0x01", 5.0, &h)).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Rejected(Rejection::Duplicate));
        assert_eq!(h.cap.calls.load(Ordering::SeqCst), 1);

        let events = drain(&mut rx);
        assert!(matches!(
            &events[1],
            PipelineEvent::VerificationResult { reason: Some(r), .. } if r == "duplicate"
        ));
    }

    #[tokio::test]
    async fn redelivery_does_not_reset_processed_flag() {
        let h = harness(true);
        let ev = event("d1", "0x01", 5.0, &h);
        h.pipeline.handle(ev.clone()).await.unwrap();
        assert!(h.db.get_deposit("d1").unwrap().unwrap().processed);

        let outcome = h.pipeline.handle(ev).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Rejected(Rejection::Duplicate));
        assert!(h.db.get_deposit("d1").unwrap().unwrap().processed);
        assert_eq!(h.db.attestation_count(), 1);
    }

    #[tokio::test]
    async fn auto_mint_off_stops_at_verified() {
        let h = harness(false);
        let outcome = h.pipeline.handle(event("d1", "0x01", 500.0, &h)).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Verified);
        assert_eq!(h.cap.calls.load(Ordering::SeqCst), 0);
        assert!(!h.db.get_deposit("d1").unwrap().unwrap().processed);
    }

    #[tokio::test]
    async fn mint_failure_is_broadcast_and_leaves_deposit_unprocessed() {
        let h = harness(true);
        h.cap.fail.store(true, Ordering::SeqCst);
        let mut rx = h.pipeline.bus().subscribe();

        let outcome = h.pipeline.handle(event("d1", "0x01", 5.0, &h)).await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::MintFailed { ref error, .. } if error == "contract reverted"));
        assert!(!h.db.get_deposit("d1").unwrap().unwrap().processed);

        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(PipelineEvent::MintFailed { .. })));
    }

    #[tokio::test]
    async fn force_mint_requires_key_and_known_deposit() {
        let h = harness(false);
        h.pipeline.handle(event("d1", "0x01", 150.0, &h)).await.unwrap();

        assert!(matches!(
            h.pipeline.force_mint("wrong", CAROL, "d1").await,
            Err(AdminError::Unauthorized)
        ));
        assert!(matches!(
            h.pipeline.force_mint("admin-key", CAROL, "missing").await,
            Err(AdminError::NotFound(_))
        ));
        assert!(matches!(
            h.pipeline.force_mint("admin-key", "short", "d1").await,
            Err(AdminError::InvalidRecipient(_))
        ));
        assert_eq!(h.cap.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn force_mint_redirects_then_refuses_second_attempt() {
        let h = harness(false);
        h.pipeline.handle(event("d1", "0x01", 150.0, &h)).await.unwrap();

        let outcome = h.pipeline.force_mint("admin-key", CAROL, "d1").await.unwrap();
        assert!(outcome.is_success());
        let atts = h.db.attestations_by_wallet(CAROL).unwrap();
        assert_eq!(atts.len(), 1);
        assert_eq!(atts[0].tier, "Tier A");

        let again = h.pipeline.force_mint("admin-key", CAROL, "d1").await.unwrap();
        assert_eq!(
            again,
            MintOutcome::Failed {
                error: "deposit already processed".into()
            }
        );
    }

    #[tokio::test]
    async fn below_lowest_tier_still_mints() {
        let h = harness(true);
        let outcome = h.pipeline.handle(event("d1", "0x01", 0.5, &h)).await.unwrap();
        let PipelineOutcome::Minted { assignment, .. } = outcome else {
            panic!("expected mint");
        };
        assert_eq!(assignment.tier, NO_TIER);
        assert_eq!(assignment.bucketed_amount, 0.0);
    }

    #[tokio::test]
    async fn run_drains_queue_until_closed() {
        let h = harness(true);
        let (tx, rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = watch::channel(false);

        for i in 0..3 {
            tx.send(event(&format!("d{i}"), &format!("0x{i}"), 20.0, &h))
                .await
                .unwrap();
        }
        drop(tx);

        h.pipeline.run(rx, stop_rx).await;
        assert_eq!(h.db.attestation_count(), 3);
    }

    #[tokio::test]
    async fn run_finishes_accepted_events_after_shutdown() {
        let h = harness(true);
        let (tx, rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = watch::channel(false);

        for i in 0..5 {
            tx.send(event(&format!("d{i}"), &format!("0x{i}"), 20.0, &h))
                .await
                .unwrap();
        }
        stop_tx.send(true).unwrap();

        h.pipeline.run(rx, stop_rx).await;
        assert_eq!(h.db.deposit_count(), 5);
        assert_eq!(h.db.attestation_count(), 5);
        // The queue refuses anything new once draining starts.
        assert!(tx.try_send(event("late", "0xlate", 20.0, &h)).is_err());
    }

    #[tokio::test]
    async fn redelivered_id_announces_the_stored_record() {
        let h = harness(true);
        h.pipeline.handle(event("d1", "0x01", 5.0, &h)).await.unwrap();

        let mut rx = h.pipeline.bus().subscribe();
        let mut replay = event("d1", "0x01", 999.0, &h);
        replay.wallet = CAROL.into();
        h.pipeline.handle(replay).await.unwrap();

        let events = drain(&mut rx);
        let PipelineEvent::DepositReceived { deposit } = &events[0] else {
            panic!("expected deposit_received, got {:?}", events[0]);
        };
        assert_eq!(deposit.amount, 5.0);
        assert_eq!(deposit.wallet, ALICE);
        assert!(deposit.processed);
    }

    #[tokio::test]
    async fn tx_ref_claimed_elsewhere_is_duplicate() {
        let h = harness(true);
        assert!(h.db.claim_tx_ref("0x01", "someone-else").unwrap());

        let outcome = h.pipeline.handle(event("d1", "0x01", 5.0, &h)).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Rejected(Rejection::Duplicate));
        assert_eq!(h.cap.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let h = harness(true);
        let (_tx, rx) = mpsc::channel::<DepositEvent>(8);
        let (stop_tx, stop_rx) = watch::channel(false);

        stop_tx.send(true).unwrap();
        h.pipeline.run(rx, stop_rx).await;
    }
}
