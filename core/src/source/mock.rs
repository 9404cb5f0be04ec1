//! Synthetic deposit generator.
//!
//! Emits one deposit per interval from a small fixed set of wallets, with
//! random amounts and fresh transaction refs. Useful for exercising the
//! whole pipeline without a chain.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::{DepositSource, SourceError};
use crate::types::DepositEvent;

const MOCK_WALLETS: usize = 3;
const MOCK_CURRENCY: &str = "ETH";

pub struct MockSource {
    interval: Duration,
    wallets: Vec<String>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl MockSource {
    pub fn new(interval: Duration) -> Self {
        let mut rng = rand::thread_rng();
        let wallets = (0..MOCK_WALLETS)
            .map(|_| {
                let bytes: [u8; 20] = rng.gen();
                format!("0x{}", hex::encode(bytes))
            })
            .collect();
        Self::with_wallets(interval, wallets)
    }

    pub fn with_wallets(interval: Duration, wallets: Vec<String>) -> Self {
        Self {
            interval,
            wallets,
            stop_tx: None,
            task: None,
        }
    }

    pub fn wallets(&self) -> &[String] {
        &self.wallets
    }

    /// One random deposit from `wallets`. Amounts fall in `[0.1, 500)`
    /// rounded to cents, so every tier (and "No Tier") shows up.
    pub fn synthetic_event(wallets: &[String]) -> DepositEvent {
        let mut rng = rand::thread_rng();
        let wallet = wallets
            .get(rng.gen_range(0..wallets.len().max(1)))
            .cloned()
            .unwrap_or_default();
        let tx_bytes: [u8; 32] = rng.gen();
        let amount: f64 = rng.gen_range(0.1..500.0);

        DepositEvent {
            id: Uuid::new_v4().to_string(),
            tx_ref: format!("0x{}", hex::encode(tx_bytes)),
            wallet,
            amount: (amount * 100.0).round() / 100.0,
            currency: MOCK_CURRENCY.to_string(),
            observed_at: Utc::now(),
        }
    }
}

impl DepositSource for MockSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn start(&mut self, sink: mpsc::Sender<DepositEvent>) -> Result<(), SourceError> {
        if self.stop_tx.is_some() {
            return Err(SourceError::AlreadyRunning);
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let wallets = self.wallets.clone();
        let interval = self.interval;

        info!(interval_ms = interval.as_millis() as u64, "mock source started");
        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_rx.changed() => break,
                }
                if *stop_rx.borrow() {
                    break;
                }

                let event = Self::synthetic_event(&wallets);
                debug!(deposit_id = %event.id, amount = event.amount, "mock deposit emitted");
                if sink.send(event).await.is_err() {
                    // Pipeline gone.
                    break;
                }
            }
            debug!("mock source loop exited");
        }));
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(true);
            info!("mock source stopped");
        }
        self.task = None;
    }
}

impl Drop for MockSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_events_are_well_formed() {
        let source = MockSource::new(Duration::from_secs(1));
        assert_eq!(source.wallets().len(), MOCK_WALLETS);

        for _ in 0..50 {
            let ev = MockSource::synthetic_event(source.wallets());
            assert!(source.wallets().contains(&ev.wallet));
            assert_eq!(ev.wallet.len(), 42);
            assert_eq!(ev.tx_ref.len(), 66);
            assert!(ev.amount >= 0.1 && ev.amount <= 500.0);
            assert_eq!(ev.currency, "ETH");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emits_on_interval_until_stopped() {
        let mut source = MockSource::new(Duration::from_secs(10));
        let (tx, mut rx) = mpsc::channel(16);
        source.start(tx).unwrap();
        assert_eq!(
            source.start(mpsc::channel(1).0),
            Err(SourceError::AlreadyRunning)
        );

        let first = rx.recv().await.expect("first event");
        let second = rx.recv().await.expect("second event");
        assert_ne!(first.tx_ref, second.tx_ref);

        source.stop();
        // The task drops its sender once it sees the stop signal.
        while rx.recv().await.is_some() {}
    }
}
