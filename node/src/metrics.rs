//! # Prometheus Metrics
//!
//! Pipeline counters, scraped at `/metrics` on the metrics port.
//!
//! The counters are fed by [`record_events`], a task subscribed to the
//! core's event bus, so the pipeline itself never touches Prometheus.
//! All metrics live in a dedicated [`prometheus::Registry`] under the
//! `tessera` namespace.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use tessera_core::events::{EventBus, PipelineEvent};

/// Prometheus handles for the node.
#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    /// Every deposit event persisted.
    pub deposits_received_total: IntCounter,
    /// Deposits that failed verification (duplicates excluded).
    pub deposits_rejected_total: IntCounter,
    /// Deposits rejected as duplicates.
    pub duplicates_total: IntCounter,
    pub deposits_verified_total: IntCounter,
    pub attestations_minted_total: IntCounter,
    pub mint_failures_total: IntCounter,
    /// Wallets currently held by the rate limiter.
    pub rate_limited_wallets: IntGauge,
    /// Events the recorder missed because it fell behind the bus.
    pub events_lagged_total: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let c = IntCounter::new(name, help)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl PipelineMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("tessera".into()), None)?;

        let deposits_received_total = counter(
            &registry,
            "deposits_received_total",
            "Deposit events received and persisted",
        )?;
        let deposits_rejected_total = counter(
            &registry,
            "deposits_rejected_total",
            "Deposits that failed verification",
        )?;
        let duplicates_total = counter(
            &registry,
            "deposits_duplicate_total",
            "Deposits rejected as duplicates",
        )?;
        let deposits_verified_total = counter(
            &registry,
            "deposits_verified_total",
            "Deposits that passed verification and duplicate detection",
        )?;
        let attestations_minted_total = counter(
            &registry,
            "attestations_minted_total",
            "Soulbound attestations minted",
        )?;
        let mint_failures_total =
            counter(&registry, "mint_failures_total", "Failed mint attempts")?;
        let events_lagged_total = counter(
            &registry,
            "events_lagged_total",
            "Pipeline events dropped by the metrics recorder",
        )?;

        let rate_limited_wallets = IntGauge::new(
            "rate_limited_wallets",
            "Wallets with acceptances inside the current rate window",
        )?;
        registry.register(Box::new(rate_limited_wallets.clone()))?;

        Ok(Self {
            registry,
            deposits_received_total,
            deposits_rejected_total,
            duplicates_total,
            deposits_verified_total,
            attestations_minted_total,
            mint_failures_total,
            rate_limited_wallets,
            events_lagged_total,
        })
    }

    /// Bumps the counter matching `event`.
    pub fn observe(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::DepositReceived { .. } => self.deposits_received_total.inc(),
            PipelineEvent::VerificationResult { valid: true, .. } => {
                self.deposits_verified_total.inc()
            }
            PipelineEvent::VerificationResult { reason, .. } => {
                if reason.as_deref() == Some("duplicate") {
                    self.duplicates_total.inc();
                } else {
                    self.deposits_rejected_total.inc();
                }
            }
            PipelineEvent::AttestationMinted { .. } => self.attestations_minted_total.inc(),
            PipelineEvent::MintFailed { .. } => self.mint_failures_total.inc(),
        }
    }

    /// Encodes all registered metrics into the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<PipelineMetrics>;

/// Spawns the task that mirrors bus events into counters. Ends when the
/// bus is dropped.
pub fn record_events(metrics: SharedMetrics, bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => metrics.observe(&event),
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "metrics recorder lagged behind event bus");
                    metrics.events_lagged_total.inc_by(n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
