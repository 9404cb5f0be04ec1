//! Push-based source: deposits arrive over HTTP.
//!
//! The source itself does no I/O. It hands out a [`WebhookHandle`], and
//! whatever receives the webhook (the node's `POST /deposits` route) calls
//! [`WebhookHandle::submit`]. Stopping the source closes every handle.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::info;

use super::{DepositSource, SourceError};
use crate::types::DepositEvent;

type Slot = Arc<RwLock<Option<mpsc::Sender<DepositEvent>>>>;

#[derive(Debug, Default)]
pub struct WebhookSource {
    slot: Slot,
}

impl WebhookSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> WebhookHandle {
        WebhookHandle {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl DepositSource for WebhookSource {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn start(&mut self, sink: mpsc::Sender<DepositEvent>) -> Result<(), SourceError> {
        let mut slot = self.slot.write();
        if slot.is_some() {
            return Err(SourceError::AlreadyRunning);
        }
        *slot = Some(sink);
        info!("webhook source accepting deposits");
        Ok(())
    }

    fn stop(&mut self) {
        if self.slot.write().take().is_some() {
            info!("webhook source stopped");
        }
    }
}

/// Cloneable entry point into a running [`WebhookSource`].
#[derive(Debug, Clone)]
pub struct WebhookHandle {
    slot: Slot,
}

impl WebhookHandle {
    /// Queues `event` for the pipeline. Waits if the queue is full.
    pub async fn submit(&self, event: DepositEvent) -> Result<(), SourceError> {
        // Clone out of the lock so it is not held across the await.
        let sender = self.slot.read().clone().ok_or(SourceError::Stopped)?;
        sender
            .send(event)
            .await
            .map_err(|_| SourceError::ChannelClosed)
    }

    pub fn is_open(&self) -> bool {
        self.slot.read().is_some()
    }
}
