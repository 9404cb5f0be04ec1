//! # Deposit Sources
//!
//! Anything that produces [`DepositEvent`]s. A source is started with the
//! sending half of the pipeline's bounded queue and pushes events into it
//! until stopped. The variant is picked once at startup from
//! [`SourceKind`]; nothing downstream knows which one is running.
//!
//! ```text
//! mock.rs    — synthetic deposits on a timer, for demos and soak tests
//! webhook.rs — deposits pushed in over HTTP through a WebhookHandle
//! ```

pub mod mock;
pub mod webhook;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::ConfigError;
use crate::types::DepositEvent;

pub use mock::MockSource;
pub use webhook::{WebhookHandle, WebhookSource};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("source already running")]
    AlreadyRunning,

    #[error("source is not running")]
    Stopped,

    #[error("deposit queue closed")]
    ChannelClosed,
}

/// A producer of deposit events, polymorphic over start/stop.
pub trait DepositSource: Send {
    fn name(&self) -> &'static str;

    /// Begins emitting into `sink`. Must be called from within a Tokio
    /// runtime.
    fn start(&mut self, sink: mpsc::Sender<DepositEvent>) -> Result<(), SourceError>;

    /// Stops emitting. Idempotent.
    fn stop(&mut self);
}

/// Which source to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Mock,
    Webhook,
}

impl SourceKind {
    /// Builds the source. Webhook sources also return the handle the HTTP
    /// layer pushes through.
    pub fn build(self, mock_interval: Duration) -> (Box<dyn DepositSource>, Option<WebhookHandle>) {
        match self {
            Self::Mock => (Box::new(MockSource::new(mock_interval)), None),
            Self::Webhook => {
                let source = WebhookSource::new();
                let handle = source.handle();
                (Box::new(source), Some(handle))
            }
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mock => write!(f, "mock"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "webhook" => Ok(Self::Webhook),
            other => Err(ConfigError::UnknownSource(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_parses_case_insensitively() {
        assert_eq!("mock".parse::<SourceKind>().unwrap(), SourceKind::Mock);
        assert_eq!(" Webhook ".parse::<SourceKind>().unwrap(), SourceKind::Webhook);
        assert!(matches!(
            "solana".parse::<SourceKind>(),
            Err(ConfigError::UnknownSource(_))
        ));
    }

    #[test]
    fn only_webhook_builds_a_handle() {
        let (mock, handle) = SourceKind::Mock.build(Duration::from_secs(1));
        assert_eq!(mock.name(), "mock");
        assert!(handle.is_none());

        let (hook, handle) = SourceKind::Webhook.build(Duration::from_secs(1));
        assert_eq!(hook.name(), "webhook");
        assert!(handle.is_some());
    }
}
