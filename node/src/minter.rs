//! # Remote Minting Capability
//!
//! Mints through an external HTTP service instead of the in-process
//! registry. The service receives the core's `MintRequest` as JSON with a
//! bearer key and answers `{"token_id": ...}` (string or integer).
//!
//! A remote minter without an endpoint or key is a startup error; the node
//! refuses to run rather than fail every mint later.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use tessera_core::minter::{CapabilityError, MintRequest, MintingCapability};

/// Transport-level timeout. The core applies its own mint timeout on top.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct MintResponse {
    token_id: serde_json::Value,
}

pub struct RemoteMinter {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl RemoteMinter {
    pub fn new(endpoint: Option<String>, api_key: Option<String>) -> Result<Self> {
        let Some(endpoint) = endpoint.filter(|e| !e.trim().is_empty()) else {
            bail!("remote minter requires --mint-endpoint (TESSERA_MINT_ENDPOINT)");
        };
        let Some(api_key) = api_key.filter(|k| !k.is_empty()) else {
            bail!("remote minter requires --mint-api-key (TESSERA_MINT_API_KEY)");
        };
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            endpoint,
            api_key,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl MintingCapability for RemoteMinter {
    fn name(&self) -> &str {
        "remote"
    }

    async fn mint(&self, request: &MintRequest) -> Result<String, CapabilityError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| CapabilityError::new(format!("mint request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::new(format!(
                "mint endpoint returned {status}: {}",
                body.trim()
            )));
        }

        let parsed: MintResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::new(format!("invalid mint response: {e}")))?;

        match parsed.token_id {
            serde_json::Value::String(s) if !s.is_empty() => Ok(s),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            other => Err(CapabilityError::new(format!(
                "invalid mint response: unusable token_id {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, http::StatusCode, routing::post, Json, Router};

    #[test]
    fn missing_endpoint_or_key_is_fatal() {
        assert!(RemoteMinter::new(None, Some("k".into())).is_err());
        assert!(RemoteMinter::new(Some("  ".into()), Some("k".into())).is_err());
        assert!(RemoteMinter::new(Some("http://x".into()), None).is_err());
        assert!(RemoteMinter::new(Some("http://x".into()), Some(String::new())).is_err());
        assert!(RemoteMinter::new(Some("http://x".into()), Some("k".into())).is_ok());
    }

    /// Serves a fake mint endpoint on an ephemeral port.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/mint")
    }

    fn request() -> MintRequest {
        MintRequest {
            recipient: "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".into(),
            tier: "Tier A".into(),
            metadata_uri: None,
        }
    }

    #[tokio::test]
    async fn posts_request_with_bearer_key() {
        let router = Router::new().route(
            "/mint",
            post(|headers: HeaderMap, Json(req): Json<MintRequest>| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    == Some("Bearer secret");
                if !authorized || req.tier != "Tier A" {
                    return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({})));
                }
                (StatusCode::OK, Json(serde_json::json!({ "token_id": 77 })))
            }),
        );
        let url = serve(router).await;

        let minter = RemoteMinter::new(Some(url), Some("secret".into())).unwrap();
        assert_eq!(minter.mint(&request()).await.unwrap(), "77");
    }

    #[tokio::test]
    async fn error_status_becomes_capability_error() {
        let router = Router::new().route(
            "/mint",
            post(|| async { (StatusCode::BAD_GATEWAY, "chain unavailable") }),
        );
        let url = serve(router).await;

        let minter = RemoteMinter::new(Some(url), Some("secret".into())).unwrap();
        let err = minter.mint(&request()).await.unwrap_err();
        assert!(err.message.contains("502"));
        assert!(err.message.contains("chain unavailable"));
    }
}
