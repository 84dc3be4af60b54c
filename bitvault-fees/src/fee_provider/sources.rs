//! Fee sources
//!
//! - GET  {base}/api/v1/fees/recommended   (mempool.space)
//! - POST {endpoint}  `estimatesmartfee [6, "economical"]`   (QuickNode JSON-RPC)
//! - static rates, never fails
//!
//! HTTP 451 is reported as [`ProviderError::LegalRestriction`], which the
//! chain's breaker treats as permanent.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::types::{FeeConfidence, MempoolFees, ProviderError, RawFeeResponse, SmartFeeResponse};
use crate::config::StaticFallbackRates;

/// Default per-request timeout of the HTTP sources
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// A provider of raw fee data
#[async_trait]
pub trait FeeSource: Send + Sync {
    /// Provider name, also the name of its breaker
    fn name(&self) -> &str;

    /// Highest confidence an estimate from this source may carry
    fn confidence(&self) -> FeeConfidence {
        FeeConfidence::High
    }

    async fn fetch(&self) -> Result<RawFeeResponse, ProviderError>;
}

fn build_client() -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("bitvault-fees/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {}", e)))
}

async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status == StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::LegalRestriction(format!(
            "HTTP 451 from {}",
            if body.is_empty() { "provider" } else { body.trim() }
        )));
    }
    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            message: status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string(),
        });
    }
    Ok(response)
}

/// mempool.space-compatible REST source
#[derive(Debug, Clone)]
pub struct MempoolSpaceSource {
    name: String,
    base_url: String,
    client: Client,
}

impl MempoolSpaceSource {
    pub const DEFAULT_BASE_URL: &'static str = "https://mempool.space";

    pub fn new(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self::with_client(base_url, build_client()?))
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            name: "mempool".to_string(),
            base_url,
            client,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/v1/fees/recommended", self.base_url)
    }
}

#[async_trait]
impl FeeSource for MempoolSpaceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<RawFeeResponse, ProviderError> {
        let url = self.endpoint();
        debug!("Fetching recommended fees from {}", url);

        let response = check_status(self.client.get(&url).send().await?).await?;
        let fees: MempoolFees = response.json().await?;
        Ok(RawFeeResponse::Mempool(fees))
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'a str,
    id: &'a str,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct RpcEnvelope {
    result: Option<SmartFeeResponse>,
    error: Option<RpcErrorDetail>,
}

#[derive(Deserialize)]
struct RpcErrorDetail {
    code: i64,
    message: String,
}

/// Bitcoin Core JSON-RPC source (QuickNode)
#[derive(Debug, Clone)]
pub struct QuickNodeSource {
    name: String,
    endpoint: String,
    client: Client,
    conf_target: u32,
}

impl QuickNodeSource {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self::with_client(endpoint, build_client()?))
    }

    pub fn with_client(endpoint: impl Into<String>, client: Client) -> Self {
        Self {
            name: "quicknode".to_string(),
            endpoint: endpoint.into(),
            client,
            conf_target: 6,
        }
    }

    /// Confirmation target passed to `estimatesmartfee`
    pub fn with_conf_target(mut self, blocks: u32) -> Self {
        self.conf_target = blocks;
        self
    }
}

#[async_trait]
impl FeeSource for QuickNodeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<RawFeeResponse, ProviderError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: "bitvault-fees",
            method: "estimatesmartfee",
            params: json!([self.conf_target, "economical"]),
        };
        debug!("Calling estimatesmartfee (target {} blocks)", self.conf_target);

        let response = check_status(
            self.client
                .post(&self.endpoint)
                .json(&request)
                .send()
                .await?,
        )
        .await?;
        let envelope: RpcEnvelope = response.json().await?;

        if let Some(err) = envelope.error {
            return Err(ProviderError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        envelope
            .result
            .map(RawFeeResponse::QuickNode)
            .ok_or_else(|| ProviderError::MalformedResponse("missing result".to_string()))
    }
}

/// Fixed rates, for offline use and tests
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    rates: StaticFallbackRates,
}

impl StaticSource {
    pub fn new(rates: StaticFallbackRates) -> Self {
        Self { rates }
    }
}

#[async_trait]
impl FeeSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    fn confidence(&self) -> FeeConfidence {
        FeeConfidence::Low
    }

    async fn fetch(&self) -> Result<RawFeeResponse, ProviderError> {
        Ok(RawFeeResponse::Static(self.rates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mempool_endpoint() {
        let source = MempoolSpaceSource::with_client("https://mempool.space/", Client::new());
        assert_eq!(
            source.endpoint(),
            "https://mempool.space/api/v1/fees/recommended"
        );
        assert_eq!(source.name(), "mempool");
    }

    #[test]
    fn test_rpc_request_shape() {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: "bitvault-fees",
            method: "estimatesmartfee",
            params: json!([6, "economical"]),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["method"], "estimatesmartfee");
        assert_eq!(value["params"][1], "economical");
    }

    #[test]
    fn test_rpc_envelope_parsing() {
        let envelope: RpcEnvelope = serde_json::from_str(
            r#"{"result":{"feerate":0.0001,"blocks":6},"error":null,"id":"x"}"#,
        )
        .unwrap();
        let result = envelope.result.unwrap();
        assert_eq!(result.blocks, Some(6));
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_static_source_never_fails() {
        let source = StaticSource::default();
        let raw = source.fetch().await.unwrap();
        assert_eq!(raw.kind(), "static");
        assert_eq!(source.confidence(), FeeConfidence::Low);
    }
}
