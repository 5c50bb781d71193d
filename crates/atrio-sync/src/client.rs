//! # Venue API Client
//!
//! The `ServerApi` trait is the terminal's only seam to the outside world;
//! `HttpServerApi` is the reqwest-backed production implementation. Tests
//! substitute an in-process fake.
//!
//! ## Status Code Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  HTTP status          →  SyncError                                      │
//! │  ──────────────────────────────────────────────────────────────────     │
//! │  2xx                  →  Ok(body)                                       │
//! │  401 / 403            →  InvalidCredential   (halts sync + heartbeat)   │
//! │  409 Conflict         →  PairingAlreadyClaimed                          │
//! │  410 Gone             →  PairingExpired                                 │
//! │  anything else        →  UnexpectedStatus    (5xx retryable)            │
//! │  no response at all   →  TransientNetwork    (retryable)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    ClaimGrant, DeviceConfigSnapshot, DeviceLoginRequest, DeviceLoginResponse, SyncBatchRequest,
    SyncBatchResponse,
};

// =============================================================================
// Server API Trait
// =============================================================================

/// Everything the terminal asks of the venue server.
///
/// Object-safe so the engine, monitor, and agent can share one
/// `Arc<dyn ServerApi>` and tests can inject a fake.
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Claims a pairing token (from the direct link / QR code).
    async fn claim_by_token(&self, token: &str) -> SyncResult<ClaimGrant>;

    /// Claims a pairing token by its human-readable "NNN-NNN" code.
    async fn claim_by_code(&self, code: &str) -> SyncResult<ClaimGrant>;

    /// Logs in with the device PIN. Repeatable; does not consume tokens.
    async fn login_with_pin(&self, device_id: &str, pin: &str)
        -> SyncResult<DeviceLoginResponse>;

    /// Submits a batch of queued sales.
    async fn submit_batch(
        &self,
        credential: &str,
        batch: &SyncBatchRequest,
    ) -> SyncResult<SyncBatchResponse>;

    /// Heartbeat. Success means the link and the credential are both good.
    async fn heartbeat(&self, credential: &str) -> SyncResult<()>;

    /// Fetches the device config snapshot.
    async fn device_config(&self, credential: &str) -> SyncResult<DeviceConfigSnapshot>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// reqwest-backed `ServerApi` against the venue API.
#[derive(Debug, Clone)]
pub struct HttpServerApi {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpServerApi {
    /// Builds a client from the sync configuration.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let base_url = Url::parse(&config.server.base_url)?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.server.connect_timeout_secs))
            .timeout(Duration::from_secs(config.server.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::Internal(e.to_string()))?;

        Ok(HttpServerApi { http, base_url })
    }

    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Maps non-success statuses to the protocol's error taxonomy.
    async fn check(response: reqwest::Response) -> SyncResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = %status, "Venue API returned an error status");

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(SyncError::InvalidCredential(body))
            }
            StatusCode::CONFLICT => Err(SyncError::PairingAlreadyClaimed),
            StatusCode::GONE => Err(SyncError::PairingExpired),
            other => Err(SyncError::UnexpectedStatus {
                status: other.as_u16(),
                body,
            }),
        }
    }
}

#[async_trait]
impl ServerApi for HttpServerApi {
    async fn claim_by_token(&self, token: &str) -> SyncResult<ClaimGrant> {
        let url = self.endpoint("api/pairing/claim")?;
        let response = self.http.get(url).query(&[("token", token)]).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn claim_by_code(&self, code: &str) -> SyncResult<ClaimGrant> {
        let url = self.endpoint("api/pairing/claim")?;
        let response = self.http.get(url).query(&[("code", code)]).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn login_with_pin(
        &self,
        device_id: &str,
        pin: &str,
    ) -> SyncResult<DeviceLoginResponse> {
        let url = self.endpoint("api/auth/device/login")?;
        let body = DeviceLoginRequest {
            device_id: device_id.to_string(),
            pin: pin.to_string(),
        };
        let response = self.http.post(url).json(&body).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn submit_batch(
        &self,
        credential: &str,
        batch: &SyncBatchRequest,
    ) -> SyncResult<SyncBatchResponse> {
        let url = self.endpoint("api/sync/batch")?;
        let response = self
            .http
            .post(url)
            .bearer_auth(credential)
            .json(batch)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn heartbeat(&self, credential: &str) -> SyncResult<()> {
        let url = self.endpoint("api/heartbeat")?;
        let response = self.http.post(url).bearer_auth(credential).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn device_config(&self, credential: &str) -> SyncResult<DeviceConfigSnapshot> {
        let url = self.endpoint("api/device/config")?;
        let response = self.http.get(url).bearer_auth(credential).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_url(url: &str) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.server.base_url = url.to_string();
        config
    }

    #[test]
    fn test_client_construction() {
        let api = HttpServerApi::new(&config_with_url("https://venue.example.com")).unwrap();
        let url = api.endpoint("api/sync/batch").unwrap();
        assert_eq!(url.as_str(), "https://venue.example.com/api/sync/batch");
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        assert!(matches!(
            HttpServerApi::new(&config_with_url("not a url")),
            Err(SyncError::InvalidUrl(_))
        ));
    }
}
