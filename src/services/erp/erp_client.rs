// ERP Gateway
// Boundary between the sync executor and an ERP system of record
// HttpErpClient speaks a generic JSON REST contract with bearer auth and explicit timeouts

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::services::erp::sync_configuration::ErpCredentials;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum ErpClientError {
    #[error("ERP API error ({0}): {1}")]
    ApiError(StatusCode, String),

    #[error("Authentication rejected by ERP")]
    AuthError,

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid ERP response: {0}")]
    InvalidResponse(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,
}

pub type Result<T> = std::result::Result<T, ErpClientError>;

// ============================================================================
// Wire Models
// ============================================================================

/// One vendor as reported by the ERP: its native id plus field/value pairs
#[derive(Debug, Clone, PartialEq)]
pub struct InboundVendor {
    pub erp_id: String,
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct VendorListResponse {
    #[serde(default)]
    vendors: BTreeMap<String, BTreeMap<String, Value>>,
}

/// Push payload: enabled fields plus identifiers
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundVendor {
    /// Canonical id under the current precedence policy
    pub id: String,
    pub composite_id: String,
    pub company_id: String,
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushStatus {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushAcknowledgement {
    pub status: PushStatus,
    #[serde(default)]
    pub erp_id: Option<String>,
}

// ============================================================================
// Gateway Trait
// ============================================================================

#[async_trait]
pub trait ErpGateway: Send + Sync {
    /// Cheap authenticated round-trip used by connection tests
    async fn ping(&self, credentials: &ErpCredentials) -> Result<()>;

    async fn fetch_vendors(&self, credentials: &ErpCredentials, company_id: &str) -> Result<Vec<InboundVendor>>;

    async fn push_vendor(&self, credentials: &ErpCredentials, vendor: &OutboundVendor) -> Result<PushAcknowledgement>;
}

// ============================================================================
// HTTP Client
// ============================================================================

pub struct HttpErpClient {
    http_client: Client,
}

impl HttpErpClient {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout.min(Duration::from_secs(10)))
            .build()?;

        Ok(Self { http_client })
    }

    fn url(credentials: &ErpCredentials, path: &str) -> Result<url::Url> {
        let base = format!("{}/", credentials.endpoint.trim_end_matches('/'));
        url::Url::parse(&base)
            .and_then(|base| base.join(path))
            .map_err(|e| ErpClientError::InvalidEndpoint(e.to_string()))
    }

    fn authorize(&self, request: reqwest::RequestBuilder, credentials: &ErpCredentials) -> reqwest::RequestBuilder {
        request
            .bearer_auth(credentials.api_key.expose())
            .header("X-ERP-System", credentials.erp_system.as_str())
            .header("Accept", "application/json")
    }

    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ErpClientError::AuthError),
            StatusCode::TOO_MANY_REQUESTS => Err(ErpClientError::RateLimitExceeded),
            _ => Err(ErpClientError::ApiError(status, truncate(&error_text, 200))),
        }
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ErpClientError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ErpGateway for HttpErpClient {
    async fn ping(&self, credentials: &ErpCredentials) -> Result<()> {
        let url = Self::url(credentials, "ping")?;
        let response = self.authorize(self.http_client.get(url), credentials).send().await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn fetch_vendors(&self, credentials: &ErpCredentials, company_id: &str) -> Result<Vec<InboundVendor>> {
        let url = Self::url(credentials, "vendors")?;
        let request = self
            .http_client
            .get(url)
            .query(&[("companyId", company_id)]);
        let response = self.authorize(request, credentials).send().await?;
        let response = Self::check_status(response).await?;
        let list: VendorListResponse = Self::parse_json(response).await?;

        Ok(list
            .vendors
            .into_iter()
            .map(|(erp_id, fields)| InboundVendor { erp_id, fields })
            .collect())
    }

    async fn push_vendor(&self, credentials: &ErpCredentials, vendor: &OutboundVendor) -> Result<PushAcknowledgement> {
        let url = Self::url(credentials, "vendors")?;
        let request = self.http_client.post(url).json(vendor);
        let response = self.authorize(request, credentials).send().await?;
        let response = Self::check_status(response).await?;
        Self::parse_json(response).await
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push('…');
        cut
    }
}
