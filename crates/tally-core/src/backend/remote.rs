//! HTTP payment backend
//!
//! Talks to the REST service that owns payment persistence:
//!
//! - `GET  {base}/payments` pool of existing payments
//! - `POST {base}/payments` create
//! - `POST {base}/payments/{id}/reconcile` reconcile into an existing payment
//! - `POST {base}/imports/mapping` optional column-mapping suggestion
//! - `GET  {base}/health`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{ColumnMapping, ExistingPayment};

use super::types::{CreatedPayment, NewPayment};
use super::PaymentBackend;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct RemoteBackend {
    http_client: Client,
    base_url: String,
    token: Option<String>,
}

impl RemoteBackend {
    pub fn new(base_url: &str) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Self {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client with timeout, using defaults: {}", e);
                Client::new()
            });
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` on every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = self.authorized(builder).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Backend {
            status,
            message: error_message(status, &body),
        })
    }
}

/// Message from a JSON error payload, or a generic one
fn error_message(status: u16, body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
        error: Option<String>,
    }

    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("Request failed with status {}", status))
}

/// Bare list or `{ "data": [...] }` envelope
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Envelope { data: Vec<T> },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Bare(items) => items,
            Listing::Envelope { data } => data,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Created {
    Bare(CreatedPayment),
    Envelope { data: CreatedPayment },
}

#[derive(Serialize)]
struct MappingRequest<'a> {
    headers: &'a [String],
}

#[derive(Deserialize)]
struct MappingResponse {
    #[serde(default)]
    mappings: Option<Vec<ColumnMapping>>,
}

#[async_trait]
impl PaymentBackend for RemoteBackend {
    async fn list_payments(&self) -> Result<Vec<ExistingPayment>> {
        let url = format!("{}/payments", self.base_url);
        debug!("GET {}", url);
        let response = self.send(self.http_client.get(&url)).await?;
        let listing: Listing<ExistingPayment> = response.json().await?;
        Ok(listing.into_vec())
    }

    async fn create_payment(&self, payment: &NewPayment) -> Result<CreatedPayment> {
        let url = format!("{}/payments", self.base_url);
        let response = self.send(self.http_client.post(&url).json(payment)).await?;
        let created: Created = response.json().await?;
        Ok(match created {
            Created::Bare(c) => c,
            Created::Envelope { data } => data,
        })
    }

    async fn reconcile_payment(&self, payment_id: &str, payment: &NewPayment) -> Result<()> {
        let url = format!("{}/payments/{}/reconcile", self.base_url, payment_id);
        self.send(self.http_client.post(&url).json(payment)).await?;
        Ok(())
    }

    async fn suggest_mapping(&self, headers: &[String]) -> Result<Option<Vec<ColumnMapping>>> {
        let url = format!("{}/imports/mapping", self.base_url);
        let response = self
            .send(self.http_client.post(&url).json(&MappingRequest { headers }))
            .await?;
        let body: MappingResponse = response.json().await?;
        Ok(body.mappings)
    }

    async fn health_check(&self) -> bool {
        match self
            .authorized(self.http_client.get(format!("{}/health", self.base_url)))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Backend health check failed: {}", e);
                false
            }
        }
    }

    fn name(&self) -> &str {
        "remote"
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}
