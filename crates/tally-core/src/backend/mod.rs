//! Payment backend abstraction
//!
//! The import pipeline never persists anything itself. Existing payments
//! (the match pool), payment creation, reconciliation and optional mapping
//! suggestions all go through a [`PaymentBackend`].
//!
//! - `PaymentBackend` trait: the operations the import session needs
//! - `BackendClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Implementations: `RemoteBackend` (HTTP), `MemoryBackend` (in-process)
//!
//! # Configuration
//!
//! See [`crate::config::BackendConfig`]. Environment variables:
//! - `TALLY_BACKEND`: `remote` or `memory`
//! - `TALLY_BACKEND_URL`: base URL for the remote backend
//! - `TALLY_BACKEND_TOKEN`: bearer token (variable name configurable)

mod memory;
mod remote;
pub mod types;

pub use memory::MemoryBackend;
pub use remote::{RemoteBackend, DEFAULT_TIMEOUT_SECS};
pub use types::{CreatedPayment, NewPayment};

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::{BackendConfig, BackendKind};
use crate::error::{Error, Result};
use crate::models::{ColumnMapping, ExistingPayment};

/// Operations the import pipeline needs from the payment service
#[async_trait]
pub trait PaymentBackend: Send + Sync {
    /// Existing payments to match imported rows against
    async fn list_payments(&self) -> Result<Vec<ExistingPayment>>;

    /// Create a payment from an imported row
    async fn create_payment(&self, payment: &NewPayment) -> Result<CreatedPayment>;

    /// Reconcile an imported row into an existing payment
    async fn reconcile_payment(&self, payment_id: &str, payment: &NewPayment) -> Result<()>;

    /// Column mapping proposed by the backend, if it has one
    async fn suggest_mapping(&self, headers: &[String]) -> Result<Option<Vec<ColumnMapping>>>;

    /// Check if the backend is available
    async fn health_check(&self) -> bool;

    /// Backend kind (for logging)
    fn name(&self) -> &str;

    /// Host URL (for logging)
    fn host(&self) -> &str;
}

/// Concrete backend client enum
#[derive(Clone)]
pub enum BackendClient {
    Remote(RemoteBackend),
    Memory(MemoryBackend),
}

impl BackendClient {
    /// Build a client from configuration
    ///
    /// The remote backend needs a URL; its bearer token is read from the
    /// environment variable named by `token_env`, when set.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        match config.kind {
            BackendKind::Memory => Ok(Self::memory()),
            BackendKind::Remote => {
                let url = config.url.as_deref().filter(|u| !u.trim().is_empty()).ok_or_else(|| {
                    Error::Config(
                        "backend.url (or TALLY_BACKEND_URL) is required for the remote backend"
                            .into(),
                    )
                })?;
                let mut backend =
                    RemoteBackend::with_timeout(url, Duration::from_secs(config.timeout_secs));
                if let Ok(token) = std::env::var(&config.token_env) {
                    if !token.is_empty() {
                        backend = backend.with_token(token);
                    }
                }
                info!(host = %backend.host(), "Using remote payment backend");
                Ok(Self::Remote(backend))
            }
        }
    }

    pub fn remote(base_url: &str) -> Self {
        Self::Remote(RemoteBackend::new(base_url))
    }

    pub fn memory() -> Self {
        Self::Memory(MemoryBackend::new())
    }
}

#[async_trait]
impl PaymentBackend for BackendClient {
    async fn list_payments(&self) -> Result<Vec<ExistingPayment>> {
        match self {
            BackendClient::Remote(b) => b.list_payments().await,
            BackendClient::Memory(b) => b.list_payments().await,
        }
    }

    async fn create_payment(&self, payment: &NewPayment) -> Result<CreatedPayment> {
        match self {
            BackendClient::Remote(b) => b.create_payment(payment).await,
            BackendClient::Memory(b) => b.create_payment(payment).await,
        }
    }

    async fn reconcile_payment(&self, payment_id: &str, payment: &NewPayment) -> Result<()> {
        match self {
            BackendClient::Remote(b) => b.reconcile_payment(payment_id, payment).await,
            BackendClient::Memory(b) => b.reconcile_payment(payment_id, payment).await,
        }
    }

    async fn suggest_mapping(&self, headers: &[String]) -> Result<Option<Vec<ColumnMapping>>> {
        match self {
            BackendClient::Remote(b) => b.suggest_mapping(headers).await,
            BackendClient::Memory(b) => b.suggest_mapping(headers).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            BackendClient::Remote(b) => b.health_check().await,
            BackendClient::Memory(b) => b.health_check().await,
        }
    }

    fn name(&self) -> &str {
        match self {
            BackendClient::Remote(b) => b.name(),
            BackendClient::Memory(b) => b.name(),
        }
    }

    fn host(&self) -> &str {
        match self {
            BackendClient::Remote(b) => b.host(),
            BackendClient::Memory(b) => b.host(),
        }
    }
}
