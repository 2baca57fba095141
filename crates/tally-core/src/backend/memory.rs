//! In-process payment backend
//!
//! Keeps payments in memory. Used for offline runs, demos and tests;
//! failures can be injected per description to exercise the confirm step.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{ColumnMapping, ExistingPayment};

use super::types::{CreatedPayment, NewPayment};
use super::PaymentBackend;

#[derive(Default)]
struct Store {
    payments: Vec<ExistingPayment>,
    created: Vec<NewPayment>,
    reconciled: Vec<(String, NewPayment)>,
    failing: Vec<String>,
    suggestion: Option<Vec<ColumnMapping>>,
    next_id: u64,
}

/// Memory-backed payment store (clones share state)
#[derive(Clone)]
pub struct MemoryBackend {
    store: Arc<Mutex<Store>>,
    /// Whether health_check should return true
    pub healthy: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty, healthy backend
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            healthy: true,
        }
    }

    /// Create a backend whose pool starts with `payments`
    pub fn with_payments(payments: Vec<ExistingPayment>) -> Self {
        let backend = Self::new();
        backend.lock().payments = payments;
        backend
    }

    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reject create/reconcile calls for payments with this description
    pub fn fail_on(&self, description: impl Into<String>) {
        self.lock().failing.push(description.into());
    }

    /// Mapping returned by `suggest_mapping`
    pub fn set_suggestion(&self, mappings: Vec<ColumnMapping>) {
        self.lock().suggestion = Some(mappings);
    }

    pub fn created(&self) -> Vec<NewPayment> {
        self.lock().created.clone()
    }

    pub fn reconciled(&self) -> Vec<(String, NewPayment)> {
        self.lock().reconciled.clone()
    }

    pub fn payments(&self) -> Vec<ExistingPayment> {
        self.lock().payments.clone()
    }

    fn check_failure(store: &Store, payment: &NewPayment) -> Result<()> {
        if store.failing.iter().any(|d| d == &payment.description) {
            return Err(Error::Backend {
                status: 422,
                message: format!("Payment rejected: {}", payment.description),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentBackend for MemoryBackend {
    async fn list_payments(&self) -> Result<Vec<ExistingPayment>> {
        Ok(self.payments())
    }

    async fn create_payment(&self, payment: &NewPayment) -> Result<CreatedPayment> {
        let mut store = self.lock();
        Self::check_failure(&store, payment)?;

        store.next_id += 1;
        let id = format!("mem-{}", store.next_id);
        store.created.push(payment.clone());
        store.payments.push(payment.clone().into_existing(id.clone()));
        Ok(CreatedPayment { id })
    }

    async fn reconcile_payment(&self, payment_id: &str, payment: &NewPayment) -> Result<()> {
        let mut store = self.lock();
        Self::check_failure(&store, payment)?;

        if !store.payments.iter().any(|p| p.id == payment_id) {
            return Err(Error::NotFound(format!("payment {}", payment_id)));
        }
        store.reconciled.push((payment_id.to_string(), payment.clone()));
        Ok(())
    }

    async fn suggest_mapping(&self, _headers: &[String]) -> Result<Option<Vec<ColumnMapping>>> {
        Ok(self.lock().suggestion.clone())
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn name(&self) -> &str {
        "memory"
    }

    fn host(&self) -> &str {
        "memory"
    }
}
