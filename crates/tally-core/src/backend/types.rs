//! Request and response types exchanged with the payment backend

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ExistingPayment, ParsedTransaction, PaymentMethod, PaymentStatus, TransactionType};

/// Payload for creating (or reconciling into) a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub description: String,
    pub amount: f64,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_group: Option<Uuid>,
    /// Idempotency key derived from the row contents
    pub import_hash: String,
}

impl NewPayment {
    /// Build the payload for a validated candidate
    pub fn from_candidate(tx: &ParsedTransaction) -> Result<Self> {
        let data = &tx.mapped_data;
        let missing = |what: &str| Error::InvalidData(format!("row {} has no {}", tx.id, what));

        Ok(Self {
            description: data.description.clone().ok_or_else(|| missing("description"))?,
            amount: data.amount.ok_or_else(|| missing("amount"))?,
            date: data.date.ok_or_else(|| missing("date"))?,
            transaction_type: data.transaction_type.unwrap_or(TransactionType::Expense),
            method: data.method.unwrap_or(PaymentMethod::BankTransfer),
            status: data.status.unwrap_or(PaymentStatus::Completed),
            reference: data.reference.clone(),
            client_name: data.client_name.clone(),
            client_email: data.client_email.clone(),
            due_date: data.due_date.clone(),
            installments: data.installments.clone(),
            merge_group: tx.merge_group,
            import_hash: tx.import_hash.clone(),
        })
    }

    /// Projection used once the payment exists in the pool
    pub fn into_existing(self, id: impl Into<String>) -> ExistingPayment {
        ExistingPayment {
            id: id.into(),
            description: self.description,
            amount: self.amount,
            date: self.date,
            reference: self.reference,
        }
    }
}

/// Backend acknowledgement for a created payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPayment {
    pub id: String,
}
