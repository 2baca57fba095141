//! Domain models for Tally

use chrono::NaiveDate;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Canonical field a CSV column can be mapped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SystemField {
    #[serde(rename = "ignore")]
    Ignore,
    #[serde(rename = "description")]
    Description,
    #[serde(rename = "amount")]
    Amount,
    #[serde(rename = "date")]
    Date,
    #[serde(rename = "method")]
    Method,
    #[serde(rename = "type")]
    Type,
    #[serde(rename = "reference")]
    Reference,
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "clientName")]
    ClientName,
    #[serde(rename = "clientEmail")]
    ClientEmail,
    #[serde(rename = "dueDate")]
    DueDate,
    #[serde(rename = "total")]
    Total,
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "installments")]
    Installments,
    #[serde(rename = "payment_date")]
    PaymentDate,
}

impl SystemField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::Description => "description",
            Self::Amount => "amount",
            Self::Date => "date",
            Self::Method => "method",
            Self::Type => "type",
            Self::Reference => "reference",
            Self::Status => "status",
            Self::ClientName => "clientName",
            Self::ClientEmail => "clientEmail",
            Self::DueDate => "dueDate",
            Self::Total => "total",
            Self::Name => "name",
            Self::Installments => "installments",
            Self::PaymentDate => "payment_date",
        }
    }

    /// All fields, in the order a mapping picker lists them
    pub fn all() -> &'static [SystemField] {
        &[
            Self::Ignore,
            Self::Description,
            Self::Amount,
            Self::Date,
            Self::Method,
            Self::Type,
            Self::Reference,
            Self::Status,
            Self::ClientName,
            Self::ClientEmail,
            Self::DueDate,
            Self::Total,
            Self::Name,
            Self::Installments,
            Self::PaymentDate,
        ]
    }
}

impl std::str::FromStr for SystemField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::all()
            .iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(wanted))
            .copied()
            .ok_or_else(|| format!("Unknown system field: {}", s))
    }
}

impl std::fmt::Display for SystemField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Association between one CSV column and a canonical field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub csv_column: String,
    pub system_field: SystemField,
}

impl ColumnMapping {
    pub fn new(csv_column: impl Into<String>, system_field: SystemField) -> Self {
        Self {
            csv_column: csv_column.into(),
            system_field,
        }
    }
}

/// One CSV data line keyed by header name, in header order
///
/// A repeated header keeps a single entry holding the later column's value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    entries: Vec<(String, String)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, column: &str, value: String) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == column) {
            entry.1 = value;
        } else {
            self.entries.push((column.to_string(), value));
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == column)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = RawRow::new();
        for (k, v) in iter {
            row.insert(&k.into(), v.into());
        }
        row
    }
}

impl Serialize for RawRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Direction of money movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment method of an imported transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Pix,
    CreditCard,
    BankTransfer,
    Cash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pix => "pix",
            Self::CreditCard => "credit_card",
            Self::BankTransfer => "bank_transfer",
            Self::Cash => "cash",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment status, also used for per-item submission outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Completed,
    Pending,
    Cancelled,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Pending => "pending",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed record produced from a row under the active mapping
///
/// Every field is optional so that "present" is explicit; the required-field
/// checks in the normalizer look at these options directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappedData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Always non-negative; the sign is carried by `transaction_type`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<PaymentMethod>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<TransactionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PaymentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_date: Option<String>,
}

impl MappedData {
    /// Slot for a field that is carried verbatim as text
    pub(crate) fn text_slot(&mut self, field: SystemField) -> Option<&mut Option<String>> {
        match field {
            SystemField::Description => Some(&mut self.description),
            SystemField::Reference => Some(&mut self.reference),
            SystemField::ClientName => Some(&mut self.client_name),
            SystemField::ClientEmail => Some(&mut self.client_email),
            SystemField::DueDate => Some(&mut self.due_date),
            SystemField::Total => Some(&mut self.total),
            SystemField::Name => Some(&mut self.name),
            SystemField::Installments => Some(&mut self.installments),
            SystemField::PaymentDate => Some(&mut self.payment_date),
            _ => None,
        }
    }
}

/// An existing payment record held by the backend (read-only projection)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingPayment {
    pub id: String,
    #[serde(alias = "name")]
    pub description: String,
    pub amount: f64,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Result of submitting one candidate during the confirm step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOutcome {
    /// `Completed` or `Failed`
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Id of the created or reconciled payment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
}

impl ImportOutcome {
    pub fn completed(payment_id: impl Into<String>) -> Self {
        Self {
            status: PaymentStatus::Completed,
            message: None,
            payment_id: Some(payment_id.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: PaymentStatus::Failed,
            message: Some(message.into()),
            payment_id: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }
}

/// One CSV row after mapping, validation and matching
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedTransaction {
    /// Zero-based row index, stable for the session's lifetime
    pub id: usize,
    pub original_row: RawRow,
    pub mapped_data: MappedData,
    pub validation_errors: Vec<String>,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_payment: Option<ExistingPayment>,
    /// 0-100, present exactly when `matched_payment` is
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_score: Option<u8>,
    pub selected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_group: Option<Uuid>,
    /// SHA-256 of date, description, amount and reference
    pub import_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ImportOutcome>,
}

impl ParsedTransaction {
    pub fn is_matched(&self) -> bool {
        self.matched_payment.is_some()
    }
}
