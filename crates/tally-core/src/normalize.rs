//! Row normalization and validation
//!
//! Turns one [`RawRow`] into a [`ParsedTransaction`] under the active column
//! mapping. Problems are collected as human-readable messages on the
//! candidate instead of being returned as errors; a row with any message is
//! invalid and starts deselected.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::mapping::SignConvention;
use crate::models::{
    ColumnMapping, MappedData, ParsedTransaction, PaymentMethod, PaymentStatus, RawRow,
    SystemField, TransactionType,
};
use crate::parser::parse_date_to_iso;

pub const MSG_DESCRIPTION_REQUIRED: &str = "Descrição é obrigatória";
pub const MSG_AMOUNT_REQUIRED: &str = "Valor é obrigatório";
pub const MSG_DATE_REQUIRED: &str = "Data é obrigatória";

/// Build a candidate from one row
///
/// For each mapped field the first column with a non-empty value wins; later
/// columns targeting the same field are ignored for this row.
pub fn normalize_row(
    id: usize,
    row: &RawRow,
    mappings: &[ColumnMapping],
    sign: SignConvention,
) -> ParsedTransaction {
    let mut data = MappedData::default();
    let mut errors: Vec<String> = Vec::new();
    let mut claimed: Vec<SystemField> = Vec::new();
    let mut signed_amount: Option<f64> = None;

    for mapping in mappings {
        let field = mapping.system_field;
        if field == SystemField::Ignore || claimed.contains(&field) {
            continue;
        }
        let raw = match row.get(&mapping.csv_column).map(str::trim) {
            Some(v) if !v.is_empty() => v,
            _ => continue,
        };
        claimed.push(field);

        match field {
            SystemField::Amount => match parse_amount(raw) {
                Some(value) => {
                    signed_amount = Some(value);
                    data.amount = Some(value.abs());
                }
                None => errors.push(format!("Valor inválido: {}", raw)),
            },
            SystemField::Date => match parse_date_to_iso(raw) {
                Some(date) => data.date = Some(date),
                None => errors.push(format!("Data inválida: {}", raw)),
            },
            SystemField::Type => data.transaction_type = classify_type(raw),
            SystemField::Method => data.method = classify_method(raw),
            SystemField::Status => data.status = classify_status(raw),
            other => {
                if let Some(slot) = data.text_slot(other) {
                    *slot = Some(raw.to_string());
                }
            }
        }
    }

    if let Some(value) = signed_amount {
        apply_sign(&mut data, value, sign);
    }

    if data.description.is_none() {
        errors.push(MSG_DESCRIPTION_REQUIRED.to_string());
    }
    if data.amount.is_none_or(|a| a == 0.0) {
        errors.push(MSG_AMOUNT_REQUIRED.to_string());
    }
    if data.date.is_none() {
        errors.push(MSG_DATE_REQUIRED.to_string());
    }

    data.transaction_type.get_or_insert(TransactionType::Expense);
    data.method.get_or_insert(PaymentMethod::BankTransfer);
    data.status.get_or_insert(PaymentStatus::Completed);

    let is_valid = errors.is_empty();
    if !is_valid {
        debug!("Row {} invalid: {}", id, errors.join("; "));
    }

    let import_hash = import_hash(
        data.date,
        data.description.as_deref().unwrap_or_default(),
        data.amount.unwrap_or_default(),
        data.reference.as_deref(),
    );

    ParsedTransaction {
        id,
        original_row: row.clone(),
        mapped_data: data,
        validation_errors: errors,
        is_valid,
        matched_payment: None,
        match_score: None,
        selected: is_valid,
        merge_group: None,
        import_hash,
        outcome: None,
    }
}

/// Direction cue from the amount sign. A negative effective amount always
/// means expense; a positive one only fills in income when no type column
/// said otherwise.
fn apply_sign(data: &mut MappedData, value: f64, sign: SignConvention) {
    let effective = match sign {
        SignConvention::Inverted => -value,
        _ => value,
    };
    if effective < 0.0 {
        data.transaction_type = Some(TransactionType::Expense);
    } else if effective > 0.0 && sign != SignConvention::NegativeOnly {
        data.transaction_type.get_or_insert(TransactionType::Income);
    }
}

/// Parse an amount string, handling currency symbols and separators
///
/// Commas become dots; when several dots remain, all but the last are
/// treated as thousands separators. `(100,00)` and the bank-statement form
/// `100,00-` are negative.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let parenthesized = trimmed.starts_with('(') && trimmed.ends_with(')');

    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    let (cleaned, trailing_minus) = match cleaned.strip_suffix('-') {
        Some(rest) if !rest.is_empty() && !rest.starts_with('-') => (rest.to_string(), true),
        _ => (cleaned, false),
    };

    let normalized = match cleaned.rfind('.') {
        Some(last) if cleaned.matches('.').count() > 1 => {
            let (head, tail) = cleaned.split_at(last);
            format!("{}{}", head.replace('.', ""), tail)
        }
        _ => cleaned,
    };

    let value: f64 = normalized.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if parenthesized || trailing_minus {
        -value.abs()
    } else {
        value
    })
}

pub fn classify_type(raw: &str) -> Option<TransactionType> {
    let lower = raw.to_lowercase();
    let has = |keys: &[&str]| keys.iter().any(|k| lower.contains(k));

    if has(&["recei", "entrada", "income"]) {
        Some(TransactionType::Income)
    } else if has(&["despe", "déb", "saída", "saida", "expense"]) {
        Some(TransactionType::Expense)
    } else {
        None
    }
}

pub fn classify_method(raw: &str) -> Option<PaymentMethod> {
    let lower = raw.to_lowercase();
    let has = |keys: &[&str]| keys.iter().any(|k| lower.contains(k));

    if has(&["pix"]) {
        Some(PaymentMethod::Pix)
    } else if has(&["cart", "credit", "crédito", "credito"]) {
        Some(PaymentMethod::CreditCard)
    } else if has(&["transf", "ted", "doc", "bank", "boleto"]) {
        Some(PaymentMethod::BankTransfer)
    } else if has(&["dinheiro", "cash", "espécie", "especie"]) {
        Some(PaymentMethod::Cash)
    } else {
        None
    }
}

pub fn classify_status(raw: &str) -> Option<PaymentStatus> {
    let lower = raw.to_lowercase();
    let has = |keys: &[&str]| keys.iter().any(|k| lower.contains(k));

    if has(&["conclu", "complet", "pago", "paid", "efetiv", "liquid"]) {
        Some(PaymentStatus::Completed)
    } else if has(&["pend", "aguard", "agend"]) {
        Some(PaymentStatus::Pending)
    } else if has(&["cancel", "estorn"]) {
        Some(PaymentStatus::Cancelled)
    } else if has(&["falh", "fail", "erro", "recus"]) {
        Some(PaymentStatus::Failed)
    } else {
        None
    }
}

/// Fingerprint used as an idempotency key when creating payments
pub fn import_hash(
    date: Option<NaiveDate>,
    description: &str,
    amount: f64,
    reference: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    if let Some(date) = date {
        hasher.update(date.to_string().as_bytes());
    }
    hasher.update(description.as_bytes());
    hasher.update(amount.to_be_bytes());
    if let Some(reference) = reference {
        hasher.update(reference.as_bytes());
    }
    hex::encode(hasher.finalize())
}
