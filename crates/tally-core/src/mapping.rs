//! Column mapping: CSV headers to system fields
//!
//! Headers are matched against an ordered keyword table. Compound fields come
//! before the generic ones they contain ("data de vencimento" must land on
//! `dueDate`, not `date`), so the first hit wins.
//!
//! Known bank exports (see [`SourceFormat`]) get a preset mapping by exact
//! header name plus the sign convention their amounts use.

use serde::{Deserialize, Serialize};

use crate::models::{ColumnMapping, SystemField};

/// Ordered keyword table; a lower-cased header containing any keyword maps to
/// that field
const FIELD_KEYWORDS: &[(SystemField, &[&str])] = &[
    (SystemField::DueDate, &["vencimento", "due"]),
    (
        SystemField::PaymentDate,
        &["data de pagamento", "data pagamento", "payment date", "payment_date", "paid at"],
    ),
    (SystemField::ClientEmail, &["email", "e-mail"]),
    (SystemField::ClientName, &["cliente", "client", "customer"]),
    (SystemField::Installments, &["parcela", "installment"]),
    (SystemField::Total, &["total"]),
    (SystemField::Amount, &["valor", "amount", "value", "quantia"]),
    (SystemField::Date, &["data", "date"]),
    (
        SystemField::Description,
        &["descri", "desc", "histórico", "historico", "memo"],
    ),
    (
        SystemField::Method,
        &["método", "metodo", "forma", "method", "meio"],
    ),
    (SystemField::Type, &["tipo", "type", "natureza"]),
    (SystemField::Status, &["status", "situação", "situacao"]),
    (SystemField::Reference, &["refer", "ref", "documento", "doc", "nsu"]),
    (SystemField::Name, &["nome", "name"]),
];

/// Infer the system field for a header; `Ignore` when nothing matches
pub fn infer_field(header: &str) -> SystemField {
    let lower = header.trim().to_lowercase();
    FIELD_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(field, _)| *field)
        .unwrap_or(SystemField::Ignore)
}

/// One mapping per header, in header order
pub fn auto_map(headers: &[String]) -> Vec<ColumnMapping> {
    headers
        .iter()
        .map(|h| ColumnMapping::new(h.clone(), infer_field(h)))
        .collect()
}

/// Point `csv_column` at `field`; returns false when the column is unknown
///
/// A repeated header has one entry per occurrence but rows keep only the
/// last column's value under that name, so every entry is retargeted.
pub fn update_mapping(mappings: &mut [ColumnMapping], csv_column: &str, field: SystemField) -> bool {
    let mut found = false;
    for mapping in mappings.iter_mut().filter(|m| m.csv_column == csv_column) {
        mapping.system_field = field;
        found = true;
    }
    found
}

/// Non-ignore fields targeted by more than one column, in first-seen order
pub fn duplicate_targets(mappings: &[ColumnMapping]) -> Vec<SystemField> {
    let mut seen: Vec<SystemField> = Vec::new();
    let mut duplicates: Vec<SystemField> = Vec::new();
    for mapping in mappings {
        let field = mapping.system_field;
        if field == SystemField::Ignore {
            continue;
        }
        if seen.contains(&field) {
            if !duplicates.contains(&field) {
                duplicates.push(field);
            }
        } else {
            seen.push(field);
        }
    }
    duplicates
}

/// How a source encodes direction in the amount sign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignConvention {
    /// Only a negative amount means anything (expense)
    NegativeOnly,
    /// Negative is an expense, positive is income
    Signed,
    /// Positive is an expense, negative is income (charge-card statements)
    Inverted,
}

/// Origin of the uploaded file, chosen in the optional first wizard step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    #[default]
    Generic,
    Chase,
    Bofa,
    Amex,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Chase => "chase",
            Self::Bofa => "bofa",
            Self::Amex => "amex",
        }
    }

    pub fn all() -> &'static [SourceFormat] {
        &[Self::Generic, Self::Chase, Self::Bofa, Self::Amex]
    }

    /// Recognize a bank export from its header line
    pub fn detect(header_line: &str) -> SourceFormat {
        let header = header_line.trim().trim_start_matches('\u{feff}');

        // Chase: "Transaction Date,Post Date,Description,Category,Type,Amount,Memo"
        if header.starts_with("Transaction Date,Post Date,Description,Category,Type,Amount") {
            return Self::Chase;
        }

        // Amex extended: "Date,Description,Card Member,Account #,Amount,..."
        if header.starts_with("Date,Description,Card Member,Account #,Amount") {
            return Self::Amex;
        }

        // BofA: "Date,Description,Amount,Running Bal."
        if header.starts_with("Date,Description,Amount")
            && (header.contains("Running Bal") || header.contains("Balance"))
        {
            return Self::Bofa;
        }

        // A bare "Date,Description,Amount" stays generic; the simple Amex
        // export is only used when chosen explicitly
        Self::Generic
    }

    pub fn sign_convention(&self) -> SignConvention {
        match self {
            Self::Generic => SignConvention::NegativeOnly,
            Self::Chase | Self::Bofa => SignConvention::Signed,
            Self::Amex => SignConvention::Inverted,
        }
    }

    fn preset_field(&self, header: &str) -> Option<SystemField> {
        let field = match (self, header) {
            (Self::Generic, _) => return None,
            (Self::Chase, "Transaction Date") => SystemField::Date,
            (Self::Chase, "Post Date" | "Category" | "Type" | "Memo") => SystemField::Ignore,
            (Self::Bofa, "Running Bal." | "Balance") => SystemField::Ignore,
            (Self::Amex, "Card Member" | "Account #" | "Extended Details" | "Category") => {
                SystemField::Ignore
            }
            (Self::Amex, "Appears On Your Statement As") => SystemField::Ignore,
            (Self::Amex, "Reference") => SystemField::Reference,
            (_, "Date") => SystemField::Date,
            (_, "Description") => SystemField::Description,
            (_, "Amount") => SystemField::Amount,
            _ => return None,
        };
        Some(field)
    }

    /// Preset mapping for this format; headers it does not know fall back
    /// to keyword inference
    pub fn mapping_for(&self, headers: &[String]) -> Vec<ColumnMapping> {
        headers
            .iter()
            .map(|h| {
                let field = self.preset_field(h).unwrap_or_else(|| infer_field(h));
                ColumnMapping::new(h.clone(), field)
            })
            .collect()
    }
}

impl std::str::FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "generic" | "auto" => Ok(Self::Generic),
            "chase" => Ok(Self::Chase),
            "bofa" | "bankofamerica" | "bank_of_america" => Ok(Self::Bofa),
            "amex" | "americanexpress" => Ok(Self::Amex),
            _ => Err(format!("Unknown source format: {}", s)),
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_infer_field_portuguese_headers() {
        assert_eq!(infer_field("Data"), SystemField::Date);
        assert_eq!(infer_field("Descrição"), SystemField::Description);
        assert_eq!(infer_field("Valor"), SystemField::Amount);
        assert_eq!(infer_field("Histórico"), SystemField::Description);
        assert_eq!(infer_field("Forma de Pagamento"), SystemField::Method);
        assert_eq!(infer_field("Tipo"), SystemField::Type);
        assert_eq!(infer_field("Situação"), SystemField::Status);
        assert_eq!(infer_field("Nº Documento"), SystemField::Reference);
        assert_eq!(infer_field("Nome"), SystemField::Name);
    }

    #[test]
    fn test_infer_field_compound_before_generic() {
        assert_eq!(infer_field("Data de Vencimento"), SystemField::DueDate);
        assert_eq!(infer_field("Data de Pagamento"), SystemField::PaymentDate);
        assert_eq!(infer_field("Valor Total"), SystemField::Total);
        assert_eq!(infer_field("Email do Cliente"), SystemField::ClientEmail);
        assert_eq!(infer_field("Nome do Cliente"), SystemField::ClientName);
        assert_eq!(infer_field("Parcelas"), SystemField::Installments);
        assert_eq!(infer_field("Due Date"), SystemField::DueDate);
    }

    #[test]
    fn test_infer_field_unknown_is_ignore() {
        assert_eq!(infer_field("Saldo"), SystemField::Ignore);
        assert_eq!(infer_field(""), SystemField::Ignore);
    }

    #[test]
    fn test_auto_map_one_per_header_in_order() {
        let h = headers(&["Data", "Descrição", "Valor", "Saldo"]);
        let mappings = auto_map(&h);
        assert_eq!(mappings.len(), 4);
        let columns: Vec<&str> = mappings.iter().map(|m| m.csv_column.as_str()).collect();
        assert_eq!(columns, vec!["Data", "Descrição", "Valor", "Saldo"]);
        assert_eq!(mappings[3].system_field, SystemField::Ignore);
    }

    #[test]
    fn test_update_mapping_changes_only_that_column() {
        let mut mappings = auto_map(&headers(&["Data", "Valor", "Saldo"]));
        assert!(update_mapping(&mut mappings, "Saldo", SystemField::Reference));
        assert_eq!(mappings[2].system_field, SystemField::Reference);
        assert_eq!(mappings[0].system_field, SystemField::Date);
        assert_eq!(mappings[1].system_field, SystemField::Amount);

        assert!(!update_mapping(&mut mappings, "Nope", SystemField::Amount));
        assert_eq!(mappings.len(), 3);
    }

    #[test]
    fn test_duplicate_targets() {
        let mappings = auto_map(&headers(&["Data", "Date", "Valor", "Saldo", "Extra"]));
        assert_eq!(duplicate_targets(&mappings), vec![SystemField::Date]);
    }

    #[test]
    fn test_detect_formats() {
        assert_eq!(
            SourceFormat::detect("Transaction Date,Post Date,Description,Category,Type,Amount,Memo"),
            SourceFormat::Chase
        );
        assert_eq!(
            SourceFormat::detect("Date,Description,Amount,Running Bal."),
            SourceFormat::Bofa
        );
        assert_eq!(SourceFormat::detect("Date,Description,Amount"), SourceFormat::Generic);
        assert_eq!(
            SourceFormat::detect("Date,Description,Amount,Category"),
            SourceFormat::Generic
        );
        assert_eq!(
            SourceFormat::detect("Date,Description,Card Member,Account #,Amount,Extended Details"),
            SourceFormat::Amex
        );
        assert_eq!(SourceFormat::detect("Data;Descrição;Valor"), SourceFormat::Generic);
    }

    #[test]
    fn test_preset_mapping_overrides_keywords() {
        let h = headers(&["Transaction Date", "Post Date", "Description", "Category", "Type", "Amount", "Memo"]);
        let mappings = SourceFormat::Chase.mapping_for(&h);
        let fields: Vec<SystemField> = mappings.iter().map(|m| m.system_field).collect();
        assert_eq!(
            fields,
            vec![
                SystemField::Date,
                SystemField::Ignore,
                SystemField::Description,
                SystemField::Ignore,
                SystemField::Ignore,
                SystemField::Amount,
                SystemField::Ignore,
            ]
        );
        // Generic falls back to keywords entirely
        assert_eq!(SourceFormat::Generic.mapping_for(&h)[4].system_field, SystemField::Type);
    }

    #[test]
    fn test_source_format_parse() {
        assert_eq!("AMEX".parse::<SourceFormat>(), Ok(SourceFormat::Amex));
        assert_eq!("auto".parse::<SourceFormat>(), Ok(SourceFormat::Generic));
        assert!("wells".parse::<SourceFormat>().is_err());
        assert_eq!(SourceFormat::Amex.sign_convention(), SignConvention::Inverted);
    }
}
