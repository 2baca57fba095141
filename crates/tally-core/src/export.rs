//! Export of import candidates
//!
//! Writes the candidate list (after mapping, validation and matching) as CSV
//! or JSON so it can be reviewed outside the wizard.

use std::io::Write;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::ParsedTransaction;

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl std::str::FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(Error::InvalidData(format!("Unknown export format: {}", other))),
        }
    }
}

/// Flat row for CSV export
#[derive(Debug, Clone, Serialize)]
pub struct CandidateExport {
    pub row: usize,
    pub date: String,
    pub description: String,
    pub amount: String,
    #[serde(rename = "type")]
    pub transaction_type: String,
    pub method: String,
    pub status: String,
    pub reference: String,
    pub valid: bool,
    pub selected: bool,
    pub errors: String,
    pub matched_payment_id: String,
    pub match_score: String,
    pub merge_group: String,
    pub outcome: String,
    pub import_hash: String,
}

impl From<&ParsedTransaction> for CandidateExport {
    fn from(tx: &ParsedTransaction) -> Self {
        let data = &tx.mapped_data;
        let text = |v: Option<String>| v.unwrap_or_default();

        Self {
            row: tx.id + 1,
            date: text(data.date.map(|d| d.to_string())),
            description: text(data.description.clone()),
            amount: text(data.amount.map(|a| format!("{:.2}", a))),
            transaction_type: text(data.transaction_type.map(|t| t.to_string())),
            method: text(data.method.map(|m| m.to_string())),
            status: text(data.status.map(|s| s.to_string())),
            reference: text(data.reference.clone()),
            valid: tx.is_valid,
            selected: tx.selected,
            errors: tx.validation_errors.join("; "),
            matched_payment_id: text(tx.matched_payment.as_ref().map(|p| p.id.clone())),
            match_score: text(tx.match_score.map(|s| s.to_string())),
            merge_group: text(tx.merge_group.map(|g| g.to_string())),
            outcome: text(tx.outcome.as_ref().map(|o| o.status.to_string())),
            import_hash: tx.import_hash.clone(),
        }
    }
}

/// Write candidates to `writer` in the given format
pub fn write_candidates<'a, W, I>(writer: W, candidates: I, format: ExportFormat) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a ParsedTransaction>,
{
    match format {
        ExportFormat::Csv => export_csv(writer, candidates),
        ExportFormat::Json => export_json(writer, candidates),
    }
}

fn export_csv<'a, W, I>(writer: W, candidates: I) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a ParsedTransaction>,
{
    let mut wtr = csv::Writer::from_writer(writer);
    let mut count = 0;
    for tx in candidates {
        wtr.serialize(CandidateExport::from(tx))?;
        count += 1;
    }
    wtr.flush()?;
    Ok(count)
}

fn export_json<'a, W, I>(mut writer: W, candidates: I) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a ParsedTransaction>,
{
    let list: Vec<&ParsedTransaction> = candidates.into_iter().collect();
    serde_json::to_writer_pretty(&mut writer, &list)?;
    writeln!(writer)?;
    Ok(list.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{auto_map, SignConvention};
    use crate::models::RawRow;
    use crate::normalize::normalize_row;

    fn candidates() -> Vec<ParsedTransaction> {
        let headers = vec!["Descrição".to_string(), "Valor".to_string(), "Data".to_string()];
        let mappings = auto_map(&headers);
        let rows: Vec<RawRow> = vec![
            vec![("Descrição", "Mercado, centro"), ("Valor", "-150"), ("Data", "05/01/2024")],
            vec![("Descrição", "Teste"), ("Valor", "abc"), ("Data", "2024-01-01")],
        ]
        .into_iter()
        .map(|pairs| pairs.into_iter().collect())
        .collect();
        rows.iter()
            .enumerate()
            .map(|(i, r)| normalize_row(i, r, &mappings, SignConvention::NegativeOnly))
            .collect()
    }

    #[test]
    fn test_export_csv() {
        let list = candidates();
        let mut out = Vec::new();
        assert_eq!(write_candidates(&mut out, &list, ExportFormat::Csv).unwrap(), 2);

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("row,date,description,amount,type"));
        let first = lines.next().unwrap();
        assert!(first.starts_with("1,2024-01-05,\"Mercado, centro\",150.00,expense"));
        assert!(text.contains("Valor inválido: abc"));
    }

    #[test]
    fn test_export_json() {
        let list = candidates();
        let mut out = Vec::new();
        write_candidates(&mut out, &list, ExportFormat::Json).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert_eq!(value[0]["mapped_data"]["amount"], 150.0);
        assert_eq!(value[1]["is_valid"], false);
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xlsx".parse::<ExportFormat>().is_err());
    }
}
