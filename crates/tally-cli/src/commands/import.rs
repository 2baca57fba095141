//! Preview and import command implementations

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tally_core::{
    read_csv_file, write_candidates, BackendClient, ExportFormat, ImportSession, ImportStep,
    ParsedTransaction, PaymentBackend, SourceFormat, SubmissionReport, TallyConfig,
};

use super::{open_backend, parse_mapping_arg, truncate};

/// Where the rows come from and how they are read
pub struct SourceOptions {
    pub file: PathBuf,
    pub format: Option<String>,
    /// `COL=FIELD` overrides applied after auto-mapping
    pub maps: Vec<String>,
    pub offline: bool,
}

pub struct PreviewOptions {
    pub source: SourceOptions,
    pub search: Option<String>,
    pub only_matches: bool,
    pub output: Option<PathBuf>,
    pub export_format: ExportFormat,
}

pub struct ImportOptions {
    pub source: SourceOptions,
    /// 1-based row numbers left out of the batch
    pub exclude: Vec<usize>,
    pub include_matched: bool,
    pub delay_ms: Option<u64>,
    pub yes: bool,
}

/// `None` or "auto" means detect from the header
fn parse_format(value: Option<&str>) -> Result<Option<SourceFormat>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("auto") => Ok(None),
        Some(v) => v.parse().map(Some).map_err(|e: String| anyhow::anyhow!(e)),
    }
}

/// Run the wizard up to the preview step
pub async fn prepare_session(
    config: &TallyConfig,
    backend: &BackendClient,
    source: &SourceOptions,
) -> Result<ImportSession> {
    let mut session = ImportSession::new(config.session, config.matching);

    match parse_format(source.format.as_deref())? {
        Some(format) => session.select_source_format(format)?,
        None if session.step() == ImportStep::Type => {
            anyhow::bail!(
                "--format is required when the type step is enabled (one of: {})",
                SourceFormat::all()
                    .iter()
                    .map(|f| f.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        None => {}
    }

    let text = read_csv_file(&source.file)
        .with_context(|| format!("Failed to read {}", source.file.display()))?;
    let file_name = source
        .file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| source.file.display().to_string());
    let rows = session.load_csv(&file_name, &text)?;
    tracing::debug!(rows, format = %session.source_format(), "Loaded {}", file_name);

    if session.options().delegate_mapping {
        match backend.suggest_mapping(session.headers()).await {
            Ok(Some(suggested)) => session.apply_suggested_mapping(&suggested)?,
            Ok(None) => {}
            Err(e) => tracing::warn!("Mapping suggestion failed, keeping auto mapping: {}", e),
        }
    }

    for arg in &source.maps {
        let (column, field) = parse_mapping_arg(arg)?;
        session
            .update_mapping(&column, field)
            .with_context(|| format!("No column named '{}' in {}", column, file_name))?;
    }

    let pool = backend
        .list_payments()
        .await
        .context("Failed to fetch existing payments")?;
    session.process(pool)?;
    Ok(session)
}

fn print_mappings(session: &ImportSession) {
    println!();
    println!("🗂️  Column mapping ({})", session.source_format());
    println!("   ─────────────────────────────────────────────────────────────");
    for mapping in session.mappings() {
        println!("   {:<28} → {}", truncate(&mapping.csv_column, 28), mapping.system_field);
    }

    let duplicates = session.duplicate_targets();
    if !duplicates.is_empty() {
        let names: Vec<String> = duplicates.iter().map(|f| f.to_string()).collect();
        println!(
            "   ⚠️  Mapped more than once (first non-empty value wins): {}",
            names.join(", ")
        );
    }
}

fn print_candidates<'a>(candidates: impl IntoIterator<Item = &'a ParsedTransaction>) {
    println!();
    println!("📝 Rows");
    println!("   ─────────────────────────────────────────────────────────────");

    for tx in candidates {
        let data = &tx.mapped_data;
        let date = data
            .date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "----------".to_string());
        let amount = match (data.amount, data.transaction_type) {
            (Some(a), Some(tally_core::TransactionType::Income)) => {
                format!("\x1b[32m+{:.2}\x1b[0m", a) // Green for income
            }
            (Some(a), _) => format!("\x1b[31m{:.2}\x1b[0m", a), // Red for expenses
            (None, _) => "-".to_string(),
        };
        let mark = if !tx.is_valid {
            "✗"
        } else if tx.selected {
            "✓"
        } else {
            " "
        };

        println!(
            "   {} #{:<4} {} │ {:>10} │ {}",
            mark,
            tx.id + 1,
            date,
            amount,
            truncate(data.description.as_deref().unwrap_or(""), 40)
        );

        if let (Some(payment), Some(score)) = (&tx.matched_payment, tx.match_score) {
            println!(
                "            ↳ matches {} \"{}\" ({}%)",
                payment.id,
                truncate(&payment.description, 30),
                score
            );
        }
        for error in &tx.validation_errors {
            println!("            ⚠️  {}", error);
        }
        if let Some(ref outcome) = tx.outcome {
            match outcome.message {
                Some(ref message) => println!("            ❌ {}", message),
                None => println!(
                    "            ✅ {}",
                    outcome.payment_id.as_deref().unwrap_or("done")
                ),
            }
        }
    }
}

fn print_stats(session: &ImportSession) {
    let stats = session.stats();
    println!();
    println!("   Rows: {} ({} valid, {} invalid)", stats.total, stats.valid, stats.invalid);
    println!("   Matched existing payments: {}", stats.matched);
    println!(
        "   Selected: {} → {} new, {} to reconcile",
        stats.selected, stats.to_import, stats.to_reconcile
    );
}

pub async fn cmd_preview(config: TallyConfig, options: &PreviewOptions) -> Result<()> {
    let backend = open_backend(&config, options.source.offline)?;
    println!(
        "🔍 Previewing {} ({} backend)...",
        options.source.file.display(),
        backend.name()
    );

    let mut session = prepare_session(&config, &backend, &options.source).await?;
    if let Some(ref search) = options.search {
        session.set_search(search.clone());
    }
    session.set_show_only_matches(options.only_matches);

    print_mappings(&session);

    let visible = session.visible_candidates();
    if visible.is_empty() {
        println!();
        println!("No rows to show.");
    } else {
        print_candidates(visible.iter().copied());
    }
    print_stats(&session);

    if let Some(ref path) = options.output {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let count = write_candidates(BufWriter::new(file), visible, options.export_format)?;
        println!();
        println!("💾 Exported {} rows to {}", count, path.display());
    }

    Ok(())
}

/// Import a file; returns `None` when nothing was submitted
pub async fn cmd_import(
    mut config: TallyConfig,
    options: &ImportOptions,
) -> Result<Option<SubmissionReport>> {
    if options.include_matched {
        config.session.reconcile_matched = false;
    }
    if let Some(delay) = options.delay_ms {
        config.submission.delay_ms = delay;
    }

    let backend = open_backend(&config, options.source.offline)?;
    println!(
        "📥 Importing {} ({} backend)...",
        options.source.file.display(),
        backend.name()
    );

    let mut session = prepare_session(&config, &backend, &options.source).await?;
    print_mappings(&session);

    for &row in &options.exclude {
        let id = row
            .checked_sub(1)
            .filter(|id| *id < session.candidates().len())
            .with_context(|| format!("--exclude {}: no such row", row))?;
        session.set_selected(id, false)?;
    }

    session.proceed_to_reconciliation()?;
    print_stats(&session);

    let stats = session.stats();
    if stats.to_import + stats.to_reconcile == 0 {
        println!();
        println!("Nothing to import.");
        return Ok(None);
    }

    if !options.yes && !confirm(&format!(
        "Submit {} rows to {}?",
        stats.to_import + stats.to_reconcile,
        backend.host()
    ))? {
        println!("Cancelled.");
        return Ok(None);
    }

    let report = session.submit(&backend, config.submission.delay()).await?;

    print_candidates(session.candidates().iter().filter(|c| c.outcome.is_some()));
    println!();
    if report.failed == 0 {
        println!("✅ Import complete!");
    } else {
        println!("⚠️  Import finished with errors");
    }
    println!("   Submitted: {}", report.total);
    println!("   Succeeded: {}", report.completed);
    if report.failed > 0 {
        println!("   Failed: {}", report.failed);
    }

    Ok(Some(report))
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
