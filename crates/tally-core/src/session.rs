//! Import session state machine
//!
//! One [`ImportSession`] holds everything the import wizard needs between
//! steps: the parsed file, the column mapping, the candidate list with the
//! user's selection, links and merge groups, and submission progress.
//!
//! ```text
//! [type] → upload → mapping → preview → reconciliation → confirm
//! ```
//!
//! Every operation checks the current step first and returns
//! [`Error::InvalidState`] without touching anything when called out of
//! order. Statistics are derived from the candidate list on demand.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{NewPayment, PaymentBackend};
use crate::error::{Error, Result};
use crate::mapping::{duplicate_targets, SourceFormat};
use crate::matching::{find_best_match, rank_candidates, MatchConfig, RankedPayment, MAX_SCORE};
use crate::models::{
    ColumnMapping, ExistingPayment, ImportOutcome, ParsedTransaction, RawRow, SystemField,
};
use crate::normalize::normalize_row;
use crate::parser::parse_csv;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStep {
    /// Source format selection (optional)
    Type,
    Upload,
    Mapping,
    Preview,
    Reconciliation,
    Confirm,
}

impl ImportStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Upload => "upload",
            Self::Mapping => "mapping",
            Self::Preview => "preview",
            Self::Reconciliation => "reconciliation",
            Self::Confirm => "confirm",
        }
    }
}

impl std::fmt::Display for ImportStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const BASE_STEPS: &[ImportStep] = &[
    ImportStep::Upload,
    ImportStep::Mapping,
    ImportStep::Preview,
    ImportStep::Reconciliation,
    ImportStep::Confirm,
];

const STEPS_WITH_TYPE: &[ImportStep] = &[
    ImportStep::Type,
    ImportStep::Upload,
    ImportStep::Mapping,
    ImportStep::Preview,
    ImportStep::Reconciliation,
    ImportStep::Confirm,
];

/// Wizard behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Start with a source-format selection step
    pub include_type_step: bool,
    /// Ask the backend for a column mapping after upload
    pub delegate_mapping: bool,
    /// Matched rows are reconciled into their payment instead of created
    pub reconcile_matched: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            include_type_step: false,
            delegate_mapping: false,
            reconcile_matched: true,
        }
    }
}

/// Derived counts over the candidate list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub selected: usize,
    pub matched: usize,
    pub to_import: usize,
    pub to_reconcile: usize,
    pub completed: usize,
    pub failed: usize,
}

/// What the confirm step does with one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SubmissionAction {
    Create,
    Reconcile { payment_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionItem {
    pub candidate_id: usize,
    #[serde(flatten)]
    pub action: SubmissionAction,
    pub payment: NewPayment,
}

/// Summary of a finished batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionReport {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct ImportSession {
    options: SessionOptions,
    match_config: MatchConfig,
    step: ImportStep,
    source_format: Option<SourceFormat>,
    file_name: Option<String>,
    headers: Vec<String>,
    rows: Vec<RawRow>,
    mappings: Vec<ColumnMapping>,
    candidates: Vec<ParsedTransaction>,
    pool: Vec<ExistingPayment>,
    search: String,
    show_only_matches: bool,
    merge_selection: Vec<usize>,
    batch_size: usize,
    processed: usize,
    progress: f64,
}

impl ImportSession {
    pub fn new(options: SessionOptions, match_config: MatchConfig) -> Self {
        let steps = if options.include_type_step {
            STEPS_WITH_TYPE
        } else {
            BASE_STEPS
        };
        Self {
            options,
            match_config,
            step: steps[0],
            source_format: None,
            file_name: None,
            headers: Vec::new(),
            rows: Vec::new(),
            mappings: Vec::new(),
            candidates: Vec::new(),
            pool: Vec::new(),
            search: String::new(),
            show_only_matches: false,
            merge_selection: Vec::new(),
            batch_size: 0,
            processed: 0,
            progress: 0.0,
        }
    }

    // ========== Accessors ==========

    pub fn step(&self) -> ImportStep {
        self.step
    }

    pub fn steps(&self) -> &'static [ImportStep] {
        if self.options.include_type_step {
            STEPS_WITH_TYPE
        } else {
            BASE_STEPS
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn match_config(&self) -> &MatchConfig {
        &self.match_config
    }

    /// Selected format, or the one detected from the header
    pub fn source_format(&self) -> SourceFormat {
        self.source_format.unwrap_or_default()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn mappings(&self) -> &[ColumnMapping] {
        &self.mappings
    }

    pub fn duplicate_targets(&self) -> Vec<SystemField> {
        duplicate_targets(&self.mappings)
    }

    pub fn candidates(&self) -> &[ParsedTransaction] {
        &self.candidates
    }

    pub fn candidate(&self, id: usize) -> Option<&ParsedTransaction> {
        self.candidates.get(id)
    }

    /// Payments fetched for matching during `process`
    pub fn pool(&self) -> &[ExistingPayment] {
        &self.pool
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn show_only_matches(&self) -> bool {
        self.show_only_matches
    }

    pub fn merge_selection(&self) -> &[usize] {
        &self.merge_selection
    }

    /// Submission progress, 0-100
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// True while a batch has items left to record
    pub fn is_submitting(&self) -> bool {
        self.step == ImportStep::Confirm && self.processed < self.batch_size
    }

    fn require(&self, allowed: &[ImportStep], operation: &str) -> Result<()> {
        if allowed.contains(&self.step) {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "{} is not available at the {} step",
                operation, self.step
            )))
        }
    }

    fn set_step(&mut self, step: ImportStep) {
        info!(from = %self.step, to = %step, "Import step");
        self.step = step;
    }

    fn candidate_mut(&mut self, id: usize) -> Result<&mut ParsedTransaction> {
        self.candidates
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("candidate {}", id)))
    }

    // ========== Type / Upload / Mapping ==========

    /// Choose the source format
    ///
    /// At the type step this also advances to upload. At the upload step it
    /// only records the choice, which skips header detection.
    pub fn select_source_format(&mut self, format: SourceFormat) -> Result<()> {
        self.require(&[ImportStep::Type, ImportStep::Upload], "select_source_format")?;
        self.source_format = Some(format);
        if self.step == ImportStep::Type {
            self.set_step(ImportStep::Upload);
        }
        Ok(())
    }

    /// Parse an uploaded file and compute the initial mapping
    ///
    /// Returns the number of data rows. A file without a header row leaves
    /// the session at upload.
    pub fn load_csv(&mut self, file_name: &str, text: &str) -> Result<usize> {
        self.require(&[ImportStep::Upload], "load_csv")?;

        let parsed = parse_csv(text);
        if parsed.is_empty() {
            return Err(Error::InvalidData(format!("{} has no header row", file_name)));
        }

        let format = match self.source_format {
            Some(format) => format,
            None => {
                let detected = SourceFormat::detect(&parsed.headers.join(","));
                if detected != SourceFormat::Generic {
                    info!("Detected {} export", detected);
                }
                self.source_format = Some(detected);
                detected
            }
        };

        self.mappings = format.mapping_for(&parsed.headers);
        self.file_name = Some(file_name.to_string());
        self.headers = parsed.headers;
        self.rows = parsed.data;
        info!(
            "Loaded {}: {} columns, {} rows",
            file_name,
            self.headers.len(),
            self.rows.len()
        );
        self.set_step(ImportStep::Mapping);
        Ok(self.rows.len())
    }

    /// Install a mapping proposed by the backend
    ///
    /// Entries for unknown columns are dropped and headers without an entry
    /// map to `ignore`.
    pub fn apply_suggested_mapping(&mut self, suggested: &[ColumnMapping]) -> Result<()> {
        self.require(&[ImportStep::Mapping], "apply_suggested_mapping")?;
        self.mappings = self
            .headers
            .iter()
            .map(|h| {
                let field = suggested
                    .iter()
                    .find(|m| &m.csv_column == h)
                    .map(|m| m.system_field)
                    .unwrap_or(SystemField::Ignore);
                ColumnMapping::new(h.clone(), field)
            })
            .collect();
        debug!("Applied suggested mapping for {} columns", self.mappings.len());
        Ok(())
    }

    pub fn update_mapping(&mut self, csv_column: &str, field: SystemField) -> Result<()> {
        self.require(&[ImportStep::Mapping], "update_mapping")?;
        if crate::mapping::update_mapping(&mut self.mappings, csv_column, field) {
            debug!("Mapped {} -> {}", csv_column, field);
            Ok(())
        } else {
            Err(Error::NotFound(format!("column {}", csv_column)))
        }
    }

    /// Normalize every row and score it against `pool`
    pub fn process(&mut self, pool: Vec<ExistingPayment>) -> Result<()> {
        self.require(&[ImportStep::Mapping], "process")?;

        let sign = self.source_format().sign_convention();
        let mut candidates: Vec<ParsedTransaction> = self
            .rows
            .iter()
            .enumerate()
            .map(|(id, row)| normalize_row(id, row, &self.mappings, sign))
            .collect();

        for candidate in &mut candidates {
            if let Some(result) = find_best_match(&candidate.mapped_data, &pool, &self.match_config) {
                debug!(
                    "Row {} matched payment {} (score {})",
                    candidate.id, result.payment.id, result.score
                );
                candidate.matched_payment = Some(result.payment);
                candidate.match_score = Some(result.score);
            }
        }

        self.candidates = candidates;
        self.pool = pool;
        self.merge_selection.clear();

        let stats = self.stats();
        info!(
            "Processed {} rows: {} valid, {} invalid, {} matched",
            stats.total, stats.valid, stats.invalid, stats.matched
        );
        self.set_step(ImportStep::Preview);
        Ok(())
    }

    pub fn proceed_to_reconciliation(&mut self) -> Result<()> {
        self.require(&[ImportStep::Preview], "proceed_to_reconciliation")?;
        self.set_step(ImportStep::Reconciliation);
        Ok(())
    }

    /// Step back; from the first step this resets the session
    ///
    /// Confirm is terminal: once a batch has run, stepping back starts a new
    /// import instead of reopening rows that were already submitted.
    pub fn back(&mut self) -> Result<ImportStep> {
        if self.is_submitting() {
            return Err(Error::InvalidState("a submission is in progress".into()));
        }
        let steps = self.steps();
        match steps.iter().position(|s| *s == self.step) {
            Some(0) | None => self.reset(),
            Some(_) if self.step == ImportStep::Confirm => self.reset(),
            Some(i) => self.set_step(steps[i - 1]),
        }
        Ok(self.step)
    }

    /// Discard everything except the options
    pub fn reset(&mut self) {
        debug!("Resetting import session");
        *self = Self::new(self.options, self.match_config);
    }

    // ========== Selection ==========

    const CANDIDATE_STEPS: &'static [ImportStep] = &[ImportStep::Preview, ImportStep::Reconciliation];

    /// Flip selection; invalid rows cannot be selected
    pub fn toggle_selection(&mut self, id: usize) -> Result<bool> {
        self.require(Self::CANDIDATE_STEPS, "toggle_selection")?;
        let selected = !self
            .candidates
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("candidate {}", id)))?
            .selected;
        self.set_selected(id, selected)?;
        Ok(selected)
    }

    pub fn set_selected(&mut self, id: usize, selected: bool) -> Result<()> {
        self.require(Self::CANDIDATE_STEPS, "set_selected")?;
        let candidate = self.candidate_mut(id)?;
        if selected && !candidate.is_valid {
            return Err(Error::InvalidData(format!(
                "row {} has validation errors and cannot be selected",
                id
            )));
        }
        candidate.selected = selected;
        Ok(())
    }

    /// Select every valid row, or clear all selections
    pub fn select_all(&mut self, selected: bool) -> Result<()> {
        self.require(Self::CANDIDATE_STEPS, "select_all")?;
        for candidate in &mut self.candidates {
            candidate.selected = selected && candidate.is_valid;
        }
        Ok(())
    }

    // ========== Links ==========

    /// Link a candidate to an existing payment (score defaults to 100)
    pub fn link_payment(
        &mut self,
        id: usize,
        payment: ExistingPayment,
        score: Option<u8>,
    ) -> Result<()> {
        self.require(Self::CANDIDATE_STEPS, "link_payment")?;
        let candidate = self.candidate_mut(id)?;
        debug!("Linking row {} to payment {}", id, payment.id);
        candidate.matched_payment = Some(payment);
        candidate.match_score = Some(score.unwrap_or(MAX_SCORE).min(MAX_SCORE));
        Ok(())
    }

    pub fn unlink_payment(&mut self, id: usize) -> Result<()> {
        self.require(Self::CANDIDATE_STEPS, "unlink_payment")?;
        let candidate = self.candidate_mut(id)?;
        candidate.matched_payment = None;
        candidate.match_score = None;
        Ok(())
    }

    /// Pool payments ranked for one candidate, for manual linking
    pub fn rank_for(&self, id: usize, limit: usize) -> Result<Vec<RankedPayment>> {
        self.require(Self::CANDIDATE_STEPS, "rank_for")?;
        let candidate = self
            .candidate(id)
            .ok_or_else(|| Error::NotFound(format!("candidate {}", id)))?;
        Ok(rank_candidates(&candidate.mapped_data, &self.pool, limit))
    }

    // ========== Merge ==========

    /// Add or remove a row from the pending merge set
    pub fn toggle_merge_selection(&mut self, id: usize) -> Result<bool> {
        self.require(Self::CANDIDATE_STEPS, "toggle_merge_selection")?;
        if id >= self.candidates.len() {
            return Err(Error::NotFound(format!("candidate {}", id)));
        }
        if let Some(pos) = self.merge_selection.iter().position(|i| *i == id) {
            self.merge_selection.remove(pos);
            Ok(false)
        } else {
            self.merge_selection.push(id);
            Ok(true)
        }
    }

    /// Tag every row in the merge set with a new group id
    pub fn merge_selected(&mut self) -> Result<Uuid> {
        self.require(Self::CANDIDATE_STEPS, "merge_selected")?;
        if self.merge_selection.len() < 2 {
            return Err(Error::InvalidData("select at least two rows to merge".into()));
        }

        let group = Uuid::new_v4();
        for id in std::mem::take(&mut self.merge_selection) {
            if let Some(candidate) = self.candidates.get_mut(id) {
                candidate.merge_group = Some(group);
            }
        }
        info!("Created merge group {}", group);
        Ok(group)
    }

    /// Clear a merge group; returns how many rows carried it
    pub fn unmerge(&mut self, group: Uuid) -> Result<usize> {
        self.require(Self::CANDIDATE_STEPS, "unmerge")?;
        let mut cleared = 0;
        for candidate in &mut self.candidates {
            if candidate.merge_group == Some(group) {
                candidate.merge_group = None;
                cleared += 1;
            }
        }
        if cleared == 0 {
            return Err(Error::NotFound(format!("merge group {}", group)));
        }
        Ok(cleared)
    }

    // ========== Filters & stats ==========

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.search = search.into();
    }

    pub fn set_show_only_matches(&mut self, only_matches: bool) {
        self.show_only_matches = only_matches;
    }

    /// Candidates passing both the match-only toggle and the search text
    pub fn visible_candidates(&self) -> Vec<&ParsedTransaction> {
        let needle = self.search.trim().to_lowercase();
        self.candidates
            .iter()
            .filter(|c| !self.show_only_matches || c.is_matched())
            .filter(|c| needle.is_empty() || matches_search(c, &needle))
            .collect()
    }

    pub fn stats(&self) -> ImportStats {
        let mut stats = ImportStats {
            total: self.candidates.len(),
            ..Default::default()
        };
        for c in &self.candidates {
            if c.is_valid {
                stats.valid += 1;
            }
            if c.selected {
                stats.selected += 1;
            }
            if c.is_matched() {
                stats.matched += 1;
            }
            if c.selected && c.is_valid {
                if self.options.reconcile_matched && c.is_matched() {
                    stats.to_reconcile += 1;
                } else {
                    stats.to_import += 1;
                }
            }
            match c.outcome {
                Some(ref o) if o.is_completed() => stats.completed += 1,
                Some(_) => stats.failed += 1,
                None => {}
            }
        }
        stats.invalid = stats.total - stats.valid;
        stats
    }

    // ========== Submission ==========

    /// Build the batch and move to confirm
    ///
    /// Clears earlier outcomes and resets progress. An empty batch completes
    /// immediately with progress 100.
    pub fn begin_submission(&mut self) -> Result<Vec<SubmissionItem>> {
        self.require(&[ImportStep::Reconciliation], "begin_submission")?;

        let mut items = Vec::new();
        for candidate in &mut self.candidates {
            candidate.outcome = None;
            if !(candidate.selected && candidate.is_valid) {
                continue;
            }
            let action = match candidate.matched_payment {
                Some(ref p) if self.options.reconcile_matched => SubmissionAction::Reconcile {
                    payment_id: p.id.clone(),
                },
                _ => SubmissionAction::Create,
            };
            match NewPayment::from_candidate(candidate) {
                Ok(payment) => items.push(SubmissionItem {
                    candidate_id: candidate.id,
                    action,
                    payment,
                }),
                Err(e) => warn!("Skipping row {}: {}", candidate.id, e),
            }
        }

        self.batch_size = items.len();
        self.processed = 0;
        self.progress = if items.is_empty() { 100.0 } else { 0.0 };
        info!("Submitting {} rows", items.len());
        self.set_step(ImportStep::Confirm);
        Ok(items)
    }

    /// Store one item's outcome and advance progress
    pub fn record_outcome(&mut self, id: usize, outcome: ImportOutcome) -> Result<()> {
        self.require(&[ImportStep::Confirm], "record_outcome")?;
        let candidate = self.candidate_mut(id)?;
        if let Some(ref message) = outcome.message {
            warn!("Row {} failed: {}", id, message);
        }
        candidate.outcome = Some(outcome);

        self.processed = (self.processed + 1).min(self.batch_size);
        self.progress = if self.batch_size == 0 {
            100.0
        } else {
            self.processed as f64 / self.batch_size as f64 * 100.0
        };
        Ok(())
    }

    /// Outcome summary for the current batch
    pub fn report(&self) -> SubmissionReport {
        let stats = self.stats();
        SubmissionReport {
            total: self.batch_size,
            completed: stats.completed,
            failed: stats.failed,
        }
    }

    /// Run the whole batch sequentially
    ///
    /// Item failures are recorded on the candidate and never stop the batch.
    pub async fn submit<B>(&mut self, backend: &B, delay: Option<Duration>) -> Result<SubmissionReport>
    where
        B: PaymentBackend + ?Sized,
    {
        let items = self.begin_submission()?;
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                pause(delay).await;
            }
            let outcome = perform(backend, item).await;
            self.record_outcome(item.candidate_id, outcome)?;
        }
        let report = self.report();
        log_report(&report);
        Ok(report)
    }
}

/// Run a batch on a session shared with readers
///
/// The lock is held only to begin the batch and to record each outcome, so
/// progress can be observed while backend calls are in flight.
pub async fn submit_shared<B>(
    session: Arc<Mutex<ImportSession>>,
    backend: &B,
    delay: Option<Duration>,
) -> Result<SubmissionReport>
where
    B: PaymentBackend + ?Sized,
{
    let items = session.lock().await.begin_submission()?;
    drive_submission(&session, items, backend, delay).await
}

/// Submit items produced by [`ImportSession::begin_submission`]
pub async fn drive_submission<B>(
    session: &Mutex<ImportSession>,
    items: Vec<SubmissionItem>,
    backend: &B,
    delay: Option<Duration>,
) -> Result<SubmissionReport>
where
    B: PaymentBackend + ?Sized,
{
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            pause(delay).await;
        }
        let outcome = perform(backend, item).await;
        session.lock().await.record_outcome(item.candidate_id, outcome)?;
    }
    let report = session.lock().await.report();
    log_report(&report);
    Ok(report)
}

async fn pause(delay: Option<Duration>) {
    if let Some(delay) = delay.filter(|d| !d.is_zero()) {
        tokio::time::sleep(delay).await;
    }
}

async fn perform<B>(backend: &B, item: &SubmissionItem) -> ImportOutcome
where
    B: PaymentBackend + ?Sized,
{
    let result = match item.action {
        SubmissionAction::Create => backend
            .create_payment(&item.payment)
            .await
            .map(|created| created.id),
        SubmissionAction::Reconcile { ref payment_id } => backend
            .reconcile_payment(payment_id, &item.payment)
            .await
            .map(|()| payment_id.clone()),
    };

    match result {
        Ok(id) => ImportOutcome::completed(id),
        Err(Error::Backend { message, .. }) => ImportOutcome::failed(message),
        Err(e) => ImportOutcome::failed(e.to_string()),
    }
}

fn log_report(report: &SubmissionReport) {
    info!(
        "Submission finished: {} completed, {} failed of {}",
        report.completed, report.failed, report.total
    );
}

fn matches_search(candidate: &ParsedTransaction, needle: &str) -> bool {
    let data = &candidate.mapped_data;
    let text_hit = [data.description.as_deref(), data.reference.as_deref()]
        .into_iter()
        .flatten()
        .any(|s| s.to_lowercase().contains(needle));
    if text_hit {
        return true;
    }
    data.amount.is_some_and(|a| {
        let plain = a.to_string();
        let fixed = format!("{:.2}", a);
        let comma = fixed.replace('.', ",");
        [plain, fixed, comma].iter().any(|s| s.contains(needle))
    })
}
