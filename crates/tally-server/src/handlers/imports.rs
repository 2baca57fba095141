//! Import wizard handlers
//!
//! One session per upload. Each endpoint locks the session, runs one wizard
//! operation and returns the updated view. Submission runs in a background
//! task; clients poll the session snapshot for progress.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::sessions::SharedSession;
use crate::{AppError, AppState, SuccessResponse, MAX_UPLOAD_SIZE};
use tally_core::{
    drive_submission, ColumnMapping, ImportSession, ImportStats, ImportStep, ParsedTransaction,
    PaymentBackend, RankedPayment, SourceFormat, SystemField,
};

/// Default number of ranked payments returned for manual linking
const DEFAULT_MATCH_LIMIT: usize = 10;

/// Upper bound on ranked payments per request
const MAX_MATCH_LIMIT: usize = 50;

/// Wizard state returned by most endpoints
#[derive(Debug, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub step: ImportStep,
    pub steps: Vec<ImportStep>,
    pub source_format: SourceFormat,
    pub file_name: Option<String>,
    pub headers: Vec<String>,
    pub row_count: usize,
    pub mappings: Vec<ColumnMapping>,
    pub duplicate_targets: Vec<SystemField>,
    pub stats: ImportStats,
    pub progress: f64,
    pub submitting: bool,
    pub search: String,
    pub show_only_matches: bool,
    pub merge_selection: Vec<usize>,
}

impl SessionSnapshot {
    fn new(id: Uuid, session: &ImportSession) -> Self {
        Self {
            id,
            step: session.step(),
            steps: session.steps().to_vec(),
            source_format: session.source_format(),
            file_name: session.file_name().map(String::from),
            headers: session.headers().to_vec(),
            row_count: session.row_count(),
            mappings: session.mappings().to_vec(),
            duplicate_targets: session.duplicate_targets(),
            stats: session.stats(),
            progress: session.progress(),
            submitting: session.is_submitting(),
            search: session.search().to_string(),
            show_only_matches: session.show_only_matches(),
            merge_selection: session.merge_selection().to_vec(),
        }
    }
}

async fn find_session(state: &AppState, id: Uuid) -> Result<SharedSession, AppError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| AppError::not_found("Import session not found"))
}

fn check_upload(file_name: &str, size: usize) -> Result<(), AppError> {
    if !file_name.to_lowercase().ends_with(".csv") {
        return Err(AppError::bad_request("Only .csv files can be imported"));
    }
    if size > MAX_UPLOAD_SIZE {
        return Err(AppError::bad_request(&format!(
            "File too large. Maximum size is {} MB",
            MAX_UPLOAD_SIZE / 1024 / 1024
        )));
    }
    Ok(())
}

/// Parse an optional `format` value; empty or "auto" means detect from the header
fn parse_format(value: Option<&str>) -> Result<Option<SourceFormat>, AppError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("auto") => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|e: String| AppError::bad_request(&e)),
    }
}

/// Shared upload path: build a session, load the file, register it
async fn start_session(
    state: &AppState,
    file_name: &str,
    data: &[u8],
    format: Option<SourceFormat>,
) -> Result<SessionSnapshot, AppError> {
    check_upload(file_name, data.len())?;

    let mut session = ImportSession::new(state.import.session, state.import.matching);
    match format {
        Some(format) => session.select_source_format(format)?,
        None if session.step() == ImportStep::Type => {
            return Err(AppError::bad_request(
                "A source format is required when the type step is enabled",
            ));
        }
        None => {}
    }

    let text = String::from_utf8_lossy(data);
    let rows = session.load_csv(file_name, &text)?;
    info!(
        file = file_name,
        rows,
        format = %session.source_format(),
        "CSV uploaded"
    );

    if session.options().delegate_mapping {
        match state.backend.suggest_mapping(session.headers()).await {
            Ok(Some(suggested)) => session.apply_suggested_mapping(&suggested)?,
            Ok(None) => debug!("Backend has no mapping suggestion"),
            Err(e) => warn!("Mapping suggestion failed, keeping auto mapping: {}", e),
        }
    }

    let id = state.sessions.insert(session).await;
    let shared = find_session(state, id).await?;
    let session = shared.lock().await;
    Ok(SessionSnapshot::new(id, &session))
}

/// POST /api/imports - Upload a CSV file
///
/// Expects multipart form with:
/// - file: CSV file (required, max 10MB, must end in .csv)
/// - format: source format (optional: generic, chase, bofa, amex, auto)
pub async fn upload_import(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SessionSnapshot>), AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut format: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(&format!("Failed to read form field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload.csv").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::bad_request("Failed to read file data"))?;
                check_upload(&file_name, bytes.len())?;
                file = Some((file_name, bytes.to_vec()));
            }
            "format" => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("Failed to read format"))?;
                format = Some(value);
            }
            _ => {}
        }
    }

    let (file_name, data) = file.ok_or_else(|| AppError::bad_request("Missing file field"))?;
    let format = parse_format(format.as_deref())?;
    let snapshot = start_session(&state, &file_name, &data, format).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// JSON upload request (base64 encoded CSV)
#[derive(Debug, Deserialize)]
pub struct ImportJsonRequest {
    pub file_name: String,
    /// Base64 encoded CSV data
    pub csv_data: String,
    #[serde(default)]
    pub format: Option<String>,
}

/// POST /api/imports/json - Upload a CSV file as base64 JSON
pub async fn upload_import_json(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImportJsonRequest>,
) -> Result<(StatusCode, Json<SessionSnapshot>), AppError> {
    use base64::Engine;

    let data = base64::engine::general_purpose::STANDARD
        .decode(&req.csv_data)
        .map_err(|e| AppError::bad_request(&format!("Invalid base64 data: {}", e)))?;

    let format = parse_format(req.format.as_deref())?;
    let snapshot = start_session(&state, &req.file_name, &data, format).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /api/imports/:id - Session snapshot
pub async fn get_import(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let shared = find_session(&state, id).await?;
    let session = shared.lock().await;
    Ok(Json(SessionSnapshot::new(id, &session)))
}

/// DELETE /api/imports/:id - Close the wizard
pub async fn close_import(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse>, AppError> {
    let shared = state
        .sessions
        .remove(id)
        .await
        .ok_or_else(|| AppError::not_found("Import session not found"))?;
    shared.lock().await.reset();
    info!("Closed import session {}", id);
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMappingRequest {
    pub csv_column: String,
    pub system_field: SystemField,
}

/// PUT /api/imports/:id/mappings - Change one column's target field
pub async fn update_mapping(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateMappingRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let shared = find_session(&state, id).await?;
    let mut session = shared.lock().await;
    session.update_mapping(&req.csv_column, req.system_field)?;
    Ok(Json(SessionSnapshot::new(id, &session)))
}

/// POST /api/imports/:id/process - Normalize, validate and match all rows
pub async fn process_import(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let shared = find_session(&state, id).await?;
    {
        let session = shared.lock().await;
        if session.step() != ImportStep::Mapping {
            return Err(AppError::conflict(&format!(
                "process is not available at the {} step",
                session.step()
            )));
        }
    }

    // Fetch the pool without holding the session lock
    let pool = state.backend.list_payments().await?;
    debug!("Fetched {} existing payments", pool.len());

    let mut session = shared.lock().await;
    session.process(pool)?;
    Ok(Json(SessionSnapshot::new(id, &session)))
}

#[derive(Debug, Deserialize)]
pub struct CandidateQuery {
    pub search: Option<String>,
    pub only_matches: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CandidateList {
    pub stats: ImportStats,
    pub search: String,
    pub show_only_matches: bool,
    pub candidates: Vec<ParsedTransaction>,
}

/// GET /api/imports/:id/candidates - Visible candidates
///
/// `search` and `only_matches` update the session's filters; omitted
/// parameters keep the current ones.
pub async fn list_candidates(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<CandidateQuery>,
) -> Result<Json<CandidateList>, AppError> {
    let shared = find_session(&state, id).await?;
    let mut session = shared.lock().await;

    if let Some(search) = query.search {
        session.set_search(search);
    }
    if let Some(only_matches) = query.only_matches {
        session.set_show_only_matches(only_matches);
    }

    Ok(Json(CandidateList {
        stats: session.stats(),
        search: session.search().to_string(),
        show_only_matches: session.show_only_matches(),
        candidates: session.visible_candidates().into_iter().cloned().collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct MatchesQuery {
    pub limit: Option<usize>,
}

/// GET /api/imports/:id/candidates/:cid/matches - Ranked payments for manual linking
pub async fn candidate_matches(
    State(state): State<Arc<AppState>>,
    Path((id, cid)): Path<(Uuid, usize)>,
    Query(query): Query<MatchesQuery>,
) -> Result<Json<Vec<RankedPayment>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_MATCH_LIMIT)
        .clamp(1, MAX_MATCH_LIMIT);
    let shared = find_session(&state, id).await?;
    let session = shared.lock().await;
    Ok(Json(session.rank_for(cid, limit)?))
}

#[derive(Debug, Serialize)]
pub struct SelectionResponse {
    pub id: usize,
    pub selected: bool,
    pub stats: ImportStats,
}

/// POST /api/imports/:id/candidates/:cid/toggle - Flip selection
pub async fn toggle_candidate(
    State(state): State<Arc<AppState>>,
    Path((id, cid)): Path<(Uuid, usize)>,
) -> Result<Json<SelectionResponse>, AppError> {
    let shared = find_session(&state, id).await?;
    let mut session = shared.lock().await;
    let selected = session.toggle_selection(cid)?;
    Ok(Json(SelectionResponse {
        id: cid,
        selected,
        stats: session.stats(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SelectAllRequest {
    pub selected: bool,
}

/// POST /api/imports/:id/select-all - Select or clear every valid row
pub async fn select_all(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<SelectAllRequest>,
) -> Result<Json<ImportStats>, AppError> {
    let shared = find_session(&state, id).await?;
    let mut session = shared.lock().await;
    session.select_all(req.selected)?;
    Ok(Json(session.stats()))
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub payment_id: String,
    #[serde(default)]
    pub score: Option<u8>,
}

/// POST /api/imports/:id/candidates/:cid/link - Link to a payment from the pool
pub async fn link_candidate(
    State(state): State<Arc<AppState>>,
    Path((id, cid)): Path<(Uuid, usize)>,
    Json(req): Json<LinkRequest>,
) -> Result<Json<ParsedTransaction>, AppError> {
    let shared = find_session(&state, id).await?;
    let mut session = shared.lock().await;

    let payment = session
        .pool()
        .iter()
        .find(|p| p.id == req.payment_id)
        .cloned()
        .ok_or_else(|| AppError::not_found("Payment not found"))?;

    session.link_payment(cid, payment, req.score)?;
    candidate_json(&session, cid)
}

/// DELETE /api/imports/:id/candidates/:cid/link - Remove a link
pub async fn unlink_candidate(
    State(state): State<Arc<AppState>>,
    Path((id, cid)): Path<(Uuid, usize)>,
) -> Result<Json<ParsedTransaction>, AppError> {
    let shared = find_session(&state, id).await?;
    let mut session = shared.lock().await;
    session.unlink_payment(cid)?;
    candidate_json(&session, cid)
}

fn candidate_json(session: &ImportSession, cid: usize) -> Result<Json<ParsedTransaction>, AppError> {
    session
        .candidate(cid)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::not_found("Candidate not found"))
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub ids: Vec<usize>,
}

#[derive(Debug, Serialize)]
pub struct MergeResponse {
    pub merge_group: Uuid,
}

/// POST /api/imports/:id/merge - Group rows under a new merge id
pub async fn merge_candidates(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<MergeRequest>,
) -> Result<Json<MergeResponse>, AppError> {
    let shared = find_session(&state, id).await?;
    let mut session = shared.lock().await;

    if let Some(missing) = req.ids.iter().find(|cid| session.candidate(**cid).is_none()) {
        return Err(AppError::not_found(&format!("Not found: candidate {}", missing)));
    }

    // The merge set is rebuilt from the request
    for pending in session.merge_selection().to_vec() {
        session.toggle_merge_selection(pending)?;
    }
    for cid in &req.ids {
        if !session.merge_selection().contains(cid) {
            session.toggle_merge_selection(*cid)?;
        }
    }

    match session.merge_selected() {
        Ok(merge_group) => Ok(Json(MergeResponse { merge_group })),
        Err(e) => {
            for pending in session.merge_selection().to_vec() {
                session.toggle_merge_selection(pending)?;
            }
            Err(e.into())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UnmergeResponse {
    pub cleared: usize,
}

/// DELETE /api/imports/:id/merge/:group - Dissolve a merge group
pub async fn unmerge_candidates(
    State(state): State<Arc<AppState>>,
    Path((id, group)): Path<(Uuid, Uuid)>,
) -> Result<Json<UnmergeResponse>, AppError> {
    let shared = find_session(&state, id).await?;
    let mut session = shared.lock().await;
    let cleared = session.unmerge(group)?;
    Ok(Json(UnmergeResponse { cleared }))
}

/// POST /api/imports/:id/reconcile - Preview to reconciliation
pub async fn reconcile_import(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let shared = find_session(&state, id).await?;
    let mut session = shared.lock().await;
    session.proceed_to_reconciliation()?;
    Ok(Json(SessionSnapshot::new(id, &session)))
}

/// POST /api/imports/:id/back - Previous step (resets from the first one)
pub async fn step_back(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let shared = find_session(&state, id).await?;
    let mut session = shared.lock().await;
    session.back()?;
    Ok(Json(SessionSnapshot::new(id, &session)))
}

/// POST /api/imports/:id/submit - Start the batch in the background
///
/// Returns 202 with the snapshot at the confirm step; poll
/// `GET /api/imports/:id` until `submitting` is false.
pub async fn submit_import(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<SessionSnapshot>), AppError> {
    let shared = find_session(&state, id).await?;

    let (items, snapshot) = {
        let mut session = shared.lock().await;
        let items = session.begin_submission()?;
        (items, SessionSnapshot::new(id, &session))
    };

    let backend = state.backend.clone();
    let delay = state.import.submission.delay();
    info!("Import {}: submitting {} rows", id, items.len());

    tokio::spawn(async move {
        if let Err(e) = drive_submission(&shared, items, &backend, delay).await {
            warn!("Import {} submission stopped: {}", id, e);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}
