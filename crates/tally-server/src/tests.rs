//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use base64::Engine;
use chrono::NaiveDate;
use http_body_util::BodyExt;
use tally_core::{ExistingPayment, MemoryBackend};
use tower::ServiceExt;

const STATEMENT: &str = "Data;Descrição;Valor\n\
                         05/01/2024;Compra no Mercado;-100,00\n\
                         10/01/2024;Salário;3.000,00\n\
                         12/01/2024;Teste;abc\n";

fn pool() -> Vec<ExistingPayment> {
    vec![ExistingPayment {
        id: "pay-1".into(),
        description: "Mercado".into(),
        amount: 100.0,
        date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
        reference: None,
    }]
}

fn open_config() -> ServerConfig {
    ServerConfig {
        require_auth: false,
        allowed_origins: vec![],
        ..Default::default()
    }
}

fn setup_app_with(backend: MemoryBackend) -> Router {
    create_router(
        BackendClient::Memory(backend),
        TallyConfig::default(),
        None,
        open_config(),
    )
}

fn setup_test_app() -> Router {
    setup_app_with(MemoryBackend::with_payments(pool()))
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> axum::response::Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

async fn upload(app: &Router, file_name: &str, csv: &str) -> axum::response::Response {
    let body = serde_json::json!({
        "file_name": file_name,
        "csv_data": base64::engine::general_purpose::STANDARD.encode(csv),
    });
    send(app, "POST", "/api/imports/json", Some(body)).await
}

/// Upload the statement and return the session id
async fn start_import(app: &Router) -> String {
    let response = upload(app, "extrato.csv", STATEMENT).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = get_body_json(response).await;
    json["id"].as_str().unwrap().to_string()
}

// ========== Health & Auth ==========

#[tokio::test]
async fn test_health() {
    let app = setup_test_app();
    let response = send(&app, "GET", "/api/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["backend"], "memory");
    assert_eq!(json["active_sessions"], 0);
}

#[tokio::test]
async fn test_health_degraded_backend() {
    let app = setup_app_with(MemoryBackend::unhealthy());
    let json = get_body_json(send(&app, "GET", "/api/health", None).await).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["backend_healthy"], false);
}

#[tokio::test]
async fn test_auth_required() {
    let config = ServerConfig {
        api_keys: vec!["secret-key".into()],
        ..Default::default()
    };
    let app = create_router(BackendClient::memory(), TallyConfig::default(), None, config);

    let response = send(&app, "GET", "/api/health", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .header("authorization", "Bearer secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[test]
fn test_validate_api_key() {
    let keys = vec!["abc123".to_string(), "other".to_string()];
    assert!(validate_api_key("abc123", &keys));
    assert!(validate_api_key("other", &keys));
    assert!(!validate_api_key("abc12", &keys));
    assert!(!validate_api_key("abc124", &keys));
    assert!(!validate_api_key("anything", &[]));
}

#[test]
fn test_parse_api_keys() {
    assert_eq!(parse_api_keys(" a, b ,,c "), vec!["a", "b", "c"]);
    assert!(parse_api_keys("").is_empty());
}

#[tokio::test]
async fn test_security_headers() {
    let app = setup_test_app();
    let response = send(&app, "GET", "/api/health", None).await;
    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert!(headers.get("content-security-policy").is_some());
}

// ========== Upload ==========

#[tokio::test]
async fn test_json_upload_creates_session() {
    let app = setup_test_app();
    let response = upload(&app, "extrato.csv", STATEMENT).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = get_body_json(response).await;
    assert_eq!(json["step"], "mapping");
    assert_eq!(json["file_name"], "extrato.csv");
    assert_eq!(json["row_count"], 3);
    assert_eq!(json["headers"].as_array().unwrap().len(), 3);
    assert_eq!(json["mappings"][0]["system_field"], "date");
    assert_eq!(json["mappings"][1]["system_field"], "description");
    assert_eq!(json["mappings"][2]["system_field"], "amount");
    assert!(json["duplicate_targets"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_rejects_non_csv() {
    let app = setup_test_app();
    let response = upload(&app, "extrato.xlsx", STATEMENT).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = get_body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains(".csv"));
}

#[tokio::test]
async fn test_upload_rejects_bad_base64() {
    let app = setup_test_app();
    let body = serde_json::json!({
        "file_name": "extrato.csv",
        "csv_data": "not base64!!",
    });
    let response = send(&app, "POST", "/api/imports/json", Some(body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_rejects_empty_file() {
    let app = setup_test_app();
    let response = upload(&app, "vazio.csv", "\n\n").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_with_format() {
    let app = setup_test_app();
    let body = serde_json::json!({
        "file_name": "amex.csv",
        "csv_data": base64::engine::general_purpose::STANDARD
            .encode("Date,Description,Amount\n01/15/2024,STARBUCKS,5.50\n"),
        "format": "amex",
    });
    let response = send(&app, "POST", "/api/imports/json", Some(body)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = get_body_json(response).await;
    assert_eq!(json["source_format"], "amex");

    let body = serde_json::json!({
        "file_name": "x.csv",
        "csv_data": base64::engine::general_purpose::STANDARD.encode("a,b\n1,2\n"),
        "format": "nubank",
    });
    let response = send(&app, "POST", "/api/imports/json", Some(body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_multipart_upload() {
    let app = setup_test_app();
    let boundary = "tallyboundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"format\"\r\n\r\nauto\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"extrato.csv\"\r\n\
         Content-Type: text/csv\r\n\r\n{csv}\r\n--{b}--\r\n",
        b = boundary,
        csv = STATEMENT
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/imports")
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = get_body_json(response).await;
    assert_eq!(json["file_name"], "extrato.csv");
    assert_eq!(json["row_count"], 3);
}

// ========== Wizard ==========

#[tokio::test]
async fn test_unknown_session() {
    let app = setup_test_app();
    let uri = format!("/api/imports/{}", uuid::Uuid::new_v4());
    let response = send(&app, "GET", &uri, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_wrong_step_is_conflict() {
    let app = setup_test_app();
    let id = start_import(&app).await;

    let response = send(&app, "POST", &format!("/api/imports/{}/reconcile", id), None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = send(&app, "POST", &format!("/api/imports/{}/submit", id), None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_update_mapping() {
    let app = setup_test_app();
    let id = start_import(&app).await;

    let body = serde_json::json!({"csv_column": "Descrição", "system_field": "reference"});
    let response = send(&app, "PUT", &format!("/api/imports/{}/mappings", id), Some(body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["mappings"][1]["system_field"], "reference");

    let body = serde_json::json!({"csv_column": "Nope", "system_field": "amount"});
    let response = send(&app, "PUT", &format!("/api/imports/{}/mappings", id), Some(body)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_process_and_filter_candidates() {
    let app = setup_test_app();
    let id = start_import(&app).await;

    let response = send(&app, "POST", &format!("/api/imports/{}/process", id), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["step"], "preview");
    assert_eq!(json["stats"]["total"], 3);
    assert_eq!(json["stats"]["valid"], 2);
    assert_eq!(json["stats"]["matched"], 1);

    let response = send(&app, "GET", &format!("/api/imports/{}/candidates", id), None).await;
    let json = get_body_json(response).await;
    let candidates = json["candidates"].as_array().unwrap();
    assert_eq!(candidates.len(), 3);
    assert_eq!(candidates[0]["match_score"], 100);
    assert_eq!(candidates[0]["mapped_data"]["type"], "expense");
    assert_eq!(candidates[2]["is_valid"], false);
    assert_eq!(candidates[2]["validation_errors"][0], "Valor inválido: abc");

    let uri = format!("/api/imports/{}/candidates?only_matches=true", id);
    let json = get_body_json(send(&app, "GET", &uri, None).await).await;
    assert_eq!(json["candidates"].as_array().unwrap().len(), 1);
    assert_eq!(json["show_only_matches"], true);

    let uri = format!("/api/imports/{}/candidates?only_matches=false&search=sal", id);
    let json = get_body_json(send(&app, "GET", &uri, None).await).await;
    let candidates = json["candidates"].as_array().unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0]["mapped_data"]["description"], "Salário");
}

#[tokio::test]
async fn test_selection_and_links() {
    let app = setup_test_app();
    let id = start_import(&app).await;
    send(&app, "POST", &format!("/api/imports/{}/process", id), None).await;

    // Invalid rows cannot be selected
    let uri = format!("/api/imports/{}/candidates/2/toggle", id);
    assert_eq!(send(&app, "POST", &uri, None).await.status(), StatusCode::BAD_REQUEST);

    let uri = format!("/api/imports/{}/candidates/1/toggle", id);
    let json = get_body_json(send(&app, "POST", &uri, None).await).await;
    assert_eq!(json["selected"], false);
    assert_eq!(json["stats"]["selected"], 1);

    let uri = format!("/api/imports/{}/select-all", id);
    let json = get_body_json(send(&app, "POST", &uri, Some(serde_json::json!({"selected": true}))).await).await;
    assert_eq!(json["selected"], 2);

    let uri = format!("/api/imports/{}/candidates/1/matches", id);
    let response = send(&app, "GET", &uri, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let uri = format!("/api/imports/{}/candidates/1/link", id);
    let body = serde_json::json!({"payment_id": "pay-1", "score": 70});
    let json = get_body_json(send(&app, "POST", &uri, Some(body)).await).await;
    assert_eq!(json["matched_payment"]["id"], "pay-1");
    assert_eq!(json["match_score"], 70);

    let body = serde_json::json!({"payment_id": "missing"});
    assert_eq!(send(&app, "POST", &uri, Some(body)).await.status(), StatusCode::NOT_FOUND);

    let json = get_body_json(send(&app, "DELETE", &uri, None).await).await;
    assert!(json["matched_payment"].is_null());
    assert!(json["match_score"].is_null());
}

#[tokio::test]
async fn test_merge_and_unmerge() {
    let app = setup_test_app();
    let id = start_import(&app).await;
    send(&app, "POST", &format!("/api/imports/{}/process", id), None).await;

    let uri = format!("/api/imports/{}/merge", id);
    let response = send(&app, "POST", &uri, Some(serde_json::json!({"ids": [0]}))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // An unknown id rejects the whole request without leaving a partial set
    let response = send(&app, "POST", &uri, Some(serde_json::json!({"ids": [0, 99]}))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let snapshot = get_body_json(send(&app, "GET", &format!("/api/imports/{}", id), None).await).await;
    assert!(snapshot["merge_selection"].as_array().unwrap().is_empty());

    let response = send(&app, "POST", &uri, Some(serde_json::json!({"ids": [0, 1]}))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let group = json["merge_group"].as_str().unwrap().to_string();

    let snapshot = get_body_json(send(&app, "GET", &format!("/api/imports/{}", id), None).await).await;
    assert!(snapshot["merge_selection"].as_array().unwrap().is_empty());

    let uri = format!("/api/imports/{}/merge/{}", id, group);
    let json = get_body_json(send(&app, "DELETE", &uri, None).await).await;
    assert_eq!(json["cleared"], 2);
    assert_eq!(send(&app, "DELETE", &uri, None).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_back_and_close() {
    let app = setup_test_app();
    let id = start_import(&app).await;
    send(&app, "POST", &format!("/api/imports/{}/process", id), None).await;

    let json = get_body_json(send(&app, "POST", &format!("/api/imports/{}/back", id), None).await).await;
    assert_eq!(json["step"], "mapping");

    let response = send(&app, "DELETE", &format!("/api/imports/{}", id), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = send(&app, "GET", &format!("/api/imports/{}", id), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_full_submission() {
    let backend = MemoryBackend::with_payments(pool());
    let app = setup_app_with(backend.clone());
    let id = start_import(&app).await;

    send(&app, "POST", &format!("/api/imports/{}/process", id), None).await;
    let response = send(&app, "POST", &format!("/api/imports/{}/reconcile", id), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, "POST", &format!("/api/imports/{}/submit", id), None).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = get_body_json(response).await;
    assert_eq!(json["step"], "confirm");

    let mut snapshot = serde_json::Value::Null;
    for _ in 0..100 {
        snapshot = get_body_json(send(&app, "GET", &format!("/api/imports/{}", id), None).await).await;
        if snapshot["submitting"] == false {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(snapshot["progress"], 100.0);
    assert_eq!(snapshot["stats"]["completed"], 2);
    assert_eq!(snapshot["stats"]["failed"], 0);
    assert_eq!(backend.reconciled().len(), 1);
    assert_eq!(backend.created().len(), 1);

    // A finished batch cannot be reopened; back starts a new import
    let json = get_body_json(send(&app, "POST", &format!("/api/imports/{}/back", id), None).await).await;
    assert_eq!(json["step"], "upload");
    assert_eq!(json["row_count"], 0);

    let response = send(&app, "POST", &format!("/api/imports/{}/submit", id), None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(backend.created().len(), 1);
    assert_eq!(backend.reconciled().len(), 1);
}

#[tokio::test]
async fn test_backend_failure_is_per_item() {
    let backend = MemoryBackend::with_payments(pool());
    backend.fail_on("Salário");
    let app = setup_app_with(backend.clone());
    let id = start_import(&app).await;

    send(&app, "POST", &format!("/api/imports/{}/process", id), None).await;
    send(&app, "POST", &format!("/api/imports/{}/reconcile", id), None).await;
    send(&app, "POST", &format!("/api/imports/{}/submit", id), None).await;

    let mut snapshot = serde_json::Value::Null;
    for _ in 0..100 {
        snapshot = get_body_json(send(&app, "GET", &format!("/api/imports/{}", id), None).await).await;
        if snapshot["submitting"] == false {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(snapshot["stats"]["completed"], 1);
    assert_eq!(snapshot["stats"]["failed"], 1);

    let json = get_body_json(send(&app, "GET", &format!("/api/imports/{}/candidates", id), None).await).await;
    assert_eq!(json["candidates"][1]["outcome"]["status"], "failed");
    assert_eq!(
        json["candidates"][1]["outcome"]["message"],
        "Payment rejected: Salário"
    );
}

#[tokio::test]
async fn test_delegated_mapping() {
    let backend = MemoryBackend::with_payments(pool());
    backend.set_suggestion(vec![
        tally_core::ColumnMapping::new("Data", tally_core::SystemField::Date),
        tally_core::ColumnMapping::new("Valor", tally_core::SystemField::Amount),
    ]);
    let mut import = TallyConfig::default();
    import.session.delegate_mapping = true;
    let app = create_router(BackendClient::Memory(backend), import, None, open_config());

    let json = get_body_json(upload(&app, "extrato.csv", STATEMENT).await).await;
    assert_eq!(json["mappings"][0]["system_field"], "date");
    assert_eq!(json["mappings"][1]["system_field"], "ignore");
    assert_eq!(json["mappings"][2]["system_field"], "amount");
}

#[tokio::test]
async fn test_type_step_requires_format() {
    let mut import = TallyConfig::default();
    import.session.include_type_step = true;
    let app = create_router(BackendClient::memory(), import, None, open_config());

    let response = upload(&app, "extrato.csv", STATEMENT).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = serde_json::json!({
        "file_name": "extrato.csv",
        "csv_data": base64::engine::general_purpose::STANDARD.encode(STATEMENT),
        "format": "generic",
    });
    let response = send(&app, "POST", "/api/imports/json", Some(body)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = get_body_json(response).await;
    assert_eq!(json["steps"][0], "type");
    assert_eq!(json["step"], "mapping");
}
