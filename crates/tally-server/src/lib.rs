//! Tally Web Server
//!
//! Axum-based REST API driving the CSV import wizard.
//!
//! Security features:
//! - API-key authentication (secure by default, use --no-auth for local dev)
//! - Restrictive CORS policy
//! - Input validation (file size and extension limits)
//! - Sanitized error responses

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::{
    cors::CorsLayer, services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info, warn};

use tally_core::{BackendClient, PaymentBackend, TallyConfig};

mod handlers;

pub use handlers::ImportSessionManager;

/// Maximum file upload size (10 MB)
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Request body limit for upload routes (base64 inflates JSON uploads by a third)
const MAX_BODY_SIZE: usize = MAX_UPLOAD_SIZE * 2;

/// Authorization header for API key auth
const AUTHORIZATION_HEADER: &str = "authorization";

/// Environment variable holding comma-separated API keys
pub const ENV_API_KEYS: &str = "TALLY_API_KEYS";

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Whether authentication is required (secure by default)
    pub require_auth: bool,
    /// Allowed CORS origins (empty = same-origin only in production)
    pub allowed_origins: Vec<String>,
    /// API keys accepted as "Bearer <key>" in the Authorization header
    pub api_keys: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            allowed_origins: vec![],
            api_keys: vec![],
        }
    }
}

/// Shared application state
pub struct AppState {
    pub backend: BackendClient,
    /// Import settings applied to every new session
    pub import: TallyConfig,
    pub config: ServerConfig,
    pub sessions: ImportSessionManager,
}

/// Authentication middleware - validates the bearer API key
///
/// API keys are compared in constant time.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.require_auth {
        return next.run(request).await;
    }

    let api_key_valid = request
        .headers()
        .get(AUTHORIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(|key| validate_api_key(key, &state.config.api_keys))
        .unwrap_or(false);

    if api_key_valid {
        info!(user = "api-key", path = %request.uri().path(), "Authenticated via API key");
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "Unauthorized request - no valid auth");
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "Authentication required"
        })),
    )
        .into_response()
}

/// Validate an API key against the configured keys using constant-time comparison
fn validate_api_key(provided: &str, valid_keys: &[String]) -> bool {
    use subtle::ConstantTimeEq;

    let provided_bytes = provided.as_bytes();

    for key in valid_keys {
        let key_bytes = key.as_bytes();
        // Only same-length keys are compared
        if provided_bytes.len() == key_bytes.len() && bool::from(provided_bytes.ct_eq(key_bytes)) {
            return true;
        }
    }
    false
}

/// Parse a comma-separated list of API keys, skipping blanks
pub fn parse_api_keys(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Success response
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Create the application router
pub fn create_router(
    backend: BackendClient,
    import: TallyConfig,
    static_dir: Option<&str>,
    config: ServerConfig,
) -> Router {
    info!(
        backend = backend.name(),
        host = backend.host(),
        threshold = import.matching.threshold,
        "Import API configured"
    );

    let cors = if config.allowed_origins.is_empty() {
        // Restrictive default: only allow same-origin
        CorsLayer::new()
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    };

    let state = Arc::new(AppState {
        backend,
        import,
        config,
        sessions: ImportSessionManager::new(),
    });

    let upload_routes = Router::new()
        .route("/imports", post(handlers::upload_import))
        .route("/imports/json", post(handlers::upload_import_json))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE));

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .merge(upload_routes)
        .route(
            "/imports/:id",
            get(handlers::get_import).delete(handlers::close_import),
        )
        .route("/imports/:id/mappings", put(handlers::update_mapping))
        .route("/imports/:id/process", post(handlers::process_import))
        .route("/imports/:id/candidates", get(handlers::list_candidates))
        .route(
            "/imports/:id/candidates/:cid/matches",
            get(handlers::candidate_matches),
        )
        .route(
            "/imports/:id/candidates/:cid/toggle",
            post(handlers::toggle_candidate),
        )
        .route(
            "/imports/:id/candidates/:cid/link",
            post(handlers::link_candidate).delete(handlers::unlink_candidate),
        )
        .route("/imports/:id/select-all", post(handlers::select_all))
        .route("/imports/:id/merge", post(handlers::merge_candidates))
        .route("/imports/:id/merge/:group", delete(handlers::unmerge_candidates))
        .route("/imports/:id/reconcile", post(handlers::reconcile_import))
        .route("/imports/:id/back", post(handlers::step_back))
        .route("/imports/:id/submit", post(handlers::submit_import));

    // Security headers
    let csp_value = HeaderValue::from_static(
        "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; img-src 'self' data:; font-src 'self'; connect-src 'self'; frame-ancestors 'none'"
    );

    let mut app = Router::new()
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            csp_value,
        ));

    // Serve static files if directory provided
    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app
}

/// Start the server with custom configuration
pub async fn serve_with_config(
    backend: BackendClient,
    import: TallyConfig,
    host: &str,
    port: u16,
    static_dir: Option<&str>,
    config: ServerConfig,
) -> anyhow::Result<()> {
    if !config.require_auth {
        warn!("⚠️  Authentication disabled - do not expose to network!");
    } else if config.api_keys.is_empty() {
        warn!(
            "⚠️  Authentication required but no API keys configured (set {})",
            ENV_API_KEYS
        );
    }

    check_backend_connection(&backend).await;

    let app = create_router(backend, import, static_dir, config)
        .into_make_service_with_connect_info::<std::net::SocketAddr>();
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Check and log payment backend status
async fn check_backend_connection(backend: &BackendClient) {
    if backend.health_check().await {
        info!("✅ Payment backend connected: {} ({})", backend.name(), backend.host());
    } else {
        warn!(
            "⚠️  Payment backend configured but not responding: {} ({})",
            backend.name(),
            backend.host()
        );
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn conflict(msg: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn bad_gateway(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: msg.to_string(),
            internal: None,
        }
    }

    /// Generic 500 keeping the cause for the log
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            // Return generic message to client
            message: "An internal error occurred".to_string(),
            internal: Some(err.into()),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl From<tally_core::Error> for AppError {
    fn from(err: tally_core::Error) -> Self {
        use tally_core::Error;

        match err {
            Error::InvalidState(msg) => Self::conflict(&msg),
            Error::InvalidData(msg) | Error::UnsupportedFile(msg) => Self::bad_request(&msg),
            Error::NotFound(what) => Self::not_found(&format!("Not found: {}", what)),
            Error::Backend { status, message } => {
                warn!(status, "Payment backend error: {}", message);
                Self::bad_gateway(&format!("Payment backend error: {}", message))
            }
            other => Self::internal(other),
        }
    }
}

#[cfg(test)]
mod tests;
