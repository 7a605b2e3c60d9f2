// Statusync - Web Server
// Import endpoints for the three status pipelines

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use statusync::{
    find_entity_by_key, get_recent_import_runs, get_status_history, setup_database,
    ColumnOverrides, Config, Entity, Field, ImportError, ImportRun, Pipeline,
    ReconciliationEngine, StatusEvent, StatusStream,
};

/// Uploads larger than this are refused
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    engine: ReconciliationEngine,
}

impl AppState {
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }

    fn with_message(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }
}

fn failure(status: StatusCode, error: impl Into<String>) -> Response {
    let body: ApiResponse<()> = ApiResponse {
        success: false,
        message: None,
        data: None,
        error: Some(error.into()),
    };
    (status, Json(body)).into_response()
}

/// Optional 0-based column overrides, one per field
#[derive(Debug, Default, Deserialize)]
struct OverrideParams {
    key: Option<usize>,
    status: Option<usize>,
    description: Option<usize>,
    location: Option<usize>,
    customer: Option<usize>,
    line: Option<usize>,
    salesperson: Option<usize>,
}

impl From<OverrideParams> for ColumnOverrides {
    fn from(params: OverrideParams) -> Self {
        ColumnOverrides::new()
            .set_opt(Field::Key, params.key)
            .set_opt(Field::Status, params.status)
            .set_opt(Field::Description, params.description)
            .set_opt(Field::Location, params.location)
            .set_opt(Field::Customer, params.customer)
            .set_opt(Field::LineNumber, params.line)
            .set_opt(Field::Salesperson, params.salesperson)
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HistoryResponse {
    entity: Entity,
    stream: StatusStream,
    events: Vec<StatusEvent>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/import/:pipeline - Reconcile an uploaded snapshot (multipart field `file`)
async fn import_snapshot(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(params): Query<OverrideParams>,
    mut multipart: Multipart,
) -> Response {
    let Some(pipeline) = Pipeline::parse(&slug) else {
        return failure(StatusCode::NOT_FOUND, format!("Unknown pipeline: {}", slug));
    };

    let mut upload = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return failure(StatusCode::BAD_REQUEST, e.to_string()),
        };
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload.csv").to_string();
        match field.bytes().await {
            Ok(bytes) => upload = Some((file_name, bytes)),
            Err(e) => return failure(StatusCode::BAD_REQUEST, e.to_string()),
        }
        break;
    }

    let Some((file_name, bytes)) = upload else {
        return failure(StatusCode::BAD_REQUEST, "No se recibió ningún archivo (campo 'file')");
    };

    let overrides = ColumnOverrides::from(params);
    let result = tokio::task::spawn_blocking(move || {
        let conn = state.conn();
        state
            .engine
            .reconcile_upload(&*conn, pipeline, &file_name, &bytes, &overrides)
    })
    .await;

    match result {
        Ok(Ok(report)) => {
            let message = report.message();
            (StatusCode::OK, Json(ApiResponse::ok(report).with_message(message))).into_response()
        }
        Ok(Err(ImportError::Snapshot(e))) => failure(StatusCode::BAD_REQUEST, e.to_string()),
        Ok(Err(ImportError::Reconcile(e))) => {
            error!(pipeline = %pipeline, error = %e, "import failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            error!(pipeline = %pipeline, error = %e, "import task panicked");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Import task failed")
        }
    }
}

/// GET /api/imports - Most recent import runs
async fn list_imports(State(state): State<AppState>, Query(params): Query<ListParams>) -> Response {
    let conn = state.conn();

    match get_recent_import_runs(&conn, params.limit.unwrap_or(50)) {
        Ok(runs) => (StatusCode::OK, Json(ApiResponse::<Vec<ImportRun>>::ok(runs))).into_response(),
        Err(e) => {
            error!(error = %e, "error listing import runs");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /api/history/:stream/:key - Status history of one entity
///
/// `stream` accepts a pipeline slug (`correo`, `ventas`, `seguimiento-linea`)
/// or a stream name (`mail`, `sale`, `line`).
async fn entity_history(
    State(state): State<AppState>,
    Path((stream, key)): Path<(String, String)>,
) -> Response {
    let Some(stream) = Pipeline::parse(&stream)
        .map(|p| p.stream())
        .or_else(|| StatusStream::parse(&stream))
    else {
        return failure(StatusCode::NOT_FOUND, format!("Unknown stream: {}", stream));
    };

    let conn = state.conn();

    let entity = match find_entity_by_key(&conn, stream.entity_kind(), &key) {
        Ok(Some(entity)) => entity,
        Ok(None) => return failure(StatusCode::NOT_FOUND, format!("No entity with key '{}'", key)),
        Err(e) => return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    match get_status_history(&conn, entity.entity_ref(), stream) {
        Ok(events) => (
            StatusCode::OK,
            Json(ApiResponse::ok(HistoryResponse {
                entity,
                stream,
                events,
            })),
        )
            .into_response(),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "statusync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Invalid configuration")?;

    let conn = Connection::open(&config.database_path)
        .with_context(|| format!("Failed to open database: {}", config.database_path.display()))?;
    setup_database(&conn).context("Failed to prepare database schema")?;
    info!(path = %config.database_path.display(), "database ready");

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        engine: ReconciliationEngine::from_config(&config),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/import/:pipeline", post(import_snapshot))
        .route("/imports", get(list_imports))
        .route("/history/:stream/:key", get(entity_history))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "server listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
