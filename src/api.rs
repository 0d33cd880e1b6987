use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Json, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::spawn;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    app_state::{AppState, MenuRun, ServiceStatus},
    cache::Namespace,
    extraction,
    models::{EnrichedDish, RawImage},
    pipeline::PipelineOutcome,
    progress::{ProcessingState, ProgressTracker},
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    filename: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunAccepted {
    run_id: String,
}

#[derive(Debug, Serialize)]
pub struct RunView {
    run_id: String,
    filename: Option<String>,
    state: ProcessingState,
    dishes: Option<Vec<EnrichedDish>>,
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    services: ServiceStatus,
    cache_entries: HashMap<Namespace, u64>,
    active_runs: usize,
    stored_runs: usize,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    // Margen para cabeceras y multipart mal calculado por el cliente.
    let body_limit = app_state.config.max_upload_bytes + 64 * 1024;
    Router::new()
        .route("/api/menus", post(upload_menu_handler))
        .route("/api/menus/analyze", post(analyze_menu_handler))
        .route("/api/menus/:run_id", get(get_run_handler))
        .route("/api/menus/:run_id/cancel", post(cancel_run_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(app_state)
}

// --- Handlers ---

/// Recibe la foto en bruto y lanza la ejecución en segundo plano.
#[axum::debug_handler]
async fn upload_menu_handler(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<RunAccepted>), ApiError> {
    let mime_type = detect_mime(&headers, params.filename.as_deref());
    let image = RawImage::new(body.to_vec(), mime_type);

    // Los errores de formato se devuelven al momento, sin crear ejecución.
    if let Err(e) = extraction::validate(&image, state.config.max_upload_bytes) {
        warn!("Subida rechazada: {}", e.message);
        return Err((StatusCode::BAD_REQUEST, Json(json!({ "error": e }))));
    }

    let run_id = Uuid::new_v4().to_string();
    let tracker = ProgressTracker::new();
    state.insert_run(run_id.clone(), MenuRun::new(params.filename.clone(), tracker.clone()));
    info!("Ejecución {run_id} creada ({:?})", params.filename);

    let task_id = run_id.clone();
    spawn(async move {
        let dishes = state.pipeline.process_tracked(&image, &tracker).await;
        state.complete_run(&task_id, dishes);
    });

    Ok((StatusCode::ACCEPTED, Json(RunAccepted { run_id })))
}

/// Variante síncrona: procesa la carta y responde con el resultado completo.
#[axum::debug_handler]
async fn analyze_menu_handler(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<PipelineOutcome> {
    let mime_type = detect_mime(&headers, params.filename.as_deref());
    let outcome = state.pipeline.process(&RawImage::new(body.to_vec(), mime_type)).await;
    info!(
        "Análisis síncrono: {} platos, {} errores",
        outcome.dishes.len(),
        outcome.all_errors().len()
    );
    Json(outcome)
}

#[axum::debug_handler]
async fn get_run_handler(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunView>, ApiError> {
    let runs = state.runs();
    let run = runs.get(&run_id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("No existe la ejecución {run_id}") })),
        )
    })?;

    Ok(Json(RunView {
        run_id: run_id.clone(),
        filename: run.filename.clone(),
        state: run.tracker.snapshot(),
        dishes: run.dishes.clone(),
    }))
}

/// Cancela una ejecución en curso; `404` si no existe o ya terminó.
#[axum::debug_handler]
async fn cancel_run_handler(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.cancel_run(&run_id) {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("No hay ninguna ejecución activa con id {run_id}") })),
        ));
    }
    Ok(Json(json!({ "run_id": run_id, "cancelled": true })))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<StatusView> {
    let (active_runs, stored_runs) = {
        let runs = state.runs();
        (runs.values().filter(|r| !r.is_finished()).count(), runs.len())
    };
    Json(StatusView {
        services: state.services,
        cache_entries: state.cache.entry_counts(),
        active_runs,
        stored_runs,
    })
}

// --- Handler de Apagado y Utilidades ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    StatusCode::OK
}

/// MIME de la cabecera `Content-Type` o, si no es útil, deducido del nombre
/// del fichero.
fn detect_mime(headers: &HeaderMap, filename: Option<&str>) -> String {
    let declared = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.starts_with("application/octet-stream"));

    match (declared, filename) {
        (Some(declared), _) => declared.to_string(),
        (None, Some(name)) => mime_guess::from_path(name)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string(),
        (None, None) => "application/octet-stream".to_string(),
    }
}
