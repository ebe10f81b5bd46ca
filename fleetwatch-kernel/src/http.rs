/**
 * API REST FLEETWATCH - Serveur HTTP du kernel
 *
 * RÔLE :
 * Expose la vue de flotte, le journal d'incidents, la sélection et les mutations
 * (groupées, CSV, unitaires) de chaque collection monitorée.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum avec middleware auth API key
 * - Routes : /health, /system, /collections, /view, /fleets/{collection}/...
 * - Rôle appelant via `x-fleet-role` (capacité = rôle dans `bulk_roles`),
 *   acteur via `x-fleet-actor`
 * - 403 capacité refusée, 404 collection/asset inconnu, 400 corps invalide
 * - Mutation groupée et import CSV : réponse avec le bilan agrégé des écritures distantes
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur toutes routes sauf /health
 */

use crate::bulk::{self, BulkOutcome, CsvUploadOutcome, WriteSummary};
use crate::config::KernelConfig;
use crate::csv_import::CsvMergeReport;
use crate::engine::AssetForm;
use crate::health::{HealthTracker, KernelHealth};
use crate::models::{AssetFields, AssetRecord, AssetStatus, IncidentLogEntry};
use crate::remote::RemoteStore;
use crate::state::{CollectionSummary, SharedFleets};
use crate::view::{FleetView, ViewFilter};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::warn;

pub const ROLE_HEADER: &str = "x-fleet-role";
pub const ACTOR_HEADER: &str = "x-fleet-actor";

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    let path = req.uri().path();

    // Health check toujours accessible
    if path == "/health" {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("FLEETWATCH_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        warn!("[http] SECURITY: FLEETWATCH_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!(path, "[http] rejected request without valid api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

#[derive(Clone)]
pub struct AppState {
    pub fleets: SharedFleets,
    pub cfg: Arc<KernelConfig>,
    pub health_tracker: HealthTracker,
    pub remote: Arc<dyn RemoteStore>,
}

/// Identité de l'appelant extraite des en-têtes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub actor: String,
    pub can_bulk: bool,
}

pub fn caller_from_headers(headers: &HeaderMap, cfg: &KernelConfig) -> Caller {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    Caller {
        actor: header_str(ACTOR_HEADER).unwrap_or("api").to_string(),
        can_bulk: header_str(ROLE_HEADER).map(|role| cfg.can_bulk(role)).unwrap_or(false),
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/collections", get(list_collections))
        .route("/view", post(switch_view))
        .route("/fleets/{collection}/view", get(get_view))
        .route("/fleets/{collection}/incidents", get(get_incidents))
        .route(
            "/fleets/{collection}/selection",
            get(get_selection).post(add_to_selection).delete(clear_selection),
        )
        .route("/fleets/{collection}/bulk", post(bulk_status))
        .route("/fleets/{collection}/import", post(import_csv))
        .route("/fleets/{collection}/export", get(export_csv))
        .route("/fleets/{collection}/assets", post(add_asset))
        .route("/fleets/{collection}/assets/{id}", patch(update_asset).delete(delete_asset))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.fleets.lock()))
}

// GET /collections
async fn list_collections(State(app): State<AppState>) -> Json<Vec<CollectionSummary>> {
    Json(app.fleets.lock().summaries())
}

#[derive(Debug, Deserialize)]
struct ViewSwitch {
    collection: String,
}

// POST /view (change la collection active)
async fn switch_view(
    State(app): State<AppState>,
    Json(body): Json<ViewSwitch>,
) -> Result<Json<Vec<CollectionSummary>>, StatusCode> {
    let mut fleets = app.fleets.lock();
    if !fleets.switch_view(&body.collection) {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(fleets.summaries()))
}

// GET /fleets/{collection}/view
async fn get_view(
    State(app): State<AppState>,
    Path(collection): Path<String>,
    Query(filter): Query<ViewFilter>,
) -> Result<Json<FleetView>, StatusCode> {
    let fleets = app.fleets.lock();
    let engine = fleets.get(&collection).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(engine.view(&filter)))
}

// GET /fleets/{collection}/incidents (plus récent d'abord)
async fn get_incidents(
    State(app): State<AppState>,
    Path(collection): Path<String>,
) -> Result<Json<Vec<IncidentLogEntry>>, StatusCode> {
    let fleets = app.fleets.lock();
    let engine = fleets.get(&collection).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(engine.incidents()))
}

async fn get_selection(
    State(app): State<AppState>,
    Path(collection): Path<String>,
) -> Result<Json<Vec<String>>, StatusCode> {
    let fleets = app.fleets.lock();
    let engine = fleets.get(&collection).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(engine.selection()))
}

#[derive(Debug, Deserialize)]
struct SelectionRequest {
    ids: Vec<String>,
    #[serde(default)]
    deselect: bool,
}

// POST /fleets/{collection}/selection {ids, deselect?}
async fn add_to_selection(
    State(app): State<AppState>,
    Path(collection): Path<String>,
    Json(body): Json<SelectionRequest>,
) -> Result<Json<Vec<String>>, StatusCode> {
    let mut fleets = app.fleets.lock();
    let engine = fleets.get_mut(&collection).ok_or(StatusCode::NOT_FOUND)?;
    if body.deselect {
        for id in &body.ids {
            engine.deselect(id);
        }
    } else {
        engine.select(body.ids);
    }
    Ok(Json(engine.selection()))
}

async fn clear_selection(
    State(app): State<AppState>,
    Path(collection): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let mut fleets = app.fleets.lock();
    let engine = fleets.get_mut(&collection).ok_or(StatusCode::NOT_FOUND)?;
    engine.clear_selection();
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct BulkRequest {
    status: String,
}

#[derive(Debug, Serialize)]
struct BulkResponse {
    updated: usize,
    writes: WriteSummary,
}

/// Statut cible d'une mutation groupée : valeur connue uniquement.
fn parse_target_status(raw: &str) -> Option<AssetStatus> {
    Some(AssetStatus::parse(raw)).filter(AssetStatus::is_known)
}

// POST /fleets/{collection}/bulk {status}
async fn bulk_status(
    State(app): State<AppState>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    Json(body): Json<BulkRequest>,
) -> Result<Json<BulkResponse>, StatusCode> {
    let status = parse_target_status(&body.status).ok_or(StatusCode::BAD_REQUEST)?;
    let caller = caller_from_headers(&headers, &app.cfg);

    let outcome = {
        let mut fleets = app.fleets.lock();
        let engine = fleets.get_mut(&collection).ok_or(StatusCode::NOT_FOUND)?;
        bulk::apply_bulk_status(
            engine,
            app.remote.clone(),
            &status,
            &caller.actor,
            caller.can_bulk,
            OffsetDateTime::now_utc(),
        )
    };
    match outcome {
        BulkOutcome::Denied => Err(StatusCode::FORBIDDEN),
        BulkOutcome::NoOp => Ok(Json(BulkResponse { updated: 0, writes: WriteSummary::default() })),
        // verrou relâché : la vue reflète déjà la mutation pendant l'attente du bilan
        BulkOutcome::Applied { updated, writes } => Ok(Json(BulkResponse {
            updated,
            writes: writes.await.unwrap_or_default(),
        })),
    }
}

#[derive(Debug, Deserialize)]
struct ImportParams {
    default_client: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImportResponse {
    #[serde(flatten)]
    report: CsvMergeReport,
    writes: WriteSummary,
}

// POST /fleets/{collection}/import?default_client= (corps = texte CSV)
async fn import_csv(
    State(app): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<ImportParams>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<ImportResponse>, StatusCode> {
    let caller = caller_from_headers(&headers, &app.cfg);

    let outcome = {
        let mut fleets = app.fleets.lock();
        let engine = fleets.get_mut(&collection).ok_or(StatusCode::NOT_FOUND)?;
        bulk::upload_csv(
            engine,
            app.remote.clone(),
            &body,
            params.default_client.as_deref(),
            &caller.actor,
            caller.can_bulk,
            OffsetDateTime::now_utc(),
        )
    };
    match outcome {
        CsvUploadOutcome::Denied => Err(StatusCode::FORBIDDEN),
        CsvUploadOutcome::Ignored => Ok(Json(ImportResponse {
            report: CsvMergeReport::default(),
            writes: WriteSummary::default(),
        })),
        CsvUploadOutcome::Merged { report, writes } => Ok(Json(ImportResponse {
            report,
            writes: writes.await.unwrap_or_default(),
        })),
    }
}

// GET /fleets/{collection}/export?q=&status=&client=
async fn export_csv(
    State(app): State<AppState>,
    Path(collection): Path<String>,
    Query(filter): Query<ViewFilter>,
) -> Result<Response, StatusCode> {
    let (file_name, body) = {
        let fleets = app.fleets.lock();
        let engine = fleets.get(&collection).ok_or(StatusCode::NOT_FOUND)?;
        engine.export_csv(&filter, OffsetDateTime::now_utc().date())
    };
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/csv; charset=utf-8")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

// POST /fleets/{collection}/assets (ajout / upsert manuel)
async fn add_asset(
    State(app): State<AppState>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    Json(form): Json<AssetForm>,
) -> Result<Json<AssetRecord>, StatusCode> {
    let caller = caller_from_headers(&headers, &app.cfg);
    let mut fleets = app.fleets.lock();
    let engine = fleets.get_mut(&collection).ok_or(StatusCode::NOT_FOUND)?;
    bulk::add_one(engine, app.remote.clone(), &form, &caller.actor, OffsetDateTime::now_utc())
        .ok_or(StatusCode::BAD_REQUEST)?;
    engine
        .store()
        .get(form.id.trim())
        .cloned()
        .map(Json)
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)
}

// PATCH /fleets/{collection}/assets/{id}
async fn update_asset(
    State(app): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(fields): Json<AssetFields>,
) -> Result<Json<AssetRecord>, StatusCode> {
    let caller = caller_from_headers(&headers, &app.cfg);
    let mut fleets = app.fleets.lock();
    let engine = fleets.get_mut(&collection).ok_or(StatusCode::NOT_FOUND)?;
    bulk::update_one(engine, app.remote.clone(), &id, &fields, &caller.actor, OffsetDateTime::now_utc())
        .ok_or(StatusCode::NOT_FOUND)?;
    engine.store().get(&id).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

// DELETE /fleets/{collection}/assets/{id}
async fn delete_asset(
    State(app): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, StatusCode> {
    let caller = caller_from_headers(&headers, &app.cfg);
    let mut fleets = app.fleets.lock();
    let engine = fleets.get_mut(&collection).ok_or(StatusCode::NOT_FOUND)?;
    bulk::delete_one(engine, app.remote.clone(), &id, &caller.actor, OffsetDateTime::now_utc())
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn caller_defaults_to_api_actor_without_capability() {
        let cfg = KernelConfig::default();
        let caller = caller_from_headers(&HeaderMap::new(), &cfg);
        assert_eq!(caller, Caller { actor: "api".into(), can_bulk: false });
    }

    #[test]
    fn supervisor_role_grants_bulk_capability() {
        let cfg = KernelConfig::default();
        let caller = caller_from_headers(&headers(&[(ROLE_HEADER, "supervisor"), (ACTOR_HEADER, " jdoe ")]), &cfg);
        assert!(caller.can_bulk);
        assert_eq!(caller.actor, "jdoe");

        let viewer = caller_from_headers(&headers(&[(ROLE_HEADER, "viewer")]), &cfg);
        assert!(!viewer.can_bulk);
    }

    #[test]
    fn import_response_flattens_the_report_beside_the_write_summary() {
        let response = ImportResponse {
            report: CsvMergeReport { rows: 3, created: 1, updated: 1, unchanged: 1, skipped_rows: 0 },
            writes: WriteSummary { issued: 2, failed: 1 },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["created"], 1);
        assert_eq!(json["rows"], 3);
        assert_eq!(json["writes"]["issued"], 2);
        assert_eq!(json["writes"]["failed"], 1);
    }

    #[test]
    fn bulk_target_must_be_a_known_status() {
        assert_eq!(parse_target_status(" Maintenance "), Some(AssetStatus::Maintenance));
        assert_eq!(parse_target_status("sparkling"), None);
        assert_eq!(parse_target_status(""), None);
    }
}
