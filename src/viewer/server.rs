//! HTTP surface of the viewer.
//!
//! ```text
//! GET  /                       browsing page (<static>/index.html)
//! GET  /static/...             page assets
//! GET  /api/v1/tarifarios      filtered, sorted page of rows
//! GET  /api/v1/stats           totals, per-bank and per-type counts, mean rates
//! GET  /api/v1/filters         distinct banks, types and currencies
//! GET  /api/v1/export/csv      filtered rows as a CSV attachment
//! GET  /bancos                 supported banks
//! POST /scrape/{banco}         PDF links of one bank
//! POST /download/{banco}       scrape, then download one bank's PDFs
//! POST /download/all           scrape and download every bank
//! GET  /health
//! ```
//!
//! The scrape and download routes run stages 1 and 2 against the same data
//! root the CSV came from; they answer once the work is done.

use super::{Dataset, FilterValues, Page, Stats, TarifaQuery, ViewerError, EXPORT_FILE_NAME};
use crate::config::PipelineConfig;
use crate::download::download_all;
use crate::error::TarifarioError;
use crate::http::HttpClient;
use crate::models::{Bank, DownloadResult, TarifarioMetadata, TarifarioUrl};
use crate::scrape::{scrape_all, scrape_bank};
use axum::{
    extract::{Path as UrlPath, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{info, warn};

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub data: Arc<Dataset>,
    pub config: Arc<PipelineConfig>,
}

impl AppState {
    pub fn new(data: Dataset, config: PipelineConfig) -> Self {
        Self {
            data: Arc::new(data),
            config: Arc::new(config),
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────

/// Error body: `{"error": "..."}`.
#[derive(Debug)]
pub struct AppError(StatusCode, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

impl From<ViewerError> for AppError {
    fn from(e: ViewerError) -> Self {
        match e {
            ViewerError::InvalidQuery(msg) => AppError(StatusCode::BAD_REQUEST, msg),
            other => AppError(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

impl From<TarifarioError> for AppError {
    fn from(e: TarifarioError) -> Self {
        match e {
            TarifarioError::UnknownBank { .. } => AppError(StatusCode::BAD_REQUEST, e.to_string()),
            other => AppError(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

// ── Query API ────────────────────────────────────────────────────────────

pub async fn list_handler(
    State(state): State<AppState>,
    Query(query): Query<TarifaQuery>,
) -> Result<Json<Page>, AppError> {
    Ok(Json(state.data.page(&query)?))
}

pub async fn stats_handler(State(state): State<AppState>) -> Json<Stats> {
    Json(state.data.stats())
}

pub async fn filters_handler(State(state): State<AppState>) -> Json<FilterValues> {
    Json(state.data.filters())
}

pub async fn export_handler(
    State(state): State<AppState>,
    Query(query): Query<TarifaQuery>,
) -> Result<Response, AppError> {
    let body = state.data.export_csv(&query)?;
    let disposition = format!("attachment; filename={EXPORT_FILE_NAME}");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

pub async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

// ── Scrape / download ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ScrapeResponse {
    pub banco: Bank,
    pub urls_encontradas: Vec<TarifarioUrl>,
    pub total_urls: usize,
    pub duracion_segundos: f64,
    pub exito: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BankDownloadResponse {
    pub banco: Bank,
    pub total_urls: usize,
    pub descargados: usize,
    /// `<url>: <reason>` per failed link.
    pub errores: Vec<String>,
    pub metadata: Vec<TarifarioMetadata>,
}

#[derive(Debug, Serialize)]
pub struct DownloadAllResponse {
    pub resultados: BTreeMap<String, BankDownloadResponse>,
    pub total_bancos: usize,
    pub total_descargados: usize,
}

/// Fold one bank's share of a download run into its response body.
pub fn bank_download_response(
    bank: Bank,
    urls: &[TarifarioUrl],
    results: &[DownloadResult],
) -> BankDownloadResponse {
    let mine = results.iter().filter(|r| r.metadata.bank == bank);
    let (ok, failed): (Vec<_>, Vec<_>) = mine.partition(|r| r.success);
    BankDownloadResponse {
        banco: bank,
        total_urls: urls.iter().filter(|u| u.bank == bank).count(),
        descargados: ok.len(),
        errores: failed
            .iter()
            .map(|r| {
                format!(
                    "{}: {}",
                    r.metadata.source_url,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect(),
        metadata: ok.iter().map(|r| r.metadata.clone()).collect(),
    }
}

pub async fn banks_handler() -> Json<Vec<Bank>> {
    Json(Bank::ALL.to_vec())
}

pub async fn scrape_handler(
    State(state): State<AppState>,
    UrlPath(banco): UrlPath<String>,
) -> Result<Json<ScrapeResponse>, AppError> {
    let bank: Bank = banco.parse()?;
    let client = HttpClient::new(&state.config)?;
    let started = Instant::now();
    let urls = scrape_bank(bank, &client).await;
    info!("{}: {} links via API", bank, urls.len());
    Ok(Json(ScrapeResponse {
        banco: bank,
        total_urls: urls.len(),
        urls_encontradas: urls,
        duracion_segundos: started.elapsed().as_secs_f64(),
        exito: true,
    }))
}

pub async fn download_bank_handler(
    State(state): State<AppState>,
    UrlPath(banco): UrlPath<String>,
) -> Result<Json<BankDownloadResponse>, AppError> {
    let bank: Bank = banco.parse()?;
    let client = HttpClient::new(&state.config)?;
    let urls = scrape_bank(bank, &client).await;
    let results = if urls.is_empty() {
        Vec::new()
    } else {
        download_all(&state.config, &urls).await?
    };
    Ok(Json(bank_download_response(bank, &urls, &results)))
}

pub async fn download_all_handler(
    State(state): State<AppState>,
) -> Result<Json<DownloadAllResponse>, AppError> {
    let client = HttpClient::new(&state.config)?;
    let urls = scrape_all(&Bank::ALL, &client).await;
    let results = download_all(&state.config, &urls).await?;
    let resultados: BTreeMap<String, BankDownloadResponse> = Bank::ALL
        .into_iter()
        .map(|b| (b.display_name().to_string(), bank_download_response(b, &urls, &results)))
        .collect();
    Ok(Json(DownloadAllResponse {
        total_bancos: resultados.len(),
        total_descargados: resultados.values().map(|r| r.descargados).sum(),
        resultados,
    }))
}

// ── Router ───────────────────────────────────────────────────────────────

pub fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .route("/api/v1/tarifarios", get(list_handler))
        .route("/api/v1/stats", get(stats_handler))
        .route("/api/v1/filters", get(filters_handler))
        .route("/api/v1/export/csv", get(export_handler))
        .route("/bancos", get(banks_handler))
        .route("/scrape/{banco}", post(scrape_handler))
        .route("/download/all", post(download_all_handler))
        .route("/download/{banco}", post(download_bank_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until the process stops.
pub async fn serve(addr: SocketAddr, state: AppState, static_dir: &Path) -> Result<(), TarifarioError> {
    if !static_dir.join("index.html").is_file() {
        warn!(
            "{}/index.html not found; only the JSON API will answer",
            static_dir.display()
        );
    }
    let app = router(state, static_dir);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| TarifarioError::Internal(format!("failed to bind {addr}: {e}")))?;
    info!("Viewer listening on http://{addr}");
    axum::serve(listener, app)
        .await
        .map_err(|e| TarifarioError::Internal(format!("server error: {e}")))
}
