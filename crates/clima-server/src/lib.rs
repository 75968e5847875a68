use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clima_archive::{ArchiveError, LiveBuffer, Reconciler, SessionControl};
use clima_core::{paginate, Location, Page};
use clima_ingest::DriverRegistry;
use opentelemetry::{
    metrics::{Counter, MeterProvider},
    KeyValue,
};
use opentelemetry_prometheus::exporter;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Everything the routes need from the rest of the workspace
pub struct Services {
    pub reconciler: Arc<Reconciler>,
    pub buffer: Arc<LiveBuffer>,
    pub drivers: DriverRegistry,
    /// Registry name of the driver started by `/lecturas/iniciar`
    pub driver: String,
    /// Reported by `/search` until the provider has named the location
    pub station: Location,
}

pub struct AppState {
    ready: AtomicBool,
    registry: Registry,
    #[allow(dead_code)]
    provider: SdkMeterProvider,
    requests_total: Counter<u64>,
    reconciler: Arc<Reconciler>,
    buffer: Arc<LiveBuffer>,
    sessions: SessionControl,
    drivers: DriverRegistry,
    driver: String,
    station: Location,
}

impl AppState {
    fn count(&self, route: &'static str) {
        self.requests_total.add(1, &[KeyValue::new("route", route)]);
    }
}

pub fn build_app(services: Services) -> Result<(Router, Arc<AppState>)> {
    // Prometheus exporter via OpenTelemetry
    let registry = Registry::new();
    let reader = exporter().with_registry(registry.clone()).build()?;
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    let meter = provider.meter("clima-server");

    let requests_total = meter
        .u64_counter("clima_requests_total")
        .with_description("Total HTTP requests served")
        .init();

    let state = Arc::new(AppState {
        ready: AtomicBool::new(false),
        registry,
        provider,
        requests_total,
        reconciler: services.reconciler,
        buffer: services.buffer,
        sessions: SessionControl::new(),
        drivers: services.drivers,
        driver: services.driver,
        station: services.station,
    });

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/search", get(search))
        .route("/lecturas", get(lecturas))
        .route("/lecturas/arduino", get(arduino))
        .route("/lecturas/iniciar", post(iniciar))
        .route("/lecturas/detener", post(detener))
        .with_state(Arc::clone(&state));

    Ok((router, state))
}

pub fn set_ready(state: &Arc<AppState>, is_ready: bool) {
    state.ready.store(is_ready, Ordering::Relaxed);
}

/// Stop any running session and flush what it buffered. Used on shutdown.
pub async fn drain(state: &Arc<AppState>) -> Result<usize> {
    match state.sessions.stop().await {
        Ok(summary) => tracing::info!(accepted = summary.accepted, "live session stopped"),
        Err(ArchiveError::SessionInactive) => {}
        Err(e) => tracing::warn!(error = %e, "live session did not stop cleanly"),
    }
    let report = state.reconciler.flush_live(&state.buffer).await?;
    Ok(report.samples)
}

/// Maps cycle failures onto HTTP responses
pub struct ApiError(ArchiveError);

impl From<ArchiveError> for ApiError {
    fn from(e: ArchiveError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ArchiveError::Upstream(_) => (
                StatusCode::BAD_GATEWAY,
                "No se pudo consultar el proveedor del clima",
            ),
            ArchiveError::SessionActive => (StatusCode::CONFLICT, "La lectura ya está en curso"),
            ArchiveError::SessionInactive => (StatusCode::CONFLICT, "No hay lectura en curso"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Error interno del servidor"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = json!({ "error": message, "detalles": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> StatusCode {
    state.count("/healthz");
    StatusCode::OK
}

async fn readyz(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(
    State(state): State<Arc<AppState>>,
) -> (
    [(axum::http::header::HeaderName, axum::http::HeaderValue); 1],
    String,
) {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buf) {
        tracing::warn!(error=?e, "failed to encode metrics");
    }
    let body = String::from_utf8(buf).unwrap_or_default();
    let header = (
        header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    ([header], body)
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<String>,
}

impl PageQuery {
    /// Anything that is not a positive integer means the first page
    fn page(&self) -> usize {
        self.page
            .as_deref()
            .and_then(|p| p.trim().parse::<usize>().ok())
            .unwrap_or(1)
    }
}

#[derive(Serialize)]
struct SearchResponse<'a> {
    #[serde(flatten)]
    location: Location,
    #[serde(flatten)]
    page: Page<'a>,
}

async fn search(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PageQuery>,
) -> Result<Response, ApiError> {
    state.count("/search");
    let report = state.reconciler.backfill().await?;
    let location = report.location.unwrap_or_else(|| state.station.clone());
    let body = SearchResponse {
        location,
        page: paginate(&report.dataset, q.page()),
    };
    Ok(Json(body).into_response())
}

async fn lecturas(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PageQuery>,
) -> Result<Response, ApiError> {
    state.count("/lecturas");
    let dataset = state.reconciler.load().await?;
    Ok(Json(paginate(&dataset, q.page())).into_response())
}

async fn arduino(State(state): State<Arc<AppState>>) -> Response {
    state.count("/lecturas/arduino");
    match state.buffer.latest().await {
        Some(sample) => Json(json!({
            "lectura_actual": sample,
            "en_curso": state.sessions.is_running().await,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No hay lecturas en tiempo real" })),
        )
            .into_response(),
    }
}

async fn iniciar(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    state.count("/lecturas/iniciar");
    let driver = state
        .drivers
        .create(&state.driver)
        .await
        .map_err(ArchiveError::from)?;
    state
        .sessions
        .start(driver, Arc::clone(&state.buffer))
        .await?;
    Ok(Json(json!({ "mensaje": "Lectura serial iniciada" })).into_response())
}

async fn detener(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    state.count("/lecturas/detener");
    match state.sessions.stop().await {
        Ok(summary) => tracing::debug!(
            accepted = summary.accepted,
            rejected = summary.rejected,
            "live session stopped"
        ),
        // Samples may still be buffered from a session whose source closed
        Err(ArchiveError::SessionInactive) => {}
        Err(e) => return Err(e.into()),
    }

    let report = state.reconciler.flush_live(&state.buffer).await?;
    let mensaje = if report.samples == 0 {
        "Lectura detenida, pero no se recibieron datos."
    } else {
        "Lectura detenida y datos guardados"
    };
    Ok(Json(json!({ "mensaje": mensaje, "total": report.samples })).into_response())
}
