use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clima_archive::{LiveBuffer, Reconciler};
use clima_config::{AppConfig, StorageBackend};
use clima_core::{DatasetStore, Location};
use clima_ingest::{
    DriverRegistry, SerialDriverFactory, SimulatorFactory, WeatherApiClient, WeatherApiConfig,
};
use clima_obs::LogFormat;
use clima_store::{CsvRecordLog, JsonDocumentStore};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    // Config
    let cfg = AppConfig::load().context("loading configuration")?;

    // Observability
    let format = cfg.log_format().parse::<LogFormat>().unwrap_or_default();
    clima_obs::init("clima-server", format);

    let tz = cfg.timezone()?;
    let http_bind = cfg.http_bind();

    // Storage
    let store = open_store(&cfg)?;
    let log = Arc::new(CsvRecordLog::new(cfg.log_path()));

    // History provider
    let (latitude, longitude) = cfg.coordinates();
    let api_key = cfg.api_key();
    if api_key.is_empty() {
        tracing::warn!("API_KEY is not set; provider requests will be rejected");
    }
    let provider = WeatherApiClient::new(WeatherApiConfig {
        base_url: cfg.provider_base_url()?.to_string(),
        api_key,
        latitude,
        longitude,
        lang: cfg.provider_lang(),
        timeout_secs: cfg.provider_timeout_secs(),
    })?;

    // Sensor drivers
    let drivers = DriverRegistry::new();
    drivers
        .register(
            "serial",
            SerialDriverFactory {
                path: cfg.serial_port().into(),
                tz,
            },
        )
        .await;
    drivers
        .register(
            "simulator",
            SimulatorFactory {
                interval: Duration::from_secs(cfg.simulator_interval_secs()),
                tz,
            },
        )
        .await;

    let available = drivers.list_drivers().await;
    let driver = cfg.sensor_driver();
    if !available.contains(&driver) {
        anyhow::bail!("unknown sensor driver {driver:?}, expected one of {available:?}");
    }
    tracing::info!(%driver, ?available, "sensor drivers registered");

    let station = cfg.station.clone().unwrap_or_default();
    let services = clima_server::Services {
        reconciler: Arc::new(Reconciler::new(
            store,
            log,
            Arc::new(provider),
            cfg.planner(),
            tz,
        )),
        buffer: Arc::new(LiveBuffer::new(cfg.max_buffered_samples())),
        drivers,
        driver,
        station: Location {
            name: station.name.unwrap_or_default(),
            region: station.region.unwrap_or_default(),
            country: station.country.unwrap_or_default(),
        },
    };

    // Build app and state
    let (app, state) = clima_server::build_app(services)?;

    // Start HTTP server
    let addr: SocketAddr = http_bind
        .parse()
        .with_context(|| format!("invalid HTTP bind address {http_bind}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Mark ready just before serving
    clima_server::set_ready(&state, true);

    tracing::info!(%addr, timezone = %tz, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    clima_server::set_ready(&state, false);
    let flushed = clima_server::drain(&state).await?;
    tracing::info!(flushed, "shutdown complete");
    Ok(())
}

fn open_store(cfg: &AppConfig) -> Result<Arc<dyn DatasetStore>> {
    match cfg.storage_backend() {
        StorageBackend::Json => Ok(Arc::new(JsonDocumentStore::new(cfg.document_path()))),
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite => {
            let path = cfg.sqlite_path();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let store = clima_store::SqliteStore::open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageBackend::Sqlite => {
            anyhow::bail!("sqlite storage requested but the `sqlite` feature is not enabled")
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
