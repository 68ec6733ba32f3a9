use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Local;
use climate_common::{
    thermostat, ControlPatch, ControlRole, RuntimeConfig, SensorStore, StoreError,
    ThermostatConfig, API_CONTROL, API_DEVICE_CONTROL, API_READINGS, API_RELAY, API_STATUS,
    READINGS_LIMIT,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    relay::{handle_relay, RelayHub},
    store::ControlStore,
};

#[derive(Clone)]
pub struct AppState {
    pub control: Arc<ControlStore>,
    pub readings_db: Arc<PathBuf>,
    pub relay: Arc<RelayHub>,
    pub thermostat: Arc<ThermostatConfig>,
}

impl AppState {
    pub fn new(control: ControlStore, readings_db: PathBuf, thermostat: ThermostatConfig) -> Self {
        Self {
            control: Arc::new(control),
            readings_db: Arc::new(readings_db),
            relay: Arc::new(RelayHub::new()),
            thermostat: Arc::new(thermostat),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RuntimeConfig::from_env().context("failed to load runtime config")?;

    let control = match config.server.data_dir.clone() {
        Some(dir) => ControlStore::open(dir).await,
        None => ControlStore::in_memory(Default::default()),
    };

    // Create the table up front so an idle install serves an empty list.
    if let Err(err) = SensorStore::open(&config.server.readings_db) {
        warn!(
            "failed to prepare sensor database {}: {err}",
            config.server.readings_db.display()
        );
    }

    let app = router(AppState::new(
        control,
        config.server.readings_db,
        config.thermostat,
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(API_CONTROL, get(handle_get_control).post(handle_post_control))
        .route(API_DEVICE_CONTROL, get(handle_get_control).post(handle_post_device))
        .route(API_READINGS, get(handle_get_readings))
        .route(API_STATUS, get(handle_get_status))
        .route(API_RELAY, get(handle_relay))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("controller shutting down");
}

async fn handle_get_control(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.control.read().await)
}

async fn handle_post_control(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    patch_control(&state, ControlRole::Operator, &body).await
}

async fn handle_post_device(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    patch_control(&state, ControlRole::Device, &body).await
}

async fn patch_control(
    state: &AppState,
    role: ControlRole,
    body: &[u8],
) -> axum::response::Response {
    let patch = match serde_json::from_slice::<ControlPatch>(body) {
        Ok(patch) => patch,
        Err(err) => {
            warn!(%role, "rejected malformed control patch: {err}");
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid request: {err}"));
        }
    };

    match state.control.apply_patch(role, &patch).await {
        Ok(control) => Json(control).into_response(),
        Err(err) => {
            warn!(%role, "rejected control patch: {err}");
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
    }
}

/// Runs a query against the sensor database on the blocking pool. The
/// database belongs to the device bridge, so it is opened per request.
async fn query_sensors<T, F>(path: Arc<PathBuf>, query: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&SensorStore) -> Result<T, StoreError> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        let store = SensorStore::open_existing(path.as_path())?;
        query(&store)
    })
    .await
    .context("sensor query task failed")?;
    Ok(result?)
}

async fn handle_get_readings(State(state): State<AppState>) -> impl IntoResponse {
    let readings =
        query_sensors(state.readings_db.clone(), |store| store.latest(READINGS_LIMIT)).await;

    match readings {
        Ok(readings) => Json(readings).into_response(),
        Err(err) => {
            warn!("failed to read sensor database: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read database")
        }
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let reading = query_sensors(state.readings_db.clone(), |store| {
        store.latest_with_temperature()
    })
    .await
    .unwrap_or_else(|err| {
        warn!("failed to read latest sensor reading: {err:#}");
        None
    });

    let control = state.control.read().await;
    let now = Local::now().naive_local();

    Json(thermostat::status(
        &state.thermostat,
        &control,
        reading.as_ref(),
        now,
    ))
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
