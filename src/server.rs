//! Administrative HTTP surface.
//!
//! Command handlers never wait on collaborators: they reload the config,
//! flip the run state and return. Invalid transitions answer 409.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::alarm::{AlarmCommand, AlarmPanel, AlarmStatus};
use crate::config::VigiaConfig;
use crate::device::CameraPanel;
use crate::device::camera::CameraStatus;
use crate::error::CommandError;
use crate::orchestrator::{ControlSurface, RunSettings, RunState, StatusSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub control: Arc<dyn ControlSurface>,
    pub alarm: Option<Arc<dyn AlarmPanel>>,
    pub camera: Option<Arc<dyn CameraPanel>>,
    /// Re-read on every start/resume.
    pub config_path: PathBuf,
}

impl AppState {
    fn reload_settings(&self) -> Result<RunSettings, ApiError> {
        match VigiaConfig::load_from(&self.config_path) {
            Ok(config) => Ok(RunSettings::from_config(&config)),
            Err(e) => {
                let message = format!("config reload failed: {e:#}");
                error!(path = %self.config_path.display(), "{message}");
                self.control.record_error(&message);
                Err(ApiError::Config(message))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Conflict(#[from] CommandError),

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0} is not managed by this instance")]
    Unavailable(&'static str),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({"status": "error", "message": self.to_string()});
        (self.status_code(), Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/start", post(start))
        .route("/resume", post(resume))
        .route("/pause", post(pause))
        .route("/stop", post(stop))
        .route("/api/v1/status", get(status))
        .route("/api/v1/alerta", post(alert))
        .route("/api/v1/alarm/status", get(alarm_status))
        .route("/api/v1/camera/status", get(camera_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "admin API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn command_reply(state: RunState, run_id: Option<uuid::Uuid>) -> Json<Value> {
    Json(json!({"status": "ok", "state": state, "run_id": run_id}))
}

async fn start(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    if state.control.status().running {
        return Err(CommandError::AlreadyRunning.into());
    }
    let settings = state.reload_settings()?;
    let run_id = state.control.start(settings)?;
    Ok(command_reply(RunState::Running, Some(run_id)))
}

async fn resume(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    if state.control.status().running {
        return Err(CommandError::AlreadyRunning.into());
    }
    let settings = state.reload_settings()?;
    let run_id = state.control.resume(settings)?;
    Ok(command_reply(RunState::Running, Some(run_id)))
}

async fn pause(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.control.pause()?;
    Ok(command_reply(RunState::Paused, state.control.status().run_id))
}

async fn stop(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.control.stop()?;
    Ok(command_reply(RunState::Stopped, state.control.status().run_id))
}

async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.control.status())
}

#[derive(Debug, Deserialize)]
struct AlertRequest {
    #[serde(alias = "action")]
    accion: String,
}

async fn alert(
    State(state): State<AppState>,
    Json(request): Json<AlertRequest>,
) -> Result<Json<Value>, ApiError> {
    let panel = state.alarm.as_ref().ok_or(ApiError::Unavailable("alarm"))?;
    let command: AlarmCommand = request
        .accion
        .parse()
        .map_err(|e: crate::alarm::UnknownCommand| ApiError::BadRequest(e.to_string()))?;

    let sent = panel.command(command);
    let connected = panel.status().arduino_conectado;
    Ok(Json(json!({
        "status": if sent { "ok" } else { "pendiente" },
        "accion_enviada": command,
        "arduino_conectado": connected,
    })))
}

async fn alarm_status(State(state): State<AppState>) -> Result<Json<AlarmStatus>, ApiError> {
    let panel = state.alarm.as_ref().ok_or(ApiError::Unavailable("alarm"))?;
    panel.probe();
    Ok(Json(panel.status()))
}

async fn camera_status(State(state): State<AppState>) -> Result<Json<CameraStatus>, ApiError> {
    let camera = state.camera.as_ref().ok_or(ApiError::Unavailable("camera"))?;
    Ok(Json(camera.status()))
}
