mod alarm;
mod cli;
mod config;
mod decision;
mod device;
mod error;
mod orchestrator;
mod report;
mod retry;
mod server;
mod services;
mod storage;
mod ui;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use alarm::{AlarmBackend, AlarmController, AlarmPanel, AlarmSink, AlarmTiming, RemoteAlarm};
use cli::{Cli, Command, Remote};
use config::{AlarmMode, VigiaConfig};
use device::{CameraConnector, CameraPanel, CameraWatcher, DeviceReconnector, SerialConnector, UsbId};
use orchestrator::{Collaborators, CycleOrchestrator, RunSettings, RunState, StatusSnapshot};
use server::AppState;
use services::{
    DetectionSource, Detector, HttpDetector, HttpImageSource, HttpReportStore, ImageSource,
    ReportStore, ServiceClient, ServiceError,
};
use storage::StorageRouter;
use ui::RequestProgress;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Command::Serve { autostart } => {
            serve(&cli, *autostart).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status(remote) => show_status(remote).await,
        Command::Start(remote)
        | Command::Pause(remote)
        | Command::Resume(remote)
        | Command::Stop(remote) => {
            let path = cli.command.control_path().unwrap_or_default();
            send_command(remote, path).await
        }
        Command::Ports => {
            list_ports(&cli)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::CheckConfig => {
            let config = VigiaConfig::load_from(&cli.config)?;
            println!("{}", ui::render_config(&config));
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// `RUST_LOG` wins; otherwise `--verbose` selects debug.
fn init_tracing(verbose: bool) {
    let default = if verbose { "vigia=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn serve(cli: &Cli, autostart: bool) -> Result<()> {
    let config = VigiaConfig::load_from(&cli.config)?;
    info!(config = %cli.config.display(), machine = %config.machine.id_shovel, "configuration loaded");

    let client = ServiceClient::new(config.retry.request_timeout())
        .context("failed to build HTTP client")?;

    let serial = match config.alarm.mode {
        AlarmMode::Serial => {
            let reconnect_interval = Duration::from_millis(config.alarm.reconnect_interval_ms);
            let controller = Arc::new(AlarmController::new(
                DeviceReconnector::new(
                    SerialConnector::new(config.alarm.devices.clone(), config.alarm.baud_rate),
                    reconnect_interval,
                )
                .with_settle(Duration::from_millis(config.alarm.open_settle_ms)),
                AlarmTiming {
                    resync_delay: Duration::from_millis(config.alarm.resync_delay_ms),
                    reconnect_interval,
                },
            ));
            info!(
                allow_list = controller.reconnector().connector().table().len(),
                baud = config.alarm.baud_rate,
                "serial alarm enabled"
            );
            tokio::spawn(Arc::clone(&controller).run());
            Some(controller)
        }
        _ => None,
    };
    let backend = match (&serial, config.alarm.mode) {
        (Some(controller), _) => AlarmBackend::Serial(Arc::clone(controller)),
        (None, AlarmMode::Remote) => {
            let url = config.alarm.remote_url.clone().unwrap_or_default();
            info!(%url, "alarm delegated to remote alert service");
            AlarmBackend::Remote(RemoteAlarm::new(client.clone(), url))
        }
        (None, _) => {
            warn!("alarm disabled by configuration");
            AlarmBackend::Disabled
        }
    };

    let camera = config.camera.enabled.then(|| {
        let watcher = Arc::new(CameraWatcher::new(
            CameraConnector::new(config.camera.indices.clone(), config.camera.device_prefix.clone()),
            Duration::from_millis(config.camera.backoff_ms),
            Duration::from_millis(config.camera.poll_interval_ms),
        ));
        tokio::spawn(Arc::clone(&watcher).run());
        watcher
    });

    let services = &config.services;
    let orchestrator = CycleOrchestrator::new(
        config.service_name.clone(),
        Collaborators {
            capture: HttpImageSource::new(client.clone(), &services.capture_url),
            local: HttpDetector::new(client.clone(), &services.local_detector_url, DetectionSource::Local),
            cloud: HttpDetector::new(client.clone(), &services.cloud_detector_url, DetectionSource::Cloud),
            storage: StorageRouter::new(HttpReportStore::new(
                client.clone(),
                &services.local_storage_url,
                &services.cloud_storage_url,
            )),
            alarm: backend,
        },
    );

    if autostart {
        let run_id = orchestrator.start(RunSettings::from_config(&config))?;
        info!(%run_id, "autostart");
    }

    let state = AppState {
        control: Arc::new(orchestrator.clone()),
        alarm: serial
            .as_ref()
            .map(|controller| Arc::clone(controller) as Arc<dyn AlarmPanel>),
        camera: camera
            .as_ref()
            .map(|watcher| Arc::clone(watcher) as Arc<dyn CameraPanel>),
        config_path: cli.config.clone(),
    };

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    server::serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    info!("shutting down");
    stop_run(&orchestrator);
    if let Some(controller) = &serial {
        controller.stop();
    }
    if let Some(watcher) = &camera {
        watcher.stop();
    }
    Ok(())
}

/// Stop the active run, if any. Returns whether a run was stopped.
fn stop_run<I, D, S, A>(orchestrator: &CycleOrchestrator<I, D, S, A>) -> bool
where
    I: ImageSource,
    D: Detector,
    S: ReportStore,
    A: AlarmSink,
{
    if orchestrator.run_state() == RunState::Stopped {
        return false;
    }
    match orchestrator.stop() {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "failed to stop monitoring run");
            false
        }
    }
}

/// Extract the `message` field from an admin API error body.
fn refusal_message(error: &ServiceError) -> String {
    match error {
        ServiceError::ApiError { status, message } => serde_json::from_str::<Value>(message)
            .ok()
            .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string))
            .map(|reason| format!("{reason} ({status})"))
            .unwrap_or_else(|| error.to_string()),
        _ => error.to_string(),
    }
}

async fn send_command(remote: &Remote, path: &str) -> Result<ExitCode> {
    let client = ServiceClient::new(Duration::from_secs(10))?;
    let progress = RequestProgress::start(&format!("POST {}{path}", remote.url));
    let url = format!("{}{path}", remote.url.trim_end_matches('/'));

    match client.post_json::<_, Value>(&url, &json!({})).await {
        Ok(body) => {
            let state = body.get("state").and_then(Value::as_str).unwrap_or("?");
            progress.success(&format!("{path}: {state}"));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            progress.failure(&format!("{path}: {}", refusal_message(&e)));
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn show_status(remote: &Remote) -> Result<ExitCode> {
    let client = ServiceClient::new(Duration::from_secs(10))?;
    let progress = RequestProgress::start("fetching status");
    let url = format!("{}/api/v1/status", remote.url.trim_end_matches('/'));

    match client.get_json::<StatusSnapshot>(&url).await {
        Ok(status) => {
            progress.success("status received");
            println!("{}", ui::render_status(&status));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            progress.failure(&refusal_message(&e));
            Ok(ExitCode::FAILURE)
        }
    }
}

fn list_ports(cli: &Cli) -> Result<()> {
    let table = match VigiaConfig::load_from(&cli.config) {
        Ok(config) => SerialConnector::new(config.alarm.devices, config.alarm.baud_rate)
            .table()
            .to_vec(),
        Err(e) => {
            warn!(error = %e, "using built-in USB allow-list");
            UsbId::builtin_table()
        }
    };
    let ports = device::serial::list_ports().context("failed to enumerate serial ports")?;
    println!("{}", ui::render_ports(&ports, &table));
    Ok(())
}
