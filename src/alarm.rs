//! Siren control on top of an unreliable serial device.
//!
//! [`AlarmController`] remembers the last persistent command (ON/OFF) and
//! re-sends it once after every reconnection, so a siren that rebooted or
//! was swapped converges to the requested state on its own. `STATUS` probes
//! go through the same channel but are never remembered.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::device::reconnector::{Connector, DeviceReconnector, DeviceStatus};
use crate::device::serial::LineWriter;
use crate::error::DeviceError;
use crate::report::local_timestamp;
use crate::services::ServiceClient;

/// Commands understood by the siren firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmCommand {
    On,
    Off,
    Status,
}

impl AlarmCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            AlarmCommand::On => "ON",
            AlarmCommand::Off => "OFF",
            AlarmCommand::Status => "STATUS",
        }
    }

    /// The persistent state this command requests, if any.
    pub fn desired(self) -> Option<DesiredState> {
        match self {
            AlarmCommand::On => Some(DesiredState::On),
            AlarmCommand::Off => Some(DesiredState::Off),
            AlarmCommand::Status => None,
        }
    }
}

impl fmt::Display for AlarmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown alarm command: {0:?}")]
pub struct UnknownCommand(pub String);

impl FromStr for AlarmCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON" => Ok(AlarmCommand::On),
            "OFF" => Ok(AlarmCommand::Off),
            "STATUS" => Ok(AlarmCommand::Status),
            _ => Err(UnknownCommand(s.to_string())),
        }
    }
}

/// Last explicitly requested persistent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DesiredState {
    On,
    Off,
}

impl DesiredState {
    pub fn command(self) -> AlarmCommand {
        match self {
            DesiredState::On => AlarmCommand::On,
            DesiredState::Off => AlarmCommand::Off,
        }
    }
}

/// Status payload for `/api/v1/alarm/status`.
#[derive(Debug, Clone, Serialize)]
pub struct AlarmStatus {
    pub servicio: &'static str,
    pub running: bool,
    pub arduino_conectado: bool,
    pub ultimo_comando: Option<AlarmCommand>,
    pub ultimo_estado_deseado: Option<DesiredState>,
    pub ultimo_error: Option<String>,
    pub resincronizaciones: u64,
    pub timestamp: String,
    pub device: DeviceStatus,
}

#[derive(Default)]
struct ControllerState {
    desired: Option<DesiredState>,
    last_command: Option<AlarmCommand>,
    resyncs: u64,
}

/// Timing knobs for the reconnection worker. The post-open settle delay
/// belongs to the [`DeviceReconnector`].
#[derive(Debug, Clone, Copy)]
pub struct AlarmTiming {
    /// Extra wait before re-sending the desired state.
    pub resync_delay: Duration,
    /// Pause between liveness checks in the worker loop.
    pub reconnect_interval: Duration,
}

impl AlarmTiming {
    pub fn immediate() -> Self {
        Self {
            resync_delay: Duration::ZERO,
            reconnect_interval: Duration::ZERO,
        }
    }
}

pub struct AlarmController<C: Connector> {
    reconnector: DeviceReconnector<C>,
    timing: AlarmTiming,
    state: Mutex<ControllerState>,
    running: AtomicBool,
}

impl<C> AlarmController<C>
where
    C: Connector,
    C::Handle: LineWriter,
{
    pub fn new(reconnector: DeviceReconnector<C>, timing: AlarmTiming) -> Self {
        Self {
            reconnector,
            timing,
            state: Mutex::new(ControllerState::default()),
            running: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reconnector(&self) -> &DeviceReconnector<C> {
        &self.reconnector
    }

    /// Write `command`. Callers hold the controller lock, so state
    /// updates and device writes happen in one order.
    fn send(&self, state: &mut ControllerState, command: AlarmCommand) -> bool {
        match self
            .reconnector
            .with_handle(|line| line.write_line(command.as_str()))
        {
            Ok(()) => {
                state.last_command = Some(command);
                info!(command = %command, "alarm command sent");
                true
            }
            Err(DeviceError::NotConnected) => false,
            Err(e) => {
                warn!(command = %command, error = %e, "alarm device lost during send");
                false
            }
        }
    }

    /// Record `state` as desired and try to send it right away.
    ///
    /// Returns whether the device accepted it now; when it did not, the
    /// state is still delivered on the next reconnection.
    pub fn set_desired(&self, desired: DesiredState) -> bool {
        let mut state = self.lock();
        state.desired = Some(desired);
        let sent = self.send(&mut state, desired.command());
        if !sent {
            info!(state = ?desired, "alarm offline, state queued for resync");
        }
        sent
    }

    /// Non-persistent status query.
    pub fn probe(&self) -> bool {
        let mut state = self.lock();
        self.send(&mut state, AlarmCommand::Status)
    }

    /// Dispatch any command, persisting ON/OFF.
    pub fn command(&self, command: AlarmCommand) -> bool {
        match command.desired() {
            Some(state) => self.set_desired(state),
            None => self.probe(),
        }
    }

    pub fn desired(&self) -> Option<DesiredState> {
        self.lock().desired
    }

    /// One pass of the reconnection loop.
    ///
    /// When the device is missing this blocks until it is back, then re-sends
    /// the desired state exactly once. Returns whether a resend happened.
    pub async fn reconnect(&self) -> bool {
        if self.reconnector.is_connected() {
            return false;
        }

        let Some(port) = self.reconnector.acquire().await else {
            return false;
        };
        info!(port = %port, "alarm device connected");
        if !self.reconnector.pause(self.timing.resync_delay).await {
            return false;
        }
        self.resync()
    }

    /// Send the desired state as it is now, not as it was before the delay.
    fn resync(&self) -> bool {
        let mut state = self.lock();
        let Some(desired) = state.desired else {
            return false;
        };
        info!(state = ?desired, "resyncing alarm state");
        let sent = self.send(&mut state, desired.command());
        if sent {
            state.resyncs += 1;
        }
        sent
    }

    /// Run the reconnection loop until [`stop`](Self::stop).
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        info!("alarm reconnection worker started");
        while !self.reconnector.is_closed() {
            self.reconnect().await;
            if !self.reconnector.pause(self.timing.reconnect_interval).await {
                break;
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("alarm reconnection worker stopped");
    }

    /// Stop the worker, waking it if it is waiting for a port, and release
    /// the port.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.reconnector.close();
    }

    pub fn status(&self) -> AlarmStatus {
        let device = self.reconnector.status();
        let state = self.lock();
        AlarmStatus {
            servicio: "servicio_alertador_incidente",
            running: self.running.load(Ordering::SeqCst),
            arduino_conectado: device.connected,
            ultimo_comando: state.last_command,
            ultimo_estado_deseado: state.desired,
            ultimo_error: device.last_error.clone(),
            resincronizaciones: state.resyncs,
            timestamp: local_timestamp(),
            device,
        }
    }
}

/// Object-safe view used by the HTTP surface.
pub trait AlarmPanel: Send + Sync {
    fn command(&self, command: AlarmCommand) -> bool;
    fn status(&self) -> AlarmStatus;
    fn probe(&self) -> bool;
}

impl<C> AlarmPanel for AlarmController<C>
where
    C: Connector,
    C::Handle: LineWriter,
{
    fn command(&self, command: AlarmCommand) -> bool {
        AlarmController::command(self, command)
    }

    fn status(&self) -> AlarmStatus {
        AlarmController::status(self)
    }

    fn probe(&self) -> bool {
        AlarmController::probe(self)
    }
}

/// What the orchestrator needs from the alarm: switch it on.
pub trait AlarmSink: Send + Sync + 'static {
    /// Returns whether the alarm accepted the command immediately.
    fn raise(&self) -> impl Future<Output = bool> + Send;
}

impl<C> AlarmSink for AlarmController<C>
where
    C: Connector,
    C::Handle: LineWriter,
{
    async fn raise(&self) -> bool {
        self.set_desired(DesiredState::On)
    }
}

impl<T: AlarmSink> AlarmSink for Arc<T> {
    fn raise(&self) -> impl Future<Output = bool> + Send {
        self.as_ref().raise()
    }
}

/// Siren driven by a separate alerting service over HTTP.
pub struct RemoteAlarm {
    client: ServiceClient,
    url: String,
}

const REMOTE_ALARM_TIMEOUT: Duration = Duration::from_secs(5);

impl RemoteAlarm {
    pub fn new(client: ServiceClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl AlarmSink for RemoteAlarm {
    /// Single attempt; a down alerting service is logged, not retried.
    async fn raise(&self) -> bool {
        let body = json!({"accion": AlarmCommand::On.as_str()});
        match self
            .client
            .post_json_with_timeout::<_, Value>(&self.url, &body, REMOTE_ALARM_TIMEOUT)
            .await
        {
            Ok(response) => {
                info!(response = %response, "remote alarm raised");
                response
                    .get("arduino_conectado")
                    .and_then(Value::as_bool)
                    .unwrap_or(true)
            }
            Err(e) => {
                error!(error = %e, "failed to raise remote alarm");
                false
            }
        }
    }
}

/// Alarm wiring selected by configuration.
pub enum AlarmBackend<C: Connector> {
    Serial(Arc<AlarmController<C>>),
    Remote(RemoteAlarm),
    Disabled,
}

impl<C> AlarmSink for AlarmBackend<C>
where
    C: Connector,
    C::Handle: LineWriter,
{
    async fn raise(&self) -> bool {
        match self {
            AlarmBackend::Serial(controller) => controller.raise().await,
            AlarmBackend::Remote(remote) => remote.raise().await,
            AlarmBackend::Disabled => {
                warn!("incident confirmed but alarm is disabled");
                false
            }
        }
    }
}
