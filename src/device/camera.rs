//! Camera presence watcher.
//!
//! Cameras are tried by index (`/dev/video0`, `/dev/video1`, ...). The
//! watcher keeps the first one that opens and polls it; when it vanishes
//! the reconnector rotates through the index list until one comes back.
//! Frame capture itself belongs to the acquisition service.

use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::reconnector::{Connector, DeviceReconnector, DeviceStatus};
use crate::error::DeviceError;
use crate::report::local_timestamp;

/// Health check on an open device.
pub trait Probe: Send {
    fn probe(&mut self) -> Result<(), DeviceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraCandidate {
    pub index: u32,
    pub path: PathBuf,
}

impl fmt::Display for CameraCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "camera {} ({})", self.index, self.path.display())
    }
}

pub struct CameraDevice {
    pub index: u32,
    path: PathBuf,
    _file: File,
}

impl Probe for CameraDevice {
    fn probe(&mut self) -> Result<(), DeviceError> {
        std::fs::metadata(&self.path)?;
        Ok(())
    }
}

pub struct CameraConnector {
    indices: Vec<u32>,
    device_prefix: String,
}

impl CameraConnector {
    pub fn new(indices: Vec<u32>, device_prefix: impl Into<String>) -> Self {
        Self {
            indices,
            device_prefix: device_prefix.into(),
        }
    }
}

impl Connector for CameraConnector {
    type Candidate = CameraCandidate;
    type Handle = CameraDevice;

    fn candidates(&self) -> Vec<CameraCandidate> {
        self.indices
            .iter()
            .map(|&index| CameraCandidate {
                index,
                path: PathBuf::from(format!("{}{}", self.device_prefix, index)),
            })
            .collect()
    }

    fn open(&self, candidate: &CameraCandidate) -> Result<CameraDevice, DeviceError> {
        let file = File::open(&candidate.path).map_err(|e| DeviceError::Open {
            candidate: candidate.to_string(),
            message: e.to_string(),
        })?;
        Ok(CameraDevice {
            index: candidate.index,
            path: candidate.path.clone(),
            _file: file,
        })
    }
}

/// Status payload for `/api/v1/camera/status`.
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    pub service: &'static str,
    pub running: bool,
    pub uptime_start: Option<String>,
    pub last_success: Option<String>,
    #[serde(flatten)]
    pub device: DeviceStatus,
}

#[derive(Default)]
struct WatcherState {
    uptime_start: Option<String>,
    last_success: Option<String>,
}

/// Background worker keeping a camera handle alive.
pub struct CameraWatcher<C: Connector> {
    reconnector: DeviceReconnector<C>,
    poll_interval: Duration,
    running: AtomicBool,
    state: Mutex<WatcherState>,
}

impl<C> CameraWatcher<C>
where
    C: Connector,
    C::Handle: Probe,
{
    pub fn new(connector: C, backoff: Duration, poll_interval: Duration) -> Self {
        Self {
            reconnector: DeviceReconnector::new(connector, backoff),
            poll_interval,
            running: AtomicBool::new(false),
            state: Mutex::new(WatcherState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WatcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Poll the held camera once. Returns whether it is still alive.
    pub fn poll(&self) -> bool {
        match self.reconnector.with_handle(|camera| camera.probe()) {
            Ok(()) => {
                self.lock().last_success = Some(local_timestamp());
                true
            }
            Err(DeviceError::NotConnected) => false,
            Err(e) => {
                warn!(error = %e, "camera lost, recovering");
                false
            }
        }
    }

    /// Run until [`stop`](Self::stop). Never fails.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        self.lock().uptime_start = Some(local_timestamp());
        info!("camera watcher started");

        while !self.reconnector.is_closed() {
            if !self.reconnector.is_connected() {
                match self.reconnector.acquire().await {
                    Some(camera) => info!(camera = %camera, "camera recovered"),
                    None => break,
                }
            }
            self.poll();
            if !self.reconnector.pause(self.poll_interval).await {
                break;
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("camera watcher stopped");
    }

    /// Stop the worker, waking it if it is waiting for a camera, and
    /// release the device.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.reconnector.close();
    }

    pub fn status(&self) -> CameraStatus {
        let state = self.lock();
        CameraStatus {
            service: "servicio_transmision_camara",
            running: self.running.load(Ordering::SeqCst),
            uptime_start: state.uptime_start.clone(),
            last_success: state.last_success.clone(),
            device: self.reconnector.status(),
        }
    }
}

/// Object-safe view used by the HTTP surface.
pub trait CameraPanel: Send + Sync {
    fn status(&self) -> CameraStatus;
}

impl<C> CameraPanel for CameraWatcher<C>
where
    C: Connector,
    C::Handle: Probe,
{
    fn status(&self) -> CameraStatus {
        CameraWatcher::status(self)
    }
}
