use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{MachineConfig, VigiaConfig};
use crate::decision::IncidentIndicators;
use crate::error::CommandError;
use crate::retry::RetryPolicy;

/// Lifecycle of the cycle orchestrator.
///
/// STOPPED → (start) → RUNNING → (pause | incident) → PAUSED → (resume) →
/// RUNNING → (stop) → STOPPED. Nothing leaves PAUSED on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Stopped => write!(f, "STOPPED"),
            RunState::Running => write!(f, "RUNNING"),
            RunState::Paused => write!(f, "PAUSED"),
        }
    }
}

/// Administrative commands accepted by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Resume,
    Pause,
    Stop,
}

impl RunState {
    /// Compute the state reached by applying `command`.
    ///
    /// Start and resume share semantics: both are accepted from STOPPED and
    /// PAUSED and both begin a fresh run.
    pub fn apply(self, command: Command) -> Result<RunState, CommandError> {
        match (self, command) {
            (RunState::Running, Command::Start | Command::Resume) => {
                Err(CommandError::AlreadyRunning)
            }
            (_, Command::Start | Command::Resume) => Ok(RunState::Running),
            (RunState::Running, Command::Pause) => Ok(RunState::Paused),
            (_, Command::Pause) => Err(CommandError::NotRunning),
            (RunState::Stopped, Command::Stop) => Err(CommandError::AlreadyStopped),
            (_, Command::Stop) => Ok(RunState::Stopped),
        }
    }
}

/// Per-run counters. Reset on every start/resume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleState {
    pub cycle_number: u64,
    pub consecutive_failure_count: u32,
    pub reports_sent: u64,
}

/// Settings frozen at start/resume for the lifetime of one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub machine: MachineConfig,
    pub default_expected: u32,
    pub threshold: u32,
    pub cycle_sleep: Duration,
    pub retry: RetryPolicy,
}

impl RunSettings {
    pub fn from_config(config: &VigiaConfig) -> Self {
        Self {
            machine: config.machine.clone(),
            default_expected: config.cycle.default_expected_teeth,
            threshold: config.cycle.min_consecutive_missing_cycles,
            cycle_sleep: config.cycle.cycle_sleep(),
            retry: config.retry.policy(),
        }
    }
}

/// Payload of `GET /api/v1/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub service: String,
    pub running: bool,
    pub paused: bool,
    pub state: RunState,
    pub run_id: Option<Uuid>,
    pub uptime_start: Option<String>,
    pub last_success: Option<String>,
    pub last_error: Option<String>,
    pub last_cycle_info: Option<IncidentIndicators>,
    pub ciclo_actual: u64,
    pub reportes_enviados: u64,
    pub last_report_id: Option<String>,
}
