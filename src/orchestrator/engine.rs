//! The cycle orchestrator.
//!
//! One background worker per run drives capture, dual detection, the
//! incident decision, storage and the alarm, strictly one cycle at a time.
//! Administrative commands only flip state under the control lock and, for
//! start/resume, spawn a new worker; they never wait on collaborators.
//!
//! Every start/resume bumps a run generation. A worker whose generation is
//! no longer current stops at its next checkpoint, and a cycle that finishes
//! after being superseded commits nothing.

use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::state::{Command, CycleState, RunSettings, RunState, StatusSnapshot};
use crate::alarm::AlarmSink;
use crate::decision::{IncidentIndicators, evaluate};
use crate::error::CommandError;
use crate::report::{MachineInfo, Report, local_timestamp};
use crate::services::{Detector, ImageSource, ReportStore, ServiceError};
use crate::storage::StorageRouter;

pub const INCIDENT_PAUSE_MESSAGE: &str = "Incidente detectado → pausa automática";

/// External parts the orchestrator drives.
pub struct Collaborators<I, D, S, A> {
    pub capture: I,
    pub local: D,
    pub cloud: D,
    pub storage: StorageRouter<S>,
    pub alarm: A,
}

#[derive(Default)]
struct Control {
    run: RunState,
    generation: u64,
    run_id: Option<Uuid>,
    uptime_start: Option<String>,
    last_success: Option<String>,
    last_error: Option<String>,
    last_cycle_info: Option<IncidentIndicators>,
    last_report_id: Option<String>,
}

struct Inner<I, D, S, A> {
    service_name: String,
    collaborators: Collaborators<I, D, S, A>,
    // Lock order: control before cycle.
    control: Mutex<Control>,
    cycle: Mutex<CycleState>,
    /// Held for the whole of one cycle, across runs.
    cycle_lock: AsyncMutex<()>,
}

pub struct CycleOrchestrator<I, D, S, A> {
    inner: Arc<Inner<I, D, S, A>>,
}

impl<I, D, S, A> Clone for CycleOrchestrator<I, D, S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Continue,
    Halt,
    Superseded,
}

impl<I, D, S, A> CycleOrchestrator<I, D, S, A>
where
    I: ImageSource,
    D: Detector,
    S: ReportStore,
    A: AlarmSink,
{
    pub fn new(service_name: impl Into<String>, collaborators: Collaborators<I, D, S, A>) -> Self {
        Self {
            inner: Arc::new(Inner {
                service_name: service_name.into(),
                collaborators,
                control: Mutex::new(Control::default()),
                cycle: Mutex::new(CycleState::default()),
                cycle_lock: AsyncMutex::new(()),
            }),
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.inner.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cycle(&self) -> MutexGuard<'_, CycleState> {
        self.inner.cycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(&self, settings: RunSettings) -> Result<Uuid, CommandError> {
        self.begin(Command::Start, settings)
    }

    /// Same as [`start`](Self::start); used after an incident or manual pause.
    pub fn resume(&self, settings: RunSettings) -> Result<Uuid, CommandError> {
        self.begin(Command::Resume, settings)
    }

    fn begin(&self, command: Command, settings: RunSettings) -> Result<Uuid, CommandError> {
        let run_id = Uuid::new_v4();
        let generation = {
            let mut control = self.control();
            control.run = control.run.apply(command)?;
            control.generation += 1;
            control.run_id = Some(run_id);
            control.uptime_start = Some(local_timestamp());
            *self.cycle() = CycleState::default();
            control.generation
        };
        info!(
            %run_id,
            ?command,
            threshold = settings.threshold,
            default_expected = settings.default_expected,
            "run started"
        );
        tokio::spawn(self.clone().work(generation, run_id, settings));
        Ok(run_id)
    }

    pub fn pause(&self) -> Result<(), CommandError> {
        let mut control = self.control();
        control.run = control.run.apply(Command::Pause)?;
        info!(run_id = ?control.run_id, "run paused");
        Ok(())
    }

    pub fn stop(&self) -> Result<(), CommandError> {
        let mut control = self.control();
        control.run = control.run.apply(Command::Stop)?;
        info!(run_id = ?control.run_id, "run stopped");
        Ok(())
    }

    pub fn run_state(&self) -> RunState {
        self.control().run
    }

    pub fn cycle_state(&self) -> CycleState {
        *self.cycle()
    }

    pub fn status(&self) -> StatusSnapshot {
        let control = self.control();
        let cycle = self.cycle_state();
        StatusSnapshot {
            service: self.inner.service_name.clone(),
            running: control.run == RunState::Running,
            paused: control.run == RunState::Paused,
            state: control.run,
            run_id: control.run_id,
            uptime_start: control.uptime_start.clone(),
            last_success: control.last_success.clone(),
            last_error: control.last_error.clone(),
            last_cycle_info: control.last_cycle_info.clone(),
            ciclo_actual: cycle.cycle_number,
            reportes_enviados: cycle.reports_sent,
            last_report_id: control.last_report_id.clone(),
        }
    }

    /// Store `"{timestamp} - {message}"` as the last error.
    pub fn record_error(&self, message: impl Display) {
        self.control().last_error = Some(format!("{} - {message}", local_timestamp()));
    }

    fn record_success(&self) {
        self.control().last_success = Some(local_timestamp());
    }

    fn note_error(&self) -> impl FnMut(&ServiceError) + '_ {
        move |e: &ServiceError| self.record_error(e)
    }

    fn is_active(&self, generation: u64) -> bool {
        let control = self.control();
        control.generation == generation && control.run == RunState::Running
    }

    async fn work(self, generation: u64, run_id: Uuid, settings: RunSettings) {
        let span = info_span!("run", %run_id);
        async move {
            while self.is_active(generation) {
                let outcome = {
                    let _cycle = self.inner.cycle_lock.lock().await;
                    if !self.is_active(generation) {
                        break;
                    }
                    self.run_cycle(generation, &settings).await
                };
                match outcome {
                    CycleOutcome::Continue => sleep(settings.cycle_sleep).await,
                    CycleOutcome::Halt | CycleOutcome::Superseded => break,
                }
            }
            debug!("worker exited");
        }
        .instrument(span)
        .await
    }

    async fn run_cycle(&self, generation: u64, settings: &RunSettings) -> CycleOutcome {
        let parts = &self.inner.collaborators;
        let policy = &settings.retry;

        let Some(cycle_number) = self.begin_cycle(generation) else {
            return CycleOutcome::Superseded;
        };
        debug!(cycle = cycle_number, "cycle started");

        let snapshot = match policy
            .run("capture", || parts.capture.capture(), self.note_error())
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "capture abandoned, skipping cycle");
                return CycleOutcome::Continue;
            }
        };
        self.record_success();

        let local = match policy
            .run("detect_local", || parts.local.detect(&snapshot.image), self.note_error())
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(source = %parts.local.source(), error = %e, "detection abandoned, skipping cycle");
                return CycleOutcome::Continue;
            }
        };
        self.record_success();

        let cloud = match policy
            .run("detect_cloud", || parts.cloud.detect(&snapshot.image), self.note_error())
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(source = %parts.cloud.source(), error = %e, "detection abandoned, skipping cycle");
                return CycleOutcome::Continue;
            }
        };
        self.record_success();

        let expected = snapshot
            .metadata
            .expected_teeth
            .unwrap_or(settings.default_expected);

        let Some(indicators) = self.commit_evaluation(
            generation,
            expected,
            local.feature_count,
            cloud.feature_count,
            settings.threshold,
        ) else {
            info!("run superseded during cycle, discarding results");
            return CycleOutcome::Superseded;
        };
        info!(
            cycle = cycle_number,
            expected,
            local = indicators.local_count,
            cloud = indicators.cloud_count,
            failure = indicators.is_failure_cycle(),
            streak = indicators.consecutive_failures,
            incident = indicators.is_incident,
            "cycle evaluated"
        );

        let mut report = Report::build(
            MachineInfo::from(&settings.machine),
            &local,
            &cloud,
            indicators,
            Utc::now(),
        );

        match parts
            .storage
            .store_local(&mut report, &snapshot, &settings.machine, policy, self.note_error())
            .await
        {
            Ok(_) => self.commit_report(generation, &report.id),
            Err(e) => error!(report = %report.id, error = %e, "local report storage failed"),
        }

        if !report.indicators.is_incident {
            self.record_success();
            return CycleOutcome::Continue;
        }

        warn!(report = %report.id, cycle = cycle_number, "incident confirmed");
        if let Err(e) = parts
            .storage
            .escalate(&mut report, &snapshot, &settings.machine, policy, self.note_error())
            .await
        {
            error!(report = %report.id, error = %e, "incident escalation failed");
        }
        if !parts.alarm.raise().await {
            warn!("alarm did not confirm activation");
            self.record_error("alarm not confirmed");
        }
        self.halt_on_incident(generation);
        CycleOutcome::Halt
    }

    /// Count a new cycle, unless the run was replaced.
    fn begin_cycle(&self, generation: u64) -> Option<u64> {
        let control = self.control();
        if control.generation != generation {
            return None;
        }
        let mut cycle = self.cycle();
        cycle.cycle_number += 1;
        Some(cycle.cycle_number)
    }

    /// Update the failure streak for this cycle, unless the run was replaced.
    fn commit_evaluation(
        &self,
        generation: u64,
        expected: u32,
        local_count: u32,
        cloud_count: u32,
        threshold: u32,
    ) -> Option<IncidentIndicators> {
        let mut control = self.control();
        if control.generation != generation {
            return None;
        }
        let mut cycle = self.cycle();
        let indicators = evaluate(
            expected,
            local_count,
            cloud_count,
            cycle.consecutive_failure_count,
            threshold,
        );
        cycle.consecutive_failure_count = indicators.consecutive_failures;
        control.last_cycle_info = Some(indicators.clone());
        Some(indicators)
    }

    fn commit_report(&self, generation: u64, report_id: &str) {
        let mut control = self.control();
        if control.generation != generation {
            return;
        }
        control.last_report_id = Some(report_id.to_string());
        self.cycle().reports_sent += 1;
    }

    /// Only a RUNNING run of the same generation is moved to PAUSED.
    fn halt_on_incident(&self, generation: u64) {
        let mut control = self.control();
        if control.generation == generation && control.run == RunState::Running {
            control.run = RunState::Paused;
            control.last_error = Some(INCIDENT_PAUSE_MESSAGE.to_string());
            info!("run paused after incident, waiting for resume");
        } else {
            info!(state = %control.run, "incident after run left RUNNING, state unchanged");
        }
    }
}

/// Object-safe view used by the HTTP surface.
pub trait ControlSurface: Send + Sync {
    fn start(&self, settings: RunSettings) -> Result<Uuid, CommandError>;
    fn resume(&self, settings: RunSettings) -> Result<Uuid, CommandError>;
    fn pause(&self) -> Result<(), CommandError>;
    fn stop(&self) -> Result<(), CommandError>;
    fn status(&self) -> StatusSnapshot;
    fn record_error(&self, message: &str);
}

impl<I, D, S, A> ControlSurface for CycleOrchestrator<I, D, S, A>
where
    I: ImageSource,
    D: Detector,
    S: ReportStore,
    A: AlarmSink,
{
    fn start(&self, settings: RunSettings) -> Result<Uuid, CommandError> {
        CycleOrchestrator::start(self, settings)
    }

    fn resume(&self, settings: RunSettings) -> Result<Uuid, CommandError> {
        CycleOrchestrator::resume(self, settings)
    }

    fn pause(&self) -> Result<(), CommandError> {
        CycleOrchestrator::pause(self)
    }

    fn stop(&self) -> Result<(), CommandError> {
        CycleOrchestrator::stop(self)
    }

    fn status(&self) -> StatusSnapshot {
        CycleOrchestrator::status(self)
    }

    fn record_error(&self, message: &str) {
        CycleOrchestrator::record_error(self, message)
    }
}
