//! StorageRouter: every report goes to local storage, incidents are also
//! escalated to cloud storage.

use serde::Serialize;
use tracing::{debug, info};

use crate::config::MachineConfig;
use crate::decision::IncidentIndicators;
use crate::report::{Report, ReportStatus};
use crate::retry::RetryPolicy;
use crate::services::{ReportStore, ServiceError, Snapshot, StoreReceipt};

/// `metadatos` block sent with every stored image.
#[derive(Debug, Clone, Serialize)]
pub struct StoreMetadata<'a> {
    pub datetimepic: &'a str,
    #[serde(rename = "idShovel")]
    pub id_shovel: &'a str,
    #[serde(rename = "idUser")]
    pub id_user: Option<&'a str>,
    #[serde(rename = "idStatusIncident")]
    pub id_status_incident: Option<&'a str>,
}

impl<'a> StoreMetadata<'a> {
    /// The capture timestamp wins; reports built from snapshots without one
    /// fall back to the report's own UTC timestamp.
    pub fn new(snapshot: &'a Snapshot, report: &'a Report, machine: &'a MachineConfig) -> Self {
        Self {
            datetimepic: snapshot
                .metadata
                .datetimepic
                .as_deref()
                .unwrap_or(&report.timestamp_utc),
            id_shovel: &machine.id_shovel,
            id_user: machine.id_user.as_deref(),
            id_status_incident: machine.id_status_incident.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LocalStoreRequest<'a> {
    pub imagen: &'a str,
    pub metadatos: StoreMetadata<'a>,
    pub json_reporte: &'a Report,
    pub indicadores_recurrencia: &'a IncidentIndicators,
}

#[derive(Debug, Serialize)]
pub struct EscalationRequest<'a> {
    pub imagen: &'a str,
    pub metadatos: StoreMetadata<'a>,
}

pub struct StorageRouter<S> {
    store: S,
}

impl<S: ReportStore> StorageRouter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Persist the report locally and copy the returned references into it.
    pub async fn store_local(
        &self,
        report: &mut Report,
        snapshot: &Snapshot,
        machine: &MachineConfig,
        policy: &RetryPolicy,
        on_error: impl FnMut(&ServiceError),
    ) -> Result<StoreReceipt, ServiceError> {
        let receipt = {
            let current: &Report = report;
            let body = LocalStoreRequest {
                imagen: &snapshot.image,
                metadatos: StoreMetadata::new(snapshot, current, machine),
                json_reporte: current,
                indicadores_recurrencia: &current.indicators,
            };
            policy
                .run("store_local", || self.store.store_local(&body), on_error)
                .await?
        };
        report.attach_local(&receipt);
        debug!(report = %report.id, reference = ?receipt.reference, "report stored locally");
        Ok(receipt)
    }

    /// Escalate the image when the report is an incident.
    ///
    /// Returns `Ok(None)` without contacting the store otherwise.
    pub async fn escalate(
        &self,
        report: &mut Report,
        snapshot: &Snapshot,
        machine: &MachineConfig,
        policy: &RetryPolicy,
        on_error: impl FnMut(&ServiceError),
    ) -> Result<Option<StoreReceipt>, ServiceError> {
        if report.status != ReportStatus::Incident {
            return Ok(None);
        }
        let receipt = {
            let body = EscalationRequest {
                imagen: &snapshot.image,
                metadatos: StoreMetadata::new(snapshot, &*report, machine),
            };
            policy
                .run("store_escalation", || self.store.store_escalation(&body), on_error)
                .await?
        };
        report.attach_cloud(&receipt);
        info!(report = %report.id, reference = ?receipt.reference, "incident escalated to cloud storage");
        Ok(Some(receipt))
    }
}
