//! Report document persisted once per cycle.
//!
//! Field names follow the document store the dashboard reads
//! (`id_reporte`, `estado_reporte`, `resultados_reporte`, ...).

use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::MachineConfig;
use crate::decision::IncidentIndicators;
use crate::services::{DetectionResult, StoreReceipt};

/// Local wall-clock timestamp used in reports and status payloads.
pub fn local_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "incidente")]
    Incident,
    #[serde(rename = "sin_novedades")]
    Clear,
}

/// Snapshot of the static machine metadata at report time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub id_shovel: String,
    pub modelo_maquinaria: String,
    pub marca_maquinaria: String,
    pub modelo_pala: String,
    pub marca_pala: String,
    pub dientes_pala: u32,
    pub maquinista_responsable: String,
}

impl From<&MachineConfig> for MachineInfo {
    fn from(machine: &MachineConfig) -> Self {
        Self {
            id_shovel: machine.id_shovel.clone(),
            modelo_maquinaria: machine.modelo_maquinaria.clone(),
            marca_maquinaria: machine.marca_maquinaria.clone(),
            modelo_pala: machine.modelo_pala.clone(),
            marca_pala: machine.marca_pala.clone(),
            dientes_pala: machine.cantidad_dientes_pala,
            maquinista_responsable: machine.maquinista_responsable.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(rename = "id_reporte")]
    pub id: String,
    pub timestamp_utc: String,
    pub timestamp_local: String,
    #[serde(rename = "estado_reporte")]
    pub status: ReportStatus,
    #[serde(rename = "maquinaria")]
    pub machine: MachineInfo,
    pub ruta_imagen_local: Option<String>,
    pub ruta_imagen_nube: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rawname: Option<String>,
    #[serde(rename = "resultados_procesamiento_local")]
    pub local_results: Value,
    #[serde(rename = "resultados_procesamiento_nube")]
    pub cloud_results: Value,
    #[serde(rename = "resultados_reporte")]
    pub indicators: IncidentIndicators,
    /// Set by an operator from the dashboard, never by the orchestrator.
    #[serde(rename = "confirmado", default)]
    pub confirmed: bool,
}

/// `{id_shovel}-{YYYYMMDDTHHMMSSZ}`.
pub fn report_id(id_shovel: &str, at: DateTime<Utc>) -> String {
    format!("{id_shovel}-{}", at.format("%Y%m%dT%H%M%SZ"))
}

impl Report {
    pub fn build(
        machine: MachineInfo,
        local: &DetectionResult,
        cloud: &DetectionResult,
        indicators: IncidentIndicators,
        at: DateTime<Utc>,
    ) -> Self {
        let status = if indicators.is_incident {
            ReportStatus::Incident
        } else {
            ReportStatus::Clear
        };
        Self {
            id: report_id(&machine.id_shovel, at),
            timestamp_utc: at.to_rfc3339_opts(SecondsFormat::Micros, true),
            timestamp_local: at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            status,
            machine,
            ruta_imagen_local: None,
            ruta_imagen_nube: None,
            rawname: None,
            local_results: local.raw_payload.clone(),
            cloud_results: cloud.raw_payload.clone(),
            indicators,
            confirmed: false,
        }
    }

    pub fn attach_local(&mut self, receipt: &StoreReceipt) {
        if receipt.reference.is_some() {
            self.ruta_imagen_local = receipt.reference.clone();
        }
        if receipt.derived_name.is_some() {
            self.rawname = receipt.derived_name.clone();
        }
    }

    pub fn attach_cloud(&mut self, receipt: &StoreReceipt) {
        if receipt.reference.is_some() {
            self.ruta_imagen_nube = receipt.reference.clone();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::decision::evaluate;
    use crate::services::DetectionSource;
    use chrono::TimeZone;
    use serde_json::json;

    pub(crate) fn machine() -> MachineInfo {
        MachineInfo {
            id_shovel: "7".into(),
            modelo_maquinaria: "PC5500".into(),
            marca_maquinaria: "Komatsu".into(),
            modelo_pala: "BK-29".into(),
            marca_pala: "ESCO".into(),
            dientes_pala: 20,
            maquinista_responsable: "turno A".into(),
        }
    }

    fn detection(source: DetectionSource, n: usize) -> DetectionResult {
        let preds: Vec<_> = (0..n).map(|_| json!({"class": "diente"})).collect();
        DetectionResult::from_response(source, json!({ "predicciones": preds }))
    }

    fn sample(incident: bool) -> Report {
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        let indicators = if incident {
            evaluate(20, 18, 17, 1, 2)
        } else {
            evaluate(20, 20, 20, 0, 2)
        };
        Report::build(
            machine(),
            &detection(DetectionSource::Local, 18),
            &detection(DetectionSource::Cloud, 17),
            indicators,
            at,
        )
    }

    #[test]
    fn report_id_format() {
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(report_id("7", at), "7-20250304T050607Z");
    }

    #[test]
    fn build_sets_status_from_indicators() {
        assert_eq!(sample(true).status, ReportStatus::Incident);
        assert_eq!(sample(false).status, ReportStatus::Clear);
        assert!(!sample(true).confirmed);
        assert!(sample(true).timestamp_utc.ends_with('Z'));
    }

    #[test]
    fn serialized_document_shape() {
        let json = serde_json::to_value(sample(true)).unwrap();
        assert_eq!(json["id_reporte"], "7-20250304T050607Z");
        assert_eq!(json["estado_reporte"], "incidente");
        assert_eq!(json["maquinaria"]["id_shovel"], "7");
        assert_eq!(json["maquinaria"]["dientes_pala"], 20);
        assert_eq!(json["resultados_reporte"]["es_incidente"], true);
        assert_eq!(json["resultados_procesamiento_local"]["predicciones"].as_array().unwrap().len(), 18);
        assert!(json["ruta_imagen_local"].is_null());
        assert_eq!(json["confirmado"], false);

        let clear = serde_json::to_value(sample(false)).unwrap();
        assert_eq!(clear["estado_reporte"], "sin_novedades");
    }

    #[test]
    fn document_survives_storage_roundtrip() {
        let mut report = sample(true);
        report.attach_local(&StoreReceipt {
            reference: Some("reportes/7/a.jpg".into()),
            derived_name: Some("a.jpg".into()),
        });
        let stored = serde_json::to_string(&report).unwrap();
        let back: Report = serde_json::from_str(&stored).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn operator_confirmation_is_read_back() {
        let mut json = serde_json::to_value(sample(true)).unwrap();
        json["confirmado"] = json!(true);
        let report: Report = serde_json::from_value(json).unwrap();
        assert!(report.confirmed);
    }

    #[test]
    fn attach_receipts_fill_references() {
        let mut report = sample(true);
        report.attach_local(&StoreReceipt::default());
        assert!(report.ruta_imagen_local.is_none());

        report.attach_local(&StoreReceipt {
            reference: Some("reportes/7/a.jpg".into()),
            derived_name: Some("a.jpg".into()),
        });
        report.attach_cloud(&StoreReceipt {
            reference: Some("incidentes/7/a.jpg".into()),
            derived_name: None,
        });
        assert_eq!(report.ruta_imagen_local.as_deref(), Some("reportes/7/a.jpg"));
        assert_eq!(report.ruta_imagen_nube.as_deref(), Some("incidentes/7/a.jpg"));
        assert_eq!(report.rawname.as_deref(), Some("a.jpg"));
    }
}
