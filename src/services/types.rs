//! Tipos de datos intercambiados con los servicios colaboradores.
//!
//! La imagen viaja como la cadena base64 entregada por el capturador; el
//! orquestador nunca la decodifica.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::ServiceError;

/// Respuesta de `GET snapshot` del servicio capturador.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Imagen JPEG codificada en base64.
    pub image: String,
    #[serde(default)]
    pub metadata: CaptureMetadata,
}

/// Metadatos de captura. Los campos desconocidos se conservan en `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetimepic: Option<String>,
    /// Dientes esperados informados por el capturador, si los conoce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_teeth: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Snapshot {
    /// Rechaza capturas sin imagen, que no sirven para detección.
    pub fn validate(self) -> Result<Self, ServiceError> {
        if self.image.trim().is_empty() {
            return Err(ServiceError::InvalidPayload("snapshot image is empty".into()));
        }
        Ok(self)
    }
}

/// Origen de una detección.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    Local,
    Cloud,
}

impl fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionSource::Local => write!(f, "local"),
            DetectionSource::Cloud => write!(f, "cloud"),
        }
    }
}

/// Cuerpo de `POST detect`.
#[derive(Debug, Serialize)]
pub struct DetectRequest<'a> {
    pub image: &'a str,
}

/// Resultado de un detector para un ciclo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub source: DetectionSource,
    pub feature_count: u32,
    /// Cuerpo completo devuelto por el detector.
    pub raw_payload: Value,
}

impl DetectionResult {
    /// El conteo es la cantidad de elementos en `predicciones`; cualquier otra
    /// forma cuenta como cero dientes.
    pub fn from_response(source: DetectionSource, body: Value) -> Self {
        let feature_count = body
            .get("predicciones")
            .and_then(Value::as_array)
            .map(|preds| preds.len() as u32)
            .unwrap_or(0);
        Self {
            source,
            feature_count,
            raw_payload: body,
        }
    }
}

/// Referencias devueltas por un almacenador.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReceipt {
    pub reference: Option<String>,
    pub derived_name: Option<String>,
}

const REFERENCE_KEYS: &[&str] = &["reference", "path", "ruta_imagen_local", "ruta_imagen_nube"];
const NAME_KEYS: &[&str] = &["derivedName", "rawname", "rawname_nube"];

impl StoreReceipt {
    /// Extrae las referencias del cuerpo, buscando en el nivel superior y en
    /// los objetos anidados (`resultado`, `reporte`, ...).
    pub fn from_response(body: &Value) -> Self {
        Self {
            reference: find_str(body, REFERENCE_KEYS, 2),
            derived_name: find_str(body, NAME_KEYS, 2),
        }
    }
}

fn find_str(value: &Value, keys: &[&str], depth: u8) -> Option<String> {
    let obj = value.as_object()?;
    for key in keys {
        if let Some(s) = obj.get(*key).and_then(Value::as_str) {
            return Some(s.to_string());
        }
    }
    if depth == 0 {
        return None;
    }
    obj.values().find_map(|v| find_str(v, keys, depth - 1))
}
