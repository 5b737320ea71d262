//! Configuración de vigia cargada a partir de `vigia.toml`.
//!
//! La struct [`VigiaConfig`] contiene todos los parámetros configurables.
//! Los campos opcionales usan valores por defecto; la ausencia del archivo o
//! de un campo obligatorio (`machine.id_shovel`, URLs de `services`) es un
//! error fatal de arranque.
//! La variable de entorno `VIGIA_BIND_ADDR` tiene precedencia sobre el archivo.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::device::serial::UsbId;
use crate::error::VigiaError;
use crate::retry::RetryPolicy;

/// Ruta por defecto del archivo de configuración.
pub const DEFAULT_CONFIG_PATH: &str = "vigia.toml";

/// Configuración de nivel superior cargada de `vigia.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct VigiaConfig {
    /// Nombre del servicio reportado en `/api/v1/status`.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Dirección de escucha de la API administrativa.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    pub machine: MachineConfig,

    #[serde(default)]
    pub cycle: CycleConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    pub services: ServicesConfig,

    #[serde(default)]
    pub alarm: AlarmConfig,

    #[serde(default)]
    pub camera: CameraConfig,
}

/// Datos estáticos de la maquinaria, copiados en cada reporte.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    pub id_shovel: String,
    #[serde(default)]
    pub id_user: Option<String>,
    #[serde(default)]
    pub id_status_incident: Option<String>,
    #[serde(default)]
    pub modelo_maquinaria: String,
    #[serde(default)]
    pub marca_maquinaria: String,
    #[serde(default)]
    pub modelo_pala: String,
    #[serde(default)]
    pub marca_pala: String,
    #[serde(default)]
    pub cantidad_dientes_pala: u32,
    #[serde(default)]
    pub maquinista_responsable: String,
}

/// Parámetros del ciclo de inspección.
#[derive(Debug, Clone, Deserialize)]
pub struct CycleConfig {
    /// Dientes esperados cuando la captura no trae `expected_teeth`.
    #[serde(default = "default_expected_teeth")]
    pub default_expected_teeth: u32,

    /// Ciclos consecutivos con faltantes en ambos modelos antes de declarar incidente.
    #[serde(default = "default_threshold")]
    pub min_consecutive_missing_cycles: u32,

    /// Pausa entre ciclos, en segundos.
    #[serde(default = "default_cycle_sleep_seconds")]
    pub cycle_sleep_seconds: f64,
}

/// Política de reintentos para las llamadas a servicios colaboradores.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Espera fija entre intentos, en milisegundos.
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,

    /// Límite de intentos; sin límite (reintento infinito) si no se indica.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Timeout de cada petición HTTP, en segundos.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// URLs completas de los servicios colaboradores.
#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    pub capture_url: String,
    pub local_detector_url: String,
    pub cloud_detector_url: String,
    pub local_storage_url: String,
    pub cloud_storage_url: String,
}

/// Dónde vive la sirena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmMode {
    /// Arduino conectado por USB a este mismo equipo.
    Serial,
    /// Servicio alertador remoto vía HTTP.
    Remote,
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlarmConfig {
    #[serde(default = "default_alarm_mode")]
    pub mode: AlarmMode,

    /// Endpoint del servicio alertador remoto (modo `remote`).
    #[serde(default)]
    pub remote_url: Option<String>,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Espera tras abrir el puerto (el Arduino se reinicia al conectar).
    #[serde(default = "default_open_settle_ms")]
    pub open_settle_ms: u64,

    /// Espera antes de reenviar el estado deseado tras una reconexión.
    #[serde(default = "default_resync_delay_ms")]
    pub resync_delay_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Tabla VID/PID aceptada; si está vacía se usa la tabla integrada.
    #[serde(default)]
    pub devices: Vec<UsbId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_camera_indices")]
    pub indices: Vec<u32>,

    #[serde(default = "default_device_prefix")]
    pub device_prefix: String,

    #[serde(default = "default_camera_backoff_ms")]
    pub backoff_ms: u64,

    #[serde(default = "default_camera_poll_ms")]
    pub poll_interval_ms: u64,
}

// Valor por defecto del nombre de servicio.
fn default_service_name() -> String {
    "servicio_solicitud_reporte".to_string()
}

// Puerto histórico del servicio orquestador: 5008.
fn default_bind_addr() -> String {
    "0.0.0.0:5008".to_string()
}

fn default_expected_teeth() -> u32 {
    20
}

// Dos ciclos consecutivos, igual que el sistema en producción.
fn default_threshold() -> u32 {
    2
}

fn default_cycle_sleep_seconds() -> f64 {
    5.0
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_alarm_mode() -> AlarmMode {
    AlarmMode::Serial
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_open_settle_ms() -> u64 {
    2000
}

fn default_resync_delay_ms() -> u64 {
    1000
}

fn default_reconnect_interval_ms() -> u64 {
    2000
}

fn default_camera_indices() -> Vec<u32> {
    vec![0, 1, 2, 3]
}

fn default_device_prefix() -> String {
    "/dev/video".to_string()
}

fn default_camera_backoff_ms() -> u64 {
    1000
}

fn default_camera_poll_ms() -> u64 {
    500
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            default_expected_teeth: default_expected_teeth(),
            min_consecutive_missing_cycles: default_threshold(),
            cycle_sleep_seconds: default_cycle_sleep_seconds(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_retry_delay_ms(),
            max_attempts: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            mode: default_alarm_mode(),
            remote_url: None,
            baud_rate: default_baud_rate(),
            open_settle_ms: default_open_settle_ms(),
            resync_delay_ms: default_resync_delay_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            devices: Vec::new(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            indices: default_camera_indices(),
            device_prefix: default_device_prefix(),
            backoff_ms: default_camera_backoff_ms(),
            poll_interval_ms: default_camera_poll_ms(),
        }
    }
}

impl RetryConfig {
    /// Convierte la sección `[retry]` en la política inyectada al orquestador.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_millis(self.delay_ms),
            max_attempts: self.max_attempts,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl CycleConfig {
    pub fn cycle_sleep(&self) -> Duration {
        Duration::from_secs_f64(self.cycle_sleep_seconds.max(0.0))
    }
}

impl VigiaConfig {
    /// Carga y valida la configuración desde `path`.
    ///
    /// A diferencia de otros parámetros del sistema, la configuración es
    /// obligatoria: un archivo ausente o inválido aborta el arranque.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config = Self::parse(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))?;

        // La variable de entorno tiene precedencia sobre el archivo.
        if let Ok(addr) = std::env::var("VIGIA_BIND_ADDR")
            && !addr.is_empty()
        {
            config.bind_addr = addr;
        }

        Ok(config)
    }

    /// Interpreta y valida el contenido TOML.
    pub fn parse(contents: &str) -> Result<Self, VigiaError> {
        let config: VigiaConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), VigiaError> {
        if self.machine.id_shovel.trim().is_empty() {
            return Err(VigiaError::Config("machine.id_shovel must not be empty".into()));
        }
        if self.cycle.min_consecutive_missing_cycles < 1 {
            return Err(VigiaError::Config(
                "cycle.min_consecutive_missing_cycles must be at least 1".into(),
            ));
        }
        let urls = [
            ("services.capture_url", &self.services.capture_url),
            ("services.local_detector_url", &self.services.local_detector_url),
            ("services.cloud_detector_url", &self.services.cloud_detector_url),
            ("services.local_storage_url", &self.services.local_storage_url),
            ("services.cloud_storage_url", &self.services.cloud_storage_url),
        ];
        for (name, url) in urls {
            if url.trim().is_empty() {
                return Err(VigiaError::Config(format!("{name} must not be empty")));
            }
        }
        if self.alarm.mode == AlarmMode::Remote && self.alarm.remote_url.is_none() {
            return Err(VigiaError::Config(
                "alarm.remote_url is required when alarm.mode = \"remote\"".into(),
            ));
        }
        if self.camera.enabled && self.camera.indices.is_empty() {
            return Err(VigiaError::Config("camera.indices must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const MINIMAL: &str = r#"
        [machine]
        id_shovel = "7"

        [services]
        capture_url = "http://127.0.0.1:5002/snapshot"
        local_detector_url = "http://127.0.0.1:5003/procesar"
        cloud_detector_url = "http://127.0.0.1:5004/procesar"
        local_storage_url = "http://127.0.0.1:5005/api/v1/reportes"
        cloud_storage_url = "http://127.0.0.1:5006/api/v1/incidentes"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = VigiaConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.machine.id_shovel, "7");
        assert_eq!(config.service_name, "servicio_solicitud_reporte");
        assert_eq!(config.bind_addr, "0.0.0.0:5008");
        assert_eq!(config.cycle.default_expected_teeth, 20);
        assert_eq!(config.cycle.min_consecutive_missing_cycles, 2);
        assert_eq!(config.retry.delay_ms, 2000);
        assert!(config.retry.max_attempts.is_none());
        assert_eq!(config.alarm.mode, AlarmMode::Serial);
        assert_eq!(config.alarm.baud_rate, 9600);
        assert!(config.alarm.devices.is_empty());
        assert!(!config.camera.enabled);
        assert_eq!(config.camera.indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn missing_services_section_is_fatal() {
        let toml_str = r#"
            [machine]
            id_shovel = "7"
        "#;
        let err = VigiaConfig::parse(toml_str).unwrap_err();
        assert!(matches!(err, VigiaError::Toml(_)));
    }

    #[test]
    fn empty_url_is_rejected() {
        let toml_str = MINIMAL.replace("http://127.0.0.1:5003/procesar", "");
        let err = VigiaConfig::parse(&toml_str).unwrap_err();
        assert!(err.to_string().contains("services.local_detector_url"));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let toml_str = format!("{MINIMAL}\n[cycle]\nmin_consecutive_missing_cycles = 0\n");
        let err = VigiaConfig::parse(&toml_str).unwrap_err();
        assert!(matches!(err, VigiaError::Config(_)));
    }

    #[test]
    fn remote_alarm_requires_url() {
        let toml_str = format!("{MINIMAL}\n[alarm]\nmode = \"remote\"\n");
        assert!(VigiaConfig::parse(&toml_str).is_err());

        let toml_str =
            format!("{MINIMAL}\n[alarm]\nmode = \"remote\"\nremote_url = \"http://x/api/v1/alerta\"\n");
        let config = VigiaConfig::parse(&toml_str).unwrap();
        assert_eq!(config.alarm.mode, AlarmMode::Remote);
    }

    #[test]
    fn custom_usb_table_and_retry() {
        let toml_str = format!(
            "{MINIMAL}\n[retry]\ndelay_ms = 0\nmax_attempts = 3\n\n[[alarm.devices]]\nvid = 0x2341\npid = 0x0043\nlabel = \"Uno\"\n"
        );
        let config = VigiaConfig::parse(&toml_str).unwrap();
        let policy = config.retry.policy();
        assert_eq!(policy.delay, Duration::ZERO);
        assert_eq!(policy.max_attempts, Some(3));
        assert_eq!(config.alarm.devices.len(), 1);
        assert_eq!(config.alarm.devices[0].vid, 0x2341);
    }

    #[test]
    fn load_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = VigiaConfig::load_from(&dir.path().join("vigia.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn load_from_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = VigiaConfig::load_from(file.path()).unwrap();
        assert_eq!(config.services.capture_url, "http://127.0.0.1:5002/snapshot");
    }
}
