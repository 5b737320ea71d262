//! Salida de terminal de VIGIA: spinners y texto con color.
//!
//! Usa `indicatif` para el spinner mientras se espera a la API
//! administrativa y `console` para resaltar el estado del ciclo.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::{AlarmMode, VigiaConfig};
use crate::device::UsbId;
use crate::device::serial::PortCandidate;
use crate::orchestrator::{RunState, StatusSnapshot};

/// Spinner mostrado mientras una solicitud a la API está en curso.
pub struct RequestProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl RequestProgress {
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    pub fn success(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.green.apply_to("✓"));
    }

    pub fn failure(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.red.apply_to("✗"));
    }
}

fn state_style(state: RunState) -> Style {
    match state {
        RunState::Running => Style::new().green().bold(),
        RunState::Paused => Style::new().yellow().bold(),
        RunState::Stopped => Style::new().dim(),
    }
}

fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

/// Resumen legible de `GET /api/v1/status`.
pub fn render_status(status: &StatusSnapshot) -> String {
    let mut lines = vec![
        format!(
            "{} {}",
            status.service,
            state_style(status.state).apply_to(status.state)
        ),
        format!(
            "  run:          {}",
            status.run_id.map(|id| id.to_string()).as_deref().unwrap_or("-")
        ),
        format!("  desde:        {}", or_dash(status.uptime_start.as_deref())),
        format!("  ciclo:        {}", status.ciclo_actual),
        format!("  reportes:     {}", status.reportes_enviados),
        format!("  último ok:    {}", or_dash(status.last_success.as_deref())),
        format!("  último error: {}", or_dash(status.last_error.as_deref())),
    ];
    if let Some(info) = &status.last_cycle_info {
        let style = if info.is_incident {
            Style::new().red().bold()
        } else {
            Style::new().green()
        };
        lines.push(format!(
            "  último ciclo: esperado {} | local {} | nube {} | racha {}/{} | {}",
            info.expected,
            info.local_count,
            info.cloud_count,
            info.consecutive_failures,
            info.threshold,
            style.apply_to(&info.description)
        ));
    }
    lines.join("\n")
}

/// Lista de puertos seriales, marcando los que coinciden con la tabla USB.
pub fn render_ports(ports: &[PortCandidate], table: &[UsbId]) -> String {
    if ports.is_empty() {
        return "no serial ports found".to_string();
    }
    let marked = Style::new().green().bold();
    ports
        .iter()
        .map(|port| {
            let known = table.iter().find(|id| id.matches(port.vid, port.pid));
            let usb = port.usb_id().unwrap_or_else(|| "-".to_string());
            match known {
                Some(id) => format!(
                    "{} {} [{usb}] {}",
                    marked.apply_to("*"),
                    port.port_name,
                    id.label
                ),
                None => format!(
                    "  {} [{usb}] {}",
                    port.port_name,
                    port.product.as_deref().unwrap_or("")
                ),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Resumen de la configuración validada.
pub fn render_config(config: &VigiaConfig) -> String {
    let alarm = match config.alarm.mode {
        AlarmMode::Serial => format!("serial @ {} baud", config.alarm.baud_rate),
        AlarmMode::Remote => format!(
            "remote {}",
            config.alarm.remote_url.as_deref().unwrap_or("-")
        ),
        AlarmMode::Disabled => "disabled".to_string(),
    };
    let camera = if config.camera.enabled {
        format!("{:?} ({}N)", config.camera.indices, config.camera.device_prefix)
    } else {
        "disabled".to_string()
    };
    let retries = match config.retry.max_attempts {
        Some(max) => format!("{} ms, max {max}", config.retry.delay_ms),
        None => format!("{} ms, forever", config.retry.delay_ms),
    };
    [
        format!("service:   {} on {}", config.service_name, config.bind_addr),
        format!("machine:   {}", config.machine.id_shovel),
        format!(
            "cycle:     expected {} teeth, incident after {} cycles, sleep {}s",
            config.cycle.default_expected_teeth,
            config.cycle.min_consecutive_missing_cycles,
            config.cycle.cycle_sleep_seconds
        ),
        format!("retry:     {retries}"),
        format!("capture:   {}", config.services.capture_url),
        format!(
            "detectors: {} | {}",
            config.services.local_detector_url, config.services.cloud_detector_url
        ),
        format!(
            "storage:   {} | {}",
            config.services.local_storage_url, config.services.cloud_storage_url
        ),
        format!("alarm:     {alarm}"),
        format!("camera:    {camera}"),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::MINIMAL;
    use crate::decision::evaluate;

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            service: "servicio_solicitud_reporte".into(),
            running: false,
            paused: true,
            state: RunState::Paused,
            run_id: None,
            uptime_start: Some("2025-01-10 08:00:00".into()),
            last_success: None,
            last_error: Some("Incidente detectado → pausa automática".into()),
            last_cycle_info: Some(evaluate(20, 19, 17, 1, 2)),
            ciclo_actual: 2,
            reportes_enviados: 2,
            last_report_id: Some("7-20250110T080010Z".into()),
        }
    }

    #[test]
    fn status_shows_state_and_last_cycle() {
        let text = render_status(&snapshot());
        assert!(text.contains("PAUSED"));
        assert!(text.contains("ciclo:        2"));
        assert!(text.contains("racha 2/2"));
        assert!(text.contains("Posible incidente"));
        assert!(text.contains("pausa automática"));
    }

    #[test]
    fn ports_marks_allow_listed_devices() {
        let ports = vec![
            PortCandidate {
                port_name: "/dev/ttyACM0".into(),
                vid: Some(0x2341),
                pid: Some(0x0043),
                product: Some("Arduino Uno".into()),
            },
            PortCandidate {
                port_name: "/dev/ttyS0".into(),
                vid: None,
                pid: None,
                product: None,
            },
        ];
        let text = render_ports(&ports, &UsbId::builtin_table());
        let lines: Vec<_> = text.lines().collect();
        assert!(lines[0].contains("/dev/ttyACM0"));
        assert!(lines[0].contains("2341:0043"));
        assert!(lines[0].contains('*'));
        assert!(!lines[1].contains('*'));
        assert_eq!(render_ports(&[], &[]), "no serial ports found");
    }

    #[test]
    fn config_summary() {
        let config = VigiaConfig::parse(MINIMAL).unwrap();
        let text = render_config(&config);
        assert!(text.contains("machine:   7"));
        assert!(text.contains("incident after 2 cycles"));
        assert!(text.contains("2000 ms, forever"));
        assert!(text.contains("serial @ 9600 baud"));
        assert!(text.contains("camera:    disabled"));
    }
}
