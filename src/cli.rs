//! Interfaz de línea de comandos de VIGIA basada en clap.
//!
//! Define la struct [`Cli`] con subcomandos [`Command`] (serve, control del
//! ciclo, ports, check-config) y flags globales (--config, --verbose).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5008";

/// VIGIA: monitor de pérdida de dientes del balde de la pala.
#[derive(Debug, Parser)]
#[command(name = "vigia", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Archivo de configuración TOML.
    #[arg(long, short, global = true, env = "VIGIA_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Habilita logs de depuración (RUST_LOG tiene precedencia).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Dirección de una instancia en ejecución.
#[derive(Debug, Clone, Args)]
pub struct Remote {
    /// URL base de la API administrativa.
    #[arg(long, default_value = DEFAULT_API_URL)]
    pub url: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Levanta la API administrativa y los workers de dispositivos.
    Serve {
        /// Inicia el ciclo de monitoreo al arrancar.
        #[arg(long, default_value_t = false)]
        autostart: bool,
    },

    /// Muestra el estado de una instancia en ejecución.
    Status(Remote),

    /// Inicia el ciclo de monitoreo.
    Start(Remote),

    /// Pausa el ciclo de monitoreo.
    Pause(Remote),

    /// Reanuda el ciclo tras un incidente o una pausa manual.
    Resume(Remote),

    /// Detiene el ciclo de monitoreo.
    Stop(Remote),

    /// Lista los puertos seriales y marca los reconocidos como sirena.
    Ports,

    /// Valida el archivo de configuración y muestra un resumen.
    CheckConfig,
}

impl Command {
    /// Ruta administrativa para los comandos de control del ciclo.
    pub fn control_path(&self) -> Option<&'static str> {
        match self {
            Command::Start(_) => Some("/start"),
            Command::Pause(_) => Some("/pause"),
            Command::Resume(_) => Some("/resume"),
            Command::Stop(_) => Some("/stop"),
            _ => None,
        }
    }
}
