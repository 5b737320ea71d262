use thiserror::Error;

/// Fatal at startup: the configuration file cannot be used.
#[derive(Debug, Error)]
pub enum VigiaError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failures while opening or talking to a camera or serial candidate.
///
/// None of these are fatal: the reconnector turns every one of them into
/// "rotate and retry" and keeps the message as `last_error`.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no candidate devices available")]
    NoCandidates,

    #[error("failed to open {candidate}: {message}")]
    Open { candidate: String, message: String },

    #[error("device not connected")]
    NotConnected,

    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// An administrative command that is not valid in the current run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("service already running")]
    AlreadyRunning,

    #[error("service is not running")]
    NotRunning,

    #[error("service already stopped")]
    AlreadyStopped,
}
