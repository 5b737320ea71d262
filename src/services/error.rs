//! Tipos de error para las llamadas a servicios colaboradores.
//!
//! Define [`ServiceError`] con variantes para respuestas no exitosas, fallas
//! de red y cuerpos de respuesta inutilizables. Todas son transitorias desde
//! el punto de vista del orquestador: se reintentan con espera fija.

use thiserror::Error;

/// Errores al interactuar con captura, detección, almacenamiento o alerta.
///
/// - [`ApiError`](ServiceError::ApiError): el servicio respondió fuera de 2xx
/// - [`NetworkError`](ServiceError::NetworkError): falla de transporte (DNS, conexión, timeout)
/// - [`InvalidPayload`](ServiceError::InvalidPayload): 2xx con un cuerpo que no cumple el contrato
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Respuesta HTTP no exitosa, con el código y el cuerpo recibido.
    #[error("service error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Falla de red subyacente, encapsula el error original de `reqwest`.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display() {
        let err = ServiceError::ApiError {
            status: 503,
            message: "model warming up".into(),
        };
        assert_eq!(err.to_string(), "service error (status 503): model warming up");
    }

    #[test]
    fn invalid_payload_display() {
        let err = ServiceError::InvalidPayload("empty image".into());
        assert_eq!(err.to_string(), "invalid payload: empty image");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ServiceError>();
    }
}
