//! Fehlertypen fuer den Signaling-Server

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalingError {
    /// Socket- oder Listener-Fehler
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Nachricht ohne Pflichtfeld oder mit leerer Identitaet
    #[error("Protokollfehler: {0}")]
    Protokoll(String),
}

impl SignalingError {
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }
}

/// Result-Typ fuer den Signaling-Server
pub type SignalingResult<T> = Result<T, SignalingError>;
