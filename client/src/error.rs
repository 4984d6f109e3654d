//! Fehlertypen des Client-Kerns

use healthsync_core::{HealthsyncError, Identity};
use thiserror::Error;

use crate::media::MediaError;

/// Fehler beim Aufbau und Betrieb des Clients
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Konfigurationsfehler: {0}")]
    Config(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Nicht mit dem Signaling-Server verbunden")]
    NotConnected,

    #[error(transparent)]
    Protocol(#[from] HealthsyncError),
}

/// Ablehnungsgruende der Anruf-Operationen
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    #[error("Es laeuft bereits ein Anruf")]
    AlreadyActive,

    #[error("Kein eingehender Anruf vorhanden")]
    NoIncomingCall,

    #[error("{0} ist nicht online")]
    PeerNotOnline(Identity),

    #[error("Kamera/Mikrofon nicht verfuegbar: {0}")]
    Media(#[from] MediaError),

    #[error("Peer-Verbindung fehlgeschlagen: {0}")]
    Peer(String),

    #[error("Der Anruf wurde zwischenzeitlich beendet")]
    Superseded,

    #[error("Call-Service wurde beendet")]
    Closed,
}

impl CallError {
    /// Medienfehler werden dem Nutzer gesondert angezeigt
    pub fn is_media(&self) -> bool {
        matches!(self, Self::Media(_))
    }
}
