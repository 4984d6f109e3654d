//! Fehlertypen fuer HealthSync
//!
//! Gemeinsame Fehler beim Lesen von Wire-Nachrichten. Client und Server
//! definieren eigene Fehler und konvertieren via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer HealthSync
pub type Result<T> = std::result::Result<T, HealthsyncError>;

#[derive(Debug, Error)]
pub enum HealthsyncError {
    /// Nutzlast passt nicht zum Ereignis
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    /// Ereignisname ist im Protokoll nicht bekannt
    #[error("Unbekanntes Ereignis: {0}")]
    UnbekanntesEreignis(String),
}

impl HealthsyncError {
    /// Gibt true zurueck wenn der Gegenueber ein neueres Protokoll sprechen koennte
    pub fn ist_unbekannt(&self) -> bool {
        matches!(self, Self::UnbekanntesEreignis(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = HealthsyncError::UnbekanntesEreignis("foo-bar".into());
        assert_eq!(e.to_string(), "Unbekanntes Ereignis: foo-bar");
        assert!(e.ist_unbekannt());
        assert!(!HealthsyncError::UngueltigeNachricht("x".into()).ist_unbekannt());
    }
}
