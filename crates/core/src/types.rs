//! Identitaeten fuer HealthSync
//!
//! Ein Client meldet sich unter genau einem Token beim Signaling-Server an:
//! `user-<zufall>` fuer Patienten-Instanzen, `doctor-<id>` fuer Aerzte.
//! Der Newtype verhindert Verwechslungen mit beliebigen Strings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Praefix fuer Patienten-Instanzen
pub const PATIENT_PRAEFIX: &str = "user-";
/// Praefix fuer Arzt-Instanzen
pub const DOCTOR_PRAEFIX: &str = "doctor-";

/// Laenge des zufaelligen Anteils einer Patienten-Identitaet
const ZUFALL_LAENGE: usize = 9;

/// Art einer Identitaet, abgeleitet aus dem Praefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    Patient,
    Doctor,
    /// Token ohne bekanntes Praefix (wird vom Server trotzdem akzeptiert)
    Unbekannt,
}

/// Token unter dem sich ein Client beim Signaling-Server registriert
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Uebernimmt ein bestehendes Token unveraendert
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Erstellt eine neue zufaellige Patienten-Identitaet (`user-xxxxxxxxx`)
    pub fn patient_zufaellig() -> Self {
        let zufall = Uuid::new_v4().simple().to_string();
        Self(format!("{PATIENT_PRAEFIX}{}", &zufall[..ZUFALL_LAENGE]))
    }

    /// Erstellt die Identitaet eines Arztes aus dessen ID
    pub fn doctor(doctor_id: impl std::fmt::Display) -> Self {
        Self(format!("{DOCTOR_PRAEFIX}{doctor_id}"))
    }

    pub fn kind(&self) -> IdentityKind {
        if self.0.starts_with(DOCTOR_PRAEFIX) {
            IdentityKind::Doctor
        } else if self.0.starts_with(PATIENT_PRAEFIX) {
            IdentityKind::Patient
        } else {
            IdentityKind::Unbekannt
        }
    }

    pub fn ist_doctor(&self) -> bool {
        self.kind() == IdentityKind::Doctor
    }

    /// Gibt das rohe Token zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Leere Tokens werden vom Server verworfen
    pub fn ist_leer(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
