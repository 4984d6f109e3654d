//! Zustaende einer Anruf-Session

use chrono::{DateTime, Utc};
use healthsync_core::Identity;
use serde::Serialize;

/// Zustand des Anruf-Automaten
///
/// `Declined`, `NotFound`, `Busy` und `Error` sind Durchgangszustaende: der
/// Automat meldet sie als Uebergang und kehrt unmittelbar nach `Idle` zurueck.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    #[default]
    Idle,
    OutgoingRinging,
    IncomingRinging,
    Active,
    Declined,
    NotFound,
    Busy,
    Error,
}

impl CallState {
    /// true fuer alle Zustaende ausser `Idle`, `Declined`, `NotFound` und `Busy`
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            Self::Idle | Self::Declined | Self::NotFound | Self::Busy
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::OutgoingRinging => "outgoing_ringing",
            Self::IncomingRinging => "incoming_ringing",
            Self::Active => "active",
            Self::Declined => "declined",
            Self::NotFound => "not_found",
            Self::Busy => "busy",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Die aktuelle Anruf-Session (hoechstens eine pro Client)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSession {
    pub peer_id: Identity,
    pub direction: CallDirection,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
}

impl CallSession {
    pub(crate) fn new(peer_id: Identity, direction: CallDirection, state: CallState) -> Self {
        Self {
            peer_id,
            direction,
            state,
            started_at: Utc::now(),
        }
    }
}
