//! Signaling-Ereignisse
//!
//! Jede Nachricht ist ein benanntes Ereignis mit optionaler Nutzlast:
//!
//! ```text
//! {"event": "call-user", "data": {"targetUserId": "...", "callerUserId": "...", "offerSDP": "..."}}
//! {"event": "heartbeat"}
//! ```
//!
//! ## Design
//! - Ereignisnamen in kebab-case, Felder in camelCase
//! - SDP und ICE-Kandidaten sind fuer den Server opak und werden nur weitergereicht
//! - Registrierung und Call-Signaling teilen sich die Verbindung und werden
//!   nur ueber den Ereignisnamen unterschieden

use healthsync_core::{HealthsyncError, Identity};
use serde::{Deserialize, Serialize};

/// Meldung des Servers wenn das Ziel nicht registriert ist
pub const MELDUNG_NICHT_ONLINE: &str = "User is not online";
/// Meldung des Servers wenn zwischen beiden Parteien bereits ein Anruf besteht
pub const MELDUNG_BESETZT: &str = "Call already in progress";
/// Meldung an weitere Geraete des Angerufenen nach Annahme
pub const MELDUNG_ANDERES_GERAET: &str = "Call answered on another device";

// ---------------------------------------------------------------------------
// Registrierung & Praesenz
// ---------------------------------------------------------------------------

/// Bestaetigung einer Registrierung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredAck {
    pub user_id: Identity,
}

/// Anfrage ob eine Identitaet gerade registriert ist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceQuery {
    pub user_id: Identity,
    pub request_id: String,
}

/// Antwort auf eine [`PresenceQuery`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceStatus {
    pub user_id: Identity,
    pub is_online: bool,
    /// Echo der `requestId` der Anfrage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Call-Signaling
// ---------------------------------------------------------------------------

/// Anrufwunsch mit SDP-Offer (Client -> Server)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOffer {
    pub target_user_id: Identity,
    pub caller_user_id: Identity,
    #[serde(rename = "offerSDP")]
    pub offer_sdp: String,
}

/// Eingehender Anruf (Server -> Client)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub caller_user_id: Identity,
    #[serde(rename = "offerSDP")]
    pub offer_sdp: String,
}

/// Annahme mit SDP-Answer (Client -> Server)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAccept {
    pub target_user_id: Identity,
    #[serde(rename = "answerSDP")]
    pub answer_sdp: String,
}

/// SDP-Answer fuer den Anrufer (Server -> Client)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpAnswer {
    #[serde(rename = "answerSDP")]
    pub answer_sdp: String,
}

/// Verweis auf die Gegenstelle eines Anrufs
///
/// Vom Server weitergeleitete Ereignisse tragen kein Ziel mehr.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<Identity>,
}

impl PeerRef {
    pub fn an(ziel: Identity) -> Self {
        Self {
            target_user_id: Some(ziel),
        }
    }
}

/// Der Anruf wurde anderweitig angenommen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_user_id: Option<Identity>,
    pub message: String,
}

/// Anruf konnte nicht zugestellt werden
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFailed {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<Identity>,
}

/// Grund eines [`CallFailed`], abgeleitet aus der Meldung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallFailure {
    NichtOnline,
    Besetzt,
    Sonstiges,
}

impl CallFailed {
    pub fn nicht_online(ziel: Identity) -> Self {
        Self {
            message: MELDUNG_NICHT_ONLINE.to_string(),
            target_user_id: Some(ziel),
        }
    }

    pub fn besetzt(ziel: Identity) -> Self {
        Self {
            message: MELDUNG_BESETZT.to_string(),
            target_user_id: Some(ziel),
        }
    }

    pub fn grund(&self) -> CallFailure {
        match self.message.as_str() {
            MELDUNG_NICHT_ONLINE => CallFailure::NichtOnline,
            MELDUNG_BESETZT => CallFailure::Besetzt,
            _ => CallFailure::Sonstiges,
        }
    }
}

/// ICE-Kandidat, Inhalt ist fuer den Server opak
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<Identity>,
    pub candidate: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// Alle Ereignisse des Signaling-Protokolls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Signal {
    // --- Registrierung & Praesenz ---
    Register(Identity),
    Registered(RegisteredAck),
    CheckUserOnline(PresenceQuery),
    UserOnlineStatus(PresenceStatus),
    UserOnline(Identity),
    UserOffline(Identity),

    // --- Call-Signaling ---
    CallUser(CallOffer),
    IncomingCall(IncomingCall),
    CallAccepted(CallAccept),
    CallAnswered(SdpAnswer),
    CallDeclined(PeerRef),
    CallInProgress(InProgress),
    CallFailed(CallFailed),
    IceCandidate(IceCandidate),
    EndCall(PeerRef),
    DirectCallEnded(PeerRef),
    CallEnded,
    MediaConnected(PeerRef),

    // --- Keepalive ---
    Heartbeat,
    HeartbeatResponse,
}

/// Alle bekannten Ereignisnamen
pub const EREIGNISSE: &[&str] = &[
    "register",
    "registered",
    "check-user-online",
    "user-online-status",
    "user-online",
    "user-offline",
    "call-user",
    "incoming-call",
    "call-accepted",
    "call-answered",
    "call-declined",
    "call-in-progress",
    "call-failed",
    "ice-candidate",
    "end-call",
    "direct-call-ended",
    "call-ended",
    "media-connected",
    "heartbeat",
    "heartbeat-response",
];

impl Signal {
    /// Gibt den Ereignisnamen auf dem Draht zurueck
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::Registered(_) => "registered",
            Self::CheckUserOnline(_) => "check-user-online",
            Self::UserOnlineStatus(_) => "user-online-status",
            Self::UserOnline(_) => "user-online",
            Self::UserOffline(_) => "user-offline",
            Self::CallUser(_) => "call-user",
            Self::IncomingCall(_) => "incoming-call",
            Self::CallAccepted(_) => "call-accepted",
            Self::CallAnswered(_) => "call-answered",
            Self::CallDeclined(_) => "call-declined",
            Self::CallInProgress(_) => "call-in-progress",
            Self::CallFailed(_) => "call-failed",
            Self::IceCandidate(_) => "ice-candidate",
            Self::EndCall(_) => "end-call",
            Self::DirectCallEnded(_) => "direct-call-ended",
            Self::CallEnded => "call-ended",
            Self::MediaConnected(_) => "media-connected",
            Self::Heartbeat => "heartbeat",
            Self::HeartbeatResponse => "heartbeat-response",
        }
    }

    /// Baut ein Signal aus Ereignisname und roher JSON-Nutzlast
    ///
    /// `serde_json::Value::Null` steht fuer "keine Nutzlast".
    pub fn from_parts(event: &str, data: serde_json::Value) -> Result<Self, HealthsyncError> {
        if !EREIGNISSE.contains(&event) {
            return Err(HealthsyncError::UnbekanntesEreignis(event.to_string()));
        }

        let mut objekt = serde_json::Map::new();
        objekt.insert("event".into(), serde_json::Value::String(event.to_string()));
        if !data.is_null() {
            objekt.insert("data".into(), data);
        }

        serde_json::from_value(serde_json::Value::Object(objekt))
            .map_err(|e| HealthsyncError::UngueltigeNachricht(format!("{event}: {e}")))
    }

    /// Gibt true zurueck fuer Registrierungs- und Praesenz-Ereignisse
    pub fn ist_praesenz(&self) -> bool {
        matches!(
            self,
            Self::Register(_)
                | Self::Registered(_)
                | Self::CheckUserOnline(_)
                | Self::UserOnlineStatus(_)
                | Self::UserOnline(_)
                | Self::UserOffline(_)
        )
    }

    pub fn register(identity: Identity) -> Self {
        Self::Register(identity)
    }

    pub fn check_user_online(user_id: Identity, request_id: impl Into<String>) -> Self {
        Self::CheckUserOnline(PresenceQuery {
            user_id,
            request_id: request_id.into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
