//! HealthSync Client-Kern
//!
//! Signaling-Transport, Praesenz-Registrierung, Online-Abfrage, Medienzugriff
//! und der Anruf-Zustandsautomat fuer Patienten- und Arzt-Oberflaechen.
//!
//! ## Aufbau
//! - [`transport`]: TCP-Verbindung zum Signaling-Server mit Wiederaufbau
//! - [`registrar`]: haelt die eigene Identitaet beim Server angemeldet
//! - [`presence`]: fragt ab ob eine Gegenstelle online ist
//! - [`media`]: Kamera/Mikrofon mit Rueckfall auf reines Audio
//! - [`call`]: Zustandsautomat einer Anruf-Session (ohne IO)
//! - [`service`]: [`CallService`] verbindet alles und ist die oeffentliche API
//!
//! Der Service wird pro Oberflaeche explizit erzeugt und uebergeben; es gibt
//! keine globale Instanz.

pub mod call;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod peer;
pub mod presence;
pub mod registrar;
pub mod retry;
pub mod service;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use call::{CallDirection, CallSession, CallState};
pub use channel::{ConnectionStatus, SignalChannel, TransportEvent, TransportEventKind};
pub use config::ClientConfig;
pub use error::{CallError, ClientError};
pub use events::{CallCallbacks, CallEvent, CallEventKind, EndReason, ErrorContext};
pub use media::{MediaConstraints, MediaDevices, MediaError, MediaStream, TrackKind};
pub use peer::{PeerError, PeerLink};
pub use registrar::RegistrationRecord;
pub use service::CallService;
pub use transport::SignalingTransport;
