//! healthsync-signaling – TCP-Signaling-Server
//!
//! Dieser Crate implementiert den Rendezvous-Dienst ueber den Patienten und
//! Aerzte ihre Praesenz melden und Anrufe aufbauen. Medien fliessen nie ueber
//! den Server, er vermittelt nur SDP, ICE-Kandidaten und Statusmeldungen.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task, Keepalive)
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     +-- RegisterHandler  (register)
//!     +-- PresenceHandler  (check-user-online)
//!     +-- CallHandler      (call-user, call-accepted, call-declined,
//!                           ice-candidate, end-call, media-connected)
//!
//! PresenceRegistry – Welche Identitaet ueber welche Verbindungen erreichbar ist
//! CallRegistry     – Laufende Anrufe
//! EventBroadcaster – Signale an Verbindungen senden
//! ```

pub mod broadcast;
pub mod calls;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod server_state;
pub mod tcp;

// Bequeme Re-Exporte
pub use broadcast::{ConnectionId, EventBroadcaster};
pub use calls::{ActiveCall, CallRegistry};
pub use connection::ClientConnection;
pub use dispatcher::MessageDispatcher;
pub use error::{SignalingError, SignalingResult};
pub use registry::{PresenceEvent, PresenceRegistry};
pub use server_state::{SignalingConfig, SignalingState};
pub use tcp::SignalingServer;
