//! Schnittstelle zwischen Anruf-Logik und Signaling-Transport
//!
//! [`SignalChannel`] abstrahiert die Verbindung zum Signaling-Server. Der
//! produktive [`SignalingTransport`](crate::transport::SignalingTransport)
//! implementiert sie ueber TCP, Tests verwenden einen In-Memory-Fake.

use healthsync_core::{Ereignis, EventEmitter};
use healthsync_protocol::Signal;
use tokio::sync::{broadcast, watch};

/// Verbindungszustand mit Epoche
///
/// Die Epoche wird bei jedem erfolgreichen (Wieder-)Verbindungsaufbau erhoeht.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub epoch: u64,
}

/// Ereignisse des Transports
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected { epoch: u64 },
    Disconnected { reason: String },
    /// Nicht-fatale Fehler werden automatisch wiederholt
    Error { message: String, fatal: bool },
    Signal(Signal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEventKind {
    Connected,
    Disconnected,
    Error,
    Signal,
}

impl Ereignis for TransportEvent {
    type Art = TransportEventKind;

    fn art(&self) -> TransportEventKind {
        match self {
            Self::Connected { .. } => TransportEventKind::Connected,
            Self::Disconnected { .. } => TransportEventKind::Disconnected,
            Self::Error { .. } => TransportEventKind::Error,
            Self::Signal(_) => TransportEventKind::Signal,
        }
    }
}

/// Verbindung zum Signaling-Server
pub trait SignalChannel: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    /// Sendet ein Signal
    ///
    /// Ohne Verbindung wird das Signal verworfen, ein
    /// [`TransportEvent::Error`] ausgeloest und `false` zurueckgegeben.
    fn send(&self, signal: Signal) -> bool;

    /// Sendet ein Ereignis aus Name und roher JSON-Nutzlast
    fn send_raw(&self, event: &str, data: serde_json::Value) -> bool {
        match Signal::from_parts(event, data) {
            Ok(signal) => self.send(signal),
            Err(e) => {
                tracing::warn!(event = %event, fehler = %e, "Ungueltiges Ereignis nicht gesendet");
                self.events().emit(&TransportEvent::Error {
                    message: e.to_string(),
                    fatal: false,
                });
                false
            }
        }
    }

    /// Abonniert alle eingehenden Signale (ohne Keepalive)
    fn signals(&self) -> broadcast::Receiver<Signal>;

    /// Beobachtet den Verbindungszustand
    fn connection(&self) -> watch::Receiver<ConnectionStatus>;

    /// Emitter fuer Transport-Ereignisse
    fn events(&self) -> EventEmitter<TransportEvent>;

    /// Beendet die Verbindung endgueltig
    fn close(&self);
}
