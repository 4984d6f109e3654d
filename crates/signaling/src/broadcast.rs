//! Event-Broadcaster – Sendet Signale an verbundene Clients
//!
//! Der EventBroadcaster verwaltet die Send-Queues aller Verbindungen.
//! Adressiert wird immer eine Verbindung, nicht eine Identitaet: eine
//! Identitaet kann auf mehreren Geraeten gleichzeitig angemeldet sein.
//!
//! ## Selektives Broadcasting
//! - An eine Verbindung: `an_verbindung_senden`
//! - An mehrere Verbindungen: `an_verbindungen_senden`
//! - An alle ausser einer: `an_alle_ausser_senden`

use dashmap::DashMap;
use healthsync_protocol::Signal;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Groesse der Send-Queue pro Verbindung
const SEND_QUEUE_GROESSE: usize = 64;

/// Serverseitige Kennung einer TCP-Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Handle auf die Send-Queue einer Verbindung
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub conn_id: ConnectionId,
    pub tx: mpsc::Sender<Signal>,
}

impl ClientSender {
    /// Sendet ein Signal nicht-blockierend an die Verbindung
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, signal: Signal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(s)) => {
                tracing::warn!(
                    conn = %self.conn_id,
                    event = s.event_name(),
                    "Send-Queue voll – Signal verworfen"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(conn = %self.conn_id, "Send-Queue geschlossen (Client getrennt)");
                false
            }
        }
    }
}

/// Zentraler Broadcaster fuer alle Verbindungen
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    inner: Arc<DashMap<ConnectionId, ClientSender>>,
}

impl EventBroadcaster {
    /// Erstellt einen neuen EventBroadcaster
    pub fn neu() -> Self {
        Self::default()
    }

    /// Registriert eine Verbindung und gibt ihre Empfangs-Queue zurueck
    ///
    /// Die `ClientConnection` liest aus dieser Queue und schreibt via TCP.
    pub fn client_registrieren(&self, conn_id: ConnectionId) -> mpsc::Receiver<Signal> {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_GROESSE);
        self.inner.insert(conn_id, ClientSender { conn_id, tx });
        tracing::debug!(conn = %conn_id, "Verbindung im Broadcaster registriert");
        rx
    }

    /// Entfernt eine Verbindung aus dem Broadcaster
    pub fn client_entfernen(&self, conn_id: ConnectionId) {
        self.inner.remove(&conn_id);
        tracing::debug!(conn = %conn_id, "Verbindung aus Broadcaster entfernt");
    }

    pub fn ist_registriert(&self, conn_id: ConnectionId) -> bool {
        self.inner.contains_key(&conn_id)
    }

    /// Anzahl registrierter Verbindungen
    pub fn anzahl(&self) -> usize {
        self.inner.len()
    }

    /// Sendet ein Signal an genau eine Verbindung
    pub fn an_verbindung_senden(&self, conn_id: ConnectionId, signal: Signal) -> bool {
        // Sender klonen damit kein DashMap-Guard ueber try_send gehalten wird
        let sender = self.inner.get(&conn_id).map(|s| s.value().clone());
        match sender {
            Some(s) => s.senden(signal),
            None => {
                tracing::debug!(conn = %conn_id, "Ziel-Verbindung unbekannt");
                false
            }
        }
    }

    /// Sendet ein Signal an mehrere Verbindungen, gibt die Anzahl Zustellungen zurueck
    pub fn an_verbindungen_senden(&self, ziele: &[ConnectionId], signal: &Signal) -> usize {
        ziele
            .iter()
            .filter(|c| self.an_verbindung_senden(**c, signal.clone()))
            .count()
    }

    /// Sendet ein Signal an alle Verbindungen ausser einer
    pub fn an_alle_ausser_senden(&self, ausser: ConnectionId, signal: &Signal) -> usize {
        let sender: Vec<ClientSender> = self
            .inner
            .iter()
            .filter(|e| *e.key() != ausser)
            .map(|e| e.value().clone())
            .collect();
        sender.iter().filter(|s| s.senden(signal.clone())).count()
    }
}
