//! Client-Connection – Verwaltet eine einzelne TCP-Verbindung
//!
//! Jede TCP-Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task. Sie liest Frames, dispatcht sie und schreibt Antworten sowie
//! Signale aus der Broadcaster-Queue zurueck.
//!
//! ## Keepalive
//! - Server sendet alle `keepalive_sek` ein `heartbeat`
//! - Jeder empfangene Frame zaehlt als Lebenszeichen
//! - Nach `verbindungs_timeout_sek` ohne Frame wird die Verbindung getrennt

use futures_util::{SinkExt, StreamExt};
use healthsync_protocol::{FrameCodec, Signal};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::codec::Framed;

use crate::broadcast::ConnectionId;
use crate::dispatcher::{DispatcherContext, MessageDispatcher};
use crate::server_state::SignalingState;

/// Grund fuer das Ende einer Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrennGrund {
    /// Client hat die Verbindung geschlossen
    Geschlossen,
    /// Keine Frames innerhalb des Timeouts
    Timeout,
    /// Lese- oder Schreibfehler
    Fehler,
    /// Server faehrt herunter
    Shutdown,
}

/// Verarbeitet eine einzelne TCP-Verbindung
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: SocketAddr,
    conn_id: ConnectionId,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection mit frischer Verbindungs-ID
    pub fn neu(state: Arc<SignalingState>, peer_addr: SocketAddr) -> Self {
        let conn_id = state.naechste_verbindung();
        Self {
            state,
            peer_addr,
            conn_id,
        }
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung getrennt wird oder ein Shutdown-Signal
    /// eingeht. Raeumt danach Registry und Anrufe auf.
    pub async fn verarbeiten(
        self,
        stream: TcpStream,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> TrennGrund {
        let peer_addr = self.peer_addr;
        let conn_id = self.conn_id;
        let keepalive_intervall = Duration::from_secs(self.state.config.keepalive_sek);
        let timeout_dauer = Duration::from_secs(self.state.config.verbindungs_timeout_sek);

        tracing::info!(peer = %peer_addr, conn = %conn_id, "Neue Verbindung");

        let mut framed = Framed::new(stream, FrameCodec::new());
        let mut sende_rx = self.state.broadcaster.client_registrieren(conn_id);

        let ctx = DispatcherContext { peer_addr, conn_id };
        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));

        let mut letzter_empfang = Instant::now();
        let mut naechster_ping = Instant::now() + keepalive_intervall;

        let grund = loop {
            let jetzt = Instant::now();

            if jetzt.duration_since(letzter_empfang) > timeout_dauer {
                tracing::warn!(peer = %peer_addr, conn = %conn_id, "Verbindungs-Timeout");
                break TrennGrund::Timeout;
            }

            let ping_verzoegerung = naechster_ping.saturating_duration_since(jetzt);

            tokio::select! {
                // Eingehendes Signal vom Client
                frame = framed.next() => {
                    match frame {
                        Some(Ok(signal)) => {
                            letzter_empfang = Instant::now();
                            tracing::trace!(conn = %conn_id, event = signal.event_name(), "Signal empfangen");

                            if let Some(antwort) = dispatcher.dispatch(signal, &ctx) {
                                if let Err(e) = framed.send(antwort).await {
                                    tracing::warn!(conn = %conn_id, fehler = %e, "Senden fehlgeschlagen");
                                    break TrennGrund::Fehler;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(conn = %conn_id, fehler = %e, "Frame-Lesefehler");
                            break TrennGrund::Fehler;
                        }
                        None => {
                            tracing::info!(peer = %peer_addr, conn = %conn_id, "Verbindung vom Client getrennt");
                            break TrennGrund::Geschlossen;
                        }
                    }
                }

                // Ausgehendes Signal aus dem Broadcaster
                Some(ausgehend) = sende_rx.recv() => {
                    if let Err(e) = framed.send(ausgehend).await {
                        tracing::warn!(conn = %conn_id, fehler = %e, "Broadcast-Senden fehlgeschlagen");
                        break TrennGrund::Fehler;
                    }
                }

                // Keepalive
                _ = tokio::time::sleep(ping_verzoegerung) => {
                    if Instant::now() >= naechster_ping {
                        if let Err(e) = framed.send(Signal::Heartbeat).await {
                            tracing::warn!(conn = %conn_id, fehler = %e, "Heartbeat-Senden fehlgeschlagen");
                            break TrennGrund::Fehler;
                        }
                        naechster_ping = Instant::now() + keepalive_intervall;
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(conn = %conn_id, "Shutdown-Signal – Verbindung wird getrennt");
                        break TrennGrund::Shutdown;
                    }
                }
            }
        };

        dispatcher.client_cleanup(conn_id);
        tracing::info!(peer = %peer_addr, conn = %conn_id, ?grund, "Verbindungs-Task beendet");
        grund
    }
}
