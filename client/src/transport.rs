//! Signaling-Transport ueber TCP
//!
//! Haelt genau eine Verbindung zum Signaling-Server und baut sie bei Verlust
//! automatisch wieder auf (Backoff ab 1s, verdoppelt bis maximal 5s). Jeder
//! erfolgreiche Aufbau erhoeht die Epoche in [`ConnectionStatus`], damit
//! abhaengige Komponenten erneut registrieren koennen.
//!
//! Nutzt den [`FrameCodec`] aus healthsync-protocol fuer das Wire-Format
//! (u32 BE length + JSON payload). Heartbeats des Servers werden direkt hier
//! beantwortet und nicht an Verbraucher weitergereicht.

use futures_util::{SinkExt, StreamExt};
use healthsync_core::{EventEmitter, Identity, Subscription};
use healthsync_protocol::{FrameCodec, Signal};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::channel::{ConnectionStatus, SignalChannel, TransportEvent, TransportEventKind};
use crate::config::SignalingSettings;

/// Puffer fuer eingehende Signale pro Abonnent
const SIGNAL_KANAL_GROESSE: usize = 256;

/// Verbindung zum Signaling-Server mit automatischem Wiederaufbau
///
/// Clone teilt die Verbindung.
#[derive(Clone)]
pub struct SignalingTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    settings: SignalingSettings,
    laufzeit: Mutex<Laufzeit>,
    status_tx: watch::Sender<ConnectionStatus>,
    signal_tx: broadcast::Sender<Signal>,
    events: EventEmitter<TransportEvent>,
}

#[derive(Default)]
struct Laufzeit {
    /// Warteschlange zur aktiven Verbindung
    out_tx: Option<mpsc::UnboundedSender<Signal>>,
    cancel: Option<CancellationToken>,
    identity: Option<Identity>,
    beendet: bool,
}

/// Warum eine einzelne Verbindung endete
enum Verbindungsende {
    Abgebrochen,
    Getrennt(String),
}

impl SignalingTransport {
    pub fn new(settings: SignalingSettings) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        let (signal_tx, _) = broadcast::channel(SIGNAL_KANAL_GROESSE);
        Self {
            inner: Arc::new(TransportInner {
                settings,
                laufzeit: Mutex::new(Laufzeit::default()),
                status_tx,
                signal_tx,
                events: EventEmitter::neu(),
            }),
        }
    }

    /// Startet die Verbindung im Hintergrund
    ///
    /// Idempotent: ein zweiter Aufruf startet keine weitere Verbindung und
    /// gibt `false` zurueck. Muss innerhalb einer Tokio-Runtime aufgerufen
    /// werden.
    pub fn initialize(&self, identity: &Identity) -> bool {
        let mut laufzeit = self.inner.laufzeit.lock();
        if laufzeit.beendet {
            tracing::warn!("Transport wurde bereits beendet, initialize ignoriert");
            return false;
        }
        if laufzeit.cancel.is_some() {
            tracing::debug!(identity = %identity, "Transport laeuft bereits");
            return false;
        }

        let cancel = CancellationToken::new();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        laufzeit.out_tx = Some(out_tx);
        laufzeit.cancel = Some(cancel.clone());
        laufzeit.identity = Some(identity.clone());
        drop(laufzeit);

        tracing::info!(
            identity = %identity,
            server = %self.inner.settings.addr(),
            "Signaling-Transport gestartet"
        );
        tokio::spawn(supervisor(Arc::clone(&self.inner), cancel, out_rx));
        true
    }

    /// Identitaet mit der der Transport gestartet wurde
    pub fn identity(&self) -> Option<Identity> {
        self.inner.laufzeit.lock().identity.clone()
    }

    /// Registriert einen Handler fuer Transport-Ereignisse
    pub fn on<F>(&self, kind: TransportEventKind, handler: F) -> Subscription
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    /// Beendet die Verbindung und alle Wiederholungen
    ///
    /// Danach werden keine Ereignisse mehr zugestellt.
    pub fn disconnect(&self) {
        let cancel = {
            let mut laufzeit = self.inner.laufzeit.lock();
            laufzeit.beendet = true;
            laufzeit.out_tx = None;
            laufzeit.cancel.take()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        self.inner.events.schliessen();
        self.inner.status_tx.send_modify(|s| s.connected = false);
        tracing::info!("Signaling-Transport beendet");
    }

    fn fehler_melden(&self, message: String) {
        self.inner.events.emit(&TransportEvent::Error {
            message,
            fatal: false,
        });
    }
}

impl SignalChannel for SignalingTransport {
    fn is_connected(&self) -> bool {
        self.inner.status_tx.borrow().connected
    }

    fn send(&self, signal: Signal) -> bool {
        let out_tx = self.inner.laufzeit.lock().out_tx.clone();
        match out_tx {
            Some(tx) if self.is_connected() => {
                tracing::trace!(event = signal.event_name(), "Sende Signal");
                if tx.send(signal).is_ok() {
                    return true;
                }
                self.fehler_melden("Verbindung wurde geschlossen".to_string());
                false
            }
            _ => {
                tracing::warn!(event = signal.event_name(), "Nicht verbunden, Signal verworfen");
                self.fehler_melden(format!(
                    "Nicht verbunden: {} wurde nicht gesendet",
                    signal.event_name()
                ));
                false
            }
        }
    }

    fn signals(&self) -> broadcast::Receiver<Signal> {
        self.inner.signal_tx.subscribe()
    }

    fn connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    fn events(&self) -> EventEmitter<TransportEvent> {
        self.inner.events.clone()
    }

    fn close(&self) {
        self.disconnect();
    }
}

// ---------------------------------------------------------------------------
// Hintergrund-Tasks
// ---------------------------------------------------------------------------

/// Baut die Verbindung auf und nach Verlust mit Backoff wieder auf
async fn supervisor(
    inner: Arc<TransportInner>,
    cancel: CancellationToken,
    mut out_rx: mpsc::UnboundedReceiver<Signal>,
) {
    let addr = inner.settings.addr();
    let mut wartezeit = inner.settings.reconnect_initial();
    let mut epoch = 0u64;

    loop {
        let versuch = tokio::time::timeout(
            inner.settings.connect_timeout(),
            TcpStream::connect(&addr),
        );
        let ergebnis = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = versuch => r,
        };

        match ergebnis {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                epoch += 1;
                wartezeit = inner.settings.reconnect_initial();

                // Signale aus einer vorherigen Verbindung nicht nachsenden
                let mut verworfen = 0usize;
                while out_rx.try_recv().is_ok() {
                    verworfen += 1;
                }
                if verworfen > 0 {
                    tracing::debug!(anzahl = verworfen, "Veraltete Signale verworfen");
                }

                tracing::info!(server = %addr, epoch, "Mit Signaling-Server verbunden");
                inner.status_tx.send_replace(ConnectionStatus {
                    connected: true,
                    epoch,
                });
                inner.events.emit(&TransportEvent::Connected { epoch });

                let ende = verbindung_betreiben(&inner, stream, &cancel, &mut out_rx).await;
                inner.status_tx.send_replace(ConnectionStatus {
                    connected: false,
                    epoch,
                });

                match ende {
                    Verbindungsende::Abgebrochen => break,
                    Verbindungsende::Getrennt(grund) => {
                        tracing::warn!(server = %addr, grund = %grund, "Verbindung verloren");
                        inner.events.emit(&TransportEvent::Disconnected {
                            reason: grund.clone(),
                        });
                        inner.events.emit(&TransportEvent::Error {
                            message: format!("Verbindung verloren: {grund}"),
                            fatal: false,
                        });
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(server = %addr, fehler = %e, "Verbindungsaufbau fehlgeschlagen");
                inner.events.emit(&TransportEvent::Error {
                    message: format!("Verbindungsaufbau fehlgeschlagen: {e}"),
                    fatal: false,
                });
            }
            Err(_) => {
                tracing::warn!(server = %addr, "Zeitlimit beim Verbindungsaufbau");
                inner.events.emit(&TransportEvent::Error {
                    message: "Zeitlimit beim Verbindungsaufbau".to_string(),
                    fatal: false,
                });
            }
        }

        tracing::debug!(wartezeit_ms = wartezeit.as_millis() as u64, "Naechster Verbindungsversuch");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wartezeit) => {}
        }
        wartezeit = (wartezeit * 2).min(inner.settings.reconnect_max());
    }

    tracing::debug!("Transport-Supervisor beendet");
}

/// Liest und schreibt auf einer einzelnen Verbindung bis sie endet
async fn verbindung_betreiben(
    inner: &TransportInner,
    stream: TcpStream,
    cancel: &CancellationToken,
    out_rx: &mut mpsc::UnboundedReceiver<Signal>,
) -> Verbindungsende {
    let mut framed = Framed::new(stream, FrameCodec::new());

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Verbindungsende::Abgebrochen,

            eingehend = framed.next() => match eingehend {
                Some(Ok(Signal::Heartbeat)) => {
                    // Server-Heartbeat automatisch beantworten
                    if let Err(e) = framed.send(Signal::HeartbeatResponse).await {
                        return Verbindungsende::Getrennt(e.to_string());
                    }
                }
                Some(Ok(signal)) => {
                    tracing::trace!(event = signal.event_name(), "Signal empfangen");
                    let _ = inner.signal_tx.send(signal.clone());
                    inner.events.emit(&TransportEvent::Signal(signal));
                }
                Some(Err(e)) => return Verbindungsende::Getrennt(e.to_string()),
                None => return Verbindungsende::Getrennt("Verbindung vom Server getrennt".into()),
            },

            ausgehend = out_rx.recv() => match ausgehend {
                Some(signal) => {
                    if let Err(e) = framed.send(signal).await {
                        return Verbindungsende::Getrennt(e.to_string());
                    }
                }
                None => return Verbindungsende::Abgebrochen,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn settings(addr: std::net::SocketAddr) -> SignalingSettings {
        SignalingSettings {
            server_addr: format!("tcp://{addr}"),
            reconnect_initial_ms: 20,
            reconnect_max_ms: 80,
            connect_timeout_ms: 1000,
        }
    }

    async fn annehmen(listener: &TcpListener) -> Framed<TcpStream, FrameCodec> {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("Client verbindet sich")
            .unwrap();
        Framed::new(stream, FrameCodec::new())
    }

    async fn verbunden(rx: &mut watch::Receiver<ConnectionStatus>, epoch: u64) {
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.connected && s.epoch == epoch),
        )
        .await
        .expect("Verbindung innerhalb des Zeitlimits")
        .unwrap();
    }

    #[tokio::test]
    async fn senden_und_empfangen() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let transport = SignalingTransport::new(settings(listener.local_addr().unwrap()));
        let mut status = transport.connection();
        let mut signale = transport.signals();

        assert!(transport.initialize(&Identity::new("user-t1")));
        assert!(!transport.initialize(&Identity::new("user-t1")));

        let mut server = annehmen(&listener).await;
        verbunden(&mut status, 1).await;

        assert!(transport.send(Signal::register(Identity::new("user-t1"))));
        let empfangen = server.next().await.unwrap().unwrap();
        assert_eq!(empfangen, Signal::Register(Identity::new("user-t1")));

        server.send(Signal::UserOnline(Identity::doctor(1))).await.unwrap();
        let signal = signale.recv().await.unwrap();
        assert_eq!(signal, Signal::UserOnline(Identity::doctor(1)));

        transport.disconnect();
    }

    #[tokio::test]
    async fn heartbeat_wird_beantwortet_und_nicht_weitergereicht() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let transport = SignalingTransport::new(settings(listener.local_addr().unwrap()));
        let mut signale = transport.signals();
        transport.initialize(&Identity::new("user-t2"));

        let mut server = annehmen(&listener).await;
        server.send(Signal::Heartbeat).await.unwrap();
        assert_eq!(server.next().await.unwrap().unwrap(), Signal::HeartbeatResponse);

        server.send(Signal::CallEnded).await.unwrap();
        assert_eq!(signale.recv().await.unwrap(), Signal::CallEnded);

        transport.disconnect();
    }

    #[tokio::test]
    async fn wiederaufbau_erhoeht_epoche() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let transport = SignalingTransport::new(settings(listener.local_addr().unwrap()));
        let mut status = transport.connection();

        let getrennt = Arc::new(AtomicUsize::new(0));
        let g = Arc::clone(&getrennt);
        let _sub = transport.on(TransportEventKind::Disconnected, move |_| {
            g.fetch_add(1, Ordering::SeqCst);
        });

        transport.initialize(&Identity::new("user-t3"));
        let server = annehmen(&listener).await;
        verbunden(&mut status, 1).await;

        drop(server);
        let _server2 = annehmen(&listener).await;
        verbunden(&mut status, 2).await;
        assert_eq!(getrennt.load(Ordering::SeqCst), 1);

        transport.disconnect();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn senden_ohne_verbindung_meldet_fehler() {
        // Ohne initialize bleibt der Transport getrennt
        let transport = SignalingTransport::new(SignalingSettings {
            server_addr: "127.0.0.1:1".into(),
            ..SignalingSettings::default()
        });

        let fehler = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fehler);
        let _sub = transport.on(TransportEventKind::Error, move |e| {
            if let TransportEvent::Error { fatal, .. } = e {
                assert!(!fatal);
            }
            f.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!transport.send(Signal::CallEnded));
        assert!(!transport.send_raw("end-call", serde_json::json!({"targetUserId": "doctor-1"})));
        assert!(!transport.send_raw("unbekannt", serde_json::Value::Null));
        assert_eq!(fehler.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn nach_disconnect_keine_ereignisse() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let transport = SignalingTransport::new(settings(listener.local_addr().unwrap()));
        let mut status = transport.connection();

        let ereignisse = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&ereignisse);
        let _sub = transport.on(TransportEventKind::Disconnected, move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        transport.initialize(&Identity::new("user-t4"));
        let _server = annehmen(&listener).await;
        verbunden(&mut status, 1).await;

        transport.disconnect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ereignisse.load(Ordering::SeqCst), 0);
        assert!(!transport.initialize(&Identity::new("user-t4")));
        assert!(!transport.send(Signal::CallEnded));
    }
}
