//! Test-Doubles fuer Transport, Medien und Peer-Verbindung
//!
//! Verfuegbar in eigenen Tests und mit dem Feature `test-utils`.

use async_trait::async_trait;
use healthsync_core::{EventEmitter, Identity};
use healthsync_protocol::{PresenceStatus, Signal};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::channel::{ConnectionStatus, SignalChannel, TransportEvent};
use crate::media::{MediaConstraints, MediaDevices, MediaError, MediaStream, TrackKind};
use crate::peer::{PeerError, PeerLink};

type Responder = Box<dyn Fn(&Signal) -> Vec<Signal> + Send + Sync>;

// ---------------------------------------------------------------------------
// FakeChannel
// ---------------------------------------------------------------------------

/// In-Memory-Signaling ohne Netzwerk
///
/// Gesendete Signale werden aufgezeichnet, eingehende per [`inject`](Self::inject)
/// eingespielt. Ein optionaler Responder beantwortet gesendete Signale sofort.
pub struct FakeChannel {
    status: watch::Sender<ConnectionStatus>,
    signal_tx: broadcast::Sender<Signal>,
    gesendet: Mutex<Vec<Signal>>,
    events: EventEmitter<TransportEvent>,
    responder: Mutex<Option<Responder>>,
    geschlossen: AtomicBool,
}

impl FakeChannel {
    pub fn new(connected: bool) -> Arc<Self> {
        let (status, _) = watch::channel(ConnectionStatus {
            connected,
            epoch: u64::from(connected),
        });
        let (signal_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            status,
            signal_tx,
            gesendet: Mutex::new(Vec::new()),
            events: EventEmitter::neu(),
            responder: Mutex::new(None),
            geschlossen: AtomicBool::new(false),
        })
    }

    /// Aendert den Verbindungszustand, ein Aufbau erhoeht die Epoche
    pub fn set_connected(&self, connected: bool) {
        self.status.send_modify(|s| {
            if connected && !s.connected {
                s.epoch += 1;
            }
            s.connected = connected;
        });
    }

    /// Spielt ein Signal vom Server ein
    pub fn inject(&self, signal: Signal) {
        let _ = self.signal_tx.send(signal);
    }

    /// Loest ein Transport-Ereignis aus
    pub fn emit(&self, event: TransportEvent) {
        self.events.emit(&event);
    }

    pub fn sent(&self) -> Vec<Signal> {
        self.gesendet.lock().clone()
    }

    /// Anzahl gesendeter Signale mit diesem Ereignisnamen
    pub fn sent_count(&self, event: &str) -> usize {
        self.gesendet
            .lock()
            .iter()
            .filter(|s| s.event_name() == event)
            .count()
    }

    pub fn clear_sent(&self) {
        self.gesendet.lock().clear();
    }

    pub fn respond_with(&self, f: impl Fn(&Signal) -> Vec<Signal> + Send + Sync + 'static) {
        *self.responder.lock() = Some(Box::new(f));
    }

    /// Beantwortet Online-Abfragen: nur `online` gilt als erreichbar
    pub fn answer_presence(&self, online: Vec<Identity>) {
        self.respond_with(move |signal| match signal {
            Signal::CheckUserOnline(q) => vec![Signal::UserOnlineStatus(PresenceStatus {
                user_id: q.user_id.clone(),
                is_online: online.contains(&q.user_id),
                response_id: Some(q.request_id.clone()),
            })],
            _ => Vec::new(),
        });
    }

    pub fn is_closed(&self) -> bool {
        self.geschlossen.load(Ordering::Acquire)
    }
}

impl SignalChannel for FakeChannel {
    fn is_connected(&self) -> bool {
        !self.is_closed() && self.status.borrow().connected
    }

    fn send(&self, signal: Signal) -> bool {
        if !self.is_connected() {
            self.events.emit(&TransportEvent::Error {
                message: format!("Nicht verbunden: {} wurde nicht gesendet", signal.event_name()),
                fatal: false,
            });
            return false;
        }
        self.gesendet.lock().push(signal.clone());

        let antworten = match self.responder.lock().as_ref() {
            Some(f) => f(&signal),
            None => Vec::new(),
        };
        for antwort in antworten {
            let _ = self.signal_tx.send(antwort);
        }
        true
    }

    fn signals(&self) -> broadcast::Receiver<Signal> {
        self.signal_tx.subscribe()
    }

    fn connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    fn events(&self) -> EventEmitter<TransportEvent> {
        self.events.clone()
    }

    fn close(&self) {
        self.geschlossen.store(true, Ordering::Release);
        self.events.schliessen();
        self.status.send_modify(|s| s.connected = false);
    }
}

// ---------------------------------------------------------------------------
// FakeMedia
// ---------------------------------------------------------------------------

/// Geraete-Backend mit steuerbaren Fehlern
#[derive(Default)]
pub struct FakeMedia {
    video_fehler: Mutex<Option<MediaError>>,
    audio_fehler: Mutex<Option<MediaError>>,
    angefordert: AtomicUsize,
    freigegeben: AtomicUsize,
    umgeschaltet: Mutex<Vec<(TrackKind, bool)>>,
}

impl FakeMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Audio+Video schlaegt mit diesem Fehler fehl
    pub fn fail_video(&self, fehler: MediaError) {
        *self.video_fehler.lock() = Some(fehler);
    }

    /// Jede Anforderung schlaegt mit diesem Fehler fehl
    pub fn fail_audio(&self, fehler: MediaError) {
        *self.audio_fehler.lock() = Some(fehler);
    }

    pub fn acquired(&self) -> usize {
        self.angefordert.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.freigegeben.load(Ordering::SeqCst)
    }

    pub fn toggles(&self) -> Vec<(TrackKind, bool)> {
        self.umgeschaltet.lock().clone()
    }
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        if constraints.video {
            if let Some(e) = self.video_fehler.lock().clone() {
                return Err(e);
            }
        }
        if let Some(e) = self.audio_fehler.lock().clone() {
            return Err(e);
        }
        let n = self.angefordert.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MediaStream::new(format!("fake-stream-{n}"), constraints))
    }

    fn set_track_enabled(&self, _stream: &MediaStream, kind: TrackKind, enabled: bool) {
        self.umgeschaltet.lock().push((kind, enabled));
    }

    fn release(&self, _stream: &MediaStream) {
        self.freigegeben.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// FakePeer
// ---------------------------------------------------------------------------

/// Peer-Verbindung die feste SDPs liefert und Aufrufe mitzaehlt
#[derive(Default)]
pub struct FakePeer {
    angewendet: Mutex<Vec<String>>,
    kandidaten: Mutex<Vec<serde_json::Value>>,
    geschlossen: AtomicUsize,
    answer_fehler: AtomicBool,
}

impl FakePeer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `apply_answer` schlaegt ab jetzt fehl
    pub fn fail_apply_answer(&self) {
        self.answer_fehler.store(true, Ordering::SeqCst);
    }

    pub fn applied_answers(&self) -> Vec<String> {
        self.angewendet.lock().clone()
    }

    pub fn remote_candidates(&self) -> Vec<serde_json::Value> {
        self.kandidaten.lock().clone()
    }

    pub fn closed(&self) -> usize {
        self.geschlossen.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerLink for FakePeer {
    async fn create_offer(
        &self,
        peer: &Identity,
        _media: &MediaStream,
    ) -> Result<String, PeerError> {
        Ok(format!("offer-fuer-{peer}"))
    }

    async fn create_answer(
        &self,
        peer: &Identity,
        _offer_sdp: &str,
        _media: &MediaStream,
    ) -> Result<String, PeerError> {
        Ok(format!("answer-fuer-{peer}"))
    }

    async fn apply_answer(&self, answer_sdp: &str) -> Result<(), PeerError> {
        if self.answer_fehler.load(Ordering::SeqCst) {
            return Err(PeerError("Remote-Beschreibung abgelehnt".into()));
        }
        self.angewendet.lock().push(answer_sdp.to_string());
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: serde_json::Value) -> Result<(), PeerError> {
        self.kandidaten.lock().push(candidate);
        Ok(())
    }

    fn close(&self) {
        self.geschlossen.fetch_add(1, Ordering::SeqCst);
    }
}
