//! Call-Service – oeffentliche Fassade des Client-Kerns
//!
//! Ein [`CallService`] gehoert zu genau einer lokalen Identitaet. Er besitzt
//! Transport, Registrierung, Online-Abfrage und das Medien-Gate und treibt
//! den [`CallMachine`] in einem eigenen Task:
//!
//! ```text
//! Oberflaeche --Command--> Actor <--Signal-- SignalChannel
//!                            |
//!                            v
//!                   CallMachine (ohne IO)
//!                            |
//!                            +-- Effect::Send     -> SignalChannel
//!                            +-- Effect::Emit     -> EventEmitter
//!                            +-- Prepare*/Timer   -> Hintergrund-Tasks
//! ```
//!
//! Alle Zustandsaenderungen laufen seriell durch den Actor. Abfragen wie
//! [`CallService::is_call_active`] lesen einen `watch`-Kanal und blockieren nie.

use healthsync_core::{EventEmitter, Identity, Subscription};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

use healthsync_protocol::Signal;

use crate::call::{CallMachine, CallSession, CallState, Effect};
use crate::channel::{SignalChannel, TransportEvent, TransportEventKind};
use crate::config::{CallSettings, ClientConfig};
use crate::error::CallError;
use crate::events::{CallCallbacks, CallEvent, CallEventKind};
use crate::media::{MediaDevices, MediaError, MediaGate, MediaStream};
use crate::peer::PeerLink;
use crate::presence::PresenceQuery;
use crate::registrar::{PresenceRegistrar, RegistrationRecord};
use crate::transport::SignalingTransport;

type Antwort<T> = oneshot::Sender<T>;

enum Command {
    MakeCall {
        peer: Identity,
        antwort: Antwort<Result<(), CallError>>,
    },
    Accept {
        antwort: Antwort<Result<(), CallError>>,
    },
    Decline {
        antwort: Antwort<()>,
    },
    EndCall {
        antwort: Antwort<()>,
    },
    Disconnect {
        antwort: Antwort<()>,
    },
    SetIdentity(Identity),
    LocalCandidate(serde_json::Value),
    LocalMediaConnected,
    TransportError {
        message: String,
        fatal: bool,
    },
    // Ergebnisse der Hintergrund-Vorbereitung
    OutgoingPrepared {
        nr: u64,
        ergebnis: Result<String, CallError>,
    },
    AnswerPrepared {
        nr: u64,
        ergebnis: Result<String, CallError>,
    },
    PeerFailed(String),
}

/// Handle auf den Call-Service
///
/// Clone teilt den Service.
#[derive(Clone)]
pub struct CallService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    channel: Arc<dyn SignalChannel>,
    registrar: PresenceRegistrar,
    presence: PresenceQuery,
    media: Arc<MediaGate>,
    events: EventEmitter<CallEvent>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<CallState>,
    session_rx: watch::Receiver<Option<CallSession>>,
    cancel: CancellationToken,
    abos: Mutex<Vec<Subscription>>,
}

impl CallService {
    /// Startet den Service mit TCP-Transport zum Signaling-Server
    ///
    /// `server_addr` ueberschreibt die Adresse aus `config`. Muss innerhalb
    /// einer Tokio-Runtime aufgerufen werden.
    pub fn initialize(
        identity: Identity,
        callbacks: CallCallbacks,
        server_addr: Option<&str>,
        devices: Arc<dyn MediaDevices>,
        peer: Arc<dyn PeerLink>,
        config: ClientConfig,
    ) -> Self {
        let config = config.with_server_addr(server_addr);
        let transport = SignalingTransport::new(config.signaling.clone());
        transport.initialize(&identity);
        Self::with_channel(identity, callbacks, Arc::new(transport), devices, peer, config)
    }

    /// Startet den Service auf einem beliebigen [`SignalChannel`]
    pub fn with_channel(
        identity: Identity,
        callbacks: CallCallbacks,
        channel: Arc<dyn SignalChannel>,
        devices: Arc<dyn MediaDevices>,
        peer: Arc<dyn PeerLink>,
        config: ClientConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let events = EventEmitter::neu();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(CallState::Idle);
        let (session_tx, session_rx) = watch::channel(None);
        let media = Arc::new(MediaGate::new(devices));

        let presence = PresenceQuery::new(
            Arc::clone(&channel),
            config.presence.clone(),
            cancel.child_token(),
        );
        let registrar = PresenceRegistrar::new(
            Arc::clone(&channel),
            config.registrar.clone(),
            identity.clone(),
            state_rx.clone(),
            cancel.child_token(),
        );

        let mut abos = callbacks_registrieren(&events, callbacks);
        let tx = cmd_tx.clone();
        abos.push(channel.events().on(TransportEventKind::Error, move |e| {
            if let TransportEvent::Error { message, fatal } = e {
                let _ = tx.send(Command::TransportError {
                    message: message.clone(),
                    fatal: *fatal,
                });
            }
        }));

        let actor = CallActor {
            machine: CallMachine::new(identity.clone()),
            channel: Arc::clone(&channel),
            media: Arc::clone(&media),
            peer,
            presence: presence.clone(),
            events: events.clone(),
            cmd_tx: cmd_tx.clone(),
            state_tx,
            session_tx,
            settings: config.call.clone(),
            auto_accept: None,
            wartender_anruf: None,
            wartende_annahmen: Vec::new(),
        };
        let signale = channel.signals();
        tokio::spawn(actor.run(cmd_rx, signale, cancel.clone()));

        registrar.start();
        registrar.register(identity.clone());
        tracing::info!(identity = %identity, "Call-Service gestartet");

        Self {
            inner: Arc::new(ServiceInner {
                channel,
                registrar,
                presence,
                media,
                events,
                cmd_tx,
                state_rx,
                session_rx,
                cancel,
                abos: Mutex::new(abos),
            }),
        }
    }

    async fn anfragen<T>(
        &self,
        bauen: impl FnOnce(Antwort<T>) -> Command,
    ) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.inner.cmd_tx.send(bauen(tx)).ok()?;
        rx.await.ok()
    }

    // ----- Anruf-Operationen -----

    /// Ruft `peer` an
    ///
    /// Kehrt zurueck sobald das Offer gesendet wurde (`OutgoingRinging`) oder
    /// der Anruf nicht gestartet werden konnte. Waehrend ein Anruf besteht
    /// wird mit [`CallError::AlreadyActive`] abgelehnt.
    pub async fn make_call(&self, peer: Identity) -> Result<(), CallError> {
        self.anfragen(|antwort| Command::MakeCall { peer, antwort })
            .await
            .unwrap_or(Err(CallError::Closed))
    }

    /// Nimmt den klingelnden Anruf an, ein zweiter Aufruf ist wirkungslos
    pub async fn accept_call(&self) -> Result<(), CallError> {
        self.anfragen(|antwort| Command::Accept { antwort })
            .await
            .unwrap_or(Err(CallError::Closed))
    }

    /// Lehnt ab oder bricht ab, danach ist der Zustand immer `Idle`
    pub async fn decline_call(&self) {
        self.anfragen(|antwort| Command::Decline { antwort }).await;
    }

    /// Legt einen laufenden Anruf auf
    pub async fn end_call(&self) {
        self.anfragen(|antwort| Command::EndCall { antwort }).await;
    }

    /// Beendet den Service
    ///
    /// Legt einen laufenden Anruf auf, gibt Medien frei, stoppt alle Timer
    /// und Wiederholungen und trennt den Transport. Danach werden keine
    /// Ereignisse mehr gemeldet.
    pub async fn disconnect(&self) {
        self.anfragen(|antwort| Command::Disconnect { antwort }).await;
        self.inner.registrar.shutdown();
        self.inner.cancel.cancel();
        self.inner.abos.lock().clear();
        self.inner.media.release();
        self.inner.channel.close();
        self.inner.events.schliessen();
        tracing::info!("Call-Service beendet");
    }

    // ----- Abfragen -----

    /// true solange ein Anruf klingelt oder laeuft, blockiert nie
    pub fn is_call_active(&self) -> bool {
        self.inner.state_rx.borrow().is_active()
    }

    pub fn call_state(&self) -> CallState {
        *self.inner.state_rx.borrow()
    }

    pub fn session(&self) -> Option<CallSession> {
        self.inner.session_rx.borrow().clone()
    }

    /// Beobachtet Zustandswechsel
    pub fn state_changes(&self) -> watch::Receiver<CallState> {
        self.inner.state_rx.clone()
    }

    /// Prueft ob `peer` beim Server registriert ist
    pub async fn check_user_online(&self, peer: &Identity) -> bool {
        self.inner.presence.check_user_online(peer).await
    }

    // ----- Medien -----

    pub async fn get_local_media(&self) -> Result<MediaStream, MediaError> {
        self.inner.media.get_local_media().await
    }

    pub fn toggle_audio(&self) -> Option<bool> {
        self.inner.media.toggle_audio()
    }

    pub fn toggle_video(&self) -> Option<bool> {
        self.inner.media.toggle_video()
    }

    /// Leitet einen eigenen ICE-Kandidaten an die Gegenstelle weiter
    pub fn send_ice_candidate(&self, candidate: serde_json::Value) {
        let _ = self.inner.cmd_tx.send(Command::LocalCandidate(candidate));
    }

    /// Die Peer-Verbindung meldet fliessende Medien
    pub fn notify_media_connected(&self) {
        let _ = self.inner.cmd_tx.send(Command::LocalMediaConnected);
    }

    // ----- Identitaet -----

    pub fn registration(&self) -> RegistrationRecord {
        self.inner.registrar.record()
    }

    pub fn local_identity(&self) -> Identity {
        self.inner.registrar.record().identity
    }

    /// Wechselt die Identitaet und meldet sie sofort an
    pub fn switch_identity(&self, identity: Identity) {
        let _ = self.inner.cmd_tx.send(Command::SetIdentity(identity.clone()));
        self.inner.registrar.switch_identity(identity);
    }

    /// Doktor-Modus: meldet zusaetzlich die Arzt-Identitaet an
    pub fn set_doctor_identity(&self, doctor: Option<Identity>) {
        self.inner.registrar.set_doctor_identity(doctor);
    }

    // ----- Ereignisse -----

    /// Registriert einen Handler, er bleibt aktiv solange das Handle lebt
    pub fn on<F>(&self, kind: CallEventKind, handler: F) -> Subscription
    where
        F: Fn(&CallEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    /// Direkter Zugriff auf den Signaling-Kanal
    pub fn signaling(&self) -> Arc<dyn SignalChannel> {
        Arc::clone(&self.inner.channel)
    }
}

fn callbacks_registrieren(
    events: &EventEmitter<CallEvent>,
    callbacks: CallCallbacks,
) -> Vec<Subscription> {
    let mut abos = Vec::new();
    if let Some(f) = callbacks.on_incoming_call {
        abos.push(events.on(CallEventKind::IncomingCall, move |e| {
            if let CallEvent::IncomingCall { caller } = e {
                f(caller);
            }
        }));
    }
    if let Some(f) = callbacks.on_user_not_online {
        abos.push(events.on(CallEventKind::UserNotOnline, move |e| {
            if let CallEvent::UserNotOnline { peer } = e {
                f(peer);
            }
        }));
    }
    if let Some(f) = callbacks.on_call_in_progress {
        abos.push(events.on(CallEventKind::CallInProgress, move |e| {
            if let CallEvent::CallInProgress { peer, message } = e {
                f(peer, message);
            }
        }));
    }
    if let Some(f) = callbacks.on_call_declined {
        abos.push(events.on(CallEventKind::CallDeclined, move |e| {
            if let CallEvent::CallDeclined { peer } = e {
                f(peer);
            }
        }));
    }
    abos
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct CallActor {
    machine: CallMachine,
    channel: Arc<dyn SignalChannel>,
    media: Arc<MediaGate>,
    peer: Arc<dyn PeerLink>,
    presence: PresenceQuery,
    events: EventEmitter<CallEvent>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_tx: watch::Sender<CallState>,
    session_tx: watch::Sender<Option<CallSession>>,
    settings: CallSettings,
    /// Timer der automatischen Annahme mit Session-Nummer
    auto_accept: Option<(u64, Pin<Box<Sleep>>)>,
    wartender_anruf: Option<(u64, Antwort<Result<(), CallError>>)>,
    wartende_annahmen: Vec<Antwort<Result<(), CallError>>>,
}

/// Wartet auf den Timer der automatischen Annahme, ohne Timer nie
async fn auto_accept_faellig(timer: &mut Option<(u64, Pin<Box<Sleep>>)>) -> u64 {
    match timer {
        Some((nr, sleep)) => {
            sleep.as_mut().await;
            *nr
        }
        None => std::future::pending().await,
    }
}

impl CallActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut signale: broadcast::Receiver<Signal>,
        cancel: CancellationToken,
    ) {
        let mut signale_offen = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,

                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.befehl(cmd) {
                            break;
                        }
                    }
                    None => break,
                },

                signal = signale.recv(), if signale_offen => match signal {
                    Ok(signal) => {
                        let fx = self.machine.signal(&signal);
                        self.ausfuehren(fx);
                        self.antworten_pruefen();
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(verpasst = n, "Call-Service hat Signale verpasst");
                        // Verlorene Signale koennen die Session nicht mehr abschliessen
                        if self.machine.is_busy() {
                            let fx = self.machine.transport_error(
                                format!("{n} Signale verloren, Anruf abgebrochen"),
                                true,
                            );
                            self.ausfuehren(fx);
                            self.antworten_pruefen();
                        }
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("Signal-Kanal geschlossen");
                        signale_offen = false;
                    }
                },

                nr = auto_accept_faellig(&mut self.auto_accept) => {
                    self.auto_accept = None;
                    let fx = self.machine.auto_accept_due(nr);
                    self.ausfuehren(fx);
                }
            }
        }

        self.auto_accept = None;
        for antwort in self.wartende_annahmen.drain(..) {
            let _ = antwort.send(Err(CallError::Closed));
        }
        if let Some((_, antwort)) = self.wartender_anruf.take() {
            let _ = antwort.send(Err(CallError::Closed));
        }
        tracing::debug!("Call-Actor beendet");
    }

    /// Fuehrt einen Befehl aus, `true` beendet den Actor
    fn befehl(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::MakeCall { peer, antwort } => match self.machine.make_call(peer) {
                Ok(fx) => {
                    if let Some(Effect::PrepareOutgoing { nr, .. }) = fx.first() {
                        self.wartender_anruf = Some((*nr, antwort));
                    }
                    self.ausfuehren(fx);
                }
                Err(e) => {
                    let _ = antwort.send(Err(e));
                }
            },

            Command::Accept { antwort } => match self.machine.accept() {
                Ok(fx) => {
                    if self.machine.answering() {
                        self.wartende_annahmen.push(antwort);
                    } else {
                        let _ = antwort.send(Ok(()));
                    }
                    self.ausfuehren(fx);
                }
                Err(e) => {
                    let _ = antwort.send(Err(e));
                }
            },

            Command::Decline { antwort } => {
                let fx = self.machine.decline();
                self.ausfuehren(fx);
                let _ = antwort.send(());
            }

            Command::EndCall { antwort } => {
                let fx = self.machine.end_call();
                self.ausfuehren(fx);
                let _ = antwort.send(());
            }

            Command::Disconnect { antwort } => {
                let fx = self.machine.disconnect();
                self.ausfuehren(fx);
                self.antworten_pruefen();
                let _ = antwort.send(());
                return true;
            }

            Command::SetIdentity(identity) => self.machine.set_local_identity(identity),

            Command::LocalCandidate(candidate) => {
                let fx = self.machine.local_candidate(candidate);
                self.ausfuehren(fx);
            }

            Command::LocalMediaConnected => {
                let fx = self.machine.local_media_connected();
                self.ausfuehren(fx);
            }

            Command::TransportError { message, fatal } => {
                let fx = self.machine.transport_error(message, fatal);
                self.ausfuehren(fx);
            }

            Command::OutgoingPrepared { nr, ergebnis } => match ergebnis {
                Ok(offer) => match self.machine.outgoing_prepared(nr, offer) {
                    Ok(fx) => self.ausfuehren(fx),
                    Err(_) => {
                        tracing::debug!(nr, "Veraltetes Offer verworfen");
                        let fx = self.machine.discard_stale();
                        self.ausfuehren(fx);
                    }
                },
                Err(fehler) => {
                    let fx = self.machine.outgoing_failed(nr, &fehler);
                    self.ausfuehren(fx);
                    if let Some((wartet_auf, antwort)) = self.wartender_anruf.take() {
                        if wartet_auf == nr {
                            let _ = antwort.send(Err(fehler));
                        } else {
                            self.wartender_anruf = Some((wartet_auf, antwort));
                        }
                    }
                }
            },

            Command::AnswerPrepared { nr, ergebnis } => match ergebnis {
                Ok(answer) => match self.machine.answer_prepared(nr, answer) {
                    Ok(fx) => self.ausfuehren(fx),
                    Err(_) => {
                        tracing::debug!(nr, "Veraltete Answer verworfen");
                        let fx = self.machine.discard_stale();
                        self.ausfuehren(fx);
                    }
                },
                Err(fehler) => {
                    let fx = self.machine.answer_failed(nr, &fehler);
                    self.ausfuehren(fx);
                    for antwort in self.wartende_annahmen.drain(..) {
                        let _ = antwort.send(Err(fehler.clone()));
                    }
                }
            },

            Command::PeerFailed(message) => {
                let fx = self.machine.peer_failed(message);
                self.ausfuehren(fx);
            }
        }
        self.antworten_pruefen();
        false
    }

    /// Beantwortet wartende Aufrufer sobald ihre Vorbereitung vorbei ist
    fn antworten_pruefen(&mut self) {
        if let Some((nr, antwort)) = self.wartender_anruf.take() {
            if self.machine.preparing_outgoing(nr) {
                self.wartender_anruf = Some((nr, antwort));
            } else if self.machine.session_nr() == Some(nr) {
                let _ = antwort.send(Ok(()));
            } else {
                let _ = antwort.send(Err(CallError::Superseded));
            }
        }

        if !self.wartende_annahmen.is_empty() && !self.machine.answering() {
            let ergebnis = if self.machine.state() == CallState::Active {
                Ok(())
            } else {
                Err(CallError::Superseded)
            };
            for antwort in self.wartende_annahmen.drain(..) {
                let _ = antwort.send(ergebnis.clone());
            }
        }
    }

    /// Veroeffentlicht den Zustand und fuehrt die Effekte der Reihe nach aus
    fn ausfuehren(&mut self, fx: Vec<Effect>) {
        let state = self.machine.state();
        self.state_tx.send_if_modified(|s| {
            let geaendert = *s != state;
            *s = state;
            geaendert
        });
        let session = self.machine.session().cloned();
        self.session_tx.send_if_modified(|s| {
            let geaendert = *s != session;
            *s = session;
            geaendert
        });

        for effekt in fx {
            match effekt {
                Effect::Send(signal) => {
                    self.channel.send(signal);
                }
                Effect::Emit(event) => {
                    self.events.emit(&event);
                }
                Effect::PrepareOutgoing { nr, peer } => self.ausgehend_vorbereiten(nr, peer),
                Effect::PrepareAnswer {
                    nr,
                    caller,
                    offer_sdp,
                } => self.annahme_vorbereiten(nr, caller, offer_sdp),
                Effect::ApplyAnswer(sdp) => {
                    let peer = Arc::clone(&self.peer);
                    let tx = self.cmd_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = peer.apply_answer(&sdp).await {
                            tracing::error!(fehler = %e, "Answer konnte nicht angewendet werden");
                            let _ = tx.send(Command::PeerFailed(e.to_string()));
                        }
                    });
                }
                Effect::AddRemoteCandidate(candidate) => {
                    let peer = Arc::clone(&self.peer);
                    tokio::spawn(async move {
                        if let Err(e) = peer.add_remote_candidate(candidate).await {
                            tracing::warn!(fehler = %e, "ICE-Kandidat verworfen");
                        }
                    });
                }
                Effect::StartAutoAccept { nr } => {
                    tracing::debug!(
                        nr,
                        nach_ms = self.settings.auto_accept_ms,
                        "Automatische Annahme geplant"
                    );
                    self.auto_accept =
                        Some((nr, Box::pin(tokio::time::sleep(self.settings.auto_accept()))));
                }
                Effect::CancelAutoAccept => self.auto_accept = None,
                Effect::ReleaseMedia => {
                    self.media.release();
                }
                Effect::ClosePeer => self.peer.close(),
            }
        }
    }

    fn ausgehend_vorbereiten(&self, nr: u64, peer: Identity) {
        let presence = self.presence.clone();
        let media = Arc::clone(&self.media);
        let link = Arc::clone(&self.peer);
        let tx = self.cmd_tx.clone();
        let precheck = self.settings.precheck_presence;

        tokio::spawn(async move {
            let ergebnis: Result<String, CallError> = async {
                if precheck && !presence.check_user_online(&peer).await {
                    return Err(CallError::PeerNotOnline(peer.clone()));
                }
                let stream = media.get_local_media().await?;
                link.create_offer(&peer, &stream)
                    .await
                    .map_err(|e| CallError::Peer(e.0))
            }
            .await;
            let _ = tx.send(Command::OutgoingPrepared { nr, ergebnis });
        });
    }

    fn annahme_vorbereiten(&self, nr: u64, caller: Identity, offer_sdp: String) {
        let media = Arc::clone(&self.media);
        let link = Arc::clone(&self.peer);
        let tx = self.cmd_tx.clone();

        tokio::spawn(async move {
            let ergebnis: Result<String, CallError> = async {
                let stream = media.get_local_media().await?;
                link.create_answer(&caller, &offer_sdp, &stream)
                    .await
                    .map_err(|e| CallError::Peer(e.0))
            }
            .await;
            let _ = tx.send(Command::AnswerPrepared { nr, ergebnis });
        });
    }
}
