use healthsync_core::Identity;
use healthsync_protocol::{
    CallAccept, CallFailure, CallOffer, IceCandidate, PeerRef, Signal,
};

use super::state::{CallDirection, CallSession, CallState};
use crate::error::CallError;
use crate::events::{CallEvent, EndReason, ErrorContext};

/// Auftrag des Automaten an seine Umgebung
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(Signal),
    Emit(CallEvent),
    /// Online-Pruefung, Medien und SDP-Offer fuer einen ausgehenden Anruf
    PrepareOutgoing { nr: u64, peer: Identity },
    /// Medien und SDP-Answer fuer einen eingehenden Anruf
    PrepareAnswer {
        nr: u64,
        caller: Identity,
        offer_sdp: String,
    },
    ApplyAnswer(String),
    AddRemoteCandidate(serde_json::Value),
    StartAutoAccept { nr: u64 },
    CancelAutoAccept,
    ReleaseMedia,
    ClosePeer,
}

/// Laufende asynchrone Vorbereitung
#[derive(Debug, Clone, PartialEq)]
enum Vorbereitung {
    Ausgehend { nr: u64, peer: Identity },
    Annahme { nr: u64 },
}

/// Uebergangslogik einer einzelnen Anruf-Session
///
/// Es gibt hoechstens eine Session. Jede Session erhaelt eine fortlaufende
/// Nummer; Ergebnisse asynchroner Vorbereitungen werden nur angewendet wenn
/// ihre Nummer noch zur aktuellen Session passt.
#[derive(Debug)]
pub struct CallMachine {
    local: Identity,
    session: Option<CallSession>,
    session_nr: u64,
    vorbereitung: Option<Vorbereitung>,
    eingehendes_offer: Option<String>,
    naechste_nr: u64,
}

impl CallMachine {
    pub fn new(local: Identity) -> Self {
        Self {
            local,
            session: None,
            session_nr: 0,
            vorbereitung: None,
            eingehendes_offer: None,
            naechste_nr: 1,
        }
    }

    pub fn local_identity(&self) -> &Identity {
        &self.local
    }

    pub fn set_local_identity(&mut self, identity: Identity) {
        self.local = identity;
    }

    pub fn state(&self) -> CallState {
        self.session.as_ref().map_or(CallState::Idle, |s| s.state)
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    /// true solange eine Session besteht oder vorbereitet wird
    pub fn is_busy(&self) -> bool {
        self.session.is_some() || self.vorbereitung.is_some()
    }

    /// true solange die Vorbereitung des Anrufs `nr` laeuft
    pub fn preparing_outgoing(&self, nr: u64) -> bool {
        matches!(self.vorbereitung, Some(Vorbereitung::Ausgehend { nr: n, .. }) if n == nr)
    }

    pub fn answering(&self) -> bool {
        matches!(self.vorbereitung, Some(Vorbereitung::Annahme { .. }))
    }

    /// Nummer der bestehenden Session
    pub fn session_nr(&self) -> Option<u64> {
        self.session.as_ref().map(|_| self.session_nr)
    }

    fn nummer_vergeben(&mut self) -> u64 {
        let nr = self.naechste_nr;
        self.naechste_nr += 1;
        nr
    }

    fn peer(&self) -> Option<Identity> {
        self.session.as_ref().map(|s| s.peer_id.clone())
    }

    // ----- Uebergaenge -----

    fn wechsel(&mut self, to: CallState, fx: &mut Vec<Effect>) {
        if let Some(session) = self.session.as_mut() {
            let from = session.state;
            if from != to {
                session.state = to;
                tracing::info!(peer = %session.peer_id, from = %from, to = %to, "Anrufzustand");
                fx.push(Effect::Emit(CallEvent::StateChanged { from, to }));
            }
        }
    }

    /// Raeumt Session und Vorbereitung ab und kehrt nach `Idle` zurueck
    ///
    /// `durchgang` wird als Zwischenzustand gemeldet (z.B. `Declined`).
    fn beenden(&mut self, durchgang: Option<CallState>, fx: &mut Vec<Effect>) -> Option<Identity> {
        let from = self.state();
        let peer = self.peer().or_else(|| match &self.vorbereitung {
            Some(Vorbereitung::Ausgehend { peer, .. }) => Some(peer.clone()),
            _ => None,
        });
        let hatte_etwas = self.is_busy();

        self.session = None;
        self.vorbereitung = None;
        self.eingehendes_offer = None;

        fx.push(Effect::CancelAutoAccept);
        if hatte_etwas {
            fx.push(Effect::ReleaseMedia);
            fx.push(Effect::ClosePeer);
        }

        match durchgang {
            Some(z) => {
                if from != z {
                    fx.push(Effect::Emit(CallEvent::StateChanged { from, to: z }));
                }
                fx.push(Effect::Emit(CallEvent::StateChanged {
                    from: z,
                    to: CallState::Idle,
                }));
            }
            None if from != CallState::Idle => {
                fx.push(Effect::Emit(CallEvent::StateChanged {
                    from,
                    to: CallState::Idle,
                }));
            }
            None => {}
        }
        peer
    }

    // ----- Ausgehend -----

    /// Startet einen ausgehenden Anruf
    ///
    /// Wird abgelehnt solange eine Session besteht oder vorbereitet wird.
    pub fn make_call(&mut self, peer: Identity) -> Result<Vec<Effect>, CallError> {
        if self.is_busy() {
            tracing::warn!(peer = %peer, state = %self.state(), "Anruf laeuft bereits, makeCall abgelehnt");
            return Err(CallError::AlreadyActive);
        }
        let nr = self.nummer_vergeben();
        tracing::info!(peer = %peer, nr, "Bereite ausgehenden Anruf vor");
        self.vorbereitung = Some(Vorbereitung::Ausgehend {
            nr,
            peer: peer.clone(),
        });
        Ok(vec![Effect::PrepareOutgoing { nr, peer }])
    }

    /// Vorbereitung abgeschlossen: Offer senden und klingeln
    pub fn outgoing_prepared(&mut self, nr: u64, offer_sdp: String) -> Result<Vec<Effect>, CallError> {
        let peer = match &self.vorbereitung {
            Some(Vorbereitung::Ausgehend { nr: n, peer }) if *n == nr => peer.clone(),
            _ => return Err(CallError::Superseded),
        };
        self.vorbereitung = None;
        self.session_nr = nr;
        self.session = Some(CallSession::new(
            peer.clone(),
            CallDirection::Outgoing,
            CallState::Idle,
        ));

        let mut fx = vec![Effect::Send(Signal::CallUser(CallOffer {
            target_user_id: peer,
            caller_user_id: self.local.clone(),
            offer_sdp,
        }))];
        self.wechsel(CallState::OutgoingRinging, &mut fx);
        Ok(fx)
    }

    /// Vorbereitung fehlgeschlagen, der Automat bleibt `Idle`
    pub fn outgoing_failed(&mut self, nr: u64, fehler: &CallError) -> Vec<Effect> {
        if !self.preparing_outgoing(nr) {
            return Vec::new();
        }
        tracing::warn!(nr, fehler = %fehler, "Ausgehender Anruf nicht gestartet");
        let mut fx = Vec::new();
        self.beenden(None, &mut fx);
        if let CallError::PeerNotOnline(peer) = fehler {
            fx.push(Effect::Emit(CallEvent::UserNotOnline { peer: peer.clone() }));
        }
        fx.extend(fehler_ereignis(fehler).map(Effect::Emit));
        fx
    }

    /// Aufraeumen nach einem veralteten Vorbereitungsergebnis
    pub fn discard_stale(&self) -> Vec<Effect> {
        if self.is_busy() {
            Vec::new()
        } else {
            vec![Effect::ReleaseMedia, Effect::ClosePeer]
        }
    }

    // ----- Eingehend -----

    fn eingehend(&mut self, caller: Identity, offer_sdp: String) -> Vec<Effect> {
        if self.is_busy() {
            tracing::info!(caller = %caller, state = %self.state(), "Besetzt, eingehender Anruf wird abgelehnt");
            return vec![Effect::Send(Signal::CallDeclined(PeerRef::an(caller)))];
        }

        let nr = self.nummer_vergeben();
        self.session_nr = nr;
        self.session = Some(CallSession::new(
            caller.clone(),
            CallDirection::Incoming,
            CallState::Idle,
        ));
        self.eingehendes_offer = Some(offer_sdp);

        let mut fx = Vec::new();
        self.wechsel(CallState::IncomingRinging, &mut fx);
        fx.push(Effect::Emit(CallEvent::IncomingCall { caller }));
        fx.push(Effect::StartAutoAccept { nr });
        fx
    }

    fn annahme_starten(&mut self) -> Vec<Effect> {
        let caller = match self.peer() {
            Some(c) => c,
            None => return Vec::new(),
        };
        let nr = self.session_nr;
        self.vorbereitung = Some(Vorbereitung::Annahme { nr });
        vec![
            Effect::CancelAutoAccept,
            Effect::PrepareAnswer {
                nr,
                caller,
                offer_sdp: self.eingehendes_offer.clone().unwrap_or_default(),
            },
        ]
    }

    /// Nimmt den klingelnden Anruf an, wiederholte Aufrufe sind wirkungslos
    pub fn accept(&mut self) -> Result<Vec<Effect>, CallError> {
        match (self.state(), self.session.as_ref().map(|s| s.direction)) {
            (CallState::IncomingRinging, _) if self.answering() => Ok(Vec::new()),
            (CallState::IncomingRinging, _) => Ok(self.annahme_starten()),
            (CallState::Active, Some(CallDirection::Incoming)) => Ok(Vec::new()),
            _ => Err(CallError::NoIncomingCall),
        }
    }

    /// Timer fuer die automatische Annahme ist abgelaufen
    pub fn auto_accept_due(&mut self, nr: u64) -> Vec<Effect> {
        if self.state() != CallState::IncomingRinging || self.answering() || self.session_nr != nr {
            return Vec::new();
        }
        tracing::info!(nr, "Eingehender Anruf wird automatisch angenommen");
        self.annahme_starten()
    }

    /// Answer erzeugt: an den Anrufer senden und aktiv werden
    pub fn answer_prepared(&mut self, nr: u64, answer_sdp: String) -> Result<Vec<Effect>, CallError> {
        let passt = matches!(self.vorbereitung, Some(Vorbereitung::Annahme { nr: n }) if n == nr)
            && self.state() == CallState::IncomingRinging;
        let caller = match self.peer() {
            Some(c) if passt => c,
            _ => return Err(CallError::Superseded),
        };
        self.vorbereitung = None;
        self.eingehendes_offer = None;

        let mut fx = vec![Effect::Send(Signal::CallAccepted(CallAccept {
            target_user_id: caller.clone(),
            answer_sdp,
        }))];
        self.wechsel(CallState::Active, &mut fx);
        fx.push(Effect::Emit(CallEvent::CallStarted {
            peer: caller,
            direction: CallDirection::Incoming,
        }));
        Ok(fx)
    }

    /// Annahme gescheitert: Anrufer informieren und aufraeumen
    pub fn answer_failed(&mut self, nr: u64, fehler: &CallError) -> Vec<Effect> {
        if !matches!(self.vorbereitung, Some(Vorbereitung::Annahme { nr: n }) if n == nr) {
            return Vec::new();
        }
        tracing::warn!(nr, fehler = %fehler, "Annahme fehlgeschlagen");
        let mut fx = Vec::new();
        if let Some(caller) = self.peer() {
            fx.push(Effect::Send(Signal::CallDeclined(PeerRef::an(caller))));
        }
        if let Some(peer) = self.beenden(None, &mut fx) {
            fx.push(Effect::Emit(CallEvent::CallEnded {
                peer,
                reason: EndReason::Failed,
            }));
        }
        fx.extend(fehler_ereignis(fehler).map(Effect::Emit));
        fx
    }

    // ----- Beenden -----

    fn auflegen(&mut self, reason: EndReason) -> Vec<Effect> {
        let mut fx = Vec::new();
        if let Some(session) = self.session.as_ref() {
            let ziel = PeerRef::an(session.peer_id.clone());
            let signal = match session.state {
                CallState::IncomingRinging => Signal::CallDeclined(ziel),
                _ => Signal::EndCall(ziel),
            };
            fx.push(Effect::Send(signal));
        }
        let hatte_session = self.session.is_some();
        let peer = self.beenden(None, &mut fx);
        if let (true, Some(peer)) = (hatte_session, peer) {
            fx.push(Effect::Emit(CallEvent::CallEnded { peer, reason }));
        }
        fx
    }

    /// Lehnt ab bzw. bricht ab, endet in jedem Fall in `Idle`
    pub fn decline(&mut self) -> Vec<Effect> {
        tracing::info!(state = %self.state(), "Anruf abgelehnt");
        self.auflegen(EndReason::Local)
    }

    /// Beendet einen laufenden Anruf
    pub fn end_call(&mut self) -> Vec<Effect> {
        tracing::info!(state = %self.state(), "Anruf beendet");
        self.auflegen(EndReason::Local)
    }

    /// Abbau beim Trennen des Service
    pub fn disconnect(&mut self) -> Vec<Effect> {
        self.auflegen(EndReason::Disconnected)
    }

    // ----- Signale -----

    /// Verarbeitet ein Signal vom Server
    pub fn signal(&mut self, signal: &Signal) -> Vec<Effect> {
        let mut fx = Vec::new();
        match signal {
            Signal::IncomingCall(ic) => {
                return self.eingehend(ic.caller_user_id.clone(), ic.offer_sdp.clone());
            }

            Signal::CallAnswered(a) if self.state() == CallState::OutgoingRinging => {
                fx.push(Effect::ApplyAnswer(a.answer_sdp.clone()));
                self.aktiv_ausgehend(&mut fx);
            }

            Signal::CallDeclined(_) => match self.state() {
                CallState::OutgoingRinging => {
                    if let Some(peer) = self.beenden(Some(CallState::Declined), &mut fx) {
                        fx.push(Effect::Emit(CallEvent::CallDeclined { peer }));
                    }
                }
                CallState::IncomingRinging => self.gegenstelle_beendet(&mut fx),
                _ => {}
            },

            Signal::CallFailed(f) if self.state() == CallState::OutgoingRinging => {
                match f.grund() {
                    CallFailure::NichtOnline => {
                        if let Some(peer) = self.beenden(Some(CallState::NotFound), &mut fx) {
                            fx.push(Effect::Emit(CallEvent::UserNotOnline { peer }));
                        }
                    }
                    CallFailure::Besetzt => {
                        if let Some(peer) = self.beenden(Some(CallState::Busy), &mut fx) {
                            fx.push(Effect::Emit(CallEvent::CallInProgress {
                                peer,
                                message: f.message.clone(),
                            }));
                        }
                    }
                    CallFailure::Sonstiges => {
                        self.beenden(Some(CallState::Error), &mut fx);
                        fx.push(Effect::Emit(CallEvent::Error {
                            context: ErrorContext::Call,
                            message: f.message.clone(),
                            fatal: false,
                        }));
                    }
                }
            }

            Signal::CallInProgress(ip) => {
                let durchgang = match self.state() {
                    // Auf einem anderen Geraet angenommen
                    CallState::IncomingRinging => None,
                    CallState::OutgoingRinging => Some(CallState::Busy),
                    _ => return fx,
                };
                if let Some(peer) = self.beenden(durchgang, &mut fx) {
                    fx.push(Effect::Emit(CallEvent::CallInProgress {
                        peer,
                        message: ip.message.clone(),
                    }));
                }
            }

            Signal::CallEnded | Signal::DirectCallEnded(_) if self.session.is_some() => {
                self.gegenstelle_beendet(&mut fx);
            }

            Signal::IceCandidate(c) if self.session.is_some() => {
                fx.push(Effect::AddRemoteCandidate(c.candidate.clone()));
            }

            Signal::MediaConnected(_) if self.state() == CallState::OutgoingRinging => {
                // Medien fliessen bereits, Answer ist unterwegs verloren gegangen
                self.aktiv_ausgehend(&mut fx);
            }

            andere => {
                tracing::trace!(event = andere.event_name(), state = %self.state(), "Signal ignoriert");
            }
        }
        fx
    }

    fn aktiv_ausgehend(&mut self, fx: &mut Vec<Effect>) {
        self.wechsel(CallState::Active, fx);
        if let Some(peer) = self.peer() {
            fx.push(Effect::Emit(CallEvent::CallStarted {
                peer,
                direction: CallDirection::Outgoing,
            }));
        }
    }

    fn gegenstelle_beendet(&mut self, fx: &mut Vec<Effect>) {
        if let Some(peer) = self.beenden(None, fx) {
            fx.push(Effect::Emit(CallEvent::CallEnded {
                peer,
                reason: EndReason::Remote,
            }));
        }
    }

    // ----- Lokale Ereignisse -----

    /// Eigener ICE-Kandidat fuer die Gegenstelle
    pub fn local_candidate(&self, candidate: serde_json::Value) -> Vec<Effect> {
        match self.peer() {
            Some(peer) => vec![Effect::Send(Signal::IceCandidate(IceCandidate {
                target_user_id: Some(peer),
                candidate,
            }))],
            None => {
                tracing::debug!("ICE-Kandidat ohne Anruf verworfen");
                Vec::new()
            }
        }
    }

    /// Die Peer-Verbindung meldet fliessende Medien
    pub fn local_media_connected(&mut self) -> Vec<Effect> {
        let Some(peer) = self.peer() else {
            return Vec::new();
        };
        let mut fx = vec![Effect::Send(Signal::MediaConnected(PeerRef::an(peer)))];
        if self.state() == CallState::OutgoingRinging {
            self.aktiv_ausgehend(&mut fx);
        }
        fx
    }

    /// Die Peer-Verbindung ist gescheitert
    pub fn peer_failed(&mut self, message: String) -> Vec<Effect> {
        let Some(peer) = self.peer() else {
            return Vec::new();
        };
        let mut fx = vec![Effect::Send(Signal::EndCall(PeerRef::an(peer)))];
        self.beenden(Some(CallState::Error), &mut fx);
        fx.push(Effect::Emit(CallEvent::Error {
            context: ErrorContext::Call,
            message,
            fatal: false,
        }));
        fx
    }

    /// Fehler des Transports
    ///
    /// Nicht-fatale Fehler werden nur gemeldet, fatale beenden den Anruf.
    pub fn transport_error(&mut self, message: String, fatal: bool) -> Vec<Effect> {
        let mut fx = Vec::new();
        if fatal && self.is_busy() {
            let hatte_session = self.session.is_some();
            if let (true, Some(peer)) = (hatte_session, self.beenden(Some(CallState::Error), &mut fx)) {
                fx.push(Effect::Emit(CallEvent::CallEnded {
                    peer,
                    reason: EndReason::Failed,
                }));
            }
        }
        fx.push(Effect::Emit(CallEvent::Error {
            context: ErrorContext::Signaling,
            message,
            fatal,
        }));
        fx
    }
}

/// Fataler Fehler beim Aufbau einer Session
///
/// Nicht erreichbare Gegenstellen laufen ueber `UserNotOnline`, veraltete
/// oder abgebrochene Sessions melden nichts.
fn fehler_ereignis(fehler: &CallError) -> Option<CallEvent> {
    let context = match fehler {
        CallError::PeerNotOnline(_) | CallError::Superseded | CallError::Closed => return None,
        CallError::Media(_) => ErrorContext::Media,
        _ => ErrorContext::Call,
    };
    Some(CallEvent::Error {
        context,
        message: fehler.to_string(),
        fatal: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaError;
    use healthsync_protocol::{CallFailed, InProgress, SdpAnswer};

    fn patient() -> Identity {
        Identity::new("user-p1")
    }

    fn arzt() -> Identity {
        Identity::doctor(3)
    }

    fn eingehend(von: Identity) -> Signal {
        Signal::IncomingCall(healthsync_protocol::IncomingCall {
            caller_user_id: von,
            offer_sdp: "offer".into(),
        })
    }

    fn gesendet(fx: &[Effect]) -> Vec<&Signal> {
        fx.iter()
            .filter_map(|e| match e {
                Effect::Send(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    fn emittiert(fx: &[Effect]) -> Vec<&CallEvent> {
        fx.iter()
            .filter_map(|e| match e {
                Effect::Emit(ev) => Some(ev),
                _ => None,
            })
            .collect()
    }

    /// Automat mit ausgehendem Anruf im Zustand `OutgoingRinging`
    fn klingelt_ausgehend() -> CallMachine {
        let mut m = CallMachine::new(patient());
        m.make_call(arzt()).unwrap();
        m.outgoing_prepared(1, "offer".into()).unwrap();
        m
    }

    /// Automat mit eingehendem Anruf im Zustand `IncomingRinging`
    fn klingelt_eingehend() -> CallMachine {
        let mut m = CallMachine::new(arzt());
        m.signal(&eingehend(patient()));
        m
    }

    #[test]
    fn ausgehender_anruf_bis_aktiv() {
        let mut m = CallMachine::new(patient());
        let fx = m.make_call(arzt()).unwrap();
        assert_eq!(fx, vec![Effect::PrepareOutgoing { nr: 1, peer: arzt() }]);
        assert_eq!(m.state(), CallState::Idle);
        assert!(m.is_busy());

        let fx = m.outgoing_prepared(1, "sdp-o".into()).unwrap();
        assert_eq!(
            gesendet(&fx),
            vec![&Signal::CallUser(CallOffer {
                target_user_id: arzt(),
                caller_user_id: patient(),
                offer_sdp: "sdp-o".into(),
            })]
        );
        assert_eq!(m.state(), CallState::OutgoingRinging);

        let fx = m.signal(&Signal::CallAnswered(SdpAnswer {
            answer_sdp: "sdp-a".into(),
        }));
        assert!(fx.contains(&Effect::ApplyAnswer("sdp-a".into())));
        assert!(emittiert(&fx).contains(&&CallEvent::CallStarted {
            peer: arzt(),
            direction: CallDirection::Outgoing,
        }));
        assert_eq!(m.state(), CallState::Active);
    }

    #[test]
    fn kein_zweiter_anruf_waehrend_aktiv() {
        let mut m = CallMachine::new(patient());
        m.make_call(arzt()).unwrap();
        // Bereits waehrend der Vorbereitung reserviert
        assert_eq!(m.make_call(Identity::doctor(4)), Err(CallError::AlreadyActive));

        m.outgoing_prepared(1, "o".into()).unwrap();
        assert_eq!(m.make_call(Identity::doctor(4)), Err(CallError::AlreadyActive));

        let mut m = klingelt_eingehend();
        assert_eq!(m.make_call(patient()), Err(CallError::AlreadyActive));
        assert_eq!(m.session().unwrap().peer_id, patient());
    }

    #[test]
    fn eingehender_anruf_startet_timer() {
        let mut m = CallMachine::new(arzt());
        let fx = m.signal(&eingehend(patient()));
        assert_eq!(m.state(), CallState::IncomingRinging);
        assert!(fx.contains(&Effect::StartAutoAccept { nr: 1 }));
        assert!(emittiert(&fx).contains(&&CallEvent::IncomingCall { caller: patient() }));
    }

    #[test]
    fn besetzt_lehnt_zweiten_eingehenden_ab() {
        let mut m = klingelt_eingehend();
        let fx = m.signal(&eingehend(Identity::new("user-p2")));
        assert_eq!(
            fx,
            vec![Effect::Send(Signal::CallDeclined(PeerRef::an(Identity::new("user-p2"))))]
        );
        assert_eq!(m.session().unwrap().peer_id, patient());
    }

    #[test]
    fn annahme_ist_idempotent() {
        let mut m = klingelt_eingehend();
        let fx = m.accept().unwrap();
        assert_eq!(fx[0], Effect::CancelAutoAccept);
        assert!(matches!(fx[1], Effect::PrepareAnswer { nr: 1, .. }));

        // Zweiter Aufruf waehrend der Vorbereitung
        assert_eq!(m.accept().unwrap(), Vec::new());

        let fx = m.answer_prepared(1, "answer".into()).unwrap();
        assert_eq!(
            gesendet(&fx),
            vec![&Signal::CallAccepted(CallAccept {
                target_user_id: patient(),
                answer_sdp: "answer".into(),
            })]
        );
        assert_eq!(m.state(), CallState::Active);
        assert_eq!(m.accept().unwrap(), Vec::new());
    }

    #[test]
    fn annahme_ohne_anruf() {
        let mut m = CallMachine::new(arzt());
        assert_eq!(m.accept(), Err(CallError::NoIncomingCall));
        let mut m = klingelt_ausgehend();
        assert_eq!(m.accept(), Err(CallError::NoIncomingCall));
    }

    #[test]
    fn automatische_annahme_nur_fuer_aktuelle_session() {
        let mut m = klingelt_eingehend();
        assert!(m.auto_accept_due(99).is_empty());
        let fx = m.auto_accept_due(1);
        assert!(matches!(fx[1], Effect::PrepareAnswer { nr: 1, .. }));
        // Nach Start der Annahme feuert der Timer nicht erneut
        assert!(m.auto_accept_due(1).is_empty());
    }

    #[test]
    fn ablehnen_endet_immer_in_idle() {
        let mut faelle = vec![
            CallMachine::new(patient()),
            klingelt_ausgehend(),
            klingelt_eingehend(),
        ];
        let mut aktiv = klingelt_eingehend();
        aktiv.accept().unwrap();
        aktiv.answer_prepared(1, "a".into()).unwrap();
        faelle.push(aktiv);
        let mut vorbereitend = CallMachine::new(patient());
        vorbereitend.make_call(arzt()).unwrap();
        faelle.push(vorbereitend);

        for mut m in faelle {
            let fx = m.decline();
            assert_eq!(m.state(), CallState::Idle);
            assert!(!m.is_busy());
            assert!(fx.contains(&Effect::CancelAutoAccept));
        }
    }

    #[test]
    fn ablehnen_eingehend_sendet_call_declined() {
        let mut m = klingelt_eingehend();
        let fx = m.decline();
        assert_eq!(
            gesendet(&fx),
            vec![&Signal::CallDeclined(PeerRef::an(patient()))]
        );
        assert!(fx.contains(&Effect::ReleaseMedia));
    }

    #[test]
    fn auflegen_sendet_end_call() {
        let mut m = klingelt_ausgehend();
        m.signal(&Signal::MediaConnected(PeerRef::default()));
        assert_eq!(m.state(), CallState::Active);

        let fx = m.end_call();
        assert_eq!(gesendet(&fx), vec![&Signal::EndCall(PeerRef::an(arzt()))]);
        assert!(emittiert(&fx).contains(&&CallEvent::CallEnded {
            peer: arzt(),
            reason: EndReason::Local,
        }));
    }

    #[test]
    fn call_failed_nicht_online_und_besetzt() {
        let mut m = klingelt_ausgehend();
        let fx = m.signal(&Signal::CallFailed(CallFailed::nicht_online(arzt())));
        assert_eq!(m.state(), CallState::Idle);
        let ev = emittiert(&fx);
        assert!(ev.contains(&&CallEvent::StateChanged {
            from: CallState::OutgoingRinging,
            to: CallState::NotFound,
        }));
        assert!(ev.contains(&&CallEvent::UserNotOnline { peer: arzt() }));

        let mut m = klingelt_ausgehend();
        let fx = m.signal(&Signal::CallFailed(CallFailed::besetzt(arzt())));
        assert_eq!(m.state(), CallState::Idle);
        assert!(emittiert(&fx).contains(&&CallEvent::StateChanged {
            from: CallState::Busy,
            to: CallState::Idle,
        }));
    }

    #[test]
    fn abgelehnt_durch_gegenstelle() {
        let mut m = klingelt_ausgehend();
        let fx = m.signal(&Signal::CallDeclined(PeerRef::default()));
        assert_eq!(m.state(), CallState::Idle);
        assert!(emittiert(&fx).contains(&&CallEvent::CallDeclined { peer: arzt() }));
    }

    #[test]
    fn auf_anderem_geraet_angenommen() {
        let mut m = klingelt_eingehend();
        let fx = m.signal(&Signal::CallInProgress(InProgress {
            caller_user_id: Some(patient()),
            message: "Call answered on another device".into(),
        }));
        assert_eq!(m.state(), CallState::Idle);
        assert!(fx.contains(&Effect::CancelAutoAccept));
        assert!(matches!(
            emittiert(&fx).last(),
            Some(CallEvent::CallInProgress { .. })
        ));
    }

    #[test]
    fn gegenstelle_legt_auf() {
        let mut m = klingelt_ausgehend();
        let fx = m.signal(&Signal::DirectCallEnded(PeerRef::default()));
        assert_eq!(m.state(), CallState::Idle);
        assert!(emittiert(&fx).contains(&&CallEvent::CallEnded {
            peer: arzt(),
            reason: EndReason::Remote,
        }));
        // Ohne Session keine Wirkung
        assert!(m.signal(&Signal::CallEnded).is_empty());
    }

    #[test]
    fn veraltete_vorbereitung_wird_verworfen() {
        let mut m = CallMachine::new(patient());
        m.make_call(arzt()).unwrap();
        m.decline();
        assert_eq!(
            m.outgoing_prepared(1, "o".into()),
            Err(CallError::Superseded)
        );
        assert_eq!(m.state(), CallState::Idle);
        assert_eq!(m.discard_stale(), vec![Effect::ReleaseMedia, Effect::ClosePeer]);

        m.make_call(arzt()).unwrap();
        assert!(m.discard_stale().is_empty());
        assert!(m.outgoing_prepared(2, "o".into()).is_ok());
    }

    #[test]
    fn vorbereitung_scheitert_nicht_online() {
        let mut m = CallMachine::new(patient());
        m.make_call(arzt()).unwrap();
        let fx = m.outgoing_failed(1, &CallError::PeerNotOnline(arzt()));
        assert!(!m.is_busy());
        assert!(emittiert(&fx).contains(&&CallEvent::UserNotOnline { peer: arzt() }));
        // Nicht erreichbar ist kein Fehler, nur ein Verhandlungsergebnis
        assert!(!emittiert(&fx)
            .iter()
            .any(|e| matches!(e, CallEvent::Error { .. })));
    }

    #[test]
    fn medienfehler_beim_waehlen_ist_fatal() {
        let mut m = CallMachine::new(patient());
        m.make_call(arzt()).unwrap();
        let fehler = CallError::Media(MediaError::PermissionDenied);
        let fx = m.outgoing_failed(1, &fehler);

        assert!(!m.is_busy());
        assert!(emittiert(&fx).contains(&&CallEvent::Error {
            context: ErrorContext::Media,
            message: fehler.to_string(),
            fatal: true,
        }));
    }

    #[test]
    fn fehlgeschlagene_annahme_meldet_fehler() {
        let mut m = klingelt_eingehend();
        m.accept().unwrap();
        let fehler = CallError::Media(MediaError::NotFound);
        let fx = m.answer_failed(1, &fehler);

        assert_eq!(m.state(), CallState::Idle);
        assert_eq!(
            gesendet(&fx),
            vec![&Signal::CallDeclined(PeerRef::an(patient()))]
        );
        let ereignisse = emittiert(&fx);
        assert!(ereignisse.contains(&&CallEvent::CallEnded {
            peer: patient(),
            reason: EndReason::Failed,
        }));
        assert!(ereignisse.contains(&&CallEvent::Error {
            context: ErrorContext::Media,
            message: fehler.to_string(),
            fatal: true,
        }));

        // Peer-Fehler laufen unter dem Anruf-Kontext
        let mut m = klingelt_eingehend();
        m.accept().unwrap();
        let fx = m.answer_failed(1, &CallError::Peer("sdp kaputt".into()));
        assert!(emittiert(&fx).iter().any(|e| matches!(
            e,
            CallEvent::Error { context: ErrorContext::Call, fatal: true, .. }
        )));
    }

    #[test]
    fn ice_kandidaten_nur_mit_session() {
        let kandidat = serde_json::json!({"candidate": "c1"});
        let m = CallMachine::new(patient());
        assert!(m.local_candidate(kandidat.clone()).is_empty());

        let mut m = klingelt_ausgehend();
        let fx = m.local_candidate(kandidat.clone());
        assert_eq!(
            gesendet(&fx),
            vec![&Signal::IceCandidate(IceCandidate {
                target_user_id: Some(arzt()),
                candidate: kandidat.clone(),
            })]
        );
        let fx = m.signal(&Signal::IceCandidate(IceCandidate {
            target_user_id: None,
            candidate: kandidat.clone(),
        }));
        assert_eq!(fx, vec![Effect::AddRemoteCandidate(kandidat)]);
    }

    #[test]
    fn fataler_fehler_erzwingt_idle() {
        let mut m = klingelt_ausgehend();
        let fx = m.transport_error("weg".into(), false);
        assert_eq!(m.state(), CallState::OutgoingRinging);
        assert_eq!(fx.len(), 1);

        let fx = m.transport_error("kaputt".into(), true);
        assert_eq!(m.state(), CallState::Idle);
        assert!(emittiert(&fx).contains(&&CallEvent::StateChanged {
            from: CallState::Error,
            to: CallState::Idle,
        }));
    }

    #[test]
    fn eigene_medien_verbunden_erzwingt_aktiv() {
        let mut m = klingelt_ausgehend();
        let fx = m.local_media_connected();
        assert_eq!(gesendet(&fx), vec![&Signal::MediaConnected(PeerRef::an(arzt()))]);
        assert_eq!(m.state(), CallState::Active);
    }
}
