//! Call-Handler – Vermittelt Offer, Answer, ICE-Kandidaten und Auflegen
//!
//! Der Server interpretiert SDP und Kandidaten nicht, er stellt sie nur der
//! jeweils anderen Partei zu. Vor der Annahme klingeln alle Verbindungen des
//! Ziels; danach laeuft alles ueber die annehmende Verbindung.

use healthsync_core::Identity;
use healthsync_protocol::signal::MELDUNG_ANDERES_GERAET;
use healthsync_protocol::{
    CallAccept, CallFailed, CallOffer, IceCandidate, InProgress, IncomingCall, PeerRef, SdpAnswer,
    Signal,
};
use std::sync::Arc;

use crate::broadcast::ConnectionId;
use crate::calls::ActiveCall;
use crate::dispatcher::DispatcherContext;
use crate::error::{SignalingError, SignalingResult};
use crate::server_state::{SignalingState, SignalingStatistik};

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

/// Verbindungen der Gegenstelle von `ich` in einem Anruf
fn gegenstelle(call: &ActiveCall, ich: &Identity, state: &SignalingState) -> Vec<ConnectionId> {
    if &call.caller == ich {
        match call.accepted_by {
            Some(conn) => vec![conn],
            None => state.registry.verbindungen(&call.target),
        }
    } else {
        vec![call.caller_conn]
    }
}

/// Stellt ein Signal der Gegenstelle zu, ohne Anruf an alle Verbindungen des Ziels
fn zustellen(
    ziel: &Identity,
    call: Option<&ActiveCall>,
    eigene: &[Identity],
    signal: Signal,
    state: &SignalingState,
) -> usize {
    let verbindungen = match call {
        Some(c) => {
            let ich = eigene
                .iter()
                .find(|i| c.beteiligt(i))
                .cloned()
                .unwrap_or_else(|| c.gegenueber(ziel).clone());
            gegenstelle(c, &ich, state)
        }
        None => state.registry.verbindungen(ziel),
    };
    SignalingStatistik::zaehlen(&state.statistik.weitergeleitet);
    state.broadcaster.an_verbindungen_senden(&verbindungen, &signal)
}

fn ziel_pflicht(peer: PeerRef, event: &str) -> SignalingResult<Identity> {
    peer.target_user_id
        .ok_or_else(|| SignalingError::protokoll(format!("{event} ohne targetUserId")))
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Verarbeitet `call-user`
///
/// Antwortet mit `call-failed` wenn das Ziel offline oder bereits in einem
/// Anruf ist, sonst klingeln alle Verbindungen des Ziels.
pub fn handle_call_user(
    offer: CallOffer,
    ctx: &DispatcherContext,
    state: &Arc<SignalingState>,
) -> SignalingResult<Option<Signal>> {
    let CallOffer {
        target_user_id: ziel,
        caller_user_id: anrufer,
        offer_sdp,
    } = offer;

    if !state.registry.ist_online(&ziel) {
        tracing::info!(caller = %anrufer, target = %ziel, "Anrufziel nicht online");
        return Ok(Some(Signal::CallFailed(CallFailed::nicht_online(ziel))));
    }

    if state.calls.ist_beschaeftigt(&ziel) {
        tracing::info!(caller = %anrufer, target = %ziel, "Anrufziel besetzt");
        return Ok(Some(Signal::CallFailed(CallFailed::besetzt(ziel))));
    }

    let Some(call) = state.calls.anlegen(anrufer.clone(), ctx.conn_id, ziel.clone()) else {
        return Ok(Some(Signal::CallFailed(CallFailed::besetzt(ziel))));
    };

    let signal = Signal::IncomingCall(IncomingCall {
        caller_user_id: anrufer,
        offer_sdp,
    });
    let verbindungen = state.registry.verbindungen(&ziel);
    let zugestellt = state.broadcaster.an_verbindungen_senden(&verbindungen, &signal);
    SignalingStatistik::zaehlen(&state.statistik.weitergeleitet);

    tracing::info!(call_id = %call.call_id, geraete = zugestellt, "Eingehender Anruf zugestellt");
    Ok(None)
}

/// Verarbeitet `call-accepted`
///
/// `targetUserId` ist der Anrufer. Weitere Geraete des Angerufenen werden
/// mit `call-in-progress` informiert.
pub fn handle_call_accepted(
    accept: CallAccept,
    ctx: &DispatcherContext,
    state: &Arc<SignalingState>,
) -> SignalingResult<Option<Signal>> {
    let anrufer = accept.target_user_id;
    let eigene = state.registry.identitaeten(ctx.conn_id);

    let Some((angerufener, call)) = eigene
        .iter()
        .find_map(|i| state.calls.annehmen(&anrufer, i, ctx.conn_id).map(|c| (i.clone(), c)))
    else {
        return Err(SignalingError::protokoll(format!(
            "call-accepted ohne klingelnden Anruf von {anrufer}"
        )));
    };

    let weitere: Vec<ConnectionId> = state
        .registry
        .verbindungen(&angerufener)
        .into_iter()
        .filter(|c| *c != ctx.conn_id)
        .collect();
    state.broadcaster.an_verbindungen_senden(
        &weitere,
        &Signal::CallInProgress(InProgress {
            caller_user_id: Some(anrufer.clone()),
            message: MELDUNG_ANDERES_GERAET.to_string(),
        }),
    );

    state.broadcaster.an_verbindung_senden(
        call.caller_conn,
        Signal::CallAnswered(SdpAnswer {
            answer_sdp: accept.answer_sdp,
        }),
    );
    SignalingStatistik::zaehlen(&state.statistik.weitergeleitet);

    tracing::info!(call_id = %call.call_id, weitere_geraete = weitere.len(), "Anruf verbunden");
    Ok(None)
}

/// Verarbeitet `call-declined` (Angerufener lehnt ab oder Anrufer bricht ab)
pub fn handle_call_declined(
    peer: PeerRef,
    ctx: &DispatcherContext,
    state: &Arc<SignalingState>,
) -> SignalingResult<Option<Signal>> {
    let ziel = ziel_pflicht(peer, "call-declined")?;
    let eigene = state.registry.identitaeten(ctx.conn_id);

    let call = state.calls.mit_einer_von(&ziel, &eigene);
    if let Some(ref c) = call {
        state.calls.entfernen_zwischen(&c.caller, &c.target);
    }
    let zugestellt = zustellen(
        &ziel,
        call.as_ref(),
        &eigene,
        Signal::CallDeclined(PeerRef::default()),
        state,
    );

    tracing::info!(target = %ziel, zugestellt, "Anruf abgelehnt");
    Ok(None)
}

/// Verarbeitet `ice-candidate`
pub fn handle_ice_candidate(
    kandidat: IceCandidate,
    ctx: &DispatcherContext,
    state: &Arc<SignalingState>,
) -> SignalingResult<Option<Signal>> {
    let ziel = kandidat
        .target_user_id
        .ok_or_else(|| SignalingError::protokoll("ice-candidate ohne targetUserId"))?;
    let eigene = state.registry.identitaeten(ctx.conn_id);
    let call = state.calls.mit_einer_von(&ziel, &eigene);

    let signal = Signal::IceCandidate(IceCandidate {
        target_user_id: None,
        candidate: kandidat.candidate,
    });
    let zugestellt = zustellen(&ziel, call.as_ref(), &eigene, signal, state);
    tracing::trace!(target = %ziel, zugestellt, "ICE-Kandidat weitergeleitet");
    Ok(None)
}

/// Verarbeitet `end-call` und `direct-call-ended`
///
/// Ohne Ziel werden alle Anrufe der Verbindung beendet.
pub fn handle_end_call(
    peer: PeerRef,
    ctx: &DispatcherContext,
    state: &Arc<SignalingState>,
) -> SignalingResult<Option<Signal>> {
    let eigene = state.registry.identitaeten(ctx.conn_id);

    match peer.target_user_id {
        Some(ziel) => {
            let call = state.calls.mit_einer_von(&ziel, &eigene);
            if let Some(ref c) = call {
                state.calls.entfernen_zwischen(&c.caller, &c.target);
            }
            let zugestellt = zustellen(&ziel, call.as_ref(), &eigene, Signal::CallEnded, state);
            tracing::info!(target = %ziel, zugestellt, "Anruf beendet");
        }
        None => {
            for ich in &eigene {
                for call in state.calls.fuer_identitaet(ich) {
                    state.calls.entfernen_zwischen(&call.caller, &call.target);
                    let verbindungen = gegenstelle(&call, ich, state);
                    state
                        .broadcaster
                        .an_verbindungen_senden(&verbindungen, &Signal::CallEnded);
                    tracing::info!(call_id = %call.call_id, "Anruf beendet (ohne Ziel)");
                }
            }
        }
    }
    Ok(None)
}

/// Verarbeitet `media-connected`: die Gegenstelle erfaehrt dass Medien fliessen
pub fn handle_media_connected(
    peer: PeerRef,
    ctx: &DispatcherContext,
    state: &Arc<SignalingState>,
) -> SignalingResult<Option<Signal>> {
    let ziel = ziel_pflicht(peer, "media-connected")?;
    let eigene = state.registry.identitaeten(ctx.conn_id);
    let call = state.calls.mit_einer_von(&ziel, &eigene);

    zustellen(
        &ziel,
        call.as_ref(),
        &eigene,
        Signal::MediaConnected(PeerRef::default()),
        state,
    );
    Ok(None)
}

/// Aufraeumen nach Verbindungsende
///
/// Identitaeten ohne verbleibende Verbindung beenden ihre Anrufe (die
/// Gegenstelle erhaelt `call-ended`) und werden als `user-offline`
/// gemeldet.
pub fn handle_verbindungsende(conn_id: ConnectionId, state: &Arc<SignalingState>) {
    let offline = state.registry.verbindung_entfernen(conn_id);
    state.broadcaster.client_entfernen(conn_id);

    for identity in offline {
        for call in state.calls.fuer_identitaet(&identity) {
            state.calls.entfernen_zwischen(&call.caller, &call.target);
            let verbindungen = gegenstelle(&call, &identity, state);
            state
                .broadcaster
                .an_verbindungen_senden(&verbindungen, &Signal::CallEnded);
            tracing::info!(
                call_id = %call.call_id,
                identity = %identity,
                "Anruf durch Verbindungsverlust beendet"
            );
        }

        state
            .broadcaster
            .an_alle_ausser_senden(conn_id, &Signal::UserOffline(identity));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::SignalingConfig;
    use healthsync_protocol::CallFailure;
    use tokio::sync::mpsc;

    struct Teilnehmer {
        ctx: DispatcherContext,
        rx: mpsc::Receiver<Signal>,
    }

    fn verbinden(state: &Arc<SignalingState>, conn: u64, identity: &Identity) -> Teilnehmer {
        let conn_id = ConnectionId(conn);
        let rx = state.broadcaster.client_registrieren(conn_id);
        state.registry.registrieren(identity.clone(), conn_id);
        Teilnehmer {
            ctx: DispatcherContext {
                peer_addr: "127.0.0.1:6000".parse().unwrap(),
                conn_id,
            },
            rx,
        }
    }

    fn patient() -> Identity {
        Identity::new("user-pat")
    }

    fn arzt() -> Identity {
        Identity::doctor(11)
    }

    fn anrufen(state: &Arc<SignalingState>, von: &Teilnehmer) -> Option<Signal> {
        handle_call_user(
            CallOffer {
                target_user_id: arzt(),
                caller_user_id: patient(),
                offer_sdp: "offer".into(),
            },
            &von.ctx,
            state,
        )
        .unwrap()
    }

    #[test]
    fn offline_ziel_liefert_call_failed() {
        let state = SignalingState::neu(SignalingConfig::default());
        let p = verbinden(&state, 1, &patient());

        match anrufen(&state, &p) {
            Some(Signal::CallFailed(f)) => assert_eq!(f.grund(), CallFailure::NichtOnline),
            andere => panic!("Erwartet call-failed, erhalten {andere:?}"),
        }
        assert_eq!(state.calls.anzahl(), 0);
    }

    #[tokio::test]
    async fn klingeln_annehmen_und_zweitgeraet() {
        let state = SignalingState::neu(SignalingConfig::default());
        let mut p = verbinden(&state, 1, &patient());
        let mut a1 = verbinden(&state, 2, &arzt());
        let mut a2 = verbinden(&state, 3, &arzt());

        assert!(anrufen(&state, &p).is_none());
        for geraet in [&mut a1, &mut a2] {
            match geraet.rx.recv().await {
                Some(Signal::IncomingCall(ic)) => assert_eq!(ic.caller_user_id, patient()),
                andere => panic!("Erwartet incoming-call, erhalten {andere:?}"),
            }
        }

        handle_call_accepted(
            CallAccept {
                target_user_id: patient(),
                answer_sdp: "answer".into(),
            },
            &a1.ctx,
            &state,
        )
        .unwrap();

        assert_eq!(
            p.rx.recv().await,
            Some(Signal::CallAnswered(SdpAnswer {
                answer_sdp: "answer".into()
            }))
        );
        match a2.rx.recv().await {
            Some(Signal::CallInProgress(ip)) => assert_eq!(ip.message, MELDUNG_ANDERES_GERAET),
            andere => panic!("Erwartet call-in-progress, erhalten {andere:?}"),
        }

        // Nach Annahme gehen Kandidaten nur an das annehmende Geraet
        handle_ice_candidate(
            IceCandidate {
                target_user_id: Some(arzt()),
                candidate: serde_json::json!({"candidate": "c1"}),
            },
            &p.ctx,
            &state,
        )
        .unwrap();
        assert!(matches!(a1.rx.recv().await, Some(Signal::IceCandidate(_))));
        assert!(a2.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn besetztes_ziel() {
        let state = SignalingState::neu(SignalingConfig::default());
        let p = verbinden(&state, 1, &patient());
        let _a = verbinden(&state, 2, &arzt());
        let zweiter = Identity::new("user-zwei");
        let z = verbinden(&state, 3, &zweiter);

        anrufen(&state, &p);
        let antwort = handle_call_user(
            CallOffer {
                target_user_id: arzt(),
                caller_user_id: zweiter,
                offer_sdp: "offer".into(),
            },
            &z.ctx,
            &state,
        )
        .unwrap();
        match antwort {
            Some(Signal::CallFailed(f)) => assert_eq!(f.grund(), CallFailure::Besetzt),
            andere => panic!("Erwartet call-failed, erhalten {andere:?}"),
        }
    }

    #[tokio::test]
    async fn ablehnen_benachrichtigt_anrufer() {
        let state = SignalingState::neu(SignalingConfig::default());
        let mut p = verbinden(&state, 1, &patient());
        let mut a = verbinden(&state, 2, &arzt());

        anrufen(&state, &p);
        a.rx.recv().await;

        handle_call_declined(PeerRef::an(patient()), &a.ctx, &state).unwrap();
        assert_eq!(
            p.rx.recv().await,
            Some(Signal::CallDeclined(PeerRef::default()))
        );
        assert_eq!(state.calls.anzahl(), 0);
    }

    #[tokio::test]
    async fn auflegen_und_ohne_ziel() {
        let state = SignalingState::neu(SignalingConfig::default());
        let mut p = verbinden(&state, 1, &patient());
        let a = verbinden(&state, 2, &arzt());

        anrufen(&state, &p);
        handle_end_call(PeerRef::default(), &a.ctx, &state).unwrap();
        assert_eq!(p.rx.recv().await, Some(Signal::CallEnded));
        assert_eq!(state.calls.anzahl(), 0);
    }

    #[tokio::test]
    async fn verbindungsende_beendet_anrufe_und_meldet_offline() {
        let state = SignalingState::neu(SignalingConfig::default());
        let mut p = verbinden(&state, 1, &patient());
        let mut a = verbinden(&state, 2, &arzt());

        anrufen(&state, &p);
        a.rx.recv().await;

        handle_verbindungsende(ConnectionId(1), &state);
        assert_eq!(a.rx.recv().await, Some(Signal::CallEnded));
        assert_eq!(a.rx.recv().await, Some(Signal::UserOffline(patient())));
        assert!(!state.registry.ist_online(&patient()));
        assert_eq!(state.calls.anzahl(), 0);
        // Eigene Queue ist geschlossen
        assert_eq!(p.rx.recv().await, None);
    }

    #[test]
    fn annahme_ohne_anruf_ist_fehler() {
        let state = SignalingState::neu(SignalingConfig::default());
        let a = verbinden(&state, 2, &arzt());
        let ergebnis = handle_call_accepted(
            CallAccept {
                target_user_id: patient(),
                answer_sdp: "x".into(),
            },
            &a.ctx,
            &state,
        );
        assert!(matches!(ergebnis, Err(SignalingError::Protokoll(_))));
    }
}
