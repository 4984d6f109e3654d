//! Message-Dispatcher – Routet Signale an die richtigen Handler
//!
//! Der Dispatcher empfaengt Signale von einer ClientConnection, bestimmt
//! den Handler und gibt die Antwort an die eigene Verbindung zurueck.
//! Signale die nur der Server versendet werden verworfen.

use healthsync_protocol::Signal;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::broadcast::ConnectionId;
use crate::error::SignalingResult;
use crate::handlers::{call_handler, presence_handler, register_handler};
use crate::server_state::SignalingState;

/// Dispatcher-Kontext – Informationen ueber die aktuelle Verbindung
#[derive(Debug, Clone)]
pub struct DispatcherContext {
    pub peer_addr: SocketAddr,
    pub conn_id: ConnectionId,
}

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    state: Arc<SignalingState>,
}

impl MessageDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    /// Verarbeitet ein eingehendes Signal und gibt die Antwort zurueck
    ///
    /// Gibt `None` zurueck wenn keine direkte Antwort gesendet werden soll.
    /// Fehler der Handler werden geloggt und nie an den Client gemeldet.
    pub fn dispatch(&self, signal: Signal, ctx: &DispatcherContext) -> Option<Signal> {
        let event = signal.event_name();
        match self.route(signal, ctx) {
            Ok(antwort) => antwort,
            Err(e) => {
                tracing::warn!(
                    conn = %ctx.conn_id,
                    peer = %ctx.peer_addr,
                    event,
                    fehler = %e,
                    "Signal verworfen"
                );
                None
            }
        }
    }

    fn route(&self, signal: Signal, ctx: &DispatcherContext) -> SignalingResult<Option<Signal>> {
        let state = &self.state;
        match signal {
            // -------------------------------------------------------------------
            // Registrierung & Praesenz
            // -------------------------------------------------------------------
            Signal::Register(identity) => {
                register_handler::handle_register(identity, ctx, state).map(Some)
            }
            Signal::CheckUserOnline(query) => Ok(Some(
                presence_handler::handle_check_user_online(query, state),
            )),

            // -------------------------------------------------------------------
            // Call-Signaling
            // -------------------------------------------------------------------
            Signal::CallUser(offer) => call_handler::handle_call_user(offer, ctx, state),
            Signal::CallAccepted(accept) => call_handler::handle_call_accepted(accept, ctx, state),
            Signal::CallDeclined(peer) => call_handler::handle_call_declined(peer, ctx, state),
            Signal::IceCandidate(kandidat) => {
                call_handler::handle_ice_candidate(kandidat, ctx, state)
            }
            Signal::EndCall(peer) | Signal::DirectCallEnded(peer) => {
                call_handler::handle_end_call(peer, ctx, state)
            }
            Signal::MediaConnected(peer) => call_handler::handle_media_connected(peer, ctx, state),

            // -------------------------------------------------------------------
            // Keepalive
            // -------------------------------------------------------------------
            Signal::Heartbeat => Ok(Some(Signal::HeartbeatResponse)),
            Signal::HeartbeatResponse => {
                tracing::trace!(conn = %ctx.conn_id, "Heartbeat-Antwort empfangen");
                Ok(None)
            }

            // -------------------------------------------------------------------
            // Nur Server -> Client
            // -------------------------------------------------------------------
            andere @ (Signal::Registered(_)
            | Signal::UserOnlineStatus(_)
            | Signal::UserOnline(_)
            | Signal::UserOffline(_)
            | Signal::IncomingCall(_)
            | Signal::CallAnswered(_)
            | Signal::CallInProgress(_)
            | Signal::CallFailed(_)
            | Signal::CallEnded) => {
                tracing::debug!(
                    conn = %ctx.conn_id,
                    event = andere.event_name(),
                    "Server-Signal vom Client ignoriert"
                );
                Ok(None)
            }
        }
    }

    /// Raeumt nach Verbindungsende auf (Registry, Anrufe, Broadcaster)
    pub fn client_cleanup(&self, conn_id: ConnectionId) {
        call_handler::handle_verbindungsende(conn_id, &self.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::SignalingConfig;
    use healthsync_core::Identity;

    fn ctx() -> DispatcherContext {
        DispatcherContext {
            peer_addr: "127.0.0.1:7000".parse().unwrap(),
            conn_id: ConnectionId(1),
        }
    }

    #[test]
    fn heartbeat_wird_beantwortet() {
        let d = MessageDispatcher::neu(SignalingState::neu(SignalingConfig::default()));
        assert_eq!(d.dispatch(Signal::Heartbeat, &ctx()), Some(Signal::HeartbeatResponse));
        assert_eq!(d.dispatch(Signal::HeartbeatResponse, &ctx()), None);
    }

    #[test]
    fn register_liefert_bestaetigung() {
        let state = SignalingState::neu(SignalingConfig::default());
        let d = MessageDispatcher::neu(Arc::clone(&state));
        let antwort = d.dispatch(Signal::Register(Identity::new("user-1")), &ctx());
        assert!(matches!(antwort, Some(Signal::Registered(_))));
        assert!(state.registry.ist_online(&Identity::new("user-1")));
    }

    #[test]
    fn fehler_und_server_signale_ohne_antwort() {
        let d = MessageDispatcher::neu(SignalingState::neu(SignalingConfig::default()));
        assert_eq!(d.dispatch(Signal::Register(Identity::new("")), &ctx()), None);
        assert_eq!(d.dispatch(Signal::CallEnded, &ctx()), None);
        assert_eq!(
            d.dispatch(Signal::UserOnline(Identity::doctor(1)), &ctx()),
            None
        );
    }

    #[test]
    fn cleanup_nimmt_identitaet_offline() {
        let state = SignalingState::neu(SignalingConfig::default());
        let d = MessageDispatcher::neu(Arc::clone(&state));
        d.dispatch(Signal::Register(Identity::doctor(2)), &ctx());
        d.client_cleanup(ConnectionId(1));
        assert!(!state.registry.ist_online(&Identity::doctor(2)));
    }
}
