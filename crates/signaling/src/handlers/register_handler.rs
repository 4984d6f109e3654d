//! Register-Handler – Identitaet an eine Verbindung binden

use healthsync_core::Identity;
use healthsync_protocol::{RegisteredAck, Signal};
use std::sync::Arc;

use crate::dispatcher::DispatcherContext;
use crate::error::{SignalingError, SignalingResult};
use crate::server_state::{SignalingState, SignalingStatistik};

/// Verarbeitet `register`
///
/// Bei der ersten Verbindung einer Identitaet erhalten alle anderen
/// Verbindungen ein `user-online`. Die eigene Verbindung bekommt immer
/// ein `registered` als Bestaetigung, auch bei Wiederholungen.
pub fn handle_register(
    identity: Identity,
    ctx: &DispatcherContext,
    state: &Arc<SignalingState>,
) -> SignalingResult<Signal> {
    if identity.ist_leer() {
        return Err(SignalingError::protokoll("Leere Identitaet bei register"));
    }

    SignalingStatistik::zaehlen(&state.statistik.registrierungen);
    let erste = state.registry.registrieren(identity.clone(), ctx.conn_id);

    if erste {
        let anzahl = state
            .broadcaster
            .an_alle_ausser_senden(ctx.conn_id, &Signal::UserOnline(identity.clone()));
        tracing::debug!(identity = %identity, empfaenger = anzahl, "user-online verteilt");
    }

    Ok(Signal::Registered(RegisteredAck { user_id: identity }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ConnectionId;
    use crate::server_state::SignalingConfig;

    fn ctx(conn: u64) -> DispatcherContext {
        DispatcherContext {
            peer_addr: "127.0.0.1:5000".parse().unwrap(),
            conn_id: ConnectionId(conn),
        }
    }

    #[tokio::test]
    async fn erste_registrierung_wird_verteilt() {
        let state = SignalingState::neu(SignalingConfig::default());
        let mut beobachter = state.broadcaster.client_registrieren(ConnectionId(2));
        let _eigene = state.broadcaster.client_registrieren(ConnectionId(1));

        let antwort = handle_register(Identity::doctor(5), &ctx(1), &state).unwrap();
        assert_eq!(
            antwort,
            Signal::Registered(RegisteredAck {
                user_id: Identity::doctor(5)
            })
        );
        assert_eq!(
            beobachter.recv().await,
            Some(Signal::UserOnline(Identity::doctor(5)))
        );

        // Wiederholung: Bestaetigung ja, kein erneutes user-online
        handle_register(Identity::doctor(5), &ctx(1), &state).unwrap();
        assert!(beobachter.try_recv().is_err());
    }

    #[test]
    fn leere_identitaet_ist_protokollfehler() {
        let state = SignalingState::neu(SignalingConfig::default());
        let ergebnis = handle_register(Identity::new(""), &ctx(1), &state);
        assert!(matches!(ergebnis, Err(SignalingError::Protokoll(_))));
        assert_eq!(state.registry.online_anzahl(), 0);
    }
}
