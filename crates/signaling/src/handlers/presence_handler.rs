//! Presence-Handler – Beantwortet `check-user-online`

use healthsync_protocol::{PresenceQuery, PresenceStatus, Signal};
use std::sync::Arc;

use crate::server_state::{SignalingState, SignalingStatistik};

/// Beantwortet eine Praesenz-Anfrage, die `requestId` wird als `responseId` gespiegelt
pub fn handle_check_user_online(query: PresenceQuery, state: &Arc<SignalingState>) -> Signal {
    SignalingStatistik::zaehlen(&state.statistik.praesenz_anfragen);
    let is_online = state.registry.ist_online(&query.user_id);

    tracing::debug!(
        user_id = %query.user_id,
        request_id = %query.request_id,
        is_online,
        "Praesenz-Anfrage beantwortet"
    );

    Signal::UserOnlineStatus(PresenceStatus {
        user_id: query.user_id,
        is_online,
        response_id: Some(query.request_id),
    })
}
