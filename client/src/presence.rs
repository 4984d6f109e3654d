//! Online-Abfrage einer Gegenstelle
//!
//! Sendet `check-user-online` mit eigener Request-ID und wartet auf die
//! passende `user-online-status`-Antwort. Bleibt sie aus, wird bis zu drei
//! Mal im Abstand von 500ms erneut gefragt. Ein Ergebnis gibt es immer:
//! ohne Antwort gilt die Gegenstelle als offline.

use healthsync_core::Identity;
use healthsync_protocol::{PresenceStatus, Signal};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::SignalChannel;
use crate::config::PresenceSettings;
use crate::retry::{retry, RetryOutcome, RetryPolicy};

#[derive(Clone)]
pub struct PresenceQuery {
    channel: Arc<dyn SignalChannel>,
    settings: PresenceSettings,
    cancel: CancellationToken,
}

impl PresenceQuery {
    pub fn new(
        channel: Arc<dyn SignalChannel>,
        settings: PresenceSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel,
            settings,
            cancel,
        }
    }

    /// Prueft ob `user` gerade beim Server registriert ist
    pub async fn check_user_online(&self, user: &Identity) -> bool {
        let policy = RetryPolicy::limited(self.settings.attempts, self.settings.retry_delay());
        match retry(policy, &self.cancel, move |versuch| self.versuch(user, versuch)).await {
            RetryOutcome::Done(online) => {
                tracing::debug!(user = %user, online, "Online-Status erhalten");
                online
            }
            RetryOutcome::Exhausted => {
                tracing::warn!(user = %user, "Keine Antwort auf Online-Abfrage, gilt als offline");
                false
            }
            RetryOutcome::Cancelled => false,
        }
    }

    async fn versuch(&self, user: &Identity, versuch: u32) -> Option<bool> {
        if !self.channel.is_connected() {
            tracing::debug!(user = %user, versuch, "Nicht verbunden, Online-Abfrage wird wiederholt");
            return None;
        }

        // Vor dem Senden abonnieren, sonst kann die Antwort verloren gehen
        let mut signale = self.channel.signals();
        let request_id = Uuid::new_v4().to_string();
        if !self
            .channel
            .send(Signal::check_user_online(user.clone(), request_id.clone()))
        {
            return None;
        }

        let antwort = async {
            loop {
                match signale.recv().await {
                    Ok(Signal::UserOnlineStatus(status)) if passt(&status, user, &request_id) => {
                        return Some(status.is_online);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(verpasst = n, "Signale verpasst waehrend Online-Abfrage");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        };

        match tokio::time::timeout(self.settings.attempt_timeout(), antwort).await {
            Ok(ergebnis) => ergebnis,
            Err(_) => {
                tracing::debug!(user = %user, versuch, "Zeitlimit der Online-Abfrage");
                None
            }
        }
    }
}

/// Antworten werden ueber die Request-ID zugeordnet, aeltere Server liefern
/// nur die Identitaet
fn passt(status: &PresenceStatus, user: &Identity, request_id: &str) -> bool {
    match &status.response_id {
        Some(id) => id == request_id,
        None => &status.user_id == user,
    }
}
