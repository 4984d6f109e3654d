//! Call-Registry – Laufende Anrufe zwischen zwei Identitaeten
//!
//! Ein Anruf wird beim `call-user` angelegt und beim Ablehnen, Auflegen oder
//! Verbindungsverlust entfernt. Pro Paar (Anrufer, Ziel) existiert hoechstens
//! ein Eintrag; Anrufe die laenger als [`MAX_CALL_ALTER_SEK`] bestehen gelten als
//! verwaist und werden periodisch entfernt.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use healthsync_core::Identity;
use std::sync::Arc;

use crate::broadcast::ConnectionId;

/// Maximales Alter eines Anrufs bevor er als verwaist gilt
pub const MAX_CALL_ALTER_SEK: i64 = 60 * 60;

/// Ein laufender oder klingelnder Anruf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCall {
    pub call_id: String,
    pub caller: Identity,
    pub target: Identity,
    /// Verbindung die den Anruf gestartet hat
    pub caller_conn: ConnectionId,
    /// Verbindung die angenommen hat (`None` solange es klingelt)
    pub accepted_by: Option<ConnectionId>,
    pub gestartet: DateTime<Utc>,
}

impl ActiveCall {
    /// Gibt die jeweils andere Partei zurueck
    pub fn gegenueber(&self, identity: &Identity) -> &Identity {
        if &self.caller == identity {
            &self.target
        } else {
            &self.caller
        }
    }

    pub fn beteiligt(&self, identity: &Identity) -> bool {
        &self.caller == identity || &self.target == identity
    }

    pub fn ist_angenommen(&self) -> bool {
        self.accepted_by.is_some()
    }
}

fn call_id(caller: &Identity, target: &Identity) -> String {
    format!("{caller}-{target}")
}

/// Verwaltet alle laufenden Anrufe
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct CallRegistry {
    inner: Arc<DashMap<String, ActiveCall>>,
}

impl CallRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Legt einen neuen Anruf an
    ///
    /// Gibt `None` zurueck wenn zwischen beiden bereits ein Anruf besteht
    /// (in einer der beiden Richtungen).
    pub fn anlegen(
        &self,
        caller: Identity,
        caller_conn: ConnectionId,
        target: Identity,
    ) -> Option<ActiveCall> {
        if self.zwischen(&caller, &target).is_some() {
            return None;
        }

        let call = ActiveCall {
            call_id: call_id(&caller, &target),
            caller,
            target,
            caller_conn,
            accepted_by: None,
            gestartet: Utc::now(),
        };
        self.inner.insert(call.call_id.clone(), call.clone());
        tracing::info!(
            call_id = %call.call_id,
            caller = %call.caller,
            target = %call.target,
            "Anruf angelegt"
        );
        Some(call)
    }

    /// Markiert den Anruf `caller -> target` als angenommen
    pub fn annehmen(
        &self,
        caller: &Identity,
        target: &Identity,
        conn_id: ConnectionId,
    ) -> Option<ActiveCall> {
        let mut eintrag = self.inner.get_mut(&call_id(caller, target))?;
        eintrag.accepted_by = Some(conn_id);
        tracing::info!(call_id = %eintrag.call_id, conn = %conn_id, "Anruf angenommen");
        Some(eintrag.clone())
    }

    /// Sucht einen Anruf zwischen zwei Identitaeten, Richtung egal
    pub fn zwischen(&self, a: &Identity, b: &Identity) -> Option<ActiveCall> {
        self.inner
            .get(&call_id(a, b))
            .or_else(|| self.inner.get(&call_id(b, a)))
            .map(|c| c.clone())
    }

    /// Sucht einen Anruf zwischen `peer` und einer der eigenen Identitaeten
    pub fn mit_einer_von(&self, peer: &Identity, eigene: &[Identity]) -> Option<ActiveCall> {
        eigene.iter().find_map(|i| self.zwischen(i, peer))
    }

    /// Entfernt den Anruf zwischen zwei Identitaeten, Richtung egal
    pub fn entfernen_zwischen(&self, a: &Identity, b: &Identity) -> Option<ActiveCall> {
        let entfernt = self
            .inner
            .remove(&call_id(a, b))
            .or_else(|| self.inner.remove(&call_id(b, a)))
            .map(|(_, c)| c);
        if let Some(ref c) = entfernt {
            tracing::info!(call_id = %c.call_id, "Anruf entfernt");
        }
        entfernt
    }

    /// Alle Anrufe an denen eine Identitaet beteiligt ist
    pub fn fuer_identitaet(&self, identity: &Identity) -> Vec<ActiveCall> {
        self.inner
            .iter()
            .filter(|e| e.value().beteiligt(identity))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Gibt true zurueck wenn die Identitaet an irgendeinem Anruf beteiligt ist
    pub fn ist_beschaeftigt(&self, identity: &Identity) -> bool {
        self.inner.iter().any(|e| e.value().beteiligt(identity))
    }

    /// Entfernt Anrufe die aelter als `max_alter` sind
    pub fn aufraeumen(&self, max_alter: Duration) -> usize {
        let grenze = Utc::now() - max_alter;
        let vorher = self.inner.len();
        self.inner.retain(|id, call| {
            let behalten = call.gestartet > grenze;
            if !behalten {
                tracing::info!(call_id = %id, "Verwaisten Anruf entfernt");
            }
            behalten
        });
        vorher.saturating_sub(self.inner.len())
    }

    pub fn anzahl(&self) -> usize {
        self.inner.len()
    }
}
