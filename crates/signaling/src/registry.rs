//! Presence-Registry – Welche Identitaet ist ueber welche Verbindungen erreichbar
//!
//! Eine Identitaet gilt als online solange mindestens eine Verbindung sie
//! registriert hat. Eine Verbindung kann mehrere Identitaeten tragen
//! (z.B. Patienten-Instanz und Arzt-Identitaet im Doktor-Modus).
//! Aenderungen werden als [`PresenceEvent`] an Subscriber verteilt.

use dashmap::DashMap;
use healthsync_core::Identity;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::broadcast::ConnectionId;

/// Events die die Registry versendet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// Erste Verbindung einer Identitaet
    Online(Identity),
    /// Letzte Verbindung einer Identitaet wurde entfernt
    Offline(Identity),
}

/// Groesse des Broadcast-Kanals fuer Presence-Events
const EVENT_KANAL_GROESSE: usize = 256;

/// Verwaltet Identitaet <-> Verbindung
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<PresenceRegistryInner>,
}

struct PresenceRegistryInner {
    /// Identitaet -> Verbindungen in Registrierungsreihenfolge
    identitaeten: DashMap<Identity, Vec<ConnectionId>>,
    /// Verbindung -> registrierte Identitaeten
    verbindungen: DashMap<ConnectionId, Vec<Identity>>,
    event_tx: broadcast::Sender<PresenceEvent>,
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::neu()
    }
}

impl PresenceRegistry {
    /// Erstellt eine leere Registry
    pub fn neu() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_KANAL_GROESSE);
        Self {
            inner: Arc::new(PresenceRegistryInner {
                identitaeten: DashMap::new(),
                verbindungen: DashMap::new(),
                event_tx,
            }),
        }
    }

    /// Registriert eine Identitaet fuer eine Verbindung
    ///
    /// Gibt `true` zurueck wenn dies die erste Verbindung der Identitaet ist.
    /// Wiederholte Registrierungen derselben Verbindung sind idempotent.
    pub fn registrieren(&self, identity: Identity, conn_id: ConnectionId) -> bool {
        let erste = {
            let mut eintrag = self.inner.identitaeten.entry(identity.clone()).or_default();
            if eintrag.contains(&conn_id) {
                return false;
            }
            eintrag.push(conn_id);
            eintrag.len() == 1
        };

        self.inner
            .verbindungen
            .entry(conn_id)
            .or_default()
            .push(identity.clone());

        if erste {
            tracing::info!(identity = %identity, conn = %conn_id, "Identitaet online");
            let _ = self.inner.event_tx.send(PresenceEvent::Online(identity));
        } else {
            tracing::debug!(identity = %identity, conn = %conn_id, "Weitere Verbindung registriert");
        }
        erste
    }

    /// Entfernt eine Verbindung aus allen Identitaeten
    ///
    /// Gibt die Identitaeten zurueck, die damit keine Verbindung mehr haben.
    pub fn verbindung_entfernen(&self, conn_id: ConnectionId) -> Vec<Identity> {
        let Some((_, identitaeten)) = self.inner.verbindungen.remove(&conn_id) else {
            return Vec::new();
        };

        let mut offline = Vec::new();
        for identity in identitaeten {
            let letzte = match self.inner.identitaeten.get_mut(&identity) {
                Some(mut conns) => {
                    conns.retain(|c| *c != conn_id);
                    conns.is_empty()
                }
                None => false,
            };
            if letzte {
                self.inner
                    .identitaeten
                    .remove_if(&identity, |_, conns| conns.is_empty());
                tracing::info!(identity = %identity, conn = %conn_id, "Identitaet offline");
                let _ = self
                    .inner
                    .event_tx
                    .send(PresenceEvent::Offline(identity.clone()));
                offline.push(identity);
            }
        }
        offline
    }

    /// Gibt true zurueck wenn mindestens eine Verbindung die Identitaet traegt
    pub fn ist_online(&self, identity: &Identity) -> bool {
        self.inner
            .identitaeten
            .get(identity)
            .map(|c| !c.is_empty())
            .unwrap_or(false)
    }

    /// Verbindungen einer Identitaet in Registrierungsreihenfolge
    pub fn verbindungen(&self, identity: &Identity) -> Vec<ConnectionId> {
        self.inner
            .identitaeten
            .get(identity)
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Identitaeten die eine Verbindung registriert hat
    pub fn identitaeten(&self, conn_id: ConnectionId) -> Vec<Identity> {
        self.inner
            .verbindungen
            .get(&conn_id)
            .map(|i| i.clone())
            .unwrap_or_default()
    }

    /// Anzahl der Identitaeten mit mindestens einer Verbindung
    pub fn online_anzahl(&self) -> usize {
        self.inner.identitaeten.len()
    }

    /// Abonniert Presence-Events
    pub fn events_abonnieren(&self) -> broadcast::Receiver<PresenceEvent> {
        self.inner.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arzt() -> Identity {
        Identity::doctor(1)
    }

    #[test]
    fn erste_und_weitere_verbindung() {
        let r = PresenceRegistry::neu();
        assert!(r.registrieren(arzt(), ConnectionId(1)));
        assert!(!r.registrieren(arzt(), ConnectionId(2)));
        assert!(!r.registrieren(arzt(), ConnectionId(2)));

        assert!(r.ist_online(&arzt()));
        assert_eq!(r.verbindungen(&arzt()), vec![ConnectionId(1), ConnectionId(2)]);
        assert_eq!(r.online_anzahl(), 1);
    }

    #[test]
    fn offline_erst_nach_letzter_verbindung() {
        let r = PresenceRegistry::neu();
        r.registrieren(arzt(), ConnectionId(1));
        r.registrieren(arzt(), ConnectionId(2));

        assert!(r.verbindung_entfernen(ConnectionId(1)).is_empty());
        assert!(r.ist_online(&arzt()));

        assert_eq!(r.verbindung_entfernen(ConnectionId(2)), vec![arzt()]);
        assert!(!r.ist_online(&arzt()));
        assert_eq!(r.online_anzahl(), 0);
    }

    #[test]
    fn verbindung_mit_mehreren_identitaeten() {
        let r = PresenceRegistry::neu();
        let patient = Identity::new("user-abc");
        r.registrieren(patient.clone(), ConnectionId(7));
        r.registrieren(arzt(), ConnectionId(7));

        assert_eq!(r.identitaeten(ConnectionId(7)), vec![patient.clone(), arzt()]);

        let mut offline = r.verbindung_entfernen(ConnectionId(7));
        offline.sort();
        assert_eq!(offline, vec![arzt(), patient]);
    }

    #[test]
    fn unbekannte_verbindung_entfernen() {
        let r = PresenceRegistry::neu();
        assert!(r.verbindung_entfernen(ConnectionId(99)).is_empty());
    }

    #[tokio::test]
    async fn events_werden_verteilt() {
        let r = PresenceRegistry::neu();
        let mut rx = r.events_abonnieren();

        r.registrieren(arzt(), ConnectionId(1));
        r.verbindung_entfernen(ConnectionId(1));

        assert_eq!(rx.recv().await.unwrap(), PresenceEvent::Online(arzt()));
        assert_eq!(rx.recv().await.unwrap(), PresenceEvent::Offline(arzt()));
    }
}
