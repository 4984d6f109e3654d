//! Gemeinsamer Server-Zustand fuer den Signaling-Server
//!
//! Haelt Konfiguration, Registries und Broadcaster als geteilte Referenzen,
//! die sicher zwischen tokio-Tasks geteilt werden koennen.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::broadcast::{ConnectionId, EventBroadcaster};
use crate::calls::CallRegistry;
use crate::registry::PresenceRegistry;

/// Konfiguration fuer den Signaling-Server
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Anzeigename des Servers
    pub server_name: String,
    /// Maximale gleichzeitige Verbindungen
    pub max_verbindungen: u32,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden
    pub verbindungs_timeout_sek: u64,
    /// Intervall fuer das Aufraeumen verwaister Anrufe in Sekunden
    pub aufraeum_intervall_sek: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server_name: "HealthSync Signaling".to_string(),
            max_verbindungen: 1024,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            aufraeum_intervall_sek: 300,
        }
    }
}

/// Zaehler fuer Metriken, vom Server-Binary periodisch ausgelesen
#[derive(Debug, Default)]
pub struct SignalingStatistik {
    /// Weitergeleitete Call-Signale (Offer, Answer, ICE, Ende)
    pub weitergeleitet: AtomicU64,
    /// Beantwortete Praesenz-Anfragen
    pub praesenz_anfragen: AtomicU64,
    /// Registrierungen (inklusive Wiederholungen)
    pub registrierungen: AtomicU64,
}

impl SignalingStatistik {
    pub fn zaehlen(zaehler: &AtomicU64) {
        zaehler.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lesen(zaehler: &AtomicU64) -> u64 {
        zaehler.load(Ordering::Relaxed)
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    pub config: Arc<SignalingConfig>,
    /// Identitaet <-> Verbindungen
    pub registry: PresenceRegistry,
    /// Laufende Anrufe
    pub calls: CallRegistry,
    /// Send-Queues aller Verbindungen
    pub broadcaster: EventBroadcaster,
    pub statistik: SignalingStatistik,
    naechste_verbindung: AtomicU64,
    /// Startzeitpunkt des Servers (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    /// Erstellt einen neuen SignalingState
    pub fn neu(config: SignalingConfig) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            registry: PresenceRegistry::neu(),
            calls: CallRegistry::neu(),
            broadcaster: EventBroadcaster::neu(),
            statistik: SignalingStatistik::default(),
            naechste_verbindung: AtomicU64::new(1),
            start_time: Instant::now(),
        })
    }

    /// Vergibt die naechste Verbindungs-ID
    pub fn naechste_verbindung(&self) -> ConnectionId {
        ConnectionId(self.naechste_verbindung.fetch_add(1, Ordering::Relaxed))
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
