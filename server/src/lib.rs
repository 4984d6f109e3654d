//! healthsync-server – Bibliotheks-Root
//!
//! Setzt Signaling, Metriken und Health-Check zu einem lauffaehigen Server
//! zusammen und stellt den Einstiegspunkt fuer Integrationstests bereit.

pub mod config;

use anyhow::Result;
use config::ServerConfig;
use healthsync_observability::{HealthState, HealthsyncMetrics, SignalingSnapshot};
use healthsync_signaling::server_state::SignalingStatistik;
use healthsync_signaling::{SignalingServer, SignalingState};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
    state: Arc<SignalingState>,
    metriken: HealthsyncMetrics,
    health: HealthState,
}

/// Liest die aktuellen Zaehler aus dem Signaling-Zustand
pub fn snapshot_erstellen(state: &SignalingState) -> SignalingSnapshot {
    SignalingSnapshot {
        verbindungen: state.broadcaster.anzahl() as u64,
        identitaeten: state.registry.online_anzahl() as u64,
        anrufe: state.calls.anzahl() as u64,
        weitergeleitet: SignalingStatistik::lesen(&state.statistik.weitergeleitet),
        praesenz_anfragen: SignalingStatistik::lesen(&state.statistik.praesenz_anfragen),
        registrierungen: SignalingStatistik::lesen(&state.statistik.registrierungen),
    }
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Result<Self> {
        let state = SignalingState::neu(config.signaling_config());
        let metriken = HealthsyncMetrics::neu()?;
        Ok(Self {
            config,
            state,
            metriken,
            health: HealthState::neu(),
        })
    }

    /// Gemeinsamer Signaling-Zustand
    pub fn state(&self) -> &Arc<SignalingState> {
        &self.state
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Startet alle Server-Subsysteme und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let tcp_addr = ServerConfig::socket_addr(&self.config.tcp_bind_adresse())?;
        let listener = TcpListener::bind(tcp_addr).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let laufend = tokio::spawn(self.laufen(listener, shutdown_rx));

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        let _ = shutdown_tx.send(true);
        laufend.await??;
        Ok(())
    }

    /// Betreibt Signaling, Observability und Metrik-Uebernahme auf einem
    /// gebundenen Listener bis `shutdown_rx` ein `true`-Signal empfaengt
    pub async fn laufen(
        self,
        listener: TcpListener,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        tracing::info!(
            server_name = %self.config.server.name,
            tcp = %listener.local_addr()?,
            observability = self.config.observability.aktiviert,
            "Server startet"
        );

        // ----- Observability -----
        let observability = if self.config.observability.aktiviert {
            let addr = ServerConfig::socket_addr(&self.config.observability_bind_adresse())?;
            let metriken = self.metriken.clone();
            let health = self.health.clone();
            let rx = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                if let Err(e) =
                    healthsync_observability::observability_server_starten(addr, metriken, health, rx)
                        .await
                {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            }))
        } else {
            None
        };

        // ----- Metrik-Uebernahme -----
        let snapshot_task = {
            let state = Arc::clone(&self.state);
            let metriken = self.metriken.clone();
            let health = self.health.clone();
            let mut rx = shutdown_rx.clone();
            let intervall = Duration::from_secs(self.config.observability.snapshot_intervall_sek.max(1));
            tokio::spawn(async move {
                let mut takt = tokio::time::interval(intervall);
                takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = takt.tick() => {
                            let snapshot = snapshot_erstellen(&state);
                            metriken.uebernehmen(&snapshot);
                            health.registrierte_setzen(snapshot.identitaeten);
                        }
                        Ok(()) = rx.changed() => {
                            if *rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        // ----- Signaling -----
        let bind_addr = listener.local_addr()?;
        self.health.signaling_status_setzen(true);
        let ergebnis = SignalingServer::neu(Arc::clone(&self.state), bind_addr)
            .starten_mit_listener(listener, shutdown_rx)
            .await;
        self.health.signaling_status_setzen(false);

        let _ = snapshot_task.await;
        if let Some(task) = observability {
            let _ = task.await;
        }

        ergebnis?;
        tracing::info!("Server beendet");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthsync_core::Identity;
    use healthsync_signaling::ConnectionId;

    fn test_config() -> ServerConfig {
        let mut cfg = ServerConfig::default();
        cfg.netzwerk.bind_adresse = "127.0.0.1".into();
        cfg.observability.aktiviert = false;
        cfg
    }

    #[test]
    fn snapshot_liest_registries() {
        let server = Server::neu(test_config()).unwrap();
        let state = server.state();
        state.registry.registrieren(Identity::doctor(1), ConnectionId(1));
        state
            .calls
            .anlegen(Identity::new("user-p"), ConnectionId(2), Identity::doctor(1));
        SignalingStatistik::zaehlen(&state.statistik.registrierungen);

        let snapshot = snapshot_erstellen(state);
        assert_eq!(snapshot.identitaeten, 1);
        assert_eq!(snapshot.anrufe, 1);
        assert_eq!(snapshot.registrierungen, 1);
        assert_eq!(snapshot.verbindungen, 0);
    }

    #[tokio::test]
    async fn laeuft_bis_shutdown() {
        let server = Server::neu(test_config()).unwrap();
        let health = server.health().clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(server.laufen(listener, shutdown_rx));

        // Verbindungsaufbau muss moeglich sein
        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        assert!(health.signaling_aktiv());
        drop(stream);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("Server beendet sich")
            .unwrap()
            .unwrap();
        assert!(!health.signaling_aktiv());
    }
}
