//! Prometheus-kompatible Metriken fuer HealthSync
//!
//! Registrierte Metriken:
//! - `healthsync_connections` – Gauge: Offene TCP-Verbindungen
//! - `healthsync_registered_identities` – Gauge: Identitaeten mit mindestens einer Verbindung
//! - `healthsync_active_calls` – Gauge: Klingelnde oder verbundene Anrufe
//! - `healthsync_relayed_signals_total` – Counter: Weitergeleitete Call-Signale
//! - `healthsync_presence_queries_total` – Counter: Beantwortete Praesenz-Anfragen
//! - `healthsync_registrations_total` – Counter: Registrierungen inklusive Wiederholungen

use anyhow::Result;
use axum::{extract::State, http, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Momentaufnahme der Server-Zaehler
///
/// Die Zaehler sind monoton; [`HealthsyncMetrics::uebernehmen`] rechnet
/// sie in Counter-Inkremente um.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalingSnapshot {
    pub verbindungen: u64,
    pub identitaeten: u64,
    pub anrufe: u64,
    pub weitergeleitet: u64,
    pub praesenz_anfragen: u64,
    pub registrierungen: u64,
}

/// Alle HealthSync-Prometheus-Metriken
#[derive(Clone)]
pub struct HealthsyncMetrics {
    pub registry: Arc<Registry>,

    pub connections: IntGauge,
    pub registered_identities: IntGauge,
    pub active_calls: IntGauge,
    pub relayed_signals_total: IntCounter,
    pub presence_queries_total: IntCounter,
    pub registrations_total: IntCounter,
}

impl HealthsyncMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connections = IntGauge::with_opts(Opts::new(
            "healthsync_connections",
            "Anzahl offener TCP-Verbindungen",
        ))?;
        registry.register(Box::new(connections.clone()))?;

        let registered_identities = IntGauge::with_opts(Opts::new(
            "healthsync_registered_identities",
            "Anzahl registrierter Identitaeten",
        ))?;
        registry.register(Box::new(registered_identities.clone()))?;

        let active_calls = IntGauge::with_opts(Opts::new(
            "healthsync_active_calls",
            "Anzahl klingelnder oder verbundener Anrufe",
        ))?;
        registry.register(Box::new(active_calls.clone()))?;

        let relayed_signals_total = IntCounter::with_opts(Opts::new(
            "healthsync_relayed_signals_total",
            "Gesamtanzahl weitergeleiteter Call-Signale",
        ))?;
        registry.register(Box::new(relayed_signals_total.clone()))?;

        let presence_queries_total = IntCounter::with_opts(Opts::new(
            "healthsync_presence_queries_total",
            "Gesamtanzahl beantworteter Praesenz-Anfragen",
        ))?;
        registry.register(Box::new(presence_queries_total.clone()))?;

        let registrations_total = IntCounter::with_opts(Opts::new(
            "healthsync_registrations_total",
            "Gesamtanzahl Registrierungen",
        ))?;
        registry.register(Box::new(registrations_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connections,
            registered_identities,
            active_calls,
            relayed_signals_total,
            presence_queries_total,
            registrations_total,
        })
    }

    /// Uebernimmt eine Momentaufnahme: Gauges werden gesetzt, Counter
    /// um die Differenz zum letzten Stand erhoeht
    pub fn uebernehmen(&self, snapshot: &SignalingSnapshot) {
        self.connections.set(snapshot.verbindungen as i64);
        self.registered_identities.set(snapshot.identitaeten as i64);
        self.active_calls.set(snapshot.anrufe as i64);

        fn nachziehen(counter: &IntCounter, stand: u64) {
            let bisher = counter.get();
            if stand > bisher {
                counter.inc_by(stand - bisher);
            }
        }
        nachziehen(&self.relayed_signals_total, snapshot.weitergeleitet);
        nachziehen(&self.presence_queries_total, snapshot.praesenz_anfragen);
        nachziehen(&self.registrations_total, snapshot.registrierungen);
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: HealthsyncMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<HealthsyncMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            http::StatusCode::OK,
            [(http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_setzt_gauges() {
        let metriken = HealthsyncMetrics::neu().unwrap();
        metriken.uebernehmen(&SignalingSnapshot {
            verbindungen: 4,
            identitaeten: 3,
            anrufe: 1,
            ..SignalingSnapshot::default()
        });
        assert_eq!(metriken.connections.get(), 4);
        assert_eq!(metriken.registered_identities.get(), 3);
        assert_eq!(metriken.active_calls.get(), 1);
    }

    #[test]
    fn counter_folgen_dem_stand() {
        let metriken = HealthsyncMetrics::neu().unwrap();
        let mut snap = SignalingSnapshot {
            weitergeleitet: 10,
            ..SignalingSnapshot::default()
        };
        metriken.uebernehmen(&snap);
        metriken.uebernehmen(&snap);
        assert_eq!(metriken.relayed_signals_total.get(), 10);

        snap.weitergeleitet = 15;
        metriken.uebernehmen(&snap);
        assert_eq!(metriken.relayed_signals_total.get(), 15);
    }

    #[test]
    fn export_im_prometheus_format() {
        let metriken = HealthsyncMetrics::neu().unwrap();
        metriken.active_calls.set(2);

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("healthsync_active_calls 2"));
        assert!(output.contains("healthsync_registrations_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
