//! Health-Check-Endpunkt fuer HealthSync
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Zustand des Signaling-Listeners

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub signaling_listening: bool,
    pub registered_identities: u64,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    signaling_aktiv: Arc<AtomicBool>,
    registrierte: Arc<AtomicU64>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            signaling_aktiv: Arc::new(AtomicBool::new(false)),
            registrierte: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn signaling_aktiv(&self) -> bool {
        self.signaling_aktiv.load(Ordering::Relaxed)
    }

    pub fn signaling_status_setzen(&self, aktiv: bool) {
        self.signaling_aktiv.store(aktiv, Ordering::Relaxed);
    }

    pub fn registrierte_setzen(&self, anzahl: u64) {
        self.registrierte.store(anzahl, Ordering::Relaxed);
    }

    /// Baut die Antwort fuer den aktuellen Zustand
    pub fn antwort(&self) -> HealthResponse {
        let signaling_listening = self.signaling_aktiv();
        HealthResponse {
            status: if signaling_listening {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            signaling_listening,
            registered_identities: self.registrierte.load(Ordering::Relaxed),
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.antwort();
    let http_status = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (http_status, Json(response))
}
