//! Schnittstelle zur Peer-Verbindung
//!
//! SDP-Aushandlung und Medientransport liegen ausserhalb dieses Crates. Der
//! Anruf-Automat steuert sie nur ueber [`PeerLink`].

use async_trait::async_trait;
use healthsync_core::Identity;
use thiserror::Error;

use crate::media::MediaStream;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Peer-Verbindung: {0}")]
pub struct PeerError(pub String);

#[async_trait]
pub trait PeerLink: Send + Sync + 'static {
    /// Erzeugt ein SDP-Offer fuer einen ausgehenden Anruf
    async fn create_offer(&self, peer: &Identity, media: &MediaStream)
        -> Result<String, PeerError>;

    /// Erzeugt die SDP-Answer auf ein empfangenes Offer
    async fn create_answer(
        &self,
        peer: &Identity,
        offer_sdp: &str,
        media: &MediaStream,
    ) -> Result<String, PeerError>;

    async fn apply_answer(&self, answer_sdp: &str) -> Result<(), PeerError>;

    async fn add_remote_candidate(&self, candidate: serde_json::Value) -> Result<(), PeerError>;

    /// Schliesst die aktuelle Peer-Verbindung, idempotent
    fn close(&self);
}
