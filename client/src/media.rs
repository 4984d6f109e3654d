//! Zugriff auf Kamera und Mikrofon
//!
//! Das eigentliche Geraete-Backend sitzt hinter [`MediaDevices`]. Das
//! [`MediaGate`] fordert zuerst Audio und Video an und faellt bei einem
//! Fehler auf reines Audio zurueck. Es haelt hoechstens einen lokalen Stream.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Angeforderte Spuren
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub const AUDIO_VIDEO: Self = Self {
        audio: true,
        video: true,
    };
    pub const AUDIO_ONLY: Self = Self {
        audio: true,
        video: false,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Ein lokaler Medien-Stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
    pub has_audio: bool,
    pub has_video: bool,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, constraints: MediaConstraints) -> Self {
        Self {
            id: id.into(),
            has_audio: constraints.audio,
            has_video: constraints.video,
            audio_enabled: constraints.audio,
            video_enabled: constraints.video,
        }
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }
}

/// Fehler beim Geraetezugriff, getrennt vom allgemeinen Fehlerkanal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("Zugriff auf Kamera/Mikrofon verweigert")]
    PermissionDenied,
    #[error("Keine Kamera oder kein Mikrofon gefunden")]
    NotFound,
    #[error("Kamera oder Mikrofon wird bereits verwendet")]
    InUse,
    #[error("Medienfehler: {0}")]
    Other(String),
}

/// Geraete-Backend
#[async_trait]
pub trait MediaDevices: Send + Sync + 'static {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError>;

    fn set_track_enabled(&self, stream: &MediaStream, kind: TrackKind, enabled: bool);

    fn release(&self, stream: &MediaStream);
}

/// Verwaltet den lokalen Stream des Clients
pub struct MediaGate {
    devices: Arc<dyn MediaDevices>,
    aktuell: Mutex<Option<MediaStream>>,
}

impl MediaGate {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            aktuell: Mutex::new(None),
        }
    }

    /// Liefert den lokalen Stream, fordert ihn bei Bedarf an
    ///
    /// Schlaegt Audio+Video fehl, wird reines Audio versucht. Scheitert auch
    /// das, wird der Fehler des Audio-Versuchs zurueckgegeben.
    pub async fn get_local_media(&self) -> Result<MediaStream, MediaError> {
        if let Some(stream) = self.aktuell.lock().clone() {
            return Ok(stream);
        }

        let stream = match self.devices.acquire(MediaConstraints::AUDIO_VIDEO).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(fehler = %e, "Kamera nicht verfuegbar, versuche nur Audio");
                self.devices
                    .acquire(MediaConstraints::AUDIO_ONLY)
                    .await
                    .map_err(|e| {
                        tracing::error!(fehler = %e, "Mikrofon nicht verfuegbar");
                        e
                    })?
            }
        };

        let mut aktuell = self.aktuell.lock();
        if let Some(vorhanden) = aktuell.as_ref() {
            // Paralleler Aufruf war schneller
            self.devices.release(&stream);
            return Ok(vorhanden.clone());
        }
        tracing::info!(
            stream = %stream.id,
            video = stream.has_video,
            "Lokale Medien bereit"
        );
        *aktuell = Some(stream.clone());
        Ok(stream)
    }

    pub fn current(&self) -> Option<MediaStream> {
        self.aktuell.lock().clone()
    }

    /// Schaltet das Mikrofon um, gibt den neuen Zustand zurueck
    pub fn toggle_audio(&self) -> Option<bool> {
        self.umschalten(TrackKind::Audio)
    }

    /// Schaltet die Kamera um, gibt den neuen Zustand zurueck
    pub fn toggle_video(&self) -> Option<bool> {
        self.umschalten(TrackKind::Video)
    }

    fn umschalten(&self, kind: TrackKind) -> Option<bool> {
        let mut aktuell = self.aktuell.lock();
        let stream = aktuell.as_mut()?;
        let (vorhanden, an) = match kind {
            TrackKind::Audio => (stream.has_audio, &mut stream.audio_enabled),
            TrackKind::Video => (stream.has_video, &mut stream.video_enabled),
        };
        if !vorhanden {
            return None;
        }
        *an = !*an;
        let neu = *an;
        self.devices.set_track_enabled(stream, kind, neu);
        Some(neu)
    }

    /// Gibt den lokalen Stream frei, true wenn einer gehalten wurde
    pub fn release(&self) -> bool {
        match self.aktuell.lock().take() {
            Some(stream) => {
                self.devices.release(&stream);
                tracing::debug!(stream = %stream.id, "Lokale Medien freigegeben");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMedia;

    #[tokio::test]
    async fn audio_video_wenn_verfuegbar() {
        let devices = FakeMedia::new();
        let gate = MediaGate::new(devices.clone());

        let stream = gate.get_local_media().await.unwrap();
        assert!(stream.has_video);
        // Zweiter Aufruf nutzt den vorhandenen Stream
        gate.get_local_media().await.unwrap();
        assert_eq!(devices.acquired(), 1);
    }

    #[tokio::test]
    async fn faellt_auf_audio_zurueck() {
        let devices = FakeMedia::new();
        devices.fail_video(MediaError::NotFound);
        let gate = MediaGate::new(devices.clone());

        let stream = gate.get_local_media().await.unwrap();
        assert!(stream.is_audio_only());
        assert_eq!(gate.toggle_video(), None);
    }

    #[tokio::test]
    async fn verweigerung_wird_gemeldet() {
        let devices = FakeMedia::new();
        devices.fail_video(MediaError::PermissionDenied);
        devices.fail_audio(MediaError::PermissionDenied);
        let gate = MediaGate::new(devices.clone());

        assert_eq!(
            gate.get_local_media().await.unwrap_err(),
            MediaError::PermissionDenied
        );
        assert!(gate.current().is_none());
    }

    #[tokio::test]
    async fn umschalten_und_freigeben() {
        let devices = FakeMedia::new();
        let gate = MediaGate::new(devices.clone());
        assert_eq!(gate.toggle_audio(), None);

        gate.get_local_media().await.unwrap();
        assert_eq!(gate.toggle_audio(), Some(false));
        assert_eq!(gate.toggle_audio(), Some(true));
        assert_eq!(gate.toggle_video(), Some(false));
        assert!(!gate.current().unwrap().video_enabled);

        assert!(gate.release());
        assert!(!gate.release());
        assert_eq!(devices.released(), 1);
    }
}
