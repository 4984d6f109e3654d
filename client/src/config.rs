//! Client-Konfiguration
//!
//! Laedt Einstellungen aus einer TOML-Datei. Jeder Abschnitt hat sinnvolle
//! Standardwerte, eine fehlende Datei ist kein Fehler. Die Adresse des
//! Signaling-Servers kann per `HEALTHSYNC_SIGNALING_SERVER` ueberschrieben
//! werden.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ClientError;

/// Umgebungsvariable fuer die Adresse des Signaling-Servers
pub const SIGNALING_SERVER_ENV: &str = "HEALTHSYNC_SIGNALING_SERVER";

/// Eingebaute Standardadresse des Signaling-Servers
pub const DEFAULT_SIGNALING_ADDR: &str = "127.0.0.1:3001";

/// Schemata die vor der Adresse toleriert und entfernt werden
const SCHEMATA: &[&str] = &["tcp://", "http://", "https://", "ws://", "wss://"];

/// Gesamtkonfiguration des Client-Kerns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub signaling: SignalingSettings,
    pub registrar: RegistrarSettings,
    pub presence: PresenceSettings,
    pub call: CallSettings,
}

/// Verbindung zum Signaling-Server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingSettings {
    /// `host:port`, Schemata wie `tcp://` werden entfernt
    pub server_addr: String,
    /// Erste Wartezeit vor einem erneuten Verbindungsversuch
    pub reconnect_initial_ms: u64,
    /// Obergrenze fuer die Wartezeit, sie verdoppelt sich bis dorthin
    pub reconnect_max_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for SignalingSettings {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SIGNALING_ADDR.to_string(),
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 5000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl SignalingSettings {
    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_initial_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Normalisierte Adresse fuer `TcpStream::connect`
    pub fn addr(&self) -> String {
        normalize_addr(&self.server_addr)
    }
}

/// Takt der Praesenz-Registrierung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrarSettings {
    /// Periodische Wiederanmeldung
    pub reannounce_interval_ms: u64,
    /// Wiederholung solange der Transport nicht verbunden ist
    pub retry_interval_ms: u64,
}

impl Default for RegistrarSettings {
    fn default() -> Self {
        Self {
            reannounce_interval_ms: 5000,
            retry_interval_ms: 1000,
        }
    }
}

impl RegistrarSettings {
    pub fn reannounce_interval(&self) -> Duration {
        Duration::from_millis(self.reannounce_interval_ms.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }
}

/// Online-Abfrage einer Gegenstelle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceSettings {
    pub attempts: u32,
    pub retry_delay_ms: u64,
    /// Wartezeit auf die Antwort pro Versuch
    pub attempt_timeout_ms: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay_ms: 500,
            attempt_timeout_ms: 2000,
        }
    }
}

impl PresenceSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Verhalten des Anruf-Automaten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallSettings {
    /// Nach dieser Zeit wird ein klingelnder eingehender Anruf automatisch angenommen
    pub auto_accept_ms: u64,
    /// Vor dem Waehlen pruefen ob die Gegenstelle online ist
    pub precheck_presence: bool,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            auto_accept_ms: 15_000,
            precheck_presence: true,
        }
    }
}

impl CallSettings {
    pub fn auto_accept(&self) -> Duration {
        Duration::from_millis(self.auto_accept_ms)
    }
}

impl ClientConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei
    ///
    /// Fehlt die Datei, werden die Standardwerte verwendet.
    pub fn load(pfad: impl AsRef<Path>) -> Result<Self, ClientError> {
        let pfad = pfad.as_ref();
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::from_toml_str(&inhalt),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(pfad = %pfad.display(), "Keine Client-Konfiguration gefunden, verwende Standardwerte");
                Ok(Self::default())
            }
            Err(e) => Err(ClientError::Io(e)),
        }
    }

    pub fn from_toml_str(inhalt: &str) -> Result<Self, ClientError> {
        toml::from_str(inhalt).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Uebernimmt `HEALTHSYNC_SIGNALING_SERVER` falls gesetzt
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(addr) = std::env::var(SIGNALING_SERVER_ENV) {
            if !addr.trim().is_empty() {
                tracing::debug!(addr = %addr, "Signaling-Adresse aus Umgebung");
                self.signaling.server_addr = addr;
            }
        }
        self
    }

    /// Setzt eine explizit uebergebene Server-Adresse
    pub fn with_server_addr(mut self, addr: Option<&str>) -> Self {
        if let Some(addr) = addr.filter(|a| !a.trim().is_empty()) {
            self.signaling.server_addr = addr.to_string();
        }
        self
    }
}

/// Entfernt Schema und abschliessende Schraegstriche einer Server-URL
pub fn normalize_addr(raw: &str) -> String {
    let mut addr = raw.trim();
    for schema in SCHEMATA {
        if let Some(rest) = addr.strip_prefix(schema) {
            addr = rest;
            break;
        }
    }
    addr.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardwerte() {
        let c = ClientConfig::default();
        assert_eq!(c.signaling.addr(), "127.0.0.1:3001");
        assert_eq!(c.registrar.reannounce_interval(), Duration::from_secs(5));
        assert_eq!(c.registrar.retry_interval(), Duration::from_secs(1));
        assert_eq!(c.presence.attempts, 3);
        assert_eq!(c.presence.retry_delay(), Duration::from_millis(500));
        assert_eq!(c.call.auto_accept(), Duration::from_secs(15));
        assert_eq!(c.signaling.reconnect_initial(), Duration::from_secs(1));
        assert_eq!(c.signaling.reconnect_max(), Duration::from_secs(5));
    }

    #[test]
    fn teilweise_toml() {
        let c = ClientConfig::from_toml_str(
            r#"
            [signaling]
            server_addr = "http://signal.example.org:4000/"

            [call]
            precheck_presence = false
            "#,
        )
        .unwrap();
        assert_eq!(c.signaling.addr(), "signal.example.org:4000");
        assert!(!c.call.precheck_presence);
        assert_eq!(c.call.auto_accept_ms, 15_000);
        assert_eq!(c.presence, PresenceSettings::default());
    }

    #[test]
    fn ungueltiges_toml() {
        assert!(matches!(
            ClientConfig::from_toml_str("[signaling\nserver_addr = 1"),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn fehlende_datei_liefert_standard() {
        let c = ClientConfig::load("/nicht/vorhanden/healthsync-client.toml").unwrap();
        assert_eq!(c, ClientConfig::default());
    }

    #[test]
    fn adresse_normalisieren() {
        assert_eq!(normalize_addr("tcp://10.0.0.2:3001"), "10.0.0.2:3001");
        assert_eq!(normalize_addr(" localhost:3001 "), "localhost:3001");
        assert_eq!(normalize_addr("https://a.b:1/"), "a.b:1");
    }

    #[test]
    fn explizite_adresse_hat_vorrang() {
        let c = ClientConfig::default().with_server_addr(Some("ws://x:9"));
        assert_eq!(c.signaling.addr(), "x:9");
        let c = ClientConfig::default().with_server_addr(Some("  "));
        assert_eq!(c.signaling.addr(), DEFAULT_SIGNALING_ADDR);
    }
}
