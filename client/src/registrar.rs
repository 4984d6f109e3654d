//! Praesenz-Registrierung beim Signaling-Server
//!
//! Meldet die eigene Identitaet (und im Doktor-Modus zusaetzlich die
//! Arzt-Identitaet) an:
//! - bei `register`: sofort, sonst im Sekundentakt bis der Transport verbunden ist
//! - nach jedem Wiederaufbau der Verbindung
//! - periodisch alle 5 Sekunden, solange kein Anruf aktiv ist
//!
//! Pro Verbindungs-Epoche wird hoechstens einmal ungefragt angemeldet, sodass
//! Wiederholung und Wiederaufbau keine doppelten Registrierungen erzeugen.

use chrono::{DateTime, Utc};
use healthsync_core::Identity;
use healthsync_protocol::Signal;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::call::CallState;
use crate::channel::SignalChannel;
use crate::config::RegistrarSettings;
use crate::retry::{retry, RetryOutcome, RetryPolicy};

/// Registrierungszustand des Clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRecord {
    pub identity: Identity,
    /// Arzt-Identitaet im Doktor-Modus
    pub doctor_identity: Option<Identity>,
    pub announced: bool,
    pub last_announce: Option<DateTime<Utc>>,
    announced_epoch: Option<u64>,
}

impl RegistrationRecord {
    fn new(identity: Identity) -> Self {
        Self {
            identity,
            doctor_identity: None,
            announced: false,
            last_announce: None,
            announced_epoch: None,
        }
    }

    pub fn is_announced(&self) -> bool {
        self.announced
    }

    /// Alle Identitaeten die angemeldet werden
    pub fn identities(&self) -> Vec<Identity> {
        let mut ids = vec![self.identity.clone()];
        if let Some(doctor) = &self.doctor_identity {
            if doctor != &self.identity {
                ids.push(doctor.clone());
            }
        }
        ids
    }

    fn zuruecksetzen(&mut self) {
        self.announced = false;
        self.announced_epoch = None;
    }
}

/// Haelt die Registrierung beim Signaling-Server aktuell
///
/// Clone teilt den Zustand.
#[derive(Clone)]
pub struct PresenceRegistrar {
    inner: Arc<RegistrarInner>,
}

struct RegistrarInner {
    channel: Arc<dyn SignalChannel>,
    settings: RegistrarSettings,
    record: Mutex<RegistrationRecord>,
    call_state: watch::Receiver<CallState>,
    cancel: CancellationToken,
    /// Abbruch der laufenden Registrierungs-Wiederholung
    laufend: Mutex<Option<CancellationToken>>,
    gestartet: AtomicBool,
}

impl PresenceRegistrar {
    pub fn new(
        channel: Arc<dyn SignalChannel>,
        settings: RegistrarSettings,
        identity: Identity,
        call_state: watch::Receiver<CallState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(RegistrarInner {
                channel,
                settings,
                record: Mutex::new(RegistrationRecord::new(identity)),
                call_state,
                cancel,
                laufend: Mutex::new(None),
                gestartet: AtomicBool::new(false),
            }),
        }
    }

    /// Startet Wiederanmeldung nach Reconnect und den periodischen Takt
    pub fn start(&self) {
        if self.inner.gestartet.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move { this.takt().await });
    }

    async fn takt(self) {
        let intervall = self.inner.settings.reannounce_interval();
        let mut takt = tokio::time::interval_at(Instant::now() + intervall, intervall);
        takt.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut verbindung = self.inner.channel.connection();

        loop {
            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,

                geaendert = verbindung.changed() => {
                    if geaendert.is_err() {
                        break;
                    }
                    let status = *verbindung.borrow_and_update();
                    if status.connected {
                        tracing::info!(epoch = status.epoch, "Verbunden, melde Praesenz an");
                        self.announce(false, "wiederverbindung");
                    } else {
                        self.inner.record.lock().announced = false;
                    }
                }

                _ = takt.tick() => {
                    if self.inner.call_state.borrow().is_active() {
                        tracing::trace!("Anruf aktiv, periodische Anmeldung unterdrueckt");
                        continue;
                    }
                    self.announce(true, "periodisch");
                }
            }
        }
        tracing::debug!("Registrierungs-Takt beendet");
    }

    /// Meldet eine Identitaet an
    ///
    /// Ohne Verbindung wird im Abstand von `retry_interval` erneut versucht.
    /// Sobald der Transport verbunden ist, geht genau eine Registrierung raus.
    pub fn register(&self, identity: Identity) {
        {
            let mut record = self.inner.record.lock();
            if record.identity != identity {
                tracing::info!(alt = %record.identity, neu = %identity, "Identitaet gewechselt");
                record.identity = identity;
            }
            record.zuruecksetzen();
        }
        self.registrierung_anstossen();
    }

    /// Wechselt die eigene Identitaet und meldet sie sofort an
    pub fn switch_identity(&self, identity: Identity) {
        self.register(identity);
    }

    /// Aktiviert oder beendet den Doktor-Modus
    pub fn set_doctor_identity(&self, doctor: Option<Identity>) {
        {
            let mut record = self.inner.record.lock();
            record.doctor_identity = doctor.clone();
            record.zuruecksetzen();
        }
        match doctor {
            Some(doctor) => {
                tracing::info!(doctor = %doctor, "Doktor-Modus aktiv");
                self.registrierung_anstossen();
            }
            None => tracing::info!("Doktor-Modus beendet"),
        }
    }

    pub fn record(&self) -> RegistrationRecord {
        self.inner.record.lock().clone()
    }

    pub fn is_announced(&self) -> bool {
        self.inner.record.lock().announced
    }

    /// Beendet Takt und laufende Wiederholungen
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Some(laufend) = self.inner.laufend.lock().take() {
            laufend.cancel();
        }
        self.inner.record.lock().zuruecksetzen();
        tracing::debug!("Registrierung beendet");
    }

    fn registrierung_anstossen(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        let token = self.inner.cancel.child_token();
        if let Some(alt) = self.inner.laufend.lock().replace(token.clone()) {
            alt.cancel();
        }

        let this = self.clone();
        tokio::spawn(async move {
            let policy = RetryPolicy::unlimited(this.inner.settings.retry_interval());
            let ergebnis = retry(policy, &token, |versuch| {
                let this = this.clone();
                async move {
                    if !this.inner.channel.is_connected() {
                        tracing::debug!(versuch, "Nicht verbunden, Registrierung folgt");
                        return None;
                    }
                    this.announce(false, "registrierung").then_some(())
                }
            })
            .await;
            if ergebnis == RetryOutcome::Cancelled {
                tracing::trace!("Registrierungs-Wiederholung abgebrochen");
            }
        });
    }

    /// Sendet die Registrierung aller Identitaeten
    ///
    /// Ohne `force` wird pro Epoche nur einmal gesendet. Gibt true zurueck
    /// wenn die Registrierung danach gilt.
    fn announce(&self, force: bool, anlass: &'static str) -> bool {
        let status = *self.inner.channel.connection().borrow();
        if !status.connected {
            return false;
        }

        let identitaeten = {
            let mut record = self.inner.record.lock();
            if !force && record.announced_epoch == Some(status.epoch) {
                return true;
            }
            record.announced_epoch = Some(status.epoch);
            record.identities()
        };

        let ok = identitaeten
            .iter()
            .all(|id| self.inner.channel.send(Signal::register(id.clone())));

        let mut record = self.inner.record.lock();
        if ok {
            record.announced = true;
            record.last_announce = Some(Utc::now());
            tracing::debug!(anlass, epoch = status.epoch, identitaeten = identitaeten.len(), "Registrierung gesendet");
        } else {
            record.zuruecksetzen();
            tracing::warn!(anlass, "Registrierung konnte nicht gesendet werden");
        }
        ok
    }
}
