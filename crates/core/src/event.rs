//! Event-Emitter mit expliziter Abmeldung
//!
//! Komponenten registrieren Handler fuer eine Ereignis-Art und erhalten ein
//! [`Subscription`]-Handle zurueck. Wird das Handle verworfen oder
//! [`Subscription::abmelden`] aufgerufen, wird der Handler entfernt. Damit
//! koennen Verbraucher ihre Handler an die eigene Lebensdauer binden.
//!
//! Handler werden ausserhalb des internen Locks aufgerufen und duerfen daher
//! selbst wieder `on` oder `emit` aufrufen.

use parking_lot::Mutex;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Ein Ereignis das ueber einen [`EventEmitter`] verteilt werden kann
pub trait Ereignis: Clone + Send + Sync + 'static {
    /// Diskriminante nach der Handler gefiltert werden
    type Art: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn art(&self) -> Self::Art;
}

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct HandlerEintrag<E: Ereignis> {
    id: u64,
    /// `None` = alle Ereignisse
    art: Option<E::Art>,
    handler: Handler<E>,
}

struct EmitterInner<E: Ereignis> {
    handler: Mutex<Vec<HandlerEintrag<E>>>,
    naechste_id: AtomicU64,
    geschlossen: AtomicBool,
}

/// Verteilt Ereignisse an registrierte Handler
pub struct EventEmitter<E: Ereignis> {
    inner: Arc<EmitterInner<E>>,
}

impl<E: Ereignis> Clone for EventEmitter<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Ereignis> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::neu()
    }
}

impl<E: Ereignis> EventEmitter<E> {
    /// Erstellt einen neuen Emitter ohne Handler
    pub fn neu() -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                handler: Mutex::new(Vec::new()),
                naechste_id: AtomicU64::new(1),
                geschlossen: AtomicBool::new(false),
            }),
        }
    }

    /// Registriert einen Handler fuer eine bestimmte Ereignis-Art
    pub fn on<F>(&self, art: E::Art, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.registrieren(Some(art), Arc::new(handler))
    }

    /// Registriert einen Handler fuer alle Ereignisse
    pub fn on_alle<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.registrieren(None, Arc::new(handler))
    }

    fn registrieren(&self, art: Option<E::Art>, handler: Handler<E>) -> Subscription {
        let id = self.inner.naechste_id.fetch_add(1, Ordering::Relaxed);
        if !self.inner.geschlossen.load(Ordering::Acquire) {
            self.inner
                .handler
                .lock()
                .push(HandlerEintrag { id, art, handler });
        }

        let weak: Weak<EmitterInner<E>> = Arc::downgrade(&self.inner);
        Subscription {
            abmelden: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.handler.lock().retain(|e| e.id != id);
                }
            })),
        }
    }

    /// Verteilt ein Ereignis an alle passenden Handler
    ///
    /// Gibt die Anzahl der aufgerufenen Handler zurueck. Nach
    /// [`schliessen`](Self::schliessen) werden keine Handler mehr aufgerufen.
    pub fn emit(&self, event: &E) -> usize {
        if self.inner.geschlossen.load(Ordering::Acquire) {
            return 0;
        }

        let art = event.art();
        let passende: Vec<Handler<E>> = self
            .inner
            .handler
            .lock()
            .iter()
            .filter(|e| e.art.map_or(true, |a| a == art))
            .map(|e| Arc::clone(&e.handler))
            .collect();

        let mut aufgerufen = 0;
        for handler in passende {
            if self.inner.geschlossen.load(Ordering::Acquire) {
                break;
            }
            handler(event);
            aufgerufen += 1;
        }
        aufgerufen
    }

    /// Schliesst den Emitter: alle Handler werden entfernt und es werden
    /// keine weiteren Ereignisse mehr zugestellt
    pub fn schliessen(&self) {
        self.inner.geschlossen.store(true, Ordering::Release);
        self.inner.handler.lock().clear();
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.inner.geschlossen.load(Ordering::Acquire)
    }

    /// Anzahl der aktuell registrierten Handler
    pub fn anzahl_handler(&self) -> usize {
        self.inner.handler.lock().len()
    }
}

/// Handle einer Handler-Registrierung
///
/// Beim Verwerfen wird der Handler abgemeldet. Soll er bis zum Schliessen
/// des Emitters aktiv bleiben, muss [`Subscription::dauerhaft`] aufgerufen
/// werden.
#[must_use = "ein verworfenes Subscription-Handle meldet den Handler sofort ab"]
pub struct Subscription {
    abmelden: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Meldet den Handler ab
    pub fn abmelden(mut self) {
        if let Some(f) = self.abmelden.take() {
            f();
        }
    }

    /// Loest das Handle vom Handler, der Handler bleibt registriert
    pub fn dauerhaft(mut self) {
        self.abmelden = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.abmelden.take() {
            f();
        }
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("aktiv", &self.abmelden.is_some())
            .finish()
    }
}
