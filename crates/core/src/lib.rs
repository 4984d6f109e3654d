//! healthsync-core – Gemeinsame Typen, Event-Emitter und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die vom
//! Signaling-Server und vom Client-Kern gemeinsam genutzt werden.

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{HealthsyncError, Result};
pub use event::{Ereignis, EventEmitter, Subscription};
pub use types::{Identity, IdentityKind};
