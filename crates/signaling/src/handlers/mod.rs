//! Handler fuer alle Client-Signale
//!
//! Jeder Handler ist fuer eine Gruppe von Ereignissen zustaendig und hat
//! Zugriff auf den gemeinsamen SignalingState. Antworten an die eigene
//! Verbindung werden zurueckgegeben, alles andere laeuft ueber den
//! Broadcaster.

pub mod call_handler;
pub mod presence_handler;
pub mod register_handler;
