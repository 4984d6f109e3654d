//! Anruf-Zustandsautomat
//!
//! [`CallMachine`] enthaelt die reine Uebergangslogik ohne IO: jede Eingabe
//! liefert eine Liste von [`Effect`]s, die der
//! [`CallService`](crate::service::CallService) ausfuehrt. Dadurch laesst sich
//! jeder Uebergang ohne Netzwerk, Timer oder Geraete pruefen.

mod machine;
mod state;

pub use machine::{CallMachine, Effect};
pub use state::{CallDirection, CallSession, CallState};
