//! Ereignisse die der Call-Service an die Oberflaeche meldet

use healthsync_core::{Ereignis, Identity};

use crate::call::{CallDirection, CallState};

/// Warum ein Anruf beendet wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Eigenes Auflegen oder Ablehnen
    Local,
    /// Gegenstelle hat aufgelegt oder abgebrochen
    Remote,
    /// Service wurde getrennt
    Disconnected,
    /// Fehler waehrend des Anrufs
    Failed,
}

/// Herkunft eines Fehlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorContext {
    Signaling,
    Call,
    /// Kamera oder Mikrofon
    Media,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    IncomingCall {
        caller: Identity,
    },
    UserNotOnline {
        peer: Identity,
    },
    /// Gegenstelle besetzt oder Anruf auf anderem Geraet angenommen
    CallInProgress {
        peer: Identity,
        message: String,
    },
    CallDeclined {
        peer: Identity,
    },
    CallStarted {
        peer: Identity,
        direction: CallDirection,
    },
    CallEnded {
        peer: Identity,
        reason: EndReason,
    },
    StateChanged {
        from: CallState,
        to: CallState,
    },
    Error {
        context: ErrorContext,
        message: String,
        fatal: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallEventKind {
    IncomingCall,
    UserNotOnline,
    CallInProgress,
    CallDeclined,
    CallStarted,
    CallEnded,
    StateChanged,
    Error,
}

impl Ereignis for CallEvent {
    type Art = CallEventKind;

    fn art(&self) -> CallEventKind {
        match self {
            Self::IncomingCall { .. } => CallEventKind::IncomingCall,
            Self::UserNotOnline { .. } => CallEventKind::UserNotOnline,
            Self::CallInProgress { .. } => CallEventKind::CallInProgress,
            Self::CallDeclined { .. } => CallEventKind::CallDeclined,
            Self::CallStarted { .. } => CallEventKind::CallStarted,
            Self::CallEnded { .. } => CallEventKind::CallEnded,
            Self::StateChanged { .. } => CallEventKind::StateChanged,
            Self::Error { .. } => CallEventKind::Error,
        }
    }
}

type IdentityHandler = Box<dyn Fn(&Identity) + Send + Sync>;
type InProgressHandler = Box<dyn Fn(&Identity, &str) + Send + Sync>;

/// Callback-Tabelle fuer `CallService::initialize`
///
/// Die Handler bleiben bis zum `disconnect` des Service registriert.
#[derive(Default)]
pub struct CallCallbacks {
    pub(crate) on_incoming_call: Option<IdentityHandler>,
    pub(crate) on_user_not_online: Option<IdentityHandler>,
    pub(crate) on_call_in_progress: Option<InProgressHandler>,
    pub(crate) on_call_declined: Option<IdentityHandler>,
}

impl CallCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_incoming_call(mut self, f: impl Fn(&Identity) + Send + Sync + 'static) -> Self {
        self.on_incoming_call = Some(Box::new(f));
        self
    }

    pub fn on_user_not_online(mut self, f: impl Fn(&Identity) + Send + Sync + 'static) -> Self {
        self.on_user_not_online = Some(Box::new(f));
        self
    }

    pub fn on_call_in_progress(
        mut self,
        f: impl Fn(&Identity, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_call_in_progress = Some(Box::new(f));
        self
    }

    pub fn on_call_declined(mut self, f: impl Fn(&Identity) + Send + Sync + 'static) -> Self {
        self.on_call_declined = Some(Box::new(f));
        self
    }
}
