//! healthsync-protocol – Signaling-Protokoll
//!
//! Dieses Crate definiert alle Ereignisse die zwischen Client und
//! Signaling-Server ausgetauscht werden, sowie das Frame-Format fuer TCP.

pub mod signal;
pub mod wire;

pub use signal::{
    CallAccept, CallFailed, CallFailure, CallOffer, IceCandidate, IncomingCall, InProgress,
    PeerRef, PresenceQuery, PresenceStatus, RegisteredAck, Signal, SdpAnswer,
};
pub use wire::FrameCodec;
