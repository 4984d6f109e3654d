//! Wire-Format fuer TCP-Verbindungen
//!
//! Frame-basiertes Protokoll: Length(u32 big-endian) + JSON-Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE) | 4 Bytes        | Payload    |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne die 4 Laengen-Bytes).
//! Der Payload ist genau ein [`Signal`] als JSON.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::signal::Signal;

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

fn ungueltig(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// tokio-util Codec fuer `Framed<TcpStream, FrameCodec>`
///
/// Wird von Client-Transport und Server-Verbindung gleichermassen genutzt.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limit
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Signal;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > self.max_frame_size {
            return Err(ungueltig(format!(
                "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                length, self.max_frame_size
            )));
        }

        let total_size = LENGTH_FIELD_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(length);

        serde_json::from_slice(&payload)
            .map(Some)
            .map_err(|e| ungueltig(format!("JSON-Deserialisierung fehlgeschlagen: {}", e)))
    }
}

impl Encoder<Signal> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Signal, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)
            .map_err(|e| ungueltig(format!("JSON-Serialisierung fehlgeschlagen: {}", e)))?;

        if json.len() > self.max_frame_size {
            return Err(ungueltig(format!(
                "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
                json.len(),
                self.max_frame_size
            )));
        }

        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{CallOffer, PeerRef};
    use healthsync_core::Identity;

    fn anruf(sdp: &str) -> Signal {
        Signal::CallUser(CallOffer {
            target_user_id: Identity::doctor(1),
            caller_user_id: Identity::new("user-a"),
            offer_sdp: sdp.to_string(),
        })
    }

    #[test]
    fn laengenfeld_entspricht_payload() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Signal::Heartbeat, &mut buf).unwrap();

        let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(&buf[LENGTH_FIELD_SIZE..], br#"{"event":"heartbeat"}"#);
        assert_eq!(buf.len(), LENGTH_FIELD_SIZE + payload_len);
    }

    #[test]
    fn unvollstaendiger_frame_wartet() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(anruf("v=0 o=- 1 1 IN IP4 0.0.0.0"), &mut buf).unwrap();

        let rest = buf.split_off(buf.len() / 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.unsplit(rest);
        let signal = codec.decode(&mut buf).unwrap().expect("vollstaendiger Frame");
        assert_eq!(signal, anruf("v=0 o=- 1 1 IN IP4 0.0.0.0"));
    }

    #[test]
    fn zu_wenig_bytes_fuer_laengenfeld() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0x00, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn zu_grosser_frame_beim_decode() {
        let mut codec = FrameCodec::with_max_size(100);
        let mut buf = BytesMut::new();
        buf.put_u32(200);
        buf.put_slice(&[b'x'; 200]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn zu_grosse_nachricht_beim_encode() {
        let mut codec = FrameCodec::with_max_size(10);
        let mut buf = BytesMut::new();
        assert!(codec.encode(anruf("sdp"), &mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn kaputtes_json_ist_invalid_data() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.put_slice(b"{x}");
        let fehler = codec.decode(&mut buf).unwrap_err();
        assert_eq!(fehler.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn mehrere_signale_im_buffer_in_reihenfolge() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let signale = vec![
            Signal::Register(Identity::new("user-a")),
            Signal::EndCall(PeerRef::an(Identity::doctor(4))),
            Signal::CallEnded,
        ];
        for s in &signale {
            codec.encode(s.clone(), &mut buf).unwrap();
        }
        for erwartet in signale {
            assert_eq!(codec.decode(&mut buf).unwrap(), Some(erwartet));
        }
        assert!(buf.is_empty());
    }
}
