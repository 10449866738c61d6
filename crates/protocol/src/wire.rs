//! Wire-Format fuer TCP/TLS-Verbindungen
//!
//! Frame-basiertes Protokoll mit festem 12-Byte-Header:
//!
//! ```text
//! +--------------+---------+----------------+--------------+----...----+
//! | Magic (LE24) | XOR-Key | Laenge (LE u32)| Pruefsumme   | Payload   |
//! |   3 Bytes    | 1 Byte  |    4 Bytes     | (LE u32)     |           |
//! +--------------+---------+----------------+--------------+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne Header). Ein
//! XOR-Key ungleich 0 bedeutet, dass jedes Payload-Byte mit dem Key
//! verschluesselt wurde; die Transformation ist symmetrisch. Die Pruefsumme
//! ist reserviert: sie wird uebertragen, aber nicht verifiziert.
//!
//! Eine falsche Magic-Konstante ist ein fataler Framing-Fehler – der
//! Bytestrom gilt als korrupt und die Verbindung wird getrennt.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Magic-Konstante am Frame-Anfang (nur die unteren 24 Bit werden benutzt)
pub const MAGIC: u32 = 0x950414;

/// Groesse des festen Headers in Bytes
pub const HEADER_LAENGE: usize = 12;

/// Standard-maximale Payload-Groesse (1 MB)
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// NetPacket
// ---------------------------------------------------------------------------

/// Ein vollstaendig gepuffertes Paket
///
/// Die Payload ist nach dem Dekodieren bereits ent-obfuskiert; beim
/// Kodieren wird sie mit dem angegebenen Key obfuskiert (Key 0 = keine
/// Transformation, Referenzverhalten).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetPacket {
    /// XOR-Schluessel aus dem Header (0 = keine Obfuskation)
    pub xor_key: u8,
    /// Reservierte Pruefsumme (wird uebertragen, nie verifiziert)
    pub pruefsumme: u32,
    /// Nutzdaten
    pub payload: Bytes,
}

impl NetPacket {
    /// Erstellt ein Paket ohne Obfuskation mit Pruefsumme 0
    pub fn neu(payload: Bytes) -> Self {
        Self {
            xor_key: 0,
            pruefsumme: 0,
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// PacketCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer das Fernlink-Frame-Format
///
/// Implementiert `Encoder<NetPacket>` und `Decoder` fuer die Integration
/// mit `tokio_util::codec::Framed`. Der Decoder konsumiert nie unvollstaendige
/// Frames: unterhalb von 12 gepufferten Bytes bzw. `12 + Laenge` Bytes gibt
/// er `Ok(None)` zurueck.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    /// Maximale erlaubte Payload-Groesse in Bytes
    max_payload: usize,
}

impl PacketCodec {
    /// Erstellt einen neuen `PacketCodec` mit Standard-Limits
    pub fn neu() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Erstellt einen `PacketCodec` mit benutzerdefinierter Maximalgroesse
    pub fn mit_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::neu()
    }
}

impl Decoder for PacketCodec {
    type Item = NetPacket;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warten bis der komplette Header gepuffert ist
        if src.len() < HEADER_LAENGE {
            return Ok(None);
        }

        // Magic (24 Bit little-endian) pruefen, ohne den Buffer zu veraendern
        let magic = u32::from(src[0]) | u32::from(src[1]) << 8 | u32::from(src[2]) << 16;
        if magic != MAGIC {
            return Err(ProtocolError::UngueltigeMagic(magic).into());
        }

        let xor_key = src[3];
        let laenge = u32::from_le_bytes([src[4], src[5], src[6], src[7]]) as usize;
        let pruefsumme = u32::from_le_bytes([src[8], src[9], src[10], src[11]]);

        if laenge > self.max_payload {
            return Err(ProtocolError::FrameZuGross {
                laenge,
                maximum: self.max_payload,
            }
            .into());
        }

        // Warten bis die komplette Payload gepuffert ist
        if src.len() < HEADER_LAENGE + laenge {
            src.reserve(HEADER_LAENGE + laenge - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LAENGE);
        let mut payload = src.split_to(laenge);

        // Ent-Obfuskation vor jeder inhaltsabhaengigen Dekodierung
        if xor_key != 0 {
            for byte in payload.iter_mut() {
                *byte ^= xor_key;
            }
        }

        Ok(Some(NetPacket {
            xor_key,
            pruefsumme,
            payload: payload.freeze(),
        }))
    }
}

impl Encoder<NetPacket> for PacketCodec {
    type Error = io::Error;

    fn encode(&mut self, paket: NetPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if paket.payload.len() > self.max_payload {
            return Err(ProtocolError::FrameZuGross {
                laenge: paket.payload.len(),
                maximum: self.max_payload,
            }
            .into());
        }

        dst.reserve(HEADER_LAENGE + paket.payload.len());
        dst.put_uint_le(u64::from(MAGIC), 3);
        dst.put_u8(paket.xor_key);
        dst.put_u32_le(paket.payload.len() as u32);
        dst.put_u32_le(paket.pruefsumme);

        if paket.xor_key != 0 {
            dst.extend(paket.payload.iter().map(|b| b ^ paket.xor_key));
        } else {
            dst.put_slice(&paket.payload);
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn testpaket(key: u8, laenge: usize) -> NetPacket {
        let payload: Vec<u8> = (0..laenge).map(|i| (i % 251) as u8).collect();
        NetPacket {
            xor_key: key,
            pruefsumme: 0,
            payload: Bytes::from(payload),
        }
    }

    #[test]
    fn round_trip_verschiedene_laengen() {
        for laenge in [0usize, 1, 4095, 65536] {
            for key in [0u8, 0x5a] {
                let mut codec = PacketCodec::neu();
                let original = testpaket(key, laenge);

                let mut buf = BytesMut::new();
                codec.encode(original.clone(), &mut buf).unwrap();
                assert_eq!(buf.len(), HEADER_LAENGE + laenge);

                let dekodiert = codec
                    .decode(&mut buf)
                    .unwrap()
                    .expect("Paket muss vollstaendig sein");
                assert_eq!(
                    dekodiert.payload, original.payload,
                    "Payload (laenge={}, key={:#x}) muss identisch sein",
                    laenge, key
                );
                assert!(buf.is_empty());
            }
        }
    }

    #[test]
    fn obfuskierte_payload_auf_dem_draht() {
        let mut codec = PacketCodec::neu();
        let original = testpaket(0xff, 16);

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();

        // Auf dem Draht darf die Payload nicht im Klartext stehen
        assert_ne!(&buf[HEADER_LAENGE..], &original.payload[..]);
    }

    #[test]
    fn byte_fuer_byte_zufuehren() {
        let mut codec = PacketCodec::neu();
        let original = testpaket(0, 64);

        let mut komplett = BytesMut::new();
        codec.encode(original.clone(), &mut komplett).unwrap();
        let gesamt = komplett.len();

        // Jedes echte Praefix ergibt NeedMoreData, erst das letzte Byte
        // liefert genau ein Paket
        let mut buf = BytesMut::new();
        for (i, byte) in komplett.iter().enumerate() {
            buf.put_u8(*byte);
            let resultat = codec.decode(&mut buf).unwrap();
            if i + 1 < gesamt {
                assert!(resultat.is_none(), "Praefix {} darf kein Paket liefern", i + 1);
            } else {
                let paket = resultat.expect("Letztes Byte muss das Paket vervollstaendigen");
                assert_eq!(paket.payload, original.payload);
            }
        }
    }

    #[test]
    fn falsche_magic_ist_fatal() {
        let mut codec = PacketCodec::neu();
        let mut buf = BytesMut::new();
        buf.put_uint_le(0xdeadbe, 3);
        buf.put_u8(0);
        buf.put_u32_le(0);
        buf.put_u32_le(0);

        let resultat = codec.decode(&mut buf);
        assert!(resultat.is_err());
    }

    #[test]
    fn zu_wenig_bytes_fuer_header() {
        let mut codec = PacketCodec::neu();
        let mut buf = BytesMut::from(&[0x14, 0x04][..]);
        let resultat = codec.decode(&mut buf).unwrap();
        assert!(resultat.is_none());
        // Der Buffer bleibt unangetastet
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn ablehnung_zu_grosse_payload() {
        let mut codec = PacketCodec::mit_max_payload(100);

        let mut buf = BytesMut::new();
        buf.put_uint_le(u64::from(MAGIC), 3);
        buf.put_u8(0);
        buf.put_u32_le(200);
        buf.put_u32_le(0);
        buf.put_slice(&[b'x'; 200]);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn ablehnung_beim_encode_zu_grosse_payload() {
        let mut codec = PacketCodec::mit_max_payload(10);
        let paket = testpaket(0, 11);

        let mut buf = BytesMut::new();
        assert!(codec.encode(paket, &mut buf).is_err());
    }

    #[test]
    fn mehrere_pakete_im_buffer() {
        let mut codec = PacketCodec::neu();
        let mut buf = BytesMut::new();

        for laenge in [3usize, 7, 11] {
            codec.encode(testpaket(0, laenge), &mut buf).unwrap();
        }

        for laenge in [3usize, 7, 11] {
            let paket = codec.decode(&mut buf).unwrap().expect("Paket erwartet");
            assert_eq!(paket.payload.len(), laenge);
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn pruefsumme_wird_durchgereicht() {
        let mut codec = PacketCodec::neu();
        let mut paket = testpaket(0, 4);
        paket.pruefsumme = 0xabcd1234;

        let mut buf = BytesMut::new();
        codec.encode(paket.clone(), &mut buf).unwrap();
        let dekodiert = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(dekodiert.pruefsumme, 0xabcd1234);
    }
}
