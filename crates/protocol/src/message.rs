//! Getypte Nachrichten des Rendezvous-Protokolls
//!
//! Jede Nachricht traegt auf dem Draht eine 4-Byte-Typ-ID (little-endian)
//! gefolgt vom serde_json-kodierten Koerper. Die [`DecoderRegistry`] bildet
//! Typ-IDs auf Dekodier-Funktionen ab; die Registrierung ist einmalig und
//! idempotent und muss abgeschlossen sein, bevor der Transport Pakete
//! dekodiert.
//!
//! Unbekannte Typ-IDs und fehlerhafte Koerper sind nicht fatal: das einzelne
//! Paket wird geloggt und verworfen, die Verbindung bleibt offen.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use fernlink_core::{DeviceId, RoomId, SessionId};

use crate::error::ProtocolResult;
use crate::wire::NetPacket;

// ---------------------------------------------------------------------------
// Typ-IDs
// ---------------------------------------------------------------------------

/// Typ-IDs aller Rendezvous-Nachrichten (u32, little-endian auf dem Draht)
pub mod type_id {
    pub const LOGIN_DEVICE: u32 = 1001;
    pub const LOGIN_DEVICE_ACK: u32 = 1002;
    pub const ALLOCATE_DEVICE_ID: u32 = 1005;
    pub const ALLOCATE_DEVICE_ID_ACK: u32 = 1006;
    pub const KEEP_ALIVE: u32 = 1007;
    pub const KEEP_ALIVE_ACK: u32 = 1008;

    pub const SIGNALING_MESSAGE: u32 = 2001;
    pub const SIGNALING_MESSAGE_ACK: u32 = 2002;
    pub const JOIN_ROOM: u32 = 2003;
    pub const JOIN_ROOM_ACK: u32 = 2004;

    pub const REQUEST_CONNECTION: u32 = 3001;
    pub const REQUEST_CONNECTION_ACK: u32 = 3002;
    pub const OPEN_CONNECTION: u32 = 3003;
    pub const OPEN_CONNECTION_ACK: u32 = 3004;
    pub const CLOSE_CONNECTION: u32 = 3005;
}

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer Acknowledgement-Nachrichten
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    #[default]
    Success,
    // Geraete-Login
    LoginDeviceInvalidId,
    LoginDeviceInvalidCookie,
    LoginDeviceInvalidStatus,
    AllocateDeviceIdNoAvailableId,
    // Verbindungsaufbau
    RequestConnectionPeerNotOnline,
    RequestConnectionInvalidStatus,
    RequestConnectionCreateOrderFailed,
    // Signaling
    JoinRoomFailed,
    SignalingPeerNotOnline,
}

// ---------------------------------------------------------------------------
// Geraete-Nachrichten
// ---------------------------------------------------------------------------

/// Anmeldung eines Geraets (beide Rollen)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginDevice {
    pub device_id: DeviceId,
    /// Wiedererkennungs-Cookie; leer nur bei Altclients
    pub cookie: String,
    /// Ob das Geraet ferngesteuert werden darf (nur Controlled-Rolle relevant)
    pub allow_control: bool,
    pub version_major: u32,
    pub version_minor: u32,
    pub version_patch: u32,
    pub os: String,
}

/// Antwort auf die Geraete-Anmeldung
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct LoginDeviceAck {
    pub err_code: ErrorCode,
    /// Ersatz-ID falls die alte ID/das Cookie ungueltig war (nur Controlling)
    pub new_device_id: Option<DeviceId>,
    /// Neues bzw. rotiertes Cookie
    pub new_cookie: Option<String>,
}

/// Anforderung einer frischen Geraete-ID aus dem Pool
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AllocateDeviceId {}

/// Antwort mit zugewiesener ID und Cookie
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AllocateDeviceIdAck {
    pub err_code: ErrorCode,
    pub device_id: Option<DeviceId>,
    pub cookie: Option<String>,
}

/// Keepalive-Anfrage (beantwortet wie jede andere Nachricht)
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct KeepAlive {}

/// Keepalive-Bestaetigung
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct KeepAliveAck {}

// ---------------------------------------------------------------------------
// Rendezvous-Nachrichten
// ---------------------------------------------------------------------------

/// Verbindungswunsch eines Controlling-Geraets zu einem Controlled-Geraet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConnection {
    /// Ziel: Geraete-ID des Controlled-Peers
    pub device_id: DeviceId,
    /// Vom Client vergebene Anfrage-ID, wird im Ack zurueckgereicht
    pub request_id: u32,
    /// Zugangsdaten fuer den Controlled-Peer (werden durchgereicht)
    pub access_token: String,
    pub client_version: String,
    pub transport_type: u32,
    /// Opake Streaming-Parameter, unveraendert durchgereicht
    #[serde(default)]
    pub streaming_params: serde_json::Value,
}

/// Antwort an das Controlling-Geraet mit den Raum-Zugangsdaten
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RequestConnectionAck {
    pub err_code: ErrorCode,
    pub request_id: u32,
    pub device_id: Option<DeviceId>,
    pub room_id: Option<RoomId>,
    pub client_id: Option<String>,
    pub auth_token: Option<String>,
    pub signaling_host: Option<String>,
    pub signaling_port: Option<u16>,
    pub p2p_username: Option<String>,
    pub p2p_password: Option<String>,
    #[serde(default)]
    pub reflex_servers: Vec<String>,
    #[serde(default)]
    pub streaming_params: serde_json::Value,
    pub transport_type: Option<u32>,
}

/// Aufforderung an das Controlled-Geraet, die Sitzung zu oeffnen
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct OpenConnection {
    pub signaling_host: String,
    pub signaling_port: u16,
    pub room_id: RoomId,
    pub service_id: String,
    pub auth_token: String,
    pub p2p_username: String,
    pub p2p_password: String,
    pub client_device_id: DeviceId,
    pub access_token: String,
    pub client_version: String,
    pub transport_type: u32,
    #[serde(default)]
    pub streaming_params: serde_json::Value,
    #[serde(default)]
    pub reflex_servers: Vec<String>,
    #[serde(default)]
    pub relay_servers: Vec<String>,
}

/// Antwort des Controlled-Geraets auf [`OpenConnection`]
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct OpenConnectionAck {
    pub err_code: ErrorCode,
    #[serde(default)]
    pub streaming_params: serde_json::Value,
    pub transport_type: Option<u32>,
}

/// Expliziter Abbau eines Auftrags (beide Rollen)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseConnection {
    pub room_id: RoomId,
}

// ---------------------------------------------------------------------------
// Signaling-Nachrichten
// ---------------------------------------------------------------------------

/// Beitritt zu einem Rendezvous-Raum
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRoom {
    pub room_id: RoomId,
    pub session_id: SessionId,
}

/// Antwort auf den Raumbeitritt
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct JoinRoomAck {
    pub err_code: ErrorCode,
}

/// Opake Signaling-Nachricht, wird an den Raum-Peer weitergereicht
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingMessage {
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Bestaetigung an den Absender einer Signaling-Nachricht
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SignalingMessageAck {
    pub err_code: ErrorCode,
}

// ---------------------------------------------------------------------------
// ProtocolMessage
// ---------------------------------------------------------------------------

/// Summe aller getypten Nachrichten des Protokolls
#[derive(Debug, Clone)]
pub enum ProtocolMessage {
    LoginDevice(LoginDevice),
    LoginDeviceAck(LoginDeviceAck),
    AllocateDeviceId(AllocateDeviceId),
    AllocateDeviceIdAck(AllocateDeviceIdAck),
    KeepAlive(KeepAlive),
    KeepAliveAck(KeepAliveAck),
    SignalingMessage(SignalingMessage),
    SignalingMessageAck(SignalingMessageAck),
    JoinRoom(JoinRoom),
    JoinRoomAck(JoinRoomAck),
    RequestConnection(RequestConnection),
    RequestConnectionAck(RequestConnectionAck),
    OpenConnection(OpenConnection),
    OpenConnectionAck(OpenConnectionAck),
    CloseConnection(CloseConnection),
}

impl ProtocolMessage {
    /// Gibt die Wire-Typ-ID der Nachricht zurueck
    pub fn type_id(&self) -> u32 {
        match self {
            Self::LoginDevice(_) => type_id::LOGIN_DEVICE,
            Self::LoginDeviceAck(_) => type_id::LOGIN_DEVICE_ACK,
            Self::AllocateDeviceId(_) => type_id::ALLOCATE_DEVICE_ID,
            Self::AllocateDeviceIdAck(_) => type_id::ALLOCATE_DEVICE_ID_ACK,
            Self::KeepAlive(_) => type_id::KEEP_ALIVE,
            Self::KeepAliveAck(_) => type_id::KEEP_ALIVE_ACK,
            Self::SignalingMessage(_) => type_id::SIGNALING_MESSAGE,
            Self::SignalingMessageAck(_) => type_id::SIGNALING_MESSAGE_ACK,
            Self::JoinRoom(_) => type_id::JOIN_ROOM,
            Self::JoinRoomAck(_) => type_id::JOIN_ROOM_ACK,
            Self::RequestConnection(_) => type_id::REQUEST_CONNECTION,
            Self::RequestConnectionAck(_) => type_id::REQUEST_CONNECTION_ACK,
            Self::OpenConnection(_) => type_id::OPEN_CONNECTION,
            Self::OpenConnectionAck(_) => type_id::OPEN_CONNECTION_ACK,
            Self::CloseConnection(_) => type_id::CLOSE_CONNECTION,
        }
    }

    /// Kodiert die Nachricht als Paket: 4 Byte Typ-ID (LE) + JSON-Koerper
    ///
    /// Der XOR-Schluessel ist immer 0 (Referenzverhalten).
    pub fn kodieren(&self) -> ProtocolResult<NetPacket> {
        let koerper = match self {
            Self::LoginDevice(m) => serde_json::to_vec(m)?,
            Self::LoginDeviceAck(m) => serde_json::to_vec(m)?,
            Self::AllocateDeviceId(m) => serde_json::to_vec(m)?,
            Self::AllocateDeviceIdAck(m) => serde_json::to_vec(m)?,
            Self::KeepAlive(m) => serde_json::to_vec(m)?,
            Self::KeepAliveAck(m) => serde_json::to_vec(m)?,
            Self::SignalingMessage(m) => serde_json::to_vec(m)?,
            Self::SignalingMessageAck(m) => serde_json::to_vec(m)?,
            Self::JoinRoom(m) => serde_json::to_vec(m)?,
            Self::JoinRoomAck(m) => serde_json::to_vec(m)?,
            Self::RequestConnection(m) => serde_json::to_vec(m)?,
            Self::RequestConnectionAck(m) => serde_json::to_vec(m)?,
            Self::OpenConnection(m) => serde_json::to_vec(m)?,
            Self::OpenConnectionAck(m) => serde_json::to_vec(m)?,
            Self::CloseConnection(m) => serde_json::to_vec(m)?,
        };

        let mut payload = BytesMut::with_capacity(4 + koerper.len());
        payload.put_u32_le(self.type_id());
        payload.put_slice(&koerper);
        Ok(NetPacket::neu(payload.freeze()))
    }
}

// ---------------------------------------------------------------------------
// DecoderRegistry
// ---------------------------------------------------------------------------

/// Dekodier-Funktion fuer einen registrierten Nachrichtentyp
pub type DecodeFn = fn(&[u8]) -> Result<ProtocolMessage, serde_json::Error>;

/// Registry: Typ-ID -> Dekodier-Funktion
///
/// Wird einmalig beim Prozessstart befuellt. Doppelte Registrierung
/// derselben Typ-ID ist ein No-op (idempotent).
#[derive(Debug, Default)]
pub struct DecoderRegistry {
    decoder: HashMap<u32, DecodeFn>,
}

impl DecoderRegistry {
    /// Erstellt eine leere Registry
    pub fn neu() -> Self {
        Self::default()
    }

    /// Erstellt eine Registry mit allen Standard-Nachrichtentypen
    pub fn standard() -> Self {
        let mut registry = Self::neu();
        registry.registrieren(type_id::LOGIN_DEVICE, |b| {
            Ok(ProtocolMessage::LoginDevice(serde_json::from_slice(b)?))
        });
        registry.registrieren(type_id::LOGIN_DEVICE_ACK, |b| {
            Ok(ProtocolMessage::LoginDeviceAck(serde_json::from_slice(b)?))
        });
        registry.registrieren(type_id::ALLOCATE_DEVICE_ID, |b| {
            Ok(ProtocolMessage::AllocateDeviceId(serde_json::from_slice(b)?))
        });
        registry.registrieren(type_id::ALLOCATE_DEVICE_ID_ACK, |b| {
            Ok(ProtocolMessage::AllocateDeviceIdAck(serde_json::from_slice(
                b,
            )?))
        });
        registry.registrieren(type_id::KEEP_ALIVE, |b| {
            Ok(ProtocolMessage::KeepAlive(serde_json::from_slice(b)?))
        });
        registry.registrieren(type_id::KEEP_ALIVE_ACK, |b| {
            Ok(ProtocolMessage::KeepAliveAck(serde_json::from_slice(b)?))
        });
        registry.registrieren(type_id::SIGNALING_MESSAGE, |b| {
            Ok(ProtocolMessage::SignalingMessage(serde_json::from_slice(b)?))
        });
        registry.registrieren(type_id::SIGNALING_MESSAGE_ACK, |b| {
            Ok(ProtocolMessage::SignalingMessageAck(serde_json::from_slice(
                b,
            )?))
        });
        registry.registrieren(type_id::JOIN_ROOM, |b| {
            Ok(ProtocolMessage::JoinRoom(serde_json::from_slice(b)?))
        });
        registry.registrieren(type_id::JOIN_ROOM_ACK, |b| {
            Ok(ProtocolMessage::JoinRoomAck(serde_json::from_slice(b)?))
        });
        registry.registrieren(type_id::REQUEST_CONNECTION, |b| {
            Ok(ProtocolMessage::RequestConnection(serde_json::from_slice(
                b,
            )?))
        });
        registry.registrieren(type_id::REQUEST_CONNECTION_ACK, |b| {
            Ok(ProtocolMessage::RequestConnectionAck(
                serde_json::from_slice(b)?,
            ))
        });
        registry.registrieren(type_id::OPEN_CONNECTION, |b| {
            Ok(ProtocolMessage::OpenConnection(serde_json::from_slice(b)?))
        });
        registry.registrieren(type_id::OPEN_CONNECTION_ACK, |b| {
            Ok(ProtocolMessage::OpenConnectionAck(serde_json::from_slice(
                b,
            )?))
        });
        registry.registrieren(type_id::CLOSE_CONNECTION, |b| {
            Ok(ProtocolMessage::CloseConnection(serde_json::from_slice(b)?))
        });
        registry
    }

    /// Registriert eine Dekodier-Funktion fuer eine Typ-ID
    ///
    /// Bereits registrierte Typ-IDs bleiben unveraendert.
    pub fn registrieren(&mut self, type_id: u32, f: DecodeFn) {
        self.decoder.entry(type_id).or_insert(f);
    }

    /// Dekodiert ein Paket zu einer getypten Nachricht
    ///
    /// Gibt `None` zurueck wenn das Paket verworfen wurde (zu kurz,
    /// unbekannter Typ, fehlerhafter Koerper) – kein Fehler, die Verbindung
    /// bleibt offen.
    pub fn dekodieren(&self, paket: &NetPacket) -> Option<ProtocolMessage> {
        if paket.payload.len() < 4 {
            tracing::warn!(
                laenge = paket.payload.len(),
                "Paket zu kurz fuer Typ-ID – verworfen"
            );
            return None;
        }

        let type_id = u32::from_le_bytes([
            paket.payload[0],
            paket.payload[1],
            paket.payload[2],
            paket.payload[3],
        ]);
        let koerper = &paket.payload[4..];

        let Some(decode) = self.decoder.get(&type_id) else {
            tracing::warn!(type_id, "Unbekannter Nachrichtentyp – verworfen");
            return None;
        };

        match decode(koerper) {
            Ok(nachricht) => Some(nachricht),
            Err(fehler) => {
                tracing::warn!(type_id, fehler = %fehler, "Dekodierung fehlgeschlagen – verworfen");
                None
            }
        }
    }

    /// Gibt die Anzahl der registrierten Typen zurueck
    pub fn anzahl(&self) -> usize {
        self.decoder.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn kodieren_setzt_type_id_praefix() {
        let nachricht = ProtocolMessage::KeepAlive(KeepAlive {});
        let paket = nachricht.kodieren().unwrap();
        assert_eq!(paket.xor_key, 0);
        assert_eq!(paket.pruefsumme, 0);
        let praefix =
            u32::from_le_bytes([paket.payload[0], paket.payload[1], paket.payload[2], paket.payload[3]]);
        assert_eq!(praefix, type_id::KEEP_ALIVE);
    }

    #[test]
    fn round_trip_login_device() {
        let registry = DecoderRegistry::standard();
        let original = LoginDevice {
            device_id: DeviceId(12345678),
            cookie: "keks".into(),
            allow_control: true,
            version_major: 1,
            version_minor: 2,
            version_patch: 3,
            os: "linux".into(),
        };
        let paket = ProtocolMessage::LoginDevice(original.clone())
            .kodieren()
            .unwrap();

        match registry.dekodieren(&paket) {
            Some(ProtocolMessage::LoginDevice(dekodiert)) => {
                assert_eq!(dekodiert.device_id, original.device_id);
                assert_eq!(dekodiert.cookie, original.cookie);
                assert!(dekodiert.allow_control);
            }
            andere => panic!("LoginDevice erwartet, erhalten: {:?}", andere),
        }
    }

    #[test]
    fn unbekannter_typ_wird_verworfen() {
        let registry = DecoderRegistry::standard();
        let mut payload = BytesMut::new();
        payload.put_u32_le(0xdead);
        payload.put_slice(b"{}");
        let paket = NetPacket::neu(payload.freeze());
        assert!(registry.dekodieren(&paket).is_none());
    }

    #[test]
    fn fehlerhafter_koerper_wird_verworfen() {
        let registry = DecoderRegistry::standard();
        let mut payload = BytesMut::new();
        payload.put_u32_le(type_id::LOGIN_DEVICE);
        payload.put_slice(b"kein json");
        let paket = NetPacket::neu(payload.freeze());
        assert!(registry.dekodieren(&paket).is_none());
    }

    #[test]
    fn zu_kurzes_paket_wird_verworfen() {
        let registry = DecoderRegistry::standard();
        let paket = NetPacket::neu(Bytes::from_static(&[0x01, 0x02]));
        assert!(registry.dekodieren(&paket).is_none());
    }

    #[test]
    fn registrierung_ist_idempotent() {
        let mut registry = DecoderRegistry::standard();
        let vorher = registry.anzahl();
        registry.registrieren(type_id::KEEP_ALIVE, |b| {
            Ok(ProtocolMessage::KeepAlive(serde_json::from_slice(b)?))
        });
        assert_eq!(registry.anzahl(), vorher);

        // Der urspruengliche Decoder bleibt aktiv
        let paket = ProtocolMessage::KeepAlive(KeepAlive {}).kodieren().unwrap();
        assert!(matches!(
            registry.dekodieren(&paket),
            Some(ProtocolMessage::KeepAlive(_))
        ));
    }

    #[test]
    fn error_code_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::RequestConnectionPeerNotOnline).unwrap();
        assert_eq!(json, "\"REQUEST_CONNECTION_PEER_NOT_ONLINE\"");
    }
}
