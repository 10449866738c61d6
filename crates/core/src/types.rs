//! Gemeinsame Identifikationstypen fuer Fernlink
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prozess-eindeutige ID einer Transport-Verbindung
///
/// Wird beim Annehmen der Verbindung monoton aufsteigend vergeben
/// (siehe fernlink-dispatch) und ist nie 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Langlebige Geraete-ID aus dem endlichen ID-Pool
///
/// Wird einem Geraet einmalig zugeteilt und zusammen mit dem rotierenden
/// Cookie zur Wiedererkennung verwendet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rendezvous-Raum-ID
///
/// Wird vom OrderBroker als UUID erzeugt und von beiden Peers beim
/// Signaling-Server unveraendert wiederverwendet.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    /// Erzeugt eine neue zufaellige RoomId
    pub fn erzeugen() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session-ID eines Signaling-Peers innerhalb eines Raums
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_eindeutig() {
        let a = RoomId::erzeugen();
        let b = RoomId::erzeugen();
        assert_ne!(a, b, "Zwei neue RoomIds muessen verschieden sein");
    }

    #[test]
    fn connection_id_display() {
        let id = ConnectionId(7);
        assert_eq!(id.to_string(), "conn:7");
    }

    #[test]
    fn device_id_display_ohne_praefix() {
        // Geraete-IDs erscheinen in Acks und Logs als nackte Zahl
        assert_eq!(DeviceId(12345678).to_string(), "12345678");
    }

    #[test]
    fn ids_sind_serde_kompatibel() {
        let geraet = DeviceId(42);
        let json = serde_json::to_string(&geraet).unwrap();
        assert_eq!(json, "42");
        let geraet2: DeviceId = serde_json::from_str(&json).unwrap();
        assert_eq!(geraet, geraet2);

        let raum = RoomId::erzeugen();
        let json = serde_json::to_string(&raum).unwrap();
        let raum2: RoomId = serde_json::from_str(&json).unwrap();
        assert_eq!(raum, raum2);
    }
}
