//! fernlink-core – Gemeinsame Identifikationstypen
//!
//! Dieses Crate stellt die fundamentalen ID-Typen bereit, die von allen
//! anderen Fernlink-Crates gemeinsam genutzt werden.

pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use types::{ConnectionId, DeviceId, RoomId, SessionId};
