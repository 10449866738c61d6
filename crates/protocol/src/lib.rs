//! fernlink-protocol – Wire-Format und Nachrichtentypen
//!
//! Zwei Schichten:
//! - [`wire`]: rahmt rohe Bytes in [`wire::NetPacket`]s (12-Byte-Header mit
//!   Magic, XOR-Schluessel, Laenge und Pruefsumme).
//! - [`message`]: kodiert/dekodiert Pakete in getypte
//!   [`message::ProtocolMessage`]s ueber eine Typ-ID-Registry.

pub mod error;
pub mod message;
pub mod wire;

pub use error::{ProtocolError, ProtocolResult};
pub use message::{DecoderRegistry, ErrorCode, ProtocolMessage};
pub use wire::{NetPacket, PacketCodec};
