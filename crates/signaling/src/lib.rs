//! fernlink-signaling – Rendezvous-Raeume und Relay
//!
//! Unter einer Raum-ID treffen sich genau zwei Signaling-Peers (die beiden
//! Seiten eines Auftrags) und tauschen opake Signaling-Nachrichten aus.
//! Der Server vermittelt nur; die Inhalte bleiben unangetastet.

pub mod handlers;
pub mod room;

pub use room::{RoomRegistry, RoomStatus};
