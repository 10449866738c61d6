//! fernlink-broker – Geraete-Sessions und Auftrags-Vermittlung
//!
//! Der Broker paart ein Controlling-Geraet mit einem Controlled-Geraet:
//! - [`session`]: lebende Geraete-Sessions pro Rolle
//!   (Connected -> DeviceLogged -> Disconnected).
//! - [`order`]: aktive Auftraege mit Hoechstens-einer-pro-Geraet-Invariante
//!   und kurzlebigen Zugangsdaten.
//! - [`device_id`]: Zuteilung und Cookie-Pruefung der Geraete-Identitaeten.
//! - [`handlers`]: die Nachrichten-Handler beider Rollen.

pub mod device_id;
pub mod error;
pub mod handlers;
pub mod order;
pub mod session;
pub mod state;

pub use error::{BrokerError, BrokerResult};
pub use order::{Order, OrderBroker, RendezvousConfig};
pub use session::{DeviceSession, DeviceSessionRegistry, SessionStatus};
pub use state::BrokerState;
