//! fernlink-dispatch – Verbindungs-Actor, Dispatcher und Transport
//!
//! Kern der Nebenlaeufigkeit: Nachrichten einer Verbindung werden strikt in
//! Eingangsreihenfolge und nie gleichzeitig verarbeitet, waehrend viele
//! Verbindungen parallel auf dem gemeinsamen tokio-Worker-Pool laufen.
//!
//! - [`connection`]: eine logische Verbindung mit Sende-Kanal und
//!   Ordered-Dispatch-Kontrollblock (busy-Flag + Warteschlange).
//! - [`registry`]: Abbildung ConnectionId -> lebende Verbindung, erlaubt
//!   Sendungen an fremde Verbindungen (z.B. Broker -> Controlled-Peer).
//! - [`dispatcher`]: statische Handler-Tabellen (Typ-ID -> Handler,
//!   Lifecycle-Ereignis -> Handler) und die eigentliche Zustellung.
//! - [`tcp`]: TCP/TLS-Listener, der pro Verbindung eine Lese-Schleife und
//!   einen Schreib-Task betreibt.

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod tcp;

pub use connection::{Connection, ConnectionStatus};
pub use dispatcher::{ConnectionEvent, Dispatcher, DispatcherBuilder, HandlerFuture};
pub use error::{DispatchError, DispatchResult};
pub use registry::ConnectionRegistry;
pub use tcp::SocketServer;
