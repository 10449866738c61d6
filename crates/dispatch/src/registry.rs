//! ConnectionRegistry – lebende Verbindungen, indiziert nach ID
//!
//! Handler muessen Nachrichten auch an fremde Verbindungen schicken koennen
//! (der Broker reicht z.B. OpenConnection an den Controlled-Peer weiter).
//! Die Registry haelt dafuer alle lebenden Verbindungen einer Rolle.
//! Eintraege entstehen beim Annehmen und verschwinden beim Schliessen der
//! Verbindung.

use std::sync::Arc;

use dashmap::DashMap;

use fernlink_core::ConnectionId;
use fernlink_protocol::ProtocolMessage;

use crate::connection::Connection;

/// Thread-sichere Abbildung ConnectionId -> lebende Verbindung
#[derive(Default)]
pub struct ConnectionRegistry {
    verbindungen: DashMap<ConnectionId, Arc<Connection>>,
}

impl ConnectionRegistry {
    /// Erstellt eine leere Registry
    pub fn neu() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Nimmt eine Verbindung auf
    pub(crate) fn einfuegen(&self, verbindung: Arc<Connection>) {
        self.verbindungen.insert(verbindung.id(), verbindung);
    }

    /// Entfernt eine Verbindung
    pub(crate) fn entfernen(&self, id: ConnectionId) {
        self.verbindungen.remove(&id);
    }

    /// Sendet eine Nachricht an die angegebene Verbindung
    ///
    /// Gibt `false` zurueck wenn die Verbindung nicht (mehr) existiert oder
    /// ihr Schreibkanal bereits geschlossen ist.
    pub fn senden(&self, id: ConnectionId, nachricht: ProtocolMessage) -> bool {
        match self.verbindungen.get(&id) {
            Some(verbindung) => verbindung.senden(nachricht),
            None => {
                tracing::debug!(verbindung = %id, "Senden an unbekannte Verbindung");
                false
            }
        }
    }

    /// Gibt die Anzahl der lebenden Verbindungen zurueck
    pub fn anzahl(&self) -> usize {
        self.verbindungen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fernlink_protocol::message::KeepAlive;
    use tokio::sync::mpsc;

    #[test]
    fn senden_an_registrierte_verbindung() {
        let registry = ConnectionRegistry::neu();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let verbindung = Connection::neu(tx);
        let id = verbindung.id();

        registry.einfuegen(verbindung);
        assert_eq!(registry.anzahl(), 1);
        assert!(registry.senden(id, ProtocolMessage::KeepAlive(KeepAlive {})));
        assert!(rx.try_recv().is_ok());

        registry.entfernen(id);
        assert_eq!(registry.anzahl(), 0);
        assert!(!registry.senden(id, ProtocolMessage::KeepAlive(KeepAlive {})));
    }
}
