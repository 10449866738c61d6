//! Verbindungs-Actor – eine logische Verbindung mit Ordered-Dispatch
//!
//! Jede Verbindung besitzt eine prozess-eindeutige, monoton aufsteigende ID,
//! einen Sende-Kanal (ein einzelner Schreib-Task pro Verbindung garantiert,
//! dass sich Schreibvorgaenge nie ueberlappen) und den
//! Ordered-Dispatch-Kontrollblock:
//!
//! - `busy == false`: die naechste Aufgabe wird sofort auf den Worker-Pool
//!   gelegt und `busy` gesetzt.
//! - `busy == true`: die Aufgabe wandert in die Warteschlange. Nach jedem
//!   Aufgaben-Ende wird entweder die naechste Aufgabe gestartet oder `busy`
//!   geloescht.
//!
//! Das ergibt strikte FIFO-Verarbeitung mit hoechstens einer laufenden
//! Aufgabe pro Verbindung, ohne eigenen Thread pro Verbindung. Die beiden
//! Queue-Operationen sind O(1) und halten den Lock nur fuer die
//! Zustandsaenderung.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use fernlink_core::ConnectionId;
use fernlink_protocol::ProtocolMessage;

use crate::dispatcher::ConnectionEvent;

/// Zaehler fuer prozess-eindeutige Verbindungs-IDs (beginnt bei 1)
static NAECHSTE_VERBINDUNGS_ID: AtomicU64 = AtomicU64::new(1);

/// Zustand der Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Verbunden,
    Geschlossen,
}

/// Eine Aufgabe im Ordered-Dispatch einer Verbindung
///
/// Lifecycle-Ereignisse laufen durch dieselbe Warteschlange wie Nachrichten:
/// damit ist Connected garantiert vor der ersten Nachricht und Closed
/// garantiert nach der letzten empfangenen Nachricht an der Reihe.
#[derive(Debug)]
pub(crate) enum DispatchAufgabe {
    Ereignis(ConnectionEvent),
    Nachricht(ProtocolMessage),
}

/// Ordered-Dispatch-Kontrollblock
#[derive(Debug, Default)]
struct DispatchBlock {
    busy: bool,
    wartend: VecDeque<DispatchAufgabe>,
}

/// Eine logische Verbindung
///
/// Wird vom Transport erzeugt und vom Dispatcher sowie den Registries nur
/// ueber ihre ID bzw. als `Arc` referenziert.
pub struct Connection {
    id: ConnectionId,
    status: Mutex<ConnectionStatus>,
    ausgang: mpsc::UnboundedSender<ProtocolMessage>,
    dispatch: Mutex<DispatchBlock>,
}

impl Connection {
    /// Erstellt eine neue Verbindung mit frischer ID
    ///
    /// `ausgang` wird vom Schreib-Task der Verbindung geleert; alternative
    /// Transporte (oder Tests) koennen hier einen eigenen Kanal anschliessen.
    pub fn neu(ausgang: mpsc::UnboundedSender<ProtocolMessage>) -> std::sync::Arc<Self> {
        let id = ConnectionId(NAECHSTE_VERBINDUNGS_ID.fetch_add(1, Ordering::Relaxed));
        std::sync::Arc::new(Self {
            id,
            status: Mutex::new(ConnectionStatus::Verbunden),
            ausgang,
            dispatch: Mutex::new(DispatchBlock::default()),
        })
    }

    /// Gibt die Verbindungs-ID zurueck
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Gibt den aktuellen Status zurueck
    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    /// Markiert die Verbindung als geschlossen
    pub(crate) fn schliessen(&self) {
        *self.status.lock() = ConnectionStatus::Geschlossen;
    }

    /// Sendet eine Nachricht asynchron auf dieser Verbindung
    ///
    /// Von jedem Thread/Task aus aufrufbar; die Nachricht wird auf den
    /// Schreib-Task der Verbindung gereicht. Gibt `false` zurueck wenn die
    /// Verbindung bereits geschlossen ist.
    pub fn senden(&self, nachricht: ProtocolMessage) -> bool {
        self.ausgang.send(nachricht).is_ok()
    }

    /// Reiht eine Aufgabe ein
    ///
    /// Gibt `Some(aufgabe)` zurueck wenn die Verbindung frei war und die
    /// Aufgabe sofort gestartet werden muss (busy wurde gesetzt), sonst
    /// `None` (die Aufgabe wartet in der Queue).
    pub(crate) fn aufgabe_einreihen(&self, aufgabe: DispatchAufgabe) -> Option<DispatchAufgabe> {
        let mut block = self.dispatch.lock();
        if block.busy {
            block.wartend.push_back(aufgabe);
            None
        } else {
            block.busy = true;
            Some(aufgabe)
        }
    }

    /// Meldet das Ende einer Aufgabe
    ///
    /// Gibt die naechste wartende Aufgabe zurueck oder loescht das
    /// busy-Flag wenn die Queue leer ist.
    pub(crate) fn aufgabe_abgeschlossen(&self) -> Option<DispatchAufgabe> {
        let mut block = self.dispatch.lock();
        match block.wartend.pop_front() {
            Some(naechste) => Some(naechste),
            None => {
                block.busy = false;
                None
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fernlink_protocol::message::KeepAlive;

    fn testverbindung() -> (
        std::sync::Arc<Connection>,
        mpsc::UnboundedReceiver<ProtocolMessage>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::neu(tx), rx)
    }

    #[test]
    fn ids_steigen_monoton() {
        let (a, _rx_a) = testverbindung();
        let (b, _rx_b) = testverbindung();
        assert!(b.id().0 > a.id().0);
    }

    #[test]
    fn senden_liefert_nachricht_an_schreibkanal() {
        let (verbindung, mut rx) = testverbindung();
        assert!(verbindung.senden(ProtocolMessage::KeepAlive(KeepAlive {})));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ProtocolMessage::KeepAlive(_)
        ));
    }

    #[test]
    fn senden_nach_kanalende_schlaegt_fehl() {
        let (verbindung, rx) = testverbindung();
        drop(rx);
        assert!(!verbindung.senden(ProtocolMessage::KeepAlive(KeepAlive {})));
    }

    #[test]
    fn einreihen_startet_nur_bei_freier_verbindung() {
        let (verbindung, _rx) = testverbindung();

        let erste = verbindung
            .aufgabe_einreihen(DispatchAufgabe::Nachricht(ProtocolMessage::KeepAlive(
                KeepAlive {},
            )))
            .expect("Erste Aufgabe muss sofort starten");
        assert!(matches!(erste, DispatchAufgabe::Nachricht(_)));

        // Verbindung ist jetzt busy – weitere Aufgaben warten
        assert!(verbindung
            .aufgabe_einreihen(DispatchAufgabe::Nachricht(ProtocolMessage::KeepAlive(
                KeepAlive {},
            )))
            .is_none());

        // Nach Abschluss kommt genau die wartende Aufgabe
        assert!(verbindung.aufgabe_abgeschlossen().is_some());
        // Queue leer -> busy geloescht -> naechste Aufgabe startet sofort
        assert!(verbindung.aufgabe_abgeschlossen().is_none());
        assert!(verbindung
            .aufgabe_einreihen(DispatchAufgabe::Ereignis(ConnectionEvent::Geschlossen))
            .is_some());
    }
}
