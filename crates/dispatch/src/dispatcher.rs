//! Message-Dispatcher – statische Handler-Tabellen und Zustellung
//!
//! Der Dispatcher wird einmalig beim Prozessstart ueber den
//! [`DispatcherBuilder`] aufgebaut: eine flache Tabelle
//! `Typ-ID -> Handler` plus je ein Handler pro Verbindungs-Ereignis.
//! Doppelte Registrierung ist ein Startfehler.
//!
//! Zustellung:
//! - Unbekannte Typ-ID: loggen, Nachricht verwerfen, Verbindung bleibt offen.
//! - Handler-Rueckgabe `Ok(Some(antwort))`: Antwort wird automatisch auf
//!   derselben Verbindung gesendet.
//! - Handler-Fehler: loggen, keine Antwort, Verbindung bleibt offen.
//!
//! Alle Aufgaben laufen auf dem gemeinsamen tokio-Worker-Pool, nie inline
//! auf dem Netzwerk-I/O-Task. Die Reihenfolge pro Verbindung stellt der
//! Ordered-Dispatch der [`Connection`](crate::connection::Connection) sicher;
//! Lifecycle-Ereignisse laufen durch dieselbe Warteschlange und sind damit
//! strikt vor der ersten bzw. nach der letzten Nachricht an der Reihe.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use fernlink_core::ConnectionId;
use fernlink_protocol::ProtocolMessage;

use crate::connection::{Connection, DispatchAufgabe};
use crate::error::{DispatchError, DispatchResult};
use crate::registry::ConnectionRegistry;

// ---------------------------------------------------------------------------
// Handler-Typen
// ---------------------------------------------------------------------------

/// Geboxte Future eines Nachrichten-Handlers
pub type HandlerFuture =
    Pin<Box<dyn Future<Output = anyhow::Result<Option<ProtocolMessage>>> + Send>>;

/// Nachrichten-Handler: bekommt Verbindungs-ID und Nachricht, gibt optional
/// eine Antwort zurueck die auf derselben Verbindung gesendet wird
type MessageHandler = Arc<dyn Fn(ConnectionId, ProtocolMessage) -> HandlerFuture + Send + Sync>;

/// Geboxte Future eines Ereignis-Handlers
type EreignisFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handler fuer Verbindungs-Ereignisse
type EventHandler = Arc<dyn Fn(ConnectionId) -> EreignisFuture + Send + Sync>;

/// Lifecycle-Ereignisse einer Verbindung
///
/// Pro Verbindung werden genau einmal `Verbunden` und danach genau eines
/// von `Geschlossen`/`UnerwartetGeschlossen` zugestellt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    Verbunden,
    Geschlossen,
    UnerwartetGeschlossen,
}

// ---------------------------------------------------------------------------
// DispatcherBuilder
// ---------------------------------------------------------------------------

/// Baut die statischen Handler-Tabellen eines Dispatchers auf
///
/// Registrierung passiert genau einmal beim Start; doppelte Schluessel sind
/// ein Fehler.
#[derive(Default)]
pub struct DispatcherBuilder {
    handler: HashMap<u32, MessageHandler>,
    ereignisse: HashMap<ConnectionEvent, EventHandler>,
}

impl DispatcherBuilder {
    /// Erstellt einen leeren Builder
    pub fn neu() -> Self {
        Self::default()
    }

    /// Registriert einen Nachrichten-Handler fuer eine Typ-ID
    pub fn handler<F, Fut>(&mut self, type_id: u32, handler: F) -> DispatchResult<&mut Self>
    where
        F: Fn(ConnectionId, ProtocolMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<ProtocolMessage>>> + Send + 'static,
    {
        if self.handler.contains_key(&type_id) {
            return Err(DispatchError::DoppelterHandler(type_id));
        }
        self.handler.insert(
            type_id,
            Arc::new(move |verbindung, nachricht| -> HandlerFuture {
                Box::pin(handler(verbindung, nachricht))
            }),
        );
        Ok(self)
    }

    /// Registriert einen Handler fuer ein Verbindungs-Ereignis
    pub fn ereignis<F, Fut>(
        &mut self,
        ereignis: ConnectionEvent,
        handler: F,
    ) -> DispatchResult<&mut Self>
    where
        F: Fn(ConnectionId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.ereignisse.contains_key(&ereignis) {
            return Err(DispatchError::DoppelterEreignisHandler(ereignis));
        }
        self.ereignisse.insert(
            ereignis,
            Arc::new(move |verbindung| -> EreignisFuture { Box::pin(handler(verbindung)) }),
        );
        Ok(self)
    }

    /// Schliesst die Registrierung ab
    pub fn bauen(self, registry: Arc<ConnectionRegistry>) -> Arc<Dispatcher> {
        for type_id in self.handler.keys() {
            tracing::debug!(type_id, "Nachrichten-Handler registriert");
        }
        Arc::new(Dispatcher {
            handler: self.handler,
            ereignisse: self.ereignisse,
            registry,
        })
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Zentraler Dispatcher einer Rolle (Controlling, Controlled oder Signaling)
///
/// Wird von vielen Verbindungen geteilt; der Transport meldet
/// Verbindungs-Lifecycle und eingehende Nachrichten, der Dispatcher stellt
/// sie geordnet auf dem Worker-Pool zu.
pub struct Dispatcher {
    handler: HashMap<u32, MessageHandler>,
    ereignisse: HashMap<ConnectionEvent, EventHandler>,
    registry: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    /// Gibt die Verbindungs-Registry dieser Rolle zurueck
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Meldet eine frisch angenommene Verbindung
    pub fn verbindung_angenommen(self: &Arc<Self>, verbindung: Arc<Connection>) {
        tracing::debug!(verbindung = %verbindung.id(), "Verbindung angenommen");
        self.registry.einfuegen(Arc::clone(&verbindung));
        self.einreihen(
            &verbindung,
            DispatchAufgabe::Ereignis(ConnectionEvent::Verbunden),
        );
    }

    /// Meldet eine geschlossene Verbindung
    ///
    /// `unerwartet` unterscheidet den sauberen Verbindungsabbau vom
    /// Fehlerfall (Framing-Fehler, IO-Fehler).
    pub fn verbindung_geschlossen(
        self: &Arc<Self>,
        verbindung: &Arc<Connection>,
        unerwartet: bool,
    ) {
        verbindung.schliessen();
        self.registry.entfernen(verbindung.id());

        let ereignis = if unerwartet {
            tracing::debug!(verbindung = %verbindung.id(), "Verbindung unerwartet geschlossen");
            ConnectionEvent::UnerwartetGeschlossen
        } else {
            tracing::debug!(verbindung = %verbindung.id(), "Verbindung geschlossen");
            ConnectionEvent::Geschlossen
        };
        self.einreihen(verbindung, DispatchAufgabe::Ereignis(ereignis));
    }

    /// Meldet eine eingegangene Nachricht
    pub fn nachricht_empfangen(
        self: &Arc<Self>,
        verbindung: &Arc<Connection>,
        nachricht: ProtocolMessage,
    ) {
        self.einreihen(verbindung, DispatchAufgabe::Nachricht(nachricht));
    }

    /// Reiht eine Aufgabe in den Ordered-Dispatch der Verbindung ein
    ///
    /// War die Verbindung frei, startet ein Worker-Task, der Aufgaben
    /// abarbeitet bis die Warteschlange leer ist.
    fn einreihen(self: &Arc<Self>, verbindung: &Arc<Connection>, aufgabe: DispatchAufgabe) {
        let Some(erste) = verbindung.aufgabe_einreihen(aufgabe) else {
            return;
        };

        let dispatcher = Arc::clone(self);
        let verbindung = Arc::clone(verbindung);
        tokio::spawn(async move {
            let mut aktuelle = Some(erste);
            while let Some(aufgabe) = aktuelle {
                dispatcher.aufgabe_verarbeiten(&verbindung, aufgabe).await;
                aktuelle = verbindung.aufgabe_abgeschlossen();
            }
        });
    }

    async fn aufgabe_verarbeiten(&self, verbindung: &Arc<Connection>, aufgabe: DispatchAufgabe) {
        match aufgabe {
            DispatchAufgabe::Ereignis(ereignis) => {
                if let Some(handler) = self.ereignisse.get(&ereignis) {
                    handler(verbindung.id()).await;
                }
            }
            DispatchAufgabe::Nachricht(nachricht) => {
                let type_id = nachricht.type_id();
                let Some(handler) = self.handler.get(&type_id) else {
                    tracing::warn!(
                        verbindung = %verbindung.id(),
                        type_id,
                        "Kein Handler fuer Nachrichtentyp – verworfen"
                    );
                    return;
                };

                match handler(verbindung.id(), nachricht).await {
                    Ok(Some(antwort)) => {
                        if !verbindung.senden(antwort) {
                            tracing::debug!(
                                verbindung = %verbindung.id(),
                                "Antwort nicht zustellbar (Verbindung geschlossen)"
                            );
                        }
                    }
                    Ok(None) => {}
                    Err(fehler) => {
                        tracing::warn!(
                            verbindung = %verbindung.id(),
                            type_id,
                            fehler = %fehler,
                            "Handler fehlgeschlagen – keine Antwort"
                        );
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
