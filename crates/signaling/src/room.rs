//! Raum-Registry – genau zwei Sessions pro Rendezvous-Raum
//!
//! Ein Raum entsteht wenn die erste Session beitritt (`OneSession`), nimmt
//! genau eine weitere Session mit anderer Identitaet auf (`TwoSession`) und
//! wird beim Verlassen der letzten Session freigegeben (`CloseWait`).
//! Beide Maps liegen hinter einem Lock; zusammengesetzte Operationen
//! (pruefen + eintragen, verlassen + aufraeumen) sind atomar.

use std::collections::HashMap;

use parking_lot::Mutex;

use fernlink_core::{ConnectionId, RoomId, SessionId};

/// Zustand eines Raums
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    /// Eine Session wartet auf ihren Peer
    OneSession,
    /// Beide Sessions sind da, Relay ist moeglich
    TwoSession,
    /// Letzte Session hat den Raum verlassen, Raum wird freigegeben
    CloseWait,
}

#[derive(Debug, Clone)]
struct Teilnehmer {
    session_id: SessionId,
    connection_id: ConnectionId,
}

#[derive(Debug)]
struct Room {
    teilnehmer: Vec<Teilnehmer>,
    status: RoomStatus,
}

#[derive(Default)]
struct RegistryInner {
    raeume: HashMap<RoomId, Room>,
    nach_verbindung: HashMap<ConnectionId, (SessionId, RoomId)>,
}

/// Registry aller aktiven Rendezvous-Raeume
#[derive(Default)]
pub struct RoomRegistry {
    inner: Mutex<RegistryInner>,
}

impl RoomRegistry {
    /// Erstellt eine leere Registry
    pub fn neu() -> Self {
        Self::default()
    }

    /// Tritt einem Raum bei
    ///
    /// Legt den Raum an falls er fehlt. Abgelehnt wird der Beitritt wenn
    /// der Raum schon zwei Sessions hat, die Identitaet des einzigen
    /// Bewohners gleich ist (doppelter Beitritt) oder die Verbindung
    /// bereits in einem Raum sitzt.
    pub fn beitreten(
        &self,
        room_id: RoomId,
        session_id: SessionId,
        connection_id: ConnectionId,
    ) -> bool {
        let mut inner = self.inner.lock();

        if inner.nach_verbindung.contains_key(&connection_id) {
            tracing::warn!(
                verbindung = %connection_id,
                raum = %room_id,
                "Beitritt abgelehnt: Verbindung sitzt bereits in einem Raum"
            );
            return false;
        }

        match inner.raeume.get_mut(&room_id) {
            None => {
                inner.raeume.insert(
                    room_id.clone(),
                    Room {
                        teilnehmer: vec![Teilnehmer {
                            session_id: session_id.clone(),
                            connection_id,
                        }],
                        status: RoomStatus::OneSession,
                    },
                );
                inner
                    .nach_verbindung
                    .insert(connection_id, (session_id.clone(), room_id.clone()));
                tracing::info!(session = %session_id, raum = %room_id, "Raum angelegt");
                true
            }
            Some(raum) => {
                if raum.teilnehmer.len() != 1 {
                    tracing::warn!(
                        session = %session_id,
                        raum = %room_id,
                        "Beitritt abgelehnt: Raum ist voll"
                    );
                    return false;
                }
                if raum.teilnehmer[0].session_id == session_id {
                    tracing::warn!(
                        session = %session_id,
                        raum = %room_id,
                        "Beitritt abgelehnt: Session sitzt bereits im Raum"
                    );
                    return false;
                }
                raum.teilnehmer.push(Teilnehmer {
                    session_id: session_id.clone(),
                    connection_id,
                });
                raum.status = RoomStatus::TwoSession;
                inner
                    .nach_verbindung
                    .insert(connection_id, (session_id.clone(), room_id.clone()));
                tracing::info!(session = %session_id, raum = %room_id, "Peer beigetreten");
                true
            }
        }
    }

    /// Verlaesst den Raum der Verbindung
    ///
    /// Gibt die Raum-ID zurueck falls die Verbindung in einem Raum sass.
    /// Ein leer gewordener Raum wird freigegeben.
    pub fn verlassen(&self, connection_id: ConnectionId) -> Option<RoomId> {
        let mut inner = self.inner.lock();
        let (_, room_id) = inner.nach_verbindung.remove(&connection_id)?;

        if let Some(raum) = inner.raeume.get_mut(&room_id) {
            raum.teilnehmer
                .retain(|teilnehmer| teilnehmer.connection_id != connection_id);
            if raum.teilnehmer.is_empty() {
                raum.status = RoomStatus::CloseWait;
                inner.raeume.remove(&room_id);
                tracing::debug!(raum = %room_id, "Raum freigegeben");
            } else {
                raum.status = RoomStatus::OneSession;
            }
        }
        Some(room_id)
    }

    /// Bestimmt den Relay-Peer einer Verbindung
    ///
    /// `None` wenn die Verbindung in keinem Raum sitzt oder der Peer (noch
    /// oder schon wieder) fehlt.
    pub fn relay_ziel(&self, connection_id: ConnectionId) -> Option<ConnectionId> {
        let inner = self.inner.lock();
        let (_, room_id) = inner.nach_verbindung.get(&connection_id)?;
        let raum = inner.raeume.get(room_id)?;
        raum.teilnehmer
            .iter()
            .find(|teilnehmer| teilnehmer.connection_id != connection_id)
            .map(|teilnehmer| teilnehmer.connection_id)
    }

    /// Gibt den Zustand eines Raums zurueck
    pub fn status(&self, room_id: &RoomId) -> Option<RoomStatus> {
        self.inner
            .lock()
            .raeume
            .get(room_id)
            .map(|raum| raum.status)
    }

    /// Anzahl aktiver Raeume
    pub fn anzahl(&self) -> usize {
        self.inner.lock().raeume.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
