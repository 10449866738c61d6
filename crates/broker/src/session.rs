//! Geraete-Session-Registry – lebende Verbindungen einer Rolle
//!
//! Zustandsmaschine pro Verbindung:
//!
//! ```text
//! Connected -> DeviceLogged -> Disconnected (terminal)
//! ```
//!
//! Es existieren zwei unabhaengige Registries, eine fuer die
//! Controlling-Rolle und eine fuer die Controlled-Rolle; derselbe
//! Geraete-ID-Raum kann sich zwischen den Rollen ueberschneiden, weil die
//! Registries disjunkt sind.
//!
//! Beide Maps (Verbindung -> Session, Geraet -> Verbindung) liegen hinter
//! einem Lock, damit zusammengesetzte Operationen (pruefen + eintragen)
//! atomar sind. Lookups geben unveraenderliche Schnappschuesse zurueck,
//! nie den lebenden Datensatz.

use std::collections::HashMap;

use parking_lot::Mutex;

use fernlink_core::{ConnectionId, DeviceId};

/// Zustand einer Geraete-Session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Verbunden, noch kein Geraet angemeldet
    Connected,
    /// Geraet angemeldet
    DeviceLogged,
    /// Verbindung abgebaut (terminal)
    Disconnected,
}

/// Unveraenderlicher Schnappschuss einer Geraete-Session
#[derive(Debug, Clone)]
pub struct DeviceSession {
    pub connection_id: ConnectionId,
    /// `None` bis zur Anmeldung
    pub device_id: Option<DeviceId>,
    pub status: SessionStatus,
    /// Ob Fernsteuerung erlaubt ist (nur Controlled-Rolle)
    pub allow_control: bool,
    /// Kodierte Client-Version (major * 1_000_000 + minor * 1_000 + patch)
    pub version: u32,
    pub os: String,
}

struct SessionInner {
    connection_id: ConnectionId,
    device_id: Option<DeviceId>,
    status: SessionStatus,
    allow_control: bool,
    version: u32,
    os: String,
}

impl SessionInner {
    fn schnappschuss(&self) -> DeviceSession {
        DeviceSession {
            connection_id: self.connection_id,
            device_id: self.device_id,
            status: self.status,
            allow_control: self.allow_control,
            version: self.version,
            os: self.os.clone(),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    nach_verbindung: HashMap<ConnectionId, SessionInner>,
    nach_geraet: HashMap<DeviceId, ConnectionId>,
}

/// Registry aller lebenden Geraete-Sessions einer Rolle
#[derive(Default)]
pub struct DeviceSessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl DeviceSessionRegistry {
    /// Erstellt eine leere Registry
    pub fn neu() -> Self {
        Self::default()
    }

    /// Legt eine Session im Zustand `Connected` an
    ///
    /// No-op wenn fuer die Verbindung bereits eine Session existiert.
    pub fn anlegen(&self, connection_id: ConnectionId) {
        let mut inner = self.inner.lock();
        inner
            .nach_verbindung
            .entry(connection_id)
            .or_insert_with(|| SessionInner {
                connection_id,
                device_id: None,
                status: SessionStatus::Connected,
                allow_control: false,
                version: 0,
                os: String::new(),
            });
    }

    /// Meldet ein Geraet auf einer bestehenden Session an
    ///
    /// Schlaegt fehl wenn die Session fehlt oder nicht mehr im Zustand
    /// `Connected` ist. Ein bestehender Eintrag im Geraete-Index wird
    /// ueberschrieben (letzte Anmeldung gewinnt); die alte Verbindung wird
    /// dabei nicht geschlossen.
    pub fn anmelden(
        &self,
        connection_id: ConnectionId,
        device_id: DeviceId,
        allow_control: bool,
        version: u32,
        os: &str,
    ) -> bool {
        let mut inner = self.inner.lock();
        let Some(session) = inner.nach_verbindung.get_mut(&connection_id) else {
            return false;
        };
        if session.status != SessionStatus::Connected {
            return false;
        }

        session.device_id = Some(device_id);
        session.status = SessionStatus::DeviceLogged;
        session.allow_control = allow_control;
        session.version = version;
        session.os = os.to_string();
        inner.nach_geraet.insert(device_id, connection_id);

        tracing::debug!(verbindung = %connection_id, geraet = %device_id, "Geraet angemeldet");
        true
    }

    /// Entfernt die Session einer Verbindung
    ///
    /// Gibt die angemeldete Geraete-ID zurueck falls vorhanden. Der
    /// Geraete-Index wird nur bereinigt wenn er noch auf diese Verbindung
    /// zeigt – nach einem Letzte-Anmeldung-gewinnt-Ueberschreiben bleibt
    /// die neuere Zuordnung bestehen.
    pub fn entfernen(&self, connection_id: ConnectionId) -> Option<DeviceId> {
        let mut inner = self.inner.lock();
        let session = inner.nach_verbindung.remove(&connection_id)?;
        let device_id = session.device_id?;

        if inner.nach_geraet.get(&device_id) == Some(&connection_id) {
            inner.nach_geraet.remove(&device_id);
        }
        Some(device_id)
    }

    /// Schnappschuss der Session einer Verbindung
    pub fn nach_verbindung(&self, connection_id: ConnectionId) -> Option<DeviceSession> {
        self.inner
            .lock()
            .nach_verbindung
            .get(&connection_id)
            .map(SessionInner::schnappschuss)
    }

    /// Schnappschuss der Session eines angemeldeten Geraets
    pub fn nach_geraet(&self, device_id: DeviceId) -> Option<DeviceSession> {
        let inner = self.inner.lock();
        let connection_id = inner.nach_geraet.get(&device_id)?;
        inner
            .nach_verbindung
            .get(connection_id)
            .map(SessionInner::schnappschuss)
    }

    /// Verbindungs-ID eines angemeldeten Geraets
    pub fn verbindung_nach_geraet(&self, device_id: DeviceId) -> Option<ConnectionId> {
        self.inner.lock().nach_geraet.get(&device_id).copied()
    }

    /// Anzahl lebender Sessions
    pub fn anzahl(&self) -> usize {
        self.inner.lock().nach_verbindung.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
