//! fernlink-store – Persistenz-Abstraktion
//!
//! Der Rendezvous-Kern konsumiert zwei Kollaborateur-Schnittstellen:
//! - [`DeviceIdStore`]: endlicher Geraete-ID-Pool mit rotierenden Cookies.
//! - [`OrderHistoryStore`]: Historie abgeschlossener Auftraege.
//!
//! [`sqlite::SqliteStore`] implementiert beide auf SQLite (sqlx);
//! [`memory::MemoryDeviceIdStore`] und [`memory::MemoryOrderHistoryStore`]
//! sind In-Memory-Implementierungen fuer Tests.

pub mod error;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use fernlink_core::{DeviceId, RoomId};

pub use error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Eine vergebene Geraete-Identitaet
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub device_id: DeviceId,
    /// Opakes Wiedererkennungs-Cookie
    pub cookie: String,
    /// Zeitpunkt der letzten Cookie-Aenderung (steuert die Rotation)
    pub last_updated: DateTime<Utc>,
}

/// Ein Auftrag in der Historie
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub from_device_id: DeviceId,
    pub to_device_id: DeviceId,
    pub client_request_id: u32,
    pub room_id: RoomId,
    pub service_id: String,
    pub client_id: String,
    pub auth_token: String,
    pub p2p_username: String,
    pub p2p_password: String,
    pub signaling_host: String,
    pub signaling_port: u16,
    pub relay_server: String,
    pub reflex_servers: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub finish_reason: Option<String>,
}

/// Eine Seite der Auftragshistorie
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// Gesamtanzahl aller Auftraege in der Historie
    pub gesamt: u64,
    pub offset: u64,
    pub limit: u64,
    pub orders: Vec<OrderRecord>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Endlicher Geraete-ID-Pool
///
/// Der Kern teilt IDs zu, validiert sie und rotiert Cookies; Eigentuemer
/// der Daten ist der Store.
#[async_trait]
pub trait DeviceIdStore: Send + Sync {
    /// Zieht die naechste freie ID aus dem Pool und vergibt ein frisches
    /// Cookie; `None` wenn der Pool erschoepft ist
    async fn zuteilen(&self) -> StoreResult<Option<DeviceIdentity>>;

    /// Schlaegt eine vergebene ID nach
    async fn nachschlagen(&self, device_id: DeviceId) -> StoreResult<Option<DeviceIdentity>>;

    /// Ersetzt das Cookie einer vergebenen ID (Rotation)
    async fn cookie_aktualisieren(&self, device_id: DeviceId, cookie: &str) -> StoreResult<()>;
}

/// Historie aller Auftraege
#[async_trait]
pub trait OrderHistoryStore: Send + Sync {
    /// Legt einen frisch erstellten Auftrag in der Historie an
    async fn anlegen(&self, order: &OrderRecord) -> StoreResult<()>;

    /// Markiert einen Auftrag als abgeschlossen
    ///
    /// Gibt `false` zurueck wenn kein offener Auftrag mit dieser Raum-ID
    /// existiert.
    async fn abschliessen(&self, room_id: &RoomId, grund: &str) -> StoreResult<bool>;

    /// Fragt eine Seite der Historie ab (neueste zuerst)
    async fn abfragen(&self, offset: u64, limit: u64) -> StoreResult<HistoryPage>;
}
