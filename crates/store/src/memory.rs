//! In-Memory-Implementierungen der Store-Traits
//!
//! Fuer Tests und Entwicklungsbetrieb ohne Datenbankdatei. Der ID-Pool wird
//! aus einem Zahlenbereich vorbefuellt.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use fernlink_core::{DeviceId, RoomId};

use crate::error::{StoreError, StoreResult};
use crate::{DeviceIdStore, DeviceIdentity, HistoryPage, OrderHistoryStore, OrderRecord};

// ---------------------------------------------------------------------------
// MemoryDeviceIdStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct IdPool {
    unbenutzt: VecDeque<u64>,
    benutzt: HashMap<u64, DeviceIdentity>,
}

/// In-Memory Geraete-ID-Pool
pub struct MemoryDeviceIdStore {
    pool: Mutex<IdPool>,
}

impl MemoryDeviceIdStore {
    /// Erstellt einen Pool mit den IDs `von..bis`
    pub fn neu(von: u64, bis: u64) -> Self {
        Self {
            pool: Mutex::new(IdPool {
                unbenutzt: (von..bis).collect(),
                benutzt: HashMap::new(),
            }),
        }
    }

    /// Gibt die Anzahl noch freier IDs zurueck
    pub fn freie_ids(&self) -> usize {
        self.pool.lock().unbenutzt.len()
    }

    /// Setzt den Aktualisierungszeitpunkt einer vergebenen ID (fuer Tests
    /// der Cookie-Rotation)
    pub fn zurueckdatieren(&self, device_id: DeviceId, zeitpunkt: chrono::DateTime<Utc>) {
        if let Some(identitaet) = self.pool.lock().benutzt.get_mut(&device_id.0) {
            identitaet.last_updated = zeitpunkt;
        }
    }
}

#[async_trait]
impl DeviceIdStore for MemoryDeviceIdStore {
    async fn zuteilen(&self) -> StoreResult<Option<DeviceIdentity>> {
        let mut pool = self.pool.lock();
        let Some(id) = pool.unbenutzt.pop_front() else {
            return Ok(None);
        };
        let identitaet = DeviceIdentity {
            device_id: DeviceId(id),
            cookie: Uuid::new_v4().to_string(),
            last_updated: Utc::now(),
        };
        pool.benutzt.insert(id, identitaet.clone());
        Ok(Some(identitaet))
    }

    async fn nachschlagen(&self, device_id: DeviceId) -> StoreResult<Option<DeviceIdentity>> {
        Ok(self.pool.lock().benutzt.get(&device_id.0).cloned())
    }

    async fn cookie_aktualisieren(&self, device_id: DeviceId, cookie: &str) -> StoreResult<()> {
        let mut pool = self.pool.lock();
        match pool.benutzt.get_mut(&device_id.0) {
            Some(identitaet) => {
                identitaet.cookie = cookie.to_string();
                identitaet.last_updated = Utc::now();
                Ok(())
            }
            None => Err(StoreError::nicht_gefunden(format!(
                "Geraete-ID {}",
                device_id
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryOrderHistoryStore
// ---------------------------------------------------------------------------

/// In-Memory Auftragshistorie
#[derive(Default)]
pub struct MemoryOrderHistoryStore {
    orders: Mutex<Vec<OrderRecord>>,
}

impl MemoryOrderHistoryStore {
    /// Erstellt eine leere Historie
    pub fn neu() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderHistoryStore for MemoryOrderHistoryStore {
    async fn anlegen(&self, order: &OrderRecord) -> StoreResult<()> {
        self.orders.lock().push(order.clone());
        Ok(())
    }

    async fn abschliessen(&self, room_id: &RoomId, grund: &str) -> StoreResult<bool> {
        let mut orders = self.orders.lock();
        match orders
            .iter_mut()
            .find(|o| &o.room_id == room_id && o.finished_at.is_none())
        {
            Some(order) => {
                order.finished_at = Some(Utc::now());
                order.finish_reason = Some(grund.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn abfragen(&self, offset: u64, limit: u64) -> StoreResult<HistoryPage> {
        let orders = self.orders.lock();
        let seite: Vec<OrderRecord> = orders
            .iter()
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(HistoryPage {
            gesamt: orders.len() as u64,
            offset,
            limit,
            orders: seite,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
