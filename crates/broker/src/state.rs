//! Gemeinsamer Broker-Zustand
//!
//! Buendelt die Registries, den OrderBroker, den Identitaets-Service und
//! die Verbindungs-Registries beider Rollen als Arc-Referenzen fuer die
//! Handler. Alle Komponenten werden beim Prozessstart explizit konstruiert
//! und hier verdrahtet.

use std::sync::Arc;

use fernlink_dispatch::ConnectionRegistry;
use fernlink_store::{DeviceIdStore, OrderHistoryStore};

use crate::device_id::DeviceIdentityService;
use crate::order::{OrderBroker, RendezvousConfig};
use crate::session::DeviceSessionRegistry;

/// Gemeinsamer Zustand des Rendezvous-Brokers (thread-safe, Arc-geteilt)
pub struct BrokerState {
    /// Sessions der Controlling-Rolle
    pub controlling_sessions: DeviceSessionRegistry,
    /// Sessions der Controlled-Rolle
    pub controlled_sessions: DeviceSessionRegistry,
    /// Aktive Auftraege
    pub orders: OrderBroker,
    /// Geraete-Identitaeten (Pool, Cookies)
    pub identitaeten: DeviceIdentityService,
    /// Lebende Verbindungen der Controlling-Rolle
    pub controlling_verbindungen: Arc<ConnectionRegistry>,
    /// Lebende Verbindungen der Controlled-Rolle
    pub controlled_verbindungen: Arc<ConnectionRegistry>,
}

impl BrokerState {
    /// Erstellt den Broker-Zustand
    pub fn neu(
        rendezvous: RendezvousConfig,
        id_store: Arc<dyn DeviceIdStore>,
        historie: Arc<dyn OrderHistoryStore>,
        controlling_verbindungen: Arc<ConnectionRegistry>,
        controlled_verbindungen: Arc<ConnectionRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            controlling_sessions: DeviceSessionRegistry::neu(),
            controlled_sessions: DeviceSessionRegistry::neu(),
            orders: OrderBroker::neu(rendezvous, historie),
            identitaeten: DeviceIdentityService::neu(id_store),
            controlling_verbindungen,
            controlled_verbindungen,
        })
    }
}
