//! OrderBroker – aktive Auftraege zwischen Controlling und Controlled
//!
//! Invariante: pro `from_device_id` und unabhaengig davon pro
//! `to_device_id` existiert hoechstens ein aktiver (nicht abgeschlossener)
//! Auftrag. Pruefen-und-Eintragen passiert fuer beide Schluessel in einem
//! einzigen kritischen Abschnitt; die drei Indizes (from, to, Raum) werden
//! gemeinsam gepflegt.
//!
//! Jeder erstellte Auftrag wandert in die Historie; jeder Abschluss wird
//! dort mit Grund markiert. Historien-Fehler werden geloggt und brechen den
//! Rendezvous-Pfad nicht ab.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::{distributions::Alphanumeric, Rng};
use uuid::Uuid;

use fernlink_core::{DeviceId, RoomId};
use fernlink_store::{OrderHistoryStore, OrderRecord};

use crate::error::{BrokerError, BrokerResult};

/// Laenge des P2P-Benutzernamens
const P2P_USERNAME_LAENGE: usize = 6;
/// Laenge des P2P-Passworts
const P2P_PASSWORT_LAENGE: usize = 20;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Rendezvous-Konfiguration: Signaling-Endpunkt und NAT-Traversal-Server
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    /// Signaling-Adresse die an beide Peers verteilt wird
    pub signaling_host: String,
    pub signaling_port: u16,
    /// TURN-artige Relay-Server (nur der erste wird verteilt)
    pub relay_servers: Vec<String>,
    /// STUN-artige Reflex-Server (alle werden verteilt)
    pub reflex_servers: Vec<String>,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            signaling_host: "127.0.0.1".into(),
            signaling_port: 44900,
            relay_servers: Vec::new(),
            reflex_servers: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// Abschluss-Gruende eines Auftrags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    ControlledClose,
    ControllingClose,
    ControlledLogout,
    ControllingLogout,
}

impl FinishReason {
    /// Gibt den Grund als Historien-Schluessel zurueck
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::ControlledClose => "controlled_close",
            Self::ControllingClose => "controlling_close",
            Self::ControlledLogout => "controlled_logout",
            Self::ControllingLogout => "controlling_logout",
        }
    }
}

/// Ein aktiver Auftrag mit kurzlebigen Zugangsdaten
#[derive(Debug, Clone)]
pub struct Order {
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
    /// Erster konfigurierter Relay-Server (leer wenn keiner konfiguriert)
    pub relay_server: String,
    pub reflex_servers: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    fn als_record(&self) -> OrderRecord {
        OrderRecord {
            from_device_id: self.from_device_id,
            to_device_id: self.to_device_id,
            client_request_id: self.client_request_id,
            room_id: self.room_id.clone(),
            service_id: self.service_id.clone(),
            client_id: self.client_id.clone(),
            auth_token: self.auth_token.clone(),
            p2p_username: self.p2p_username.clone(),
            p2p_password: self.p2p_password.clone(),
            signaling_host: self.signaling_host.clone(),
            signaling_port: self.signaling_port,
            relay_server: self.relay_server.clone(),
            reflex_servers: self.reflex_servers.clone(),
            created_at: self.created_at,
            finished_at: None,
            finish_reason: None,
        }
    }
}

fn alphanumerisch(laenge: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(laenge)
        .map(char::from)
        .collect()
}

// ---------------------------------------------------------------------------
// OrderBroker
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Indizes {
    nach_from: HashMap<DeviceId, RoomId>,
    nach_to: HashMap<DeviceId, RoomId>,
    nach_raum: HashMap<RoomId, Order>,
}

/// Vermittelt Auftraege und besitzt alle aktiven Auftraege exklusiv
pub struct OrderBroker {
    config: RendezvousConfig,
    historie: Arc<dyn OrderHistoryStore>,
    indizes: Mutex<Indizes>,
}

impl OrderBroker {
    /// Erstellt einen neuen OrderBroker
    pub fn neu(config: RendezvousConfig, historie: Arc<dyn OrderHistoryStore>) -> Self {
        Self {
            config,
            historie,
            indizes: Mutex::new(Indizes::default()),
        }
    }

    /// Erstellt einen neuen Auftrag mit frischen Zugangsdaten
    ///
    /// Schlaegt fehl wenn eines der beiden Geraete bereits einen aktiven
    /// Auftrag hat; die Pruefung beider Schluessel und das Eintragen sind
    /// atomar.
    pub async fn anlegen(
        &self,
        from_device_id: DeviceId,
        to_device_id: DeviceId,
        client_request_id: u32,
    ) -> BrokerResult<Order> {
        let relay_server = self
            .config
            .relay_servers
            .first()
            .cloned()
            .unwrap_or_default();

        let order = Order {
            from_device_id,
            to_device_id,
            client_request_id,
            room_id: RoomId::erzeugen(),
            service_id: Uuid::new_v4().to_string(),
            client_id: Uuid::new_v4().to_string(),
            auth_token: Uuid::new_v4().to_string(),
            p2p_username: alphanumerisch(P2P_USERNAME_LAENGE),
            p2p_password: alphanumerisch(P2P_PASSWORT_LAENGE),
            signaling_host: self.config.signaling_host.clone(),
            signaling_port: self.config.signaling_port,
            relay_server,
            reflex_servers: self.config.reflex_servers.clone(),
            created_at: Utc::now(),
        };

        {
            let mut indizes = self.indizes.lock();
            if indizes.nach_from.contains_key(&from_device_id)
                || indizes.nach_to.contains_key(&to_device_id)
            {
                tracing::warn!(
                    from = %from_device_id,
                    to = %to_device_id,
                    "Auftrag abgelehnt: aktiver Auftrag existiert bereits"
                );
                return Err(BrokerError::AuftragKonflikt {
                    from: from_device_id,
                    to: to_device_id,
                });
            }
            indizes
                .nach_from
                .insert(from_device_id, order.room_id.clone());
            indizes.nach_to.insert(to_device_id, order.room_id.clone());
            indizes.nach_raum.insert(order.room_id.clone(), order.clone());
        }

        if let Err(fehler) = self.historie.anlegen(&order.als_record()).await {
            tracing::warn!(raum = %order.room_id, fehler = %fehler, "Historie: Anlegen fehlgeschlagen");
        }
        tracing::info!(
            from = %from_device_id,
            to = %to_device_id,
            raum = %order.room_id,
            "Neuer Auftrag"
        );
        Ok(order)
    }

    /// Schlaegt den aktiven Auftrag eines Controlled-Geraets nach
    pub fn nach_controlled_geraet(&self, device_id: DeviceId) -> Option<Order> {
        let indizes = self.indizes.lock();
        let raum = indizes.nach_to.get(&device_id)?;
        indizes.nach_raum.get(raum).cloned()
    }

    /// Schliesst einen Auftrag auf Wunsch des Controlled-Geraets
    ///
    /// No-op-Fehlschlag wenn der Raum unbekannt ist oder das Geraet nicht
    /// die Controlled-Seite des Auftrags ist (Schutz gegen veraltete
    /// Schliessversuche).
    pub async fn schliessen_von_controlled(&self, room_id: &RoomId, device_id: DeviceId) -> bool {
        self.schliessen(room_id, device_id, FinishReason::ControlledClose)
            .await
    }

    /// Schliesst einen Auftrag auf Wunsch des Controlling-Geraets
    pub async fn schliessen_von_controlling(&self, room_id: &RoomId, device_id: DeviceId) -> bool {
        self.schliessen(room_id, device_id, FinishReason::ControllingClose)
            .await
    }

    async fn schliessen(&self, room_id: &RoomId, device_id: DeviceId, grund: FinishReason) -> bool {
        {
            let mut indizes = self.indizes.lock();
            let Some(order) = indizes.nach_raum.get(room_id) else {
                return false;
            };
            let erwartet = match grund {
                FinishReason::ControlledClose => order.to_device_id,
                _ => order.from_device_id,
            };
            if erwartet != device_id {
                tracing::warn!(
                    raum = %room_id,
                    geraet = %device_id,
                    "Schliessen abgelehnt: Geraet ist nicht Teil des Auftrags"
                );
                return false;
            }
            Self::indizes_entfernen(&mut indizes, room_id);
        }

        self.historie_abschliessen(room_id, grund).await;
        tracing::info!(raum = %room_id, grund = grund.als_str(), "Auftrag geschlossen");
        true
    }

    /// Baut den aktiven Auftrag eines Controlled-Geraets ab (Logout/Abriss)
    ///
    /// Idempotenter No-op wenn kein Auftrag existiert.
    pub async fn controlled_logout(&self, device_id: DeviceId) {
        self.logout(device_id, FinishReason::ControlledLogout).await;
    }

    /// Baut den aktiven Auftrag eines Controlling-Geraets ab (Logout/Abriss)
    pub async fn controlling_logout(&self, device_id: DeviceId) {
        self.logout(device_id, FinishReason::ControllingLogout)
            .await;
    }

    async fn logout(&self, device_id: DeviceId, grund: FinishReason) {
        let raum = {
            let mut indizes = self.indizes.lock();
            let raum = match grund {
                FinishReason::ControlledLogout => indizes.nach_to.get(&device_id).cloned(),
                _ => indizes.nach_from.get(&device_id).cloned(),
            };
            let Some(raum) = raum else {
                return;
            };
            Self::indizes_entfernen(&mut indizes, &raum);
            raum
        };

        self.historie_abschliessen(&raum, grund).await;
        tracing::info!(raum = %raum, geraet = %device_id, grund = grund.als_str(), "Auftrag abgebaut");
    }

    /// Anzahl aktiver Auftraege
    pub fn aktive_anzahl(&self) -> usize {
        self.indizes.lock().nach_raum.len()
    }

    fn indizes_entfernen(indizes: &mut Indizes, room_id: &RoomId) {
        if let Some(order) = indizes.nach_raum.remove(room_id) {
            indizes.nach_from.remove(&order.from_device_id);
            indizes.nach_to.remove(&order.to_device_id);
        }
    }

    async fn historie_abschliessen(&self, room_id: &RoomId, grund: FinishReason) {
        match self.historie.abschliessen(room_id, grund.als_str()).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(raum = %room_id, "Historie: kein offener Auftrag zum Abschliessen");
            }
            Err(fehler) => {
                tracing::warn!(raum = %room_id, fehler = %fehler, "Historie: Abschliessen fehlgeschlagen");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
