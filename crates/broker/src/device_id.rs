//! Geraete-Identitaeten – Zuteilung, Cookie-Pruefung und Rotation
//!
//! Die Identitaetsdaten (endlicher ID-Pool, Cookies) gehoeren dem externen
//! [`DeviceIdStore`]; dieser Service setzt nur die Login-Regeln der beiden
//! Rollen um:
//!
//! - Controlled-Rolle: unbekannte ID, leeres Cookie oder falsches Cookie
//!   lehnen die Anmeldung ab, ohne Ersatz.
//! - Controlling-Rolle: unbekannte ID oder falsches Cookie fuehren zu einer
//!   frischen Ersatz-Identitaet; ein leeres Cookie wird fuer Altclients
//!   toleriert (das aktuelle Cookie wird zurueckgemeldet); Cookies aelter
//!   als sieben Tage werden rotiert.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use fernlink_core::DeviceId;
use fernlink_store::{DeviceIdStore, DeviceIdentity, StoreResult};

/// Gueltigkeitsdauer eines Cookies bis zur Rotation
const COOKIE_GUELTIGKEIT_TAGE: i64 = 7;

/// Ergebnis der Controlled-Anmeldepruefung
#[derive(Debug)]
pub enum ControlledLogin {
    Erfolgreich,
    Abgelehnt,
}

/// Ergebnis der Controlling-Anmeldepruefung
#[derive(Debug)]
pub enum ControllingLogin {
    /// ID und Cookie passen; `neues_cookie` ist gesetzt wenn das Cookie
    /// rotiert wurde oder ein Altclient das aktuelle Cookie braucht
    Erfolgreich { neues_cookie: Option<String> },
    /// Unbekannte ID; `ersatz` ist die frisch zugeteilte Identitaet
    /// (`None` wenn der Pool erschoepft ist)
    UnbekannteId { ersatz: Option<DeviceIdentity> },
    /// Falsches Cookie; `ersatz` wie bei [`ControllingLogin::UnbekannteId`]
    FalschesCookie { ersatz: Option<DeviceIdentity> },
}

/// Service fuer Geraete-Identitaeten
pub struct DeviceIdentityService {
    store: Arc<dyn DeviceIdStore>,
}

impl DeviceIdentityService {
    /// Erstellt einen neuen Service
    pub fn neu(store: Arc<dyn DeviceIdStore>) -> Self {
        Self { store }
    }

    /// Teilt eine frische Identitaet aus dem Pool zu
    ///
    /// `None` wenn der Pool erschoepft ist.
    pub async fn zuteilen(&self) -> StoreResult<Option<DeviceIdentity>> {
        self.store.zuteilen().await
    }

    /// Prueft die Anmeldung eines Controlled-Geraets
    pub async fn controlled_pruefen(
        &self,
        device_id: DeviceId,
        cookie: &str,
    ) -> StoreResult<ControlledLogin> {
        let Some(identitaet) = self.store.nachschlagen(device_id).await? else {
            tracing::warn!(geraet = %device_id, "Controlled-Login: unbekannte Geraete-ID");
            return Ok(ControlledLogin::Abgelehnt);
        };
        if cookie.is_empty() {
            tracing::warn!(geraet = %device_id, "Controlled-Login: leeres Cookie");
            return Ok(ControlledLogin::Abgelehnt);
        }
        if cookie != identitaet.cookie {
            tracing::warn!(geraet = %device_id, "Controlled-Login: falsches Cookie");
            return Ok(ControlledLogin::Abgelehnt);
        }
        Ok(ControlledLogin::Erfolgreich)
    }

    /// Prueft die Anmeldung eines Controlling-Geraets
    pub async fn controlling_pruefen(
        &self,
        device_id: DeviceId,
        cookie: &str,
    ) -> StoreResult<ControllingLogin> {
        let Some(identitaet) = self.store.nachschlagen(device_id).await? else {
            tracing::warn!(geraet = %device_id, "Controlling-Login: unbekannte Geraete-ID");
            return Ok(ControllingLogin::UnbekannteId {
                ersatz: self.store.zuteilen().await?,
            });
        };

        if !cookie.is_empty() && cookie != identitaet.cookie {
            tracing::warn!(geraet = %device_id, "Controlling-Login: falsches Cookie");
            return Ok(ControllingLogin::FalschesCookie {
                ersatz: self.store.zuteilen().await?,
            });
        }

        // Altclients schicken ein leeres Cookie; sie bekommen das aktuelle
        let mut neues_cookie = if cookie.is_empty() {
            Some(identitaet.cookie.clone())
        } else {
            None
        };

        // Rotation abgelaufener Cookies
        if Utc::now() - identitaet.last_updated > Duration::days(COOKIE_GUELTIGKEIT_TAGE) {
            let frisch = Uuid::new_v4().to_string();
            self.store.cookie_aktualisieren(device_id, &frisch).await?;
            tracing::debug!(geraet = %device_id, "Cookie rotiert");
            neues_cookie = Some(frisch);
        }

        Ok(ControllingLogin::Erfolgreich { neues_cookie })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use fernlink_store::memory::MemoryDeviceIdStore;

    fn testservice(von: u64, bis: u64) -> (DeviceIdentityService, Arc<MemoryDeviceIdStore>) {
        let store = Arc::new(MemoryDeviceIdStore::neu(von, bis));
        (DeviceIdentityService::neu(store.clone()), store)
    }

    #[tokio::test]
    async fn controlled_login_regeln() {
        let (service, _store) = testservice(1, 10);
        let identitaet = service.zuteilen().await.unwrap().unwrap();

        // Unbekannte ID
        assert!(matches!(
            service.controlled_pruefen(DeviceId(999), "x").await.unwrap(),
            ControlledLogin::Abgelehnt
        ));
        // Leeres Cookie
        assert!(matches!(
            service
                .controlled_pruefen(identitaet.device_id, "")
                .await
                .unwrap(),
            ControlledLogin::Abgelehnt
        ));
        // Falsches Cookie
        assert!(matches!(
            service
                .controlled_pruefen(identitaet.device_id, "falsch")
                .await
                .unwrap(),
            ControlledLogin::Abgelehnt
        ));
        // Korrektes Cookie
        assert!(matches!(
            service
                .controlled_pruefen(identitaet.device_id, &identitaet.cookie)
                .await
                .unwrap(),
            ControlledLogin::Erfolgreich
        ));
    }

    #[tokio::test]
    async fn controlling_unbekannte_id_bekommt_ersatz() {
        let (service, _store) = testservice(1, 10);

        match service.controlling_pruefen(DeviceId(999), "x").await.unwrap() {
            ControllingLogin::UnbekannteId { ersatz } => {
                let ersatz = ersatz.expect("Pool hat noch freie IDs");
                assert!(!ersatz.cookie.is_empty());
            }
            andere => panic!("UnbekannteId erwartet, erhalten: {:?}", andere),
        }
    }

    #[tokio::test]
    async fn controlling_falsches_cookie_bekommt_ersatz() {
        let (service, _store) = testservice(1, 10);
        let identitaet = service.zuteilen().await.unwrap().unwrap();

        match service
            .controlling_pruefen(identitaet.device_id, "falsch")
            .await
            .unwrap()
        {
            ControllingLogin::FalschesCookie { ersatz } => {
                let ersatz = ersatz.expect("Pool hat noch freie IDs");
                assert_ne!(ersatz.device_id, identitaet.device_id);
            }
            andere => panic!("FalschesCookie erwartet, erhalten: {:?}", andere),
        }
    }

    #[tokio::test]
    async fn controlling_leeres_cookie_wird_toleriert() {
        let (service, _store) = testservice(1, 10);
        let identitaet = service.zuteilen().await.unwrap().unwrap();

        match service
            .controlling_pruefen(identitaet.device_id, "")
            .await
            .unwrap()
        {
            ControllingLogin::Erfolgreich { neues_cookie } => {
                assert_eq!(neues_cookie.as_deref(), Some(identitaet.cookie.as_str()));
            }
            andere => panic!("Erfolgreich erwartet, erhalten: {:?}", andere),
        }
    }

    #[tokio::test]
    async fn abgelaufenes_cookie_wird_rotiert() {
        let (service, store) = testservice(1, 10);
        let identitaet = service.zuteilen().await.unwrap().unwrap();

        store.zurueckdatieren(
            identitaet.device_id,
            Utc::now() - Duration::days(COOKIE_GUELTIGKEIT_TAGE + 1),
        );

        match service
            .controlling_pruefen(identitaet.device_id, &identitaet.cookie)
            .await
            .unwrap()
        {
            ControllingLogin::Erfolgreich { neues_cookie } => {
                let neues = neues_cookie.expect("Rotation erwartet");
                assert_ne!(neues, identitaet.cookie);
                // Der Store kennt jetzt das rotierte Cookie
                let gespeichert = store
                    .nachschlagen(identitaet.device_id)
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(gespeichert.cookie, neues);
            }
            andere => panic!("Erfolgreich erwartet, erhalten: {:?}", andere),
        }
    }

    #[tokio::test]
    async fn frisches_cookie_wird_nicht_rotiert() {
        let (service, _store) = testservice(1, 10);
        let identitaet = service.zuteilen().await.unwrap().unwrap();

        match service
            .controlling_pruefen(identitaet.device_id, &identitaet.cookie)
            .await
            .unwrap()
        {
            ControllingLogin::Erfolgreich { neues_cookie } => assert!(neues_cookie.is_none()),
            andere => panic!("Erfolgreich erwartet, erhalten: {:?}", andere),
        }
    }
}
