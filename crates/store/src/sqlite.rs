//! SQLite-Implementierung der Store-Traits (sqlx)
//!
//! Tabellen werden beim Start via `CREATE TABLE IF NOT EXISTS` angelegt.
//! Der Geraete-ID-Pool wird beim ersten Start aus einem konfigurierten
//! Zahlenbereich vorbefuellt. Zeitstempel liegen als RFC-3339-Text in der
//! Datenbank.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use fernlink_core::{DeviceId, RoomId};

use crate::error::{StoreError, StoreResult};
use crate::{DeviceIdStore, DeviceIdentity, HistoryPage, OrderHistoryStore, OrderRecord};

/// SQLite-Store fuer Geraete-IDs und Auftragshistorie
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Oeffnet die Datenbank
    ///
    /// Fuer `sqlite::memory:` muss `max_verbindungen = 1` sein, sonst sieht
    /// jede Pool-Verbindung eine eigene leere Datenbank.
    pub async fn verbinden(url: &str, max_verbindungen: u32) -> StoreResult<Self> {
        let optionen = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_verbindungen)
            .min_connections(1)
            .connect_with(optionen)
            .await?;
        Ok(Self { pool })
    }

    /// Legt die Tabellen an falls sie fehlen
    pub async fn migrieren(&self) -> StoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS unused_ids (
                device_id INTEGER NOT NULL PRIMARY KEY
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS used_ids (
                device_id  INTEGER NOT NULL PRIMARY KEY,
                cookie     TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS orders (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at        TEXT NOT NULL,
                finished_at       TEXT,
                finish_reason     TEXT,
                from_device_id    INTEGER NOT NULL,
                to_device_id      INTEGER NOT NULL,
                client_request_id INTEGER NOT NULL,
                signaling_host    TEXT NOT NULL,
                signaling_port    INTEGER NOT NULL,
                room_id           TEXT NOT NULL,
                service_id        TEXT NOT NULL,
                client_id         TEXT NOT NULL,
                auth_token        TEXT NOT NULL,
                p2p_username      TEXT NOT NULL,
                p2p_password      TEXT NOT NULL,
                relay_server      TEXT NOT NULL,
                reflex_servers    TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Befuellt den ID-Pool mit dem Bereich `von..bis`, falls er leer ist
    ///
    /// Gibt die Anzahl eingefuegter IDs zurueck (0 wenn der Pool schon
    /// befuellt war).
    pub async fn id_pool_befuellen(&self, von: u64, bis: u64) -> StoreResult<u64> {
        let unbenutzt: i64 = sqlx::query("SELECT COUNT(*) AS anzahl FROM unused_ids")
            .fetch_one(&self.pool)
            .await?
            .get("anzahl");
        let benutzt: i64 = sqlx::query("SELECT COUNT(*) AS anzahl FROM used_ids")
            .fetch_one(&self.pool)
            .await?
            .get("anzahl");
        if unbenutzt > 0 || benutzt > 0 {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut eingefuegt = 0u64;
        for id in von..bis {
            sqlx::query("INSERT INTO unused_ids (device_id) VALUES (?)")
                .bind(id as i64)
                .execute(&mut *tx)
                .await?;
            eingefuegt += 1;
        }
        tx.commit().await?;

        tracing::info!(von, bis, anzahl = eingefuegt, "Geraete-ID-Pool befuellt");
        Ok(eingefuegt)
    }
}

fn zeit_parsen(wert: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(wert)
        .map(|zeit| zeit.with_timezone(&Utc))
        .map_err(|fehler| {
            StoreError::UngueltigerDatensatz(format!("Zeitstempel '{}': {}", wert, fehler))
        })
}

fn zeile_zu_auftrag(zeile: &SqliteRow) -> StoreResult<OrderRecord> {
    let reflex_roh: String = zeile.get("reflex_servers");
    let reflex_servers = if reflex_roh.is_empty() {
        Vec::new()
    } else {
        reflex_roh.split(',').map(str::to_string).collect()
    };

    let finished_at: Option<String> = zeile.get("finished_at");

    Ok(OrderRecord {
        from_device_id: DeviceId(zeile.get::<i64, _>("from_device_id") as u64),
        to_device_id: DeviceId(zeile.get::<i64, _>("to_device_id") as u64),
        client_request_id: zeile.get::<i64, _>("client_request_id") as u32,
        room_id: RoomId(zeile.get("room_id")),
        service_id: zeile.get("service_id"),
        client_id: zeile.get("client_id"),
        auth_token: zeile.get("auth_token"),
        p2p_username: zeile.get("p2p_username"),
        p2p_password: zeile.get("p2p_password"),
        signaling_host: zeile.get("signaling_host"),
        signaling_port: zeile.get::<i64, _>("signaling_port") as u16,
        relay_server: zeile.get("relay_server"),
        reflex_servers,
        created_at: zeit_parsen(&zeile.get::<String, _>("created_at"))?,
        finished_at: finished_at.as_deref().map(zeit_parsen).transpose()?,
        finish_reason: zeile.get("finish_reason"),
    })
}

#[async_trait]
impl DeviceIdStore for SqliteStore {
    async fn zuteilen(&self) -> StoreResult<Option<DeviceIdentity>> {
        let mut tx = self.pool.begin().await?;

        let zeile = sqlx::query("SELECT device_id FROM unused_ids ORDER BY device_id LIMIT 1")
            .fetch_optional(&mut *tx)
            .await?;
        let Some(zeile) = zeile else {
            return Ok(None);
        };
        let device_id: i64 = zeile.get("device_id");

        sqlx::query("DELETE FROM unused_ids WHERE device_id = ?")
            .bind(device_id)
            .execute(&mut *tx)
            .await?;

        let cookie = Uuid::new_v4().to_string();
        let jetzt = Utc::now();
        sqlx::query("INSERT INTO used_ids (device_id, cookie, updated_at) VALUES (?, ?, ?)")
            .bind(device_id)
            .bind(&cookie)
            .bind(jetzt.to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(device_id, "Geraete-ID zugeteilt");
        Ok(Some(DeviceIdentity {
            device_id: DeviceId(device_id as u64),
            cookie,
            last_updated: jetzt,
        }))
    }

    async fn nachschlagen(&self, device_id: DeviceId) -> StoreResult<Option<DeviceIdentity>> {
        let zeile = sqlx::query("SELECT cookie, updated_at FROM used_ids WHERE device_id = ?")
            .bind(device_id.0 as i64)
            .fetch_optional(&self.pool)
            .await?;

        zeile
            .map(|zeile| {
                Ok(DeviceIdentity {
                    device_id,
                    cookie: zeile.get("cookie"),
                    last_updated: zeit_parsen(&zeile.get::<String, _>("updated_at"))?,
                })
            })
            .transpose()
    }

    async fn cookie_aktualisieren(&self, device_id: DeviceId, cookie: &str) -> StoreResult<()> {
        let betroffen =
            sqlx::query("UPDATE used_ids SET cookie = ?, updated_at = ? WHERE device_id = ?")
                .bind(cookie)
                .bind(Utc::now().to_rfc3339())
                .bind(device_id.0 as i64)
                .execute(&self.pool)
                .await?
                .rows_affected();

        if betroffen == 0 {
            return Err(StoreError::nicht_gefunden(format!(
                "Geraete-ID {}",
                device_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderHistoryStore for SqliteStore {
    async fn anlegen(&self, order: &OrderRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO orders (
                created_at, from_device_id, to_device_id, client_request_id,
                signaling_host, signaling_port, room_id, service_id, client_id,
                auth_token, p2p_username, p2p_password, relay_server, reflex_servers
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(order.created_at.to_rfc3339())
        .bind(order.from_device_id.0 as i64)
        .bind(order.to_device_id.0 as i64)
        .bind(order.client_request_id as i64)
        .bind(&order.signaling_host)
        .bind(order.signaling_port as i64)
        .bind(&order.room_id.0)
        .bind(&order.service_id)
        .bind(&order.client_id)
        .bind(&order.auth_token)
        .bind(&order.p2p_username)
        .bind(&order.p2p_password)
        .bind(&order.relay_server)
        .bind(order.reflex_servers.join(","))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn abschliessen(&self, room_id: &RoomId, grund: &str) -> StoreResult<bool> {
        let betroffen = sqlx::query(
            "UPDATE orders SET finished_at = ?, finish_reason = ?
             WHERE room_id = ? AND finished_at IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(grund)
        .bind(&room_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(betroffen > 0)
    }

    async fn abfragen(&self, offset: u64, limit: u64) -> StoreResult<HistoryPage> {
        let gesamt: i64 = sqlx::query("SELECT COUNT(*) AS anzahl FROM orders")
            .fetch_one(&self.pool)
            .await?
            .get("anzahl");

        let zeilen = sqlx::query("SELECT * FROM orders ORDER BY id DESC LIMIT ? OFFSET ?")
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        let orders = zeilen
            .iter()
            .map(zeile_zu_auftrag)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(HistoryPage {
            gesamt: gesamt as u64,
            offset,
            limit,
            orders,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    async fn teststore() -> SqliteStore {
        let store = SqliteStore::verbinden("sqlite::memory:", 1).await.unwrap();
        store.migrieren().await.unwrap();
        store
    }

    fn testauftrag(room_id: RoomId) -> OrderRecord {
        OrderRecord {
            from_device_id: DeviceId(12345678),
            to_device_id: DeviceId(87654321),
            client_request_id: 1,
            room_id,
            service_id: "service".into(),
            client_id: "client".into(),
            auth_token: "auth".into(),
            p2p_username: "abc123".into(),
            p2p_password: "abcdefghij0123456789".into(),
            signaling_host: "sig.example".into(),
            signaling_port: 44900,
            relay_server: "relay:relay.example:3478".into(),
            reflex_servers: vec![
                "stun:stun.example:3478".into(),
                "stun:stun2.example:3478".into(),
            ],
            created_at: Utc::now(),
            finished_at: None,
            finish_reason: None,
        }
    }

    #[tokio::test]
    async fn pool_befuellen_und_zuteilen() {
        let store = teststore().await;
        assert_eq!(store.id_pool_befuellen(100, 103).await.unwrap(), 3);
        // Zweiter Aufruf ist ein No-op
        assert_eq!(store.id_pool_befuellen(100, 103).await.unwrap(), 0);

        let a = store.zuteilen().await.unwrap().unwrap();
        let b = store.zuteilen().await.unwrap().unwrap();
        let c = store.zuteilen().await.unwrap().unwrap();
        assert_ne!(a.device_id, b.device_id);
        assert_ne!(a.cookie, b.cookie);
        assert_ne!(b.device_id, c.device_id);

        // Pool erschoepft
        assert!(store.zuteilen().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nachschlagen_und_cookie_aktualisieren() {
        let store = teststore().await;
        store.id_pool_befuellen(1, 5).await.unwrap();
        let identitaet = store.zuteilen().await.unwrap().unwrap();

        let gefunden = store
            .nachschlagen(identitaet.device_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gefunden.cookie, identitaet.cookie);

        store
            .cookie_aktualisieren(identitaet.device_id, "rotiert")
            .await
            .unwrap();
        let rotiert = store
            .nachschlagen(identitaet.device_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rotiert.cookie, "rotiert");
        assert!(rotiert.last_updated >= gefunden.last_updated);

        assert!(store.nachschlagen(DeviceId(424242)).await.unwrap().is_none());
        assert!(store
            .cookie_aktualisieren(DeviceId(424242), "x")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn auftragshistorie_round_trip() {
        let store = teststore().await;
        let raum = RoomId::erzeugen();
        let auftrag = testauftrag(raum.clone());

        store.anlegen(&auftrag).await.unwrap();
        assert!(store.abschliessen(&raum, "controlling_close").await.unwrap());
        assert!(!store.abschliessen(&raum, "controlling_close").await.unwrap());

        let seite = store.abfragen(0, 20).await.unwrap();
        assert_eq!(seite.gesamt, 1);
        let gespeichert = &seite.orders[0];
        assert_eq!(gespeichert.from_device_id, auftrag.from_device_id);
        assert_eq!(gespeichert.to_device_id, auftrag.to_device_id);
        assert_eq!(gespeichert.room_id, raum);
        assert_eq!(gespeichert.reflex_servers, auftrag.reflex_servers);
        assert_eq!(
            gespeichert.finish_reason.as_deref(),
            Some("controlling_close")
        );
        assert!(gespeichert.finished_at.is_some());
    }

    #[tokio::test]
    async fn historie_paginierung() {
        let store = teststore().await;
        for _ in 0..5 {
            store.anlegen(&testauftrag(RoomId::erzeugen())).await.unwrap();
        }

        let seite = store.abfragen(0, 2).await.unwrap();
        assert_eq!(seite.gesamt, 5);
        assert_eq!(seite.orders.len(), 2);

        let rest = store.abfragen(4, 2).await.unwrap();
        assert_eq!(rest.orders.len(), 1);
    }
}
