//! fernlink-server – explizite Verdrahtung und Prozess-Lebenszyklus
//!
//! Eine einzige Start-Routine konstruiert alle Komponenten in fester
//! Reihenfolge: Store -> Broker-Zustand -> Dispatcher (statische
//! Handler-Tabellen) -> Listener. Jede Rolle (Controlling, Controlled,
//! Signaling) bekommt ihren eigenen Listener und Dispatcher; einzelne
//! Rollen lassen sich in der Konfiguration abschalten.

pub mod config;
pub mod tls;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use fernlink_broker::{handlers as broker_handlers, BrokerState, RendezvousConfig};
use fernlink_dispatch::{ConnectionRegistry, DispatcherBuilder, SocketServer};
use fernlink_protocol::DecoderRegistry;
use fernlink_signaling::{handlers as signaling_handlers, RoomRegistry};
use fernlink_store::sqlite::SqliteStore;
use fernlink_store::{DeviceIdStore, OrderHistoryStore};

use config::{ListenerEinstellungen, ServerConfig};

/// Ein laufender Server mit seinen gebundenen Adressen
pub struct LaufenderServer {
    /// Adresse des Controlling-Listeners (None wenn abgeschaltet)
    pub controlling_adresse: Option<SocketAddr>,
    pub controlled_adresse: Option<SocketAddr>,
    pub signaling_adresse: Option<SocketAddr>,
    shutdown_tx: watch::Sender<bool>,
    aufgaben: Vec<JoinHandle<()>>,
}

impl LaufenderServer {
    /// Faehrt alle Listener herunter und wartet auf ihr Ende
    pub async fn stoppen(self) {
        let _ = self.shutdown_tx.send(true);
        for aufgabe in self.aufgaben {
            let _ = aufgabe.await;
        }
    }
}

/// Konstruiert und startet alle Komponenten
pub async fn aufbauen(config: ServerConfig) -> anyhow::Result<LaufenderServer> {
    // Persistenz
    let store = Arc::new(
        SqliteStore::verbinden(&config.store.url, config.store.max_verbindungen)
            .await
            .with_context(|| format!("Store {} oeffnen", config.store.url))?,
    );
    store.migrieren().await.context("Store-Migration")?;
    store
        .id_pool_befuellen(config.store.id_bereich_von, config.store.id_bereich_bis)
        .await
        .context("Geraete-ID-Pool befuellen")?;
    let id_store: Arc<dyn DeviceIdStore> = store.clone();
    let historie: Arc<dyn OrderHistoryStore> = store;

    // Broker-Zustand mit den Verbindungs-Registries beider Rollen
    let controlling_verbindungen = ConnectionRegistry::neu();
    let controlled_verbindungen = ConnectionRegistry::neu();
    let broker_state = BrokerState::neu(
        RendezvousConfig {
            signaling_host: config.rendezvous.signaling_host.clone(),
            signaling_port: config.rendezvous.signaling_port,
            relay_servers: config.rendezvous.relay_servers.clone(),
            reflex_servers: config.rendezvous.reflex_servers.clone(),
        },
        id_store,
        historie,
        Arc::clone(&controlling_verbindungen),
        Arc::clone(&controlled_verbindungen),
    );

    let decoder = Arc::new(DecoderRegistry::standard());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut aufgaben = Vec::new();

    // Controlling-Rolle
    let mut controlling_adresse = None;
    if config.controlling.aktiv {
        let mut builder = DispatcherBuilder::neu();
        broker_handlers::controlling::registrieren(&mut builder, Arc::clone(&broker_state))?;
        let dispatcher = builder.bauen(Arc::clone(&controlling_verbindungen));
        let server = listener_binden("controlling", &config.controlling, dispatcher, &decoder).await?;
        controlling_adresse = Some(server.lokale_adresse()?);
        aufgaben.push(listener_starten(server, shutdown_rx.clone()));
    }

    // Controlled-Rolle
    let mut controlled_adresse = None;
    if config.controlled.aktiv {
        let mut builder = DispatcherBuilder::neu();
        broker_handlers::controlled::registrieren(&mut builder, Arc::clone(&broker_state))?;
        let dispatcher = builder.bauen(Arc::clone(&controlled_verbindungen));
        let server = listener_binden("controlled", &config.controlled, dispatcher, &decoder).await?;
        controlled_adresse = Some(server.lokale_adresse()?);
        aufgaben.push(listener_starten(server, shutdown_rx.clone()));
    }

    // Signaling-Rolle
    let mut signaling_adresse = None;
    if config.signaling.aktiv {
        let signaling_verbindungen = ConnectionRegistry::neu();
        let raeume = Arc::new(RoomRegistry::neu());
        let mut builder = DispatcherBuilder::neu();
        signaling_handlers::registrieren(
            &mut builder,
            raeume,
            Arc::clone(&signaling_verbindungen),
        )?;
        let dispatcher = builder.bauen(signaling_verbindungen);
        let server = listener_binden("signaling", &config.signaling, dispatcher, &decoder).await?;
        signaling_adresse = Some(server.lokale_adresse()?);
        aufgaben.push(listener_starten(server, shutdown_rx.clone()));
    }

    Ok(LaufenderServer {
        controlling_adresse,
        controlled_adresse,
        signaling_adresse,
        shutdown_tx,
        aufgaben,
    })
}

async fn listener_binden(
    rolle: &'static str,
    listener: &ListenerEinstellungen,
    dispatcher: Arc<fernlink_dispatch::Dispatcher>,
    decoder: &Arc<DecoderRegistry>,
) -> anyhow::Result<SocketServer> {
    let acceptor = tls::acceptor_fuer(listener)
        .with_context(|| format!("TLS-Konfiguration fuer {}", rolle))?;
    let server = SocketServer::binden(
        rolle,
        listener.adresse()?,
        dispatcher,
        Arc::clone(decoder),
        acceptor,
    )
    .await
    .with_context(|| format!("Listener {} binden", rolle))?;
    Ok(server)
}

fn listener_starten(
    server: SocketServer,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(fehler) = server.starten(shutdown_rx).await {
            tracing::error!(fehler = %fehler, "Socket-Server abgebrochen");
        }
    })
}

/// Der Fernlink-Server als Ganzes
pub struct Server {
    config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet den Server und laeuft bis Ctrl-C
    pub async fn starten(self) -> anyhow::Result<()> {
        let laufend = aufbauen(self.config).await?;

        if let Some(adresse) = laufend.controlling_adresse {
            tracing::info!(adresse = %adresse, "Controlling-Listener bereit");
        }
        if let Some(adresse) = laufend.controlled_adresse {
            tracing::info!(adresse = %adresse, "Controlled-Listener bereit");
        }
        if let Some(adresse) = laufend.signaling_adresse {
            tracing::info!(adresse = %adresse, "Signaling-Listener bereit");
        }

        tokio::signal::ctrl_c().await?;
        tracing::info!("Ctrl-C – Server wird heruntergefahren");
        laufend.stoppen().await;
        Ok(())
    }
}
