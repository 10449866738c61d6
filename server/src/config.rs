//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener fuer Controlling-Geraete
    pub controlling: ListenerEinstellungen,
    /// Listener fuer Controlled-Geraete
    pub controlled: ListenerEinstellungen,
    /// Listener fuer Signaling-Peers
    pub signaling: ListenerEinstellungen,
    /// Rendezvous-Daten die an Peers verteilt werden
    pub rendezvous: RendezvousEinstellungen,
    /// Persistenz-Einstellungen
    pub store: StoreEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            controlling: ListenerEinstellungen::mit_port(44898),
            controlled: ListenerEinstellungen::mit_port(44899),
            signaling: ListenerEinstellungen::mit_port(44900),
            rendezvous: RendezvousEinstellungen::default(),
            store: StoreEinstellungen::default(),
            logging: LoggingEinstellungen::default(),
        }
    }
}

/// Ein TCP/TLS-Listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerEinstellungen {
    /// Ob der Listener gestartet wird
    pub aktiv: bool,
    /// Bind-Adresse
    pub bind_adresse: String,
    /// Port (0 = vom Betriebssystem vergeben)
    pub port: u16,
    /// TLS-Zertifikat-Pfad (leer = Klartext-TCP)
    pub tls_zertifikat: Option<String>,
    /// TLS-Schluessel-Pfad
    pub tls_schluessel: Option<String>,
}

impl ListenerEinstellungen {
    /// Standard-Listener auf allen Interfaces
    pub fn mit_port(port: u16) -> Self {
        Self {
            aktiv: true,
            bind_adresse: "0.0.0.0".into(),
            port,
            tls_zertifikat: None,
            tls_schluessel: None,
        }
    }

    /// Gibt die Bind-Adresse als SocketAddr zurueck
    pub fn adresse(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.bind_adresse, self.port).parse()?)
    }
}

impl Default for ListenerEinstellungen {
    fn default() -> Self {
        Self::mit_port(0)
    }
}

/// Rendezvous-Daten die in Auftraege kopiert werden
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousEinstellungen {
    /// Signaling-Adresse aus Sicht der Peers
    pub signaling_host: String,
    pub signaling_port: u16,
    /// TURN-artige Relay-Server (nur der erste wird verteilt)
    pub relay_servers: Vec<String>,
    /// STUN-artige Reflex-Server
    pub reflex_servers: Vec<String>,
}

impl Default for RendezvousEinstellungen {
    fn default() -> Self {
        Self {
            signaling_host: "127.0.0.1".into(),
            signaling_port: 44900,
            relay_servers: Vec::new(),
            reflex_servers: Vec::new(),
        }
    }
}

/// Persistenz-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreEinstellungen {
    /// SQLite-URL (`sqlite::memory:` fuer fluechtigen Betrieb)
    pub url: String,
    /// Maximale Pool-Groesse (bei `sqlite::memory:` zwingend 1)
    pub max_verbindungen: u32,
    /// Geraete-ID-Bereich fuer die Erstbefuellung des Pools
    pub id_bereich_von: u64,
    pub id_bereich_bis: u64,
}

impl Default for StoreEinstellungen {
    fn default() -> Self {
        Self {
            url: "sqlite://fernlink.db".into(),
            max_verbindungen: 5,
            id_bereich_von: 100_000_000,
            id_bereich_bis: 100_100_000,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration; fehlende Datei ergibt Standardwerte
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Ok(toml::from_str(&inhalt)?),
            Err(fehler) if fehler.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(fehler) => Err(fehler.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardwerte() {
        let config = ServerConfig::default();
        assert_eq!(config.controlling.port, 44898);
        assert_eq!(config.controlled.port, 44899);
        assert_eq!(config.signaling.port, 44900);
        assert!(config.controlling.aktiv);
        assert!(config.controlling.tls_zertifikat.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn toml_ueberschreibt_nur_gesetzte_sektionen() {
        let config: ServerConfig = toml::from_str(
            r#"
            [controlling]
            port = 5555

            [rendezvous]
            signaling_host = "sig.example"
            reflex_servers = ["stun:stun.example:3478"]

            [store]
            url = "sqlite::memory:"
            max_verbindungen = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.controlling.port, 5555);
        assert_eq!(config.controlling.bind_adresse, "0.0.0.0");
        // Unangetastete Sektionen behalten ihre Standardwerte
        assert_eq!(config.controlled.port, 44899);
        assert_eq!(config.rendezvous.signaling_host, "sig.example");
        assert_eq!(config.rendezvous.reflex_servers.len(), 1);
        assert_eq!(config.store.url, "sqlite::memory:");
        assert_eq!(config.store.max_verbindungen, 1);
    }

    #[test]
    fn adresse_parsen() {
        let listener = ListenerEinstellungen {
            bind_adresse: "127.0.0.1".into(),
            port: 8080,
            ..ListenerEinstellungen::mit_port(0)
        };
        let adresse = listener.adresse().unwrap();
        assert_eq!(adresse.port(), 8080);
    }
}
