//! TCP/TLS-Listener – bindet Socket, akzeptiert Verbindungen
//!
//! Pro Rolle (Controlling, Controlled, Signaling) laeuft ein `SocketServer`
//! mit eigenem Dispatcher. Jede angenommene Verbindung bekommt:
//! - eine Lese-Schleife, die Frames dekodiert und an den Dispatcher meldet,
//! - einen Schreib-Task, der den Ausgangs-Kanal der Verbindung leert
//!   (dadurch ueberlappen sich Schreibvorgaenge nie).
//!
//! Ein Framing- oder IO-Fehler beendet die Verbindung als "unerwartet
//! geschlossen"; ein sauberes EOF als "geschlossen". Verworfene Nachrichten
//! (unbekannter Typ, kaputter Koerper) beenden die Verbindung nicht.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;

use fernlink_protocol::{DecoderRegistry, PacketCodec, ProtocolMessage};

use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::error::DispatchResult;

/// TCP/TLS-Server einer Rolle
pub struct SocketServer {
    rolle: String,
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    decoder: Arc<DecoderRegistry>,
    tls: Option<TlsAcceptor>,
}

impl SocketServer {
    /// Bindet den Listener
    ///
    /// `tls = Some(...)` aktiviert einen TLS-Handshake pro Verbindung;
    /// `None` bedeutet Klartext-TCP (TLS-Terminierung extern).
    pub async fn binden(
        rolle: impl Into<String>,
        adresse: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        decoder: Arc<DecoderRegistry>,
        tls: Option<TlsAcceptor>,
    ) -> DispatchResult<Self> {
        let listener = TcpListener::bind(adresse).await?;
        Ok(Self {
            rolle: rolle.into(),
            listener,
            dispatcher,
            decoder,
            tls,
        })
    }

    /// Gibt die tatsaechlich gebundene Adresse zurueck
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Akzeptiert Verbindungen bis das Shutdown-Signal eingeht
    pub async fn starten(self, mut shutdown_rx: watch::Receiver<bool>) -> DispatchResult<()> {
        let adresse = self.lokale_adresse()?;
        tracing::info!(rolle = %self.rolle, adresse = %adresse, "Socket-Server gestartet");

        loop {
            tokio::select! {
                resultat = self.listener.accept() => {
                    match resultat {
                        Ok((stream, peer)) => {
                            self.verbindung_annehmen(stream, peer, shutdown_rx.clone());
                        }
                        Err(fehler) => {
                            tracing::error!(rolle = %self.rolle, fehler = %fehler, "TCP-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(rolle = %self.rolle, "Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        tracing::info!(rolle = %self.rolle, "Socket-Server gestoppt");
        Ok(())
    }

    fn verbindung_annehmen(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown_rx: watch::Receiver<bool>,
    ) {
        tracing::debug!(rolle = %self.rolle, peer = %peer, "Verbindung akzeptiert");

        let dispatcher = Arc::clone(&self.dispatcher);
        let decoder = Arc::clone(&self.decoder);
        let tls = self.tls.clone();

        tokio::spawn(async move {
            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        verbindung_bedienen(tls_stream, dispatcher, decoder, peer, shutdown_rx)
                            .await;
                    }
                    Err(fehler) => {
                        tracing::warn!(peer = %peer, fehler = %fehler, "TLS-Handshake fehlgeschlagen");
                    }
                },
                None => {
                    verbindung_bedienen(stream, dispatcher, decoder, peer, shutdown_rx).await;
                }
            }
        });
    }
}

/// Betreibt eine einzelne Verbindung bis zum Ende
async fn verbindung_bedienen<S>(
    stream: S,
    dispatcher: Arc<Dispatcher>,
    decoder: Arc<DecoderRegistry>,
    peer: SocketAddr,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let framed = Framed::new(stream, PacketCodec::neu());
    let (mut sink, mut strom) = framed.split();

    let (sende_tx, mut sende_rx) = mpsc::unbounded_channel::<ProtocolMessage>();
    let verbindung = Connection::neu(sende_tx);
    let verbindungs_id = verbindung.id();

    // Schreib-Task: einziger Schreiber auf dem Socket. Endet wenn alle
    // Sender (Verbindung + Dispatch-Aufgaben) aufgegeben wurden.
    tokio::spawn(async move {
        while let Some(nachricht) = sende_rx.recv().await {
            let paket = match nachricht.kodieren() {
                Ok(paket) => paket,
                Err(fehler) => {
                    tracing::warn!(verbindung = %verbindungs_id, fehler = %fehler, "Kodierung fehlgeschlagen");
                    continue;
                }
            };
            if let Err(fehler) = sink.send(paket).await {
                tracing::debug!(verbindung = %verbindungs_id, fehler = %fehler, "Senden fehlgeschlagen");
                break;
            }
        }
    });

    dispatcher.verbindung_angenommen(Arc::clone(&verbindung));
    tracing::info!(verbindung = %verbindungs_id, peer = %peer, "Neue Verbindung");

    let mut unerwartet = false;
    loop {
        tokio::select! {
            frame = strom.next() => {
                match frame {
                    Some(Ok(paket)) => {
                        // Verworfene Pakete (None) sind kein Fehler
                        if let Some(nachricht) = decoder.dekodieren(&paket) {
                            dispatcher.nachricht_empfangen(&verbindung, nachricht);
                        }
                    }
                    Some(Err(fehler)) => {
                        tracing::warn!(
                            verbindung = %verbindungs_id,
                            peer = %peer,
                            fehler = %fehler,
                            "Framing-/IO-Fehler – Verbindung wird getrennt"
                        );
                        unerwartet = true;
                        break;
                    }
                    None => {
                        tracing::info!(verbindung = %verbindungs_id, peer = %peer, "Verbindung vom Peer getrennt");
                        break;
                    }
                }
            }

            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::debug!(verbindung = %verbindungs_id, "Shutdown – Verbindung wird getrennt");
                    break;
                }
            }
        }
    }

    dispatcher.verbindung_geschlossen(&verbindung, unerwartet);
}
