//! End-to-End-Test des Rendezvous-Ablaufs ueber echte Sockets
//!
//! Faehrt den kompletten Server (Controlling-, Controlled- und
//! Signaling-Listener, In-Memory-SQLite) hoch und spielt den Ablauf eines
//! echten Fernwartungs-Clients durch: ID-Zuteilung, Anmeldung beider
//! Rollen, Verbindungsaufbau mit Auftrags-Zugangsdaten, Signaling im Raum
//! und Auftragsabbau.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use fernlink_core::{DeviceId, SessionId};
use fernlink_protocol::message::{
    AllocateDeviceId, CloseConnection, JoinRoom, KeepAlive, LoginDevice, OpenConnectionAck,
    RequestConnection, SignalingMessage,
};
use fernlink_protocol::{DecoderRegistry, ErrorCode, NetPacket, PacketCodec, ProtocolMessage};
use fernlink_server::{aufbauen, config::ServerConfig, LaufenderServer};

// ---------------------------------------------------------------------------
// Test-Infrastruktur
// ---------------------------------------------------------------------------

struct TestClient {
    framed: Framed<TcpStream, PacketCodec>,
    decoder: DecoderRegistry,
}

impl TestClient {
    async fn verbinden(adresse: SocketAddr) -> Self {
        let stream = TcpStream::connect(adresse).await.expect("verbinden");
        Self {
            framed: Framed::new(stream, PacketCodec::neu()),
            decoder: DecoderRegistry::standard(),
        }
    }

    async fn senden(&mut self, nachricht: ProtocolMessage) {
        let paket = nachricht.kodieren().expect("kodieren");
        self.framed.send(paket).await.expect("senden");
    }

    async fn roh_senden(&mut self, paket: NetPacket) {
        self.framed.send(paket).await.expect("roh senden");
    }

    async fn empfangen(&mut self) -> ProtocolMessage {
        loop {
            let paket = timeout(Duration::from_secs(5), self.framed.next())
                .await
                .expect("Zeitlimit beim Empfangen")
                .expect("Verbindung unerwartet beendet")
                .expect("Framing-Fehler");
            if let Some(nachricht) = self.decoder.dekodieren(&paket) {
                return nachricht;
            }
        }
    }
}

fn testconfig() -> ServerConfig {
    let mut config = ServerConfig::default();
    for listener in [
        &mut config.controlling,
        &mut config.controlled,
        &mut config.signaling,
    ] {
        listener.bind_adresse = "127.0.0.1".into();
        listener.port = 0;
    }
    config.rendezvous.signaling_host = "127.0.0.1".into();
    config.rendezvous.signaling_port = 44900;
    config.rendezvous.relay_servers = vec!["relay:relay.example:3478".into()];
    config.rendezvous.reflex_servers = vec![
        "stun:stun.example:3478".into(),
        "stun:stun2.example:3478".into(),
    ];
    config.store.url = "sqlite::memory:".into();
    config.store.max_verbindungen = 1;
    config.store.id_bereich_von = 500_000;
    config.store.id_bereich_bis = 500_100;
    config
}

async fn testserver() -> LaufenderServer {
    aufbauen(testconfig()).await.expect("Server aufbauen")
}

async fn id_zuteilen(client: &mut TestClient) -> (DeviceId, String) {
    client
        .senden(ProtocolMessage::AllocateDeviceId(AllocateDeviceId {}))
        .await;
    match client.empfangen().await {
        ProtocolMessage::AllocateDeviceIdAck(ack) => {
            assert_eq!(ack.err_code, ErrorCode::Success);
            (ack.device_id.expect("ID"), ack.cookie.expect("Cookie"))
        }
        andere => panic!("AllocateDeviceIdAck erwartet, erhalten: {:?}", andere),
    }
}

fn login(device_id: DeviceId, cookie: &str, allow_control: bool) -> ProtocolMessage {
    ProtocolMessage::LoginDevice(LoginDevice {
        device_id,
        cookie: cookie.into(),
        allow_control,
        version_major: 1,
        version_minor: 2,
        version_patch: 3,
        os: "linux".into(),
    })
}

async fn anmelden(client: &mut TestClient, device_id: DeviceId, cookie: &str, allow_control: bool) {
    client.senden(login(device_id, cookie, allow_control)).await;
    match client.empfangen().await {
        ProtocolMessage::LoginDeviceAck(ack) => {
            assert_eq!(ack.err_code, ErrorCode::Success);
        }
        andere => panic!("LoginDeviceAck erwartet, erhalten: {:?}", andere),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn kompletter_rendezvous_ablauf() {
    let server = testserver().await;

    // Controlling-Geraet: ID zuteilen und anmelden
    let mut controlling = TestClient::verbinden(server.controlling_adresse.unwrap()).await;
    let (controlling_id, controlling_cookie) = id_zuteilen(&mut controlling).await;
    // Eine zweite Identitaet fuer das Controlled-Geraet
    let (controlled_id, controlled_cookie) = id_zuteilen(&mut controlling).await;
    assert_ne!(controlling_id, controlled_id);
    anmelden(&mut controlling, controlling_id, &controlling_cookie, false).await;

    // Controlled-Geraet anmelden
    let mut controlled = TestClient::verbinden(server.controlled_adresse.unwrap()).await;
    anmelden(&mut controlled, controlled_id, &controlled_cookie, true).await;

    // Verbindungswunsch: Controlling -> Broker -> Controlled
    controlling
        .senden(ProtocolMessage::RequestConnection(RequestConnection {
            device_id: controlled_id,
            request_id: 7,
            access_token: "zugang".into(),
            client_version: "1.2.3".into(),
            transport_type: 1,
            streaming_params: serde_json::json!({"breite": 1920}),
        }))
        .await;

    let oeffnen = match controlled.empfangen().await {
        ProtocolMessage::OpenConnection(oeffnen) => oeffnen,
        andere => panic!("OpenConnection erwartet, erhalten: {:?}", andere),
    };
    assert_eq!(oeffnen.client_device_id, controlling_id);
    assert_eq!(oeffnen.signaling_host, "127.0.0.1");
    assert_eq!(oeffnen.signaling_port, 44900);
    assert_eq!(oeffnen.access_token, "zugang");
    assert_eq!(oeffnen.p2p_username.len(), 6);
    assert_eq!(oeffnen.p2p_password.len(), 20);
    assert_eq!(oeffnen.relay_servers, vec!["relay:relay.example:3478"]);
    assert_eq!(oeffnen.reflex_servers.len(), 2);

    // Controlled bestaetigt; das Ack erreicht das Controlling-Geraet
    controlled
        .senden(ProtocolMessage::OpenConnectionAck(OpenConnectionAck {
            err_code: ErrorCode::Success,
            streaming_params: serde_json::json!({"breite": 1280}),
            transport_type: Some(1),
        }))
        .await;

    let ack = match controlling.empfangen().await {
        ProtocolMessage::RequestConnectionAck(ack) => ack,
        andere => panic!("RequestConnectionAck erwartet, erhalten: {:?}", andere),
    };
    assert_eq!(ack.err_code, ErrorCode::Success);
    assert_eq!(ack.request_id, 7);
    assert_eq!(ack.device_id, Some(controlled_id));
    assert_eq!(ack.room_id.as_ref(), Some(&oeffnen.room_id));
    assert_eq!(ack.auth_token.as_deref(), Some(oeffnen.auth_token.as_str()));
    assert_eq!(
        ack.p2p_username.as_deref(),
        Some(oeffnen.p2p_username.as_str())
    );

    // Beide Peers treffen sich im Signaling-Raum
    let raum = ack.room_id.clone().unwrap();
    let mut peer_a = TestClient::verbinden(server.signaling_adresse.unwrap()).await;
    let mut peer_b = TestClient::verbinden(server.signaling_adresse.unwrap()).await;

    peer_a
        .senden(ProtocolMessage::JoinRoom(JoinRoom {
            room_id: raum.clone(),
            session_id: SessionId("s1".into()),
        }))
        .await;
    match peer_a.empfangen().await {
        ProtocolMessage::JoinRoomAck(ack) => assert_eq!(ack.err_code, ErrorCode::Success),
        andere => panic!("JoinRoomAck erwartet, erhalten: {:?}", andere),
    }

    peer_b
        .senden(ProtocolMessage::JoinRoom(JoinRoom {
            room_id: raum.clone(),
            session_id: SessionId("s2".into()),
        }))
        .await;
    match peer_b.empfangen().await {
        ProtocolMessage::JoinRoomAck(ack) => assert_eq!(ack.err_code, ErrorCode::Success),
        andere => panic!("JoinRoomAck erwartet, erhalten: {:?}", andere),
    }

    // Relay in beide Richtungen
    peer_a
        .senden(ProtocolMessage::SignalingMessage(SignalingMessage {
            content: serde_json::json!({"sdp": "offer"}),
        }))
        .await;
    match peer_a.empfangen().await {
        ProtocolMessage::SignalingMessageAck(ack) => assert_eq!(ack.err_code, ErrorCode::Success),
        andere => panic!("SignalingMessageAck erwartet, erhalten: {:?}", andere),
    }
    match peer_b.empfangen().await {
        ProtocolMessage::SignalingMessage(nachricht) => {
            assert_eq!(nachricht.content["sdp"], "offer");
        }
        andere => panic!("SignalingMessage erwartet, erhalten: {:?}", andere),
    }

    // Auftrag schliessen; danach ist ein neuer Auftrag fuer dasselbe Paar
    // wieder moeglich
    controlling
        .senden(ProtocolMessage::CloseConnection(CloseConnection {
            room_id: raum,
        }))
        .await;
    controlling
        .senden(ProtocolMessage::RequestConnection(RequestConnection {
            device_id: controlled_id,
            request_id: 8,
            access_token: "zugang".into(),
            client_version: "1.2.3".into(),
            transport_type: 1,
            streaming_params: serde_json::Value::Null,
        }))
        .await;
    match controlled.empfangen().await {
        ProtocolMessage::OpenConnection(zweites) => {
            assert_ne!(zweites.room_id, oeffnen.room_id, "Frischer Raum erwartet");
        }
        andere => panic!("Zweite OpenConnection erwartet, erhalten: {:?}", andere),
    }

    server.stoppen().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn peer_nicht_online_wird_gemeldet() {
    let server = testserver().await;

    let mut controlling = TestClient::verbinden(server.controlling_adresse.unwrap()).await;
    let (controlling_id, cookie) = id_zuteilen(&mut controlling).await;
    anmelden(&mut controlling, controlling_id, &cookie, false).await;

    controlling
        .senden(ProtocolMessage::RequestConnection(RequestConnection {
            device_id: DeviceId(999_999),
            request_id: 1,
            access_token: String::new(),
            client_version: "1.0.0".into(),
            transport_type: 0,
            streaming_params: serde_json::Value::Null,
        }))
        .await;

    match controlling.empfangen().await {
        ProtocolMessage::RequestConnectionAck(ack) => {
            assert_eq!(ack.err_code, ErrorCode::RequestConnectionPeerNotOnline);
            assert_eq!(ack.request_id, 1);
        }
        andere => panic!("RequestConnectionAck erwartet, erhalten: {:?}", andere),
    }

    server.stoppen().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unbekannter_login_wird_abgelehnt() {
    let server = testserver().await;

    // Controlled-Rolle: unbekannte ID ergibt InvalidId ohne Ersatz
    let mut controlled = TestClient::verbinden(server.controlled_adresse.unwrap()).await;
    controlled.senden(login(DeviceId(123), "cookie", true)).await;
    match controlled.empfangen().await {
        ProtocolMessage::LoginDeviceAck(ack) => {
            assert_eq!(ack.err_code, ErrorCode::LoginDeviceInvalidId);
            assert!(ack.new_device_id.is_none());
        }
        andere => panic!("LoginDeviceAck erwartet, erhalten: {:?}", andere),
    }

    // Controlling-Rolle: unbekannte ID bekommt eine Ersatz-Identitaet
    let mut controlling = TestClient::verbinden(server.controlling_adresse.unwrap()).await;
    controlling.senden(login(DeviceId(123), "cookie", false)).await;
    match controlling.empfangen().await {
        ProtocolMessage::LoginDeviceAck(ack) => {
            assert_eq!(ack.err_code, ErrorCode::LoginDeviceInvalidId);
            assert!(ack.new_device_id.is_some());
            assert!(ack.new_cookie.is_some());
        }
        andere => panic!("LoginDeviceAck erwartet, erhalten: {:?}", andere),
    }

    server.stoppen().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unbekannter_nachrichtentyp_laesst_verbindung_offen() {
    let server = testserver().await;

    let mut controlling = TestClient::verbinden(server.controlling_adresse.unwrap()).await;

    // Frame mit nicht registrierter Typ-ID: keine Antwort, kein Abbruch
    let mut payload = Vec::new();
    payload.extend_from_slice(&0xdeadu32.to_le_bytes());
    payload.extend_from_slice(b"{}");
    controlling
        .roh_senden(NetPacket::neu(payload.into()))
        .await;

    // Die Verbindung verarbeitet weiterhin Nachrichten
    controlling
        .senden(ProtocolMessage::KeepAlive(KeepAlive {}))
        .await;
    match controlling.empfangen().await {
        ProtocolMessage::KeepAliveAck(_) => {}
        andere => panic!("KeepAliveAck erwartet, erhalten: {:?}", andere),
    }

    server.stoppen().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn falsche_magic_trennt_die_verbindung() {
    let server = testserver().await;

    let mut stream = TcpStream::connect(server.controlling_adresse.unwrap())
        .await
        .unwrap();
    stream
        .write_all(&[0xff; 16])
        .await
        .expect("Junk schreiben");

    // Der Server behandelt den Strom als korrupt und trennt
    let mut puffer = [0u8; 16];
    let gelesen = timeout(Duration::from_secs(5), stream.read(&mut puffer))
        .await
        .expect("Zeitlimit beim Lesen")
        .expect("Lesen");
    assert_eq!(gelesen, 0, "EOF erwartet");

    server.stoppen().await;
}
