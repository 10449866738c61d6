//! Handler der Controlling-Rolle
//!
//! Ein Controlling-Geraet meldet sich an, fordert Verbindungen zu
//! Controlled-Geraeten an und schliesst seine Auftraege wieder.

use std::sync::Arc;

use fernlink_core::{ConnectionId, DeviceId};
use fernlink_dispatch::{ConnectionEvent, DispatchResult, DispatcherBuilder};
use fernlink_protocol::message::{
    type_id, AllocateDeviceIdAck, KeepAliveAck, LoginDevice, LoginDeviceAck, OpenConnection,
    RequestConnection, RequestConnectionAck,
};
use fernlink_protocol::{ErrorCode, ProtocolMessage};

use crate::device_id::ControllingLogin;
use crate::state::BrokerState;

/// Kodiert die Client-Version als eine Zahl
pub(crate) fn version_kodieren(major: u32, minor: u32, patch: u32) -> u32 {
    major * 1_000_000 + minor * 1_000 + patch
}

/// Registriert alle Handler der Controlling-Rolle
pub fn registrieren(
    builder: &mut DispatcherBuilder,
    state: Arc<BrokerState>,
) -> DispatchResult<()> {
    {
        let state = Arc::clone(&state);
        builder.ereignis(ConnectionEvent::Verbunden, move |verbindung| {
            let state = Arc::clone(&state);
            async move {
                state.controlling_sessions.anlegen(verbindung);
            }
        })?;
    }
    {
        let state = Arc::clone(&state);
        builder.ereignis(ConnectionEvent::Geschlossen, move |verbindung| {
            let state = Arc::clone(&state);
            async move { verbindung_abgebaut(&state, verbindung).await }
        })?;
    }
    {
        // Auch halboffene Verbindungen raeumen Session und Auftrag ab
        let state = Arc::clone(&state);
        builder.ereignis(ConnectionEvent::UnerwartetGeschlossen, move |verbindung| {
            let state = Arc::clone(&state);
            async move { verbindung_abgebaut(&state, verbindung).await }
        })?;
    }

    {
        let state = Arc::clone(&state);
        builder.handler(type_id::ALLOCATE_DEVICE_ID, move |_, _| {
            let state = Arc::clone(&state);
            async move { id_zuteilen(&state).await }
        })?;
    }
    {
        let state = Arc::clone(&state);
        builder.handler(type_id::LOGIN_DEVICE, move |verbindung, nachricht| {
            let state = Arc::clone(&state);
            async move {
                let ProtocolMessage::LoginDevice(anfrage) = nachricht else {
                    return Ok(None);
                };
                anmelden(&state, verbindung, anfrage).await
            }
        })?;
    }
    {
        let state = Arc::clone(&state);
        builder.handler(type_id::REQUEST_CONNECTION, move |verbindung, nachricht| {
            let state = Arc::clone(&state);
            async move {
                let ProtocolMessage::RequestConnection(anfrage) = nachricht else {
                    return Ok(None);
                };
                verbindung_anfordern(&state, verbindung, anfrage).await
            }
        })?;
    }
    {
        let state = Arc::clone(&state);
        builder.handler(type_id::CLOSE_CONNECTION, move |verbindung, nachricht| {
            let state = Arc::clone(&state);
            async move {
                let ProtocolMessage::CloseConnection(anfrage) = nachricht else {
                    return Ok(None);
                };
                auftrag_schliessen(&state, verbindung, anfrage.room_id).await
            }
        })?;
    }
    builder.handler(type_id::KEEP_ALIVE, |_, _| async {
        Ok(Some(ProtocolMessage::KeepAliveAck(KeepAliveAck {})))
    })?;

    Ok(())
}

async fn verbindung_abgebaut(state: &BrokerState, verbindung: ConnectionId) {
    if let Some(geraet) = state.controlling_sessions.entfernen(verbindung) {
        state.orders.controlling_logout(geraet).await;
    }
}

async fn id_zuteilen(state: &BrokerState) -> anyhow::Result<Option<ProtocolMessage>> {
    let ack = match state.identitaeten.zuteilen().await? {
        Some(identitaet) => AllocateDeviceIdAck {
            err_code: ErrorCode::Success,
            device_id: Some(identitaet.device_id),
            cookie: Some(identitaet.cookie),
        },
        None => {
            tracing::error!("Geraete-ID-Pool erschoepft");
            AllocateDeviceIdAck {
                err_code: ErrorCode::AllocateDeviceIdNoAvailableId,
                ..Default::default()
            }
        }
    };
    Ok(Some(ProtocolMessage::AllocateDeviceIdAck(ack)))
}

async fn anmelden(
    state: &BrokerState,
    verbindung: ConnectionId,
    anfrage: LoginDevice,
) -> anyhow::Result<Option<ProtocolMessage>> {
    tracing::debug!(verbindung = %verbindung, geraet = %anfrage.device_id, "Controlling-LoginDevice");

    let mut ack = LoginDeviceAck::default();
    match state
        .identitaeten
        .controlling_pruefen(anfrage.device_id, &anfrage.cookie)
        .await?
    {
        ControllingLogin::UnbekannteId { ersatz } => {
            ack.err_code = ErrorCode::LoginDeviceInvalidId;
            if let Some(ersatz) = ersatz {
                ack.new_device_id = Some(ersatz.device_id);
                ack.new_cookie = Some(ersatz.cookie);
            }
            return Ok(Some(ProtocolMessage::LoginDeviceAck(ack)));
        }
        ControllingLogin::FalschesCookie { ersatz } => {
            ack.err_code = ErrorCode::LoginDeviceInvalidCookie;
            if let Some(ersatz) = ersatz {
                ack.new_device_id = Some(ersatz.device_id);
                ack.new_cookie = Some(ersatz.cookie);
            }
            return Ok(Some(ProtocolMessage::LoginDeviceAck(ack)));
        }
        ControllingLogin::Erfolgreich { neues_cookie } => {
            ack.new_cookie = neues_cookie;
        }
    }

    let version = version_kodieren(
        anfrage.version_major,
        anfrage.version_minor,
        anfrage.version_patch,
    );
    if state.controlling_sessions.anmelden(
        verbindung,
        anfrage.device_id,
        false,
        version,
        &anfrage.os,
    ) {
        ack.err_code = ErrorCode::Success;
        tracing::info!(verbindung = %verbindung, geraet = %anfrage.device_id, "Controlling-Login erfolgreich");
    } else {
        // Session fehlt oder es ist schon ein Geraet angemeldet
        ack.err_code = ErrorCode::LoginDeviceInvalidStatus;
        tracing::info!(verbindung = %verbindung, geraet = %anfrage.device_id, "Controlling-Login fehlgeschlagen");
    }
    Ok(Some(ProtocolMessage::LoginDeviceAck(ack)))
}

fn anfrage_fehlschlag(
    request_id: u32,
    device_id: Option<DeviceId>,
    err_code: ErrorCode,
) -> Option<ProtocolMessage> {
    Some(ProtocolMessage::RequestConnectionAck(RequestConnectionAck {
        err_code,
        request_id,
        device_id,
        ..Default::default()
    }))
}

async fn verbindung_anfordern(
    state: &BrokerState,
    verbindung: ConnectionId,
    anfrage: RequestConnection,
) -> anyhow::Result<Option<ProtocolMessage>> {
    let ziel = anfrage.device_id;

    // Controlled-Peer muss online und angemeldet sein
    let Some(peer_verbindung) = state.controlled_sessions.verbindung_nach_geraet(ziel) else {
        tracing::warn!(geraet = %ziel, "Controlled-Geraet nicht online");
        return Ok(anfrage_fehlschlag(
            anfrage.request_id,
            Some(ziel),
            ErrorCode::RequestConnectionPeerNotOnline,
        ));
    };
    let peer_session = state.controlled_sessions.nach_verbindung(peer_verbindung);
    if peer_session.and_then(|session| session.device_id).is_none() {
        tracing::warn!(geraet = %ziel, "Controlled-Geraet nicht angemeldet");
        return Ok(anfrage_fehlschlag(
            anfrage.request_id,
            Some(ziel),
            ErrorCode::RequestConnectionPeerNotOnline,
        ));
    }

    // Eigene Session kann zwischenzeitlich abgebaut worden sein
    let eigenes_geraet = state
        .controlling_sessions
        .nach_verbindung(verbindung)
        .and_then(|session| session.device_id);
    let Some(eigenes_geraet) = eigenes_geraet else {
        tracing::error!(verbindung = %verbindung, "Controlling-Session ohne Geraet");
        return Ok(anfrage_fehlschlag(
            anfrage.request_id,
            None,
            ErrorCode::RequestConnectionInvalidStatus,
        ));
    };

    let order = match state
        .orders
        .anlegen(eigenes_geraet, ziel, anfrage.request_id)
        .await
    {
        Ok(order) => order,
        Err(fehler) => {
            tracing::warn!(
                von = %eigenes_geraet,
                zu = %ziel,
                fehler = %fehler,
                "Auftragserstellung fehlgeschlagen"
            );
            return Ok(anfrage_fehlschlag(
                anfrage.request_id,
                Some(ziel),
                ErrorCode::RequestConnectionCreateOrderFailed,
            ));
        }
    };

    // Controlled-Peer zum Oeffnen auffordern; das Ack an das
    // Controlling-Geraet folgt erst mit dessen OpenConnectionAck
    let oeffnen = OpenConnection {
        signaling_host: order.signaling_host.clone(),
        signaling_port: order.signaling_port,
        room_id: order.room_id.clone(),
        service_id: order.service_id.clone(),
        auth_token: order.auth_token.clone(),
        p2p_username: order.p2p_username.clone(),
        p2p_password: order.p2p_password.clone(),
        client_device_id: eigenes_geraet,
        access_token: anfrage.access_token,
        client_version: anfrage.client_version,
        transport_type: anfrage.transport_type,
        streaming_params: anfrage.streaming_params,
        reflex_servers: order.reflex_servers.clone(),
        relay_servers: if order.relay_server.is_empty() {
            Vec::new()
        } else {
            vec![order.relay_server.clone()]
        },
    };
    if !state
        .controlled_verbindungen
        .senden(peer_verbindung, ProtocolMessage::OpenConnection(oeffnen))
    {
        tracing::warn!(
            geraet = %ziel,
            verbindung = %peer_verbindung,
            "OpenConnection nicht zustellbar"
        );
    }
    Ok(None)
}

async fn auftrag_schliessen(
    state: &BrokerState,
    verbindung: ConnectionId,
    room_id: fernlink_core::RoomId,
) -> anyhow::Result<Option<ProtocolMessage>> {
    let geraet = state
        .controlling_sessions
        .nach_verbindung(verbindung)
        .and_then(|session| session.device_id);
    let Some(geraet) = geraet else {
        tracing::error!(verbindung = %verbindung, "CloseConnection ohne angemeldetes Geraet");
        return Ok(None);
    };

    if state.orders.schliessen_von_controlling(&room_id, geraet).await {
        tracing::info!(raum = %room_id, "Auftrag auf Controlling-Wunsch geschlossen");
    } else {
        tracing::warn!(raum = %room_id, "Auftrag nicht geschlossen (unbekannt oder fremde Seite)");
    }
    Ok(None)
}
