//! Handler der Controlled-Rolle
//!
//! Ein Controlled-Geraet meldet sich an, beantwortet OpenConnection-
//! Aufforderungen und schliesst seine Auftraege wieder. Die Antwort auf
//! eine OpenConnection wird als RequestConnectionAck an das wartende
//! Controlling-Geraet weitergereicht.

use std::sync::Arc;

use fernlink_core::ConnectionId;
use fernlink_dispatch::{ConnectionEvent, DispatchResult, DispatcherBuilder};
use fernlink_protocol::message::{
    type_id, KeepAliveAck, LoginDevice, LoginDeviceAck, OpenConnectionAck, RequestConnectionAck,
};
use fernlink_protocol::{ErrorCode, ProtocolMessage};

use crate::device_id::ControlledLogin;
use crate::handlers::controlling::version_kodieren;
use crate::state::BrokerState;

/// Registriert alle Handler der Controlled-Rolle
pub fn registrieren(
    builder: &mut DispatcherBuilder,
    state: Arc<BrokerState>,
) -> DispatchResult<()> {
    {
        let state = Arc::clone(&state);
        builder.ereignis(ConnectionEvent::Verbunden, move |verbindung| {
            let state = Arc::clone(&state);
            async move {
                state.controlled_sessions.anlegen(verbindung);
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
        let state = Arc::clone(&state);
        builder.ereignis(ConnectionEvent::UnerwartetGeschlossen, move |verbindung| {
            let state = Arc::clone(&state);
            async move { verbindung_abgebaut(&state, verbindung).await }
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
        builder.handler(type_id::OPEN_CONNECTION_ACK, move |verbindung, nachricht| {
            let state = Arc::clone(&state);
            async move {
                let ProtocolMessage::OpenConnectionAck(anfrage) = nachricht else {
                    return Ok(None);
                };
                oeffnen_beantwortet(&state, verbindung, anfrage).await
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
    if let Some(geraet) = state.controlled_sessions.entfernen(verbindung) {
        state.orders.controlled_logout(geraet).await;
    }
}

async fn anmelden(
    state: &BrokerState,
    verbindung: ConnectionId,
    anfrage: LoginDevice,
) -> anyhow::Result<Option<ProtocolMessage>> {
    tracing::debug!(verbindung = %verbindung, geraet = %anfrage.device_id, "Controlled-LoginDevice");

    let mut ack = LoginDeviceAck::default();
    match state
        .identitaeten
        .controlled_pruefen(anfrage.device_id, &anfrage.cookie)
        .await?
    {
        ControlledLogin::Abgelehnt => {
            ack.err_code = ErrorCode::LoginDeviceInvalidId;
            return Ok(Some(ProtocolMessage::LoginDeviceAck(ack)));
        }
        ControlledLogin::Erfolgreich => {}
    }

    let version = version_kodieren(
        anfrage.version_major,
        anfrage.version_minor,
        anfrage.version_patch,
    );
    if state.controlled_sessions.anmelden(
        verbindung,
        anfrage.device_id,
        anfrage.allow_control,
        version,
        &anfrage.os,
    ) {
        ack.err_code = ErrorCode::Success;
        tracing::info!(verbindung = %verbindung, geraet = %anfrage.device_id, "Controlled-Login erfolgreich");
    } else {
        ack.err_code = ErrorCode::LoginDeviceInvalidStatus;
        tracing::info!(verbindung = %verbindung, geraet = %anfrage.device_id, "Controlled-Login fehlgeschlagen");
    }
    Ok(Some(ProtocolMessage::LoginDeviceAck(ack)))
}

async fn oeffnen_beantwortet(
    state: &BrokerState,
    verbindung: ConnectionId,
    anfrage: OpenConnectionAck,
) -> anyhow::Result<Option<ProtocolMessage>> {
    let geraet = state
        .controlled_sessions
        .nach_verbindung(verbindung)
        .and_then(|session| session.device_id);
    let Some(geraet) = geraet else {
        tracing::error!(verbindung = %verbindung, "OpenConnectionAck ohne angemeldetes Geraet");
        return Ok(None);
    };

    let Some(order) = state.orders.nach_controlled_geraet(geraet) else {
        tracing::error!(geraet = %geraet, "OpenConnectionAck ohne aktiven Auftrag");
        return Ok(None);
    };

    let Some(controlling_verbindung) = state
        .controlling_sessions
        .verbindung_nach_geraet(order.from_device_id)
    else {
        tracing::warn!(
            geraet = %order.from_device_id,
            "Controlling-Geraet nicht mehr online"
        );
        return Ok(None);
    };

    let ack = if anfrage.err_code != ErrorCode::Success {
        // Der Controlled-Peer lehnt ab: Auftrag sofort abbauen und den
        // Fehler durchreichen
        if state.orders.schliessen_von_controlled(&order.room_id, geraet).await {
            tracing::info!(raum = %order.room_id, "Auftrag nach Ablehnung geschlossen");
        } else {
            tracing::warn!(raum = %order.room_id, "Auftrag nach Ablehnung nicht auffindbar");
        }
        RequestConnectionAck {
            err_code: anfrage.err_code,
            request_id: order.client_request_id,
            device_id: Some(geraet),
            ..Default::default()
        }
    } else {
        RequestConnectionAck {
            err_code: ErrorCode::Success,
            request_id: order.client_request_id,
            device_id: Some(order.to_device_id),
            room_id: Some(order.room_id.clone()),
            client_id: Some(order.client_id.clone()),
            auth_token: Some(order.auth_token.clone()),
            signaling_host: Some(order.signaling_host.clone()),
            signaling_port: Some(order.signaling_port),
            p2p_username: Some(order.p2p_username.clone()),
            p2p_password: Some(order.p2p_password.clone()),
            reflex_servers: order.reflex_servers.clone(),
            streaming_params: anfrage.streaming_params,
            transport_type: anfrage.transport_type,
        }
    };

    if !state.controlling_verbindungen.senden(
        controlling_verbindung,
        ProtocolMessage::RequestConnectionAck(ack),
    ) {
        tracing::warn!(
            verbindung = %controlling_verbindung,
            "RequestConnectionAck nicht zustellbar"
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
        .controlled_sessions
        .nach_verbindung(verbindung)
        .and_then(|session| session.device_id);
    let Some(geraet) = geraet else {
        tracing::error!(verbindung = %verbindung, "CloseConnection ohne angemeldetes Geraet");
        return Ok(None);
    };

    if state.orders.schliessen_von_controlled(&room_id, geraet).await {
        tracing::info!(raum = %room_id, "Auftrag auf Controlled-Wunsch geschlossen");
    } else {
        tracing::warn!(raum = %room_id, "Auftrag nicht geschlossen (unbekannt oder fremde Seite)");
    }
    Ok(None)
}
