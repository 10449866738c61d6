//! Handler des Signaling-Servers
//!
//! Drei Nachrichten: Raumbeitritt, Relay einer opaken Signaling-Nachricht
//! an den Raum-Peer und Keepalive. Der Verbindungsabbau raeumt die Session
//! aus ihrem Raum.

use std::sync::Arc;

use fernlink_dispatch::{ConnectionEvent, ConnectionRegistry, DispatchResult, DispatcherBuilder};
use fernlink_protocol::message::{type_id, JoinRoomAck, KeepAliveAck, SignalingMessageAck};
use fernlink_protocol::{ErrorCode, ProtocolMessage};

use crate::room::RoomRegistry;

/// Registriert alle Handler des Signaling-Servers
pub fn registrieren(
    builder: &mut DispatcherBuilder,
    raeume: Arc<RoomRegistry>,
    verbindungen: Arc<ConnectionRegistry>,
) -> DispatchResult<()> {
    {
        let raeume = Arc::clone(&raeume);
        builder.ereignis(ConnectionEvent::Geschlossen, move |verbindung| {
            let raeume = Arc::clone(&raeume);
            async move {
                raeume.verlassen(verbindung);
            }
        })?;
    }
    {
        let raeume = Arc::clone(&raeume);
        builder.ereignis(ConnectionEvent::UnerwartetGeschlossen, move |verbindung| {
            let raeume = Arc::clone(&raeume);
            async move {
                raeume.verlassen(verbindung);
            }
        })?;
    }

    {
        let raeume = Arc::clone(&raeume);
        builder.handler(type_id::JOIN_ROOM, move |verbindung, nachricht| {
            let raeume = Arc::clone(&raeume);
            async move {
                let ProtocolMessage::JoinRoom(anfrage) = nachricht else {
                    return Ok(None);
                };

                let err_code =
                    if raeume.beitreten(anfrage.room_id.clone(), anfrage.session_id, verbindung) {
                        ErrorCode::Success
                    } else {
                        ErrorCode::JoinRoomFailed
                    };
                Ok(Some(ProtocolMessage::JoinRoomAck(JoinRoomAck { err_code })))
            }
        })?;
    }
    {
        let raeume = Arc::clone(&raeume);
        let verbindungen = Arc::clone(&verbindungen);
        builder.handler(type_id::SIGNALING_MESSAGE, move |verbindung, nachricht| {
            let raeume = Arc::clone(&raeume);
            let verbindungen = Arc::clone(&verbindungen);
            async move {
                if !matches!(nachricht, ProtocolMessage::SignalingMessage(_)) {
                    return Ok(None);
                }

                // Nachricht unveraendert an den Peer weiterreichen
                let zugestellt = match raeume.relay_ziel(verbindung) {
                    Some(ziel) => verbindungen.senden(ziel, nachricht),
                    None => false,
                };

                let err_code = if zugestellt {
                    ErrorCode::Success
                } else {
                    tracing::debug!(verbindung = %verbindung, "Relay ohne erreichbaren Peer");
                    ErrorCode::SignalingPeerNotOnline
                };
                Ok(Some(ProtocolMessage::SignalingMessageAck(
                    SignalingMessageAck { err_code },
                )))
            }
        })?;
    }
    builder.handler(type_id::KEEP_ALIVE, |_, _| async {
        Ok(Some(ProtocolMessage::KeepAliveAck(KeepAliveAck {})))
    })?;

    Ok(())
}
