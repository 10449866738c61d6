//! Fehlertypen fuer den Broker

use fernlink_core::DeviceId;
use thiserror::Error;

/// Fehlertyp fuer den Broker
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Eines der beiden Geraete hat bereits einen aktiven Auftrag
    #[error("Auftragskonflikt: Controlling {from} oder Controlled {to} hat bereits einen aktiven Auftrag")]
    AuftragKonflikt { from: DeviceId, to: DeviceId },

    /// Persistenzfehler
    #[error(transparent)]
    Store(#[from] fernlink_store::StoreError),
}

/// Result-Typ fuer den Broker
pub type BrokerResult<T> = Result<T, BrokerError>;
