//! Fehlertypen fuer den Dispatch-Kern

use thiserror::Error;

/// Fehlertyp fuer Dispatcher-Aufbau und Transport
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Fuer diese Typ-ID ist bereits ein Handler registriert
    #[error("Doppelter Handler fuer Typ-ID {0}")]
    DoppelterHandler(u32),

    /// Fuer dieses Verbindungs-Ereignis ist bereits ein Handler registriert
    #[error("Doppelter Handler fuer Ereignis {0:?}")]
    DoppelterEreignisHandler(crate::dispatcher::ConnectionEvent),

    /// IO-Fehler (TCP, TLS)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

/// Result-Typ fuer den Dispatch-Kern
pub type DispatchResult<T> = Result<T, DispatchError>;
