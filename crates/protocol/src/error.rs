//! Fehlertypen fuer das Fernlink-Protokoll

use thiserror::Error;

/// Fehlertyp fuer Framing und Nachrichten-Kodierung
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Magic-Konstante im Header stimmt nicht – der Bytestrom ist korrupt
    /// und die Verbindung muss getrennt werden
    #[error("Ungueltige Magic-Konstante: 0x{0:06x}")]
    UngueltigeMagic(u32),

    /// Payload ueberschreitet die konfigurierte Maximalgroesse
    #[error("Frame zu gross: {laenge} Bytes (Maximum: {maximum} Bytes)")]
    FrameZuGross { laenge: usize, maximum: usize },

    /// Nachrichtenkoerper konnte nicht serialisiert werden
    #[error("Serialisierung fehlgeschlagen: {0}")]
    Serialisierung(#[from] serde_json::Error),
}

impl From<ProtocolError> for std::io::Error {
    fn from(fehler: ProtocolError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, fehler)
    }
}

/// Result-Typ fuer das Protokoll-Crate
pub type ProtocolResult<T> = Result<T, ProtocolError>;
