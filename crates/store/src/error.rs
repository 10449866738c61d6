//! Fehlertypen fuer die Persistenz-Schicht

use thiserror::Error;

/// Fehlertyp fuer Store-Operationen
#[derive(Debug, Error)]
pub enum StoreError {
    /// Datenbankfehler (sqlx)
    #[error("Datenbankfehler: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Datensatz nicht gefunden
    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    /// Gespeicherte Daten sind nicht interpretierbar
    #[error("Ungueltiger Datensatz: {0}")]
    UngueltigerDatensatz(String),
}

impl StoreError {
    /// Erstellt einen Nicht-gefunden-Fehler
    pub fn nicht_gefunden(msg: impl Into<String>) -> Self {
        Self::NichtGefunden(msg.into())
    }
}

/// Result-Typ fuer Store-Operationen
pub type StoreResult<T> = Result<T, StoreError>;
