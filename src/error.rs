// ⚠️ Error taxonomy
//
// Row-level anomalies are NOT errors: they end up as `RowOutcome`s in the report.
// Only call-level failures surface here.

use thiserror::Error;

use crate::status::EntityRef;

/// Failures of the storage collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Optimistic check on append failed: someone appended to the stream
    /// after the candidate was evaluated.
    #[error("status history of {entity} moved since it was read")]
    Conflict { entity: EntityRef },
}

/// Failures that abort a reconciliation call as a whole
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to persist status event for {entity}: {source}")]
    Append {
        entity: EntityRef,
        #[source]
        source: StoreError,
    },

    #[error("failed to register sale '{sale_code}': {source}")]
    Register {
        sale_code: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to read status history of {entity}: {source}")]
    History {
        entity: EntityRef,
        #[source]
        source: StoreError,
    },
}

/// Failures of the parsing collaborator
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Workbook(String),
}

/// Invalid configuration values
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid UUID: {value}")]
    InvalidActor { var: &'static str, value: String },

    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidPageSize { var: &'static str, value: String },

    #[error("{var} must be 'flag' or 'register', got '{value}'")]
    InvalidPolicy { var: &'static str, value: String },
}

/// Parse + reconcile, as driven by the CLI and the HTTP adapter
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}
