// Statusync - Bulk Status Reconciliation Engine
// Exposes all modules for use in CLI, API server, and tests

pub mod columns;        // Column Mapping Resolver
pub mod config;
pub mod db;             // SQLite store
pub mod entities;       // Mail items + sales
pub mod error;
pub mod index;          // Entity Index Builder
pub mod pipeline;       // Header tables + status catalogs per import
pub mod reconciliation; // Row Reconciler + Result Aggregator
pub mod snapshot;       // CSV / spreadsheet parsing
pub mod status;         // Status events, actors, streams
pub mod store;          // Storage collaborator trait
pub mod transition;     // Transition Decision Engine

// Re-export commonly used types
pub use columns::{ColumnMap, ColumnOverrides, Field, HeaderTable};
pub use config::{Config, UnmatchedLinePolicy};
pub use db::{
    count_status_events, find_entity_by_key, get_recent_import_runs, get_status_history,
    insert_mail_item, insert_sale, setup_database,
};
pub use entities::{Entity, MailItem, Sale, SaleDraft};
pub use error::{ConfigError, ImportError, ReconcileError, SnapshotError, StoreError};
pub use index::EntityIndex;
pub use pipeline::Pipeline;
pub use reconciliation::{
    AbortReason, ImportSource, OutcomeKind, ReconciliationEngine, ReconciliationReport,
    RowOutcome, SkipReason,
};
pub use snapshot::{load_snapshot, parse_upload, Snapshot, SnapshotParser};
pub use status::{
    EntityKind, EntityRef, NewStatusEvent, Status, StatusCatalog, StatusEvent, StatusStream,
    DEFAULT_SYSTEM_ACTOR,
};
pub use store::{ImportRun, StatusStore};
pub use transition::{AcceptReason, Decision, RejectReason, TransitionPolicy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
