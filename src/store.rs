// 🗄️ Entity storage collaborator
//
// The engine only talks to storage through this trait. The SQLite
// implementation lives in `db`; tests and other backends can provide their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Entity, Sale, SaleDraft};
use crate::error::StoreError;
use crate::pipeline::Pipeline;
use crate::status::{EntityKind, EntityRef, NewStatusEvent, StatusEvent, StatusStream};

pub trait StatusStore {
    /// One page of a keyset scan: entities of `kind` with `id > after_id`,
    /// ascending by id, at most `limit` of them.
    fn scan_entities(
        &self,
        kind: EntityKind,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<Entity>, StoreError>;

    /// Most recent event of one stream of one entity
    fn last_status_for(
        &self,
        entity: EntityRef,
        stream: StatusStream,
    ) -> Result<Option<StatusEvent>, StoreError>;

    /// Append a new event.
    ///
    /// `expected_last` is the id of the last event the caller based its
    /// decision on (`None` = the stream was empty). If the stream moved since,
    /// nothing is written and `StoreError::Conflict` is returned.
    fn append_status_event(
        &self,
        candidate: NewStatusEvent,
        expected_last: Option<Uuid>,
    ) -> Result<StatusEvent, StoreError>;

    /// Insert a sale that does not exist yet
    fn register_sale(&self, draft: &SaleDraft) -> Result<Sale, StoreError>;

    /// Keep an audit record of one reconciliation call
    fn record_import_run(&self, run: &ImportRun) -> Result<(), StoreError>;
}

/// Audit record of one reconciliation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: Uuid,
    pub pipeline: Pipeline,
    /// Uploaded file name (or any caller-chosen label)
    pub source_name: String,
    /// SHA-256 of the uploaded content, hex encoded
    pub fingerprint: String,
    pub data_rows: usize,
    pub accepted: usize,
    /// Abort reason code, when the call did not process rows
    pub aborted: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
