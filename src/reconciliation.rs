// 🔄 Reconciliation Engine - Snapshot rows in, status events out
//
// For each data row:
//   key cell -> entity (index lookup) -> catalog status -> transition policy
//   -> append with an optimistic check on the last event seen
//
// Row problems become outcomes in the report and never stop the batch.
// Call-level problems (empty snapshot, missing columns, no entities) stop the
// call before the first row is read. Storage failures while writing propagate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::columns::{ColumnMap, ColumnOverrides, Field};
use crate::config::{Config, UnmatchedLinePolicy, DEFAULT_SCAN_PAGE_SIZE};
use crate::entities::{Entity, SaleDraft};
use crate::error::{ImportError, ReconcileError, StoreError};
use crate::index::EntityIndex;
use crate::pipeline::Pipeline;
use crate::snapshot::{cell, parse_upload, Snapshot};
use crate::status::{EntityRef, NewStatusEvent, Status};
use crate::store::{ImportRun, StatusStore};
use crate::transition::{AcceptReason, Decision, RejectReason, TransitionPolicy};

// ============================================================================
// IMPORT SOURCE
// ============================================================================

/// Where a snapshot came from, for the audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSource {
    pub name: String,
    /// SHA-256 of the raw upload, hex encoded
    pub fingerprint: String,
}

impl ImportSource {
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);

        ImportSource {
            name: name.into(),
            fingerprint: format!("{:x}", hasher.finalize()),
        }
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

/// Why a whole call processed no rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum AbortReason {
    /// No header row at all
    EmptySnapshot,

    /// Mandatory columns not found in the header (and not overridden)
    MissingColumns {
        fields: Vec<Field>,
        /// Header literals that would have satisfied them
        expected_headers: Vec<String>,
    },

    EmptyEntityTable,

    /// The entity scan failed
    EntityTableUnavailable { error: String },
}

impl AbortReason {
    pub fn code(&self) -> &'static str {
        match self {
            AbortReason::EmptySnapshot => "empty_snapshot",
            AbortReason::MissingColumns { .. } => "missing_columns",
            AbortReason::EmptyEntityTable => "empty_entity_table",
            AbortReason::EntityTableUnavailable { .. } => "entity_table_unavailable",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::EmptySnapshot => write!(f, "snapshot has no header row"),
            AbortReason::MissingColumns {
                fields,
                expected_headers,
            } => {
                let names: Vec<&str> = fields.iter().map(Field::name).collect();
                write!(
                    f,
                    "missing mandatory column(s) {} (expected one of: {})",
                    names.join(", "),
                    expected_headers.join(", ")
                )
            }
            AbortReason::EmptyEntityTable => write!(f, "entity table is empty"),
            AbortReason::EntityTableUnavailable { error } => {
                write!(f, "entity table could not be read: {}", error)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Key cell empty, blank or beyond the end of the row
    EmptyKey,
    /// No entity owns the key
    UnknownEntity,
    /// Status cell empty or outside the pipeline's catalog
    InvalidStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OutcomeKind {
    Accepted {
        reason: AcceptReason,
        event_id: Uuid,
        status: Status,
    },
    Rejected {
        reason: RejectReason,
        status: Status,
    },
    Skipped {
        reason: SkipReason,
        /// Raw status cell, kept for `InvalidStatus` diagnostics
        #[serde(skip_serializing_if = "Option::is_none")]
        raw_status: Option<String>,
    },
    /// Line-tracking row whose sale code matches no sale (flag policy)
    Unregistered,
}

/// What happened to one data row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOutcome {
    /// Position in the snapshot grid (the header is row 0)
    pub row: usize,
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityRef>,
    /// Sale inserted for this row under the register policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_sale: Option<i64>,
    #[serde(flatten)]
    pub kind: OutcomeKind,
}

impl RowOutcome {
    fn new(row: usize, key: Option<&str>, entity: Option<EntityRef>, kind: OutcomeKind) -> Self {
        RowOutcome {
            row,
            key: key.map(str::to_string),
            entity,
            registered_sale: None,
            kind,
        }
    }

    fn skipped(row: usize, key: Option<&str>, reason: SkipReason) -> Self {
        let kind = OutcomeKind::Skipped {
            reason,
            raw_status: None,
        };
        RowOutcome::new(row, key, None, kind)
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.kind, OutcomeKind::Accepted { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.kind, OutcomeKind::Rejected { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.kind, OutcomeKind::Skipped { .. })
    }
}

// ============================================================================
// REPORT (Result Aggregator)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub run_id: Uuid,
    pub pipeline: Pipeline,
    pub source_name: String,
    pub data_rows: usize,
    /// Number of status events recorded by this call
    pub accepted: usize,
    pub aborted: Option<AbortReason>,
    pub rows: Vec<RowOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReconciliationReport {
    fn new(pipeline: Pipeline, source: &ImportSource, data_rows: usize) -> Self {
        let now = Utc::now();
        ReconciliationReport {
            run_id: Uuid::new_v4(),
            pipeline,
            source_name: source.name.clone(),
            data_rows,
            accepted: 0,
            aborted: None,
            rows: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    fn finish(mut self, aborted: Option<AbortReason>) -> Self {
        self.accepted = self.rows.iter().filter(|r| r.is_accepted()).count();
        self.aborted = aborted;
        self.finished_at = Utc::now();
        self
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn rejected(&self) -> usize {
        self.rows.iter().filter(|r| r.is_rejected()).count()
    }

    pub fn skipped(&self) -> usize {
        self.rows.iter().filter(|r| r.is_skipped()).count()
    }

    pub fn unregistered(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| matches!(r.kind, OutcomeKind::Unregistered))
            .count()
    }

    pub fn registered(&self) -> usize {
        self.rows.iter().filter(|r| r.registered_sale.is_some()).count()
    }

    /// User-facing message, e.g. "Se actualizaron 3 estados de correo"
    pub fn message(&self) -> String {
        format!("Se actualizaron {} {}", self.accepted, self.pipeline.label())
    }

    /// One-line summary for logs and the CLI
    pub fn summary(&self) -> String {
        match &self.aborted {
            Some(reason) => format!("{}: aborted ({})", self.pipeline, reason),
            None => format!(
                "{}: {} rows, {} accepted, {} rejected, {} skipped, {} unregistered",
                self.pipeline,
                self.data_rows,
                self.accepted,
                self.rejected(),
                self.skipped(),
                self.unregistered()
            ),
        }
    }

    pub fn to_import_run(&self, source: &ImportSource) -> ImportRun {
        ImportRun {
            id: self.run_id,
            pipeline: self.pipeline,
            source_name: source.name.clone(),
            fingerprint: source.fingerprint.clone(),
            data_rows: self.data_rows,
            accepted: self.accepted,
            aborted: self.aborted.as_ref().map(|a| a.code().to_string()),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    system_actor: Uuid,
    scan_page_size: usize,
    unmatched_line_policy: UnmatchedLinePolicy,
}

impl ReconciliationEngine {
    pub fn new(system_actor: Uuid) -> Self {
        ReconciliationEngine {
            system_actor,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
            unmatched_line_policy: UnmatchedLinePolicy::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        ReconciliationEngine {
            system_actor: config.system_actor,
            scan_page_size: config.scan_page_size,
            unmatched_line_policy: config.unmatched_line_policy,
        }
    }

    pub fn with_scan_page_size(mut self, page_size: usize) -> Self {
        self.scan_page_size = page_size;
        self
    }

    pub fn with_unmatched_line_policy(mut self, policy: UnmatchedLinePolicy) -> Self {
        self.unmatched_line_policy = policy;
        self
    }

    /// Parse an uploaded file and reconcile it
    pub fn reconcile_upload<S: StatusStore + ?Sized>(
        &self,
        store: &S,
        pipeline: Pipeline,
        file_name: &str,
        bytes: &[u8],
        overrides: &ColumnOverrides,
    ) -> Result<ReconciliationReport, ImportError> {
        let snapshot = parse_upload(file_name, bytes)?;
        let source = ImportSource::from_bytes(file_name, bytes);

        Ok(self.reconcile(store, pipeline, &snapshot, overrides, &source)?)
    }

    /// Reconcile one snapshot against the stored histories.
    ///
    /// The import run is recorded on a best-effort basis: failing to write the
    /// audit row is logged and does not fail the call.
    pub fn reconcile<S: StatusStore + ?Sized>(
        &self,
        store: &S,
        pipeline: Pipeline,
        snapshot: &Snapshot,
        overrides: &ColumnOverrides,
        source: &ImportSource,
    ) -> Result<ReconciliationReport, ReconcileError> {
        let span = info_span!("reconcile", pipeline = %pipeline, source = %source.name);
        let _guard = span.enter();

        let mut report = ReconciliationReport::new(pipeline, source, snapshot.data_row_count());
        let aborted = self.run(store, pipeline, snapshot, overrides, &mut report.rows)?;

        if let Some(reason) = &aborted {
            warn!(reason = reason.code(), "import aborted: {}", reason);
        }

        let report = report.finish(aborted);
        info!(
            rows = report.data_rows,
            accepted = report.accepted,
            rejected = report.rejected(),
            skipped = report.skipped(),
            "{}",
            report.message()
        );

        if let Err(e) = store.record_import_run(&report.to_import_run(source)) {
            warn!(error = %e, "failed to record import run");
        }

        Ok(report)
    }

    fn run<S: StatusStore + ?Sized>(
        &self,
        store: &S,
        pipeline: Pipeline,
        snapshot: &Snapshot,
        overrides: &ColumnOverrides,
        outcomes: &mut Vec<RowOutcome>,
    ) -> Result<Option<AbortReason>, ReconcileError> {
        let Some(header) = snapshot.header() else {
            return Ok(Some(AbortReason::EmptySnapshot));
        };

        let columns = ColumnMap::resolve(header, pipeline.headers(), overrides);
        let missing = columns.missing(pipeline.required_fields());
        if !missing.is_empty() {
            let expected_headers = missing
                .iter()
                .flat_map(|f| pipeline.headers().literals_for(*f))
                .map(str::to_string)
                .collect();
            return Ok(Some(AbortReason::MissingColumns {
                fields: missing,
                expected_headers,
            }));
        }

        let mut index = match EntityIndex::build(store, pipeline.entity_kind(), self.scan_page_size) {
            Ok(index) => index,
            Err(e) => {
                return Ok(Some(AbortReason::EntityTableUnavailable {
                    error: e.to_string(),
                }))
            }
        };
        if index.scanned() == 0 {
            return Ok(Some(AbortReason::EmptyEntityTable));
        }

        let policy = TransitionPolicy::new(pipeline.catalog(), self.system_actor);
        let mut rows = RowReconciler {
            store,
            pipeline,
            columns: &columns,
            index: &mut index,
            policy: &policy,
            system_actor: self.system_actor,
            unmatched_line_policy: self.unmatched_line_policy,
        };

        for (row_index, row) in snapshot.data_rows() {
            let outcome = rows.reconcile_row(row_index, row)?;
            if let OutcomeKind::Skipped { reason, .. } = &outcome.kind {
                debug!(row = row_index, key = ?outcome.key, reason = ?reason, "row skipped");
            }
            outcomes.push(outcome);
        }

        Ok(None)
    }
}

// ============================================================================
// ROW RECONCILER
// ============================================================================

/// Per-call state shared by every row
struct RowReconciler<'a, S: StatusStore + ?Sized> {
    store: &'a S,
    pipeline: Pipeline,
    columns: &'a ColumnMap,
    index: &'a mut EntityIndex,
    policy: &'a TransitionPolicy<'static>,
    system_actor: Uuid,
    unmatched_line_policy: UnmatchedLinePolicy,
}

impl<'a, S: StatusStore + ?Sized> RowReconciler<'a, S> {
    fn reconcile_row(&mut self, row_index: usize, row: &[String]) -> Result<RowOutcome, ReconcileError> {
        let Some(key) = cell(row, self.columns.get(Field::Key)) else {
            return Ok(RowOutcome::skipped(row_index, None, SkipReason::EmptyKey));
        };

        let found = self.index.get(key).map(Entity::entity_ref);
        if found.is_none() {
            if self.pipeline != Pipeline::LineTracking {
                return Ok(RowOutcome::skipped(row_index, Some(key), SkipReason::UnknownEntity));
            }
            if self.unmatched_line_policy == UnmatchedLinePolicy::Flag {
                return Ok(RowOutcome::new(row_index, Some(key), None, OutcomeKind::Unregistered));
            }
        }

        let raw_status = cell(row, self.columns.get(Field::Status));
        let Some(status) = raw_status.and_then(|raw| self.pipeline.catalog().parse(raw)) else {
            let kind = OutcomeKind::Skipped {
                reason: SkipReason::InvalidStatus,
                raw_status: raw_status.map(str::to_string),
            };
            return Ok(RowOutcome::new(row_index, Some(key), found, kind));
        };

        // Only rows that go on to produce an event may create a sale
        let (entity, registered_sale) = match found {
            Some(entity) => (entity, None),
            None => {
                let entity = self.register_sale(key, row)?;
                (entity, Some(entity.id))
            }
        };

        let candidate = NewStatusEvent {
            entity,
            stream: self.pipeline.stream(),
            status: status.clone(),
            description: cell(row, self.columns.get(Field::Description))
                .unwrap_or_default()
                .to_string(),
            actor_id: self.system_actor,
            location: cell(row, self.columns.get(Field::Location)).map(str::to_string),
        };

        let last = self
            .store
            .last_status_for(entity, candidate.stream)
            .map_err(|source| ReconcileError::History { entity, source })?;

        let kind = match self.policy.decide(last.as_ref(), &candidate) {
            Decision::Reject(reason) => OutcomeKind::Rejected { reason, status },
            Decision::Accept(reason) => {
                match self
                    .store
                    .append_status_event(candidate, last.as_ref().map(|e| e.id))
                {
                    Ok(event) => OutcomeKind::Accepted {
                        reason,
                        event_id: event.id,
                        status,
                    },
                    Err(StoreError::Conflict { .. }) => {
                        warn!(row = row_index, entity = %entity, "status history moved during import");
                        OutcomeKind::Rejected {
                            reason: RejectReason::Stale,
                            status,
                        }
                    }
                    Err(source) => return Err(ReconcileError::Append { entity, source }),
                }
            }
        };

        let mut outcome = RowOutcome::new(row_index, Some(key), Some(entity), kind);
        outcome.registered_sale = registered_sale;
        Ok(outcome)
    }

    fn register_sale(&mut self, key: &str, row: &[String]) -> Result<EntityRef, ReconcileError> {
        let owned = |field| cell(row, self.columns.get(field)).map(str::to_string);
        let draft = SaleDraft::new(key)
            .with_customer(owned(Field::Customer))
            .with_line_number(owned(Field::LineNumber))
            .with_salesperson(owned(Field::Salesperson));

        let sale = self
            .store
            .register_sale(&draft)
            .map_err(|source| ReconcileError::Register {
                sale_code: key.to_string(),
                source,
            })?;

        info!(sale_id = sale.id, sale_code = key, "registered sale from line-tracking row");

        let entity = sale.entity_ref();
        self.index.insert(Entity::Sale(sale));
        Ok(entity)
    }
}
