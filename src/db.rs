use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::time::Duration;
use uuid::Uuid;

use crate::entities::{Entity, MailItem, Sale, SaleDraft};
use crate::error::StoreError;
use crate::pipeline::Pipeline;
use crate::status::{EntityKind, EntityRef, NewStatusEvent, Status, StatusEvent, StatusStream};
use crate::store::{ImportRun, StatusStore};

/// Stored text column that did not parse into its Rust type
#[derive(Debug, thiserror::Error)]
#[error("unexpected value '{0}'")]
struct UnexpectedValue(String);

fn conversion_error<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn parse_timestamp(index: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(index, e))
}

fn parse_uuid(index: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| conversion_error(index, e))
}

/// How long a connection waits for another writer's lock
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn setup_database(conn: &Connection) -> Result<(), StoreError> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // Writers queue on the lock instead of failing with SQLITE_BUSY
    conn.busy_timeout(BUSY_TIMEOUT)?;

    // ==========================================================================
    // Entities (owned by the back-office CRUD; the engine only reads them)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sales (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sale_code TEXT,
            customer_name TEXT,
            line_number TEXT,
            salesperson TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS mail_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tracking_code TEXT,
            sale_id INTEGER REFERENCES sales(id),
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Status events (append-only log, one stream per entity and history)
    // seq gives a total insertion order; created_at alone can tie.
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS status_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            entity_kind TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            stream TEXT NOT NULL,
            status TEXT NOT NULL,
            description TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            location TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS status_events_no_update
         BEFORE UPDATE ON status_events
         BEGIN
             SELECT RAISE(ABORT, 'status_events is append-only');
         END",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS status_events_no_delete
         BEFORE DELETE ON status_events
         BEGIN
             SELECT RAISE(ABORT, 'status_events is append-only');
         END",
        [],
    )?;

    // ==========================================================================
    // Import runs (audit trail of reconciliation calls)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            pipeline TEXT NOT NULL,
            source_name TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            data_rows INTEGER NOT NULL,
            accepted INTEGER NOT NULL,
            aborted TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_status_events_stream
         ON status_events(entity_kind, entity_id, stream, seq)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mail_items_tracking ON mail_items(tracking_code)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sales_code ON sales(sale_code)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ENTITIES
// ============================================================================

fn mail_item_from_row(row: &Row<'_>) -> rusqlite::Result<MailItem> {
    let created_at: String = row.get(3)?;
    Ok(MailItem {
        id: row.get(0)?,
        tracking_code: row.get(1)?,
        sale_id: row.get(2)?,
        created_at: parse_timestamp(3, &created_at)?,
    })
}

fn sale_from_row(row: &Row<'_>) -> rusqlite::Result<Sale> {
    let created_at: String = row.get(5)?;
    Ok(Sale {
        id: row.get(0)?,
        sale_code: row.get(1)?,
        customer_name: row.get(2)?,
        line_number: row.get(3)?,
        salesperson: row.get(4)?,
        created_at: parse_timestamp(5, &created_at)?,
    })
}

pub fn insert_mail_item(
    conn: &Connection,
    tracking_code: Option<&str>,
    sale_id: Option<i64>,
) -> Result<MailItem, StoreError> {
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO mail_items (tracking_code, sale_id, created_at) VALUES (?1, ?2, ?3)",
        params![tracking_code, sale_id, created_at.to_rfc3339()],
    )?;

    Ok(MailItem {
        id: conn.last_insert_rowid(),
        tracking_code: tracking_code.map(str::to_string),
        sale_id,
        created_at,
    })
}

pub fn insert_sale(conn: &Connection, draft: &SaleDraft) -> Result<Sale, StoreError> {
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO sales (sale_code, customer_name, line_number, salesperson, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            draft.sale_code,
            draft.customer_name,
            draft.line_number,
            draft.salesperson,
            created_at.to_rfc3339(),
        ],
    )?;

    Ok(Sale {
        id: conn.last_insert_rowid(),
        sale_code: Some(draft.sale_code.clone()),
        customer_name: draft.customer_name.clone(),
        line_number: draft.line_number.clone(),
        salesperson: draft.salesperson.clone(),
        created_at,
    })
}

pub fn scan_entities(
    conn: &Connection,
    kind: EntityKind,
    after_id: i64,
    limit: usize,
) -> Result<Vec<Entity>, StoreError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let entities = match kind {
        EntityKind::MailItem => {
            let mut stmt = conn.prepare(
                "SELECT id, tracking_code, sale_id, created_at
                 FROM mail_items
                 WHERE id > ?1
                 ORDER BY id
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![after_id, limit], |row| {
                    mail_item_from_row(row).map(Entity::MailItem)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        EntityKind::Sale => {
            let mut stmt = conn.prepare(
                "SELECT id, sale_code, customer_name, line_number, salesperson, created_at
                 FROM sales
                 WHERE id > ?1
                 ORDER BY id
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![after_id, limit], |row| {
                    sale_from_row(row).map(Entity::Sale)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };

    Ok(entities)
}

/// Look up one entity by business key (first by id when duplicated)
pub fn find_entity_by_key(
    conn: &Connection,
    kind: EntityKind,
    key: &str,
) -> Result<Option<Entity>, StoreError> {
    let key = key.trim();

    let entity = match kind {
        EntityKind::MailItem => conn
            .query_row(
                "SELECT id, tracking_code, sale_id, created_at
                 FROM mail_items
                 WHERE TRIM(tracking_code) = ?1
                 ORDER BY id
                 LIMIT 1",
                params![key],
                |row| mail_item_from_row(row).map(Entity::MailItem),
            )
            .optional()?,
        EntityKind::Sale => conn
            .query_row(
                "SELECT id, sale_code, customer_name, line_number, salesperson, created_at
                 FROM sales
                 WHERE TRIM(sale_code) = ?1
                 ORDER BY id
                 LIMIT 1",
                params![key],
                |row| sale_from_row(row).map(Entity::Sale),
            )
            .optional()?,
    };

    Ok(entity)
}

// ============================================================================
// STATUS EVENTS
// ============================================================================

const EVENT_COLUMNS: &str =
    "event_id, entity_kind, entity_id, stream, status, description, actor_id, location, created_at";

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<StatusEvent> {
    let event_id: String = row.get(0)?;
    let entity_kind: String = row.get(1)?;
    let stream: String = row.get(3)?;
    let actor_id: String = row.get(6)?;
    let created_at: String = row.get(8)?;

    let kind = EntityKind::parse(&entity_kind)
        .ok_or_else(|| conversion_error(1, UnexpectedValue(entity_kind.clone())))?;
    let stream = StatusStream::parse(&stream)
        .ok_or_else(|| conversion_error(3, UnexpectedValue(stream.clone())))?;

    Ok(StatusEvent {
        id: parse_uuid(0, &event_id)?,
        entity: EntityRef {
            kind,
            id: row.get(2)?,
        },
        stream,
        status: Status::from_stored(row.get(4)?),
        description: row.get(5)?,
        actor_id: parse_uuid(6, &actor_id)?,
        location: row.get(7)?,
        created_at: parse_timestamp(8, &created_at)?,
    })
}

pub fn get_last_status(
    conn: &Connection,
    entity: EntityRef,
    stream: StatusStream,
) -> Result<Option<StatusEvent>, StoreError> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS}
         FROM status_events
         WHERE entity_kind = ?1 AND entity_id = ?2 AND stream = ?3
         ORDER BY seq DESC
         LIMIT 1"
    );

    let event = conn
        .query_row(
            &sql,
            params![entity.kind.as_str(), entity.id, stream.as_str()],
            event_from_row,
        )
        .optional()?;

    Ok(event)
}

/// Full history of one stream, oldest first
pub fn get_status_history(
    conn: &Connection,
    entity: EntityRef,
    stream: StatusStream,
) -> Result<Vec<StatusEvent>, StoreError> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS}
         FROM status_events
         WHERE entity_kind = ?1 AND entity_id = ?2 AND stream = ?3
         ORDER BY seq ASC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let events = stmt
        .query_map(
            params![entity.kind.as_str(), entity.id, stream.as_str()],
            event_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

fn insert_event(conn: &Connection, event: &StatusEvent) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO status_events (
            event_id, entity_kind, entity_id, stream, status, description, actor_id, location, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.id.to_string(),
            event.entity.kind.as_str(),
            event.entity.id,
            event.stream.as_str(),
            event.status.as_str(),
            event.description,
            event.actor_id.to_string(),
            event.location,
            event.created_at.to_rfc3339(),
        ],
    )?;

    Ok(())
}

/// Append an event after checking the stream still ends at `expected_last`
///
/// The transaction is IMMEDIATE: the write lock is held before the last event
/// is re-read, so no other connection can append between check and insert.
pub fn append_status_event(
    conn: &Connection,
    candidate: NewStatusEvent,
    expected_last: Option<Uuid>,
) -> Result<StatusEvent, StoreError> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let current_last = get_last_status(&tx, candidate.entity, candidate.stream)?.map(|e| e.id);
    if current_last != expected_last {
        return Err(StoreError::Conflict {
            entity: candidate.entity,
        });
    }

    let event = candidate.into_event();
    insert_event(&tx, &event)?;
    tx.commit()?;

    Ok(event)
}

pub fn count_status_events(conn: &Connection) -> Result<i64, StoreError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM status_events", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// IMPORT RUNS
// ============================================================================

pub fn insert_import_run(conn: &Connection, run: &ImportRun) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO import_runs (
            run_id, pipeline, source_name, fingerprint, data_rows, accepted, aborted, started_at, finished_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            run.id.to_string(),
            run.pipeline.slug(),
            run.source_name,
            run.fingerprint,
            run.data_rows as i64,
            run.accepted as i64,
            run.aborted,
            run.started_at.to_rfc3339(),
            run.finished_at.to_rfc3339(),
        ],
    )?;

    Ok(())
}

/// Most recent import runs first
pub fn get_recent_import_runs(conn: &Connection, limit: usize) -> Result<Vec<ImportRun>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT run_id, pipeline, source_name, fingerprint, data_rows, accepted, aborted, started_at, finished_at
         FROM import_runs
         ORDER BY id DESC
         LIMIT ?1",
    )?;

    let runs = stmt
        .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
            let run_id: String = row.get(0)?;
            let pipeline: String = row.get(1)?;
            let data_rows: i64 = row.get(4)?;
            let accepted: i64 = row.get(5)?;
            let started_at: String = row.get(7)?;
            let finished_at: String = row.get(8)?;

            Ok(ImportRun {
                id: parse_uuid(0, &run_id)?,
                pipeline: Pipeline::parse(&pipeline)
                    .ok_or_else(|| conversion_error(1, UnexpectedValue(pipeline.clone())))?,
                source_name: row.get(2)?,
                fingerprint: row.get(3)?,
                data_rows: data_rows.max(0) as usize,
                accepted: accepted.max(0) as usize,
                aborted: row.get(6)?,
                started_at: parse_timestamp(7, &started_at)?,
                finished_at: parse_timestamp(8, &finished_at)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(runs)
}

// ============================================================================
// STORE IMPLEMENTATION
// ============================================================================

impl StatusStore for Connection {
    fn scan_entities(
        &self,
        kind: EntityKind,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<Entity>, StoreError> {
        scan_entities(self, kind, after_id, limit)
    }

    fn last_status_for(
        &self,
        entity: EntityRef,
        stream: StatusStream,
    ) -> Result<Option<StatusEvent>, StoreError> {
        get_last_status(self, entity, stream)
    }

    fn append_status_event(
        &self,
        candidate: NewStatusEvent,
        expected_last: Option<Uuid>,
    ) -> Result<StatusEvent, StoreError> {
        append_status_event(self, candidate, expected_last)
    }

    fn register_sale(&self, draft: &SaleDraft) -> Result<Sale, StoreError> {
        insert_sale(self, draft)
    }

    fn record_import_run(&self, run: &ImportRun) -> Result<(), StoreError> {
        insert_import_run(self, run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn candidate(entity: EntityRef, status: &str, actor_id: Uuid) -> NewStatusEvent {
        NewStatusEvent {
            entity,
            stream: StatusStream::Mail,
            status: Status::normalize(status).unwrap(),
            description: format!("{} desde test", status),
            actor_id,
            location: Some("CABA".to_string()),
        }
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = test_db();
        setup_database(&conn).unwrap();
        assert_eq!(count_status_events(&conn).unwrap(), 0);
    }

    #[test]
    fn test_append_and_read_back_last_status() {
        let conn = test_db();
        let item = insert_mail_item(&conn, Some("T-001"), None).unwrap();
        let actor = Uuid::new_v4();

        let first = append_status_event(&conn, candidate(item.entity_ref(), "INICIAL", actor), None).unwrap();
        let second = append_status_event(
            &conn,
            candidate(item.entity_ref(), "EN TRANSITO", actor),
            Some(first.id),
        )
        .unwrap();

        let last = get_last_status(&conn, item.entity_ref(), StatusStream::Mail)
            .unwrap()
            .unwrap();
        assert_eq!(last, second);
        assert_eq!(last.status.as_str(), "EN TRANSITO");
        assert_eq!(last.actor_id, actor);
        assert_eq!(last.location.as_deref(), Some("CABA"));

        let history = get_status_history(&conn, item.entity_ref(), StatusStream::Mail).unwrap();
        let statuses: Vec<&str> = history.iter().map(|e| e.status.as_str()).collect();
        assert_eq!(statuses, vec!["INICIAL", "EN TRANSITO"]);
    }

    #[test]
    fn test_streams_are_independent() {
        let conn = test_db();
        let sale = insert_sale(&conn, &SaleDraft::new("SDS-1")).unwrap();

        let mut sale_event = candidate(sale.entity_ref(), "CREADO", Uuid::new_v4());
        sale_event.stream = StatusStream::Sale;
        append_status_event(&conn, sale_event, None).unwrap();

        assert!(get_last_status(&conn, sale.entity_ref(), StatusStream::Line)
            .unwrap()
            .is_none());
        assert!(get_last_status(&conn, sale.entity_ref(), StatusStream::Sale)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_append_detects_moved_stream() {
        let conn = test_db();
        let item = insert_mail_item(&conn, Some("T-002"), None).unwrap();
        let actor = Uuid::new_v4();

        append_status_event(&conn, candidate(item.entity_ref(), "INICIAL", actor), None).unwrap();

        // Caller still believes the stream is empty
        let err = append_status_event(&conn, candidate(item.entity_ref(), "ENTREGADO", actor), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(count_status_events(&conn).unwrap(), 1);
    }

    #[test]
    fn test_append_waits_for_other_writer_then_reports_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.db");

        let writer = Connection::open(&path).unwrap();
        setup_database(&writer).unwrap();
        let item = insert_mail_item(&writer, Some("T-010"), None).unwrap();
        let entity = item.entity_ref();

        // Another process holds the write lock with an uncommitted event
        writer.execute_batch("BEGIN IMMEDIATE").unwrap();
        let rival = candidate(entity, "DEVUELTO", Uuid::new_v4()).into_event();
        insert_event(&writer, &rival).unwrap();

        let importer_path = path.clone();
        let importer = std::thread::spawn(move || {
            let conn = Connection::open(&importer_path).unwrap();
            conn.busy_timeout(BUSY_TIMEOUT).unwrap();
            append_status_event(&conn, candidate(entity, "ENTREGADO", Uuid::new_v4()), None)
        });

        std::thread::sleep(Duration::from_millis(200));
        writer.execute_batch("COMMIT").unwrap();

        let result = importer.join().unwrap();
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
        assert_eq!(count_status_events(&writer).unwrap(), 1);
        let last = get_last_status(&writer, entity, StatusStream::Mail).unwrap().unwrap();
        assert_eq!(last.id, rival.id);
    }

    #[test]
    fn test_append_sees_commit_from_another_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.db");

        let first = Connection::open(&path).unwrap();
        setup_database(&first).unwrap();
        let second = Connection::open(&path).unwrap();
        setup_database(&second).unwrap();

        let item = insert_mail_item(&first, Some("T-011"), None).unwrap();
        let entity = item.entity_ref();

        // Both importers read an empty stream, the second one appends first
        let seen_by_first = get_last_status(&first, entity, StatusStream::Mail).unwrap();
        assert!(seen_by_first.is_none());
        append_status_event(&second, candidate(entity, "EN TRANSITO", Uuid::new_v4()), None).unwrap();

        let err = append_status_event(&first, candidate(entity, "ENTREGADO", Uuid::new_v4()), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(count_status_events(&first).unwrap(), 1);
    }

    #[test]
    fn test_status_events_reject_update_and_delete() {
        let conn = test_db();
        let item = insert_mail_item(&conn, Some("T-003"), None).unwrap();
        append_status_event(&conn, candidate(item.entity_ref(), "INICIAL", Uuid::new_v4()), None).unwrap();

        assert!(conn
            .execute("UPDATE status_events SET status = 'ENTREGADO'", [])
            .is_err());
        assert!(conn.execute("DELETE FROM status_events", []).is_err());
        assert_eq!(count_status_events(&conn).unwrap(), 1);
    }

    #[test]
    fn test_keyset_scan_pages() {
        let conn = test_db();
        for i in 0..5 {
            insert_mail_item(&conn, Some(format!("T-{i}").as_str()), None).unwrap();
        }

        let first_page = scan_entities(&conn, EntityKind::MailItem, 0, 2).unwrap();
        assert_eq!(first_page.len(), 2);

        let after = first_page.last().unwrap().id();
        let second_page = scan_entities(&conn, EntityKind::MailItem, after, 10).unwrap();
        assert_eq!(second_page.len(), 3);
        assert!(second_page.iter().all(|e| e.id() > after));
    }

    #[test]
    fn test_find_entity_by_key() {
        let conn = test_db();
        insert_sale(&conn, &SaleDraft::new("SDS-77")).unwrap();

        let found = find_entity_by_key(&conn, EntityKind::Sale, " SDS-77 ").unwrap();
        assert!(matches!(found, Some(Entity::Sale(ref s)) if s.sale_code.as_deref() == Some("SDS-77")));

        assert!(find_entity_by_key(&conn, EntityKind::MailItem, "SDS-77")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_import_runs_round_trip() {
        let conn = test_db();
        let now = Utc::now();
        let run = ImportRun {
            id: Uuid::new_v4(),
            pipeline: Pipeline::Sale,
            source_name: "ventas.csv".to_string(),
            fingerprint: "abc123".to_string(),
            data_rows: 10,
            accepted: 4,
            aborted: None,
            started_at: now,
            finished_at: now,
        };

        insert_import_run(&conn, &run).unwrap();

        let runs = get_recent_import_runs(&conn, 5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, run.id);
        assert_eq!(runs[0].pipeline, Pipeline::Sale);
        assert_eq!(runs[0].accepted, 4);
    }
}
