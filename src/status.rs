// 📜 Status History - Append-only status events
// "Update" never means UPDATE: it means append a new event, if the policy accepts it.
//
// The current status of an entity is simply its most recent event in a stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// ACTORS
// ============================================================================

/// Reserved actor meaning "the automated reconciliation engine".
///
/// Injected into the engine through `Config::system_actor`; do not compare
/// against this constant directly outside of configuration defaults.
pub const DEFAULT_SYSTEM_ACTOR: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0001);

// ============================================================================
// ENTITY REFERENCES
// ============================================================================

/// Which entity table an event points into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    MailItem,
    Sale,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::MailItem => "mail_item",
            EntityKind::Sale => "sale",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "mail_item" => Some(EntityKind::MailItem),
            "sale" => Some(EntityKind::Sale),
            _ => None,
        }
    }
}

/// Stable pointer to an entity: kind + internal numeric id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn mail_item(id: i64) -> Self {
        EntityRef { kind: EntityKind::MailItem, id }
    }

    pub fn sale(id: i64) -> Self {
        EntityRef { kind: EntityKind::Sale, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind.as_str(), self.id)
    }
}

/// Which status history of an entity an event belongs to.
///
/// A sale has two independent histories: its commercial status and the
/// activation status of its phone line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusStream {
    Mail,
    Sale,
    Line,
}

impl StatusStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusStream::Mail => "mail",
            StatusStream::Sale => "sale",
            StatusStream::Line => "line",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "mail" => Some(StatusStream::Mail),
            "sale" => Some(StatusStream::Sale),
            "line" => Some(StatusStream::Line),
            _ => None,
        }
    }

    /// Entity table the stream hangs off
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            StatusStream::Mail => EntityKind::MailItem,
            StatusStream::Sale | StatusStream::Line => EntityKind::Sale,
        }
    }
}

// ============================================================================
// STATUS VALUES
// ============================================================================

/// Normalized status value (trimmed, upper-case).
///
/// The engine only builds candidates through a `StatusCatalog`, so every
/// status it appends belongs to its pipeline's vocabulary. Events read back
/// from storage may carry statuses entered by hand outside any catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(String);

impl Status {
    /// Normalize a raw cell: trims and upper-cases. Empty input yields `None`.
    pub fn normalize(raw: &str) -> Option<Status> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Status(trimmed.to_uppercase()))
    }

    /// Wrap a value read back from storage as-is
    pub(crate) fn from_stored(raw: String) -> Status {
        Status(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed vocabulary of statuses for one pipeline, plus its "always-open" subset.
#[derive(Debug, Clone)]
pub struct StatusCatalog {
    known: &'static [&'static str],
    always_open: &'static [&'static str],
}

impl StatusCatalog {
    pub const fn new(known: &'static [&'static str], always_open: &'static [&'static str]) -> Self {
        StatusCatalog { known, always_open }
    }

    /// Parse a raw cell into a catalog status. Empty or unknown values yield `None`.
    pub fn parse(&self, raw: &str) -> Option<Status> {
        let status = Status::normalize(raw)?;
        if self.known.contains(&status.as_str()) {
            Some(status)
        } else {
            None
        }
    }

    /// Statuses that must always be allowed to progress
    pub fn is_always_open(&self, status: &Status) -> bool {
        self.always_open.contains(&status.as_str())
    }

    pub fn known(&self) -> &'static [&'static str] {
        self.known
    }
}

// ============================================================================
// STATUS EVENTS
// ============================================================================

/// Immutable, persisted status event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub id: Uuid,
    pub entity: EntityRef,
    pub stream: StatusStream,
    pub status: Status,
    pub description: String,
    pub actor_id: Uuid,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Candidate event, not yet persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStatusEvent {
    pub entity: EntityRef,
    pub stream: StatusStream,
    pub status: Status,
    pub description: String,
    pub actor_id: Uuid,
    pub location: Option<String>,
}

impl NewStatusEvent {
    /// Seal the candidate into a persisted event (fresh id, current time)
    pub fn into_event(self) -> StatusEvent {
        StatusEvent {
            id: Uuid::new_v4(),
            entity: self.entity,
            stream: self.stream,
            status: self.status,
            description: self.description,
            actor_id: self.actor_id,
            location: self.location,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: StatusCatalog = StatusCatalog::new(&["INICIAL", "EN TRANSITO"], &["INICIAL"]);

    #[test]
    fn test_normalize_trims_and_uppercases() {
        assert_eq!(Status::normalize("  en transito ").unwrap().as_str(), "EN TRANSITO");
        assert!(Status::normalize("   ").is_none());
    }

    #[test]
    fn test_catalog_rejects_unknown_and_empty() {
        assert!(CATALOG.parse("En Transito").is_some());
        assert!(CATALOG.parse("PERDIDO").is_none());
        assert!(CATALOG.parse("").is_none());
    }

    #[test]
    fn test_always_open_membership() {
        let inicial = CATALOG.parse("inicial").unwrap();
        let transito = CATALOG.parse("EN TRANSITO").unwrap();
        assert!(CATALOG.is_always_open(&inicial));
        assert!(!CATALOG.is_always_open(&transito));
    }

    #[test]
    fn test_stream_round_trips_through_str() {
        for stream in [StatusStream::Mail, StatusStream::Sale, StatusStream::Line] {
            assert_eq!(StatusStream::parse(stream.as_str()), Some(stream));
        }
        assert_eq!(StatusStream::Line.entity_kind(), EntityKind::Sale);
    }
}
