// 🚦 Transition Decision Engine - Should this candidate become a new event?
//
// Priority order, first match wins:
//   1. no previous event                         -> accept (first status ever)
//   2. previous status is "always-open"          -> accept (regardless of actor)
//   3. previous AND candidate authored by system -> accept iff the status changed
//   4. anything else (a human set the status)    -> reject
//
// Net effect: automated feeds advance open states and re-advance on real
// changes, never clobber a human decision, and never record the same status
// twice in a row (repeated imports are idempotent).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::{NewStatusEvent, StatusCatalog, StatusEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptReason {
    FirstEvent,
    AlwaysOpen,
    StatusChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Last two automated statuses would be identical
    Unchanged,
    /// Last status was set by a person (or candidate is not automated)
    HumanAuthored,
    /// Accepted here, but another writer appended to the stream before the
    /// event could be stored. Produced by the reconciler, never by `decide`.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum Decision {
    Accept(AcceptReason),
    Reject(RejectReason),
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept(_))
    }
}

/// Actor-aware transition policy for one pipeline
#[derive(Debug, Clone)]
pub struct TransitionPolicy<'a> {
    catalog: &'a StatusCatalog,
    system_actor: Uuid,
}

impl<'a> TransitionPolicy<'a> {
    pub fn new(catalog: &'a StatusCatalog, system_actor: Uuid) -> Self {
        TransitionPolicy {
            catalog,
            system_actor,
        }
    }

    pub fn decide(&self, last: Option<&StatusEvent>, candidate: &NewStatusEvent) -> Decision {
        let Some(last) = last else {
            return Decision::Accept(AcceptReason::FirstEvent);
        };

        if self.catalog.is_always_open(&last.status) {
            return Decision::Accept(AcceptReason::AlwaysOpen);
        }

        if last.actor_id == self.system_actor && candidate.actor_id == self.system_actor {
            if last.status == candidate.status {
                return Decision::Reject(RejectReason::Unchanged);
            }
            return Decision::Accept(AcceptReason::StatusChanged);
        }

        Decision::Reject(RejectReason::HumanAuthored)
    }
}
