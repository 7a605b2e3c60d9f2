// 🗂️ Entity Index Builder - One scan instead of one query per row
//
// Builds an in-memory `business key -> entity` map for a single reconciliation
// call. Never cached, never shared: every call rebuilds it from storage.

use std::collections::HashMap;
use tracing::debug;

use crate::entities::Entity;
use crate::error::StoreError;
use crate::status::EntityKind;
use crate::store::StatusStore;

#[derive(Debug, Clone)]
pub struct EntityIndex {
    kind: EntityKind,
    by_key: HashMap<String, Entity>,

    /// Entities read from storage, keyed or not
    scanned: usize,

    /// Entities skipped because their business key was null/blank
    without_key: usize,

    /// Entities skipped because an earlier one already owned the key
    duplicates: usize,
}

impl EntityIndex {
    pub fn new(kind: EntityKind) -> Self {
        EntityIndex {
            kind,
            by_key: HashMap::new(),
            scanned: 0,
            without_key: 0,
            duplicates: 0,
        }
    }

    /// Page through every entity of `kind` with a keyset cursor.
    ///
    /// Stops at the first short page. `page_size` of 0 is treated as 1.
    pub fn build<S: StatusStore + ?Sized>(
        store: &S,
        kind: EntityKind,
        page_size: usize,
    ) -> Result<Self, StoreError> {
        let page_size = page_size.max(1);
        let mut index = EntityIndex::new(kind);
        let mut after_id = 0;

        loop {
            let page = store.scan_entities(kind, after_id, page_size)?;
            let page_len = page.len();

            for entity in page {
                after_id = after_id.max(entity.id());
                index.insert(entity);
            }

            if page_len < page_size {
                break;
            }
        }

        debug!(
            kind = kind.as_str(),
            scanned = index.scanned,
            keyed = index.by_key.len(),
            without_key = index.without_key,
            duplicates = index.duplicates,
            "entity index built"
        );

        Ok(index)
    }

    /// Add one entity. The first entity seen for a key keeps it.
    ///
    /// Entities of another kind are ignored.
    pub fn insert(&mut self, entity: Entity) {
        if entity.kind() != self.kind {
            debug!(expected = self.kind.as_str(), id = entity.id(), "entity of another kind ignored");
            return;
        }
        self.scanned += 1;

        let Some(key) = entity.business_key().map(str::to_string) else {
            self.without_key += 1;
            return;
        };

        if self.by_key.contains_key(&key) {
            self.duplicates += 1;
            debug!(key = %key, id = entity.id(), "duplicate business key ignored");
            return;
        }

        self.by_key.insert(key, entity);
    }

    pub fn get(&self, key: &str) -> Option<&Entity> {
        self.by_key.get(key.trim())
    }

    /// Number of entities reachable by key
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Number of entities the scan returned, including unkeyed ones
    pub fn scanned(&self) -> usize {
        self.scanned
    }
}
