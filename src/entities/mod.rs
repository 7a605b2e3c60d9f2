// Entity Models
// Business records whose status is tracked by the reconciliation engine.
//
// Each entity has:
// - Internal identity (numeric id) owned by storage
// - A natural business key used to match rows of external snapshots

pub mod mail_item;
pub mod sale;

pub use mail_item::MailItem;
pub use sale::{Sale, SaleDraft};

use serde::{Deserialize, Serialize};

use crate::status::{EntityKind, EntityRef};

/// Any entity the engine can reconcile against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    MailItem(MailItem),
    Sale(Sale),
}

impl Entity {
    pub fn id(&self) -> i64 {
        match self {
            Entity::MailItem(item) => item.id,
            Entity::Sale(sale) => sale.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::MailItem(_) => EntityKind::MailItem,
            Entity::Sale(_) => EntityKind::Sale,
        }
    }

    pub fn business_key(&self) -> Option<&str> {
        match self {
            Entity::MailItem(item) => item.business_key(),
            Entity::Sale(sale) => sale.business_key(),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        match self {
            Entity::MailItem(item) => item.entity_ref(),
            Entity::Sale(sale) => sale.entity_ref(),
        }
    }
}

impl From<MailItem> for Entity {
    fn from(item: MailItem) -> Self {
        Entity::MailItem(item)
    }
}

impl From<Sale> for Entity {
    fn from(sale: Sale) -> Self {
        Entity::Sale(sale)
    }
}
