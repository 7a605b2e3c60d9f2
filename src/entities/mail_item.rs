// 📦 Mail Item Entity - A shipment handed to the logistics partner
//
// Identity: internal numeric id (owned by storage)
// Business key: tracking code printed on the carrier's waybill ("guía")

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::EntityRef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailItem {
    /// Internal id assigned by storage
    pub id: i64,

    /// Carrier tracking code (business key). May be missing on legacy rows.
    pub tracking_code: Option<String>,

    /// Sale this shipment delivers, when known
    pub sale_id: Option<i64>,

    pub created_at: DateTime<Utc>,
}

impl MailItem {
    /// Trimmed tracking code, `None` when missing or blank
    pub fn business_key(&self) -> Option<&str> {
        self.tracking_code
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::mail_item(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail_item(tracking_code: Option<&str>) -> MailItem {
        MailItem {
            id: 7,
            tracking_code: tracking_code.map(str::to_string),
            sale_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_business_key_is_trimmed() {
        assert_eq!(mail_item(Some("  T-001 ")).business_key(), Some("T-001"));
    }

    #[test]
    fn test_blank_tracking_code_has_no_key() {
        assert_eq!(mail_item(Some("   ")).business_key(), None);
        assert_eq!(mail_item(None).business_key(), None);
    }

    #[test]
    fn test_entity_ref_points_at_mail_items() {
        assert_eq!(mail_item(None).entity_ref(), EntityRef::mail_item(7));
    }
}
