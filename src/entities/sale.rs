// 🧾 Sale Entity - A line sale registered by a salesperson
//
// Identity: internal numeric id (owned by storage)
// Business key: sale code ("SDS") assigned by the carrier's sales system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::EntityRef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    /// Internal id assigned by storage
    pub id: i64,

    /// Sale code (business key). Missing until the sale is loaded upstream.
    pub sale_code: Option<String>,

    pub customer_name: Option<String>,

    /// Phone line sold
    pub line_number: Option<String>,

    pub salesperson: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Sale {
    /// Trimmed sale code, `None` when missing or blank
    pub fn business_key(&self) -> Option<&str> {
        self.sale_code
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::sale(self.id)
    }
}

/// Fields for a sale that is not in storage yet.
///
/// Built from a line-tracking row whose sale code matched nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaleDraft {
    pub sale_code: String,
    pub customer_name: Option<String>,
    pub line_number: Option<String>,
    pub salesperson: Option<String>,
}

impl SaleDraft {
    pub fn new(sale_code: impl Into<String>) -> Self {
        SaleDraft {
            sale_code: sale_code.into(),
            ..Default::default()
        }
    }

    pub fn with_customer(mut self, customer_name: Option<String>) -> Self {
        self.customer_name = customer_name;
        self
    }

    pub fn with_line_number(mut self, line_number: Option<String>) -> Self {
        self.line_number = line_number;
        self
    }

    pub fn with_salesperson(mut self, salesperson: Option<String>) -> Self {
        self.salesperson = salesperson;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sale_without_code_has_no_key() {
        let sale = Sale {
            id: 1,
            sale_code: Some("".to_string()),
            customer_name: None,
            line_number: None,
            salesperson: None,
            created_at: Utc::now(),
        };

        assert_eq!(sale.business_key(), None);
        assert_eq!(sale.entity_ref(), EntityRef::sale(1));
    }

    #[test]
    fn test_draft_builder() {
        let draft = SaleDraft::new("SDS-9")
            .with_customer(Some("Ana Pérez".to_string()))
            .with_line_number(Some("1144556677".to_string()))
            .with_salesperson(None);

        assert_eq!(draft.sale_code, "SDS-9");
        assert_eq!(draft.customer_name.as_deref(), Some("Ana Pérez"));
        assert_eq!(draft.line_number.as_deref(), Some("1144556677"));
        assert!(draft.salesperson.is_none());
    }
}
