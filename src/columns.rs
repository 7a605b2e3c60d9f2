// 🧭 Column Mapping Resolver - Dynamic schema discovery
//
// Exports reorder, add and drop columns between runs. Instead of fixed
// positions, every pipeline declares which literal header texts mean which
// semantic field, and the header row of each snapshot is scanned for them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// FIELDS
// ============================================================================

/// Semantic fields a row can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Business key (tracking code, sale code)
    Key,
    Status,
    Description,
    Location,
    Customer,
    LineNumber,
    Salesperson,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Key,
        Field::Status,
        Field::Description,
        Field::Location,
        Field::Customer,
        Field::LineNumber,
        Field::Salesperson,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Key => "key",
            Field::Status => "status",
            Field::Description => "description",
            Field::Location => "location",
            Field::Customer => "customer",
            Field::LineNumber => "line",
            Field::Salesperson => "salesperson",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// HEADER TABLE
// ============================================================================

/// Fixed table of `literal header text -> field`.
///
/// Several literals may point at the same field.
#[derive(Debug, Clone)]
pub struct HeaderTable {
    entries: &'static [(&'static str, Field)],
}

impl HeaderTable {
    pub const fn new(entries: &'static [(&'static str, Field)]) -> Self {
        HeaderTable { entries }
    }

    /// Field for a header cell, matched verbatim after trimming
    pub fn field_for(&self, header_cell: &str) -> Option<Field> {
        let trimmed = header_cell.trim();
        self.entries
            .iter()
            .find(|(literal, _)| *literal == trimmed)
            .map(|(_, field)| *field)
    }

    pub fn literals_for(&self, field: Field) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|(_, f)| *f == field)
            .map(|(literal, _)| *literal)
            .collect()
    }
}

// ============================================================================
// OVERRIDES
// ============================================================================

/// Caller-supplied column indices. Always win over detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnOverrides {
    indices: HashMap<Field, usize>,
}

impl ColumnOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: Field, index: usize) -> Self {
        self.indices.insert(field, index);
        self
    }

    /// Set only when `index` is present (convenient for optional CLI/query params)
    pub fn set_opt(self, field: Field, index: Option<usize>) -> Self {
        match index {
            Some(index) => self.set(field, index),
            None => self,
        }
    }

    pub fn get(&self, field: Field) -> Option<usize> {
        self.indices.get(&field).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

// ============================================================================
// COLUMN MAP
// ============================================================================

/// Resolved `field -> column index`. `None` means "not found", never index 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    indices: HashMap<Field, usize>,
}

impl ColumnMap {
    /// Scan the header row, then apply overrides.
    ///
    /// The first matching column (left to right) wins for each field.
    /// Missing headers never fail here; see `missing`.
    pub fn resolve(header: &[String], table: &HeaderTable, overrides: &ColumnOverrides) -> Self {
        let mut indices = HashMap::new();

        for (index, header_cell) in header.iter().enumerate() {
            if let Some(field) = table.field_for(header_cell) {
                indices.entry(field).or_insert(index);
            }
        }

        for field in Field::ALL {
            if let Some(index) = overrides.get(field) {
                indices.insert(field, index);
            }
        }

        ColumnMap { indices }
    }

    pub fn get(&self, field: Field) -> Option<usize> {
        self.indices.get(&field).copied()
    }

    /// Fields out of `required` that could not be resolved
    pub fn missing(&self, required: &[Field]) -> Vec<Field> {
        required
            .iter()
            .copied()
            .filter(|field| self.get(*field).is_none())
            .collect()
    }
}
