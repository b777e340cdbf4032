use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AllocationGroupId, ApportionmentModelNode, ModelId};

/// A physical allocation table, identified by the group node that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationTable {
    pub id: AllocationGroupId,
    pub name: String,
    pub alias: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationGroupEntry {
    pub table: AllocationTable,
    pub parent_id: Option<AllocationGroupId>,
    pub depth: usize,
    pub member_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHierarchyEntry {
    pub model: ApportionmentModelNode,
    pub depth: usize,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoefficientRequest {
    pub model_id: ModelId,
    pub common_tables: Vec<AllocationGroupId>,
    pub participant_tables: Vec<AllocationGroupId>,
    pub parent_coefficient: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitShare {
    pub unit_id: String,
    pub room: String,
    pub inner_area: String,
    pub area: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoefficientOutcome {
    pub model_id: ModelId,
    pub model_name: String,
    pub common_area: f64,
    pub participant_area: f64,
    pub parent_coefficient: f64,
    pub coefficient: f64,
    pub shares: Vec<UnitShare>,
}

impl CoefficientOutcome {
    pub fn coefficient_text(&self) -> String {
        crate::numeric::format_coefficient(self.coefficient)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatedCoefficient {
    pub model_id: ModelId,
    pub model_name: String,
    pub coefficient: String,
    pub parent_coefficient: String,
    pub computed_at: DateTime<Utc>,
}

/// Wide per-unit results: base columns, three per computed model, then
/// `totalCoefficient`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoefficientTable {
    pub columns: Vec<String>,
    pub rows: Vec<CoefficientRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRow {
    pub unit_id: String,
    pub room: String,
    pub inner_area: String,
    /// One cell per model column, aligned with `columns[3..columns.len() - 1]`.
    pub model_cells: Vec<Option<String>>,
    pub total_coefficient: String,
}

impl CoefficientTable {
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Looks up a model cell by its column label.
    pub fn cell(&self, unit_id: &str, column: &str) -> Option<&str> {
        let index = self.column_index(column)?.checked_sub(3)?;
        let row = self.rows.iter().find(|r| r.unit_id == unit_id)?;
        row.model_cells.get(index)?.as_deref()
    }

    pub fn row(&self, unit_id: &str) -> Option<&CoefficientRow> {
        self.rows.iter().find(|r| r.unit_id == unit_id)
    }
}

pub fn coefficient_column(model_name: &str) -> String {
    format!("{model_name}_coefficient")
}

pub fn apportioned_area_column(model_name: &str) -> String {
    format!("{model_name}_apportionedArea")
}

pub fn apportionable_area_column(model_name: &str) -> String {
    format!("{model_name}_apportionableArea")
}

pub const BASE_COLUMNS: [&str; 3] = ["ID", "room", "innerArea"];
pub const TOTAL_COEFFICIENT_COLUMN: &str = "totalCoefficient";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}
