use crate::catalog::types::{ColumnType, Value};
use crate::validation::Severity;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, col_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            col_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetSchema {
    pub columns: Vec<ColumnDef>,
    /// Columns outside the schema are reported at this severity.
    #[serde(default = "default_unknown_column_severity")]
    pub unknown_column_severity: Severity,
}

fn default_unknown_column_severity() -> Severity {
    Severity::Warning
}

impl DatasetSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            unknown_column_severity: Severity::Warning,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Business constraint evaluated per row. The severity is the grade a
/// violation is reported at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessRule {
    pub name: String,
    pub severity: Severity,
    pub check: RuleCheck,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RuleCheck {
    /// Column must be present and non-null.
    Required { column: String },
    /// Numeric column within inclusive bounds.
    Range {
        column: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// Column value must be one of the listed values.
    OneOf { column: String, values: Vec<Value> },
    /// Text column at most `max` characters long.
    MaxLength { column: String, max: usize },
    /// Column values must be distinct across the evaluated batch.
    UniqueInBatch { column: String },
}

impl RuleCheck {
    pub fn column(&self) -> &str {
        match self {
            RuleCheck::Required { column }
            | RuleCheck::Range { column, .. }
            | RuleCheck::OneOf { column, .. }
            | RuleCheck::MaxLength { column, .. }
            | RuleCheck::UniqueInBatch { column } => column,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleSet {
    pub rules: Vec<BusinessRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<BusinessRule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
