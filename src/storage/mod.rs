//! Row storage adapters.
//!
//! The engine addresses tables through a logical two-level namespace,
//! `dataset -> {canonical, staging[request]}` ([`TableRef`]). A
//! [`TableNaming`] maps that namespace to physical table names, so stores can
//! change their naming scheme without touching the lifecycle code.

pub mod fault;
pub mod file;
pub mod manifest;
pub mod memory;

use crate::catalog::types::Row;
use crate::change_request::ChangeRequestId;
use crate::error::{GateError, ResourceType};
use serde::{Deserialize, Serialize};

pub use fault::{FaultInjector, FaultPoint};
pub use file::FileRowStore;
pub use memory::MemoryRowStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TableKind {
    Canonical,
    Staging(ChangeRequestId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub dataset_id: String,
    pub kind: TableKind,
}

impl TableRef {
    pub fn canonical(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            kind: TableKind::Canonical,
        }
    }

    pub fn staging(dataset_id: impl Into<String>, request_id: ChangeRequestId) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            kind: TableKind::Staging(request_id),
        }
    }

    pub fn is_staging(&self) -> bool {
        matches!(self.kind, TableKind::Staging(_))
    }

    pub fn request_id(&self) -> Option<ChangeRequestId> {
        match self.kind {
            TableKind::Staging(id) => Some(id),
            TableKind::Canonical => None,
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TableKind::Canonical => write!(f, "{}/canonical", self.dataset_id),
            TableKind::Staging(id) => write!(f, "{}/staging/{id}", self.dataset_id),
        }
    }
}

/// Maps logical tables to physical names and back.
pub trait TableNaming: Send + Sync + std::fmt::Debug {
    fn physical_name(&self, table: &TableRef) -> String;
    fn parse(&self, physical: &str) -> Option<TableRef>;
}

/// `ds.<dataset>` for canonical tables, `ds.<dataset>.cr.<request>` for staging.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTableNaming;

const NAME_PREFIX: &str = "ds.";
const STAGING_INFIX: &str = ".cr.";

impl TableNaming for DefaultTableNaming {
    fn physical_name(&self, table: &TableRef) -> String {
        match table.kind {
            TableKind::Canonical => format!("{NAME_PREFIX}{}", table.dataset_id),
            TableKind::Staging(id) => {
                format!("{NAME_PREFIX}{}{STAGING_INFIX}{id}", table.dataset_id)
            }
        }
    }

    fn parse(&self, physical: &str) -> Option<TableRef> {
        let rest = physical.strip_prefix(NAME_PREFIX)?;
        match rest.split_once(STAGING_INFIX) {
            Some((dataset_id, request)) => {
                let id = ChangeRequestId::parse(request).ok()?;
                Some(TableRef::staging(dataset_id, id))
            }
            None if !rest.is_empty() && !rest.contains('.') => Some(TableRef::canonical(rest)),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub rows_appended: u64,
    pub canonical_rows: u64,
}

/// Storage primitives consumed by the engine.
///
/// Implementations must make each call atomic on its own: a failed call
/// leaves every table exactly as it was. `merge_staging` is the one
/// multi-table unit: the canonical append and the staging drop become visible
/// together or not at all.
pub trait RowStore: Send + Sync {
    fn location_tag(&self) -> String;

    /// Returns true when the table was created by this call.
    fn create_table_if_missing(&self, table: &TableRef) -> Result<bool, GateError>;

    fn table_exists(&self, table: &TableRef) -> Result<bool, GateError>;

    fn append_rows(&self, table: &TableRef, rows: &[Row]) -> Result<(), GateError>;

    fn count_rows(&self, table: &TableRef) -> Result<u64, GateError>;

    fn sample_rows(&self, table: &TableRef, limit: usize) -> Result<Vec<Row>, GateError>;

    fn read_rows(&self, table: &TableRef) -> Result<Vec<Row>, GateError>;

    fn column_names(&self, table: &TableRef) -> Result<Vec<String>, GateError>;

    /// Returns true when a table was dropped; dropping a missing table is not an error.
    fn drop_table(&self, table: &TableRef) -> Result<bool, GateError>;

    /// Creates the table if needed and replaces its contents in one step.
    fn replace_rows(&self, table: &TableRef, rows: &[Row]) -> Result<(), GateError>;

    /// Appends every staged row to the canonical table (creating it if
    /// missing) and drops the staging table, as one atomic unit.
    fn merge_staging(
        &self,
        canonical: &TableRef,
        staging: &TableRef,
    ) -> Result<MergeOutcome, GateError>;

    fn list_tables(&self, dataset_id: Option<&str>) -> Result<Vec<TableRef>, GateError>;
}

pub(crate) fn table_not_found(table: &TableRef) -> GateError {
    GateError::NotFound {
        resource_type: ResourceType::Table,
        resource_id: table.to_string(),
    }
}

/// Sorted, de-duplicated column names over a set of rows.
pub(crate) fn collect_columns<'a>(rows: impl IntoIterator<Item = &'a Row>) -> Vec<String> {
    let mut out = std::collections::BTreeSet::new();
    for row in rows {
        for column in row.columns() {
            if !out.contains(column) {
                out.insert(column.to_string());
            }
        }
    }
    out.into_iter().collect()
}
