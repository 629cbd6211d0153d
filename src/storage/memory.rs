use crate::catalog::types::Row;
use crate::error::GateError;
use crate::storage::{
    DefaultTableNaming, FaultInjector, FaultPoint, MergeOutcome, RowStore, TableNaming, TableRef,
    collect_columns, table_not_found,
};
use im::{HashMap, Vector};
use parking_lot::RwLock;
use std::sync::Arc;

type Tables = HashMap<String, Vector<Row>>;

/// In-process row store over persistent maps.
///
/// Every mutation works on a structurally shared copy of the table map and
/// publishes it with a single pointer swap under the write lock, so readers
/// see either the previous or the next version of the whole map.
#[derive(Debug, Clone)]
pub struct MemoryRowStore {
    tables: Arc<RwLock<Tables>>,
    naming: Arc<dyn TableNaming>,
    faults: FaultInjector,
}

impl Default for MemoryRowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::with_naming(Arc::new(DefaultTableNaming))
    }

    pub fn with_naming(naming: Arc<dyn TableNaming>) -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
            naming,
            faults: FaultInjector::new(),
        }
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn physical_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn read_table<T>(
        &self,
        table: &TableRef,
        f: impl FnOnce(&Vector<Row>) -> T,
    ) -> Result<T, GateError> {
        let name = self.naming.physical_name(table);
        let tables = self.tables.read();
        let rows = tables.get(&name).ok_or_else(|| table_not_found(table))?;
        Ok(f(rows))
    }

    /// Applies `f` to a copy of the map and publishes it only if `f` succeeds.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<T, GateError>,
    ) -> Result<T, GateError> {
        let mut guard = self.tables.write();
        let mut next = guard.clone();
        let out = f(&mut next)?;
        *guard = next;
        Ok(out)
    }
}

impl RowStore for MemoryRowStore {
    fn location_tag(&self) -> String {
        "memory".to_string()
    }

    fn create_table_if_missing(&self, table: &TableRef) -> Result<bool, GateError> {
        self.faults.check(FaultPoint::CreateTable)?;
        let name = self.naming.physical_name(table);
        self.mutate(|tables| {
            if tables.contains_key(&name) {
                return Ok(false);
            }
            tables.insert(name, Vector::new());
            Ok(true)
        })
    }

    fn table_exists(&self, table: &TableRef) -> Result<bool, GateError> {
        let name = self.naming.physical_name(table);
        Ok(self.tables.read().contains_key(&name))
    }

    fn append_rows(&self, table: &TableRef, rows: &[Row]) -> Result<(), GateError> {
        let name = self.naming.physical_name(table);
        self.mutate(|tables| {
            let existing = tables.get_mut(&name).ok_or_else(|| table_not_found(table))?;
            existing.extend(rows.iter().cloned());
            self.faults.check(FaultPoint::AppendRows)?;
            Ok(())
        })
    }

    fn count_rows(&self, table: &TableRef) -> Result<u64, GateError> {
        self.faults.check(FaultPoint::CountRows)?;
        self.read_table(table, |rows| rows.len() as u64)
    }

    fn sample_rows(&self, table: &TableRef, limit: usize) -> Result<Vec<Row>, GateError> {
        self.faults.check(FaultPoint::ReadRows)?;
        self.read_table(table, |rows| rows.iter().take(limit).cloned().collect())
    }

    fn read_rows(&self, table: &TableRef) -> Result<Vec<Row>, GateError> {
        self.faults.check(FaultPoint::ReadRows)?;
        self.read_table(table, |rows| rows.iter().cloned().collect())
    }

    fn column_names(&self, table: &TableRef) -> Result<Vec<String>, GateError> {
        self.read_table(table, |rows| collect_columns(rows.iter()))
    }

    fn drop_table(&self, table: &TableRef) -> Result<bool, GateError> {
        self.faults.check(FaultPoint::DropTable)?;
        let name = self.naming.physical_name(table);
        self.mutate(|tables| Ok(tables.remove(&name).is_some()))
    }

    fn replace_rows(&self, table: &TableRef, rows: &[Row]) -> Result<(), GateError> {
        let name = self.naming.physical_name(table);
        self.mutate(|tables| {
            tables.insert(name, rows.iter().cloned().collect());
            self.faults.check(FaultPoint::ReplaceRows)?;
            Ok(())
        })
    }

    fn merge_staging(
        &self,
        canonical: &TableRef,
        staging: &TableRef,
    ) -> Result<MergeOutcome, GateError> {
        let canonical_name = self.naming.physical_name(canonical);
        let staging_name = self.naming.physical_name(staging);
        self.mutate(|tables| {
            let staged = tables
                .remove(&staging_name)
                .ok_or_else(|| table_not_found(staging))?;
            let target = tables.entry(canonical_name).or_insert_with(Vector::new);
            let half = staged.len() / 2;
            target.extend(staged.iter().take(half).cloned());
            self.faults.check(FaultPoint::MergeApply)?;
            target.extend(staged.iter().skip(half).cloned());
            Ok(MergeOutcome {
                rows_appended: staged.len() as u64,
                canonical_rows: target.len() as u64,
            })
        })
    }

    fn list_tables(&self, dataset_id: Option<&str>) -> Result<Vec<TableRef>, GateError> {
        let tables = self.tables.read();
        let mut out: Vec<TableRef> = tables
            .keys()
            .filter_map(|name| self.naming.parse(name))
            .filter(|t| dataset_id.is_none_or(|d| t.dataset_id == d))
            .collect();
        out.sort();
        Ok(out)
    }
}
