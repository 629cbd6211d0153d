use crate::catalog::Dataset;
use crate::catalog::meta::CanonicalStats;
use crate::catalog::types::Row;
use crate::change_request::ChangeRequest;
use crate::commit::locks::DatasetGuard;
use crate::error::{GateError, GateErrorCode};
use crate::storage::{RowStore, TableRef};
use crate::validation::{RuleEvaluator, ValidationLimits, ValidationReport, ValidationState, run_validation};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct MergeReceipt {
    pub rows_appended: u64,
    pub canonical_rows: u64,
    pub created_canonical: bool,
    /// Full revalidation performed at commit time.
    pub report: ValidationReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverwriteReceipt {
    pub rows_written: u64,
    pub report: ValidationReport,
}

/// Moves approved staged rows into a dataset's canonical table.
///
/// Every entry point takes a [`DatasetGuard`] for the target dataset, so a
/// merge and the metadata refresh that follows it cannot interleave with
/// another merge or overwrite of the same dataset.
pub struct MergeEngine {
    store: Arc<dyn RowStore>,
    evaluator: Arc<dyn RuleEvaluator>,
    max_rows: usize,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn RowStore>, evaluator: Arc<dyn RuleEvaluator>, max_rows: usize) -> Self {
        Self {
            store,
            evaluator,
            max_rows,
        }
    }

    fn full_limits(&self) -> ValidationLimits {
        ValidationLimits {
            sample_rows: usize::MAX,
            max_rows: self.max_rows,
        }
    }

    /// Revalidates every staged row against the dataset's current
    /// definition, then appends them and drops the staging table as one
    /// store-level unit. Nothing is written unless revalidation passes and
    /// any outstanding warnings were acknowledged.
    pub fn merge(
        &self,
        guard: &DatasetGuard,
        dataset: &Dataset,
        request: &ChangeRequest,
    ) -> Result<MergeReceipt, GateError> {
        debug_assert_eq!(guard.dataset_id(), dataset.dataset_id);
        let staging = request.staging_table();
        let canonical = TableRef::canonical(&dataset.dataset_id);

        let staged = match self.store.read_rows(staging) {
            Ok(rows) => rows,
            Err(e) if e.code() == GateErrorCode::TableNotFound => {
                return Err(GateError::MergeAborted {
                    reason: format!("staged rows for '{}' are missing", request.request_id),
                    report: None,
                });
            }
            Err(e) => return Err(e),
        };

        let report = run_validation(self.evaluator.as_ref(), dataset, &staged, self.full_limits());
        if let Some(opened) = request.open_report()
            && opened.definition_version != report.definition_version
        {
            info!(
                request_id = %request.request_id,
                dataset_id = %dataset.dataset_id,
                from = opened.definition_version,
                to = report.definition_version,
                "dataset definition changed since the request opened"
            );
        }
        match report.state {
            ValidationState::Failed => {
                return Err(GateError::MergeAborted {
                    reason: format!("commit-time validation failed: {}", report.summary()),
                    report: Some(Box::new(report)),
                });
            }
            ValidationState::PartialPass if !request.warnings_acknowledged() => {
                return Err(GateError::WarningsNotAcknowledged {
                    report: Box::new(report),
                });
            }
            _ => {}
        }

        let created_canonical = !self.store.table_exists(&canonical)?;
        let outcome = self.store.merge_staging(&canonical, staging)?;
        info!(
            request_id = %request.request_id,
            dataset_id = %dataset.dataset_id,
            rows_appended = outcome.rows_appended,
            canonical_rows = outcome.canonical_rows,
            created_canonical,
            "staged rows merged"
        );
        Ok(MergeReceipt {
            rows_appended: outcome.rows_appended,
            canonical_rows: outcome.canonical_rows,
            created_canonical,
            report,
        })
    }

    /// Replaces the canonical table wholesale after full validation.
    pub fn overwrite(
        &self,
        guard: &DatasetGuard,
        dataset: &Dataset,
        rows: &[Row],
    ) -> Result<OverwriteReceipt, GateError> {
        debug_assert_eq!(guard.dataset_id(), dataset.dataset_id);
        let report = run_validation(self.evaluator.as_ref(), dataset, rows, self.full_limits());
        if report.state.is_blocking() {
            return Err(GateError::ValidationFailed {
                report: Box::new(report),
            });
        }
        self.store
            .replace_rows(&TableRef::canonical(&dataset.dataset_id), rows)?;
        info!(
            dataset_id = %dataset.dataset_id,
            rows = rows.len(),
            state = report.state.as_str(),
            "canonical table overwritten"
        );
        Ok(OverwriteReceipt {
            rows_written: rows.len() as u64,
            report,
        })
    }

    /// Reads the canonical table's current shape. A dataset that has never
    /// been merged into has empty stats.
    pub fn canonical_stats(
        &self,
        guard: &DatasetGuard,
    ) -> Result<CanonicalStats, GateError> {
        let canonical = TableRef::canonical(guard.dataset_id());
        if !self.store.table_exists(&canonical)? {
            debug!(dataset_id = guard.dataset_id(), "no canonical table yet");
            return Ok(CanonicalStats::default());
        }
        Ok(CanonicalStats {
            row_count: self.store.count_rows(&canonical)?,
            column_names: self.store.column_names(&canonical)?,
        })
    }

    /// Drops a staging table that is no longer referenced. Failures are
    /// logged and left for `sweep_orphaned_staging`.
    pub fn discard_staging(&self, table: &TableRef) -> bool {
        match self.store.drop_table(table) {
            Ok(dropped) => dropped,
            Err(e) => {
                warn!(table = %table, error = %e, "failed to drop staging table");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MergeEngine;
    use crate::catalog::Dataset;
    use crate::catalog::schema::{ColumnDef, DatasetSchema};
    use crate::catalog::types::{ColumnType, Row};
    use crate::change_request::machine::open_request;
    use crate::change_request::{ChangeRequest, ChangeRequestId, PayloadMeta, Proposal, StagedRowSet};
    use crate::commit::DatasetLocks;
    use crate::config::GateConfig;
    use crate::error::GateErrorCode;
    use crate::permission::CallerContext;
    use crate::storage::{FaultPoint, MemoryRowStore, RowStore, TableRef};
    use crate::validation::{SchemaRuleEvaluator, ValidationReport};
    use std::sync::Arc;
    use std::time::Duration;

    fn dataset() -> Dataset {
        Dataset::new("sales", "acme", "olive").with_schema(DatasetSchema::new(vec![
            ColumnDef::new("id", ColumnType::Integer, false),
        ]))
    }

    fn staged_request(store: &MemoryRowStore, rows: &[Row]) -> ChangeRequest {
        let id = ChangeRequestId::new();
        let table = TableRef::staging("sales", id);
        store.replace_rows(&table, rows).expect("stage");
        open_request(
            id,
            &dataset(),
            &CallerContext::new("ann"),
            &Proposal::new("sales", "t", vec![]).with_reviewers(["bob"]),
            StagedRowSet {
                table,
                row_count: rows.len() as u64,
                payload: PayloadMeta::describe(rows, None).expect("meta"),
                staged_at_micros: 1,
                discarded: false,
            },
            ValidationReport::default(),
            &GateConfig::default(),
            1,
        )
        .expect("open")
    }

    fn ids(range: std::ops::Range<i64>) -> Vec<Row> {
        range.map(|i| Row::new().with("id", i)).collect()
    }

    #[tokio::test]
    async fn merge_creates_canonical_and_drops_staging() {
        let store = MemoryRowStore::new();
        let engine = MergeEngine::new(Arc::new(store.clone()), Arc::new(SchemaRuleEvaluator), 100);
        let locks = DatasetLocks::new();
        let cr = staged_request(&store, &ids(0..3));
        let guard = locks.acquire("sales", Duration::from_secs(1)).await.expect("lock");

        let receipt = engine.merge(&guard, &dataset(), &cr).expect("merge");
        assert!(receipt.created_canonical);
        assert_eq!(receipt.rows_appended, 3);
        assert!(!store.table_exists(cr.staging_table()).expect("exists"));
        let stats = engine.canonical_stats(&guard).expect("stats");
        assert_eq!(stats.row_count, 3);
        assert_eq!(stats.column_names, vec!["id"]);
    }

    #[tokio::test]
    async fn drifted_definition_aborts_without_writes() {
        let store = MemoryRowStore::new();
        let engine = MergeEngine::new(Arc::new(store.clone()), Arc::new(SchemaRuleEvaluator), 100);
        let locks = DatasetLocks::new();
        let cr = staged_request(&store, &[Row::new().with("id", "not a number")]);
        let guard = locks.acquire("sales", Duration::from_secs(1)).await.expect("lock");

        let err = engine.merge(&guard, &dataset(), &cr).expect_err("invalid");
        assert_eq!(err.code(), GateErrorCode::MergeAborted);
        assert!(err.report().is_some());
        assert!(!store.table_exists(&TableRef::canonical("sales")).expect("exists"));
        assert!(store.table_exists(cr.staging_table()).expect("exists"));
    }

    #[tokio::test]
    async fn store_fault_surfaces_as_unavailable() {
        let store = MemoryRowStore::new();
        let engine = MergeEngine::new(Arc::new(store.clone()), Arc::new(SchemaRuleEvaluator), 100);
        let locks = DatasetLocks::new();
        store
            .replace_rows(&TableRef::canonical("sales"), &ids(0..2))
            .expect("seed");
        let cr = staged_request(&store, &ids(2..6));
        let guard = locks.acquire("sales", Duration::from_secs(1)).await.expect("lock");

        store.faults().arm(FaultPoint::MergeApply);
        let err = engine.merge(&guard, &dataset(), &cr).expect_err("fault");
        assert_eq!(err.code(), GateErrorCode::StoreUnavailable);
        assert_eq!(
            store.count_rows(&TableRef::canonical("sales")).expect("count"),
            2
        );
        assert_eq!(store.count_rows(cr.staging_table()).expect("count"), 4);
    }

    #[tokio::test]
    async fn missing_staging_aborts() {
        let store = MemoryRowStore::new();
        let engine = MergeEngine::new(Arc::new(store.clone()), Arc::new(SchemaRuleEvaluator), 100);
        let locks = DatasetLocks::new();
        let cr = staged_request(&store, &ids(0..1));
        assert!(engine.discard_staging(cr.staging_table()));
        let guard = locks.acquire("sales", Duration::from_secs(1)).await.expect("lock");
        let err = engine.merge(&guard, &dataset(), &cr).expect_err("gone");
        assert_eq!(err.code(), GateErrorCode::MergeAborted);
    }

    #[tokio::test]
    async fn overwrite_refuses_invalid_rows() {
        let store = MemoryRowStore::new();
        let engine = MergeEngine::new(Arc::new(store.clone()), Arc::new(SchemaRuleEvaluator), 100);
        let locks = DatasetLocks::new();
        let guard = locks.acquire("sales", Duration::from_secs(1)).await.expect("lock");
        let err = engine
            .overwrite(&guard, &dataset(), &[Row::new().with("id", "x")])
            .expect_err("invalid");
        assert_eq!(err.code(), GateErrorCode::ValidationFailed);
        let receipt = engine.overwrite(&guard, &dataset(), &ids(0..4)).expect("ok");
        assert_eq!(receipt.rows_written, 4);
        assert_eq!(engine.canonical_stats(&guard).expect("stats").row_count, 4);
    }
}
