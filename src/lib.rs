pub mod catalog;
pub mod change_request;
pub mod commit;
pub mod config;
pub mod error;
mod lib_helpers;
pub mod permission;
pub mod quorum;
pub mod storage;
pub mod validation;

use crate::catalog::meta::DatasetMeta;
use crate::catalog::schema::{DatasetSchema, RuleSet};
use crate::catalog::types::Row;
use crate::catalog::{Catalog, Dataset, now_micros};
use crate::change_request::machine::{self, DecisionEffect};
use crate::change_request::{
    ChangeRequest, ChangeRequestFilter, ChangeRequestId, ChangeRequestRepository, MergeState,
    MemoryChangeRequestRepository, PayloadMeta, Proposal, StagedRowSet, Versioned,
};
use crate::commit::{DatasetGuard, DatasetLocks, MergeEngine, MergeReceipt, OverwriteReceipt};
use crate::config::{GateConfig, validate_config};
use crate::error::{GateError, GateErrorCode};
use crate::lib_helpers::*;
use crate::permission::{AccessGate, CallerContext};
use crate::quorum::{Decision, DecisionInput};
use crate::storage::{MemoryRowStore, RowStore, TableRef};
use crate::validation::{
    RuleEvaluator, SchemaRuleEvaluator, ValidationLimits, ValidationReport, ValidationState,
    run_validation,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub use crate::change_request::ChangeRequestStatus;
pub use crate::error::GateError as Error;

/// Validation-gated change control over a set of datasets.
///
/// Proposed rows are validated, staged in an isolated table per request,
/// reviewed by a fixed reviewer quorum and, once every reviewer approved,
/// revalidated and merged into the dataset's canonical table.
pub struct StageGate {
    config: GateConfig,
    store: Arc<dyn RowStore>,
    requests: Arc<dyn ChangeRequestRepository>,
    evaluator: Arc<dyn RuleEvaluator>,
    catalog: Arc<RwLock<Catalog>>,
    engine: MergeEngine,
    locks: DatasetLocks,
    /// Requests whose staging table exists but whose record is not inserted yet.
    opening: Mutex<HashSet<ChangeRequestId>>,
    lifecycle_hooks: Arc<Mutex<Vec<Arc<dyn LifecycleHook>>>>,
    location_tag: String,
}

/// Result of a mutating change-request call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRequestOutcome {
    pub request: ChangeRequest,
    /// Report produced by this call, if it ran validation.
    pub report: Option<ValidationReport>,
    pub merge: Option<MergeReceipt>,
}

impl ChangeRequestOutcome {
    fn recorded(request: ChangeRequest) -> Self {
        Self {
            request,
            report: None,
            merge: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    DatasetRegistered {
        dataset_id: String,
        project_id: String,
    },
    ChangeRequestOpened {
        request_id: ChangeRequestId,
        dataset_id: String,
        requester_id: String,
        validation: ValidationState,
    },
    DecisionRecorded {
        request_id: ChangeRequestId,
        reviewer_id: String,
        decision: Decision,
    },
    ChangeRequestApproved {
        request_id: ChangeRequestId,
        dataset_id: String,
        rows_appended: u64,
    },
    ChangeRequestRejected {
        request_id: ChangeRequestId,
        dataset_id: String,
        reviewer_id: String,
    },
    ChangeRequestWithdrawn {
        request_id: ChangeRequestId,
        dataset_id: String,
    },
    MergeFailed {
        request_id: ChangeRequestId,
        dataset_id: String,
        attempt: u32,
        code: &'static str,
    },
    DatasetOverwritten {
        dataset_id: String,
        rows: u64,
    },
}

pub trait LifecycleHook: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

impl StageGate {
    /// In-process engine over a [`MemoryRowStore`] with the built-in rule evaluator.
    pub fn in_memory(config: GateConfig) -> Result<Self, GateError> {
        Self::open(
            config,
            Arc::new(MemoryRowStore::new()),
            Arc::new(MemoryChangeRequestRepository::new()),
            Arc::new(SchemaRuleEvaluator),
        )
    }

    pub fn open(
        config: GateConfig,
        store: Arc<dyn RowStore>,
        requests: Arc<dyn ChangeRequestRepository>,
        evaluator: Arc<dyn RuleEvaluator>,
    ) -> Result<Self, GateError> {
        validate_config(&config)?;
        let location_tag = config
            .location_tag
            .clone()
            .unwrap_or_else(|| store.location_tag());
        info!(
            validation_sample_rows = config.validation_sample_rows,
            max_staged_rows = config.max_staged_rows,
            max_cas_retries = config.max_cas_retries,
            merge_claim_timeout_ms = config.merge_claim_timeout_ms,
            allow_self_review = config.allow_self_review,
            max_reviewers = config.max_reviewers,
            location_tag = %location_tag,
            manifest_hmac_enabled = config.manifest_hmac_key.is_some(),
            chunk_compression_level = config.chunk_compression_level,
            "stagegate config"
        );
        let engine = MergeEngine::new(
            Arc::clone(&store),
            Arc::clone(&evaluator),
            config.max_staged_rows,
        );
        Ok(Self {
            config,
            store,
            requests,
            evaluator,
            catalog: Arc::new(RwLock::new(Catalog::default())),
            engine,
            locks: DatasetLocks::new(),
            opening: Mutex::new(HashSet::new()),
            lifecycle_hooks: Arc::new(Mutex::new(Vec::new())),
            location_tag,
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn location_tag(&self) -> &str {
        &self.location_tag
    }

    pub fn add_lifecycle_hook(&self, hook: Arc<dyn LifecycleHook>) {
        self.lifecycle_hooks.lock().push(hook);
    }

    pub fn remove_lifecycle_hook(&self, hook: &Arc<dyn LifecycleHook>) {
        let mut hooks = self.lifecycle_hooks.lock();
        hooks.retain(|existing| !Arc::ptr_eq(existing, hook));
    }

    fn emit(&self, event: LifecycleEvent) {
        let hooks = self.lifecycle_hooks.lock().clone();
        dispatch_lifecycle_event(&hooks, &event);
    }

    // ---- datasets -------------------------------------------------------

    pub async fn register_dataset(
        &self,
        caller: &CallerContext,
        dataset: Dataset,
    ) -> Result<DatasetMeta, GateError> {
        ensure_can_manage(caller, &dataset.project_id)?;
        let meta = {
            let mut catalog = self.catalog.write();
            let mut next = catalog.clone();
            next.register_dataset(dataset.clone())?;
            let registered = next.dataset(&dataset.dataset_id)?;
            let meta = DatasetMeta::empty(registered, self.location_tag.clone(), now_micros());
            next.put_meta(meta.clone());
            *catalog = next;
            meta
        };
        info!(
            dataset_id = %dataset.dataset_id,
            project_id = %dataset.project_id,
            owner_id = %dataset.owner_id,
            "dataset registered"
        );
        self.emit(LifecycleEvent::DatasetRegistered {
            dataset_id: dataset.dataset_id,
            project_id: dataset.project_id,
        });
        Ok(meta)
    }

    /// Replaces a dataset's schema and rules. Open requests keep their
    /// open-time report and are revalidated against the new definition at commit.
    pub async fn update_dataset_rules(
        &self,
        caller: &CallerContext,
        dataset_id: &str,
        schema: Option<DatasetSchema>,
        rules: Option<RuleSet>,
    ) -> Result<u64, GateError> {
        let project_id = self.dataset_snapshot(dataset_id)?.project_id;
        ensure_can_manage(caller, &project_id)?;
        let version = {
            let mut catalog = self.catalog.write();
            let mut next = catalog.clone();
            let version = next.update_definition(dataset_id, schema, rules)?;
            *catalog = next;
            version
        };
        info!(dataset_id, definition_version = version, "dataset definition updated");
        Ok(version)
    }

    pub async fn dataset(
        &self,
        caller: &CallerContext,
        dataset_id: &str,
    ) -> Result<Dataset, GateError> {
        let dataset = self.dataset_snapshot(dataset_id)?;
        ensure_can_read(caller, &dataset.project_id)?;
        Ok(dataset)
    }

    pub async fn dataset_meta(
        &self,
        caller: &CallerContext,
        dataset_id: &str,
    ) -> Result<DatasetMeta, GateError> {
        let dataset = self.dataset_snapshot(dataset_id)?;
        ensure_can_read(caller, &dataset.project_id)?;
        let cached = self.catalog.read().meta(dataset_id).cloned();
        Ok(cached.unwrap_or_else(|| {
            DatasetMeta::empty(&dataset, self.location_tag.clone(), now_micros())
        }))
    }

    /// Datasets the caller can read, optionally scoped to one project.
    pub async fn list_datasets(
        &self,
        caller: &CallerContext,
        project_id: Option<&str>,
    ) -> Vec<Dataset> {
        self.catalog
            .read()
            .list_datasets(project_id)
            .into_iter()
            .filter(|d| AccessGate::can_read(caller, &d.project_id))
            .collect()
    }

    /// Owner-only wholesale replacement of the canonical table, outside the
    /// review flow. Rows are fully validated; a failed report refuses the write.
    pub async fn overwrite_dataset(
        &self,
        caller: &CallerContext,
        dataset_id: &str,
        rows: Vec<Row>,
    ) -> Result<OverwriteReceipt, GateError> {
        let project_id = self.dataset_snapshot(dataset_id)?.project_id;
        ensure_can_manage(caller, &project_id)?;
        let guard = self.lock_dataset(dataset_id).await?;
        let dataset = self.dataset_snapshot(dataset_id)?;
        let receipt = self.engine.overwrite(&guard, &dataset, &rows)?;
        self.refresh_meta_locked(&guard);
        drop(guard);
        self.emit(LifecycleEvent::DatasetOverwritten {
            dataset_id: dataset_id.to_string(),
            rows: receipt.rows_written,
        });
        Ok(receipt)
    }

    pub async fn preview_canonical_rows(
        &self,
        caller: &CallerContext,
        dataset_id: &str,
        limit: usize,
    ) -> Result<Vec<Row>, GateError> {
        let dataset = self.dataset_snapshot(dataset_id)?;
        ensure_can_read(caller, &dataset.project_id)?;
        let canonical = TableRef::canonical(dataset_id);
        if !self.store.table_exists(&canonical)? {
            return Ok(Vec::new());
        }
        self.store.sample_rows(&canonical, limit)
    }

    // ---- change requests ------------------------------------------------

    /// Validates the payload, stages it and records a pending request.
    ///
    /// A failed validation creates nothing: no record and no staging table.
    pub async fn open_change_request(
        &self,
        caller: &CallerContext,
        proposal: Proposal,
    ) -> Result<ChangeRequestOutcome, GateError> {
        let dataset = self.dataset_snapshot(&proposal.dataset_id)?;
        machine::check_open(&dataset, caller, &proposal, &self.config)?;

        let report = run_validation(
            self.evaluator.as_ref(),
            &dataset,
            &proposal.rows,
            ValidationLimits {
                sample_rows: self.config.validation_sample_rows,
                max_rows: self.config.max_staged_rows,
            },
        );
        if report.state.is_blocking() {
            info!(
                dataset_id = %dataset.dataset_id,
                requester_id = %caller.actor_id,
                summary = %report.summary(),
                "proposal refused by validation"
            );
            return Err(GateError::ValidationFailed {
                report: Box::new(report),
            });
        }

        let request_id = ChangeRequestId::new();
        let payload = PayloadMeta::from_proposal(&proposal)?;
        let table = TableRef::staging(&dataset.dataset_id, request_id);
        self.opening.lock().insert(request_id);
        let staged = self.stage_and_insert(
            request_id,
            &dataset,
            caller,
            &proposal,
            StagedRowSet {
                table: table.clone(),
                row_count: proposal.rows.len() as u64,
                payload,
                staged_at_micros: now_micros(),
                discarded: false,
            },
            report.clone(),
        );
        self.opening.lock().remove(&request_id);
        let request = match staged {
            Ok(request) => request,
            Err(e) => {
                self.engine.discard_staging(&table);
                return Err(e);
            }
        };

        info!(
            request_id = %request_id,
            dataset_id = %dataset.dataset_id,
            requester_id = %caller.actor_id,
            reviewers = request.reviewers().len(),
            rows = request.staged.row_count,
            validation = report.state.as_str(),
            "change request opened"
        );
        self.refresh_meta(&dataset.dataset_id).await;
        self.emit(LifecycleEvent::ChangeRequestOpened {
            request_id,
            dataset_id: dataset.dataset_id.clone(),
            requester_id: caller.actor_id.clone(),
            validation: report.state,
        });
        Ok(ChangeRequestOutcome {
            request,
            report: Some(report),
            merge: None,
        })
    }

    fn stage_and_insert(
        &self,
        request_id: ChangeRequestId,
        dataset: &Dataset,
        caller: &CallerContext,
        proposal: &Proposal,
        staged: StagedRowSet,
        report: ValidationReport,
    ) -> Result<ChangeRequest, GateError> {
        self.store.replace_rows(&staged.table, &proposal.rows)?;
        let request = machine::open_request(
            request_id,
            dataset,
            caller,
            proposal,
            staged,
            report,
            &self.config,
            now_micros(),
        )?;
        self.requests.insert(request.clone())?;
        Ok(request)
    }

    /// Records one reviewer's decision. A rejection closes the request; the
    /// approval that completes the quorum also performs the merge.
    pub async fn decide(
        &self,
        caller: &CallerContext,
        request_id: ChangeRequestId,
        input: DecisionInput,
    ) -> Result<ChangeRequestOutcome, GateError> {
        let timeout = claim_timeout_micros(&self.config);
        let (request, (effect, recovering)) = self.apply_transition(request_id, |current, now| {
            let recovering = matches!(current.merge, MergeState::InProgress { .. });
            let t = machine::decide(current, caller, &input, now, timeout)?;
            Ok((t.request, (t.effect, recovering)))
        })?;
        debug!(
            request_id = %request_id,
            reviewer_id = %caller.actor_id,
            decision = ?input.decision,
            "decision recorded"
        );
        self.emit(LifecycleEvent::DecisionRecorded {
            request_id,
            reviewer_id: caller.actor_id.clone(),
            decision: input.decision,
        });

        match effect {
            DecisionEffect::Recorded => Ok(ChangeRequestOutcome::recorded(request)),
            DecisionEffect::Rejected => {
                info!(
                    request_id = %request_id,
                    dataset_id = %request.dataset_id,
                    reviewer_id = %caller.actor_id,
                    "change request rejected"
                );
                self.engine.discard_staging(request.staging_table());
                self.refresh_meta(&request.dataset_id).await;
                self.emit(LifecycleEvent::ChangeRequestRejected {
                    request_id,
                    dataset_id: request.dataset_id.clone(),
                    reviewer_id: caller.actor_id.clone(),
                });
                Ok(ChangeRequestOutcome::recorded(request))
            }
            DecisionEffect::MergeClaimed { attempt } => {
                self.run_merge(request, attempt, recovering).await
            }
        }
    }

    pub async fn withdraw(
        &self,
        caller: &CallerContext,
        request_id: ChangeRequestId,
    ) -> Result<ChangeRequest, GateError> {
        let timeout = claim_timeout_micros(&self.config);
        let (request, ()) = self.apply_transition(request_id, |current, now| {
            Ok((machine::withdraw(current, caller, now, timeout)?, ()))
        })?;
        info!(
            request_id = %request_id,
            dataset_id = %request.dataset_id,
            "change request withdrawn"
        );
        self.engine.discard_staging(request.staging_table());
        self.refresh_meta(&request.dataset_id).await;
        self.emit(LifecycleEvent::ChangeRequestWithdrawn {
            request_id,
            dataset_id: request.dataset_id.clone(),
        });
        Ok(request)
    }

    /// Re-attempts the merge of a fully approved request whose earlier merge
    /// failed or whose claim went stale. Decisions are not collected again.
    pub async fn retry_merge(
        &self,
        caller: &CallerContext,
        request_id: ChangeRequestId,
    ) -> Result<ChangeRequestOutcome, GateError> {
        let timeout = claim_timeout_micros(&self.config);
        let (request, (attempt, recovering)) =
            self.apply_transition(request_id, |current, now| {
                let recovering = matches!(current.merge, MergeState::InProgress { .. });
                let (next, attempt) = machine::claim_merge(current, caller, now, timeout)?;
                Ok((next, (attempt, recovering)))
            })?;
        info!(request_id = %request_id, attempt, "retrying merge");
        self.run_merge(request, attempt, recovering).await
    }

    pub async fn add_comment(
        &self,
        caller: &CallerContext,
        request_id: ChangeRequestId,
        body: &str,
    ) -> Result<ChangeRequest, GateError> {
        let (request, ()) = self.apply_transition(request_id, |current, now| {
            ensure_can_read(caller, &current.project_id)?;
            Ok((machine::add_comment(current, caller, body, now)?, ()))
        })?;
        Ok(request)
    }

    pub async fn get_change_request(
        &self,
        caller: &CallerContext,
        request_id: ChangeRequestId,
    ) -> Result<ChangeRequest, GateError> {
        let Versioned { record, .. } = self.requests.load(request_id)?;
        ensure_can_read(caller, &record.project_id)?;
        Ok(record)
    }

    /// Matching requests in projects the caller can read, oldest first.
    pub async fn list_change_requests(
        &self,
        caller: &CallerContext,
        filter: &ChangeRequestFilter,
    ) -> Result<Vec<ChangeRequest>, GateError> {
        Ok(self
            .requests
            .list(filter)?
            .into_iter()
            .filter(|cr| AccessGate::can_read(caller, &cr.project_id))
            .collect())
    }

    /// Latest report attached to the request.
    pub async fn get_validation_report(
        &self,
        caller: &CallerContext,
        request_id: ChangeRequestId,
    ) -> Result<ValidationReport, GateError> {
        let request = self.get_change_request(caller, request_id).await?;
        request
            .latest_report()
            .cloned()
            .ok_or_else(|| GateError::request_not_found(request_id))
    }

    pub async fn preview_staged_rows(
        &self,
        caller: &CallerContext,
        request_id: ChangeRequestId,
        limit: usize,
    ) -> Result<Vec<Row>, GateError> {
        let request = self.get_change_request(caller, request_id).await?;
        if request.staged.discarded {
            return Ok(Vec::new());
        }
        self.store.sample_rows(request.staging_table(), limit)
    }

    /// Drops staging tables that no live request references: tables left
    /// behind when a drop failed after a request closed, and tables whose
    /// record was never inserted. Returns the number dropped.
    pub async fn sweep_orphaned_staging(&self) -> Result<usize, GateError> {
        let mut dropped = 0;
        for table in self.store.list_tables(None)? {
            let Some(request_id) = table.request_id() else {
                continue;
            };
            if self.opening.lock().contains(&request_id) {
                continue;
            }
            let orphaned = match self.requests.load(request_id) {
                Ok(Versioned { record, .. }) => record.staged.discarded || record.is_terminal(),
                Err(e) if e.code() == GateErrorCode::ChangeRequestNotFound => true,
                Err(e) => return Err(e),
            };
            if orphaned && self.store.drop_table(&table)? {
                debug!(table = %table, "dropped orphaned staging table");
                dropped += 1;
            }
        }
        if dropped > 0 {
            info!(dropped, "orphaned staging tables swept");
        }
        Ok(dropped)
    }

    // ---- internals ------------------------------------------------------

    fn dataset_snapshot(&self, dataset_id: &str) -> Result<Dataset, GateError> {
        self.catalog.read().dataset(dataset_id).cloned()
    }

    async fn lock_dataset(&self, dataset_id: &str) -> Result<DatasetGuard, GateError> {
        self.locks
            .acquire(dataset_id, claim_timeout(&self.config))
            .await
    }

    /// Load, apply a pure transition, compare-and-set; repeat on `Conflict`
    /// up to `max_cas_retries` times.
    fn apply_transition<T>(
        &self,
        request_id: ChangeRequestId,
        mut transition: impl FnMut(&ChangeRequest, u64) -> Result<(ChangeRequest, T), GateError>,
    ) -> Result<(ChangeRequest, T), GateError> {
        let mut retries = 0;
        loop {
            let Versioned { version, record } = self.requests.load(request_id)?;
            let (next, extra) = transition(&record, now_micros())?;
            match self
                .requests
                .compare_and_set(request_id, version, next.clone())
            {
                Ok(_) => return Ok((next, extra)),
                Err(GateError::Conflict(reason)) if retries < self.config.max_cas_retries => {
                    retries += 1;
                    debug!(request_id = %request_id, retries, %reason, "change request cas retry");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs the merge for a held claim and records its outcome.
    async fn run_merge(
        &self,
        request: ChangeRequest,
        attempt: u32,
        recovering: bool,
    ) -> Result<ChangeRequestOutcome, GateError> {
        let request_id = request.request_id;
        let guard = match self.lock_dataset(&request.dataset_id).await {
            Ok(guard) => guard,
            Err(e) => return Err(self.record_merge_failure(&request, attempt, e)),
        };
        let merged = self
            .dataset_snapshot(&request.dataset_id)
            .and_then(|dataset| self.engine.merge(&guard, &dataset, &request));
        let receipt = match merged {
            Ok(receipt) => receipt,
            Err(e) if recovering && self.merge_already_applied(&request, &e) => {
                warn!(
                    request_id = %request_id,
                    "staging already merged by an abandoned attempt; completing"
                );
                MergeReceipt {
                    rows_appended: request.staged.row_count,
                    canonical_rows: self.engine.canonical_stats(&guard)?.row_count,
                    created_canonical: false,
                    report: request.latest_report().cloned().unwrap_or_default(),
                }
            }
            Err(e) => return Err(self.record_merge_failure(&request, attempt, e)),
        };

        let rows_appended = receipt.rows_appended;
        let report = receipt.report.clone();
        let completed = self.apply_transition(request_id, |current, now| {
            Ok((
                machine::complete_merge(current, attempt, rows_appended, report.clone(), now)?,
                (),
            ))
        });
        let (done, ()) = match completed {
            Ok(done) => done,
            Err(e) => {
                error!(
                    request_id = %request_id,
                    error = %e,
                    "rows merged but the approval could not be recorded"
                );
                return Err(e);
            }
        };
        self.refresh_meta_locked(&guard);
        drop(guard);

        info!(
            request_id = %request_id,
            dataset_id = %done.dataset_id,
            rows_appended,
            "change request approved"
        );
        self.emit(LifecycleEvent::ChangeRequestApproved {
            request_id,
            dataset_id: done.dataset_id.clone(),
            rows_appended,
        });
        Ok(ChangeRequestOutcome {
            request: done,
            report: Some(receipt.report.clone()),
            merge: Some(receipt),
        })
    }

    /// A merge whose staging table vanished while the previous claim was
    /// held was applied; the store removes staging only as part of the merge.
    fn merge_already_applied(&self, request: &ChangeRequest, err: &GateError) -> bool {
        err.code() == GateErrorCode::MergeAborted
            && err.report().is_none()
            && matches!(self.store.table_exists(request.staging_table()), Ok(false))
    }

    fn record_merge_failure(
        &self,
        request: &ChangeRequest,
        attempt: u32,
        err: GateError,
    ) -> GateError {
        let reason = err.to_string();
        let report = err.report().cloned();
        warn!(
            request_id = %request.request_id,
            dataset_id = %request.dataset_id,
            attempt,
            code = err.code_str(),
            %reason,
            "merge failed; request stays pending"
        );
        let recorded = self.apply_transition(request.request_id, |current, now| {
            Ok((
                machine::fail_merge(current, attempt, &reason, report.clone(), now)?,
                (),
            ))
        });
        if let Err(record_err) = recorded {
            warn!(
                request_id = %request.request_id,
                error = %record_err,
                "could not record merge failure; claim expires after timeout"
            );
        }
        self.emit(LifecycleEvent::MergeFailed {
            request_id: request.request_id,
            dataset_id: request.dataset_id.clone(),
            attempt,
            code: err.code_str(),
        });
        err
    }

    async fn refresh_meta(&self, dataset_id: &str) {
        match self.lock_dataset(dataset_id).await {
            Ok(guard) => self.refresh_meta_locked(&guard),
            Err(e) => warn!(dataset_id, error = %e, "dataset meta refresh skipped"),
        }
    }

    /// Rebuilds derived metadata. Failures leave the previous meta in place.
    fn refresh_meta_locked(&self, guard: &DatasetGuard) {
        let dataset_id = guard.dataset_id();
        let rebuilt = (|| -> Result<DatasetMeta, GateError> {
            let dataset = self.dataset_snapshot(dataset_id)?;
            let stats = self.engine.canonical_stats(guard)?;
            let pending = self.requests.count_pending(dataset_id)?;
            Ok(DatasetMeta::recompute(
                &dataset,
                &stats,
                pending,
                self.location_tag.clone(),
                now_micros(),
            ))
        })();
        match rebuilt {
            Ok(meta) => {
                debug!(
                    dataset_id,
                    row_count = meta.row_count,
                    pending_approvals = meta.pending_approvals,
                    "dataset meta refreshed"
                );
                self.catalog.write().put_meta(meta);
            }
            Err(e) => warn!(dataset_id, error = %e, "dataset meta refresh failed"),
        }
    }
}
