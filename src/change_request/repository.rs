use crate::change_request::{ChangeRequest, ChangeRequestId, ChangeRequestStatus};
use crate::error::{GateError, ResourceType};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A record together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub record: T,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeRequestFilter {
    pub dataset_id: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<ChangeRequestStatus>,
    pub requester_id: Option<String>,
    pub reviewer_id: Option<String>,
}

impl ChangeRequestFilter {
    pub fn for_dataset(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: Some(dataset_id.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: ChangeRequestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_reviewer(mut self, reviewer_id: impl Into<String>) -> Self {
        self.reviewer_id = Some(reviewer_id.into());
        self
    }

    pub fn with_requester(mut self, requester_id: impl Into<String>) -> Self {
        self.requester_id = Some(requester_id.into());
        self
    }

    pub fn matches(&self, cr: &ChangeRequest) -> bool {
        self.dataset_id.as_deref().is_none_or(|d| cr.dataset_id == d)
            && self.project_id.as_deref().is_none_or(|p| cr.project_id == p)
            && self.status.is_none_or(|s| cr.status == s)
            && self
                .requester_id
                .as_deref()
                .is_none_or(|r| cr.requester_id == r)
            && self
                .reviewer_id
                .as_deref()
                .is_none_or(|r| cr.quorum.is_assigned(r))
    }
}

/// Durable home of change-request records.
///
/// All writes after `insert` go through `compare_and_set`: the caller names
/// the version it read, and the write succeeds only if nobody else wrote in
/// between. Losing that race yields `Conflict`; the caller reloads and
/// re-applies its transition.
pub trait ChangeRequestRepository: Send + Sync {
    fn insert(&self, record: ChangeRequest) -> Result<u64, GateError>;

    fn load(&self, request_id: ChangeRequestId) -> Result<Versioned<ChangeRequest>, GateError>;

    /// Returns the new version.
    fn compare_and_set(
        &self,
        request_id: ChangeRequestId,
        expected_version: u64,
        record: ChangeRequest,
    ) -> Result<u64, GateError>;

    /// Matching records ordered by creation time.
    fn list(&self, filter: &ChangeRequestFilter) -> Result<Vec<ChangeRequest>, GateError>;

    fn count_pending(&self, dataset_id: &str) -> Result<usize, GateError> {
        Ok(self
            .list(
                &ChangeRequestFilter::for_dataset(dataset_id)
                    .with_status(ChangeRequestStatus::Pending),
            )?
            .len())
    }
}

/// In-process repository. `set_available(false)` makes every call fail with
/// `StoreUnavailable`, for exercising outage paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryChangeRequestRepository {
    records: Arc<RwLock<HashMap<ChangeRequestId, Versioned<ChangeRequest>>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryChangeRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), GateError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GateError::unavailable("change request repository offline"));
        }
        Ok(())
    }
}

impl ChangeRequestRepository for MemoryChangeRequestRepository {
    fn insert(&self, record: ChangeRequest) -> Result<u64, GateError> {
        self.check_available()?;
        let mut records = self.records.write();
        if records.contains_key(&record.request_id) {
            return Err(GateError::AlreadyExists {
                resource_type: ResourceType::ChangeRequest,
                resource_id: record.request_id.to_string(),
            });
        }
        records.insert(record.request_id, Versioned { version: 1, record });
        Ok(1)
    }

    fn load(&self, request_id: ChangeRequestId) -> Result<Versioned<ChangeRequest>, GateError> {
        self.check_available()?;
        self.records
            .read()
            .get(&request_id)
            .cloned()
            .ok_or_else(|| GateError::request_not_found(request_id))
    }

    fn compare_and_set(
        &self,
        request_id: ChangeRequestId,
        expected_version: u64,
        record: ChangeRequest,
    ) -> Result<u64, GateError> {
        self.check_available()?;
        let mut records = self.records.write();
        let slot = records
            .get_mut(&request_id)
            .ok_or_else(|| GateError::request_not_found(request_id))?;
        if slot.version != expected_version {
            return Err(GateError::Conflict(format!(
                "change request '{request_id}' is at version {}, expected {expected_version}",
                slot.version
            )));
        }
        slot.version += 1;
        slot.record = record;
        Ok(slot.version)
    }

    fn list(&self, filter: &ChangeRequestFilter) -> Result<Vec<ChangeRequest>, GateError> {
        self.check_available()?;
        let mut out: Vec<ChangeRequest> = self
            .records
            .read()
            .values()
            .filter(|v| filter.matches(&v.record))
            .map(|v| v.record.clone())
            .collect();
        out.sort_by(|a, b| {
            a.created_at_micros
                .cmp(&b.created_at_micros)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeRequestFilter, ChangeRequestRepository, MemoryChangeRequestRepository};
    use crate::catalog::Dataset;
    use crate::change_request::machine::open_request;
    use crate::change_request::{
        ChangeRequest, ChangeRequestId, ChangeRequestStatus, PayloadMeta, Proposal, StagedRowSet,
    };
    use crate::config::GateConfig;
    use crate::error::GateErrorCode;
    use crate::permission::CallerContext;
    use crate::storage::TableRef;
    use crate::validation::ValidationReport;

    fn record(dataset: &str, created: u64) -> ChangeRequest {
        let id = ChangeRequestId::new();
        open_request(
            id,
            &Dataset::new(dataset, "acme", "olive"),
            &CallerContext::new("ann"),
            &Proposal::new(dataset, "t", vec![]).with_reviewers(["bob"]),
            StagedRowSet {
                table: TableRef::staging(dataset, id),
                row_count: 0,
                payload: PayloadMeta::describe(&[], None).expect("meta"),
                staged_at_micros: created,
                discarded: false,
            },
            ValidationReport::default(),
            &GateConfig::default(),
            created,
        )
        .expect("record")
    }

    #[test]
    fn compare_and_set_rejects_stale_versions() {
        let repo = MemoryChangeRequestRepository::new();
        let cr = record("sales", 1);
        let id = cr.request_id;
        assert_eq!(repo.insert(cr.clone()).expect("insert"), 1);
        assert_eq!(
            repo.insert(cr.clone()).expect_err("dup").code(),
            GateErrorCode::ChangeRequestAlreadyExists
        );

        let mut next = cr.clone();
        next.title = "renamed".into();
        assert_eq!(repo.compare_and_set(id, 1, next.clone()).expect("cas"), 2);
        let err = repo.compare_and_set(id, 1, cr).expect_err("stale");
        assert_eq!(err.code(), GateErrorCode::Conflict);
        assert_eq!(repo.load(id).expect("load").record.title, "renamed");
    }

    #[test]
    fn list_filters_and_orders_by_creation() {
        let repo = MemoryChangeRequestRepository::new();
        let late = record("sales", 20);
        let early = record("sales", 10);
        let other = record("returns", 5);
        for cr in [late.clone(), early.clone(), other] {
            repo.insert(cr).expect("insert");
        }
        let sales = repo
            .list(&ChangeRequestFilter::for_dataset("sales"))
            .expect("list");
        assert_eq!(
            sales.iter().map(|c| c.request_id).collect::<Vec<_>>(),
            vec![early.request_id, late.request_id]
        );
        assert_eq!(repo.count_pending("sales").expect("count"), 2);
        let none = repo
            .list(&ChangeRequestFilter::default().with_status(ChangeRequestStatus::Approved))
            .expect("list");
        assert!(none.is_empty());
        let bob = repo
            .list(&ChangeRequestFilter::default().with_reviewer("bob"))
            .expect("list");
        assert_eq!(bob.len(), 3);
    }

    #[test]
    fn offline_repository_reports_unavailable() {
        let repo = MemoryChangeRequestRepository::new();
        repo.set_available(false);
        let err = repo.insert(record("sales", 1)).expect_err("offline");
        assert!(err.is_retryable());
        repo.set_available(true);
        assert!(repo.is_empty());
    }
}
