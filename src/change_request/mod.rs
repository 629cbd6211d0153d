//! The change-request aggregate: one proposed batch of rows for one dataset,
//! its reviewer quorum, validation history and merge progress.

pub mod machine;
pub mod repository;

use crate::catalog::types::Row;
use crate::error::GateError;
use crate::quorum::{Decision, ReviewerDecision, ReviewerQuorum, Verdict};
use crate::storage::TableRef;
use crate::validation::ValidationReport;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

pub use repository::{
    ChangeRequestFilter, ChangeRequestRepository, MemoryChangeRequestRepository, Versioned,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeRequestId(Uuid);

impl ChangeRequestId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Result<Self, GateError> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|e| GateError::InvalidRequest(format!("invalid change request id '{raw}': {e}")))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for ChangeRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl std::str::FromStr for ChangeRequestId {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeRequestStatus {
    Pending,
    Approved,
    Rejected,
    Withdrawn,
}

impl ChangeRequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ChangeRequestStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeRequestStatus::Pending => "pending",
            ChangeRequestStatus::Approved => "approved",
            ChangeRequestStatus::Rejected => "rejected",
            ChangeRequestStatus::Withdrawn => "withdrawn",
        }
    }
}

/// Progress of the merge of an approved quorum into the canonical table.
///
/// Tracked separately from [`ChangeRequestStatus`]: a request whose quorum
/// approved stays `Pending` until its rows are durably merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum MergeState {
    #[default]
    Idle,
    InProgress {
        claimed_by: String,
        claimed_at_micros: u64,
        attempt: u32,
    },
    Failed {
        reason: String,
        attempts: u32,
        failed_at_micros: u64,
    },
    Merged {
        rows_appended: u64,
        merged_at_micros: u64,
    },
}

impl MergeState {
    pub fn attempts(&self) -> u32 {
        match self {
            MergeState::Idle => 0,
            MergeState::InProgress { attempt, .. } => *attempt,
            MergeState::Failed { attempts, .. } => *attempts,
            MergeState::Merged { .. } => 0,
        }
    }

    /// True while a claim younger than `timeout_micros` is held.
    pub fn is_claimed(&self, now_micros: u64, timeout_micros: u64) -> bool {
        match self {
            MergeState::InProgress {
                claimed_at_micros, ..
            } => now_micros.saturating_sub(*claimed_at_micros) < timeout_micros,
            _ => false,
        }
    }
}

/// Descriptive metadata about a submitted payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayloadMeta {
    pub filename: Option<String>,
    pub byte_len: u64,
    pub checksum_sha256_hex: String,
}

impl PayloadMeta {
    /// Derives size and checksum from the msgpack encoding of `rows`.
    pub fn describe(rows: &[Row], filename: Option<String>) -> Result<Self, GateError> {
        let encoded = rmp_serde::to_vec(rows).map_err(|e| GateError::Encode(e.to_string()))?;
        let digest = Sha256::digest(&encoded);
        Ok(Self {
            filename,
            byte_len: encoded.len() as u64,
            checksum_sha256_hex: hex::encode(digest),
        })
    }

    /// Uses the transport layer's size and checksum where the proposal
    /// carries them and computes only what is missing.
    pub fn from_proposal(proposal: &Proposal) -> Result<Self, GateError> {
        if let (Some(byte_len), Some(checksum)) =
            (proposal.byte_len, proposal.checksum_sha256_hex.as_deref())
        {
            return Ok(Self {
                filename: proposal.filename.clone(),
                byte_len,
                checksum_sha256_hex: checksum.to_ascii_lowercase(),
            });
        }
        let derived = Self::describe(&proposal.rows, proposal.filename.clone())?;
        Ok(Self {
            byte_len: proposal.byte_len.unwrap_or(derived.byte_len),
            checksum_sha256_hex: proposal
                .checksum_sha256_hex
                .as_deref()
                .map(str::to_ascii_lowercase)
                .unwrap_or(derived.checksum_sha256_hex),
            ..derived
        })
    }
}

/// True for a 64-digit hex SHA-256 digest.
pub fn is_sha256_hex(raw: &str) -> bool {
    raw.len() == 64 && raw.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Reference to the isolated staging table holding a request's rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StagedRowSet {
    pub table: TableRef,
    pub row_count: u64,
    pub payload: PayloadMeta,
    pub staged_at_micros: u64,
    /// Set once the staging table was merged or dropped.
    #[serde(default)]
    pub discarded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub author_id: String,
    pub body: String,
    pub created_at_micros: u64,
}

/// Input to `open_change_request`.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub dataset_id: String,
    pub title: String,
    pub description: String,
    pub reviewers: Vec<String>,
    pub rows: Vec<Row>,
    pub filename: Option<String>,
    /// Size of the uploaded source file, as reported by the transport layer.
    pub byte_len: Option<u64>,
    /// SHA-256 of the uploaded source file, as reported by the transport layer.
    pub checksum_sha256_hex: Option<String>,
}

impl Proposal {
    pub fn new(dataset_id: impl Into<String>, title: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            title: title.into(),
            description: String::new(),
            reviewers: Vec::new(),
            rows,
            filename: None,
            byte_len: None,
            checksum_sha256_hex: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_reviewers<I, S>(mut self, reviewers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reviewers = reviewers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_byte_len(mut self, byte_len: u64) -> Self {
        self.byte_len = Some(byte_len);
        self
    }

    pub fn with_checksum(mut self, sha256_hex: impl Into<String>) -> Self {
        self.checksum_sha256_hex = Some(sha256_hex.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeRequest {
    pub request_id: ChangeRequestId,
    pub dataset_id: String,
    pub project_id: String,
    pub requester_id: String,
    pub title: String,
    pub description: String,
    pub status: ChangeRequestStatus,
    pub quorum: ReviewerQuorum,
    pub staged: StagedRowSet,
    #[serde(default)]
    pub comments: Vec<Comment>,
    /// Every report produced for this request, oldest first.
    pub validations: Vec<ValidationReport>,
    #[serde(default)]
    pub merge: MergeState,
    pub created_at_micros: u64,
    pub updated_at_micros: u64,
    #[serde(default)]
    pub closed_at_micros: Option<u64>,
}

impl ChangeRequest {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn reviewers(&self) -> &[String] {
        self.quorum.reviewers()
    }

    pub fn decisions(&self) -> &BTreeMap<String, ReviewerDecision> {
        self.quorum.decisions()
    }

    pub fn decision_of(&self, reviewer_id: &str) -> Decision {
        self.quorum
            .decision_of(reviewer_id)
            .map(|d| d.decision)
            .unwrap_or_default()
    }

    pub fn verdict(&self) -> Verdict {
        self.quorum.verdict()
    }

    pub fn latest_report(&self) -> Option<&ValidationReport> {
        self.validations.last()
    }

    pub fn open_report(&self) -> Option<&ValidationReport> {
        self.validations.first()
    }

    pub fn staging_table(&self) -> &TableRef {
        &self.staged.table
    }

    pub fn warnings_acknowledged(&self) -> bool {
        self.quorum
            .warnings_acknowledged_by_other_than(&self.requester_id)
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeRequestId, ChangeRequestStatus, MergeState, PayloadMeta, Proposal};
    use crate::catalog::types::Row;

    #[test]
    fn request_ids_parse_their_display_form() {
        let id = ChangeRequestId::new();
        assert_eq!(ChangeRequestId::parse(&id.to_string()).expect("parse"), id);
        assert!(ChangeRequestId::parse("cr-1").is_err());
    }

    #[test]
    fn only_pending_is_open() {
        assert!(!ChangeRequestStatus::Pending.is_terminal());
        for status in [
            ChangeRequestStatus::Approved,
            ChangeRequestStatus::Rejected,
            ChangeRequestStatus::Withdrawn,
        ] {
            assert!(status.is_terminal(), "{}", status.as_str());
        }
    }

    #[test]
    fn merge_claims_expire() {
        let state = MergeState::InProgress {
            claimed_by: "alice".into(),
            claimed_at_micros: 1_000,
            attempt: 1,
        };
        assert!(state.is_claimed(1_500, 1_000));
        assert!(!state.is_claimed(2_000, 1_000));
        assert!(!MergeState::Idle.is_claimed(0, 1_000));
    }

    #[test]
    fn payload_checksum_tracks_content() {
        let a = PayloadMeta::describe(&[Row::new().with("id", 1i64)], None).expect("a");
        let b = PayloadMeta::describe(&[Row::new().with("id", 2i64)], Some("b.csv".into()))
            .expect("b");
        assert_ne!(a.checksum_sha256_hex, b.checksum_sha256_hex);
        assert_eq!(a.checksum_sha256_hex.len(), 64);
        assert_eq!(b.filename.as_deref(), Some("b.csv"));
    }

    #[test]
    fn transport_metadata_wins_over_derived() {
        let rows = vec![Row::new().with("id", 1i64)];
        let derived = PayloadMeta::describe(&rows, None).expect("derived");
        let supplied = "AB".repeat(32);

        let meta = PayloadMeta::from_proposal(
            &Proposal::new("sales", "t", rows.clone())
                .with_byte_len(4_096)
                .with_checksum(supplied.clone()),
        )
        .expect("meta");
        assert_eq!(meta.byte_len, 4_096);
        assert_eq!(meta.checksum_sha256_hex, supplied.to_ascii_lowercase());

        let size_only = PayloadMeta::from_proposal(
            &Proposal::new("sales", "t", rows.clone()).with_byte_len(4_096),
        )
        .expect("meta");
        assert_eq!(size_only.byte_len, 4_096);
        assert_eq!(size_only.checksum_sha256_hex, derived.checksum_sha256_hex);

        let neither =
            PayloadMeta::from_proposal(&Proposal::new("sales", "t", rows)).expect("meta");
        assert_eq!(neither, derived);
    }
}
