//! Reviewer quorum tracking.
//!
//! The reviewer set is fixed when a request opens. Every assigned reviewer
//! counts equally: the verdict is `Rejected` as soon as any reviewer rejects,
//! `Approved` only once every reviewer approved, and `Pending` otherwise.

use crate::change_request::ChangeRequestStatus;
use crate::error::GateError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewerDecision {
    pub reviewer_id: String,
    pub decision: Decision,
    #[serde(default)]
    pub decided_at_micros: Option<u64>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Reviewer explicitly accepted outstanding validation warnings.
    #[serde(default)]
    pub acknowledged_warnings: bool,
}

impl ReviewerDecision {
    fn pending(reviewer_id: &str) -> Self {
        Self {
            reviewer_id: reviewer_id.to_string(),
            decision: Decision::Pending,
            decided_at_micros: None,
            comment: None,
            acknowledged_warnings: false,
        }
    }
}

/// What a reviewer submits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionInput {
    pub decision: Decision,
    pub comment: Option<String>,
    pub acknowledge_warnings: bool,
}

impl DecisionInput {
    pub fn approve() -> Self {
        Self {
            decision: Decision::Approved,
            comment: None,
            acknowledge_warnings: false,
        }
    }

    pub fn reject() -> Self {
        Self {
            decision: Decision::Rejected,
            comment: None,
            acknowledge_warnings: false,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn acknowledging_warnings(mut self) -> Self {
        self.acknowledge_warnings = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuorumError {
    #[error("reviewer '{reviewer_id}' is not assigned")]
    NotAssigned { reviewer_id: String },
    #[error("request is no longer pending")]
    AlreadyTerminal,
    #[error("invalid reviewer set: {0}")]
    InvalidReviewerSet(String),
}

impl QuorumError {
    pub(crate) fn into_gate_error(self, request_id: &str) -> GateError {
        match self {
            QuorumError::NotAssigned { reviewer_id } => GateError::NotAssigned {
                actor_id: reviewer_id,
            },
            QuorumError::AlreadyTerminal => GateError::NotPending {
                request_id: request_id.to_string(),
            },
            QuorumError::InvalidReviewerSet(message) => GateError::InvalidRequest(message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewerQuorum {
    /// Assigned reviewers in assignment order. No entry is distinguished.
    reviewers: Vec<String>,
    decisions: BTreeMap<String, ReviewerDecision>,
}

impl ReviewerQuorum {
    /// Builds the request-scoped reviewer set with every decision pending.
    pub fn new(reviewers: Vec<String>, max_reviewers: usize) -> Result<Self, QuorumError> {
        if reviewers.is_empty() {
            return Err(QuorumError::InvalidReviewerSet(
                "at least one reviewer is required".into(),
            ));
        }
        if reviewers.len() > max_reviewers {
            return Err(QuorumError::InvalidReviewerSet(format!(
                "{} reviewers exceeds the limit of {max_reviewers}",
                reviewers.len()
            )));
        }
        let mut seen = BTreeSet::new();
        for reviewer in &reviewers {
            if reviewer.trim().is_empty() {
                return Err(QuorumError::InvalidReviewerSet(
                    "reviewer ids must not be empty".into(),
                ));
            }
            if !seen.insert(reviewer.as_str()) {
                return Err(QuorumError::InvalidReviewerSet(format!(
                    "reviewer '{reviewer}' is assigned twice"
                )));
            }
        }
        let decisions = reviewers
            .iter()
            .map(|r| (r.clone(), ReviewerDecision::pending(r)))
            .collect();
        Ok(Self {
            reviewers,
            decisions,
        })
    }

    pub fn reviewers(&self) -> &[String] {
        &self.reviewers
    }

    pub fn decisions(&self) -> &BTreeMap<String, ReviewerDecision> {
        &self.decisions
    }

    pub fn decision_of(&self, reviewer_id: &str) -> Option<&ReviewerDecision> {
        self.decisions.get(reviewer_id)
    }

    pub fn is_assigned(&self, reviewer_id: &str) -> bool {
        self.decisions.contains_key(reviewer_id)
    }

    /// Upserts one reviewer's decision and returns the new verdict.
    pub fn record_decision(
        &mut self,
        status: ChangeRequestStatus,
        reviewer_id: &str,
        input: &DecisionInput,
        now_micros: u64,
    ) -> Result<Verdict, QuorumError> {
        if status.is_terminal() {
            return Err(QuorumError::AlreadyTerminal);
        }
        let Some(slot) = self.decisions.get_mut(reviewer_id) else {
            return Err(QuorumError::NotAssigned {
                reviewer_id: reviewer_id.to_string(),
            });
        };
        slot.decision = input.decision;
        slot.decided_at_micros = match input.decision {
            Decision::Pending => None,
            _ => Some(now_micros),
        };
        slot.comment = input.comment.clone();
        slot.acknowledged_warnings =
            input.acknowledge_warnings && input.decision == Decision::Approved;
        Ok(self.verdict())
    }

    pub fn verdict(&self) -> Verdict {
        let mut all_approved = true;
        for decision in self.decisions.values() {
            match decision.decision {
                Decision::Rejected => return Verdict::Rejected,
                Decision::Pending => all_approved = false,
                Decision::Approved => {}
            }
        }
        if all_approved {
            Verdict::Approved
        } else {
            Verdict::Pending
        }
    }

    /// True when some approving reviewer other than `requester_id` accepted
    /// outstanding validation warnings.
    pub fn warnings_acknowledged_by_other_than(&self, requester_id: &str) -> bool {
        self.decisions.values().any(|d| {
            d.decision == Decision::Approved
                && d.acknowledged_warnings
                && d.reviewer_id != requester_id
        })
    }

    pub fn count(&self, decision: Decision) -> usize {
        self.decisions
            .values()
            .filter(|d| d.decision == decision)
            .count()
    }
}
