//! Pure lifecycle transitions.
//!
//! Every function here takes the current aggregate by reference and returns
//! the next one. Nothing touches storage, so callers can retry a transition
//! against a freshly loaded record whenever a compare-and-set loses a race.

use crate::catalog::Dataset;
use crate::change_request::{
    ChangeRequest, ChangeRequestId, ChangeRequestStatus, Comment, MergeState, Proposal,
    StagedRowSet, is_sha256_hex,
};
use crate::config::GateConfig;
use crate::error::GateError;
use crate::permission::{AccessGate, CallerContext};
use crate::quorum::{DecisionInput, ReviewerQuorum, Verdict};
use crate::validation::ValidationReport;

/// What a decision did to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionEffect {
    /// Recorded; the quorum is still open.
    Recorded,
    /// A reviewer rejected. The request is closed.
    Rejected,
    /// The quorum approved and the caller now holds the merge claim.
    MergeClaimed { attempt: u32 },
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub request: ChangeRequest,
    pub effect: DecisionEffect,
}

/// Checks performed before anything is validated or staged.
pub fn check_open(
    dataset: &Dataset,
    caller: &CallerContext,
    proposal: &Proposal,
    config: &GateConfig,
) -> Result<(), GateError> {
    if !AccessGate::can_propose(caller, &dataset.project_id) {
        return Err(GateError::Forbidden(format!(
            "actor '{}' may not propose changes in project '{}'",
            caller.actor_id, dataset.project_id
        )));
    }
    if proposal.title.trim().is_empty() {
        return Err(GateError::InvalidRequest("title must not be empty".into()));
    }
    if let Some(checksum) = &proposal.checksum_sha256_hex
        && !is_sha256_hex(checksum)
    {
        return Err(GateError::InvalidRequest(format!(
            "payload checksum '{checksum}' is not a hex sha-256 digest"
        )));
    }
    if !config.allow_self_review && proposal.reviewers.iter().any(|r| r == &caller.actor_id) {
        return Err(GateError::InvalidRequest(format!(
            "requester '{}' cannot review their own change",
            caller.actor_id
        )));
    }
    ReviewerQuorum::new(proposal.reviewers.clone(), config.max_reviewers)
        .map(|_| ())
        .map_err(|e| e.into_gate_error(&proposal.dataset_id))
}

/// Builds a new pending request around an already staged row set.
#[allow(clippy::too_many_arguments)]
pub fn open_request(
    request_id: ChangeRequestId,
    dataset: &Dataset,
    caller: &CallerContext,
    proposal: &Proposal,
    staged: StagedRowSet,
    report: ValidationReport,
    config: &GateConfig,
    now_micros: u64,
) -> Result<ChangeRequest, GateError> {
    let quorum = ReviewerQuorum::new(proposal.reviewers.clone(), config.max_reviewers)
        .map_err(|e| e.into_gate_error(&request_id.to_string()))?;
    Ok(ChangeRequest {
        request_id,
        dataset_id: dataset.dataset_id.clone(),
        project_id: dataset.project_id.clone(),
        requester_id: caller.actor_id.clone(),
        title: proposal.title.trim().to_string(),
        description: proposal.description.clone(),
        status: ChangeRequestStatus::Pending,
        quorum,
        staged,
        comments: Vec::new(),
        validations: vec![report],
        merge: MergeState::Idle,
        created_at_micros: now_micros,
        updated_at_micros: now_micros,
        closed_at_micros: None,
    })
}

fn ensure_open(current: &ChangeRequest) -> Result<(), GateError> {
    if current.is_terminal() {
        return Err(GateError::NotPending {
            request_id: current.request_id.to_string(),
        });
    }
    Ok(())
}

fn ensure_unclaimed(
    current: &ChangeRequest,
    now_micros: u64,
    claim_timeout_micros: u64,
) -> Result<(), GateError> {
    if current.merge.is_claimed(now_micros, claim_timeout_micros) {
        return Err(GateError::MergeInProgress {
            request_id: current.request_id.to_string(),
        });
    }
    Ok(())
}

fn claim(next: &mut ChangeRequest, actor_id: &str, now_micros: u64) -> u32 {
    let attempt = next.merge.attempts() + 1;
    next.merge = MergeState::InProgress {
        claimed_by: actor_id.to_string(),
        claimed_at_micros: now_micros,
        attempt,
    };
    attempt
}

fn close(next: &mut ChangeRequest, status: ChangeRequestStatus, now_micros: u64) {
    next.status = status;
    next.closed_at_micros = Some(now_micros);
    next.staged.discarded = true;
}

pub fn decide(
    current: &ChangeRequest,
    caller: &CallerContext,
    input: &DecisionInput,
    now_micros: u64,
    claim_timeout_micros: u64,
) -> Result<Transition, GateError> {
    if !AccessGate::can_decide(caller, &current.project_id, current.reviewers()) {
        return Err(GateError::Forbidden(format!(
            "actor '{}' may not decide change requests in project '{}'",
            caller.actor_id, current.project_id
        )));
    }
    ensure_open(current)?;
    ensure_unclaimed(current, now_micros, claim_timeout_micros)?;

    let mut next = current.clone();
    let verdict = next
        .quorum
        .record_decision(next.status, &caller.actor_id, input, now_micros)
        .map_err(|e| e.into_gate_error(&current.request_id.to_string()))?;
    next.updated_at_micros = now_micros;

    let effect = match verdict {
        Verdict::Pending => DecisionEffect::Recorded,
        Verdict::Rejected => {
            close(&mut next, ChangeRequestStatus::Rejected, now_micros);
            next.merge = MergeState::Idle;
            DecisionEffect::Rejected
        }
        Verdict::Approved => DecisionEffect::MergeClaimed {
            attempt: claim(&mut next, &caller.actor_id, now_micros),
        },
    };
    Ok(Transition {
        request: next,
        effect,
    })
}

pub fn withdraw(
    current: &ChangeRequest,
    caller: &CallerContext,
    now_micros: u64,
    claim_timeout_micros: u64,
) -> Result<ChangeRequest, GateError> {
    if !AccessGate::can_withdraw(caller, &current.requester_id) {
        return Err(GateError::Forbidden(format!(
            "only the requester may withdraw change request '{}'",
            current.request_id
        )));
    }
    ensure_open(current)?;
    ensure_unclaimed(current, now_micros, claim_timeout_micros)?;
    let mut next = current.clone();
    close(&mut next, ChangeRequestStatus::Withdrawn, now_micros);
    next.merge = MergeState::Idle;
    next.updated_at_micros = now_micros;
    Ok(next)
}

/// Re-takes the merge claim for a request whose quorum already approved.
pub fn claim_merge(
    current: &ChangeRequest,
    caller: &CallerContext,
    now_micros: u64,
    claim_timeout_micros: u64,
) -> Result<(ChangeRequest, u32), GateError> {
    if caller.actor_id != current.requester_id
        && !AccessGate::can_decide(caller, &current.project_id, current.reviewers())
    {
        return Err(GateError::Forbidden(format!(
            "actor '{}' may not merge change request '{}'",
            caller.actor_id, current.request_id
        )));
    }
    ensure_open(current)?;
    if current.verdict() != Verdict::Approved {
        return Err(GateError::InvalidRequest(format!(
            "change request '{}' has not been approved by every reviewer",
            current.request_id
        )));
    }
    ensure_unclaimed(current, now_micros, claim_timeout_micros)?;
    let mut next = current.clone();
    let attempt = claim(&mut next, &caller.actor_id, now_micros);
    next.updated_at_micros = now_micros;
    Ok((next, attempt))
}

fn ensure_claim_held(current: &ChangeRequest, attempt: u32) -> Result<(), GateError> {
    match &current.merge {
        MergeState::InProgress { attempt: held, .. } if *held == attempt && !current.is_terminal() => {
            Ok(())
        }
        _ => Err(GateError::Conflict(format!(
            "merge claim {attempt} on change request '{}' is no longer held",
            current.request_id
        ))),
    }
}

/// Records a durable merge. The request becomes `Approved`.
pub fn complete_merge(
    current: &ChangeRequest,
    attempt: u32,
    rows_appended: u64,
    report: ValidationReport,
    now_micros: u64,
) -> Result<ChangeRequest, GateError> {
    ensure_claim_held(current, attempt)?;
    let mut next = current.clone();
    close(&mut next, ChangeRequestStatus::Approved, now_micros);
    next.merge = MergeState::Merged {
        rows_appended,
        merged_at_micros: now_micros,
    };
    next.validations.push(report);
    next.updated_at_micros = now_micros;
    Ok(next)
}

/// Records an aborted merge. The request stays `Pending` and keeps its decisions.
pub fn fail_merge(
    current: &ChangeRequest,
    attempt: u32,
    reason: &str,
    report: Option<ValidationReport>,
    now_micros: u64,
) -> Result<ChangeRequest, GateError> {
    ensure_claim_held(current, attempt)?;
    let mut next = current.clone();
    next.merge = MergeState::Failed {
        reason: reason.to_string(),
        attempts: attempt,
        failed_at_micros: now_micros,
    };
    if let Some(report) = report {
        next.validations.push(report);
    }
    next.updated_at_micros = now_micros;
    Ok(next)
}

pub fn add_comment(
    current: &ChangeRequest,
    caller: &CallerContext,
    body: &str,
    now_micros: u64,
) -> Result<ChangeRequest, GateError> {
    if body.trim().is_empty() {
        return Err(GateError::InvalidRequest("comment must not be empty".into()));
    }
    let mut next = current.clone();
    next.comments.push(Comment {
        author_id: caller.actor_id.clone(),
        body: body.to_string(),
        created_at_micros: now_micros,
    });
    next.updated_at_micros = now_micros;
    Ok(next)
}
