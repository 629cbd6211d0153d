use stagegate::catalog::Dataset;
use stagegate::catalog::schema::{BusinessRule, ColumnDef, DatasetSchema, RuleCheck, RuleSet};
use stagegate::catalog::types::{ColumnType, Row};
use stagegate::change_request::{ChangeRequestFilter, ChangeRequestId, Proposal};
use stagegate::config::GateConfig;
use stagegate::error::GateErrorCode;
use stagegate::permission::{CallerContext, Role};
use stagegate::quorum::{Decision, DecisionInput};
use stagegate::validation::{Severity, ValidationState};
use stagegate::{ChangeRequestStatus, StageGate};

fn owner() -> CallerContext {
    CallerContext::new("olive").with_role("acme", Role::Owner)
}

fn requester() -> CallerContext {
    CallerContext::new("ann").with_role("acme", Role::Contributor)
}

fn reviewer(id: &str) -> CallerContext {
    CallerContext::new(id).with_role("acme", Role::Approver)
}

fn viewer(id: &str) -> CallerContext {
    CallerContext::new(id).with_role("acme", Role::Viewer)
}

fn priced(range: std::ops::Range<i64>, price: f64) -> Vec<Row> {
    range
        .map(|i| Row::new().with("id", i).with("price", price))
        .collect()
}

fn governed_dataset() -> Dataset {
    Dataset::new("prices", "acme", "olive")
        .with_schema(DatasetSchema::new(vec![
            ColumnDef::new("id", ColumnType::Integer, false),
            ColumnDef::new("price", ColumnType::Float, false),
        ]))
        .with_rules(RuleSet::new(vec![BusinessRule {
            name: "price_sanity".into(),
            severity: Severity::Warning,
            check: RuleCheck::Range {
                column: "price".into(),
                min: Some(0.0),
                max: Some(1_000.0),
            },
        }]))
}

async fn gate_with(dataset: Dataset) -> StageGate {
    let gate = StageGate::in_memory(GateConfig::default()).expect("open");
    gate.register_dataset(&owner(), dataset)
        .await
        .expect("register dataset");
    gate
}

async fn canonical_rows(gate: &StageGate, dataset_id: &str) -> usize {
    gate.preview_canonical_rows(&owner(), dataset_id, usize::MAX)
        .await
        .expect("canonical rows")
        .len()
}

async fn open(gate: &StageGate, dataset_id: &str, rows: Vec<Row>, reviewers: &[&str]) -> ChangeRequestId {
    gate.open_change_request(
        &requester(),
        Proposal::new(dataset_id, "import", rows).with_reviewers(reviewers.to_vec()),
    )
    .await
    .expect("open change request")
    .request
    .request_id
}

#[tokio::test]
async fn uploaded_checksum_is_kept_on_the_staged_payload() {
    let gate = gate_with(Dataset::new("notes", "acme", "olive")).await;
    let checksum = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
    let outcome = gate
        .open_change_request(
            &requester(),
            Proposal::new("notes", "one note", vec![Row::new().with("text", "hello")])
                .with_reviewers(["bob"])
                .with_filename("notes.csv")
                .with_byte_len(37)
                .with_checksum(checksum),
        )
        .await
        .expect("open");
    let payload = &outcome.request.staged.payload;
    assert_eq!(payload.checksum_sha256_hex, checksum);
    assert_eq!(payload.byte_len, 37);
    assert_eq!(payload.filename.as_deref(), Some("notes.csv"));

    let stored = gate
        .get_change_request(&reviewer("bob"), outcome.request.request_id)
        .await
        .expect("load");
    assert_eq!(stored.staged.payload.checksum_sha256_hex, checksum);

    let err = gate
        .open_change_request(
            &requester(),
            Proposal::new("notes", "bad digest", vec![Row::new().with("text", "x")])
                .with_reviewers(["bob"])
                .with_checksum("not-a-digest"),
        )
        .await
        .expect_err("malformed checksum");
    assert_eq!(err.code(), GateErrorCode::InvalidRequest);
}

#[tokio::test]
async fn unvalidated_dataset_single_reviewer_happy_path() {
    let gate = gate_with(Dataset::new("notes", "acme", "olive")).await;
    let outcome = gate
        .open_change_request(
            &requester(),
            Proposal::new("notes", "one note", vec![Row::new().with("text", "hello")])
                .with_reviewers(["bob"])
                .with_filename("notes.csv"),
        )
        .await
        .expect("open");
    let report = outcome.report.expect("open report");
    assert_eq!(report.state, ValidationState::Passed);
    assert_eq!(outcome.request.status, ChangeRequestStatus::Pending);
    assert_eq!(
        outcome.request.staged.payload.filename.as_deref(),
        Some("notes.csv")
    );
    let id = outcome.request.request_id;
    assert_eq!(
        gate.preview_staged_rows(&reviewer("bob"), id, 10)
            .await
            .expect("staged preview")
            .len(),
        1
    );

    let decided = gate
        .decide(&reviewer("bob"), id, DecisionInput::approve())
        .await
        .expect("approve");
    assert_eq!(decided.request.status, ChangeRequestStatus::Approved);
    assert_eq!(decided.merge.expect("merge receipt").rows_appended, 1);
    assert_eq!(canonical_rows(&gate, "notes").await, 1);
    assert!(
        gate.preview_staged_rows(&reviewer("bob"), id, 10)
            .await
            .expect("staged preview")
            .is_empty()
    );
    let meta = gate.dataset_meta(&viewer("vic"), "notes").await.expect("meta");
    assert_eq!(meta.row_count, 1);
    assert_eq!(meta.pending_approvals, 0);
}

#[tokio::test]
async fn one_rejection_decides_regardless_of_order() {
    for reject_first in [false, true] {
        let gate = gate_with(governed_dataset()).await;
        let id = open(&gate, "prices", priced(0..3, 10.0), &["bob", "cat"]).await;
        let steps = if reject_first {
            [("cat", DecisionInput::reject()), ("bob", DecisionInput::approve())]
        } else {
            [("bob", DecisionInput::approve()), ("cat", DecisionInput::reject())]
        };
        for (who, input) in steps {
            // Once rejected, the later call is refused and changes nothing.
            let result = gate.decide(&reviewer(who), id, input).await;
            if let Err(e) = result {
                assert_eq!(e.code(), GateErrorCode::NotPending);
            }
        }
        let cr = gate
            .get_change_request(&viewer("vic"), id)
            .await
            .expect("load");
        assert_eq!(cr.status, ChangeRequestStatus::Rejected);
        assert_eq!(cr.decision_of("cat"), Decision::Rejected);
        assert_eq!(canonical_rows(&gate, "prices").await, 0);
    }
}

#[tokio::test]
async fn fatal_validation_creates_nothing() {
    let gate = gate_with(governed_dataset()).await;
    let err = gate
        .open_change_request(
            &requester(),
            Proposal::new("prices", "empty", Vec::new()).with_reviewers(["bob"]),
        )
        .await
        .expect_err("empty payload");
    assert_eq!(err.code(), GateErrorCode::ValidationFailed);
    let report = err.report().expect("report attached");
    assert_eq!(report.counts.fatal, 1);

    let err = gate
        .open_change_request(
            &requester(),
            Proposal::new("prices", "bad types", vec![Row::new().with("id", "seven")])
                .with_reviewers(["bob"]),
        )
        .await
        .expect_err("type error");
    assert_eq!(err.code(), GateErrorCode::ValidationFailed);
    assert!(err.report().is_some_and(|r| r.blocking_outcomes().count() >= 1));

    let all = gate
        .list_change_requests(&owner(), &ChangeRequestFilter::default())
        .await
        .expect("list");
    assert!(all.is_empty());
    assert_eq!(canonical_rows(&gate, "prices").await, 0);
}

#[tokio::test]
async fn withdrawn_request_refuses_every_further_mutation() {
    let gate = gate_with(governed_dataset()).await;
    let id = open(&gate, "prices", priced(0..2, 1.0), &["bob"]).await;

    let err = gate
        .withdraw(&reviewer("bob"), id)
        .await
        .expect_err("only requester");
    assert_eq!(err.code(), GateErrorCode::Forbidden);

    let withdrawn = gate.withdraw(&requester(), id).await.expect("withdraw");
    assert_eq!(withdrawn.status, ChangeRequestStatus::Withdrawn);

    let err = gate.withdraw(&requester(), id).await.expect_err("again");
    assert_eq!(err.code(), GateErrorCode::NotPending);
    let err = gate
        .decide(&reviewer("bob"), id, DecisionInput::approve())
        .await
        .expect_err("decide after withdraw");
    assert_eq!(err.code(), GateErrorCode::NotPending);

    let cr = gate
        .get_change_request(&viewer("vic"), id)
        .await
        .expect("load");
    assert_eq!(cr.status, ChangeRequestStatus::Withdrawn);
    assert_eq!(cr.decision_of("bob"), Decision::Pending);
    assert_eq!(canonical_rows(&gate, "prices").await, 0);
}

#[tokio::test]
async fn approved_request_is_terminal() {
    let gate = gate_with(governed_dataset()).await;
    let id = open(&gate, "prices", priced(0..2, 1.0), &["bob"]).await;
    gate.decide(&reviewer("bob"), id, DecisionInput::approve())
        .await
        .expect("approve");

    let err = gate
        .decide(&reviewer("bob"), id, DecisionInput::reject())
        .await
        .expect_err("re-decide");
    assert_eq!(err.code(), GateErrorCode::NotPending);
    let err = gate.withdraw(&requester(), id).await.expect_err("withdraw");
    assert_eq!(err.code(), GateErrorCode::NotPending);
    assert_eq!(canonical_rows(&gate, "prices").await, 2);
}

#[tokio::test]
async fn partial_pass_needs_an_acknowledging_approval() {
    let gate = gate_with(governed_dataset()).await;
    let outcome = gate
        .open_change_request(
            &requester(),
            Proposal::new("prices", "premium", priced(0..2, 5_000.0)).with_reviewers(["bob"]),
        )
        .await
        .expect("partial pass opens");
    let id = outcome.request.request_id;
    assert_eq!(
        outcome.report.expect("report").state,
        ValidationState::PartialPass
    );

    let err = gate
        .decide(&reviewer("bob"), id, DecisionInput::approve())
        .await
        .expect_err("warnings not acknowledged");
    assert_eq!(err.code(), GateErrorCode::WarningsNotAcknowledged);
    let cr = gate
        .get_change_request(&viewer("vic"), id)
        .await
        .expect("load");
    assert_eq!(cr.status, ChangeRequestStatus::Pending);
    assert_eq!(canonical_rows(&gate, "prices").await, 0);

    let done = gate
        .decide(
            &reviewer("bob"),
            id,
            DecisionInput::approve()
                .acknowledging_warnings()
                .with_comment("premium tier is expected"),
        )
        .await
        .expect("acknowledged approval");
    assert_eq!(done.request.status, ChangeRequestStatus::Approved);
    assert_eq!(canonical_rows(&gate, "prices").await, 2);
}

#[tokio::test]
async fn access_gate_separates_outsiders_from_unassigned_approvers() {
    let gate = gate_with(governed_dataset()).await;
    let err = gate
        .open_change_request(
            &viewer("vic"),
            Proposal::new("prices", "nope", priced(0..1, 1.0)).with_reviewers(["bob"]),
        )
        .await
        .expect_err("viewer cannot propose");
    assert_eq!(err.code(), GateErrorCode::Forbidden);

    let id = open(&gate, "prices", priced(0..1, 1.0), &["bob"]).await;
    let err = gate
        .decide(&viewer("vic"), id, DecisionInput::approve())
        .await
        .expect_err("viewer cannot decide");
    assert_eq!(err.code(), GateErrorCode::Forbidden);
    let err = gate
        .decide(&reviewer("dan"), id, DecisionInput::approve())
        .await
        .expect_err("unassigned approver");
    assert_eq!(err.code(), GateErrorCode::NotAssigned);

    let stranger = CallerContext::new("sam").with_role("other", Role::Owner);
    let err = gate
        .get_change_request(&stranger, id)
        .await
        .expect_err("other project");
    assert_eq!(err.code(), GateErrorCode::Forbidden);
    assert!(
        gate.list_change_requests(&stranger, &ChangeRequestFilter::default())
            .await
            .expect("list")
            .is_empty()
    );

    let cr = gate
        .get_change_request(&viewer("vic"), id)
        .await
        .expect("load");
    assert_eq!(cr.decision_of("bob"), Decision::Pending);
}

#[tokio::test]
async fn legacy_role_strings_are_normalized() {
    let gate = gate_with(governed_dataset()).await;
    let editor = CallerContext::new("ann").with_role_str("acme", "editor");
    let steward = CallerContext::new("bob").with_role_str("acme", "steward");
    let outcome = gate
        .open_change_request(
            &editor,
            Proposal::new("prices", "legacy", priced(0..1, 1.0)).with_reviewers(["bob"]),
        )
        .await
        .expect("editor proposes");
    let done = gate
        .decide(&steward, outcome.request.request_id, DecisionInput::approve())
        .await
        .expect("steward approves");
    assert_eq!(done.request.status, ChangeRequestStatus::Approved);
}

#[tokio::test]
async fn self_review_is_refused_by_default() {
    let gate = gate_with(governed_dataset()).await;
    let err = gate
        .open_change_request(
            &requester(),
            Proposal::new("prices", "mine", priced(0..1, 1.0)).with_reviewers(["ann", "bob"]),
        )
        .await
        .expect_err("self review");
    assert_eq!(err.code(), GateErrorCode::InvalidRequest);
}

#[tokio::test]
async fn commit_revalidates_against_the_current_definition() {
    let gate = gate_with(governed_dataset()).await;
    let id = open(&gate, "prices", priced(0..3, 10.0), &["bob"]).await;

    let stricter = RuleSet::new(vec![BusinessRule {
        name: "price_cap".into(),
        severity: Severity::Error,
        check: RuleCheck::Range {
            column: "price".into(),
            min: None,
            max: Some(5.0),
        },
    }]);
    let version = gate
        .update_dataset_rules(&owner(), "prices", governed_dataset().schema, Some(stricter))
        .await
        .expect("update rules");
    assert_eq!(version, 1);

    let err = gate
        .decide(&reviewer("bob"), id, DecisionInput::approve())
        .await
        .expect_err("drifted rules");
    assert_eq!(err.code(), GateErrorCode::MergeAborted);
    assert!(err.is_retryable());
    let cr = gate
        .get_change_request(&viewer("vic"), id)
        .await
        .expect("load");
    assert_eq!(cr.status, ChangeRequestStatus::Pending);
    assert_eq!(cr.decision_of("bob"), Decision::Approved);
    assert_eq!(cr.validations.len(), 2);
    assert_eq!(
        gate.get_validation_report(&viewer("vic"), id)
            .await
            .expect("report")
            .state,
        ValidationState::Failed
    );
    assert_eq!(canonical_rows(&gate, "prices").await, 0);
}

#[tokio::test]
async fn comments_and_listing() {
    let gate = gate_with(governed_dataset()).await;
    let a = open(&gate, "prices", priced(0..1, 1.0), &["bob"]).await;
    let b = open(&gate, "prices", priced(1..2, 1.0), &["cat"]).await;
    gate.add_comment(&viewer("vic"), a, "source file looks current")
        .await
        .expect("comment");
    gate.withdraw(&requester(), b).await.expect("withdraw");

    let pending = gate
        .list_change_requests(
            &owner(),
            &ChangeRequestFilter::for_dataset("prices").with_status(ChangeRequestStatus::Pending),
        )
        .await
        .expect("list");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request_id, a);
    assert_eq!(pending[0].comments[0].author_id, "vic");

    let for_cat = gate
        .list_change_requests(&owner(), &ChangeRequestFilter::default().with_reviewer("cat"))
        .await
        .expect("list");
    assert_eq!(for_cat.len(), 1);
    assert_eq!(for_cat[0].request_id, b);
}

#[tokio::test]
async fn owner_overwrite_bypasses_review_but_not_validation() {
    let gate = gate_with(governed_dataset()).await;
    let err = gate
        .overwrite_dataset(&requester(), "prices", priced(0..2, 1.0))
        .await
        .expect_err("contributor cannot overwrite");
    assert_eq!(err.code(), GateErrorCode::Forbidden);

    let err = gate
        .overwrite_dataset(&owner(), "prices", vec![Row::new().with("id", 1i64)])
        .await
        .expect_err("missing price");
    assert_eq!(err.code(), GateErrorCode::ValidationFailed);

    let receipt = gate
        .overwrite_dataset(&owner(), "prices", priced(0..4, 2.0))
        .await
        .expect("overwrite");
    assert_eq!(receipt.rows_written, 4);
    assert_eq!(canonical_rows(&gate, "prices").await, 4);
    let meta = gate.dataset_meta(&owner(), "prices").await.expect("meta");
    assert_eq!(meta.row_count, 4);
    assert_eq!(meta.column_count, 2);
}

#[tokio::test]
async fn unknown_dataset_and_request_are_not_found() {
    let gate = gate_with(governed_dataset()).await;
    let err = gate
        .open_change_request(
            &requester(),
            Proposal::new("missing", "t", priced(0..1, 1.0)).with_reviewers(["bob"]),
        )
        .await
        .expect_err("no dataset");
    assert_eq!(err.code(), GateErrorCode::DatasetNotFound);
    let err = gate
        .get_change_request(&owner(), ChangeRequestId::new())
        .await
        .expect_err("no request");
    assert_eq!(err.code(), GateErrorCode::ChangeRequestNotFound);
}
