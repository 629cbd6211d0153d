use proptest::prelude::*;
use stagegate::catalog::Dataset;
use stagegate::catalog::types::Row;
use stagegate::change_request::Proposal;
use stagegate::config::GateConfig;
use stagegate::permission::{CallerContext, Role};
use stagegate::quorum::{Decision, DecisionInput};
use stagegate::{ChangeRequestStatus, StageGate};

fn caller(id: &str, role: Role) -> CallerContext {
    CallerContext::new(id).with_role("acme", role)
}

fn input(decision: Decision) -> DecisionInput {
    DecisionInput {
        decision,
        comment: None,
        acknowledge_warnings: false,
    }
}

/// Applies each reviewer's decision in `order` and returns the final status
/// and canonical row count. Calls refused because the request already closed
/// are part of the expected behavior.
fn play(decisions: &[Decision], order: &[usize]) -> (ChangeRequestStatus, usize) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let gate = StageGate::in_memory(GateConfig::default()).expect("open");
        let owner = caller("olive", Role::Owner);
        gate.register_dataset(&owner, Dataset::new("d", "acme", "olive"))
            .await
            .expect("register");
        let reviewers: Vec<String> = (0..decisions.len()).map(|i| format!("r{i}")).collect();
        let id = gate
            .open_change_request(
                &caller("ann", Role::Contributor),
                Proposal::new("d", "p", vec![Row::new().with("id", 1i64)])
                    .with_reviewers(reviewers.clone()),
            )
            .await
            .expect("open")
            .request
            .request_id;
        for &i in order {
            let _ = gate
                .decide(&caller(&reviewers[i], Role::Approver), id, input(decisions[i]))
                .await;
        }
        let status = gate
            .get_change_request(&owner, id)
            .await
            .expect("load")
            .status;
        let rows = gate
            .preview_canonical_rows(&owner, "d", usize::MAX)
            .await
            .expect("rows")
            .len();
        (status, rows)
    })
}

fn arb_decision() -> impl Strategy<Value = Decision> {
    prop_oneof![
        Just(Decision::Pending),
        Just(Decision::Approved),
        Just(Decision::Rejected),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn final_status_follows_unanimity_in_any_order(
        (decisions, order) in prop::collection::vec(arb_decision(), 1..6)
            .prop_flat_map(|d| {
                let n = d.len();
                (Just(d), Just((0..n).collect::<Vec<_>>()).prop_shuffle())
            })
    ) {
        let forward: Vec<usize> = (0..decisions.len()).collect();
        let (status_a, rows_a) = play(&decisions, &forward);
        let (status_b, rows_b) = play(&decisions, &order);
        prop_assert_eq!(status_a, status_b);
        prop_assert_eq!(rows_a, rows_b);

        let expected = if decisions.contains(&Decision::Rejected) {
            ChangeRequestStatus::Rejected
        } else if decisions.iter().all(|d| *d == Decision::Approved) {
            ChangeRequestStatus::Approved
        } else {
            ChangeRequestStatus::Pending
        };
        prop_assert_eq!(status_a, expected);
        prop_assert_eq!(rows_a, usize::from(expected == ChangeRequestStatus::Approved));
    }
}
