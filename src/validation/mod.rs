//! Severity-graded validation.
//!
//! Rule evaluation produces a flat list of [`RuleOutcome`]s; [`aggregate`]
//! reduces that list into a [`ValidationState`] with per-severity counts. The
//! reduction is a pure function of the outcome list, so the open-time run and
//! the commit-time re-run agree whenever they see the same findings.

pub mod rules;

use crate::catalog::Dataset;
use crate::catalog::now_micros;
use crate::catalog::types::Row;
use serde::{Deserialize, Serialize};

pub use rules::SchemaRuleEvaluator;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    #[default]
    NotStarted,
    InProgress,
    PartialPass,
    Passed,
    Failed,
}

impl ValidationState {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationState::NotStarted => "not_started",
            ValidationState::InProgress => "in_progress",
            ValidationState::PartialPass => "partial_pass",
            ValidationState::Passed => "passed",
            ValidationState::Failed => "failed",
        }
    }

    /// Hard gate: blocks progress unconditionally.
    pub fn is_blocking(self) -> bool {
        matches!(self, ValidationState::Failed)
    }

    /// Soft gate: progress requires an explicit approver acknowledgement.
    pub fn needs_acknowledgement(self) -> bool {
        matches!(self, ValidationState::PartialPass)
    }
}

/// One finding from rule evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleOutcome {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub row_index: Option<usize>,
    #[serde(default)]
    pub column: Option<String>,
}

impl RuleOutcome {
    pub fn new(rule: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            severity,
            message: message.into(),
            row_index: None,
            column: None,
        }
    }

    pub fn at_row(mut self, row_index: usize) -> Self {
        self.row_index = Some(row_index);
        self
    }

    pub fn on_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ValidationCounts {
    pub info: usize,
    pub warning: usize,
    pub error: usize,
    pub fatal: usize,
}

impl ValidationCounts {
    pub fn total(&self) -> usize {
        self.info + self.warning + self.error + self.fatal
    }
}

/// Reduces outcomes with strict precedence: fatal, then error, then warning.
/// An empty list passes.
pub fn aggregate(outcomes: &[RuleOutcome]) -> (ValidationState, ValidationCounts) {
    let mut counts = ValidationCounts::default();
    for outcome in outcomes {
        match outcome.severity {
            Severity::Info => counts.info += 1,
            Severity::Warning => counts.warning += 1,
            Severity::Error => counts.error += 1,
            Severity::Fatal => counts.fatal += 1,
        }
    }
    let state = if counts.fatal > 0 || counts.error > 0 {
        ValidationState::Failed
    } else if counts.warning > 0 {
        ValidationState::PartialPass
    } else {
        ValidationState::Passed
    };
    (state, counts)
}

/// Audit artifact attached to a change request for each validation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub state: ValidationState,
    pub counts: ValidationCounts,
    pub outcomes: Vec<RuleOutcome>,
    pub rows_evaluated: usize,
    /// True when only a prefix sample of the payload was evaluated.
    pub sampled: bool,
    pub definition_version: u64,
    pub evaluated_at_micros: u64,
}

impl ValidationReport {
    pub fn from_outcomes(outcomes: Vec<RuleOutcome>) -> Self {
        let (state, counts) = aggregate(&outcomes);
        Self {
            state,
            counts,
            outcomes,
            ..Self::default()
        }
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "state={} fatal={} error={} warning={} info={}",
            self.state.as_str(),
            self.counts.fatal,
            self.counts.error,
            self.counts.warning,
            self.counts.info
        );
        if let Some(top) = self
            .outcomes
            .iter()
            .filter(|o| o.severity >= Severity::Error)
            .max_by_key(|o| o.severity)
        {
            out.push_str(&format!(" top_blocking=\"{}: {}\"", top.rule, top.message));
        }
        out
    }

    pub fn blocking_outcomes(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.severity >= Severity::Error)
    }
}

/// Evaluates a dataset's schema and rules against candidate rows. This is the
/// seam where an external rules source plugs in; the engine only reduces the
/// outcomes it returns.
pub trait RuleEvaluator: Send + Sync {
    fn evaluate(&self, dataset: &Dataset, rows: &[Row]) -> Vec<RuleOutcome>;
}

/// Payload-level limits checked before per-row rules.
#[derive(Debug, Clone, Copy)]
pub struct ValidationLimits {
    pub sample_rows: usize,
    pub max_rows: usize,
}

/// Runs the evaluator over `rows` (or a prefix sample of them) and aggregates.
pub fn run_validation(
    evaluator: &dyn RuleEvaluator,
    dataset: &Dataset,
    rows: &[Row],
    limits: ValidationLimits,
) -> ValidationReport {
    let mut outcomes = Vec::new();
    if rows.is_empty() {
        outcomes.push(RuleOutcome::new(
            "payload",
            Severity::Fatal,
            "payload contains no rows",
        ));
    }
    if rows.len() > limits.max_rows {
        outcomes.push(RuleOutcome::new(
            "payload",
            Severity::Fatal,
            format!(
                "payload has {} rows, limit is {}",
                rows.len(),
                limits.max_rows
            ),
        ));
    }
    let sample_len = rows.len().min(limits.sample_rows);
    let sample = &rows[..sample_len];
    if !dataset.is_unvalidated() && !sample.is_empty() {
        outcomes.extend(evaluator.evaluate(dataset, sample));
    }
    let mut report = ValidationReport::from_outcomes(outcomes);
    report.rows_evaluated = sample_len;
    report.sampled = sample_len < rows.len();
    report.definition_version = dataset.definition_version;
    report.evaluated_at_micros = now_micros();
    report
}

#[cfg(test)]
mod tests {
    use super::{
        RuleOutcome, Severity, ValidationLimits, ValidationState, aggregate, run_validation,
    };
    use crate::catalog::Dataset;
    use crate::catalog::types::Row;
    use crate::validation::SchemaRuleEvaluator;
    use proptest::prelude::*;

    fn outcome(severity: Severity) -> RuleOutcome {
        RuleOutcome::new("r", severity, "m")
    }

    #[test]
    fn empty_outcome_list_passes() {
        let (state, counts) = aggregate(&[]);
        assert_eq!(state, ValidationState::Passed);
        assert_eq!(counts.total(), 0);
    }

    #[test]
    fn precedence_is_fatal_error_warning() {
        let cases = [
            (vec![Severity::Info, Severity::Info], ValidationState::Passed),
            (
                vec![Severity::Info, Severity::Warning],
                ValidationState::PartialPass,
            ),
            (
                vec![Severity::Warning, Severity::Error],
                ValidationState::Failed,
            ),
            (
                vec![Severity::Warning, Severity::Fatal, Severity::Info],
                ValidationState::Failed,
            ),
        ];
        for (severities, expected) in cases {
            let outcomes: Vec<_> = severities.into_iter().map(outcome).collect();
            assert_eq!(aggregate(&outcomes).0, expected);
        }
    }

    #[test]
    fn counts_every_outcome() {
        let outcomes = vec![
            outcome(Severity::Fatal),
            outcome(Severity::Error),
            outcome(Severity::Error),
            outcome(Severity::Warning),
            outcome(Severity::Info),
        ];
        let (_, counts) = aggregate(&outcomes);
        assert_eq!(
            (counts.fatal, counts.error, counts.warning, counts.info),
            (1, 2, 1, 1)
        );
    }

    #[test]
    fn unvalidated_dataset_passes_any_rows() {
        let dataset = Dataset::new("d", "p", "o");
        let rows = vec![Row::new().with("anything", 1_i64)];
        let report = run_validation(
            &SchemaRuleEvaluator,
            &dataset,
            &rows,
            ValidationLimits {
                sample_rows: 10,
                max_rows: 10,
            },
        );
        assert_eq!(report.state, ValidationState::Passed);
        assert_eq!(report.rows_evaluated, 1);
        assert!(!report.sampled);
    }

    #[test]
    fn empty_and_oversized_payloads_are_fatal() {
        let dataset = Dataset::new("d", "p", "o");
        let limits = ValidationLimits {
            sample_rows: 1,
            max_rows: 2,
        };
        let empty = run_validation(&SchemaRuleEvaluator, &dataset, &[], limits);
        assert_eq!(empty.state, ValidationState::Failed);
        assert_eq!(empty.counts.fatal, 1);

        let rows = vec![Row::new(); 3];
        let big = run_validation(&SchemaRuleEvaluator, &dataset, &rows, limits);
        assert_eq!(big.counts.fatal, 1);
        assert!(big.sampled);
        assert!(big.summary().contains("top_blocking"));
    }

    fn arb_severity() -> impl Strategy<Value = Severity> {
        prop_oneof![
            Just(Severity::Info),
            Just(Severity::Warning),
            Just(Severity::Error),
            Just(Severity::Fatal),
        ]
    }

    proptest! {
        #[test]
        fn aggregation_is_idempotent(severities in prop::collection::vec(arb_severity(), 0..64)) {
            let outcomes: Vec<_> = severities.into_iter().map(outcome).collect();
            let first = aggregate(&outcomes);
            let second = aggregate(&outcomes);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn aggregation_ignores_order(severities in prop::collection::vec(arb_severity(), 0..64)) {
            let outcomes: Vec<_> = severities.into_iter().map(outcome).collect();
            let mut reversed = outcomes.clone();
            reversed.reverse();
            prop_assert_eq!(aggregate(&outcomes), aggregate(&reversed));
        }
    }
}
