use crate::catalog::Dataset;
use crate::catalog::schema::{BusinessRule, DatasetSchema, RuleCheck};
use crate::catalog::types::{Row, Value};
use crate::validation::{RuleEvaluator, RuleOutcome, Severity};
use std::collections::BTreeMap;

/// Built-in evaluator for declared schemas and the closed [`RuleCheck`] set.
///
/// Schema findings: a missing non-nullable column, a null in a non-nullable
/// column and a type mismatch are errors; columns outside the schema are
/// reported at the schema's `unknown_column_severity`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaRuleEvaluator;

impl RuleEvaluator for SchemaRuleEvaluator {
    fn evaluate(&self, dataset: &Dataset, rows: &[Row]) -> Vec<RuleOutcome> {
        let mut out = Vec::new();
        if let Some(schema) = &dataset.schema {
            for (idx, row) in rows.iter().enumerate() {
                check_row_against_schema(schema, idx, row, &mut out);
            }
        }
        if let Some(rules) = &dataset.rules {
            for rule in &rules.rules {
                check_rule(rule, rows, &mut out);
            }
        }
        out
    }
}

fn check_row_against_schema(
    schema: &DatasetSchema,
    idx: usize,
    row: &Row,
    out: &mut Vec<RuleOutcome>,
) {
    for col in &schema.columns {
        match row.get(&col.name) {
            None | Some(Value::Null) if !col.nullable => out.push(
                RuleOutcome::new(
                    "schema.not_null",
                    Severity::Error,
                    format!("column '{}' must not be null", col.name),
                )
                .at_row(idx)
                .on_column(&col.name),
            ),
            Some(value) if !value.is_null() && !value.matches_type(col.col_type) => out.push(
                RuleOutcome::new(
                    "schema.type",
                    Severity::Error,
                    format!(
                        "column '{}' expected {:?}, got {}",
                        col.name,
                        col.col_type,
                        value.type_name()
                    ),
                )
                .at_row(idx)
                .on_column(&col.name),
            ),
            _ => {}
        }
    }
    for column in row.columns() {
        if schema.column(column).is_none() {
            out.push(
                RuleOutcome::new(
                    "schema.unknown_column",
                    schema.unknown_column_severity,
                    format!("column '{column}' is not part of the schema"),
                )
                .at_row(idx)
                .on_column(column),
            );
        }
    }
}

fn check_rule(rule: &BusinessRule, rows: &[Row], out: &mut Vec<RuleOutcome>) {
    let column = rule.check.column();
    let violation = |idx: usize, message: String| {
        RuleOutcome::new(&rule.name, rule.severity, message)
            .at_row(idx)
            .on_column(column)
    };
    match &rule.check {
        RuleCheck::Required { .. } => {
            for (idx, row) in rows.iter().enumerate() {
                if row.get(column).is_none_or(Value::is_null) {
                    out.push(violation(idx, format!("'{column}' is required")));
                }
            }
        }
        RuleCheck::Range { min, max, .. } => {
            for (idx, row) in rows.iter().enumerate() {
                let Some(value) = row.get(column).filter(|v| !v.is_null()) else {
                    continue;
                };
                match value.as_f64() {
                    Some(n) if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) => {
                        out.push(violation(
                            idx,
                            format!("'{column}' = {n} is outside [{min:?}, {max:?}]"),
                        ));
                    }
                    Some(_) => {}
                    None => out.push(violation(
                        idx,
                        format!("'{column}' is not numeric ({})", value.type_name()),
                    )),
                }
            }
        }
        RuleCheck::OneOf { values, .. } => {
            for (idx, row) in rows.iter().enumerate() {
                let Some(value) = row.get(column).filter(|v| !v.is_null()) else {
                    continue;
                };
                if !values.contains(value) {
                    out.push(violation(
                        idx,
                        format!("'{column}' has a value outside the allowed set"),
                    ));
                }
            }
        }
        RuleCheck::MaxLength { max, .. } => {
            for (idx, row) in rows.iter().enumerate() {
                if let Some(text) = row.get(column).and_then(Value::as_text)
                    && text.chars().count() > *max
                {
                    out.push(violation(
                        idx,
                        format!("'{column}' exceeds {max} characters"),
                    ));
                }
            }
        }
        RuleCheck::UniqueInBatch { .. } => {
            let mut first_seen: BTreeMap<&Value, usize> = BTreeMap::new();
            for (idx, row) in rows.iter().enumerate() {
                let Some(value) = row.get(column).filter(|v| !v.is_null()) else {
                    continue;
                };
                if let Some(first) = first_seen.get(value) {
                    out.push(violation(
                        idx,
                        format!("'{column}' duplicates row {first}"),
                    ));
                } else {
                    first_seen.insert(value, idx);
                }
            }
        }
    }
}
