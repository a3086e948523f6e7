// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Boolean conditions guarding choice alternatives.
//!
//! A condition is a small expression tree over request parameters and
//! literals. Choice-rule compilation lowers the state-language comparison
//! operators onto this vocabulary; `<=` and `>=` become disjunctions of
//! the strict operator and equality.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use strato_asl::{ComparisonKind, DataTestRule};

use crate::error::CompileError;

/// One side of a comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operand {
    /// A named request parameter, addressed by reference path.
    Param(strato_asl::ReferencePath),
    /// A literal JSON value.
    Value(Value),
}

impl Operand {
    fn resolve<'a>(&'a self, input: &'a Map<String, Value>) -> &'a Value {
        match self {
            Operand::Param(path) => input.get(path.field_name()).unwrap_or(&Value::Null),
            Operand::Value(value) => value,
        }
    }
}

/// A boolean expression over request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Condition {
    /// Constant truth value; the synthetic default alternative is `Const(true)`.
    Const(bool),
    /// Structural equality with numeric coercion.
    Eq(Operand, Operand),
    /// Strict numeric less-than; false for non-numeric operands.
    Lt(Operand, Operand),
    /// Strict numeric greater-than; false for non-numeric operands.
    Gt(Operand, Operand),
    /// Conjunction.
    And(Box<Condition>, Box<Condition>),
    /// Disjunction.
    Or(Box<Condition>, Box<Condition>),
    /// Negation.
    Not(Box<Condition>),
}

impl Condition {
    /// Disjunction helper used by the `<=`/`>=` lowering.
    pub fn or(left: Condition, right: Condition) -> Condition {
        Condition::Or(Box::new(left), Box::new(right))
    }

    /// Negation helper.
    pub fn not(inner: Condition) -> Condition {
        Condition::Not(Box::new(inner))
    }

    /// Evaluate against a request parameter object.
    pub fn evaluate(&self, input: &Map<String, Value>) -> bool {
        match self {
            Condition::Const(value) => *value,
            Condition::Eq(left, right) => values_equal(left.resolve(input), right.resolve(input)),
            Condition::Lt(left, right) => {
                match (to_number(left.resolve(input)), to_number(right.resolve(input))) {
                    (Some(l), Some(r)) => l < r,
                    _ => false,
                }
            }
            Condition::Gt(left, right) => {
                match (to_number(left.resolve(input)), to_number(right.resolve(input))) {
                    (Some(l), Some(r)) => l > r,
                    _ => false,
                }
            }
            Condition::And(left, right) => left.evaluate(input) && right.evaluate(input),
            Condition::Or(left, right) => left.evaluate(input) || right.evaluate(input),
            Condition::Not(inner) => !inner.evaluate(input),
        }
    }
}

/// Lower a data-test choice rule onto the condition vocabulary.
///
/// Reserved operators are an explicit error; they must never compile to a
/// silently-true or silently-false condition.
pub fn compile_rule(state: &str, rule: &DataTestRule) -> Result<Condition, CompileError> {
    let param = Operand::Param(rule.variable.clone());
    let operand = Operand::Value(rule.operand.clone());

    let condition = match rule.kind {
        ComparisonKind::StringEquals | ComparisonKind::NumericEquals => {
            Condition::Eq(param, operand)
        }
        ComparisonKind::NumericLessThan => Condition::Lt(param, operand),
        ComparisonKind::NumericGreaterThan => Condition::Gt(param, operand),
        ComparisonKind::NumericLessThanEquals => Condition::or(
            Condition::Lt(param.clone(), operand.clone()),
            Condition::Eq(param, operand),
        ),
        ComparisonKind::NumericGreaterThanEquals => Condition::or(
            Condition::Gt(param.clone(), operand.clone()),
            Condition::Eq(param, operand),
        ),
        ComparisonKind::BooleanEquals => Condition::Eq(param, operand),
        ComparisonKind::IsNull => Condition::Eq(param, Operand::Value(Value::Null)),
        ComparisonKind::IsPresent => {
            Condition::not(Condition::Eq(param, Operand::Value(Value::Null)))
        }
        ComparisonKind::IsBoolean => Condition::or(
            Condition::Eq(param.clone(), Operand::Value(Value::Bool(true))),
            Condition::Eq(param, Operand::Value(Value::Bool(false))),
        ),
        reserved => {
            return Err(CompileError::NotImplementedOperator {
                state: state.to_string(),
                operator: reserved.to_string(),
            });
        }
    };
    Ok(condition)
}

/// Structural equality with numeric coercion: numbers compare as `f64`
/// regardless of integer/float representation; other types compare
/// structurally and cross-type comparisons are unequal.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(l), Value::Bool(r)) => l == r,
        (Value::Number(l), Value::Number(r)) => match (l.as_f64(), r.as_f64()) {
            (Some(lf), Some(rf)) => (lf - rf).abs() < f64::EPSILON,
            _ => false,
        },
        (Value::String(l), Value::String(r)) => l == r,
        (Value::Array(l), Value::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r.iter()).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(l), Value::Object(r)) => {
            l.len() == r.len()
                && l.iter()
                    .all(|(k, v)| r.get(k).is_some_and(|rv| values_equal(v, rv)))
        }
        _ => false,
    }
}

/// Numeric view of a value: numbers as `f64`, numeric strings parsed,
/// booleans as `0.0`/`1.0`; everything else has none.
fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strato_asl::ReferencePath;

    fn rule(kind: ComparisonKind, operand: Value) -> DataTestRule {
        DataTestRule {
            variable: ReferencePath::parse("$.v").unwrap(),
            kind,
            operand,
            next: "Next".to_string(),
        }
    }

    fn input(value: Value) -> Map<String, Value> {
        let Value::Object(map) = json!({"v": value}) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn equality_coerces_number_representations() {
        let cond = compile_rule("S", &rule(ComparisonKind::NumericEquals, json!(5))).unwrap();
        assert!(cond.evaluate(&input(json!(5.0))));
        assert!(!cond.evaluate(&input(json!(6))));
    }

    #[test]
    fn strict_ordering() {
        let lt = compile_rule("S", &rule(ComparisonKind::NumericLessThan, json!(10))).unwrap();
        assert!(lt.evaluate(&input(json!(9))));
        assert!(!lt.evaluate(&input(json!(10))));

        let gt = compile_rule("S", &rule(ComparisonKind::NumericGreaterThan, json!(10))).unwrap();
        assert!(gt.evaluate(&input(json!(11))));
        assert!(!gt.evaluate(&input(json!(10))));
    }

    #[test]
    fn less_than_equals_is_a_disjunction() {
        let cond =
            compile_rule("S", &rule(ComparisonKind::NumericLessThanEquals, json!(10))).unwrap();
        assert!(matches!(cond, Condition::Or(_, _)));
        assert!(cond.evaluate(&input(json!(10))));
        assert!(cond.evaluate(&input(json!(3))));
        assert!(!cond.evaluate(&input(json!(11))));
    }

    #[test]
    fn greater_than_equals_is_a_disjunction() {
        let cond =
            compile_rule("S", &rule(ComparisonKind::NumericGreaterThanEquals, json!(10))).unwrap();
        assert!(cond.evaluate(&input(json!(10))));
        assert!(cond.evaluate(&input(json!(42))));
        assert!(!cond.evaluate(&input(json!(9.5))));
    }

    #[test]
    fn ordering_on_non_numbers_is_false() {
        let cond = compile_rule("S", &rule(ComparisonKind::NumericLessThan, json!(10))).unwrap();
        assert!(!cond.evaluate(&input(json!([1, 2]))));
        assert!(!cond.evaluate(&input(json!(null))));
    }

    #[test]
    fn null_and_presence_checks() {
        let is_null = compile_rule("S", &rule(ComparisonKind::IsNull, json!(true))).unwrap();
        assert!(is_null.evaluate(&input(json!(null))));
        // Absent parameters read as null.
        assert!(is_null.evaluate(&Map::new()));
        assert!(!is_null.evaluate(&input(json!(1))));

        let present = compile_rule("S", &rule(ComparisonKind::IsPresent, json!(true))).unwrap();
        assert!(present.evaluate(&input(json!(0))));
        assert!(!present.evaluate(&Map::new()));
    }

    #[test]
    fn is_boolean_matches_both_literals() {
        let cond = compile_rule("S", &rule(ComparisonKind::IsBoolean, json!(true))).unwrap();
        assert!(cond.evaluate(&input(json!(true))));
        assert!(cond.evaluate(&input(json!(false))));
        assert!(!cond.evaluate(&input(json!("true"))));
    }

    #[test]
    fn boolean_equals_uses_the_literal() {
        let cond = compile_rule("S", &rule(ComparisonKind::BooleanEquals, json!(false))).unwrap();
        assert!(cond.evaluate(&input(json!(false))));
        assert!(!cond.evaluate(&input(json!(true))));
    }

    #[test]
    fn reserved_operators_refuse_to_compile() {
        for kind in [
            ComparisonKind::StringMatches,
            ComparisonKind::StringLessThan,
            ComparisonKind::NumericEqualsPath,
            ComparisonKind::TimestampEquals,
            ComparisonKind::IsNumeric,
            ComparisonKind::IsString,
            ComparisonKind::IsTimestamp,
        ] {
            let err = compile_rule("S", &rule(kind, json!(1))).unwrap_err();
            assert!(
                matches!(err, CompileError::NotImplementedOperator { .. }),
                "{kind} should be rejected"
            );
        }
    }

    #[test]
    fn constant_true_default() {
        assert!(Condition::Const(true).evaluate(&Map::new()));
        assert!(!Condition::Const(false).evaluate(&Map::new()));
    }
}
