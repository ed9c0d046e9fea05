//! Expression evaluation against a frame or a scalar environment.

use crate::error::ExprError;
use crate::expr::{BinaryOp, Expr, FunctionRegistry, UnaryOp};
use crate::types::{Frame, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// The result of evaluating an expression: one value, or one value per row.
#[derive(Clone, Debug, PartialEq)]
pub enum ExprValue {
    Scalar(Value),
    Series(Vec<Value>),
}

impl ExprValue {
    /// Materializes the result as a column of `rows` values, broadcasting
    /// scalars.
    pub fn into_column(self, rows: usize) -> Result<Vec<Value>, ExprError> {
        match self {
            ExprValue::Scalar(value) => Ok(vec![value; rows]),
            ExprValue::Series(values) if values.len() == rows => Ok(values),
            ExprValue::Series(values) => Err(ExprError::LengthMismatch {
                left: rows,
                right: values.len(),
            }),
        }
    }
}

/// Name resolution environment for one evaluation.
///
/// Bare identifiers resolve to a frame column first, then to a caller-supplied
/// scalar parameter.
#[derive(Clone, Copy, Default)]
pub struct EvalScope<'a> {
    pub frame: Option<&'a Frame>,
    pub params: Option<&'a HashMap<String, Value>>,
}

impl<'a> EvalScope<'a> {
    pub fn frame(frame: &'a Frame) -> Self {
        Self {
            frame: Some(frame),
            params: None,
        }
    }

    pub fn params(params: &'a HashMap<String, Value>) -> Self {
        Self {
            frame: None,
            params: Some(params),
        }
    }
}

/// Evaluates parsed expressions, dispatching calls through a function registry.
pub struct Evaluator {
    functions: FunctionRegistry,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            functions: FunctionRegistry::standard(),
        }
    }

    pub fn with_functions(functions: FunctionRegistry) -> Self {
        Self { functions }
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn eval(&self, expr: &Expr, scope: EvalScope<'_>) -> Result<ExprValue, ExprError> {
        match expr {
            Expr::Literal(value) => Ok(ExprValue::Scalar(value.clone())),
            Expr::Column(name) => {
                let frame = scope
                    .frame
                    .ok_or_else(|| ExprError::NoFrame(name.clone()))?;
                let column = frame
                    .column(name)
                    .ok_or_else(|| ExprError::UnknownName(name.clone()))?;
                Ok(ExprValue::Series(column.to_vec()))
            }
            Expr::Ident(name) => {
                if let Some(frame) = scope.frame {
                    if let Some(column) = frame.column(name) {
                        return Ok(ExprValue::Series(column.to_vec()));
                    }
                }
                if let Some(params) = scope.params {
                    if let Some(value) = params.get(name) {
                        return Ok(ExprValue::Scalar(value.clone()));
                    }
                }
                Err(ExprError::UnknownName(name.clone()))
            }
            Expr::Call { name, args } => {
                let evaluated = args
                    .iter()
                    .map(|arg| self.eval(arg, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.functions.dispatch(name, &evaluated)?)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                apply_elementwise(value, |v| unary(*op, v))
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, scope)?;
                let rhs = self.eval(rhs, scope)?;
                zip_elementwise(lhs, rhs, |a, b| binary(*op, a, b))
            }
        }
    }
}

fn unary(op: UnaryOp, value: &Value) -> Result<Value, ExprError> {
    match (op, value) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (op, value) => Err(ExprError::Type(format!(
            "cannot apply {op:?} to {}",
            value.kind()
        ))),
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, ExprError> {
    use BinaryOp::*;
    match op {
        Add => lhs.checked_add(rhs),
        Sub => lhs.checked_sub(rhs),
        Mul => lhs.checked_mul(rhs),
        Div => lhs.checked_div(rhs),
        Rem => lhs.checked_rem(rhs),
        Eq | Ne | Lt | Le | Gt | Ge => {
            let ordering = lhs.compare(rhs)?;
            Ok(match ordering {
                None => Value::Null,
                Some(ordering) => Value::Bool(comparison_holds(op, ordering)),
            })
        }
        And | Or => logical(op, lhs, rhs),
    }
}

fn comparison_holds(op: BinaryOp, ordering: Ordering) -> bool {
    match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::Ne => ordering != Ordering::Equal,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Ge => ordering != Ordering::Less,
        _ => unreachable!("not a comparison operator"),
    }
}

fn logical(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, ExprError> {
    let as_bool = |v: &Value| -> Result<Option<bool>, ExprError> {
        match v {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            other => Err(ExprError::Type(format!(
                "logical operator requires booleans, got {}",
                other.kind()
            ))),
        }
    };
    let (a, b) = (as_bool(lhs)?, as_bool(rhs)?);
    Ok(match (op, a, b) {
        (BinaryOp::And, Some(a), Some(b)) => Value::Bool(a && b),
        (BinaryOp::Or, Some(a), Some(b)) => Value::Bool(a || b),
        _ => Value::Null,
    })
}

fn apply_elementwise(
    value: ExprValue,
    f: impl Fn(&Value) -> Result<Value, ExprError>,
) -> Result<ExprValue, ExprError> {
    match value {
        ExprValue::Scalar(v) => Ok(ExprValue::Scalar(f(&v)?)),
        ExprValue::Series(values) => {
            let out = values.iter().map(f).collect::<Result<Vec<_>, _>>()?;
            Ok(ExprValue::Series(out))
        }
    }
}

fn zip_elementwise(
    lhs: ExprValue,
    rhs: ExprValue,
    f: impl Fn(&Value, &Value) -> Result<Value, ExprError>,
) -> Result<ExprValue, ExprError> {
    match (lhs, rhs) {
        (ExprValue::Scalar(a), ExprValue::Scalar(b)) => Ok(ExprValue::Scalar(f(&a, &b)?)),
        (ExprValue::Series(a), ExprValue::Scalar(b)) => {
            let out = a.iter().map(|v| f(v, &b)).collect::<Result<Vec<_>, _>>()?;
            Ok(ExprValue::Series(out))
        }
        (ExprValue::Scalar(a), ExprValue::Series(b)) => {
            let out = b.iter().map(|v| f(&a, v)).collect::<Result<Vec<_>, _>>()?;
            Ok(ExprValue::Series(out))
        }
        (ExprValue::Series(a), ExprValue::Series(b)) => {
            if a.len() != b.len() {
                return Err(ExprError::LengthMismatch {
                    left: a.len(),
                    right: b.len(),
                });
            }
            let out = a
                .iter()
                .zip(&b)
                .map(|(x, y)| f(x, y))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ExprValue::Series(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expression;

    fn eval_on(frame: &Frame, text: &str) -> ExprValue {
        let evaluator = Evaluator::new();
        let expr = parse_expression(text).unwrap();
        evaluator.eval(&expr, EvalScope::frame(frame)).unwrap()
    }

    fn test_frame() -> Frame {
        Frame::from_columns(vec![
            ("A", vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            ("B", vec![Value::Int(0), Value::Int(0), Value::Int(0)]),
            (
                "C",
                vec![Value::from("a"), Value::from("b"), Value::from("c")],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn column_plus_column_is_elementwise() {
        let result = eval_on(&test_frame(), "A + B");
        assert_eq!(
            result,
            ExprValue::Series(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn scalar_broadcasts_over_series() {
        let result = eval_on(&test_frame(), "A * 2");
        assert_eq!(
            result,
            ExprValue::Series(vec![Value::Int(2), Value::Int(4), Value::Int(6)])
        );
    }

    #[test]
    fn explicit_col_reference_reads_the_frame() {
        let result = eval_on(&test_frame(), "col[C]");
        assert_eq!(
            result,
            ExprValue::Series(vec![Value::from("a"), Value::from("b"), Value::from("c")])
        );
    }

    #[test]
    fn comparison_yields_booleans() {
        let result = eval_on(&test_frame(), "A >= 2");
        assert_eq!(
            result,
            ExprValue::Series(vec![
                Value::Bool(false),
                Value::Bool(true),
                Value::Bool(true)
            ])
        );
    }

    #[test]
    fn string_concatenation_requires_both_strings() {
        let evaluator = Evaluator::new();
        let expr = parse_expression("C + 1").unwrap();
        let frame = test_frame();
        assert!(evaluator.eval(&expr, EvalScope::frame(&frame)).is_err());
    }

    #[test]
    fn functions_apply_over_columns() {
        let result = eval_on(&test_frame(), "uppercase(C)");
        assert_eq!(
            result,
            ExprValue::Series(vec![Value::from("A"), Value::from("B"), Value::from("C")])
        );
    }

    #[test]
    fn params_resolve_without_a_frame() {
        let evaluator = Evaluator::new();
        let mut params = HashMap::new();
        params.insert("threshold".to_string(), Value::Int(10));
        let expr = parse_expression("threshold * 2").unwrap();
        let result = evaluator.eval(&expr, EvalScope::params(&params)).unwrap();
        assert_eq!(result, ExprValue::Scalar(Value::Int(20)));
    }

    #[test]
    fn unknown_name_errors() {
        let evaluator = Evaluator::new();
        let expr = parse_expression("missing").unwrap();
        let frame = test_frame();
        assert!(matches!(
            evaluator.eval(&expr, EvalScope::frame(&frame)).unwrap_err(),
            ExprError::UnknownName(_)
        ));
    }

    #[test]
    fn lag_inside_arithmetic_keeps_length() {
        let evaluator = Evaluator::new();
        let frame = Frame::from_columns(vec![
            ("a", vec![Value::Int(1), Value::Int(2)]),
        ])
        .unwrap();
        let expr = parse_expression("a + lag(a, 1)").unwrap();
        let result = evaluator.eval(&expr, EvalScope::frame(&frame)).unwrap();
        assert_eq!(
            result,
            ExprValue::Series(vec![Value::Null, Value::Int(3)])
        );
    }

    #[test]
    fn reducers_collapse_to_scalars_inside_expressions() {
        let result = eval_on(&test_frame(), "A - mean(A)");
        assert_eq!(
            result,
            ExprValue::Series(vec![
                Value::Float(-1.0),
                Value::Float(0.0),
                Value::Float(1.0)
            ])
        );
    }
}
