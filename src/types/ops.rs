use std::cmp::Ordering;
use std::sync::Arc;

use super::expr::{BinaryOp, UnaryOp};
use super::value::Value;
use crate::error::{Error, Result};

/// Apply a binary operator to two already-evaluated operands.
///
/// `&&` and `||` are accepted here for completeness; the tree walker
/// short-circuits them before both sides exist.
///
/// # Errors
///
/// Division and modulo by zero, results outside the `f64` range, `NaN`
/// powers, and operands of the wrong kind.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow => {
            let (a, b) = numeric_operands(op, left, right)?;
            arithmetic(op, a, b).map(Value::Number)
        }
        BinaryOp::Eq => Ok(Value::Bool(left.loose_eq(right))),
        BinaryOp::Neq => Ok(Value::Bool(!left.loose_eq(right))),
        BinaryOp::Gt => Ok(Value::Bool(left.compare(right) == Ordering::Greater)),
        BinaryOp::Gte => Ok(Value::Bool(left.compare(right) != Ordering::Less)),
        BinaryOp::Lt => Ok(Value::Bool(left.compare(right) == Ordering::Less)),
        BinaryOp::Lte => Ok(Value::Bool(left.compare(right) != Ordering::Greater)),
        BinaryOp::And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
        BinaryOp::Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
    }
}

/// Apply a prefix operator.
///
/// # Errors
///
/// Returns [`Error::TypeCoercion`] when negating a non-number.
pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value> {
    match op {
        UnaryOp::Neg => match operand {
            Value::Number(n) => Ok(Value::Number(-n)),
            other => Err(Error::type_coercion(format!(
                "cannot negate {}",
                other.type_name()
            ))),
        },
        UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
    }
}

/// `a ^ b` with the same failure rules as the `pow` builtin.
///
/// # Errors
///
/// [`Error::Overflow`] for an infinite result, [`Error::InvalidArgument`]
/// for `NaN`.
pub fn power(a: f64, b: f64) -> Result<f64> {
    let result = a.powf(b);
    if result.is_nan() {
        Err(Error::invalid_argument(format!("{a} ^ {b} is not a number")))
    } else if result.is_infinite() {
        Err(Error::overflow("^"))
    } else {
        Ok(result)
    }
}

/// Element of an array at a truncated numeric index. Strings are not
/// indexable.
///
/// # Errors
///
/// [`Error::IndexOutOfRange`] for negative or too-large indices and
/// [`Error::TypeCoercion`] when the target is not an array or the index is
/// not numeric.
#[allow(clippy::cast_possible_truncation)]
pub fn index(target: &Value, index: &Value) -> Result<Value> {
    let items = match target {
        Value::Array(items) => items,
        Value::Str(_) => return Err(Error::type_coercion("strings are not indexable")),
        other => {
            return Err(Error::type_coercion(format!(
                "cannot index into {}",
                other.type_name()
            )))
        }
    };
    let raw = index.to_f64()?;
    if !raw.is_finite() {
        return Err(Error::invalid_argument(format!("index {raw} is not finite")));
    }
    let i = raw.trunc() as i64;
    usize::try_from(i)
        .ok()
        .and_then(|u| items.get(u))
        .cloned()
        .ok_or(Error::IndexOutOfRange {
            index: i,
            len: items.len(),
        })
}

fn add(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => checked(BinaryOp::Add, a + b).map(Value::Number),
        (Value::Str(_), _) | (_, Value::Str(_)) => {
            Ok(Value::Str(Arc::from(format!("{left}{right}"))))
        }
        _ => Err(mismatch(BinaryOp::Add, left, right)),
    }
}

fn numeric_operands(op: BinaryOp, left: &Value, right: &Value) -> Result<(f64, f64)> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        _ => Err(mismatch(op, left, right)),
    }
}

fn arithmetic(op: BinaryOp, a: f64, b: f64) -> Result<f64> {
    match op {
        BinaryOp::Sub => checked(op, a - b),
        BinaryOp::Mul => checked(op, a * b),
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(Error::DivisionByZero);
            }
            checked(op, a / b)
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(Error::ModuloByZero);
            }
            if a.is_infinite() || b.is_infinite() {
                return Err(Error::overflow(op.symbol()));
            }
            checked(op, a % b)
        }
        BinaryOp::Pow => power(a, b),
        _ => Err(Error::invalid_argument(format!("'{op}' is not arithmetic"))),
    }
}

fn checked(op: BinaryOp, result: f64) -> Result<f64> {
    if result.is_finite() {
        Ok(result)
    } else {
        Err(Error::overflow(op.symbol()))
    }
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> Error {
    Error::type_coercion(format!(
        "cannot apply '{op}' to {} and {}",
        left.type_name(),
        right.type_name()
    ))
}
