//! Operator semantics
//!
//! Operands of different numeric types are promoted to the wider one:
//! money beats float, float beats int. A string combined with a number is
//! parsed as that number's type. Two strings only concatenate and compare.

use std::cmp::Ordering;

use rust_decimal::Decimal;

use crate::bytecode::Cmd;
use crate::error::{ErrorKind, Result};
use crate::value::Value;

/// Common type two operands are brought to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Int,
    Float,
    Money,
    Str,
}

fn kind_of(a: &Value, b: &Value) -> Option<Kind> {
    use Value::*;
    Some(match (a, b) {
        (Money(_), Money(_) | Float(_) | Int(_) | Str(_)) | (Float(_) | Int(_) | Str(_), Money(_)) => Kind::Money,
        (Float(_), Float(_) | Int(_) | Str(_)) | (Int(_) | Str(_), Float(_)) => Kind::Float,
        (Int(_), Int(_) | Str(_)) | (Str(_), Int(_)) => Kind::Int,
        (Str(_), Str(_)) => Kind::Str,
        _ => return None,
    })
}

pub fn unary(cmd: Cmd, value: Value) -> Result<Value> {
    match cmd {
        Cmd::Not => Ok(Value::Bool(!value.is_truthy())),
        Cmd::Sign => match value {
            Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Money(d) => Ok(Value::Money(-d)),
            Value::Str(_) => Ok(Value::Int(value.to_int()?.wrapping_neg())),
            _ => Err(ErrorKind::UnsupportedType.into()),
        },
        _ => Err(ErrorKind::UnsupportedType.into()),
    }
}

pub fn binary(cmd: Cmd, a: Value, b: Value) -> Result<Value> {
    match cmd {
        Cmd::And => return Ok(Value::Bool(a.is_truthy() && b.is_truthy())),
        Cmd::Or => return Ok(Value::Bool(a.is_truthy() || b.is_truthy())),
        _ => {}
    }
    let Some(kind) = kind_of(&a, &b) else {
        return match cmd {
            Cmd::Equal => Ok(Value::Bool(a == b)),
            Cmd::NotEq => Ok(Value::Bool(a != b)),
            _ => Err(ErrorKind::UnsupportedType.into()),
        };
    };
    match kind {
        Kind::Str => strings(cmd, a, b),
        Kind::Int => ints(cmd, a.to_int()?, b.to_int()?),
        Kind::Float => floats(cmd, a.to_float(), b.to_float()),
        Kind::Money => decimals(cmd, a.to_money()?, b.to_money()?),
    }
}

fn compare(cmd: Cmd, ord: Option<Ordering>) -> Result<Value> {
    let Some(ord) = ord else {
        return Ok(Value::Bool(cmd == Cmd::NotEq));
    };
    Ok(Value::Bool(match cmd {
        Cmd::Equal => ord == Ordering::Equal,
        Cmd::NotEq => ord != Ordering::Equal,
        Cmd::Less => ord == Ordering::Less,
        Cmd::NotLess => ord != Ordering::Less,
        Cmd::Great => ord == Ordering::Greater,
        Cmd::NotGreat => ord != Ordering::Greater,
        _ => return Err(ErrorKind::UnsupportedType.into()),
    }))
}

fn strings(cmd: Cmd, a: Value, b: Value) -> Result<Value> {
    let (Value::Str(x), Value::Str(y)) = (a, b) else {
        return Err(ErrorKind::UnsupportedType.into());
    };
    match cmd {
        Cmd::Add => Ok(Value::Str(x + &y)),
        Cmd::Sub | Cmd::Mul | Cmd::Div => Err(ErrorKind::UnsupportedType.into()),
        _ => compare(cmd, Some(x.cmp(&y))),
    }
}

fn ints(cmd: Cmd, x: i64, y: i64) -> Result<Value> {
    Ok(Value::Int(match cmd {
        Cmd::Add => x.wrapping_add(y),
        Cmd::Sub => x.wrapping_sub(y),
        Cmd::Mul => x.wrapping_mul(y),
        Cmd::Div => {
            if y == 0 {
                return Err(ErrorKind::DivisionByZero.into());
            }
            x.wrapping_div(y)
        }
        _ => return compare(cmd, Some(x.cmp(&y))),
    }))
}

fn floats(cmd: Cmd, x: f64, y: f64) -> Result<Value> {
    Ok(Value::Float(match cmd {
        Cmd::Add => x + y,
        Cmd::Sub => x - y,
        Cmd::Mul => x * y,
        Cmd::Div => {
            if y == 0.0 {
                return Err(ErrorKind::DivisionByZero.into());
            }
            x / y
        }
        _ => return compare(cmd, x.partial_cmp(&y)),
    }))
}

fn decimals(cmd: Cmd, x: Decimal, y: Decimal) -> Result<Value> {
    let result = match cmd {
        Cmd::Add => x.checked_add(y),
        Cmd::Sub => x.checked_sub(y),
        Cmd::Mul => x.checked_mul(y),
        Cmd::Div => {
            if y.is_zero() {
                return Err(ErrorKind::DivisionByZero.into());
            }
            x.checked_div(y)
        }
        _ => return compare(cmd, Some(x.cmp(&y))),
    };
    result
        .map(Value::Money)
        .ok_or_else(|| ErrorKind::Extension("decimal overflow".into()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(cmd: Cmd, a: impl Into<Value>, b: impl Into<Value>) -> Result<Value> {
        binary(cmd, a.into(), b.into())
    }

    #[test]
    fn test_promotion() {
        assert_eq!(run(Cmd::Add, 2, 3).unwrap(), Value::Int(5));
        assert_eq!(binary(Cmd::Mul, Value::Int(2), Value::Float(1.5)).unwrap(), Value::Float(3.0));
        assert_eq!(
            binary(Cmd::Add, Value::Money(Decimal::new(15, 1)), Value::Int(1)).unwrap(),
            Value::Money(Decimal::new(25, 1))
        );
        assert_eq!(run(Cmd::Add, 7, "3").unwrap(), Value::Int(10));
        assert_eq!(binary(Cmd::Add, Value::from("0.5"), Value::Float(1.0)).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_strings() {
        assert_eq!(run(Cmd::Add, "ab", "cd").unwrap(), Value::from("abcd"));
        assert_eq!(run(Cmd::Less, "ab", "b").unwrap(), Value::Bool(true));
        assert!(run(Cmd::Sub, "ab", "b").is_err());
        assert_eq!(
            run(Cmd::Add, 1, "x").unwrap_err().kind,
            ErrorKind::InvalidInt("x".into())
        );
    }

    #[test]
    fn test_division_by_zero() {
        for (a, b) in [
            (Value::Int(1), Value::Int(0)),
            (Value::Int(1), Value::from("0")),
            (Value::Float(1.0), Value::Float(0.0)),
            (Value::Money(Decimal::ONE), Value::Int(0)),
        ] {
            assert_eq!(binary(Cmd::Div, a, b).unwrap_err().kind, ErrorKind::DivisionByZero);
        }
    }

    #[test]
    fn test_equality_and_logic() {
        assert_eq!(binary(Cmd::Equal, Value::Nil, Value::Nil).unwrap(), Value::Bool(true));
        assert_eq!(run(Cmd::NotEq, true, false).unwrap(), Value::Bool(true));
        assert_eq!(run(Cmd::Equal, 3, "3").unwrap(), Value::Bool(true));
        assert_eq!(run(Cmd::And, 1, 0).unwrap(), Value::Bool(false));
        assert!(run(Cmd::Add, true, 1).is_err());
        assert_eq!(unary(Cmd::Sign, Value::Int(4)).unwrap(), Value::Int(-4));
        assert_eq!(unary(Cmd::Not, Value::from("")).unwrap(), Value::Bool(true));
    }
}
