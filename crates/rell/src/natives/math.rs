//! Arithmetic and comparison natives. The enfix operator forms dispatch
//! through the same entries.

use std::cmp::Ordering;

use crate::{
    error::{ErrorId, RunError, RunResult},
    eval::Machine,
    heap::HeapId,
    natives::Native,
    value::Value,
};

pub(super) fn call(native: Native, machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    match native {
        Native::Add | Native::Subtract | Native::Multiply | Native::Divide => {
            let a = machine.arg(frame, 0);
            let b = machine.arg(frame, 1);
            arith(machine, native, a, b).map(Some)
        }
        Native::Negate => {
            let value = machine.arg(frame, 0);
            Ok(Some(match value {
                Value::Integer(n) => Value::Integer(
                    n.checked_neg()
                        .ok_or_else(|| RunError::fail(ErrorId::Overflow, "negation overflowed"))?,
                ),
                Value::Decimal(d) => Value::Decimal(-d),
                Value::Pair(x, y) => Value::Pair(-x, -y),
                Value::Time(t) => Value::Time(-t),
                other => {
                    return Err(RunError::fail(
                        ErrorId::InvalidType,
                        format!("cannot negate a {}", other.kind()),
                    ));
                }
            }))
        }
        Native::Equal => {
            let a = machine.arg(frame, 0);
            let b = machine.arg(frame, 1);
            Ok(Some(Value::Logic(machine.values_equal(&a, &b))))
        }
        Native::NotEqual => {
            let a = machine.arg(frame, 0);
            let b = machine.arg(frame, 1);
            Ok(Some(Value::Logic(!machine.values_equal(&a, &b))))
        }
        Native::Lesser | Native::Greater | Native::LesserEqual | Native::GreaterEqual => {
            let a = machine.arg(frame, 0);
            let b = machine.arg(frame, 1);
            let ordering = compare(machine, &a, &b)?;
            let truth = match native {
                Native::Lesser => ordering == Ordering::Less,
                Native::Greater => ordering == Ordering::Greater,
                Native::LesserEqual => ordering != Ordering::Greater,
                Native::GreaterEqual => ordering != Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Some(Value::Logic(truth)))
        }
        Native::Not => {
            let value = machine.arg(frame, 0);
            Ok(Some(Value::Logic(!value.is_truthy())))
        }
        other => unreachable!("{} is not a math native", other.name()),
    }
}

fn arith(machine: &Machine, native: Native, a: Value, b: Value) -> RunResult<Value> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => int_arith(native, x, y),
        (Value::Integer(x), Value::Decimal(y)) => dec_arith(native, x as f64, y).map(Value::Decimal),
        (Value::Decimal(x), Value::Integer(y)) => dec_arith(native, x, y as f64).map(Value::Decimal),
        (Value::Decimal(x), Value::Decimal(y)) => dec_arith(native, x, y).map(Value::Decimal),
        (Value::Pair(x1, y1), Value::Pair(x2, y2)) => Ok(Value::Pair(
            dec_arith(native, x1, x2)?,
            dec_arith(native, y1, y2)?,
        )),
        (Value::Pair(x, y), Value::Integer(n)) => {
            let s = n as f64;
            Ok(Value::Pair(dec_arith(native, x, s)?, dec_arith(native, y, s)?))
        }
        (Value::Time(x), Value::Time(y)) => match native {
            Native::Add => Ok(Value::Time(x + y)),
            Native::Subtract => Ok(Value::Time(x - y)),
            _ => Err(RunError::fail(ErrorId::InvalidType, "times only add and subtract")),
        },
        (Value::Time(t), Value::Integer(n)) => match native {
            Native::Multiply => Ok(Value::Time(t * n)),
            Native::Divide => {
                if n == 0 {
                    Err(RunError::fail(ErrorId::ZeroDivide, "cannot divide by zero"))
                } else {
                    Ok(Value::Time(t / n))
                }
            }
            Native::Add => Ok(Value::Time(t + n * 1_000_000_000)),
            Native::Subtract => Ok(Value::Time(t - n * 1_000_000_000)),
            _ => unreachable!(),
        },
        (Value::Date(d), Value::Integer(n)) => match native {
            Native::Add => Ok(Value::Date(d.add_days(n))),
            Native::Subtract => Ok(Value::Date(d.add_days(-n))),
            _ => Err(RunError::fail(ErrorId::InvalidType, "dates only add and subtract days")),
        },
        (Value::Date(x), Value::Date(y)) if native == Native::Subtract => Ok(Value::Integer(x.days_between(y))),
        (a, b) => {
            let _ = machine;
            Err(RunError::fail(
                ErrorId::InvalidType,
                format!("cannot combine {} with {}", a.kind(), b.kind()),
            ))
        }
    }
}

fn int_arith(native: Native, x: i64, y: i64) -> RunResult<Value> {
    let overflow = || RunError::fail(ErrorId::Overflow, "integer arithmetic overflowed");
    match native {
        Native::Add => x.checked_add(y).map(Value::Integer).ok_or_else(overflow),
        Native::Subtract => x.checked_sub(y).map(Value::Integer).ok_or_else(overflow),
        Native::Multiply => x.checked_mul(y).map(Value::Integer).ok_or_else(overflow),
        Native::Divide => {
            if y == 0 {
                return Err(RunError::fail(ErrorId::ZeroDivide, "cannot divide by zero"));
            }
            // Exact division stays integral; otherwise the result widens.
            if x % y == 0 {
                Ok(Value::Integer(x / y))
            } else {
                Ok(Value::Decimal(x as f64 / y as f64))
            }
        }
        _ => unreachable!(),
    }
}

fn dec_arith(native: Native, x: f64, y: f64) -> RunResult<f64> {
    match native {
        Native::Add => Ok(x + y),
        Native::Subtract => Ok(x - y),
        Native::Multiply => Ok(x * y),
        Native::Divide => {
            if y == 0.0 {
                Err(RunError::fail(ErrorId::ZeroDivide, "cannot divide by zero"))
            } else {
                Ok(x / y)
            }
        }
        _ => unreachable!(),
    }
}

/// Total order for the comparable kinds; mixed numerics coerce, strings
/// compare case-insensitively.
fn compare(machine: &Machine, a: &Value, b: &Value) -> RunResult<Ordering> {
    let ordering = match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Integer(x), Value::Decimal(y)) => compare_f64(*x as f64, *y),
        (Value::Decimal(x), Value::Integer(y)) => compare_f64(*x, *y as f64),
        (Value::Decimal(x), Value::Decimal(y)) => compare_f64(*x, *y),
        (Value::Char(x), Value::Char(y)) => x.cmp(y),
        (Value::Time(x), Value::Time(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.days_between(*y).cmp(&0),
        (Value::Strand(x), Value::Strand(y)) => {
            let sx = machine.heap.text(x.series).str_from(x.index).to_lowercase();
            let sy = machine.heap.text(y.series).str_from(y.index).to_lowercase();
            sx.cmp(&sy)
        }
        _ => {
            return Err(RunError::fail(
                ErrorId::InvalidType,
                format!("cannot order {} against {}", a.kind(), b.kind()),
            ));
        }
    };
    Ok(ordering)
}

fn compare_f64(x: f64, y: f64) -> Ordering {
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}
