//! 沙箱内的值类型

use std::fmt;

use crate::sandbox::parser::BinOp;
use crate::sandbox::{SandboxError, SandboxErrorKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
        }
    }
}

fn runtime(msg: impl Into<String>) -> SandboxError {
    SandboxError::new(SandboxErrorKind::Runtime, msg)
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::Null => "null",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0 && !x.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::Null => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn negate(&self) -> Result<Value, SandboxError> {
        match self {
            Value::Int(n) => n
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| runtime("integer overflow")),
            Value::Float(x) => Ok(Value::Float(-x)),
            other => Err(runtime(format!("cannot negate {}", other.type_name()))),
        }
    }

    /// 二元运算；整数运算溢出或除零都是运行时错误
    pub fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, SandboxError> {
        match op {
            BinOp::Eq => Ok(Value::Bool(loose_eq(left, right))),
            BinOp::Ne => Ok(Value::Bool(!loose_eq(left, right))),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(op, left, right),
            BinOp::Add => match (left, right) {
                (Value::Str(a), b) => Ok(Value::Str(format!("{}{}", a, b))),
                (a, Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
                _ => arithmetic(op, left, right),
            },
            _ => arithmetic(op, left, right),
        }
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn compare(op: BinOp, left: &Value, right: &Value) -> Result<Value, SandboxError> {
    let ordering = match (left, right) {
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => {
                return Err(runtime(format!(
                    "cannot compare {} with {}",
                    left.type_name(),
                    right.type_name()
                )))
            }
        },
    };
    let Some(ordering) = ordering else {
        return Ok(Value::Bool(false));
    };
    Ok(Value::Bool(match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    }))
}

fn arithmetic(op: BinOp, left: &Value, right: &Value) -> Result<Value, SandboxError> {
    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        let (a, b) = (*a, *b);
        let result = match op {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::Div | BinOp::Rem if b == 0 => return Err(runtime("division by zero")),
            // 整除时保持整数，否则退化为浮点
            BinOp::Div if a.checked_rem(b) == Some(0) => a.checked_div(b),
            BinOp::Div => return Ok(Value::Float(a as f64 / b as f64)),
            BinOp::Rem => a.checked_rem(b),
            _ => None,
        };
        return result.map(Value::Int).ok_or_else(|| runtime("integer overflow"));
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(runtime(format!(
            "unsupported operand types: {} and {}",
            left.type_name(),
            right.type_name()
        )));
    };
    match op {
        BinOp::Add => Ok(Value::Float(a + b)),
        BinOp::Sub => Ok(Value::Float(a - b)),
        BinOp::Mul => Ok(Value::Float(a * b)),
        BinOp::Div | BinOp::Rem if b == 0.0 => Err(runtime("division by zero")),
        BinOp::Div => Ok(Value::Float(a / b)),
        BinOp::Rem => Ok(Value::Float(a % b)),
        _ => Err(runtime("unsupported operator")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_division() {
        assert_eq!(Value::binary(BinOp::Div, &Value::Int(6), &Value::Int(3)).unwrap(), Value::Int(2));
        assert_eq!(Value::binary(BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap(), Value::Float(3.5));
        let err = Value::binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, SandboxErrorKind::Runtime);
    }

    #[test]
    fn test_overflow_is_runtime_error() {
        let err = Value::binary(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2)).unwrap_err();
        assert!(err.message.contains("overflow"));
    }

    #[test]
    fn test_string_concat_and_compare() {
        assert_eq!(
            Value::binary(BinOp::Add, &Value::Str("n=".into()), &Value::Int(3)).unwrap(),
            Value::Str("n=3".into())
        );
        assert_eq!(
            Value::binary(BinOp::Lt, &Value::Str("a".into()), &Value::Str("b".into())).unwrap(),
            Value::Bool(true)
        );
        assert!(Value::binary(BinOp::Lt, &Value::Str("a".into()), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_mixed_equality() {
        assert_eq!(Value::binary(BinOp::Eq, &Value::Int(1), &Value::Float(1.0)).unwrap(), Value::Bool(true));
        assert_eq!(Value::binary(BinOp::Ne, &Value::Null, &Value::Bool(false)).unwrap(), Value::Bool(true));
    }
}
