use std::cmp::Ordering;

use super::error::ExprError;
use super::parser::{BinaryOp, CompareOp, Expr, UnaryOp};
use crate::{Value, ValueMap};

/// Variable bindings visible to an expression; later bindings shadow earlier ones.
#[derive(Debug, Clone, Default)]
pub struct Scope<'a> {
    bindings: Vec<(&'a str, &'a Value)>,
}

impl<'a> Scope<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: &'a str, value: &'a Value) {
        self.bindings.push((name, value));
    }

    /// Bind every entry of a mapping under its key.
    pub fn bind_map(&mut self, map: &'a ValueMap) {
        for (name, value) in map {
            self.bind(name, value);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&'a Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(bound, _)| *bound == name)
            .map(|(_, value)| *value)
    }
}

impl Expr {
    /// Evaluate against `scope`.
    ///
    /// Arithmetic follows the usual dynamic-language rules: integer results
    /// stay integers until they overflow, `/` always yields a float, `//` and
    /// `%` round toward negative infinity, and `and`/`or` return an operand.
    pub fn evaluate(&self, scope: &Scope<'_>) -> Result<Value, ExprError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => scope
                .lookup(name)
                .cloned()
                .ok_or_else(|| ExprError::UnknownVariable(name.clone())),
            Expr::List(items) => items
                .iter()
                .map(|item| item.evaluate(scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Expr::Unary(op, operand) => unary(*op, operand.evaluate(scope)?),
            Expr::Binary(op, left, right) => {
                binary(*op, &left.evaluate(scope)?, &right.evaluate(scope)?)
            }
            Expr::Compare(first, rest) => {
                let mut left = first.evaluate(scope)?;
                for (op, right) in rest {
                    let right = right.evaluate(scope)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::And(left, right) => {
                let left = left.evaluate(scope)?;
                if left.is_truthy() {
                    right.evaluate(scope)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = left.evaluate(scope)?;
                if left.is_truthy() {
                    Ok(left)
                } else {
                    right.evaluate(scope)
                }
            }
            Expr::Not(operand) => Ok(Value::Bool(!operand.evaluate(scope)?.is_truthy())),
            Expr::Index(base, index) => subscript(&base.evaluate(scope)?, &index.evaluate(scope)?),
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|arg| arg.evaluate(scope))
                    .collect::<Result<Vec<_>, _>>()?;
                call(name, args)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Bool(flag) => Some(Num::Int(i64::from(*flag))),
            Value::Int(int) => Some(Num::Int(*int)),
            Value::UInt(uint) => Some(
                i64::try_from(*uint)
                    .map(Num::Int)
                    .unwrap_or(Num::Float(*uint as f64)),
            ),
            Value::Float(float) => Some(Num::Float(*float)),
            _ => None,
        }
    }

    fn float(self) -> f64 {
        match self {
            Num::Int(int) => int as f64,
            Num::Float(float) => float,
        }
    }

    fn value(self) -> Value {
        match self {
            Num::Int(int) => Value::Int(int),
            Num::Float(float) => Value::Float(float),
        }
    }
}

fn unary(op: UnaryOp, operand: Value) -> Result<Value, ExprError> {
    let symbol = match op {
        UnaryOp::Neg => "unary -",
        UnaryOp::Pos => "unary +",
    };
    let num = Num::of(&operand).ok_or(ExprError::BadOperand {
        op: symbol,
        operand: operand.type_name(),
    })?;
    Ok(match (op, num) {
        (UnaryOp::Pos, num) => num.value(),
        (UnaryOp::Neg, Num::Int(int)) => int
            .checked_neg()
            .map_or(Value::Float(-(int as f64)), Value::Int),
        (UnaryOp::Neg, Num::Float(float)) => Value::Float(-float),
    })
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    match (op, left, right) {
        (BinaryOp::Add, Value::Text(a), Value::Text(b)) => return Ok(Value::Text(format!("{a}{b}"))),
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            return Ok(Value::List(a.iter().chain(b).cloned().collect()));
        }
        _ => {}
    }
    let mismatch = || ExprError::TypeMismatch {
        op: op.symbol(),
        left: left.type_name(),
        right: right.type_name(),
    };
    let a = Num::of(left).ok_or_else(mismatch)?;
    let b = Num::of(right).ok_or_else(mismatch)?;
    match (a, b) {
        (Num::Int(a), Num::Int(b)) => int_op(op, a, b),
        _ => float_op(op, a.float(), b.float()),
    }
}

fn int_op(op: BinaryOp, a: i64, b: i64) -> Result<Value, ExprError> {
    let exact = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => return float_op(op, a as f64, b as f64),
        BinaryOp::FloorDiv | BinaryOp::Mod if b == 0 => return Err(ExprError::DivisionByZero),
        BinaryOp::FloorDiv => a.checked_div(b).map(|q| {
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }),
        BinaryOp::Mod => a.checked_rem(b).map(|r| {
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }),
        BinaryOp::Pow => u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp)),
    };
    match exact {
        Some(value) => Ok(Value::Int(value)),
        None => float_op(op, a as f64, b as f64),
    }
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> Result<Value, ExprError> {
    let divides = matches!(op, BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod);
    if divides && b == 0.0 {
        return Err(ExprError::DivisionByZero);
    }
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::FloorDiv => (a / b).floor(),
        BinaryOp::Mod => {
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinaryOp::Pow => a.powf(b),
    };
    Ok(Value::Float(value))
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ExprError> {
    let ordered = |wanted: fn(Ordering) -> bool| {
        ordering(left, right)
            .map(wanted)
            .ok_or(ExprError::TypeMismatch {
                op: op.symbol(),
                left: left.type_name(),
                right: right.type_name(),
            })
    };
    match op {
        CompareOp::Eq => Ok(left.loosely_eq(right)),
        CompareOp::Ne => Ok(!left.loosely_eq(right)),
        CompareOp::Lt => ordered(Ordering::is_lt),
        CompareOp::Le => ordered(Ordering::is_le),
        CompareOp::Gt => ordered(Ordering::is_gt),
        CompareOp::Ge => ordered(Ordering::is_ge),
        CompareOp::In => contains(right, left),
        CompareOp::NotIn => contains(right, left).map(|found| !found),
    }
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Value::Text(a), Value::Text(b)) = (left, right) {
        return Some(a.cmp(b));
    }
    match (Num::of(left)?, Num::of(right)?) {
        (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
        (a, b) => a.float().partial_cmp(&b.float()),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, ExprError> {
    match (haystack, needle) {
        (Value::List(items), _) => Ok(items.iter().any(|item| item.loosely_eq(needle))),
        (Value::Text(text), Value::Text(part)) => Ok(text.contains(part.as_str())),
        (Value::Map(map), Value::Text(key)) => Ok(map.contains_key(key)),
        _ => Err(ExprError::TypeMismatch {
            op: "in",
            left: needle.type_name(),
            right: haystack.type_name(),
        }),
    }
}

fn subscript(base: &Value, index: &Value) -> Result<Value, ExprError> {
    match (base, index) {
        (Value::Map(map), Value::Text(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| ExprError::MissingKey(key.clone())),
        (Value::List(items), _) => {
            let at = position(index, items.len())?;
            Ok(items[at].clone())
        }
        (Value::Text(text), _) => {
            let chars: Vec<char> = text.chars().collect();
            let at = position(index, chars.len())?;
            Ok(Value::Text(chars[at].to_string()))
        }
        _ => Err(ExprError::TypeMismatch {
            op: "[]",
            left: base.type_name(),
            right: index.type_name(),
        }),
    }
}

/// Resolve a possibly negative index against `len`.
fn position(index: &Value, len: usize) -> Result<usize, ExprError> {
    let Some(Num::Int(raw)) = Num::of(index) else {
        return Err(ExprError::BadOperand {
            op: "[]",
            operand: index.type_name(),
        });
    };
    let signed_len = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if raw < 0 { raw + signed_len } else { raw };
    usize::try_from(resolved)
        .ok()
        .filter(|position| *position < len)
        .ok_or(ExprError::IndexOutOfRange { index: raw, len })
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, ExprError> {
    let bad = |message: &str| ExprError::BadArguments {
        function: name.to_string(),
        message: message.to_string(),
    };
    match name {
        "len" => match args.as_slice() {
            [Value::List(items)] => Ok(Value::from_u64(items.len() as u64)),
            [Value::Text(text)] => Ok(Value::from_u64(text.chars().count() as u64)),
            [Value::Map(map)] => Ok(Value::from_u64(map.len() as u64)),
            _ => Err(bad("takes one list, string or map")),
        },
        "abs" => match args.as_slice() {
            [value] => match Num::of(value) {
                Some(Num::Int(int)) => Ok(int
                    .checked_abs()
                    .map_or(Value::Float((int as f64).abs()), Value::Int)),
                Some(Num::Float(float)) => Ok(Value::Float(float.abs())),
                None => Err(bad("takes one number")),
            },
            _ => Err(bad("takes one number")),
        },
        "int" => match args.as_slice() {
            [Value::Text(text)] => text
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| bad("got a non-integer string")),
            [value] => match Num::of(value) {
                Some(Num::Int(int)) => Ok(Value::Int(int)),
                Some(Num::Float(float)) if float.is_finite() => Ok(Value::Int(float.trunc() as i64)),
                _ => Err(bad("takes one number or string")),
            },
            _ => Err(bad("takes one number or string")),
        },
        "float" => match args.as_slice() {
            [Value::Text(text)] => text
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| bad("got a non-numeric string")),
            [value] => Num::of(value)
                .map(|num| Value::Float(num.float()))
                .ok_or_else(|| bad("takes one number or string")),
            _ => Err(bad("takes one number or string")),
        },
        "min" | "max" => {
            let candidates = if let [Value::List(items)] = args.as_slice() {
                items.clone()
            } else {
                args
            };
            let wanted = if name == "min" {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut best: Option<Value> = None;
            for candidate in candidates {
                best = match best {
                    None => Some(candidate),
                    Some(current) => {
                        let order = ordering(&candidate, &current)
                            .ok_or_else(|| bad("got values that cannot be ordered"))?;
                        Some(if order == wanted { candidate } else { current })
                    }
                };
            }
            best.ok_or_else(|| bad("needs at least one value"))
        }
        _ => Err(ExprError::UnknownFunction(name.to_string())),
    }
}
