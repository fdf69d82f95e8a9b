//! Tree-walking interpreter with an explicit function allow-list and a
//! step budget standing in for a CPU limit.

use rand::Rng;

use super::EvalError;
use super::parser::{BinaryOp, Expr, UnaryOp};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    pub fn render(&self) -> String {
        match self {
            Value::Int(n) => n.to_string(),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => format!("{f:.1}"),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bool(_) => "bool",
        }
    }
}

/// Node-visit budget per evaluation.
const MAX_STEPS: u32 = 10_000;

pub struct Interpreter {
    steps: u32,
}

impl Interpreter {
    pub fn new() -> Self {
        Self { steps: 0 }
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(EvalError::BudgetExceeded);
        }

        match expr {
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Unary(op, inner) => {
                let value = self.eval(inner)?;
                self.unary(*op, value)
            }
            Expr::Binary(BinaryOp::And, left, right) => {
                let lhs = self.eval(left)?;
                if !lhs.truthy() {
                    return Ok(lhs);
                }
                self.eval(right)
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                let lhs = self.eval(left)?;
                if lhs.truthy() {
                    return Ok(lhs);
                }
                self.eval(right)
            }
            Expr::Binary(op, left, right) => {
                let lhs = self.eval(left)?;
                let rhs = self.eval(right)?;
                self.binary(*op, lhs, rhs)
            }
            Expr::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                call_function(name, values)
            }
        }
    }

    fn unary(&self, op: UnaryOp, value: Value) -> Result<Value, EvalError> {
        match op {
            UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
            UnaryOp::Neg => match value {
                Value::Int(n) => n.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(EvalError::Type(format!(
                    "cannot negate {}",
                    other.type_name()
                ))),
            },
        }
    }

    fn binary(&self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
        use BinaryOp::*;
        match op {
            Add => match (&lhs, &rhs) {
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
                (Value::Int(a), Value::Int(b)) => a
                    .checked_add(*b)
                    .map(Value::Int)
                    .ok_or(EvalError::Overflow),
                _ => self.numeric(lhs, rhs, |a, b| a + b),
            },
            Sub => match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => a
                    .checked_sub(*b)
                    .map(Value::Int)
                    .ok_or(EvalError::Overflow),
                _ => self.numeric(lhs, rhs, |a, b| a - b),
            },
            Mul => match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => a
                    .checked_mul(*b)
                    .map(Value::Int)
                    .ok_or(EvalError::Overflow),
                _ => self.numeric(lhs, rhs, |a, b| a * b),
            },
            Div => {
                let b = rhs
                    .as_f64()
                    .ok_or_else(|| EvalError::Type("'/' needs numbers".into()))?;
                if b == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                let a = lhs
                    .as_f64()
                    .ok_or_else(|| EvalError::Type("'/' needs numbers".into()))?;
                Ok(Value::Float(a / b))
            }
            Mod => match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => {
                    if *b == 0 {
                        Err(EvalError::DivisionByZero)
                    } else {
                        Ok(Value::Int(a.rem_euclid(*b)))
                    }
                }
                _ => {
                    let a = lhs
                        .as_f64()
                        .ok_or_else(|| EvalError::Type("'%' needs numbers".into()))?;
                    let b = rhs
                        .as_f64()
                        .ok_or_else(|| EvalError::Type("'%' needs numbers".into()))?;
                    if b == 0.0 {
                        Err(EvalError::DivisionByZero)
                    } else {
                        Ok(Value::Float(a.rem_euclid(b)))
                    }
                }
            },
            Eq => Ok(Value::Bool(values_equal(&lhs, &rhs))),
            NotEq => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
            Lt | LtEq | Gt | GtEq => self.ordered(op, lhs, rhs),
            And | Or => unreachable!("short-circuit ops handled in eval"),
        }
    }

    fn numeric(
        &self,
        lhs: Value,
        rhs: Value,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Value, EvalError> {
        match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(f(a, b))),
            _ => Err(EvalError::Type(format!(
                "cannot combine {} and {}",
                lhs.type_name(),
                rhs.type_name()
            ))),
        }
    }

    fn ordered(&self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
        let result = match (&lhs, &rhs) {
            (Value::Str(a), Value::Str(b)) => compare(op, a.cmp(b)),
            _ => {
                let a = lhs.as_f64().ok_or_else(|| {
                    EvalError::Type(format!(
                        "cannot order {} and {}",
                        lhs.type_name(),
                        rhs.type_name()
                    ))
                })?;
                let b = rhs.as_f64().ok_or_else(|| {
                    EvalError::Type(format!(
                        "cannot order {} and {}",
                        lhs.type_name(),
                        rhs.type_name()
                    ))
                })?;
                let ordering = a
                    .partial_cmp(&b)
                    .ok_or_else(|| EvalError::Type("NaN is not orderable".into()))?;
                compare(op, ordering)
            }
        };
        Ok(Value::Bool(result))
    }
}

fn compare(op: BinaryOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        BinaryOp::Lt => ordering == Less,
        BinaryOp::LtEq => ordering != Greater,
        BinaryOp::Gt => ordering == Greater,
        BinaryOp::GtEq => ordering != Less,
        _ => unreachable!(),
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// The entire callable surface of the evaluator. A name missing from this
/// table is a `Forbidden` error, which is what keeps chat-supplied
/// expressions away from I/O and process control.
fn call_function(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    match name {
        "random.randint" => {
            let (lo, hi) = match args.as_slice() {
                [Value::Int(a), Value::Int(b)] => (*a, *b),
                _ => {
                    return Err(EvalError::Type(
                        "random.randint takes two integers".into(),
                    ));
                }
            };
            if lo > hi {
                return Err(EvalError::Type("random.randint: empty range".into()));
            }
            Ok(Value::Int(rand::rng().random_range(lo..=hi)))
        }
        "random.random" => {
            if !args.is_empty() {
                return Err(EvalError::Type("random.random takes no arguments".into()));
            }
            Ok(Value::Float(rand::rng().random::<f64>()))
        }
        "random.choice" => {
            if args.is_empty() {
                return Err(EvalError::Type(
                    "random.choice needs at least one argument".into(),
                ));
            }
            let idx = rand::rng().random_range(0..args.len());
            Ok(args.into_iter().nth(idx).unwrap())
        }
        "min" | "max" => {
            if args.is_empty() {
                return Err(EvalError::Type(format!("{name} needs arguments")));
            }
            let mut best: Option<Value> = None;
            for value in args {
                let v = value
                    .as_f64()
                    .ok_or_else(|| EvalError::Type(format!("{name} needs numbers")))?;
                let replace = match &best {
                    None => true,
                    Some(current) => {
                        let c = current.as_f64().unwrap_or(0.0);
                        if name == "min" { v < c } else { v > c }
                    }
                };
                if replace {
                    best = Some(value);
                }
            }
            Ok(best.unwrap())
        }
        "abs" => match args.as_slice() {
            [Value::Int(n)] => n.checked_abs().map(Value::Int).ok_or(EvalError::Overflow),
            [Value::Float(f)] => Ok(Value::Float(f.abs())),
            _ => Err(EvalError::Type("abs takes one number".into())),
        },
        "len" => match args.as_slice() {
            [Value::Str(s)] => Ok(Value::Int(s.chars().count() as i64)),
            _ => Err(EvalError::Type("len takes one string".into())),
        },
        other => Err(EvalError::Forbidden(other.to_string())),
    }
}
