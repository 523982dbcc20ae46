// interp.rs — Reference IR interpreter
//
// A small sequential evaluator used to check that transformed IR has the
// same observable store side effects as its source. Every loop kind runs
// serially (that is the reference semantics the optimizer must preserve);
// predicated loads read zero in masked-off lanes and predicated stores skip
// them.
//
// Preconditions: every buffer the statement reads or writes (other than
//   those it allocates itself) is bound before `run`.
// Postconditions: buffer contents reflect all executed stores, in order.
// Failure modes: unbound names, out-of-bounds accesses, division by zero —
//   reported as `EvalError`, never panics.
// Side effects: mutates only the interpreter's own buffer map.

use std::collections::HashMap;
use std::fmt;

use crate::ir::{Expr, ExprKind, Stmt, StmtKind, Type, TypeKind};
use crate::scope::Scope;

// ── Values ─────────────────────────────────────────────────────────────────

/// A runtime value: one lane per element. Integer arithmetic wraps at 32
/// bits, matching the simplifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(Vec<i64>),
    UInt(Vec<u64>),
    Float(Vec<f64>),
}

impl Value {
    pub fn lanes(&self) -> usize {
        match self {
            Value::Int(v) => v.len(),
            Value::UInt(v) => v.len(),
            Value::Float(v) => v.len(),
        }
    }

    fn as_scalar_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    fn as_scalar_bool(&self) -> Option<bool> {
        match self {
            Value::UInt(v) if v.len() == 1 => Some(v[0] != 0),
            _ => None,
        }
    }
}

fn wrap32(v: i64) -> i64 {
    v as i32 as i64
}

// ── Buffers ────────────────────────────────────────────────────────────────

/// Flat storage for one named buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferData {
    Int(Vec<i64>),
    UInt(Vec<u64>),
    Float(Vec<f64>),
}

impl BufferData {
    pub fn len(&self) -> usize {
        match self {
            BufferData::Int(v) => v.len(),
            BufferData::UInt(v) => v.len(),
            BufferData::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn zeros(elem: Type, len: usize) -> BufferData {
        match elem.kind {
            TypeKind::Int => BufferData::Int(vec![0; len]),
            TypeKind::UInt => BufferData::UInt(vec![0; len]),
            TypeKind::Float => BufferData::Float(vec![0.0; len]),
        }
    }
}

// ── Errors ─────────────────────────────────────────────────────────────────

/// Why evaluation stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    UnknownBuffer {
        name: String,
    },
    OutOfBounds {
        name: String,
        index: i64,
        len: usize,
    },
    UnboundVariable {
        name: String,
    },
    UnknownIntrinsic {
        name: String,
    },
    DivisionByZero,
    TypeMismatch {
        context: &'static str,
    },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::UnknownBuffer { name } => write!(f, "unknown buffer '{}'", name),
            EvalError::OutOfBounds { name, index, len } => {
                write!(f, "index {} out of bounds for '{}' (len {})", index, name, len)
            }
            EvalError::UnboundVariable { name } => write!(f, "unbound variable '{}'", name),
            EvalError::UnknownIntrinsic { name } => write!(f, "unknown intrinsic '{}'", name),
            EvalError::DivisionByZero => write!(f, "division by zero"),
            EvalError::TypeMismatch { context } => write!(f, "type mismatch in {}", context),
        }
    }
}

impl std::error::Error for EvalError {}

// ── Interpreter ────────────────────────────────────────────────────────────

/// Evaluates statements against a set of named buffers.
pub struct Interpreter {
    buffers: HashMap<String, BufferData>,
    env: Scope<Value>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter {
            buffers: HashMap::new(),
            env: Scope::new(),
        }
    }

    /// Bind a 32-bit integer buffer.
    pub fn bind_int_buffer(&mut self, name: impl Into<String>, data: Vec<i64>) {
        self.buffers.insert(name.into(), BufferData::Int(data));
    }

    /// Bind a float buffer.
    pub fn bind_float_buffer(&mut self, name: impl Into<String>, data: Vec<f64>) {
        self.buffers.insert(name.into(), BufferData::Float(data));
    }

    /// Bind a scalar variable for the duration of the run (an external
    /// parameter such as a loop bound).
    pub fn bind_var(&mut self, name: impl Into<String>, value: i64) {
        self.env.push(name, Value::Int(vec![value]));
    }

    /// Bind a scalar boolean variable (an external predicate).
    pub fn bind_bool_var(&mut self, name: impl Into<String>, value: bool) {
        self.env.push(name, Value::UInt(vec![value as u64]));
    }

    pub fn buffer(&self, name: &str) -> Option<&BufferData> {
        self.buffers.get(name)
    }

    /// Execute `s` against the bound buffers.
    pub fn run(&mut self, s: &Stmt) -> Result<(), EvalError> {
        self.exec(s)
    }

    /// Evaluate a scalar integer expression under the current bindings.
    pub fn eval_scalar_int(&mut self, e: &Expr) -> Result<i64, EvalError> {
        self.eval(e)?
            .as_scalar_int()
            .ok_or(EvalError::TypeMismatch {
                context: "scalar int expression",
            })
    }

    // ── Statements ──

    fn exec(&mut self, s: &Stmt) -> Result<(), EvalError> {
        match s.kind() {
            StmtKind::LetStmt { name, value, body } => {
                let v = self.eval(value)?;
                self.env.push(name.clone(), v);
                let r = self.exec(body);
                self.env.pop(name);
                r
            }
            StmtKind::Store {
                name,
                value,
                index,
                predicate,
            } => {
                let value = self.eval(value)?;
                let index = self.eval(index)?;
                let predicate = self.eval(predicate)?;
                self.store(name, &value, &index, &predicate)
            }
            StmtKind::Block(stmts) => {
                for c in stmts {
                    self.exec(c)?;
                }
                Ok(())
            }
            StmtKind::For {
                name,
                min,
                extent,
                body,
                ..
            } => {
                let min = self
                    .eval(min)?
                    .as_scalar_int()
                    .ok_or(EvalError::TypeMismatch { context: "loop min" })?;
                let extent = self
                    .eval(extent)?
                    .as_scalar_int()
                    .ok_or(EvalError::TypeMismatch {
                        context: "loop extent",
                    })?;
                for k in 0..extent.max(0) {
                    self.env.push(name.clone(), Value::Int(vec![wrap32(min + k)]));
                    let r = self.exec(body);
                    self.env.pop(name);
                    r?;
                }
                Ok(())
            }
            StmtKind::IfThenElse {
                cond,
                then_case,
                else_case,
            } => {
                let cond = self
                    .eval(cond)?
                    .as_scalar_bool()
                    .ok_or(EvalError::TypeMismatch { context: "if cond" })?;
                if cond {
                    self.exec(then_case)
                } else if let Some(else_case) = else_case {
                    self.exec(else_case)
                } else {
                    Ok(())
                }
            }
            StmtKind::ProducerConsumer { body, .. } => self.exec(body),
            StmtKind::Allocate {
                name,
                elem,
                extents,
                condition,
                body,
                ..
            } => {
                let cond = self
                    .eval(condition)?
                    .as_scalar_bool()
                    .ok_or(EvalError::TypeMismatch {
                        context: "allocate cond",
                    })?;
                let shadowed = if cond {
                    let mut len = 1i64;
                    for e in extents {
                        let extent =
                            self.eval(e)?
                                .as_scalar_int()
                                .ok_or(EvalError::TypeMismatch {
                                    context: "allocate extent",
                                })?;
                        len *= extent.max(0);
                    }
                    self.buffers
                        .insert(name.clone(), BufferData::zeros(*elem, len as usize))
                } else {
                    None
                };
                let r = self.exec(body);
                if cond {
                    match shadowed {
                        Some(old) => {
                            self.buffers.insert(name.clone(), old);
                        }
                        None => {
                            self.buffers.remove(name);
                        }
                    }
                }
                r
            }
        }
    }

    fn store(
        &mut self,
        name: &str,
        value: &Value,
        index: &Value,
        predicate: &Value,
    ) -> Result<(), EvalError> {
        let idx = match index {
            Value::Int(v) => v,
            _ => return Err(EvalError::TypeMismatch { context: "store index" }),
        };
        let pred = match predicate {
            Value::UInt(v) => v,
            _ => {
                return Err(EvalError::TypeMismatch {
                    context: "store predicate",
                })
            }
        };
        let buf = self
            .buffers
            .get_mut(name)
            .ok_or_else(|| EvalError::UnknownBuffer {
                name: name.to_string(),
            })?;
        let len = buf.len();
        for lane in 0..idx.len() {
            if pred[lane] == 0 {
                continue;
            }
            let i = idx[lane];
            if i < 0 || i as usize >= len {
                return Err(EvalError::OutOfBounds {
                    name: name.to_string(),
                    index: i,
                    len,
                });
            }
            match (&mut *buf, value) {
                (BufferData::Int(data), Value::Int(v)) => data[i as usize] = wrap32(v[lane]),
                (BufferData::UInt(data), Value::UInt(v)) => data[i as usize] = v[lane],
                (BufferData::Float(data), Value::Float(v)) => data[i as usize] = v[lane],
                _ => return Err(EvalError::TypeMismatch { context: "store value" }),
            }
        }
        Ok(())
    }

    // ── Expressions ──

    fn eval(&mut self, e: &Expr) -> Result<Value, EvalError> {
        match e.kind() {
            ExprKind::IntImm(v) => Ok(Value::Int(vec![*v])),
            ExprKind::UIntImm(v) => Ok(Value::UInt(vec![*v])),
            ExprKind::FloatImm(v) => Ok(Value::Float(vec![*v])),
            ExprKind::Variable(name) => {
                self.env
                    .get(name)
                    .cloned()
                    .ok_or_else(|| EvalError::UnboundVariable { name: name.clone() })
            }
            ExprKind::Add(a, b) => self.arith(a, b, |x, y| x + y, |x, y| x + y),
            ExprKind::Sub(a, b) => self.arith(a, b, |x, y| x - y, |x, y| x - y),
            ExprKind::Mul(a, b) => self.arith(a, b, |x, y| x * y, |x, y| x * y),
            ExprKind::Div(a, b) => {
                let a = self.eval(a)?;
                let b = self.eval(b)?;
                match (a, b) {
                    (Value::Int(x), Value::Int(y)) => {
                        let mut out = Vec::with_capacity(x.len());
                        for (x, y) in x.iter().zip(&y) {
                            if *y == 0 {
                                return Err(EvalError::DivisionByZero);
                            }
                            out.push(wrap32(x / y));
                        }
                        Ok(Value::Int(out))
                    }
                    (Value::Float(x), Value::Float(y)) => {
                        Ok(Value::Float(x.iter().zip(&y).map(|(x, y)| x / y).collect()))
                    }
                    _ => Err(EvalError::TypeMismatch { context: "div" }),
                }
            }
            ExprKind::Min(a, b) => self.arith(a, b, |x, y| x.min(y), |x, y| x.min(y)),
            ExprKind::Max(a, b) => self.arith(a, b, |x, y| x.max(y), |x, y| x.max(y)),
            ExprKind::Eq(a, b) => self.compare(a, b, |o| o == std::cmp::Ordering::Equal),
            ExprKind::Ne(a, b) => self.compare(a, b, |o| o != std::cmp::Ordering::Equal),
            ExprKind::Lt(a, b) => self.compare(a, b, |o| o == std::cmp::Ordering::Less),
            ExprKind::Le(a, b) => self.compare(a, b, |o| o != std::cmp::Ordering::Greater),
            ExprKind::Gt(a, b) => self.compare(a, b, |o| o == std::cmp::Ordering::Greater),
            ExprKind::Ge(a, b) => self.compare(a, b, |o| o != std::cmp::Ordering::Less),
            ExprKind::And(a, b) => self.boolean(a, b, |x, y| x && y),
            ExprKind::Or(a, b) => self.boolean(a, b, |x, y| x || y),
            ExprKind::Not(a) => {
                let a = self.eval(a)?;
                match a {
                    Value::UInt(v) => {
                        Ok(Value::UInt(v.iter().map(|x| (*x == 0) as u64).collect()))
                    }
                    _ => Err(EvalError::TypeMismatch { context: "not" }),
                }
            }
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            } => {
                let base = self
                    .eval(base)?
                    .as_scalar_int()
                    .ok_or(EvalError::TypeMismatch { context: "ramp base" })?;
                let stride = self
                    .eval(stride)?
                    .as_scalar_int()
                    .ok_or(EvalError::TypeMismatch {
                        context: "ramp stride",
                    })?;
                Ok(Value::Int(
                    (0..*lanes as i64).map(|k| wrap32(base + k * stride)).collect(),
                ))
            }
            ExprKind::Broadcast { value, lanes } => {
                let v = self.eval(value)?;
                Ok(match v {
                    Value::Int(x) => Value::Int(vec![x[0]; *lanes as usize]),
                    Value::UInt(x) => Value::UInt(vec![x[0]; *lanes as usize]),
                    Value::Float(x) => Value::Float(vec![x[0]; *lanes as usize]),
                })
            }
            ExprKind::Load {
                name,
                index,
                predicate,
                ..
            } => {
                let index = self.eval(index)?;
                let predicate = self.eval(predicate)?;
                self.load(e.ty(), name, &index, &predicate)
            }
            ExprKind::Let { name, value, body } => {
                let v = self.eval(value)?;
                self.env.push(name.clone(), v);
                let r = self.eval(body);
                self.env.pop(name);
                r
            }
            ExprKind::Call { name, .. } => Err(EvalError::UnknownIntrinsic { name: name.clone() }),
        }
    }

    fn load(
        &self,
        ty: Type,
        name: &str,
        index: &Value,
        predicate: &Value,
    ) -> Result<Value, EvalError> {
        let idx = match index {
            Value::Int(v) => v,
            _ => return Err(EvalError::TypeMismatch { context: "load index" }),
        };
        let pred = match predicate {
            Value::UInt(v) => v,
            _ => {
                return Err(EvalError::TypeMismatch {
                    context: "load predicate",
                })
            }
        };
        let buf = self.buffers.get(name).ok_or_else(|| EvalError::UnknownBuffer {
            name: name.to_string(),
        })?;
        let len = buf.len();
        let lanes = idx.len();
        // Masked-off lanes read zero and skip the bounds check.
        let fetch = |lane: usize| -> Result<Option<usize>, EvalError> {
            if pred[lane] == 0 {
                return Ok(None);
            }
            let i = idx[lane];
            if i < 0 || i as usize >= len {
                return Err(EvalError::OutOfBounds {
                    name: name.to_string(),
                    index: i,
                    len,
                });
            }
            Ok(Some(i as usize))
        };
        match (ty.kind, buf) {
            (TypeKind::Int, BufferData::Int(data)) => {
                let mut out = vec![0i64; lanes];
                for lane in 0..lanes {
                    if let Some(i) = fetch(lane)? {
                        out[lane] = data[i];
                    }
                }
                Ok(Value::Int(out))
            }
            (TypeKind::UInt, BufferData::UInt(data)) => {
                let mut out = vec![0u64; lanes];
                for lane in 0..lanes {
                    if let Some(i) = fetch(lane)? {
                        out[lane] = data[i];
                    }
                }
                Ok(Value::UInt(out))
            }
            (TypeKind::Float, BufferData::Float(data)) => {
                let mut out = vec![0.0f64; lanes];
                for lane in 0..lanes {
                    if let Some(i) = fetch(lane)? {
                        out[lane] = data[i];
                    }
                }
                Ok(Value::Float(out))
            }
            _ => Err(EvalError::TypeMismatch { context: "load type" }),
        }
    }

    fn arith(
        &mut self,
        a: &Expr,
        b: &Expr,
        fi: impl Fn(i64, i64) -> i64,
        ff: impl Fn(f64, f64) -> f64,
    ) -> Result<Value, EvalError> {
        let a = self.eval(a)?;
        let b = self.eval(b)?;
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => Ok(Value::Int(
                x.iter().zip(&y).map(|(x, y)| wrap32(fi(*x, *y))).collect(),
            )),
            (Value::UInt(x), Value::UInt(y)) => Ok(Value::UInt(
                x.iter()
                    .zip(&y)
                    .map(|(x, y)| fi(*x as i64, *y as i64) as u64)
                    .collect(),
            )),
            (Value::Float(x), Value::Float(y)) => Ok(Value::Float(
                x.iter().zip(&y).map(|(x, y)| ff(*x, *y)).collect(),
            )),
            _ => Err(EvalError::TypeMismatch { context: "arith" }),
        }
    }

    fn compare(
        &mut self,
        a: &Expr,
        b: &Expr,
        admit: impl Fn(std::cmp::Ordering) -> bool,
    ) -> Result<Value, EvalError> {
        let a = self.eval(a)?;
        let b = self.eval(b)?;
        let out: Vec<u64> = match (a, b) {
            (Value::Int(x), Value::Int(y)) => x
                .iter()
                .zip(&y)
                .map(|(x, y)| admit(x.cmp(y)) as u64)
                .collect(),
            (Value::UInt(x), Value::UInt(y)) => x
                .iter()
                .zip(&y)
                .map(|(x, y)| admit(x.cmp(y)) as u64)
                .collect(),
            (Value::Float(x), Value::Float(y)) => x
                .iter()
                .zip(&y)
                .map(|(x, y)| match x.partial_cmp(y) {
                    Some(o) => admit(o) as u64,
                    None => 0,
                })
                .collect(),
            _ => return Err(EvalError::TypeMismatch { context: "compare" }),
        };
        Ok(Value::UInt(out))
    }

    fn boolean(
        &mut self,
        a: &Expr,
        b: &Expr,
        f: impl Fn(bool, bool) -> bool,
    ) -> Result<Value, EvalError> {
        let a = self.eval(a)?;
        let b = self.eval(b)?;
        match (a, b) {
            (Value::UInt(x), Value::UInt(y)) => Ok(Value::UInt(
                x.iter()
                    .zip(&y)
                    .map(|(x, y)| f(*x != 0, *y != 0) as u64)
                    .collect(),
            )),
            _ => Err(EvalError::TypeMismatch { context: "boolean" }),
        }
    }
}
