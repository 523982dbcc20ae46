// ir.rs — Statement/expression IR node definitions
//
// The IR is a DAG of immutable, reference-counted nodes. `Expr` and `Stmt`
// are cheap clonable handles; node identity (`same_as`/`id`) is the unit of
// sharing that every graph-aware algorithm in this crate keys on.
//
// Preconditions: none (types and constructors only).
// Postconditions: constructors enforce operand-type agreement.
// Failure modes: type-mismatched construction panics (compiler bug).
// Side effects: none.

use std::fmt;
use std::rc::Rc;

// ── Types ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Int,
    UInt,
    Float,
}

/// Scalar or vector element type. Booleans are `UInt` with 1 bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Type {
    pub kind: TypeKind,
    pub bits: u8,
    pub lanes: u32,
}

impl Type {
    pub fn new(kind: TypeKind, bits: u8, lanes: u32) -> Type {
        assert!(lanes >= 1, "type must have at least one lane");
        Type { kind, bits, lanes }
    }

    /// 32-bit signed integer, scalar.
    pub fn int32() -> Type {
        Type::new(TypeKind::Int, 32, 1)
    }

    /// Boolean (1-bit unsigned), scalar.
    pub fn uint1() -> Type {
        Type::new(TypeKind::UInt, 1, 1)
    }

    /// Boolean with the given lane count.
    pub fn bool_of(lanes: u32) -> Type {
        Type::new(TypeKind::UInt, 1, lanes)
    }

    /// 32-bit float, scalar.
    pub fn float32() -> Type {
        Type::new(TypeKind::Float, 32, 1)
    }

    pub fn with_lanes(self, lanes: u32) -> Type {
        Type::new(self.kind, self.bits, lanes)
    }

    /// The scalar type with the same kind and bits.
    pub fn element_of(self) -> Type {
        self.with_lanes(1)
    }

    pub fn is_scalar(self) -> bool {
        self.lanes == 1
    }

    pub fn is_vector(self) -> bool {
        self.lanes > 1
    }

    pub fn is_bool(self) -> bool {
        self.kind == TypeKind::UInt && self.bits == 1
    }

    pub fn is_int32(self) -> bool {
        self.kind == TypeKind::Int && self.bits == 32 && self.lanes == 1
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.kind {
            TypeKind::Int => "int",
            TypeKind::UInt => "uint",
            TypeKind::Float => "float",
        };
        if self.lanes == 1 {
            write!(f, "{}{}", base, self.bits)
        } else {
            write!(f, "{}{}x{}", base, self.bits, self.lanes)
        }
    }
}

// ── Buffer classes ─────────────────────────────────────────────────────────

/// What kind of storage a load reads from. `Image` and `Param` buffers are
/// immutable for the lifetime of the statement; `Intermediate` buffers are
/// mutable unless the load sits inside the matching consume region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferTag {
    Image,
    Param,
    Intermediate,
}

/// Storage class for an `Allocate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Stack,
    Heap,
}

/// Loop execution discipline. Only `Serial` loops carry values across
/// iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForKind {
    Serial,
    Parallel,
    Vectorized,
    Unrolled,
}

// ── Expressions ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ExprKind {
    IntImm(i64),
    UIntImm(u64),
    FloatImm(f64),
    Variable(String),
    Add(Expr, Expr),
    Sub(Expr, Expr),
    Mul(Expr, Expr),
    Div(Expr, Expr),
    Min(Expr, Expr),
    Max(Expr, Expr),
    Eq(Expr, Expr),
    Ne(Expr, Expr),
    Lt(Expr, Expr),
    Le(Expr, Expr),
    Gt(Expr, Expr),
    Ge(Expr, Expr),
    And(Expr, Expr),
    Or(Expr, Expr),
    Not(Expr),
    /// Vector of `lanes` evenly spaced values starting at `base`.
    Ramp {
        base: Expr,
        stride: Expr,
        lanes: u32,
    },
    Broadcast {
        value: Expr,
        lanes: u32,
    },
    /// Read of `name[index]` where the predicate is true, lane-wise.
    Load {
        name: String,
        index: Expr,
        predicate: Expr,
        tag: BufferTag,
    },
    Let {
        name: String,
        value: Expr,
        body: Expr,
    },
    /// Pure intrinsic call. Carries no semantics of its own in this crate;
    /// used as an opaque bundle so several values can be CSE'd jointly.
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug)]
pub struct ExprNode {
    pub ty: Type,
    pub kind: ExprKind,
}

/// Shared immutable handle to an expression node.
#[derive(Debug, Clone)]
pub struct Expr(Rc<ExprNode>);

impl Expr {
    fn new(ty: Type, kind: ExprKind) -> Expr {
        Expr(Rc::new(ExprNode { ty, kind }))
    }

    pub fn ty(&self) -> Type {
        self.0.ty
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    /// Address-based identity key for memo tables. Valid only while the
    /// owning root is held alive; never use it to order iteration.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// True if both handles point at the same node.
    pub fn same_as(&self, other: &Expr) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // ── Immediates and variables ──

    /// 32-bit signed integer immediate.
    pub fn int(v: i64) -> Expr {
        Expr::new(Type::int32(), ExprKind::IntImm(v))
    }

    pub fn int_of(ty: Type, v: i64) -> Expr {
        assert!(ty.is_scalar() && ty.kind == TypeKind::Int);
        Expr::new(ty, ExprKind::IntImm(v))
    }

    pub fn uint_of(ty: Type, v: u64) -> Expr {
        assert!(ty.is_scalar() && ty.kind == TypeKind::UInt);
        Expr::new(ty, ExprKind::UIntImm(v))
    }

    pub fn float(v: f64) -> Expr {
        Expr::new(Type::float32(), ExprKind::FloatImm(v))
    }

    pub fn var(name: impl Into<String>, ty: Type) -> Expr {
        Expr::new(ty, ExprKind::Variable(name.into()))
    }

    /// 32-bit integer variable (the common case for loop indices).
    pub fn ivar(name: impl Into<String>) -> Expr {
        Expr::var(name, Type::int32())
    }

    // ── Arithmetic ──

    pub fn add(a: Expr, b: Expr) -> Expr {
        binop_ty(&a, &b);
        let ty = a.ty();
        Expr::new(ty, ExprKind::Add(a, b))
    }

    pub fn sub(a: Expr, b: Expr) -> Expr {
        binop_ty(&a, &b);
        let ty = a.ty();
        Expr::new(ty, ExprKind::Sub(a, b))
    }

    pub fn mul(a: Expr, b: Expr) -> Expr {
        binop_ty(&a, &b);
        let ty = a.ty();
        Expr::new(ty, ExprKind::Mul(a, b))
    }

    pub fn div(a: Expr, b: Expr) -> Expr {
        binop_ty(&a, &b);
        let ty = a.ty();
        Expr::new(ty, ExprKind::Div(a, b))
    }

    pub fn min(a: Expr, b: Expr) -> Expr {
        binop_ty(&a, &b);
        let ty = a.ty();
        Expr::new(ty, ExprKind::Min(a, b))
    }

    pub fn max(a: Expr, b: Expr) -> Expr {
        binop_ty(&a, &b);
        let ty = a.ty();
        Expr::new(ty, ExprKind::Max(a, b))
    }

    // ── Comparisons (result is boolean with the operand lane count) ──

    pub fn eq(a: Expr, b: Expr) -> Expr {
        binop_ty(&a, &b);
        let ty = Type::bool_of(a.ty().lanes);
        Expr::new(ty, ExprKind::Eq(a, b))
    }

    pub fn ne(a: Expr, b: Expr) -> Expr {
        binop_ty(&a, &b);
        let ty = Type::bool_of(a.ty().lanes);
        Expr::new(ty, ExprKind::Ne(a, b))
    }

    pub fn lt(a: Expr, b: Expr) -> Expr {
        binop_ty(&a, &b);
        let ty = Type::bool_of(a.ty().lanes);
        Expr::new(ty, ExprKind::Lt(a, b))
    }

    pub fn le(a: Expr, b: Expr) -> Expr {
        binop_ty(&a, &b);
        let ty = Type::bool_of(a.ty().lanes);
        Expr::new(ty, ExprKind::Le(a, b))
    }

    pub fn gt(a: Expr, b: Expr) -> Expr {
        binop_ty(&a, &b);
        let ty = Type::bool_of(a.ty().lanes);
        Expr::new(ty, ExprKind::Gt(a, b))
    }

    pub fn ge(a: Expr, b: Expr) -> Expr {
        binop_ty(&a, &b);
        let ty = Type::bool_of(a.ty().lanes);
        Expr::new(ty, ExprKind::Ge(a, b))
    }

    // ── Booleans ──

    pub fn and(a: Expr, b: Expr) -> Expr {
        assert!(a.ty().is_bool() && b.ty().is_bool() && a.ty() == b.ty());
        let ty = a.ty();
        Expr::new(ty, ExprKind::And(a, b))
    }

    pub fn or(a: Expr, b: Expr) -> Expr {
        assert!(a.ty().is_bool() && b.ty().is_bool() && a.ty() == b.ty());
        let ty = a.ty();
        Expr::new(ty, ExprKind::Or(a, b))
    }

    pub fn not(a: Expr) -> Expr {
        assert!(a.ty().is_bool());
        let ty = a.ty();
        Expr::new(ty, ExprKind::Not(a))
    }

    // ── Vectors ──

    pub fn ramp(base: Expr, stride: Expr, lanes: u32) -> Expr {
        assert!(base.ty().is_scalar() && base.ty() == stride.ty());
        assert!(lanes > 1, "ramp must have more than one lane");
        let ty = base.ty().with_lanes(lanes);
        Expr::new(
            ty,
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            },
        )
    }

    pub fn broadcast(value: Expr, lanes: u32) -> Expr {
        assert!(value.ty().is_scalar());
        assert!(lanes > 1, "broadcast must have more than one lane");
        let ty = value.ty().with_lanes(lanes);
        Expr::new(ty, ExprKind::Broadcast { value, lanes })
    }

    // ── Memory and binding ──

    pub fn load(
        ty: Type,
        name: impl Into<String>,
        index: Expr,
        predicate: Expr,
        tag: BufferTag,
    ) -> Expr {
        assert_eq!(index.ty().lanes, ty.lanes, "load index lane mismatch");
        assert!(
            predicate.ty().is_bool() && predicate.ty().lanes == ty.lanes,
            "load predicate lane mismatch"
        );
        Expr::new(
            ty,
            ExprKind::Load {
                name: name.into(),
                index,
                predicate,
                tag,
            },
        )
    }

    pub fn let_in(name: impl Into<String>, value: Expr, body: Expr) -> Expr {
        let ty = body.ty();
        Expr::new(
            ty,
            ExprKind::Let {
                name: name.into(),
                value,
                body,
            },
        )
    }

    pub fn call(ty: Type, name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::new(
            ty,
            ExprKind::Call {
                name: name.into(),
                args,
            },
        )
    }
}

fn binop_ty(a: &Expr, b: &Expr) {
    assert_eq!(a.ty(), b.ty(), "binary operand type mismatch");
}

impl std::ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::add(self, rhs)
    }
}

impl std::ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::sub(self, rhs)
    }
}

impl std::ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::mul(self, rhs)
    }
}

// ── Statements ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum StmtKind {
    LetStmt {
        name: String,
        value: Expr,
        body: Stmt,
    },
    /// Write of `value` to `name[index]` where the predicate is true,
    /// lane-wise.
    Store {
        name: String,
        value: Expr,
        index: Expr,
        predicate: Expr,
    },
    /// Ordered sequence. The smart constructor flattens nested blocks, so
    /// a `Block` never directly contains another `Block`.
    Block(Vec<Stmt>),
    For {
        name: String,
        min: Expr,
        extent: Expr,
        kind: ForKind,
        body: Stmt,
    },
    IfThenElse {
        cond: Expr,
        then_case: Stmt,
        else_case: Option<Stmt>,
    },
    /// Producer or consumer region of the named production.
    ProducerConsumer {
        name: String,
        is_producer: bool,
        body: Stmt,
    },
    Allocate {
        name: String,
        elem: Type,
        memory: MemoryKind,
        extents: Vec<Expr>,
        condition: Expr,
        body: Stmt,
    },
}

#[derive(Debug)]
pub struct StmtNode {
    pub kind: StmtKind,
}

/// Shared immutable handle to a statement node.
#[derive(Debug, Clone)]
pub struct Stmt(Rc<StmtNode>);

impl Stmt {
    fn new(kind: StmtKind) -> Stmt {
        Stmt(Rc::new(StmtNode { kind }))
    }

    pub fn kind(&self) -> &StmtKind {
        &self.0.kind
    }

    /// Address-based identity key for memo tables. Valid only while the
    /// owning root is held alive; never use it to order iteration.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn same_as(&self, other: &Stmt) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn let_stmt(name: impl Into<String>, value: Expr, body: Stmt) -> Stmt {
        Stmt::new(StmtKind::LetStmt {
            name: name.into(),
            value,
            body,
        })
    }

    pub fn store(name: impl Into<String>, value: Expr, index: Expr, predicate: Expr) -> Stmt {
        assert_eq!(
            value.ty().lanes,
            index.ty().lanes,
            "store index lane mismatch"
        );
        assert!(
            predicate.ty().is_bool() && predicate.ty().lanes == value.ty().lanes,
            "store predicate lane mismatch"
        );
        Stmt::new(StmtKind::Store {
            name: name.into(),
            value,
            index,
            predicate,
        })
    }

    /// Build a block from parts, flattening nested blocks. A single child
    /// is returned as itself.
    pub fn block(stmts: Vec<Stmt>) -> Stmt {
        assert!(!stmts.is_empty(), "block must have at least one child");
        let mut flat = Vec::with_capacity(stmts.len());
        for s in stmts {
            match s.kind() {
                StmtKind::Block(children) => flat.extend(children.iter().cloned()),
                _ => flat.push(s),
            }
        }
        if flat.len() == 1 {
            flat.pop().unwrap()
        } else {
            Stmt::new(StmtKind::Block(flat))
        }
    }

    pub fn for_loop(
        name: impl Into<String>,
        min: Expr,
        extent: Expr,
        kind: ForKind,
        body: Stmt,
    ) -> Stmt {
        assert!(min.ty().is_int32() && extent.ty().is_int32());
        Stmt::new(StmtKind::For {
            name: name.into(),
            min,
            extent,
            kind,
            body,
        })
    }

    pub fn if_then_else(cond: Expr, then_case: Stmt, else_case: Option<Stmt>) -> Stmt {
        assert!(cond.ty().is_bool() && cond.ty().is_scalar());
        Stmt::new(StmtKind::IfThenElse {
            cond,
            then_case,
            else_case,
        })
    }

    pub fn producer_consumer(name: impl Into<String>, is_producer: bool, body: Stmt) -> Stmt {
        Stmt::new(StmtKind::ProducerConsumer {
            name: name.into(),
            is_producer,
            body,
        })
    }

    pub fn allocate(
        name: impl Into<String>,
        elem: Type,
        memory: MemoryKind,
        extents: Vec<Expr>,
        condition: Expr,
        body: Stmt,
    ) -> Stmt {
        assert!(condition.ty().is_bool() && condition.ty().is_scalar());
        Stmt::new(StmtKind::Allocate {
            name: name.into(),
            elem,
            memory,
            extents,
            condition,
            body,
        })
    }
}

// ── Trivial constructors and predicates ────────────────────────────────────

/// Zero of the given scalar type.
pub fn make_zero(ty: Type) -> Expr {
    assert!(ty.is_scalar());
    match ty.kind {
        TypeKind::Int => Expr::int_of(ty, 0),
        TypeKind::UInt => Expr::uint_of(ty, 0),
        TypeKind::Float => Expr::float(0.0),
    }
}

/// Boolean true with the given lane count (broadcast when vector).
pub fn const_true(lanes: u32) -> Expr {
    let one = Expr::uint_of(Type::uint1(), 1);
    if lanes == 1 {
        one
    } else {
        Expr::broadcast(one, lanes)
    }
}

pub fn is_const_zero(e: &Expr) -> bool {
    match e.kind() {
        ExprKind::IntImm(v) => *v == 0,
        ExprKind::UIntImm(v) => *v == 0,
        ExprKind::FloatImm(v) => *v == 0.0,
        ExprKind::Broadcast { value, .. } => is_const_zero(value),
        _ => false,
    }
}

pub fn is_const_one(e: &Expr) -> bool {
    match e.kind() {
        ExprKind::IntImm(v) => *v == 1,
        ExprKind::UIntImm(v) => *v == 1,
        ExprKind::FloatImm(v) => *v == 1.0,
        ExprKind::Broadcast { value, .. } => is_const_one(value),
        _ => false,
    }
}

/// The constant value of a scalar integer immediate, if it is one.
pub fn as_const_int(e: &Expr) -> Option<i64> {
    match e.kind() {
        ExprKind::IntImm(v) => Some(*v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_type_is_bool() {
        let a = Expr::ivar("x");
        let b = Expr::int(3);
        let c = Expr::lt(a, b);
        assert_eq!(c.ty(), Type::uint1());
    }

    #[test]
    fn ramp_type_has_lanes() {
        let r = Expr::ramp(Expr::int(0), Expr::int(1), 8);
        assert_eq!(r.ty(), Type::int32().with_lanes(8));
        assert!(r.ty().is_vector());
        assert_eq!(r.ty().element_of(), Type::int32());
    }

    #[test]
    fn block_flattens_nested_blocks() {
        let s = |name: &str| {
            Stmt::store(
                name,
                Expr::int(0),
                Expr::int(0),
                const_true(1),
            )
        };
        let inner = Stmt::block(vec![s("a"), s("b")]);
        let outer = Stmt::block(vec![inner, s("c")]);
        match outer.kind() {
            StmtKind::Block(children) => assert_eq!(children.len(), 3),
            _ => panic!("expected block"),
        }
    }

    #[test]
    fn block_of_one_is_the_child() {
        let s = Stmt::store("a", Expr::int(0), Expr::int(0), const_true(1));
        let b = Stmt::block(vec![s.clone()]);
        assert!(b.same_as(&s));
    }

    #[test]
    fn operator_sugar_builds_nodes() {
        let e = Expr::ivar("i") + Expr::int(1);
        assert!(matches!(e.kind(), ExprKind::Add(_, _)));
        assert_eq!(e.ty(), Type::int32());
    }

    #[test]
    fn const_predicates() {
        assert!(is_const_zero(&Expr::int(0)));
        assert!(!is_const_zero(&Expr::int(2)));
        assert!(is_const_one(&Expr::uint_of(Type::uint1(), 1)));
        assert!(is_const_zero(&Expr::broadcast(Expr::int(0), 4)));
        assert_eq!(as_const_int(&Expr::int(7)), Some(7));
        assert_eq!(as_const_int(&Expr::ivar("x")), None);
    }

    #[test]
    fn identity_is_per_node() {
        let a = Expr::int(1);
        let b = Expr::int(1);
        assert!(!a.same_as(&b));
        let c = a.clone();
        assert!(a.same_as(&c));
    }
}
