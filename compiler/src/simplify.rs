// simplify.rs — Algebraic simplification and the best-effort prover
//
// `simplify` canonicalizes scalar integer arithmetic: constants fold, fold
// toward the right operand, and constant chains reassociate, so that two
// expressions denoting the same affine function of a variable usually take
// the same shape. `can_prove` handles the cases shape canonicalization
// misses by comparing linear normal forms over structurally numbered atoms.
//
// Both are pure; `simplify` is idempotent. `can_prove` is sound but
// incomplete: a `true` answer is trustworthy, a `false` answer means
// "could not show it".
//
// Integer arithmetic is 32-bit wrapping, matching the interpreter.

use std::collections::{BTreeMap, HashMap};

use crate::cse::ValueNumbering;
use crate::equality::graph_equal;
use crate::ir::{as_const_int, is_const_one, is_const_zero, make_zero, Expr, ExprKind, Type};
use crate::rewrite::rewrite_expr_children;
use crate::substitute::{substitute_expr, substitute_in_all_lets_expr};

/// Wrap to the IR's 32-bit integer range.
fn wrap32(v: i64) -> i64 {
    v as i32 as i64
}

// ── Simplifier ─────────────────────────────────────────────────────────────

/// Recursively simplify `e`. Idempotent; preserves semantics and types.
pub fn simplify(e: &Expr) -> Expr {
    let mut memo = HashMap::new();
    simplify_memo(e, &mut memo)
}

fn simplify_memo(e: &Expr, memo: &mut HashMap<usize, Expr>) -> Expr {
    if let Some(hit) = memo.get(&e.id()) {
        return hit.clone();
    }
    let with_children = rewrite_expr_children(e, &mut |c| simplify_memo(c, memo));
    let out = apply_rules(&with_children);
    memo.insert(e.id(), out.clone());
    out
}

/// Local rewrite rules. Children are already simplified.
fn apply_rules(e: &Expr) -> Expr {
    match e.kind() {
        ExprKind::Add(a, b) => simp_add(a.clone(), b.clone()),
        ExprKind::Sub(a, b) => simp_sub(a.clone(), b.clone()),
        ExprKind::Mul(a, b) => simp_mul(a.clone(), b.clone()),
        ExprKind::Div(a, b) => simp_div(e, a, b),
        ExprKind::Min(a, b) => {
            match (as_const_int(a), as_const_int(b)) {
                (Some(x), Some(y)) => return Expr::int_of(a.ty(), x.min(y)),
                _ => {}
            }
            if graph_equal(a, b) {
                a.clone()
            } else {
                e.clone()
            }
        }
        ExprKind::Max(a, b) => {
            match (as_const_int(a), as_const_int(b)) {
                (Some(x), Some(y)) => return Expr::int_of(a.ty(), x.max(y)),
                _ => {}
            }
            if graph_equal(a, b) {
                a.clone()
            } else {
                e.clone()
            }
        }
        ExprKind::Eq(a, b) => simp_cmp(e, a, b, |o| o == std::cmp::Ordering::Equal, true),
        ExprKind::Ne(a, b) => simp_cmp(e, a, b, |o| o != std::cmp::Ordering::Equal, false),
        ExprKind::Lt(a, b) => simp_cmp(e, a, b, |o| o == std::cmp::Ordering::Less, false),
        ExprKind::Le(a, b) => simp_cmp(e, a, b, |o| o != std::cmp::Ordering::Greater, true),
        ExprKind::Gt(a, b) => simp_cmp(e, a, b, |o| o == std::cmp::Ordering::Greater, false),
        ExprKind::Ge(a, b) => simp_cmp(e, a, b, |o| o != std::cmp::Ordering::Less, true),
        ExprKind::And(a, b) => {
            if is_const_one(a) {
                b.clone()
            } else if is_const_one(b) {
                a.clone()
            } else if is_const_zero(a) || is_const_zero(b) {
                bool_const(e.ty(), false)
            } else {
                e.clone()
            }
        }
        ExprKind::Or(a, b) => {
            if is_const_zero(a) {
                b.clone()
            } else if is_const_zero(b) {
                a.clone()
            } else if is_const_one(a) || is_const_one(b) {
                bool_const(e.ty(), true)
            } else {
                e.clone()
            }
        }
        ExprKind::Not(a) => match a.kind() {
            ExprKind::Not(inner) => inner.clone(),
            ExprKind::UIntImm(v) => bool_const(e.ty(), *v == 0),
            _ => e.clone(),
        },
        ExprKind::Ramp { base, stride, .. } => {
            if is_const_zero(stride) {
                Expr::broadcast(base.clone(), e.ty().lanes)
            } else {
                e.clone()
            }
        }
        ExprKind::Let { name, value, body } => {
            // Trivial bindings inline away.
            match value.kind() {
                ExprKind::IntImm(_)
                | ExprKind::UIntImm(_)
                | ExprKind::FloatImm(_)
                | ExprKind::Variable(_) => simplify(&substitute_expr(name, value, body)),
                _ => e.clone(),
            }
        }
        _ => e.clone(),
    }
}

fn bool_const(ty: Type, v: bool) -> Expr {
    let one = Expr::uint_of(ty.element_of(), v as u64);
    if ty.is_scalar() {
        one
    } else {
        Expr::broadcast(one, ty.lanes)
    }
}

/// Canonical add: constants fold and migrate to the right.
fn simp_add(a: Expr, b: Expr) -> Expr {
    if let (Some(x), Some(y)) = (as_const_int(&a), as_const_int(&b)) {
        return Expr::int_of(a.ty(), wrap32(x + y));
    }
    if is_const_zero(&a) {
        return b;
    }
    if is_const_zero(&b) {
        return a;
    }
    // Constant operand to the right.
    if as_const_int(&a).is_some() {
        return simp_add(b, a);
    }
    if let Some(c2) = as_const_int(&b) {
        // (x + c1) + c2 → x + (c1 + c2); (x - c1) + c2 likewise.
        match a.kind() {
            ExprKind::Add(x, c1) => {
                if let Some(c1) = as_const_int(c1) {
                    return simp_add(x.clone(), Expr::int_of(b.ty(), wrap32(c1 + c2)));
                }
            }
            ExprKind::Sub(x, c1) => {
                if let Some(c1) = as_const_int(c1) {
                    return simp_add(x.clone(), Expr::int_of(b.ty(), wrap32(c2 - c1)));
                }
            }
            _ => {}
        }
    }
    Expr::add(a, b)
}

/// Canonical sub: subtraction of a constant becomes addition of its
/// negation; identical operands cancel.
fn simp_sub(a: Expr, b: Expr) -> Expr {
    if let (Some(x), Some(y)) = (as_const_int(&a), as_const_int(&b)) {
        return Expr::int_of(a.ty(), wrap32(x - y));
    }
    if is_const_zero(&b) {
        return a;
    }
    if let Some(c) = as_const_int(&b) {
        return simp_add(a, Expr::int_of(b.ty(), wrap32(-c)));
    }
    if graph_equal(&a, &b) {
        return make_zero(a.ty().element_of());
    }
    Expr::sub(a, b)
}

fn simp_mul(a: Expr, b: Expr) -> Expr {
    if let (Some(x), Some(y)) = (as_const_int(&a), as_const_int(&b)) {
        return Expr::int_of(a.ty(), wrap32(x * y));
    }
    if is_const_zero(&a) {
        return a;
    }
    if is_const_zero(&b) {
        return b;
    }
    if is_const_one(&a) {
        return b;
    }
    if is_const_one(&b) {
        return a;
    }
    if as_const_int(&a).is_some() {
        return simp_mul(b, a);
    }
    if let Some(c2) = as_const_int(&b) {
        match a.kind() {
            // (x * c1) * c2 → x * (c1 * c2)
            ExprKind::Mul(x, c1) => {
                if let Some(c1) = as_const_int(c1) {
                    return simp_mul(x.clone(), Expr::int_of(b.ty(), wrap32(c1 * c2)));
                }
            }
            // (x + c1) * c2 → x * c2 + c1 * c2, pulling constants outward.
            ExprKind::Add(x, c1) => {
                if let Some(c1) = as_const_int(c1) {
                    return simp_add(
                        simp_mul(x.clone(), b.clone()),
                        Expr::int_of(b.ty(), wrap32(c1 * c2)),
                    );
                }
            }
            _ => {}
        }
    }
    Expr::mul(a, b)
}

fn simp_div(e: &Expr, a: &Expr, b: &Expr) -> Expr {
    if let (Some(x), Some(y)) = (as_const_int(a), as_const_int(b)) {
        if y != 0 {
            return Expr::int_of(a.ty(), wrap32(x / y));
        }
    }
    if is_const_one(b) {
        return a.clone();
    }
    e.clone()
}

fn simp_cmp(
    e: &Expr,
    a: &Expr,
    b: &Expr,
    admit: impl Fn(std::cmp::Ordering) -> bool,
    equal_operands_answer: bool,
) -> Expr {
    if let (Some(x), Some(y)) = (as_const_int(a), as_const_int(b)) {
        return bool_const(e.ty(), admit(x.cmp(&y)));
    }
    // Identical float operands stay symbolic (NaN compares unequal to
    // itself at runtime).
    if a.ty().kind != crate::ir::TypeKind::Float && graph_equal(a, b) {
        return bool_const(e.ty(), equal_operands_answer);
    }
    // For scalar integers, a constant-valued difference decides equality.
    if a.ty().is_int32() {
        if let ExprKind::Eq(..) = e.kind() {
            if let Some(d) = as_const_int(&simp_sub(a.clone(), b.clone())) {
                return bool_const(e.ty(), d == 0);
            }
        }
        if let ExprKind::Ne(..) = e.kind() {
            if let Some(d) = as_const_int(&simp_sub(a.clone(), b.clone())) {
                return bool_const(e.ty(), d != 0);
            }
        }
    }
    e.clone()
}

// ── Prover ─────────────────────────────────────────────────────────────────

/// Best-effort proof that the boolean `e` always holds. Inlines lets,
/// simplifies, and for integer equalities compares linear normal forms.
/// Sound: never returns `true` for a falsifiable proposition.
pub fn can_prove(e: &Expr) -> bool {
    debug_assert!(e.ty().is_bool());
    let e = substitute_in_all_lets_expr(e);
    let e = simplify(&e);
    if is_const_one(&e) {
        return true;
    }
    if let ExprKind::Eq(a, b) = e.kind() {
        let mut vn = ValueNumbering::new();
        return prove_int_eq(a, b, &mut vn);
    }
    false
}

/// Prove `a == b` for integer operands. Vector shapes recurse lane-wise;
/// scalars compare by linear normal form.
fn prove_int_eq(a: &Expr, b: &Expr, vn: &mut ValueNumbering) -> bool {
    if a.ty().kind != crate::ir::TypeKind::Int {
        return false;
    }
    // Matching vector constructors reduce to their scalar components.
    match (a.kind(), b.kind()) {
        (
            ExprKind::Ramp {
                base: ab,
                stride: asr,
                lanes: al,
            },
            ExprKind::Ramp {
                base: bb,
                stride: bs,
                lanes: bl,
            },
        ) => {
            return al == bl && prove_int_eq(ab, bb, vn) && prove_int_eq(asr, bs, vn);
        }
        (
            ExprKind::Broadcast {
                value: av,
                lanes: al,
            },
            ExprKind::Broadcast {
                value: bv,
                lanes: bl,
            },
        ) => {
            return al == bl && prove_int_eq(av, bv, vn);
        }
        _ => {}
    }
    if a.ty().is_vector() {
        return false;
    }
    let mut terms: BTreeMap<u32, i64> = BTreeMap::new();
    let mut konst = 0i64;
    if linear_terms(a, vn, &mut terms, &mut konst, 1)
        && linear_terms(b, vn, &mut terms, &mut konst, -1)
    {
        wrap32(konst) == 0 && terms.values().all(|&c| wrap32(c) == 0)
    } else {
        false
    }
}

/// Accumulate `sign * e` into a linear combination of structurally numbered
/// atoms. Returns false if `e` is not a linear combination.
fn linear_terms(
    e: &Expr,
    vn: &mut ValueNumbering,
    terms: &mut BTreeMap<u32, i64>,
    konst: &mut i64,
    sign: i64,
) -> bool {
    match e.kind() {
        ExprKind::IntImm(v) => {
            *konst = wrap32(*konst + sign * v);
            true
        }
        ExprKind::Add(a, b) => {
            linear_terms(a, vn, terms, konst, sign) && linear_terms(b, vn, terms, konst, sign)
        }
        ExprKind::Sub(a, b) => {
            linear_terms(a, vn, terms, konst, sign) && linear_terms(b, vn, terms, konst, -sign)
        }
        ExprKind::Mul(a, b) => {
            if let Some(c) = as_const_int(b) {
                linear_terms(a, vn, terms, konst, wrap32(sign * c))
            } else if let Some(c) = as_const_int(a) {
                linear_terms(b, vn, terms, konst, wrap32(sign * c))
            } else {
                let id = vn.number(e);
                *terms.entry(id).or_insert(0) += sign;
                true
            }
        }
        _ => {
            let id = vn.number(e);
            *terms.entry(id).or_insert(0) += sign;
            true
        }
    }
}
