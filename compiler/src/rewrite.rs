// rewrite.rs — IR traversal helpers
//
// Two families: `for_each_*_child` enumerates a node's direct children, and
// `rewrite_*_children` applies a function to each child and reconstructs the
// node only when a child actually changed. Preserving node identity on the
// unchanged path keeps DAG sharing intact and lets callers detect "nothing
// happened" with `same_as`.
//
// Memoization is the caller's job: these helpers are one level deep.

use crate::ir::{Expr, ExprKind, Stmt, StmtKind};

/// Apply `f` to each direct child expression of `e`.
pub fn for_each_expr_child(e: &Expr, mut f: impl FnMut(&Expr)) {
    match e.kind() {
        ExprKind::IntImm(_)
        | ExprKind::UIntImm(_)
        | ExprKind::FloatImm(_)
        | ExprKind::Variable(_) => {}
        ExprKind::Add(a, b)
        | ExprKind::Sub(a, b)
        | ExprKind::Mul(a, b)
        | ExprKind::Div(a, b)
        | ExprKind::Min(a, b)
        | ExprKind::Max(a, b)
        | ExprKind::Eq(a, b)
        | ExprKind::Ne(a, b)
        | ExprKind::Lt(a, b)
        | ExprKind::Le(a, b)
        | ExprKind::Gt(a, b)
        | ExprKind::Ge(a, b)
        | ExprKind::And(a, b)
        | ExprKind::Or(a, b) => {
            f(a);
            f(b);
        }
        ExprKind::Not(a) => f(a),
        ExprKind::Ramp { base, stride, .. } => {
            f(base);
            f(stride);
        }
        ExprKind::Broadcast { value, .. } => f(value),
        ExprKind::Load {
            index, predicate, ..
        } => {
            f(index);
            f(predicate);
        }
        ExprKind::Let { value, body, .. } => {
            f(value);
            f(body);
        }
        ExprKind::Call { args, .. } => {
            for a in args {
                f(a);
            }
        }
    }
}

/// Apply `fe` to each direct child expression and `fs` to each direct child
/// statement of `s`.
pub fn for_each_stmt_child(s: &Stmt, mut fe: impl FnMut(&Expr), mut fs: impl FnMut(&Stmt)) {
    match s.kind() {
        StmtKind::LetStmt { value, body, .. } => {
            fe(value);
            fs(body);
        }
        StmtKind::Store {
            value,
            index,
            predicate,
            ..
        } => {
            fe(value);
            fe(index);
            fe(predicate);
        }
        StmtKind::Block(stmts) => {
            for c in stmts {
                fs(c);
            }
        }
        StmtKind::For {
            min, extent, body, ..
        } => {
            fe(min);
            fe(extent);
            fs(body);
        }
        StmtKind::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            fe(cond);
            fs(then_case);
            if let Some(e) = else_case {
                fs(e);
            }
        }
        StmtKind::ProducerConsumer { body, .. } => fs(body),
        StmtKind::Allocate {
            extents,
            condition,
            body,
            ..
        } => {
            for e in extents {
                fe(e);
            }
            fe(condition);
            fs(body);
        }
    }
}

/// Direct children of `s` as owned handles: expressions first, then
/// statements. Useful when one traversal needs mutable state across both
/// kinds of children.
pub fn stmt_children(s: &Stmt) -> (Vec<Expr>, Vec<Stmt>) {
    let mut exprs = Vec::new();
    let mut stmts = Vec::new();
    for_each_stmt_child(s, |e| exprs.push(e.clone()), |c| stmts.push(c.clone()));
    (exprs, stmts)
}

/// Rewrite each direct child expression of `e` with `f`, rebuilding the node
/// only if some child changed.
pub fn rewrite_expr_children(e: &Expr, f: &mut impl FnMut(&Expr) -> Expr) -> Expr {
    macro_rules! bin {
        ($ctor:path, $a:expr, $b:expr) => {{
            let na = f($a);
            let nb = f($b);
            if na.same_as($a) && nb.same_as($b) {
                e.clone()
            } else {
                $ctor(na, nb)
            }
        }};
    }
    match e.kind() {
        ExprKind::IntImm(_)
        | ExprKind::UIntImm(_)
        | ExprKind::FloatImm(_)
        | ExprKind::Variable(_) => e.clone(),
        ExprKind::Add(a, b) => bin!(Expr::add, a, b),
        ExprKind::Sub(a, b) => bin!(Expr::sub, a, b),
        ExprKind::Mul(a, b) => bin!(Expr::mul, a, b),
        ExprKind::Div(a, b) => bin!(Expr::div, a, b),
        ExprKind::Min(a, b) => bin!(Expr::min, a, b),
        ExprKind::Max(a, b) => bin!(Expr::max, a, b),
        ExprKind::Eq(a, b) => bin!(Expr::eq, a, b),
        ExprKind::Ne(a, b) => bin!(Expr::ne, a, b),
        ExprKind::Lt(a, b) => bin!(Expr::lt, a, b),
        ExprKind::Le(a, b) => bin!(Expr::le, a, b),
        ExprKind::Gt(a, b) => bin!(Expr::gt, a, b),
        ExprKind::Ge(a, b) => bin!(Expr::ge, a, b),
        ExprKind::And(a, b) => bin!(Expr::and, a, b),
        ExprKind::Or(a, b) => bin!(Expr::or, a, b),
        ExprKind::Not(a) => {
            let na = f(a);
            if na.same_as(a) {
                e.clone()
            } else {
                Expr::not(na)
            }
        }
        ExprKind::Ramp {
            base,
            stride,
            lanes,
        } => {
            let nb = f(base);
            let ns = f(stride);
            if nb.same_as(base) && ns.same_as(stride) {
                e.clone()
            } else {
                Expr::ramp(nb, ns, *lanes)
            }
        }
        ExprKind::Broadcast { value, lanes } => {
            let nv = f(value);
            if nv.same_as(value) {
                e.clone()
            } else {
                Expr::broadcast(nv, *lanes)
            }
        }
        ExprKind::Load {
            name,
            index,
            predicate,
            tag,
        } => {
            let ni = f(index);
            let np = f(predicate);
            if ni.same_as(index) && np.same_as(predicate) {
                e.clone()
            } else {
                Expr::load(e.ty(), name.clone(), ni, np, *tag)
            }
        }
        ExprKind::Let { name, value, body } => {
            let nv = f(value);
            let nb = f(body);
            if nv.same_as(value) && nb.same_as(body) {
                e.clone()
            } else {
                Expr::let_in(name.clone(), nv, nb)
            }
        }
        ExprKind::Call { name, args } => {
            let new_args: Vec<Expr> = args.iter().map(|a| f(a)).collect();
            if new_args.iter().zip(args).all(|(n, o)| n.same_as(o)) {
                e.clone()
            } else {
                Expr::call(e.ty(), name.clone(), new_args)
            }
        }
    }
}

/// Rewrite each direct child of `s` (`fe` on expressions, `fs` on
/// statements), rebuilding the node only if some child changed.
pub fn rewrite_stmt_children(
    s: &Stmt,
    fe: &mut impl FnMut(&Expr) -> Expr,
    fs: &mut impl FnMut(&Stmt) -> Stmt,
) -> Stmt {
    match s.kind() {
        StmtKind::LetStmt { name, value, body } => {
            let nv = fe(value);
            let nb = fs(body);
            if nv.same_as(value) && nb.same_as(body) {
                s.clone()
            } else {
                Stmt::let_stmt(name.clone(), nv, nb)
            }
        }
        StmtKind::Store {
            name,
            value,
            index,
            predicate,
        } => {
            let nv = fe(value);
            let ni = fe(index);
            let np = fe(predicate);
            if nv.same_as(value) && ni.same_as(index) && np.same_as(predicate) {
                s.clone()
            } else {
                Stmt::store(name.clone(), nv, ni, np)
            }
        }
        StmtKind::Block(stmts) => {
            let new_stmts: Vec<Stmt> = stmts.iter().map(|c| fs(c)).collect();
            if new_stmts.iter().zip(stmts).all(|(n, o)| n.same_as(o)) {
                s.clone()
            } else {
                Stmt::block(new_stmts)
            }
        }
        StmtKind::For {
            name,
            min,
            extent,
            kind,
            body,
        } => {
            let nm = fe(min);
            let ne = fe(extent);
            let nb = fs(body);
            if nm.same_as(min) && ne.same_as(extent) && nb.same_as(body) {
                s.clone()
            } else {
                Stmt::for_loop(name.clone(), nm, ne, *kind, nb)
            }
        }
        StmtKind::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            let nc = fe(cond);
            let nt = fs(then_case);
            let nelse = else_case.as_ref().map(|e| fs(e));
            let else_unchanged = match (&nelse, else_case) {
                (None, None) => true,
                (Some(n), Some(o)) => n.same_as(o),
                _ => false,
            };
            if nc.same_as(cond) && nt.same_as(then_case) && else_unchanged {
                s.clone()
            } else {
                Stmt::if_then_else(nc, nt, nelse)
            }
        }
        StmtKind::ProducerConsumer {
            name,
            is_producer,
            body,
        } => {
            let nb = fs(body);
            if nb.same_as(body) {
                s.clone()
            } else {
                Stmt::producer_consumer(name.clone(), *is_producer, nb)
            }
        }
        StmtKind::Allocate {
            name,
            elem,
            memory,
            extents,
            condition,
            body,
        } => {
            let new_extents: Vec<Expr> = extents.iter().map(|e| fe(e)).collect();
            let nc = fe(condition);
            let nb = fs(body);
            let extents_unchanged = new_extents.iter().zip(extents).all(|(n, o)| n.same_as(o));
            if extents_unchanged && nc.same_as(condition) && nb.same_as(body) {
                s.clone()
            } else {
                Stmt::allocate(name.clone(), *elem, *memory, new_extents, nc, nb)
            }
        }
    }
}
