// substitute.rs — Substitution and free-variable utilities
//
// Three substitution flavors with different matching disciplines:
//   - `substitute`: by variable name, stopping at shadowing binders;
//   - `graph_substitute`: by node identity, for redirecting one specific
//     shared node everywhere it occurs;
//   - `substitute_in_all_lets`: inlines every let binding, producing a
//     let-free DAG suitable for structural comparison.
// All are memoized on node identity so shared subgraphs are visited once.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::ir::{Expr, ExprKind, Stmt, StmtKind};
use crate::rewrite::{rewrite_expr_children, rewrite_stmt_children};
use crate::scope::Scope;

// ── Name-based substitution ────────────────────────────────────────────────

/// Replace every free occurrence of the variable `name` in `e`.
pub fn substitute_expr(name: &str, replacement: &Expr, e: &Expr) -> Expr {
    let memo = RefCell::new(HashMap::new());
    subst_expr(name, replacement, e, &memo)
}

/// Replace every free occurrence of the variable `name` in `s`.
pub fn substitute(name: &str, replacement: &Expr, s: &Stmt) -> Stmt {
    let expr_memo = RefCell::new(HashMap::new());
    let stmt_memo = RefCell::new(HashMap::new());
    subst_stmt(name, replacement, s, &expr_memo, &stmt_memo)
}

fn subst_expr(
    name: &str,
    replacement: &Expr,
    e: &Expr,
    memo: &RefCell<HashMap<usize, Expr>>,
) -> Expr {
    if let Some(hit) = memo.borrow().get(&e.id()) {
        return hit.clone();
    }
    let out = match e.kind() {
        ExprKind::Variable(n) if n == name => replacement.clone(),
        // A let of the same name shadows: substitute in the value only.
        ExprKind::Let {
            name: bound,
            value,
            body,
        } if bound == name => {
            let nv = subst_expr(name, replacement, value, memo);
            if nv.same_as(value) {
                e.clone()
            } else {
                Expr::let_in(bound.clone(), nv, body.clone())
            }
        }
        _ => rewrite_expr_children(e, &mut |c| subst_expr(name, replacement, c, memo)),
    };
    memo.borrow_mut().insert(e.id(), out.clone());
    out
}

fn subst_stmt(
    name: &str,
    replacement: &Expr,
    s: &Stmt,
    expr_memo: &RefCell<HashMap<usize, Expr>>,
    stmt_memo: &RefCell<HashMap<usize, Stmt>>,
) -> Stmt {
    if let Some(hit) = stmt_memo.borrow().get(&s.id()) {
        return hit.clone();
    }
    let out = match s.kind() {
        StmtKind::LetStmt {
            name: bound,
            value,
            body,
        } if bound == name => {
            let nv = subst_expr(name, replacement, value, expr_memo);
            if nv.same_as(value) {
                s.clone()
            } else {
                Stmt::let_stmt(bound.clone(), nv, body.clone())
            }
        }
        StmtKind::For {
            name: bound,
            min,
            extent,
            kind,
            body,
        } if bound == name => {
            let nm = subst_expr(name, replacement, min, expr_memo);
            let ne = subst_expr(name, replacement, extent, expr_memo);
            if nm.same_as(min) && ne.same_as(extent) {
                s.clone()
            } else {
                Stmt::for_loop(bound.clone(), nm, ne, *kind, body.clone())
            }
        }
        _ => rewrite_stmt_children(
            s,
            &mut |e| subst_expr(name, replacement, e, expr_memo),
            &mut |c| subst_stmt(name, replacement, c, expr_memo, stmt_memo),
        ),
    };
    stmt_memo.borrow_mut().insert(s.id(), out.clone());
    out
}

// ── Identity-based substitution ────────────────────────────────────────────

/// Replace every occurrence of the specific node `needle` (by identity, not
/// structure) in `haystack`, preserving sharing elsewhere.
pub fn graph_substitute(needle: &Expr, replacement: &Expr, haystack: &Stmt) -> Stmt {
    let expr_memo = RefCell::new(HashMap::new());
    let stmt_memo = RefCell::new(HashMap::new());
    graph_subst_stmt(needle, replacement, haystack, &expr_memo, &stmt_memo)
}

/// Expression form of `graph_substitute`.
pub fn graph_substitute_expr(needle: &Expr, replacement: &Expr, haystack: &Expr) -> Expr {
    let memo = RefCell::new(HashMap::new());
    graph_subst_expr(needle, replacement, haystack, &memo)
}

fn graph_subst_expr(
    needle: &Expr,
    replacement: &Expr,
    e: &Expr,
    memo: &RefCell<HashMap<usize, Expr>>,
) -> Expr {
    if e.same_as(needle) {
        return replacement.clone();
    }
    if let Some(hit) = memo.borrow().get(&e.id()) {
        return hit.clone();
    }
    let out = rewrite_expr_children(e, &mut |c| graph_subst_expr(needle, replacement, c, memo));
    memo.borrow_mut().insert(e.id(), out.clone());
    out
}

fn graph_subst_stmt(
    needle: &Expr,
    replacement: &Expr,
    s: &Stmt,
    expr_memo: &RefCell<HashMap<usize, Expr>>,
    stmt_memo: &RefCell<HashMap<usize, Stmt>>,
) -> Stmt {
    if let Some(hit) = stmt_memo.borrow().get(&s.id()) {
        return hit.clone();
    }
    let out = rewrite_stmt_children(
        s,
        &mut |e| graph_subst_expr(needle, replacement, e, expr_memo),
        &mut |c| graph_subst_stmt(needle, replacement, c, expr_memo, stmt_memo),
    );
    stmt_memo.borrow_mut().insert(s.id(), out.clone());
    out
}

// ── Let inlining ───────────────────────────────────────────────────────────

/// Inline every `Let` in `e`, producing a let-free DAG. The memo is keyed on
/// (node, scope generation) because the same shared node can resolve
/// differently under different bindings.
pub fn substitute_in_all_lets_expr(e: &Expr) -> Expr {
    let env = RefCell::new(Scope::new());
    let memo = RefCell::new(HashMap::new());
    inline_expr(e, &env, &memo)
}

/// Inline every `Let` and `LetStmt` in `s`, producing a let-free DAG.
pub fn substitute_in_all_lets(s: &Stmt) -> Stmt {
    let env = RefCell::new(Scope::new());
    let expr_memo = RefCell::new(HashMap::new());
    let stmt_memo = RefCell::new(HashMap::new());
    inline_stmt(s, &env, &expr_memo, &stmt_memo)
}

fn inline_expr(
    e: &Expr,
    env: &RefCell<Scope<Expr>>,
    memo: &RefCell<HashMap<(usize, u64), Expr>>,
) -> Expr {
    let key = (e.id(), env.borrow().generation());
    if let Some(hit) = memo.borrow().get(&key) {
        return hit.clone();
    }
    let out = match e.kind() {
        ExprKind::Variable(n) => match env.borrow().get(n) {
            Some(bound) => bound.clone(),
            None => e.clone(),
        },
        ExprKind::Let { name, value, body } => {
            let v = inline_expr(value, env, memo);
            env.borrow_mut().push(name.clone(), v);
            let b = inline_expr(body, env, memo);
            env.borrow_mut().pop(name);
            b
        }
        _ => rewrite_expr_children(e, &mut |c| inline_expr(c, env, memo)),
    };
    memo.borrow_mut().insert(key, out.clone());
    out
}

fn inline_stmt(
    s: &Stmt,
    env: &RefCell<Scope<Expr>>,
    expr_memo: &RefCell<HashMap<(usize, u64), Expr>>,
    stmt_memo: &RefCell<HashMap<(usize, u64), Stmt>>,
) -> Stmt {
    let key = (s.id(), env.borrow().generation());
    if let Some(hit) = stmt_memo.borrow().get(&key) {
        return hit.clone();
    }
    let out = match s.kind() {
        StmtKind::LetStmt { name, value, body } => {
            let v = inline_expr(value, env, expr_memo);
            env.borrow_mut().push(name.clone(), v);
            let b = inline_stmt(body, env, expr_memo, stmt_memo);
            env.borrow_mut().pop(name);
            b
        }
        _ => rewrite_stmt_children(
            s,
            &mut |e| inline_expr(e, env, expr_memo),
            &mut |c| inline_stmt(c, env, expr_memo, stmt_memo),
        ),
    };
    stmt_memo.borrow_mut().insert(key, out.clone());
    out
}

// ── Free-variable tests ────────────────────────────────────────────────────

/// True if `name` occurs free in `e`.
pub fn expr_uses_var(e: &Expr, name: &str) -> bool {
    let mut memo = HashMap::new();
    uses_var_expr(e, name, &mut memo)
}

/// True if `name` occurs free in `s`.
pub fn stmt_uses_var(s: &Stmt, name: &str) -> bool {
    let mut expr_memo = HashMap::new();
    let mut stmt_memo = HashMap::new();
    uses_var_stmt(s, name, &mut expr_memo, &mut stmt_memo)
}

fn uses_var_expr(e: &Expr, name: &str, memo: &mut HashMap<usize, bool>) -> bool {
    if let Some(&hit) = memo.get(&e.id()) {
        return hit;
    }
    let out = match e.kind() {
        ExprKind::Variable(n) => n == name,
        ExprKind::Let {
            name: bound,
            value,
            body,
        } => {
            // Occurrences under a shadowing binder are not free.
            uses_var_expr(value, name, memo)
                || (bound != name && uses_var_expr(body, name, memo))
        }
        _ => {
            let mut found = false;
            crate::rewrite::for_each_expr_child(e, |c| {
                if !found {
                    found = uses_var_expr(c, name, memo);
                }
            });
            found
        }
    };
    memo.insert(e.id(), out);
    out
}

fn uses_var_stmt(
    s: &Stmt,
    name: &str,
    expr_memo: &mut HashMap<usize, bool>,
    stmt_memo: &mut HashMap<usize, bool>,
) -> bool {
    if let Some(&hit) = stmt_memo.get(&s.id()) {
        return hit;
    }
    let out = match s.kind() {
        StmtKind::LetStmt {
            name: bound,
            value,
            body,
        } => {
            uses_var_expr(value, name, expr_memo)
                || (bound != name && uses_var_stmt(body, name, expr_memo, stmt_memo))
        }
        StmtKind::For {
            name: bound,
            min,
            extent,
            body,
            ..
        } => {
            uses_var_expr(min, name, expr_memo)
                || uses_var_expr(extent, name, expr_memo)
                || (bound != name && uses_var_stmt(body, name, expr_memo, stmt_memo))
        }
        _ => {
            let (exprs, stmts) = crate::rewrite::stmt_children(s);
            exprs.iter().any(|e| uses_var_expr(e, name, expr_memo))
                || stmts
                    .iter()
                    .any(|c| uses_var_stmt(c, name, expr_memo, stmt_memo))
        }
    };
    stmt_memo.insert(s.id(), out);
    out
}
