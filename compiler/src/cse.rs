// cse.rs — Common subexpression elimination
//
// Global value numbering over the expression DAG: structurally equal
// subexpressions get the same number (identity-memoized, so shared nodes
// are visited once), values reached more than once are extracted into `Let`
// bindings in dependency order, and the rest of the expression is rebuilt
// around variables referencing them.
//
// Statement CSE applies the expression transform to every expression in the
// tree; sharing is per-expression.

use std::collections::HashMap;

use crate::ir::{BufferTag, Expr, ExprKind, Stmt, Type};
use crate::names::NameGen;
use crate::rewrite::{for_each_expr_child, rewrite_expr_children, rewrite_stmt_children};

// ── Value numbering ────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, Hash)]
struct ShapeKey {
    op: u8,
    ty: Type,
    imm: u64,
    name: String,
    aux: u32,
    children: Vec<u32>,
}

struct Entry {
    repr: Expr,
    uses: u32,
}

/// Assigns equal numbers to structurally equal expressions. Also counts how
/// many distinct parent nodes reach each value, which is what the
/// extraction decision needs.
pub(crate) struct ValueNumbering {
    by_identity: HashMap<usize, u32>,
    by_shape: HashMap<ShapeKey, u32>,
    entries: Vec<Entry>,
}

impl ValueNumbering {
    pub(crate) fn new() -> ValueNumbering {
        ValueNumbering {
            by_identity: HashMap::new(),
            by_shape: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Number `e`, numbering unseen children first. Each call (or re-reach
    /// through a different parent) counts as one use.
    pub(crate) fn number(&mut self, e: &Expr) -> u32 {
        if let Some(&id) = self.by_identity.get(&e.id()) {
            self.entries[id as usize].uses += 1;
            return id;
        }
        let mut children = Vec::new();
        for_each_expr_child(e, |c| children.push(self.number(c)));
        let key = shape_key(e, children);
        if let Some(&id) = self.by_shape.get(&key) {
            self.entries[id as usize].uses += 1;
            self.by_identity.insert(e.id(), id);
            return id;
        }
        let id = self.entries.len() as u32;
        self.entries.push(Entry {
            repr: e.clone(),
            uses: 1,
        });
        self.by_shape.insert(key, id);
        self.by_identity.insert(e.id(), id);
        id
    }

    fn id_of(&self, e: &Expr) -> u32 {
        self.by_identity[&e.id()]
    }
}

fn shape_key(e: &Expr, children: Vec<u32>) -> ShapeKey {
    let (op, imm, name, aux) = match e.kind() {
        ExprKind::IntImm(v) => (0u8, *v as u64, String::new(), 0),
        ExprKind::UIntImm(v) => (1, *v, String::new(), 0),
        ExprKind::FloatImm(v) => (2, v.to_bits(), String::new(), 0),
        ExprKind::Variable(n) => (3, 0, n.clone(), 0),
        ExprKind::Add(..) => (4, 0, String::new(), 0),
        ExprKind::Sub(..) => (5, 0, String::new(), 0),
        ExprKind::Mul(..) => (6, 0, String::new(), 0),
        ExprKind::Div(..) => (7, 0, String::new(), 0),
        ExprKind::Min(..) => (8, 0, String::new(), 0),
        ExprKind::Max(..) => (9, 0, String::new(), 0),
        ExprKind::Eq(..) => (10, 0, String::new(), 0),
        ExprKind::Ne(..) => (11, 0, String::new(), 0),
        ExprKind::Lt(..) => (12, 0, String::new(), 0),
        ExprKind::Le(..) => (13, 0, String::new(), 0),
        ExprKind::Gt(..) => (14, 0, String::new(), 0),
        ExprKind::Ge(..) => (15, 0, String::new(), 0),
        ExprKind::And(..) => (16, 0, String::new(), 0),
        ExprKind::Or(..) => (17, 0, String::new(), 0),
        ExprKind::Not(..) => (18, 0, String::new(), 0),
        ExprKind::Ramp { lanes, .. } => (19, 0, String::new(), *lanes),
        ExprKind::Broadcast { lanes, .. } => (20, 0, String::new(), *lanes),
        ExprKind::Load { name, tag, .. } => (
            21,
            0,
            name.clone(),
            match tag {
                BufferTag::Image => 0,
                BufferTag::Param => 1,
                BufferTag::Intermediate => 2,
            },
        ),
        ExprKind::Let { name, .. } => (22, 0, name.clone(), 0),
        ExprKind::Call { name, .. } => (23, 0, name.clone(), 0),
    };
    ShapeKey {
        op,
        ty: e.ty(),
        imm,
        name,
        aux,
        children,
    }
}

// ── Extraction ─────────────────────────────────────────────────────────────

/// Values too cheap to be worth a binding.
fn worth_extracting(e: &Expr) -> bool {
    fn trivial(e: &Expr) -> bool {
        matches!(
            e.kind(),
            ExprKind::IntImm(_)
                | ExprKind::UIntImm(_)
                | ExprKind::FloatImm(_)
                | ExprKind::Variable(_)
        )
    }
    match e.kind() {
        ExprKind::IntImm(_)
        | ExprKind::UIntImm(_)
        | ExprKind::FloatImm(_)
        | ExprKind::Variable(_) => false,
        ExprKind::Broadcast { value, .. } => !trivial(value),
        ExprKind::Ramp { base, stride, .. } => !(trivial(base) && trivial(stride)),
        _ => true,
    }
}

/// Share repeated subexpressions of `e` through `Let` bindings. Values used
/// once are left in place; bindings appear in dependency order (a later
/// binding may reference an earlier one).
pub fn common_subexpression_elimination(e: &Expr) -> Expr {
    let mut vn = ValueNumbering::new();
    let root = vn.number(e);

    let mut names = NameGen::for_expr(e);
    let mut replacements: Vec<Option<Expr>> = vec![None; vn.entries.len()];
    let mut lets: Vec<(String, Expr)> = Vec::new();

    // Entries are in post-order: children strictly precede parents.
    for id in 0..vn.entries.len() {
        let repr = vn.entries[id].repr.clone();
        let rebuilt = rewrite_expr_children(&repr, &mut |c| {
            replacements[vn.id_of(c) as usize]
                .clone()
                .expect("children numbered before parents")
        });
        let extract = vn.entries[id].uses > 1 && worth_extracting(&repr);
        replacements[id] = Some(if extract {
            let name = names.fresh('t');
            let var = Expr::var(name.clone(), repr.ty());
            lets.push((name, rebuilt));
            var
        } else {
            rebuilt
        });
    }

    let mut out = replacements[root as usize].clone().unwrap();
    for (name, value) in lets.into_iter().rev() {
        out = Expr::let_in(name, value, out);
    }
    out
}

/// Apply expression CSE to every expression in `s`.
pub fn common_subexpression_elimination_stmt(s: &Stmt) -> Stmt {
    fn walk(s: &Stmt, memo: &mut HashMap<usize, Stmt>) -> Stmt {
        if let Some(hit) = memo.get(&s.id()) {
            return hit.clone();
        }
        let out = rewrite_stmt_children(
            s,
            &mut |e| common_subexpression_elimination(e),
            &mut |c| walk(c, memo),
        );
        memo.insert(s.id(), out.clone());
        out
    }
    walk(s, &mut HashMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equality::graph_equal;
    use crate::ir::const_true;
    use crate::substitute::substitute_in_all_lets_expr;

    fn i() -> Expr {
        Expr::ivar("i")
    }

    #[test]
    fn repeated_subterm_is_bound_once() {
        // (i + 1) * (i + 1), written as two distinct nodes.
        let e = (i() + Expr::int(1)) * (i() + Expr::int(1));
        let out = common_subexpression_elimination(&e);
        match out.kind() {
            ExprKind::Let { value, body, .. } => {
                assert!(graph_equal(value, &(i() + Expr::int(1))));
                match body.kind() {
                    ExprKind::Mul(a, b) => {
                        assert!(matches!(a.kind(), ExprKind::Variable(_)));
                        assert!(a.same_as(b) || graph_equal(a, b));
                    }
                    _ => panic!("expected mul under let"),
                }
            }
            _ => panic!("expected let"),
        }
        // Inlining the lets recovers the original meaning.
        assert!(graph_equal(&substitute_in_all_lets_expr(&out), &e));
    }

    #[test]
    fn cheap_values_are_not_extracted() {
        let e = (i() + Expr::int(7)) + (i() * Expr::int(7));
        // i and 7 both repeat but are trivial; the result has no lets.
        let out = common_subexpression_elimination(&e);
        assert!(!matches!(out.kind(), ExprKind::Let { .. }));
        assert!(graph_equal(&out, &e));
    }

    #[test]
    fn nested_shared_values_bind_in_dependency_order() {
        let base = i() + Expr::int(1);
        let sq = base.clone() * base.clone();
        let e = sq.clone() + sq.clone();
        let out = common_subexpression_elimination(&e);
        // Outermost let is the inner value (i + 1): dependency order.
        match out.kind() {
            ExprKind::Let { value, body, .. } => {
                assert!(graph_equal(value, &base));
                assert!(matches!(body.kind(), ExprKind::Let { .. }));
            }
            _ => panic!("expected nested lets"),
        }
        assert!(graph_equal(&substitute_in_all_lets_expr(&out), &e));
    }

    #[test]
    fn call_args_share_jointly() {
        // Bundling values into one call lets CSE share across them.
        let a = (i() * Expr::int(4)) + Expr::int(1);
        let b = (i() * Expr::int(4)) + Expr::int(2);
        let bundle = Expr::call(Type::int32(), "b0", vec![a, b]);
        let out = common_subexpression_elimination(&bundle);
        match out.kind() {
            ExprKind::Let { value, .. } => {
                assert!(graph_equal(value, &(i() * Expr::int(4))));
            }
            _ => panic!("expected let around bundle"),
        }
    }

    #[test]
    fn stmt_cse_rewrites_each_expression() {
        let idx = (i() * Expr::int(3)) + (i() * Expr::int(3));
        let store = Stmt::store("out", Expr::int(0), idx, const_true(1));
        let out = common_subexpression_elimination_stmt(&store);
        match out.kind() {
            crate::ir::StmtKind::Store { index, .. } => {
                assert!(matches!(index.kind(), ExprKind::Let { .. }));
            }
            _ => panic!("expected store"),
        }
    }
}
