// equality.rs — Structural equality over IR DAGs
//
// Equality respecting sharing: identical handles compare equal without
// descent, and pairs proven equal once are cached so heavily shared DAGs
// compare in time proportional to the number of distinct node pairs rather
// than the number of paths.

use std::collections::HashSet;

use crate::ir::{Expr, ExprKind, Stmt, StmtKind};

/// Structural equality of two expressions.
pub fn graph_equal(a: &Expr, b: &Expr) -> bool {
    let mut cache = EqCache::default();
    cache.exprs_equal(a, b)
}

/// Structural equality of two statements.
pub fn graph_equal_stmt(a: &Stmt, b: &Stmt) -> bool {
    let mut cache = EqCache::default();
    cache.stmts_equal(a, b)
}

#[derive(Default)]
struct EqCache {
    equal_exprs: HashSet<(usize, usize)>,
    equal_stmts: HashSet<(usize, usize)>,
}

impl EqCache {
    fn exprs_equal(&mut self, a: &Expr, b: &Expr) -> bool {
        if a.same_as(b) {
            return true;
        }
        let key = (a.id(), b.id());
        if self.equal_exprs.contains(&key) {
            return true;
        }
        if a.ty() != b.ty() {
            return false;
        }
        let eq = match (a.kind(), b.kind()) {
            (ExprKind::IntImm(x), ExprKind::IntImm(y)) => x == y,
            (ExprKind::UIntImm(x), ExprKind::UIntImm(y)) => x == y,
            (ExprKind::FloatImm(x), ExprKind::FloatImm(y)) => x.to_bits() == y.to_bits(),
            (ExprKind::Variable(x), ExprKind::Variable(y)) => x == y,
            (ExprKind::Add(a1, a2), ExprKind::Add(b1, b2))
            | (ExprKind::Sub(a1, a2), ExprKind::Sub(b1, b2))
            | (ExprKind::Mul(a1, a2), ExprKind::Mul(b1, b2))
            | (ExprKind::Div(a1, a2), ExprKind::Div(b1, b2))
            | (ExprKind::Min(a1, a2), ExprKind::Min(b1, b2))
            | (ExprKind::Max(a1, a2), ExprKind::Max(b1, b2))
            | (ExprKind::Eq(a1, a2), ExprKind::Eq(b1, b2))
            | (ExprKind::Ne(a1, a2), ExprKind::Ne(b1, b2))
            | (ExprKind::Lt(a1, a2), ExprKind::Lt(b1, b2))
            | (ExprKind::Le(a1, a2), ExprKind::Le(b1, b2))
            | (ExprKind::Gt(a1, a2), ExprKind::Gt(b1, b2))
            | (ExprKind::Ge(a1, a2), ExprKind::Ge(b1, b2))
            | (ExprKind::And(a1, a2), ExprKind::And(b1, b2))
            | (ExprKind::Or(a1, a2), ExprKind::Or(b1, b2)) => {
                self.exprs_equal(a1, b1) && self.exprs_equal(a2, b2)
            }
            (ExprKind::Not(x), ExprKind::Not(y)) => self.exprs_equal(x, y),
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
            ) => al == bl && self.exprs_equal(ab, bb) && self.exprs_equal(asr, bs),
            (
                ExprKind::Broadcast {
                    value: av,
                    lanes: al,
                },
                ExprKind::Broadcast {
                    value: bv,
                    lanes: bl,
                },
            ) => al == bl && self.exprs_equal(av, bv),
            (
                ExprKind::Load {
                    name: an,
                    index: ai,
                    predicate: ap,
                    tag: at,
                },
                ExprKind::Load {
                    name: bn,
                    index: bi,
                    predicate: bp,
                    tag: bt,
                },
            ) => an == bn && at == bt && self.exprs_equal(ai, bi) && self.exprs_equal(ap, bp),
            (
                ExprKind::Let {
                    name: an,
                    value: av,
                    body: ab,
                },
                ExprKind::Let {
                    name: bn,
                    value: bv,
                    body: bb,
                },
            ) => an == bn && self.exprs_equal(av, bv) && self.exprs_equal(ab, bb),
            (ExprKind::Call { name: an, args: aa }, ExprKind::Call { name: bn, args: ba }) => {
                an == bn
                    && aa.len() == ba.len()
                    && aa.iter().zip(ba).all(|(x, y)| self.exprs_equal(x, y))
            }
            _ => false,
        };
        if eq {
            self.equal_exprs.insert(key);
        }
        eq
    }

    fn stmts_equal(&mut self, a: &Stmt, b: &Stmt) -> bool {
        if a.same_as(b) {
            return true;
        }
        let key = (a.id(), b.id());
        if self.equal_stmts.contains(&key) {
            return true;
        }
        let eq = match (a.kind(), b.kind()) {
            (
                StmtKind::LetStmt {
                    name: an,
                    value: av,
                    body: ab,
                },
                StmtKind::LetStmt {
                    name: bn,
                    value: bv,
                    body: bb,
                },
            ) => an == bn && self.exprs_equal(av, bv) && self.stmts_equal(ab, bb),
            (
                StmtKind::Store {
                    name: an,
                    value: av,
                    index: ai,
                    predicate: ap,
                },
                StmtKind::Store {
                    name: bn,
                    value: bv,
                    index: bi,
                    predicate: bp,
                },
            ) => {
                an == bn
                    && self.exprs_equal(av, bv)
                    && self.exprs_equal(ai, bi)
                    && self.exprs_equal(ap, bp)
            }
            (StmtKind::Block(xs), StmtKind::Block(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| self.stmts_equal(x, y))
            }
            (
                StmtKind::For {
                    name: an,
                    min: am,
                    extent: ae,
                    kind: ak,
                    body: ab,
                },
                StmtKind::For {
                    name: bn,
                    min: bm,
                    extent: be,
                    kind: bk,
                    body: bb,
                },
            ) => {
                an == bn
                    && ak == bk
                    && self.exprs_equal(am, bm)
                    && self.exprs_equal(ae, be)
                    && self.stmts_equal(ab, bb)
            }
            (
                StmtKind::IfThenElse {
                    cond: ac,
                    then_case: at,
                    else_case: ae,
                },
                StmtKind::IfThenElse {
                    cond: bc,
                    then_case: bt,
                    else_case: be,
                },
            ) => {
                self.exprs_equal(ac, bc)
                    && self.stmts_equal(at, bt)
                    && match (ae, be) {
                        (None, None) => true,
                        (Some(x), Some(y)) => self.stmts_equal(x, y),
                        _ => false,
                    }
            }
            (
                StmtKind::ProducerConsumer {
                    name: an,
                    is_producer: ap,
                    body: ab,
                },
                StmtKind::ProducerConsumer {
                    name: bn,
                    is_producer: bp,
                    body: bb,
                },
            ) => an == bn && ap == bp && self.stmts_equal(ab, bb),
            (
                StmtKind::Allocate {
                    name: an,
                    elem: aty,
                    memory: am,
                    extents: ae,
                    condition: ac,
                    body: ab,
                },
                StmtKind::Allocate {
                    name: bn,
                    elem: bty,
                    memory: bm,
                    extents: be,
                    condition: bc,
                    body: bb,
                },
            ) => {
                an == bn
                    && aty == bty
                    && am == bm
                    && ae.len() == be.len()
                    && ae.iter().zip(be).all(|(x, y)| self.exprs_equal(x, y))
                    && self.exprs_equal(ac, bc)
                    && self.stmts_equal(ab, bb)
            }
            _ => false,
        };
        if eq {
            self.equal_stmts.insert(key);
        }
        eq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{const_true, BufferTag, Type};

    #[test]
    fn structurally_equal_distinct_nodes() {
        let a = Expr::ivar("i") + Expr::int(1);
        let b = Expr::ivar("i") + Expr::int(1);
        assert!(!a.same_as(&b));
        assert!(graph_equal(&a, &b));
    }

    #[test]
    fn different_shapes_are_unequal() {
        let a = Expr::ivar("i") + Expr::int(1);
        let b = Expr::ivar("i") - Expr::int(1);
        assert!(!graph_equal(&a, &b));
        let c = Expr::ivar("j") + Expr::int(1);
        assert!(!graph_equal(&a, &c));
    }

    #[test]
    fn load_equality_includes_name_and_tag() {
        let idx = Expr::ivar("i");
        let a = Expr::load(
            Type::int32(),
            "in",
            idx.clone(),
            const_true(1),
            BufferTag::Image,
        );
        let b = Expr::load(
            Type::int32(),
            "in",
            idx.clone(),
            const_true(1),
            BufferTag::Image,
        );
        let c = Expr::load(Type::int32(), "in", idx, const_true(1), BufferTag::Param);
        assert!(graph_equal(&a, &b));
        assert!(!graph_equal(&a, &c));
    }

    #[test]
    fn shared_subgraphs_compare_without_blowup() {
        // Build two deep towers sharing each level: 2^60 paths if equality
        // were path-based.
        let mut a = Expr::ivar("x");
        let mut b = Expr::ivar("x");
        for _ in 0..60 {
            a = a.clone() + a;
            b = b.clone() + b;
        }
        assert!(graph_equal(&a, &b));
    }
}
