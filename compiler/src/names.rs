// names.rs — Deterministic fresh-name generation
//
// Fresh names are drawn from a per-invocation generator seeded with every
// name the input IR already uses, so the transforms in this crate stay pure
// (no global counters) and produce identical output across runs.

use std::collections::{HashMap, HashSet};

use crate::ir::{Expr, ExprKind, Stmt, StmtKind};
use crate::rewrite::{for_each_expr_child, stmt_children};

/// Fresh-name source. `fresh` never returns a name that occurs in the IR
/// the generator was seeded with, nor the same name twice.
pub struct NameGen {
    taken: HashSet<String>,
    counters: HashMap<char, usize>,
}

impl NameGen {
    pub fn for_stmt(s: &Stmt) -> NameGen {
        let mut taken = HashSet::new();
        let mut seen = HashSet::new();
        collect_stmt(s, &mut taken, &mut seen);
        NameGen {
            taken,
            counters: HashMap::new(),
        }
    }

    pub fn for_expr(e: &Expr) -> NameGen {
        let mut taken = HashSet::new();
        let mut seen = HashSet::new();
        collect_expr(e, &mut taken, &mut seen);
        NameGen {
            taken,
            counters: HashMap::new(),
        }
    }

    /// Next unused name with the given prefix: `c0`, `c1`, ...
    pub fn fresh(&mut self, prefix: char) -> String {
        let counter = self.counters.entry(prefix).or_insert(0);
        loop {
            let candidate = format!("{}{}", prefix, *counter);
            *counter += 1;
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

fn collect_expr(e: &Expr, taken: &mut HashSet<String>, seen: &mut HashSet<usize>) {
    if !seen.insert(e.id()) {
        return;
    }
    match e.kind() {
        ExprKind::Variable(name) => {
            taken.insert(name.clone());
        }
        ExprKind::Load { name, .. } => {
            taken.insert(name.clone());
        }
        ExprKind::Let { name, .. } => {
            taken.insert(name.clone());
        }
        ExprKind::Call { name, .. } => {
            taken.insert(name.clone());
        }
        _ => {}
    }
    for_each_expr_child(e, |c| collect_expr(c, taken, seen));
}

fn collect_stmt(s: &Stmt, taken: &mut HashSet<String>, seen: &mut HashSet<usize>) {
    if !seen.insert(s.id()) {
        return;
    }
    match s.kind() {
        StmtKind::LetStmt { name, .. }
        | StmtKind::Store { name, .. }
        | StmtKind::For { name, .. }
        | StmtKind::ProducerConsumer { name, .. }
        | StmtKind::Allocate { name, .. } => {
            taken.insert(name.clone());
        }
        _ => {}
    }
    let (exprs, stmts) = stmt_children(s);
    for e in &exprs {
        collect_expr(e, taken, seen);
    }
    for c in &stmts {
        collect_stmt(c, taken, seen);
    }
}
