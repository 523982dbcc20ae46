// carry.rs — Loop-carry elimination
//
// Rewrites serial loops so that a load whose address next iteration equals
// the address some other load uses this iteration is serviced from a small
// stack scratch buffer instead of being re-issued. The pass is conservative
// and infallible: any analysis failure (non-linear index, unprovable
// equality, unsafe buffer, non-serial loop) leaves that site untouched.
//
// Shape of the transform, per admitted chain of n related load groups:
//   - an n-slot scratch buffer allocated just outside the loop;
//   - slots 0..n-1 pre-filled before the first iteration (prologue, spliced
//     outside the loop with the loop variable at its min);
//   - each iteration loads only the leading edge into slot n-1, reads all
//     n slots from scratch, then slides slots 1..n down by one;
//   - the whole construct guarded by extent > 0 so the prologue cannot run
//     for an empty loop.
//
// Preconditions: input is a well-typed statement tree.
// Postconditions: store side effects are preserved exactly, in order.
// Failure modes: none (ineligible sites pass through unchanged).
// Side effects: none; fresh names come from a per-invocation generator.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::cse::{common_subexpression_elimination, common_subexpression_elimination_stmt};
use crate::equality::graph_equal;
use crate::ir::{
    const_true, is_const_one, is_const_zero, make_zero, BufferTag, Expr, ExprKind, ForKind,
    MemoryKind, Stmt, StmtKind, Type, TypeKind,
};
use crate::names::NameGen;
use crate::rewrite::{for_each_expr_child, rewrite_expr_children, rewrite_stmt_children,
    stmt_children};
use crate::scope::Scope;
use crate::simplify::{can_prove, simplify};
use crate::substitute::{graph_substitute, stmt_uses_var, substitute, substitute_in_all_lets,
    substitute_in_all_lets_expr};

// ── Linearity ──────────────────────────────────────────────────────────────

/// If `e` varies linearly with the variables in `scope`, return its
/// per-iteration step. `Some(step)` means linear; `None` means unknown.
/// Variables bound in the scope carry their own step (`None` marks a
/// binding known to be non-linear); unbound variables are external
/// constants with step zero. Only 32-bit integer expressions classify.
pub fn is_linear(e: &Expr, scope: &Scope<Option<Expr>>) -> Option<Expr> {
    if e.ty().kind != TypeKind::Int || e.ty().bits != 32 {
        return None;
    }
    match e.kind() {
        ExprKind::Variable(name) => match scope.get(name) {
            Some(step) => step.clone(),
            None => Some(make_zero(e.ty().element_of())),
        },
        ExprKind::IntImm(_) => Some(make_zero(e.ty())),
        ExprKind::Add(a, b) => {
            let la = is_linear(a, scope);
            let lb = is_linear(b, scope);
            if lb.as_ref().is_some_and(is_const_zero) {
                la
            } else if la.as_ref().is_some_and(is_const_zero) {
                lb
            } else if let (Some(la), Some(lb)) = (la, lb) {
                Some(la + lb)
            } else {
                None
            }
        }
        ExprKind::Sub(a, b) => {
            let la = is_linear(a, scope);
            let lb = is_linear(b, scope);
            if lb.as_ref().is_some_and(is_const_zero) {
                la
            } else if let (Some(la), Some(lb)) = (la, lb) {
                Some(la - lb)
            } else {
                None
            }
        }
        ExprKind::Mul(a, b) => {
            let la = is_linear(a, scope);
            let lb = is_linear(b, scope);
            let la_zero = la.as_ref().is_some_and(is_const_zero);
            let lb_zero = lb.as_ref().is_some_and(is_const_zero);
            if la_zero && lb_zero {
                la
            } else if la_zero && lb.is_some() {
                Some(a.clone() * lb.unwrap())
            } else if la.is_some() && lb_zero {
                Some(la.unwrap() * b.clone())
            } else {
                None
            }
        }
        ExprKind::Ramp { base, stride, .. } => {
            let lb = is_linear(stride, scope);
            if lb.as_ref().is_some_and(is_const_zero) {
                is_linear(base, scope)
            } else {
                None
            }
        }
        ExprKind::Broadcast { value, .. } => is_linear(value, scope),
        _ => None,
    }
}

// ── Forward stepping ───────────────────────────────────────────────────────

struct StepForwards<'a> {
    linear: &'a Scope<Option<Expr>>,
    memo: HashMap<usize, Expr>,
    success: bool,
}

impl StepForwards<'_> {
    fn mutate(&mut self, e: &Expr) -> Expr {
        if let Some(hit) = self.memo.get(&e.id()) {
            return hit.clone();
        }
        let out = match e.kind() {
            ExprKind::Variable(name) => match self.linear.get(name) {
                // Bound but non-linear: the whole traversal fails.
                Some(None) => {
                    self.success = false;
                    e.clone()
                }
                Some(Some(step)) if is_const_zero(step) => e.clone(),
                Some(Some(step)) => {
                    let step = if e.ty().is_vector() && step.ty().is_scalar() {
                        Expr::broadcast(step.clone(), e.ty().lanes)
                    } else {
                        step.clone()
                    };
                    e.clone() + step
                }
                // Unbound: an external constant.
                None => e.clone(),
            },
            _ => rewrite_expr_children(e, &mut |c| self.mutate(c)),
        };
        self.memo.insert(e.id(), out.clone());
        out
    }
}

/// The value `e` takes one loop iteration later, assuming every variable in
/// `scope` advances by its step. Returns `None` when `e` depends on a
/// binding known to be non-linear. The result is canonicalized (CSE, then
/// simplification, then let inlining) so it is directly comparable against
/// other indices.
pub fn step_forwards(e: &Expr, scope: &Scope<Option<Expr>>) -> Option<Expr> {
    let mut step = StepForwards {
        linear: scope,
        memo: HashMap::new(),
        success: true,
    };
    let stepped = step.mutate(e);
    if !step.success {
        return None;
    }
    // Reduce to canonical form. The stepped value is a full graph, so CSE
    // first, then simplify, then inline the introduced lets back out.
    let stepped = common_subexpression_elimination(&stepped);
    let stepped = simplify(&stepped);
    Some(substitute_in_all_lets_expr(&stepped))
}

// ── Load discovery ─────────────────────────────────────────────────────────

/// Collect the distinct top-level `Load` nodes of `s`, in discovery order.
/// Loads nested inside another load's index are not candidates and are not
/// visited.
fn find_loads(s: &Stmt) -> Vec<Expr> {
    fn walk_expr(e: &Expr, seen: &mut HashSet<usize>, out: &mut Vec<Expr>) {
        if !seen.insert(e.id()) {
            return;
        }
        if matches!(e.kind(), ExprKind::Load { .. }) {
            out.push(e.clone());
            return;
        }
        for_each_expr_child(e, |c| walk_expr(c, seen, out));
    }
    fn walk_stmt(s: &Stmt, seen: &mut HashSet<usize>, out: &mut Vec<Expr>) {
        if !seen.insert(s.id()) {
            return;
        }
        let (exprs, stmts) = stmt_children(s);
        for e in &exprs {
            walk_expr(e, seen, out);
        }
        for c in &stmts {
            walk_stmt(c, seen, out);
        }
    }
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    walk_stmt(s, &mut seen, &mut out);
    out
}

fn load_parts(e: &Expr) -> (&str, &Expr, &Expr, BufferTag) {
    match e.kind() {
        ExprKind::Load {
            name,
            index,
            predicate,
            tag,
        } => (name, index, predicate, *tag),
        _ => unreachable!("load group member is not a load"),
    }
}

/// Address of slot `i` in a scratch buffer of element type `t`: a plain
/// offset for scalars, a dense ramp for vectors.
fn scratch_index(i: i64, t: Type) -> Expr {
    if t.is_scalar() {
        Expr::int(i)
    } else {
        Expr::ramp(
            Expr::int(i * t.lanes as i64),
            Expr::int(1),
            t.lanes,
        )
    }
}

// ── Per-loop rewriter ──────────────────────────────────────────────────────

struct ScratchAllocation {
    name: String,
    elem: Type,
    size: i64,
    initial_stores: Stmt,
}

/// Carries loads over a single serial loop body. Collects the scratch
/// allocations the driver must splice in around the loop.
struct CarryOverLoop<'a> {
    /// Vars that step linearly with loop iterations (`None` = non-linear).
    linear: Scope<Option<Expr>>,
    /// Lexically containing lets, innermost last. Prologues lifted past
    /// them get rewrapped in the ones they actually reference.
    containing_lets: Vec<(String, Expr)>,
    /// Productions whose storage is read-only here.
    in_consume: &'a Scope<()>,
    max_carried_values: i32,
    names: &'a mut NameGen,
    allocs: Vec<ScratchAllocation>,
}

impl<'a> CarryOverLoop<'a> {
    fn new(
        loop_var: &str,
        in_consume: &'a Scope<()>,
        max_carried_values: i32,
        names: &'a mut NameGen,
    ) -> CarryOverLoop<'a> {
        let mut linear = Scope::new();
        linear.push(loop_var, Some(Expr::int(1)));
        CarryOverLoop {
            linear,
            containing_lets: Vec::new(),
            in_consume,
            max_carried_values,
            names,
            allocs: Vec::new(),
        }
    }

    fn mutate(&mut self, s: &Stmt) -> Stmt {
        match s.kind() {
            StmtKind::LetStmt { name, value, body } => {
                let step = is_linear(value, &self.linear);
                self.linear.push(name.clone(), step);
                self.containing_lets.push((name.clone(), value.clone()));
                let new_body = self.mutate(body);
                self.containing_lets.pop();
                self.linear.pop(name);
                if new_body.same_as(body) {
                    s.clone()
                } else {
                    Stmt::let_stmt(name.clone(), value.clone(), new_body)
                }
            }
            StmtKind::Store { .. } => self
                .lift_carried_values_out_of_stmt(s)
                .unwrap_or_else(|| s.clone()),
            StmtKind::Block(children) => {
                // A maximal run of consecutive stores is treated as one
                // compound stmt so its loads are jointly visible.
                let children = children.clone();
                let mut result: Vec<Stmt> = Vec::new();
                let mut stores: Vec<Stmt> = Vec::new();
                let mut changed = false;
                for stmt in &children {
                    if matches!(stmt.kind(), StmtKind::Store { .. }) {
                        stores.push(stmt.clone());
                    } else {
                        self.flush_store_run(&mut stores, &mut result, &mut changed);
                        let new_stmt = self.mutate(stmt);
                        changed |= !new_stmt.same_as(stmt);
                        result.push(new_stmt);
                    }
                }
                self.flush_store_run(&mut stores, &mut result, &mut changed);
                if changed {
                    Stmt::block(result)
                } else {
                    s.clone()
                }
            }
            // Don't lift loads out of code that might not run. Stashing
            // values in registers across an inner loop is not a good use
            // of registers either.
            StmtKind::For { .. } | StmtKind::IfThenElse { .. } => s.clone(),
            _ => {
                rewrite_stmt_children(s, &mut |e| e.clone(), &mut |c| self.mutate(c))
            }
        }
    }

    fn flush_store_run(
        &mut self,
        stores: &mut Vec<Stmt>,
        result: &mut Vec<Stmt>,
        changed: &mut bool,
    ) {
        if stores.is_empty() {
            return;
        }
        let run = Stmt::block(std::mem::take(stores));
        match self.lift_carried_values_out_of_stmt(&run) {
            Some(new_run) => {
                *changed = true;
                result.push(new_run);
            }
            None => result.push(run),
        }
    }

    /// The core rewrite. Returns `None` when no carry is taken, leaving the
    /// statement untouched.
    fn lift_carried_values_out_of_stmt(&mut self, orig_stmt: &Stmt) -> Option<Stmt> {
        // Work on the stmt as a graph (lets substituted in). Only
        // graph-aware methods may touch it from here on.
        let graph_stmt = substitute_in_all_lets(orig_stmt);

        let found = find_loads(&graph_stmt);
        trace!(loads = found.len(), "scanning store run for carried loads");

        // Group equal loads. A load is only considered if its backing
        // storage cannot change under us: an immutable image, an input
        // parameter, or a production we are in the consume region of.
        let mut groups: Vec<Vec<Expr>> = Vec::new();
        for load in found {
            let (name, _, _, tag) = load_parts(&load);
            let safe = match tag {
                BufferTag::Image | BufferTag::Param => true,
                BufferTag::Intermediate => self.in_consume.contains(name),
            };
            if !safe {
                continue;
            }
            let mut represented = false;
            for group in &mut groups {
                if graph_equal(&load, &group[0]) {
                    group.push(load.clone());
                    represented = true;
                    break;
                }
            }
            if !represented {
                groups.push(vec![load]);
            }
        }

        // For each group, move the load index forward one loop iteration.
        // CSE'd copies feed the prover so it sees compact expressions.
        let n = groups.len();
        let mut indices = Vec::with_capacity(n);
        let mut next_indices = Vec::with_capacity(n);
        let mut predicates = Vec::with_capacity(n);
        let mut next_predicates = Vec::with_capacity(n);
        let mut indices_csed = Vec::with_capacity(n);
        let mut next_indices_csed = Vec::with_capacity(n);
        let mut predicates_csed = Vec::with_capacity(n);
        let mut next_predicates_csed = Vec::with_capacity(n);
        for group in &groups {
            let (_, index, predicate, _) = load_parts(&group[0]);
            indices.push(index.clone());
            next_indices.push(step_forwards(index, &self.linear));
            predicates.push(predicate.clone());
            next_predicates.push(step_forwards(predicate, &self.linear));

            indices_csed.push(common_subexpression_elimination(index));
            next_indices_csed.push(
                next_indices
                    .last()
                    .unwrap()
                    .as_ref()
                    .map(common_subexpression_elimination),
            );
            predicates_csed.push(common_subexpression_elimination(predicate));
            next_predicates_csed.push(
                next_predicates
                    .last()
                    .unwrap()
                    .as_ref()
                    .map(common_subexpression_elimination),
            );
        }

        // Find loads done this iteration that reappear as some other load
        // next iteration. Structural equality is the fast path; the prover
        // is only consulted on structural mismatch, and only on the CSE'd
        // forms.
        let mut chains: Vec<Vec<usize>> = Vec::new();
        for i in 0..n {
            for j in 0..n {
                // Don't catch loop invariants here.
                if i == j {
                    continue;
                }
                if load_parts(&groups[i][0]).0 != load_parts(&groups[j][0]).0 {
                    continue;
                }
                let Some(next_index) = &next_indices[j] else {
                    continue;
                };
                let index_match = graph_equal(&indices[i], next_index)
                    || (indices[i].ty() == next_index.ty()
                        && can_prove(&Expr::eq(
                            indices_csed[i].clone(),
                            next_indices_csed[j].clone().unwrap(),
                        )));
                if !index_match {
                    continue;
                }
                let Some(next_predicate) = &next_predicates[j] else {
                    continue;
                };
                let predicate_match = graph_equal(&predicates[i], next_predicate)
                    || (predicates[i].ty() == next_predicate.ty()
                        && can_prove(&Expr::eq(
                            predicates_csed[i].clone(),
                            next_predicates_csed[j].clone().unwrap(),
                        )));
                if !predicate_match {
                    continue;
                }
                debug!(from = j, to = i, index = %indices[i], "found carried value");
                chains.push(vec![j, i]);
            }
        }

        if chains.is_empty() {
            return None;
        }

        // Agglomerate chains of carries until no pair concatenates.
        let mut done = false;
        while !done {
            done = true;
            for i in 0..chains.len() {
                if chains[i].is_empty() {
                    continue;
                }
                for j in 0..chains.len() {
                    if i == j || chains[j].is_empty() {
                        continue;
                    }
                    if chains[i].last() == chains[j].first() {
                        let tail: Vec<usize> = chains[j][1..].to_vec();
                        chains[i].extend(tail);
                        chains[j].clear();
                        done = false;
                    }
                }
            }
            // Compact by swap-pop; indices only, never addresses.
            let mut i = 0;
            while i < chains.len() {
                if chains[i].is_empty() {
                    chains.swap_remove(i);
                } else {
                    i += 1;
                }
            }
        }

        // Longest chains reuse the most values per slot; admit them first.
        // The sort must be stable so output IR is identical across runs and
        // platforms.
        chains.sort_by(|a, b| b.len().cmp(&a.len()));

        for chain in &chains {
            debug!(chain = ?chain, "chain of carried values");
        }

        // Only keep the top chains: spraying stack spills everywhere costs
        // more than the reloads. Purely a heuristic.
        let cap = self.max_carried_values.max(0) as usize;
        let mut trimmed: Vec<Vec<usize>> = Vec::new();
        let mut admitted = 0usize;
        for chain in &chains {
            if admitted + chain.len() > cap {
                if admitted < cap.saturating_sub(1) {
                    // Take a partial chain; the remainder still has >= 2
                    // slots so it carries something.
                    trimmed.push(chain[..cap - admitted].to_vec());
                }
                break;
            }
            trimmed.push(chain.clone());
            admitted += chain.len();
        }
        let chains = trimmed;
        if chains.is_empty() {
            return None;
        }

        // Each chain f[x] <- f[x+1] <- ... <- f[x+n-1] has n values, n-1 of
        // which are reusable from the previous iteration through an n-slot
        // scratch buffer.
        let mut leading_edge_stores: Vec<Stmt> = Vec::new();
        let mut scratch_shuffles: Vec<Stmt> = Vec::new();
        let mut core = graph_stmt;

        for chain in &chains {
            let scratch = self.names.fresh('c');
            let mut initial_scratch_values: Vec<Expr> = Vec::new();

            for (slot, &group) in chain.iter().enumerate() {
                let orig_load = groups[group][0].clone();
                let ty = orig_load.ty();
                let scratch_idx = scratch_index(slot as i64, ty);
                // The scratch address is constant, so alignment metadata
                // and predication are trivial.
                let load_from_scratch = Expr::load(
                    ty,
                    scratch.clone(),
                    scratch_idx.clone(),
                    const_true(ty.lanes),
                    BufferTag::Intermediate,
                );
                for member in &groups[group] {
                    core = graph_substitute(member, &load_from_scratch, &core);
                }

                if slot == chain.len() - 1 {
                    // The leading edge: the one live load each iteration.
                    leading_edge_stores.push(Stmt::store(
                        scratch.clone(),
                        orig_load.clone(),
                        scratch_idx,
                        const_true(ty.lanes),
                    ));
                } else {
                    initial_scratch_values.push(orig_load.clone());
                }
                if slot > 0 {
                    // Slide this slot down for the next iteration.
                    scratch_shuffles.push(Stmt::store(
                        scratch.clone(),
                        load_from_scratch,
                        scratch_index(slot as i64 - 1, ty),
                        const_true(ty.lanes),
                    ));
                }
            }

            // The initial values originate from the same index expression,
            // so CSE them jointly: bundle into one pure call, CSE that,
            // peel the lets back off.
            let bundle = Expr::call(
                Type::int32(),
                self.names.fresh('b'),
                initial_scratch_values,
            );
            let mut bundle = simplify(&common_subexpression_elimination(&bundle));
            let mut initial_lets: Vec<(String, Expr)> = Vec::new();
            loop {
                let next = match bundle.kind() {
                    ExprKind::Let { name, value, body } => {
                        initial_lets.push((name.clone(), value.clone()));
                        body.clone()
                    }
                    _ => break,
                };
                bundle = next;
            }
            let initial_scratch_values = match bundle.kind() {
                ExprKind::Call { args, .. } => args.clone(),
                _ => panic!("joint CSE did not preserve the bundling call"),
            };

            let mut initial_scratch_stores: Vec<Stmt> = Vec::new();
            for (slot, value) in initial_scratch_values.iter().enumerate() {
                initial_scratch_stores.push(Stmt::store(
                    scratch.clone(),
                    value.clone(),
                    scratch_index(slot as i64, value.ty()),
                    const_true(value.ty().lanes),
                ));
            }

            let mut initial_stores = Stmt::block(initial_scratch_stores);
            for (name, value) in initial_lets.iter().rev() {
                initial_stores = Stmt::let_stmt(name.clone(), value.clone(), initial_stores);
            }
            // The prologue is lifted out of the containing lets; rewrap it
            // in the ones it actually references, innermost first.
            for (name, value) in self.containing_lets.iter().rev() {
                if stmt_uses_var(&initial_stores, name) {
                    initial_stores = Stmt::let_stmt(name.clone(), value.clone(), initial_stores);
                }
            }

            let ty = groups[chain[0]][0].ty();
            self.allocs.push(ScratchAllocation {
                name: scratch,
                elem: ty.element_of(),
                size: chain.len() as i64 * ty.lanes as i64,
                initial_stores,
            });
        }

        let mut parts = leading_edge_stores;
        parts.push(core);
        parts.extend(scratch_shuffles);
        let out = Stmt::block(parts);
        // Coalesce the scratch-index computations the synthesis introduced.
        Some(common_subexpression_elimination_stmt(&out))
    }
}

// ── Pass driver ────────────────────────────────────────────────────────────

struct LoopCarry {
    max_carried_values: i32,
    in_consume: Scope<()>,
    names: NameGen,
}

impl LoopCarry {
    fn mutate(&mut self, s: &Stmt) -> Stmt {
        match s.kind() {
            StmtKind::ProducerConsumer {
                name,
                is_producer: false,
                body,
            } => {
                self.in_consume.push(name.clone(), ());
                let new_body = self.mutate(body);
                self.in_consume.pop(name);
                if new_body.same_as(body) {
                    s.clone()
                } else {
                    Stmt::producer_consumer(name.clone(), false, new_body)
                }
            }
            StmtKind::For {
                name,
                min,
                extent,
                kind: ForKind::Serial,
                body,
            } if !is_const_one(extent) => {
                // Transform inner loops first, then carry over this one.
                let inner = self.mutate(body);
                let mut carry = CarryOverLoop::new(
                    name,
                    &self.in_consume,
                    self.max_carried_values,
                    &mut self.names,
                );
                let new_body = carry.mutate(&inner);
                let allocs = carry.allocs;

                let mut stmt = if new_body.same_as(body) {
                    s.clone()
                } else {
                    Stmt::for_loop(
                        name.clone(),
                        min.clone(),
                        extent.clone(),
                        ForKind::Serial,
                        new_body,
                    )
                };

                // Inject the scratch allocations. The prologue runs at the
                // first iteration's addresses, so the loop variable becomes
                // the loop min inside it.
                for alloc in &allocs {
                    stmt = Stmt::block(vec![
                        substitute(name, min, &alloc.initial_stores),
                        stmt,
                    ]);
                    stmt = Stmt::allocate(
                        alloc.name.clone(),
                        alloc.elem,
                        MemoryKind::Stack,
                        vec![Expr::int(alloc.size)],
                        const_true(1),
                        stmt,
                    );
                }
                if !allocs.is_empty() {
                    stmt = Stmt::if_then_else(
                        Expr::gt(extent.clone(), Expr::int(0)),
                        stmt,
                        None,
                    );
                }
                stmt
            }
            _ => rewrite_stmt_children(s, &mut |e| e.clone(), &mut |c| self.mutate(c)),
        }
    }
}

/// Carry loads forward across iterations of every eligible serial loop in
/// `s`, keeping at most `max_carried_values` scratch slots live per loop.
/// Pure and conservative: sites that cannot be proven profitable and safe
/// flow through unchanged.
pub fn loop_carry(s: &Stmt, max_carried_values: i32) -> Stmt {
    let mut pass = LoopCarry {
        max_carried_values,
        in_consume: Scope::new(),
        names: NameGen::for_stmt(s),
    };
    pass.mutate(s)
}
