// stencilc — Stencil Compiler mid-end
//
// Statement/expression IR and the loop-carry optimization pass, plus the
// supporting algebra it leans on (simplification, CSE, substitution, graph
// equality) and a reference interpreter for semantics checks.

pub mod carry;
pub mod cse;
pub mod equality;
pub mod interp;
pub mod ir;
pub mod names;
pub mod printer;
pub mod rewrite;
pub mod scope;
pub mod simplify;
pub mod substitute;
