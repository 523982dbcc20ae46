// printer.rs — Textual IR rendering
//
// `Display` for `Expr` and `Stmt`, used by snapshot tests and debugging.
// Output is fully parenthesized for binary operators so shapes are
// unambiguous. Rendering expands sharing (a DAG prints as its unfolding);
// keep printed IR small.

use std::fmt;

use crate::ir::{is_const_one, Expr, ExprKind, ForKind, MemoryKind, Stmt, StmtKind};

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ExprKind::IntImm(v) => write!(f, "{}", v),
            ExprKind::UIntImm(v) => {
                if self.ty().is_bool() {
                    write!(f, "{}", if *v != 0 { "true" } else { "false" })
                } else {
                    write!(f, "{}", v)
                }
            }
            ExprKind::FloatImm(v) => write!(f, "{:?}", v),
            ExprKind::Variable(name) => write!(f, "{}", name),
            ExprKind::Add(a, b) => write!(f, "({} + {})", a, b),
            ExprKind::Sub(a, b) => write!(f, "({} - {})", a, b),
            ExprKind::Mul(a, b) => write!(f, "({}*{})", a, b),
            ExprKind::Div(a, b) => write!(f, "({}/{})", a, b),
            ExprKind::Min(a, b) => write!(f, "min({}, {})", a, b),
            ExprKind::Max(a, b) => write!(f, "max({}, {})", a, b),
            ExprKind::Eq(a, b) => write!(f, "({} == {})", a, b),
            ExprKind::Ne(a, b) => write!(f, "({} != {})", a, b),
            ExprKind::Lt(a, b) => write!(f, "({} < {})", a, b),
            ExprKind::Le(a, b) => write!(f, "({} <= {})", a, b),
            ExprKind::Gt(a, b) => write!(f, "({} > {})", a, b),
            ExprKind::Ge(a, b) => write!(f, "({} >= {})", a, b),
            ExprKind::And(a, b) => write!(f, "({} && {})", a, b),
            ExprKind::Or(a, b) => write!(f, "({} || {})", a, b),
            ExprKind::Not(a) => write!(f, "!{}", a),
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            } => write!(f, "ramp({}, {}, {})", base, stride, lanes),
            ExprKind::Broadcast { value, lanes } => write!(f, "broadcast({}, {})", value, lanes),
            ExprKind::Load {
                name,
                index,
                predicate,
                ..
            } => {
                if is_const_one(predicate) {
                    write!(f, "{}[{}]", name, index)
                } else {
                    write!(f, "({}[{}] when {})", name, index, predicate)
                }
            }
            ExprKind::Let { name, value, body } => {
                write!(f, "(let {} = {} in {})", name, value, body)
            }
            ExprKind::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_stmt(self, f, 0)
    }
}

fn indent(f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        write!(f, "  ")?;
    }
    Ok(())
}

fn fmt_stmt(s: &Stmt, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    match s.kind() {
        StmtKind::LetStmt { name, value, body } => {
            indent(f, depth)?;
            writeln!(f, "let {} = {}", name, value)?;
            fmt_stmt(body, f, depth)
        }
        StmtKind::Store {
            name,
            value,
            index,
            predicate,
        } => {
            indent(f, depth)?;
            if is_const_one(predicate) {
                writeln!(f, "{}[{}] = {}", name, index, value)
            } else {
                writeln!(f, "{}[{}] = {} when {}", name, index, value, predicate)
            }
        }
        StmtKind::Block(stmts) => {
            for c in stmts {
                fmt_stmt(c, f, depth)?;
            }
            Ok(())
        }
        StmtKind::For {
            name,
            min,
            extent,
            kind,
            body,
        } => {
            indent(f, depth)?;
            let head = match kind {
                ForKind::Serial => "for",
                ForKind::Parallel => "parallel",
                ForKind::Vectorized => "vectorized",
                ForKind::Unrolled => "unrolled",
            };
            writeln!(f, "{} ({}, {}, {}) {{", head, name, min, extent)?;
            fmt_stmt(body, f, depth + 1)?;
            indent(f, depth)?;
            writeln!(f, "}}")
        }
        StmtKind::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            indent(f, depth)?;
            writeln!(f, "if ({}) {{", cond)?;
            fmt_stmt(then_case, f, depth + 1)?;
            if let Some(else_case) = else_case {
                indent(f, depth)?;
                writeln!(f, "}} else {{")?;
                fmt_stmt(else_case, f, depth + 1)?;
            }
            indent(f, depth)?;
            writeln!(f, "}}")
        }
        StmtKind::ProducerConsumer {
            name,
            is_producer,
            body,
        } => {
            indent(f, depth)?;
            writeln!(
                f,
                "{} {} {{",
                if *is_producer { "produce" } else { "consume" },
                name
            )?;
            fmt_stmt(body, f, depth + 1)?;
            indent(f, depth)?;
            writeln!(f, "}}")
        }
        StmtKind::Allocate {
            name,
            elem,
            memory,
            extents,
            condition,
            body,
        } => {
            indent(f, depth)?;
            write!(f, "allocate {}[{}", name, elem)?;
            for e in extents {
                write!(f, " * {}", e)?;
            }
            write!(f, "] in {}", match memory {
                MemoryKind::Stack => "stack",
                MemoryKind::Heap => "heap",
            })?;
            if !is_const_one(condition) {
                write!(f, " if {}", condition)?;
            }
            writeln!(f)?;
            fmt_stmt(body, f, depth)
        }
    }
}
