// Snapshot tests: lock the textual IR rendering and the transformed shape
// of the canonical 3-tap stencil.
//
// Snapshots are managed by `insta` and stored under
// `compiler/tests/snapshots/`. Run `cargo insta review` after intentional
// output changes to update baselines.

use stencilc::carry::loop_carry;
use stencilc::ir::{const_true, BufferTag, Expr, ForKind, Stmt, Type};

fn image_load(buf: &str, index: Expr) -> Expr {
    Expr::load(Type::int32(), buf, index, const_true(1), BufferTag::Image)
}

/// `for i in [0, n): out[i] = in[i] + in[i+1] + in[i+2]`
fn three_tap_stencil() -> Stmt {
    let i = Expr::ivar("i");
    let body = Stmt::store(
        "out",
        image_load("in", i.clone())
            + image_load("in", i.clone() + Expr::int(1))
            + image_load("in", i.clone() + Expr::int(2)),
        i,
        const_true(1),
    );
    Stmt::for_loop("i", Expr::int(0), Expr::ivar("n"), ForKind::Serial, body)
}

#[test]
fn snapshot_stencil_loop() {
    let output = format!("{}", three_tap_stencil()).trim_end().to_string();
    insta::assert_snapshot!("stencil_loop", output);
}

#[test]
fn snapshot_carried_stencil_loop() {
    let transformed = loop_carry(&three_tap_stencil(), 8);
    let output = format!("{}", transformed).trim_end().to_string();
    insta::assert_snapshot!("carried_stencil_loop", output);
}

#[test]
fn snapshot_let_consume_predicate() {
    let t = Expr::ivar("t");
    let load = Expr::load(
        Type::int32(),
        "tmp",
        t.clone(),
        Expr::gt(t.clone(), Expr::int(0)),
        BufferTag::Intermediate,
    );
    let s = Stmt::let_stmt(
        "t",
        Expr::ivar("x") + Expr::int(1),
        Stmt::producer_consumer(
            "tmp",
            false,
            Stmt::store("out", load, t, const_true(1)),
        ),
    );
    let output = format!("{}", s).trim_end().to_string();
    insta::assert_snapshot!("let_consume_predicate", output);
}
