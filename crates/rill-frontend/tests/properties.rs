//! The universal properties of the frontend: idempotent resolution,
//! inference–emission agreement, overload precedence, reflected operators,
//! clone fidelity, pipeline driver insertion, and break/continue patching.

use std::rc::Rc;

use rill_frontend::{
    CloneCtx, Expr, ExprKind, FnCtx, Function, ParamTy, Scope, Stmt, Ty, Unit, Var,
};
use rill_ir::{BranchTarget, FunctionBuilder, FunctionSig, Op, Type, Visibility};

fn fresh_fx() -> FnCtx {
    let fb = FunctionBuilder::new(
        "t",
        FunctionSig::new(vec![], Type::Void),
        Visibility::Public,
    );
    FnCtx::new(fb, Ty::Void)
}

#[test]
fn p1_idempotent_resolution() {
    let unit = Unit::new("p1");
    let t = ParamTy::new("T");
    let a = Var::new("a", false);
    let f = Function::generic(
        "f",
        vec![t.clone()],
        vec![(a.clone(), Ty::Param(t.clone()))],
        Ty::Param(t),
        Scope::new(vec![Stmt::ret(Some(Expr::var(a)))]),
    );

    let mut e = Expr::func_with_types(f, vec![Ty::Int]);
    e.resolve_types(&unit).unwrap();
    let t1 = e.get_type(&unit).unwrap();
    e.resolve_types(&unit).unwrap();
    let t2 = e.get_type(&unit).unwrap();
    assert!(t1.is(&t2));
    assert!(t1.is(&Ty::func(vec![Ty::Int], Ty::Int)));

    // Resolution never touches the module: no globals appear.
    assert!(unit.build().globals.is_empty());
}

#[test]
fn p2_inference_emission_agreement() {
    let mut unit = Unit::new("p2");
    let mut fx = fresh_fx();
    let mut block = fx.fb.entry_block();

    let cases = vec![
        Expr::int(42),
        Expr::float(1.5),
        Expr::bool_(true),
        Expr::str_("hello"),
        Expr::binary("+", Expr::int(1), Expr::int(2)),
        Expr::binary("<", Expr::int(1), Expr::int(2)),
        Expr::cond(Expr::bool_(true), Expr::int(1), Expr::int(2)),
        Expr::record(vec![Expr::int(1), Expr::bool_(false)], vec![]),
        Expr::opt(Expr::int(9)),
        Expr::default(Ty::Float),
    ];
    for mut e in cases {
        e.resolve_types(&unit).unwrap();
        let ty = e.get_type(&unit).unwrap();
        let val = e.codegen_value(&mut unit, &mut fx, &mut block).unwrap();
        let expected = ty.ir_type(&mut unit).unwrap();
        assert_eq!(fx.fb.value_type(val), expected, "for '{}'", ty.name());
    }
}

#[test]
fn p3_magic_overload_precedence() {
    let mut unit = Unit::new("p3");

    // Built-in magic applies when no overload exists.
    assert!(Ty::Int
        .magic_out(&unit, "__add__", &[Ty::Int])
        .unwrap()
        .is(&Ty::Int));

    // A user overload beats the built-in.
    let first = Function::extern_decl("int_add_first", vec![Ty::Int, Ty::Int], Ty::Float);
    Ty::Int.add_method(&mut unit, "__add__", first, false).unwrap();
    assert!(Ty::Int
        .magic_out(&unit, "__add__", &[Ty::Int])
        .unwrap()
        .is(&Ty::Float));

    // A later overload beats an earlier one.
    let second = Function::extern_decl("int_add_second", vec![Ty::Int, Ty::Int], Ty::Str);
    Ty::Int.add_method(&mut unit, "__add__", second, false).unwrap();
    assert!(Ty::Int
        .magic_out(&unit, "__add__", &[Ty::Int])
        .unwrap()
        .is(&Ty::Str));

    // call_magic dispatches to the same winner.
    let mut fx = fresh_fx();
    let mut block = fx.fb.entry_block();
    let mut e = Expr::binary("+", Expr::int(1), Expr::int(2));
    e.resolve_types(&unit).unwrap();
    assert!(e.get_type(&unit).unwrap().is(&Ty::Str));
    e.codegen_value(&mut unit, &mut fx, &mut block).unwrap();
    let func = fx.fb.build();
    let dispatched = func
        .insts
        .values()
        .any(|inst| matches!(&inst.op, Op::FuncRef(name) if name == "int_add_second"));
    assert!(dispatched);
}

#[test]
fn p3_new_cannot_be_overridden() {
    let mut unit = Unit::new("p3b");
    let f = Function::extern_decl("nope", vec![Ty::Int], Ty::Int);
    let e = Ty::Int.add_method(&mut unit, "__new__", f, false).unwrap_err();
    assert_eq!(e.message, "cannot override __new__");
}

#[test]
fn p3_duplicate_method_rules() {
    let mut unit = Unit::new("p3c");
    let f1 = Function::extern_decl("m1", vec![Ty::Int], Ty::Int);
    let f2 = Function::extern_decl("m2", vec![Ty::Int], Ty::Float);
    Ty::Int.add_method(&mut unit, "twice", f1, false).unwrap();
    let e = Ty::Int
        .add_method(&mut unit, "twice", f2.clone(), false)
        .unwrap_err();
    assert_eq!(e.message, "duplicate method 'twice'");
    // force replaces silently.
    Ty::Int.add_method(&mut unit, "twice", f2, true).unwrap();
    assert!(Ty::Int
        .memb_type(&unit, "twice")
        .unwrap()
        .name()
        .contains("Float"));
}

#[test]
fn p4_reflected_operators_commute() {
    let unit = Unit::new("p4");
    for (lhs, rhs) in [
        (Expr::int(1), Expr::float(2.0)),
        (Expr::float(2.0), Expr::int(1)),
    ] {
        let mut e = Expr::binary("+", lhs, rhs);
        e.resolve_types(&unit).unwrap();
        assert!(e.get_type(&unit).unwrap().is(&Ty::Float));
    }

    // Undefined on both sides names the operator and both operands.
    let mut bad = Expr::binary("+", Expr::bool_(true), Expr::str_("x"));
    bad.resolve_types(&unit).unwrap();
    let e = bad.get_type(&unit).unwrap_err();
    assert!(e.message.contains("'+'"));
    assert!(e.message.contains("'Bool'"));
    assert!(e.message.contains("'Str'"));
}

#[test]
fn p5_clone_fidelity() {
    let v = Var::new("x", false);
    v.set_ty(Ty::Int);
    let e = Expr::binary("+", Expr::var(v.clone()), Expr::var(v.clone()));

    let mut ctx = CloneCtx::new();
    let c = e.clone_under(&mut ctx);

    let (l, r) = match &c.kind {
        ExprKind::BOp { lhs, rhs, .. } => match (&lhs.kind, &rhs.kind) {
            (ExprKind::VarRef(l), ExprKind::VarRef(r)) => (l.clone(), r.clone()),
            _ => panic!("clone changed the expression shape"),
        },
        _ => panic!("clone changed the expression shape"),
    };
    // Shared child cloned once; clone is distinct from the original.
    assert!(Rc::ptr_eq(&l, &r));
    assert!(!Rc::ptr_eq(&l, &v));

    // A second clone through the same context reuses the first clone.
    let again = Expr::var(v).clone_under(&mut ctx);
    match &again.kind {
        ExprKind::VarRef(w) => assert!(Rc::ptr_eq(w, &l)),
        _ => unreachable!(),
    }
}

#[test]
fn p5_realizations_share_identity() {
    let t = ParamTy::new("T");
    let a = Var::new("a", false);
    let f = Function::generic(
        "f",
        vec![t.clone()],
        vec![(a.clone(), Ty::Param(t.clone()))],
        Ty::Param(t),
        Scope::new(vec![Stmt::ret(Some(Expr::var(a)))]),
    );
    let r1 = f.realize(vec![Ty::Int]).unwrap();
    let r2 = f.realize(vec![Ty::Int]).unwrap();
    let r3 = f.realize(vec![Ty::Float]).unwrap();
    assert!(Rc::ptr_eq(&r1, &r2));
    assert!(!Rc::ptr_eq(&r1, &r3));
    assert!(r1.func_ty().is(&Ty::func(vec![Ty::Int], Ty::Int)));
}

#[test]
fn p7_pipe_generator_rule() {
    let mut unit = Unit::new("p7");
    let feed = Function::extern_decl("feed", vec![Ty::Int], Ty::gen(Ty::Int));
    let shift = Function::extern_decl("shift", vec![Ty::Int], Ty::Int);
    let windows = Function::extern_decl("windows", vec![Ty::Int], Ty::gen(Ty::Int));

    // Terminal generator stage: the pipe keeps the generator type.
    let mut terminal = Expr::pipe(vec![
        Expr::int(5),
        Expr::func(feed.clone()),
    ]);
    terminal.resolve_types(&unit).unwrap();
    assert!(matches!(terminal.get_type(&unit).unwrap(), Ty::Gen(_)));

    // Two non-terminal generator stages insert two driver loops and the
    // whole pipe is Void.
    let mut driven = Expr::pipe(vec![
        Expr::int(5),
        Expr::func(feed),
        Expr::func(windows),
        Expr::func(shift),
    ]);
    driven.resolve_types(&unit).unwrap();
    assert!(driven.get_type(&unit).unwrap().is(&Ty::Void));

    let main = Function::new(
        "main",
        vec![],
        Ty::Void,
        Scope::new(vec![Stmt::expr(driven)]),
    );
    main.resolve_types(&unit).unwrap();
    main.codegen(&mut unit).unwrap();
    let module = unit.build();
    let f = module.function("main").unwrap();
    let resumes = f
        .insts
        .values()
        .filter(|inst| matches!(&inst.op, Op::Call { func, .. } if func == "seq_co_resume"))
        .count();
    assert_eq!(resumes, 2);
}

#[test]
fn p8_break_and_continue_patching() {
    // break: its branch ends up targeting the block after the loop.
    let mut unit = Unit::new("p8");
    let mut fx = fresh_fx();
    let mut block = fx.fb.entry_block();
    let mut stmt = Stmt::while_(
        Expr::bool_(true),
        Scope::new(vec![Stmt::brk()]),
    );
    stmt.resolve_types(&unit).unwrap();
    stmt.codegen(&mut unit, &mut fx, &mut block).unwrap();
    let exit = block;
    let func = fx.fb.build();
    let breaks_to_exit = func
        .insts
        .values()
        .filter(|inst| matches!(&inst.op, Op::Br(BranchTarget { block, .. }) if *block == exit))
        .count();
    assert_eq!(breaks_to_exit, 1);

    // continue: its branch targets the loop header (two jumps land there —
    // the loop entry and the continue).
    let mut fx = fresh_fx();
    let mut block = fx.fb.entry_block();
    let mut stmt = Stmt::while_(
        Expr::bool_(false),
        Scope::new(vec![Stmt::cont()]),
    );
    stmt.resolve_types(&unit).unwrap();
    stmt.codegen(&mut unit, &mut fx, &mut block).unwrap();
    let func = fx.fb.build();
    let mut per_target = std::collections::HashMap::new();
    for inst in func.insts.values() {
        if let Op::Br(BranchTarget { block, .. }) = &inst.op {
            *per_target.entry(*block).or_insert(0) += 1;
        }
    }
    assert!(per_target.values().any(|&n| n == 2));
}

#[test]
fn p8_break_outside_loop_is_an_error() {
    let mut unit = Unit::new("p8b");
    let mut fx = fresh_fx();
    let mut block = fx.fb.entry_block();
    let mut stmt = Stmt::brk();
    stmt.resolve_types(&unit).unwrap();
    let e = stmt.codegen(&mut unit, &mut fx, &mut block).unwrap_err();
    assert_eq!(e.message, "break or continue outside of loop");
}

#[test]
fn string_literal_global_is_created_once() {
    let mut unit = Unit::new("strs");
    let mut fx = fresh_fx();
    let mut block = fx.fb.entry_block();
    let mut s = Expr::str_("abc");
    s.resolve_types(&unit).unwrap();
    s.codegen_value(&mut unit, &mut fx, &mut block).unwrap();
    s.codegen_value(&mut unit, &mut fx, &mut block).unwrap();
    assert_eq!(unit.build().globals.len(), 1);
}

#[test]
fn blank_and_type_expressions_are_rejected() {
    let unit = Unit::new("misc");
    let mut blank = Expr::blank();
    let e = blank.get_type(&unit).unwrap_err();
    assert_eq!(e.message, "misplaced '_'");

    let mut unit = Unit::new("misc2");
    let mut fx = fresh_fx();
    let mut block = fx.fb.entry_block();
    let mut ty = Expr::type_ref(Ty::Int);
    let e = ty.codegen(&mut unit, &mut fx, &mut block).unwrap_err();
    assert_eq!(e.message, "misplaced type expression");
}

#[test]
fn spans_annotate_errors_once() {
    let unit = Unit::new("spans");
    let span = rill_ir::Span {
        file: "demo.rill".into(),
        line: 3,
        col: 9,
    };
    let mut e = Expr::binary("+", Expr::bool_(true), Expr::str_("x")).with_span(span.clone());
    e.resolve_types(&unit).unwrap();
    let err = e.get_type(&unit).unwrap_err();
    assert_eq!(err.span, Some(span));
}
