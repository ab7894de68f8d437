//! End-to-end scenarios: build ASTs the way the parser would, resolve,
//! compile into a module, and inspect the result.

use std::rc::Rc;

use rill_frontend::{Expr, Function, ParamTy, Pattern, RefTy, Scope, Stmt, Ty, Unit, Var};
use rill_ir::{Module, Op};

fn compile_main(unit: &mut Unit, stmts: Vec<Stmt>) -> Rc<Function> {
    let main = Function::new("main", vec![], Ty::Void, Scope::new(stmts));
    main.resolve_types(unit).expect("resolve failed");
    main.codegen(unit).expect("codegen failed");
    main
}

fn count_ops(module: &Module, func: &str, pred: impl Fn(&Op) -> bool) -> usize {
    let f = module.function(func).expect("function not in module");
    f.insts.values().filter(|inst| pred(&inst.op)).count()
}

/// A generic function exercising call-site deduction:
/// `f<T>(a: T, b: T) -> T { return a }`.
fn generic_f() -> Rc<Function> {
    let t = ParamTy::new("T");
    let a = Var::new("a", false);
    let b = Var::new("b", false);
    Function::generic(
        "f",
        vec![t.clone()],
        vec![
            (a.clone(), Ty::Param(t.clone())),
            (b, Ty::Param(t.clone())),
        ],
        Ty::Param(t),
        Scope::new(vec![Stmt::ret(Some(Expr::var(a)))]),
    )
}

#[test]
fn s1_arithmetic_with_reflected_operator() {
    let mut unit = Unit::new("s1");
    let x = Var::new("x", false);
    let init = Expr::binary("+", Expr::int(1), Expr::float(2.0));
    compile_main(&mut unit, vec![Stmt::let_(x.clone(), init)]);

    // `1 + 2.0` goes through Float.__radd__(Int) and is a Float.
    assert!(x.ty().unwrap().is(&Ty::Float));
    let module = unit.build();
    assert!(count_ops(&module, "main", |op| matches!(op, Op::IntToFloat(_))) >= 1);
    assert!(count_ops(&module, "main", |op| matches!(op, Op::Add(_, _))) >= 1);
}

#[test]
fn s2_generic_deduction() {
    let mut unit = Unit::new("s2");
    let f = generic_f();

    let x = Var::new("x", false);
    let call = Expr::call(Expr::func(f.clone()), vec![Expr::int(1), Expr::int(2)]);
    compile_main(&mut unit, vec![Stmt::let_(x.clone(), call)]);
    assert!(x.ty().unwrap().is(&Ty::Int));

    let module = unit.build();
    assert!(module.function("f[Int]").is_some());
}

#[test]
fn s2_generic_deduction_conflict() {
    let unit = Unit::new("s2b");
    let f = generic_f();

    let mut call = Expr::call(Expr::func(f), vec![Expr::int(1), Expr::float(2.0)]);
    call.resolve_types(&unit).unwrap();
    let e = call.get_type(&unit).unwrap_err();
    assert!(e.message.contains("conflicting deductions"));
    assert!(e.message.contains("'T'"));
    assert!(e.message.contains("Int"));
    assert!(e.message.contains("Float"));
}

#[test]
fn s3_match_with_catch_all() {
    let mut unit = Unit::new("s3");
    let m = Var::new("m", false);
    let matched = Expr::match_(
        Expr::int(1),
        vec![Pattern::int(1), Pattern::wildcard()],
        vec![Expr::str_("a"), Expr::str_("b")],
    );
    compile_main(&mut unit, vec![Stmt::let_(m.clone(), matched)]);
    assert!(m.ty().unwrap().is(&Ty::Str));

    // The mismatch fall-through past the last arm is unreachable.
    let module = unit.build();
    assert_eq!(
        count_ops(&module, "main", |op| matches!(op, Op::Unreachable)),
        1
    );
}

#[test]
fn s3_match_missing_catch_all() {
    let mut unit = Unit::new("s3b");
    let m = Var::new("m", false);
    let matched = Expr::match_(Expr::int(1), vec![Pattern::int(1)], vec![Expr::str_("a")]);
    let main = Function::new(
        "main",
        vec![],
        Ty::Void,
        Scope::new(vec![Stmt::let_(m, matched)]),
    );
    main.resolve_types(&unit).unwrap();
    let e = main.codegen(&mut unit).unwrap_err();
    assert_eq!(e.message, "match expression missing catch-all pattern");
}

#[test]
fn s4_partial_application() {
    let mut unit = Unit::new("s4");
    let f = generic_f();

    let g = Var::new("g", false);
    let r = Var::new("r", false);
    let partial = Expr::partial_call(Expr::func(f), vec![Some(Expr::int(1)), None]);
    let complete = Expr::call(Expr::var(g.clone()), vec![Expr::int(2)]);
    compile_main(
        &mut unit,
        vec![
            Stmt::let_(g.clone(), partial),
            Stmt::let_(r.clone(), complete),
        ],
    );

    match g.ty().unwrap() {
        Ty::Partial(p) => {
            assert!(p
                .callee
                .is(&Ty::func(vec![Ty::Int, Ty::Int], Ty::Int)));
            assert_eq!(p.slots.len(), 2);
            assert!(p.slots[0].as_ref().unwrap().is(&Ty::Int));
            assert!(p.slots[1].is_none());
        }
        other => panic!("expected a partial function type, got '{}'", other.name()),
    }
    assert!(r.ty().unwrap().is(&Ty::Int));
}

#[test]
fn s5_pipeline_with_generator() {
    let mut unit = Unit::new("s5");
    let range = Function::extern_decl("range", vec![Ty::Int], Ty::gen(Ty::Int));
    let print = Function::extern_decl("print", vec![Ty::Int], Ty::Void);

    let mut pipe = Expr::pipe(vec![
        Expr::call(Expr::func(range), vec![Expr::int(3)]),
        Expr::func(print),
    ]);
    pipe.resolve_types(&unit).unwrap();
    assert!(pipe.get_type(&unit).unwrap().is(&Ty::Void));

    compile_main(&mut unit, vec![Stmt::expr(pipe)]);
    let module = unit.build();
    for sym in [
        "seq_co_resume",
        "seq_co_done",
        "seq_co_promise",
        "seq_co_destroy",
        "range",
        "print",
    ] {
        assert!(module.externs.contains_key(sym), "missing extern {sym}");
    }
    // Exactly one driver loop for the single non-terminal generator stage.
    let resumes = count_ops(&module, "main", |op| {
        matches!(op, Op::Call { func, .. } if func == "seq_co_resume")
    });
    assert_eq!(resumes, 1);
    // One call site for the downstream stage, inside the driver body.
    let prints = count_ops(&module, "main", |op| {
        matches!(op, Op::FuncRef(name) if name == "print")
    });
    assert_eq!(prints, 1);
}

#[test]
fn s6_constructor_with_finalizer() {
    let mut unit = Unit::new("s6");
    let counter = RefTy::new("Counter");
    counter.set_fields(vec![("count".into(), Ty::Int)]);
    let cty = Ty::Ref(counter);

    let self_v = Var::new("self", false);
    let n_v = Var::new("n", false);
    let init = Function::new(
        "Counter.init",
        vec![(self_v.clone(), cty.clone()), (n_v.clone(), Ty::Int)],
        Ty::Void,
        Scope::new(vec![Stmt::assign_member(
            self_v,
            "count",
            Expr::var(n_v),
        )]),
    );
    cty.add_method(&mut unit, "__init__", init, false).unwrap();

    let self_d = Var::new("self", false);
    let del = Function::new(
        "Counter.del",
        vec![(self_d, cty.clone())],
        Ty::Void,
        Scope::default(),
    );
    cty.add_method(&mut unit, "__del__", del, false).unwrap();

    let c = Var::new("c", false);
    let construct = Expr::construct(cty.clone(), vec![Expr::int(5)]);
    compile_main(&mut unit, vec![Stmt::let_(c.clone(), construct)]);
    assert!(c.ty().unwrap().is(&cty));

    let module = unit.build();
    assert!(module.externs.contains_key("seq_register_finalizer"));
    assert!(module.externs.contains_key("seq_alloc"));
    // One synthesized finalizer whose body invokes __del__.
    let fin = module
        .function("rill.finalizer.1")
        .expect("finalizer not synthesized");
    let calls_del = fin.insts.values().any(|inst| {
        matches!(&inst.op, Op::CallIndirect { .. })
    });
    assert!(calls_del);
    // Registration happens once in main.
    assert_eq!(
        count_ops(&module, "main", |op| {
            matches!(op, Op::Call { func, .. } if func == "seq_register_finalizer")
        }),
        1
    );
    // The class struct is registered with its field layout.
    let def = module.struct_def("Counter").expect("struct not registered");
    assert_eq!(def.fields.len(), 1);
    assert_eq!(def.fields[0].0, "count");
}

#[test]
fn list_literal_realizes_generic_class() {
    let mut unit = Unit::new("list");
    let t = ParamTy::new("T");
    let list = RefTy::generic("List", vec![t.clone()]);
    list.set_fields(vec![("len".into(), Ty::Int)]);
    let list_ty = Ty::Ref(list);

    let self_i = Var::new("self", false);
    let init = Function::new(
        "List.init",
        vec![(self_i, list_ty.clone())],
        Ty::Void,
        Scope::default(),
    );
    list_ty.add_method(&mut unit, "__init__", init, false).unwrap();

    let self_a = Var::new("self", false);
    let x_a = Var::new("x", false);
    let append = Function::new(
        "List.append",
        vec![(self_a, list_ty.clone()), (x_a, Ty::Param(t))],
        Ty::Void,
        Scope::default(),
    );
    list_ty.add_method(&mut unit, "append", append, false).unwrap();

    let xs = Var::new("xs", false);
    let lit = Expr::list(vec![Expr::int(1), Expr::int(2)], list_ty);
    compile_main(&mut unit, vec![Stmt::let_(xs.clone(), lit)]);

    // The literal realized List[Int] and its type flowed into the binding.
    assert_eq!(xs.ty().unwrap().name(), "List[Int]");
    let module = unit.build();
    assert!(module.struct_def("List[Int]").is_some());
}

#[test]
fn list_literal_rejects_mixed_elements() {
    let mut unit = Unit::new("list2");
    let t = ParamTy::new("T");
    let list = RefTy::generic("List", vec![t.clone()]);
    let list_ty = Ty::Ref(list);
    let self_i = Var::new("self", false);
    let init = Function::new(
        "List.init",
        vec![(self_i, list_ty.clone())],
        Ty::Void,
        Scope::default(),
    );
    list_ty.add_method(&mut unit, "__init__", init, false).unwrap();
    let self_a = Var::new("self", false);
    let x_a = Var::new("x", false);
    let append = Function::new(
        "List.append",
        vec![(self_a, list_ty.clone()), (x_a, Ty::Param(t))],
        Ty::Void,
        Scope::default(),
    );
    list_ty.add_method(&mut unit, "append", append, false).unwrap();

    let lit = Expr::list(vec![Expr::int(1), Expr::float(2.0)], list_ty);
    let main = Function::new(
        "main",
        vec![],
        Ty::Void,
        Scope::new(vec![Stmt::expr(lit)]),
    );
    main.resolve_types(&unit).unwrap();
    let e = main.codegen(&mut unit).unwrap_err();
    assert!(e.message.contains("inconsistent list element types"));
}

#[test]
fn empty_list_literal_is_an_error() {
    let unit = Unit::new("list3");
    let list = RefTy::generic("List", vec![ParamTy::new("T")]);
    let mut lit = Expr::list(vec![], Ty::Ref(list));
    lit.resolve_types(&unit).unwrap();
    let e = lit.get_type(&unit).unwrap_err();
    assert_eq!(e.message, "cannot infer type of empty list");
}

#[test]
fn loops_and_source_compile() {
    let mut unit = Unit::new("loops");
    let feed = Function::extern_decl("feed", vec![], Ty::gen(Ty::Int));
    let sink = Function::extern_decl("sink", vec![Ty::Int], Ty::Void);

    let i = Var::new("i", false);
    let range_body = Scope::new(vec![Stmt::expr(Expr::call(
        Expr::func(sink.clone()),
        vec![Expr::var(i.clone())],
    ))]);

    let x = Var::new("x", false);
    let source_body = Scope::new(vec![Stmt::expr(Expr::call(
        Expr::func(sink),
        vec![Expr::var(x.clone())],
    ))]);

    compile_main(
        &mut unit,
        vec![
            Stmt::range(None, Expr::int(10), None, i, range_body),
            Stmt::source(
                Expr::call(Expr::func(feed), vec![]),
                Some(x),
                source_body,
            ),
        ],
    );

    let module = unit.build();
    assert!(module.externs.contains_key("seq_co_destroy"));
    // Two sink call sites, one per loop body.
    assert_eq!(
        count_ops(&module, "main", |op| {
            matches!(op, Op::FuncRef(name) if name == "sink")
        }),
        2
    );
}

#[test]
fn record_member_assignment() {
    let mut unit = Unit::new("rec");
    let r = Var::new("r", true);
    let rec = Expr::record(vec![Expr::int(1), Expr::str_("hi")], vec![]);
    compile_main(
        &mut unit,
        vec![
            Stmt::cell(r.clone(), rec),
            Stmt::assign_member(r.clone(), "1", Expr::int(7)),
        ],
    );
    assert_eq!(r.ty().unwrap().name(), "{Int, Str}");
    let module = unit.build();
    // Positional field update is an insert-value on the record aggregate.
    assert!(count_ops(&module, "main", |op| matches!(op, Op::InsertValue { .. })) >= 3);
}

#[test]
fn conditional_expression_types_must_agree() {
    let unit = Unit::new("cond");
    let mut ok = Expr::cond(Expr::bool_(true), Expr::int(1), Expr::int(2));
    ok.resolve_types(&unit).unwrap();
    assert!(ok.get_type(&unit).unwrap().is(&Ty::Int));

    let mut bad = Expr::cond(Expr::bool_(true), Expr::int(1), Expr::str_("x"));
    bad.resolve_types(&unit).unwrap();
    let e = bad.get_type(&unit).unwrap_err();
    assert!(e.message.contains("inconsistent types"));
}

#[test]
fn arrays_conditionals_and_assignment() {
    let mut unit = Unit::new("arrays");
    let a = Var::new("a", false);
    let n = Var::new("n", true);
    let tail = Var::new("tail", false);
    compile_main(
        &mut unit,
        vec![
            Stmt::let_(a.clone(), Expr::array(Ty::Int, Expr::int(4))),
            Stmt::assign_index(Expr::var(a.clone()), Expr::int(0), Expr::int(7)),
            Stmt::cell(n.clone(), Expr::lookup(Expr::var(a.clone()), Expr::int(0))),
            Stmt::if_(
                vec![(
                    Expr::contains(Expr::int(7), Expr::var(a.clone())),
                    Scope::new(vec![Stmt::assign(
                        n.clone(),
                        Expr::unary("-", Expr::var(n.clone())),
                    )]),
                )],
                Some(Scope::new(vec![Stmt::assign(n.clone(), Expr::int(0))])),
            ),
            Stmt::let_(
                tail.clone(),
                Expr::slice(Expr::var(a.clone()), Some(Expr::int(1)), None),
            ),
        ],
    );

    assert_eq!(a.ty().unwrap().name(), "Int[]");
    assert!(n.ty().unwrap().is(&Ty::Int));
    assert_eq!(tail.ty().unwrap().name(), "Int[]");
    let module = unit.build();
    assert!(module.externs.contains_key("seq_alloc"));
    // Element addressing for the store, the load, and the membership scan.
    assert!(count_ops(&module, "main", |op| matches!(op, Op::Gep { .. })) >= 3);
}

#[test]
fn set_and_dict_literals() {
    let mut unit = Unit::new("coll");

    let t = ParamTy::new("T");
    let set = RefTy::generic("Set", vec![t.clone()]);
    let set_ty = Ty::Ref(set);
    let self_i = Var::new("self", false);
    let init = Function::new(
        "Set.init",
        vec![(self_i, set_ty.clone())],
        Ty::Void,
        Scope::default(),
    );
    set_ty.add_method(&mut unit, "__init__", init, false).unwrap();
    let self_a = Var::new("self", false);
    let x_a = Var::new("x", false);
    let add = Function::new(
        "Set.add",
        vec![(self_a, set_ty.clone()), (x_a, Ty::Param(t))],
        Ty::Void,
        Scope::default(),
    );
    set_ty.add_method(&mut unit, "add", add, false).unwrap();

    let k = ParamTy::new("K");
    let v = ParamTy::new("V");
    let dict = RefTy::generic("Dict", vec![k.clone(), v.clone()]);
    let dict_ty = Ty::Ref(dict);
    let self_d = Var::new("self", false);
    let dinit = Function::new(
        "Dict.init",
        vec![(self_d, dict_ty.clone())],
        Ty::Void,
        Scope::default(),
    );
    dict_ty.add_method(&mut unit, "__init__", dinit, false).unwrap();
    let self_s = Var::new("self", false);
    let key_s = Var::new("key", false);
    let val_s = Var::new("val", false);
    let setitem = Function::new(
        "Dict.setitem",
        vec![
            (self_s, dict_ty.clone()),
            (key_s, Ty::Param(k)),
            (val_s, Ty::Param(v)),
        ],
        Ty::Void,
        Scope::default(),
    );
    dict_ty
        .add_method(&mut unit, "__setitem__", setitem, false)
        .unwrap();

    let s = Var::new("s", false);
    let d = Var::new("d", false);
    compile_main(
        &mut unit,
        vec![
            Stmt::let_(
                s.clone(),
                Expr::set_(vec![Expr::int(1), Expr::int(2)], set_ty),
            ),
            Stmt::let_(
                d.clone(),
                Expr::dict(
                    vec![Expr::str_("a"), Expr::int(1), Expr::str_("b"), Expr::int(2)],
                    dict_ty,
                ),
            ),
        ],
    );

    assert_eq!(s.ty().unwrap().name(), "Set[Int]");
    assert_eq!(d.ty().unwrap().name(), "Dict[Str, Int]");
}

#[test]
fn match_with_or_and_binding_patterns() {
    let mut unit = Unit::new("orpat");
    let bound = Var::new("other", false);
    let m = Var::new("m", false);
    let matched = Expr::match_(
        Expr::int(3),
        vec![
            Pattern::or(vec![Pattern::int(1), Pattern::int(2)]),
            Pattern::bound(bound.clone()),
        ],
        vec![Expr::int(100), Expr::var(bound.clone())],
    );
    compile_main(&mut unit, vec![Stmt::let_(m.clone(), matched)]);
    assert!(bound.ty().unwrap().is(&Ty::Int));
    assert!(m.ty().unwrap().is(&Ty::Int));
}

#[test]
fn generic_method_call_deduces_through_receiver() {
    let mut unit = Unit::new("meth");
    let boxed = RefTy::new("Box");
    boxed.set_fields(vec![("v".into(), Ty::Int)]);
    let box_ty = Ty::Ref(boxed);

    let self_i = Var::new("self", false);
    let init = Function::new(
        "Box.init",
        vec![(self_i, box_ty.clone())],
        Ty::Void,
        Scope::default(),
    );
    box_ty.add_method(&mut unit, "__init__", init, false).unwrap();

    let t = ParamTy::new("T");
    let self_m = Var::new("self", false);
    let x = Var::new("x", false);
    let identity = Function::generic(
        "Box.identity",
        vec![t.clone()],
        vec![(self_m, box_ty.clone()), (x.clone(), Ty::Param(t.clone()))],
        Ty::Param(t),
        Scope::new(vec![Stmt::ret(Some(Expr::var(x)))]),
    );
    box_ty
        .add_method(&mut unit, "identity", identity, false)
        .unwrap();

    let b = Var::new("b", false);
    let y = Var::new("y", false);
    compile_main(
        &mut unit,
        vec![
            Stmt::let_(b.clone(), Expr::construct(box_ty.clone(), vec![])),
            Stmt::let_(
                y.clone(),
                Expr::call(
                    Expr::elem(Expr::var(b.clone()), "identity"),
                    vec![Expr::int(5)],
                ),
            ),
        ],
    );
    assert!(b.ty().unwrap().is(&box_ty));
    assert!(y.ty().unwrap().is(&Ty::Int));
    // The realized method was compiled into the module.
    let module = unit.build();
    assert!(module.function("Box.identity[Int]").is_some());
}

#[test]
fn static_member_of_builtin_magic() {
    let mut unit = Unit::new("stat");
    let main = Function::new("main", vec![], Ty::Void, Scope::default());
    main.resolve_types(&unit).unwrap();
    main.codegen(&mut unit).unwrap();

    let mut e = Expr::static_elem(Ty::Int, "__neg__");
    e.resolve_types(&unit).unwrap();
    let ty = e.get_type(&unit).unwrap();
    assert!(ty.is(&Ty::func(vec![Ty::Int], Ty::Int)));
}

#[test]
fn function_definition_statement() {
    let mut unit = Unit::new("fndef");
    let x = Var::new("x", false);
    let dbl = Function::new(
        "dbl",
        vec![(x.clone(), Ty::Int)],
        Ty::Int,
        Scope::new(vec![Stmt::ret(Some(Expr::binary(
            "*",
            Expr::var(x),
            Expr::int(2),
        )))]),
    );
    let y = Var::new("y", false);
    compile_main(
        &mut unit,
        vec![
            Stmt::func_def(dbl.clone()),
            Stmt::let_(y.clone(), Expr::call(Expr::func(dbl), vec![Expr::int(21)])),
        ],
    );
    assert!(y.ty().unwrap().is(&Ty::Int));
    let module = unit.build();
    let f = module.function("dbl").expect("dbl not compiled");
    assert!(f.insts.values().any(|i| matches!(i.op, Op::Mul(_, _))));
}
