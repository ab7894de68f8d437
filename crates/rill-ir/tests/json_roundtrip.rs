//! A compiled module survives a JSON round trip.

use rill_ir::{
    Constant, FunctionBuilder, FunctionSig, Module, ModuleBuilder, Op, Type, Visibility,
};

fn build_module() -> Module {
    let sig = FunctionSig::new(vec![Type::Int(64)], Type::Int(64));
    let mut fb = FunctionBuilder::new("double_or_zero", sig, Visibility::Public);
    let n = fb.param(0);

    let zero = fb.const_int(0);
    let is_neg = fb.cmp(rill_ir::CmpKind::Lt, n, zero);
    let pos = fb.create_block();
    let branch = fb.br_if(is_neg, pos, &[], pos, &[]);

    fb.switch_to_block(pos);
    let two = fb.const_int(2);
    let doubled = fb.mul(n, two);
    fb.ret(Some(doubled));

    let neg = fb.create_block();
    fb.set_successor(branch, 0, neg);
    fb.switch_to_block(neg);
    fb.ret(Some(zero));

    let mut mb = ModuleBuilder::new("roundtrip");
    mb.add_function(fb.build());
    mb.add_global("banner", Constant::Str("hello".into()), 1);
    mb.get_or_insert_extern(
        "seq_alloc",
        FunctionSig::new(vec![Type::Int(64)], Type::byte_ptr()),
    );
    mb.build()
}

#[test]
fn module_round_trips_through_json() {
    let module = build_module();
    let json = serde_json::to_string(&module).expect("serialize");
    let back: Module = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(back.name, module.name);
    assert_eq!(back.functions.len(), module.functions.len());
    assert_eq!(back.globals.len(), 1);
    assert_eq!(back.globals[0].init, Constant::Str("hello".into()));
    assert!(back.externs.contains_key("seq_alloc"));

    let f = back.function("double_or_zero").expect("function");
    assert_eq!(f.blocks.len(), 3);
    // The patched branch survived: its else edge differs from the then edge.
    let patched = f.insts.values().any(|inst| {
        matches!(&inst.op, Op::BrIf { then_target, else_target, .. }
            if then_target.block != else_target.block)
    });
    assert!(patched);

    // The printer renders the reloaded module without panicking.
    let printed = format!("{back}");
    assert!(printed.contains("fn @double_or_zero"));
    assert!(printed.contains("global @banner"));
}
