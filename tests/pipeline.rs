//! End-to-end pipeline tests over hand-assembled programs.
//!
//! Each test builds a small program the way a front-end compiler would emit
//! it (outer class, private member, synthetic accessor, inner-class caller),
//! runs the full rebind / accessor-elimination / dead-code pipeline, and then
//! checks the surviving program with matcher queries and direct inspection.

use dexopt::ir::builder::ClassBuilder;
use dexopt::matcher::{any_class, any_direct_method, class_named, method_named};
use dexopt::passes::{LocalDcePass, PassStats, ReBindRefsPass, SynthPass};
use dexopt::{
    AccessFlags, Configuration, DexClass, DexContext, DexStore, Instruction, InvokeKind,
    PassManager, ProgramIndex,
};

const SYNTH_STATIC: AccessFlags = AccessFlags::STATIC.union(AccessFlags::SYNTHETIC);

fn full_pipeline() -> PassManager {
    PassManager::new(vec![
        Box::new(ReBindRefsPass::new()),
        Box::new(SynthPass::new()),
        Box::new(LocalDcePass::new()),
    ])
}

fn run_pipeline(stores: &mut Vec<DexStore>, ctx: &DexContext) -> Vec<(&'static str, PassStats)> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut manager = full_pipeline();
    manager
        .run_passes(stores, ctx, &Configuration::empty())
        .expect("pipeline must succeed");
    manager.stats().to_vec()
}

fn find_class<'a>(stores: &'a [DexStore], ctx: &DexContext, descriptor: &str) -> &'a DexClass {
    stores
        .iter()
        .flat_map(DexStore::classes)
        .find(|c| ctx.type_descriptor(c.ty) == Some(descriptor))
        .unwrap_or_else(|| panic!("class {descriptor} not found"))
}

/// `Alpha` holds a private static counter behind a synthetic getter, and
/// `Alpha$Beta` reads it through the accessor. Everything the accessor needs
/// is loaded, so the pipeline must inline and delete it.
fn alpha_program(ctx: &DexContext) -> Vec<DexStore> {
    let alpha = ClassBuilder::new(ctx, "LAlpha;")
        .static_field("value", "I", AccessFlags::PRIVATE | AccessFlags::STATIC)
        .direct_method("access$000", &[], "I", SYNTH_STATIC, |m| {
            m.registers(1, 0);
            let value = m.field("LAlpha;", "value", "I");
            m.sget(0, value);
            m.ret(0);
        })
        .build();
    let beta = ClassBuilder::new(ctx, "LAlpha$Beta;")
        .virtual_method("read", &[], "I", AccessFlags::PUBLIC, |m| {
            m.registers(2, 1);
            let accessor = m.method("LAlpha;", "access$000", &[], "I");
            m.invoke(InvokeKind::Static, accessor, &[]);
            m.move_result(0);
            m.ret(0);
        })
        .build();

    let mut store = DexStore::new("classes");
    store.add_classes(vec![alpha, beta]);
    vec![store]
}

/// `Gamma`'s accessor forwards to a member of a class that was never loaded.
/// No proof is possible, so the whole construct must survive untouched.
fn gamma_program(ctx: &DexContext) -> Vec<DexStore> {
    let gamma = ClassBuilder::new(ctx, "LGamma;")
        .direct_method("access$000", &[], "I", SYNTH_STATIC, |m| {
            m.registers(1, 0);
            let external = m.field("Lvendor/Config;", "flags", "I");
            m.sget(0, external);
            m.ret(0);
        })
        .build();
    let delta = ClassBuilder::new(ctx, "LGamma$Delta;")
        .virtual_method("read", &[], "I", AccessFlags::PUBLIC, |m| {
            m.registers(2, 1);
            let accessor = m.method("LGamma;", "access$000", &[], "I");
            m.invoke(InvokeKind::Static, accessor, &[]);
            m.move_result(0);
            m.ret(0);
        })
        .build();

    let mut store = DexStore::new("classes");
    store.add_classes(vec![gamma, delta]);
    vec![store]
}

#[test]
fn test_concrete_accessor_is_eliminated() {
    let ctx = DexContext::new();
    let mut stores = alpha_program(&ctx);
    run_pipeline(&mut stores, &ctx);

    // The accessor is gone from Alpha.
    let cleaned = class_named("LAlpha;") & !any_direct_method(method_named("access$000"));
    assert!(any_class(&stores, &ctx, &cleaned));

    // Beta now reads the field directly, with no call left.
    let beta = find_class(&stores, &ctx, "LAlpha$Beta;");
    let code = beta.virtual_methods[0].code.as_ref().unwrap();
    let value = ctx.intern_field(
        ctx.intern_type("LAlpha;"),
        ctx.intern_string("value"),
        ctx.intern_type("I"),
    );
    assert_eq!(
        code.instructions,
        vec![
            Instruction::StaticGet {
                dst: 0,
                field: value
            },
            Instruction::Return { src: 0 },
        ]
    );
}

#[test]
fn test_unprovable_accessor_is_preserved() {
    let ctx = DexContext::new();
    let mut stores = gamma_program(&ctx);
    let stats = run_pipeline(&mut stores, &ctx);

    let preserved = class_named("LGamma;") & any_direct_method(method_named("access$000"));
    assert!(any_class(&stores, &ctx, &preserved));

    // Delta still goes through the accessor.
    let delta = find_class(&stores, &ctx, "LGamma$Delta;");
    let code = delta.virtual_methods[0].code.as_ref().unwrap();
    assert!(code.instructions.iter().any(Instruction::is_invoke));

    let synth = stats.iter().find(|(name, _)| *name == "SynthPass").unwrap();
    assert_eq!(synth.1.methods_removed, 0);
}

/// A setter call site keeps its argument: the rewritten `sput` still reads
/// the register the `const/4` defined, so the sweep must not touch it.
#[test]
fn test_setter_argument_survives_the_sweep() {
    let ctx = DexContext::new();
    let outer = ClassBuilder::new(&ctx, "LOuter;")
        .static_field("seed", "I", AccessFlags::PRIVATE | AccessFlags::STATIC)
        .direct_method("access$002", &["I"], "V", SYNTH_STATIC, |m| {
            m.registers(1, 1);
            let seed = m.field("LOuter;", "seed", "I");
            m.sput(m.param(0), seed);
            m.ret_void();
        })
        .build();
    let inner = ClassBuilder::new(&ctx, "LOuter$Inner;")
        .direct_method("<init>", &[], "V", AccessFlags::CONSTRUCTOR, |m| {
            m.registers(2, 1);
            let accessor = m.method("LOuter;", "access$002", &["I"], "V");
            m.const_(0, 4);
            m.invoke(InvokeKind::Static, accessor, &[0]);
            m.ret_void();
        })
        .build();

    let mut store = DexStore::new("classes");
    store.add_classes(vec![outer, inner]);
    let mut stores = vec![store];
    run_pipeline(&mut stores, &ctx);

    let inner = find_class(&stores, &ctx, "LOuter$Inner;");
    let code = inner.direct_methods[0].code.as_ref().unwrap();
    let seed = ctx.intern_field(
        ctx.intern_type("LOuter;"),
        ctx.intern_string("seed"),
        ctx.intern_type("I"),
    );
    assert_eq!(
        code.instructions,
        vec![
            Instruction::Const { dst: 0, value: 4 },
            Instruction::StaticPut {
                src: 0,
                field: seed
            },
            Instruction::ReturnVoid,
        ]
    );
}

/// A getter with a marker parameter the body never touches, the shape a
/// front end gives a synthetic constructor. The call site materializes a
/// dummy with `const/4`; once the call becomes a direct `sget` the dummy has
/// no reader left and the sweep deletes it, cascading across the two passes.
#[test]
fn test_dummy_argument_const_is_swept_after_rewrite() {
    let ctx = DexContext::new();
    let outer = ClassBuilder::new(&ctx, "LOuter;")
        .static_field("seed", "I", AccessFlags::PRIVATE | AccessFlags::STATIC)
        .direct_method("access$000", &["LOuter$1;"], "I", SYNTH_STATIC, |m| {
            m.registers(2, 1);
            let seed = m.field("LOuter;", "seed", "I");
            m.sget(0, seed);
            m.ret(0);
        })
        .build();
    let inner = ClassBuilder::new(&ctx, "LOuter$Inner;")
        .virtual_method("read", &[], "I", AccessFlags::PUBLIC, |m| {
            m.registers(2, 0);
            let accessor = m.method("LOuter;", "access$000", &["LOuter$1;"], "I");
            m.const_(1, 0);
            m.invoke(InvokeKind::Static, accessor, &[1]);
            m.move_result(0);
            m.ret(0);
        })
        .build();

    let mut store = DexStore::new("classes");
    store.add_classes(vec![outer, inner]);
    let mut stores = vec![store];
    run_pipeline(&mut stores, &ctx);

    let inner = find_class(&stores, &ctx, "LOuter$Inner;");
    let code = inner.virtual_methods[0].code.as_ref().unwrap();
    let seed = ctx.intern_field(
        ctx.intern_type("LOuter;"),
        ctx.intern_string("seed"),
        ctx.intern_type("I"),
    );
    assert_eq!(
        code.instructions,
        vec![
            Instruction::StaticGet {
                dst: 0,
                field: seed
            },
            Instruction::Return { src: 0 },
        ]
    );
}

/// A getter whose caller discards the result: after the rewrite nothing reads
/// the fetched value, so both the access and its scratch materialization are
/// swept, cascading across the two passes.
#[test]
fn test_discarded_getter_result_cascades_to_nothing() {
    let ctx = DexContext::new();
    let outer = ClassBuilder::new(&ctx, "LOuter;")
        .static_field("seed", "I", AccessFlags::PRIVATE | AccessFlags::STATIC)
        .direct_method("access$000", &[], "I", SYNTH_STATIC, |m| {
            m.registers(1, 0);
            let seed = m.field("LOuter;", "seed", "I");
            m.sget(0, seed);
            m.ret(0);
        })
        .build();
    let inner = ClassBuilder::new(&ctx, "LOuter$Inner;")
        .direct_method("<init>", &[], "V", AccessFlags::CONSTRUCTOR, |m| {
            m.registers(2, 1);
            let accessor = m.method("LOuter;", "access$000", &[], "I");
            m.invoke(InvokeKind::Static, accessor, &[]);
            m.move_result(0);
            m.ret_void();
        })
        .build();

    let mut store = DexStore::new("classes");
    store.add_classes(vec![outer, inner]);
    let mut stores = vec![store];
    run_pipeline(&mut stores, &ctx);

    // The accessor is gone and the caller collapsed to a bare return: the
    // rewritten sget had no observer, so the sweep removed it.
    let cleaned = class_named("LOuter;") & !any_direct_method(method_named("access$000"));
    assert!(any_class(&stores, &ctx, &cleaned));

    let inner = find_class(&stores, &ctx, "LOuter$Inner;");
    let code = inner.direct_methods[0].code.as_ref().unwrap();
    assert_eq!(code.instructions, vec![Instruction::ReturnVoid]);
}

#[test]
fn test_pipeline_is_idempotent() {
    let ctx = DexContext::new();
    let mut stores = alpha_program(&ctx);
    run_pipeline(&mut stores, &ctx);

    let second = run_pipeline(&mut stores, &ctx);
    for (name, stats) in second {
        assert!(!stats.changed(), "{name} changed an already-clean program");
    }
}

/// A subclass-qualified field reference first gets rebound to the true
/// definer, which is what makes the accessor provably safe for the following
/// pass. Running the full pipeline must take the construct all the way down.
#[test]
fn test_rebind_feeds_accessor_elimination() {
    let ctx = DexContext::new();
    let base = ClassBuilder::new(&ctx, "LBase;")
        .static_field("value", "I", AccessFlags::STATIC)
        .build();
    let derived = ClassBuilder::new(&ctx, "LDerived;")
        .super_class("LBase;")
        .direct_method("access$000", &[], "I", SYNTH_STATIC, |m| {
            m.registers(1, 0);
            // References the inherited field through the subclass.
            let through_derived = m.field("LDerived;", "value", "I");
            m.sget(0, through_derived);
            m.ret(0);
        })
        .build();
    let user = ClassBuilder::new(&ctx, "LUser;")
        .virtual_method("read", &[], "I", AccessFlags::PUBLIC, |m| {
            m.registers(2, 1);
            let accessor = m.method("LDerived;", "access$000", &[], "I");
            m.invoke(InvokeKind::Static, accessor, &[]);
            m.move_result(0);
            m.ret(0);
        })
        .build();

    let mut store = DexStore::new("classes");
    store.add_classes(vec![base, derived, user]);
    let mut stores = vec![store];
    let stats = run_pipeline(&mut stores, &ctx);

    let rebind = stats
        .iter()
        .find(|(name, _)| *name == "ReBindRefsPass")
        .unwrap();
    assert_eq!(rebind.1.refs_rebound, 1);

    let cleaned = class_named("LDerived;") & !any_direct_method(method_named("access$000"));
    assert!(any_class(&stores, &ctx, &cleaned));

    let user = find_class(&stores, &ctx, "LUser;");
    let code = user.virtual_methods[0].code.as_ref().unwrap();
    let at_base = ctx.intern_field(
        ctx.intern_type("LBase;"),
        ctx.intern_string("value"),
        ctx.intern_type("I"),
    );
    assert_eq!(
        code.instructions[0],
        Instruction::StaticGet {
            dst: 0,
            field: at_base
        }
    );
}

/// After a successful pipeline run, every member reference remaining in
/// rewritten bodies that points into the loaded program resolves to exactly
/// the class it names.
#[test]
fn test_surviving_references_are_concrete() {
    let ctx = DexContext::new();
    let mut stores = alpha_program(&ctx);
    run_pipeline(&mut stores, &ctx);

    let index = ProgramIndex::build(&stores, &ctx).unwrap();
    for store in &stores {
        for class in store.classes() {
            for method in class.all_methods() {
                let Some(code) = method.code.as_ref() else {
                    continue;
                };
                for instr in &code.instructions {
                    if let Some(field) = instr.field_ref() {
                        assert!(
                            index.is_field_concrete(&stores, &ctx, field),
                            "{} left a non-concrete field reference",
                            ctx.show_field(field)
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn test_misordered_pipeline_reports_config_error() {
    use serde_json::json;

    let ctx = DexContext::new();
    let base = ClassBuilder::new(&ctx, "LBase;")
        .static_field("value", "I", AccessFlags::STATIC)
        .build();
    let derived = ClassBuilder::new(&ctx, "LDerived;")
        .super_class("LBase;")
        .direct_method("access$000", &[], "I", SYNTH_STATIC, |m| {
            m.registers(1, 0);
            let through_derived = m.field("LDerived;", "value", "I");
            m.sget(0, through_derived);
            m.ret(0);
        })
        .build();
    let mut store = DexStore::new("classes");
    store.add_classes(vec![base, derived]);
    let mut stores = vec![store];

    // SynthPass alone, with strict ordering checks on, sees the un-rebound
    // reference and refuses to continue.
    let config = Configuration::from_value(json!({
        "SynthPass": { "require_rebound": true }
    }));
    let mut manager = PassManager::new(vec![Box::new(SynthPass::new())]);
    let result = manager.run_passes(&mut stores, &ctx, &config);
    assert!(matches!(result, Err(dexopt::Error::Config(_))));
}
