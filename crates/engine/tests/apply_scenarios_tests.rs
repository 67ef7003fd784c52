//! End-to-end apply scenarios through the transformer entry point.

mod common;

use common::*;
use mixin_bytecode::{AccessFlags, ClassBuilder, Insn, Opcode};

const CONFIG: &str = r#"{"package": "test", "mixins": ["MixinT"]}"#;

/// A callback at HEAD lands its handler call before the original body.
#[test]
fn test_head_callback_inserts_handler_call() {
    let target = ClassBuilder::new("test/T")
        .field(AccessFlags::PRIVATE, "counter", "I")
        .method(AccessFlags::PUBLIC, "foo", "()V", |body| {
            body.vreturn();
        })
        .build();

    let mixin = ClassBuilder::new("test/MixinT")
        .annotation(marker(&["test/T"], None))
        .method(AccessFlags::PRIVATE, "hook", CALLBACK_INFO_DESC, |body| {
            body.annotation(injector(INJECT, &["foo"], vec![at("HEAD")]));
            body.aload(0)
                .aload(0)
                .getfield("test/MixinT", "counter", "I")
                .iconst(1)
                .op(Opcode::IADD)
                .putfield("test/MixinT", "counter", "I")
                .vreturn();
        })
        .build();

    let engine = engine_with(&[&target, &mixin], CONFIG);
    let out = transform(&engine, &target);

    // The handler merged into the target and is called from foo before the
    // original return.
    let handler = out.find_method("hook", CALLBACK_INFO_DESC).expect("merged handler");
    assert!(!handler.instructions.is_empty());
    let calls = invoked_names(&out, "foo", "()V");
    assert!(calls.contains(&"hook".to_string()));
    // Field references inside the merged handler now point at the target.
    let owners: Vec<String> = handler
        .instructions
        .iter()
        .filter_map(|(_, insn)| match insn {
            Insn::Field { owner, .. } => Some(owner.clone()),
            _ => None,
        })
        .collect();
    assert!(owners.iter().all(|o| o == "test/T"));
}

/// Three invocations of the transformed method mean three handler calls:
/// the injection sits on the execution path, not behind a branch.
#[test]
fn test_head_callback_runs_unconditionally() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC, "foo", "()V", |body| {
            body.vreturn();
        })
        .build();
    let mixin = ClassBuilder::new("test/MixinT")
        .annotation(marker(&["test/T"], None))
        .method(AccessFlags::PRIVATE, "hook", CALLBACK_INFO_DESC, |body| {
            body.annotation(injector(INJECT, &["foo"], vec![at("HEAD")]));
            body.vreturn();
        })
        .build();

    let engine = engine_with(&[&target, &mixin], CONFIG);
    let out = transform(&engine, &target);
    let foo = out.find_method("foo", "()V").expect("foo");

    // No conditional jump guards the handler call.
    let mut saw_call = false;
    for (_, insn) in foo.instructions.iter() {
        if let Insn::Method { name, .. } = insn {
            if name == "hook" {
                saw_call = true;
                break;
            }
        }
        if let Insn::Jump { .. } = insn {
            panic!("handler call must not sit behind a branch");
        }
    }
    assert!(saw_call);
}

/// A modify-arg handler transforms one argument of the matched call.
#[test]
fn test_modify_arg_rewrites_invoke_operand() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC | AccessFlags::STATIC, "multiply", "(II)I", |body| {
            body.iload(0).iload(1).op(Opcode::IMUL).ireturn();
        })
        .method(AccessFlags::PUBLIC, "bar", "(I)I", |body| {
            body.iload(1)
                .iconst(2)
                .invoke_static("test/T", "multiply", "(II)I")
                .ireturn();
        })
        .build();

    let mut modify = injector(
        MODIFY_ARG,
        &["bar"],
        vec![at_target("INVOKE", "Ltest/T;multiply(II)I")],
    );
    modify.set("index", int_value(0));
    let mixin = ClassBuilder::new("test/MixinT")
        .annotation(marker(&["test/T"], None))
        .method(AccessFlags::PRIVATE | AccessFlags::STATIC, "grow", "(I)I", |body| {
            body.annotation(modify);
            body.iload(0).iconst(1).op(Opcode::IADD).ireturn();
        })
        .build();

    let engine = engine_with(&[&target, &mixin], CONFIG);
    let out = transform(&engine, &target);

    let calls = invoked_names(&out, "bar", "(I)I");
    // The handler call precedes the multiply invocation.
    let grow_at = calls.iter().position(|c| c == "grow").expect("grow called");
    let multiply_at = calls.iter().position(|c| c == "multiply").expect("multiply kept");
    assert!(grow_at < multiply_at);
}

/// Competing overwrites resolve to the higher priority body.
#[test]
fn test_higher_priority_overwrite_wins() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC, "baz", "()Ljava/lang/String;", |body| {
            body.ldc_str("a").areturn();
        })
        .build();

    let build_overwrite = |class: &str, priority: i32, result: &str| {
        ClassBuilder::new(class)
            .annotation(marker(&["test/T"], Some(priority)))
            .method(AccessFlags::PUBLIC, "baz", "()Ljava/lang/String;", |body| {
                body.annotation(mixin_bytecode::AnnotationNode::new(OVERWRITE));
                body.ldc_str(result).areturn();
            })
            .build()
    };
    let hi = build_overwrite("test/MixinHi", 1000, "b");
    let lo = build_overwrite("test/MixinLo", 500, "c");

    let config = r#"{"package": "test", "mixins": ["MixinHi", "MixinLo"]}"#;
    let engine = engine_with(&[&target, &hi, &lo], config);
    let out = transform(&engine, &target);

    assert_eq!(loaded_strings(&out, "baz", "()Ljava/lang/String;"), vec!["b"]);
}

/// An ordinal redirect replaces exactly the selected call site.
#[test]
fn test_ordinal_selects_nth_redirect_target() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC | AccessFlags::STATIC, "sink", "(I)V", |body| {
            body.vreturn();
        })
        .method(AccessFlags::PUBLIC, "m", "()V", |body| {
            for _ in 0..10 {
                body.iconst(1).invoke_static("test/T", "sink", "(I)V");
            }
            body.vreturn();
        })
        .build();

    let mut redirect = injector(REDIRECT, &["m"], Vec::new());
    let mut point = at_target("INVOKE", "Ltest/T;sink(I)V");
    point.set("ordinal", int_value(3));
    redirect.set(
        "at",
        mixin_bytecode::AnnotationValue::Annotation(point),
    );
    let mixin = ClassBuilder::new("test/MixinT")
        .annotation(marker(&["test/T"], None))
        .method(AccessFlags::PRIVATE | AccessFlags::STATIC, "swallow", "(I)V", |body| {
            body.annotation(redirect);
            body.vreturn();
        })
        .build();

    let engine = engine_with(&[&target, &mixin], CONFIG);
    let out = transform(&engine, &target);

    let calls = invoked_names(&out, "m", "()V");
    assert_eq!(calls.len(), 10);
    assert_eq!(calls.iter().filter(|c| *c == "sink").count(), 9);
    // Zero-indexed ordinal 3: the fourth call site.
    assert_eq!(calls[3], "swallow");
}

/// Selector names resolve through the reference map of the active
/// context; without the context the injection finds nothing.
#[test]
fn test_refmap_resolves_obfuscated_target() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC, "a", "()V", |body| {
            body.vreturn();
        })
        .build();

    let build_engine = || {
        let mut inject = injector(INJECT, &["originalName()V"], vec![at("HEAD")]);
        inject.set("require", int_value(1));
        let mixin = ClassBuilder::new("test/MixinT")
            .annotation(marker(&["test/T"], None))
            .method(AccessFlags::PRIVATE, "hook", CALLBACK_INFO_DESC, |body| {
                body.annotation(inject);
                body.vreturn();
            })
            .build();
        let config = r#"{"package": "test", "mixins": ["MixinT"], "refmap": "test.refmap.json"}"#;
        let refmap = r#"{
            "mappings": {},
            "data": {
                "dev": { "test.MixinT": { "originalName()V": "a()V" } }
            }
        }"#;
        engine_with_resources(&[&target, &mixin], config, &[("test.refmap.json", refmap)])
    };

    // With the context active the selector rewrites to the obfuscated name.
    let engine = build_engine();
    engine.set_refmap_context(Some("dev".to_string()));
    let out = transform(&engine, &target);
    assert!(invoked_names(&out, "a", "()V").contains(&"hook".to_string()));

    // Without it, zero matches against require=1: the target passes
    // through untouched and the failure is reported.
    let engine = build_engine();
    let input = mixin_bytecode::emit_class(&target).expect("emit");
    let output = engine.transform("test/T", &input).expect("non-fatal");
    assert_eq!(output, input);
    assert!(engine
        .diagnostics()
        .iter()
        .any(|d| d.category == "injection-not-found"));
}

/// Two HEAD callbacks stack in priority order, lower first.
#[test]
fn test_stacked_head_callbacks_run_in_priority_order() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC, "foo", "()V", |body| {
            body.vreturn();
        })
        .build();

    let build_hook = |class: &str, priority: i32, hook: &str| {
        ClassBuilder::new(class)
            .annotation(marker(&["test/T"], Some(priority)))
            .method(AccessFlags::PRIVATE, hook, CALLBACK_INFO_DESC, |body| {
                body.annotation(injector(INJECT, &["foo"], vec![at("HEAD")]));
                body.vreturn();
            })
            .build()
    };
    let first = build_hook("test/MixinFirst", 1000, "firstHook");
    let second = build_hook("test/MixinSecond", 2000, "secondHook");

    let config = r#"{"package": "test", "mixins": ["MixinFirst", "MixinSecond"]}"#;
    let engine = engine_with(&[&target, &first, &second], config);
    let out = transform(&engine, &target);

    let calls = invoked_names(&out, "foo", "()V");
    let first_at = calls.iter().position(|c| c == "firstHook").expect("first hook");
    let second_at = calls.iter().position(|c| c == "secondHook").expect("second hook");
    assert!(
        first_at < second_at,
        "lower priority hook must run first: {calls:?}"
    );
}
