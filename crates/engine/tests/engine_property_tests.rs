//! Quantified engine properties: identity, ordering, counting, merging.

mod common;

use common::*;
use mixin_bytecode::{
    emit_class, AccessFlags, AnnotationNode, AnnotationValue, ClassBuilder, Insn, Opcode,
};

const CONFIG: &str = r#"{"package": "test", "mixins": ["MixinT"]}"#;

/// Classes no configuration targets pass through byte-identical.
#[test]
fn test_identity_for_untargeted_classes() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC, "foo", "()V", |body| {
            body.vreturn();
        })
        .build();
    let bystander = ClassBuilder::new("test/Bystander")
        .method(AccessFlags::PUBLIC, "bar", "()V", |body| {
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

    let engine = engine_with(&[&target, &bystander, &mixin], CONFIG);
    let input = emit_class(&bystander).expect("emit");
    let output = engine.transform("test/Bystander", &input).expect("identity");
    assert_eq!(input, output);
}

/// Mixins touching disjoint members produce the same structure in either
/// registration order.
#[test]
fn test_order_independence_for_disjoint_mixins() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC, "left", "()V", |body| {
            body.vreturn();
        })
        .method(AccessFlags::PUBLIC, "right", "()V", |body| {
            body.vreturn();
        })
        .build();

    let build = |class: &str, method: &str, hook: &str| {
        ClassBuilder::new(class)
            .annotation(marker(&["test/T"], None))
            .field(AccessFlags::PRIVATE, format!("{hook}State"), "I".to_string())
            .method(AccessFlags::PRIVATE, hook, CALLBACK_INFO_DESC, |body| {
                body.annotation(injector(INJECT, &[method], vec![at("HEAD")]));
                body.vreturn();
            })
            .build()
    };
    let m1 = build("test/MixinLeft", "left", "leftHook");
    let m2 = build("test/MixinRight", "right", "rightHook");

    let shape = |config: &str| {
        let engine = engine_with(&[&target, &m1, &m2], config);
        let out = transform(&engine, &target);
        let mut fields: Vec<String> = out.fields.iter().map(|f| f.name.clone()).collect();
        fields.sort();
        let mut methods: Vec<String> = out.methods.iter().map(|m| m.member_key()).collect();
        methods.sort();
        let left: Vec<_> = out
            .find_method("left", "()V")
            .expect("left")
            .instructions
            .iter()
            .map(|(_, i)| i.opcode())
            .collect();
        let right: Vec<_> = out
            .find_method("right", "()V")
            .expect("right")
            .instructions
            .iter()
            .map(|(_, i)| i.opcode())
            .collect();
        (fields, methods, left, right)
    };

    let forward = shape(r#"{"package": "test", "mixins": ["MixinLeft", "MixinRight"]}"#);
    let backward = shape(r#"{"package": "test", "mixins": ["MixinRight", "MixinLeft"]}"#);
    assert_eq!(forward, backward);
}

/// An unmet `require` fails the target; the host sees original bytes for a
/// non-required configuration.
#[test]
fn test_require_bound_unmet() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC, "foo", "()V", |body| {
            body.vreturn();
        })
        .build();
    let mut inject = injector(
        INJECT,
        &["foo"],
        vec![at_target("INVOKE", "Ltest/T;absent()V")],
    );
    inject.set("require", int_value(2));
    let mixin = ClassBuilder::new("test/MixinT")
        .annotation(marker(&["test/T"], None))
        .method(AccessFlags::PRIVATE, "hook", CALLBACK_INFO_DESC, |body| {
            body.annotation(inject);
            body.vreturn();
        })
        .build();

    let engine = engine_with(&[&target, &mixin], CONFIG);
    let input = emit_class(&target).expect("emit");
    let output = engine.transform("test/T", &input).expect("non-fatal");
    assert_eq!(input, output);
    assert!(engine
        .diagnostics()
        .iter()
        .any(|d| d.category == "injection-not-found"));
}

/// The same unmet bound on a required configuration is fatal.
#[test]
fn test_require_bound_fatal_when_config_required() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC, "foo", "()V", |body| {
            body.vreturn();
        })
        .build();
    let mut inject = injector(
        INJECT,
        &["foo"],
        vec![at_target("INVOKE", "Ltest/T;absent()V")],
    );
    inject.set("require", int_value(1));
    let mixin = ClassBuilder::new("test/MixinT")
        .annotation(marker(&["test/T"], None))
        .method(AccessFlags::PRIVATE, "hook", CALLBACK_INFO_DESC, |body| {
            body.annotation(inject);
            body.vreturn();
        })
        .build();

    let config = r#"{"package": "test", "mixins": ["MixinT"], "required": true}"#;
    let engine = engine_with(&[&target, &mixin], config);
    let input = emit_class(&target).expect("emit");
    assert!(engine.transform("test/T", &input).is_err());
}

/// `allow` caps the number of matches an injector may claim.
#[test]
fn test_allow_bound_exceeded() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC | AccessFlags::STATIC, "sink", "(I)V", |body| {
            body.vreturn();
        })
        .method(AccessFlags::PUBLIC, "m", "()V", |body| {
            for _ in 0..3 {
                body.iconst(1).invoke_static("test/T", "sink", "(I)V");
            }
            body.vreturn();
        })
        .build();
    let mut inject = injector(
        INJECT,
        &["m"],
        vec![at_target("INVOKE", "Ltest/T;sink(I)V")],
    );
    inject.set("allow", int_value(2));
    let mixin = ClassBuilder::new("test/MixinT")
        .annotation(marker(&["test/T"], None))
        .method(AccessFlags::PRIVATE, "hook", CALLBACK_INFO_DESC, |body| {
            body.annotation(inject);
            body.vreturn();
        })
        .build();

    let engine = engine_with(&[&target, &mixin], CONFIG);
    let input = emit_class(&target).expect("emit");
    let output = engine.transform("test/T", &input).expect("non-fatal");
    assert_eq!(input, output);
    assert!(engine
        .diagnostics()
        .iter()
        .any(|d| d.category == "injection-not-found"));
}

/// A mixin whose shadow is missing drops out of the cycle; the target
/// passes through untouched.
#[test]
fn test_missing_shadow_drops_mixin() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC, "foo", "()V", |body| {
            body.vreturn();
        })
        .build();

    let mut shadow_field = mixin_bytecode::FieldNode::new(AccessFlags::PRIVATE, "missing", "I");
    shadow_field
        .visible_annotations
        .push(AnnotationNode::new(SHADOW));
    let mixin = ClassBuilder::new("test/MixinT")
        .annotation(marker(&["test/T"], None))
        .field_node(shadow_field)
        .method(AccessFlags::PRIVATE, "hook", CALLBACK_INFO_DESC, |body| {
            body.annotation(injector(INJECT, &["foo"], vec![at("HEAD")]));
            body.vreturn();
        })
        .build();

    let engine = engine_with(&[&target, &mixin], CONFIG);
    let input = emit_class(&target).expect("emit");
    let output = engine.transform("test/T", &input).expect("non-fatal");
    assert_eq!(input, output);
    assert!(engine
        .diagnostics()
        .iter()
        .any(|d| d.category == "resolution"));
}

/// A satisfied shadow validates and the mixin applies normally.
#[test]
fn test_shadow_satisfied() {
    let target = ClassBuilder::new("test/T")
        .field(AccessFlags::PRIVATE, "counter", "I")
        .method(AccessFlags::PUBLIC, "foo", "()V", |body| {
            body.vreturn();
        })
        .build();

    let mut shadow_field = mixin_bytecode::FieldNode::new(AccessFlags::PRIVATE, "counter", "I");
    shadow_field
        .visible_annotations
        .push(AnnotationNode::new(SHADOW));
    let mixin = ClassBuilder::new("test/MixinT")
        .annotation(marker(&["test/T"], None))
        .field_node(shadow_field)
        .method(AccessFlags::PRIVATE, "hook", CALLBACK_INFO_DESC, |body| {
            body.annotation(injector(INJECT, &["foo"], vec![at("HEAD")]));
            body.vreturn();
        })
        .build();

    let engine = engine_with(&[&target, &mixin], CONFIG);
    let out = transform(&engine, &target);
    // The shadow is not copied: exactly the target's own field remains.
    assert_eq!(out.fields.len(), 1);
    assert!(invoked_names(&out, "foo", "()V").contains(&"hook".to_string()));
}

/// Zero-condition expansion rewrites implicit-zero branches through the
/// constant handler.
#[test]
fn test_constant_zero_expansion() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC, "gate", "(I)I", |body| {
            let negative = body.label();
            body.iload(1)
                .jump(Opcode::IFLT, negative)
                .iconst(1)
                .ireturn()
                .place(negative)
                .iconst(0)
                .ireturn();
        })
        .build();

    let mut constant = AnnotationNode::new(CONSTANT);
    constant.set("intValue", int_value(0));
    constant.set(
        "expandZeroConditions",
        AnnotationValue::Array(vec![AnnotationValue::Enum {
            desc: "Lmixin/injection/Condition;".to_string(),
            value: "LESS_THAN_ZERO".to_string(),
        }]),
    );
    let mut modify = injector(MODIFY_CONSTANT, &["gate"], vec![at("CONSTANT")]);
    modify.set(
        "constant",
        AnnotationValue::Annotation(constant),
    );
    let mixin = ClassBuilder::new("test/MixinT")
        .annotation(marker(&["test/T"], None))
        .method(AccessFlags::PRIVATE | AccessFlags::STATIC, "threshold", "(I)I", |body| {
            body.annotation(modify);
            body.iload(0).ireturn();
        })
        .build();

    let engine = engine_with(&[&target, &mixin], CONFIG);
    let out = transform(&engine, &target);
    let gate = out.find_method("gate", "(I)I").expect("gate");

    // The implicit-zero branch became an explicit two-operand compare fed
    // by the handler.
    let has_icmp = gate
        .instructions
        .iter()
        .any(|(_, insn)| matches!(insn, Insn::Jump { opcode: Opcode::IF_ICMPLT, .. }));
    assert!(has_icmp);
    assert!(invoked_names(&out, "gate", "(I)I").contains(&"threshold".to_string()));
}

/// Interfaces contributed by a mixin union into the target's list.
#[test]
fn test_interface_union_and_merged_method() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC, "foo", "()V", |body| {
            body.vreturn();
        })
        .build();
    let marker_itf = ClassBuilder::new("test/Marker")
        .access(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
        .build();
    let mixin = ClassBuilder::new("test/MixinT")
        .annotation(marker(&["test/T"], None))
        .interface("test/Marker")
        .method(AccessFlags::PUBLIC, "extra", "()I", |body| {
            body.iconst(42).ireturn();
        })
        .build();

    let engine = engine_with(&[&target, &marker_itf, &mixin], CONFIG);
    let out = transform(&engine, &target);
    assert!(out.interfaces.contains(&"test/Marker".to_string()));
    // The plain method merged with its body intact.
    let extra = out.find_method("extra", "()I").expect("merged method");
    let constants: Vec<Option<i32>> = extra
        .instructions
        .iter()
        .map(|(_, i)| i.int_constant_value())
        .collect();
    assert!(constants.contains(&Some(42)));
}

/// Field initializers in the mixin constructor splice into every target
/// constructor after its superconstructor call.
#[test]
fn test_initializer_splice() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC, "<init>", "()V", |body| {
            body.aload(0)
                .invoke_special("java/lang/Object", "<init>", "()V")
                .vreturn();
        })
        .build();
    let mixin = ClassBuilder::new("test/MixinT")
        .annotation(marker(&["test/T"], None))
        .field(AccessFlags::PRIVATE, "flag", "Z")
        .method(AccessFlags::PUBLIC, "<init>", "()V", |body| {
            body.aload(0)
                .invoke_special("java/lang/Object", "<init>", "()V")
                .aload(0)
                .iconst(1)
                .putfield("test/MixinT", "flag", "Z")
                .vreturn();
        })
        .build();

    let engine = engine_with(&[&target, &mixin], CONFIG);
    let out = transform(&engine, &target);

    assert!(out.find_field("flag").is_some());
    let ctor = out.find_method("<init>", "()V").expect("ctor");
    let puts: Vec<(String, String)> = ctor
        .instructions
        .iter()
        .filter_map(|(_, insn)| match insn {
            Insn::Field {
                opcode: Opcode::PUTFIELD,
                owner,
                name,
                ..
            } => Some((owner.clone(), name.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(puts, vec![("test/T".to_string(), "flag".to_string())]);
}

/// Accessor synthesis pairs the abstract method with the target field.
#[test]
fn test_accessor_synthesis() {
    let target = ClassBuilder::new("test/T")
        .field(AccessFlags::PRIVATE, "counter", "I")
        .method(AccessFlags::PUBLIC, "foo", "()V", |body| {
            body.vreturn();
        })
        .build();

    let mut getter = mixin_bytecode::MethodNode::new(
        AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
        "getCounter",
        "()I",
    );
    getter
        .visible_annotations
        .push(AnnotationNode::new(ACCESSOR));
    let mixin = ClassBuilder::new("test/MixinT")
        .annotation(marker(&["test/T"], None))
        .method_node(getter)
        .build();

    let engine = engine_with(&[&target, &mixin], CONFIG);
    let out = transform(&engine, &target);
    let synthesized = out.find_method("getCounter", "()I").expect("accessor body");
    assert!(!synthesized.is_abstract());
    let reads_field = synthesized.instructions.iter().any(|(_, insn)| {
        matches!(
            insn,
            Insn::Field { opcode: Opcode::GETFIELD, name, .. } if name == "counter"
        )
    });
    assert!(reads_field);
}

/// Equal-priority field collisions between two mixins are a structural
/// apply error: the target falls back to its original bytes.
#[test]
fn test_equal_priority_field_collision() {
    let target = ClassBuilder::new("test/T")
        .method(AccessFlags::PUBLIC, "foo", "()V", |body| {
            body.vreturn();
        })
        .build();
    let build = |class: &str| {
        ClassBuilder::new(class)
            .annotation(marker(&["test/T"], None))
            .field(AccessFlags::PRIVATE, "shared", "I")
            .build()
    };
    let m1 = build("test/MixinOne");
    let m2 = build("test/MixinTwo");

    let config = r#"{"package": "test", "mixins": ["MixinOne", "MixinTwo"]}"#;
    let engine = engine_with(&[&target, &m1, &m2], config);
    let input = emit_class(&target).expect("emit");
    let output = engine.transform("test/T", &input).expect("non-fatal");
    assert_eq!(input, output);
    assert!(engine.diagnostics().iter().any(|d| d.category == "apply"));
}
