//! Integration tests for class file emission and re-parsing.

use mixin_bytecode::{
    emit_class, parse_class, parse_class_header, AccessFlags, AnnotationNode, AnnotationValue,
    ClassBuilder, ConstantValue, Insn, MemberKind, Opcode,
};

fn build_sample() -> Vec<u8> {
    let class = ClassBuilder::new("net/example/Target")
        .super_class("net/example/Base")
        .interface("net/example/Tickable")
        .field(AccessFlags::PRIVATE, "counter", "I")
        .method(AccessFlags::PUBLIC, "<init>", "()V", |body| {
            body.aload(0)
                .invoke_special("net/example/Base", "<init>", "()V")
                .vreturn();
        })
        .method(AccessFlags::PUBLIC, "update", "(I)I", |body| {
            let skip = body.label();
            body.iload(1)
                .jump(Opcode::IFLE, skip)
                .aload(0)
                .getfield("net/example/Target", "counter", "I")
                .iload(1)
                .op(Opcode::IADD)
                .ireturn()
                .place(skip)
                .iconst(0)
                .ireturn();
        })
        .method(AccessFlags::PUBLIC | AccessFlags::STATIC, "name", "()Ljava/lang/String;", |body| {
            body.ldc_str("target").areturn();
        })
        .build();
    emit_class(&class).expect("emit")
}

#[test]
fn test_roundtrip_preserves_structure() {
    let bytes = build_sample();
    let class = parse_class(&bytes).expect("parse");

    assert_eq!(class.name, "net/example/Target");
    assert_eq!(class.super_name.as_deref(), Some("net/example/Base"));
    assert_eq!(class.interfaces, vec!["net/example/Tickable".to_string()]);
    assert_eq!(class.fields.len(), 1);
    assert_eq!(class.fields[0].name, "counter");
    assert_eq!(class.methods.len(), 3);

    let update = class.find_method("update", "(I)I").expect("update method");
    let opcodes: Vec<Option<Opcode>> = update
        .instructions
        .iter()
        .map(|(_, insn)| insn.opcode())
        .collect();
    // Branch survives with its label reconstructed.
    assert!(opcodes.contains(&Some(Opcode::IFLE)));
    assert_eq!(
        opcodes.iter().filter(|op| **op == Some(Opcode::IRETURN)).count(),
        2
    );
}

#[test]
fn test_double_roundtrip_is_stable() {
    let bytes = build_sample();
    let class = parse_class(&bytes).expect("first parse");
    let bytes2 = emit_class(&class).expect("second emit");
    let class2 = parse_class(&bytes2).expect("second parse");

    assert_eq!(class.name, class2.name);
    assert_eq!(class.methods.len(), class2.methods.len());
    for (a, b) in class.methods.iter().zip(class2.methods.iter()) {
        assert_eq!(a.member_key(), b.member_key());
        assert_eq!(a.instructions.len(), b.instructions.len());
        let left: Vec<Option<Opcode>> = a.instructions.iter().map(|(_, i)| i.opcode()).collect();
        let right: Vec<Option<Opcode>> = b.instructions.iter().map(|(_, i)| i.opcode()).collect();
        assert_eq!(left, right);
    }
}

#[test]
fn test_annotations_roundtrip() {
    let mut marker = AnnotationNode::new("Lmixin/Mixin;");
    marker.set(
        "targets",
        AnnotationValue::Array(vec![AnnotationValue::Const(ConstantValue::String(
            "net/example/Target".to_string(),
        ))]),
    );
    marker.set("priority", AnnotationValue::Const(ConstantValue::Int(500)));

    let class = ClassBuilder::new("net/example/MixinTarget")
        .annotation(marker)
        .method(AccessFlags::PUBLIC, "hook", "()V", |body| {
            body.vreturn();
        })
        .build();
    let reparsed = parse_class(&emit_class(&class).expect("emit")).expect("parse");

    let marker = reparsed
        .visible_annotations
        .iter()
        .find(|a| a.type_name() == "mixin/Mixin")
        .expect("marker annotation");
    assert_eq!(marker.get_str_array("targets"), vec!["net/example/Target"]);
    assert_eq!(marker.get_i32("priority"), Some(500));
}

#[test]
fn test_header_parse_lists_members() {
    let bytes = build_sample();
    let header = parse_class_header(&bytes).expect("header");
    assert_eq!(header.name, "net/example/Target");
    assert_eq!(header.super_name.as_deref(), Some("net/example/Base"));
    let fields: Vec<_> = header
        .members
        .iter()
        .filter(|m| m.kind == MemberKind::Field)
        .collect();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].name, "counter");
    let methods: Vec<_> = header
        .members
        .iter()
        .filter(|m| m.kind == MemberKind::Method)
        .collect();
    assert_eq!(methods.len(), 3);
}

#[test]
fn test_untouched_constant_values_survive() {
    let bytes = build_sample();
    let class = parse_class(&bytes).expect("parse");
    let name = class
        .find_method("name", "()Ljava/lang/String;")
        .expect("name method");
    let has_string = name.instructions.iter().any(|(_, insn)| {
        matches!(insn, Insn::Ldc(ConstantValue::String(s)) if s == "target")
    });
    assert!(has_string);
}
