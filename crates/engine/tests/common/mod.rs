//! Shared scaffolding for engine integration tests.
//!
//! Targets and mixins are assembled in memory with the bytecode builder;
//! annotations are constructed directly as trees, exactly as they would
//! arrive from compiled mixin sources.
#![allow(dead_code)]

use mixin_bytecode::{
    emit_class, parse_class, AnnotationNode, AnnotationValue, ClassNode, ConstantValue,
};
use mixin_engine::{MapResourceProvider, MixinEngine};
use mixin_metadata::MapClassSource;
use mixin_core::{MixinEnvironment, MixinSide};
use std::sync::Arc;

pub const MIXIN: &str = "Lmixin/Mixin;";
pub const INJECT: &str = "Lmixin/injection/Inject;";
pub const REDIRECT: &str = "Lmixin/injection/Redirect;";
pub const MODIFY_ARG: &str = "Lmixin/injection/ModifyArg;";
pub const MODIFY_CONSTANT: &str = "Lmixin/injection/ModifyConstant;";
pub const AT: &str = "Lmixin/injection/At;";
pub const CONSTANT: &str = "Lmixin/injection/Constant;";
pub const OVERWRITE: &str = "Lmixin/Overwrite;";
pub const SHADOW: &str = "Lmixin/Shadow;";
pub const ACCESSOR: &str = "Lmixin/gen/Accessor;";
pub const CALLBACK_INFO_DESC: &str = "(Lmixin/callback/CallbackInfo;)V";

pub fn string_value(s: &str) -> AnnotationValue {
    AnnotationValue::Const(ConstantValue::String(s.to_string()))
}

pub fn int_value(v: i32) -> AnnotationValue {
    AnnotationValue::Const(ConstantValue::Int(v))
}

/// The class-level mixin marker naming explicit targets.
pub fn marker(targets: &[&str], priority: Option<i32>) -> AnnotationNode {
    let mut node = AnnotationNode::new(MIXIN);
    node.set(
        "value",
        AnnotationValue::Array(
            targets
                .iter()
                .map(|t| AnnotationValue::Class(format!("L{t};")))
                .collect(),
        ),
    );
    if let Some(priority) = priority {
        node.set("priority", int_value(priority));
    }
    node
}

/// An `At` query.
pub fn at(value: &str) -> AnnotationNode {
    let mut node = AnnotationNode::new(AT);
    node.set("value", string_value(value));
    node
}

/// An `At` query with a target member.
pub fn at_target(value: &str, target: &str) -> AnnotationNode {
    let mut node = at(value);
    node.set("target", string_value(target));
    node
}

/// An injector annotation of `desc` over the named target methods.
pub fn injector(desc: &str, methods: &[&str], ats: Vec<AnnotationNode>) -> AnnotationNode {
    let mut node = AnnotationNode::new(desc);
    node.set(
        "method",
        AnnotationValue::Array(methods.iter().map(|m| string_value(m)).collect()),
    );
    node.set(
        "at",
        AnnotationValue::Array(ats.into_iter().map(AnnotationValue::Annotation).collect()),
    );
    node
}

/// Spins up an engine over in-memory classes and one configuration.
pub fn engine_with(classes: &[&ClassNode], config_json: &str) -> MixinEngine {
    engine_with_resources(classes, config_json, &[])
}

/// Engine with additional named resources (reference maps).
pub fn engine_with_resources(
    classes: &[&ClassNode],
    config_json: &str,
    resources: &[(&str, &str)],
) -> MixinEngine {
    let mut source = MapClassSource::new();
    for class in classes {
        source.insert(class.name.clone(), emit_class(class).expect("emit test class"));
    }
    let mut provider = MapResourceProvider::new();
    for (name, body) in resources {
        provider.insert(*name, body.as_bytes().to_vec());
    }
    let engine = MixinEngine::new(
        MixinEnvironment::new(MixinSide::Universal),
        Arc::new(source),
        Arc::new(provider),
        Box::new(mixin_config::NullPluginFactory),
    );
    engine
        .register_config_source("test.mixins.json", config_json)
        .expect("register config");
    engine
}

/// Runs one class through the transformer and re-parses the result.
pub fn transform(engine: &MixinEngine, target: &ClassNode) -> ClassNode {
    let input = emit_class(target).expect("emit target");
    let output = engine
        .transform(&target.name, &input)
        .expect("transform target");
    parse_class(&output).expect("parse transformed")
}

/// Names of methods invoked by `method`, in instruction order.
pub fn invoked_names(class: &ClassNode, name: &str, desc: &str) -> Vec<String> {
    let method = class.find_method(name, desc).expect("method present");
    method
        .instructions
        .iter()
        .filter_map(|(_, insn)| match insn {
            mixin_bytecode::Insn::Method { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

/// The string constants loaded by `method`, in instruction order.
pub fn loaded_strings(class: &ClassNode, name: &str, desc: &str) -> Vec<String> {
    let method = class.find_method(name, desc).expect("method present");
    method
        .instructions
        .iter()
        .filter_map(|(_, insn)| match insn {
            mixin_bytecode::Insn::Ldc(ConstantValue::String(s)) => Some(s.clone()),
            _ => None,
        })
        .collect()
}
