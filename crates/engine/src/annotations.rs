//! The annotation surface the engine discovers metadata from.
//!
//! Mixin authors compile against a small annotation API; the engine only
//! ever sees its bytecode form, so everything here is descriptor strings
//! and typed readers over [`AnnotationNode`] trees.

use mixin_bytecode::{AnnotationNode, ClassNode, FieldNode, MethodNode};

/// Class marker: declares targets, priority and remap behaviour.
pub const MIXIN: &str = "Lmixin/Mixin;";
/// Relaxes target resolution for mixins compiled against unknown targets.
pub const PSEUDO: &str = "Lmixin/Pseudo;";
/// Member stand-in that must exist on the target.
pub const SHADOW: &str = "Lmixin/Shadow;";
/// Replaces a target method with an identical signature.
pub const OVERWRITE: &str = "Lmixin/Overwrite;";
/// Keeps a member out of the target on collision.
pub const UNIQUE: &str = "Lmixin/Unique;";
/// Enforces finality of a shadowed member.
pub const FINAL: &str = "Lmixin/Final;";
/// Strips finality from a shadowed member.
pub const MUTABLE: &str = "Lmixin/Mutable;";
/// Synthesized field accessor.
pub const ACCESSOR: &str = "Lmixin/gen/Accessor;";
/// Synthesized method invoker.
pub const INVOKER: &str = "Lmixin/gen/Invoker;";
/// Soft-implemented interfaces on the mixin class.
pub const IMPLEMENTS: &str = "Lmixin/Implements;";
/// One soft-implemented interface.
pub const INTERFACE: &str = "Lmixin/Interface;";

/// Callback injector.
pub const INJECT: &str = "Lmixin/injection/Inject;";
/// Invoke/field redirect injector.
pub const REDIRECT: &str = "Lmixin/injection/Redirect;";
/// Single-argument modifier.
pub const MODIFY_ARG: &str = "Lmixin/injection/ModifyArg;";
/// All-arguments modifier.
pub const MODIFY_ARGS: &str = "Lmixin/injection/ModifyArgs;";
/// Local variable modifier.
pub const MODIFY_VARIABLE: &str = "Lmixin/injection/ModifyVariable;";
/// Constant modifier.
pub const MODIFY_CONSTANT: &str = "Lmixin/injection/ModifyConstant;";
/// Injection point query.
pub const AT: &str = "Lmixin/injection/At;";
/// Injection point region.
pub const SLICE: &str = "Lmixin/injection/Slice;";
/// Typed constant descriptor for `ModifyConstant` and the CONSTANT point.
pub const CONSTANT: &str = "Lmixin/injection/Constant;";

/// Marker left on members merged into a target.
pub const MERGED: &str = "Lmixin/meta/Merged;";

/// Runtime callback object for void targets.
pub const CALLBACK_INFO: &str = "mixin/callback/CallbackInfo";
/// Runtime callback object carrying a return value.
pub const CALLBACK_INFO_RETURNABLE: &str = "mixin/callback/CallbackInfoReturnable";
/// Base class of synthesized argument bundles.
pub const ARGS_BASE: &str = "mixin/synthetic/Args";

/// All injector annotation descriptors.
pub const INJECTOR_DESCS: [&str; 6] = [
    INJECT,
    REDIRECT,
    MODIFY_ARG,
    MODIFY_ARGS,
    MODIFY_VARIABLE,
    MODIFY_CONSTANT,
];

/// Finds the class-level mixin marker.
pub fn mixin_marker(class: &ClassNode) -> Option<&AnnotationNode> {
    class.annotations().find(|a| a.desc == MIXIN)
}

/// True when the class carries the pseudo marker.
pub fn is_pseudo(class: &ClassNode) -> bool {
    class.annotations().any(|a| a.desc == PSEUDO)
}

/// Finds an annotation of `desc` on a method.
pub fn on_method<'a>(method: &'a MethodNode, desc: &str) -> Option<&'a AnnotationNode> {
    method.annotations().find(|a| a.desc == desc)
}

/// Finds an annotation of `desc` on a field.
pub fn on_field<'a>(field: &'a FieldNode, desc: &str) -> Option<&'a AnnotationNode> {
    field.annotations().find(|a| a.desc == desc)
}

/// Finds the injector annotation on a method, if any.
pub fn injector_annotation(method: &MethodNode) -> Option<&AnnotationNode> {
    method
        .annotations()
        .find(|a| INJECTOR_DESCS.contains(&a.desc.as_str()))
}

/// Converts an annotation class value (`La/B;` or `a/B`) to an internal name.
pub fn class_value_to_internal(value: &str) -> String {
    let trimmed = value
        .strip_prefix('L')
        .and_then(|s| s.strip_suffix(';'))
        .unwrap_or(value);
    trimmed.replace('.', "/")
}

/// Strips mixin metadata annotations from a merged member.
pub fn strip_mixin_annotations(annotations: &mut Vec<AnnotationNode>) {
    annotations.retain(|a| {
        !a.desc.starts_with("Lmixin/") || a.desc == MERGED
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixin_bytecode::{AccessFlags, AnnotationValue, ConstantValue};

    #[test]
    fn test_class_value_to_internal() {
        assert_eq!(class_value_to_internal("La/B;"), "a/B");
        assert_eq!(class_value_to_internal("com.example.Target"), "com/example/Target");
        assert_eq!(class_value_to_internal("a/B"), "a/B");
    }

    #[test]
    fn test_injector_annotation_lookup() {
        let mut method = MethodNode::new(AccessFlags::PRIVATE, "hook", "()V");
        let mut inject = AnnotationNode::new(INJECT);
        inject.set(
            "method",
            AnnotationValue::Const(ConstantValue::String("update".to_string())),
        );
        method.visible_annotations.push(inject);
        assert!(injector_annotation(&method).is_some());
        assert!(on_method(&method, OVERWRITE).is_none());
    }

    #[test]
    fn test_strip_keeps_merge_marker() {
        let mut annotations = vec![
            AnnotationNode::new(SHADOW),
            AnnotationNode::new(MERGED),
            AnnotationNode::new("Ljava/lang/Deprecated;"),
        ];
        strip_mixin_annotations(&mut annotations);
        let descs: Vec<&str> = annotations.iter().map(|a| a.desc.as_str()).collect();
        assert_eq!(descs, vec![MERGED, "Ljava/lang/Deprecated;"]);
    }
}
