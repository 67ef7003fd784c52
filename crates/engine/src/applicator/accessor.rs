//! Accessor and invoker synthesis.
//!
//! Abstract accessor methods on a mixin pair with a concrete field or
//! method on the target. Bodies are generated after all merges of the
//! cycle, so members added by other mixins are valid targets; synthesized
//! methods append after every merged method for deterministic output.

use crate::error::{EngineError, EngineResult};
use crate::info::{AccessorInfo, AccessorKind, MixinInfo};
use crate::target_context::TargetContext;
use mixin_bytecode::{AccessFlags, Insn, MethodNode, Opcode, TypeDesc};

pub(super) fn pass_accessors(ctx: &mut TargetContext, mixins: &[&MixinInfo]) -> EngineResult<()> {
    for mixin in mixins {
        for accessor in &mixin.accessors {
            let (name, desc) = crate::inject::split_key(&accessor.method_key);
            let declared = mixin.node.find_method(name, desc).ok_or_else(|| {
                EngineError::resolution(
                    mixin.class_name.clone(),
                    format!("accessor {} vanished from the mixin", accessor.method_key),
                )
            })?;
            let synthesized = match accessor.kind {
                AccessorKind::FieldGetter => generate_getter(ctx, mixin, accessor, declared)?,
                AccessorKind::FieldSetter => generate_setter(ctx, mixin, accessor, declared)?,
                AccessorKind::MethodProxy => generate_invoker(ctx, mixin, accessor, declared)?,
            };
            ctx.class.methods.push(synthesized);
        }
    }
    Ok(())
}

/// The target member name: the annotation's explicit value, or the
/// accessor's name with its verb prefix stripped and decapitalized.
fn target_member_name(accessor: &AccessorInfo, method_name: &str) -> String {
    if let Some(explicit) = &accessor.explicit_target {
        return explicit.clone();
    }
    let stripped = ["get", "set", "is", "invoke", "call"]
        .iter()
        .find_map(|prefix| method_name.strip_prefix(prefix))
        .unwrap_or(method_name);
    let mut chars = stripped.chars();
    match chars.next() {
        Some(first) => format!("{}{}", first.to_ascii_lowercase(), chars.as_str()),
        None => stripped.to_string(),
    }
}

fn base_method(declared: &MethodNode, is_static_member: bool) -> MethodNode {
    let mut access = declared.access - AccessFlags::ABSTRACT;
    if is_static_member {
        access |= AccessFlags::STATIC;
    }
    let mut method = MethodNode::new(access, declared.name.clone(), declared.desc.clone());
    method.signature = declared.signature.clone();
    method
}

fn generate_getter(
    ctx: &TargetContext,
    mixin: &MixinInfo,
    accessor: &AccessorInfo,
    declared: &MethodNode,
) -> EngineResult<MethodNode> {
    let field_name = target_member_name(accessor, &declared.name);
    let (_, ret) = declared.signature_types().map_err(|e| {
        EngineError::bytecode(format!("{}::{}", mixin.class_name, declared.name), e)
    })?;
    let field = ctx
        .class
        .find_field(&field_name)
        .ok_or_else(|| {
            EngineError::resolution(
                mixin.class_name.clone(),
                format!(
                    "accessor {} names field {field_name} which {} does not declare",
                    declared.name, ctx.class.name
                ),
            )
        })?;
    if TypeDesc::parse(&field.desc).ok().as_ref() != Some(&ret) {
        return Err(EngineError::resolution(
            mixin.class_name.clone(),
            format!(
                "accessor {} returns {ret} but field {field_name} is {}",
                declared.name, field.desc
            ),
        ));
    }
    let is_static = field.is_static();
    let mut method = base_method(declared, is_static);
    if is_static {
        method.instructions.add(Insn::Field {
            opcode: Opcode::GETSTATIC,
            owner: ctx.class.name.clone(),
            name: field_name,
            desc: field.desc.clone(),
        });
    } else {
        method.instructions.add(Insn::Var {
            opcode: Opcode::ALOAD,
            index: 0,
        });
        method.instructions.add(Insn::Field {
            opcode: Opcode::GETFIELD,
            owner: ctx.class.name.clone(),
            name: field_name,
            desc: field.desc.clone(),
        });
    }
    method.instructions.add(Insn::Simple(ret.return_opcode()));
    method.max_stack = ret.slot_size().max(1);
    method.max_locals = if is_static { 0 } else { 1 };
    Ok(method)
}

fn generate_setter(
    ctx: &TargetContext,
    mixin: &MixinInfo,
    accessor: &AccessorInfo,
    declared: &MethodNode,
) -> EngineResult<MethodNode> {
    let field_name = target_member_name(accessor, &declared.name);
    let (args, _) = declared.signature_types().map_err(|e| {
        EngineError::bytecode(format!("{}::{}", mixin.class_name, declared.name), e)
    })?;
    let [value_ty] = args.as_slice() else {
        return Err(EngineError::resolution(
            mixin.class_name.clone(),
            format!("setter {} must take exactly one argument", declared.name),
        ));
    };
    let field = ctx
        .class
        .find_field(&field_name)
        .ok_or_else(|| {
            EngineError::resolution(
                mixin.class_name.clone(),
                format!(
                    "accessor {} names field {field_name} which {} does not declare",
                    declared.name, ctx.class.name
                ),
            )
        })?;
    if TypeDesc::parse(&field.desc).ok().as_ref() != Some(value_ty) {
        return Err(EngineError::resolution(
            mixin.class_name.clone(),
            format!(
                "setter {} takes {value_ty} but field {field_name} is {}",
                declared.name, field.desc
            ),
        ));
    }
    let is_static = field.is_static();
    let mut method = base_method(declared, is_static);
    if is_static {
        method.instructions.add(Insn::Var {
            opcode: value_ty.load_opcode(),
            index: 0,
        });
        method.instructions.add(Insn::Field {
            opcode: Opcode::PUTSTATIC,
            owner: ctx.class.name.clone(),
            name: field_name,
            desc: field.desc.clone(),
        });
    } else {
        method.instructions.add(Insn::Var {
            opcode: Opcode::ALOAD,
            index: 0,
        });
        method.instructions.add(Insn::Var {
            opcode: value_ty.load_opcode(),
            index: 1,
        });
        method.instructions.add(Insn::Field {
            opcode: Opcode::PUTFIELD,
            owner: ctx.class.name.clone(),
            name: field_name,
            desc: field.desc.clone(),
        });
    }
    method.instructions.add(Insn::Simple(Opcode::RETURN));
    method.max_stack = 1 + value_ty.slot_size();
    method.max_locals = value_ty.slot_size() + if is_static { 0 } else { 1 };
    Ok(method)
}

fn generate_invoker(
    ctx: &TargetContext,
    mixin: &MixinInfo,
    accessor: &AccessorInfo,
    declared: &MethodNode,
) -> EngineResult<MethodNode> {
    let method_name = target_member_name(accessor, &declared.name);
    let target_method = ctx
        .class
        .find_method(&method_name, &declared.desc)
        .ok_or_else(|| {
            EngineError::resolution(
                mixin.class_name.clone(),
                format!(
                    "invoker {} names method {method_name}{} which {} does not declare",
                    declared.name, declared.desc, ctx.class.name
                ),
            )
        })?;
    let is_static = target_method.is_static();
    let (args, ret) = declared.signature_types().map_err(|e| {
        EngineError::bytecode(format!("{}::{}", mixin.class_name, declared.name), e)
    })?;

    let mut method = base_method(declared, is_static);
    let mut slot = 0u16;
    if !is_static {
        method.instructions.add(Insn::Var {
            opcode: Opcode::ALOAD,
            index: 0,
        });
        slot = 1;
    }
    for arg in &args {
        method.instructions.add(Insn::Var {
            opcode: arg.load_opcode(),
            index: slot,
        });
        slot += arg.slot_size();
    }
    method.instructions.add(Insn::Method {
        opcode: if is_static {
            Opcode::INVOKESTATIC
        } else {
            Opcode::INVOKEVIRTUAL
        },
        owner: ctx.class.name.clone(),
        name: method_name,
        desc: declared.desc.clone(),
        itf: false,
    });
    method.instructions.add(Insn::Simple(ret.return_opcode()));
    method.max_stack = slot.max(ret.slot_size()).max(1);
    method.max_locals = slot;
    Ok(method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_inflection() {
        let accessor = AccessorInfo {
            method_key: "getCounter()I".to_string(),
            kind: AccessorKind::FieldGetter,
            explicit_target: None,
        };
        assert_eq!(target_member_name(&accessor, "getCounter"), "counter");
        assert_eq!(target_member_name(&accessor, "isActive"), "active");
        assert_eq!(target_member_name(&accessor, "invokeTick"), "tick");
        assert_eq!(target_member_name(&accessor, "callReset"), "reset");

        let explicit = AccessorInfo {
            explicit_target: Some("realName".to_string()),
            ..accessor
        };
        assert_eq!(target_member_name(&explicit, "getCounter"), "realName");
    }
}
