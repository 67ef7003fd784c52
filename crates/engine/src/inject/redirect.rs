//! Redirect injection.
//!
//! Replaces a matched invoke, field access, or `new ...` construction with
//! a call to the handler. The handler sees the original operands (receiver
//! first for instance operations) and may additionally capture the
//! enclosing target method's arguments.

use crate::error::{EngineError, EngineResult};
use crate::inject::{call_with_stack_args, method_mut, HandlerRef, InjectionInfo};
use crate::target_context::TargetContext;
use mixin_bytecode::{Insn, InsnId, MethodNode, Opcode, TypeDesc};

pub(super) fn apply(
    injection: &InjectionInfo,
    ctx: &mut TargetContext,
    method_key: &str,
    original: InsnId,
    current: InsnId,
    handler: &HandlerRef,
) -> EngineResult<()> {
    let target_name = ctx.class.name.clone();
    let (class, registry) = ctx.class_and_registry(method_key);
    let method = method_mut(class, method_key).ok_or_else(|| {
        EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            format!("target method {method_key} vanished before apply"),
        )
    })?;

    let matched = method
        .instructions
        .get(current)
        .cloned()
        .ok_or_else(|| {
            EngineError::invalid_injection(
                injection.mixin_class.clone(),
                injection.handler_key.clone(),
                "matched instruction is no longer present".to_string(),
            )
        })?;

    // The operand picture the original instruction consumes.
    let stack_types: Vec<TypeDesc> = match &matched {
        Insn::Method {
            opcode,
            owner,
            desc,
            name,
            ..
        } => {
            if *opcode == Opcode::INVOKESPECIAL && name == "<init>" {
                return Err(EngineError::invalid_injection(
                    injection.mixin_class.clone(),
                    injection.handler_key.clone(),
                    "constructor calls redirect through their NEW instruction".to_string(),
                ));
            }
            let (args, _) = TypeDesc::parse_method(desc)
                .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;
            let mut types = Vec::with_capacity(args.len() + 1);
            if *opcode != Opcode::INVOKESTATIC {
                types.push(TypeDesc::Object(owner.clone()));
            }
            types.extend(args);
            types
        }
        Insn::Field {
            opcode,
            owner,
            desc,
            ..
        } => {
            let field_ty = TypeDesc::parse(desc)
                .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;
            match opcode {
                Opcode::GETSTATIC => Vec::new(),
                Opcode::GETFIELD => vec![TypeDesc::Object(owner.clone())],
                Opcode::PUTSTATIC => vec![field_ty],
                Opcode::PUTFIELD => vec![TypeDesc::Object(owner.clone()), field_ty],
                _ => unreachable!("field instruction with non-field opcode"),
            }
        }
        Insn::Type {
            opcode: Opcode::NEW,
            ..
        } => {
            return redirect_construction(injection, method, registry, original, current, handler, &matched, &target_name);
        }
        other => {
            return Err(EngineError::invalid_injection(
                injection.mixin_class.clone(),
                injection.handler_key.clone(),
                format!(
                    "redirect matched a non-redirectable instruction: {other:?}"
                ),
            ));
        }
    };

    validate_signature(injection, method, handler, &stack_types, &matched, &target_name)?;

    let (handler_args, _) = handler.signature()?;
    let captures_enclosing = handler_args.len() > stack_types.len();

    if handler.is_static && !captures_enclosing {
        // The operands are already in call position.
        method
            .instructions
            .replace(current, handler.invoke())
            .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;
        return Ok(());
    }

    let mut insns = call_with_stack_args(method, &stack_types, handler);
    // The invoke goes last; enclosing argument loads slot in before it.
    if captures_enclosing {
        let invoke = insns.pop();
        let target_static = method.is_static();
        let mut slot = if target_static { 0 } else { 1 };
        for ty in &handler_args[stack_types.len()..] {
            insns.push(Insn::Var {
                opcode: ty.load_opcode(),
                index: slot,
            });
            slot += ty.slot_size();
        }
        if let Some(invoke) = invoke {
            insns.push(invoke);
        }
    }

    let inserted = method
        .instructions
        .insert_all_before(current, insns)
        .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;
    method
        .instructions
        .remove(current)
        .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;
    if let Some(last) = inserted.last() {
        registry.replaced(original, *last);
    }
    Ok(())
}

fn validate_signature(
    injection: &InjectionInfo,
    method: &MethodNode,
    handler: &HandlerRef,
    stack_types: &[TypeDesc],
    matched: &Insn,
    target_name: &str,
) -> EngineResult<()> {
    let (handler_args, handler_ret) = handler.signature()?;
    let expected_ret = match matched {
        Insn::Method { desc, .. } => {
            let (_, ret) = TypeDesc::parse_method(desc)
                .map_err(|e| EngineError::bytecode(target_name.to_string(), e))?;
            ret
        }
        Insn::Field { opcode, desc, .. } => match opcode {
            Opcode::GETFIELD | Opcode::GETSTATIC => TypeDesc::parse(desc)
                .map_err(|e| EngineError::bytecode(target_name.to_string(), e))?,
            _ => TypeDesc::Void,
        },
        _ => TypeDesc::Void,
    };
    let prefix_ok = handler_args.len() >= stack_types.len()
        && handler_args[..stack_types.len()]
            .iter()
            .zip(stack_types)
            .all(|(a, b)| a.slot_compatible(b));
    // The return must mirror the redirected operation exactly: a handler
    // returning a value for a void operation would leave an operand behind.
    if !prefix_ok || !handler_ret.slot_compatible(&expected_ret) {
        return Err(EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            format!(
                "redirect handler {} does not fit redirected operation in {}",
                handler.desc, method.name
            ),
        ));
    }
    // Anything beyond the operand prefix must mirror the enclosing args.
    if handler_args.len() > stack_types.len() {
        let (enclosing, _) = TypeDesc::parse_method(&method.desc)
            .map_err(|e| EngineError::bytecode(target_name.to_string(), e))?;
        let extra = &handler_args[stack_types.len()..];
        let ok = extra.len() <= enclosing.len()
            && extra.iter().zip(enclosing.iter()).all(|(a, b)| a.slot_compatible(b));
        if !ok {
            return Err(EngineError::invalid_injection(
                injection.mixin_class.clone(),
                injection.handler_key.clone(),
                "trailing handler parameters do not match the enclosing method's arguments"
                    .to_string(),
            ));
        }
    }
    Ok(())
}

/// Redirects `new T(args)` to a factory handler returning `T`.
#[allow(clippy::too_many_arguments)]
fn redirect_construction(
    injection: &InjectionInfo,
    method: &mut MethodNode,
    registry: &mut crate::target_context::InjectionNodeRegistry,
    original: InsnId,
    current: InsnId,
    handler: &HandlerRef,
    matched: &Insn,
    target_name: &str,
) -> EngineResult<()> {
    let Insn::Type { class, .. } = matched else {
        unreachable!("construction redirect on non-type instruction");
    };
    if !handler.is_static {
        return Err(EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            "constructor redirects require a static factory handler".to_string(),
        ));
    }

    // NEW is (almost) always followed by DUP; the matching <init> call is
    // found by tracking nested constructions in between.
    let dup = method
        .instructions
        .next_real(method.instructions.next(current).ok_or_else(|| {
            EngineError::invalid_injection(
                injection.mixin_class.clone(),
                injection.handler_key.clone(),
                "NEW at the end of the method".to_string(),
            )
        })?)
        .filter(|id| {
            matches!(
                method.instructions.get(*id),
                Some(Insn::Simple(Opcode::DUP))
            )
        })
        .ok_or_else(|| {
            EngineError::invalid_injection(
                injection.mixin_class.clone(),
                injection.handler_key.clone(),
                "unsupported NEW without a following DUP".to_string(),
            )
        })?;

    let mut nesting = 0usize;
    let mut cursor = method.instructions.next(dup);
    let mut init_call: Option<InsnId> = None;
    while let Some(id) = cursor {
        match method.instructions.get(id) {
            Some(Insn::Type {
                opcode: Opcode::NEW,
                ..
            }) => nesting += 1,
            Some(Insn::Method {
                opcode: Opcode::INVOKESPECIAL,
                name,
                owner,
                ..
            }) if name == "<init>" => {
                if nesting == 0 {
                    if owner != class {
                        return Err(EngineError::invalid_injection(
                            injection.mixin_class.clone(),
                            injection.handler_key.clone(),
                            "constructor call does not match the NEW type".to_string(),
                        ));
                    }
                    init_call = Some(id);
                    break;
                }
                nesting -= 1;
            }
            _ => {}
        }
        cursor = method.instructions.next(id);
    }
    let init_call = init_call.ok_or_else(|| {
        EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            "no constructor call found for redirected NEW".to_string(),
        )
    })?;

    // Validate: handler takes the ctor args, returns the constructed type.
    let ctor_desc = match method.instructions.get(init_call) {
        Some(Insn::Method { desc, .. }) => desc.clone(),
        _ => unreachable!("init call located above"),
    };
    let (ctor_args, _) = TypeDesc::parse_method(&ctor_desc)
        .map_err(|e| EngineError::bytecode(target_name.to_string(), e))?;
    let (handler_args, handler_ret) = handler.signature()?;
    let fits = handler_args.len() == ctor_args.len()
        && handler_args
            .iter()
            .zip(ctor_args.iter())
            .all(|(a, b)| a.slot_compatible(b))
        && handler_ret == TypeDesc::Object(class.clone());
    if !fits {
        return Err(EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            format!("factory handler {} does not fit new {class}{ctor_desc}", handler.desc),
        ));
    }

    method
        .instructions
        .remove(current)
        .map_err(|e| EngineError::bytecode(target_name.to_string(), e))?;
    method
        .instructions
        .remove(dup)
        .map_err(|e| EngineError::bytecode(target_name.to_string(), e))?;
    method
        .instructions
        .replace(init_call, handler.invoke())
        .map_err(|e| EngineError::bytecode(target_name.to_string(), e))?;
    registry.replaced(original, init_call);
    Ok(())
}
