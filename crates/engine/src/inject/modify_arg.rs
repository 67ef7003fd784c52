//! Single-argument modification.
//!
//! At a matched invoke, routes one argument through the handler before the
//! call proceeds. The argument is picked by `index`, or inferred when the
//! handler's parameter type occurs exactly once in the call's signature.

use crate::error::{EngineError, EngineResult};
use crate::inject::{call_with_stack_args, method_mut, HandlerRef, InjectionInfo};
use crate::target_context::TargetContext;
use mixin_bytecode::{Insn, InsnId, TypeDesc};

pub(super) fn apply(
    injection: &InjectionInfo,
    ctx: &mut TargetContext,
    method_key: &str,
    _original: InsnId,
    current: InsnId,
    handler: &HandlerRef,
) -> EngineResult<()> {
    let target_name = ctx.class.name.clone();
    let (class, _registry) = ctx.class_and_registry(method_key);
    let method = method_mut(class, method_key).ok_or_else(|| {
        EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            format!("target method {method_key} vanished before apply"),
        )
    })?;

    let call_desc = match method.instructions.get(current) {
        Some(Insn::Method { desc, .. }) => desc.clone(),
        other => {
            return Err(EngineError::invalid_injection(
                injection.mixin_class.clone(),
                injection.handler_key.clone(),
                format!("modify-arg must match an invoke, found {other:?}"),
            ))
        }
    };
    let (call_args, _) = TypeDesc::parse_method(&call_desc)
        .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;

    let (handler_args, handler_ret) = handler.signature()?;
    let value_ty = handler_args.first().cloned().ok_or_else(|| {
        EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            "modify-arg handler takes the argument value".to_string(),
        )
    })?;
    if handler_ret != value_ty {
        return Err(EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            "modify-arg handler must return its parameter type".to_string(),
        ));
    }

    // Which argument of the call.
    let index = match injection.annotation.get_i32("index") {
        Some(n) if n >= 0 => n as usize,
        _ => {
            let positions: Vec<usize> = call_args
                .iter()
                .enumerate()
                .filter(|(_, ty)| **ty == value_ty)
                .map(|(i, _)| i)
                .collect();
            match positions.as_slice() {
                [only] => *only,
                [] => {
                    return Err(EngineError::invalid_injection(
                        injection.mixin_class.clone(),
                        injection.handler_key.clone(),
                        format!("no argument of type {value_ty} in {call_desc}"),
                    ))
                }
                _ => {
                    return Err(EngineError::invalid_injection(
                        injection.mixin_class.clone(),
                        injection.handler_key.clone(),
                        format!("ambiguous argument type {value_ty} in {call_desc}, index required"),
                    ))
                }
            }
        }
    };
    if index >= call_args.len() || call_args[index] != value_ty {
        return Err(EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            format!("argument {index} of {call_desc} is not of type {value_ty}"),
        ));
    }

    // The arguments above the modified one spill into locals, the handler
    // transforms the exposed value, then the tail reloads.
    let trailing = &call_args[index + 1..];
    let mut insns: Vec<Insn> = Vec::new();
    let mut spilled: Vec<(u16, TypeDesc)> = Vec::new();
    for ty in trailing.iter().rev() {
        let slot = method.allocate_local(ty);
        insns.push(Insn::Var {
            opcode: ty.store_opcode(),
            index: slot,
        });
        spilled.push((slot, ty.clone()));
    }
    insns.extend(call_with_stack_args(
        method,
        std::slice::from_ref(&value_ty),
        handler,
    ));
    for (slot, ty) in spilled.iter().rev() {
        insns.push(Insn::Var {
            opcode: ty.load_opcode(),
            index: *slot,
        });
    }

    method
        .instructions
        .insert_all_before(current, insns)
        .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;
    Ok(())
}
