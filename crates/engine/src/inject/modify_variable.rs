//! Local variable modification.
//!
//! Routes a local variable's value through the handler at the matched
//! point. At a STORE match the value is transformed on the stack before it
//! lands; everywhere else the variable is loaded, transformed and stored
//! back immediately before the point.

use crate::error::{EngineError, EngineResult};
use crate::inject::{call_with_stack_args, method_mut, HandlerRef, InjectionInfo};
use crate::locals::Discriminator;
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

    let (handler_args, handler_ret) = handler.signature()?;
    if handler_args.first() != Some(&handler_ret) || handler_ret == TypeDesc::Void {
        return Err(EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            "modify-variable handler must be (T)T".to_string(),
        ));
    }
    let value_ty = handler_ret.clone();
    let discriminator = Discriminator::parse(&injection.annotation);

    // At a direct load/store match the instruction names the variable; an
    // explicit discriminator must agree with it.
    let matched_var = match method.instructions.get(current) {
        Some(Insn::Var { opcode, index })
            if opcode.is_load() || opcode.is_store() =>
        {
            Some((*opcode, *index))
        }
        _ => None,
    };

    let (index, at_store) = match matched_var {
        Some((opcode, index)) => {
            if !discriminator.is_implicit() {
                let resolved =
                    discriminator.resolve(method, &target_name, current, &value_ty)?;
                if resolved != index {
                    return Err(EngineError::invalid_injection(
                        injection.mixin_class.clone(),
                        injection.handler_key.clone(),
                        format!(
                            "discriminator selects slot {resolved} but the matched instruction uses {index}"
                        ),
                    ));
                }
            }
            (index, opcode.is_store())
        }
        None => {
            // Inject-style point: the variable is the one stored closest
            // above the point, unless the discriminator says otherwise.
            if discriminator.is_implicit() {
                let mut cursor = method.instructions.prev(current);
                let mut found = None;
                while let Some(id) = cursor {
                    if let Some(Insn::Var { opcode, index }) = method.instructions.get(id) {
                        if *opcode == value_ty.store_opcode() {
                            found = Some(*index);
                            break;
                        }
                    }
                    cursor = method.instructions.prev(id);
                }
                let index = found.ok_or_else(|| {
                    EngineError::invalid_injection(
                        injection.mixin_class.clone(),
                        injection.handler_key.clone(),
                        format!("no preceding store of type {value_ty} before the point"),
                    )
                })?;
                (index, false)
            } else {
                (
                    discriminator.resolve(method, &target_name, current, &value_ty)?,
                    false,
                )
            }
        }
    };

    let mut insns: Vec<Insn> = Vec::new();
    if at_store {
        // Value is on the stack: transform it in place.
        insns.extend(call_with_stack_args(
            method,
            std::slice::from_ref(&value_ty),
            handler,
        ));
    } else {
        insns.push(Insn::Var {
            opcode: value_ty.load_opcode(),
            index,
        });
        insns.extend(call_with_stack_args(
            method,
            std::slice::from_ref(&value_ty),
            handler,
        ));
        insns.push(Insn::Var {
            opcode: value_ty.store_opcode(),
            index,
        });
    }

    method
        .instructions
        .insert_all_before(current, insns)
        .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;
    Ok(())
}
