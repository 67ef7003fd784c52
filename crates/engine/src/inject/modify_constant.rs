//! Constant modification.
//!
//! Routes a matched constant through the handler, which receives the
//! original value and returns the replacement. Zero-comparison branches
//! matched through zero-condition expansion materialize their implicit
//! zero, hand it to the handler, and become explicit two-operand compares.

use crate::error::{EngineError, EngineResult};
use crate::inject::{call_with_stack_args, method_mut, HandlerRef, InjectionInfo};
use crate::target_context::TargetContext;
use mixin_bytecode::{Insn, InsnId, Opcode, TypeDesc};

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
            "modify-constant handler must be (T)T".to_string(),
        ));
    }
    let value_ty = handler_ret.clone();

    let matched = method.instructions.get(current).cloned().ok_or_else(|| {
        EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            "matched instruction is no longer present".to_string(),
        )
    })?;

    match &matched {
        Insn::Jump { opcode, label } if opcode.is_zero_comparison() => {
            // The implicit zero becomes explicit, the handler transforms
            // it, and the branch compares both operands.
            if value_ty != TypeDesc::Int {
                return Err(EngineError::invalid_injection(
                    injection.mixin_class.clone(),
                    injection.handler_key.clone(),
                    "zero-condition expansion requires an int handler".to_string(),
                ));
            }
            let compare = zero_to_icmp(*opcode);
            let mut insns = vec![Insn::Simple(Opcode::ICONST_0)];
            insns.extend(call_with_stack_args(
                method,
                std::slice::from_ref(&value_ty),
                handler,
            ));
            method
                .instructions
                .insert_all_before(current, insns)
                .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;
            method
                .instructions
                .replace(
                    current,
                    Insn::Jump {
                        opcode: compare,
                        label: *label,
                    },
                )
                .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;
        }
        insn if insn.is_real() => {
            // Ordinary constant load: transform the value it pushed.
            let insns =
                call_with_stack_args(method, std::slice::from_ref(&value_ty), handler);
            method
                .instructions
                .insert_all_after(current, insns)
                .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;
        }
        other => {
            return Err(EngineError::invalid_injection(
                injection.mixin_class.clone(),
                injection.handler_key.clone(),
                format!("modify-constant matched a pseudo instruction: {other:?}"),
            ))
        }
    }
    Ok(())
}

/// Maps an implicit-zero comparison to its two-operand form.
fn zero_to_icmp(op: Opcode) -> Opcode {
    match op {
        Opcode::IFEQ => Opcode::IF_ICMPEQ,
        Opcode::IFNE => Opcode::IF_ICMPNE,
        Opcode::IFLT => Opcode::IF_ICMPLT,
        Opcode::IFGE => Opcode::IF_ICMPGE,
        Opcode::IFGT => Opcode::IF_ICMPGT,
        Opcode::IFLE => Opcode::IF_ICMPLE,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_to_icmp() {
        assert_eq!(zero_to_icmp(Opcode::IFLT), Opcode::IF_ICMPLT);
        assert_eq!(zero_to_icmp(Opcode::IFGE), Opcode::IF_ICMPGE);
        assert_eq!(zero_to_icmp(Opcode::GOTO), Opcode::GOTO);
    }
}
