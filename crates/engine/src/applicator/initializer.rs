//! Initializer merging.
//!
//! Field initializers the compiler folded into the mixin's constructor are
//! spliced into every target constructor, immediately after the target's
//! own superconstructor call. Mixins applied to interfaces skip this pass.

use crate::error::{EngineError, EngineResult};
use crate::info::MixinInfo;
use crate::point::find_super_ctor_call;
use crate::target_context::TargetContext;
use log::debug;
use mixin_bytecode::{Insn, InsnId, MethodNode};

pub(super) fn pass_initializers(
    ctx: &mut TargetContext,
    mixins: &[&MixinInfo],
) -> EngineResult<()> {
    if ctx.class.is_interface() {
        return Ok(());
    }
    let class_name = ctx.class.name.clone();
    for mixin in mixins {
        let Some(ctor) = pick_initializer_ctor(&mixin.node.methods) else {
            continue;
        };
        let rewritten = super::rewrite_owner(ctor, mixin, &class_name);
        let extracted = extract_initializer(&rewritten);
        if extracted.is_empty() {
            continue;
        }
        debug!(
            "{}: splicing {} initializer instructions into {} constructors",
            mixin.class_name,
            extracted.len(),
            ctx.class.constructors().count()
        );

        let ctor_keys: Vec<String> = ctx
            .class
            .constructors()
            .map(|m| m.member_key())
            .collect();
        for key in ctor_keys {
            let (name, desc) = crate::inject::split_key(&key);
            let Some(target_ctor) = ctx.class.find_method_mut(name, desc) else {
                continue;
            };
            if target_ctor.instructions.is_empty() {
                continue;
            }
            let Some(super_call) = find_super_ctor_call(target_ctor) else {
                return Err(EngineError::apply(
                    class_name.clone(),
                    format!("constructor {key} has no superconstructor call"),
                ));
            };
            let adopted = target_ctor
                .instructions
                .adopt_range(&rewritten.instructions, &extracted);
            target_ctor
                .instructions
                .insert_all_after(super_call, adopted)
                .map_err(|e| EngineError::bytecode(format!("{class_name}::{key}"), e))?;
        }
    }
    Ok(())
}

/// The constructor whose body donates the initializer code: the no-arg
/// constructor when present, else the sole constructor.
fn pick_initializer_ctor(methods: &[MethodNode]) -> Option<&MethodNode> {
    let ctors: Vec<&MethodNode> = methods.iter().filter(|m| m.is_ctor()).collect();
    match ctors.as_slice() {
        [] => None,
        [only] => Some(only),
        several => several
            .iter()
            .find(|m| m.desc == "()V")
            .copied()
            .or_else(|| several.first().copied()),
    }
}

/// Instructions between the superconstructor call and the final return.
fn extract_initializer(ctor: &MethodNode) -> Vec<InsnId> {
    let Some(super_call) = find_super_ctor_call(ctor) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut cursor = ctor.instructions.next(super_call);
    while let Some(id) = cursor {
        match ctor.instructions.get(id) {
            Some(Insn::Simple(op)) if op.is_return() => break,
            Some(_) => out.push(id),
            None => break,
        }
        cursor = ctor.instructions.next(id);
    }
    // Trailing pseudo instructions carry no initializer semantics.
    while let Some(last) = out.last() {
        match ctor.instructions.get(*last) {
            Some(insn) if !insn.is_real() => {
                out.pop();
            }
            _ => break,
        }
    }
    out
}
