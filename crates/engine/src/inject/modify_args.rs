//! All-arguments modification.
//!
//! At a matched invoke, the call's arguments are packed into a synthesized
//! bundle object, the handler mutates the bundle, and the (possibly
//! updated) arguments unpack back onto the stack before the call proceeds.
//! One bundle class is generated per distinct target descriptor; the name
//! is deterministic so injectors sharing a signature share a class.

use crate::annotations as ann;
use crate::error::{EngineError, EngineResult};
use crate::inject::{method_mut, HandlerRef, InjectionInfo};
use crate::target_context::TargetContext;
use mixin_bytecode::{
    AccessFlags, ClassNode, FieldNode, Insn, InsnId, MethodNode, Opcode, TypeDesc,
};

/// Deterministic bundle class name for a call descriptor.
pub fn args_bundle_name(call_desc: &str) -> String {
    // FNV-1a over the descriptor: stable across processes, unlike the
    // std hasher.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in call_desc.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{}${hash:016x}", ann::ARGS_BASE)
}

pub(super) fn apply(
    injection: &InjectionInfo,
    ctx: &mut TargetContext,
    method_key: &str,
    _original: InsnId,
    current: InsnId,
    handler: &HandlerRef,
) -> EngineResult<()> {
    let target_name = ctx.class.name.clone();

    let call_desc = {
        let (class, _) = ctx.class_and_registry(method_key);
        let method = method_mut(class, method_key).ok_or_else(|| {
            EngineError::invalid_injection(
                injection.mixin_class.clone(),
                injection.handler_key.clone(),
                format!("target method {method_key} vanished before apply"),
            )
        })?;
        match method.instructions.get(current) {
            Some(Insn::Method { desc, .. }) => desc.clone(),
            other => {
                return Err(EngineError::invalid_injection(
                    injection.mixin_class.clone(),
                    injection.handler_key.clone(),
                    format!("modify-args must match an invoke, found {other:?}"),
                ))
            }
        }
    };
    let (call_args, _) = TypeDesc::parse_method(&call_desc)
        .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;

    let (handler_args, handler_ret) = handler.signature()?;
    let bundle_param_ok = matches!(
        handler_args.first(),
        Some(TypeDesc::Object(name)) if name == ann::ARGS_BASE
    );
    if !bundle_param_ok || handler_ret != TypeDesc::Void {
        return Err(EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            format!(
                "modify-args handler must be (L{};...)V, found {}",
                ann::ARGS_BASE,
                handler.desc
            ),
        ));
    }

    let bundle_name = args_bundle_name(&call_desc);
    if !ctx.generated.iter().any(|c| c.name == bundle_name) {
        ctx.generated.push(generate_bundle(&bundle_name, &call_args));
    }

    let (class, _) = ctx.class_and_registry(method_key);
    let method = method_mut(class, method_key).ok_or_else(|| {
        EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            format!("target method {method_key} vanished before apply"),
        )
    })?;

    // Spill the live arguments, pack, hand to the handler, unpack.
    let mut insns: Vec<Insn> = Vec::new();
    let mut spilled: Vec<(u16, TypeDesc)> = Vec::new();
    for ty in call_args.iter().rev() {
        let slot = method.allocate_local(ty);
        insns.push(Insn::Var {
            opcode: ty.store_opcode(),
            index: slot,
        });
        spilled.push((slot, ty.clone()));
    }
    let ctor_desc = bundle_ctor_desc(&call_args);
    insns.push(Insn::Type {
        opcode: Opcode::NEW,
        class: bundle_name.clone(),
    });
    insns.push(Insn::Simple(Opcode::DUP));
    for (slot, ty) in spilled.iter().rev() {
        insns.push(Insn::Var {
            opcode: ty.load_opcode(),
            index: *slot,
        });
    }
    insns.push(Insn::Method {
        opcode: Opcode::INVOKESPECIAL,
        owner: bundle_name.clone(),
        name: "<init>".to_string(),
        desc: ctor_desc,
        itf: false,
    });
    let bundle_local =
        method.allocate_local(&TypeDesc::Object(bundle_name.clone()));
    insns.push(Insn::Var {
        opcode: Opcode::ASTORE,
        index: bundle_local,
    });
    if !handler.is_static {
        insns.push(Insn::Var {
            opcode: Opcode::ALOAD,
            index: 0,
        });
    }
    insns.push(Insn::Var {
        opcode: Opcode::ALOAD,
        index: bundle_local,
    });
    insns.push(handler.invoke());
    for (position, ty) in call_args.iter().enumerate() {
        insns.push(Insn::Var {
            opcode: Opcode::ALOAD,
            index: bundle_local,
        });
        insns.push(Insn::Field {
            opcode: Opcode::GETFIELD,
            owner: bundle_name.clone(),
            name: format!("arg{position}"),
            desc: ty.to_string(),
        });
    }

    method
        .instructions
        .insert_all_before(current, insns)
        .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;
    Ok(())
}

fn bundle_ctor_desc(args: &[TypeDesc]) -> String {
    let mut desc = String::from("(");
    for ty in args {
        desc.push_str(&ty.to_string());
    }
    desc.push_str(")V");
    desc
}

/// Generates the bundle class: typed fields, a packing constructor, typed
/// getters and a bulk setter that enforces per-slot types.
fn generate_bundle(name: &str, args: &[TypeDesc]) -> ClassNode {
    let mut class = ClassNode::new(name);
    class.access = AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SYNTHETIC | AccessFlags::SUPER;
    class.super_name = Some(ann::ARGS_BASE.to_string());

    for (position, ty) in args.iter().enumerate() {
        class.fields.push(FieldNode::new(
            AccessFlags::PUBLIC,
            format!("arg{position}"),
            ty.to_string(),
        ));
    }

    // Constructor packing every argument.
    let mut ctor = MethodNode::new(
        AccessFlags::PUBLIC,
        "<init>".to_string(),
        bundle_ctor_desc(args),
    );
    ctor.instructions.add(Insn::Var {
        opcode: Opcode::ALOAD,
        index: 0,
    });
    ctor.instructions.add(Insn::Method {
        opcode: Opcode::INVOKESPECIAL,
        owner: ann::ARGS_BASE.to_string(),
        name: "<init>".to_string(),
        desc: "()V".to_string(),
        itf: false,
    });
    let mut slot = 1u16;
    for (position, ty) in args.iter().enumerate() {
        ctor.instructions.add(Insn::Var {
            opcode: Opcode::ALOAD,
            index: 0,
        });
        ctor.instructions.add(Insn::Var {
            opcode: ty.load_opcode(),
            index: slot,
        });
        ctor.instructions.add(Insn::Field {
            opcode: Opcode::PUTFIELD,
            owner: name.to_string(),
            name: format!("arg{position}"),
            desc: ty.to_string(),
        });
        slot += ty.slot_size();
    }
    ctor.instructions.add(Insn::Simple(Opcode::RETURN));
    ctor.max_stack = 3;
    ctor.max_locals = slot;
    class.methods.push(ctor);

    // Typed getters.
    for (position, ty) in args.iter().enumerate() {
        let mut getter = MethodNode::new(
            AccessFlags::PUBLIC,
            format!("arg{position}"),
            format!("(){ty}"),
        );
        getter.instructions.add(Insn::Var {
            opcode: Opcode::ALOAD,
            index: 0,
        });
        getter.instructions.add(Insn::Field {
            opcode: Opcode::GETFIELD,
            owner: name.to_string(),
            name: format!("arg{position}"),
            desc: ty.to_string(),
        });
        getter
            .instructions
            .add(Insn::Simple(ty.return_opcode()));
        getter.max_stack = ty.slot_size().max(1) + 1;
        getter.max_locals = 1;
        class.methods.push(getter);
    }

    // Bulk setter taking the full argument run again.
    let mut set_all = MethodNode::new(
        AccessFlags::PUBLIC,
        "setAll".to_string(),
        bundle_ctor_desc(args),
    );
    let mut slot = 1u16;
    for (position, ty) in args.iter().enumerate() {
        set_all.instructions.add(Insn::Var {
            opcode: Opcode::ALOAD,
            index: 0,
        });
        set_all.instructions.add(Insn::Var {
            opcode: ty.load_opcode(),
            index: slot,
        });
        set_all.instructions.add(Insn::Field {
            opcode: Opcode::PUTFIELD,
            owner: name.to_string(),
            name: format!("arg{position}"),
            desc: ty.to_string(),
        });
        slot += ty.slot_size();
    }
    set_all.instructions.add(Insn::Simple(Opcode::RETURN));
    set_all.max_stack = 3;
    set_all.max_locals = slot;
    class.methods.push(set_all);

    class
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_name_deterministic() {
        let a = args_bundle_name("(IJ)V");
        let b = args_bundle_name("(IJ)V");
        let c = args_bundle_name("(I)V");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("mixin/synthetic/Args$"));
    }

    #[test]
    fn test_generated_bundle_shape() {
        let class = generate_bundle(
            &args_bundle_name("(IJ)V"),
            &[TypeDesc::Int, TypeDesc::Long],
        );
        assert_eq!(class.fields.len(), 2);
        assert_eq!(class.fields[0].desc, "I");
        assert_eq!(class.fields[1].desc, "J");
        assert!(class.find_method("<init>", "(IJ)V").is_some());
        assert!(class.find_method("arg0", "()I").is_some());
        assert!(class.find_method("arg1", "()J").is_some());
        assert!(class.find_method("setAll", "(IJ)V").is_some());
    }
}
