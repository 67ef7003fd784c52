//! Callback injection.
//!
//! Inserts a call to the handler at each matched point. The handler
//! receives the target method's arguments, a callback object, and
//! optionally the locals live at the point. A cancellable callback can
//! short-circuit the target method with a stored return value.

use crate::annotations as ann;
use crate::error::{EngineError, EngineResult};
use crate::inject::{method_mut, HandlerRef, InjectionInfo, LocalCapture};
use crate::target_context::TargetContext;
use log::{info, warn};
use mixin_bytecode::{
    local_types_at, ConstantValue, Insn, InsnId, LocalSlot, Opcode, TypeDesc,
};

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

    let (target_args, target_ret) = method.signature_types().map_err(|e| {
        EngineError::bytecode(format!("{target_name}::{method_key}"), e)
    })?;
    let target_static = method.is_static();
    if target_static && !handler.is_static {
        return Err(EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            "instance handler cannot service a static target method".to_string(),
        ));
    }

    let ci_class = if target_ret == TypeDesc::Void {
        ann::CALLBACK_INFO
    } else {
        ann::CALLBACK_INFO_RETURNABLE
    };

    // Handler shape: target args, then the callback object, then captures.
    let (handler_args, handler_ret) = handler.signature()?;
    if handler_ret != TypeDesc::Void {
        return Err(EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            "callback handlers return void".to_string(),
        ));
    }
    if handler_args.len() < target_args.len() + 1
        || !slot_prefix_matches(&handler_args, &target_args)
        || handler_args[target_args.len()] != TypeDesc::Object(ci_class.to_string())
    {
        return Err(EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            format!(
                "handler signature {} does not fit target {method_key}",
                handler.desc
            ),
        ));
    }
    let wanted_captures: Vec<TypeDesc> = handler_args[target_args.len() + 1..].to_vec();

    // Local capture.
    let mut capture_loads: Vec<(u16, TypeDesc)> = Vec::new();
    let mut poison_handler = false;
    if injection.capture != LocalCapture::NoCapture {
        let slots = local_types_at(method, &target_name, current)
            .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;
        let arg_limit = method
            .first_free_local()
            .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;
        let available: Vec<&LocalSlot> = slots
            .iter()
            .flatten()
            .filter(|slot| slot.index >= arg_limit)
            .collect();

        match injection.capture {
            LocalCapture::Print => {
                info!(
                    "local capture state for {}::{} at {method_key}: {:?}",
                    injection.mixin_class, injection.handler_key, available
                );
                return Ok(());
            }
            _ => {
                let compatible = available.len() == wanted_captures.len()
                    && available
                        .iter()
                        .zip(wanted_captures.iter())
                        .all(|(slot, wanted)| slot.ty.slot_compatible(wanted));
                if compatible {
                    capture_loads = available
                        .iter()
                        .zip(wanted_captures.iter())
                        .map(|(slot, wanted)| (slot.index, wanted.clone()))
                        .collect();
                } else {
                    match injection.capture {
                        LocalCapture::CaptureFailsoft => {
                            warn!(
                                "{}::{}: local capture mismatch at {method_key}, skipping injection",
                                injection.mixin_class, injection.handler_key
                            );
                            return Ok(());
                        }
                        LocalCapture::CaptureFailhard => {
                            return Err(EngineError::invalid_injection(
                                injection.mixin_class.clone(),
                                injection.handler_key.clone(),
                                format!(
                                    "local capture mismatch: expected {:?}, found {} locals",
                                    wanted_captures,
                                    available.len()
                                ),
                            ));
                        }
                        _ => {
                            // CAPTURE_FAILEXCEPTION: the call is emitted with
                            // placeholder values and the handler body becomes
                            // a descriptive throw.
                            poison_handler = true;
                            capture_loads = Vec::new();
                        }
                    }
                }
            }
        }
    } else if !wanted_captures.is_empty() {
        return Err(EngineError::invalid_injection(
            injection.mixin_class.clone(),
            injection.handler_key.clone(),
            "handler declares captured locals but capture is disabled".to_string(),
        ));
    }

    // Assemble the injected sequence.
    let ci_local = method.allocate_local(&TypeDesc::Object(ci_class.to_string()));
    let mut insns: Vec<Insn> = Vec::new();
    insns.push(Insn::Type {
        opcode: Opcode::NEW,
        class: ci_class.to_string(),
    });
    insns.push(Insn::Simple(Opcode::DUP));
    insns.push(Insn::Ldc(ConstantValue::String(
        method.name.clone(),
    )));
    insns.push(Insn::push_int(injection.cancellable as i32));
    insns.push(Insn::Method {
        opcode: Opcode::INVOKESPECIAL,
        owner: ci_class.to_string(),
        name: "<init>".to_string(),
        desc: "(Ljava/lang/String;Z)V".to_string(),
        itf: false,
    });
    insns.push(Insn::Var {
        opcode: Opcode::ASTORE,
        index: ci_local,
    });

    if !handler.is_static {
        insns.push(Insn::Var {
            opcode: Opcode::ALOAD,
            index: 0,
        });
    }
    let mut slot = if target_static { 0 } else { 1 };
    for arg in &target_args {
        insns.push(Insn::Var {
            opcode: arg.load_opcode(),
            index: slot,
        });
        slot += arg.slot_size();
    }
    insns.push(Insn::Var {
        opcode: Opcode::ALOAD,
        index: ci_local,
    });
    if poison_handler {
        for wanted in &wanted_captures {
            insns.push(default_value(wanted));
        }
    } else {
        for (index, ty) in &capture_loads {
            insns.push(Insn::Var {
                opcode: ty.load_opcode(),
                index: *index,
            });
        }
    }
    insns.push(handler.invoke());

    if injection.cancellable {
        let resume = method.instructions.new_label();
        insns.push(Insn::Var {
            opcode: Opcode::ALOAD,
            index: ci_local,
        });
        insns.push(Insn::Method {
            opcode: Opcode::INVOKEVIRTUAL,
            owner: ci_class.to_string(),
            name: "isCancelled".to_string(),
            desc: "()Z".to_string(),
            itf: false,
        });
        insns.push(Insn::Jump {
            opcode: Opcode::IFEQ,
            label: resume,
        });
        if target_ret == TypeDesc::Void {
            insns.push(Insn::Simple(Opcode::RETURN));
        } else {
            insns.push(Insn::Var {
                opcode: Opcode::ALOAD,
                index: ci_local,
            });
            insns.extend(return_value_loader(&target_ret));
            insns.push(Insn::Simple(target_ret.return_opcode()));
        }
        insns.push(Insn::Label(resume));
    }

    method
        .instructions
        .insert_all_before(current, insns)
        .map_err(|e| EngineError::bytecode(format!("{target_name}::{method_key}"), e))?;

    if poison_handler {
        poison(class, handler)?;
    }
    Ok(())
}

/// True when `args` starts with exactly `prefix`.
fn slot_prefix_matches(args: &[TypeDesc], prefix: &[TypeDesc]) -> bool {
    args.len() >= prefix.len() && args[..prefix.len()] == *prefix
}

/// The zero value of a type.
fn default_value(ty: &TypeDesc) -> Insn {
    match ty {
        TypeDesc::Long => Insn::Simple(Opcode::LCONST_0),
        TypeDesc::Float => Insn::Simple(Opcode::FCONST_0),
        TypeDesc::Double => Insn::Simple(Opcode::DCONST_0),
        TypeDesc::Object(_) | TypeDesc::Array(_) => Insn::Simple(Opcode::ACONST_NULL),
        _ => Insn::Simple(Opcode::ICONST_0),
    }
}

/// Loads the stored return value off a `CallbackInfoReturnable`.
fn return_value_loader(ret: &TypeDesc) -> Vec<Insn> {
    let ci = ann::CALLBACK_INFO_RETURNABLE;
    let typed = |suffix: char, desc: &str| {
        vec![Insn::Method {
            opcode: Opcode::INVOKEVIRTUAL,
            owner: ci.to_string(),
            name: format!("getReturnValue{suffix}"),
            desc: desc.to_string(),
            itf: false,
        }]
    };
    match ret {
        TypeDesc::Boolean => typed('Z', "()Z"),
        TypeDesc::Byte => typed('B', "()B"),
        TypeDesc::Char => typed('C', "()C"),
        TypeDesc::Short => typed('S', "()S"),
        TypeDesc::Int => typed('I', "()I"),
        TypeDesc::Long => typed('J', "()J"),
        TypeDesc::Float => typed('F', "()F"),
        TypeDesc::Double => typed('D', "()D"),
        other => {
            let mut insns = vec![Insn::Method {
                opcode: Opcode::INVOKEVIRTUAL,
                owner: ci.to_string(),
                name: "getReturnValue".to_string(),
                desc: "()Ljava/lang/Object;".to_string(),
                itf: false,
            }];
            if let Some(class) = other.internal_name() {
                insns.push(Insn::Type {
                    opcode: Opcode::CHECKCAST,
                    class: class.to_string(),
                });
            }
            insns
        }
    }
}

/// Replaces the merged handler's body with a descriptive throw.
fn poison(
    class: &mut mixin_bytecode::ClassNode,
    handler: &HandlerRef,
) -> EngineResult<()> {
    let Some(method) = class.find_method_mut(&handler.name, &handler.desc) else {
        return Ok(());
    };
    let message = format!(
        "Invalid local capture in callback {}::{}",
        handler.owner, handler.name
    );
    let mut body = mixin_bytecode::InsnList::new();
    body.add(Insn::Type {
        opcode: Opcode::NEW,
        class: "java/lang/RuntimeException".to_string(),
    });
    body.add(Insn::Simple(Opcode::DUP));
    body.add(Insn::Ldc(ConstantValue::String(message)));
    body.add(Insn::Method {
        opcode: Opcode::INVOKESPECIAL,
        owner: "java/lang/RuntimeException".to_string(),
        name: "<init>".to_string(),
        desc: "(Ljava/lang/String;)V".to_string(),
        itf: false,
    });
    body.add(Insn::Simple(Opcode::ATHROW));
    method.instructions = body;
    Ok(())
}
