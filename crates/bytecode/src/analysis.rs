//! Method analysis: stack depth, local limits and local type pictures.

use crate::descriptor::TypeDesc;
use crate::error::{BytecodeError, BytecodeResult};
use crate::insn::{Insn, InsnId, LabelId};
use crate::node::MethodNode;
use crate::opcode::Opcode;
use std::collections::HashMap;

/// Recomputes `max_stack` and `max_locals` for a method body.
///
/// Depth is tracked in slots over all reachable paths; exception handlers
/// are entered with a one-slot stack holding the thrown reference.
pub fn compute_maxs(method: &MethodNode, owner: &str) -> BytecodeResult<(u16, u16)> {
    let insns: Vec<(InsnId, &Insn)> = method.instructions.iter().collect();
    if insns.is_empty() {
        return Ok((0, 0));
    }
    let mut label_pos: HashMap<LabelId, usize> = HashMap::new();
    for (pos, (_, insn)) in insns.iter().enumerate() {
        if let Insn::Label(label) = insn {
            label_pos.insert(*label, pos);
        }
    }
    let at_label = |label: LabelId| -> BytecodeResult<usize> {
        label_pos
            .get(&label)
            .copied()
            .ok_or_else(|| BytecodeError::UnresolvedLabel {
                method: format!("{owner}::{}", method.name),
            })
    };

    let mut entry_depth: Vec<Option<u16>> = vec![None; insns.len()];
    let mut worklist: Vec<usize> = Vec::new();
    entry_depth[0] = Some(0);
    worklist.push(0);
    for block in &method.try_catch_blocks {
        let handler = at_label(block.handler)?;
        if entry_depth[handler].is_none() {
            entry_depth[handler] = Some(1);
            worklist.push(handler);
        }
    }

    let mut max_stack = 0u16;
    while let Some(pos) = worklist.pop() {
        let mut depth = match entry_depth[pos] {
            Some(depth) => depth,
            None => continue,
        };
        let mut pos = pos;
        loop {
            let (_, insn) = insns[pos];
            let (pops, pushes) = stack_effect(insn)?;
            if pops > depth {
                return Err(BytecodeError::analysis(
                    format!("{owner}::{}", method.name),
                    format!("stack underflow at {}", insns[pos].0),
                ));
            }
            depth = depth - pops + pushes;
            max_stack = max_stack.max(depth);

            let mut propagate = |target: usize, depth: u16, worklist: &mut Vec<usize>| {
                match entry_depth[target] {
                    Some(existing) => {
                        // Merge point: keep the deeper picture.
                        if depth > existing {
                            entry_depth[target] = Some(depth);
                            worklist.push(target);
                        }
                    }
                    None => {
                        entry_depth[target] = Some(depth);
                        worklist.push(target);
                    }
                }
            };

            let mut falls_through = true;
            match insn {
                Insn::Jump { opcode, label } => {
                    propagate(at_label(*label)?, depth, &mut worklist);
                    if !opcode.is_conditional_jump() {
                        falls_through = false;
                    }
                }
                Insn::TableSwitch {
                    default, labels, ..
                } => {
                    propagate(at_label(*default)?, depth, &mut worklist);
                    for label in labels {
                        propagate(at_label(*label)?, depth, &mut worklist);
                    }
                    falls_through = false;
                }
                Insn::LookupSwitch { default, pairs } => {
                    propagate(at_label(*default)?, depth, &mut worklist);
                    for (_, label) in pairs {
                        propagate(at_label(*label)?, depth, &mut worklist);
                    }
                    falls_through = false;
                }
                Insn::Simple(op)
                    if op.is_return() || *op == Opcode::ATHROW =>
                {
                    falls_through = false;
                }
                Insn::Var { opcode, .. } if *opcode == Opcode::RET => {
                    falls_through = false;
                }
                _ => {}
            }

            if !falls_through {
                break;
            }
            let next = pos + 1;
            if next >= insns.len() {
                break;
            }
            match entry_depth[next] {
                Some(existing) if existing >= depth => break,
                _ => {
                    entry_depth[next] = Some(depth);
                    pos = next;
                }
            }
        }
    }

    // Locals: parameters plus every slot the body touches.
    let mut max_locals = TypeDesc::args_slot_count(&method.desc, !method.is_static())?;
    for (_, insn) in &insns {
        match insn {
            Insn::Var { opcode, index } => {
                let width = match opcode {
                    Opcode::LLOAD | Opcode::DLOAD | Opcode::LSTORE | Opcode::DSTORE => 2,
                    _ => 1,
                };
                max_locals = max_locals.max(index + width);
            }
            Insn::Iinc { index, .. } => {
                max_locals = max_locals.max(index + 1);
            }
            _ => {}
        }
    }
    Ok((max_stack, max_locals))
}

/// `(pops, pushes)` in slots for one instruction.
fn stack_effect(insn: &Insn) -> BytecodeResult<(u16, u16)> {
    use Opcode::*;
    Ok(match insn {
        Insn::Label(_) | Insn::Line { .. } => (0, 0),
        Insn::IntPush { .. } => (0, 1),
        Insn::Ldc(value) => (0, value.slot_size()),
        Insn::Var { opcode, .. } => match opcode {
            ILOAD | FLOAD | ALOAD => (0, 1),
            LLOAD | DLOAD => (0, 2),
            ISTORE | FSTORE | ASTORE => (1, 0),
            LSTORE | DSTORE => (2, 0),
            RET => (0, 0),
            other => {
                return Err(BytecodeError::analysis(
                    "stack effect".to_string(),
                    format!("unexpected var opcode {other:?}"),
                ))
            }
        },
        Insn::Iinc { .. } => (0, 0),
        Insn::Type { opcode, .. } => match opcode {
            NEW => (0, 1),
            _ => (1, 1),
        },
        Insn::NewArray { .. } => (1, 1),
        Insn::MultiANewArray { dims, .. } => (*dims as u16, 1),
        Insn::Field { opcode, desc, .. } => {
            let size = TypeDesc::parse(desc)?.slot_size();
            match opcode {
                GETSTATIC => (0, size),
                PUTSTATIC => (size, 0),
                GETFIELD => (1, size),
                PUTFIELD => (1 + size, 0),
                other => {
                    return Err(BytecodeError::analysis(
                        "stack effect".to_string(),
                        format!("unexpected field opcode {other:?}"),
                    ))
                }
            }
        }
        Insn::Method { opcode, desc, .. } => {
            let (args, ret) = TypeDesc::parse_method(desc)?;
            let mut pops: u16 = args.iter().map(|a| a.slot_size()).sum();
            if *opcode != INVOKESTATIC {
                pops += 1;
            }
            (pops, ret.slot_size())
        }
        Insn::InvokeDynamic { desc, .. } => {
            let (args, ret) = TypeDesc::parse_method(desc)?;
            (args.iter().map(|a| a.slot_size()).sum(), ret.slot_size())
        }
        Insn::Jump { opcode, .. } => match opcode {
            GOTO => (0, 0),
            JSR => (0, 1),
            IF_ICMPEQ | IF_ICMPNE | IF_ICMPLT | IF_ICMPGE | IF_ICMPGT | IF_ICMPLE
            | IF_ACMPEQ | IF_ACMPNE => (2, 0),
            _ => (1, 0),
        },
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => (1, 0),
        Insn::Simple(opcode) => simple_effect(*opcode),
    })
}

fn simple_effect(opcode: Opcode) -> (u16, u16) {
    use Opcode::*;
    match opcode {
        NOP => (0, 0),
        ACONST_NULL | ICONST_M1 | ICONST_0 | ICONST_1 | ICONST_2 | ICONST_3 | ICONST_4
        | ICONST_5 | FCONST_0 | FCONST_1 | FCONST_2 => (0, 1),
        LCONST_0 | LCONST_1 | DCONST_0 | DCONST_1 => (0, 2),
        IALOAD | FALOAD | AALOAD | BALOAD | CALOAD | SALOAD => (2, 1),
        LALOAD | DALOAD => (2, 2),
        IASTORE | FASTORE | AASTORE | BASTORE | CASTORE | SASTORE => (3, 0),
        LASTORE | DASTORE => (4, 0),
        POP => (1, 0),
        POP2 => (2, 0),
        DUP => (1, 2),
        DUP_X1 => (2, 3),
        DUP_X2 => (3, 4),
        DUP2 => (2, 4),
        DUP2_X1 => (3, 5),
        DUP2_X2 => (4, 6),
        SWAP => (2, 2),
        IADD | ISUB | IMUL | IDIV | IREM | IAND | IOR | IXOR | ISHL | ISHR | IUSHR | FADD
        | FSUB | FMUL | FDIV | FREM => (2, 1),
        LADD | LSUB | LMUL | LDIV | LREM | LAND | LOR | LXOR | DADD | DSUB | DMUL | DDIV
        | DREM => (4, 2),
        LSHL | LSHR | LUSHR => (3, 2),
        INEG | FNEG => (1, 1),
        LNEG | DNEG => (2, 2),
        I2F | F2I | I2B | I2C | I2S => (1, 1),
        I2L | I2D | F2L | F2D => (1, 2),
        L2I | L2F | D2I | D2F => (2, 1),
        L2D | D2L => (2, 2),
        LCMP | DCMPL | DCMPG => (4, 1),
        FCMPL | FCMPG => (2, 1),
        IRETURN | FRETURN | ARETURN => (1, 0),
        LRETURN | DRETURN => (2, 0),
        RETURN => (0, 0),
        ARRAYLENGTH => (1, 1),
        ATHROW => (1, 0),
        MONITORENTER | MONITOREXIT => (1, 0),
        _ => (0, 0),
    }
}

/// One known local slot at a program point.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSlot {
    pub index: u16,
    pub ty: TypeDesc,
    pub name: Option<String>,
}

/// Reconstructs the local variable picture live at `at`.
///
/// The picture is seeded from the method's parameters, refined with every
/// store seen on the straight-line walk to `at`, then overlaid with declared
/// local variable table entries whose scope covers the point. Slots holding
/// the second half of a wide value are `None`.
pub fn local_types_at(
    method: &MethodNode,
    owner: &str,
    at: InsnId,
) -> BytecodeResult<Vec<Option<LocalSlot>>> {
    let max = method.max_locals.max(TypeDesc::args_slot_count(
        &method.desc,
        !method.is_static(),
    )?) as usize;
    let mut slots: Vec<Option<LocalSlot>> = vec![None; max];

    let mut set = |slots: &mut Vec<Option<LocalSlot>>, index: u16, ty: TypeDesc| {
        let wide = ty.is_wide();
        if index as usize >= slots.len() {
            slots.resize(index as usize + if wide { 2 } else { 1 }, None);
        }
        slots[index as usize] = Some(LocalSlot {
            index,
            ty,
            name: None,
        });
        if wide {
            let second = index as usize + 1;
            if second >= slots.len() {
                slots.resize(second + 1, None);
            }
            slots[second] = None;
        }
    };

    // Parameters.
    let (args, _) = TypeDesc::parse_method(&method.desc)?;
    let mut slot = 0u16;
    if !method.is_static() {
        set(&mut slots, 0, TypeDesc::Object(owner.to_string()));
        slot = 1;
    }
    for arg in &args {
        set(&mut slots, slot, arg.clone());
        slot += arg.slot_size();
    }

    // Stores on the way down to the point.
    let mut position = None;
    for (pos, (id, insn)) in method.instructions.iter().enumerate() {
        if id == at {
            position = Some(pos);
            break;
        }
        if let Insn::Var { opcode, index } = insn {
            let ty = match opcode {
                Opcode::ISTORE => Some(TypeDesc::Int),
                Opcode::LSTORE => Some(TypeDesc::Long),
                Opcode::FSTORE => Some(TypeDesc::Float),
                Opcode::DSTORE => Some(TypeDesc::Double),
                Opcode::ASTORE => Some(TypeDesc::Object("java/lang/Object".to_string())),
                _ => None,
            };
            if let Some(ty) = ty {
                set(&mut slots, *index, ty);
            }
        }
    }
    let position = position.ok_or_else(|| {
        BytecodeError::stale_handle(format!("local picture requested at dead {at}"))
    })?;

    // Declared entries in scope refine both type and name.
    let mut label_pos: HashMap<LabelId, usize> = HashMap::new();
    for (pos, (_, insn)) in method.instructions.iter().enumerate() {
        if let Insn::Label(label) = insn {
            label_pos.insert(*label, pos);
        }
    }
    for lv in &method.local_variables {
        let (Some(start), Some(end)) = (label_pos.get(&lv.start), label_pos.get(&lv.end)) else {
            continue;
        };
        if *start <= position && position < *end {
            let ty = TypeDesc::parse(&lv.desc)?;
            set(&mut slots, lv.index, ty);
            if let Some(slot) = &mut slots[lv.index as usize] {
                slot.name = Some(lv.name.clone());
            }
        }
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessFlags;

    fn method_with(insns: Vec<Insn>, desc: &str, is_static: bool) -> MethodNode {
        let access = if is_static {
            AccessFlags::PUBLIC | AccessFlags::STATIC
        } else {
            AccessFlags::PUBLIC
        };
        let mut method = MethodNode::new(access, "m", desc);
        for insn in insns {
            method.instructions.add(insn);
        }
        method
    }

    #[test]
    fn test_simple_arithmetic_depth() {
        let method = method_with(
            vec![
                Insn::Simple(Opcode::ICONST_1),
                Insn::Simple(Opcode::ICONST_2),
                Insn::Simple(Opcode::IADD),
                Insn::Simple(Opcode::IRETURN),
            ],
            "()I",
            true,
        );
        let (stack, locals) = compute_maxs(&method, "a/B").unwrap();
        assert_eq!(stack, 2);
        assert_eq!(locals, 0);
    }

    #[test]
    fn test_invoke_effect() {
        let method = method_with(
            vec![
                Insn::Var {
                    opcode: Opcode::ALOAD,
                    index: 0,
                },
                Insn::Var {
                    opcode: Opcode::ILOAD,
                    index: 1,
                },
                Insn::Method {
                    opcode: Opcode::INVOKEVIRTUAL,
                    owner: "a/B".to_string(),
                    name: "f".to_string(),
                    desc: "(I)J".to_string(),
                    itf: false,
                },
                Insn::Simple(Opcode::LRETURN),
            ],
            "(I)J",
            false,
        );
        let (stack, locals) = compute_maxs(&method, "a/B").unwrap();
        assert_eq!(stack, 2);
        assert_eq!(locals, 2);
    }

    #[test]
    fn test_branch_merges_deeper_side() {
        let mut method = MethodNode::new(AccessFlags::PUBLIC | AccessFlags::STATIC, "m", "(Z)I");
        let list = &mut method.instructions;
        let target = list.new_label();
        list.add(Insn::Var {
            opcode: Opcode::ILOAD,
            index: 0,
        });
        list.add(Insn::Jump {
            opcode: Opcode::IFEQ,
            label: target,
        });
        list.add(Insn::Simple(Opcode::ICONST_1));
        list.add(Insn::Simple(Opcode::IRETURN));
        list.add(Insn::Label(target));
        list.add(Insn::Simple(Opcode::ICONST_0));
        list.add(Insn::Simple(Opcode::IRETURN));
        let (stack, locals) = compute_maxs(&method, "a/B").unwrap();
        assert_eq!(stack, 1);
        assert_eq!(locals, 1);
    }

    #[test]
    fn test_handler_enters_with_one_slot() {
        let mut method = MethodNode::new(AccessFlags::PUBLIC | AccessFlags::STATIC, "m", "()V");
        let start = method.instructions.new_label();
        let end = method.instructions.new_label();
        let handler = method.instructions.new_label();
        method.instructions.add(Insn::Label(start));
        method.instructions.add(Insn::Simple(Opcode::NOP));
        method.instructions.add(Insn::Label(end));
        method.instructions.add(Insn::Simple(Opcode::RETURN));
        method.instructions.add(Insn::Label(handler));
        method.instructions.add(Insn::Simple(Opcode::ATHROW));
        method.try_catch_blocks.push(crate::node::TryCatchBlock {
            start,
            end,
            handler,
            catch_type: None,
        });
        let (stack, _) = compute_maxs(&method, "a/B").unwrap();
        assert_eq!(stack, 1);
    }

    #[test]
    fn test_underflow_detected() {
        let method = method_with(vec![Insn::Simple(Opcode::IADD)], "()V", true);
        assert!(compute_maxs(&method, "a/B").is_err());
    }

    #[test]
    fn test_local_picture_params_and_stores() {
        let mut method = MethodNode::new(AccessFlags::PUBLIC, "m", "(IJ)V");
        let store = method.instructions.add(Insn::Var {
            opcode: Opcode::FSTORE,
            index: 4,
        });
        let after = method.instructions.add(Insn::Simple(Opcode::RETURN));
        method.max_locals = 5;

        let at_store = local_types_at(&method, "a/B", store).unwrap();
        assert_eq!(
            at_store[0].as_ref().map(|s| s.ty.clone()),
            Some(TypeDesc::Object("a/B".to_string()))
        );
        assert_eq!(at_store[1].as_ref().map(|s| s.ty.clone()), Some(TypeDesc::Int));
        assert_eq!(at_store[2].as_ref().map(|s| s.ty.clone()), Some(TypeDesc::Long));
        assert!(at_store[3].is_none()); // second half of the long
        assert!(at_store[4].is_none()); // not yet stored

        let at_return = local_types_at(&method, "a/B", after).unwrap();
        assert_eq!(
            at_return[4].as_ref().map(|s| s.ty.clone()),
            Some(TypeDesc::Float)
        );
    }
}
