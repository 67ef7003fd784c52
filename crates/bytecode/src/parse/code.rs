//! Code attribute parsing: bytecode decoding and label reconstruction.

use crate::error::{BytecodeError, BytecodeResult};
use crate::insn::{BsmArg, Handle, Insn, LabelId};
use crate::node::{LocalVar, MethodNode, TryCatchBlock};
use crate::opcode::Opcode;
use crate::parse::cursor::Cursor;
use crate::parse::pool::ConstantPool;
use std::collections::{BTreeMap, BTreeSet};

/// One bootstrap method table entry, resolved from the pool.
#[derive(Debug, Clone)]
pub struct BootstrapMethod {
    pub handle: Handle,
    pub args: Vec<BsmArg>,
}

/// A decoded instruction whose branch targets are still byte offsets.
enum Decoded {
    Plain(Insn),
    Jump { opcode: Opcode, target: u32 },
    Table {
        low: i32,
        high: i32,
        default: u32,
        targets: Vec<u32>,
    },
    Lookup {
        default: u32,
        pairs: Vec<(i32, u32)>,
    },
}

struct RawLineNumber {
    start_pc: u16,
    line: u16,
}

struct RawLocalVar {
    start_pc: u16,
    length: u16,
    name: String,
    desc: String,
    index: u16,
}

/// Parses one `Code` attribute body into the method node.
pub fn parse_code(
    cursor: &mut Cursor<'_>,
    pool: &ConstantPool,
    bsms: &[BootstrapMethod],
    method: &mut MethodNode,
) -> BytecodeResult<()> {
    method.max_stack = cursor.u16("max_stack")?;
    method.max_locals = cursor.u16("max_locals")?;
    let code_length = cursor.u32("code_length")? as usize;
    let code = cursor.bytes(code_length, "code")?;

    let decoded = decode_all(code, pool, bsms)?;

    // Exception table, raw offsets.
    let handler_count = cursor.u16("exception table length")?;
    let mut raw_handlers = Vec::with_capacity(handler_count as usize);
    for _ in 0..handler_count {
        let start_pc = cursor.u16("handler start")?;
        let end_pc = cursor.u16("handler end")?;
        let handler_pc = cursor.u16("handler target")?;
        let catch_type = cursor.u16("handler type")?;
        let catch_type = match catch_type {
            0 => None,
            index => Some(pool.class_name(index)?.to_string()),
        };
        raw_handlers.push((start_pc, end_pc, handler_pc, catch_type));
    }

    // Code sub-attributes.
    let mut lines: Vec<RawLineNumber> = Vec::new();
    let mut locals: Vec<RawLocalVar> = Vec::new();
    let attr_count = cursor.u16("code attribute count")?;
    for _ in 0..attr_count {
        let name = pool.utf8(cursor.u16("code attribute name")?)?.to_string();
        let len = cursor.u32("code attribute length")? as usize;
        match name.as_str() {
            "LineNumberTable" => {
                let entries = cursor.u16("line number count")?;
                for _ in 0..entries {
                    lines.push(RawLineNumber {
                        start_pc: cursor.u16("line start_pc")?,
                        line: cursor.u16("line number")?,
                    });
                }
            }
            "LocalVariableTable" => {
                let entries = cursor.u16("local variable count")?;
                for _ in 0..entries {
                    let start_pc = cursor.u16("lv start_pc")?;
                    let length = cursor.u16("lv length")?;
                    let name = pool.utf8(cursor.u16("lv name")?)?.to_string();
                    let desc = pool.utf8(cursor.u16("lv desc")?)?.to_string();
                    let index = cursor.u16("lv index")?;
                    locals.push(RawLocalVar {
                        start_pc,
                        length,
                        name,
                        desc,
                        index,
                    });
                }
            }
            // StackMapTable is dropped: frames are recomputed on emit by
            // the writer's frame helper.
            _ => cursor.skip(len, "code attribute body")?,
        }
    }

    // Every offset that needs a label.
    let mut label_offsets: BTreeSet<u32> = BTreeSet::new();
    for (_, insn) in &decoded {
        match insn {
            Decoded::Jump { target, .. } => {
                label_offsets.insert(*target);
            }
            Decoded::Table {
                default, targets, ..
            } => {
                label_offsets.insert(*default);
                label_offsets.extend(targets.iter().copied());
            }
            Decoded::Lookup { default, pairs } => {
                label_offsets.insert(*default);
                label_offsets.extend(pairs.iter().map(|(_, t)| *t));
            }
            Decoded::Plain(_) => {}
        }
    }
    for (start, end, handler, _) in &raw_handlers {
        label_offsets.insert(*start as u32);
        label_offsets.insert(*end as u32);
        label_offsets.insert(*handler as u32);
    }
    for line in &lines {
        label_offsets.insert(line.start_pc as u32);
    }
    for lv in &locals {
        label_offsets.insert(lv.start_pc as u32);
        label_offsets.insert(lv.start_pc as u32 + lv.length as u32);
    }

    // Allocate labels and lay out the list.
    let mut label_at: BTreeMap<u32, LabelId> = BTreeMap::new();
    for offset in &label_offsets {
        label_at.insert(*offset, method.instructions.new_label());
    }
    let resolve = |offset: u32| -> BytecodeResult<LabelId> {
        label_at.get(&offset).copied().ok_or_else(|| {
            BytecodeError::parse(format!("branch into the middle of nowhere: {offset}"))
        })
    };

    let mut line_lookup: BTreeMap<u32, Vec<u16>> = BTreeMap::new();
    for line in &lines {
        line_lookup
            .entry(line.start_pc as u32)
            .or_default()
            .push(line.line);
    }

    for (offset, insn) in decoded {
        if let Some(label) = label_at.get(&offset) {
            method.instructions.add(Insn::Label(*label));
            if let Some(line_numbers) = line_lookup.get(&offset) {
                for line in line_numbers {
                    method.instructions.add(Insn::Line {
                        line: *line,
                        label: *label,
                    });
                }
            }
        }
        let final_insn = match insn {
            Decoded::Plain(insn) => insn,
            Decoded::Jump { opcode, target } => Insn::Jump {
                opcode,
                label: resolve(target)?,
            },
            Decoded::Table {
                low,
                high,
                default,
                targets,
            } => Insn::TableSwitch {
                low,
                high,
                default: resolve(default)?,
                labels: targets
                    .into_iter()
                    .map(&resolve)
                    .collect::<BytecodeResult<Vec<_>>>()?,
            },
            Decoded::Lookup { default, pairs } => Insn::LookupSwitch {
                default: resolve(default)?,
                pairs: pairs
                    .into_iter()
                    .map(|(key, target)| Ok((key, resolve(target)?)))
                    .collect::<BytecodeResult<Vec<_>>>()?,
            },
        };
        method.instructions.add(final_insn);
    }
    // A label may sit exactly at the end of the code array.
    if let Some(label) = label_at.get(&(code_length as u32)) {
        method.instructions.add(Insn::Label(*label));
    }

    for (start, end, handler, catch_type) in raw_handlers {
        method.try_catch_blocks.push(TryCatchBlock {
            start: resolve(start as u32)?,
            end: resolve(end as u32)?,
            handler: resolve(handler as u32)?,
            catch_type,
        });
    }
    for lv in locals {
        method.local_variables.push(LocalVar {
            start: resolve(lv.start_pc as u32)?,
            end: resolve(lv.start_pc as u32 + lv.length as u32)?,
            name: lv.name,
            desc: lv.desc,
            index: lv.index,
        });
    }
    Ok(())
}

fn decode_all(
    code: &[u8],
    pool: &ConstantPool,
    bsms: &[BootstrapMethod],
) -> BytecodeResult<Vec<(u32, Decoded)>> {
    let mut cursor = Cursor::new(code);
    let mut out = Vec::new();
    while cursor.remaining() > 0 {
        let offset = cursor.position() as u32;
        let insn = decode_one(&mut cursor, offset, pool, bsms)?;
        out.push((offset, insn));
    }
    Ok(out)
}

fn decode_one(
    cursor: &mut Cursor<'_>,
    offset: u32,
    pool: &ConstantPool,
    bsms: &[BootstrapMethod],
) -> BytecodeResult<Decoded> {
    let byte = cursor.u8("opcode")?;
    let opcode = Opcode::try_from(byte).map_err(|_| BytecodeError::InvalidOpcode {
        opcode: byte,
        offset: offset as usize,
    })?;
    let op = opcode as u8;

    Ok(match opcode {
        Opcode::BIPUSH => Decoded::Plain(Insn::IntPush {
            opcode,
            value: cursor.u8("bipush operand")? as i8 as i32,
        }),
        Opcode::SIPUSH => Decoded::Plain(Insn::IntPush {
            opcode,
            value: cursor.u16("sipush operand")? as i16 as i32,
        }),
        Opcode::LDC => {
            let index = cursor.u8("ldc index")? as u16;
            Decoded::Plain(Insn::Ldc(pool.constant(index)?))
        }
        Opcode::LDC_W | Opcode::LDC2_W => {
            let index = cursor.u16("ldc_w index")?;
            Decoded::Plain(Insn::Ldc(pool.constant(index)?))
        }
        Opcode::ILOAD | Opcode::LLOAD | Opcode::FLOAD | Opcode::DLOAD | Opcode::ALOAD => {
            Decoded::Plain(Insn::Var {
                opcode,
                index: cursor.u8("load index")? as u16,
            })
        }
        Opcode::ISTORE | Opcode::LSTORE | Opcode::FSTORE | Opcode::DSTORE | Opcode::ASTORE => {
            Decoded::Plain(Insn::Var {
                opcode,
                index: cursor.u8("store index")? as u16,
            })
        }
        // Short-form loads and stores normalize to the generic form.
        _ if (Opcode::ILOAD_0 as u8..=Opcode::ALOAD_3 as u8).contains(&op) => {
            let rel = op - Opcode::ILOAD_0 as u8;
            let base = Opcode::try_from(Opcode::ILOAD as u8 + rel / 4)
                .map_err(|_| BytecodeError::parse("load base"))?;
            Decoded::Plain(Insn::Var {
                opcode: base,
                index: (rel % 4) as u16,
            })
        }
        _ if (Opcode::ISTORE_0 as u8..=Opcode::ASTORE_3 as u8).contains(&op) => {
            let rel = op - Opcode::ISTORE_0 as u8;
            let base = Opcode::try_from(Opcode::ISTORE as u8 + rel / 4)
                .map_err(|_| BytecodeError::parse("store base"))?;
            Decoded::Plain(Insn::Var {
                opcode: base,
                index: (rel % 4) as u16,
            })
        }
        Opcode::IINC => Decoded::Plain(Insn::Iinc {
            index: cursor.u8("iinc index")? as u16,
            delta: cursor.u8("iinc delta")? as i8 as i16,
        }),
        Opcode::RET => Decoded::Plain(Insn::Var {
            opcode,
            index: cursor.u8("ret index")? as u16,
        }),
        _ if opcode.is_conditional_jump() || opcode == Opcode::GOTO || opcode == Opcode::JSR => {
            let delta = cursor.u16("jump offset")? as i16 as i32;
            Decoded::Jump {
                opcode,
                target: (offset as i32 + delta) as u32,
            }
        }
        Opcode::GOTO_W | Opcode::JSR_W => {
            let delta = cursor.u32("wide jump offset")? as i32;
            let normalized = if opcode == Opcode::GOTO_W {
                Opcode::GOTO
            } else {
                Opcode::JSR
            };
            Decoded::Jump {
                opcode: normalized,
                target: (offset as i32 + delta) as u32,
            }
        }
        Opcode::TABLESWITCH => {
            skip_switch_padding(cursor, offset)?;
            let default = (offset as i32 + cursor.u32("tableswitch default")? as i32) as u32;
            let low = cursor.u32("tableswitch low")? as i32;
            let high = cursor.u32("tableswitch high")? as i32;
            if high < low {
                return Err(BytecodeError::parse("tableswitch high < low"));
            }
            let count = (high - low + 1) as usize;
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push((offset as i32 + cursor.u32("tableswitch target")? as i32) as u32);
            }
            Decoded::Table {
                low,
                high,
                default,
                targets,
            }
        }
        Opcode::LOOKUPSWITCH => {
            skip_switch_padding(cursor, offset)?;
            let default = (offset as i32 + cursor.u32("lookupswitch default")? as i32) as u32;
            let npairs = cursor.u32("lookupswitch npairs")? as usize;
            let mut pairs = Vec::with_capacity(npairs);
            for _ in 0..npairs {
                let key = cursor.u32("lookupswitch key")? as i32;
                let target = (offset as i32 + cursor.u32("lookupswitch target")? as i32) as u32;
                pairs.push((key, target));
            }
            Decoded::Lookup { default, pairs }
        }
        Opcode::GETSTATIC | Opcode::PUTSTATIC | Opcode::GETFIELD | Opcode::PUTFIELD => {
            let (owner, name, desc, _) = pool.member_ref(cursor.u16("field ref")?)?;
            Decoded::Plain(Insn::Field {
                opcode,
                owner: owner.to_string(),
                name: name.to_string(),
                desc: desc.to_string(),
            })
        }
        Opcode::INVOKEVIRTUAL | Opcode::INVOKESPECIAL | Opcode::INVOKESTATIC => {
            let (owner, name, desc, itf) = pool.member_ref(cursor.u16("method ref")?)?;
            Decoded::Plain(Insn::Method {
                opcode,
                owner: owner.to_string(),
                name: name.to_string(),
                desc: desc.to_string(),
                itf,
            })
        }
        Opcode::INVOKEINTERFACE => {
            let (owner, name, desc, _) = pool.member_ref(cursor.u16("interface method ref")?)?;
            cursor.u8("invokeinterface count")?;
            cursor.u8("invokeinterface zero")?;
            Decoded::Plain(Insn::Method {
                opcode,
                owner: owner.to_string(),
                name: name.to_string(),
                desc: desc.to_string(),
                itf: true,
            })
        }
        Opcode::INVOKEDYNAMIC => {
            let (bsm_index, name, desc) = pool.invoke_dynamic(cursor.u16("indy ref")?)?;
            cursor.u16("indy zeros")?;
            let bsm = bsms.get(bsm_index as usize).ok_or_else(|| {
                BytecodeError::parse(format!("bootstrap method index {bsm_index} out of range"))
            })?;
            Decoded::Plain(Insn::InvokeDynamic {
                name: name.to_string(),
                desc: desc.to_string(),
                bsm: bsm.handle.clone(),
                args: bsm.args.clone(),
            })
        }
        Opcode::NEW | Opcode::ANEWARRAY | Opcode::CHECKCAST | Opcode::INSTANCEOF => {
            let class = pool.class_name(cursor.u16("type operand")?)?.to_string();
            Decoded::Plain(Insn::Type { opcode, class })
        }
        Opcode::NEWARRAY => Decoded::Plain(Insn::NewArray {
            atype: cursor.u8("newarray type")?,
        }),
        Opcode::MULTIANEWARRAY => {
            let desc = pool.class_name(cursor.u16("multianewarray type")?)?.to_string();
            let dims = cursor.u8("multianewarray dims")?;
            Decoded::Plain(Insn::MultiANewArray { desc, dims })
        }
        Opcode::WIDE => {
            let wide_byte = cursor.u8("wide opcode")?;
            let wide_op = Opcode::try_from(wide_byte).map_err(|_| BytecodeError::InvalidOpcode {
                opcode: wide_byte,
                offset: offset as usize + 1,
            })?;
            match wide_op {
                Opcode::IINC => Decoded::Plain(Insn::Iinc {
                    index: cursor.u16("wide iinc index")?,
                    delta: cursor.u16("wide iinc delta")? as i16,
                }),
                _ if wide_op.is_load() || wide_op.is_store() || wide_op == Opcode::RET => {
                    Decoded::Plain(Insn::Var {
                        opcode: wide_op,
                        index: cursor.u16("wide index")?,
                    })
                }
                _ => {
                    return Err(BytecodeError::InvalidOpcode {
                        opcode: wide_byte,
                        offset: offset as usize + 1,
                    })
                }
            }
        }
        // Everything left is operand-less.
        _ => Decoded::Plain(Insn::Simple(opcode)),
    })
}

fn skip_switch_padding(cursor: &mut Cursor<'_>, _offset: u32) -> BytecodeResult<()> {
    while cursor.position() % 4 != 0 {
        cursor.u8("switch padding")?;
    }
    Ok(())
}

/// Parses the `BootstrapMethods` class attribute body.
pub fn parse_bootstrap_methods(
    cursor: &mut Cursor<'_>,
    pool: &ConstantPool,
) -> BytecodeResult<Vec<BootstrapMethod>> {
    let count = cursor.u16("bootstrap method count")?;
    let mut bsms = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let handle = pool.handle(cursor.u16("bootstrap handle")?)?;
        let arg_count = cursor.u16("bootstrap arg count")?;
        let mut args = Vec::with_capacity(arg_count as usize);
        for _ in 0..arg_count {
            args.push(pool.bsm_arg(cursor.u16("bootstrap arg")?)?);
        }
        bsms.push(BootstrapMethod { handle, args });
    }
    Ok(bsms)
}
