//! Class file emission.
//!
//! Serializes a [`ClassNode`] back to class file bytes, rebuilding the
//! constant pool from scratch. Stack map frames are supplied by a
//! [`FrameComputer`]; the default computes none, which is sufficient for
//! class versions that allow verification by inference.

mod pool;

use crate::annotation::{AnnotationNode, AnnotationValue};
use crate::constant::ConstantValue;
use crate::descriptor::TypeDesc;
use crate::error::{BytecodeError, BytecodeResult};
use crate::insn::{Insn, LabelId};
use crate::node::{ClassNode, MethodNode};
use crate::opcode::Opcode;
use crate::resolver::ClassResolver;
use pool::PoolBuilder;
use std::collections::HashMap;

/// A verification type for stack map frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifType {
    Top,
    Int,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    Object(String),
    Uninitialized(LabelId),
}

/// One full frame at a label.
#[derive(Debug, Clone)]
pub struct StackMapFrame {
    pub at: LabelId,
    pub locals: Vec<VerifType>,
    pub stack: Vec<VerifType>,
}

/// Computes stack map frames for a method on emit.
///
/// Frame computation needs hierarchy answers, so implementations receive the
/// common-superclass resolver. The model itself never computes frames.
pub trait FrameComputer {
    fn compute(
        &self,
        class: &ClassNode,
        method: &MethodNode,
        resolver: &dyn ClassResolver,
    ) -> BytecodeResult<Vec<StackMapFrame>>;
}

/// The default frame computer: no frames.
pub struct NoFrames;

impl FrameComputer for NoFrames {
    fn compute(
        &self,
        _class: &ClassNode,
        _method: &MethodNode,
        _resolver: &dyn ClassResolver,
    ) -> BytecodeResult<Vec<StackMapFrame>> {
        Ok(Vec::new())
    }
}

/// Emits a class with no stack map frames.
pub fn emit_class(class: &ClassNode) -> BytecodeResult<Vec<u8>> {
    emit_class_with(class, &NoFrames, &crate::resolver::RootResolver)
}

/// Emits a class, asking `frames` for stack map data per method.
pub fn emit_class_with(
    class: &ClassNode,
    frames: &dyn FrameComputer,
    resolver: &dyn ClassResolver,
) -> BytecodeResult<Vec<u8>> {
    let mut pool = PoolBuilder::new();
    let mut body = Vec::new();

    push_u16(&mut body, class.access.bits());
    push_u16(&mut body, pool.class(&class.name)?);
    match &class.super_name {
        Some(name) => push_u16(&mut body, pool.class(name)?),
        None => push_u16(&mut body, 0),
    }
    push_u16(&mut body, class.interfaces.len() as u16);
    for itf in &class.interfaces {
        push_u16(&mut body, pool.class(itf)?);
    }

    // Fields.
    push_u16(&mut body, class.fields.len() as u16);
    for field in &class.fields {
        push_u16(&mut body, field.access.bits());
        push_u16(&mut body, pool.utf8(&field.name)?);
        push_u16(&mut body, pool.utf8(&field.desc)?);
        let mut attrs: Vec<(u16, Vec<u8>)> = Vec::new();
        if let Some(value) = &field.value {
            let mut attr = Vec::new();
            push_u16(&mut attr, pool.constant(value)?);
            attrs.push((pool.utf8("ConstantValue")?, attr));
        }
        if let Some(signature) = &field.signature {
            let mut attr = Vec::new();
            push_u16(&mut attr, pool.utf8(signature)?);
            attrs.push((pool.utf8("Signature")?, attr));
        }
        push_annotation_attrs(
            &mut pool,
            &mut attrs,
            &field.visible_annotations,
            &field.invisible_annotations,
        )?;
        push_attrs(&mut body, &attrs);
    }

    // Methods.
    push_u16(&mut body, class.methods.len() as u16);
    for method in &class.methods {
        push_u16(&mut body, method.access.bits());
        push_u16(&mut body, pool.utf8(&method.name)?);
        push_u16(&mut body, pool.utf8(&method.desc)?);
        let mut attrs: Vec<(u16, Vec<u8>)> = Vec::new();
        if !method.instructions.is_empty() {
            let frame_data = frames.compute(class, method, resolver)?;
            let code = emit_code(&mut pool, method, &frame_data)?;
            attrs.push((pool.utf8("Code")?, code));
        }
        if !method.exceptions.is_empty() {
            let mut attr = Vec::new();
            push_u16(&mut attr, method.exceptions.len() as u16);
            for thrown in &method.exceptions {
                push_u16(&mut attr, pool.class(thrown)?);
            }
            attrs.push((pool.utf8("Exceptions")?, attr));
        }
        if let Some(signature) = &method.signature {
            let mut attr = Vec::new();
            push_u16(&mut attr, pool.utf8(signature)?);
            attrs.push((pool.utf8("Signature")?, attr));
        }
        push_annotation_attrs(
            &mut pool,
            &mut attrs,
            &method.visible_annotations,
            &method.invisible_annotations,
        )?;
        if !method.visible_parameter_annotations.is_empty() {
            let attr =
                emit_parameter_annotations(&mut pool, &method.visible_parameter_annotations)?;
            attrs.push((pool.utf8("RuntimeVisibleParameterAnnotations")?, attr));
        }
        if !method.invisible_parameter_annotations.is_empty() {
            let attr =
                emit_parameter_annotations(&mut pool, &method.invisible_parameter_annotations)?;
            attrs.push((pool.utf8("RuntimeInvisibleParameterAnnotations")?, attr));
        }
        push_attrs(&mut body, &attrs);
    }

    // Class attributes.
    let mut attrs: Vec<(u16, Vec<u8>)> = Vec::new();
    if let Some(source_file) = &class.source_file {
        let mut attr = Vec::new();
        push_u16(&mut attr, pool.utf8(source_file)?);
        attrs.push((pool.utf8("SourceFile")?, attr));
    }
    if let Some(signature) = &class.signature {
        let mut attr = Vec::new();
        push_u16(&mut attr, pool.utf8(signature)?);
        attrs.push((pool.utf8("Signature")?, attr));
    }
    push_annotation_attrs(
        &mut pool,
        &mut attrs,
        &class.visible_annotations,
        &class.invisible_annotations,
    )?;
    if pool.has_bootstrap_methods() {
        let attr = pool.bootstrap_methods_body()?;
        attrs.push((pool.utf8("BootstrapMethods")?, attr));
    }
    push_attrs(&mut body, &attrs);

    // Final assembly.
    let (count, pool_bytes) = pool.finish();
    let mut out = Vec::with_capacity(body.len() + pool_bytes.len() + 16);
    out.extend_from_slice(&0xcafe_babeu32.to_be_bytes());
    push_u16(&mut out, class.version.minor);
    push_u16(&mut out, class.version.major);
    push_u16(&mut out, count);
    out.extend_from_slice(&pool_bytes);
    out.extend_from_slice(&body);
    Ok(out)
}

fn push_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn push_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn push_attrs(buf: &mut Vec<u8>, attrs: &[(u16, Vec<u8>)]) {
    push_u16(buf, attrs.len() as u16);
    for (name_index, body) in attrs {
        push_u16(buf, *name_index);
        push_u32(buf, body.len() as u32);
        buf.extend_from_slice(body);
    }
}

fn push_annotation_attrs(
    pool: &mut PoolBuilder,
    attrs: &mut Vec<(u16, Vec<u8>)>,
    visible: &[AnnotationNode],
    invisible: &[AnnotationNode],
) -> BytecodeResult<()> {
    if !visible.is_empty() {
        let attr = emit_annotations(pool, visible)?;
        attrs.push((pool.utf8("RuntimeVisibleAnnotations")?, attr));
    }
    if !invisible.is_empty() {
        let attr = emit_annotations(pool, invisible)?;
        attrs.push((pool.utf8("RuntimeInvisibleAnnotations")?, attr));
    }
    Ok(())
}

fn emit_annotations(pool: &mut PoolBuilder, nodes: &[AnnotationNode]) -> BytecodeResult<Vec<u8>> {
    let mut buf = Vec::new();
    push_u16(&mut buf, nodes.len() as u16);
    for node in nodes {
        emit_annotation(pool, node, &mut buf)?;
    }
    Ok(buf)
}

fn emit_parameter_annotations(
    pool: &mut PoolBuilder,
    params: &[Vec<AnnotationNode>],
) -> BytecodeResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.push(params.len() as u8);
    for annotations in params {
        push_u16(&mut buf, annotations.len() as u16);
        for node in annotations {
            emit_annotation(pool, node, &mut buf)?;
        }
    }
    Ok(buf)
}

fn emit_annotation(
    pool: &mut PoolBuilder,
    node: &AnnotationNode,
    buf: &mut Vec<u8>,
) -> BytecodeResult<()> {
    push_u16(buf, pool.utf8(&node.desc)?);
    push_u16(buf, node.values.len() as u16);
    for (name, value) in &node.values {
        push_u16(buf, pool.utf8(name)?);
        emit_element_value(pool, value, buf)?;
    }
    Ok(())
}

fn emit_element_value(
    pool: &mut PoolBuilder,
    value: &AnnotationValue,
    buf: &mut Vec<u8>,
) -> BytecodeResult<()> {
    match value {
        AnnotationValue::Const(ConstantValue::Int(v)) => {
            buf.push(b'I');
            push_u16(buf, pool.int(*v)?);
        }
        AnnotationValue::Const(ConstantValue::Long(v)) => {
            buf.push(b'J');
            push_u16(buf, pool.long(*v)?);
        }
        AnnotationValue::Const(ConstantValue::Float(v)) => {
            buf.push(b'F');
            push_u16(buf, pool.float(*v)?);
        }
        AnnotationValue::Const(ConstantValue::Double(v)) => {
            buf.push(b'D');
            push_u16(buf, pool.double(*v)?);
        }
        AnnotationValue::Const(ConstantValue::String(v)) => {
            buf.push(b's');
            push_u16(buf, pool.utf8(v)?);
        }
        AnnotationValue::Const(ConstantValue::Class(v)) => {
            buf.push(b'c');
            push_u16(buf, pool.utf8(&format!("L{v};"))?);
        }
        AnnotationValue::Enum { desc, value } => {
            buf.push(b'e');
            push_u16(buf, pool.utf8(desc)?);
            push_u16(buf, pool.utf8(value)?);
        }
        AnnotationValue::Class(desc) => {
            buf.push(b'c');
            push_u16(buf, pool.utf8(desc)?);
        }
        AnnotationValue::Annotation(node) => {
            buf.push(b'@');
            emit_annotation(pool, node, buf)?;
        }
        AnnotationValue::Array(items) => {
            buf.push(b'[');
            push_u16(buf, items.len() as u16);
            for item in items {
                emit_element_value(pool, item, buf)?;
            }
        }
    }
    Ok(())
}

/// Size in bytes of one instruction at `offset`.
fn insn_size(insn: &Insn, offset: u32) -> u32 {
    match insn {
        Insn::Simple(_) => 1,
        Insn::IntPush { opcode, .. } => {
            if *opcode == Opcode::BIPUSH {
                2
            } else {
                3
            }
        }
        Insn::Var { opcode, index } => {
            if *index <= 3 && (opcode.is_load() || opcode.is_store()) {
                1
            } else if *index <= 0xff {
                2
            } else {
                4
            }
        }
        Insn::Iinc { index, delta } => {
            if *index <= 0xff && (-128..=127).contains(delta) {
                3
            } else {
                6
            }
        }
        Insn::Type { .. } => 3,
        Insn::NewArray { .. } => 2,
        Insn::MultiANewArray { .. } => 4,
        Insn::Field { .. } => 3,
        Insn::Method { opcode, .. } => {
            if *opcode == Opcode::INVOKEINTERFACE {
                5
            } else {
                3
            }
        }
        Insn::InvokeDynamic { .. } => 5,
        Insn::Jump { .. } => 3,
        Insn::TableSwitch { low, high, .. } => {
            let pad = switch_pad(offset);
            1 + pad + 12 + 4 * (high - low + 1) as u32
        }
        Insn::LookupSwitch { pairs, .. } => {
            let pad = switch_pad(offset);
            1 + pad + 8 + 8 * pairs.len() as u32
        }
        Insn::Ldc(_) => 3,
        Insn::Label(_) | Insn::Line { .. } => 0,
    }
}

fn switch_pad(offset: u32) -> u32 {
    (4 - (offset + 1) % 4) % 4
}

fn emit_code(
    pool: &mut PoolBuilder,
    method: &MethodNode,
    frames: &[StackMapFrame],
) -> BytecodeResult<Vec<u8>> {
    // Pass A: lay out offsets.
    let mut offset = 0u32;
    let mut label_offsets: HashMap<LabelId, u32> = HashMap::new();
    let mut insn_offsets: Vec<u32> = Vec::new();
    for (_, insn) in method.instructions.iter() {
        insn_offsets.push(offset);
        if let Insn::Label(label) = insn {
            label_offsets.insert(*label, offset);
        }
        offset += insn_size(insn, offset);
    }
    let code_length = offset;
    if code_length > 0xffff {
        return Err(BytecodeError::emit(format!(
            "method {} exceeds the code size limit",
            method.name
        )));
    }
    let label_offset = |label: LabelId| -> BytecodeResult<u32> {
        label_offsets
            .get(&label)
            .copied()
            .ok_or_else(|| BytecodeError::UnresolvedLabel {
                method: method.name.clone(),
            })
    };

    // Pass B: write instructions.
    let mut code = Vec::with_capacity(code_length as usize);
    let mut lines: Vec<(u16, u16)> = Vec::new();
    for (index, (_, insn)) in method.instructions.iter().enumerate() {
        let at = insn_offsets[index];
        debug_assert_eq!(at, code.len() as u32);
        match insn {
            Insn::Label(_) => {}
            Insn::Line { line, label } => {
                lines.push((label_offset(*label)? as u16, *line));
            }
            Insn::Simple(opcode) => code.push(*opcode as u8),
            Insn::IntPush { opcode, value } => {
                code.push(*opcode as u8);
                if *opcode == Opcode::BIPUSH {
                    code.push(*value as i8 as u8);
                } else {
                    code.extend_from_slice(&(*value as i16).to_be_bytes());
                }
            }
            Insn::Var { opcode, index } => {
                emit_var(&mut code, *opcode, *index);
            }
            Insn::Iinc { index, delta } => {
                if *index <= 0xff && (-128..=127).contains(delta) {
                    code.push(Opcode::IINC as u8);
                    code.push(*index as u8);
                    code.push(*delta as i8 as u8);
                } else {
                    code.push(Opcode::WIDE as u8);
                    code.push(Opcode::IINC as u8);
                    code.extend_from_slice(&index.to_be_bytes());
                    code.extend_from_slice(&delta.to_be_bytes());
                }
            }
            Insn::Type { opcode, class } => {
                code.push(*opcode as u8);
                push_u16(&mut code, pool.class(class)?);
            }
            Insn::NewArray { atype } => {
                code.push(Opcode::NEWARRAY as u8);
                code.push(*atype);
            }
            Insn::MultiANewArray { desc, dims } => {
                code.push(Opcode::MULTIANEWARRAY as u8);
                push_u16(&mut code, pool.class(desc)?);
                code.push(*dims);
            }
            Insn::Field {
                opcode,
                owner,
                name,
                desc,
            } => {
                code.push(*opcode as u8);
                push_u16(&mut code, pool.field_ref(owner, name, desc)?);
            }
            Insn::Method {
                opcode,
                owner,
                name,
                desc,
                itf,
            } => {
                code.push(*opcode as u8);
                push_u16(&mut code, pool.method_ref(owner, name, desc, *itf)?);
                if *opcode == Opcode::INVOKEINTERFACE {
                    let count = TypeDesc::args_slot_count(desc, true)?;
                    code.push(count as u8);
                    code.push(0);
                }
            }
            Insn::InvokeDynamic {
                name,
                desc,
                bsm,
                args,
            } => {
                let bsm_index = pool.bootstrap_method(bsm, args)?;
                code.push(Opcode::INVOKEDYNAMIC as u8);
                push_u16(&mut code, pool.invoke_dynamic(bsm_index, name, desc)?);
                push_u16(&mut code, 0);
            }
            Insn::Jump { opcode, label } => {
                let target = label_offset(*label)?;
                let delta = target as i64 - at as i64;
                if !(-32768..=32767).contains(&delta) {
                    return Err(BytecodeError::emit(format!(
                        "branch in {} out of short range",
                        method.name
                    )));
                }
                code.push(*opcode as u8);
                code.extend_from_slice(&(delta as i16).to_be_bytes());
            }
            Insn::TableSwitch {
                low,
                high,
                default,
                labels,
            } => {
                code.push(Opcode::TABLESWITCH as u8);
                for _ in 0..switch_pad(at) {
                    code.push(0);
                }
                push_u32(
                    &mut code,
                    (label_offset(*default)? as i64 - at as i64) as u32,
                );
                push_u32(&mut code, *low as u32);
                push_u32(&mut code, *high as u32);
                for label in labels {
                    push_u32(&mut code, (label_offset(*label)? as i64 - at as i64) as u32);
                }
            }
            Insn::LookupSwitch { default, pairs } => {
                code.push(Opcode::LOOKUPSWITCH as u8);
                for _ in 0..switch_pad(at) {
                    code.push(0);
                }
                push_u32(
                    &mut code,
                    (label_offset(*default)? as i64 - at as i64) as u32,
                );
                push_u32(&mut code, pairs.len() as u32);
                for (key, label) in pairs {
                    push_u32(&mut code, *key as u32);
                    push_u32(&mut code, (label_offset(*label)? as i64 - at as i64) as u32);
                }
            }
            Insn::Ldc(value) => {
                if value.slot_size() == 2 {
                    code.push(Opcode::LDC2_W as u8);
                } else {
                    code.push(Opcode::LDC_W as u8);
                }
                push_u16(&mut code, pool.constant(value)?);
            }
        }
    }

    // Code attribute assembly.
    let mut attr = Vec::new();
    push_u16(&mut attr, method.max_stack);
    push_u16(&mut attr, method.max_locals);
    push_u32(&mut attr, code.len() as u32);
    attr.extend_from_slice(&code);

    push_u16(&mut attr, method.try_catch_blocks.len() as u16);
    for block in &method.try_catch_blocks {
        push_u16(&mut attr, label_offset(block.start)? as u16);
        push_u16(&mut attr, label_offset(block.end)? as u16);
        push_u16(&mut attr, label_offset(block.handler)? as u16);
        match &block.catch_type {
            Some(name) => push_u16(&mut attr, pool.class(name)?),
            None => push_u16(&mut attr, 0),
        }
    }

    let mut sub_attrs: Vec<(u16, Vec<u8>)> = Vec::new();
    if !lines.is_empty() {
        let mut body = Vec::new();
        push_u16(&mut body, lines.len() as u16);
        for (pc, line) in &lines {
            push_u16(&mut body, *pc);
            push_u16(&mut body, *line);
        }
        sub_attrs.push((pool.utf8("LineNumberTable")?, body));
    }
    if !method.local_variables.is_empty() {
        let mut body = Vec::new();
        push_u16(&mut body, method.local_variables.len() as u16);
        for lv in &method.local_variables {
            let start = label_offset(lv.start)? as u16;
            let end = label_offset(lv.end)? as u16;
            push_u16(&mut body, start);
            push_u16(&mut body, end.saturating_sub(start));
            push_u16(&mut body, pool.utf8(&lv.name)?);
            push_u16(&mut body, pool.utf8(&lv.desc)?);
            push_u16(&mut body, lv.index);
        }
        sub_attrs.push((pool.utf8("LocalVariableTable")?, body));
    }
    if !frames.is_empty() {
        let body = emit_stack_map_table(pool, frames, &label_offset)?;
        sub_attrs.push((pool.utf8("StackMapTable")?, body));
    }
    push_attrs(&mut attr, &sub_attrs);
    Ok(attr)
}

fn emit_var(code: &mut Vec<u8>, opcode: Opcode, index: u16) {
    if index <= 3 && (opcode.is_load() || opcode.is_store()) {
        let base = if opcode.is_load() {
            Opcode::ILOAD_0 as u8 + (opcode as u8 - Opcode::ILOAD as u8) * 4
        } else {
            Opcode::ISTORE_0 as u8 + (opcode as u8 - Opcode::ISTORE as u8) * 4
        };
        code.push(base + index as u8);
    } else if index <= 0xff {
        code.push(opcode as u8);
        code.push(index as u8);
    } else {
        code.push(Opcode::WIDE as u8);
        code.push(opcode as u8);
        code.extend_from_slice(&index.to_be_bytes());
    }
}

fn emit_stack_map_table(
    pool: &mut PoolBuilder,
    frames: &[StackMapFrame],
    label_offset: &dyn Fn(LabelId) -> BytecodeResult<u32>,
) -> BytecodeResult<Vec<u8>> {
    let mut sorted: Vec<&StackMapFrame> = frames.iter().collect();
    let mut keyed: Vec<(u32, &StackMapFrame)> = Vec::with_capacity(sorted.len());
    for frame in sorted.drain(..) {
        keyed.push((label_offset(frame.at)?, frame));
    }
    keyed.sort_by_key(|(offset, _)| *offset);

    let mut body = Vec::new();
    push_u16(&mut body, keyed.len() as u16);
    let mut previous: i64 = -1;
    for (offset, frame) in keyed {
        let delta = (offset as i64 - previous - 1) as u16;
        previous = offset as i64;
        body.push(255); // full_frame
        push_u16(&mut body, delta);
        push_u16(&mut body, frame.locals.len() as u16);
        for ty in &frame.locals {
            emit_verif_type(pool, ty, label_offset, &mut body)?;
        }
        push_u16(&mut body, frame.stack.len() as u16);
        for ty in &frame.stack {
            emit_verif_type(pool, ty, label_offset, &mut body)?;
        }
    }
    Ok(body)
}

fn emit_verif_type(
    pool: &mut PoolBuilder,
    ty: &VerifType,
    label_offset: &dyn Fn(LabelId) -> BytecodeResult<u32>,
    body: &mut Vec<u8>,
) -> BytecodeResult<()> {
    match ty {
        VerifType::Top => body.push(0),
        VerifType::Int => body.push(1),
        VerifType::Float => body.push(2),
        VerifType::Double => body.push(3),
        VerifType::Long => body.push(4),
        VerifType::Null => body.push(5),
        VerifType::UninitializedThis => body.push(6),
        VerifType::Object(name) => {
            body.push(7);
            let index = pool.class(name)?;
            push_u16(body, index);
        }
        VerifType::Uninitialized(label) => {
            body.push(8);
            let offset = label_offset(*label)? as u16;
            push_u16(body, offset);
        }
    }
    Ok(())
}
