//! Annotation attribute parsing.

use crate::annotation::{AnnotationNode, AnnotationValue};
use crate::constant::ConstantValue;
use crate::error::{BytecodeError, BytecodeResult};
use crate::parse::cursor::Cursor;
use crate::parse::pool::ConstantPool;

/// Parses a `RuntimeVisibleAnnotations`-shaped attribute body.
pub fn parse_annotations(
    cursor: &mut Cursor<'_>,
    pool: &ConstantPool,
) -> BytecodeResult<Vec<AnnotationNode>> {
    let count = cursor.u16("annotation count")?;
    let mut annotations = Vec::with_capacity(count as usize);
    for _ in 0..count {
        annotations.push(parse_annotation(cursor, pool)?);
    }
    Ok(annotations)
}

/// Parses a `RuntimeVisibleParameterAnnotations`-shaped attribute body.
pub fn parse_parameter_annotations(
    cursor: &mut Cursor<'_>,
    pool: &ConstantPool,
) -> BytecodeResult<Vec<Vec<AnnotationNode>>> {
    let params = cursor.u8("parameter count")?;
    let mut out = Vec::with_capacity(params as usize);
    for _ in 0..params {
        out.push(parse_annotations(cursor, pool)?);
    }
    Ok(out)
}

fn parse_annotation(
    cursor: &mut Cursor<'_>,
    pool: &ConstantPool,
) -> BytecodeResult<AnnotationNode> {
    let type_index = cursor.u16("annotation type")?;
    let mut node = AnnotationNode::new(pool.utf8(type_index)?.to_string());
    let pairs = cursor.u16("annotation pair count")?;
    for _ in 0..pairs {
        let name_index = cursor.u16("element name")?;
        let name = pool.utf8(name_index)?.to_string();
        let value = parse_element_value(cursor, pool)?;
        node.values.push((name, value));
    }
    Ok(node)
}

fn parse_element_value(
    cursor: &mut Cursor<'_>,
    pool: &ConstantPool,
) -> BytecodeResult<AnnotationValue> {
    let tag = cursor.u8("element value tag")?;
    Ok(match tag {
        b'B' | b'C' | b'I' | b'S' | b'Z' => {
            let index = cursor.u16("const index")?;
            match pool.constant(index)? {
                ConstantValue::Int(v) => AnnotationValue::Const(ConstantValue::Int(v)),
                _ => {
                    return Err(BytecodeError::bad_pool_entry(
                        index,
                        "expected int-family constant",
                    ))
                }
            }
        }
        b'D' | b'F' | b'J' => {
            let index = cursor.u16("const index")?;
            AnnotationValue::Const(pool.constant(index)?)
        }
        b's' => {
            let index = cursor.u16("string index")?;
            AnnotationValue::Const(ConstantValue::String(pool.utf8(index)?.to_string()))
        }
        b'e' => {
            let desc = pool.utf8(cursor.u16("enum type")?)?.to_string();
            let value = pool.utf8(cursor.u16("enum value")?)?.to_string();
            AnnotationValue::Enum { desc, value }
        }
        b'c' => AnnotationValue::Class(pool.utf8(cursor.u16("class info")?)?.to_string()),
        b'@' => AnnotationValue::Annotation(parse_annotation(cursor, pool)?),
        b'[' => {
            let len = cursor.u16("array length")?;
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(parse_element_value(cursor, pool)?);
            }
            AnnotationValue::Array(items)
        }
        other => {
            return Err(BytecodeError::parse(format!(
                "unknown element value tag {:?}",
                other as char
            )))
        }
    })
}
