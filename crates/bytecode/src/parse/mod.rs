//! Class file parsing.
//!
//! Builds a constant-pool-free [`ClassNode`] tree from raw class bytes.
//! The pool is resolved away during the parse; `StackMapTable` frames are
//! dropped (the writer recomputes what it needs on emit); attributes the
//! model does not carry are skipped.

mod annotations;
mod code;
pub(crate) mod cursor;
pub(crate) mod pool;

use crate::access::AccessFlags;
use crate::error::{BytecodeError, BytecodeResult};
use crate::node::{ClassNode, ClassVersion, FieldNode, MethodNode};
use code::BootstrapMethod;
use cursor::Cursor;
use log::trace;
use pool::ConstantPool;

pub(crate) use pool::encode_modified_utf8;

const MAGIC: u32 = 0xcafe_babe;
/// Oldest supported class file major version (JDK 1.2).
const MIN_MAJOR: u16 = 46;
/// Newest supported class file major version.
const MAX_MAJOR: u16 = 67;

/// Parses a class file into its tree form.
pub fn parse_class(bytes: &[u8]) -> BytecodeResult<ClassNode> {
    let mut cursor = Cursor::new(bytes);
    if cursor.u32("magic")? != MAGIC {
        return Err(BytecodeError::unsupported("bad magic number"));
    }
    let minor = cursor.u16("minor version")?;
    let major = cursor.u16("major version")?;
    if !(MIN_MAJOR..=MAX_MAJOR).contains(&major) {
        return Err(BytecodeError::unsupported(format!(
            "class file major version {major}"
        )));
    }

    let pool = ConstantPool::parse(&mut cursor)?;
    let access = AccessFlags::from_bits_retain(cursor.u16("access flags")?);
    let name = pool.class_name(cursor.u16("this class")?)?.to_string();
    let super_name = pool
        .opt_class_name(cursor.u16("super class")?)?
        .map(str::to_string);
    let interface_count = cursor.u16("interface count")?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(pool.class_name(cursor.u16("interface")?)?.to_string());
    }

    let mut class = ClassNode {
        version: ClassVersion { minor, major },
        access,
        name,
        super_name,
        interfaces,
        signature: None,
        source_file: None,
        fields: Vec::new(),
        methods: Vec::new(),
        visible_annotations: Vec::new(),
        invisible_annotations: Vec::new(),
    };

    parse_fields(&mut cursor, &pool, &mut class)?;

    // Method bodies may hold invokedynamic sites whose bootstrap data lives
    // in a class attribute *after* the methods. Skim ahead for it first.
    let methods_start = cursor.position();
    skip_members(&mut cursor, "method")?;
    let bsms = parse_class_attributes(&mut cursor, &pool, &mut class)?;

    let mut method_cursor = Cursor::at(bytes, methods_start);
    parse_methods(&mut method_cursor, &pool, &bsms, &mut class)?;

    Ok(class)
}

fn parse_fields(
    cursor: &mut Cursor<'_>,
    pool: &ConstantPool,
    class: &mut ClassNode,
) -> BytecodeResult<()> {
    let count = cursor.u16("field count")?;
    for _ in 0..count {
        let access = AccessFlags::from_bits_retain(cursor.u16("field access")?);
        let name = pool.utf8(cursor.u16("field name")?)?.to_string();
        let desc = pool.utf8(cursor.u16("field desc")?)?.to_string();
        let mut field = FieldNode {
            access,
            name,
            desc,
            ..FieldNode::default()
        };
        let attr_count = cursor.u16("field attribute count")?;
        for _ in 0..attr_count {
            let attr_name = pool.utf8(cursor.u16("field attribute name")?)?.to_string();
            let len = cursor.u32("field attribute length")? as usize;
            match attr_name.as_str() {
                "ConstantValue" => {
                    field.value = Some(pool.constant(cursor.u16("constant value")?)?);
                }
                "Signature" => {
                    field.signature = Some(pool.utf8(cursor.u16("field signature")?)?.to_string());
                }
                "RuntimeVisibleAnnotations" => {
                    field
                        .visible_annotations
                        .extend(annotations::parse_annotations(cursor, pool)?);
                }
                "RuntimeInvisibleAnnotations" => {
                    field
                        .invisible_annotations
                        .extend(annotations::parse_annotations(cursor, pool)?);
                }
                _ => {
                    trace!("skipping field attribute {attr_name}");
                    cursor.skip(len, "field attribute body")?;
                }
            }
        }
        class.fields.push(field);
    }
    Ok(())
}

/// Skips a field or method table without interpreting it.
fn skip_members(cursor: &mut Cursor<'_>, what: &str) -> BytecodeResult<()> {
    let count = cursor.u16("member count")?;
    for _ in 0..count {
        cursor.skip(6, what)?; // access, name, desc
        let attr_count = cursor.u16("member attribute count")?;
        for _ in 0..attr_count {
            cursor.skip(2, "attribute name")?;
            let len = cursor.u32("attribute length")? as usize;
            cursor.skip(len, "attribute body")?;
        }
    }
    Ok(())
}

fn parse_methods(
    cursor: &mut Cursor<'_>,
    pool: &ConstantPool,
    bsms: &[BootstrapMethod],
    class: &mut ClassNode,
) -> BytecodeResult<()> {
    let count = cursor.u16("method count")?;
    for _ in 0..count {
        let access = AccessFlags::from_bits_retain(cursor.u16("method access")?);
        let name = pool.utf8(cursor.u16("method name")?)?.to_string();
        let desc = pool.utf8(cursor.u16("method desc")?)?.to_string();
        let mut method = MethodNode {
            access,
            name,
            desc,
            ..MethodNode::default()
        };
        let attr_count = cursor.u16("method attribute count")?;
        for _ in 0..attr_count {
            let attr_name = pool.utf8(cursor.u16("method attribute name")?)?.to_string();
            let len = cursor.u32("method attribute length")? as usize;
            match attr_name.as_str() {
                "Code" => code::parse_code(cursor, pool, bsms, &mut method)?,
                "Exceptions" => {
                    let thrown = cursor.u16("exception count")?;
                    for _ in 0..thrown {
                        method
                            .exceptions
                            .push(pool.class_name(cursor.u16("thrown type")?)?.to_string());
                    }
                }
                "Signature" => {
                    method.signature =
                        Some(pool.utf8(cursor.u16("method signature")?)?.to_string());
                }
                "RuntimeVisibleAnnotations" => {
                    method
                        .visible_annotations
                        .extend(annotations::parse_annotations(cursor, pool)?);
                }
                "RuntimeInvisibleAnnotations" => {
                    method
                        .invisible_annotations
                        .extend(annotations::parse_annotations(cursor, pool)?);
                }
                "RuntimeVisibleParameterAnnotations" => {
                    method.visible_parameter_annotations =
                        annotations::parse_parameter_annotations(cursor, pool)?;
                }
                "RuntimeInvisibleParameterAnnotations" => {
                    method.invisible_parameter_annotations =
                        annotations::parse_parameter_annotations(cursor, pool)?;
                }
                _ => {
                    trace!("skipping method attribute {attr_name}");
                    cursor.skip(len, "method attribute body")?;
                }
            }
        }
        class.methods.push(method);
    }
    Ok(())
}

fn parse_class_attributes(
    cursor: &mut Cursor<'_>,
    pool: &ConstantPool,
    class: &mut ClassNode,
) -> BytecodeResult<Vec<BootstrapMethod>> {
    let mut bsms = Vec::new();
    let attr_count = cursor.u16("class attribute count")?;
    for _ in 0..attr_count {
        let attr_name = pool.utf8(cursor.u16("class attribute name")?)?.to_string();
        let len = cursor.u32("class attribute length")? as usize;
        match attr_name.as_str() {
            "SourceFile" => {
                class.source_file = Some(pool.utf8(cursor.u16("source file")?)?.to_string());
            }
            "Signature" => {
                class.signature = Some(pool.utf8(cursor.u16("class signature")?)?.to_string());
            }
            "RuntimeVisibleAnnotations" => {
                class
                    .visible_annotations
                    .extend(annotations::parse_annotations(cursor, pool)?);
            }
            "RuntimeInvisibleAnnotations" => {
                class
                    .invisible_annotations
                    .extend(annotations::parse_annotations(cursor, pool)?);
            }
            "BootstrapMethods" => {
                bsms = code::parse_bootstrap_methods(cursor, pool)?;
            }
            _ => {
                trace!("skipping class attribute {attr_name}");
                cursor.skip(len, "class attribute body")?;
            }
        }
    }
    Ok(bsms)
}

/// Parses only the class header: name, flags, superclass, interfaces.
///
/// Cheap path for metadata cache fills; method bodies are not decoded.
pub fn parse_class_header(bytes: &[u8]) -> BytecodeResult<ClassHeader> {
    let mut cursor = Cursor::new(bytes);
    if cursor.u32("magic")? != MAGIC {
        return Err(BytecodeError::unsupported("bad magic number"));
    }
    cursor.u16("minor version")?;
    let major = cursor.u16("major version")?;
    if !(MIN_MAJOR..=MAX_MAJOR).contains(&major) {
        return Err(BytecodeError::unsupported(format!(
            "class file major version {major}"
        )));
    }
    let pool = ConstantPool::parse(&mut cursor)?;
    let access = AccessFlags::from_bits_retain(cursor.u16("access flags")?);
    let name = pool.class_name(cursor.u16("this class")?)?.to_string();
    let super_name = pool
        .opt_class_name(cursor.u16("super class")?)?
        .map(str::to_string);
    let interface_count = cursor.u16("interface count")?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(pool.class_name(cursor.u16("interface")?)?.to_string());
    }

    let mut members = Vec::new();
    for kind in [MemberKind::Field, MemberKind::Method] {
        let count = cursor.u16("member count")?;
        for _ in 0..count {
            let access = AccessFlags::from_bits_retain(cursor.u16("member access")?);
            let name = pool.utf8(cursor.u16("member name")?)?.to_string();
            let desc = pool.utf8(cursor.u16("member desc")?)?.to_string();
            let attr_count = cursor.u16("member attribute count")?;
            for _ in 0..attr_count {
                cursor.skip(2, "attribute name")?;
                let len = cursor.u32("attribute length")? as usize;
                cursor.skip(len, "attribute body")?;
            }
            members.push(HeaderMember {
                kind,
                access,
                name,
                desc,
            });
        }
    }

    Ok(ClassHeader {
        access,
        name,
        super_name,
        interfaces,
        members,
    })
}

/// Whether a header member is a field or a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Method,
}

/// A member summary from a header-only parse.
#[derive(Debug, Clone)]
pub struct HeaderMember {
    pub kind: MemberKind,
    pub access: AccessFlags,
    pub name: String,
    pub desc: String,
}

/// The header-only view of a class.
#[derive(Debug, Clone)]
pub struct ClassHeader {
    pub access: AccessFlags,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub members: Vec<HeaderMember>,
}
