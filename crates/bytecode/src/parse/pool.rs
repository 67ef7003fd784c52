//! Constant pool parsing and lookup.

use crate::constant::ConstantValue;
use crate::error::{BytecodeError, BytecodeResult};
use crate::insn::{BsmArg, Handle};
use crate::parse::cursor::Cursor;

// Constant pool tags per the class file format.
const TAG_UTF8: u8 = 1;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

/// One parsed constant pool slot.
#[derive(Debug, Clone)]
pub enum PoolEntry {
    Utf8(String),
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name: u16 },
    Str { utf8: u16 },
    FieldRef { class: u16, nat: u16 },
    MethodRef { class: u16, nat: u16 },
    InterfaceMethodRef { class: u16, nat: u16 },
    NameAndType { name: u16, desc: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType { desc: u16 },
    Dynamic { bsm: u16, nat: u16 },
    InvokeDynamic { bsm: u16, nat: u16 },
    Module { name: u16 },
    Package { name: u16 },
    /// Phantom slot following a long or double
    Unusable,
}

/// The constant pool of one class file.
pub struct ConstantPool {
    entries: Vec<PoolEntry>,
}

impl ConstantPool {
    /// Parses the pool, including the leading count.
    pub fn parse(cursor: &mut Cursor<'_>) -> BytecodeResult<Self> {
        let count = cursor.u16("constant pool count")?;
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(PoolEntry::Unusable); // index 0 is unused
        let mut index = 1u16;
        while index < count {
            let tag = cursor.u8("constant pool tag")?;
            let entry = match tag {
                TAG_UTF8 => {
                    let len = cursor.u16("utf8 length")? as usize;
                    let bytes = cursor.bytes(len, "utf8 bytes")?;
                    PoolEntry::Utf8(decode_modified_utf8(bytes, index)?)
                }
                TAG_INT => PoolEntry::Int(cursor.u32("int constant")? as i32),
                TAG_FLOAT => PoolEntry::Float(f32::from_bits(cursor.u32("float constant")?)),
                TAG_LONG => PoolEntry::Long(cursor.u64("long constant")? as i64),
                TAG_DOUBLE => PoolEntry::Double(f64::from_bits(cursor.u64("double constant")?)),
                TAG_CLASS => PoolEntry::Class {
                    name: cursor.u16("class name index")?,
                },
                TAG_STRING => PoolEntry::Str {
                    utf8: cursor.u16("string index")?,
                },
                TAG_FIELDREF => PoolEntry::FieldRef {
                    class: cursor.u16("fieldref class")?,
                    nat: cursor.u16("fieldref nat")?,
                },
                TAG_METHODREF => PoolEntry::MethodRef {
                    class: cursor.u16("methodref class")?,
                    nat: cursor.u16("methodref nat")?,
                },
                TAG_INTERFACE_METHODREF => PoolEntry::InterfaceMethodRef {
                    class: cursor.u16("interface methodref class")?,
                    nat: cursor.u16("interface methodref nat")?,
                },
                TAG_NAME_AND_TYPE => PoolEntry::NameAndType {
                    name: cursor.u16("nat name")?,
                    desc: cursor.u16("nat desc")?,
                },
                TAG_METHOD_HANDLE => PoolEntry::MethodHandle {
                    kind: cursor.u8("handle kind")?,
                    reference: cursor.u16("handle reference")?,
                },
                TAG_METHOD_TYPE => PoolEntry::MethodType {
                    desc: cursor.u16("method type desc")?,
                },
                TAG_DYNAMIC => PoolEntry::Dynamic {
                    bsm: cursor.u16("dynamic bsm")?,
                    nat: cursor.u16("dynamic nat")?,
                },
                TAG_INVOKE_DYNAMIC => PoolEntry::InvokeDynamic {
                    bsm: cursor.u16("invokedynamic bsm")?,
                    nat: cursor.u16("invokedynamic nat")?,
                },
                TAG_MODULE => PoolEntry::Module {
                    name: cursor.u16("module name")?,
                },
                TAG_PACKAGE => PoolEntry::Package {
                    name: cursor.u16("package name")?,
                },
                other => {
                    return Err(BytecodeError::bad_pool_entry(
                        index,
                        format!("unknown tag {other}"),
                    ))
                }
            };
            let wide = matches!(entry, PoolEntry::Long(_) | PoolEntry::Double(_));
            entries.push(entry);
            index += 1;
            if wide {
                entries.push(PoolEntry::Unusable);
                index += 1;
            }
        }
        Ok(Self { entries })
    }

    fn entry(&self, index: u16) -> BytecodeResult<&PoolEntry> {
        self.entries
            .get(index as usize)
            .ok_or_else(|| BytecodeError::bad_pool_entry(index, "index out of range"))
    }

    /// Utf8 content at `index`.
    pub fn utf8(&self, index: u16) -> BytecodeResult<&str> {
        match self.entry(index)? {
            PoolEntry::Utf8(s) => Ok(s),
            _ => Err(BytecodeError::bad_pool_entry(index, "expected Utf8")),
        }
    }

    /// Internal class name referenced by a `Class` entry.
    pub fn class_name(&self, index: u16) -> BytecodeResult<&str> {
        match self.entry(index)? {
            PoolEntry::Class { name } => self.utf8(*name),
            _ => Err(BytecodeError::bad_pool_entry(index, "expected Class")),
        }
    }

    /// Class name, or `None` for index zero.
    pub fn opt_class_name(&self, index: u16) -> BytecodeResult<Option<&str>> {
        if index == 0 {
            return Ok(None);
        }
        self.class_name(index).map(Some)
    }

    /// `(name, descriptor)` of a `NameAndType` entry.
    pub fn name_and_type(&self, index: u16) -> BytecodeResult<(&str, &str)> {
        match self.entry(index)? {
            PoolEntry::NameAndType { name, desc } => Ok((self.utf8(*name)?, self.utf8(*desc)?)),
            _ => Err(BytecodeError::bad_pool_entry(index, "expected NameAndType")),
        }
    }

    /// `(owner, name, descriptor, is_interface)` of a member reference.
    pub fn member_ref(&self, index: u16) -> BytecodeResult<(&str, &str, &str, bool)> {
        let (class, nat, itf) = match self.entry(index)? {
            PoolEntry::FieldRef { class, nat } => (*class, *nat, false),
            PoolEntry::MethodRef { class, nat } => (*class, *nat, false),
            PoolEntry::InterfaceMethodRef { class, nat } => (*class, *nat, true),
            _ => {
                return Err(BytecodeError::bad_pool_entry(
                    index,
                    "expected member reference",
                ))
            }
        };
        let (name, desc) = self.name_and_type(nat)?;
        Ok((self.class_name(class)?, name, desc, itf))
    }

    /// The `(bsm_index, name, desc)` of an `InvokeDynamic` entry.
    pub fn invoke_dynamic(&self, index: u16) -> BytecodeResult<(u16, &str, &str)> {
        match self.entry(index)? {
            PoolEntry::InvokeDynamic { bsm, nat } => {
                let (name, desc) = self.name_and_type(*nat)?;
                Ok((*bsm, name, desc))
            }
            _ => Err(BytecodeError::bad_pool_entry(
                index,
                "expected InvokeDynamic",
            )),
        }
    }

    /// A loadable constant, for `ldc`-family operands.
    pub fn constant(&self, index: u16) -> BytecodeResult<ConstantValue> {
        Ok(match self.entry(index)? {
            PoolEntry::Int(v) => ConstantValue::Int(*v),
            PoolEntry::Float(v) => ConstantValue::Float(*v),
            PoolEntry::Long(v) => ConstantValue::Long(*v),
            PoolEntry::Double(v) => ConstantValue::Double(*v),
            PoolEntry::Str { utf8 } => ConstantValue::String(self.utf8(*utf8)?.to_string()),
            PoolEntry::Class { name } => ConstantValue::Class(self.utf8(*name)?.to_string()),
            _ => {
                return Err(BytecodeError::bad_pool_entry(
                    index,
                    "entry is not a loadable constant",
                ))
            }
        })
    }

    /// A method handle entry.
    pub fn handle(&self, index: u16) -> BytecodeResult<Handle> {
        match self.entry(index)? {
            PoolEntry::MethodHandle { kind, reference } => {
                let (owner, name, desc, itf) = self.member_ref(*reference)?;
                Ok(Handle {
                    kind: *kind,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    desc: desc.to_string(),
                    itf,
                })
            }
            _ => Err(BytecodeError::bad_pool_entry(index, "expected MethodHandle")),
        }
    }

    /// A bootstrap method argument.
    pub fn bsm_arg(&self, index: u16) -> BytecodeResult<BsmArg> {
        Ok(match self.entry(index)? {
            PoolEntry::MethodHandle { .. } => BsmArg::Handle(self.handle(index)?),
            PoolEntry::MethodType { desc } => BsmArg::MethodType(self.utf8(*desc)?.to_string()),
            _ => BsmArg::Const(self.constant(index)?),
        })
    }
}

/// Decodes JVM modified UTF-8. Surrogate pairs come through the standard
/// UTF-16 route; the embedded NUL encoding (0xc0 0x80) maps back to '\0'.
fn decode_modified_utf8(bytes: &[u8], pool_index: u16) -> BytecodeResult<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xe0 == 0xc0 {
            if i + 1 >= bytes.len() {
                return Err(BytecodeError::bad_pool_entry(pool_index, "truncated utf8"));
            }
            units.push((((b & 0x1f) as u16) << 6) | (bytes[i + 1] & 0x3f) as u16);
            i += 2;
        } else if b & 0xf0 == 0xe0 {
            if i + 2 >= bytes.len() {
                return Err(BytecodeError::bad_pool_entry(pool_index, "truncated utf8"));
            }
            units.push(
                (((b & 0x0f) as u16) << 12)
                    | (((bytes[i + 1] & 0x3f) as u16) << 6)
                    | (bytes[i + 2] & 0x3f) as u16,
            );
            i += 3;
        } else {
            return Err(BytecodeError::bad_pool_entry(pool_index, "invalid utf8 byte"));
        }
    }
    String::from_utf16(&units)
        .map_err(|_| BytecodeError::bad_pool_entry(pool_index, "unpaired surrogate"))
}

/// Encodes a string as JVM modified UTF-8.
pub fn encode_modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | ((unit >> 6) as u8 & 0x1f));
                out.push(0x80 | (unit as u8 & 0x3f));
            }
            _ => {
                out.push(0xe0 | ((unit >> 12) as u8 & 0x0f));
                out.push(0x80 | ((unit >> 6) as u8 & 0x3f));
                out.push(0x80 | (unit as u8 & 0x3f));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modified_utf8_roundtrip() {
        for s in ["hello", "héllo", "\u{0}embedded", "日本語", ""] {
            let encoded = encode_modified_utf8(s);
            assert_eq!(decode_modified_utf8(&encoded, 1).unwrap(), s);
        }
    }

    #[test]
    fn test_embedded_nul_two_bytes() {
        assert_eq!(encode_modified_utf8("\u{0}"), vec![0xc0, 0x80]);
    }

    #[test]
    fn test_parse_minimal_pool() {
        // count=3: one Utf8 "A", one Class -> #1
        let bytes = [0x00, 0x03, 0x01, 0x00, 0x01, b'A', 0x07, 0x00, 0x01];
        let mut cursor = Cursor::new(&bytes);
        let pool = ConstantPool::parse(&mut cursor).unwrap();
        assert_eq!(pool.utf8(1).unwrap(), "A");
        assert_eq!(pool.class_name(2).unwrap(), "A");
    }

    #[test]
    fn test_wide_entry_takes_two_slots() {
        // count=4: Long 5, then Utf8 "x" lands at index 3
        let bytes = [
            0x00, 0x04, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x01, 0x00, 0x01,
            b'x',
        ];
        let mut cursor = Cursor::new(&bytes);
        let pool = ConstantPool::parse(&mut cursor).unwrap();
        assert!(matches!(
            pool.constant(1).unwrap(),
            ConstantValue::Long(5)
        ));
        assert_eq!(pool.utf8(3).unwrap(), "x");
    }
}
