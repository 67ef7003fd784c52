//! Constant pool construction for the class writer.

use crate::constant::ConstantValue;
use crate::error::{BytecodeError, BytecodeResult};
use crate::insn::{BsmArg, Handle};
use crate::parse::encode_modified_utf8;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PoolKey {
    Utf8(String),
    Int(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(String),
    Str(String),
    Nat(String, String),
    FieldRef(String, String, String),
    MethodRef(String, String, String, bool),
    Handle(u8, String, String, String, bool),
    MethodType(String),
    InvokeDynamic(u16, String, String),
}

/// Builds a constant pool incrementally, deduplicating entries.
#[derive(Default)]
pub struct PoolBuilder {
    buf: Vec<u8>,
    next: u16,
    map: HashMap<PoolKey, u16>,
    bsms: Vec<(Handle, Vec<BsmArg>)>,
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            next: 1,
            map: HashMap::new(),
            bsms: Vec::new(),
        }
    }

    fn insert(&mut self, key: PoolKey, wide: bool, bytes: Vec<u8>) -> BytecodeResult<u16> {
        if let Some(index) = self.map.get(&key) {
            return Ok(*index);
        }
        let index = self.next;
        let advance = if wide { 2 } else { 1 };
        if u32::from(self.next) + advance > 0xffff {
            return Err(BytecodeError::emit("constant pool overflow"));
        }
        self.next += advance as u16;
        self.buf.extend_from_slice(&bytes);
        self.map.insert(key, index);
        Ok(index)
    }

    pub fn utf8(&mut self, value: &str) -> BytecodeResult<u16> {
        if let Some(index) = self.map.get(&PoolKey::Utf8(value.to_string())) {
            return Ok(*index);
        }
        let encoded = encode_modified_utf8(value);
        if encoded.len() > 0xffff {
            return Err(BytecodeError::emit("utf8 constant too long"));
        }
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&encoded);
        self.insert(PoolKey::Utf8(value.to_string()), false, bytes)
    }

    pub fn int(&mut self, value: i32) -> BytecodeResult<u16> {
        let mut bytes = vec![3u8];
        bytes.extend_from_slice(&value.to_be_bytes());
        self.insert(PoolKey::Int(value), false, bytes)
    }

    pub fn float(&mut self, value: f32) -> BytecodeResult<u16> {
        let mut bytes = vec![4u8];
        bytes.extend_from_slice(&value.to_bits().to_be_bytes());
        self.insert(PoolKey::Float(value.to_bits()), false, bytes)
    }

    pub fn long(&mut self, value: i64) -> BytecodeResult<u16> {
        let mut bytes = vec![5u8];
        bytes.extend_from_slice(&value.to_be_bytes());
        self.insert(PoolKey::Long(value), true, bytes)
    }

    pub fn double(&mut self, value: f64) -> BytecodeResult<u16> {
        let mut bytes = vec![6u8];
        bytes.extend_from_slice(&value.to_bits().to_be_bytes());
        self.insert(PoolKey::Double(value.to_bits()), true, bytes)
    }

    pub fn class(&mut self, name: &str) -> BytecodeResult<u16> {
        let utf8 = self.utf8(name)?;
        let mut bytes = vec![7u8];
        bytes.extend_from_slice(&utf8.to_be_bytes());
        self.insert(PoolKey::Class(name.to_string()), false, bytes)
    }

    pub fn string(&mut self, value: &str) -> BytecodeResult<u16> {
        let utf8 = self.utf8(value)?;
        let mut bytes = vec![8u8];
        bytes.extend_from_slice(&utf8.to_be_bytes());
        self.insert(PoolKey::Str(value.to_string()), false, bytes)
    }

    pub fn name_and_type(&mut self, name: &str, desc: &str) -> BytecodeResult<u16> {
        let name_index = self.utf8(name)?;
        let desc_index = self.utf8(desc)?;
        let mut bytes = vec![12u8];
        bytes.extend_from_slice(&name_index.to_be_bytes());
        bytes.extend_from_slice(&desc_index.to_be_bytes());
        self.insert(
            PoolKey::Nat(name.to_string(), desc.to_string()),
            false,
            bytes,
        )
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, desc: &str) -> BytecodeResult<u16> {
        let class = self.class(owner)?;
        let nat = self.name_and_type(name, desc)?;
        let mut bytes = vec![9u8];
        bytes.extend_from_slice(&class.to_be_bytes());
        bytes.extend_from_slice(&nat.to_be_bytes());
        self.insert(
            PoolKey::FieldRef(owner.to_string(), name.to_string(), desc.to_string()),
            false,
            bytes,
        )
    }

    pub fn method_ref(
        &mut self,
        owner: &str,
        name: &str,
        desc: &str,
        itf: bool,
    ) -> BytecodeResult<u16> {
        let class = self.class(owner)?;
        let nat = self.name_and_type(name, desc)?;
        let mut bytes = vec![if itf { 11u8 } else { 10u8 }];
        bytes.extend_from_slice(&class.to_be_bytes());
        bytes.extend_from_slice(&nat.to_be_bytes());
        self.insert(
            PoolKey::MethodRef(owner.to_string(), name.to_string(), desc.to_string(), itf),
            false,
            bytes,
        )
    }

    pub fn handle(&mut self, handle: &Handle) -> BytecodeResult<u16> {
        // Kinds 1-4 reference fields, the rest methods.
        let reference = if handle.kind <= 4 {
            self.field_ref(&handle.owner, &handle.name, &handle.desc)?
        } else {
            self.method_ref(&handle.owner, &handle.name, &handle.desc, handle.itf)?
        };
        let mut bytes = vec![15u8, handle.kind];
        bytes.extend_from_slice(&reference.to_be_bytes());
        self.insert(
            PoolKey::Handle(
                handle.kind,
                handle.owner.clone(),
                handle.name.clone(),
                handle.desc.clone(),
                handle.itf,
            ),
            false,
            bytes,
        )
    }

    pub fn method_type(&mut self, desc: &str) -> BytecodeResult<u16> {
        let utf8 = self.utf8(desc)?;
        let mut bytes = vec![16u8];
        bytes.extend_from_slice(&utf8.to_be_bytes());
        self.insert(PoolKey::MethodType(desc.to_string()), false, bytes)
    }

    /// Index of a loadable constant.
    pub fn constant(&mut self, value: &ConstantValue) -> BytecodeResult<u16> {
        match value {
            ConstantValue::Int(v) => self.int(*v),
            ConstantValue::Float(v) => self.float(*v),
            ConstantValue::Long(v) => self.long(*v),
            ConstantValue::Double(v) => self.double(*v),
            ConstantValue::String(v) => self.string(v),
            ConstantValue::Class(v) => self.class(v),
        }
    }

    fn bsm_arg_index(&mut self, arg: &BsmArg) -> BytecodeResult<u16> {
        match arg {
            BsmArg::Const(value) => self.constant(value),
            BsmArg::Handle(handle) => self.handle(handle),
            BsmArg::MethodType(desc) => self.method_type(desc),
        }
    }

    /// Registers a bootstrap method, returning its table index.
    pub fn bootstrap_method(&mut self, handle: &Handle, args: &[BsmArg]) -> BytecodeResult<u16> {
        // Pool entries must exist even for deduplicated table rows.
        self.handle(handle)?;
        for arg in args {
            self.bsm_arg_index(arg)?;
        }
        for (index, (existing_handle, existing_args)) in self.bsms.iter().enumerate() {
            if existing_handle == handle && existing_args == args {
                return Ok(index as u16);
            }
        }
        self.bsms.push((handle.clone(), args.to_vec()));
        Ok((self.bsms.len() - 1) as u16)
    }

    pub fn invoke_dynamic(&mut self, bsm: u16, name: &str, desc: &str) -> BytecodeResult<u16> {
        let nat = self.name_and_type(name, desc)?;
        let mut bytes = vec![18u8];
        bytes.extend_from_slice(&bsm.to_be_bytes());
        bytes.extend_from_slice(&nat.to_be_bytes());
        self.insert(
            PoolKey::InvokeDynamic(bsm, name.to_string(), desc.to_string()),
            false,
            bytes,
        )
    }

    /// True when any bootstrap method was registered.
    pub fn has_bootstrap_methods(&self) -> bool {
        !self.bsms.is_empty()
    }

    /// Serializes the `BootstrapMethods` attribute body.
    pub fn bootstrap_methods_body(&mut self) -> BytecodeResult<Vec<u8>> {
        let bsms = self.bsms.clone();
        let mut body = Vec::new();
        body.extend_from_slice(&(bsms.len() as u16).to_be_bytes());
        for (handle, args) in &bsms {
            let handle_index = self.handle(handle)?;
            body.extend_from_slice(&handle_index.to_be_bytes());
            body.extend_from_slice(&(args.len() as u16).to_be_bytes());
            for arg in args {
                let arg_index = self.bsm_arg_index(arg)?;
                body.extend_from_slice(&arg_index.to_be_bytes());
            }
        }
        Ok(body)
    }

    /// Final `(count, bytes)` of the pool.
    pub fn finish(self) -> (u16, Vec<u8>) {
        (self.next, self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup() {
        let mut pool = PoolBuilder::new();
        let a = pool.utf8("hello").unwrap();
        let b = pool.utf8("hello").unwrap();
        assert_eq!(a, b);
        let c = pool.class("a/B").unwrap();
        let d = pool.class("a/B").unwrap();
        assert_eq!(c, d);
    }

    #[test]
    fn test_wide_entries_advance_two() {
        let mut pool = PoolBuilder::new();
        let l = pool.long(7).unwrap();
        let s = pool.utf8("after").unwrap();
        assert_eq!(s, l + 2);
    }

    #[test]
    fn test_roundtrip_through_parser() {
        use crate::parse::cursor::Cursor;
        use crate::parse::pool::ConstantPool;

        let mut builder = PoolBuilder::new();
        let class_index = builder.class("net/example/Target").unwrap();
        let ref_index = builder
            .method_ref("net/example/Target", "update", "(I)V", false)
            .unwrap();
        let (count, bytes) = builder.finish();

        let mut stream = count.to_be_bytes().to_vec();
        stream.extend_from_slice(&bytes);
        let parsed = ConstantPool::parse(&mut Cursor::new(&stream)).unwrap();
        assert_eq!(parsed.class_name(class_index).unwrap(), "net/example/Target");
        let (owner, name, desc, itf) = parsed.member_ref(ref_index).unwrap();
        assert_eq!((owner, name, desc, itf), ("net/example/Target", "update", "(I)V", false));
    }
}
