//! Field and method descriptor parsing.

use crate::error::{BytecodeError, BytecodeResult};
use crate::opcode::Opcode;
use std::fmt;

/// A parsed type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDesc {
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// An object type, by internal name
    Object(String),
    /// An array type with its element type
    Array(Box<TypeDesc>),
}

impl TypeDesc {
    /// Parses a single field descriptor.
    pub fn parse(desc: &str) -> BytecodeResult<TypeDesc> {
        let mut chars = desc.chars();
        let parsed = Self::parse_from(&mut chars, desc)?;
        if chars.next().is_some() {
            return Err(BytecodeError::invalid_descriptor(
                desc,
                "trailing characters",
            ));
        }
        Ok(parsed)
    }

    /// Parses a method descriptor into parameter types and return type.
    pub fn parse_method(desc: &str) -> BytecodeResult<(Vec<TypeDesc>, TypeDesc)> {
        let mut chars = desc.chars();
        if chars.next() != Some('(') {
            return Err(BytecodeError::invalid_descriptor(desc, "missing '('"));
        }
        let mut args = Vec::new();
        loop {
            match chars.clone().next() {
                Some(')') => {
                    chars.next();
                    break;
                }
                Some(_) => args.push(Self::parse_from(&mut chars, desc)?),
                None => {
                    return Err(BytecodeError::invalid_descriptor(desc, "missing ')'"));
                }
            }
        }
        let ret = Self::parse_from(&mut chars, desc)?;
        if chars.next().is_some() {
            return Err(BytecodeError::invalid_descriptor(
                desc,
                "trailing characters",
            ));
        }
        Ok((args, ret))
    }

    fn parse_from(chars: &mut std::str::Chars<'_>, whole: &str) -> BytecodeResult<TypeDesc> {
        match chars.next() {
            Some('V') => Ok(TypeDesc::Void),
            Some('Z') => Ok(TypeDesc::Boolean),
            Some('B') => Ok(TypeDesc::Byte),
            Some('C') => Ok(TypeDesc::Char),
            Some('S') => Ok(TypeDesc::Short),
            Some('I') => Ok(TypeDesc::Int),
            Some('J') => Ok(TypeDesc::Long),
            Some('F') => Ok(TypeDesc::Float),
            Some('D') => Ok(TypeDesc::Double),
            Some('L') => {
                let mut name = String::new();
                for c in chars.by_ref() {
                    if c == ';' {
                        if name.is_empty() {
                            return Err(BytecodeError::invalid_descriptor(whole, "empty class"));
                        }
                        return Ok(TypeDesc::Object(name));
                    }
                    name.push(c);
                }
                Err(BytecodeError::invalid_descriptor(whole, "unterminated 'L'"))
            }
            Some('[') => Ok(TypeDesc::Array(Box::new(Self::parse_from(chars, whole)?))),
            _ => Err(BytecodeError::invalid_descriptor(whole, "unknown type tag")),
        }
    }

    /// Number of local/stack slots a value of this type occupies.
    pub fn slot_size(&self) -> u16 {
        match self {
            TypeDesc::Void => 0,
            TypeDesc::Long | TypeDesc::Double => 2,
            _ => 1,
        }
    }

    /// True for `long` and `double`.
    pub fn is_wide(&self) -> bool {
        self.slot_size() == 2
    }

    /// True for every primitive type, excluding void.
    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            TypeDesc::Void | TypeDesc::Object(_) | TypeDesc::Array(_)
        )
    }

    /// True for object and array types.
    pub fn is_reference(&self) -> bool {
        matches!(self, TypeDesc::Object(_) | TypeDesc::Array(_))
    }

    /// The internal name for object types, `java/lang/Object` for arrays.
    pub fn internal_name(&self) -> Option<&str> {
        match self {
            TypeDesc::Object(name) => Some(name),
            TypeDesc::Array(_) => Some("java/lang/Object"),
            _ => None,
        }
    }

    /// Opcode loading a local of this type.
    pub fn load_opcode(&self) -> Opcode {
        match self {
            TypeDesc::Long => Opcode::LLOAD,
            TypeDesc::Float => Opcode::FLOAD,
            TypeDesc::Double => Opcode::DLOAD,
            TypeDesc::Object(_) | TypeDesc::Array(_) => Opcode::ALOAD,
            _ => Opcode::ILOAD,
        }
    }

    /// Opcode storing into a local of this type.
    pub fn store_opcode(&self) -> Opcode {
        match self {
            TypeDesc::Long => Opcode::LSTORE,
            TypeDesc::Float => Opcode::FSTORE,
            TypeDesc::Double => Opcode::DSTORE,
            TypeDesc::Object(_) | TypeDesc::Array(_) => Opcode::ASTORE,
            _ => Opcode::ISTORE,
        }
    }

    /// Opcode returning a value of this type.
    pub fn return_opcode(&self) -> Opcode {
        match self {
            TypeDesc::Void => Opcode::RETURN,
            TypeDesc::Long => Opcode::LRETURN,
            TypeDesc::Float => Opcode::FRETURN,
            TypeDesc::Double => Opcode::DRETURN,
            TypeDesc::Object(_) | TypeDesc::Array(_) => Opcode::ARETURN,
            _ => Opcode::IRETURN,
        }
    }

    /// Whether two types occupy compatible slots for raw value transfer:
    /// identical primitives, or both references.
    pub fn slot_compatible(&self, other: &TypeDesc) -> bool {
        if self.is_reference() && other.is_reference() {
            return true;
        }
        self == other
    }

    /// Total slot count of a method's parameters, plus one for `this` when
    /// `instance` is set.
    pub fn args_slot_count(desc: &str, instance: bool) -> BytecodeResult<u16> {
        let (args, _) = Self::parse_method(desc)?;
        let mut slots = if instance { 1 } else { 0 };
        for arg in &args {
            slots += arg.slot_size();
        }
        Ok(slots)
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Void => write!(f, "V"),
            TypeDesc::Boolean => write!(f, "Z"),
            TypeDesc::Byte => write!(f, "B"),
            TypeDesc::Char => write!(f, "C"),
            TypeDesc::Short => write!(f, "S"),
            TypeDesc::Int => write!(f, "I"),
            TypeDesc::Long => write!(f, "J"),
            TypeDesc::Float => write!(f, "F"),
            TypeDesc::Double => write!(f, "D"),
            TypeDesc::Object(name) => write!(f, "L{name};"),
            TypeDesc::Array(elem) => write!(f, "[{elem}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field_descriptors() {
        assert_eq!(TypeDesc::parse("I").unwrap(), TypeDesc::Int);
        assert_eq!(
            TypeDesc::parse("Ljava/lang/String;").unwrap(),
            TypeDesc::Object("java/lang/String".to_string())
        );
        assert_eq!(
            TypeDesc::parse("[[I").unwrap(),
            TypeDesc::Array(Box::new(TypeDesc::Array(Box::new(TypeDesc::Int))))
        );
        assert!(TypeDesc::parse("L;").is_err());
        assert!(TypeDesc::parse("II").is_err());
        assert!(TypeDesc::parse("Q").is_err());
    }

    #[test]
    fn test_parse_method_descriptor() {
        let (args, ret) = TypeDesc::parse_method("(IJLjava/lang/String;[B)V").unwrap();
        assert_eq!(args.len(), 4);
        assert_eq!(args[0], TypeDesc::Int);
        assert_eq!(args[1], TypeDesc::Long);
        assert_eq!(ret, TypeDesc::Void);
        assert!(TypeDesc::parse_method("I)V").is_err());
        assert!(TypeDesc::parse_method("(I").is_err());
    }

    #[test]
    fn test_slots() {
        assert_eq!(TypeDesc::args_slot_count("(IJD)V", false).unwrap(), 5);
        assert_eq!(TypeDesc::args_slot_count("()V", true).unwrap(), 1);
    }

    #[test]
    fn test_display_roundtrip() {
        for desc in ["I", "J", "Ljava/lang/String;", "[[D", "Z"] {
            assert_eq!(TypeDesc::parse(desc).unwrap().to_string(), desc);
        }
    }

    #[test]
    fn test_opcode_selection() {
        assert_eq!(TypeDesc::Long.load_opcode(), Opcode::LLOAD);
        assert_eq!(
            TypeDesc::Object("a/B".to_string()).store_opcode(),
            Opcode::ASTORE
        );
        assert_eq!(TypeDesc::Void.return_opcode(), Opcode::RETURN);
        assert_eq!(TypeDesc::Int.return_opcode(), Opcode::IRETURN);
    }
}
