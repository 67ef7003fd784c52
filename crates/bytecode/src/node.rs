//! Class, field and method tree nodes.

use crate::access::AccessFlags;
use crate::annotation::AnnotationNode;
use crate::constant::ConstantValue;
use crate::descriptor::TypeDesc;
use crate::error::BytecodeResult;
use crate::insn::{InsnList, LabelId};

/// Class file version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClassVersion {
    pub minor: u16,
    pub major: u16,
}

impl ClassVersion {
    /// Java 8 class files.
    pub const JAVA_8: ClassVersion = ClassVersion {
        minor: 0,
        major: 52,
    };
}

/// An exception handler range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatchBlock {
    pub start: LabelId,
    pub end: LabelId,
    pub handler: LabelId,
    /// Internal name of the caught type; `None` for finally blocks
    pub catch_type: Option<String>,
}

/// A local variable table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVar {
    pub name: String,
    pub desc: String,
    pub start: LabelId,
    pub end: LabelId,
    pub index: u16,
}

/// A field of a class.
#[derive(Debug, Clone, Default)]
pub struct FieldNode {
    pub access: AccessFlags,
    pub name: String,
    pub desc: String,
    pub signature: Option<String>,
    /// `ConstantValue` attribute for static finals
    pub value: Option<ConstantValue>,
    pub visible_annotations: Vec<AnnotationNode>,
    pub invisible_annotations: Vec<AnnotationNode>,
}

impl FieldNode {
    /// Creates a field with the given access, name and descriptor.
    pub fn new<S: Into<String>>(access: AccessFlags, name: S, desc: S) -> Self {
        Self {
            access,
            name: name.into(),
            desc: desc.into(),
            ..Self::default()
        }
    }

    /// All annotations, visible first.
    pub fn annotations(&self) -> impl Iterator<Item = &AnnotationNode> {
        self.visible_annotations
            .iter()
            .chain(self.invisible_annotations.iter())
    }

    /// True for static fields.
    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }
}

/// A method of a class.
#[derive(Debug, Clone, Default)]
pub struct MethodNode {
    pub access: AccessFlags,
    pub name: String,
    pub desc: String,
    pub signature: Option<String>,
    pub exceptions: Vec<String>,
    pub instructions: InsnList,
    pub try_catch_blocks: Vec<TryCatchBlock>,
    pub local_variables: Vec<LocalVar>,
    pub max_stack: u16,
    pub max_locals: u16,
    pub visible_annotations: Vec<AnnotationNode>,
    pub invisible_annotations: Vec<AnnotationNode>,
    /// Per-parameter annotations, outer index = parameter position
    pub visible_parameter_annotations: Vec<Vec<AnnotationNode>>,
    pub invisible_parameter_annotations: Vec<Vec<AnnotationNode>>,
}

impl MethodNode {
    /// Creates a method with an empty body.
    pub fn new<S: Into<String>>(access: AccessFlags, name: S, desc: S) -> Self {
        Self {
            access,
            name: name.into(),
            desc: desc.into(),
            ..Self::default()
        }
    }

    /// All annotations, visible first.
    pub fn annotations(&self) -> impl Iterator<Item = &AnnotationNode> {
        self.visible_annotations
            .iter()
            .chain(self.invisible_annotations.iter())
    }

    /// True for static methods.
    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }

    /// True for abstract methods.
    pub fn is_abstract(&self) -> bool {
        self.access.contains(AccessFlags::ABSTRACT)
    }

    /// True for constructors.
    pub fn is_ctor(&self) -> bool {
        self.name == "<init>"
    }

    /// True for the static initializer.
    pub fn is_clinit(&self) -> bool {
        self.name == "<clinit>"
    }

    /// True for compiler-generated bridges.
    pub fn is_bridge(&self) -> bool {
        self.access.contains(AccessFlags::BRIDGE)
    }

    /// `name + desc`, the within-class unique key.
    pub fn member_key(&self) -> String {
        format!("{}{}", self.name, self.desc)
    }

    /// Parsed parameter and return types.
    pub fn signature_types(&self) -> BytecodeResult<(Vec<TypeDesc>, TypeDesc)> {
        TypeDesc::parse_method(&self.desc)
    }

    /// First local slot past `this` and the declared parameters.
    pub fn first_free_local(&self) -> BytecodeResult<u16> {
        TypeDesc::args_slot_count(&self.desc, !self.is_static())
    }

    /// Allocates one fresh local slot of the given type, growing max_locals.
    pub fn allocate_local(&mut self, ty: &TypeDesc) -> u16 {
        let index = self.max_locals;
        self.max_locals += ty.slot_size();
        index
    }

    /// Allocates consecutive locals for a run of types.
    pub fn allocate_locals(&mut self, types: &[TypeDesc]) -> Vec<u16> {
        types.iter().map(|ty| self.allocate_local(ty)).collect()
    }
}

/// A class file as a tree.
#[derive(Debug, Clone)]
pub struct ClassNode {
    pub version: ClassVersion,
    pub access: AccessFlags,
    /// Internal (slash-delimited) name
    pub name: String,
    /// Internal name of the superclass; `None` only for the root class
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub signature: Option<String>,
    pub source_file: Option<String>,
    pub fields: Vec<FieldNode>,
    pub methods: Vec<MethodNode>,
    pub visible_annotations: Vec<AnnotationNode>,
    pub invisible_annotations: Vec<AnnotationNode>,
}

impl ClassNode {
    /// Creates an empty public class extending the root class.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            version: ClassVersion::JAVA_8,
            access: AccessFlags::PUBLIC | AccessFlags::SUPER,
            name: name.into(),
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            signature: None,
            source_file: None,
            fields: Vec::new(),
            methods: Vec::new(),
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
        }
    }

    /// True for interfaces.
    pub fn is_interface(&self) -> bool {
        self.access.contains(AccessFlags::INTERFACE)
    }

    /// All annotations, visible first.
    pub fn annotations(&self) -> impl Iterator<Item = &AnnotationNode> {
        self.visible_annotations
            .iter()
            .chain(self.invisible_annotations.iter())
    }

    /// Finds a method by name and descriptor.
    pub fn find_method(&self, name: &str, desc: &str) -> Option<&MethodNode> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.desc == desc)
    }

    /// Finds a method by name and descriptor, mutably.
    pub fn find_method_mut(&mut self, name: &str, desc: &str) -> Option<&mut MethodNode> {
        self.methods
            .iter_mut()
            .find(|m| m.name == name && m.desc == desc)
    }

    /// Finds a field by name.
    pub fn find_field(&self, name: &str) -> Option<&FieldNode> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Every constructor of the class.
    pub fn constructors(&self) -> impl Iterator<Item = &MethodNode> {
        self.methods.iter().filter(|m| m.is_ctor())
    }
}

/// Deep-copies a method, renumbering instruction handles.
pub fn clone_method(method: &MethodNode) -> MethodNode {
    method.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_local_tracks_width() {
        let mut method = MethodNode::new(AccessFlags::PUBLIC, "m", "(I)V");
        method.max_locals = 2;
        let a = method.allocate_local(&TypeDesc::Int);
        let b = method.allocate_local(&TypeDesc::Long);
        let c = method.allocate_local(&TypeDesc::Int);
        assert_eq!((a, b, c), (2, 3, 5));
        assert_eq!(method.max_locals, 6);
    }

    #[test]
    fn test_first_free_local() {
        let m = MethodNode::new(AccessFlags::PUBLIC, "m", "(IJ)V");
        assert_eq!(m.first_free_local().unwrap(), 4);
        let s = MethodNode::new(AccessFlags::PUBLIC | AccessFlags::STATIC, "m", "(IJ)V");
        assert_eq!(s.first_free_local().unwrap(), 3);
    }

    #[test]
    fn test_find_method_by_key() {
        let mut class = ClassNode::new("a/B");
        class
            .methods
            .push(MethodNode::new(AccessFlags::PUBLIC, "m", "()V"));
        class
            .methods
            .push(MethodNode::new(AccessFlags::PUBLIC, "m", "(I)V"));
        assert!(class.find_method("m", "(I)V").is_some());
        assert!(class.find_method("m", "(J)V").is_none());
    }
}
