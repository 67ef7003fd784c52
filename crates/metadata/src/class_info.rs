//! Per-class metadata summaries.

use mixin_bytecode::{AccessFlags, ClassHeader, ClassNode, MemberKind};

/// A declared member of a summarized class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub kind: MemberKind,
    pub access: AccessFlags,
    pub name: String,
    pub desc: String,
}

impl MemberInfo {
    /// True for private members.
    pub fn is_private(&self) -> bool {
        self.access.contains(AccessFlags::PRIVATE)
    }

    /// True for static members.
    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }
}

/// Summary of one class: header facts plus mixin-contributed relationships.
///
/// Neighbour classes are held as string keys, never as references, so the
/// cache stays cycle-free; resolution happens on demand through the cache.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    /// Internal (slash-delimited) name
    pub name: String,
    pub access: AccessFlags,
    /// Real superclass from the class file
    pub super_name: Option<String>,
    /// Real interfaces from the class file
    pub interfaces: Vec<String>,
    /// Declared fields and methods
    pub members: Vec<MemberInfo>,
    /// Logical superclasses contributed by mixins with detached superclasses
    pub mixin_supers: Vec<String>,
    /// Interfaces grafted onto this class by applied mixins
    pub mixin_interfaces: Vec<String>,
    /// True when this class is itself a mixin
    pub is_mixin: bool,
}

impl ClassInfo {
    /// Builds a summary from a header-only parse.
    pub fn from_header(header: &ClassHeader) -> Self {
        Self {
            name: header.name.clone(),
            access: header.access,
            super_name: header.super_name.clone(),
            interfaces: header.interfaces.clone(),
            members: header
                .members
                .iter()
                .map(|m| MemberInfo {
                    kind: m.kind,
                    access: m.access,
                    name: m.name.clone(),
                    desc: m.desc.clone(),
                })
                .collect(),
            mixin_supers: Vec::new(),
            mixin_interfaces: Vec::new(),
            is_mixin: false,
        }
    }

    /// Builds a summary from a full class tree.
    pub fn from_node(node: &ClassNode) -> Self {
        let mut members: Vec<MemberInfo> = node
            .fields
            .iter()
            .map(|f| MemberInfo {
                kind: MemberKind::Field,
                access: f.access,
                name: f.name.clone(),
                desc: f.desc.clone(),
            })
            .collect();
        members.extend(node.methods.iter().map(|m| MemberInfo {
            kind: MemberKind::Method,
            access: m.access,
            name: m.name.clone(),
            desc: m.desc.clone(),
        }));
        Self {
            name: node.name.clone(),
            access: node.access,
            super_name: node.super_name.clone(),
            interfaces: node.interfaces.clone(),
            members,
            mixin_supers: Vec::new(),
            mixin_interfaces: Vec::new(),
            is_mixin: false,
        }
    }

    /// The synthetic summary of the root class.
    pub fn root() -> Self {
        Self {
            name: "java/lang/Object".to_string(),
            access: AccessFlags::PUBLIC,
            super_name: None,
            interfaces: Vec::new(),
            members: Vec::new(),
            mixin_supers: Vec::new(),
            mixin_interfaces: Vec::new(),
            is_mixin: false,
        }
    }

    /// True for interfaces.
    pub fn is_interface(&self) -> bool {
        self.access.contains(AccessFlags::INTERFACE)
    }

    /// All interfaces: declared plus mixin-contributed.
    pub fn all_interfaces(&self) -> impl Iterator<Item = &String> {
        self.interfaces.iter().chain(self.mixin_interfaces.iter())
    }

    /// Finds a declared member, matching descriptor only when given.
    pub fn find_member(
        &self,
        kind: MemberKind,
        name: &str,
        desc: Option<&str>,
    ) -> Option<&MemberInfo> {
        self.members
            .iter()
            .find(|m| m.kind == kind && m.name == name && desc.map_or(true, |d| m.desc == d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixin_bytecode::ClassBuilder;

    #[test]
    fn test_from_node_collects_members() {
        let class = ClassBuilder::new("a/B")
            .field(AccessFlags::PRIVATE, "f", "I")
            .method(AccessFlags::PUBLIC, "m", "()V", |body| {
                body.vreturn();
            })
            .build();
        let info = ClassInfo::from_node(&class);
        assert_eq!(info.members.len(), 2);
        assert!(info.find_member(MemberKind::Field, "f", Some("I")).is_some());
        assert!(info.find_member(MemberKind::Method, "m", None).is_some());
        assert!(info.find_member(MemberKind::Method, "m", Some("(I)V")).is_none());
    }
}
