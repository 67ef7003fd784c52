//! Per-target apply-cycle state.

use mixin_bytecode::{ClassNode, InsnId};
use std::collections::HashMap;

/// Tracking handle for one matched instruction.
///
/// Injectors rewrite instructions out from under each other; the handle
/// keeps a mutable "current" pointer so a later injector can still find the
/// logically-same point after an earlier one replaced it.
#[derive(Debug, Clone)]
pub struct InjectionNode {
    /// The instruction as originally matched
    pub original: InsnId,
    current: Option<InsnId>,
}

impl InjectionNode {
    /// The instruction currently standing at this point, unless removed.
    pub fn current(&self) -> Option<InsnId> {
        self.current
    }

    /// True once the underlying instruction was removed outright.
    pub fn is_removed(&self) -> bool {
        self.current.is_none()
    }
}

/// Registry of instruction identities for one target method.
///
/// Keyed by the originally matched instruction; wrappers survive until the
/// apply cycle ends, even when their instruction is removed.
#[derive(Debug, Default)]
pub struct InjectionNodeRegistry {
    nodes: HashMap<InsnId, InjectionNode>,
}

impl InjectionNodeRegistry {
    /// Registers (or re-fetches) the tracking node for an instruction.
    pub fn register(&mut self, at: InsnId) -> &InjectionNode {
        self.nodes.entry(at).or_insert(InjectionNode {
            original: at,
            current: Some(at),
        })
    }

    /// The current instruction standing for `original`.
    pub fn current(&self, original: InsnId) -> Option<InsnId> {
        match self.nodes.get(&original) {
            Some(node) => node.current(),
            None => Some(original),
        }
    }

    /// Records that `original`'s current instruction became `replacement`.
    pub fn replaced(&mut self, original: InsnId, replacement: InsnId) {
        let node = self.nodes.entry(original).or_insert(InjectionNode {
            original,
            current: Some(original),
        });
        node.current = Some(replacement);
    }

    /// Records that `original`'s instruction was removed.
    pub fn removed(&mut self, original: InsnId) {
        let node = self.nodes.entry(original).or_insert(InjectionNode {
            original,
            current: Some(original),
        });
        node.current = None;
    }
}

/// The live state assembled while applying one cycle to one target.
pub struct TargetContext {
    /// The target's tree, mutated in place by every pass
    pub class: ClassNode,
    /// Injection node registries, one per target method key
    registries: HashMap<String, InjectionNodeRegistry>,
    /// Mixin method key -> name the member was merged under
    pub merged_names: HashMap<String, String>,
    /// Companion classes synthesized during this cycle
    pub generated: Vec<ClassNode>,
}

impl TargetContext {
    /// Starts a cycle over a parsed target.
    pub fn new(class: ClassNode) -> Self {
        Self {
            class,
            registries: HashMap::new(),
            merged_names: HashMap::new(),
            generated: Vec::new(),
        }
    }

    /// The node registry for one target method.
    pub fn registry_for(&mut self, method_key: &str) -> &mut InjectionNodeRegistry {
        self.registries.entry(method_key.to_string()).or_default()
    }

    /// Splits the context into the class tree and one method's registry, so
    /// injectors can rewrite instructions while consulting node identities.
    pub fn class_and_registry(
        &mut self,
        method_key: &str,
    ) -> (&mut ClassNode, &mut InjectionNodeRegistry) {
        let registry = self.registries.entry(method_key.to_string()).or_default();
        (&mut self.class, registry)
    }

    /// The name a mixin member ended up with on the target.
    pub fn merged_name<'a>(&'a self, mixin_method_key: &'a str) -> &'a str {
        match self.merged_names.get(mixin_method_key) {
            Some(name) => name,
            None => mixin_method_key
                .split('(')
                .next()
                .unwrap_or(mixin_method_key),
        }
    }

    /// Finishes the cycle, yielding the class and any generated companions.
    pub fn finish(self) -> (ClassNode, Vec<ClassNode>) {
        (self.class, self.generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixin_bytecode::{Insn, InsnList, Opcode};

    #[test]
    fn test_registry_tracks_replacement() {
        let mut list = InsnList::new();
        let a = list.add(Insn::Simple(Opcode::ICONST_0));
        let b = list.add(Insn::Simple(Opcode::IRETURN));

        let mut registry = InjectionNodeRegistry::default();
        registry.register(a);
        assert_eq!(registry.current(a), Some(a));

        registry.replaced(a, b);
        assert_eq!(registry.current(a), Some(b));

        registry.removed(a);
        assert_eq!(registry.current(a), None);
    }

    #[test]
    fn test_unregistered_is_identity() {
        let mut list = InsnList::new();
        let a = list.add(Insn::Simple(Opcode::NOP));
        let registry = InjectionNodeRegistry::default();
        assert_eq!(registry.current(a), Some(a));
    }
}
