//! Local variable discriminator.
//!
//! Selects a single local variable at a program point for LOAD/STORE
//! points, callback local capture and modify-variable injectors.

use crate::error::{EngineError, EngineResult};
use mixin_bytecode::{local_types_at, AnnotationNode, InsnId, LocalSlot, MethodNode, TypeDesc};

/// The `(ordinal, index, names, argsOnly)` selection tuple.
///
/// Precedence: `index` over `ordinal` over `names`. With none of the three
/// set the discriminator is implicit: exactly one local of the required
/// type must be live at the point.
#[derive(Debug, Clone, Default)]
pub struct Discriminator {
    pub ordinal: Option<usize>,
    pub index: Option<u16>,
    pub names: Vec<String>,
    pub args_only: bool,
}

impl Discriminator {
    /// Reads the discriminator fields off an injector annotation.
    pub fn parse(node: &AnnotationNode) -> Self {
        let ordinal = match node.get_i32("ordinal") {
            None | Some(-1) => None,
            Some(n) => Some(n as usize),
        };
        let index = match node.get_i32("index") {
            None | Some(-1) => None,
            Some(n) => Some(n as u16),
        };
        let mut names: Vec<String> = node
            .get_str_array("name")
            .into_iter()
            .map(str::to_string)
            .collect();
        names.extend(
            node.get_str_array("names")
                .into_iter()
                .map(str::to_string),
        );
        Self {
            ordinal,
            index,
            names,
            args_only: node.get_bool("argsOnly").unwrap_or(false),
        }
    }

    /// True when no explicit selector is set.
    pub fn is_implicit(&self) -> bool {
        self.ordinal.is_none() && self.index.is_none() && self.names.is_empty()
    }

    /// Resolves the selected local's slot index at `at`.
    pub fn resolve(
        &self,
        method: &MethodNode,
        owner: &str,
        at: InsnId,
        required: &TypeDesc,
    ) -> EngineResult<u16> {
        let slots = local_types_at(method, owner, at)
            .map_err(|e| EngineError::bytecode(format!("{}::{}", owner, method.name), e))?;
        let arg_limit = method.first_free_local().map_err(|e| {
            EngineError::bytecode(format!("{}::{}", owner, method.name), e)
        })?;

        let candidates: Vec<&LocalSlot> = slots
            .iter()
            .flatten()
            .filter(|slot| slot.ty.slot_compatible(required))
            .filter(|slot| !self.args_only || slot.index < arg_limit)
            .collect();

        if let Some(index) = self.index {
            return candidates
                .iter()
                .find(|slot| slot.index == index)
                .map(|slot| slot.index)
                .ok_or_else(|| {
                    EngineError::invalid_injection(
                        method.name.clone(),
                        format!("local index {index}"),
                        format!("no local of type {required} at slot {index}"),
                    )
                });
        }
        if let Some(ordinal) = self.ordinal {
            return candidates.get(ordinal).map(|slot| slot.index).ok_or_else(|| {
                EngineError::invalid_injection(
                    method.name.clone(),
                    format!("local ordinal {ordinal}"),
                    format!(
                        "only {} locals of type {required} in scope",
                        candidates.len()
                    ),
                )
            });
        }
        if !self.names.is_empty() {
            return candidates
                .iter()
                .find(|slot| {
                    slot.name
                        .as_ref()
                        .map_or(false, |name| self.names.iter().any(|n| n == name))
                })
                .map(|slot| slot.index)
                .ok_or_else(|| {
                    EngineError::invalid_injection(
                        method.name.clone(),
                        format!("local names {:?}", self.names),
                        "no named local of the required type in scope".to_string(),
                    )
                });
        }

        // Implicit: the type must identify the variable on its own.
        match candidates.as_slice() {
            [only] => Ok(only.index),
            [] => Err(EngineError::invalid_injection(
                method.name.clone(),
                "implicit local".to_string(),
                format!("no local of type {required} in scope"),
            )),
            many => Err(EngineError::invalid_injection(
                method.name.clone(),
                "implicit local".to_string(),
                format!(
                    "{} locals of type {required} in scope, discriminator required",
                    many.len()
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixin_bytecode::{AccessFlags, ClassBuilder, Opcode};

    fn sample() -> MethodNode {
        // void m(int a, String s) { int b = 3; ... }
        let class = ClassBuilder::new("a/T")
            .method(AccessFlags::PUBLIC, "m", "(ILjava/lang/String;)V", |body| {
                body.iconst(3).istore(3).op(Opcode::NOP).vreturn();
            })
            .build();
        class.find_method("m", "(ILjava/lang/String;)V").unwrap().clone()
    }

    fn at_nop(method: &MethodNode) -> InsnId {
        method
            .instructions
            .iter()
            .find(|(_, insn)| matches!(insn, mixin_bytecode::Insn::Simple(Opcode::NOP)))
            .map(|(id, _)| id)
            .unwrap()
    }

    #[test]
    fn test_index_takes_precedence() {
        let method = sample();
        let disc = Discriminator {
            index: Some(3),
            ordinal: Some(0),
            ..Default::default()
        };
        assert_eq!(
            disc.resolve(&method, "a/T", at_nop(&method), &TypeDesc::Int).unwrap(),
            3
        );
    }

    #[test]
    fn test_ordinal_counts_by_type() {
        let method = sample();
        let disc = Discriminator {
            ordinal: Some(1),
            ..Default::default()
        };
        // Int locals in slot order: a (slot 1), b (slot 3).
        assert_eq!(
            disc.resolve(&method, "a/T", at_nop(&method), &TypeDesc::Int).unwrap(),
            3
        );
    }

    #[test]
    fn test_implicit_requires_uniqueness() {
        let method = sample();
        let disc = Discriminator::default();
        // Two ints in scope: ambiguous.
        assert!(disc
            .resolve(&method, "a/T", at_nop(&method), &TypeDesc::Int)
            .is_err());
        // One String (plus `this` counts as a reference too).
        let refs = disc.resolve(
            &method,
            "a/T",
            at_nop(&method),
            &TypeDesc::Object("java/lang/String".to_string()),
        );
        // `this` and `s` are both references, so this is ambiguous as well.
        assert!(refs.is_err());
    }

    #[test]
    fn test_args_only_excludes_body_locals() {
        let method = sample();
        let disc = Discriminator {
            ordinal: Some(1),
            args_only: true,
            ..Default::default()
        };
        // Only one int inside the parameter range.
        assert!(disc
            .resolve(&method, "a/T", at_nop(&method), &TypeDesc::Int)
            .is_err());
        let first = Discriminator {
            ordinal: Some(0),
            args_only: true,
            ..Default::default()
        };
        assert_eq!(
            first
                .resolve(&method, "a/T", at_nop(&method), &TypeDesc::Int)
                .unwrap(),
            1
        );
    }
}
