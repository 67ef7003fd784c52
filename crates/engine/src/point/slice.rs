//! Slice regions over a target method.

use crate::error::{EngineError, EngineResult};
use crate::point::InjectionPointData;
use mixin_bytecode::MethodNode;

/// A sub-region of a method's instruction list, as inclusive positions in
/// iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceRange {
    pub start: usize,
    pub end: usize,
}

impl SliceRange {
    /// The whole method.
    pub fn full(method: &MethodNode) -> Self {
        Self {
            start: 0,
            end: method.instructions.len().saturating_sub(1),
        }
    }

    /// True when `position` falls inside the region.
    pub fn contains(&self, position: usize) -> bool {
        (self.start..=self.end).contains(&position)
    }

    /// Resolves a region from `from`/`to` queries over the method.
    ///
    /// An omitted bound defaults to the method start or end. The first
    /// match of each query anchors its bound; a region that comes out empty
    /// or inverted fails the apply.
    pub fn resolve(
        method: &MethodNode,
        from: Option<&InjectionPointData>,
        to: Option<&InjectionPointData>,
    ) -> EngineResult<Self> {
        let full = Self::full(method);
        let anchor = |query: Option<&InjectionPointData>, default: usize| -> EngineResult<usize> {
            match query {
                None => Ok(default),
                Some(data) => {
                    let matches = data.select(method, &full, None)?;
                    let first = matches.first().ok_or_else(|| {
                        EngineError::invalid_injection(
                            method.name.clone(),
                            format!("{:?}", data.kind),
                            "slice bound matched nothing".to_string(),
                        )
                    })?;
                    method.instructions.index_of(*first).ok_or_else(|| {
                        EngineError::invalid_injection(
                            method.name.clone(),
                            format!("{:?}", data.kind),
                            "slice bound resolved to a dead instruction".to_string(),
                        )
                    })
                }
            }
        };
        let start = anchor(from, full.start)?;
        let end = anchor(to, full.end)?;
        if start > end {
            return Err(EngineError::invalid_injection(
                method.name.clone(),
                "slice".to_string(),
                format!("slice region is empty ({start}..{end})"),
            ));
        }
        Ok(Self { start, end })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixin_bytecode::{AccessFlags, Insn, MethodNode, Opcode};

    #[test]
    fn test_full_range_contains_everything() {
        let mut method = MethodNode::new(AccessFlags::PUBLIC, "m", "()V");
        method.instructions.add(Insn::Simple(Opcode::NOP));
        method.instructions.add(Insn::Simple(Opcode::RETURN));
        let range = SliceRange::full(&method);
        assert!(range.contains(0));
        assert!(range.contains(1));
        assert!(!range.contains(2));
    }
}
