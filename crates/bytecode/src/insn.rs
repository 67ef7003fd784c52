//! Instruction tree model.
//!
//! Instructions live in an [`InsnList`], a doubly linked list backed by an
//! arena. Every instruction is addressed by a stable [`InsnId`] handle:
//! handles survive insertion and removal of neighbours, and `replace` swaps
//! the payload while keeping the handle, so independent rewrites of the same
//! method can track "the logically same point" across each other's edits.

use crate::constant::ConstantValue;
use crate::error::{BytecodeError, BytecodeResult};
use crate::opcode::Opcode;
use std::collections::HashMap;
use std::fmt;

/// A branch target within one method's instruction list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub(crate) u32);

/// Stable handle to an instruction in an [`InsnList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsnId(pub(crate) u32);

impl fmt::Display for InsnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A method handle constant, as used by `invokedynamic` bootstrap entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    /// Reference kind, 1..=9 per the class file format
    pub kind: u8,
    pub owner: String,
    pub name: String,
    pub desc: String,
    pub itf: bool,
}

/// A bootstrap method argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BsmArg {
    Const(ConstantValue),
    Handle(Handle),
    MethodType(String),
}

/// One instruction, or pseudo-instruction, of a method body.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// An operand-less instruction
    Simple(Opcode),
    /// `bipush`/`sipush`
    IntPush { opcode: Opcode, value: i32 },
    /// Generic-form local variable access (`iload`..`astore`, `ret`)
    Var { opcode: Opcode, index: u16 },
    /// `iinc`
    Iinc { index: u16, delta: i16 },
    /// `new`/`anewarray`/`checkcast`/`instanceof`
    Type { opcode: Opcode, class: String },
    /// `newarray` with its primitive element code
    NewArray { atype: u8 },
    /// `multianewarray`
    MultiANewArray { desc: String, dims: u8 },
    /// Field access
    Field {
        opcode: Opcode,
        owner: String,
        name: String,
        desc: String,
    },
    /// Method invocation other than `invokedynamic`
    Method {
        opcode: Opcode,
        owner: String,
        name: String,
        desc: String,
        itf: bool,
    },
    /// `invokedynamic` with its bootstrap data
    InvokeDynamic {
        name: String,
        desc: String,
        bsm: Handle,
        args: Vec<BsmArg>,
    },
    /// Conditional or unconditional branch
    Jump { opcode: Opcode, label: LabelId },
    /// `tableswitch`
    TableSwitch {
        low: i32,
        high: i32,
        default: LabelId,
        labels: Vec<LabelId>,
    },
    /// `lookupswitch`
    LookupSwitch {
        default: LabelId,
        pairs: Vec<(i32, LabelId)>,
    },
    /// Constant load (`ldc` family)
    Ldc(ConstantValue),
    /// Position marker, branch target
    Label(LabelId),
    /// Line number pseudo-instruction
    Line { line: u16, label: LabelId },
}

impl Insn {
    /// True for actual instructions, false for labels and line markers.
    pub fn is_real(&self) -> bool {
        !matches!(self, Insn::Label(_) | Insn::Line { .. })
    }

    /// The opcode of a real instruction.
    pub fn opcode(&self) -> Option<Opcode> {
        Some(match self {
            Insn::Simple(op) => *op,
            Insn::IntPush { opcode, .. } => *opcode,
            Insn::Var { opcode, .. } => *opcode,
            Insn::Iinc { .. } => Opcode::IINC,
            Insn::Type { opcode, .. } => *opcode,
            Insn::NewArray { .. } => Opcode::NEWARRAY,
            Insn::MultiANewArray { .. } => Opcode::MULTIANEWARRAY,
            Insn::Field { opcode, .. } => *opcode,
            Insn::Method { opcode, .. } => *opcode,
            Insn::InvokeDynamic { .. } => Opcode::INVOKEDYNAMIC,
            Insn::Jump { opcode, .. } => *opcode,
            Insn::TableSwitch { .. } => Opcode::TABLESWITCH,
            Insn::LookupSwitch { .. } => Opcode::LOOKUPSWITCH,
            Insn::Ldc(value) => {
                if value.slot_size() == 2 {
                    Opcode::LDC2_W
                } else {
                    Opcode::LDC
                }
            }
            Insn::Label(_) | Insn::Line { .. } => return None,
        })
    }

    /// The integer value pushed by this instruction, where it pushes one.
    pub fn int_constant_value(&self) -> Option<i32> {
        match self {
            Insn::Simple(op) if op.is_int_const() => Some(*op as i32 - Opcode::ICONST_0 as i32),
            Insn::IntPush { value, .. } => Some(*value),
            Insn::Ldc(ConstantValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    /// Builds the smallest instruction pushing the given int.
    pub fn push_int(value: i32) -> Insn {
        match value {
            -1 => Insn::Simple(Opcode::ICONST_M1),
            0 => Insn::Simple(Opcode::ICONST_0),
            1 => Insn::Simple(Opcode::ICONST_1),
            2 => Insn::Simple(Opcode::ICONST_2),
            3 => Insn::Simple(Opcode::ICONST_3),
            4 => Insn::Simple(Opcode::ICONST_4),
            5 => Insn::Simple(Opcode::ICONST_5),
            -128..=127 => Insn::IntPush {
                opcode: Opcode::BIPUSH,
                value,
            },
            -32768..=32767 => Insn::IntPush {
                opcode: Opcode::SIPUSH,
                value,
            },
            _ => Insn::Ldc(ConstantValue::Int(value)),
        }
    }

    /// Rewrites every label reference through `map`, allocating fresh labels
    /// on demand via `alloc`.
    fn remap_labels(
        &mut self,
        map: &mut HashMap<LabelId, LabelId>,
        mut alloc: impl FnMut() -> LabelId,
    ) {
        let mut fix = |label: &mut LabelId| {
            let mapped = *map.entry(*label).or_insert_with(&mut alloc);
            *label = mapped;
        };
        match self {
            Insn::Jump { label, .. } => fix(label),
            Insn::Label(label) => fix(label),
            Insn::Line { label, .. } => fix(label),
            Insn::TableSwitch {
                default, labels, ..
            } => {
                fix(default);
                for label in labels {
                    fix(label);
                }
            }
            Insn::LookupSwitch { default, pairs } => {
                fix(default);
                for (_, label) in pairs {
                    fix(label);
                }
            }
            _ => {}
        }
    }
}

struct Node {
    insn: Insn,
    prev: Option<u32>,
    next: Option<u32>,
    alive: bool,
}

/// Arena-backed doubly linked instruction list.
#[derive(Default)]
pub struct InsnList {
    nodes: Vec<Node>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
    next_label: u32,
}

impl InsnList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live instructions.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no live instruction remains.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocates a label unique within this list.
    pub fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    fn node(&self, id: InsnId) -> BytecodeResult<&Node> {
        self.nodes
            .get(id.0 as usize)
            .filter(|n| n.alive)
            .ok_or_else(|| BytecodeError::stale_handle(format!("instruction {id}")))
    }

    fn alloc(&mut self, insn: Insn) -> u32 {
        let index = self.nodes.len() as u32;
        self.nodes.push(Node {
            insn,
            prev: None,
            next: None,
            alive: true,
        });
        self.len += 1;
        index
    }

    /// Appends an instruction.
    pub fn add(&mut self, insn: Insn) -> InsnId {
        let index = self.alloc(insn);
        self.nodes[index as usize].prev = self.tail;
        match self.tail {
            Some(tail) => self.nodes[tail as usize].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        InsnId(index)
    }

    /// Appends a fresh label and returns it along with its instruction.
    pub fn add_label(&mut self) -> (LabelId, InsnId) {
        let label = self.new_label();
        let id = self.add(Insn::Label(label));
        (label, id)
    }

    /// Inserts an instruction before `at`.
    pub fn insert_before(&mut self, at: InsnId, insn: Insn) -> BytecodeResult<InsnId> {
        self.node(at)?;
        let index = self.alloc(insn);
        let prev = self.nodes[at.0 as usize].prev;
        self.nodes[index as usize].prev = prev;
        self.nodes[index as usize].next = Some(at.0);
        self.nodes[at.0 as usize].prev = Some(index);
        match prev {
            Some(prev) => self.nodes[prev as usize].next = Some(index),
            None => self.head = Some(index),
        }
        Ok(InsnId(index))
    }

    /// Inserts an instruction after `at`.
    pub fn insert_after(&mut self, at: InsnId, insn: Insn) -> BytecodeResult<InsnId> {
        self.node(at)?;
        let index = self.alloc(insn);
        let next = self.nodes[at.0 as usize].next;
        self.nodes[index as usize].next = next;
        self.nodes[index as usize].prev = Some(at.0);
        self.nodes[at.0 as usize].next = Some(index);
        match next {
            Some(next) => self.nodes[next as usize].prev = Some(index),
            None => self.tail = Some(index),
        }
        Ok(InsnId(index))
    }

    /// Inserts a sequence before `at`, preserving its order.
    pub fn insert_all_before(
        &mut self,
        at: InsnId,
        insns: Vec<Insn>,
    ) -> BytecodeResult<Vec<InsnId>> {
        let mut ids = Vec::with_capacity(insns.len());
        for insn in insns {
            ids.push(self.insert_before(at, insn)?);
        }
        Ok(ids)
    }

    /// Inserts a sequence after `at`, preserving its order.
    pub fn insert_all_after(
        &mut self,
        at: InsnId,
        insns: Vec<Insn>,
    ) -> BytecodeResult<Vec<InsnId>> {
        let mut cursor = at;
        let mut ids = Vec::with_capacity(insns.len());
        for insn in insns {
            cursor = self.insert_after(cursor, insn)?;
            ids.push(cursor);
        }
        Ok(ids)
    }

    /// Swaps the payload at `at`, keeping the handle valid.
    pub fn replace(&mut self, at: InsnId, insn: Insn) -> BytecodeResult<Insn> {
        self.node(at)?;
        Ok(std::mem::replace(&mut self.nodes[at.0 as usize].insn, insn))
    }

    /// Unlinks the instruction at `at`. The handle goes stale.
    pub fn remove(&mut self, at: InsnId) -> BytecodeResult<Insn> {
        self.node(at)?;
        let (prev, next) = {
            let node = &self.nodes[at.0 as usize];
            (node.prev, node.next)
        };
        match prev {
            Some(prev) => self.nodes[prev as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next as usize].prev = prev,
            None => self.tail = prev,
        }
        let node = &mut self.nodes[at.0 as usize];
        node.alive = false;
        node.prev = None;
        node.next = None;
        self.len -= 1;
        Ok(node.insn.clone())
    }

    /// Gets the instruction at `at`, if the handle is still live.
    pub fn get(&self, at: InsnId) -> Option<&Insn> {
        self.nodes
            .get(at.0 as usize)
            .filter(|n| n.alive)
            .map(|n| &n.insn)
    }

    /// True when `at` addresses a live instruction.
    pub fn contains(&self, at: InsnId) -> bool {
        self.get(at).is_some()
    }

    /// Handle of the first instruction.
    pub fn first(&self) -> Option<InsnId> {
        self.head.map(InsnId)
    }

    /// Handle of the last instruction.
    pub fn last(&self) -> Option<InsnId> {
        self.tail.map(InsnId)
    }

    /// Handle following `at`.
    pub fn next(&self, at: InsnId) -> Option<InsnId> {
        self.nodes
            .get(at.0 as usize)
            .filter(|n| n.alive)
            .and_then(|n| n.next)
            .map(InsnId)
    }

    /// Handle preceding `at`.
    pub fn prev(&self, at: InsnId) -> Option<InsnId> {
        self.nodes
            .get(at.0 as usize)
            .filter(|n| n.alive)
            .and_then(|n| n.prev)
            .map(InsnId)
    }

    /// First real instruction, skipping labels and line markers.
    pub fn first_real(&self) -> Option<InsnId> {
        self.iter()
            .find(|(_, insn)| insn.is_real())
            .map(|(id, _)| id)
    }

    /// Next real instruction at or after `at`.
    pub fn next_real(&self, mut at: InsnId) -> Option<InsnId> {
        loop {
            if self.get(at)?.is_real() {
                return Some(at);
            }
            at = self.next(at)?;
        }
    }

    /// Handle of the `Label` pseudo-instruction for `label`.
    pub fn find_label(&self, label: LabelId) -> Option<InsnId> {
        self.iter()
            .find(|(_, insn)| matches!(insn, Insn::Label(l) if *l == label))
            .map(|(id, _)| id)
    }

    /// Zero-based position of `at` among live instructions.
    pub fn index_of(&self, at: InsnId) -> Option<usize> {
        self.iter().position(|(id, _)| id == at)
    }

    /// Iterates live instructions in list order.
    pub fn iter(&self) -> InsnIter<'_> {
        InsnIter {
            list: self,
            cursor: self.head,
        }
    }

    /// Clones the instructions of `other` in order, remapping its labels
    /// into this list's label space. Used when merging code across methods.
    pub fn adopt(&mut self, other: &InsnList) -> Vec<Insn> {
        let ids: Vec<InsnId> = other.iter().map(|(id, _)| id).collect();
        self.adopt_range(other, &ids)
    }

    /// Clones the given instructions of `other`, remapping labels.
    pub fn adopt_range(&mut self, other: &InsnList, ids: &[InsnId]) -> Vec<Insn> {
        let mut map = HashMap::new();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(insn) = other.get(*id) {
                let mut insn = insn.clone();
                insn.remap_labels(&mut map, || {
                    let label = LabelId(self.next_label);
                    self.next_label += 1;
                    label
                });
                out.push(insn);
            }
        }
        out
    }
}

impl Clone for InsnList {
    fn clone(&self) -> Self {
        // Structural clone: live instructions only, handles renumbered in
        // list order. Label ids are stable so branches stay valid.
        let mut list = InsnList::new();
        list.next_label = self.next_label;
        for (_, insn) in self.iter() {
            list.add(insn.clone());
        }
        list
    }
}

impl fmt::Debug for InsnList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|(_, i)| i)).finish()
    }
}

/// Iterator over live instructions.
pub struct InsnIter<'a> {
    list: &'a InsnList,
    cursor: Option<u32>,
}

impl<'a> Iterator for InsnIter<'a> {
    type Item = (InsnId, &'a Insn);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let node = &self.list.nodes[index as usize];
        self.cursor = node.next;
        Some((InsnId(index), &node.insn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_list() -> (InsnList, Vec<InsnId>) {
        let mut list = InsnList::new();
        let ids = vec![
            list.add(Insn::Simple(Opcode::ICONST_0)),
            list.add(Insn::Simple(Opcode::ICONST_1)),
            list.add(Insn::Simple(Opcode::IADD)),
            list.add(Insn::Simple(Opcode::IRETURN)),
        ];
        (list, ids)
    }

    #[test]
    fn test_add_preserves_order() {
        let (list, ids) = simple_list();
        let order: Vec<InsnId> = list.iter().map(|(id, _)| id).collect();
        assert_eq!(order, ids);
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn test_insert_before_and_after() {
        let (mut list, ids) = simple_list();
        let before = list.insert_before(ids[2], Insn::Simple(Opcode::DUP)).unwrap();
        let after = list.insert_after(ids[2], Insn::Simple(Opcode::POP)).unwrap();
        let order: Vec<InsnId> = list.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![ids[0], ids[1], before, ids[2], after, ids[3]]);
    }

    #[test]
    fn test_insert_at_head() {
        let (mut list, ids) = simple_list();
        let head = list.insert_before(ids[0], Insn::Simple(Opcode::NOP)).unwrap();
        assert_eq!(list.first(), Some(head));
    }

    #[test]
    fn test_replace_keeps_handle() {
        let (mut list, ids) = simple_list();
        let old = list.replace(ids[2], Insn::Simple(Opcode::ISUB)).unwrap();
        assert_eq!(old, Insn::Simple(Opcode::IADD));
        assert_eq!(list.get(ids[2]), Some(&Insn::Simple(Opcode::ISUB)));
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn test_remove_invalidates_handle() {
        let (mut list, ids) = simple_list();
        list.remove(ids[1]).unwrap();
        assert!(!list.contains(ids[1]));
        assert!(list.remove(ids[1]).is_err());
        assert!(list.insert_before(ids[1], Insn::Simple(Opcode::NOP)).is_err());
        let order: Vec<InsnId> = list.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![ids[0], ids[2], ids[3]]);
    }

    #[test]
    fn test_remove_head_and_tail() {
        let (mut list, ids) = simple_list();
        list.remove(ids[0]).unwrap();
        list.remove(ids[3]).unwrap();
        assert_eq!(list.first(), Some(ids[1]));
        assert_eq!(list.last(), Some(ids[2]));
    }

    #[test]
    fn test_first_real_skips_pseudo() {
        let mut list = InsnList::new();
        let (_, _) = list.add_label();
        let label = list.new_label();
        list.add(Insn::Line { line: 10, label });
        let real = list.add(Insn::Simple(Opcode::RETURN));
        assert_eq!(list.first_real(), Some(real));
    }

    #[test]
    fn test_adopt_remaps_labels() {
        let mut source = InsnList::new();
        let (label, _) = source.add_label();
        source.add(Insn::Jump {
            opcode: Opcode::GOTO,
            label,
        });

        let mut dest = InsnList::new();
        let existing = dest.new_label();
        let adopted = dest.adopt(&source);
        assert_eq!(adopted.len(), 2);
        match (&adopted[0], &adopted[1]) {
            (Insn::Label(l1), Insn::Jump { label: l2, .. }) => {
                assert_eq!(l1, l2);
                assert_ne!(*l1, existing);
                assert_ne!(*l1, label);
            }
            other => panic!("unexpected adopted shape: {other:?}"),
        }
    }

    #[test]
    fn test_push_int_encodings() {
        assert_eq!(Insn::push_int(3), Insn::Simple(Opcode::ICONST_3));
        assert_eq!(
            Insn::push_int(100),
            Insn::IntPush {
                opcode: Opcode::BIPUSH,
                value: 100
            }
        );
        assert_eq!(
            Insn::push_int(30000),
            Insn::IntPush {
                opcode: Opcode::SIPUSH,
                value: 30000
            }
        );
        assert_eq!(Insn::push_int(1 << 20), Insn::Ldc(ConstantValue::Int(1 << 20)));
        for v in [-1, 0, 5, -128, 127, -32768] {
            assert_eq!(Insn::push_int(v).int_constant_value(), Some(v));
        }
    }
}
