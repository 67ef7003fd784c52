//! Injection point queries.
//!
//! An `At` annotation names a selector kind, an optional target member, an
//! ordinal, a shift and named arguments. Parsed once into an immutable
//! [`InjectionPointData`], evaluated against target methods during injector
//! preparation.

mod selectors;
pub use selectors::find_super_ctor_call;
pub mod slice;

pub use slice::SliceRange;

use crate::annotations as ann;
use crate::error::{EngineError, EngineResult};
use log::warn;
use mixin_bytecode::{AnnotationNode, InsnId, MethodNode};
use mixin_core::MemberRef;
use mixin_refmap::RefMapper;
use std::collections::HashMap;

/// Shift values above this draw a warning.
pub const SHIFT_BY_WARN: i32 = 3;
/// Shift values above this are refused.
pub const SHIFT_BY_LIMIT: i32 = 5;

/// Position adjustment applied to each match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shift {
    /// Keep the matched instruction
    #[default]
    Before,
    /// Move to the instruction following the match
    After,
    /// Move by a signed number of real instructions
    By(i32),
}

/// Selector suffix constraining how many matches survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Suffix {
    /// Keep every match
    #[default]
    All,
    /// Keep the first match only
    First,
    /// Keep the last match only
    Last,
    /// Exactly one match must exist
    One,
}

/// Selector kinds of the injection point library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointKind {
    Head,
    Return,
    Tail,
    Invoke,
    InvokeAssign,
    InvokeString,
    Field,
    New,
    Jump,
    Constant,
    Load,
    Store,
}

impl PointKind {
    fn parse(name: &str) -> Option<PointKind> {
        Some(match name {
            "HEAD" => PointKind::Head,
            "RETURN" => PointKind::Return,
            "TAIL" => PointKind::Tail,
            "INVOKE" => PointKind::Invoke,
            "INVOKE_ASSIGN" => PointKind::InvokeAssign,
            "INVOKE_STRING" => PointKind::InvokeString,
            "FIELD" => PointKind::Field,
            "NEW" => PointKind::New,
            "JUMP" => PointKind::Jump,
            "CONSTANT" => PointKind::Constant,
            "LOAD" => PointKind::Load,
            "STORE" => PointKind::Store,
            _ => return None,
        })
    }
}

/// One parsed, immutable injection point query.
#[derive(Debug, Clone)]
pub struct InjectionPointData {
    pub kind: PointKind,
    pub suffix: Suffix,
    /// Target member reference for member-matching selectors
    pub target: Option<MemberRef>,
    /// `Some(n)` selects the nth match; `None` selects all
    pub ordinal: Option<usize>,
    /// Narrows opcode-sensitive selectors
    pub opcode: Option<u8>,
    pub shift: Shift,
    /// Named `key=value` arguments
    pub args: HashMap<String, String>,
    /// Names the slice this query evaluates under
    pub slice_id: String,
}

impl InjectionPointData {
    /// Parses one `At` annotation.
    pub fn parse(
        at: &AnnotationNode,
        mixin_dotted: &str,
        refmapper: &RefMapper,
    ) -> EngineResult<Self> {
        let value = at.get_str("value").unwrap_or_default();
        let (kind_name, suffix) = match value.split_once(':') {
            Some((kind, suffix)) => {
                let suffix = match suffix {
                    "FIRST" => Suffix::First,
                    "LAST" => Suffix::Last,
                    "ONE" => Suffix::One,
                    other => {
                        return Err(EngineError::invalid_injection(
                            mixin_dotted.to_string(),
                            value.to_string(),
                            format!("unknown selector suffix '{other}'"),
                        ))
                    }
                };
                (kind, suffix)
            }
            None => (value, Suffix::All),
        };
        let kind = PointKind::parse(kind_name).ok_or_else(|| {
            EngineError::invalid_injection(
                mixin_dotted.to_string(),
                value.to_string(),
                format!("unknown injection point kind '{kind_name}'"),
            )
        })?;

        let target = match at.get_str("target") {
            Some(raw) => {
                let remapped = refmapper.remap(mixin_dotted, raw);
                Some(MemberRef::parse(&remapped).map_err(|e| {
                    EngineError::invalid_injection(
                        mixin_dotted.to_string(),
                        value.to_string(),
                        e.to_string(),
                    )
                })?)
            }
            None => None,
        };

        let ordinal = match at.get_i32("ordinal") {
            None | Some(-1) => None,
            Some(n) if n >= 0 => Some(n as usize),
            Some(n) => {
                return Err(EngineError::invalid_injection(
                    mixin_dotted.to_string(),
                    value.to_string(),
                    format!("invalid ordinal {n}"),
                ))
            }
        };

        let opcode = match at.get_i32("opcode") {
            None | Some(-1) => None,
            Some(op) if (0..=0xc9).contains(&op) => Some(op as u8),
            Some(op) => {
                return Err(EngineError::invalid_injection(
                    mixin_dotted.to_string(),
                    value.to_string(),
                    format!("invalid opcode {op}"),
                ))
            }
        };

        let shift = match at.get("shift").and_then(|v| match v {
            mixin_bytecode::AnnotationValue::Enum { value, .. } => Some(value.as_str()),
            _ => None,
        }) {
            None | Some("BEFORE") => Shift::Before,
            Some("AFTER") => Shift::After,
            Some("BY") => {
                let by = at.get_i32("by").unwrap_or(0);
                if by.abs() > SHIFT_BY_LIMIT {
                    return Err(EngineError::invalid_injection(
                        mixin_dotted.to_string(),
                        value.to_string(),
                        format!("shift by {by} exceeds the limit of {SHIFT_BY_LIMIT}"),
                    ));
                }
                if by.abs() > SHIFT_BY_WARN {
                    warn!("{mixin_dotted}: shift by {by} is fragile, consider a closer anchor");
                }
                Shift::By(by)
            }
            Some(other) => {
                return Err(EngineError::invalid_injection(
                    mixin_dotted.to_string(),
                    value.to_string(),
                    format!("unknown shift '{other}'"),
                ))
            }
        };

        let mut args = HashMap::new();
        for arg in at.get_str_array("args") {
            match arg.split_once('=') {
                Some((key, val)) => {
                    args.insert(key.trim().to_string(), val.trim().to_string());
                }
                None => {
                    args.insert(arg.trim().to_string(), String::new());
                }
            }
        }

        Ok(Self {
            kind,
            suffix,
            target,
            ordinal,
            opcode,
            shift,
            args,
            slice_id: at.get_str("slice").unwrap_or_default().to_string(),
        })
    }

    /// Evaluates this query over `method` within `range`.
    ///
    /// `constant` carries the typed-literal annotation for CONSTANT points
    /// driven by a modify-constant injector.
    pub fn select(
        &self,
        method: &MethodNode,
        range: &SliceRange,
        constant: Option<&AnnotationNode>,
    ) -> EngineResult<Vec<InsnId>> {
        let raw = selectors::scan(self, method, range, constant)?;

        // Ordinal picks the nth match in declaration order.
        let picked: Vec<InsnId> = match self.ordinal {
            Some(n) => raw.into_iter().skip(n).take(1).collect(),
            None => raw,
        };

        // Shift adjusts each surviving position.
        let mut shifted = Vec::with_capacity(picked.len());
        for id in picked {
            shifted.push(self.apply_shift(method, id)?);
        }

        // Suffix constrains the final count.
        Ok(match self.suffix {
            Suffix::All => shifted,
            Suffix::First => shifted.into_iter().take(1).collect(),
            Suffix::Last => match shifted.pop() {
                Some(last) => vec![last],
                None => Vec::new(),
            },
            Suffix::One => {
                if shifted.len() != 1 {
                    return Err(EngineError::invalid_injection(
                        method.name.clone(),
                        format!("{:?}", self.kind),
                        format!(":ONE selector produced {} matches", shifted.len()),
                    ));
                }
                shifted
            }
        })
    }

    fn apply_shift(&self, method: &MethodNode, at: InsnId) -> EngineResult<InsnId> {
        let steps = match self.shift {
            Shift::Before => return Ok(at),
            Shift::After => 1,
            Shift::By(n) => n,
        };
        let mut current = at;
        let mut remaining = steps;
        while remaining != 0 {
            let next = if remaining > 0 {
                let mut candidate = method.instructions.next(current);
                while let Some(id) = candidate {
                    match method.instructions.get(id) {
                        Some(insn) if insn.is_real() => break,
                        _ => candidate = method.instructions.next(id),
                    }
                }
                candidate
            } else {
                let mut candidate = method.instructions.prev(current);
                while let Some(id) = candidate {
                    match method.instructions.get(id) {
                        Some(insn) if insn.is_real() => break,
                        _ => candidate = method.instructions.prev(id),
                    }
                }
                candidate
            };
            current = next.ok_or_else(|| {
                EngineError::invalid_injection(
                    method.name.clone(),
                    format!("{:?}", self.kind),
                    "shift walked off the end of the method".to_string(),
                )
            })?;
            remaining -= remaining.signum();
        }
        Ok(current)
    }
}
