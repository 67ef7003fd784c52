//! The injection point selector library.
//!
//! Selectors are stateless: each scan walks the method's instruction list
//! within the slice region and appends matching instruction handles in
//! order.

use crate::error::{EngineError, EngineResult};
use crate::point::{InjectionPointData, PointKind, SliceRange};
use mixin_bytecode::{
    AnnotationNode, ConstantValue, Insn, InsnId, MethodNode, Opcode, TypeDesc,
};
use std::collections::HashMap;

/// Runs the selector named by `data.kind`.
pub fn scan(
    data: &InjectionPointData,
    method: &MethodNode,
    range: &SliceRange,
    constant: Option<&AnnotationNode>,
) -> EngineResult<Vec<InsnId>> {
    let mut out = Vec::new();
    match data.kind {
        PointKind::Head => select_head(method, range, &mut out),
        PointKind::Return => select_returns(method, range, false, &mut out),
        PointKind::Tail => select_returns(method, range, true, &mut out),
        PointKind::Invoke => select_invoke(data, method, range, &mut out),
        PointKind::InvokeAssign => select_invoke_assign(data, method, range, &mut out),
        PointKind::InvokeString => select_invoke_string(data, method, range, &mut out),
        PointKind::Field => select_field(data, method, range, &mut out),
        PointKind::New => select_new(data, method, range, &mut out),
        PointKind::Jump => select_jump(data, method, range, &mut out),
        PointKind::Constant => {
            let query = ConstantQuery::parse(constant, &data.args)?;
            select_constant(&query, method, range, &mut out);
        }
        PointKind::Load => select_local_access(data, method, range, true, &mut out),
        PointKind::Store => select_local_access(data, method, range, false, &mut out),
    }
    Ok(out)
}

fn in_range<'a>(
    method: &'a MethodNode,
    range: &'a SliceRange,
) -> impl Iterator<Item = (InsnId, &'a Insn)> + 'a {
    method
        .instructions
        .iter()
        .enumerate()
        .filter(|(position, _)| range.contains(*position))
        .map(|(_, entry)| entry)
}

/// HEAD: the first real instruction. In constructors the prologue up to and
/// including the superconstructor call is skipped.
fn select_head(method: &MethodNode, range: &SliceRange, out: &mut Vec<InsnId>) {
    if method.is_ctor() {
        if let Some(super_call) = find_super_ctor_call(method) {
            let mut cursor = method.instructions.next(super_call);
            while let Some(id) = cursor {
                match method.instructions.get(id) {
                    Some(insn) if insn.is_real() => {
                        out.push(id);
                        return;
                    }
                    _ => cursor = method.instructions.next(id),
                }
            }
            return;
        }
    }
    if let Some((id, _)) = in_range(method, range).find(|(_, insn)| insn.is_real()) {
        out.push(id);
    }
}

/// Finds the superconstructor (or `this(...)`) call of a constructor: the
/// first `<init>` invocation that is not the tail of a nested `new` chain.
pub fn find_super_ctor_call(method: &MethodNode) -> Option<InsnId> {
    let mut nesting = 0usize;
    for (id, insn) in method.instructions.iter() {
        match insn {
            Insn::Type { opcode, .. } if *opcode == Opcode::NEW => nesting += 1,
            Insn::Method { opcode, name, .. }
                if *opcode == Opcode::INVOKESPECIAL && name == "<init>" =>
            {
                if nesting == 0 {
                    return Some(id);
                }
                nesting -= 1;
            }
            _ => {}
        }
    }
    None
}

fn select_returns(method: &MethodNode, range: &SliceRange, tail: bool, out: &mut Vec<InsnId>) {
    let mut returns: Vec<InsnId> = Vec::new();
    for (id, insn) in in_range(method, range) {
        if let Insn::Simple(op) = insn {
            if op.is_return() {
                returns.push(id);
            }
        }
    }
    if tail {
        if let Some(last) = returns.pop() {
            out.push(last);
        }
    } else {
        out.extend(returns);
    }
}

fn matches_opcode(data: &InjectionPointData, op: Opcode) -> bool {
    data.opcode.map_or(true, |narrow| narrow == op as u8)
}

fn select_invoke(
    data: &InjectionPointData,
    method: &MethodNode,
    range: &SliceRange,
    out: &mut Vec<InsnId>,
) {
    for (id, insn) in in_range(method, range) {
        if let Insn::Method {
            opcode,
            owner,
            name,
            desc,
            ..
        } = insn
        {
            if matches_opcode(data, *opcode)
                && data
                    .target
                    .as_ref()
                    .map_or(true, |t| t.matches(owner, name, desc))
            {
                out.push(id);
            }
        }
    }
}

/// INVOKE_ASSIGN: the instruction immediately after a matched non-void
/// invoke. A primitive widening that directly follows the invoke counts as
/// part of it.
fn select_invoke_assign(
    data: &InjectionPointData,
    method: &MethodNode,
    range: &SliceRange,
    out: &mut Vec<InsnId>,
) {
    let mut invokes = Vec::new();
    for (id, insn) in in_range(method, range) {
        if let Insn::Method {
            opcode,
            owner,
            name,
            desc,
            ..
        } = insn
        {
            let non_void = !desc.ends_with(")V");
            if non_void
                && matches_opcode(data, *opcode)
                && data
                    .target
                    .as_ref()
                    .map_or(true, |t| t.matches(owner, name, desc))
            {
                invokes.push(id);
            }
        }
    }
    for invoke in invokes {
        let mut cursor = method.instructions.next(invoke);
        // Skip pseudo instructions and one trailing coercion.
        let mut coercion_skipped = false;
        while let Some(id) = cursor {
            match method.instructions.get(id) {
                Some(insn) if !insn.is_real() => cursor = method.instructions.next(id),
                Some(Insn::Simple(op)) if !coercion_skipped && is_coercion(*op) => {
                    coercion_skipped = true;
                    cursor = method.instructions.next(id);
                }
                Some(_) => {
                    out.push(id);
                    break;
                }
                None => break,
            }
        }
    }
}

fn is_coercion(op: Opcode) -> bool {
    (Opcode::I2L as u8..=Opcode::I2S as u8).contains(&(op as u8))
}

/// INVOKE_STRING: single-String-argument void invokes whose argument is a
/// constant, optionally constrained to a specific literal via `ldc=`.
fn select_invoke_string(
    data: &InjectionPointData,
    method: &MethodNode,
    range: &SliceRange,
    out: &mut Vec<InsnId>,
) {
    let wanted = data.args.get("ldc");
    for (id, insn) in in_range(method, range) {
        let Insn::Method {
            owner, name, desc, ..
        } = insn
        else {
            continue;
        };
        if desc != "(Ljava/lang/String;)V" {
            continue;
        }
        if let Some(target) = &data.target {
            if !target.matches(owner, name, desc) {
                continue;
            }
        }
        // The pushed argument must be the string literal directly before.
        let mut prev = method.instructions.prev(id);
        while let Some(p) = prev {
            match method.instructions.get(p) {
                Some(insn) if !insn.is_real() => prev = method.instructions.prev(p),
                Some(Insn::Ldc(ConstantValue::String(s))) => {
                    if wanted.map_or(true, |w| w == s) {
                        out.push(id);
                    }
                    break;
                }
                _ => break,
            }
        }
    }
}

fn select_field(
    data: &InjectionPointData,
    method: &MethodNode,
    range: &SliceRange,
    out: &mut Vec<InsnId>,
) {
    for (id, insn) in in_range(method, range) {
        if let Insn::Field {
            opcode,
            owner,
            name,
            desc,
        } = insn
        {
            if matches_opcode(data, *opcode)
                && data
                    .target
                    .as_ref()
                    .map_or(true, |t| t.matches(owner, name, desc))
            {
                out.push(id);
            }
        }
    }
}

fn select_new(
    data: &InjectionPointData,
    method: &MethodNode,
    range: &SliceRange,
    out: &mut Vec<InsnId>,
) {
    let wanted_class = data
        .target
        .as_ref()
        .and_then(|t| t.owner.clone())
        .or_else(|| data.args.get("class").cloned());
    for (id, insn) in in_range(method, range) {
        if let Insn::Type { opcode, class } = insn {
            if *opcode == Opcode::NEW && wanted_class.as_deref().map_or(true, |w| w == class) {
                out.push(id);
            }
        }
    }
}

fn select_jump(
    data: &InjectionPointData,
    method: &MethodNode,
    range: &SliceRange,
    out: &mut Vec<InsnId>,
) {
    for (id, insn) in in_range(method, range) {
        if let Insn::Jump { opcode, .. } = insn {
            if matches_opcode(data, *opcode) {
                out.push(id);
            }
        }
    }
}

fn select_local_access(
    data: &InjectionPointData,
    method: &MethodNode,
    range: &SliceRange,
    load: bool,
    out: &mut Vec<InsnId>,
) {
    for (id, insn) in in_range(method, range) {
        if let Insn::Var { opcode, .. } = insn {
            let wanted = if load {
                opcode.is_load()
            } else {
                opcode.is_store()
            };
            if wanted && matches_opcode(data, *opcode) {
                out.push(id);
            }
        }
    }
}

/// Zero-comparison branches a CONSTANT query may expand into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroCondition {
    LessThanZero,
    GreaterThanZero,
    Zero,
}

impl ZeroCondition {
    /// Branch opcodes carrying this condition's implicit zero.
    pub fn opcodes(&self) -> [Opcode; 2] {
        match self {
            ZeroCondition::LessThanZero => [Opcode::IFLT, Opcode::IFGE],
            ZeroCondition::GreaterThanZero => [Opcode::IFGT, Opcode::IFLE],
            ZeroCondition::Zero => [Opcode::IFEQ, Opcode::IFNE],
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Some(match name.trim() {
            "LESS_THAN_ZERO" => ZeroCondition::LessThanZero,
            "GREATER_THAN_ZERO" => ZeroCondition::GreaterThanZero,
            "ZERO" => ZeroCondition::Zero,
            _ => return None,
        })
    }
}

/// A typed constant literal to match.
#[derive(Debug, Clone, Default)]
pub struct ConstantQuery {
    pub value: Option<ConstantValue>,
    pub null: bool,
    pub expand: Vec<ZeroCondition>,
}

impl ConstantQuery {
    /// Builds a query from a typed `Constant` annotation and/or named args.
    pub fn parse(
        constant: Option<&AnnotationNode>,
        args: &HashMap<String, String>,
    ) -> EngineResult<Self> {
        let mut query = ConstantQuery::default();
        if let Some(node) = constant {
            query.null = node.get_bool("nullValue").unwrap_or(false);
            if let Some(v) = node.get_i32("intValue") {
                query.value = Some(ConstantValue::Int(v));
            }
            if let Some(v) = node.get("longValue").and_then(|v| match v {
                mixin_bytecode::AnnotationValue::Const(ConstantValue::Long(l)) => Some(*l),
                _ => None,
            }) {
                query.value = Some(ConstantValue::Long(v));
            }
            if let Some(v) = node.get("floatValue").and_then(|v| match v {
                mixin_bytecode::AnnotationValue::Const(ConstantValue::Float(f)) => Some(*f),
                _ => None,
            }) {
                query.value = Some(ConstantValue::Float(v));
            }
            if let Some(v) = node.get("doubleValue").and_then(|v| match v {
                mixin_bytecode::AnnotationValue::Const(ConstantValue::Double(d)) => Some(*d),
                _ => None,
            }) {
                query.value = Some(ConstantValue::Double(v));
            }
            if let Some(v) = node.get_str("stringValue") {
                query.value = Some(ConstantValue::String(v.to_string()));
            }
            if let Some(v) = node.get("classValue").and_then(|v| v.as_class_desc()) {
                query.value = Some(ConstantValue::Class(
                    crate::annotations::class_value_to_internal(v),
                ));
            }
            for item in node.get_array("expandZeroConditions") {
                if let mixin_bytecode::AnnotationValue::Enum { value, .. } = item {
                    if let Some(condition) = ZeroCondition::parse(value) {
                        query.expand.push(condition);
                    }
                }
            }
        }
        // Named args override or stand alone.
        if args.get("nullValue").map(String::as_str) == Some("true") {
            query.null = true;
        }
        if let Some(raw) = args.get("intValue") {
            let parsed = raw.parse::<i32>().map_err(|_| {
                EngineError::invalid_injection(
                    "CONSTANT".to_string(),
                    "intValue".to_string(),
                    format!("not an int: {raw}"),
                )
            })?;
            query.value = Some(ConstantValue::Int(parsed));
        }
        if let Some(raw) = args.get("stringValue") {
            query.value = Some(ConstantValue::String(raw.clone()));
        }
        if let Some(raw) = args.get("expandZeroConditions") {
            for name in raw.split(',') {
                if let Some(condition) = ZeroCondition::parse(name) {
                    query.expand.push(condition);
                }
            }
        }
        Ok(query)
    }

    /// True when this query can expand the given branch opcode.
    pub fn expands(&self, op: Opcode) -> bool {
        self.expand
            .iter()
            .any(|condition| condition.opcodes().contains(&op))
    }

    fn matches_insn(&self, insn: &Insn) -> bool {
        if self.null && matches!(insn, Insn::Simple(Opcode::ACONST_NULL)) {
            return true;
        }
        match &self.value {
            Some(ConstantValue::Int(v)) => insn.int_constant_value() == Some(*v),
            Some(ConstantValue::Long(v)) => match insn {
                Insn::Simple(Opcode::LCONST_0) => *v == 0,
                Insn::Simple(Opcode::LCONST_1) => *v == 1,
                Insn::Ldc(ConstantValue::Long(l)) => l == v,
                _ => false,
            },
            Some(ConstantValue::Float(v)) => match insn {
                Insn::Simple(Opcode::FCONST_0) => *v == 0.0,
                Insn::Simple(Opcode::FCONST_1) => *v == 1.0,
                Insn::Simple(Opcode::FCONST_2) => *v == 2.0,
                Insn::Ldc(ConstantValue::Float(f)) => f.to_bits() == v.to_bits(),
                _ => false,
            },
            Some(ConstantValue::Double(v)) => match insn {
                Insn::Simple(Opcode::DCONST_0) => *v == 0.0,
                Insn::Simple(Opcode::DCONST_1) => *v == 1.0,
                Insn::Ldc(ConstantValue::Double(d)) => d.to_bits() == v.to_bits(),
                _ => false,
            },
            Some(expected) => matches!(insn, Insn::Ldc(actual) if actual == expected),
            None => false,
        }
    }

    /// The descriptor of the constant's type.
    pub fn type_desc(&self) -> TypeDesc {
        if self.null {
            return TypeDesc::Object("java/lang/Object".to_string());
        }
        match &self.value {
            Some(ConstantValue::Int(_)) | None => TypeDesc::Int,
            Some(ConstantValue::Long(_)) => TypeDesc::Long,
            Some(ConstantValue::Float(_)) => TypeDesc::Float,
            Some(ConstantValue::Double(_)) => TypeDesc::Double,
            Some(ConstantValue::String(_)) => {
                TypeDesc::Object("java/lang/String".to_string())
            }
            Some(ConstantValue::Class(_)) => TypeDesc::Object("java/lang/Class".to_string()),
        }
    }
}

fn select_constant(
    query: &ConstantQuery,
    method: &MethodNode,
    range: &SliceRange,
    out: &mut Vec<InsnId>,
) {
    let expand_zero = query.value == Some(ConstantValue::Int(0)) || query.value.is_none();
    for (id, insn) in in_range(method, range) {
        if query.matches_insn(insn) {
            out.push(id);
            continue;
        }
        if expand_zero && !query.expand.is_empty() {
            if let Insn::Jump { opcode, .. } = insn {
                if query.expands(*opcode) {
                    out.push(id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixin_bytecode::{AccessFlags, ClassBuilder};

    fn sample_method() -> MethodNode {
        let class = ClassBuilder::new("a/T")
            .method(AccessFlags::PUBLIC, "m", "(I)I", |body| {
                let skip = body.label();
                body.iload(1)
                    .jump(Opcode::IFLT, skip)
                    .aload(0)
                    .iconst(7)
                    .invoke_virtual("a/T", "sink", "(I)I")
                    .ireturn()
                    .place(skip)
                    .iconst(0)
                    .ireturn();
            })
            .build();
        class.find_method("m", "(I)I").unwrap().clone()
    }

    fn data(kind: PointKind) -> InjectionPointData {
        InjectionPointData {
            kind,
            suffix: Default::default(),
            target: None,
            ordinal: None,
            opcode: None,
            shift: Default::default(),
            args: HashMap::new(),
            slice_id: String::new(),
        }
    }

    #[test]
    fn test_head_returns_first_real() {
        let method = sample_method();
        let range = SliceRange::full(&method);
        let matches = scan(&data(PointKind::Head), &method, &range, None).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(method.instructions.first_real(), Some(matches[0]));
    }

    #[test]
    fn test_returns_and_tail() {
        let method = sample_method();
        let range = SliceRange::full(&method);
        let returns = scan(&data(PointKind::Return), &method, &range, None).unwrap();
        assert_eq!(returns.len(), 2);
        let tail = scan(&data(PointKind::Tail), &method, &range, None).unwrap();
        assert_eq!(tail, vec![returns[1]]);
    }

    #[test]
    fn test_invoke_with_target() {
        let method = sample_method();
        let range = SliceRange::full(&method);
        let mut query = data(PointKind::Invoke);
        query.target = Some(mixin_core::MemberRef::parse("La/T;sink(I)I").unwrap());
        let matches = scan(&query, &method, &range, None).unwrap();
        assert_eq!(matches.len(), 1);

        query.target = Some(mixin_core::MemberRef::parse("La/T;other(I)I").unwrap());
        assert!(scan(&query, &method, &range, None).unwrap().is_empty());
    }

    #[test]
    fn test_jump_narrowed_by_opcode() {
        let method = sample_method();
        let range = SliceRange::full(&method);
        let mut query = data(PointKind::Jump);
        let matches = scan(&query, &method, &range, None).unwrap();
        assert_eq!(matches.len(), 1);
        query.opcode = Some(Opcode::IFGE as u8);
        assert!(scan(&query, &method, &range, None).unwrap().is_empty());
    }

    #[test]
    fn test_constant_int_match() {
        let method = sample_method();
        let range = SliceRange::full(&method);
        let mut query = data(PointKind::Constant);
        query.args.insert("intValue".to_string(), "7".to_string());
        let matches = scan(&query, &method, &range, None).unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_constant_zero_condition_expansion() {
        let method = sample_method();
        let range = SliceRange::full(&method);
        let mut query = data(PointKind::Constant);
        query.args.insert("intValue".to_string(), "0".to_string());
        query.args.insert(
            "expandZeroConditions".to_string(),
            "LESS_THAN_ZERO".to_string(),
        );
        let matches = scan(&query, &method, &range, None).unwrap();
        // The iconst_0 literal and the IFLT branch both match.
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_load_selector() {
        let method = sample_method();
        let range = SliceRange::full(&method);
        let matches = scan(&data(PointKind::Load), &method, &range, None).unwrap();
        // iload 1 and aload 0.
        assert_eq!(matches.len(), 2);
    }
}
