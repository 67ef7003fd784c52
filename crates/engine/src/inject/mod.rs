//! The injector subsystem.
//!
//! Each injector couples a handler method on the mixin with a set of
//! injection point queries. Preparation resolves target methods and
//! evaluates the queries; application rewrites instructions at every
//! surviving point. Preparation of every injector completes before any
//! injector applies.

mod callback;
mod modify_arg;
mod modify_args;
mod modify_constant;
mod modify_variable;
mod redirect;

pub use modify_args::args_bundle_name;

use crate::annotations as ann;
use crate::error::{EngineError, EngineResult};
use crate::point::{InjectionPointData, SliceRange};
use crate::target_context::TargetContext;
use log::{debug, warn};
use mixin_bytecode::{
    AnnotationNode, ClassNode, Insn, InsnId, MethodNode, Opcode, TypeDesc,
};
use mixin_core::{Constraint, MemberRef, MixinEnvironment};
use mixin_refmap::RefMapper;
use std::collections::HashMap;

/// The injector kinds of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectorKind {
    Callback,
    Redirect,
    ModifyArg,
    ModifyArgs,
    ModifyVariable,
    ModifyConstant,
}

impl InjectorKind {
    fn from_desc(desc: &str) -> Option<Self> {
        Some(match desc {
            ann::INJECT => InjectorKind::Callback,
            ann::REDIRECT => InjectorKind::Redirect,
            ann::MODIFY_ARG => InjectorKind::ModifyArg,
            ann::MODIFY_ARGS => InjectorKind::ModifyArgs,
            ann::MODIFY_VARIABLE => InjectorKind::ModifyVariable,
            ann::MODIFY_CONSTANT => InjectorKind::ModifyConstant,
            _ => return None,
        })
    }
}

/// Callback local-capture behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalCapture {
    #[default]
    NoCapture,
    Print,
    CaptureFailsoft,
    CaptureFailhard,
    CaptureFailexception,
}

impl LocalCapture {
    fn parse(name: &str) -> Self {
        match name {
            "PRINT" => LocalCapture::Print,
            "CAPTURE_FAILSOFT" => LocalCapture::CaptureFailsoft,
            "CAPTURE_FAILHARD" => LocalCapture::CaptureFailhard,
            "CAPTURE_FAILEXCEPTION" => LocalCapture::CaptureFailexception,
            _ => LocalCapture::NoCapture,
        }
    }

    /// True when locals should be appended to the handler call.
    pub fn captures(&self) -> bool {
        matches!(
            self,
            LocalCapture::CaptureFailsoft
                | LocalCapture::CaptureFailhard
                | LocalCapture::CaptureFailexception
        )
    }
}

/// Parsed injector metadata shared by every kind.
pub struct InjectionInfo {
    pub kind: InjectorKind,
    /// Internal name of the owning mixin
    pub mixin_class: String,
    /// Handler method key on the mixin
    pub handler_key: String,
    pub handler_name: String,
    pub handler_desc: String,
    pub handler_static: bool,
    /// The raw injector annotation
    pub annotation: AnnotationNode,
    /// Target method selectors
    pub methods: Vec<MemberRef>,
    pub points: Vec<InjectionPointData>,
    /// Named slices: id -> (from, to)
    pub slices: HashMap<String, (Option<InjectionPointData>, Option<InjectionPointData>)>,
    pub require: usize,
    pub expect: usize,
    pub allow: i32,
    pub group: Option<String>,
    pub constraints: Vec<Constraint>,
    pub cancellable: bool,
    pub capture: LocalCapture,
    /// Typed constant query annotation for modify-constant injectors
    pub constant: Option<AnnotationNode>,
    /// Per-target-method prepared matches, in preparation order
    pub prepared: Vec<PreparedInjection>,
}

/// Matches prepared against one target method.
pub struct PreparedInjection {
    /// `name + desc` of the target method
    pub method_key: String,
    /// Originally matched instruction handles
    pub nodes: Vec<InsnId>,
}

impl InjectionInfo {
    /// Parses the injector declared on `handler`, if any.
    pub fn parse(
        mixin_class: &str,
        handler: &MethodNode,
        refmapper: &RefMapper,
    ) -> EngineResult<Option<Self>> {
        let Some(annotation) = ann::injector_annotation(handler) else {
            return Ok(None);
        };
        let Some(kind) = InjectorKind::from_desc(&annotation.desc) else {
            return Ok(None);
        };
        let mixin_dotted = mixin_class.replace('/', ".");

        let mut methods = Vec::new();
        for raw in annotation.get_str_array("method") {
            for part in raw.split(';') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let remapped = refmapper.remap(&mixin_dotted, part);
                let reference = MemberRef::parse(&remapped).map_err(|e| {
                    EngineError::invalid_injection(
                        mixin_class.to_string(),
                        handler.member_key(),
                        format!("unparseable method selector '{part}': {e}"),
                    )
                })?;
                methods.push(reference);
            }
        }
        if methods.is_empty() {
            return Err(EngineError::invalid_injection(
                mixin_class.to_string(),
                handler.member_key(),
                "injector names no target methods".to_string(),
            ));
        }

        let mut points = Vec::new();
        for at in annotation.get_annotation_array("at") {
            points.push(InjectionPointData::parse(at, &mixin_dotted, refmapper)?);
        }
        if points.is_empty() {
            return Err(EngineError::invalid_injection(
                mixin_class.to_string(),
                handler.member_key(),
                "injector declares no injection points".to_string(),
            ));
        }
        if kind == InjectorKind::Redirect && points.len() != 1 {
            return Err(EngineError::invalid_injection(
                mixin_class.to_string(),
                handler.member_key(),
                "redirect takes exactly one injection point".to_string(),
            ));
        }

        let mut slices = HashMap::new();
        for slice in annotation.get_annotation_array("slice") {
            let id = slice.get_str("id").unwrap_or_default().to_string();
            let from = match slice.get_annotation("from") {
                Some(at) => Some(InjectionPointData::parse(at, &mixin_dotted, refmapper)?),
                None => None,
            };
            let to = match slice.get_annotation("to") {
                Some(at) => Some(InjectionPointData::parse(at, &mixin_dotted, refmapper)?),
                None => None,
            };
            slices.insert(id, (from, to));
        }

        let constraints = match annotation.get_str("constraints") {
            Some(expr) => Constraint::parse_all(expr).map_err(|e| {
                EngineError::invalid_injection(
                    mixin_class.to_string(),
                    handler.member_key(),
                    e.to_string(),
                )
            })?,
            None => Vec::new(),
        };

        let capture = annotation
            .get("locals")
            .and_then(|v| match v {
                mixin_bytecode::AnnotationValue::Enum { value, .. } => Some(value.as_str()),
                _ => None,
            })
            .map(LocalCapture::parse)
            .unwrap_or_default();

        let constant = annotation
            .get_annotation_array("constant")
            .first()
            .map(|c| (*c).clone());

        Ok(Some(Self {
            kind,
            mixin_class: mixin_class.to_string(),
            handler_key: handler.member_key(),
            handler_name: handler.name.clone(),
            handler_desc: handler.desc.clone(),
            handler_static: handler.is_static(),
            annotation: annotation.clone(),
            methods,
            points,
            slices,
            require: annotation.get_i32("require").map_or(0, |n| n.max(0) as usize),
            expect: annotation.get_i32("expect").map_or(1, |n| n.max(0) as usize),
            allow: annotation.get_i32("allow").unwrap_or(-1),
            group: annotation
                .get_str("group")
                .filter(|g| !g.is_empty())
                .map(str::to_string),
            constraints,
            cancellable: annotation.get_bool("cancellable").unwrap_or(false),
            capture,
            constant,
            prepared: Vec::new(),
        }))
    }

    /// Checks this injector's environment constraints.
    pub fn check_constraints(&self, env: &MixinEnvironment) -> EngineResult<()> {
        for constraint in &self.constraints {
            constraint.check(env).map_err(|source| EngineError::Constraint {
                mixin: self.mixin_class.clone(),
                handler: self.handler_key.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Resolves target methods and evaluates every injection point,
    /// registering matches with the target context's node registry.
    pub fn prepare(&mut self, ctx: &mut TargetContext) -> EngineResult<()> {
        // Resolve target methods up front; wildcard selectors may match
        // several, explicit ones exactly one.
        let selected: Vec<String> = ctx
            .class
            .methods
            .iter()
            .filter(|m| !m.instructions.is_empty())
            .filter(|m| {
                self.methods
                    .iter()
                    .any(|r| r.matches_member(&m.name, &m.desc))
            })
            .map(|m| m.member_key())
            .collect();

        for method_key in selected {
            let method = {
                let (name, desc) = split_key(&method_key);
                ctx.class
                    .find_method(name, desc)
                    .map(|m| m.clone())
            };
            let Some(method) = method else { continue };

            let mut nodes: Vec<InsnId> = Vec::new();
            for point in &self.points {
                let (from, to) = match self.slices.get(&point.slice_id) {
                    Some((from, to)) => (from.as_ref(), to.as_ref()),
                    None if point.slice_id.is_empty() => (None, None),
                    None => {
                        return Err(EngineError::invalid_injection(
                            self.mixin_class.clone(),
                            self.handler_key.clone(),
                            format!("undefined slice id '{}'", point.slice_id),
                        ))
                    }
                };
                let range = SliceRange::resolve(&method, from, to)?;
                for id in point.select(&method, &range, self.constant.as_ref())? {
                    if !nodes.contains(&id) {
                        nodes.push(id);
                    }
                }
            }

            let registry = ctx.registry_for(&method_key);
            for id in &nodes {
                registry.register(*id);
            }
            debug!(
                "prepared {}::{} -> {} ({} matches)",
                self.mixin_class,
                self.handler_key,
                method_key,
                nodes.len()
            );
            self.prepared.push(PreparedInjection { method_key, nodes });
        }
        Ok(())
    }

    /// Total matches across every prepared target method.
    pub fn total_matches(&self) -> usize {
        self.prepared.iter().map(|p| p.nodes.len()).sum()
    }

    /// Validates the `require`/`expect`/`allow` bounds, given the pooled
    /// total for this injector's group (equal to its own total when
    /// ungrouped).
    pub fn validate_counts(&self, pooled_total: usize, target: &str) -> EngineResult<()> {
        let own = self.total_matches();
        if pooled_total < self.require {
            return Err(EngineError::InjectionNotFound {
                mixin: self.mixin_class.clone(),
                handler: self.handler_key.clone(),
                target: target.to_string(),
                matched: pooled_total,
                required: self.require,
                allowed: self.allow,
            });
        }
        if self.allow >= 0 && own > self.allow as usize {
            return Err(EngineError::InjectionNotFound {
                mixin: self.mixin_class.clone(),
                handler: self.handler_key.clone(),
                target: target.to_string(),
                matched: own,
                required: self.require,
                allowed: self.allow,
            });
        }
        if own < self.expect {
            warn!(
                "{}::{} expected {} matches in {target} but found {own}",
                self.mixin_class, self.handler_key, self.expect
            );
        }
        Ok(())
    }

    /// Rewrites every prepared point.
    pub fn apply(&self, ctx: &mut TargetContext) -> EngineResult<()> {
        let handler = HandlerRef {
            owner: ctx.class.name.clone(),
            name: ctx
                .merged_names
                .get(&self.handler_key)
                .cloned()
                .unwrap_or_else(|| self.handler_name.clone()),
            desc: self.handler_desc.clone(),
            is_static: self.handler_static,
            is_interface: ctx.class.is_interface(),
        };
        for prepared in &self.prepared {
            for original in &prepared.nodes {
                let current = {
                    let registry = ctx.registry_for(&prepared.method_key);
                    registry.current(*original)
                };
                let Some(current) = current else {
                    warn!(
                        "{}::{}: matched instruction was removed by an earlier injector",
                        self.mixin_class, self.handler_key
                    );
                    continue;
                };
                match self.kind {
                    InjectorKind::Callback => {
                        callback::apply(self, ctx, &prepared.method_key, *original, current, &handler)?
                    }
                    InjectorKind::Redirect => {
                        redirect::apply(self, ctx, &prepared.method_key, *original, current, &handler)?
                    }
                    InjectorKind::ModifyArg => {
                        modify_arg::apply(self, ctx, &prepared.method_key, *original, current, &handler)?
                    }
                    InjectorKind::ModifyArgs => {
                        modify_args::apply(self, ctx, &prepared.method_key, *original, current, &handler)?
                    }
                    InjectorKind::ModifyVariable => modify_variable::apply(
                        self,
                        ctx,
                        &prepared.method_key,
                        *original,
                        current,
                        &handler,
                    )?,
                    InjectorKind::ModifyConstant => modify_constant::apply(
                        self,
                        ctx,
                        &prepared.method_key,
                        *original,
                        current,
                        &handler,
                    )?,
                }
            }
        }
        Ok(())
    }
}

/// The handler method as callable on the (post-merge) target.
pub struct HandlerRef {
    pub owner: String,
    pub name: String,
    pub desc: String,
    pub is_static: bool,
    pub is_interface: bool,
}

impl HandlerRef {
    /// The invocation instruction for this handler.
    pub fn invoke(&self) -> Insn {
        let opcode = if self.is_static {
            Opcode::INVOKESTATIC
        } else if self.is_interface {
            Opcode::INVOKEINTERFACE
        } else {
            Opcode::INVOKEVIRTUAL
        };
        Insn::Method {
            opcode,
            owner: self.owner.clone(),
            name: self.name.clone(),
            desc: self.desc.clone(),
            itf: self.is_interface,
        }
    }

    /// Parameter and return types.
    pub fn signature(&self) -> EngineResult<(Vec<TypeDesc>, TypeDesc)> {
        TypeDesc::parse_method(&self.desc)
            .map_err(|e| EngineError::bytecode(format!("{}::{}", self.owner, self.name), e))
    }
}

/// Splits a `name+desc` member key.
pub fn split_key(key: &str) -> (&str, &str) {
    match key.find('(') {
        Some(at) => (&key[..at], &key[at..]),
        None => (key, ""),
    }
}

/// Looks up a method of `class` by key, mutably.
pub fn method_mut<'a>(class: &'a mut ClassNode, key: &str) -> Option<&'a mut MethodNode> {
    let (name, desc) = split_key(key);
    class.find_method_mut(name, desc)
}

/// Emits the call sequence for a handler consuming the values currently on
/// the stack (`stack_types`, bottom to top).
///
/// A static handler consumes the operands exactly where they are. An
/// instance handler needs the receiver underneath, so the operands spill
/// into fresh locals, `this` is pushed, and the operands reload.
pub fn call_with_stack_args(
    method: &mut MethodNode,
    stack_types: &[TypeDesc],
    handler: &HandlerRef,
) -> Vec<Insn> {
    let mut insns = Vec::new();
    if handler.is_static {
        insns.push(handler.invoke());
        return insns;
    }
    let mut locals: Vec<(u16, TypeDesc)> = Vec::new();
    for ty in stack_types.iter().rev() {
        let index = method.allocate_local(ty);
        insns.push(Insn::Var {
            opcode: ty.store_opcode(),
            index,
        });
        locals.push((index, ty.clone()));
    }
    insns.push(Insn::Var {
        opcode: Opcode::ALOAD,
        index: 0,
    });
    for (index, ty) in locals.iter().rev() {
        insns.push(Insn::Var {
            opcode: ty.load_opcode(),
            index: *index,
        });
    }
    insns.push(handler.invoke());
    insns
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixin_bytecode::AccessFlags;

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("update(IZ)V"), ("update", "(IZ)V"));
        assert_eq!(split_key("nodesc"), ("nodesc", ""));
    }

    #[test]
    fn test_static_handler_consumes_in_place() {
        let mut method = MethodNode::new(AccessFlags::PUBLIC, "m", "()V");
        let handler = HandlerRef {
            owner: "a/T".to_string(),
            name: "h".to_string(),
            desc: "(I)I".to_string(),
            is_static: true,
            is_interface: false,
        };
        let insns = call_with_stack_args(&mut method, &[TypeDesc::Int], &handler);
        assert_eq!(insns.len(), 1);
        assert!(matches!(
            &insns[0],
            Insn::Method { opcode: Opcode::INVOKESTATIC, .. }
        ));
    }

    #[test]
    fn test_instance_handler_spills() {
        let mut method = MethodNode::new(AccessFlags::PUBLIC, "m", "()V");
        method.max_locals = 1;
        let handler = HandlerRef {
            owner: "a/T".to_string(),
            name: "h".to_string(),
            desc: "(IJ)V".to_string(),
            is_static: false,
            is_interface: false,
        };
        let insns = call_with_stack_args(&mut method, &[TypeDesc::Int, TypeDesc::Long], &handler);
        // store J, store I, aload this, load I, load J, invoke
        assert_eq!(insns.len(), 6);
        assert!(matches!(insns[0], Insn::Var { opcode: Opcode::LSTORE, .. }));
        assert!(matches!(insns[1], Insn::Var { opcode: Opcode::ISTORE, .. }));
        assert!(matches!(insns[2], Insn::Var { opcode: Opcode::ALOAD, index: 0 }));
        assert!(matches!(
            insns.last(),
            Some(Insn::Method { opcode: Opcode::INVOKEVIRTUAL, .. })
        ));
        assert_eq!(method.max_locals, 4);
    }
}
