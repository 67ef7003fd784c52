//! The applicator: merges an ordered set of mixins into one target.
//!
//! One apply cycle runs the passes in strict order, each pass visiting
//! every mixin before the next begins: interfaces, fields, methods,
//! initializers, accessors, injector preparation, injector application,
//! post-apply cleanup.

mod accessor;
mod initializer;

use crate::annotations as ann;
use crate::error::{EngineError, EngineResult};
use crate::info::{MixinInfo, ShadowInfo};
use crate::inject::InjectionInfo;
use crate::target_context::TargetContext;
use log::{debug, warn};
use mixin_bytecode::{
    compute_maxs, AccessFlags, AnnotationNode, AnnotationValue, ClassNode, ConstantValue, Insn,
    MemberKind, MethodNode,
};
use mixin_core::MixinEnvironment;
use mixin_metadata::ClassInfoCache;
use std::collections::HashMap;

/// Observer hooks called around each mixin of a cycle.
pub trait ApplyHooks {
    fn pre_apply(&mut self, target: &str, class: &mut ClassNode, mixin: &str) {
        let _ = (target, class, mixin);
    }
    fn post_apply(&mut self, target: &str, class: &mut ClassNode, mixin: &str) {
        let _ = (target, class, mixin);
    }
}

/// The identity hooks.
pub struct NullHooks;

impl ApplyHooks for NullHooks {}

/// Applies `mixins` (already ordered by priority, then declaration order)
/// to `target`, returning the transformed class and any synthesized
/// companion classes.
pub fn apply_cycle(
    cache: &ClassInfoCache,
    env: &MixinEnvironment,
    target: ClassNode,
    mixins: &[&MixinInfo],
    hooks: &mut dyn ApplyHooks,
) -> EngineResult<(ClassNode, Vec<ClassNode>)> {
    let target_name = target.name.clone();
    let mut ctx = TargetContext::new(target);

    for mixin in mixins {
        hooks.pre_apply(&target_name, &mut ctx.class, &mixin.class_name);
    }

    pass_interfaces(cache, &mut ctx, mixins)?;
    pass_fields(&mut ctx, mixins)?;
    pass_methods(env, &mut ctx, mixins)?;
    initializer::pass_initializers(&mut ctx, mixins)?;
    accessor::pass_accessors(&mut ctx, mixins)?;

    let mut injections = pass_prepare_injectors(env, &mut ctx, mixins)?;
    validate_injection_counts(&injections, &target_name)?;
    for injection in &mut injections {
        injection.apply(&mut ctx)?;
    }

    pass_post_apply(env, &mut ctx)?;
    for mixin in mixins {
        hooks.post_apply(&target_name, &mut ctx.class, &mixin.class_name);
    }
    Ok(ctx.finish())
}

/// Validates one mixin against the target before any mutation, so a broken
/// mixin can be dropped from the cycle without half-applying.
pub fn validate_mixin(target: &ClassNode, mixin: &MixinInfo) -> EngineResult<()> {
    for shadow in &mixin.shadows {
        if mixin.pseudo {
            continue;
        }
        let found = match shadow.kind {
            MemberKind::Field => shadow_candidates(shadow)
                .any(|name| target.fields.iter().any(|f| f.name == *name && f.desc == shadow.desc)),
            MemberKind::Method => shadow_candidates(shadow).any(|name| {
                target
                    .methods
                    .iter()
                    .any(|m| m.name == *name && m.desc == shadow.desc)
            }),
        };
        if !found {
            return Err(EngineError::resolution(
                mixin.class_name.clone(),
                format!(
                    "shadow {} {}:{} not found on target {}",
                    match shadow.kind {
                        MemberKind::Field => "field",
                        MemberKind::Method => "method",
                    },
                    shadow.name,
                    shadow.desc,
                    target.name
                ),
            ));
        }
    }
    for overwrite in &mixin.overwrites {
        let (name, desc) = crate::inject::split_key(overwrite);
        if target.find_method(name, desc).is_none() {
            return Err(EngineError::resolution(
                mixin.class_name.clone(),
                format!("overwrite target {overwrite} not found on {}", target.name),
            ));
        }
    }
    Ok(())
}

fn shadow_candidates(shadow: &ShadowInfo) -> impl Iterator<Item = &String> {
    std::iter::once(&shadow.name).chain(shadow.aliases.iter())
}

/// Pass 1: interface union, recorded in the metadata cache.
fn pass_interfaces(
    cache: &ClassInfoCache,
    ctx: &mut TargetContext,
    mixins: &[&MixinInfo],
) -> EngineResult<()> {
    for mixin in mixins {
        let mut added: Vec<String> = Vec::new();
        for itf in mixin
            .node
            .interfaces
            .iter()
            .chain(mixin.soft_implements.iter().map(|s| &s.interface))
        {
            if !ctx.class.interfaces.contains(itf) {
                ctx.class.interfaces.push(itf.clone());
                added.push(itf.clone());
            }
        }
        let logical_super = if mixin.detached_super {
            mixin.node.super_name.as_deref()
        } else {
            None
        };
        if logical_super.is_some() || !added.is_empty() {
            cache.register_mixin_relationships(&ctx.class.name, logical_super, &added)?;
        }
    }
    Ok(())
}

/// Pass 2: field merge with priority conflict resolution; shadow field
/// validation and finality adjustments.
fn pass_fields(ctx: &mut TargetContext, mixins: &[&MixinInfo]) -> EngineResult<()> {
    // Field name -> (mixin, priority) for fields added during this cycle.
    let mut provenance: HashMap<String, (String, i32)> = HashMap::new();

    for mixin in mixins {
        // Shadow finality adjustments.
        for shadow in &mixin.shadows {
            if shadow.kind != MemberKind::Field {
                continue;
            }
            let field = ctx
                .class
                .fields
                .iter_mut()
                .find(|f| shadow_candidates(shadow).any(|n| *n == f.name) && f.desc == shadow.desc);
            let Some(field) = field else { continue };
            if shadow.mutable {
                field.access -= AccessFlags::FINAL;
            } else if shadow.require_final && !field.access.contains(AccessFlags::FINAL) {
                warn!(
                    "{}: shadow field {} is declared final but the target field is not",
                    mixin.class_name, shadow.name
                );
            }
        }

        for field in &mixin.node.fields {
            if mixin.find_shadow(MemberKind::Field, &field.name).is_some() {
                continue;
            }
            match ctx.class.fields.iter().position(|f| f.name == field.name) {
                None => {
                    let mut merged = field.clone();
                    mark_merged(&mut merged.invisible_annotations, mixin);
                    ann::strip_mixin_annotations(&mut merged.visible_annotations);
                    provenance
                        .insert(field.name.clone(), (mixin.class_name.clone(), mixin.priority));
                    ctx.class.fields.push(merged);
                }
                Some(position) => match provenance.get(&field.name) {
                    None => {
                        return Err(EngineError::apply(
                            ctx.class.name.clone(),
                            format!(
                                "mixin {} adds field {} which the target already declares",
                                mixin.class_name, field.name
                            ),
                        ));
                    }
                    Some((other_mixin, other_priority)) => {
                        if mixin.priority == *other_priority {
                            return Err(EngineError::apply(
                                ctx.class.name.clone(),
                                format!(
                                    "field {} contributed by both {} and {} at priority {}",
                                    field.name, other_mixin, mixin.class_name, mixin.priority
                                ),
                            ));
                        }
                        if mixin.priority > *other_priority {
                            let mut merged = field.clone();
                            mark_merged(&mut merged.invisible_annotations, mixin);
                            ann::strip_mixin_annotations(&mut merged.visible_annotations);
                            ctx.class.fields[position] = merged;
                            provenance.insert(
                                field.name.clone(),
                                (mixin.class_name.clone(), mixin.priority),
                            );
                        }
                    }
                },
            }
        }
    }
    Ok(())
}

/// Pass 3: method merge.
fn pass_methods(
    env: &MixinEnvironment,
    ctx: &mut TargetContext,
    mixins: &[&MixinInfo],
) -> EngineResult<()> {
    for mixin in mixins {
        let simple = mixin.simple_name().to_string();
        for method in &mixin.node.methods {
            let key = method.member_key();
            match mixin.role_of(&key) {
                crate::info::MemberRole::Shadow | crate::info::MemberRole::Accessor => continue,
                crate::info::MemberRole::Overwrite => {
                    merge_overwrite(ctx, mixin, method)?;
                }
                crate::info::MemberRole::Injector => {
                    merge_handler(ctx, mixin, method, &simple)?;
                }
                crate::info::MemberRole::Merged => {
                    if method.is_ctor() || method.is_clinit() {
                        continue; // constructors feed the initializer pass
                    }
                    merge_plain(env, ctx, mixin, method, &simple)?;
                }
            }
        }
        rename_soft_implements(ctx, mixin)?;
    }
    Ok(())
}

fn merge_overwrite(
    ctx: &mut TargetContext,
    mixin: &MixinInfo,
    method: &MethodNode,
) -> EngineResult<()> {
    let target_name = ctx.class.name.clone();
    let existing = ctx
        .class
        .find_method_mut(&method.name, &method.desc)
        .ok_or_else(|| {
            EngineError::resolution(
                mixin.class_name.clone(),
                format!("overwrite target {} vanished", method.member_key()),
            )
        })?;
    if let Some(previous) = merged_priority(existing) {
        if previous > mixin.priority {
            warn!(
                "{}: refusing overwrite of {} merged at higher priority {previous}",
                mixin.class_name,
                method.member_key()
            );
            return Ok(());
        }
    }
    let mut replacement = rewrite_owner(method, mixin, &target_name);
    replacement.access = existing.access;
    mark_merged(&mut replacement.invisible_annotations, mixin);
    ann::strip_mixin_annotations(&mut replacement.visible_annotations);
    *existing = replacement;
    debug!(
        "{}: overwrote {}::{}",
        mixin.class_name,
        target_name,
        method.name
    );
    Ok(())
}

fn merge_handler(
    ctx: &mut TargetContext,
    mixin: &MixinInfo,
    method: &MethodNode,
    simple: &str,
) -> EngineResult<()> {
    let target_name = ctx.class.name.clone();
    let mut merged = rewrite_owner(method, mixin, &target_name);
    let final_name = if ctx.class.find_method(&method.name, &method.desc).is_some() {
        format!("{simple}${}", method.name)
    } else {
        method.name.clone()
    };
    merged.name = final_name.clone();
    mark_merged(&mut merged.invisible_annotations, mixin);
    ann::strip_mixin_annotations(&mut merged.visible_annotations);
    ctx.merged_names.insert(method.member_key(), final_name);
    ctx.class.methods.push(merged);
    Ok(())
}

fn merge_plain(
    env: &MixinEnvironment,
    ctx: &mut TargetContext,
    mixin: &MixinInfo,
    method: &MethodNode,
    simple: &str,
) -> EngineResult<()> {
    let target_name = ctx.class.name.clone();
    let Some(position) = ctx
        .class
        .methods
        .iter()
        .position(|m| m.name == method.name && m.desc == method.desc)
    else {
        let mut merged = rewrite_owner(method, mixin, &target_name);
        mark_merged(&mut merged.invisible_annotations, mixin);
        ann::strip_mixin_annotations(&mut merged.visible_annotations);
        ctx.class.methods.push(merged);
        return Ok(());
    };

    let existing = &ctx.class.methods[position];
    let unique =
        mixin.unique || ann::on_method(method, ann::UNIQUE).is_some();

    // Identical synthetic bridges deduplicate silently.
    if method.is_bridge() && existing.is_bridge() {
        if bridges_equivalent(existing, method, mixin, &target_name) {
            return Ok(());
        }
        return Err(EngineError::apply(
            target_name,
            format!(
                "conflicting bridge methods for {} from {}",
                method.member_key(),
                mixin.class_name
            ),
        ));
    }

    if unique {
        if method.access.contains(AccessFlags::PUBLIC) {
            if env.options.strict_unique {
                return Err(EngineError::apply(
                    target_name,
                    format!(
                        "unique public method {} from {} collides with the target",
                        method.member_key(),
                        mixin.class_name
                    ),
                ));
            }
            warn!(
                "{}: discarding unique public method {} which collides on {}",
                mixin.class_name,
                method.member_key(),
                target_name
            );
            return Ok(());
        }
        let mut merged = rewrite_owner(method, mixin, &target_name);
        merged.name = format!("{simple}${}", method.name);
        mark_merged(&mut merged.invisible_annotations, mixin);
        ann::strip_mixin_annotations(&mut merged.visible_annotations);
        ctx.merged_names
            .insert(method.member_key(), merged.name.clone());
        ctx.class.methods.push(merged);
        return Ok(());
    }

    match merged_priority(existing) {
        Some(previous) if mixin.priority > previous => {
            let mut replacement = rewrite_owner(method, mixin, &target_name);
            mark_merged(&mut replacement.invisible_annotations, mixin);
            ann::strip_mixin_annotations(&mut replacement.visible_annotations);
            ctx.class.methods[position] = replacement;
            Ok(())
        }
        Some(previous) if mixin.priority < previous => Ok(()),
        Some(_) => Err(EngineError::apply(
            target_name,
            format!(
                "method {} contributed twice at priority {}",
                method.member_key(),
                mixin.priority
            ),
        )),
        None => Err(EngineError::apply(
            target_name,
            format!(
                "mixin {} collides with target method {} and declares no overwrite",
                mixin.class_name,
                method.member_key()
            ),
        )),
    }
}

/// Soft-implements: prefixed members rename to their interface names.
fn rename_soft_implements(ctx: &mut TargetContext, mixin: &MixinInfo) -> EngineResult<()> {
    for soft in &mixin.soft_implements {
        if soft.prefix.is_empty() {
            continue;
        }
        let mut renames: Vec<(String, String)> = Vec::new();
        for method in &mut ctx.class.methods {
            let stripped = match method.name.strip_prefix(&soft.prefix) {
                Some(stripped) => stripped.to_string(),
                None => continue,
            };
            if merged_by(method) == Some(mixin.class_name.clone()) {
                renames.push((method.name.clone(), stripped.clone()));
                method.name = stripped;
            }
        }
        // Callers inside this class follow the rename.
        let class_name = ctx.class.name.clone();
        for (old, new) in &renames {
            for method in &mut ctx.class.methods {
                let ids: Vec<_> = method.instructions.iter().map(|(id, _)| id).collect();
                for id in ids {
                    if let Some(Insn::Method {
                        opcode,
                        owner,
                        name,
                        desc,
                        itf,
                    }) = method.instructions.get(id).cloned()
                    {
                        if owner == class_name && &name == old {
                            let _ = method.instructions.replace(
                                id,
                                Insn::Method {
                                    opcode,
                                    owner,
                                    name: new.clone(),
                                    desc,
                                    itf,
                                },
                            );
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Pass 6: parse and prepare every injector, in mixin order then
/// declaration order.
fn pass_prepare_injectors(
    env: &MixinEnvironment,
    ctx: &mut TargetContext,
    mixins: &[&MixinInfo],
) -> EngineResult<Vec<InjectionInfo>> {
    let mut injections = Vec::new();
    for mixin in mixins {
        for method in &mixin.node.methods {
            if !mixin
                .injector_methods
                .iter()
                .any(|k| *k == method.member_key())
            {
                continue;
            }
            let Some(mut injection) =
                InjectionInfo::parse(&mixin.class_name, method, &mixin.refmapper)?
            else {
                continue;
            };
            injection.check_constraints(env)?;
            injection.prepare(ctx)?;
            injections.push(injection);
        }
    }
    Ok(injections)
}

/// Count validation with group pooling: injectors sharing a group name
/// satisfy `require` from the pooled total.
fn validate_injection_counts(
    injections: &[InjectionInfo],
    target_name: &str,
) -> EngineResult<()> {
    let mut group_totals: HashMap<&str, usize> = HashMap::new();
    for injection in injections {
        if let Some(group) = &injection.group {
            *group_totals.entry(group.as_str()).or_default() += injection.total_matches();
        }
    }
    for injection in injections {
        let pooled = match &injection.group {
            Some(group) => group_totals.get(group.as_str()).copied().unwrap_or(0),
            None => injection.total_matches(),
        };
        injection.validate_counts(pooled, target_name)?;
    }
    Ok(())
}

/// Pass 8: strip metadata, recompute limits, optionally verify.
fn pass_post_apply(env: &MixinEnvironment, ctx: &mut TargetContext) -> EngineResult<()> {
    let target_name = ctx.class.name.clone();
    for field in &mut ctx.class.fields {
        ann::strip_mixin_annotations(&mut field.visible_annotations);
    }
    for method in &mut ctx.class.methods {
        ann::strip_mixin_annotations(&mut method.visible_annotations);
        if method.instructions.is_empty() {
            continue;
        }
        let (stack, locals) = compute_maxs(method, &target_name).map_err(|e| {
            if env.options.debug_verify {
                EngineError::verification(target_name.clone(), e.to_string())
            } else {
                EngineError::bytecode(format!("{target_name}::{}", method.name), e)
            }
        })?;
        method.max_stack = stack;
        method.max_locals = method.max_locals.max(locals);
    }
    Ok(())
}

/// Clones a mixin method, rewriting self-references to the target and
/// resolving prefixed or aliased shadow references.
fn rewrite_owner(method: &MethodNode, mixin: &MixinInfo, target: &str) -> MethodNode {
    let mut merged = method.clone();
    let ids: Vec<_> = merged.instructions.iter().map(|(id, _)| id).collect();
    for id in ids {
        let Some(insn) = merged.instructions.get(id).cloned() else {
            continue;
        };
        let rewritten = match insn {
            Insn::Field {
                opcode,
                owner,
                name,
                desc,
            } if owner == mixin.class_name => {
                let name = mixin
                    .find_shadow(MemberKind::Field, &name)
                    .map(|s| s.name.clone())
                    .unwrap_or(name);
                Insn::Field {
                    opcode,
                    owner: target.to_string(),
                    name,
                    desc,
                }
            }
            Insn::Method {
                opcode,
                owner,
                name,
                desc,
                itf,
            } if owner == mixin.class_name => {
                let name = mixin
                    .find_shadow(MemberKind::Method, &name)
                    .map(|s| s.name.clone())
                    .unwrap_or(name);
                Insn::Method {
                    opcode,
                    owner: target.to_string(),
                    name,
                    desc,
                    itf,
                }
            }
            Insn::Type { opcode, class } if class == mixin.class_name => Insn::Type {
                opcode,
                class: target.to_string(),
            },
            other => other,
        };
        let _ = merged.instructions.replace(id, rewritten);
    }
    merged
}

/// Structural equivalence of two bridge methods, modulo owner rewriting.
fn bridges_equivalent(
    existing: &MethodNode,
    incoming: &MethodNode,
    mixin: &MixinInfo,
    target: &str,
) -> bool {
    let rewritten = rewrite_owner(incoming, mixin, target);
    if existing.instructions.len() != rewritten.instructions.len() {
        return false;
    }
    existing
        .instructions
        .iter()
        .zip(rewritten.instructions.iter())
        .all(|((_, a), (_, b))| match (a, b) {
            // Labels carry list-local identity, compare shape only.
            (Insn::Label(_), Insn::Label(_)) => true,
            (Insn::Jump { opcode: a, .. }, Insn::Jump { opcode: b, .. }) => a == b,
            (a, b) => a == b,
        })
}

/// Stamps the merge marker annotation.
fn mark_merged(annotations: &mut Vec<AnnotationNode>, mixin: &MixinInfo) {
    let mut marker = AnnotationNode::new(ann::MERGED);
    marker.set(
        "mixin",
        AnnotationValue::Const(ConstantValue::String(mixin.class_name.clone())),
    );
    marker.set(
        "priority",
        AnnotationValue::Const(ConstantValue::Int(mixin.priority)),
    );
    annotations.push(marker);
}

/// The priority a method was merged at, where it carries the marker.
fn merged_priority(method: &MethodNode) -> Option<i32> {
    method
        .annotations()
        .find(|a| a.desc == ann::MERGED)
        .and_then(|a| a.get_i32("priority"))
}

/// The mixin a method was merged from, where it carries the marker.
fn merged_by(method: &MethodNode) -> Option<String> {
    method
        .annotations()
        .find(|a| a.desc == ann::MERGED)
        .and_then(|a| a.get_str("mixin"))
        .map(str::to_string)
}
