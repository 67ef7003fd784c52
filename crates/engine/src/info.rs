//! Per-mixin parsed metadata.

use crate::annotations as ann;
use crate::error::{EngineError, EngineResult};
use log::debug;
use mixin_bytecode::{AccessFlags, ClassNode, MemberKind};
use mixin_core::MixinPhase;
use mixin_metadata::ClassInfoCache;
use mixin_refmap::RefMapper;
use std::sync::Arc;

/// Default prefix for prefixed shadow members.
pub const DEFAULT_SHADOW_PREFIX: &str = "shadow$";

/// One declared shadow member.
#[derive(Debug, Clone)]
pub struct ShadowInfo {
    /// Name as the target declares it, prefix stripped
    pub name: String,
    /// Name as the mixin declares it
    pub declared_name: String,
    pub desc: String,
    pub kind: MemberKind,
    /// Alternative target names for pseudo mixins
    pub aliases: Vec<String>,
    /// Strip finality from the target member
    pub mutable: bool,
    /// Warn when the target member is not final
    pub require_final: bool,
}

/// What an accessor method resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    FieldGetter,
    FieldSetter,
    MethodProxy,
}

/// One declared accessor or invoker.
#[derive(Debug, Clone)]
pub struct AccessorInfo {
    /// Method name + descriptor on the mixin
    pub method_key: String,
    pub kind: AccessorKind,
    /// Explicit target member name from the annotation, if given
    pub explicit_target: Option<String>,
}

/// One soft-implemented interface.
#[derive(Debug, Clone)]
pub struct SoftImplement {
    /// Internal name of the interface
    pub interface: String,
    /// Member prefix marking implementing methods
    pub prefix: String,
}

/// Role of one mixin member during application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Shadow,
    Overwrite,
    Accessor,
    Injector,
    Merged,
}

/// Parsed metadata of one mixin class.
pub struct MixinInfo {
    /// Internal name of the mixin class
    pub class_name: String,
    /// The mixin's parsed bytecode
    pub node: ClassNode,
    /// Internal names of every declared target
    pub targets: Vec<String>,
    pub priority: i32,
    pub phase: MixinPhase,
    /// Name of the owning configuration
    pub config_name: String,
    /// Failure of this mixin aborts the host
    pub required: bool,
    /// The mixin's superclass is not an ancestor of any target
    pub detached_super: bool,
    pub pseudo: bool,
    /// Class-level unique marker
    pub unique: bool,
    pub shadows: Vec<ShadowInfo>,
    /// Method keys of overwrite methods
    pub overwrites: Vec<String>,
    pub accessors: Vec<AccessorInfo>,
    /// Method keys of injector handler methods
    pub injector_methods: Vec<String>,
    pub soft_implements: Vec<SoftImplement>,
    /// The reference mapper of the owning configuration
    pub refmapper: Arc<RefMapper>,
}

impl MixinInfo {
    /// Parses a mixin class into its metadata.
    #[allow(clippy::too_many_arguments)]
    pub fn parse(
        node: ClassNode,
        config_name: &str,
        config_priority: i32,
        required: bool,
        phase: MixinPhase,
        refmapper: Arc<RefMapper>,
        cache: &ClassInfoCache,
        strict_targets: bool,
    ) -> EngineResult<Self> {
        let class_name = node.name.clone();
        let dotted = class_name.replace('/', ".");
        let marker = ann::mixin_marker(&node).ok_or_else(|| {
            EngineError::resolution(
                class_name.clone(),
                "class carries no mixin marker annotation".to_string(),
            )
        })?;
        let pseudo = ann::is_pseudo(&node);
        let unique = node.annotations().any(|a| a.desc == ann::UNIQUE);
        let priority = marker.get_i32("priority").unwrap_or(config_priority);

        // Explicit class targets plus remappable string targets.
        let mut targets: Vec<String> = Vec::new();
        for value in marker.get_array("value") {
            if let Some(desc) = value.as_class_desc() {
                targets.push(ann::class_value_to_internal(desc));
            }
        }
        for name in marker.get_str_array("targets") {
            let remapped = refmapper.remap(&dotted, name);
            targets.push(ann::class_value_to_internal(&remapped));
        }
        if targets.is_empty() {
            return Err(EngineError::resolution(
                class_name.clone(),
                "mixin declares no targets".to_string(),
            ));
        }

        // Target resolution. Pseudo mixins tolerate unknown targets.
        let mut resolved: Vec<String> = Vec::new();
        for target in targets {
            match cache.for_name(&target) {
                Some(info) => {
                    if info.access.contains(AccessFlags::FINAL) && !pseudo {
                        return Err(EngineError::resolution(
                            class_name.clone(),
                            format!("target {target} is final"),
                        ));
                    }
                    resolved.push(target);
                }
                None if pseudo => {
                    debug!("{class_name}: pseudo target {target} not resolvable, keeping");
                    resolved.push(target);
                }
                None if strict_targets => {
                    return Err(EngineError::resolution(
                        class_name.clone(),
                        format!("target class {target} is not loadable"),
                    ));
                }
                None => {
                    return Err(EngineError::resolution(
                        class_name.clone(),
                        format!("target class {target} could not be resolved"),
                    ));
                }
            }
        }

        // Detached superclass: not an ancestor of any resolved target.
        let detached_super = match &node.super_name {
            Some(super_name) if super_name != "java/lang/Object" => {
                !resolved.iter().any(|target| {
                    cache
                        .has_superclass(target, super_name, mixin_metadata::Traversal::All)
                        .unwrap_or(false)
                })
            }
            _ => false,
        };

        let mut info = Self {
            class_name,
            targets: resolved,
            priority,
            phase,
            config_name: config_name.to_string(),
            required,
            detached_super,
            pseudo,
            unique,
            shadows: Vec::new(),
            overwrites: Vec::new(),
            accessors: Vec::new(),
            injector_methods: Vec::new(),
            soft_implements: Vec::new(),
            refmapper,
            node,
        };
        info.classify_members()?;
        info.parse_soft_implements();
        Ok(info)
    }

    fn classify_members(&mut self) -> EngineResult<()> {
        let mut shadows = Vec::new();
        let mut overwrites = Vec::new();
        let mut accessors = Vec::new();
        let mut injector_methods = Vec::new();

        for field in &self.node.fields {
            if let Some(shadow) = ann::on_field(field, ann::SHADOW) {
                let mutable = ann::on_field(field, ann::MUTABLE).is_some();
                let require_final = ann::on_field(field, ann::FINAL).is_some();
                let prefix = shadow
                    .get_str("prefix")
                    .unwrap_or(DEFAULT_SHADOW_PREFIX)
                    .to_string();
                let declared_name = field.name.clone();
                let name = declared_name
                    .strip_prefix(&prefix)
                    .unwrap_or(&declared_name)
                    .to_string();
                shadows.push(ShadowInfo {
                    name,
                    declared_name,
                    desc: field.desc.clone(),
                    kind: MemberKind::Field,
                    aliases: shadow
                        .get_str_array("aliases")
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                    mutable,
                    require_final,
                });
            }
        }

        for method in &self.node.methods {
            let key = method.member_key();
            if let Some(shadow) = ann::on_method(method, ann::SHADOW) {
                let prefix = shadow
                    .get_str("prefix")
                    .unwrap_or(DEFAULT_SHADOW_PREFIX)
                    .to_string();
                let declared_name = method.name.clone();
                let name = declared_name
                    .strip_prefix(&prefix)
                    .unwrap_or(&declared_name)
                    .to_string();
                shadows.push(ShadowInfo {
                    name,
                    declared_name,
                    desc: method.desc.clone(),
                    kind: MemberKind::Method,
                    aliases: shadow
                        .get_str_array("aliases")
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                    mutable: false,
                    require_final: false,
                });
            } else if ann::on_method(method, ann::OVERWRITE).is_some() {
                overwrites.push(key);
            } else if let Some(accessor) = ann::on_method(method, ann::ACCESSOR) {
                if !method.is_abstract() {
                    return Err(EngineError::resolution(
                        self.class_name.clone(),
                        format!("accessor {key} must be abstract"),
                    ));
                }
                accessors.push(AccessorInfo {
                    method_key: key,
                    kind: accessor_kind_for(&method.name, &method.desc)?,
                    explicit_target: accessor.get_str("value").map(str::to_string),
                });
            } else if let Some(invoker) = ann::on_method(method, ann::INVOKER) {
                if !method.is_abstract() {
                    return Err(EngineError::resolution(
                        self.class_name.clone(),
                        format!("invoker {key} must be abstract"),
                    ));
                }
                accessors.push(AccessorInfo {
                    method_key: key,
                    kind: AccessorKind::MethodProxy,
                    explicit_target: invoker.get_str("value").map(str::to_string),
                });
            } else if ann::injector_annotation(method).is_some() {
                injector_methods.push(key);
            }
        }

        self.shadows = shadows;
        self.overwrites = overwrites;
        self.accessors = accessors;
        self.injector_methods = injector_methods;
        Ok(())
    }

    fn parse_soft_implements(&mut self) {
        let Some(implements) = self
            .node
            .annotations()
            .find(|a| a.desc == ann::IMPLEMENTS)
            .cloned()
        else {
            return;
        };
        for iface in implements.get_annotation_array("value") {
            let Some(desc) = iface.get("iface").and_then(|v| v.as_class_desc()) else {
                continue;
            };
            let prefix = iface.get_str("prefix").unwrap_or_default().to_string();
            self.soft_implements.push(SoftImplement {
                interface: ann::class_value_to_internal(desc),
                prefix,
            });
        }
    }

    /// Simple (unqualified) name of the mixin class.
    pub fn simple_name(&self) -> &str {
        self.class_name
            .rsplit('/')
            .next()
            .unwrap_or(&self.class_name)
    }

    /// Role of a method during application.
    pub fn role_of(&self, method_key: &str) -> MemberRole {
        if self
            .shadows
            .iter()
            .any(|s| s.kind == MemberKind::Method && shadow_key(s) == method_key)
        {
            return MemberRole::Shadow;
        }
        if self.overwrites.iter().any(|k| k == method_key) {
            return MemberRole::Overwrite;
        }
        if self.accessors.iter().any(|a| a.method_key == method_key) {
            return MemberRole::Accessor;
        }
        if self.injector_methods.iter().any(|k| k == method_key) {
            return MemberRole::Injector;
        }
        MemberRole::Merged
    }

    /// Finds the shadow declared for a member name, considering aliases.
    pub fn find_shadow(&self, kind: MemberKind, name: &str) -> Option<&ShadowInfo> {
        self.shadows.iter().find(|s| {
            s.kind == kind && (s.name == name || s.declared_name == name || s.aliases.iter().any(|a| a == name))
        })
    }
}

/// The mixin-declared key of a shadow method (as compiled, with prefix).
fn shadow_key(shadow: &ShadowInfo) -> String {
    format!("{}{}", shadow.declared_name, shadow.desc)
}

/// Infers an accessor's kind from its name and shape.
fn accessor_kind_for(name: &str, desc: &str) -> EngineResult<AccessorKind> {
    let returns_void = desc.ends_with(")V");
    let takes_args = !desc.starts_with("()");
    if (name.starts_with("get") || name.starts_with("is")) && !takes_args && !returns_void {
        Ok(AccessorKind::FieldGetter)
    } else if name.starts_with("set") && takes_args && returns_void {
        Ok(AccessorKind::FieldSetter)
    } else if !takes_args && !returns_void {
        Ok(AccessorKind::FieldGetter)
    } else if takes_args && returns_void {
        Ok(AccessorKind::FieldSetter)
    } else {
        Err(EngineError::resolution(
            name.to_string(),
            format!("accessor shape {desc} is neither getter nor setter"),
        ))
    }
}

impl std::fmt::Debug for MixinInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixinInfo")
            .field("class", &self.class_name)
            .field("targets", &self.targets)
            .field("priority", &self.priority)
            .field("pseudo", &self.pseudo)
            .field("shadows", &self.shadows.len())
            .field("overwrites", &self.overwrites.len())
            .field("accessors", &self.accessors.len())
            .field("injectors", &self.injector_methods.len())
            .finish()
    }
}
