//! The engine and its transformer entry point.
//!
//! One [`MixinEngine`] owns the configuration registry, the metadata
//! cache, the parsed mixin set and the target index. `transform` is the
//! host-facing entry: identity for untargeted classes, the merged result
//! for targeted ones, and the original bytes whenever a non-required
//! mixin fails.

use crate::applicator::{self, ApplyHooks};
use crate::error::{Diagnostic, EngineError, EngineResult};
use crate::info::MixinInfo;
use log::{debug, error, info, warn};
use mixin_bytecode::{emit_class_with, parse_class, ClassNode, NoFrames};
use mixin_config::{ConfigRegistry, MixinConfig, NullPluginFactory, PluginFactory};
use mixin_core::{keys, Blackboard, MixinEnvironment, MixinPhase};
use mixin_metadata::{ClassInfo, ClassInfoCache, ClassSource};
use mixin_refmap::{RefMap, RefMapper};
use once_cell::sync::OnceCell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Supplies non-class resources (configurations, reference maps) by name.
pub trait ResourceProvider: Send + Sync {
    fn resource(&self, name: &str) -> Option<Vec<u8>>;
}

/// A provider with no resources.
pub struct EmptyResourceProvider;

impl ResourceProvider for EmptyResourceProvider {
    fn resource(&self, _name: &str) -> Option<Vec<u8>> {
        None
    }
}

/// An in-memory provider for tests and embedded hosts.
#[derive(Default)]
pub struct MapResourceProvider {
    resources: HashMap<String, Vec<u8>>,
}

impl MapResourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>, B: Into<Vec<u8>>>(&mut self, name: S, bytes: B) {
        self.resources.insert(name.into(), bytes.into());
    }
}

impl ResourceProvider for MapResourceProvider {
    fn resource(&self, name: &str) -> Option<Vec<u8>> {
        self.resources.get(name).cloned()
    }
}

struct SharedSource(Arc<dyn ClassSource>);

impl ClassSource for SharedSource {
    fn class_bytes(&self, internal_name: &str) -> Option<Vec<u8>> {
        self.0.class_bytes(internal_name)
    }
}

thread_local! {
    // Per-thread transformation stack for re-entrance detection.
    static IN_PROGRESS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

struct ReentranceGuard;

impl ReentranceGuard {
    fn enter(name: &str) -> Option<ReentranceGuard> {
        IN_PROGRESS.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.iter().any(|n| n == name) {
                return None;
            }
            stack.push(name.to_string());
            Some(ReentranceGuard)
        })
    }
}

impl Drop for ReentranceGuard {
    fn drop(&mut self) {
        IN_PROGRESS.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

static GLOBAL_ENGINE: OnceCell<MixinEngine> = OnceCell::new();

/// The mixin application engine.
pub struct MixinEngine {
    env: MixinEnvironment,
    cache: Arc<ClassInfoCache>,
    source: Arc<dyn ClassSource>,
    resources: Arc<dyn ResourceProvider>,
    plugin_factory: Box<dyn PluginFactory>,
    registry: Mutex<ConfigRegistry>,
    /// Target internal name -> mixins, in registration order
    targets: Mutex<HashMap<String, Vec<Arc<MixinInfo>>>>,
    /// Per-config reference mappers keyed by config name
    refmappers: Mutex<HashMap<String, Arc<RefMapper>>>,
    phase: Mutex<MixinPhase>,
    refmap_context: Mutex<Option<String>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
    generated: Mutex<Vec<ClassNode>>,
    blackboard: Arc<Blackboard>,
}

impl MixinEngine {
    /// Creates an engine over the given class and resource sources.
    pub fn new(
        env: MixinEnvironment,
        source: Arc<dyn ClassSource>,
        resources: Arc<dyn ResourceProvider>,
        plugin_factory: Box<dyn PluginFactory>,
    ) -> Self {
        let cache = Arc::new(ClassInfoCache::new(Box::new(SharedSource(source.clone()))));
        let blackboard = Arc::new(Blackboard::new());
        blackboard.put(keys::INIT, mixin_core::VERSION.to_string());
        Self {
            env,
            cache,
            source,
            resources,
            plugin_factory,
            registry: Mutex::new(ConfigRegistry::new()),
            targets: Mutex::new(HashMap::new()),
            refmappers: Mutex::new(HashMap::new()),
            // Hosts driving explicit phases wind this back with
            // `advance_phase`; everyone else gets default-phase draining
            // on first transform.
            phase: Mutex::new(MixinPhase::Default),
            refmap_context: Mutex::new(None),
            diagnostics: Mutex::new(Vec::new()),
            generated: Mutex::new(Vec::new()),
            blackboard,
        }
    }

    /// A bare engine for tests: empty sources, identity plugins.
    pub fn for_tests(env: MixinEnvironment, source: Arc<dyn ClassSource>) -> Self {
        Self::new(
            env,
            source,
            Arc::new(EmptyResourceProvider),
            Box::new(NullPluginFactory),
        )
    }

    /// Installs `engine` as the process-wide instance.
    pub fn install(engine: MixinEngine) -> Result<&'static MixinEngine, MixinEngine> {
        engine
            .blackboard
            .put(keys::TRANSFORMER, "mixin-engine".to_string());
        GLOBAL_ENGINE.set(engine)?;
        match GLOBAL_ENGINE.get() {
            Some(installed) => Ok(installed),
            None => unreachable!("engine installed on the line above"),
        }
    }

    /// The installed process-wide engine, if any.
    pub fn global() -> Option<&'static MixinEngine> {
        GLOBAL_ENGINE.get()
    }

    /// The engine's blackboard.
    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    /// The engine's environment.
    pub fn environment(&self) -> &MixinEnvironment {
        &self.env
    }

    /// Selects the reference map context for subsequent apply cycles.
    pub fn set_refmap_context(&self, context: Option<String>) {
        *self
            .refmap_context
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = context;
    }

    /// Registers a configuration from the resource provider.
    pub fn register_config(&self, resource_name: &str) -> EngineResult<()> {
        let bytes = self.resources.resource(resource_name).ok_or_else(|| {
            EngineError::Configuration {
                source: mixin_config::ConfigError::malformed(
                    resource_name.to_string(),
                    "resource not found".to_string(),
                ),
            }
        })?;
        let json = String::from_utf8_lossy(&bytes).into_owned();
        self.register_config_source(resource_name, &json)
    }

    /// Registers a configuration from an in-memory document.
    pub fn register_config_source(&self, name: &str, json: &str) -> EngineResult<()> {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.register(name, json, mixin_core::VERSION)?;
        self.blackboard.put(keys::CONFIGS, registry.names());
        Ok(())
    }

    /// Number of configurations not yet consumed.
    pub fn unvisited_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unvisited_count()
    }

    /// Announces a phase transition, draining pending configurations for
    /// every phase up to and including `phase`.
    pub fn advance_phase(&self, phase: MixinPhase) -> EngineResult<()> {
        {
            let mut current = self.phase.lock().unwrap_or_else(|e| e.into_inner());
            if phase > *current {
                *current = phase;
            }
        }
        for step in MixinPhase::ALL {
            if step <= phase {
                self.drain_phase(step)?;
            }
        }
        Ok(())
    }

    fn drain_phase(&self, phase: MixinPhase) -> EngineResult<()> {
        let mut drained: Vec<(String, bool, i32, Vec<String>, Option<String>)> = Vec::new();
        {
            let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.drain_for_phase(phase, self.plugin_factory.as_ref(), |config| {
                let mut mixins = config.mixin_class_names(self.env.side);
                let refmap = effective_refmap(config);
                if let Some(plugin) = &config.plugin {
                    if let Some(extra) = plugin.get_mixins() {
                        mixins.extend(extra);
                    }
                }
                drained.push((
                    config.name.clone(),
                    config.document.required,
                    config.document.priority,
                    mixins,
                    refmap,
                ));
            });
        }
        let mut drained_names = Vec::new();
        for (config_name, required, priority, mixins, refmap) in drained {
            info!(
                "draining config {config_name} for phase {phase}: {} mixins",
                mixins.len()
            );
            let refmapper = self.load_refmapper(&config_name, refmap.as_deref());
            for dotted in mixins {
                if let Err(err) = self.load_mixin(
                    &dotted,
                    &config_name,
                    required,
                    priority,
                    phase,
                    refmapper.clone(),
                ) {
                    self.report(&err, Some(&dotted), None);
                    if required {
                        return Err(err);
                    }
                    warn!("skipping unappliable mixin {dotted}: {err}");
                }
            }
            drained_names.push(config_name);
        }
        if !drained_names.is_empty() {
            self.announce_targets(&drained_names);
        }
        Ok(())
    }

    /// Hands every freshly drained plugin the union of its own targets and
    /// everyone else's.
    fn announce_targets(&self, drained: &[String]) {
        let by_config: HashMap<String, Vec<String>> = {
            let targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());
            let mut by_config: HashMap<String, Vec<String>> = HashMap::new();
            for (target, mixins) in targets.iter() {
                for mixin in mixins {
                    let list = by_config.entry(mixin.config_name.clone()).or_default();
                    if !list.contains(target) {
                        list.push(target.clone());
                    }
                }
            }
            by_config
        };
        let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        for name in drained {
            let Some(config) = registry.iter().find(|c| c.name == *name) else {
                continue;
            };
            let Some(plugin) = &config.plugin else { continue };
            let mine = by_config.get(name).cloned().unwrap_or_default();
            let others: Vec<String> = by_config
                .iter()
                .filter(|(config_name, _)| *config_name != name)
                .flat_map(|(_, targets)| targets.iter().cloned())
                .collect();
            plugin.accept_targets(&mine, &others);
        }
    }

    fn load_refmapper(&self, config_name: &str, resource: Option<&str>) -> Arc<RefMapper> {
        let mut refmappers = self.refmappers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = refmappers.get(config_name) {
            return existing.clone();
        }
        let mapper = match resource {
            None => Arc::new(RefMapper::default_mapper()),
            Some(name) => match self.resources.resource(name) {
                None => {
                    warn!("config {config_name}: refmap resource {name} not found");
                    Arc::new(RefMapper::default_mapper())
                }
                Some(bytes) => match RefMap::load(&String::from_utf8_lossy(&bytes)) {
                    Ok(map) => Arc::new(RefMapper::new(map)),
                    Err(err) => {
                        warn!("config {config_name}: unreadable refmap {name}: {err}");
                        Arc::new(RefMapper::default_mapper())
                    }
                },
            },
        };
        refmappers.insert(config_name.to_string(), mapper.clone());
        mapper
    }

    fn load_mixin(
        &self,
        dotted: &str,
        config_name: &str,
        required: bool,
        priority: i32,
        phase: MixinPhase,
        refmapper: Arc<RefMapper>,
    ) -> EngineResult<()> {
        let internal = dotted.replace('.', "/");
        let bytes = self.source.class_bytes(&internal).ok_or_else(|| {
            EngineError::resolution(
                internal.clone(),
                "mixin class bytes not found".to_string(),
            )
        })?;
        let node = parse_class(&bytes)
            .map_err(|e| EngineError::bytecode(internal.clone(), e))?;

        // Publish the mixin in the cache before target resolution so
        // sibling mixins can see it.
        let mut class_info = ClassInfo::from_node(&node);
        class_info.is_mixin = true;
        self.cache.insert_info(class_info);

        let scope = {
            let context = self
                .refmap_context
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            refmapper.scope_context(context)
        };
        let info = MixinInfo::parse(
            node,
            config_name,
            priority,
            required,
            phase,
            refmapper.clone(),
            &self.cache,
            self.env.options.strict_targets,
        )?;
        drop(scope);

        let info = Arc::new(info);
        let mut targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());
        for target in &info.targets {
            let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            let accepted = registry
                .iter()
                .find(|c| c.name == info.config_name)
                .and_then(|c| c.plugin.as_ref())
                .map_or(true, |plugin| {
                    plugin.should_apply_mixin(target, &info.class_name)
                });
            drop(registry);
            if !accepted {
                debug!(
                    "plugin rejected {} for target {target}",
                    info.class_name
                );
                continue;
            }
            targets.entry(target.clone()).or_default().push(info.clone());
        }
        Ok(())
    }

    /// The transformer entry point.
    ///
    /// Identity for classes no enabled configuration targets; the original
    /// bytes whenever transformation fails non-fatally; an error only when
    /// a required mixin cannot be applied.
    pub fn transform(&self, internal_name: &str, bytes: &[u8]) -> EngineResult<Vec<u8>> {
        let Some(_guard) = ReentranceGuard::enter(internal_name) else {
            warn!("re-entrant transformation of {internal_name} refused");
            self.report(
                &EngineError::Reentrance {
                    target: internal_name.to_string(),
                },
                None,
                Some(internal_name),
            );
            return Ok(bytes.to_vec());
        };

        // Lazily drain the active phase so hosts that never announce
        // phases still get their default-phase configurations.
        let phase = *self.phase.lock().unwrap_or_else(|e| e.into_inner());
        self.advance_phase(phase)?;

        let mixins: Vec<Arc<MixinInfo>> = {
            let targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());
            match targets.get(internal_name) {
                None => return Ok(bytes.to_vec()),
                Some(list) if list.is_empty() => return Ok(bytes.to_vec()),
                Some(list) => list.clone(),
            }
        };

        match self.apply_mixins(internal_name, bytes, &mixins) {
            Ok(transformed) => Ok(transformed),
            Err(err) => {
                self.report(&err, None, Some(internal_name));
                let fatal = mixins.iter().any(|m| m.required);
                if fatal {
                    error!("required mixin failed on {internal_name}: {err}");
                    Err(err)
                } else {
                    warn!("transformation of {internal_name} failed, passing original bytes: {err}");
                    Ok(bytes.to_vec())
                }
            }
        }
    }

    fn apply_mixins(
        &self,
        internal_name: &str,
        bytes: &[u8],
        mixins: &[Arc<MixinInfo>],
    ) -> EngineResult<Vec<u8>> {
        let target = parse_class(bytes)
            .map_err(|e| EngineError::bytecode(internal_name.to_string(), e))?;
        self.cache.insert_info(ClassInfo::from_node(&target));

        // Total order: priority ascending, then declaration order.
        let mut ordered: Vec<&Arc<MixinInfo>> = mixins.iter().collect();
        ordered.sort_by_key(|m| m.priority);

        // Up-front validation lets a broken non-required mixin drop out
        // without half-applying.
        let mut surviving: Vec<&MixinInfo> = Vec::new();
        for mixin in &ordered {
            match applicator::validate_mixin(&target, mixin) {
                Ok(()) => surviving.push(mixin.as_ref()),
                Err(err) if mixin.required => return Err(err),
                Err(err) => {
                    self.report(&err, Some(&mixin.class_name), Some(internal_name));
                    warn!("dropping mixin {} from cycle: {err}", mixin.class_name);
                }
            }
        }
        if surviving.is_empty() {
            return Ok(bytes.to_vec());
        }

        // Scope every involved reference mapper to the engine context for
        // the duration of the cycle.
        let context = self
            .refmap_context
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut scopes = Vec::new();
        let mut seen_mappers: Vec<*const RefMapper> = Vec::new();
        for mixin in &surviving {
            let ptr = Arc::as_ptr(&mixin.refmapper);
            if !seen_mappers.contains(&ptr) {
                seen_mappers.push(ptr);
                scopes.push(mixin.refmapper.scope_context(context.clone()));
            }
        }

        let mut hooks = PluginHooks { engine: self };
        let (transformed, generated) = applicator::apply_cycle(
            &self.cache,
            &self.env,
            target,
            &surviving,
            &mut hooks,
        )?;
        drop(scopes);

        if self.env.options.debug_export {
            for method in &transformed.methods {
                debug!(
                    "export {}::{}\n{}",
                    internal_name,
                    method.name,
                    mixin_bytecode::printer::dump_method(method)
                );
            }
        }

        // Refresh the cache entry and stash synthesized companions.
        self.cache.insert_info(ClassInfo::from_node(&transformed));
        if !generated.is_empty() {
            let mut store = self.generated.lock().unwrap_or_else(|e| e.into_inner());
            store.extend(generated);
        }

        emit_class_with(&transformed, &NoFrames, self.cache.as_ref())
            .map_err(|e| EngineError::bytecode(internal_name.to_string(), e))
    }

    /// Takes the companion classes synthesized since the last call.
    pub fn drain_generated(&self) -> Vec<ClassNode> {
        std::mem::take(&mut self.generated.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Structured diagnostics accumulated so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn report(&self, err: &EngineError, mixin: Option<&str>, target: Option<&str>) {
        let mut diagnostics = self.diagnostics.lock().unwrap_or_else(|e| e.into_inner());
        diagnostics.push(Diagnostic::from_error(err, mixin, target, None));
    }

    /// Tears down every piece of engine state. Test hook.
    pub fn reset(&self) {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset();
        self.targets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.refmappers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.generated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.cache.reset();
        self.blackboard.reset();
    }
}

/// The plugin's refmap override takes precedence over the document's.
fn effective_refmap(config: &MixinConfig) -> Option<String> {
    if let Some(plugin) = &config.plugin {
        if let Some(overridden) = plugin.get_ref_mapper_config() {
            return Some(overridden);
        }
    }
    config.document.refmap.clone()
}

struct PluginHooks<'a> {
    engine: &'a MixinEngine,
}

impl ApplyHooks for PluginHooks<'_> {
    fn pre_apply(&mut self, target: &str, class: &mut ClassNode, mixin: &str) {
        let registry = self
            .engine
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for config in registry.iter() {
            if let Some(plugin) = &config.plugin {
                plugin.pre_apply(target, class, mixin);
            }
        }
    }

    fn post_apply(&mut self, target: &str, class: &mut ClassNode, mixin: &str) {
        let registry = self
            .engine
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for config in registry.iter() {
            if let Some(plugin) = &config.plugin {
                plugin.post_apply(target, class, mixin);
            }
        }
    }
}
