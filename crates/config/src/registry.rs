//! The configuration registry.
//!
//! Registered configurations accumulate in a pending set; the engine drains
//! them per phase, attaching companion plugins as they are consumed.

use crate::document::MixinConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::plugin::PluginFactory;
use log::{info, warn};
use mixin_core::MixinPhase;

/// Process-wide set of mixin configurations.
#[derive(Default)]
pub struct ConfigRegistry {
    configs: Vec<MixinConfig>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a configuration parsed from `json`.
    ///
    /// Duplicate names are rejected so a configuration cannot apply twice.
    pub fn register(&mut self, name: &str, json: &str, engine_version: &str) -> ConfigResult<()> {
        if self.configs.iter().any(|c| c.name == name) {
            return Err(ConfigError::Duplicate {
                name: name.to_string(),
            });
        }
        let config = MixinConfig::load(name, json, engine_version)?;
        info!(
            "registered mixin config {name} (package {}, phase {})",
            config.document.package, config.phase
        );
        self.configs.push(config);
        Ok(())
    }

    /// Number of configurations the engine has not consumed yet.
    pub fn unvisited_count(&self) -> usize {
        self.configs.iter().filter(|c| !c.visited).count()
    }

    /// All registered configuration names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.configs.iter().map(|c| c.name.clone()).collect()
    }

    /// Iterates every configuration.
    pub fn iter(&self) -> impl Iterator<Item = &MixinConfig> {
        self.configs.iter()
    }

    /// Iterates every configuration mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MixinConfig> {
        self.configs.iter_mut()
    }

    /// Marks unvisited configurations of `phase` visited and hands them to
    /// `consume`, attaching plugins from `factory` first.
    pub fn drain_for_phase(
        &mut self,
        phase: MixinPhase,
        factory: &dyn PluginFactory,
        mut consume: impl FnMut(&mut MixinConfig),
    ) -> usize {
        let mut drained = 0;
        for config in &mut self.configs {
            if config.visited || config.phase != phase {
                continue;
            }
            config.visited = true;
            if let Some(plugin_name) = config.document.plugin.clone() {
                match factory.create(&plugin_name) {
                    Some(mut plugin) => {
                        plugin.on_load(&config.document.package);
                        config.plugin = Some(plugin);
                    }
                    None => {
                        warn!(
                            "config {}: no factory entry for plugin {plugin_name}, using identity behaviour",
                            config.name
                        );
                    }
                }
            }
            consume(config);
            drained += 1;
        }
        drained
    }

    /// Drops every configuration. Teardown hook.
    pub fn reset(&mut self) {
        self.configs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{MixinConfigPlugin, NullPluginFactory, PluginFactory};

    fn sample(package: &str, target: Option<&str>) -> String {
        match target {
            Some(target) => format!(
                r#"{{"package": "{package}", "mixins": ["A"], "target": "{target}"}}"#
            ),
            None => format!(r#"{{"package": "{package}", "mixins": ["A"]}}"#),
        }
    }

    #[test]
    fn test_register_and_duplicate() {
        let mut registry = ConfigRegistry::new();
        registry.register("a.json", &sample("a", None), "0.4.0").unwrap();
        assert!(matches!(
            registry.register("a.json", &sample("a", None), "0.4.0"),
            Err(ConfigError::Duplicate { .. })
        ));
        assert_eq!(registry.unvisited_count(), 1);
    }

    #[test]
    fn test_drain_per_phase() {
        let mut registry = ConfigRegistry::new();
        registry
            .register("init.json", &sample("a", Some("@init")), "0.4.0")
            .unwrap();
        registry.register("def.json", &sample("b", None), "0.4.0").unwrap();

        let mut seen = Vec::new();
        let drained = registry.drain_for_phase(MixinPhase::Init, &NullPluginFactory, |c| {
            seen.push(c.name.clone())
        });
        assert_eq!(drained, 1);
        assert_eq!(seen, vec!["init.json".to_string()]);
        assert_eq!(registry.unvisited_count(), 1);

        // Draining the same phase again is a no-op.
        let drained = registry.drain_for_phase(MixinPhase::Init, &NullPluginFactory, |_| {});
        assert_eq!(drained, 0);

        let drained = registry.drain_for_phase(MixinPhase::Default, &NullPluginFactory, |_| {});
        assert_eq!(drained, 1);
        assert_eq!(registry.unvisited_count(), 0);
    }

    #[test]
    fn test_plugin_attached_on_drain() {
        struct Recording;
        impl MixinConfigPlugin for Recording {}
        struct Factory;
        impl PluginFactory for Factory {
            fn create(&self, class_name: &str) -> Option<Box<dyn MixinConfigPlugin>> {
                (class_name == "com.example.Plugin").then(|| Box::new(Recording) as Box<_>)
            }
        }

        let mut registry = ConfigRegistry::new();
        let json =
            r#"{"package": "a", "mixins": ["A"], "plugin": "com.example.Plugin"}"#;
        registry.register("p.json", json, "0.4.0").unwrap();
        registry.drain_for_phase(MixinPhase::Default, &Factory, |config| {
            assert!(config.plugin.is_some());
        });
    }
}
