//! Companion plugin surface.
//!
//! A configuration may name a plugin that steers mixin selection and
//! observes application. Plugins are supplied by the host through a
//! [`PluginFactory`]; the engine never instantiates them reflectively.

use mixin_bytecode::ClassNode;

/// Host-implemented hook attached to one configuration.
///
/// Every method has an identity default, so a plugin implements only the
/// callouts it cares about; an absent plugin behaves exactly like the
/// defaults.
pub trait MixinConfigPlugin: Send {
    /// Called once when the owning configuration is consumed.
    fn on_load(&mut self, mixin_package: &str) {
        let _ = mixin_package;
    }

    /// Overrides the configuration's reference map resource.
    fn get_ref_mapper_config(&self) -> Option<String> {
        None
    }

    /// Accepts or rejects one mixin for one discovered target.
    fn should_apply_mixin(&self, target_class: &str, mixin_class: &str) -> bool {
        let _ = (target_class, mixin_class);
        true
    }

    /// Observes the union of this configuration's targets with the rest of
    /// the system's.
    fn accept_targets(&self, my_targets: &[String], other_targets: &[String]) {
        let _ = (my_targets, other_targets);
    }

    /// Contributes additional mixin class names.
    fn get_mixins(&self) -> Option<Vec<String>> {
        None
    }

    /// Called immediately before one mixin is applied to a target.
    fn pre_apply(&self, target_class: &str, class: &mut ClassNode, mixin_class: &str) {
        let _ = (target_class, class, mixin_class);
    }

    /// Called immediately after one mixin was applied to a target.
    fn post_apply(&self, target_class: &str, class: &mut ClassNode, mixin_class: &str) {
        let _ = (target_class, class, mixin_class);
    }
}

/// The identity plugin.
pub struct NullPlugin;

impl MixinConfigPlugin for NullPlugin {}

/// Resolves plugin class names to instances.
pub trait PluginFactory: Send + Sync {
    /// Creates the plugin registered under `class_name`, or `None` when the
    /// host knows no such plugin.
    fn create(&self, class_name: &str) -> Option<Box<dyn MixinConfigPlugin>>;
}

/// A factory that knows no plugins.
pub struct NullPluginFactory;

impl PluginFactory for NullPluginFactory {
    fn create(&self, _class_name: &str) -> Option<Box<dyn MixinConfigPlugin>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_plugin_is_identity() {
        let plugin = NullPlugin;
        assert!(plugin.should_apply_mixin("a/B", "m/MixinB"));
        assert!(plugin.get_ref_mapper_config().is_none());
        assert!(plugin.get_mixins().is_none());
    }
}
