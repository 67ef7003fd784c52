//! Mixin configuration surface.
//!
//! Configuration documents name a package of mixins, their targets' phase,
//! a priority and an optional companion plugin. Registered configurations
//! accumulate in the [`ConfigRegistry`] until the engine drains them at the
//! matching phase transition.

pub mod document;
pub mod error;
pub mod plugin;
pub mod registry;

pub use document::{ConfigDocument, MixinConfig, DEFAULT_PRIORITY};
pub use error::{ConfigError, ConfigResult};
pub use plugin::{MixinConfigPlugin, NullPlugin, NullPluginFactory, PluginFactory};
pub use registry::ConfigRegistry;
