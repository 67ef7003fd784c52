//! The mixin application engine.
//!
//! Composes independently authored class fragments into target classes at
//! load time: metadata discovery over bytecode annotations, priority-based
//! merging of fields, methods, interfaces and initializers, declarative
//! injection points with instruction-identity tracking, and a re-entrance
//! safe transformer entry point.

pub mod annotations;
pub mod applicator;
pub mod engine;
pub mod error;
pub mod info;
pub mod inject;
pub mod locals;
pub mod point;
pub mod target_context;

pub use applicator::{apply_cycle, validate_mixin, ApplyHooks, NullHooks};
pub use engine::{
    EmptyResourceProvider, MapResourceProvider, MixinEngine, ResourceProvider,
};
pub use error::{Diagnostic, EngineError, EngineResult};
pub use info::{AccessorInfo, AccessorKind, MemberRole, MixinInfo, ShadowInfo, SoftImplement};
pub use inject::{InjectionInfo, InjectorKind, LocalCapture};
pub use locals::Discriminator;
pub use point::{InjectionPointData, PointKind, Shift, SliceRange, Suffix};
pub use target_context::{InjectionNode, InjectionNodeRegistry, TargetContext};
