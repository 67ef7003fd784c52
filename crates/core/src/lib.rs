//! Core primitives for the mixin engine.
//!
//! This crate provides the pieces every other engine crate leans on: the
//! process environment (side, phase, option flags), the shared blackboard,
//! the member reference grammar used by annotations, and the constraint
//! predicate language evaluated against environment tokens.

pub mod blackboard;
pub mod constraint;
pub mod environment;
pub mod error;
pub mod phase;
pub mod reference;

pub use blackboard::{keys, Blackboard};
pub use constraint::Constraint;
pub use environment::{CompatibilityLevel, EnvOptions, MixinEnvironment, MixinSide};
pub use error::{CoreError, CoreResult};
pub use phase::MixinPhase;
pub use reference::MemberRef;

/// Version string of the mixin subsystem, published on the blackboard.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
