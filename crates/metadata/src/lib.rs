//! Class metadata cache for the mixin engine.
//!
//! Per-class summaries (superclass, interfaces, declared members,
//! mixin-declared relationships) keyed by canonical internal name, with
//! hierarchy walks that understand both the real superclass chain and the
//! parallel chain contributed by mixins with detached superclasses.

pub mod cache;
pub mod class_info;
pub mod error;

pub use cache::{
    ClassInfoCache, ClassSource, EmptyClassSource, MapClassSource, MemberFilter, ResolvedMember,
    SearchType, Traversal,
};
pub use class_info::{ClassInfo, MemberInfo};
pub use error::{MetadataError, MetadataResult};
