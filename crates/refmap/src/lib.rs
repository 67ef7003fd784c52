//! Reference map loading and lookup.
//!
//! A reference map rewrites symbolic member references between naming
//! environments. The document shape:
//!
//! ```json
//! {
//!   "mappings": { "<mixinClassDotted>": { "<inputRef>": "<outputRef>" } },
//!   "data":     { "<contextKey>": { "<mixinClassDotted>": { "...": "..." } } }
//! }
//! ```
//!
//! Lookups in an unknown context fall through to `mappings`; a missing
//! mapping is never an error, the input reference comes back verbatim.

pub mod error;

pub use error::{RefMapError, RefMapResult};

use indexmap::IndexMap;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

type MappingSet = IndexMap<String, IndexMap<String, String>>;

/// The parsed reference map document.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RefMap {
    /// Default mappings, keyed by dotted mixin class name
    #[serde(default)]
    mappings: MappingSet,
    /// Context-keyed mappings consulted before the default set
    #[serde(default)]
    data: IndexMap<String, MappingSet>,
}

impl RefMap {
    /// Loads a reference map from its JSON document.
    pub fn load(json: &str) -> RefMapResult<Self> {
        let map: RefMap = serde_json::from_str(json).map_err(RefMapError::from)?;
        debug!(
            "loaded refmap: {} mixins, {} contexts",
            map.mappings.len(),
            map.data.len()
        );
        Ok(map)
    }

    /// The empty map every lookup falls straight through.
    pub fn default_map() -> Self {
        Self::default()
    }

    /// True when this map carries no mappings at all.
    pub fn is_default(&self) -> bool {
        self.mappings.is_empty() && self.data.is_empty()
    }

    /// Remaps `reference` for `mixin_class` using the default mappings.
    pub fn remap<'a>(&'a self, mixin_class: &str, reference: &'a str) -> &'a str {
        self.lookup(&self.mappings, mixin_class, reference)
            .unwrap_or(reference)
    }

    /// Remaps under `context`, falling through to the default mappings.
    pub fn remap_with_context<'a>(
        &'a self,
        context: &str,
        mixin_class: &str,
        reference: &'a str,
    ) -> &'a str {
        if let Some(set) = self.data.get(context) {
            if let Some(mapped) = self.lookup(set, mixin_class, reference) {
                return mapped;
            }
        }
        self.remap(mixin_class, reference)
    }

    fn lookup<'a>(
        &'a self,
        set: &'a MappingSet,
        mixin_class: &str,
        reference: &str,
    ) -> Option<&'a str> {
        let mapped = set.get(mixin_class)?.get(reference)?;
        trace!("refmap: {mixin_class}: {reference} -> {mapped}");
        Some(mapped)
    }
}

/// A reference map bound to a mutable current context.
///
/// The context is conceptually process-wide; the applicator scopes every
/// change with [`RefMapper::scope_context`] so nested apply cycles cannot
/// leak context into one another.
pub struct RefMapper {
    map: RefMap,
    context: Mutex<Option<String>>,
}

impl RefMapper {
    /// Wraps a loaded map with no active context.
    pub fn new(map: RefMap) -> Self {
        Self {
            map,
            context: Mutex::new(None),
        }
    }

    /// A mapper around the empty map.
    pub fn default_mapper() -> Self {
        Self::new(RefMap::default_map())
    }

    /// True when the underlying map is empty.
    pub fn is_default(&self) -> bool {
        self.map.is_default()
    }

    /// The active context, if any.
    pub fn context(&self) -> Option<String> {
        self.context.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Remaps using the active context.
    pub fn remap<'a>(&'a self, mixin_class: &str, reference: &'a str) -> String {
        let context = self.context.lock().unwrap_or_else(|e| e.into_inner());
        match context.as_deref() {
            Some(ctx) => self
                .map
                .remap_with_context(ctx, mixin_class, reference)
                .to_string(),
            None => self.map.remap(mixin_class, reference).to_string(),
        }
    }

    /// Sets the context for the lifetime of the returned guard, restoring
    /// the previous context on drop.
    pub fn scope_context(&self, context: Option<String>) -> ContextScope<'_> {
        let mut current = self.context.lock().unwrap_or_else(|e| e.into_inner());
        let saved = std::mem::replace(&mut *current, context);
        ContextScope {
            mapper: self,
            saved,
        }
    }
}

/// RAII guard restoring the previous remap context.
pub struct ContextScope<'a> {
    mapper: &'a RefMapper,
    saved: Option<String>,
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        let mut current = self
            .mapper
            .context
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *current = self.saved.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "mappings": {
            "com.example.MixinTarget": {
                "update(I)V": "a(I)V"
            }
        },
        "data": {
            "dev": {
                "com.example.MixinTarget": {
                    "update(I)V": "devUpdate(I)V"
                }
            }
        }
    }"#;

    #[test]
    fn test_load_and_remap() {
        let map = RefMap::load(SAMPLE).unwrap();
        assert!(!map.is_default());
        assert_eq!(map.remap("com.example.MixinTarget", "update(I)V"), "a(I)V");
        assert_eq!(map.remap("com.example.Other", "update(I)V"), "update(I)V");
        assert_eq!(map.remap("com.example.MixinTarget", "tick()V"), "tick()V");
    }

    #[test]
    fn test_context_selects_column() {
        let map = RefMap::load(SAMPLE).unwrap();
        assert_eq!(
            map.remap_with_context("dev", "com.example.MixinTarget", "update(I)V"),
            "devUpdate(I)V"
        );
        // Unknown context falls through to the default mappings.
        assert_eq!(
            map.remap_with_context("prod", "com.example.MixinTarget", "update(I)V"),
            "a(I)V"
        );
    }

    #[test]
    fn test_scoped_context_restores() {
        let mapper = RefMapper::new(RefMap::load(SAMPLE).unwrap());
        assert_eq!(mapper.remap("com.example.MixinTarget", "update(I)V"), "a(I)V");
        {
            let _scope = mapper.scope_context(Some("dev".to_string()));
            assert_eq!(
                mapper.remap("com.example.MixinTarget", "update(I)V"),
                "devUpdate(I)V"
            );
            {
                let _inner = mapper.scope_context(None);
                assert_eq!(mapper.remap("com.example.MixinTarget", "update(I)V"), "a(I)V");
            }
            assert_eq!(mapper.context().as_deref(), Some("dev"));
        }
        assert_eq!(mapper.context(), None);
    }

    #[test]
    fn test_malformed_document_rejected() {
        assert!(RefMap::load("{not json").is_err());
        assert!(RefMap::load(r#"{"mappings": 3}"#).is_err());
    }

    #[test]
    fn test_empty_document_is_default() {
        let map = RefMap::load("{}").unwrap();
        assert!(map.is_default());
    }
}
