//! The class metadata cache.
//!
//! Entries are canonical per internal name, filled lazily from a
//! [`ClassSource`] by header-only parsing. Mixins registering against a
//! target mutate its entry (logical supertypes, grafted interfaces) under
//! the cache's single write lock.

use crate::class_info::{ClassInfo, MemberInfo};
use crate::error::{MetadataError, MetadataResult};
use log::{debug, warn};
use mixin_bytecode::{parse_class_header, ClassResolver, MemberKind};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};

/// Supplies raw class bytes by internal name.
pub trait ClassSource: Send + Sync {
    fn class_bytes(&self, internal_name: &str) -> Option<Vec<u8>>;
}

/// A map-backed source for tests and embedded use.
#[derive(Default)]
pub struct MapClassSource {
    classes: HashMap<String, Vec<u8>>,
}

impl MapClassSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a class by its bytes.
    pub fn insert<S: Into<String>>(&mut self, name: S, bytes: Vec<u8>) {
        self.classes.insert(name.into(), bytes);
    }
}

impl ClassSource for MapClassSource {
    fn class_bytes(&self, internal_name: &str) -> Option<Vec<u8>> {
        self.classes.get(internal_name).cloned()
    }
}

/// A source with no classes.
pub struct EmptyClassSource;

impl ClassSource for EmptyClassSource {
    fn class_bytes(&self, _internal_name: &str) -> Option<Vec<u8>> {
        None
    }
}

/// Which superclass chains a hierarchy walk may follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Only the real chain from the class files
    Real,
    /// Only mixin-declared logical superclasses
    Mixin,
    /// Both chains
    All,
}

impl Traversal {
    fn follows_real(&self) -> bool {
        matches!(self, Traversal::Real | Traversal::All)
    }

    fn follows_mixin(&self) -> bool {
        matches!(self, Traversal::Mixin | Traversal::All)
    }
}

/// Where a member search looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    /// This class and every ancestor
    AllClasses,
    /// Ancestors only
    SuperClassesOnly,
    /// This class only
    DeclaredOnly,
}

bitflags::bitflags! {
    /// Access filter for hierarchy member searches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemberFilter: u8 {
        /// Admit private members of ancestors
        const INCLUDE_PRIVATE = 0x01;
        /// Admit static members
        const INCLUDE_STATIC = 0x02;
        /// Admit everything
        const INCLUDE_ALL = 0x03;
    }
}

/// A member found somewhere in a hierarchy.
#[derive(Debug, Clone)]
pub struct ResolvedMember {
    /// Internal name of the declaring class
    pub owner: String,
    pub member: MemberInfo,
}

/// Process-wide cache of class summaries.
pub struct ClassInfoCache {
    entries: RwLock<HashMap<String, Arc<ClassInfo>>>,
    source: Box<dyn ClassSource>,
}

impl ClassInfoCache {
    /// Creates a cache over the given byte source.
    pub fn new(source: Box<dyn ClassSource>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            source,
        }
    }

    /// Creates a cache with no backing source, for tests.
    pub fn empty() -> Self {
        Self::new(Box::new(EmptyClassSource))
    }

    /// Clears every cached entry. Teardown hook.
    pub fn reset(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Inserts or replaces a summary directly.
    ///
    /// Used by the engine to publish targets and mixins it has already
    /// parsed in full, saving the header re-parse.
    pub fn insert_info(&self, info: ClassInfo) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(info.name.clone(), Arc::new(info));
    }

    /// Looks up a summary, filling the entry from the source on miss.
    pub fn for_name(&self, internal_name: &str) -> Option<Arc<ClassInfo>> {
        match self.try_for_name(internal_name) {
            Ok(info) => Some(info),
            Err(MetadataError::ClassNotFound { .. }) => None,
            Err(err) => {
                warn!("metadata lookup for {internal_name} failed: {err}");
                None
            }
        }
    }

    /// Looks up a summary, reporting why it could not be produced.
    pub fn try_for_name(&self, internal_name: &str) -> MetadataResult<Arc<ClassInfo>> {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(info) = entries.get(internal_name) {
                return Ok(info.clone());
            }
        }
        let info = if internal_name == "java/lang/Object" {
            ClassInfo::root()
        } else {
            let bytes = self
                .source
                .class_bytes(internal_name)
                .ok_or_else(|| MetadataError::class_not_found(internal_name))?;
            let header =
                parse_class_header(&bytes).map_err(|source| MetadataError::UnreadableClass {
                    name: internal_name.to_string(),
                    source,
                })?;
            debug!("metadata cache fill: {internal_name}");
            ClassInfo::from_header(&header)
        };
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .entry(internal_name.to_string())
            .or_insert_with(|| Arc::new(info));
        Ok(entry.clone())
    }

    /// Records mixin-contributed relationships on a target's entry.
    pub fn register_mixin_relationships(
        &self,
        target: &str,
        logical_super: Option<&str>,
        added_interfaces: &[String],
    ) -> MetadataResult<()> {
        // Ensure the entry exists before mutating it.
        self.try_for_name(target)?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = entries.get_mut(target) {
            let info = Arc::make_mut(existing);
            if let Some(logical) = logical_super {
                if !info.mixin_supers.iter().any(|s| s == logical) {
                    info.mixin_supers.push(logical.to_string());
                }
            }
            for itf in added_interfaces {
                if !info.interfaces.contains(itf) && !info.mixin_interfaces.contains(itf) {
                    info.mixin_interfaces.push(itf.clone());
                }
            }
        }
        Ok(())
    }

    /// The superclass chain of `name`, starting at the class itself.
    ///
    /// Mixin-declared logical superclasses are interleaved after the real
    /// superclass at each level when the traversal admits them.
    fn super_chain(&self, name: &str, traversal: Traversal) -> MetadataResult<Vec<String>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(name.to_string());
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let info = self.try_for_name(&current)?;
            chain.push(current);
            if info.name != "java/lang/Object" {
                if traversal.follows_real() {
                    if let Some(super_name) = &info.super_name {
                        queue.push_back(super_name.clone());
                    }
                }
                if traversal.follows_mixin() {
                    for logical in &info.mixin_supers {
                        queue.push_back(logical.clone());
                    }
                }
            }
        }
        Ok(chain)
    }

    /// True when `ancestor` appears in `child`'s superclass chain or
    /// transitive interfaces.
    pub fn has_superclass(
        &self,
        child: &str,
        ancestor: &str,
        traversal: Traversal,
    ) -> MetadataResult<bool> {
        if child == ancestor {
            return Ok(true);
        }
        let chain = self.super_chain(child, traversal)?;
        if chain.iter().any(|c| c == ancestor) {
            return Ok(true);
        }
        // Interfaces, breadth-first after classes.
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for class in &chain {
            if let Ok(info) = self.try_for_name(class) {
                queue.extend(info.all_interfaces().cloned());
            }
        }
        while let Some(itf) = queue.pop_front() {
            if !seen.insert(itf.clone()) {
                continue;
            }
            if itf == ancestor {
                return Ok(true);
            }
            if let Some(info) = self.for_name(&itf) {
                queue.extend(info.all_interfaces().cloned());
            }
        }
        Ok(false)
    }

    /// Deepest common ancestor of two classes.
    ///
    /// If either side is an interface the join is the root class. Ties are
    /// broken by the earlier entry on `a`'s chain.
    pub fn common_superclass(&self, a: &str, b: &str) -> MetadataResult<String> {
        if a == b {
            return Ok(a.to_string());
        }
        let info_a = self.try_for_name(a)?;
        let info_b = self.try_for_name(b)?;
        if info_a.is_interface() || info_b.is_interface() {
            return Ok("java/lang/Object".to_string());
        }
        let chain_a = self.super_chain(a, Traversal::All)?;
        let chain_b: HashSet<String> = self
            .super_chain(b, Traversal::All)?
            .into_iter()
            .collect();
        for candidate in chain_a {
            if chain_b.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Ok("java/lang/Object".to_string())
    }

    /// Finds a method walking the hierarchy.
    pub fn find_method_in_hierarchy(
        &self,
        start: &str,
        name: &str,
        desc: Option<&str>,
        search: SearchType,
        traversal: Traversal,
        filter: MemberFilter,
    ) -> MetadataResult<Option<ResolvedMember>> {
        self.find_in_hierarchy(start, MemberKind::Method, name, desc, search, traversal, filter)
    }

    /// Finds a field walking the hierarchy.
    pub fn find_field_in_hierarchy(
        &self,
        start: &str,
        name: &str,
        desc: Option<&str>,
        search: SearchType,
        traversal: Traversal,
        filter: MemberFilter,
    ) -> MetadataResult<Option<ResolvedMember>> {
        self.find_in_hierarchy(start, MemberKind::Field, name, desc, search, traversal, filter)
    }

    #[allow(clippy::too_many_arguments)]
    fn find_in_hierarchy(
        &self,
        start: &str,
        kind: MemberKind,
        name: &str,
        desc: Option<&str>,
        search: SearchType,
        traversal: Traversal,
        filter: MemberFilter,
    ) -> MetadataResult<Option<ResolvedMember>> {
        let chain = match search {
            SearchType::DeclaredOnly => vec![start.to_string()],
            SearchType::AllClasses => self.super_chain(start, traversal)?,
            SearchType::SuperClassesOnly => {
                let mut chain = self.super_chain(start, traversal)?;
                if !chain.is_empty() {
                    chain.remove(0);
                }
                chain
            }
        };

        let admit = |member: &MemberInfo, depth: usize| -> bool {
            if member.is_private() && depth > 0 && !filter.contains(MemberFilter::INCLUDE_PRIVATE)
            {
                return false;
            }
            if member.is_static() && !filter.contains(MemberFilter::INCLUDE_STATIC) {
                return false;
            }
            true
        };

        for (depth, class) in chain.iter().enumerate() {
            let info = self.try_for_name(class)?;
            if let Some(member) = info.find_member(kind, name, desc) {
                if admit(member, depth) {
                    return Ok(Some(ResolvedMember {
                        owner: class.clone(),
                        member: member.clone(),
                    }));
                }
            }
        }

        // Interfaces after classes, breadth-first, duplicates suppressed.
        if kind == MemberKind::Method && search != SearchType::DeclaredOnly {
            let mut seen: HashSet<String> = HashSet::new();
            let mut queue: VecDeque<String> = VecDeque::new();
            for class in &chain {
                if let Ok(info) = self.try_for_name(class) {
                    queue.extend(info.all_interfaces().cloned());
                }
            }
            while let Some(itf) = queue.pop_front() {
                if !seen.insert(itf.clone()) {
                    continue;
                }
                let Some(info) = self.for_name(&itf) else {
                    continue;
                };
                if let Some(member) = info.find_member(kind, name, desc) {
                    return Ok(Some(ResolvedMember {
                        owner: itf.clone(),
                        member: member.clone(),
                    }));
                }
                queue.extend(info.all_interfaces().cloned());
            }
        }
        Ok(None)
    }
}

impl ClassResolver for ClassInfoCache {
    fn common_superclass(&self, a: &str, b: &str) -> String {
        ClassInfoCache::common_superclass(self, a, b)
            .unwrap_or_else(|_| "java/lang/Object".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixin_bytecode::{emit_class, AccessFlags, ClassBuilder};

    fn class_bytes(name: &str, super_name: &str, interfaces: &[&str]) -> Vec<u8> {
        let mut builder = ClassBuilder::new(name).super_class(super_name);
        for itf in interfaces {
            builder = builder.interface(*itf);
        }
        let builder = builder.method(AccessFlags::PUBLIC, "m", "()V", |body| {
            body.vreturn();
        });
        emit_class(&builder.build()).unwrap()
    }

    fn sample_cache() -> ClassInfoCache {
        let mut source = MapClassSource::new();
        source.insert("a/Base", class_bytes("a/Base", "java/lang/Object", &[]));
        source.insert("a/Mid", class_bytes("a/Mid", "a/Base", &["a/Marker"]));
        source.insert("a/Leaf", class_bytes("a/Leaf", "a/Mid", &[]));
        source.insert("a/Other", class_bytes("a/Other", "a/Base", &[]));
        let marker = ClassBuilder::new("a/Marker")
            .access(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
            .build();
        source.insert("a/Marker", emit_class(&marker).unwrap());
        ClassInfoCache::new(Box::new(source))
    }

    #[test]
    fn test_lazy_fill_and_canonical_entries() {
        let cache = sample_cache();
        let first = cache.for_name("a/Leaf").unwrap();
        let second = cache.for_name("a/Leaf").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache.for_name("a/Missing").is_none());
    }

    #[test]
    fn test_common_superclass() {
        let cache = sample_cache();
        assert_eq!(cache.common_superclass("a/Leaf", "a/Other").unwrap(), "a/Base");
        assert_eq!(cache.common_superclass("a/Leaf", "a/Mid").unwrap(), "a/Mid");
        assert_eq!(
            cache.common_superclass("a/Leaf", "a/Marker").unwrap(),
            "java/lang/Object"
        );
    }

    #[test]
    fn test_has_superclass_with_interfaces() {
        let cache = sample_cache();
        assert!(cache.has_superclass("a/Leaf", "a/Base", Traversal::Real).unwrap());
        assert!(cache.has_superclass("a/Leaf", "a/Marker", Traversal::Real).unwrap());
        assert!(!cache.has_superclass("a/Base", "a/Leaf", Traversal::Real).unwrap());
    }

    #[test]
    fn test_mixin_logical_super() {
        let cache = sample_cache();
        cache
            .register_mixin_relationships("a/Other", Some("a/Mid"), &[])
            .unwrap();
        // The logical chain admits the mixin-declared parent.
        assert!(cache.has_superclass("a/Other", "a/Mid", Traversal::All).unwrap());
        assert!(!cache.has_superclass("a/Other", "a/Mid", Traversal::Real).unwrap());
    }

    #[test]
    fn test_grafted_interface_visible() {
        let cache = sample_cache();
        cache
            .register_mixin_relationships("a/Base", None, &["a/Marker".to_string()])
            .unwrap();
        assert!(cache.has_superclass("a/Base", "a/Marker", Traversal::Real).unwrap());
    }

    #[test]
    fn test_find_method_in_hierarchy() {
        let cache = sample_cache();
        let found = cache
            .find_method_in_hierarchy(
                "a/Leaf",
                "m",
                Some("()V"),
                SearchType::AllClasses,
                Traversal::Real,
                MemberFilter::INCLUDE_ALL,
            )
            .unwrap()
            .expect("method");
        assert_eq!(found.owner, "a/Leaf");

        let from_super = cache
            .find_method_in_hierarchy(
                "a/Leaf",
                "m",
                Some("()V"),
                SearchType::SuperClassesOnly,
                Traversal::Real,
                MemberFilter::INCLUDE_ALL,
            )
            .unwrap()
            .expect("method");
        assert_eq!(from_super.owner, "a/Mid");
    }
}
