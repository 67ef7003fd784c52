//! Hierarchy answers required during emission.

/// Answers common-superclass queries for the class writer.
///
/// The bytecode model holds no hierarchy knowledge of its own; callers that
/// maintain a class metadata cache implement this to give frame computation
/// correct join types.
pub trait ClassResolver {
    /// Deepest common ancestor of two internal class names.
    fn common_superclass(&self, a: &str, b: &str) -> String;
}

/// Fallback resolver: everything joins at the root class.
pub struct RootResolver;

impl ClassResolver for RootResolver {
    fn common_superclass(&self, _a: &str, _b: &str) -> String {
        "java/lang/Object".to_string()
    }
}
