//! Annotation tree model.
//!
//! Runtime-visible and -invisible annotations as they appear on classes,
//! fields, methods and parameters. The engine reads all of its mixin
//! metadata out of these nodes.

use crate::constant::ConstantValue;

/// A value inside an annotation's element map.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    Const(ConstantValue),
    /// An enum constant: descriptor of the enum type plus constant name
    Enum { desc: String, value: String },
    /// A class literal, as a descriptor string
    Class(String),
    /// A nested annotation
    Annotation(AnnotationNode),
    Array(Vec<AnnotationValue>),
}

impl AnnotationValue {
    /// The string content, for `Const(String)` values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AnnotationValue::Const(ConstantValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// The integer content, for `Const(Int)` values.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            AnnotationValue::Const(ConstantValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// The boolean content. Booleans are carried as int constants.
    pub fn as_bool(&self) -> Option<bool> {
        self.as_i32().map(|v| v != 0)
    }

    /// The array elements, for `Array` values.
    pub fn as_array(&self) -> Option<&[AnnotationValue]> {
        match self {
            AnnotationValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// The nested annotation, for `Annotation` values.
    pub fn as_annotation(&self) -> Option<&AnnotationNode> {
        match self {
            AnnotationValue::Annotation(node) => Some(node),
            _ => None,
        }
    }

    /// The class descriptor, for `Class` values.
    pub fn as_class_desc(&self) -> Option<&str> {
        match self {
            AnnotationValue::Class(desc) => Some(desc),
            _ => None,
        }
    }
}

/// One annotation instance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnnotationNode {
    /// Descriptor of the annotation type, e.g. `Lmixin/Inject;`
    pub desc: String,
    /// Element name/value pairs in declaration order
    pub values: Vec<(String, AnnotationValue)>,
}

impl AnnotationNode {
    /// Creates an empty annotation of the given type descriptor.
    pub fn new<S: Into<String>>(desc: S) -> Self {
        Self {
            desc: desc.into(),
            values: Vec::new(),
        }
    }

    /// Sets an element value, replacing an existing one of the same name.
    pub fn set<S: Into<String>>(&mut self, name: S, value: AnnotationValue) -> &mut Self {
        let name = name.into();
        if let Some(entry) = self.values.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.values.push((name, value));
        }
        self
    }

    /// Looks up an element by name.
    pub fn get(&self, name: &str) -> Option<&AnnotationValue> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// String element, or `None` when absent or of another type.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AnnotationValue::as_str)
    }

    /// Integer element.
    pub fn get_i32(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(AnnotationValue::as_i32)
    }

    /// Boolean element.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(AnnotationValue::as_bool)
    }

    /// Array element. An absent element yields an empty slice; a scalar is
    /// promoted to a one-element view, matching source-level shorthand.
    pub fn get_array(&self, name: &str) -> Vec<&AnnotationValue> {
        match self.get(name) {
            None => Vec::new(),
            Some(AnnotationValue::Array(items)) => items.iter().collect(),
            Some(other) => vec![other],
        }
    }

    /// Strings of an array element, skipping non-string entries.
    pub fn get_str_array(&self, name: &str) -> Vec<&str> {
        self.get_array(name)
            .into_iter()
            .filter_map(AnnotationValue::as_str)
            .collect()
    }

    /// Nested annotations of an array element.
    pub fn get_annotation_array(&self, name: &str) -> Vec<&AnnotationNode> {
        self.get_array(name)
            .into_iter()
            .filter_map(AnnotationValue::as_annotation)
            .collect()
    }

    /// Nested annotation element.
    pub fn get_annotation(&self, name: &str) -> Option<&AnnotationNode> {
        self.get(name).and_then(AnnotationValue::as_annotation)
    }

    /// Internal class name of the annotation type.
    pub fn type_name(&self) -> &str {
        self.desc
            .strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
            .unwrap_or(&self.desc)
    }
}

/// Finds an annotation of the given descriptor in a node list.
pub fn find_annotation<'a>(
    annotations: &'a [AnnotationNode],
    desc: &str,
) -> Option<&'a AnnotationNode> {
    annotations.iter().find(|a| a.desc == desc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AnnotationNode {
        let mut node = AnnotationNode::new("Lmixin/Inject;");
        node.set(
            "method",
            AnnotationValue::Array(vec![AnnotationValue::Const(ConstantValue::String(
                "update".to_string(),
            ))]),
        );
        node.set("require", AnnotationValue::Const(ConstantValue::Int(1)));
        node.set(
            "cancellable",
            AnnotationValue::Const(ConstantValue::Int(1)),
        );
        node
    }

    #[test]
    fn test_typed_getters() {
        let node = sample();
        assert_eq!(node.get_i32("require"), Some(1));
        assert_eq!(node.get_bool("cancellable"), Some(true));
        assert_eq!(node.get_str_array("method"), vec!["update"]);
        assert!(node.get("absent").is_none());
    }

    #[test]
    fn test_scalar_promoted_to_array() {
        let mut node = AnnotationNode::new("Lmixin/Inject;");
        node.set(
            "method",
            AnnotationValue::Const(ConstantValue::String("tick".to_string())),
        );
        assert_eq!(node.get_str_array("method"), vec!["tick"]);
    }

    #[test]
    fn test_set_replaces() {
        let mut node = sample();
        node.set("require", AnnotationValue::Const(ConstantValue::Int(2)));
        assert_eq!(node.get_i32("require"), Some(2));
        assert_eq!(
            node.values.iter().filter(|(n, _)| n == "require").count(),
            1
        );
    }

    #[test]
    fn test_type_name() {
        assert_eq!(sample().type_name(), "mixin/Inject");
    }
}
