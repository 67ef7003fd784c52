//! Member reference grammar.
//!
//! Annotations name target members as strings; this module parses them into
//! structured references. Accepted forms:
//!
//! ```text
//! Lcom/foo/Bar;method(II)V      fully qualified method
//! Lcom/foo/Bar;field:I          fully qualified field
//! com.foo.Bar.method(II)V       dotted-owner method
//! method(II)V                   method, owner floats
//! field:I                       field, owner floats
//! name                          by name alone
//! *                             match every member
//! ```

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::str::FromStr;

/// A parsed reference to a class member.
///
/// Owner and descriptor are optional: a selector without an owner floats
/// across the hierarchy, and one without a descriptor matches by name alone
/// where unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MemberRef {
    /// Internal (slash-delimited) name of the owning class
    pub owner: Option<String>,
    /// Member name
    pub name: Option<String>,
    /// Field or method descriptor
    pub desc: Option<String>,
    /// True for the `*` selector which matches every member
    pub match_all: bool,
}

impl MemberRef {
    /// Creates a reference matching a method by name and descriptor.
    pub fn method<S: Into<String>>(name: S, desc: S) -> Self {
        Self {
            owner: None,
            name: Some(name.into()),
            desc: Some(desc.into()),
            match_all: false,
        }
    }

    /// Creates a reference matching by name alone.
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            owner: None,
            name: Some(name.into()),
            desc: None,
            match_all: false,
        }
    }

    /// Creates the `*` reference.
    pub fn all() -> Self {
        Self {
            owner: None,
            name: None,
            desc: None,
            match_all: true,
        }
    }

    /// Parses a reference string. See the module docs for the grammar.
    pub fn parse(input: &str) -> CoreResult<Self> {
        let raw: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        if raw.is_empty() {
            return Err(CoreError::invalid_reference(input, "empty reference"));
        }
        if raw == "*" {
            return Ok(Self::all());
        }

        let (owner, rest) = Self::split_owner(input, &raw)?;

        if rest.is_empty() {
            // Owner-only references select a class, not a member.
            if owner.is_some() {
                return Ok(Self {
                    owner,
                    name: None,
                    desc: None,
                    match_all: false,
                });
            }
            return Err(CoreError::invalid_reference(input, "missing member name"));
        }

        let (name, desc) = if let Some(paren) = rest.find('(') {
            let desc = &rest[paren..];
            if !desc.contains(')') {
                return Err(CoreError::invalid_reference(
                    input,
                    "unterminated method descriptor",
                ));
            }
            let name = &rest[..paren];
            (name, Some(desc.to_string()))
        } else if let Some(colon) = rest.find(':') {
            (&rest[..colon], Some(rest[colon + 1..].to_string()))
        } else {
            (rest, None)
        };

        if name.contains('*') {
            if name == "*" {
                return Ok(Self {
                    owner,
                    name: None,
                    desc,
                    match_all: true,
                });
            }
            return Err(CoreError::invalid_reference(
                input,
                "wildcard must be the entire name",
            ));
        }

        let name = if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        };
        if name.is_none() && desc.is_none() {
            return Err(CoreError::invalid_reference(input, "missing member name"));
        }

        Ok(Self {
            owner,
            name,
            desc,
            match_all: false,
        })
    }

    /// Splits the owner prefix off a reference string.
    fn split_owner<'a>(input: &str, raw: &'a str) -> CoreResult<(Option<String>, &'a str)> {
        if let Some(stripped) = raw.strip_prefix('L') {
            if let Some(semi) = stripped.find(';') {
                let owner = &stripped[..semi];
                if owner.is_empty() {
                    return Err(CoreError::invalid_reference(input, "empty owner"));
                }
                return Ok((Some(owner.to_string()), &stripped[semi + 1..]));
            }
        }
        // Dotted-owner form: every '.' before the descriptor separates package
        // segments, the last one separates owner from member name.
        let stop = raw
            .find('(')
            .or_else(|| raw.find(':'))
            .unwrap_or(raw.len());
        if let Some(last_dot) = raw[..stop].rfind('.') {
            let owner = raw[..last_dot].replace('.', "/");
            if owner.is_empty() {
                return Err(CoreError::invalid_reference(input, "empty owner"));
            }
            return Ok((Some(owner), &raw[last_dot + 1..]));
        }
        Ok((None, raw))
    }

    /// True when owner, name and descriptor are all present.
    pub fn is_fully_qualified(&self) -> bool {
        self.owner.is_some() && self.name.is_some() && self.desc.is_some()
    }

    /// True when the descriptor (if any) describes a method.
    pub fn is_method(&self) -> bool {
        self.desc.as_deref().is_some_and(|d| d.starts_with('('))
    }

    /// Returns a copy of this reference with the given owner.
    pub fn with_owner<S: Into<String>>(&self, owner: S) -> Self {
        Self {
            owner: Some(owner.into()),
            ..self.clone()
        }
    }

    /// Tests a member against this reference. Unset fields match anything.
    pub fn matches(&self, owner: &str, name: &str, desc: &str) -> bool {
        if self.match_all {
            return self.owner.as_deref().map_or(true, |o| o == owner);
        }
        self.owner.as_deref().map_or(true, |o| o == owner)
            && self.name.as_deref().map_or(true, |n| n == name)
            && self.desc.as_deref().map_or(true, |d| d == desc)
    }

    /// Tests a member by name and descriptor, ignoring ownership.
    pub fn matches_member(&self, name: &str, desc: &str) -> bool {
        if self.match_all {
            return true;
        }
        self.name.as_deref().map_or(true, |n| n == name)
            && self.desc.as_deref().map_or(true, |d| d == desc)
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(owner) = &self.owner {
            write!(f, "L{owner};")?;
        }
        match (&self.name, self.match_all) {
            (Some(name), _) => write!(f, "{name}")?,
            (None, true) => write!(f, "*")?,
            (None, false) => {}
        }
        if let Some(desc) = &self.desc {
            if !desc.starts_with('(') {
                write!(f, ":")?;
            }
            write!(f, "{desc}")?;
        }
        Ok(())
    }
}

impl FromStr for MemberRef {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fully_qualified_method() {
        let r = MemberRef::parse("Lnet/example/Target;update(IZ)V").unwrap();
        assert_eq!(r.owner.as_deref(), Some("net/example/Target"));
        assert_eq!(r.name.as_deref(), Some("update"));
        assert_eq!(r.desc.as_deref(), Some("(IZ)V"));
        assert!(r.is_fully_qualified());
        assert!(r.is_method());
    }

    #[test]
    fn test_parse_field_form() {
        let r = MemberRef::parse("Lnet/example/Target;count:I").unwrap();
        assert_eq!(r.name.as_deref(), Some("count"));
        assert_eq!(r.desc.as_deref(), Some("I"));
        assert!(!r.is_method());
    }

    #[test]
    fn test_parse_dotted_owner() {
        let r = MemberRef::parse("net.example.Target.update(IZ)V").unwrap();
        assert_eq!(r.owner.as_deref(), Some("net/example/Target"));
        assert_eq!(r.name.as_deref(), Some("update"));
    }

    #[test]
    fn test_parse_floating_name() {
        let r = MemberRef::parse("update").unwrap();
        assert!(r.owner.is_none());
        assert_eq!(r.name.as_deref(), Some("update"));
        assert!(r.desc.is_none());
    }

    #[test]
    fn test_parse_owner_only() {
        let r = MemberRef::parse("Lnet/example/Created;").unwrap();
        assert_eq!(r.owner.as_deref(), Some("net/example/Created"));
        assert!(r.name.is_none());
        assert!(r.desc.is_none());
        assert!(r.matches("net/example/Created", "anything", "()V"));
    }

    #[test]
    fn test_parse_wildcard() {
        let r = MemberRef::parse("*").unwrap();
        assert!(r.match_all);
        assert!(r.matches("a/B", "anything", "()V"));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(MemberRef::parse("").is_err());
        assert!(MemberRef::parse("up*date").is_err());
        assert!(MemberRef::parse("name(I").is_err());
        assert!(MemberRef::parse("L;name").is_err());
    }

    #[test]
    fn test_matching_ignores_unset_fields() {
        let r = MemberRef::parse("update").unwrap();
        assert!(r.matches("any/Owner", "update", "()V"));
        assert!(r.matches("any/Owner", "update", "(IZ)V"));
        assert!(!r.matches("any/Owner", "tick", "()V"));

        let q = MemberRef::parse("La/B;update()V").unwrap();
        assert!(q.matches("a/B", "update", "()V"));
        assert!(!q.matches("a/C", "update", "()V"));
    }

    #[test]
    fn test_display_roundtrip() {
        for s in ["La/B;m(I)V", "La/B;f:I", "m(I)V", "f:I", "name", "*"] {
            let r = MemberRef::parse(s).unwrap();
            assert_eq!(MemberRef::parse(&r.to_string()).unwrap(), r);
        }
    }

    #[test]
    fn test_whitespace_stripped() {
        let r = MemberRef::parse(" update (IZ)V ").unwrap();
        assert_eq!(r.name.as_deref(), Some("update"));
        assert_eq!(r.desc.as_deref(), Some("(IZ)V"));
    }
}
