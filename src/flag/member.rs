//! Immutable flag members
//!
//! A [`Flag`] is a named tag with optional aliases and parent references.
//! Identity is the set of names it answers to: two flags are equal when
//! their name-plus-alias sets match.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{FlagError, FlagResult};

/// Separator accepted in alias and parent lists (`"run|running"`)
pub const SEPARATOR: char = '|';

/// An immutable member of a flag vocabulary
#[derive(Debug, Clone)]
pub struct Flag {
    name: Option<String>,
    aliases: BTreeSet<String>,
    parents: BTreeSet<String>,
}

impl Flag {
    /// Create a flag with a primary name
    pub fn new(name: &str) -> FlagResult<Self> {
        Ok(Self {
            name: Some(standardize(name)?),
            aliases: BTreeSet::new(),
            parents: BTreeSet::new(),
        })
    }

    /// Create a flag known only by its aliases
    pub fn anonymous(aliases: &str) -> FlagResult<Self> {
        let flag = Self {
            name: None,
            aliases: split_names(aliases)?,
            parents: BTreeSet::new(),
        };
        if flag.aliases.is_empty() {
            return Err(FlagError::Unnamed);
        }
        Ok(flag)
    }

    /// Add aliases, `|`-separated
    pub fn with_aliases(mut self, aliases: &str) -> FlagResult<Self> {
        self.aliases.extend(split_names(aliases)?);
        if let Some(name) = &self.name {
            self.aliases.remove(name);
        }
        Ok(self)
    }

    /// Add parent references, `|`-separated
    pub fn with_parents(mut self, parents: &str) -> FlagResult<Self> {
        self.parents.extend(split_names(parents)?);
        Ok(self)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.aliases.iter().map(String::as_str)
    }

    pub fn parents(&self) -> impl Iterator<Item = &str> {
        self.parents.iter().map(String::as_str)
    }

    /// Primary name followed by aliases
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.name.as_deref().into_iter().chain(self.aliases())
    }

    /// True if the flag answers to `name`
    pub fn is_named(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name) || self.aliases.contains(name)
    }

    /// True if any of `other`'s names is a parent of this flag
    pub fn depends_on(&self, other: &Flag) -> bool {
        other.names().any(|n| self.parents.contains(n))
    }

    /// Name used in messages: the primary name, else the first alias
    pub fn label(&self) -> &str {
        self.names().next().unwrap_or("<unnamed>")
    }

    fn identity(&self) -> BTreeSet<&str> {
        self.names().collect()
    }
}

impl PartialEq for Flag {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Flag {}

impl Hash for Flag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Trim an identifier and reject empty or separator-bearing ones
pub fn standardize(name: &str) -> FlagResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(FlagError::InvalidName {
            name: name.to_string(),
            reason: "must not be empty".into(),
        });
    }
    if trimmed.contains(SEPARATOR) {
        return Err(FlagError::InvalidName {
            name: name.to_string(),
            reason: format!("must not contain '{}'", SEPARATOR),
        });
    }
    Ok(trimmed.to_string())
}

/// Split a `|`-separated list; an empty string yields no names
pub fn split_names(names: &str) -> FlagResult<BTreeSet<String>> {
    if names.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    names.split(SEPARATOR).map(standardize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_trimmed() {
        let flag = Flag::new("  running ").unwrap();
        assert_eq!(flag.name(), Some("running"));
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(Flag::new(""), Err(FlagError::InvalidName { .. })));
        assert!(matches!(Flag::new("   "), Err(FlagError::InvalidName { .. })));
        assert!(matches!(Flag::new("a|b"), Err(FlagError::InvalidName { .. })));
        assert!(matches!(
            Flag::new("a").unwrap().with_aliases("b||c"),
            Err(FlagError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_anonymous_requires_alias() {
        assert_eq!(Flag::anonymous("").unwrap_err(), FlagError::Unnamed);
        let flag = Flag::anonymous("x|y").unwrap();
        assert_eq!(flag.name(), None);
        assert_eq!(flag.label(), "x");
        assert!(flag.is_named("y"));
    }

    #[test]
    fn test_aliases_and_parents_split() {
        let flag = Flag::new("swe")
            .unwrap()
            .with_aliases("stopping_with_exception | exc")
            .unwrap()
            .with_parents("stopping")
            .unwrap();

        assert!(flag.is_named("exc"));
        assert!(flag.is_named("stopping_with_exception"));
        assert_eq!(flag.parents().collect::<Vec<_>>(), vec!["stopping"]);
    }

    #[test]
    fn test_equality_uses_all_names() {
        let a = Flag::new("run").unwrap().with_aliases("running").unwrap();
        let b = Flag::new("running").unwrap().with_aliases("run").unwrap();
        let c = Flag::new("run").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_depends_on() {
        let parent = Flag::new("running").unwrap().with_aliases("run").unwrap();
        let child = Flag::new("stepping").unwrap().with_parents("run").unwrap();

        assert!(child.depends_on(&parent));
        assert!(!parent.depends_on(&child));
    }
}
