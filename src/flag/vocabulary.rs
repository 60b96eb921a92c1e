//! Flag vocabularies
//!
//! A [`Vocabulary`] is the closed registry a [`FlagGroup`](super::FlagGroup)
//! draws its members from. Registration validates the whole batch before
//! anything is committed:
//!
//! ```text
//!   register([a, b, c])
//!        │
//!        ├── names unique across registry ∪ batch   (NameConflict)
//!        ├── every parent resolves                  (InvalidParent)
//!        └── parent graph stays acyclic             (Cycle)
//!        │
//!        ▼
//!   commit under the write lock
//! ```
//!
//! Reads take the read side of the lock only, so lookups from many job
//! threads never contend with each other.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::member::Flag;
use crate::error::{FlagError, FlagResult};

/// A closed set of flags plus their mutual-exclusion groups
#[derive(Debug)]
pub struct Vocabulary {
    name: String,
    registry: RwLock<Registry>,
}

#[derive(Debug, Clone, Default)]
struct Registry {
    flags: Vec<Arc<Flag>>,
    mutex_groups: Vec<Vec<Arc<Flag>>>,
}

impl Vocabulary {
    /// Create an empty vocabulary
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: RwLock::new(Registry::default()),
        }
    }

    /// Create a vocabulary starting from a copy of this one's members and groups
    pub fn derive(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: RwLock::new(self.registry.read().clone()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a batch of flags; nothing is committed if any check fails
    pub fn register<I>(&self, flags: I) -> FlagResult<()>
    where
        I: IntoIterator<Item = Flag>,
    {
        let batch: Vec<Arc<Flag>> = flags.into_iter().map(Arc::new).collect();
        let mut registry = self.registry.write();

        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, flag) in registry.flags.iter().enumerate() {
            for name in flag.names() {
                index.insert(name.to_string(), i);
            }
        }

        let offset = registry.flags.len();
        for (i, flag) in batch.iter().enumerate() {
            if flag.names().next().is_none() {
                return Err(FlagError::Unnamed);
            }
            for name in flag.names() {
                if index.contains_key(name) {
                    return Err(FlagError::NameConflict {
                        name: name.to_string(),
                        vocabulary: self.name.clone(),
                    });
                }
                index.insert(name.to_string(), offset + i);
            }
        }

        for flag in &batch {
            if let Some(parent) = flag.parents().find(|p| !index.contains_key(*p)) {
                return Err(FlagError::InvalidParent {
                    flag: flag.label().to_string(),
                    parent: parent.to_string(),
                });
            }
        }

        let all: Vec<Arc<Flag>> = registry.flags.iter().chain(batch.iter()).cloned().collect();
        if let Some(path) = find_cycle(&all, &index, offset) {
            return Err(FlagError::Cycle { path });
        }

        registry.flags.extend(batch);
        Ok(())
    }

    /// Declare a set of registered flags as mutually exclusive
    pub fn add_mutex_group(&self, names: &[&str]) -> FlagResult<()> {
        let group = names
            .iter()
            .map(|name| self.lookup(name))
            .collect::<FlagResult<Vec<_>>>()?;
        self.registry.write().mutex_groups.push(group);
        Ok(())
    }

    /// Find a registered flag by name or alias
    pub fn lookup(&self, name: &str) -> FlagResult<Arc<Flag>> {
        let name = name.trim();
        self.registry
            .read()
            .flags
            .iter()
            .find(|f| f.is_named(name))
            .cloned()
            .ok_or_else(|| FlagError::UnknownFlag {
                name: name.to_string(),
                vocabulary: self.name.clone(),
            })
    }

    /// Map a flag value onto the registered member equal to it
    pub fn resolve(&self, flag: &Flag) -> FlagResult<Arc<Flag>> {
        self.registry
            .read()
            .flags
            .iter()
            .find(|f| f.as_ref() == flag)
            .cloned()
            .ok_or_else(|| FlagError::Incompatible {
                flag: flag.label().to_string(),
                vocabulary: self.name.clone(),
            })
    }

    pub fn contains(&self, flag: &Flag) -> bool {
        self.registry.read().flags.iter().any(|f| f.as_ref() == flag)
    }

    pub fn members(&self) -> Vec<Arc<Flag>> {
        self.registry.read().flags.clone()
    }

    pub fn mutex_groups(&self) -> Vec<Vec<Arc<Flag>>> {
        self.registry.read().mutex_groups.clone()
    }

    /// Labels of the first mutex group with more than one member in `present`
    pub fn mutex_violation(&self, present: &[Arc<Flag>]) -> Option<Vec<String>> {
        let registry = self.registry.read();
        registry.mutex_groups.iter().find_map(|group| {
            let hits: Vec<String> = group
                .iter()
                .filter(|member| present.contains(*member))
                .map(|member| member.label().to_string())
                .collect();
            (hits.len() > 1).then_some(hits)
        })
    }
}

/// Depth-first search for a parent cycle reachable from `all[start..]`
fn find_cycle(
    all: &[Arc<Flag>],
    index: &HashMap<String, usize>,
    start: usize,
) -> Option<Vec<String>> {
    let mut marks = vec![Mark::Unvisited; all.len()];
    let mut path = Vec::new();
    (start..all.len()).find_map(|root| {
        if marks[root] == Mark::Unvisited {
            visit(root, all, index, &mut marks, &mut path)
        } else {
            None
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

fn visit(
    node: usize,
    all: &[Arc<Flag>],
    index: &HashMap<String, usize>,
    marks: &mut [Mark],
    path: &mut Vec<usize>,
) -> Option<Vec<String>> {
    marks[node] = Mark::OnPath;
    path.push(node);

    for parent in all[node].parents() {
        let Some(&next) = index.get(parent) else {
            continue;
        };
        match marks[next] {
            Mark::OnPath => {
                let from = path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle: Vec<String> = path[from..]
                    .iter()
                    .map(|&n| all[n].label().to_string())
                    .collect();
                cycle.push(all[next].label().to_string());
                return Some(cycle);
            }
            Mark::Unvisited => {
                if let Some(cycle) = visit(next, all, index, marks, path) {
                    return Some(cycle);
                }
            }
            Mark::Done => {}
        }
    }

    path.pop();
    marks[node] = Mark::Done;
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag(name: &str, parents: &str) -> Flag {
        Flag::new(name).unwrap().with_parents(parents).unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let vocab = Vocabulary::new("test");
        vocab
            .register([
                Flag::new("aaa").unwrap().with_aliases("a").unwrap(),
                flag("bbb", "aaa"),
            ])
            .unwrap();

        assert_eq!(vocab.lookup("a").unwrap().name(), Some("aaa"));
        assert_eq!(vocab.lookup(" bbb ").unwrap().name(), Some("bbb"));
        assert!(matches!(vocab.lookup("zzz"), Err(FlagError::UnknownFlag { .. })));
        assert_eq!(vocab.members().len(), 2);
    }

    #[test]
    fn test_name_conflict_rejected() {
        let vocab = Vocabulary::new("test");
        vocab.register([Flag::new("aaa").unwrap()]).unwrap();

        let err = vocab
            .register([Flag::new("ccc").unwrap().with_aliases("aaa").unwrap()])
            .unwrap_err();
        assert!(matches!(err, FlagError::NameConflict { ref name, .. } if name == "aaa"));

        // Duplicates inside one batch are caught as well
        let err = vocab
            .register([Flag::new("ddd").unwrap(), Flag::new("ddd").unwrap()])
            .unwrap_err();
        assert!(matches!(err, FlagError::NameConflict { .. }));
        assert_eq!(vocab.members().len(), 1);
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let vocab = Vocabulary::new("test");
        let err = vocab.register([flag("child", "ghost")]).unwrap_err();
        assert_eq!(
            err,
            FlagError::InvalidParent {
                flag: "child".into(),
                parent: "ghost".into()
            }
        );
        assert!(vocab.members().is_empty());
    }

    #[test]
    fn test_cycle_rejected_with_path() {
        let vocab = Vocabulary::new("test");
        let err = vocab
            .register([flag("x", "z"), flag("y", "x"), flag("z", "y")])
            .unwrap_err();

        match err {
            FlagError::Cycle { path } => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        assert!(vocab.members().is_empty());
    }

    #[test]
    fn test_self_parent_is_cycle() {
        let vocab = Vocabulary::new("test");
        let err = vocab.register([flag("loop", "loop")]).unwrap_err();
        assert_eq!(
            err,
            FlagError::Cycle {
                path: vec!["loop".into(), "loop".into()]
            }
        );
    }

    #[test]
    fn test_parent_can_be_in_same_batch() {
        let vocab = Vocabulary::new("test");
        vocab.register([flag("child", "parent"), flag("parent", "")]).unwrap();
        assert_eq!(vocab.members().len(), 2);
    }

    #[test]
    fn test_mutex_violation() {
        let vocab = Vocabulary::new("test");
        vocab
            .register([Flag::new("a").unwrap(), Flag::new("b").unwrap(), Flag::new("c").unwrap()])
            .unwrap();
        vocab.add_mutex_group(&["a", "b"]).unwrap();

        let a = vocab.lookup("a").unwrap();
        let b = vocab.lookup("b").unwrap();
        let c = vocab.lookup("c").unwrap();

        assert!(vocab.mutex_violation(&[a.clone(), c.clone()]).is_none());
        assert_eq!(
            vocab.mutex_violation(&[a, b, c]),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_derive_copies_members() {
        let base = Vocabulary::new("base");
        base.register([Flag::new("a").unwrap(), Flag::new("b").unwrap()]).unwrap();
        base.add_mutex_group(&["a", "b"]).unwrap();

        let derived = base.derive("derived");
        derived.register([flag("c", "a")]).unwrap();

        assert_eq!(derived.members().len(), 3);
        assert_eq!(derived.mutex_groups().len(), 1);
        assert_eq!(base.members().len(), 2);
    }
}
