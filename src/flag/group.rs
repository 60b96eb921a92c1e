//! Thread-safe flag groups
//!
//! A [`FlagGroup`] is a mutable set of members from one [`Vocabulary`].
//! Every mutation works on a copy of the current members and is committed
//! only if all invariants hold, so a failed call leaves the group as it was:
//!
//! - a present member's parents are present
//! - no mutex group has two present members
//! - no present member depends on an absent one
//!
//! Waiters block on a condition variable signaled after every commit.
//! Change callbacks run after the commit, outside the state lock, so they
//! may query or mutate the group themselves.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::member::{split_names, Flag};
use super::vocabulary::Vocabulary;
use crate::error::{FlagError, FlagResult};

/// Anything that names one or more flags of a vocabulary
pub trait FlagSelector {
    fn select(&self, vocabulary: &Vocabulary) -> FlagResult<Vec<Arc<Flag>>>;
}

impl FlagSelector for &str {
    fn select(&self, vocabulary: &Vocabulary) -> FlagResult<Vec<Arc<Flag>>> {
        split_names(self)?
            .iter()
            .map(|name| vocabulary.lookup(name))
            .collect()
    }
}

impl FlagSelector for String {
    fn select(&self, vocabulary: &Vocabulary) -> FlagResult<Vec<Arc<Flag>>> {
        self.as_str().select(vocabulary)
    }
}

impl FlagSelector for Flag {
    fn select(&self, vocabulary: &Vocabulary) -> FlagResult<Vec<Arc<Flag>>> {
        Ok(vec![vocabulary.resolve(self)?])
    }
}

impl FlagSelector for &Flag {
    fn select(&self, vocabulary: &Vocabulary) -> FlagResult<Vec<Arc<Flag>>> {
        Ok(vec![vocabulary.resolve(self)?])
    }
}

impl FlagSelector for Arc<Flag> {
    fn select(&self, vocabulary: &Vocabulary) -> FlagResult<Vec<Arc<Flag>>> {
        Ok(vec![vocabulary.resolve(self)?])
    }
}

impl<T: FlagSelector, const N: usize> FlagSelector for [T; N] {
    fn select(&self, vocabulary: &Vocabulary) -> FlagResult<Vec<Arc<Flag>>> {
        self.as_slice().select(vocabulary)
    }
}

impl<T: FlagSelector> FlagSelector for &[T] {
    fn select(&self, vocabulary: &Vocabulary) -> FlagResult<Vec<Arc<Flag>>> {
        let mut selected = Vec::new();
        for item in self.iter() {
            for flag in item.select(vocabulary)? {
                if !selected.contains(&flag) {
                    selected.push(flag);
                }
            }
        }
        Ok(selected)
    }
}

impl<T: FlagSelector> FlagSelector for Vec<T> {
    fn select(&self, vocabulary: &Vocabulary) -> FlagResult<Vec<Arc<Flag>>> {
        self.as_slice().select(vocabulary)
    }
}

type Callback = Arc<dyn Fn(&Flag, bool) + Send + Sync>;

struct Watcher {
    flag: Arc<Flag>,
    on: Option<bool>,
    remaining: Option<usize>,
    callback: Callback,
}

/// Mutable, thread-safe set of flags from one vocabulary
pub struct FlagGroup {
    vocabulary: Arc<Vocabulary>,
    members: Mutex<Vec<Arc<Flag>>>,
    changed: Condvar,
    watchers: Mutex<Vec<Watcher>>,
}

impl FlagGroup {
    /// Create a group holding `initial`
    pub fn new(vocabulary: Arc<Vocabulary>, initial: impl FlagSelector) -> FlagResult<Self> {
        let group = Self::empty(vocabulary);
        group.set(initial)?;
        Ok(group)
    }

    /// Create a group with no members
    pub fn empty(vocabulary: Arc<Vocabulary>) -> Self {
        Self {
            vocabulary,
            members: Mutex::new(Vec::new()),
            changed: Condvar::new(),
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocabulary
    }

    /// Add flags, inserting missing parents automatically
    pub fn set(&self, flags: impl FlagSelector) -> FlagResult<()> {
        self.set_with(flags, true)
    }

    /// Add flags; with `auto_parent` off a missing parent is an error
    pub fn set_with(&self, flags: impl FlagSelector, auto_parent: bool) -> FlagResult<()> {
        let targets = flags.select(&self.vocabulary)?;
        self.mutate(|working| {
            for flag in &targets {
                insert(&self.vocabulary, working, flag, auto_parent)?;
            }
            Ok(())
        })
    }

    /// Remove flags; fails if a remaining member depends on one of them
    pub fn unset(&self, flags: impl FlagSelector) -> FlagResult<()> {
        let targets = flags.select(&self.vocabulary)?;
        self.mutate(|working| remove(working, &targets, false))
    }

    /// Remove flags together with every member that depends on them
    pub fn unset_cascade(&self, flags: impl FlagSelector) -> FlagResult<()> {
        let targets = flags.select(&self.vocabulary)?;
        self.mutate(|working| remove(working, &targets, true))
    }

    /// Cascade-remove `from`, then set `to`, as one atomic change
    pub fn replace(&self, from: impl FlagSelector, to: impl FlagSelector) -> FlagResult<()> {
        let from = from.select(&self.vocabulary)?;
        let to = to.select(&self.vocabulary)?;
        self.mutate(|working| {
            remove(working, &from, true)?;
            for flag in &to {
                insert(&self.vocabulary, working, flag, true)?;
            }
            Ok(())
        })
    }

    /// True if every selected flag is present; unknown names are never present
    pub fn has(&self, flags: impl FlagSelector) -> bool {
        self.all(flags)
    }

    /// True if at least one selected flag is present
    pub fn any(&self, flags: impl FlagSelector) -> bool {
        let Ok(targets) = flags.select(&self.vocabulary) else {
            return false;
        };
        let members = self.members.lock();
        targets.iter().any(|f| members.contains(f))
    }

    /// True if every selected flag is present
    pub fn all(&self, flags: impl FlagSelector) -> bool {
        let Ok(targets) = flags.select(&self.vocabulary) else {
            return false;
        };
        let members = self.members.lock();
        !targets.is_empty() && targets.iter().all(|f| members.contains(f))
    }

    /// True if the present members are exactly the selected flags
    pub fn all_strict(&self, flags: impl FlagSelector) -> bool {
        let Ok(targets) = flags.select(&self.vocabulary) else {
            return false;
        };
        let members = self.members.lock();
        members.len() == targets.len() && targets.iter().all(|f| members.contains(f))
    }

    pub fn members(&self) -> Vec<Arc<Flag>> {
        self.members.lock().clone()
    }

    /// Labels of the present members, in insertion order
    pub fn labels(&self) -> Vec<String> {
        self.members.lock().iter().map(|f| f.label().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// Block until all selected flags are present, or the timeout expires
    ///
    /// Returns whether the flags are present when the call returns.
    pub fn wait(&self, flags: impl FlagSelector, timeout: Option<Duration>) -> FlagResult<bool> {
        let targets = flags.select(&self.vocabulary)?;
        Ok(self.wait_until(timeout, |members| targets.iter().all(|f| members.contains(f))))
    }

    /// Block until all selected flags are absent, or the timeout expires
    ///
    /// Returns whether the flags are absent when the call returns.
    pub fn no_wait(&self, flags: impl FlagSelector, timeout: Option<Duration>) -> FlagResult<bool> {
        let targets = flags.select(&self.vocabulary)?;
        Ok(self.wait_until(timeout, |members| !targets.iter().any(|f| members.contains(f))))
    }

    /// Register a callback for transitions of `flag`
    ///
    /// `on` selects transitions to present (`Some(true)`), to absent
    /// (`Some(false)`) or both (`None`). `max_calls` of `None` is unlimited.
    pub fn when<F>(
        &self,
        flag: impl FlagSelector,
        on: Option<bool>,
        max_calls: Option<usize>,
        callback: F,
    ) -> FlagResult<()>
    where
        F: Fn(&Flag, bool) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let targets = flag.select(&self.vocabulary)?;
        let mut watchers = self.watchers.lock();
        for flag in targets {
            watchers.push(Watcher {
                flag,
                on,
                remaining: max_calls,
                callback: Arc::clone(&callback),
            });
        }
        Ok(())
    }

    pub fn on_set<F>(&self, flag: impl FlagSelector, callback: F) -> FlagResult<()>
    where
        F: Fn(&Flag, bool) + Send + Sync + 'static,
    {
        self.when(flag, Some(true), None, callback)
    }

    pub fn once_set<F>(&self, flag: impl FlagSelector, callback: F) -> FlagResult<()>
    where
        F: Fn(&Flag, bool) + Send + Sync + 'static,
    {
        self.when(flag, Some(true), Some(1), callback)
    }

    pub fn on_unset<F>(&self, flag: impl FlagSelector, callback: F) -> FlagResult<()>
    where
        F: Fn(&Flag, bool) + Send + Sync + 'static,
    {
        self.when(flag, Some(false), None, callback)
    }

    pub fn once_unset<F>(&self, flag: impl FlagSelector, callback: F) -> FlagResult<()>
    where
        F: Fn(&Flag, bool) + Send + Sync + 'static,
    {
        self.when(flag, Some(false), Some(1), callback)
    }

    /// Run the callback on every transition of `flag`
    pub fn on<F>(&self, flag: impl FlagSelector, callback: F) -> FlagResult<()>
    where
        F: Fn(&Flag, bool) + Send + Sync + 'static,
    {
        self.when(flag, None, None, callback)
    }

    /// Run the callback on the next transition of `flag`
    pub fn once<F>(&self, flag: impl FlagSelector, callback: F) -> FlagResult<()>
    where
        F: Fn(&Flag, bool) + Send + Sync + 'static,
    {
        self.when(flag, None, Some(1), callback)
    }

    fn mutate<F>(&self, change: F) -> FlagResult<()>
    where
        F: FnOnce(&mut Vec<Arc<Flag>>) -> FlagResult<()>,
    {
        let transitions = {
            let mut members = self.members.lock();
            let mut working = members.clone();
            change(&mut working)?;

            let mut transitions: Vec<(Arc<Flag>, bool)> = Vec::new();
            for flag in working.iter().filter(|f| !members.contains(*f)) {
                transitions.push((Arc::clone(flag), true));
            }
            for flag in members.iter().filter(|f| !working.contains(*f)) {
                transitions.push((Arc::clone(flag), false));
            }
            *members = working;
            self.changed.notify_all();
            transitions
        };

        if !transitions.is_empty() {
            trace!(flags = %self, changed = transitions.len(), "flag group updated");
            self.fire(&transitions);
        }
        Ok(())
    }

    fn fire(&self, transitions: &[(Arc<Flag>, bool)]) {
        let mut due: Vec<(Callback, Arc<Flag>, bool)> = Vec::new();
        {
            let mut watchers = self.watchers.lock();
            for (flag, is_set) in transitions {
                for watcher in watchers.iter_mut() {
                    if watcher.flag != *flag || watcher.on.is_some_and(|on| on != *is_set) {
                        continue;
                    }
                    match watcher.remaining {
                        Some(0) => continue,
                        Some(n) => watcher.remaining = Some(n - 1),
                        None => {}
                    }
                    due.push((Arc::clone(&watcher.callback), Arc::clone(flag), *is_set));
                }
            }
            watchers.retain(|w| w.remaining != Some(0));
        }

        for (callback, flag, is_set) in due {
            callback(&flag, is_set);
        }
    }

    fn wait_until<P>(&self, timeout: Option<Duration>, done: P) -> bool
    where
        P: Fn(&[Arc<Flag>]) -> bool,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut members = self.members.lock();
        loop {
            if done(&members) {
                return true;
            }
            match deadline {
                None => self.changed.wait(&mut members),
                Some(deadline) => {
                    if self.changed.wait_until(&mut members, deadline).timed_out() {
                        return done(&members);
                    }
                }
            }
        }
    }
}

/// Insert `flag` and, recursively, its parents
fn insert(
    vocabulary: &Vocabulary,
    working: &mut Vec<Arc<Flag>>,
    flag: &Arc<Flag>,
    auto_parent: bool,
) -> FlagResult<()> {
    if working.contains(flag) {
        return Ok(());
    }
    for name in flag.parents() {
        let parent = vocabulary.lookup(name)?;
        if working.contains(&parent) {
            continue;
        }
        if !auto_parent {
            return Err(FlagError::MissingParent {
                flag: flag.label().to_string(),
                parent: parent.label().to_string(),
            });
        }
        insert(vocabulary, working, &parent, auto_parent)?;
    }

    working.push(Arc::clone(flag));
    if let Some(members) = vocabulary.mutex_violation(working) {
        return Err(FlagError::MutexConflict { members });
    }
    Ok(())
}

/// Remove `targets`; with `cascade` dependents go too, otherwise they block
fn remove(working: &mut Vec<Arc<Flag>>, targets: &[Arc<Flag>], cascade: bool) -> FlagResult<()> {
    let mut removal: Vec<Arc<Flag>> = targets
        .iter()
        .filter(|f| working.contains(*f))
        .cloned()
        .collect();

    if cascade {
        loop {
            let dependents: Vec<Arc<Flag>> = working
                .iter()
                .filter(|m| !removal.contains(*m) && removal.iter().any(|r| m.depends_on(r)))
                .cloned()
                .collect();
            if dependents.is_empty() {
                break;
            }
            removal.extend(dependents);
        }
    } else {
        for member in working.iter().filter(|m| !removal.contains(*m)) {
            if let Some(parent) = removal.iter().find(|r| member.depends_on(r)) {
                return Err(FlagError::Dependent {
                    flag: parent.label().to_string(),
                    dependent: member.label().to_string(),
                });
            }
        }
    }

    working.retain(|m| !removal.contains(m));
    Ok(())
}

impl fmt::Display for FlagGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.labels().join("|"))
    }
}

impl fmt::Debug for FlagGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagGroup")
            .field("vocabulary", &self.vocabulary.name())
            .field("members", &self.labels())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// Small vocabulary shaped like the task one:
    /// `idle`, `busy` (mutex), `step`/`leap` under `busy` (mutex), `rev` under `busy`
    fn vocabulary() -> Arc<Vocabulary> {
        let vocab = Vocabulary::new("test");
        vocab
            .register([
                Flag::new("idle").unwrap(),
                Flag::new("busy").unwrap().with_aliases("b").unwrap(),
                Flag::new("step").unwrap().with_parents("busy").unwrap(),
                Flag::new("leap").unwrap().with_parents("busy").unwrap(),
                Flag::new("rev").unwrap().with_parents("busy").unwrap(),
                Flag::new("deep").unwrap().with_parents("rev").unwrap(),
            ])
            .unwrap();
        vocab.add_mutex_group(&["idle", "busy"]).unwrap();
        vocab.add_mutex_group(&["step", "leap"]).unwrap();
        Arc::new(vocab)
    }

    #[test]
    fn test_set_adds_parents() {
        let group = FlagGroup::empty(vocabulary());
        group.set("step").unwrap();
        assert!(group.has("busy"));
        assert!(group.has(["busy", "step"]));
        assert_eq!(group.to_string(), "[busy|step]");
    }

    #[test]
    fn test_set_without_auto_parent() {
        let group = FlagGroup::empty(vocabulary());
        let err = group.set_with("step", false).unwrap_err();
        assert_eq!(
            err,
            FlagError::MissingParent {
                flag: "step".into(),
                parent: "busy".into()
            }
        );
        assert!(group.is_empty());
    }

    #[test]
    fn test_mutex_conflict_rolls_back() {
        let group = FlagGroup::new(vocabulary(), "idle").unwrap();
        let err = group.set("step").unwrap_err();
        assert!(matches!(err, FlagError::MutexConflict { ref members } if members.len() == 2));
        assert!(group.all_strict("idle"));

        let group = FlagGroup::new(vocabulary(), "step").unwrap();
        assert!(group.set("leap").is_err());
        assert!(group.all_strict(["busy", "step"]));
    }

    #[test]
    fn test_set_then_unset_restores() {
        let group = FlagGroup::new(vocabulary(), "busy").unwrap();
        let before = group.members();
        group.set("rev").unwrap();
        group.unset("rev").unwrap();
        assert_eq!(group.members(), before);
    }

    #[test]
    fn test_unset_blocked_by_dependent() {
        let group = FlagGroup::new(vocabulary(), "step").unwrap();
        let err = group.unset("busy").unwrap_err();
        assert_eq!(
            err,
            FlagError::Dependent {
                flag: "busy".into(),
                dependent: "step".into()
            }
        );
        assert!(group.has("step"));

        // Removing parent and child together is fine in any order
        group.unset(["busy", "step"]).unwrap();
        assert!(group.is_empty());
    }

    #[test]
    fn test_unset_cascade_is_transitive() {
        let group = FlagGroup::new(vocabulary(), ["step", "deep"]).unwrap();
        group.unset_cascade("b").unwrap();
        assert!(group.is_empty());
    }

    #[test]
    fn test_unset_absent_is_noop() {
        let group = FlagGroup::new(vocabulary(), "idle").unwrap();
        group.unset("leap").unwrap();
        assert!(group.all_strict("idle"));
    }

    #[test]
    fn test_replace_is_atomic() {
        let group = FlagGroup::new(vocabulary(), ["step", "rev"]).unwrap();
        group.replace("busy", "idle").unwrap();
        assert!(group.all_strict("idle"));

        // A failing target leaves the removal undone as well
        let group = FlagGroup::new(vocabulary(), "step").unwrap();
        assert!(group.replace("rev", ["idle", "leap"]).is_err());
        assert!(group.all_strict(["busy", "step"]));
    }

    #[test]
    fn test_queries() {
        let group = FlagGroup::new(vocabulary(), "step").unwrap();
        assert!(group.any(["idle", "step"]));
        assert!(!group.any(["idle", "leap"]));
        assert!(group.all(["busy", "step"]));
        assert!(!group.all(["busy", "rev"]));
        assert!(group.all_strict(["step", "busy"]));
        assert!(!group.all_strict("step"));
        assert!(!group.has("unknown"));
    }

    #[test]
    fn test_unknown_and_incompatible_flags() {
        let group = FlagGroup::empty(vocabulary());
        assert!(matches!(group.set("nope"), Err(FlagError::UnknownFlag { .. })));

        let foreign = Flag::new("foreign").unwrap();
        assert!(matches!(group.set(foreign), Err(FlagError::Incompatible { .. })));
    }

    #[test]
    fn test_wait_times_out() {
        let group = FlagGroup::new(vocabulary(), "idle").unwrap();
        let present = group.wait("busy", Some(Duration::from_millis(20))).unwrap();
        assert!(!present);
        assert!(group.no_wait("busy", Some(Duration::from_millis(1))).unwrap());
    }

    #[test]
    fn test_wait_wakes_on_set() {
        let group = Arc::new(FlagGroup::new(vocabulary(), "idle").unwrap());
        let setter = Arc::clone(&group);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.replace("idle", "busy").unwrap();
        });

        assert!(group.wait("busy", Some(Duration::from_secs(5))).unwrap());
        handle.join().unwrap();
    }

    #[test]
    fn test_when_callbacks() {
        let group = FlagGroup::new(vocabulary(), "idle").unwrap();
        let sets = Arc::new(AtomicUsize::new(0));
        let unsets = Arc::new(AtomicUsize::new(0));
        let once = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&sets);
        group.on_set("busy", move |_, is_set| {
            assert!(is_set);
            s.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        let u = Arc::clone(&unsets);
        group.on_unset("busy", move |_, _| {
            u.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        let o = Arc::clone(&once);
        group.once("busy", move |_, _| {
            o.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        for _ in 0..3 {
            group.replace("idle", "busy").unwrap();
            group.replace("busy", "idle").unwrap();
        }

        assert_eq!(sets.load(Ordering::SeqCst), 3);
        assert_eq!(unsets.load(Ordering::SeqCst), 3);
        assert_eq!(once.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_query_group() {
        let group = Arc::new(FlagGroup::new(vocabulary(), "idle").unwrap());
        let seen = Arc::new(AtomicUsize::new(0));

        let inner = Arc::clone(&group);
        let s = Arc::clone(&seen);
        group
            .on_set("busy", move |_, _| {
                if inner.has("busy") {
                    s.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        group.replace("idle", "busy").unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
