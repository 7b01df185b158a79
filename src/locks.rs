use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    graph::RevisionGraph,
    revision_id::RevisionId,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub user: String,
    pub revision: RevisionId,
}

/// Revision locks in file order. A revision carries at most one lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockTable {
    locks: Vec<Lock>,
}

impl LockTable {
    pub fn holder(&self, id: &RevisionId) -> Option<&str> {
        self.locks
            .iter()
            .find(|l| &l.revision == id)
            .map(|l| l.user.as_str())
    }

    pub fn held_by<'a>(&'a self, user: &'a str) -> impl Iterator<Item = &'a RevisionId> + 'a {
        self.locks
            .iter()
            .filter(move |l| l.user == user)
            .map(|l| &l.revision)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lock> {
        self.locks.iter()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Appends a lock read from a file.
    pub(crate) fn push(&mut self, lock: Lock) {
        self.locks.push(lock);
    }

    /// New locks go to the front, as RCS lists them.
    pub(crate) fn insert(&mut self, user: &str, revision: RevisionId) {
        self.locks.insert(
            0,
            Lock {
                user: user.to_string(),
                revision,
            },
        );
    }

    pub(crate) fn remove(&mut self, id: &RevisionId) -> Option<Lock> {
        let at = self.locks.iter().position(|l| &l.revision == id)?;
        Some(self.locks.remove(at))
    }
}

/// What `unlock` does with a lock that belongs to somebody else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockBreakPolicy {
    /// Break the lock and tell the previous holder.
    #[default]
    BreakAndNotify,
    /// Refuse with [`Error::LockConflict`].
    Refuse,
}

/// Receives notice of a lock broken by another user.
pub trait LockNotifier {
    fn lock_broken(&self, revision: &RevisionId, holder: &str, breaker: &str);
}

/// Reports broken locks through the `log` facade.
pub struct LogNotifier;

impl LockNotifier for LogNotifier {
    fn lock_broken(&self, revision: &RevisionId, holder: &str, breaker: &str) {
        log::warn!(
            "revision {} locked by {} was unlocked by {}",
            revision,
            holder,
            breaker
        );
    }
}

impl RevisionGraph {
    /// Locks `id` for `user`. Returns false when `user` already held it.
    pub fn lock(&mut self, id: &RevisionId, user: &str) -> Result<bool> {
        self.require(id)?;
        match self.locks.holder(id) {
            Some(holder) if holder == user => Ok(false),
            Some(holder) => Err(Error::LockConflict {
                revision: id.clone(),
                holder: holder.to_string(),
            }),
            None => {
                log::debug!("locking {} for {}", id, user);
                self.locks.insert(user, id.clone());
                Ok(true)
            }
        }
    }

    /// Removes a lock. With no `id`, the single lock `user` holds is
    /// released. Returns the removed lock, or `None` if `id` was not locked.
    pub fn unlock(
        &mut self,
        id: Option<&RevisionId>,
        user: &str,
        policy: LockBreakPolicy,
        notifier: &dyn LockNotifier,
    ) -> Result<Option<Lock>> {
        let id = match id {
            Some(id) => id.clone(),
            None => self.sole_lock(user)?,
        };
        let holder = match self.locks.holder(&id) {
            None => return Ok(None),
            Some(holder) => holder.to_string(),
        };
        if holder != user {
            match policy {
                LockBreakPolicy::Refuse => {
                    return Err(Error::LockConflict {
                        revision: id,
                        holder,
                    })
                }
                LockBreakPolicy::BreakAndNotify => notifier.lock_broken(&id, &holder, user),
            }
        }
        Ok(self.locks.remove(&id))
    }

    /// The one revision `user` has locked.
    pub(crate) fn sole_lock(&self, user: &str) -> Result<RevisionId> {
        let held: Vec<&RevisionId> = self.locks.held_by(user).collect();
        match held.as_slice() {
            [only] => Ok((*only).clone()),
            _ => Err(Error::LockAmbiguous {
                user: user.to_string(),
                held: held.len(),
            }),
        }
    }

    pub fn set_strict(&mut self, strict: bool) {
        self.strict_locks = strict;
    }

    /// Adds `user` to the access list. Returns false if already present.
    pub fn add_access(&mut self, user: &str) -> bool {
        if self.access.iter().any(|u| u == user) {
            return false;
        }
        self.access.push(user.to_string());
        true
    }

    pub fn remove_access(&mut self, user: &str) -> bool {
        let before = self.access.len();
        self.access.retain(|u| u != user);
        before != self.access.len()
    }
}

#[cfg(test)]
use std::cell::RefCell;

#[cfg(test)]
use crate::checkin::CheckinOptions;

#[cfg(test)]
struct Recorder(RefCell<Vec<String>>);

#[cfg(test)]
impl LockNotifier for Recorder {
    fn lock_broken(&self, revision: &RevisionId, holder: &str, breaker: &str) {
        self.0
            .borrow_mut()
            .push(format!("{} {} {}", revision, holder, breaker));
    }
}

#[cfg(test)]
fn rev(s: &str) -> RevisionId {
    s.parse().unwrap()
}

#[cfg(test)]
fn graph() -> RevisionGraph {
    let mut graph = RevisionGraph::new();
    graph
        .checkin(None, b"a\n", "initial", &CheckinOptions::new("alice"))
        .unwrap();
    graph
}

#[test]
fn test_lock_is_idempotent_for_holder() {
    let mut graph = graph();
    assert!(graph.lock(&rev("1.1"), "alice").unwrap());
    assert!(!graph.lock(&rev("1.1"), "alice").unwrap());
    assert_eq!(graph.locks().len(), 1);
}

#[test]
fn test_lock_conflict_leaves_table_alone() {
    let mut graph = graph();
    graph.lock(&rev("1.1"), "alice").unwrap();
    let err = graph.lock(&rev("1.1"), "bob").unwrap_err();
    assert!(matches!(err, Error::LockConflict { ref holder, .. } if holder == "alice"));
    assert_eq!(graph.locks().holder(&rev("1.1")), Some("alice"));
}

#[test]
fn test_lock_missing_revision() {
    let mut graph = graph();
    assert!(matches!(
        graph.lock(&rev("1.9"), "alice"),
        Err(Error::RevisionNotFound(_))
    ));
}

#[test]
fn test_unlock_own_lock_by_default() {
    let mut graph = graph();
    graph.lock(&rev("1.1"), "alice").unwrap();
    let removed = graph
        .unlock(None, "alice", LockBreakPolicy::Refuse, &LogNotifier)
        .unwrap();
    assert_eq!(removed.map(|l| l.user), Some(String::from("alice")));
    assert!(graph.locks().is_empty());
}

#[test]
fn test_unlock_without_any_lock_is_ambiguous() {
    let mut graph = graph();
    assert!(matches!(
        graph.unlock(None, "alice", LockBreakPolicy::Refuse, &LogNotifier),
        Err(Error::LockAmbiguous { held: 0, .. })
    ));
}

#[test]
fn test_breaking_a_lock_notifies() {
    let mut graph = graph();
    graph.lock(&rev("1.1"), "alice").unwrap();
    let recorder = Recorder(RefCell::new(Vec::new()));
    graph
        .unlock(
            Some(&rev("1.1")),
            "bob",
            LockBreakPolicy::BreakAndNotify,
            &recorder,
        )
        .unwrap();
    assert!(graph.locks().is_empty());
    assert_eq!(recorder.0.into_inner(), vec![String::from("1.1 alice bob")]);
}

#[test]
fn test_refuse_policy_keeps_foreign_lock() {
    let mut graph = graph();
    graph.lock(&rev("1.1"), "alice").unwrap();
    assert!(matches!(
        graph.unlock(Some(&rev("1.1")), "bob", LockBreakPolicy::Refuse, &LogNotifier),
        Err(Error::LockConflict { .. })
    ));
    assert_eq!(graph.locks().holder(&rev("1.1")), Some("alice"));
}

#[test]
fn test_access_list() {
    let mut graph = graph();
    assert!(graph.add_access("alice"));
    assert!(!graph.add_access("alice"));
    assert!(graph.remove_access("alice"));
    assert!(graph.access.is_empty());
}
