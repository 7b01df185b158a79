use crate::{
    diff::{DiffEngine, LineDiff},
    error::{Error, Result},
    graph::{DeltaText, Revision, RevisionGraph},
    revision_id::RevisionId,
};

/// State given to new revisions unless told otherwise.
pub const DEFAULT_STATE: &str = "Exp";

/// The current time in the revision file's date format.
pub fn now() -> String {
    chrono::Utc::now().format("%Y.%m.%d.%H.%M.%S").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckinOptions {
    pub author: String,
    /// Defaults to [`now`].
    pub date: Option<String>,
    /// Defaults to [`DEFAULT_STATE`].
    pub state: Option<String>,
    /// Keep a lock on the new revision (`ci -l`).
    pub keep_lock: bool,
}

impl CheckinOptions {
    pub fn new(author: impl Into<String>) -> Self {
        CheckinOptions {
            author: author.into(),
            date: None,
            state: None,
            keep_lock: false,
        }
    }
}

/// Where a new revision goes.
#[derive(Debug)]
struct Placement {
    id: RevisionId,
    predecessor: RevisionId,
    /// The revision starts a branch that did not exist before.
    new_branch: bool,
}

impl RevisionGraph {
    /// Records `content` as a new revision and returns its number.
    ///
    /// With no `id` the new revision follows the one revision the author
    /// has locked. A trunk revision becomes the head and takes the literal
    /// content; everything else stores a script from its predecessor.
    pub fn checkin(
        &mut self,
        id: Option<&RevisionId>,
        content: &[u8],
        log: &str,
        options: &CheckinOptions,
    ) -> Result<RevisionId> {
        self.checkin_with(&LineDiff, id, content, log, options)
    }

    pub fn checkin_with(
        &mut self,
        engine: &dyn DiffEngine,
        id: Option<&RevisionId>,
        content: &[u8],
        log: &str,
        options: &CheckinOptions,
    ) -> Result<RevisionId> {
        let date = options.date.clone().unwrap_or_else(now);
        let state = options
            .state
            .clone()
            .unwrap_or_else(|| DEFAULT_STATE.to_string());
        let delta = |text: Vec<u8>| DeltaText {
            log: log.as_bytes().to_vec(),
            extension_fields: Vec::new(),
            text,
        };

        let head = match self.head.clone() {
            Some(head) => head,
            None => {
                let id = first_revision(id)?;
                let revision = Revision::new(id.clone(), date, options.author.clone(), state);
                self.change_texts_mut()?.push(id.clone(), delta(content.to_vec()));
                self.revisions.insert(id.clone(), revision);
                self.head = Some(id.clone());
                if options.keep_lock {
                    self.locks.insert(&options.author, id.clone());
                }
                log::info!("initial revision {}", id);
                return Ok(id);
            }
        };

        let placement = match id {
            Some(id) => self.place_explicit(id, &head)?,
            None => self.place_implicit(&options.author)?,
        };
        self.check_lock(&placement.predecessor, &options.author)?;
        let Placement {
            id,
            predecessor,
            new_branch,
        } = placement;

        let mut revision = Revision::new(id.clone(), date, options.author.clone(), state);
        if id.is_trunk() {
            // the old head keeps only the way back from the new content
            let head_content = self.reconstruct(&head)?;
            let back = engine.diff(content, &head_content).to_bytes();
            let texts = self.change_texts_mut()?;
            if let Some(old) = texts.get_mut(&head) {
                old.text = back;
            }
            texts.splice(id.clone(), delta(content.to_vec()), &head);
            revision.next = Some(head);
            self.head = Some(id.clone());
        } else {
            let from = self.reconstruct(&predecessor)?;
            let forward = engine.diff(&from, content).to_bytes();
            self.change_texts_mut()?
                .splice(id.clone(), delta(forward), &predecessor);
            if let Some(pred) = self.revision_mut(&predecessor) {
                if new_branch {
                    let at = pred.branches.partition_point(|b| b < &id);
                    pred.branches.insert(at, id.clone());
                } else {
                    pred.next = Some(id.clone());
                }
            }
        }
        self.revisions.insert(id.clone(), revision);

        if !new_branch && self.locks.holder(&predecessor) == Some(options.author.as_str()) {
            self.locks.remove(&predecessor);
        }
        if options.keep_lock {
            self.locks.insert(&options.author, id.clone());
        }
        log::info!("checked in {} after {}", id, predecessor);
        Ok(id)
    }

    fn place_implicit(&self, author: &str) -> Result<Placement> {
        let held: Vec<&RevisionId> = self.locks.held_by(author).collect();
        let predecessor = match held.as_slice() {
            [only] => (*only).clone(),
            [] => {
                let tip = self
                    .default_tip()
                    .ok_or_else(|| Error::not_found("default branch tip"))?;
                if let Some(holder) = self.locks.holder(&tip) {
                    return Err(Error::LockConflict {
                        revision: tip,
                        holder: holder.to_string(),
                    });
                }
                if self.strict_locks {
                    return Err(Error::LockAmbiguous {
                        user: author.to_string(),
                        held: 0,
                    });
                }
                tip
            }
            _ => {
                return Err(Error::LockAmbiguous {
                    user: author.to_string(),
                    held: held.len(),
                })
            }
        };
        if self.is_tip(&predecessor) {
            return Ok(Placement {
                id: predecessor.increment()?,
                predecessor,
                new_branch: false,
            });
        }
        let mut highest = 0;
        for first in &self.require(&predecessor)?.branches {
            let number = first.parts().get(predecessor.len()).ok_or_else(|| {
                Error::Consistency(format!("{} is not a branch of {}", first, predecessor))
            })?;
            highest = highest.max(*number);
        }
        let number = highest.checked_add(1).ok_or_else(|| {
            Error::InvalidRevision(format!("no branch number left at {}", predecessor))
        })?;
        Ok(Placement {
            id: predecessor.child(number).first_on_branch(),
            predecessor,
            new_branch: true,
        })
    }

    fn place_explicit(&self, id: &RevisionId, head: &RevisionId) -> Result<Placement> {
        let (branch, wanted) = if id.is_revision() {
            (id.branch(), Some(id.clone()))
        } else {
            (id.clone(), None)
        };
        let invalid = |why: &str| Error::InvalidRevision(format!("{}: {}", id, why));

        if branch.len() == 1 {
            let id = match (wanted, self.branch_tip(&branch)) {
                (Some(wanted), _) => wanted,
                (None, Some(tip)) => tip.increment()?,
                (None, None) => branch.first_on_branch(),
            };
            if &id <= head {
                return Err(invalid("trunk revisions must exceed the head"));
            }
            return Ok(Placement {
                id,
                predecessor: head.clone(),
                new_branch: false,
            });
        }

        match self.branch_tip(&branch) {
            Some(tip) => {
                let id = match wanted {
                    Some(wanted) if wanted <= tip => {
                        return Err(invalid(&format!("branch tip is already {}", tip)))
                    }
                    Some(wanted) => wanted,
                    None => tip.increment()?,
                };
                Ok(Placement {
                    id,
                    predecessor: tip,
                    new_branch: false,
                })
            }
            None => {
                let root = branch
                    .branch_point()
                    .ok_or_else(|| invalid("no rooting revision"))?;
                self.require(&root)?;
                Ok(Placement {
                    id: wanted.unwrap_or_else(|| branch.first_on_branch()),
                    predecessor: root,
                    new_branch: true,
                })
            }
        }
    }

    fn check_lock(&self, predecessor: &RevisionId, author: &str) -> Result<()> {
        match self.locks.holder(predecessor) {
            Some(holder) if holder != author => Err(Error::LockConflict {
                revision: predecessor.clone(),
                holder: holder.to_string(),
            }),
            Some(_) => Ok(()),
            None if self.strict_locks => Err(Error::LockAmbiguous {
                user: author.to_string(),
                held: self.locks.held_by(author).count(),
            }),
            None => Ok(()),
        }
    }
}

fn first_revision(id: Option<&RevisionId>) -> Result<RevisionId> {
    match id {
        None => "1.1".parse(),
        Some(id) if id.len() == 1 => Ok(id.first_on_branch()),
        Some(id) if id.is_trunk() => Ok(id.clone()),
        Some(id) => Err(Error::InvalidRevision(format!(
            "{}: the first revision must be on the trunk",
            id
        ))),
    }
}

#[cfg(test)]
fn rev(s: &str) -> RevisionId {
    s.parse().unwrap()
}

#[cfg(test)]
fn options(author: &str) -> CheckinOptions {
    CheckinOptions {
        date: Some(String::from("2024.05.01.12.00.00")),
        ..CheckinOptions::new(author)
    }
}

#[cfg(test)]
pub(crate) fn assert_head_anchor(graph: &RevisionGraph) {
    let head = graph.head().unwrap();
    for (id, text) in graph.change_texts().unwrap().iter() {
        if id == head {
            assert_eq!(graph.reconstruct(id).unwrap(), text.text);
        } else {
            assert!(crate::delta::Script::parse(&text.text).is_ok());
        }
    }
}

#[test]
fn test_first_checkin() {
    let mut graph = RevisionGraph::new();
    let id = graph
        .checkin(None, b"a\nb\nc\n", "initial", &options("alice"))
        .unwrap();
    assert_eq!(id, rev("1.1"));
    assert_eq!(graph.head(), Some(&rev("1.1")));
    assert_eq!(graph.reconstruct(&id).unwrap(), b"a\nb\nc\n".to_vec());
    let text = graph.change_text(&id).unwrap();
    assert_eq!(text.text, b"a\nb\nc\n".to_vec());
    assert_eq!(text.log, b"initial".to_vec());
    let revision = graph.revision(&id).unwrap();
    assert_eq!(revision.state, DEFAULT_STATE);
    assert_eq!(revision.author, "alice");
}

#[test]
fn test_first_checkin_numbering() {
    let mut graph = RevisionGraph::new();
    assert_eq!(
        graph
            .checkin(Some(&rev("3")), b"x\n", "m", &options("alice"))
            .unwrap(),
        rev("3.1")
    );
    let mut graph = RevisionGraph::new();
    assert!(matches!(
        graph.checkin(Some(&rev("1.1.1.1")), b"x\n", "m", &options("alice")),
        Err(Error::InvalidRevision(_))
    ));
}

#[test]
fn test_second_checkin_keeps_history() {
    let mut graph = RevisionGraph::new();
    graph
        .checkin(None, b"a\nb\nc\n", "initial", &options("alice"))
        .unwrap();
    let id = graph
        .checkin(None, b"a\nX\nc\n", "second", &options("alice"))
        .unwrap();
    assert_eq!(id, rev("1.2"));
    assert_eq!(graph.head(), Some(&rev("1.2")));
    assert_eq!(graph.reconstruct(&rev("1.1")).unwrap(), b"a\nb\nc\n".to_vec());
    assert_eq!(graph.reconstruct(&rev("1.2")).unwrap(), b"a\nX\nc\n".to_vec());
    assert_eq!(graph.revision(&rev("1.2")).unwrap().next, Some(rev("1.1")));
    assert_eq!(
        graph.change_text(&rev("1.1")).unwrap().text,
        b"d2 1\na1 1\nb\n".to_vec()
    );
    assert_head_anchor(&graph);
}

#[test]
fn test_lock_gates_commits() {
    let mut graph = RevisionGraph::new();
    graph
        .checkin(None, b"a\n", "initial", &options("alice"))
        .unwrap();
    graph.lock(&rev("1.1"), "alice").unwrap();
    assert!(matches!(
        graph.checkin(None, b"b\n", "bob", &options("bob")),
        Err(Error::LockConflict { ref holder, .. }) if holder == "alice"
    ));
    assert_eq!(graph.head(), Some(&rev("1.1")));

    let id = graph
        .checkin(None, b"c\n", "alice", &options("alice"))
        .unwrap();
    assert_eq!(id, rev("1.2"));
    assert!(graph.locks().is_empty());
}

#[test]
fn test_keep_lock_moves_it() {
    let mut graph = RevisionGraph::new();
    graph.checkin(None, b"a\n", "m", &options("alice")).unwrap();
    graph.lock(&rev("1.1"), "alice").unwrap();
    let keep = CheckinOptions {
        keep_lock: true,
        ..options("alice")
    };
    graph.checkin(None, b"b\n", "m", &keep).unwrap();
    assert_eq!(graph.locks().holder(&rev("1.2")), Some("alice"));
    assert_eq!(graph.locks().holder(&rev("1.1")), None);
}

#[test]
fn test_strict_locking_requires_a_lock() {
    let mut graph = RevisionGraph::new();
    graph.checkin(None, b"a\n", "m", &options("alice")).unwrap();
    graph.set_strict(true);
    assert!(matches!(
        graph.checkin(None, b"b\n", "m", &options("alice")),
        Err(Error::LockAmbiguous { held: 0, .. })
    ));
    assert!(matches!(
        graph.checkin(Some(&rev("1.2")), b"b\n", "m", &options("alice")),
        Err(Error::LockAmbiguous { .. })
    ));
}

#[test]
fn test_locked_non_tip_opens_branch() {
    let mut graph = RevisionGraph::new();
    graph.checkin(None, b"a\n", "m", &options("alice")).unwrap();
    graph.checkin(None, b"b\n", "m", &options("alice")).unwrap();
    graph.lock(&rev("1.1"), "alice").unwrap();
    let id = graph
        .checkin(None, b"a\nbranch\n", "m", &options("alice"))
        .unwrap();
    assert_eq!(id, rev("1.1.1.1"));
    assert_eq!(graph.revision(&rev("1.1")).unwrap().branches, vec![rev("1.1.1.1")]);
    // opening a branch leaves the lock where it was
    assert_eq!(graph.locks().holder(&rev("1.1")), Some("alice"));
    assert_eq!(graph.reconstruct(&id).unwrap(), b"a\nbranch\n".to_vec());
    assert_eq!(graph.reconstruct(&rev("1.2")).unwrap(), b"b\n".to_vec());

    let id = graph
        .checkin(None, b"a\nagain\n", "m", &options("alice"))
        .unwrap();
    assert_eq!(id, rev("1.1.2.1"));
    assert_eq!(
        graph.revision(&rev("1.1")).unwrap().branches,
        vec![rev("1.1.1.1"), rev("1.1.2.1")]
    );
    assert_head_anchor(&graph);
}

#[test]
fn test_explicit_numbers() {
    let mut graph = RevisionGraph::new();
    graph.checkin(None, b"a\n", "m", &options("alice")).unwrap();
    graph.checkin(None, b"b\n", "m", &options("alice")).unwrap();

    let id = graph
        .checkin(Some(&rev("1.1.4")), b"x\n", "m", &options("alice"))
        .unwrap();
    assert_eq!(id, rev("1.1.4.1"));
    let id = graph
        .checkin(Some(&rev("1.1.4")), b"y\n", "m", &options("alice"))
        .unwrap();
    assert_eq!(id, rev("1.1.4.2"));
    assert_eq!(graph.revision(&rev("1.1.4.1")).unwrap().next, Some(rev("1.1.4.2")));
    let id = graph
        .checkin(Some(&rev("1.1.2")), b"z\n", "m", &options("alice"))
        .unwrap();
    assert_eq!(id, rev("1.1.2.1"));
    assert_eq!(
        graph.revision(&rev("1.1")).unwrap().branches,
        vec![rev("1.1.2.1"), rev("1.1.4.1")]
    );

    assert!(matches!(
        graph.checkin(Some(&rev("1.1.4.2")), b"w\n", "m", &options("alice")),
        Err(Error::InvalidRevision(_))
    ));
    assert!(matches!(
        graph.checkin(Some(&rev("1.2")), b"w\n", "m", &options("alice")),
        Err(Error::InvalidRevision(_))
    ));
    assert!(matches!(
        graph.checkin(Some(&rev("1.7.1")), b"w\n", "m", &options("alice")),
        Err(Error::RevisionNotFound(_))
    ));

    let id = graph
        .checkin(Some(&rev("2")), b"two\n", "m", &options("alice"))
        .unwrap();
    assert_eq!(id, rev("2.1"));
    assert_eq!(graph.head(), Some(&rev("2.1")));
    let id = graph
        .checkin(Some(&rev("2.5")), b"five\n", "m", &options("alice"))
        .unwrap();
    assert_eq!(id, rev("2.5"));

    for (id, content) in [
        ("1.1", "a\n"),
        ("1.2", "b\n"),
        ("1.1.4.1", "x\n"),
        ("1.1.4.2", "y\n"),
        ("1.1.2.1", "z\n"),
        ("2.1", "two\n"),
        ("2.5", "five\n"),
    ] {
        assert_eq!(graph.reconstruct(&rev(id)).unwrap(), content.as_bytes().to_vec());
    }
    assert_head_anchor(&graph);
}

#[test]
fn test_now_format() {
    let date = now();
    assert_eq!(date.len(), "2024.05.01.12.00.00".len());
    assert_eq!(date.matches('.').count(), 5);
}
