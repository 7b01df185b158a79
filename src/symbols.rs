use std::cmp::Ordering;

use crate::{
    error::{Error, Result},
    graph::RevisionGraph,
    revision_id::RevisionId,
};

/// Names that always mean something other than a tag.
const RESERVED_TAGS: [&str; 2] = ["HEAD", "BASE"];
const FORBIDDEN_TAG_CHARS: &[u8] = b"$,.:;@";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub tag: String,
    pub revision: RevisionId,
}

/// Tag to revision (or branch) mapping in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn get(&self, tag: &str) -> Option<&RevisionId> {
        self.symbols
            .iter()
            .find(|s| s.tag == tag)
            .map(|s| &s.revision)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Tags naming exactly `id`.
    pub fn tags_for<'a>(&'a self, id: &'a RevisionId) -> impl Iterator<Item = &'a str> + 'a {
        self.symbols
            .iter()
            .filter(move |s| &s.revision == id)
            .map(|s| s.tag.as_str())
    }

    pub(crate) fn push(&mut self, symbol: Symbol) {
        self.symbols.push(symbol);
    }

    /// Points `tag` at `revision`, moving it in place if it exists and
    /// listing it first otherwise. Returns the previous target.
    pub(crate) fn set(&mut self, tag: &str, revision: RevisionId) -> Option<RevisionId> {
        if let Some(symbol) = self.symbols.iter_mut().find(|s| s.tag == tag) {
            return Some(std::mem::replace(&mut symbol.revision, revision));
        }
        self.symbols.insert(
            0,
            Symbol {
                tag: tag.to_string(),
                revision,
            },
        );
        None
    }

    pub(crate) fn remove(&mut self, tag: &str) -> Option<RevisionId> {
        let at = self.symbols.iter().position(|s| s.tag == tag)?;
        Some(self.symbols.remove(at).revision)
    }
}

/// Checks that `tag` can be stored as a symbolic name.
pub fn check_tag(tag: &str) -> Result<()> {
    let invalid = |why: &str| -> Result<()> { Err(Error::InvalidTag(format!("`{}` {}", tag, why))) };
    if !tag.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return invalid("must start with a letter");
    }
    if RESERVED_TAGS.contains(&tag) {
        return invalid("is reserved");
    }
    if let Some(c) = tag
        .bytes()
        .find(|b| !b.is_ascii_graphic() || FORBIDDEN_TAG_CHARS.contains(b))
    {
        return invalid(&format!("contains `{}`", c.escape_ascii()));
    }
    Ok(())
}

/// Compares RCS dates. Two digit years predate four digit ones, so the
/// shorter date is the older.
pub fn compare_dates(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl RevisionGraph {
    /// Resolves a tag, revision or branch number to an existing revision.
    ///
    /// `HEAD` and the empty string mean the default tip. A branch (numeric
    /// or tagged) means its tip. A magic branch number means the tip of the
    /// real branch it stands for; a magic *tag* whose branch has no
    /// revisions yet resolves to the revision it is rooted at.
    pub fn resolve(&self, name: &str) -> Result<RevisionId> {
        if RevisionId::is_numeric(name) {
            let id: RevisionId = name.parse()?;
            return self.resolve_id(&id).ok_or_else(|| Error::not_found(name));
        }
        self.lookup(name).ok_or_else(|| Error::not_found(name))
    }

    /// Like [`RevisionGraph::resolve`] but a miss is `None`.
    pub fn lookup(&self, name: &str) -> Option<RevisionId> {
        if name.is_empty() || name == "HEAD" {
            return self.default_tip();
        }
        if RevisionId::is_numeric(name) {
            return self.resolve_id(&name.parse().ok()?);
        }
        let target = self.symbols.get(name)?;
        if let Some(branch) = target.magic_branch() {
            return self
                .branch_tip(&branch)
                .or_else(|| self.rooted_at(&branch));
        }
        if target.is_branch() {
            return self.branch_tip(target).or_else(|| self.rooted_at(target));
        }
        self.contains(target).then(|| target.clone())
    }

    /// Resolves `name`, falling back to the head when nothing matches.
    pub fn resolve_or_head(&self, name: &str) -> Option<RevisionId> {
        self.lookup(name).or_else(|| self.head.clone())
    }

    fn resolve_id(&self, id: &RevisionId) -> Option<RevisionId> {
        if id.is_branch() {
            return self.branch_tip(id);
        }
        if self.contains(id) {
            return Some(id.clone());
        }
        self.branch_tip(&id.magic_branch()?)
    }

    fn rooted_at(&self, branch: &RevisionId) -> Option<RevisionId> {
        let root = branch.branch_point()?;
        self.contains(&root).then_some(root)
    }

    /// True when `id` names something a tag may point at.
    fn taggable(&self, id: &RevisionId) -> bool {
        if let Some(branch) = id.magic_branch() {
            return self.rooted_at(&branch).is_some();
        }
        if id.is_branch() {
            return match id.branch_point() {
                None => true,
                Some(root) => self.contains(&root),
            };
        }
        self.contains(id)
    }

    /// Points `tag` at `id`, replacing any previous target. Returns the
    /// previous target.
    pub fn set_tag(&mut self, tag: &str, id: &RevisionId) -> Result<Option<RevisionId>> {
        check_tag(tag)?;
        if !self.taggable(id) {
            return Err(Error::not_found(id));
        }
        self.reserved.retain(|r| r != id);
        log::debug!("tagging {} as {}", id, tag);
        Ok(self.symbols.set(tag, id.clone()))
    }

    /// Removes `tag`; false when it did not exist.
    pub fn delete_tag(&mut self, tag: &str) -> bool {
        self.symbols.remove(tag).is_some()
    }

    pub fn symbols_for<'a>(&'a self, id: &'a RevisionId) -> Vec<&'a str> {
        self.symbols.tags_for(id).collect()
    }

    /// Picks the lowest free magic branch number `base.0.N` (N even, from 2)
    /// and reserves it so that later calls on this graph pick another.
    pub fn reserve_magic_branch(&mut self, base: &RevisionId) -> Result<RevisionId> {
        let root = self.require(base)?;
        if !base.is_revision() {
            return Err(Error::InvalidRevision(base.to_string()));
        }
        let mut n = 2;
        let magic = loop {
            let branch = base.child(n);
            let candidate = RevisionId::magic(base, n);
            let taken = root.branches.iter().any(|b| b.on_branch(&branch))
                || self.symbols.iter().any(|s| s.revision == candidate)
                || self.reserved.contains(&candidate);
            if !taken {
                break candidate;
            }
            n += 2;
        };
        self.reserved.push(magic.clone());
        Ok(magic)
    }

    /// Sets or clears the default branch. A revision number is cut down to
    /// the branch it lives on.
    pub fn set_default_branch(&mut self, branch: Option<&RevisionId>) -> Result<()> {
        let branch = match branch {
            None => None,
            Some(id) if id.is_revision() => Some(id.branch()),
            Some(id) => Some(id.clone()),
        };
        if let Some(branch) = &branch {
            if self.branch_tip(branch).is_none() {
                return Err(Error::not_found(branch));
            }
        }
        self.default_branch = branch;
        Ok(())
    }

    /// The newest revision not later than `date`, looked up on `branch`
    /// (or on the default branch, then the trunk).
    pub fn revision_at_date(&self, date: &str, branch: Option<&RevisionId>) -> Option<RevisionId> {
        if let Some(branch) = branch.or(self.default_branch.as_ref()) {
            if branch.branch_point().is_some() {
                return self.branch_revision_at_date(date, branch);
            }
        }
        let head = self.head.as_ref()?;
        self.chain(head)
            .find(|r| compare_dates(&r.date, date) != Ordering::Greater)
            .map(|r| r.id.clone())
    }

    fn branch_revision_at_date(&self, date: &str, branch: &RevisionId) -> Option<RevisionId> {
        let root = self.revision(&branch.branch_point()?)?;
        let mut found =
            (compare_dates(&root.date, date) != Ordering::Greater).then(|| root.id.clone());
        if let Some(first) = root.branches.iter().find(|b| b.on_branch(branch)) {
            for revision in self.chain(first) {
                if compare_dates(&revision.date, date) == Ordering::Greater {
                    break;
                }
                found = Some(revision.id.clone());
            }
        }
        found
    }
}

#[cfg(test)]
use crate::checkin::CheckinOptions;

#[cfg(test)]
fn rev(s: &str) -> RevisionId {
    s.parse().unwrap()
}

#[cfg(test)]
fn commit(graph: &mut RevisionGraph, id: Option<&str>, content: &str, date: &str) -> RevisionId {
    let options = CheckinOptions {
        date: Some(date.to_string()),
        ..CheckinOptions::new("alice")
    };
    let id = id.map(rev);
    graph
        .checkin(id.as_ref(), content.as_bytes(), "msg", &options)
        .unwrap()
}

#[cfg(test)]
fn sample() -> RevisionGraph {
    let mut graph = RevisionGraph::new();
    commit(&mut graph, None, "a\n", "2020.01.01.00.00.00");
    commit(&mut graph, None, "b\n", "2020.02.01.00.00.00");
    commit(&mut graph, Some("1.1.2"), "c\n", "2020.03.01.00.00.00");
    commit(&mut graph, Some("1.1.2"), "d\n", "2020.04.01.00.00.00");
    graph
}

#[test]
fn test_check_tag() {
    assert!(check_tag("REL1_0").is_ok());
    assert!(check_tag("rel-2").is_ok());
    for bad in ["1REL", "HEAD", "BASE", "a.b", "a:b", "a b", "a@b", "a$", ""] {
        assert!(matches!(check_tag(bad), Err(Error::InvalidTag(_))), "{}", bad);
    }
}

#[test]
fn test_set_and_delete_tag() {
    let mut graph = sample();
    assert_eq!(graph.set_tag("REL1", &rev("1.2")).unwrap(), None);
    assert_eq!(graph.resolve("REL1").unwrap(), rev("1.2"));
    assert!(graph.delete_tag("REL1"));
    assert!(matches!(
        graph.resolve("REL1"),
        Err(Error::RevisionNotFound(_))
    ));
    assert!(!graph.delete_tag("REL1"));
}

#[test]
fn test_moving_a_tag_keeps_its_place() {
    let mut graph = sample();
    graph.set_tag("A", &rev("1.1")).unwrap();
    graph.set_tag("B", &rev("1.1")).unwrap();
    assert_eq!(graph.set_tag("A", &rev("1.2")).unwrap(), Some(rev("1.1")));
    let tags: Vec<&str> = graph.symbols().iter().map(|s| s.tag.as_str()).collect();
    assert_eq!(tags, vec!["B", "A"]);
    assert_eq!(graph.symbols_for(&rev("1.1")), vec!["B"]);
}

#[test]
fn test_tag_missing_revision() {
    let mut graph = sample();
    assert!(matches!(
        graph.set_tag("X", &rev("1.7")),
        Err(Error::RevisionNotFound(_))
    ));
}

#[test]
fn test_resolve_numbers() {
    let graph = sample();
    assert_eq!(graph.resolve("").unwrap(), rev("1.2"));
    assert_eq!(graph.resolve("HEAD").unwrap(), rev("1.2"));
    assert_eq!(graph.resolve("1.1").unwrap(), rev("1.1"));
    assert_eq!(graph.resolve("1").unwrap(), rev("1.2"));
    assert_eq!(graph.resolve("1.1.2").unwrap(), rev("1.1.2.2"));
    assert_eq!(graph.resolve("1.1.0.2").unwrap(), rev("1.1.2.2"));
    assert!(matches!(
        graph.resolve("1.1.0.4"),
        Err(Error::RevisionNotFound(_))
    ));
    assert!(matches!(
        graph.resolve("1.x"),
        Err(Error::InvalidRevision(_))
    ));
    assert_eq!(graph.lookup("1.9"), None);
    assert_eq!(graph.resolve_or_head("nothing"), Some(rev("1.2")));
}

#[test]
fn test_resolve_branch_tags() {
    let mut graph = sample();
    graph.set_tag("BR", &rev("1.1.0.2")).unwrap();
    graph.set_tag("EMPTY", &rev("1.2.0.2")).unwrap();
    graph.set_tag("PLAIN", &rev("1.1.2")).unwrap();
    assert_eq!(graph.resolve("BR").unwrap(), rev("1.1.2.2"));
    assert_eq!(graph.resolve("EMPTY").unwrap(), rev("1.2"));
    assert_eq!(graph.resolve("PLAIN").unwrap(), rev("1.1.2.2"));
}

#[test]
fn test_magic_branch_reservation() {
    let mut graph = sample();
    // 1.1.2 exists as a real branch
    assert_eq!(graph.reserve_magic_branch(&rev("1.1")).unwrap(), rev("1.1.0.4"));
    assert_eq!(graph.reserve_magic_branch(&rev("1.1")).unwrap(), rev("1.1.0.6"));
    graph.set_tag("T", &rev("1.2.0.2")).unwrap();
    assert_eq!(graph.reserve_magic_branch(&rev("1.2")).unwrap(), rev("1.2.0.4"));
    assert!(matches!(
        graph.reserve_magic_branch(&rev("1.5")),
        Err(Error::RevisionNotFound(_))
    ));
}

#[test]
fn test_magic_branches_from_a_fresh_base() {
    let mut graph = sample();
    assert!(graph.revision(&rev("1.2")).unwrap().branches.is_empty());
    assert_eq!(graph.reserve_magic_branch(&rev("1.2")).unwrap(), rev("1.2.0.2"));
    assert_eq!(graph.reserve_magic_branch(&rev("1.2")).unwrap(), rev("1.2.0.4"));
}

#[test]
fn test_magic_branch_is_deterministic() {
    let mut left = sample();
    let mut right = sample();
    for _ in 0..3 {
        assert_eq!(
            left.reserve_magic_branch(&rev("1.2")).unwrap(),
            right.reserve_magic_branch(&rev("1.2")).unwrap()
        );
    }
}

#[test]
fn test_default_branch() {
    let mut graph = sample();
    graph.set_default_branch(Some(&rev("1.1.2.1"))).unwrap();
    assert_eq!(graph.default_branch(), Some(&rev("1.1.2")));
    assert_eq!(graph.resolve("HEAD").unwrap(), rev("1.1.2.2"));
    assert!(graph.set_default_branch(Some(&rev("1.2.4"))).is_err());
    graph.set_default_branch(None).unwrap();
    assert_eq!(graph.resolve("").unwrap(), rev("1.2"));
}

#[test]
fn test_revision_at_date() {
    let graph = sample();
    assert_eq!(
        graph.revision_at_date("2020.01.15.00.00.00", None),
        Some(rev("1.1"))
    );
    assert_eq!(
        graph.revision_at_date("2021.01.01.00.00.00", None),
        Some(rev("1.2"))
    );
    assert_eq!(graph.revision_at_date("2019.01.01.00.00.00", None), None);
    let branch = rev("1.1.2");
    assert_eq!(
        graph.revision_at_date("2020.03.15.00.00.00", Some(&branch)),
        Some(rev("1.1.2.1"))
    );
    assert_eq!(
        graph.revision_at_date("2020.01.15.00.00.00", Some(&branch)),
        Some(rev("1.1"))
    );
}

#[test]
fn test_compare_dates() {
    assert_eq!(
        compare_dates("99.12.31.23.59.59", "2000.01.01.00.00.00"),
        Ordering::Less
    );
    assert_eq!(
        compare_dates("2001.01.01.00.00.00", "2000.12.31.00.00.00"),
        Ordering::Greater
    );
}
