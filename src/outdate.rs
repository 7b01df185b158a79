use crate::{
    diff::{DiffEngine, LineDiff},
    error::{Error, Result},
    graph::RevisionGraph,
    revision_id::RevisionId,
};

/// Whether the named end points are removed too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bounds {
    /// `rcs -o a:b`
    Inclusive,
    /// `rcs -o a::b`, only what lies strictly between.
    Exclusive,
}

impl RevisionGraph {
    /// Removes a contiguous run of revisions from one branch and returns the
    /// numbers removed. The revision following the run is re-diffed against
    /// the one preceding it, so every remaining revision keeps its content.
    pub fn delete_range(
        &mut self,
        from: &RevisionId,
        to: &RevisionId,
        bounds: Bounds,
    ) -> Result<Vec<RevisionId>> {
        self.delete_range_with(&LineDiff, from, to, bounds)
    }

    pub fn delete_range_with(
        &mut self,
        engine: &dyn DiffEngine,
        from: &RevisionId,
        to: &RevisionId,
        bounds: Bounds,
    ) -> Result<Vec<RevisionId>> {
        if !from.is_revision() || !to.is_revision() || from.branch() != to.branch() {
            return Err(Error::InvalidRevision(format!(
                "{} and {} are not revisions on one branch",
                from, to
            )));
        }
        self.require(from)?;
        self.require(to)?;

        let branch = from.branch();
        let root = branch.branch_point();
        let chain: Vec<RevisionId> = match &root {
            None => {
                let head = self.head.clone().ok_or_else(|| Error::not_found(from))?;
                self.chain(&head).map(|r| r.id.clone()).collect()
            }
            Some(root) => {
                let first = self
                    .require(root)?
                    .branches
                    .iter()
                    .find(|b| b.on_branch(&branch))
                    .cloned()
                    .ok_or_else(|| Error::not_found(&branch))?;
                self.chain(&first).map(|r| r.id.clone()).collect()
            }
        };
        let position = |id: &RevisionId| {
            chain
                .iter()
                .position(|c| c == id)
                .ok_or_else(|| Error::not_found(id))
        };
        let (a, b) = (position(from)?, position(to)?);
        let (lo, hi) = (a.min(b), a.max(b));
        let (start, end) = match bounds {
            Bounds::Inclusive => (lo, hi + 1),
            Bounds::Exclusive => (lo + 1, hi),
        };
        if start >= end {
            return Ok(Vec::new());
        }
        let range = &chain[start..end];

        for id in range {
            if let Some(holder) = self.locks.holder(id) {
                return Err(Error::LockConflict {
                    revision: id.clone(),
                    holder: holder.to_string(),
                });
            }
            if !self.require(id)?.branches.is_empty() {
                return Err(Error::BranchPointProtected(id.clone()));
            }
            if bounds == Bounds::Exclusive {
                if let Some(tag) = self.symbols.tags_for(id).next() {
                    return Err(Error::TaggedRevisionProtected {
                        revision: id.clone(),
                        tag: tag.to_string(),
                    });
                }
            }
        }
        if root.is_none() && start == 0 && end == chain.len() {
            return Err(Error::InvalidRevision(String::from(
                "cannot remove every revision of the trunk",
            )));
        }

        let before = start.checked_sub(1).map(|i| chain[i].clone());
        let after = chain.get(end).cloned();
        // content the survivor after the run must now be expressed against
        let base = before.clone().or_else(|| root.clone());
        let new_text = match &after {
            None => None,
            Some(after) => {
                let content = self.reconstruct(after)?;
                Some(match &base {
                    Some(base) => engine.diff(&self.reconstruct(base)?, &content).to_bytes(),
                    None => content,
                })
            }
        };

        let texts = self.change_texts_mut()?;
        if let (Some(after), Some(text)) = (&after, new_text) {
            if let Some(delta) = texts.get_mut(after) {
                delta.text = text;
            }
        }
        for id in range {
            texts.remove(id);
        }
        match (&before, &root) {
            (Some(before), _) => {
                if let Some(before) = self.revision_mut(before) {
                    before.next = after.clone();
                }
            }
            (None, None) => self.head = after.clone(),
            (None, Some(root)) => {
                if let Some(root) = self.revision_mut(root) {
                    match &after {
                        Some(after) => {
                            for first in root.branches.iter_mut() {
                                if first == &range[0] {
                                    *first = after.clone();
                                }
                            }
                        }
                        None => root.branches.retain(|b| b != &range[0]),
                    }
                }
            }
        }
        for id in range {
            if let Some(revision) = self.revisions.get_mut(id) {
                revision.outdated = true;
            }
        }
        log::info!(
            "outdated {} revision(s) from {} to {}",
            range.len(),
            range[0],
            range[range.len() - 1]
        );
        Ok(range.to_vec())
    }
}

#[cfg(test)]
use crate::checkin::{assert_head_anchor, CheckinOptions};

#[cfg(test)]
fn rev(s: &str) -> RevisionId {
    s.parse().unwrap()
}

/// 1.1 .. 1.4 on the trunk ("v1\n" .. "v4\n" plus a shared line) and
/// 1.2.1.1 .. 1.2.1.3 on a branch.
#[cfg(test)]
fn graph() -> RevisionGraph {
    let mut graph = RevisionGraph::new();
    let options = CheckinOptions::new("alice");
    for n in 1..=4 {
        let content = format!("shared\nv{}\n", n);
        graph.checkin(None, content.as_bytes(), "m", &options).unwrap();
    }
    for n in 1..=3 {
        let content = format!("shared\nb{}\n", n);
        graph
            .checkin(Some(&rev("1.2.1")), content.as_bytes(), "m", &options)
            .unwrap();
    }
    graph
}

#[cfg(test)]
fn content(graph: &RevisionGraph, id: &str) -> String {
    String::from_utf8(graph.reconstruct(&rev(id)).unwrap()).unwrap()
}

#[test]
fn test_delete_middle_of_trunk() {
    let mut graph = graph();
    let gone = graph
        .delete_range(&rev("1.3"), &rev("1.3"), Bounds::Inclusive)
        .unwrap();
    assert_eq!(gone, vec![rev("1.3")]);
    assert!(!graph.contains(&rev("1.3")));
    assert_eq!(graph.revision(&rev("1.4")).unwrap().next, Some(rev("1.2")));
    assert_eq!(content(&graph, "1.4"), "shared\nv4\n");
    assert_eq!(content(&graph, "1.2"), "shared\nv2\n");
    assert_eq!(content(&graph, "1.1"), "shared\nv1\n");
    assert_eq!(content(&graph, "1.2.1.2"), "shared\nb2\n");
}

#[test]
fn test_delete_head() {
    let mut graph = graph();
    graph
        .delete_range(&rev("1.4"), &rev("1.3"), Bounds::Inclusive)
        .unwrap();
    assert_eq!(graph.head(), Some(&rev("1.2")));
    assert_eq!(
        graph.change_text(&rev("1.2")).unwrap().text,
        b"shared\nv2\n".to_vec()
    );
    assert_eq!(content(&graph, "1.1"), "shared\nv1\n");
    assert_eq!(content(&graph, "1.2.1.3"), "shared\nb3\n");
}

#[test]
fn test_delete_on_branch() {
    let mut graph = graph();
    graph
        .delete_range(&rev("1.2.1.1"), &rev("1.2.1.2"), Bounds::Inclusive)
        .unwrap();
    assert_eq!(graph.revision(&rev("1.2")).unwrap().branches, vec![rev("1.2.1.3")]);
    assert_eq!(content(&graph, "1.2.1.3"), "shared\nb3\n");
    assert_eq!(graph.resolve("1.2.1").unwrap(), rev("1.2.1.3"));

    graph
        .delete_range(&rev("1.2.1.3"), &rev("1.2.1.3"), Bounds::Inclusive)
        .unwrap();
    assert!(graph.revision(&rev("1.2")).unwrap().branches.is_empty());
}

#[test]
fn test_delete_branch_tail() {
    let mut graph = graph();
    graph
        .delete_range(&rev("1.2.1.3"), &rev("1.2.1.2"), Bounds::Inclusive)
        .unwrap();
    assert_eq!(graph.revision(&rev("1.2.1.1")).unwrap().next, None);
    assert_eq!(content(&graph, "1.2.1.1"), "shared\nb1\n");
}

#[test]
fn test_exclusive_bounds() {
    let mut graph = graph();
    assert!(graph
        .delete_range(&rev("1.4"), &rev("1.3"), Bounds::Exclusive)
        .unwrap()
        .is_empty());
    let gone = graph
        .delete_range(&rev("1.4"), &rev("1.2"), Bounds::Exclusive)
        .unwrap();
    assert_eq!(gone, vec![rev("1.3")]);
    assert_eq!(content(&graph, "1.2"), "shared\nv2\n");
}

#[test]
fn test_preconditions_leave_graph_alone() {
    let mut graph = graph();
    graph.lock(&rev("1.3"), "bob").unwrap();
    assert!(matches!(
        graph.delete_range(&rev("1.4"), &rev("1.3"), Bounds::Inclusive),
        Err(Error::LockConflict { .. })
    ));
    assert!(matches!(
        graph.delete_range(&rev("1.2"), &rev("1.1"), Bounds::Inclusive),
        Err(Error::BranchPointProtected(_))
    ));
    graph.set_tag("KEEP", &rev("1.2.1.2")).unwrap();
    assert!(matches!(
        graph.delete_range(&rev("1.2.1.1"), &rev("1.2.1.3"), Bounds::Exclusive),
        Err(Error::TaggedRevisionProtected { .. })
    ));
    assert!(matches!(
        graph.delete_range(&rev("1.2.1.1"), &rev("1.3"), Bounds::Inclusive),
        Err(Error::InvalidRevision(_))
    ));
    assert_eq!(graph.revisions().count(), 7);
    assert_eq!(content(&graph, "1.3"), "shared\nv3\n");
}

#[test]
fn test_whole_trunk_is_refused() {
    let mut graph = RevisionGraph::new();
    let options = CheckinOptions::new("alice");
    graph.checkin(None, b"a\n", "m", &options).unwrap();
    graph.checkin(None, b"b\n", "m", &options).unwrap();
    assert!(matches!(
        graph.delete_range(&rev("1.2"), &rev("1.1"), Bounds::Inclusive),
        Err(Error::InvalidRevision(_))
    ));
}

#[test]
fn test_head_stays_literal_after_deletes() {
    let mut graph = graph();
    graph
        .delete_range(&rev("1.4"), &rev("1.4"), Bounds::Inclusive)
        .unwrap();
    assert_head_anchor(&graph);
    graph
        .delete_range(&rev("1.2.1.2"), &rev("1.2.1.2"), Bounds::Inclusive)
        .unwrap();
    assert_head_anchor(&graph);
    assert_eq!(content(&graph, "1.2.1.3"), "shared\nb3\n");
}

#[test]
fn test_number_reused_after_deleting_head() {
    let mut graph = graph();
    graph
        .delete_range(&rev("1.4"), &rev("1.4"), Bounds::Inclusive)
        .unwrap();
    let id = graph
        .checkin(None, b"shared\nagain\n", "m", &CheckinOptions::new("alice"))
        .unwrap();
    assert_eq!(id, rev("1.4"));
    let stored: Vec<&RevisionId> = graph
        .change_texts()
        .unwrap()
        .iter()
        .map(|(id, _)| id)
        .filter(|stored| **stored == rev("1.4"))
        .collect();
    assert_eq!(stored.len(), 1);
    assert_head_anchor(&graph);

    let reread = RevisionGraph::parse(graph.to_bytes().unwrap()).unwrap();
    assert_eq!(content(&reread, "1.4"), "shared\nagain\n");
    assert_eq!(content(&reread, "1.3"), "shared\nv3\n");
    assert_eq!(content(&reread, "1.2.1.3"), "shared\nb3\n");
}
