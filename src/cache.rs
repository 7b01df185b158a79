use std::path::{Path, PathBuf};

use crate::{error::Result, graph::RevisionGraph};

/// Holds the most recently opened revision file so that repeated requests
/// for the same path skip the parse. Owned by the caller; nothing global.
#[derive(Debug, Default)]
pub struct GraphCache {
    entry: Option<(PathBuf, RevisionGraph)>,
}

impl GraphCache {
    pub fn new() -> Self {
        GraphCache::default()
    }

    /// The graph for `path`, parsed now unless it is the one already held.
    pub fn open(&mut self, path: &Path) -> Result<&mut RevisionGraph> {
        let hit = matches!(&self.entry, Some((cached, _)) if cached == path);
        if !hit {
            log::debug!("cache miss for {}", path.display());
            let graph = RevisionGraph::open(path)?;
            self.entry = Some((path.to_path_buf(), graph));
        }
        match &mut self.entry {
            Some((_, graph)) => Ok(graph),
            None => unreachable!("entry filled above"),
        }
    }

    /// Drops the cached graph, e.g. after the file was rewritten.
    pub fn evict(&mut self) -> Option<RevisionGraph> {
        self.entry.take().map(|(_, graph)| graph)
    }

    pub fn cached_path(&self) -> Option<&Path> {
        self.entry.as_ref().map(|(path, _)| path.as_path())
    }
}

#[cfg(test)]
use crate::parse::SAMPLE;

#[test]
fn test_cache_keeps_one_graph() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a,v");
    let second = dir.path().join("b,v");
    std::fs::write(&first, SAMPLE).unwrap();
    std::fs::write(&second, SAMPLE).unwrap();

    let mut cache = GraphCache::new();
    assert!(cache.open(&first).unwrap().add_access("carol"));
    // a hit returns the same in-memory graph, edits included
    assert!(!cache.open(&first).unwrap().add_access("carol"));
    cache.open(&second).unwrap();
    assert_eq!(cache.cached_path(), Some(second.as_path()));
    assert!(cache.open(&first).unwrap().add_access("carol"));

    assert!(cache.evict().is_some());
    assert_eq!(cache.cached_path(), None);
}

#[test]
fn test_failed_open_keeps_nothing_new() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = GraphCache::new();
    assert!(cache.open(&dir.path().join("missing,v")).is_err());
    assert_eq!(cache.cached_path(), None);
}
