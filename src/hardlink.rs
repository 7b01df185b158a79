use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::content_id::ContentId;

/// Identity of a file on disk: its inode where there is one, its path otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FileKey {
    #[cfg(unix)]
    Inode { dev: u64, ino: u64 },
    #[cfg_attr(unix, allow(dead_code))]
    Path(PathBuf),
}

impl FileKey {
    #[cfg(unix)]
    fn of(path: &Path) -> std::io::Result<FileKey> {
        use std::os::unix::fs::MetadataExt;
        let meta = std::fs::metadata(path)?;
        Ok(FileKey::Inode {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(path: &Path) -> std::io::Result<FileKey> {
        std::fs::metadata(path)?;
        Ok(FileKey::Path(path.to_path_buf()))
    }
}

/// Remembers which working files share storage and which were written
/// during this run, so hard-linked siblings can be linked instead of
/// written twice.
#[derive(Debug, Default)]
pub struct HardlinkTracker {
    groups: HashMap<FileKey, Vec<PathBuf>>,
    keys: HashMap<PathBuf, FileKey>,
    checked_out: HashMap<PathBuf, ContentId>,
}

impl HardlinkTracker {
    /// Adds an existing `path` to the group of files sharing its inode.
    pub fn register(&mut self, path: &Path) -> std::io::Result<()> {
        let key = FileKey::of(path)?;
        if let Some(old) = self.keys.insert(path.to_path_buf(), key.clone()) {
            if let Some(group) = self.groups.get_mut(&old) {
                group.retain(|p| p != path);
            }
        }
        self.groups.entry(key).or_default().push(path.to_path_buf());
        Ok(())
    }

    pub fn mark_checked_out(&mut self, path: &Path, content: ContentId) {
        self.checked_out.insert(path.to_path_buf(), content);
    }

    /// The first of `candidates` already written this run, with its content.
    pub fn find_ready_sibling(&self, candidates: &[PathBuf]) -> Option<(PathBuf, ContentId)> {
        candidates.iter().find_map(|path| {
            self.checked_out
                .get(path)
                .map(|content| (path.clone(), *content))
        })
    }

    /// Every registered path sharing storage with `path`, itself included.
    pub fn linked_paths(&self, path: &Path) -> Vec<PathBuf> {
        self.keys
            .get(path)
            .and_then(|key| self.groups.get(key))
            .cloned()
            .unwrap_or_default()
    }
}

#[test]
fn test_groups_follow_inodes() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    let c = dir.path().join("c");
    std::fs::write(&a, b"x").unwrap();
    std::fs::hard_link(&a, &b).unwrap();
    std::fs::write(&c, b"x").unwrap();

    let mut tracker = HardlinkTracker::default();
    for path in [&a, &b, &c] {
        tracker.register(path).unwrap();
    }
    assert_eq!(tracker.linked_paths(&a).len(), if cfg!(unix) { 2 } else { 1 });
    assert_eq!(tracker.linked_paths(&c), vec![c.clone()]);
    assert!(tracker.linked_paths(&dir.path().join("d")).is_empty());
}

#[test]
fn test_ready_sibling() {
    let mut tracker = HardlinkTracker::default();
    let content = ContentId::from(&b"x"[..]);
    let candidates = vec![PathBuf::from("one"), PathBuf::from("two")];
    assert_eq!(tracker.find_ready_sibling(&candidates), None);
    tracker.mark_checked_out(Path::new("two"), content);
    assert_eq!(
        tracker.find_ready_sibling(&candidates),
        Some((PathBuf::from("two"), content))
    );
}

#[test]
fn test_register_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut tracker = HardlinkTracker::default();
    assert!(tracker.register(&dir.path().join("missing")).is_err());
}
