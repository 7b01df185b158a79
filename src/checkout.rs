use std::{io::Write, path::Path};

use crate::{
    content_id::ContentId,
    error::Result,
    graph::{ExpansionMode, Revision, RevisionGraph},
    hardlink::HardlinkTracker,
    revision_id::RevisionId,
};

/// Rewrites keywords in checked out text. Never called for literal or
/// binary files.
pub trait KeywordExpander {
    fn expand(&self, content: Vec<u8>, revision: &Revision, mode: ExpansionMode) -> Vec<u8>;
}

/// Leaves the text alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl KeywordExpander for PassThrough {
    fn expand(&self, content: Vec<u8>, _revision: &Revision, _mode: ExpansionMode) -> Vec<u8> {
        content
    }
}

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// `2021.03.01.10.00.00` -> `01-Mar-21`
fn short_date(date: &str) -> String {
    let parts: Vec<&str> = date.split('.').collect();
    if parts.len() < 3 {
        return String::from("??-???-??");
    }
    let month = parts[1]
        .parse::<usize>()
        .ok()
        .and_then(|m| m.checked_sub(1))
        .and_then(|m| MONTHS.get(m))
        .copied()
        .unwrap_or("???");
    let year = &parts[0][parts[0].len().saturating_sub(2)..];
    format!("{:0>2}-{}-{}", parts[2], month, year)
}

impl RevisionGraph {
    /// The mode a checkout uses: the requested one, else the file's own.
    pub fn effective_mode(&self, requested: Option<ExpansionMode>) -> ExpansionMode {
        requested
            .or(self.expansion)
            .unwrap_or(ExpansionMode::Default)
    }

    /// Writes revision `rev` (default tip when `None`) to `sink` and returns
    /// the number of the revision written.
    pub fn checkout(
        &self,
        rev: Option<&str>,
        mode: Option<ExpansionMode>,
        expander: &dyn KeywordExpander,
        sink: &mut dyn Write,
    ) -> Result<RevisionId> {
        let id = self.resolve(rev.unwrap_or(""))?;
        let content = self.reconstruct(&id)?;
        let mode = self.effective_mode(mode);
        let content = if mode.is_verbatim() {
            content
        } else {
            expander.expand(content, self.require(&id)?, mode)
        };
        sink.write_all(&content)?;
        Ok(id)
    }

    /// Writes `rev` with every line prefixed by the revision, author and
    /// date it came from.
    pub fn write_annotations(&self, rev: Option<&str>, sink: &mut dyn Write) -> Result<RevisionId> {
        let id = self.resolve(rev.unwrap_or(""))?;
        for line in self.annotate(&id)? {
            let author: String = line.author.chars().take(8).collect();
            write!(
                sink,
                "{:<12} ({:<8} {}): ",
                line.revision.to_string(),
                author,
                short_date(&line.date)
            )?;
            sink.write_all(&line.text)?;
            if !line.text.ends_with(b"\n") {
                sink.write_all(b"\n")?;
            }
        }
        Ok(id)
    }

    /// Checks `rev` out to `path`. When a tracker is given and a hard-linked
    /// sibling with the same content was already written, `path` becomes
    /// another link to it.
    pub fn checkout_file(
        &self,
        rev: Option<&str>,
        path: &Path,
        mode: Option<ExpansionMode>,
        expander: &dyn KeywordExpander,
        tracker: Option<&mut HardlinkTracker>,
    ) -> Result<RevisionId> {
        let mut content = Vec::new();
        let id = self.checkout(rev, mode, expander, &mut content)?;
        let content_id = ContentId::from(&content[..]);

        let tracker = match tracker {
            Some(tracker) => tracker,
            None => {
                std::fs::write(path, &content)?;
                return Ok(id);
            }
        };

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let siblings: Vec<_> = self
            .require(&id)?
            .hardlinks
            .iter()
            .map(|name| dir.join(name))
            .filter(|p| p != path)
            .collect();
        match tracker.find_ready_sibling(&siblings) {
            Some((sibling, existing)) if existing == content_id => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                log::debug!("linking {} to {}", path.display(), sibling.display());
                std::fs::hard_link(&sibling, path)?;
            }
            _ => std::fs::write(path, &content)?,
        }
        tracker.register(path)?;
        tracker.mark_checked_out(path, content_id);
        Ok(id)
    }

    /// True when the working file at `path` holds exactly what checking out
    /// `rev` would write.
    pub fn cmp_file(
        &self,
        rev: Option<&str>,
        mode: Option<ExpansionMode>,
        expander: &dyn KeywordExpander,
        path: &Path,
    ) -> Result<bool> {
        let mut content = Vec::new();
        let id = self.checkout(rev, mode, expander, &mut content)?;
        let same = ContentId::try_from(path)? == ContentId::from(&content[..]);
        log::debug!(
            "{} {} revision {}",
            path.display(),
            if same { "matches" } else { "differs from" },
            id
        );
        Ok(same)
    }
}

#[cfg(test)]
use crate::{checkin::CheckinOptions, error::Error};

#[cfg(test)]
struct Upper;

#[cfg(test)]
impl KeywordExpander for Upper {
    fn expand(&self, content: Vec<u8>, _revision: &Revision, _mode: ExpansionMode) -> Vec<u8> {
        content.to_ascii_uppercase()
    }
}

#[cfg(test)]
fn graph() -> RevisionGraph {
    let mut graph = RevisionGraph::new();
    let options = CheckinOptions {
        date: Some(String::from("2021.03.01.10.00.00")),
        ..CheckinOptions::new("alice")
    };
    graph.checkin(None, b"a\nb\n", "one", &options).unwrap();
    let options = CheckinOptions {
        date: Some(String::from("2021.04.02.10.00.00")),
        ..CheckinOptions::new("christopher")
    };
    graph.checkin(None, b"a\nc\n", "two", &options).unwrap();
    graph
}

#[test]
fn test_checkout_to_sink() {
    let graph = graph();
    let mut out = Vec::new();
    let id = graph.checkout(Some("1.1"), None, &PassThrough, &mut out).unwrap();
    assert_eq!(id.to_string(), "1.1");
    assert_eq!(out, b"a\nb\n".to_vec());

    let mut out = Vec::new();
    graph.checkout(None, None, &Upper, &mut out).unwrap();
    assert_eq!(out, b"A\nC\n".to_vec());

    let mut out = Vec::new();
    graph
        .checkout(None, Some(ExpansionMode::Binary), &Upper, &mut out)
        .unwrap();
    assert_eq!(out, b"a\nc\n".to_vec());
}

#[test]
fn test_checkout_missing_revision() {
    let graph = graph();
    let mut out = Vec::new();
    assert!(matches!(
        graph.checkout(Some("1.5"), None, &PassThrough, &mut out),
        Err(Error::RevisionNotFound(_))
    ));
    assert!(out.is_empty());
}

#[test]
fn test_annotation_layout() {
    let graph = graph();
    let mut out = Vec::new();
    graph.write_annotations(None, &mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "1.1          (alice    01-Mar-21): a\n\
         1.2          (christop 02-Apr-21): c\n"
    );
}

#[test]
fn test_short_date() {
    assert_eq!(short_date("99.12.31.23.59.59"), "31-Dec-99");
    assert_eq!(short_date("garbage"), "??-???-??");
}

#[test]
fn test_checkout_file_links_identical_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let mut graph = graph();
    if let Some(revision) = graph.revision_mut(&"1.2".parse().unwrap()) {
        revision.hardlinks = vec![String::from("one"), String::from("two")];
    }
    let mut tracker = HardlinkTracker::default();
    let one = dir.path().join("one");
    let two = dir.path().join("two");
    graph
        .checkout_file(None, &one, None, &PassThrough, Some(&mut tracker))
        .unwrap();
    graph
        .checkout_file(None, &two, None, &PassThrough, Some(&mut tracker))
        .unwrap();
    assert_eq!(std::fs::read(&two).unwrap(), b"a\nc\n".to_vec());
    assert_eq!(tracker.linked_paths(&one).len(), if cfg!(unix) { 2 } else { 1 });

    let three = dir.path().join("three");
    graph
        .checkout_file(Some("1.1"), &three, None, &PassThrough, None)
        .unwrap();
    assert_eq!(std::fs::read(&three).unwrap(), b"a\nb\n".to_vec());
}

#[test]
fn test_cmp_file() {
    let dir = tempfile::tempdir().unwrap();
    let graph = graph();
    let path = dir.path().join("work");
    std::fs::write(&path, b"a\nc\n").unwrap();
    assert!(graph.cmp_file(None, None, &PassThrough, &path).unwrap());
    assert!(!graph.cmp_file(Some("1.1"), None, &PassThrough, &path).unwrap());
    // compared after keyword expansion
    assert!(!graph.cmp_file(None, None, &Upper, &path).unwrap());
    std::fs::write(&path, b"A\nC\n").unwrap();
    assert!(graph.cmp_file(None, None, &Upper, &path).unwrap());

    assert!(matches!(
        graph.cmp_file(None, None, &PassThrough, &dir.path().join("missing")),
        Err(Error::IO(_))
    ));
}
