//! Loading a revision file.
//!
//! Loading happens in up to three steps, each reading a little more:
//! [`peek_header`] looks at the first few header keys only,
//! [`RevisionGraph::parse`] reads all metadata up to and including `desc`,
//! and the change texts are scanned the first time somebody asks for them.

use std::{cell::OnceCell, collections::BTreeSet, path::Path, sync::Arc};

use crate::{
    error::{Error, Result},
    graph::{
        ChangeTexts, DeltaText, ExpansionMode, ExtensionField, Revision, RevisionGraph, Source,
        DEAD_STATE,
    },
    locks::Lock,
    revision_id::RevisionId,
    scanner::{Field, Scanner},
    symbols::Symbol,
};

/// What a caller needs to know before committing to a full parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSummary {
    pub head: Option<RevisionId>,
    pub default_branch: Option<RevisionId>,
    pub expansion: Option<ExpansionMode>,
}

fn field_id(field: &Field) -> Result<Option<RevisionId>> {
    match field.word()? {
        None => Ok(None),
        Some(word) => word.parse().map(Some).map_err(|_| {
            Error::parse(
                field.offset,
                format!("bad revision number `{}` in `{}`", word, field.key),
            )
        }),
    }
}

fn field_branch(field: &Field) -> Result<Option<RevisionId>> {
    Ok(field_id(field)?.map(|id| if id.is_revision() { id.branch() } else { id }))
}

fn field_expansion(field: &Field) -> Result<ExpansionMode> {
    let raw = field.string()?;
    let mode = std::str::from_utf8(&raw)
        .map_err(|_| Error::parse(field.offset, "non-utf8 expansion mode"))?;
    mode.parse()
        .map_err(|_| Error::parse(field.offset, format!("unknown expansion mode `{}`", mode)))
}

/// `tag:1.2` or `alice:1.2`
fn field_pairs<'a>(field: &Field<'a>) -> Result<Vec<(&'a str, RevisionId)>> {
    field
        .words()?
        .into_iter()
        .map(|word| {
            let (name, id) = word.rsplit_once(':').ok_or_else(|| {
                Error::parse(field.offset, format!("expected name:revision, got `{}`", word))
            })?;
            let id = id.parse().map_err(|_| {
                Error::parse(field.offset, format!("bad revision number in `{}`", word))
            })?;
            Ok((name, id))
        })
        .collect()
}

fn required<'a>(scanner: &mut Scanner<'a>, what: &str) -> Result<Field<'a>> {
    let at = scanner.position();
    scanner
        .next_key()?
        .ok_or_else(|| Error::parse(at, format!("unexpected end of file, expected {}", what)))
}

fn at_admin_end(scanner: &mut Scanner) -> bool {
    scanner.at_end() || scanner.at_revision_token() || scanner.peek_word() == Some("desc")
}

/// Reads `head`, `branch` and `expand` without touching the rest of the file.
pub fn peek_header(bytes: &[u8]) -> Result<HeaderSummary> {
    let mut scanner = Scanner::new(bytes);
    let mut summary = HeaderSummary::default();
    while !at_admin_end(&mut scanner) {
        let field = required(&mut scanner, "a header key")?;
        match field.key {
            "head" => summary.head = field_id(&field)?,
            "branch" => summary.default_branch = field_branch(&field)?,
            "expand" => summary.expansion = Some(field_expansion(&field)?),
            _ => {}
        }
    }
    Ok(summary)
}

pub fn peek_file(path: impl AsRef<Path>) -> Result<HeaderSummary> {
    peek_header(&std::fs::read(path)?)
}

impl RevisionGraph {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("reading {}", path.display());
        RevisionGraph::parse(std::fs::read(path)?)
    }

    /// Parses header, admin blocks and description. Change texts are left
    /// in `bytes` until first use.
    pub fn parse(bytes: impl Into<Arc<[u8]>>) -> Result<Self> {
        let bytes: Arc<[u8]> = bytes.into();
        let mut graph = RevisionGraph::new();
        graph.texts = OnceCell::new();
        let mut scanner = Scanner::new(&bytes);

        while !at_admin_end(&mut scanner) {
            let field = required(&mut scanner, "a header key")?;
            graph.header_field(field)?;
        }

        while scanner.at_revision_token() {
            let revision = parse_admin_block(&mut scanner)?;
            let id = revision.id.clone();
            if graph.revisions.insert(id.clone(), revision).is_some() {
                return Err(Error::Consistency(format!("revision {} appears twice", id)));
            }
        }

        let desc = required(&mut scanner, "desc")?;
        if desc.key != "desc" {
            return Err(Error::parse(
                desc.offset,
                format!("expected desc, found `{}`", desc.key),
            ));
        }
        graph.description = desc.string()?;
        let delta_pos = scanner.position();

        graph.check_references()?;
        log::debug!(
            "parsed {} revisions, head {:?}",
            graph.revisions.len(),
            graph.head.as_ref().map(|h| h.to_string())
        );
        graph.source = Some(Source {
            bytes: bytes.clone(),
            delta_pos,
        });
        Ok(graph)
    }

    fn header_field(&mut self, field: Field) -> Result<()> {
        match field.key {
            "head" => self.head = field_id(&field)?,
            "branch" => self.default_branch = field_branch(&field)?,
            "access" => {
                self.access = field.words()?.into_iter().map(String::from).collect();
            }
            "symbols" => {
                for (tag, revision) in field_pairs(&field)? {
                    self.symbols.push(Symbol {
                        tag: tag.to_string(),
                        revision,
                    });
                }
            }
            "locks" => {
                for (user, revision) in field_pairs(&field)? {
                    self.locks.push(Lock {
                        user: user.to_string(),
                        revision,
                    });
                }
            }
            "strict" => self.strict_locks = true,
            "comment" => {
                self.comment_leader = if field.raw.is_empty() {
                    None
                } else {
                    Some(field.string()?)
                };
            }
            "expand" => self.expansion = Some(field_expansion(&field)?),
            _ => self.extension_fields.push(ExtensionField {
                key: field.key.to_string(),
                value: field.raw.to_vec(),
            }),
        }
        Ok(())
    }

    fn check_references(&self) -> Result<()> {
        let missing = |what: &str, id: &RevisionId| {
            Error::Consistency(format!("{} refers to missing revision {}", what, id))
        };
        if let Some(head) = &self.head {
            if !self.revisions.contains_key(head) {
                return Err(missing("head", head));
            }
        }
        for revision in self.revisions.values() {
            if let Some(next) = &revision.next {
                if !self.revisions.contains_key(next) {
                    return Err(missing(&format!("next of {}", revision.id), next));
                }
            }
            for branch in &revision.branches {
                if !self.revisions.contains_key(branch) {
                    return Err(missing(&format!("branches of {}", revision.id), branch));
                }
                if branch.len() != revision.id.len() + 2 || !branch.starts_with(&revision.id) {
                    return Err(Error::Consistency(format!(
                        "{} cannot start a branch of {}",
                        branch, revision.id
                    )));
                }
            }
        }
        self.check_tree()
    }

    /// `next` and `branches` links must form a tree: nothing reached twice,
    /// nothing on a loop.
    fn check_tree(&self) -> Result<()> {
        let mut reached = BTreeSet::new();
        for revision in self.revisions.values() {
            for child in revision.next.iter().chain(&revision.branches) {
                if !reached.insert(child) {
                    return Err(Error::Consistency(format!(
                        "revision {} is reached twice",
                        child
                    )));
                }
            }
        }
        if let Some(head) = self.head.as_ref().filter(|h| reached.contains(h)) {
            return Err(Error::Consistency(format!("head {} is linked from another revision", head)));
        }
        let mut pending: Vec<&RevisionId> = self
            .revisions
            .keys()
            .filter(|id| !reached.contains(id))
            .collect();
        let mut visited = 0;
        while let Some(id) = pending.pop() {
            visited += 1;
            if let Some(revision) = self.revisions.get(id) {
                pending.extend(revision.next.iter().chain(&revision.branches));
            }
        }
        if visited != self.revisions.len() {
            return Err(Error::Consistency(String::from(
                "next and branches links form a loop",
            )));
        }
        Ok(())
    }

    /// Scans every deltatext after `desc`.
    pub(crate) fn fetch_change_texts(&self) -> Result<ChangeTexts> {
        let source = match &self.source {
            Some(source) => source,
            None => return Ok(ChangeTexts::with_trailer(b"\n".to_vec())),
        };
        log::debug!("fetching change texts");
        let mut scanner = Scanner::at(&source.bytes, source.delta_pos);
        let mut texts = ChangeTexts::default();
        loop {
            let mark = scanner.position();
            if !scanner.at_revision_token() {
                if !scanner.at_end() {
                    return Err(Error::parse(
                        scanner.position(),
                        "unexpected data after change texts",
                    ));
                }
                texts.trailer = source.bytes[mark..].to_vec();
                break;
            }
            let (id, text) = parse_delta_text(&mut scanner)?;
            if !self.revisions.contains_key(&id) {
                return Err(Error::Consistency(format!(
                    "change text for unknown revision {}",
                    id
                )));
            }
            if !texts.push(id.clone(), text) {
                return Err(Error::Consistency(format!(
                    "revision {} has two change texts",
                    id
                )));
            }
        }
        Ok(texts)
    }
}

fn revision_token(scanner: &mut Scanner) -> Result<RevisionId> {
    let offset = scanner.position();
    let token = scanner.next_revision_token()?;
    token
        .parse()
        .map_err(|_| Error::parse(offset, format!("bad revision number `{}`", token)))
}

fn parse_admin_block(scanner: &mut Scanner) -> Result<Revision> {
    let offset = scanner.position();
    let id = revision_token(scanner)?;
    let mut revision = Revision::new(id, String::new(), String::new(), String::new());
    while !at_admin_end(scanner) {
        let field = required(scanner, "an admin key")?;
        match field.key {
            "date" => revision.date = field.word()?.unwrap_or_default().to_string(),
            "author" => revision.author = field.word()?.unwrap_or_default().to_string(),
            "state" => revision.state = field.word()?.unwrap_or_default().to_string(),
            "branches" => {
                revision.branches = field
                    .words()?
                    .into_iter()
                    .map(|w| {
                        w.parse().map_err(|_| {
                            Error::parse(field.offset, format!("bad branch `{}`", w))
                        })
                    })
                    .collect::<Result<_>>()?;
            }
            "next" => revision.next = field_id(&field)?,
            "hardlinks" => {
                revision.hardlinks = field
                    .strings()?
                    .into_iter()
                    .map(|s| String::from_utf8_lossy(&s).into_owned())
                    .collect();
            }
            // older files mark removed revisions with a bare `dead;`
            "dead" => revision.state = DEAD_STATE.to_string(),
            _ => revision.extension_fields.push(ExtensionField {
                key: field.key.to_string(),
                value: field.raw.to_vec(),
            }),
        }
    }
    if revision.date.is_empty() || revision.author.is_empty() {
        return Err(Error::parse(
            offset,
            format!("revision {} lacks a date or author", revision.id),
        ));
    }
    Ok(revision)
}

fn parse_delta_text(scanner: &mut Scanner) -> Result<(RevisionId, DeltaText)> {
    let id = revision_token(scanner)?;
    let log = required(scanner, "log")?;
    if log.key != "log" {
        return Err(Error::parse(
            log.offset,
            format!("expected log for {}, found `{}`", id, log.key),
        ));
    }
    let mut text = DeltaText {
        log: log.string()?,
        ..DeltaText::default()
    };
    loop {
        let field = required(scanner, "text")?;
        if field.key == "text" {
            text.text = field.string()?;
            return Ok((id, text));
        }
        text.extension_fields.push(ExtensionField {
            key: field.key.to_string(),
            value: field.raw.to_vec(),
        });
    }
}

#[cfg(test)]
pub(crate) const SAMPLE: &str = "head\t1.2;
access\n\talice\n\tbob;
symbols\n\tREL1:1.2\n\tBR:1.1.0.2;
locks\n\talice:1.2; strict;
comment\t@# @;
owner\t@x;y@;


1.2
date\t2021.03.01.10.00.00;\tauthor alice;\tstate Exp;
branches;
next\t1.1;

1.1
date\t2021.02.01.10.00.00;\tauthor bob;\tstate Exp;
branches\n\t1.1.2.1;
next\t;
mergepoint\t1.0;

1.1.2.1
date\t2021.02.15.10.00.00;\tauthor bob;\tstate dead;
branches;
next\t;


desc
@sample file
@


1.2
log
@second
@
text
@a
X
c
@


1.1
log
@initial
@
text
@d2 1
a1 1
b
@


1.1.2.1
log
@on a branch@@home
@
commitid\t@abc@;
text
@d1 3
@
";

#[cfg(test)]
fn rev(s: &str) -> RevisionId {
    s.parse().unwrap()
}

#[test]
fn test_peek_header() {
    let summary = peek_header(b"head 1.4;\nbranch 1.1.1.3;\nexpand @b@;\n\n1.4\ndate 1;").unwrap();
    assert_eq!(summary.head, Some(rev("1.4")));
    assert_eq!(summary.default_branch, Some(rev("1.1.1")));
    assert_eq!(summary.expansion, Some(ExpansionMode::Binary));
}

#[test]
fn test_parse_sample() {
    let graph = RevisionGraph::parse(SAMPLE.as_bytes().to_vec()).unwrap();
    assert_eq!(graph.head(), Some(&rev("1.2")));
    assert_eq!(graph.access, vec!["alice", "bob"]);
    assert_eq!(graph.resolve("REL1").unwrap(), rev("1.2"));
    assert_eq!(graph.locks().holder(&rev("1.2")), Some("alice"));
    assert!(graph.strict_locks);
    assert_eq!(graph.comment_leader.as_deref(), Some(&b"# "[..]));
    assert_eq!(graph.extension_fields.len(), 1);
    assert_eq!(graph.extension_fields[0].value, b"@x;y@".to_vec());
    assert_eq!(graph.description, b"sample file\n".to_vec());

    let root = graph.revision(&rev("1.1")).unwrap();
    assert_eq!(root.branches, vec![rev("1.1.2.1")]);
    assert_eq!(root.next, None);
    assert_eq!(root.extension_fields[0].key, "mergepoint");
    assert!(graph.revision(&rev("1.1.2.1")).unwrap().is_dead());
    assert!(!graph.texts_loaded());
}

#[test]
fn test_change_texts_are_fetched_lazily() {
    let graph = RevisionGraph::parse(SAMPLE.as_bytes().to_vec()).unwrap();
    let branch = graph.change_text(&rev("1.1.2.1")).unwrap();
    assert_eq!(branch.log, b"on a branch@home\n".to_vec());
    assert_eq!(branch.extension_fields[0].key, "commitid");
    assert!(graph.texts_loaded());
    let order: Vec<String> = graph
        .change_texts()
        .unwrap()
        .iter()
        .map(|(id, _)| id.to_string())
        .collect();
    assert_eq!(order, vec!["1.2", "1.1", "1.1.2.1"]);
    assert_eq!(graph.change_texts().unwrap().trailer, b"\n".to_vec());
}

#[test]
fn test_dangling_change_text() {
    let text = SAMPLE.replace("\n\n1.1.2.1\nlog", "\n\n1.9\nlog");
    let graph = RevisionGraph::parse(text.into_bytes()).unwrap();
    assert!(matches!(graph.change_texts(), Err(Error::Consistency(_))));
}

#[test]
fn test_missing_next_target() {
    let text = SAMPLE.replace("next\t1.1;", "next\t1.7;");
    assert!(matches!(
        RevisionGraph::parse(text.into_bytes()),
        Err(Error::Consistency(_))
    ));
}

#[test]
fn test_missing_terminator() {
    let text = SAMPLE.replace("head\t1.2;", "head\t1.2");
    assert!(matches!(
        RevisionGraph::parse(text.into_bytes()),
        Err(Error::Parse { .. })
    ));
}

#[test]
fn test_obsolete_dead_marker() {
    let text = SAMPLE.replace("\tstate dead;\n", "\tstate Exp;\ndead;\n");
    let graph = RevisionGraph::parse(text.into_bytes()).unwrap();
    assert!(graph.revision(&rev("1.1.2.1")).unwrap().is_dead());
}

#[test]
fn test_open_and_peek_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("file.txt,v");
    std::fs::write(&path, SAMPLE).unwrap();
    assert_eq!(peek_file(&path).unwrap().head, Some(rev("1.2")));
    assert_eq!(RevisionGraph::open(&path).unwrap().revisions().count(), 3);
}

#[test]
fn test_looping_next_links() {
    let text = SAMPLE.replace(
        "branches\n\t1.1.2.1;\nnext\t;",
        "branches\n\t1.1.2.1;\nnext\t1.2;",
    );
    assert!(matches!(
        RevisionGraph::parse(text.into_bytes()),
        Err(Error::Consistency(_))
    ));
}

#[test]
fn test_revision_reached_twice() {
    let text = SAMPLE.replace(
        "state dead;\nbranches;\nnext\t;",
        "state dead;\nbranches;\nnext\t1.1;",
    );
    assert!(matches!(
        RevisionGraph::parse(text.into_bytes()),
        Err(Error::Consistency(_))
    ));
}

#[test]
fn test_branch_entry_must_start_a_branch() {
    for bad in ["1.3", "1.2.2.1", "1.1.2.1.1.1"] {
        let text = SAMPLE
            .replace("branches\n\t1.1.2.1;", &format!("branches\n\t{};", bad))
            .replace("\n\n1.1.2.1\ndate", &format!("\n\n{}\ndate", bad));
        assert!(
            matches!(
                RevisionGraph::parse(text.into_bytes()),
                Err(Error::Consistency(_))
            ),
            "{} accepted as a branch of 1.1",
            bad
        );
    }
}
