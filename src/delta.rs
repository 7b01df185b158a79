//! Diff scripts and the replay of a revision chain.

use crate::{
    error::{Error, Result},
    graph::RevisionGraph,
    revision_id::RevisionId,
};

/// One edit of a diff script. Positions are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Insert `lines` after line `pos` (0 inserts at the top).
    Add { pos: usize, lines: Vec<Vec<u8>> },
    /// Remove `count` lines starting at line `pos`.
    Delete { pos: usize, count: usize },
}

/// An ordered list of fragments. Each fragment's position is relative to
/// the text as left by the fragments before it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script(pub Vec<Fragment>);

/// Splits `bytes` into lines, each keeping its `\n`. Only the last line
/// can lack one.
pub fn split_lines(bytes: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            lines.push(&bytes[start..=i]);
            start = i + 1;
        }
    }
    if start < bytes.len() {
        lines.push(&bytes[start..]);
    }
    lines
}

fn malformed(message: impl Into<String>) -> Error {
    Error::MalformedScript(message.into())
}

fn command(line: &[u8]) -> Result<(u8, usize, usize)> {
    let text = std::str::from_utf8(line)
        .map_err(|_| malformed("non-utf8 command"))?
        .trim_end_matches('\n');
    let op = text.as_bytes().first().copied().unwrap_or(b' ');
    let (pos, count) = text
        .get(1..)
        .and_then(|rest| rest.split_once(' '))
        .ok_or_else(|| malformed(format!("bad command `{}`", text)))?;
    let pos = pos
        .parse()
        .map_err(|_| malformed(format!("bad position in `{}`", text)))?;
    let count = count
        .parse()
        .map_err(|_| malformed(format!("bad count in `{}`", text)))?;
    Ok((op, pos, count))
}

impl Script {
    pub fn parse(text: &[u8]) -> Result<Script> {
        let lines = split_lines(text);
        let mut fragments = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let (op, pos, count) = command(lines[i])?;
            i += 1;
            match op {
                b'a' => {
                    if i + count > lines.len() {
                        return Err(malformed(format!(
                            "a{} {} runs past the end of the script",
                            pos, count
                        )));
                    }
                    let added = lines[i..i + count].iter().map(|l| l.to_vec()).collect();
                    i += count;
                    fragments.push(Fragment::Add { pos, lines: added });
                }
                b'd' => fragments.push(Fragment::Delete { pos, count }),
                other => {
                    return Err(malformed(format!(
                        "unknown command `{}`",
                        char::from(other)
                    )))
                }
            }
        }
        Ok(Script(fragments))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for fragment in &self.0 {
            match fragment {
                Fragment::Add { pos, lines } => {
                    out.extend_from_slice(format!("a{} {}\n", pos, lines.len()).as_bytes());
                    for line in lines {
                        out.extend_from_slice(line);
                    }
                }
                Fragment::Delete { pos, count } => {
                    out.extend_from_slice(format!("d{} {}\n", pos, count).as_bytes());
                }
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

struct Line {
    text: Vec<u8>,
    origin: Option<RevisionId>,
}

/// The text being rebuilt. Lines live in an arena and are never dropped,
/// so a line keeps its provenance after later scripts delete it.
pub struct LineVector {
    arena: Vec<Line>,
    order: Vec<usize>,
}

impl LineVector {
    pub fn new(content: &[u8]) -> Self {
        let arena: Vec<Line> = split_lines(content)
            .into_iter()
            .map(|text| Line {
                text: text.to_vec(),
                origin: None,
            })
            .collect();
        let order = (0..arena.len()).collect();
        LineVector { arena, order }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn terminated(&self, at: usize) -> bool {
        self.arena[self.order[at]].text.ends_with(b"\n")
    }

    /// Applies `script`. Added lines are credited to `added_by`; lines
    /// deleted while still uncredited are credited to `deleted_by`.
    pub fn apply(
        &mut self,
        script: &Script,
        added_by: Option<&RevisionId>,
        deleted_by: Option<&RevisionId>,
    ) -> Result<()> {
        for fragment in &script.0 {
            match fragment {
                Fragment::Delete { pos, count } => {
                    if *pos == 0 || *count == 0 || pos + count - 1 > self.len() {
                        return Err(malformed(format!(
                            "d{} {} outside a text of {} lines",
                            pos,
                            count,
                            self.len()
                        )));
                    }
                    for index in self.order.drain(pos - 1..pos - 1 + count) {
                        let line = &mut self.arena[index];
                        if line.origin.is_none() {
                            line.origin = deleted_by.cloned();
                        }
                    }
                }
                Fragment::Add { pos, lines } => {
                    if *pos > self.len() {
                        return Err(malformed(format!(
                            "a{} {} past the end of a text of {} lines",
                            pos,
                            lines.len(),
                            self.len()
                        )));
                    }
                    if *pos > 0 && !self.terminated(pos - 1) {
                        return Err(malformed(format!(
                            "a{} adds after an unterminated line",
                            pos
                        )));
                    }
                    let unterminated = lines
                        .iter()
                        .position(|l| !l.ends_with(b"\n"))
                        .map(|i| i + 1 < lines.len() || *pos < self.len());
                    if unterminated == Some(true) {
                        return Err(malformed(format!(
                            "a{} inserts an unterminated line before others",
                            pos
                        )));
                    }
                    let start = self.arena.len();
                    self.arena.extend(lines.iter().map(|text| Line {
                        text: text.clone(),
                        origin: added_by.cloned(),
                    }));
                    self.order
                        .splice(*pos..*pos, start..self.arena.len());
                }
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for &index in &self.order {
            out.extend_from_slice(&self.arena[index].text);
        }
        out
    }
}

/// One line of an annotated checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedLine {
    pub revision: RevisionId,
    pub author: String,
    pub date: String,
    pub text: Vec<u8>,
}

struct Walk {
    lines: LineVector,
    /// Line order of the target.
    found: Vec<usize>,
    /// Last revision whose script was replayed on the trunk.
    oldest: RevisionId,
}

impl RevisionGraph {
    /// The full content of `target`.
    pub fn reconstruct(&self, target: &RevisionId) -> Result<Vec<u8>> {
        let walk = self.walk(target, false)?;
        let mut out = Vec::new();
        for &index in &walk.found {
            out.extend_from_slice(&walk.lines.arena[index].text);
        }
        Ok(out)
    }

    /// The content of `target`, each line credited to the revision that
    /// introduced it.
    pub fn annotate(&self, target: &RevisionId) -> Result<Vec<AnnotatedLine>> {
        let walk = self.walk(target, true)?;
        walk.found
            .iter()
            .map(|&index| {
                let line = &walk.lines.arena[index];
                let id = line.origin.as_ref().unwrap_or(&walk.oldest);
                let revision = self.require(id)?;
                Ok(AnnotatedLine {
                    revision: id.clone(),
                    author: revision.author.clone(),
                    date: revision.date.clone(),
                    text: line.text.clone(),
                })
            })
            .collect()
    }

    fn script(&self, id: &RevisionId) -> Result<Script> {
        Script::parse(&self.change_text(id)?.text)
    }

    /// Replays scripts from the head to `target`. With `annotate`, keeps
    /// walking to the bottom of the trunk so every line can be credited.
    fn walk(&self, target: &RevisionId, annotate: bool) -> Result<Walk> {
        self.require(target)?;
        let head = self.head.clone().ok_or_else(|| Error::not_found(target))?;
        let mut lines = LineVector::new(&self.change_text(&head)?.text);
        let trunk_stop = target.prefix(2);

        let mut newer: Option<RevisionId> = None;
        let mut cursor = head;
        loop {
            if let Some(newer) = &newer {
                lines.apply(&self.script(&cursor)?, None, Some(newer))?;
            }
            if cursor == trunk_stop {
                break;
            }
            let next = self.require(&cursor)?.next.clone();
            newer = Some(cursor);
            cursor = next.ok_or_else(|| Error::not_found(target))?;
        }
        let trunk_order = lines.order.clone();

        let mut level = 2;
        let mut node = cursor.clone();
        while level < target.len() {
            let branch = target.prefix(level + 1);
            let stop = target.prefix(level + 2);
            let first = self
                .require(&node)?
                .branches
                .iter()
                .find(|b| b.on_branch(&branch))
                .cloned()
                .ok_or_else(|| Error::not_found(target))?;
            let mut step = Some(first);
            loop {
                let id = step.ok_or_else(|| Error::not_found(target))?;
                lines.apply(&self.script(&id)?, Some(&id), None)?;
                if id == stop {
                    node = id;
                    break;
                }
                step = self.require(&id)?.next.clone();
            }
            level += 2;
        }
        let found = lines.order.clone();

        let mut oldest = cursor;
        if annotate {
            lines.order = trunk_order;
            let mut newer = oldest.clone();
            while let Some(next) = self.require(&newer)?.next.clone() {
                lines.apply(&self.script(&next)?, None, Some(&newer))?;
                newer = next;
            }
            oldest = newer;
        }
        log::debug!("rebuilt {} ({} lines)", target, found.len());
        Ok(Walk {
            lines,
            found,
            oldest,
        })
    }
}

#[cfg(test)]
fn rev(s: &str) -> RevisionId {
    s.parse().unwrap()
}

#[test]
fn test_script_text_form() {
    let text = b"d2 1\na3 2\nx\ny\n";
    let script = Script::parse(text).unwrap();
    assert_eq!(
        script.0,
        vec![
            Fragment::Delete { pos: 2, count: 1 },
            Fragment::Add {
                pos: 3,
                lines: vec![b"x\n".to_vec(), b"y\n".to_vec()]
            },
        ]
    );
    assert_eq!(script.to_bytes(), text.to_vec());
}

#[test]
fn test_parse_rejects_garbage() {
    assert!(matches!(
        Script::parse(b"x1 1\n"),
        Err(Error::MalformedScript(_))
    ));
    assert!(matches!(
        Script::parse(b"a1 3\nonly one\n"),
        Err(Error::MalformedScript(_))
    ));
    assert!(matches!(
        Script::parse(b"d1\n"),
        Err(Error::MalformedScript(_))
    ));
}

#[test]
fn test_apply_left_to_right() {
    let mut lines = LineVector::new(b"a\nb\nc\n");
    let script = Script::parse(b"d1 1\na0 1\nz\nd3 1\n").unwrap();
    lines.apply(&script, None, None).unwrap();
    assert_eq!(lines.to_bytes(), b"z\nb\n".to_vec());
}

#[test]
fn test_reordered_delete_is_rejected() {
    let script = Script::parse(b"a0 1\nx\nd2 2\n").unwrap();
    let mut lines = LineVector::new(b"a\nb\n");
    lines.apply(&script, None, None).unwrap();
    assert_eq!(lines.to_bytes(), b"x\n".to_vec());

    let mut reordered = script.clone();
    reordered.0.reverse();
    let mut lines = LineVector::new(b"a\nb\n");
    assert!(matches!(
        lines.apply(&reordered, None, None),
        Err(Error::MalformedScript(_))
    ));
}

#[test]
fn test_out_of_range_fragments() {
    let mut lines = LineVector::new(b"a\n");
    for bad in [
        Fragment::Delete { pos: 2, count: 1 },
        Fragment::Delete { pos: 0, count: 1 },
        Fragment::Delete { pos: 1, count: 2 },
        Fragment::Add {
            pos: 2,
            lines: vec![b"x\n".to_vec()],
        },
    ] {
        assert!(matches!(
            lines.apply(&Script(vec![bad]), None, None),
            Err(Error::MalformedScript(_))
        ));
    }
}

#[test]
fn test_unterminated_lines() {
    let mut lines = LineVector::new(b"a\nb");
    assert!(matches!(
        lines.apply(
            &Script(vec![Fragment::Add {
                pos: 2,
                lines: vec![b"c\n".to_vec()]
            }]),
            None,
            None
        ),
        Err(Error::MalformedScript(_))
    ));
    let mut lines = LineVector::new(b"a\nb\n");
    assert!(matches!(
        lines.apply(
            &Script(vec![Fragment::Add {
                pos: 1,
                lines: vec![b"c".to_vec()]
            }]),
            None,
            None
        ),
        Err(Error::MalformedScript(_))
    ));
    lines
        .apply(
            &Script(vec![Fragment::Add {
                pos: 2,
                lines: vec![b"c".to_vec()],
            }]),
            None,
            None,
        )
        .unwrap();
    assert_eq!(lines.to_bytes(), b"a\nb\nc".to_vec());
}

#[test]
fn test_reconstruct_sample() {
    let graph = RevisionGraph::parse(crate::parse::SAMPLE.as_bytes().to_vec()).unwrap();
    assert_eq!(graph.reconstruct(&rev("1.2")).unwrap(), b"a\nX\nc\n".to_vec());
    assert_eq!(graph.reconstruct(&rev("1.1")).unwrap(), b"a\nb\nc\n".to_vec());
    assert_eq!(graph.reconstruct(&rev("1.1.2.1")).unwrap(), Vec::<u8>::new());
    assert!(matches!(
        graph.reconstruct(&rev("1.1.2.2")),
        Err(Error::RevisionNotFound(_))
    ));
}

#[test]
fn test_annotate_sample() {
    let graph = RevisionGraph::parse(crate::parse::SAMPLE.as_bytes().to_vec()).unwrap();
    let lines = graph.annotate(&rev("1.2")).unwrap();
    let credited: Vec<(String, &str)> = lines
        .iter()
        .map(|l| (l.revision.to_string(), l.author.as_str()))
        .collect();
    assert_eq!(
        credited,
        vec![
            (String::from("1.1"), "bob"),
            (String::from("1.2"), "alice"),
            (String::from("1.1"), "bob"),
        ]
    );
}
