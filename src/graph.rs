use std::{
    cell::OnceCell,
    collections::BTreeMap,
    fmt::Display,
    str::FromStr,
    sync::Arc,
};

use crate::{
    error::{Error, Result},
    locks::LockTable,
    revision_id::RevisionId,
    symbols::SymbolTable,
};

/// State value reserved for logically removed revisions.
pub const DEAD_STATE: &str = "dead";

/// An unknown `key value;` record, kept exactly as it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionField {
    pub key: String,
    pub value: Vec<u8>,
}

/// Keyword expansion mode stored in the `expand` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExpansionMode {
    /// `kv`
    Default,
    /// `kvl`
    Locker,
    /// `k`
    NamesOnly,
    /// `v`
    ValuesOnly,
    /// `o`
    Literal,
    /// `b`
    Binary,
}

impl ExpansionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpansionMode::Default => "kv",
            ExpansionMode::Locker => "kvl",
            ExpansionMode::NamesOnly => "k",
            ExpansionMode::ValuesOnly => "v",
            ExpansionMode::Literal => "o",
            ExpansionMode::Binary => "b",
        }
    }

    /// Modes under which checked out text is never touched.
    pub fn is_verbatim(&self) -> bool {
        matches!(self, ExpansionMode::Literal | ExpansionMode::Binary)
    }
}

impl FromStr for ExpansionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "kv" => ExpansionMode::Default,
            "kvl" => ExpansionMode::Locker,
            "k" => ExpansionMode::NamesOnly,
            "v" => ExpansionMode::ValuesOnly,
            "o" => ExpansionMode::Literal,
            "b" => ExpansionMode::Binary,
            other => {
                return Err(Error::parse(
                    0,
                    format!("unknown keyword expansion mode `{}`", other),
                ))
            }
        })
    }
}

impl Display for ExpansionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One node of the revision tree (the admin block of a revision).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: RevisionId,
    /// `YYYY.MM.DD.hh.mm.ss`, UTC.
    pub date: String,
    pub author: String,
    pub state: String,
    /// The successor further from the head along this revision's chain.
    pub next: Option<RevisionId>,
    /// First revision of every branch rooted here, ascending.
    pub branches: Vec<RevisionId>,
    /// Names of working files hard-linked to this one.
    pub hardlinks: Vec<String>,
    pub extension_fields: Vec<ExtensionField>,
    pub outdated: bool,
}

impl Revision {
    pub fn new(id: RevisionId, date: String, author: String, state: String) -> Self {
        Revision {
            id,
            date,
            author,
            state,
            next: None,
            branches: Vec::new(),
            hardlinks: Vec::new(),
            extension_fields: Vec::new(),
            outdated: false,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.state == DEAD_STATE
    }
}

/// The stored payload of one revision: literal content for the head, a diff
/// script for everything else.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeltaText {
    pub log: Vec<u8>,
    pub extension_fields: Vec<ExtensionField>,
    pub text: Vec<u8>,
}

/// Change texts in storage order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeTexts {
    order: Vec<RevisionId>,
    entries: BTreeMap<RevisionId, DeltaText>,
    /// Bytes after the last change text, written back verbatim.
    pub trailer: Vec<u8>,
}

impl ChangeTexts {
    /// No texts yet; `trailer` is what ends the file.
    pub(crate) fn with_trailer(trailer: Vec<u8>) -> Self {
        ChangeTexts {
            trailer,
            ..ChangeTexts::default()
        }
    }

    pub fn get(&self, id: &RevisionId) -> Option<&DeltaText> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &RevisionId) -> Option<&mut DeltaText> {
        self.entries.get_mut(id)
    }

    pub fn contains(&self, id: &RevisionId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Appends in storage order, as read from a file.
    pub(crate) fn push(&mut self, id: RevisionId, text: DeltaText) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.order.push(id.clone());
        self.entries.insert(id, text);
        true
    }

    /// Places a new change text next to `anchor`: before it for trunk
    /// revisions, after it for branch revisions. Without an anchor present
    /// the text goes to the end. An older text under the same number is
    /// replaced.
    pub fn splice(&mut self, id: RevisionId, text: DeltaText, anchor: &RevisionId) {
        self.remove(&id);
        let at = match self.order.iter().position(|o| o == anchor) {
            Some(i) if id.is_trunk() => i,
            Some(i) => i + 1,
            None => self.order.len(),
        };
        self.order.insert(at, id.clone());
        self.entries.insert(id, text);
    }

    pub fn remove(&mut self, id: &RevisionId) -> Option<DeltaText> {
        self.order.retain(|o| o != id);
        self.entries.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RevisionId, &DeltaText)> {
        self.order
            .iter()
            .filter_map(move |id| self.entries.get(id).map(|text| (id, text)))
    }
}

/// The bytes a graph was parsed from, kept so change texts can be fetched later.
#[derive(Debug, Clone)]
pub(crate) struct Source {
    pub bytes: Arc<[u8]>,
    /// Offset just past the `desc` string, where change texts begin.
    pub delta_pos: usize,
}

/// In-memory model of one revision file.
#[derive(Debug, Clone)]
pub struct RevisionGraph {
    pub(crate) head: Option<RevisionId>,
    pub(crate) default_branch: Option<RevisionId>,
    pub access: Vec<String>,
    pub(crate) symbols: SymbolTable,
    pub(crate) locks: LockTable,
    pub strict_locks: bool,
    pub comment_leader: Option<Vec<u8>>,
    pub expansion: Option<ExpansionMode>,
    pub description: Vec<u8>,
    pub extension_fields: Vec<ExtensionField>,
    pub(crate) revisions: BTreeMap<RevisionId, Revision>,
    /// Magic branches handed out in this session but not yet tagged.
    pub(crate) reserved: Vec<RevisionId>,
    pub(crate) texts: OnceCell<ChangeTexts>,
    pub(crate) source: Option<Source>,
}

impl Default for RevisionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl RevisionGraph {
    /// A graph with no revisions, ready for its first checkin.
    pub fn new() -> Self {
        let texts = OnceCell::new();
        let _ = texts.set(ChangeTexts::with_trailer(b"\n".to_vec()));
        RevisionGraph {
            head: None,
            default_branch: None,
            access: Vec::new(),
            symbols: SymbolTable::default(),
            locks: LockTable::default(),
            strict_locks: false,
            comment_leader: None,
            expansion: None,
            description: Vec::new(),
            extension_fields: Vec::new(),
            revisions: BTreeMap::new(),
            reserved: Vec::new(),
            texts,
            source: None,
        }
    }

    pub fn head(&self) -> Option<&RevisionId> {
        self.head.as_ref()
    }

    pub fn default_branch(&self) -> Option<&RevisionId> {
        self.default_branch.as_ref()
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn revision(&self, id: &RevisionId) -> Option<&Revision> {
        self.revisions.get(id).filter(|r| !r.outdated)
    }

    pub(crate) fn revision_mut(&mut self, id: &RevisionId) -> Option<&mut Revision> {
        self.revisions.get_mut(id).filter(|r| !r.outdated)
    }

    pub(crate) fn require(&self, id: &RevisionId) -> Result<&Revision> {
        self.revision(id).ok_or_else(|| Error::not_found(id))
    }

    pub fn contains(&self, id: &RevisionId) -> bool {
        self.revision(id).is_some()
    }

    /// Live revisions in numeric order.
    pub fn revisions(&self) -> impl Iterator<Item = &Revision> {
        self.revisions.values().filter(|r| !r.outdated)
    }

    /// The revision whose `next` is `id` (the neighbour closer to the head),
    /// or `None` when `id` starts its chain.
    pub fn previous(&self, id: &RevisionId) -> Option<&Revision> {
        self.revisions().find(|r| r.next.as_ref() == Some(id))
    }

    /// Change texts, fetched from the source bytes on first use.
    pub fn change_texts(&self) -> Result<&ChangeTexts> {
        if let Some(texts) = self.texts.get() {
            return Ok(texts);
        }
        let fetched = self.fetch_change_texts()?;
        Ok(self.texts.get_or_init(|| fetched))
    }

    pub(crate) fn change_texts_mut(&mut self) -> Result<&mut ChangeTexts> {
        self.change_texts()?;
        self.texts
            .get_mut()
            .ok_or_else(|| Error::Consistency(String::from("change texts unavailable")))
    }

    pub fn change_text(&self, id: &RevisionId) -> Result<&DeltaText> {
        self.change_texts()?
            .get(id)
            .ok_or_else(|| Error::Consistency(format!("no change text for revision {}", id)))
    }

    /// True once change texts are in memory (always true for new graphs).
    pub fn texts_loaded(&self) -> bool {
        self.texts.get().is_some()
    }

    /// Walks `next` links from `start`, yielding `start` first.
    pub fn chain<'a>(&'a self, start: &RevisionId) -> Chain<'a> {
        Chain {
            graph: self,
            cursor: Some(start.clone()),
        }
    }

    /// Latest revision on `branch`, or `None` when the branch has no revisions.
    ///
    /// The trunk branch `N` is found by walking down from the head for the
    /// first revision numbered `N.x`.
    pub fn branch_tip(&self, branch: &RevisionId) -> Option<RevisionId> {
        match branch.branch_point() {
            None => {
                let head = self.head.as_ref()?;
                self.chain(head)
                    .find(|r| r.id.on_branch(branch))
                    .map(|r| r.id.clone())
            }
            Some(root) => {
                let first = self
                    .revision(&root)?
                    .branches
                    .iter()
                    .find(|b| b.on_branch(branch))?
                    .clone();
                self.chain(&first).last().map(|r| r.id.clone())
            }
        }
    }

    /// The tip that a checkout with no revision refers to: the default
    /// branch's tip when one is set, the head otherwise.
    pub fn default_tip(&self) -> Option<RevisionId> {
        match &self.default_branch {
            Some(branch) => self.branch_tip(branch),
            None => self.head.clone(),
        }
    }

    /// True when `id` is the last revision of its chain, i.e. new work on
    /// its branch continues from it.
    pub fn is_tip(&self, id: &RevisionId) -> bool {
        if id.is_trunk() {
            self.head.as_ref() == Some(id)
        } else {
            self.revision(id).map(|r| r.next.is_none()).unwrap_or(false)
        }
    }
}

pub struct Chain<'a> {
    graph: &'a RevisionGraph,
    cursor: Option<RevisionId>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a Revision;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor.take()?;
        let revision = self.graph.revision(&id)?;
        self.cursor = revision.next.clone();
        Some(revision)
    }
}

#[test]
fn test_splice_order() {
    let rev = |s: &str| s.parse::<RevisionId>().unwrap();
    let mut texts = ChangeTexts::default();
    texts.push(rev("1.2"), DeltaText::default());
    texts.push(rev("1.1"), DeltaText::default());
    texts.splice(rev("1.3"), DeltaText::default(), &rev("1.2"));
    texts.splice(rev("1.1.1.1"), DeltaText::default(), &rev("1.1"));
    texts.splice(rev("1.2.2.1"), DeltaText::default(), &rev("1.2"));
    let order: Vec<String> = texts.iter().map(|(id, _)| id.to_string()).collect();
    assert_eq!(order, vec!["1.3", "1.2", "1.2.2.1", "1.1", "1.1.1.1"]);

    texts.splice(rev("1.3"), DeltaText::default(), &rev("1.2"));
    assert_eq!(texts.len(), 5);
}

#[test]
fn test_expansion_mode_names() {
    for mode in ["kv", "kvl", "k", "v", "o", "b"] {
        assert_eq!(mode.parse::<ExpansionMode>().unwrap().as_str(), mode);
    }
    assert!("x".parse::<ExpansionMode>().is_err());
}
