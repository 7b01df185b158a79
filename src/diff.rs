use std::{
    iter::repeat,
    ops::{Index, IndexMut},
};

use crate::delta::{split_lines, Fragment, Script};

/// Produces the diff script that turns `old` into `new`.
pub trait DiffEngine {
    fn diff(&self, old: &[u8], new: &[u8]) -> Script;
}

/// Line-based shortest edit script (Myers' O(ND) algorithm, linear space)
/// over the lines left after stripping the common prefix and suffix.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineDiff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Equal,
    Delete,
    Insert,
}

/// A changed region: old lines `a0..a1` become new lines `b0..b1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Hunk {
    a0: usize,
    a1: usize,
    b0: usize,
    b1: usize,
}

/// Furthest x reached on each diagonal `k = x - y`.
struct Frontier {
    v: Vec<isize>,
    offset: isize,
}

impl Frontier {
    fn new(max_d: usize) -> Self {
        Frontier {
            v: vec![0; 2 * max_d + 2],
            offset: max_d as isize,
        }
    }
}

impl Index<isize> for Frontier {
    type Output = isize;

    fn index(&self, k: isize) -> &isize {
        &self.v[(k + self.offset) as usize]
    }
}

impl IndexMut<isize> for Frontier {
    fn index_mut(&mut self, k: isize) -> &mut isize {
        &mut self.v[(k + self.offset) as usize]
    }
}

fn common_prefix(a: &[&[u8]], b: &[&[u8]]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[&[u8]], b: &[&[u8]]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Runs the forward and backward searches until they overlap and returns
/// the point where the optimal path crosses the middle.
fn middle_snake(
    a: &[&[u8]],
    b: &[&[u8]],
    forward: &mut Frontier,
    backward: &mut Frontier,
) -> Option<(usize, usize)> {
    let (n, m) = (a.len() as isize, b.len() as isize);
    let delta = n - m;
    let odd = delta & 1 == 1;
    forward[1] = 0;
    backward[1] = 0;
    let max_d = (n + m + 1) / 2 + 1;
    for d in 0..max_d {
        for k in (-d..=d).rev().step_by(2) {
            let mut x = if k == -d || (k != d && forward[k - 1] < forward[k + 1]) {
                forward[k + 1]
            } else {
                forward[k - 1] + 1
            };
            let y = x - k;
            let (x0, y0) = (x, y);
            if x < n && y < m {
                x += common_prefix(&a[x as usize..], &b[y as usize..]) as isize;
            }
            forward[k] = x;
            if odd && (k - delta).abs() < d && forward[k] + backward[delta - k] >= n {
                return Some((x0 as usize, y0 as usize));
            }
        }
        for k in (-d..=d).rev().step_by(2) {
            let mut x = if k == -d || (k != d && backward[k - 1] < backward[k + 1]) {
                backward[k + 1]
            } else {
                backward[k - 1] + 1
            };
            let mut y = x - k;
            if x < n && y < m {
                let run = common_suffix(&a[..(n - x) as usize], &b[..(m - y) as usize]) as isize;
                x += run;
                y += run;
            }
            backward[k] = x;
            if !odd && (k - delta).abs() <= d && backward[k] + forward[delta - k] >= n {
                return Some(((n - x) as usize, (m - y) as usize));
            }
        }
    }
    None
}

fn conquer(
    a: &[&[u8]],
    b: &[&[u8]],
    forward: &mut Frontier,
    backward: &mut Frontier,
    edits: &mut Vec<Edit>,
) {
    let prefix = common_prefix(a, b);
    edits.extend(repeat(Edit::Equal).take(prefix));
    let (a, b) = (&a[prefix..], &b[prefix..]);
    let suffix = common_suffix(a, b);
    let (a, b) = (&a[..a.len() - suffix], &b[..b.len() - suffix]);

    let split = if a.is_empty() || b.is_empty() {
        None
    } else {
        middle_snake(a, b, forward, backward)
    };
    match split {
        Some((x, y)) => {
            conquer(&a[..x], &b[..y], forward, backward, edits);
            conquer(&a[x..], &b[y..], forward, backward, edits);
        }
        None => {
            edits.extend(repeat(Edit::Delete).take(a.len()));
            edits.extend(repeat(Edit::Insert).take(b.len()));
        }
    }
    edits.extend(repeat(Edit::Equal).take(suffix));
}

/// Linear-space variant: each step splits the problem at the middle snake
/// and recurses, so only two frontiers are ever held.
fn shortest_edit(a: &[&[u8]], b: &[&[u8]]) -> Vec<Edit> {
    let max_d = (a.len() + b.len() + 1) / 2 + 1;
    let mut forward = Frontier::new(max_d);
    let mut backward = Frontier::new(max_d);
    let mut edits = Vec::with_capacity(a.len() + b.len());
    conquer(a, b, &mut forward, &mut backward, &mut edits);
    edits
}

fn hunks(edits: &[Edit], offset: usize) -> Vec<Hunk> {
    let mut out = Vec::new();
    let (mut i, mut j) = (offset, offset);
    let mut open: Option<Hunk> = None;
    for edit in edits {
        match edit {
            Edit::Equal => {
                out.extend(open.take());
                i += 1;
                j += 1;
            }
            Edit::Delete => {
                open.get_or_insert(Hunk { a0: i, a1: i, b0: j, b1: j }).a1 += 1;
                i += 1;
            }
            Edit::Insert => {
                open.get_or_insert(Hunk { a0: i, a1: i, b0: j, b1: j }).b1 += 1;
                j += 1;
            }
        }
    }
    out.extend(open);
    out
}

impl DiffEngine for LineDiff {
    fn diff(&self, old: &[u8], new: &[u8]) -> Script {
        let a = split_lines(old);
        let b = split_lines(new);
        let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
        let suffix = a[prefix..]
            .iter()
            .rev()
            .zip(b[prefix..].iter().rev())
            .take_while(|(x, y)| x == y)
            .count();
        let edits = shortest_edit(&a[prefix..a.len() - suffix], &b[prefix..b.len() - suffix]);

        // Earlier hunks have already been applied when a later one runs, so
        // positions are taken from the new text.
        let mut fragments = Vec::new();
        for hunk in hunks(&edits, prefix) {
            if hunk.a1 > hunk.a0 {
                fragments.push(Fragment::Delete {
                    pos: hunk.b0 + 1,
                    count: hunk.a1 - hunk.a0,
                });
            }
            if hunk.b1 > hunk.b0 {
                fragments.push(Fragment::Add {
                    pos: hunk.b0,
                    lines: b[hunk.b0..hunk.b1].iter().map(|l| l.to_vec()).collect(),
                });
            }
        }
        Script(fragments)
    }
}

#[cfg(test)]
fn round_trip(old: &str, new: &str) -> Script {
    let script = LineDiff.diff(old.as_bytes(), new.as_bytes());
    let mut lines = crate::delta::LineVector::new(old.as_bytes());
    lines.apply(&script, None, None).unwrap();
    assert_eq!(String::from_utf8(lines.to_bytes()).unwrap(), new);
    script
}

#[test]
fn test_identical() {
    assert!(round_trip("a\nb\n", "a\nb\n").is_empty());
    assert!(round_trip("", "").is_empty());
}

#[test]
fn test_single_change() {
    let script = round_trip("a\nX\nc\n", "a\nb\nc\n");
    assert_eq!(script.to_bytes(), b"d2 1\na1 1\nb\n".to_vec());
}

#[test]
fn test_positions_follow_earlier_hunks() {
    let script = round_trip("a\nb\nc\nd\ne\n", "x\ny\na\nc\nd\nz\n");
    assert_eq!(
        script.to_bytes(),
        b"a0 2\nx\ny\nd4 1\nd6 1\na5 1\nz\n".to_vec()
    );
}

#[test]
fn test_various_edits() {
    round_trip("", "a\nb\n");
    round_trip("a\nb\n", "");
    round_trip("a\nb", "a\nb\n");
    round_trip("a\nb\n", "a\nc");
    round_trip("1\n2\n3\n4\n5\n6\n", "6\n5\n4\n3\n2\n1\n");
    round_trip("x\na\nx\nb\nx\n", "a\nx\nb\nx\nx\nc\n");
}

#[test]
fn test_full_rewrite_of_a_long_file() {
    let old: String = (0..2000).map(|n| format!("old {}\n", n)).collect();
    let new: String = (0..2000).map(|n| format!("new {}\n", n)).collect();
    let script = round_trip(&old, &new);
    assert_eq!(script.0.len(), 2);
}

#[test]
fn test_scattered_edits_are_minimal() {
    let old: String = (0..500).map(|n| format!("{}\n", n)).collect();
    let new: String = (0..500)
        .filter(|n| n % 7 != 0)
        .map(|n| if n % 11 == 0 { format!("{}x\n", n) } else { format!("{}\n", n) })
        .collect();
    let script = round_trip(&old, &new);
    // every dropped line costs one edit and every changed line two
    let changed = (0..500).filter(|n| n % 11 == 0 && n % 7 != 0).count();
    let dropped = (0..500).filter(|n| n % 7 == 0).count();
    let edits: usize = script
        .0
        .iter()
        .map(|f| match f {
            Fragment::Delete { count, .. } => *count,
            Fragment::Add { lines, .. } => lines.len(),
        })
        .sum();
    assert_eq!(edits, dropped + 2 * changed);
}
