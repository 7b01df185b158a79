use std::{cmp::Ordering, fmt::Display, str::FromStr};

use crate::error::Error;

/// Component that marks a magic branch number such as `1.4.0.2`.
pub const MAGIC_BRANCH: u32 = 0;

/// A dotted-decimal revision or branch number.
///
/// An even number of components (`1.2`, `1.2.2.1`) names a revision, an odd
/// number (`1`, `1.2.2`) names a branch. Ordering is numeric, component by
/// component, so `1.10` sorts after `1.9`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevisionId(Vec<u32>);

impl RevisionId {
    pub fn from_parts(parts: Vec<u32>) -> Result<Self, Error> {
        if parts.is_empty() {
            return Err(Error::InvalidRevision(String::from("empty revision number")));
        }
        Ok(RevisionId(parts))
    }

    pub fn parts(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn last(&self) -> u32 {
        self.0[self.0.len() - 1]
    }

    pub fn is_branch(&self) -> bool {
        self.0.len() % 2 == 1
    }

    pub fn is_revision(&self) -> bool {
        self.0.len() % 2 == 0
    }

    /// A revision directly on the trunk, e.g. `1.7`.
    pub fn is_trunk(&self) -> bool {
        self.0.len() == 2
    }

    /// The branch a revision lives on: `1.2.2.3` -> `1.2.2`, `1.7` -> `1`.
    pub fn branch(&self) -> RevisionId {
        debug_assert!(self.is_revision());
        RevisionId(self.0[..self.0.len() - 1].to_vec())
    }

    /// The revision a branch is rooted at: `1.2.2` -> `1.2`. Trunk branches have none.
    pub fn branch_point(&self) -> Option<RevisionId> {
        if self.0.len() < 3 {
            return None;
        }
        let cut = if self.is_branch() {
            self.0.len() - 1
        } else {
            self.0.len() - 2
        };
        Some(RevisionId(self.0[..cut].to_vec()))
    }

    /// `1.2.2` -> `1.2.2.1`.
    pub fn first_on_branch(&self) -> RevisionId {
        let mut parts = self.0.clone();
        parts.push(1);
        RevisionId(parts)
    }

    /// Bumps the last component: `1.2.2.3` -> `1.2.2.4`.
    pub fn increment(&self) -> Result<RevisionId, Error> {
        let mut parts = self.0.clone();
        let last = parts.len() - 1;
        parts[last] = parts[last]
            .checked_add(1)
            .ok_or_else(|| Error::InvalidRevision(format!("no revision follows {}", self)))?;
        Ok(RevisionId(parts))
    }

    /// Extends this id by one component.
    pub fn child(&self, n: u32) -> RevisionId {
        let mut parts = self.0.clone();
        parts.push(n);
        RevisionId(parts)
    }

    /// The first `n` components.
    pub fn prefix(&self, n: usize) -> RevisionId {
        RevisionId(self.0[..n.min(self.0.len())].to_vec())
    }

    /// True when `self` is a revision on `branch` or on a branch below it.
    pub fn starts_with(&self, branch: &RevisionId) -> bool {
        self.0.len() > branch.0.len() && self.0.starts_with(&branch.0)
    }

    /// True when `self` is a revision directly on `branch`.
    pub fn on_branch(&self, branch: &RevisionId) -> bool {
        self.0.len() == branch.0.len() + 1 && self.0.starts_with(&branch.0)
    }

    /// Interprets `prefix.0.N` as the real branch `prefix.N`.
    pub fn magic_branch(&self) -> Option<RevisionId> {
        let n = self.0.len();
        if n < 4 || n % 2 != 0 || self.0[n - 2] != MAGIC_BRANCH {
            return None;
        }
        let mut parts = self.0[..n - 2].to_vec();
        parts.push(self.0[n - 1]);
        Some(RevisionId(parts))
    }

    /// `base.0.n`
    pub fn magic(base: &RevisionId, n: u32) -> RevisionId {
        let mut parts = base.0.clone();
        parts.push(MAGIC_BRANCH);
        parts.push(n);
        RevisionId(parts)
    }

    /// Checks whether `s` looks like a numeric revision rather than a symbolic tag.
    pub fn is_numeric(s: &str) -> bool {
        s.starts_with(|c: char| c.is_ascii_digit())
    }
}

impl FromStr for RevisionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim_end_matches('.');
        if trimmed.is_empty() {
            return Err(Error::InvalidRevision(s.to_string()));
        }
        let parts = trimmed
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(Error::InvalidRevision(s.to_string()));
                }
                part.parse::<u32>()
                    .map_err(|_| Error::InvalidRevision(s.to_string()))
            })
            .collect::<Result<Vec<u32>, Error>>()?;
        RevisionId::from_parts(parts)
    }
}

impl Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", part)?;
            first = false;
        }
        Ok(())
    }
}

impl Ord for RevisionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for RevisionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
fn rev(s: &str) -> RevisionId {
    s.parse().unwrap()
}

#[test]
fn test_parse_and_display() {
    assert_eq!(rev("1.2.2.1").to_string(), "1.2.2.1");
    assert_eq!(rev("1.3.").to_string(), "1.3");
    assert!("".parse::<RevisionId>().is_err());
    assert!("1..2".parse::<RevisionId>().is_err());
    assert!("1.a".parse::<RevisionId>().is_err());
    assert!("REL1".parse::<RevisionId>().is_err());
}

#[test]
fn test_numeric_ordering() {
    assert!(rev("1.10") > rev("1.9"));
    assert!(rev("1.2.2.1") > rev("1.2"));
    assert!(rev("2.1") > rev("1.99"));
}

#[test]
fn test_branch_arithmetic() {
    assert!(rev("1.2").is_revision());
    assert!(rev("1.2").is_trunk());
    assert!(rev("1.2.2").is_branch());
    assert!(rev("1").is_branch());
    assert_eq!(rev("1.2.2.3").branch(), rev("1.2.2"));
    assert_eq!(rev("1.2.2").branch_point(), Some(rev("1.2")));
    assert_eq!(rev("1.2.2.3").branch_point(), Some(rev("1.2")));
    assert_eq!(rev("1.2").branch_point(), None);
    assert_eq!(rev("1.2.2").first_on_branch(), rev("1.2.2.1"));
    assert_eq!(rev("1.2.2.3").increment().unwrap(), rev("1.2.2.4"));
    assert!(rev("1.2.2.3").on_branch(&rev("1.2.2")));
    assert!(!rev("1.2.2.3.4.1").on_branch(&rev("1.2.2")));
    assert!(rev("1.2.2.3.4.1").starts_with(&rev("1.2.2")));
}

#[test]
fn test_magic_branch() {
    assert_eq!(rev("1.4.0.2").magic_branch(), Some(rev("1.4.2")));
    assert_eq!(rev("1.4.2.1").magic_branch(), None);
    assert_eq!(rev("1.4").magic_branch(), None);
    assert_eq!(RevisionId::magic(&rev("1.4"), 6), rev("1.4.0.6"));
}

#[test]
fn test_increment_at_limit() {
    let limit = format!("1.{}", u32::MAX);
    assert!(matches!(
        rev(&limit).increment(),
        Err(Error::InvalidRevision(_))
    ));
}
