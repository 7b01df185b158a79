use derive_more::{Display, From};

use crate::revision_id::RevisionId;

/// Everything that can go wrong while reading, mutating or writing a revision file.
///
/// Every variant is fatal to the operation that produced it. Lookups that are
/// expected to miss (an unknown tag, say) return `Option` instead.
#[derive(Debug, Display, From)]
pub enum Error {
    #[from]
    #[display(fmt = "i/o error: {}", _0)]
    IO(std::io::Error),
    #[from]
    #[display(fmt = "configuration error: {}", _0)]
    Serde(serde_json::Error),
    #[display(fmt = "parse error at byte {}: {}", offset, message)]
    Parse { offset: usize, message: String },
    #[display(fmt = "inconsistent revision file: {}", _0)]
    Consistency(String),
    #[display(fmt = "revision {} not found", _0)]
    RevisionNotFound(String),
    #[display(fmt = "revision {} is locked by {}", revision, holder)]
    LockConflict { revision: RevisionId, holder: String },
    #[display(fmt = "{} holds {} locks, expected exactly one", user, held)]
    LockAmbiguous { user: String, held: usize },
    #[display(fmt = "revision {} has branches and cannot be removed", _0)]
    BranchPointProtected(RevisionId),
    #[display(fmt = "revision {} is tagged {} and cannot be removed", revision, tag)]
    TaggedRevisionProtected { revision: RevisionId, tag: String },
    #[display(fmt = "temporary file {} already exists", _0)]
    WriteConflict(String),
    #[display(fmt = "malformed diff script: {}", _0)]
    MalformedScript(String),
    #[display(fmt = "invalid revision: {}", _0)]
    InvalidRevision(String),
    #[display(fmt = "invalid tag: {}", _0)]
    InvalidTag(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(err) => Some(err),
            Error::Serde(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn not_found(rev: impl ToString) -> Self {
        Error::RevisionNotFound(rev.to_string())
    }
}

#[test]
fn test_display() {
    let err = Error::LockConflict {
        revision: "1.1".parse().unwrap(),
        holder: String::from("alice"),
    };
    assert_eq!(err.to_string(), "revision 1.1 is locked by alice");
    let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
    assert!(matches!(err, Error::IO(_)));
}
