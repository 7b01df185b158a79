//! # RCS Store
//!
//! A reader and writer for RCS-style revision files: one file per tracked
//! text, holding every revision as a chain of line-oriented diff scripts
//! anchored at a single full-content head.

/// A one-entry cache of the most recently opened [`RevisionGraph`].
pub mod cache;
/// Recording new revisions.
pub mod checkin;
/// Materializing and annotating revisions.
pub mod checkout;
/// Store-wide settings.
pub mod config;
/// Hash-based identity of checked out bytes.
pub mod content_id;
/// Diff scripts and the line vector they are applied to.
pub mod delta;
/// Producing diff scripts from two texts.
pub mod diff;
pub mod error;
/// The in-memory model of a revision file.
pub mod graph;
/// Tracking of hard-linked working files.
pub mod hardlink;
/// Revision locks and access lists.
pub mod locks;
/// Removing runs of revisions.
pub mod outdate;
/// Loading a [`RevisionGraph`] from its on-disk form.
pub mod parse;
/// Dotted-decimal revision and branch numbers.
pub mod revision_id;
/// Writing a [`RevisionGraph`] back out.
pub mod rewrite;
/// Pull parser over the `key value;` text of a revision file.
pub mod scanner;
/// Tags and the resolution of revision names.
pub mod symbols;

pub use error::{Error, Result};
pub use graph::{Revision, RevisionGraph};
pub use revision_id::RevisionId;
