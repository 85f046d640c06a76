//! Error reporting utilities shared by every stage of the pipeline.
//!
//! Each stage defines its own error enum (e.g. [`SpecError`], [`AsmErr`]);
//! this module holds what they have in common:
//! - [`ErrSpan`]: the source span (or spans) an error points at,
//! - [`Error`]: a trait exposing span and help information uniformly,
//! - [`report`]: rendering an error as a `file:line:col: message` diagnostic.
//!
//! [`SpecError`]: crate::spec::SpecError
//! [`AsmErr`]: crate::asm::AsmErr

use std::borrow::Cow;
use std::fmt::Write as _;
use std::ops::Range;

use crate::asm::SourceInfo;

/// One, two, or many source spans attached to an error.
///
/// Most errors point at a single range of characters, but some
/// (e.g. a duplicate label) point at two or more sites at once.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrSpan {
    /// One span.
    One(Range<usize>),
    /// Two spans.
    Two([Range<usize>; 2]),
    /// Three or more spans.
    Many(Vec<Range<usize>>),
}
impl ErrSpan {
    /// The first (earliest-created) span of this group.
    pub fn first(&self) -> Range<usize> {
        match self {
            ErrSpan::One(r) => r.clone(),
            ErrSpan::Two([r, _]) => r.clone(),
            ErrSpan::Many(rs) => rs.first().cloned().unwrap_or(0..0),
        }
    }

    /// Iterates over all spans of this group.
    pub fn iter(&self) -> impl Iterator<Item = &Range<usize>> + '_ {
        match self {
            ErrSpan::One(r) => std::slice::from_ref(r).iter(),
            ErrSpan::Two(rs) => rs.iter(),
            ErrSpan::Many(rs) => rs.iter(),
        }
    }
}
impl From<Range<usize>> for ErrSpan {
    fn from(value: Range<usize>) -> Self {
        ErrSpan::One(value)
    }
}
impl From<&Range<usize>> for ErrSpan {
    fn from(value: &Range<usize>) -> Self {
        ErrSpan::One(value.clone())
    }
}
impl From<[Range<usize>; 2]> for ErrSpan {
    fn from(value: [Range<usize>; 2]) -> Self {
        ErrSpan::Two(value)
    }
}
impl From<Vec<Range<usize>>> for ErrSpan {
    fn from(mut value: Vec<Range<usize>>) -> Self {
        match value.len() {
            1 => ErrSpan::One(value.remove(0)),
            2 => {
                let b = value.pop().unwrap();
                let a = value.pop().unwrap();
                ErrSpan::Two([a, b])
            }
            _ => ErrSpan::Many(value),
        }
    }
}

/// Common interface over every error this crate can produce.
pub trait Error: std::error::Error {
    /// The source span(s) this error points at, if any.
    ///
    /// Errors that are not tied to a source location (e.g. a malformed
    /// ISA description) return `None`.
    fn span(&self) -> Option<ErrSpan> {
        None
    }

    /// A hint on how to resolve the error, if one applies.
    fn help(&self) -> Option<Cow<str>> {
        None
    }
}

/// Renders an error as a single diagnostic line
/// (`file:line:col: message`, with an optional help line below),
/// suitable for printing by an invoking tool.
///
/// Lines and columns are reported 1-based.
pub fn report(err: &dyn Error, filename: &str, src: &SourceInfo) -> String {
    let mut out = String::new();
    match err.span() {
        Some(span) => {
            let (line, col) = src.get_pos_pair(span.first().start);
            let _ = write!(out, "{filename}:{}:{}: {err}", line + 1, col + 1);
        }
        None => {
            let _ = write!(out, "{filename}: {err}");
        }
    }
    if let Some(help) = err.help() {
        let _ = write!(out, "\n  help: {help}");
    }
    out
}
