use crate::scanner::TagKind;
use thiserror::Error;

/// A tagged region or block comment in the input is malformed.
///
/// Offsets are byte offsets into the scanned string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("tagged region <{kind}> opened at byte {offset} is never closed")]
    UnterminatedTag { kind: TagKind, offset: usize },
    #[error("expected </{expected}> but found </{found}> at byte {offset}")]
    MismatchedTag {
        expected: TagKind,
        found: TagKind,
        offset: usize,
    },
    #[error("closing tag </{kind}> at byte {offset} has no opening tag")]
    UnexpectedClose { kind: TagKind, offset: usize },
    #[error("tagged region <{kind}> at byte {offset} opened inside another region")]
    NestedTag { kind: TagKind, offset: usize },
    #[error("block comment opened at byte {offset} is never closed")]
    UnterminatedComment { offset: usize },
}

pub type Result<T> = std::result::Result<T, ScanError>;
