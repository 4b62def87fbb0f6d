use thiserror::Error;

/// Errors returned by key tree parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("node opened at byte {offset} is never closed")]
    UnterminatedNode { offset: usize },
    #[error("key starting at byte {offset} has no closing quote")]
    UnterminatedKey { offset: usize },
    #[error("nesting at byte {offset} exceeds {limit} levels")]
    TooDeep { offset: usize, limit: usize },
}
