use thiserror::Error;

use crate::tree::TreeError;

/// Errors returned by cursor reads.
///
/// # Examples
/// ```
/// use xlread_core::CursorError;
///
/// let err = CursorError::UnexpectedEof { offset: 4, needed: 2, available: 1 };
/// assert!(err.to_string().contains("offset 4"));
/// ```
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("unexpected end of data at offset {offset}: need {needed} bytes, {available} available")]
    UnexpectedEof {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("unsupported raw read width {width} at offset {offset}")]
    InvalidWidth { width: usize, offset: usize },
    #[error("malformed key tree at offset {offset}: {source}")]
    MalformedTree {
        offset: usize,
        #[source]
        source: TreeError,
    },
}
