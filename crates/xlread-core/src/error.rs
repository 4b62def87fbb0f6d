use std::path::PathBuf;

use thiserror::Error;

use crate::cursor::CursorError;
use crate::expr::ExprError;
use crate::tree::TreeError;

/// Fatal decode failures for a single file.
///
/// Every variant that can be tied to a read position carries the byte offset.
/// None of these are transient: truncated or malformed input is reported, not
/// retried.
///
/// # Examples
/// ```
/// use xlread_core::DecodeError;
///
/// let err = DecodeError::CheckpointMismatch {
///     name: "read_checkpoint:header_end".to_string(),
///     expected: 10,
///     actual: 9,
/// };
/// assert!(err.to_string().contains("expected offset 10"));
/// ```
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no body template for file schema {file_schema} under '{location}'")]
    SchemaMismatch {
        file_schema: String,
        location: String,
    },
    #[error("template file not found: {}", .path.display())]
    MissingTemplateFile { path: PathBuf },
    #[error("requirement failed: {section}.{field} expected {expected}, found {actual}")]
    RequirementViolation {
        section: String,
        field: String,
        expected: String,
        actual: String,
    },
    #[error("checkpoint '{name}' failed: expected offset {expected}, cursor at {actual}")]
    CheckpointMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("malformed count expression for '{field}' at offset {offset}: {message}")]
    MalformedCountExpression {
        field: String,
        offset: usize,
        message: String,
    },
    #[error("no condition matched in conversion entry '{entry}' (conditions: {})", .conditions.join(", "))]
    UnmatchedTreeBranch {
        entry: String,
        conditions: Vec<String>,
    },
    #[error("unexpected end of data at offset {offset}: need {needed} bytes, {available} available")]
    UnexpectedEof {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("delta for channel {channel} at offset {offset} has no prior absolute value")]
    UnsetDeltaReference { channel: usize, offset: usize },
    #[error("malformed key tree at offset {offset}: {source}")]
    MalformedTree {
        offset: usize,
        #[source]
        source: TreeError,
    },
    #[error("invalid template entry '{entry}': {message}")]
    InvalidTemplate { entry: String, message: String },
    #[error("conversion entry '{entry}' failed: {source}")]
    ConversionExpression {
        entry: String,
        #[source]
        source: ExprError,
    },
    #[error("missing field {section}.{field}")]
    MissingField { section: String, field: String },
    #[error("special field '{name}' at offset {offset} has no registered handler")]
    UnhandledSpecialField { name: String, offset: usize },
    #[error("table-of-content entry {index} points at offset {offset}, which ends no packet")]
    TocOffsetMismatch { index: usize, offset: i64 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    pub(crate) fn invalid_template(entry: impl Into<String>, message: impl Into<String>) -> Self {
        DecodeError::InvalidTemplate {
            entry: entry.into(),
            message: message.into(),
        }
    }

    pub(crate) fn missing_field(section: &str, field: &str) -> Self {
        DecodeError::MissingField {
            section: section.to_string(),
            field: field.to_string(),
        }
    }
}

impl From<CursorError> for DecodeError {
    fn from(value: CursorError) -> Self {
        match value {
            CursorError::UnexpectedEof {
                offset,
                needed,
                available,
            } => DecodeError::UnexpectedEof {
                offset,
                needed,
                available,
            },
            CursorError::InvalidWidth { width, offset } => DecodeError::InvalidTemplate {
                entry: format!("raw read at offset {offset}"),
                message: format!("unsupported raw width {width}"),
            },
            CursorError::MalformedTree { offset, source } => {
                DecodeError::MalformedTree { offset, source }
            }
        }
    }
}

/// A [`DecodeError`] tagged with the file it came from.
#[derive(Debug, Error)]
#[error("{}: {source}", .path.display())]
pub struct FileError {
    pub path: PathBuf,
    #[source]
    pub source: DecodeError,
}

impl FileError {
    pub fn new(path: impl Into<PathBuf>, source: DecodeError) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}
