//! Byte cursor over an in-memory recording file.
//!
//! The cursor is the only I/O primitive of the decoder: the schema engine and
//! the packet codec both read through it. It owns nothing but a borrowed byte
//! slice and a position that only moves forward.
//!
//! Type codes accepted by packed reads live in `layout`; the `reader` holds the
//! read operations and their end-of-data conventions.

pub mod error;
pub mod layout;
pub mod reader;

pub use error::CursorError;
pub use layout::NumericKind;
pub use reader::ByteCursor;
