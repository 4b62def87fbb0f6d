use super::error::CursorError;
use super::layout::{self, NumericKind};
use crate::Value;
use crate::tree;

/// Forward-only reader over an immutable byte buffer.
///
/// # Examples
/// ```
/// use xlread_core::ByteCursor;
///
/// let bytes = [0x01, 0x02, 0x03];
/// let mut cursor = ByteCursor::new(&bytes);
/// assert_eq!(cursor.read_raw(2).unwrap(), Some(0x0102));
/// assert_eq!(cursor.position(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// True once at most one unread byte remains.
    ///
    /// Repeat blocks stop here, so a single trailing byte is never decoded.
    pub fn at_end(&self) -> bool {
        self.position >= self.bytes.len().saturating_sub(1)
    }

    /// True when every byte has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.position == self.bytes.len()
    }

    /// Read `width` bytes as a big-endian unsigned integer.
    ///
    /// Returns `Ok(None)` when the cursor already sits at the end of the
    /// buffer; this is how the packet stream detects its last packet.
    ///
    /// # Errors
    /// `UnexpectedEof` when some, but fewer than `width`, bytes remain.
    pub fn read_raw(&mut self, width: usize) -> Result<Option<u64>, CursorError> {
        if self.is_exhausted() {
            return Ok(None);
        }
        if width == 0 || width > layout::MAX_RAW_WIDTH {
            return Err(CursorError::InvalidWidth {
                width,
                offset: self.position,
            });
        }
        let bytes = self.take(width)?;
        Ok(Some(
            bytes
                .iter()
                .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)),
        ))
    }

    /// Read text.
    ///
    /// A positive `length` consumes exactly that many bytes. A non-positive
    /// `length` decodes everything that remains, keeping only ASCII bytes,
    /// and leaves the cursor where it is. With `null_terminate` the text is
    /// cut at the first NUL; the cursor still advances by the full length.
    pub fn read_text(&mut self, length: i64, null_terminate: bool) -> Result<String, CursorError> {
        if length > 0 {
            let length = usize::try_from(length).unwrap_or(usize::MAX);
            let bytes = self.take(length)?;
            return Ok(decode_text(bytes, null_terminate));
        }
        let ascii: Vec<u8> = self.bytes[self.position..]
            .iter()
            .copied()
            .filter(u8::is_ascii)
            .collect();
        Ok(decode_text(&ascii, null_terminate))
    }

    /// Read text with [`read_text`](Self::read_text) and parse it as a key tree.
    pub fn read_tree(&mut self, length: i64, null_terminate: bool) -> Result<Value, CursorError> {
        let offset = self.position;
        let text = self.read_text(length, null_terminate)?;
        tree::parse_key_tree(&text)
            .map(Value::Map)
            .map_err(|source| CursorError::MalformedTree { offset, source })
    }

    /// Read `count` consecutive values of `kind`.
    ///
    /// Returns a scalar when `count == 1` and a list otherwise.
    pub fn read_packed(&mut self, kind: NumericKind, count: usize) -> Result<Value, CursorError> {
        let width = kind.width();
        let total = width
            .checked_mul(count)
            .ok_or(CursorError::UnexpectedEof {
                offset: self.position,
                needed: usize::MAX,
                available: self.remaining(),
            })?;
        let bytes = self.take(total)?;
        let mut values: Vec<Value> = bytes
            .chunks_exact(width)
            .map(|chunk| decode_numeric(kind, chunk))
            .collect();
        if count == 1 {
            Ok(values.pop().unwrap_or(Value::Null))
        } else {
            Ok(Value::List(values))
        }
    }

    /// Read one machine-endian signed 32-bit integer.
    pub fn read_i32(&mut self) -> Result<i32, CursorError> {
        let bytes = self.take(4)?;
        Ok(i32::from_ne_bytes(array(bytes)))
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], CursorError> {
        let end = self
            .position
            .checked_add(needed)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(CursorError::UnexpectedEof {
                offset: self.position,
                needed,
                available: self.remaining(),
            })?;
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }
}

fn decode_text(bytes: &[u8], null_terminate: bool) -> String {
    let bytes = if null_terminate {
        bytes
            .iter()
            .position(|byte| *byte == 0)
            .map_or(bytes, |nul| &bytes[..nul])
    } else {
        bytes
    };
    String::from_utf8_lossy(bytes).into_owned()
}

fn array<const N: usize>(chunk: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&chunk[..N]);
    out
}

fn decode_numeric(kind: NumericKind, chunk: &[u8]) -> Value {
    match kind {
        NumericKind::I8 => Value::Int(i64::from(i8::from_ne_bytes(array(chunk)))),
        NumericKind::U8 => Value::Int(i64::from(chunk[0])),
        NumericKind::Bool => Value::Bool(chunk[0] != 0),
        NumericKind::I16 => Value::Int(i64::from(i16::from_ne_bytes(array(chunk)))),
        NumericKind::U16 => Value::Int(i64::from(u16::from_ne_bytes(array(chunk)))),
        NumericKind::I32 => Value::Int(i64::from(i32::from_ne_bytes(array(chunk)))),
        NumericKind::U32 => Value::Int(i64::from(u32::from_ne_bytes(array(chunk)))),
        NumericKind::I64 => Value::Int(i64::from_ne_bytes(array(chunk))),
        NumericKind::U64 => Value::from_u64(u64::from_ne_bytes(array(chunk))),
        NumericKind::F32 => Value::Float(f64::from(f32::from_ne_bytes(array(chunk)))),
        NumericKind::F64 => Value::Float(f64::from_ne_bytes(array(chunk))),
    }
}

#[cfg(test)]
mod tests {
    use super::ByteCursor;
    use crate::Value;
    use crate::cursor::error::CursorError;
    use crate::cursor::layout::NumericKind;

    #[test]
    fn at_end_stops_one_byte_early() {
        let bytes = [1u8, 2, 3];
        let mut cursor = ByteCursor::new(&bytes);
        assert!(!cursor.at_end());
        cursor.read_raw(2).unwrap();
        assert!(cursor.at_end());
        assert!(!cursor.is_exhausted());
    }

    #[test]
    fn at_end_on_empty_buffer() {
        let cursor = ByteCursor::new(&[]);
        assert!(cursor.at_end());
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn read_raw_returns_none_at_end() {
        let bytes = [0xAB];
        let mut cursor = ByteCursor::new(&bytes);
        assert_eq!(cursor.read_raw(1).unwrap(), Some(0xAB));
        assert_eq!(cursor.read_raw(1).unwrap(), None);
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn read_raw_is_big_endian() {
        let bytes = [0xFF, 0xFF, 0x12, 0x34, 0x56];
        let mut cursor = ByteCursor::new(&bytes);
        assert_eq!(cursor.read_raw(2).unwrap(), Some(0xFFFF));
        assert_eq!(cursor.read_raw(3).unwrap(), Some(0x123456));
    }

    #[test]
    fn read_raw_truncated_is_eof() {
        let bytes = [0x01];
        let mut cursor = ByteCursor::new(&bytes);
        let err = cursor.read_raw(2).unwrap_err();
        assert!(matches!(
            err,
            CursorError::UnexpectedEof {
                offset: 0,
                needed: 2,
                available: 1
            }
        ));
    }

    #[test]
    fn read_text_null_terminates_but_advances_full_length() {
        let bytes = b"Doe\0\0\0\0\0tail";
        let mut cursor = ByteCursor::new(bytes);
        assert_eq!(cursor.read_text(8, true).unwrap(), "Doe");
        assert_eq!(cursor.position(), 8);
        assert_eq!(cursor.read_text(4, false).unwrap(), "tail");
    }

    #[test]
    fn read_text_without_length_reads_rest_in_place() {
        let bytes = [b'a', 0xC3, 0xA9, b'b', 0, b'c'];
        let mut cursor = ByteCursor::new(&bytes);
        assert_eq!(cursor.read_text(0, false).unwrap(), "ab\0c");
        assert_eq!(cursor.read_text(-1, true).unwrap(), "ab");
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn read_packed_scalar_and_list() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(-2i16).to_ne_bytes());
        bytes.extend_from_slice(&7u32.to_ne_bytes());
        bytes.extend_from_slice(&9u32.to_ne_bytes());
        bytes.extend_from_slice(&1.5f64.to_ne_bytes());
        let mut cursor = ByteCursor::new(&bytes);

        assert_eq!(
            cursor.read_packed(NumericKind::I16, 1).unwrap(),
            Value::Int(-2)
        );
        assert_eq!(
            cursor.read_packed(NumericKind::U32, 2).unwrap(),
            Value::List(vec![Value::Int(7), Value::Int(9)])
        );
        assert_eq!(
            cursor.read_packed(NumericKind::F64, 1).unwrap(),
            Value::Float(1.5)
        );
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn read_packed_zero_count_is_empty_list() {
        let mut cursor = ByteCursor::new(&[1, 2]);
        assert_eq!(
            cursor.read_packed(NumericKind::U8, 0).unwrap(),
            Value::List(Vec::new())
        );
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn read_packed_truncated_is_eof() {
        let bytes = [0u8; 6];
        let mut cursor = ByteCursor::new(&bytes);
        let err = cursor.read_packed(NumericKind::I32, 2).unwrap_err();
        assert!(matches!(err, CursorError::UnexpectedEof { needed: 8, .. }));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn read_tree_parses_text() {
        let text = br#"(."Stamp", 42)(."Text", "hi")"#;
        let mut cursor = ByteCursor::new(text);
        let value = cursor.read_tree(text.len() as i64, true).unwrap();
        assert_eq!(value.get("Stamp"), Some(&Value::Int(42)));
        assert_eq!(value.get("Text"), Some(&Value::Text("hi".to_string())));
        assert_eq!(cursor.position(), text.len());
    }

    #[test]
    fn read_tree_reports_offset_of_bad_text() {
        let mut bytes = vec![0u8; 2];
        bytes.extend_from_slice(br#"(."Open", 1"#);
        let mut cursor = ByteCursor::new(&bytes);
        cursor.read_raw(2).unwrap();
        let err = cursor.read_tree(0, true).unwrap_err();
        assert!(matches!(err, CursorError::MalformedTree { offset: 2, .. }));
    }
}
