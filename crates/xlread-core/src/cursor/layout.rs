/// Widest raw (big-endian, untyped) read.
pub const MAX_RAW_WIDTH: usize = 8;

/// Template tag for fixed-length or trailing text.
pub const TEXT_TAG: &str = "string";
/// Template tag for text parsed as a key tree.
pub const TREE_TAG: &str = "key_tree";

/// Fixed-width numeric types read in machine byte order.
///
/// Codes follow the single-character convention of the templates. `l`/`L`
/// are 4 bytes, the C `long` of the recording platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    I8,
    U8,
    Bool,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl NumericKind {
    pub fn from_code(code: &str) -> Option<Self> {
        let kind = match code {
            "b" => NumericKind::I8,
            "B" => NumericKind::U8,
            "?" => NumericKind::Bool,
            "h" => NumericKind::I16,
            "H" => NumericKind::U16,
            "i" | "l" => NumericKind::I32,
            "I" | "L" => NumericKind::U32,
            "q" => NumericKind::I64,
            "Q" => NumericKind::U64,
            "f" => NumericKind::F32,
            "d" => NumericKind::F64,
            _ => return None,
        };
        Some(kind)
    }

    pub const fn width(self) -> usize {
        match self {
            NumericKind::I8 | NumericKind::U8 | NumericKind::Bool => 1,
            NumericKind::I16 | NumericKind::U16 => 2,
            NumericKind::I32 | NumericKind::U32 | NumericKind::F32 => 4,
            NumericKind::I64 | NumericKind::U64 | NumericKind::F64 => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::NumericKind;

    #[test]
    fn codes_map_to_widths() {
        let cases = [
            ("b", 1),
            ("B", 1),
            ("?", 1),
            ("h", 2),
            ("H", 2),
            ("i", 4),
            ("l", 4),
            ("I", 4),
            ("f", 4),
            ("q", 8),
            ("Q", 8),
            ("d", 8),
        ];
        for (code, width) in cases {
            let kind = NumericKind::from_code(code).expect(code);
            assert_eq!(kind.width(), width, "width of {code}");
        }
    }

    #[test]
    fn multi_character_codes_are_rejected() {
        assert_eq!(NumericKind::from_code("ii"), None);
        assert_eq!(NumericKind::from_code(""), None);
        assert_eq!(NumericKind::from_code("x"), None);
    }
}
