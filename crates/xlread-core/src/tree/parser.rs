use super::error::TreeError;
use crate::{Value, ValueMap};

const NODE_OPENER: &[u8] = b"(.\"";

/// Deepest list nesting accepted before parsing fails.
pub const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub key: String,
    pub value: TreeValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TreeValue {
    Leaf(Value),
    List(Vec<TreeNode>),
}

impl TreeNode {
    pub fn to_value(&self) -> Value {
        match &self.value {
            TreeValue::Leaf(value) => value.clone(),
            TreeValue::List(children) => Value::Map(nodes_to_map(children)),
        }
    }
}

/// Convert sibling nodes to a mapping; a repeated key keeps its last value.
pub fn nodes_to_map(nodes: &[TreeNode]) -> ValueMap {
    let mut map = ValueMap::new();
    for node in nodes {
        map.insert(node.key.clone(), node.to_value());
    }
    map
}

/// Parse key tree text straight to a mapping.
///
/// # Examples
/// ```
/// use xlread_core::Value;
/// use xlread_core::tree::parse_key_tree;
///
/// let map = parse_key_tree(r#"(."A"(."B"1)(."C""x"))"#).unwrap();
/// let inner = map["A"].as_map().unwrap();
/// assert_eq!(inner["B"], Value::Int(1));
/// assert_eq!(inner["C"], Value::Text("x".to_string()));
/// ```
pub fn parse_key_tree(text: &str) -> Result<ValueMap, TreeError> {
    parse_nodes(text).map(|nodes| nodes_to_map(&nodes))
}

struct Frame {
    key: String,
    nodes: Vec<TreeNode>,
    pos: usize,
    end: usize,
}

/// Parse key tree text into the ordered list of top-level nodes.
pub fn parse_nodes(text: &str) -> Result<Vec<TreeNode>, TreeError> {
    let bytes = text.as_bytes();
    let mut stack = vec![Frame {
        key: String::new(),
        nodes: Vec::new(),
        pos: 0,
        end: bytes.len(),
    }];

    while let Some(frame) = stack.last() {
        let (pos, end) = (frame.pos, frame.end);
        let Some(open) = find_opener(bytes, pos, end) else {
            let Some(done) = stack.pop() else {
                break;
            };
            match stack.last_mut() {
                Some(parent) => parent.nodes.push(TreeNode {
                    key: done.key,
                    value: TreeValue::List(done.nodes),
                }),
                None => return Ok(done.nodes),
            }
            continue;
        };

        let key_start = open + NODE_OPENER.len();
        let key_end = find_byte(bytes, b'"', key_start, end)
            .ok_or(TreeError::UnterminatedKey { offset: key_start })?;
        let key = text[key_start..key_end].to_string();
        let value_start = skip_separators(bytes, key_end + 1, end);
        let nested = value_start < end && bytes[value_start] == b'(';
        let close = if nested {
            matching_close(bytes, open, end)?
        } else {
            leaf_close(bytes, value_start, end).ok_or(TreeError::UnterminatedNode { offset: open })?
        };
        let depth = stack.len();

        let Some(frame) = stack.last_mut() else {
            break;
        };
        frame.pos = close + 1;
        if nested {
            if depth > MAX_DEPTH {
                return Err(TreeError::TooDeep {
                    offset: open,
                    limit: MAX_DEPTH,
                });
            }
            stack.push(Frame {
                key,
                nodes: Vec::new(),
                pos: value_start,
                end: close,
            });
        } else {
            frame.nodes.push(TreeNode {
                key,
                value: TreeValue::Leaf(parse_leaf(&text[value_start..close])),
            });
        }
    }

    Ok(Vec::new())
}

fn find_opener(bytes: &[u8], from: usize, end: usize) -> Option<usize> {
    (from..end).find(|&i| {
        let next = i + NODE_OPENER.len();
        next < end && &bytes[i..next] == NODE_OPENER && !matches!(bytes[next], b'(' | b')')
    })
}

/// Index of the parenthesis closing the one at `open`.
///
/// Parentheses inside quoted spans do not count; a backslash inside quotes
/// escapes the next byte.
fn matching_close(bytes: &[u8], open: usize, end: usize) -> Result<usize, TreeError> {
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut i = open;
    while i < end {
        let byte = bytes[i];
        if in_quote {
            match byte {
                b'\\' => i += 1,
                b'"' => in_quote = false,
                _ => {}
            }
        } else {
            match byte {
                b'"' => in_quote = true,
                b'(' => depth += 1,
                b')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    Err(TreeError::UnterminatedNode { offset: open })
}

/// Index of the parenthesis ending a leaf value that starts at `from`.
///
/// A `)` ends the leaf only when followed by `,`, `)`, the next node opener
/// or the end of the text, so unquoted text may hold parentheses. A leading
/// quoted span is skipped whole.
fn leaf_close(bytes: &[u8], from: usize, end: usize) -> Option<usize> {
    let scan_from = if bytes.get(from) == Some(&b'"') {
        closing_quote(bytes, from + 1, end).map_or(from, |quote| quote + 1)
    } else {
        from
    };
    (scan_from..end).find(|&i| bytes[i] == b')' && ends_leaf(bytes, i + 1))
}

fn ends_leaf(bytes: &[u8], next: usize) -> bool {
    match bytes.get(next) {
        None | Some(b',' | b')') => true,
        Some(_) => bytes[next..].starts_with(NODE_OPENER),
    }
}

/// Index of the unescaped `"` closing a quoted span whose body starts at `from`.
fn closing_quote(bytes: &[u8], from: usize, end: usize) -> Option<usize> {
    let mut i = from;
    while i < end {
        match bytes[i] {
            b'\\' => i += 1,
            b'"' => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn find_byte(bytes: &[u8], needle: u8, from: usize, end: usize) -> Option<usize> {
    let from = from.min(end);
    bytes[from..end]
        .iter()
        .position(|byte| *byte == needle)
        .map(|found| found + from)
}

fn skip_separators(bytes: &[u8], from: usize, end: usize) -> usize {
    let mut i = from;
    while i < end && (bytes[i] == b',' || bytes[i].is_ascii_whitespace()) {
        i += 1;
    }
    i
}

fn parse_leaf(raw: &str) -> Value {
    let trimmed = raw.trim();
    let text = if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        unescape(&trimmed[1..trimmed.len() - 1])
    } else {
        trimmed.to_string()
    };
    coerce(text)
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Digit-only text becomes an integer, anything `f64` parses a float
/// (including `inf` and `nan`).
fn coerce(text: String) -> Value {
    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(int) = text.parse::<i64>() {
            return Value::Int(int);
        }
    }
    match text.parse::<f64>() {
        Ok(float) => Value::Float(float),
        Err(_) => Value::Text(text),
    }
}
