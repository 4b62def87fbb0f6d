use serde_json::Value as Json;

use crate::cursor::NumericKind;
use crate::cursor::layout::{MAX_RAW_WIDTH, TEXT_TAG, TREE_TAG};
use crate::error::DecodeError;
use crate::expr::Expr;
use crate::Value;

pub const REQUIREMENTS_PREFIX: &str = "requirements";
pub const SPECIAL_PREFIX: &str = "special";
pub const CHECKPOINT_PREFIX: &str = "read_checkpoint";
pub const REPEAT_PREFIX: &str = "repeat";

/// How a field's bytes are turned into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    /// Big-endian unsigned integer; the count is the byte width.
    Raw,
    Text,
    Tree,
    Packed(NumericKind),
}

impl TypeTag {
    fn from_json(entry: &str, tag: &Json) -> Result<Self, DecodeError> {
        match tag {
            Json::Null => Ok(TypeTag::Raw),
            Json::String(code) if code == TEXT_TAG => Ok(TypeTag::Text),
            Json::String(code) if code == TREE_TAG => Ok(TypeTag::Tree),
            Json::String(code) => NumericKind::from_code(code)
                .map(TypeTag::Packed)
                .ok_or_else(|| {
                    DecodeError::invalid_template(entry, format!("unknown type code '{code}'"))
                }),
            other => Err(DecodeError::invalid_template(
                entry,
                format!("type tag must be a string or null, got {other}"),
            )),
        }
    }

    /// Text-like tags accept non-positive counts ("rest of buffer").
    pub fn is_text(self) -> bool {
        matches!(self, TypeTag::Text | TypeTag::Tree)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub tag: TypeTag,
    pub count: i64,
    pub null_terminate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CountSpec {
    Literal(i64),
    /// Evaluated per iteration against the other fields of the block.
    Expr { source: String, expr: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepeatField {
    pub name: String,
    pub tag: TypeTag,
    pub count: CountSpec,
    pub null_terminate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    pub section: String,
    pub expected: Vec<(String, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Field(FieldSpec),
    Section {
        name: String,
        fields: Vec<FieldSpec>,
    },
    Requirement(Requirement),
    Checkpoint {
        name: String,
        offset: usize,
    },
    Special {
        name: String,
        value: Json,
    },
    Repeat {
        name: String,
        fields: Vec<RepeatField>,
    },
}

/// Ordered template entries; declaration order is read order.
///
/// # Examples
/// ```
/// use xlread_core::Template;
///
/// let template = Template::from_json(&serde_json::json!({
///     "header": { "version": ["H", 1], "label": ["string", 8] },
///     "read_checkpoint:header_end": 10
/// }))
/// .unwrap();
/// assert_eq!(template.entries().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    entries: Vec<Entry>,
}

impl Template {
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Build a template from a JSON object.
    ///
    /// # Errors
    /// `InvalidTemplate` for any entry of the wrong shape, and
    /// `MalformedCountExpression` for a Repeat count that does not parse.
    pub fn from_json(document: &Json) -> Result<Self, DecodeError> {
        let object = document
            .as_object()
            .ok_or_else(|| DecodeError::invalid_template("<template>", "expected a JSON object"))?;
        let entries = object
            .iter()
            .map(|(key, value)| parse_entry(key, value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }
}

fn parse_entry(key: &str, value: &Json) -> Result<Entry, DecodeError> {
    let Some((prefix, name)) = key.split_once(':') else {
        return parse_plain(key, value);
    };
    let name = name.to_string();
    match prefix {
        REQUIREMENTS_PREFIX => {
            let object = value.as_object().ok_or_else(|| {
                DecodeError::invalid_template(key, "requirements must map field names to values")
            })?;
            let expected = object
                .iter()
                .map(|(field, expected)| (field.clone(), Value::from(expected)))
                .collect();
            Ok(Entry::Requirement(Requirement {
                section: name,
                expected,
            }))
        }
        SPECIAL_PREFIX => Ok(Entry::Special {
            name,
            value: value.clone(),
        }),
        CHECKPOINT_PREFIX => {
            let offset = value
                .as_u64()
                .and_then(|offset| usize::try_from(offset).ok())
                .ok_or_else(|| {
                    DecodeError::invalid_template(key, "checkpoint offset must be a non-negative integer")
                })?;
            Ok(Entry::Checkpoint {
                name: key.to_string(),
                offset,
            })
        }
        REPEAT_PREFIX => {
            let object = value.as_object().ok_or_else(|| {
                DecodeError::invalid_template(key, "repeat block must map field names to specs")
            })?;
            let fields = object
                .iter()
                .map(|(field, spec)| parse_repeat_field(field, spec))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Entry::Repeat { name, fields })
        }
        _ => parse_plain(key, value),
    }
}

fn parse_plain(key: &str, value: &Json) -> Result<Entry, DecodeError> {
    match value {
        Json::Array(_) => parse_field(key, value).map(Entry::Field),
        Json::Object(object) => {
            let fields = object
                .iter()
                .map(|(field, spec)| {
                    if spec.is_object() {
                        return Err(DecodeError::invalid_template(
                            format!("{key}.{field}"),
                            "sections nest only one level",
                        ));
                    }
                    parse_field(field, spec)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Entry::Section {
                name: key.to_string(),
                fields,
            })
        }
        other => Err(DecodeError::invalid_template(
            key,
            format!("expected a field spec or section, got {other}"),
        )),
    }
}

/// Split `[tag, count, nullTerminate?]`.
fn split_spec<'j>(name: &str, spec: &'j Json) -> Result<(TypeTag, &'j Json, bool), DecodeError> {
    let items = spec
        .as_array()
        .filter(|items| (2..=3).contains(&items.len()))
        .ok_or_else(|| DecodeError::invalid_template(name, "expected [type, count] or [type, count, null_terminate]"))?;
    let tag = TypeTag::from_json(name, &items[0])?;
    let null_terminate = match items.get(2) {
        None => true,
        Some(Json::Bool(flag)) => *flag,
        Some(other) => {
            return Err(DecodeError::invalid_template(
                name,
                format!("null_terminate must be a boolean, got {other}"),
            ));
        }
    };
    Ok((tag, &items[1], null_terminate))
}

fn parse_field(name: &str, spec: &Json) -> Result<FieldSpec, DecodeError> {
    let (tag, count, null_terminate) = split_spec(name, spec)?;
    let count = count.as_i64().ok_or_else(|| {
        DecodeError::invalid_template(name, format!("count must be an integer, got {count}"))
    })?;
    check_count(name, tag, count)?;
    Ok(FieldSpec {
        name: name.to_string(),
        tag,
        count,
        null_terminate,
    })
}

fn parse_repeat_field(name: &str, spec: &Json) -> Result<RepeatField, DecodeError> {
    let (tag, count, null_terminate) = split_spec(name, spec)?;
    let count = match count {
        Json::String(source) => {
            let expr = Expr::parse(source).map_err(|err| DecodeError::MalformedCountExpression {
                field: name.to_string(),
                offset: 0,
                message: err.to_string(),
            })?;
            CountSpec::Expr {
                source: source.clone(),
                expr,
            }
        }
        other => {
            let count = other.as_i64().ok_or_else(|| {
                DecodeError::invalid_template(
                    name,
                    format!("count must be an integer or expression, got {other}"),
                )
            })?;
            check_count(name, tag, count)?;
            CountSpec::Literal(count)
        }
    };
    Ok(RepeatField {
        name: name.to_string(),
        tag,
        count,
        null_terminate,
    })
}

pub(crate) fn check_count(name: &str, tag: TypeTag, count: i64) -> Result<(), DecodeError> {
    let valid = match tag {
        TypeTag::Raw => (1..=MAX_RAW_WIDTH as i64).contains(&count),
        TypeTag::Packed(_) => count >= 0,
        TypeTag::Text | TypeTag::Tree => true,
    };
    if valid {
        Ok(())
    } else {
        Err(DecodeError::invalid_template(
            name,
            format!("count {count} is not valid for this type"),
        ))
    }
}
