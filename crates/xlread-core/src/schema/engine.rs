use tracing::{debug, warn};

use super::special::{SpecialContext, SpecialFields};
use super::store::TemplateStore;
use super::template::{CountSpec, Entry, FieldSpec, RepeatField, Requirement, Template, TypeTag};
use crate::cursor::ByteCursor;
use crate::error::DecodeError;
use crate::expr::Scope;
use crate::{Record, Value, ValueMap};

/// Header section holding the body-template discriminant.
pub const HEADER_SECTION: &str = "generic_file_header";
pub const DISCRIMINANT_FIELD: &str = "file_schema";

/// Result of a complete two-stage decode.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub record: Record,
    /// Discriminant read from the header; `None` without a header stage.
    pub file_schema: Option<i64>,
    /// Final cursor position.
    pub consumed: usize,
}

/// Two-stage template interpreter.
///
/// With `base_schema > 0` the generic header template for that version is
/// read first and validated, and its `file_schema` field selects the body
/// template. Otherwise the body template is the fixed one for the file kind.
///
/// # Examples
/// ```
/// use serde_json::json;
/// use xlread_core::{MemoryTemplateStore, SchemaEngine, SpecialFields, Value};
///
/// let store = MemoryTemplateStore::new().with_body(None, json!({
///     "read_checkpoint:start": 0,
///     "repeat:rows": { "id": ["B", 1] }
/// }));
/// let engine = SchemaEngine::new(&store, -1);
/// let decoded = engine.decode(&[1, 2, 3], &mut SpecialFields::new()).unwrap();
/// let ids = decoded.record.field("rows", "id").unwrap();
/// assert_eq!(ids, &Value::List(vec![Value::Int(1), Value::Int(2)]));
/// ```
pub struct SchemaEngine<'s> {
    store: &'s dyn TemplateStore,
    base_schema: i32,
}

struct State {
    record: Record,
    requirements: Vec<Requirement>,
    file_schema: Option<i64>,
}

impl<'s> SchemaEngine<'s> {
    pub fn new(store: &'s dyn TemplateStore, base_schema: i32) -> Self {
        Self { store, base_schema }
    }

    pub fn store(&self) -> &'s dyn TemplateStore {
        self.store
    }

    /// Decode `bytes` into a record.
    ///
    /// # Errors
    /// Any [`DecodeError`]; the first failure ends the decode.
    pub fn decode(
        &self,
        bytes: &[u8],
        specials: &mut SpecialFields<'_>,
    ) -> Result<Decoded, DecodeError> {
        let mut cursor = ByteCursor::new(bytes);
        let mut state = State {
            record: Record::new(),
            requirements: Vec::new(),
            file_schema: None,
        };

        if let Ok(base_schema) = u32::try_from(self.base_schema) {
            if base_schema > 0 {
                debug!(base_schema, "header stage");
                let header = self.store.header_template(base_schema)?;
                self.interpret(&header, &mut cursor, &mut state, specials)?;
                validate(&state.record, &state.requirements)?;
                state.file_schema = Some(discriminant(&state.record)?);
            }
        }

        debug!(file_schema = ?state.file_schema, offset = cursor.position(), "body stage");
        let body = self.store.body_template(state.file_schema)?;
        self.interpret(&body, &mut cursor, &mut state, specials)?;
        validate(&state.record, &state.requirements)?;

        Ok(Decoded {
            record: state.record,
            file_schema: state.file_schema,
            consumed: cursor.position(),
        })
    }

    fn interpret(
        &self,
        template: &Template,
        cursor: &mut ByteCursor<'_>,
        state: &mut State,
        specials: &mut SpecialFields<'_>,
    ) -> Result<(), DecodeError> {
        for entry in template.entries() {
            match entry {
                Entry::Field(field) => {
                    let value = read_field(cursor, field)?;
                    state.record.insert(field.name.clone(), value);
                }
                Entry::Section { name, fields } => {
                    let mut section = ValueMap::new();
                    for field in fields {
                        section.insert(field.name.clone(), read_field(cursor, field)?);
                    }
                    state.record.insert(name.clone(), Value::Map(section));
                }
                Entry::Requirement(requirement) => state.requirements.push(requirement.clone()),
                Entry::Checkpoint { name, offset } => {
                    if cursor.position() != *offset {
                        return Err(DecodeError::CheckpointMismatch {
                            name: name.clone(),
                            expected: *offset,
                            actual: cursor.position(),
                        });
                    }
                }
                Entry::Special { name, value } => specials.dispatch(SpecialContext {
                    cursor: &mut *cursor,
                    name,
                    template_value: value,
                    record: &mut state.record,
                    file_schema: state.file_schema,
                    store: self.store,
                })?,
                Entry::Repeat { name, fields } => {
                    let block = read_repeat(cursor, name, fields)?;
                    state.record.insert(name.clone(), block);
                }
            }
        }
        Ok(())
    }
}

fn read_field(cursor: &mut ByteCursor<'_>, field: &FieldSpec) -> Result<Value, DecodeError> {
    read_value(cursor, field.tag, field.count, field.null_terminate)
}

fn read_value(
    cursor: &mut ByteCursor<'_>,
    tag: TypeTag,
    count: i64,
    null_terminate: bool,
) -> Result<Value, DecodeError> {
    let width = || usize::try_from(count).unwrap_or(0);
    let value = match tag {
        TypeTag::Raw => cursor
            .read_raw(width())?
            .map_or(Value::Null, Value::from_u64),
        TypeTag::Text => Value::Text(cursor.read_text(count, null_terminate)?),
        TypeTag::Tree => cursor.read_tree(count, null_terminate)?,
        TypeTag::Packed(kind) => cursor.read_packed(kind, width())?,
    };
    Ok(value)
}

/// Read records until the cursor reports `at_end`.
///
/// Each field accumulates one sequence across iterations. A read that would
/// start exactly at the end of the buffer yields `Null`.
fn read_repeat(
    cursor: &mut ByteCursor<'_>,
    name: &str,
    fields: &[RepeatField],
) -> Result<Value, DecodeError> {
    let mut columns: Vec<Vec<Value>> = vec![Vec::new(); fields.len()];
    while !cursor.at_end() {
        let start = cursor.position();
        for (index, field) in fields.iter().enumerate() {
            let value = if cursor.is_exhausted() {
                Value::Null
            } else {
                let count = resolve_count(field, index, fields, &columns, cursor.position())?;
                read_value(cursor, field.tag, count, field.null_terminate)?
            };
            columns[index].push(value);
        }
        if cursor.position() == start {
            warn!(
                block = name,
                offset = start,
                "repeat iteration consumed no bytes; ending block"
            );
            break;
        }
    }
    let block = fields
        .iter()
        .zip(columns)
        .map(|(field, values)| (field.name.clone(), Value::List(values)))
        .collect();
    Ok(Value::Map(block))
}

/// Count for one Repeat field; expressions see the latest value of every
/// other field of the block.
fn resolve_count(
    field: &RepeatField,
    index: usize,
    fields: &[RepeatField],
    columns: &[Vec<Value>],
    offset: usize,
) -> Result<i64, DecodeError> {
    let (source, expr) = match &field.count {
        CountSpec::Literal(count) => return Ok(*count),
        CountSpec::Expr { source, expr } => (source, expr),
    };
    let malformed = |message: String| DecodeError::MalformedCountExpression {
        field: field.name.clone(),
        offset,
        message,
    };

    let mut scope = Scope::new();
    for (other, (sibling, values)) in fields.iter().zip(columns).enumerate() {
        if other == index {
            continue;
        }
        if let Some(last) = values.last() {
            scope.bind(&sibling.name, last);
        }
    }
    let value = expr
        .evaluate(&scope)
        .map_err(|err| malformed(format!("'{source}': {err}")))?;
    let count = value
        .as_i64()
        .ok_or_else(|| malformed(format!("'{source}' gave {value}, not an integer")))?;
    if count < 0 && !field.tag.is_text() {
        return Err(malformed(format!("'{source}' gave negative count {count}")));
    }
    if field.tag == TypeTag::Raw && !(1..=crate::cursor::layout::MAX_RAW_WIDTH as i64).contains(&count) {
        return Err(malformed(format!("'{source}' gave raw width {count}")));
    }
    Ok(count)
}

fn discriminant(record: &Record) -> Result<i64, DecodeError> {
    let value = record
        .field(HEADER_SECTION, DISCRIMINANT_FIELD)
        .ok_or_else(|| DecodeError::missing_field(HEADER_SECTION, DISCRIMINANT_FIELD))?;
    value.as_i64().ok_or_else(|| DecodeError::SchemaMismatch {
        file_schema: value.to_string(),
        location: format!("{HEADER_SECTION}.{DISCRIMINANT_FIELD}"),
    })
}

/// Check every stored requirement, in declaration order.
///
/// # Errors
/// `RequirementViolation` for the first field that differs or is missing.
pub fn validate(record: &Record, requirements: &[Requirement]) -> Result<(), DecodeError> {
    for requirement in requirements {
        for (field, expected) in &requirement.expected {
            let actual = record.field(&requirement.section, field);
            if !actual.is_some_and(|actual| actual.loosely_eq(expected)) {
                return Err(DecodeError::RequirementViolation {
                    section: requirement.section.clone(),
                    field: field.clone(),
                    expected: expected.to_string(),
                    actual: actual.map_or_else(|| "<missing>".to_string(), Value::to_string),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::schema::{
        MemoryTemplateStore, SchemaEngine, SpecialContext, SpecialFieldHandler, SpecialFields,
    };
    use crate::{DecodeError, Value};

    fn decode(store: &MemoryTemplateStore, base: i32, bytes: &[u8]) -> Result<crate::schema::Decoded, DecodeError> {
        SchemaEngine::new(store, base).decode(bytes, &mut SpecialFields::new())
    }

    fn header_store(body: serde_json::Value) -> MemoryTemplateStore {
        MemoryTemplateStore::new()
            .with_header(
                1,
                json!({
                    "generic_file_header": {
                        "file_schema": ["H", 1],
                        "schema_version": ["H", 1]
                    },
                    "requirements:generic_file_header": { "schema_version": 2 },
                    "read_checkpoint:header_end": 4
                }),
            )
            .with_body(Some(7), body)
    }

    fn header_bytes(file_schema: u16, schema_version: u16) -> Vec<u8> {
        let mut bytes = file_schema.to_ne_bytes().to_vec();
        bytes.extend_from_slice(&schema_version.to_ne_bytes());
        bytes
    }

    #[test]
    fn record_follows_template_order() {
        let store = MemoryTemplateStore::new().with_body(
            None,
            json!({
                "zulu": ["B", 1],
                "info": { "width": ["B", 1], "alpha": ["B", 1] },
                "alpha": ["B", 1]
            }),
        );
        let decoded = decode(&store, 0, &[1, 2, 3, 4]).unwrap();
        let names: Vec<_> = decoded.record.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["zulu", "info", "alpha"]);
        let info = decoded.record.get("info").and_then(Value::as_map).unwrap();
        let fields: Vec<_> = info.keys().map(String::as_str).collect();
        assert_eq!(fields, ["width", "alpha"]);
    }

    #[test]
    fn checkpoint_must_match_exactly() {
        let store = MemoryTemplateStore::new().with_body(
            None,
            json!({ "lead": [null, 1], "blob": ["B", 9], "read_checkpoint:ten": 10 }),
        );
        assert!(decode(&store, 0, &[0u8; 10]).is_ok());

        let short = MemoryTemplateStore::new().with_body(
            None,
            json!({ "blob": ["B", 9], "read_checkpoint:ten": 10 }),
        );
        let err = decode(&short, 0, &[0u8; 10]).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::CheckpointMismatch { expected: 10, actual: 9, .. }
        ));

        let long = MemoryTemplateStore::new().with_body(
            None,
            json!({ "blob": ["B", 11], "read_checkpoint:ten": 10 }),
        );
        let err = decode(&long, 0, &[0u8; 12]).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::CheckpointMismatch { expected: 10, actual: 11, .. }
        ));
    }

    #[test]
    fn requirement_fails_before_body_template_loads() {
        // No body for file_schema 7 would be a SchemaMismatch if it were looked up.
        let store = MemoryTemplateStore::new().with_header(
            1,
            json!({
                "generic_file_header": { "file_schema": ["H", 1], "schema_version": ["H", 1] },
                "requirements:generic_file_header": { "schema_version": 2 }
            }),
        );
        let err = decode(&store, 1, &header_bytes(7, 1)).unwrap_err();
        let DecodeError::RequirementViolation {
            section,
            field,
            expected,
            actual,
        } = err
        else {
            panic!("expected requirement violation");
        };
        assert_eq!(section, "generic_file_header");
        assert_eq!(field, "schema_version");
        assert_eq!(expected, "2");
        assert_eq!(actual, "1");
    }

    #[test]
    fn discriminant_selects_body() {
        let store = header_store(json!({ "payload": { "value": ["i", 1] } }));
        let mut bytes = header_bytes(7, 2);
        bytes.extend_from_slice(&(-5i32).to_ne_bytes());

        let decoded = decode(&store, 1, &bytes).unwrap();
        assert_eq!(decoded.file_schema, Some(7));
        assert_eq!(decoded.consumed, bytes.len());
        assert_eq!(decoded.record.field("payload", "value"), Some(&Value::Int(-5)));
        assert_eq!(
            decoded.record.field("generic_file_header", "file_schema"),
            Some(&Value::Int(7))
        );
    }

    #[test]
    fn unknown_discriminant_is_schema_mismatch() {
        let store = header_store(json!({}));
        let err = decode(&store, 1, &header_bytes(9, 2)).unwrap_err();
        assert!(matches!(err, DecodeError::SchemaMismatch { ref file_schema, .. } if file_schema == "9"));
    }

    #[test]
    fn body_requirements_are_checked_after_body() {
        let store = header_store(json!({
            "payload": { "kind": ["B", 1] },
            "requirements:payload": { "kind": 3 }
        }));
        let mut bytes = header_bytes(7, 2);
        bytes.push(4);
        let err = decode(&store, 1, &bytes).unwrap_err();
        assert!(matches!(err, DecodeError::RequirementViolation { ref section, .. } if section == "payload"));
    }

    #[test]
    fn truncated_field_is_unexpected_eof() {
        let store = header_store(json!({ "payload": { "value": ["q", 1] } }));
        let mut bytes = header_bytes(7, 2);
        bytes.extend_from_slice(&[0u8; 5]);
        let err = decode(&store, 1, &bytes).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnexpectedEof { offset: 4, needed: 8, available: 5 }
        ));
    }

    #[test]
    fn repeat_count_expression_uses_sibling_fields() {
        let store = MemoryTemplateStore::new().with_body(
            None,
            json!({
                "repeat:notes": {
                    "length": ["B", 1],
                    "text": ["string", "length - 1", false]
                }
            }),
        );
        let bytes = b"\x03ab\x02c\x00";
        let decoded = decode(&store, 0, bytes).unwrap();
        assert_eq!(
            decoded.record.field("notes", "length"),
            Some(&Value::List(vec![Value::Int(3), Value::Int(2)]))
        );
        assert_eq!(
            decoded.record.field("notes", "text"),
            Some(&Value::List(vec![
                Value::Text("ab".to_string()),
                Value::Text("c".to_string())
            ]))
        );
        assert_eq!(decoded.consumed, 5);
    }

    #[test]
    fn repeat_expression_cannot_see_itself() {
        let store = MemoryTemplateStore::new().with_body(
            None,
            json!({ "repeat:rows": { "n": ["B", "n + 1"] } }),
        );
        let err = decode(&store, 0, &[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MalformedCountExpression { ref field, offset: 0, .. } if field == "n"
        ));
    }

    #[test]
    fn repeat_count_must_be_non_negative_integer() {
        let store = MemoryTemplateStore::new().with_body(
            None,
            json!({ "repeat:rows": { "n": ["B", 1], "data": ["B", "n - 5"] } }),
        );
        let err = decode(&store, 0, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedCountExpression { offset: 1, .. }));

        let store = MemoryTemplateStore::new().with_body(
            None,
            json!({ "repeat:rows": { "n": ["B", 1], "data": ["B", "n / 2"] } }),
        );
        let err = decode(&store, 0, &[2, 2, 3]).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedCountExpression { .. }));
    }

    #[test]
    fn repeat_read_at_buffer_end_is_null() {
        let store = MemoryTemplateStore::new().with_body(
            None,
            json!({ "repeat:rows": { "a": ["H", 1], "b": ["B", 1] } }),
        );
        let mut bytes = 1u16.to_ne_bytes().to_vec();
        bytes.push(7);
        bytes.extend_from_slice(&2u16.to_ne_bytes());

        let decoded = decode(&store, 0, &bytes).unwrap();
        assert_eq!(
            decoded.record.field("rows", "a"),
            Some(&Value::List(vec![Value::Int(1), Value::Int(2)]))
        );
        assert_eq!(
            decoded.record.field("rows", "b"),
            Some(&Value::List(vec![Value::Int(7), Value::Null]))
        );
        assert_eq!(decoded.consumed, 5);
    }

    #[test]
    fn repeat_stops_when_iteration_reads_nothing() {
        let store = MemoryTemplateStore::new().with_body(
            None,
            json!({ "repeat:rows": { "empty": ["B", 0] } }),
        );
        let decoded = decode(&store, 0, &[1, 2, 3]).unwrap();
        assert_eq!(
            decoded.record.field("rows", "empty"),
            Some(&Value::List(vec![Value::List(Vec::new())]))
        );
        assert_eq!(decoded.consumed, 0);
    }

    #[test]
    fn single_trailing_byte_is_not_decoded() {
        let store = MemoryTemplateStore::new().with_body(
            None,
            json!({ "head": ["B", 2], "repeat:rows": { "a": ["B", 1] } }),
        );
        let decoded = decode(&store, 0, &[1, 2, 3]).unwrap();
        assert_eq!(decoded.record.field("rows", "a"), Some(&Value::List(Vec::new())));
        assert_eq!(decoded.consumed, 2);
    }

    struct CountingHook {
        calls: usize,
    }

    impl SpecialFieldHandler for CountingHook {
        fn read_special(&mut self, ctx: SpecialContext<'_, '_>) -> Result<(), DecodeError> {
            self.calls += 1;
            let byte = ctx.cursor.read_raw(1)?.unwrap_or_default();
            let label = ctx.template_value.as_str().unwrap_or_default().to_string();
            ctx.record.insert(ctx.name, Value::Text(format!("{label}{byte}")));
            Ok(())
        }
    }

    #[test]
    fn special_fields_dispatch_to_registered_hook() {
        let store = MemoryTemplateStore::new().with_body(
            None,
            json!({ "special:tail": "b=", "read_checkpoint:end": 2 }),
        );
        let mut hook = CountingHook { calls: 0 };
        let mut specials = SpecialFields::new();
        specials.register("tail", &mut hook);
        let decoded = SchemaEngine::new(&store, 0)
            .decode(&[9, 7], &mut specials)
            .unwrap_err();
        // The hook reads one byte, so the checkpoint at 2 fails.
        assert!(matches!(decoded, DecodeError::CheckpointMismatch { actual: 1, .. }));
        drop(specials);
        assert_eq!(hook.calls, 1);

        let store = MemoryTemplateStore::new().with_body(None, json!({ "special:tail": "b=" }));
        let mut hook = CountingHook { calls: 0 };
        let mut specials = SpecialFields::new();
        specials.register("tail", &mut hook);
        let decoded = SchemaEngine::new(&store, 0)
            .decode(&[9], &mut specials)
            .unwrap();
        assert_eq!(decoded.record.get("tail"), Some(&Value::Text("b=9".to_string())));
    }

    #[test]
    fn unregistered_special_field_is_error() {
        let store = MemoryTemplateStore::new().with_body(
            None,
            json!({ "lead": ["B", 1], "special:data_packets": null }),
        );
        let err = decode(&store, 0, &[1, 2]).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnhandledSpecialField { ref name, offset: 1 } if name == "data_packets"
        ));
    }
}
