use std::collections::BTreeMap;

use serde_json::Value as Json;

use super::store::TemplateStore;
use crate::Record;
use crate::cursor::ByteCursor;
use crate::error::DecodeError;

/// Everything a special-field hook may touch while it runs.
pub struct SpecialContext<'c, 'b> {
    pub cursor: &'c mut ByteCursor<'b>,
    /// Entry name without the `special:` prefix.
    pub name: &'c str,
    pub template_value: &'c Json,
    pub record: &'c mut Record,
    pub file_schema: Option<i64>,
    pub store: &'c dyn TemplateStore,
}

/// A reader for one `special:<name>` entry.
///
/// The hook does its own reads through the cursor and writes its results
/// into the record.
pub trait SpecialFieldHandler {
    fn read_special(&mut self, ctx: SpecialContext<'_, '_>) -> Result<(), DecodeError>;
}

/// Hooks registered for one decode, keyed by special-field name.
#[derive(Default)]
pub struct SpecialFields<'h> {
    handlers: BTreeMap<String, &'h mut dyn SpecialFieldHandler>,
}

impl<'h> SpecialFields<'h> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: &'h mut dyn SpecialFieldHandler,
    ) -> &mut Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Run the hook registered under `ctx.name`.
    ///
    /// # Errors
    /// `UnhandledSpecialField` when nothing is registered, or whatever the
    /// hook returns.
    pub fn dispatch(&mut self, ctx: SpecialContext<'_, '_>) -> Result<(), DecodeError> {
        match self.handlers.get_mut(ctx.name) {
            Some(handler) => handler.read_special(ctx),
            None => Err(DecodeError::UnhandledSpecialField {
                name: ctx.name.to_string(),
                offset: ctx.cursor.position(),
            }),
        }
    }
}
