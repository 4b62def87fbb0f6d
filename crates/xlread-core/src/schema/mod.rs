//! Template-driven record decoding.
//!
//! A template is an ordered JSON object. Keys name plain fields
//! (`[type, count]`), one-level sections (an object of fields), or carry a
//! prefix that changes their meaning:
//! - `requirements:<section>`: expected field values, checked after each stage
//! - `read_checkpoint:<name>`: the cursor must sit exactly at this offset
//! - `special:<name>`: handed to a registered [`SpecialFieldHandler`]
//! - `repeat:<name>`: fields read repeatedly until the end of the buffer;
//!   counts may be expressions over the other fields of the block
//!
//! Documents come from a [`TemplateStore`]; the [`SchemaEngine`] walks them
//! over a byte cursor.
//!
//! Version française (résumé):
//! Les gabarits JSON sont ordonnés : champs, sections, exigences, points de
//! contrôle, champs spéciaux et blocs répétés. Le moteur lit l'en-tête
//! générique, valide, puis choisit le gabarit du corps via `file_schema`.

pub mod engine;
pub mod special;
pub mod store;
pub mod template;

pub use engine::{Decoded, SchemaEngine, validate};
pub use special::{SpecialContext, SpecialFieldHandler, SpecialFields};
pub use store::{DirTemplateStore, MemoryTemplateStore, TemplateStore, load_json};
pub use template::{CountSpec, Entry, FieldSpec, RepeatField, Requirement, Template, TypeTag};
