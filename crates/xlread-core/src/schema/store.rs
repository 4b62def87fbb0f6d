use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value as Json;
use tracing::debug;

use super::template::Template;
use crate::conversion::ConversionTable;
use crate::error::DecodeError;

pub const BODY_TEMPLATE_FILE: &str = "data_template.json";
pub const CONVERSION_FILE: &str = "conversion.json";

pub fn header_template_file(base_schema: u32) -> String {
    format!("generic_header_data_template_schema_{base_schema}.json")
}

pub fn schema_dir(file_schema: i64) -> String {
    format!("file_schema_{file_schema}")
}

/// Source of template documents for one file kind.
///
/// `file_schema` is `None` for file kinds without a header stage.
pub trait TemplateStore {
    fn header_template(&self, base_schema: u32) -> Result<Template, DecodeError>;
    fn body_template(&self, file_schema: Option<i64>) -> Result<Template, DecodeError>;
    fn conversion_table(&self, file_schema: Option<i64>) -> Result<ConversionTable, DecodeError>;
}

/// Templates read from a directory tree.
///
/// ```text
/// <root>/generic_header_data_template_schema_<v>.json
/// <root>/<kind>/file_schema_<n>/data_template.json
/// <root>/<kind>/file_schema_<n>/conversion.json
/// <root>/<kind>/data_template.json          (no header stage)
/// ```
#[derive(Debug, Clone)]
pub struct DirTemplateStore {
    root: PathBuf,
    kind_dir: String,
}

impl DirTemplateStore {
    pub fn new(root: impl Into<PathBuf>, kind_dir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            kind_dir: kind_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kind_root(&self) -> PathBuf {
        self.root.join(&self.kind_dir)
    }

    /// Directory holding documents for `file_schema`.
    ///
    /// # Errors
    /// `SchemaMismatch` when no such directory exists.
    fn schema_root(&self, file_schema: Option<i64>) -> Result<PathBuf, DecodeError> {
        let kind_root = self.kind_root();
        let Some(file_schema) = file_schema else {
            return Ok(kind_root);
        };
        let dir = kind_root.join(schema_dir(file_schema));
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(DecodeError::SchemaMismatch {
                file_schema: file_schema.to_string(),
                location: kind_root.display().to_string(),
            })
        }
    }
}

impl TemplateStore for DirTemplateStore {
    fn header_template(&self, base_schema: u32) -> Result<Template, DecodeError> {
        let path = self.root.join(header_template_file(base_schema));
        Template::from_json(&load_json(&path)?)
    }

    fn body_template(&self, file_schema: Option<i64>) -> Result<Template, DecodeError> {
        let path = self.schema_root(file_schema)?.join(BODY_TEMPLATE_FILE);
        debug!(path = %path.display(), "loading body template");
        Template::from_json(&load_json(&path)?)
    }

    fn conversion_table(&self, file_schema: Option<i64>) -> Result<ConversionTable, DecodeError> {
        let path = self.schema_root(file_schema)?.join(CONVERSION_FILE);
        ConversionTable::from_json(&load_json(&path)?)
    }
}

/// Read a JSON document, keeping object key order.
pub fn load_json(path: &Path) -> Result<Json, DecodeError> {
    let text = fs::read_to_string(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => DecodeError::MissingTemplateFile {
            path: path.to_path_buf(),
        },
        _ => DecodeError::Io(err),
    })?;
    serde_json::from_str(&text).map_err(|source| DecodeError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Templates held in memory, for embedding and tests.
///
/// # Examples
/// ```
/// use serde_json::json;
/// use xlread_core::{MemoryTemplateStore, TemplateStore};
///
/// let store = MemoryTemplateStore::new()
///     .with_body(Some(3), json!({ "count": ["I", 1] }));
/// assert!(store.body_template(Some(3)).is_ok());
/// assert!(store.body_template(Some(4)).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplateStore {
    headers: BTreeMap<u32, Json>,
    bodies: BTreeMap<Option<i64>, Json>,
    conversions: BTreeMap<Option<i64>, Json>,
}

const MEMORY_ROOT: &str = "<memory>";

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, base_schema: u32, document: Json) -> Self {
        self.headers.insert(base_schema, document);
        self
    }

    pub fn with_body(mut self, file_schema: Option<i64>, document: Json) -> Self {
        self.bodies.insert(file_schema, document);
        self
    }

    pub fn with_conversion(mut self, file_schema: Option<i64>, document: Json) -> Self {
        self.conversions.insert(file_schema, document);
        self
    }

    fn lookup<'a>(
        documents: &'a BTreeMap<Option<i64>, Json>,
        file_schema: Option<i64>,
        file: &str,
    ) -> Result<&'a Json, DecodeError> {
        if let Some(document) = documents.get(&file_schema) {
            return Ok(document);
        }
        match file_schema {
            Some(file_schema) => Err(DecodeError::SchemaMismatch {
                file_schema: file_schema.to_string(),
                location: MEMORY_ROOT.to_string(),
            }),
            None => Err(DecodeError::MissingTemplateFile {
                path: Path::new(MEMORY_ROOT).join(file),
            }),
        }
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn header_template(&self, base_schema: u32) -> Result<Template, DecodeError> {
        let document = self.headers.get(&base_schema).ok_or_else(|| {
            DecodeError::MissingTemplateFile {
                path: Path::new(MEMORY_ROOT).join(header_template_file(base_schema)),
            }
        })?;
        Template::from_json(document)
    }

    fn body_template(&self, file_schema: Option<i64>) -> Result<Template, DecodeError> {
        Template::from_json(Self::lookup(&self.bodies, file_schema, BODY_TEMPLATE_FILE)?)
    }

    fn conversion_table(&self, file_schema: Option<i64>) -> Result<ConversionTable, DecodeError> {
        ConversionTable::from_json(Self::lookup(
            &self.conversions,
            file_schema,
            CONVERSION_FILE,
        )?)
    }
}
