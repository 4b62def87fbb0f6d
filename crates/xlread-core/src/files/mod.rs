//! Per-file-kind wiring on top of the schema engine.
//!
//! A recording directory holds one file per kind (several `erd`/`etc` pairs
//! for long studies). Each kind names its template directory and whether it
//! has a generic header stage; `erd` additionally plugs the packet codec in
//! as the `special:data_packets` hook. Cross-file checks live here too.
//!
//! Version française (résumé):
//! Chaque type de fichier choisit son répertoire de gabarits et son schéma de
//! base. Le type `erd` branche le décodeur de paquets sur le champ spécial
//! `data_packets`. La validation croisée `etc`/`erd` est une détection seule.

mod erd;
mod etc;

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::codec::PacketStream;
use crate::error::{DecodeError, FileError};
use crate::schema::{DirTemplateStore, SchemaEngine, SpecialFields, TemplateStore};
use crate::Record;

pub use erd::{ChannelInfo, DATA_PACKETS_FIELD, PacketStreamField, RAW_HEADER_SECTION};
pub use etc::{TOC_OFFSET_FIELD, TOC_SECTION, validate_toc};

/// One member of a recording's file family, named by its extension.
///
/// # Examples
/// ```
/// use std::path::Path;
///
/// use xlread_core::FileKind;
///
/// let kind = FileKind::from_path(Path::new("Patient~1_0001.erd")).unwrap();
/// assert_eq!(kind, FileKind::Erd);
/// assert_eq!(kind.base_schema(), 1);
/// assert_eq!("VTC".parse::<FileKind>().unwrap().base_schema(), -1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Study information.
    Eeg,
    /// Raw sample packets.
    Erd,
    /// Event log (notes).
    Ent,
    /// Table of contents into the packet stream.
    Etc,
    /// Sample stamp to wall clock sync map.
    Snc,
    /// Segment table.
    Stc,
    /// Video index; has no generic header.
    Vtc,
}

impl FileKind {
    pub const ALL: [FileKind; 7] = [
        FileKind::Eeg,
        FileKind::Erd,
        FileKind::Ent,
        FileKind::Etc,
        FileKind::Snc,
        FileKind::Stc,
        FileKind::Vtc,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            FileKind::Eeg => "eeg",
            FileKind::Erd => "erd",
            FileKind::Ent => "ent",
            FileKind::Etc => "etc",
            FileKind::Snc => "snc",
            FileKind::Stc => "stc",
            FileKind::Vtc => "vtc",
        }
    }

    /// Case-insensitive lookup by extension, without the dot.
    pub fn from_extension(extension: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.extension().eq_ignore_ascii_case(extension))
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Generic header version read before the body, or `-1` for none.
    pub fn base_schema(self) -> i32 {
        match self {
            FileKind::Vtc => -1,
            _ => 1,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown file kind '{0}' (expected one of eeg, erd, ent, etc, snc, stc, vtc)")]
pub struct UnknownFileKind(pub String);

impl FromStr for FileKind {
    type Err = UnknownFileKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.strip_prefix('.').unwrap_or(value);
        Self::from_extension(trimmed).ok_or_else(|| UnknownFileKind(value.to_string()))
    }
}

/// Everything decoded from one file.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFile {
    pub kind: FileKind,
    pub record: Record,
    pub file_schema: Option<i64>,
    /// Bytes walked by the templates.
    pub consumed: usize,
    /// Present for `erd` files.
    pub packets: Option<PacketStream>,
    /// Present for `erd` files.
    pub channels: Option<ChannelInfo>,
}

/// Knobs for a decode beyond the file kind and template source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Reorder `erd` channel names by the header's physical channel map.
    pub reorder_electrodes: bool,
}

impl DecodeOptions {
    /// Decode an in-memory file.
    ///
    /// # Errors
    /// The first [`DecodeError`] raised by the header stage, the body stage
    /// or the packet codec.
    pub fn decode_bytes(
        &self,
        kind: FileKind,
        bytes: &[u8],
        store: &dyn TemplateStore,
    ) -> Result<DecodedFile, DecodeError> {
        let engine = SchemaEngine::new(store, kind.base_schema());
        let mut packets = PacketStreamField::new().with_electrode_reorder(self.reorder_electrodes);
        let decoded = {
            let mut specials = SpecialFields::new();
            if kind == FileKind::Erd {
                specials.register(DATA_PACKETS_FIELD, &mut packets);
            }
            engine.decode(bytes, &mut specials)?
        };
        let (packets, channels) = packets.into_parts();
        Ok(DecodedFile {
            kind,
            record: decoded.record,
            file_schema: decoded.file_schema,
            consumed: decoded.consumed,
            packets,
            channels,
        })
    }

    /// Read `path` and decode it with templates under `templates_root`.
    ///
    /// # Errors
    /// A [`FileError`] naming `path`.
    pub fn decode_path(
        &self,
        kind: FileKind,
        path: &Path,
        templates_root: &Path,
    ) -> Result<DecodedFile, FileError> {
        let bytes = fs::read(path).map_err(|err| FileError::new(path, DecodeError::Io(err)))?;
        let store = DirTemplateStore::new(templates_root, kind.extension());
        self.decode_bytes(kind, &bytes, &store)
            .map_err(|err| FileError::new(path, err))
    }
}

/// [`DecodeOptions::decode_bytes`] with default options.
pub fn decode_bytes(
    kind: FileKind,
    bytes: &[u8],
    store: &dyn TemplateStore,
) -> Result<DecodedFile, DecodeError> {
    DecodeOptions::default().decode_bytes(kind, bytes, store)
}

/// [`DecodeOptions::decode_path`] with default options.
pub fn decode_path(
    kind: FileKind,
    path: &Path,
    templates_root: &Path,
) -> Result<DecodedFile, FileError> {
    DecodeOptions::default().decode_path(kind, path, templates_root)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;

    use super::{FileKind, decode_bytes};
    use crate::{DecodeError, MemoryTemplateStore};

    #[test]
    fn kinds_round_trip_through_extensions() {
        for kind in FileKind::ALL {
            assert_eq!(FileKind::from_extension(kind.extension()), Some(kind));
            assert_eq!(kind.to_string().parse::<FileKind>().unwrap(), kind);
        }
        assert_eq!(".Etc".parse::<FileKind>().unwrap(), FileKind::Etc);
        assert!("pcap".parse::<FileKind>().is_err());
        assert_eq!(FileKind::from_path(Path::new("notes")), None);
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(serde_json::to_value(FileKind::Snc).unwrap(), json!("snc"));
    }

    #[test]
    fn headerless_kind_skips_header_stage() {
        let store = MemoryTemplateStore::new().with_body(
            None,
            json!({ "entry": { "id": ["H", 1] } }),
        );
        let decoded = decode_bytes(FileKind::Vtc, &[0x00, 0x2A], &store).unwrap();
        assert_eq!(decoded.file_schema, None);
        assert_eq!(decoded.consumed, 2);
        assert!(decoded.packets.is_none());
        assert!(decoded.record.field("entry", "id").is_some());
    }

    #[test]
    fn special_field_outside_erd_is_unhandled() {
        let store = MemoryTemplateStore::new().with_body(
            None,
            json!({ "special:data_packets": null }),
        );
        let err = decode_bytes(FileKind::Vtc, &[], &store).unwrap_err();
        assert!(matches!(err, DecodeError::UnhandledSpecialField { ref name, .. } if name == "data_packets"));
    }
}
